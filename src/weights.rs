//! Trigger-efficiency event weights and QCD normalization to data.

use ahash::AHashMap;
use ndarray::{Array1, Array2, Zip};
use ndarray_npy::NpzReader;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use crate::config::{CollectionSpec, SampleRoles};
use crate::error::{PipelineError, Result};
use crate::event::{EventBatch, Sample};

pub const FINAL_WEIGHT: &str = "finalWeight";

/// Binned 2D efficiency table over (pt, mass).
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLookup2D {
    x_edges: Vec<f64>,
    y_edges: Vec<f64>,
    values: Array2<f64>,
}

fn check_edges(name: &str, edges: &[f64]) -> Result<()> {
    if edges.len() < 2 || edges.windows(2).any(|w| !(w[0] < w[1])) {
        return Err(PipelineError::shape(
            name,
            "at least 2 strictly increasing edges",
            format!("{edges:?}"),
        ));
    }
    Ok(())
}

/// Bin index with edge bins absorbing out-of-range values.
#[inline]
fn clamped_bin(edges: &[f64], x: f64) -> usize {
    let nbins = edges.len() - 1;
    edges.partition_point(|&e| e <= x).saturating_sub(1).min(nbins - 1)
}

impl DenseLookup2D {
    /// NaN cells are read as zero efficiency.
    pub fn new(x_edges: Vec<f64>, y_edges: Vec<f64>, values: Array2<f64>) -> Result<Self> {
        check_edges("x_edges", &x_edges)?;
        check_edges("y_edges", &y_edges)?;
        let expected = (x_edges.len() - 1, y_edges.len() - 1);
        if values.dim() != expected {
            return Err(PipelineError::shape(
                "values",
                format!("{expected:?}"),
                format!("{:?}", values.dim()),
            ));
        }
        let values = values.mapv(|v| if v.is_nan() { 0.0 } else { v });
        Ok(DenseLookup2D {
            x_edges,
            y_edges,
            values,
        })
    }

    pub fn read<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut npz = NpzReader::new(reader)?;
        let x: Array1<f64> = npz.by_name("x_edges.npy")?;
        let y: Array1<f64> = npz.by_name("y_edges.npy")?;
        let values: Array2<f64> = npz.by_name("values.npy")?;
        Self::new(x.to_vec(), y.to_vec(), values)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::read(File::open(path)?)
    }

    /// Non-finite inputs have no defined bin and give 0.
    #[inline]
    pub fn lookup(&self, x: f64, y: f64) -> f64 {
        if !x.is_finite() || !y.is_finite() {
            return 0.0;
        }
        self.values[[clamped_bin(&self.x_edges, x), clamped_bin(&self.y_edges, y)]]
    }

    pub fn lookup_all(&self, x: &Array1<f64>, y: &Array1<f64>) -> Array1<f64> {
        Zip::from(x).and(y).map_collect(|&x, &y| self.lookup(x, y))
    }
}

/// Per-candidate trigger efficiency tables.
#[derive(Debug, Clone)]
pub struct TriggerLookups {
    pub bb: DenseLookup2D,
    pub vv: DenseLookup2D,
}

fn candidate_columns<'a>(
    batch: &'a EventBatch,
    spec: &CollectionSpec,
) -> Result<(&'a Array1<f64>, &'a Array1<f64>)> {
    let pt = batch.event_column(&format!("{}Pt", spec.output_prefix))?;
    let masses: Vec<String> = spec
        .mass_fields
        .iter()
        .map(|m| format!("{}{}", spec.output_prefix, m))
        .collect();
    let (_, mass) = batch.first_event_column(&masses)?;
    Ok((pt, mass))
}

impl TriggerLookups {
    /// Probability that at least one candidate fires the trigger.
    pub fn combined_efficiency(
        &self,
        batch: &EventBatch,
        bb_spec: &CollectionSpec,
        vv_spec: &CollectionSpec,
    ) -> Result<Array1<f64>> {
        let (bb_pt, bb_mass) = candidate_columns(batch, bb_spec)?;
        let (vv_pt, vv_mass) = candidate_columns(batch, vv_spec)?;
        let eff_bb = self.bb.lookup_all(bb_pt, bb_mass);
        let eff_vv = self.vv.lookup_all(vv_pt, vv_mass);
        Ok(Zip::from(&eff_bb)
            .and(&eff_vv)
            .map_collect(|&a, &b| 1.0 - (1.0 - a) * (1.0 - b)))
    }
}

/// `weight` for data (and when no tables are given), otherwise weight times
/// the combined trigger efficiency.
pub fn final_weights(
    batch: &EventBatch,
    weight_field: &str,
    is_data: bool,
    lookups: Option<&TriggerLookups>,
    bb_spec: &CollectionSpec,
    vv_spec: &CollectionSpec,
) -> Result<Array1<f64>> {
    let weight = batch.event_column(weight_field)?;
    match lookups {
        Some(luts) if !is_data => {
            let eff = luts.combined_efficiency(batch, bb_spec, vv_spec)?;
            Ok(weight * &eff)
        }
        _ => Ok(weight.clone()),
    }
}

/// (data - non-QCD backgrounds) / QCD, over `finalWeight` sums.
pub fn qcd_scale_factor(sums: &AHashMap<String, f64>, roles: &SampleRoles) -> Option<f64> {
    let data = *sums.get(&roles.data)?;
    let qcd = *sums.get(&roles.qcd)?;
    if qcd == 0.0 || !qcd.is_finite() {
        return None;
    }
    let others: f64 = roles
        .backgrounds
        .iter()
        .filter(|b| **b != roles.qcd)
        .filter_map(|b| sums.get(b))
        .sum();
    Some((data - others) / qcd)
}

/// Scale the QCD sample's `finalWeight` so the background total matches data.
pub fn normalize_qcd(samples: &mut [Sample], roles: &SampleRoles) -> Result<Option<f64>> {
    let mut sums: AHashMap<String, f64> = AHashMap::default();
    for s in samples.iter() {
        let total: f64 = s.batch.event_column(FINAL_WEIGHT)?.sum();
        tracing::info!(sample = %s.name, events = s.batch.n_events(), weighted = total, "sample yield");
        sums.insert(s.name.clone(), total);
    }

    let Some(sf) = qcd_scale_factor(&sums, roles) else {
        tracing::warn!(
            data = %roles.data,
            qcd = %roles.qcd,
            "QCD normalization skipped: data or QCD sample missing or empty"
        );
        return Ok(None);
    };

    if let Some(qcd) = samples.iter_mut().find(|s| s.name == roles.qcd) {
        let scaled = qcd.batch.event_column(FINAL_WEIGHT)? * sf;
        qcd.batch.insert_event(FINAL_WEIGHT, scaled)?;
    }
    tracing::info!(scale_factor = sf, "QCD normalized to data");
    Ok(Some(sf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn table() -> DenseLookup2D {
        DenseLookup2D::new(
            vec![200.0, 400.0, 600.0],
            vec![0.0, 100.0, 200.0],
            array![[0.1, 0.2], [0.8, f64::NAN]],
        )
        .unwrap()
    }

    #[test]
    fn lookup_clamps_to_edge_bins() {
        let t = table();
        assert_eq!(t.lookup(250.0, 50.0), 0.1);
        assert_eq!(t.lookup(400.0, 50.0), 0.8);
        assert_eq!(t.lookup(50.0, 150.0), 0.2);
        assert_eq!(t.lookup(1e6, -5.0), 0.8);
        assert_eq!(t.lookup(1e6, 1e6), 0.0);
        assert_eq!(t.lookup(f64::NAN, 50.0), 0.0);
    }

    #[test]
    fn rejects_inconsistent_table() {
        assert!(DenseLookup2D::new(vec![0.0, 1.0], vec![0.0, 1.0], array![[1.0, 2.0]]).is_err());
        assert!(DenseLookup2D::new(vec![1.0, 0.0], vec![0.0, 1.0], array![[1.0]]).is_err());
    }

    #[test]
    fn final_weight_combines_candidates() {
        let mut b = EventBatch::new();
        b.insert_event("weight", array![2.0, 1.0]).unwrap();
        b.insert_event("bbFatJetPt", array![250.0, 500.0]).unwrap();
        b.insert_event("bbFatJetMsd", array![50.0, 50.0]).unwrap();
        b.insert_event("VVFatJetPt", array![250.0, 250.0]).unwrap();
        b.insert_event("VVFatJetMsd", array![150.0, 50.0]).unwrap();
        let luts = TriggerLookups {
            bb: table(),
            vv: table(),
        };
        let bb = CollectionSpec::ak8_bb();
        let vv = CollectionSpec::ak15_vv();

        let w = final_weights(&b, "weight", false, Some(&luts), &bb, &vv).unwrap();
        assert_relative_eq!(w[0], 2.0 * (1.0 - 0.9 * 0.8), epsilon = 1e-12);
        assert_relative_eq!(w[1], 1.0 - 0.2 * 0.9, epsilon = 1e-12);

        let data = final_weights(&b, "weight", true, Some(&luts), &bb, &vv).unwrap();
        assert_eq!(data, array![2.0, 1.0]);
    }

    #[test]
    fn qcd_scale_subtracts_other_backgrounds() {
        let roles = SampleRoles::default();
        let mut sums = AHashMap::default();
        sums.insert("Data".to_string(), 100.0);
        sums.insert("V".to_string(), 10.0);
        sums.insert("Top".to_string(), 20.0);
        sums.insert("QCD".to_string(), 35.0);
        sums.insert("HHbbVV4q".to_string(), 1.0);
        assert_relative_eq!(qcd_scale_factor(&sums, &roles).unwrap(), 2.0);

        sums.remove("Data");
        assert!(qcd_scale_factor(&sums, &roles).is_none());
    }

    #[test]
    fn normalize_rescales_only_qcd() {
        let mk = |name: &str, w: Array1<f64>| {
            let mut b = EventBatch::new();
            b.insert_event(FINAL_WEIGHT, w).unwrap();
            Sample::new(name, b)
        };
        let mut samples = vec![
            mk("Data", array![50.0, 50.0]),
            mk("Top", array![10.0]),
            mk("QCD", array![15.0, 5.0]),
            mk("HHbbVV4q", array![0.5]),
        ];
        let sf = normalize_qcd(&mut samples, &SampleRoles::default()).unwrap();
        assert_eq!(sf, Some(4.5));
        assert_eq!(samples[2].batch.event_column(FINAL_WEIGHT).unwrap(), &array![67.5, 22.5]);
        assert_eq!(samples[3].batch.event_column(FINAL_WEIGHT).unwrap(), &array![0.5]);
    }
}
