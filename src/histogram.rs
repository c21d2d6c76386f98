//! Weighted 1D histograms of the augmented per-event fields.

use ndarray::Array1;
use ndarray_npy::NpzWriter;
use std::fs::File;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::event::Sample;

/// Regular binning on [lo, hi).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binning {
    pub n_bins: usize,
    pub lo: f64,
    pub hi: f64,
}

impl Binning {
    pub fn new(n_bins: usize, lo: f64, hi: f64) -> Result<Self> {
        if n_bins == 0 || !(lo < hi) || !lo.is_finite() || !hi.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "bad binning ({n_bins}, {lo}, {hi})"
            )));
        }
        Ok(Binning { n_bins, lo, hi })
    }

    pub fn edges(&self) -> Vec<f64> {
        let width = (self.hi - self.lo) / self.n_bins as f64;
        (0..=self.n_bins)
            .map(|i| self.lo + width * i as f64)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hist1D {
    pub binning: Binning,
    pub sumw: Vec<f64>,
    pub sumw2: Vec<f64>,
    pub underflow: f64,
    pub overflow: f64,
    pub entries: u64,
    /// NaN / inf values are never binned; they are counted here instead.
    pub non_finite_entries: u64,
    pub non_finite_weight: f64,
}

impl Hist1D {
    pub fn new(binning: Binning) -> Self {
        Hist1D {
            binning,
            sumw: vec![0.0; binning.n_bins],
            sumw2: vec![0.0; binning.n_bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
            non_finite_entries: 0,
            non_finite_weight: 0.0,
        }
    }

    #[inline]
    pub fn fill_one(&mut self, x: f64, w: f64) {
        self.entries += 1;
        if !x.is_finite() {
            self.non_finite_entries += 1;
            self.non_finite_weight += w;
            return;
        }
        let Binning { n_bins, lo, hi } = self.binning;
        if x < lo {
            self.underflow += w;
        } else if x >= hi {
            self.overflow += w;
        } else {
            let bin = (((x - lo) / (hi - lo)) * n_bins as f64) as usize;
            let bin = bin.min(n_bins - 1);
            self.sumw[bin] += w;
            self.sumw2[bin] += w * w;
        }
    }

    pub fn fill(&mut self, values: &Array1<f64>, weights: &Array1<f64>) -> Result<()> {
        if values.len() != weights.len() {
            return Err(PipelineError::shape(
                "histogram weights",
                values.len(),
                weights.len(),
            ));
        }
        for (&x, &w) in values.iter().zip(weights.iter()) {
            self.fill_one(x, w);
        }
        Ok(())
    }

    /// Fill only the entries where `mask` is true.
    pub fn fill_masked(
        &mut self,
        values: &Array1<f64>,
        weights: &Array1<f64>,
        mask: &Array1<bool>,
    ) -> Result<()> {
        if values.len() != weights.len() || values.len() != mask.len() {
            return Err(PipelineError::shape(
                "histogram weights / mask",
                values.len(),
                format!("{} / {}", weights.len(), mask.len()),
            ));
        }
        for ((&x, &w), &keep) in values.iter().zip(weights).zip(mask) {
            if keep {
                self.fill_one(x, w);
            }
        }
        Ok(())
    }

    pub fn total(&self) -> f64 {
        self.sumw.iter().sum()
    }
}

/// Default control-plot variables with their binning.
pub fn control_variables() -> Vec<(&'static str, Binning)> {
    let b = |n, lo, hi| Binning { n_bins: n, lo, hi };
    vec![
        ("bbFatJetPtOverDijetPt", b(50, 0.0, 40.0)),
        ("VVFatJetPtOverDijetPt", b(50, 0.0, 40.0)),
        ("VVFatJetPtOverbbFatJetPt", b(50, 0.4, 2.5)),
        ("DijetPt", b(50, 0.0, 750.0)),
        ("DijetMass", b(50, 0.0, 2500.0)),
        ("DijetEta", b(50, -8.0, 8.0)),
    ]
}

/// One histogram per (variable, sample).
#[derive(Debug, Clone)]
pub struct HistogramSet {
    pub variable: String,
    pub per_sample: Vec<(String, Hist1D)>,
}

pub fn fill_samples(
    samples: &[Sample],
    variables: &[(&str, Binning)],
    weight_field: &str,
) -> Result<Vec<HistogramSet>> {
    let mut out = Vec::with_capacity(variables.len());
    for &(var, binning) in variables {
        let mut per_sample = Vec::with_capacity(samples.len());
        for s in samples {
            let values = s.batch.event_column(var)?;
            let weights = s.batch.event_column(weight_field)?;
            let mut h = Hist1D::new(binning);
            h.fill(values, weights)?;
            if h.non_finite_entries > 0 {
                tracing::warn!(
                    variable = var,
                    sample = %s.name,
                    entries = h.non_finite_entries,
                    weight = h.non_finite_weight,
                    "non-finite values left out of histogram"
                );
            }
            per_sample.push((s.name.clone(), h));
        }
        out.push(HistogramSet {
            variable: var.to_string(),
            per_sample,
        });
    }
    Ok(out)
}

/// `{var}__{sample}__{sumw,sumw2,flow,edges}.npy` per histogram.
pub fn save_histograms(path: &Path, sets: &[HistogramSet]) -> Result<()> {
    let f = File::create(path)?;
    let mut npz = NpzWriter::new(f);
    for set in sets {
        for (sample, h) in &set.per_sample {
            let key = format!("{}__{}", set.variable, sample);
            npz.add_array(format!("{key}__sumw.npy"), &Array1::from_vec(h.sumw.clone()))?;
            npz.add_array(format!("{key}__sumw2.npy"), &Array1::from_vec(h.sumw2.clone()))?;
            npz.add_array(
                format!("{key}__flow.npy"),
                &Array1::from_vec(vec![h.underflow, h.overflow, h.non_finite_weight]),
            )?;
            npz.add_array(format!("{key}__edges.npy"), &Array1::from_vec(h.binning.edges()))?;
        }
    }
    npz.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBatch;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn bins_flows_and_non_finite() {
        let mut h = Hist1D::new(Binning::new(4, 0.0, 4.0).unwrap());
        h.fill(
            &array![0.0, 1.5, 3.999, 4.0, -0.1, f64::INFINITY, f64::NAN],
            &array![1.0, 2.0, 1.0, 5.0, 3.0, 7.0, 0.5],
        )
        .unwrap();
        assert_eq!(h.sumw, vec![1.0, 2.0, 0.0, 1.0]);
        assert_eq!(h.sumw2, vec![1.0, 4.0, 0.0, 1.0]);
        assert_eq!(h.overflow, 5.0);
        assert_eq!(h.underflow, 3.0);
        assert_eq!(h.non_finite_entries, 2);
        assert_relative_eq!(h.non_finite_weight, 7.5);
        assert_eq!(h.entries, 7);
    }

    #[test]
    fn negative_weights_are_kept() {
        let mut h = Hist1D::new(Binning::new(1, 0.0, 1.0).unwrap());
        h.fill(&array![0.5, 0.5], &array![1.0, -0.25]).unwrap();
        assert_relative_eq!(h.total(), 0.75);
    }

    #[test]
    fn fill_samples_requires_fields() {
        let mut b = EventBatch::new();
        b.insert_event("finalWeight", array![1.0]).unwrap();
        let samples = vec![Sample::new("QCD", b)];
        let vars = [("DijetPt", Binning::new(10, 0.0, 100.0).unwrap())];
        assert!(fill_samples(&samples, &vars, "finalWeight").is_err());
    }

    #[test]
    fn masked_fill_skips_unselected() {
        let mut h = Hist1D::new(Binning::new(2, 0.0, 2.0).unwrap());
        h.fill_masked(&array![0.5, 1.5, 1.5], &array![1.0, 2.0, 4.0], &array![true, false, true])
            .unwrap();
        assert_eq!(h.sumw, vec![1.0, 4.0]);
        assert_eq!(h.entries, 2);
        assert!(h.fill_masked(&array![0.5], &array![1.0], &array![true, true]).is_err());
    }

    #[test]
    fn edges_span_range() {
        let e = Binning::new(50, 0.0, 40.0).unwrap().edges();
        assert_eq!(e.len(), 51);
        assert_relative_eq!(e[50], 40.0);
    }
}
