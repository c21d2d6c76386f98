use indicatif::{ProgressBar, ProgressStyle};
use itertools::izip;
use ndarray::Array1;
use rayon::prelude::*;

use crate::assignment::{Assignment, OverlapDecision, assign};
use crate::config::{CollectionSpec, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::event::{Column, EventBatch, JetCollection, Sample, SlotIndex};
use crate::features::{DerivedFeatures, DijetColumns};
use crate::genmatch::{GenHiggsPairs, GenMatch, match_candidates};
use crate::weights::{FINAL_WEIGHT, TriggerLookups, final_weights, normalize_qcd};

pub const VV_CAND_OVERLAP: &str = "VVCandOverlap";
pub const VV_CAND_FLIPPED: &str = "VVCandFlipped";
pub const DEGENERATE_GEOMETRY: &str = "DegenerateGeometry";

fn slot_indices(slots: &[SlotIndex]) -> Vec<usize> {
    slots.iter().map(|s| s.index()).collect()
}

fn flag(assignment: &Assignment, f: impl Fn(&OverlapDecision) -> bool) -> Array1<f64> {
    assignment
        .decisions
        .iter()
        .map(|d| if f(d) { 1.0 } else { 0.0 })
        .collect()
}

/// Copy every per-slot field of `spec`'s collection onto the candidate,
/// e.g. `ak15FatJetPt[i, vv_slot[i]]` -> `VVFatJetPt[i]`.
fn project_candidate(
    input: &EventBatch,
    spec: &CollectionSpec,
    choice: &[SlotIndex],
    out: &mut EventBatch,
) -> Result<usize> {
    let mut projected = 0;
    for (name, col) in input.iter() {
        let (Some(suffix), Column::Slots(values)) = (name.strip_prefix(spec.prefix.as_str()), col) else {
            continue;
        };
        if values.ncols() < 2 {
            return Err(PipelineError::shape(name, "at least 2 jet slots", values.ncols()));
        }
        let picked: Array1<f64> = izip!(values.outer_iter(), choice)
            .map(|(row, slot)| row[slot.index()])
            .collect();
        out.insert_event(format!("{}{}", spec.output_prefix, suffix), picked)?;
        projected += 1;
    }
    Ok(projected)
}

fn check_degenerate(assignment: &Assignment, cfg: &PipelineConfig) -> Result<()> {
    let count = assignment.n_degenerate();
    if cfg.reject_degenerate_events && count > 0 {
        return Err(PipelineError::DegenerateEvents {
            collection: format!("{}/{}", cfg.bb_collection.prefix, cfg.vv_collection.prefix),
            count,
        });
    }
    Ok(())
}

/// Load both collections and check the weight field before anything runs.
fn load_collections(batch: &EventBatch, cfg: &PipelineConfig) -> Result<(JetCollection, JetCollection)> {
    let bb = JetCollection::from_batch(batch, &cfg.bb_collection, cfg.num_jet_slots)?;
    let vv = JetCollection::from_batch(batch, &cfg.vv_collection, cfg.num_jet_slots)?;
    batch.event_column(&cfg.weight_field)?;
    Ok((bb, vv))
}

/// Assign candidates and append the candidate, dijet, ratio and flag fields.
/// Input fields are carried through untouched.
pub fn process_batch(batch: &EventBatch, cfg: &PipelineConfig) -> Result<EventBatch> {
    cfg.validate()?;
    let (bb, vv) = load_collections(batch, cfg)?;
    let assignment = assign(&bb, &vv, cfg.dr_threshold)?;
    check_degenerate(&assignment, cfg)?;

    let bb_slot = assignment.bb_slot.clone();
    let vv_slot = assignment.vv_slot();

    let mut out = batch.clone();
    project_candidate(batch, &cfg.bb_collection, &bb_slot, &mut out)?;
    project_candidate(batch, &cfg.vv_collection, &vv_slot, &mut out)?;

    let bb_p4 = bb.vectors.select(&slot_indices(&bb_slot))?;
    let vv_p4 = vv.vectors.select(&slot_indices(&vv_slot))?;
    let features = DerivedFeatures::compute(&bb_p4, &vv_p4)?;
    features.write_into(
        &mut out,
        &cfg.bb_collection.output_prefix,
        &cfg.vv_collection.output_prefix,
    )?;
    let non_finite = features.n_non_finite();
    if non_finite > 0 {
        tracing::debug!(events = non_finite, "non-finite derived features");
    }

    for (spec, coll) in [(&cfg.bb_collection, &bb), (&cfg.vv_collection, &vv)] {
        DijetColumns::from_collection(&coll.vectors)?.write_into(&mut out, &format!("{}Dijet", spec.label))?;
    }

    out.insert_event(VV_CAND_OVERLAP, flag(&assignment, |d| d.overlapping))?;
    out.insert_event(VV_CAND_FLIPPED, flag(&assignment, |d| d.flipped()))?;
    out.insert_event(DEGENERATE_GEOMETRY, flag(&assignment, |d| d.degenerate))?;

    Ok(out)
}

fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} batches {msg}")
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(label.to_string());
    pb
}

/// Same output as `process_batch` on the whole input, computed in chunks of
/// `batch_size` events across the rayon pool.
pub fn process_in_batches(batch: &EventBatch, batch_size: usize, cfg: &PipelineConfig) -> Result<EventBatch> {
    let chunks = batch.chunks(batch_size)?;
    if chunks.len() == 1 {
        return process_batch(batch, cfg);
    }

    let pb = progress_bar(chunks.len(), "processing");
    let parts = chunks
        .par_iter()
        .map(|chunk| {
            let out = process_batch(chunk, cfg);
            pb.inc(1);
            out
        })
        .collect::<Result<Vec<_>>>()?;
    pb.finish_and_clear();

    EventBatch::concat(&parts)
}

/// Process every sample, attach `finalWeight` and normalize QCD to data.
/// Returns the QCD scale factor when one could be derived.
pub fn process_samples(
    samples: Vec<Sample>,
    cfg: &PipelineConfig,
    batch_size: usize,
    lookups: Option<&TriggerLookups>,
) -> Result<(Vec<Sample>, Option<f64>)> {
    let mut out = Vec::with_capacity(samples.len());
    for sample in samples {
        let mut batch = process_in_batches(&sample.batch, batch_size, cfg)?;
        let is_data = cfg.samples.is_data(&sample.name);
        let weights = final_weights(
            &batch,
            &cfg.weight_field,
            is_data,
            lookups,
            &cfg.bb_collection,
            &cfg.vv_collection,
        )?;
        batch.insert_event(FINAL_WEIGHT, weights)?;

        let flipped: f64 = batch.event_column(VV_CAND_FLIPPED)?.sum();
        tracing::info!(
            sample = %sample.name,
            events = batch.n_events(),
            flipped = flipped as usize,
            data = is_data,
            "sample processed"
        );
        out.push(Sample::new(sample.name, batch));
    }

    let sf = normalize_qcd(&mut out, &cfg.samples)?;
    Ok((out, sf))
}

/// Assignment followed by truth matching on a simulated signal batch.
pub fn gen_match(batch: &EventBatch, cfg: &PipelineConfig) -> Result<GenMatch> {
    cfg.validate()?;
    let (bb, vv) = load_collections(batch, cfg)?;
    let truth = GenHiggsPairs::from_batch(batch)?;
    let assignment = assign(&bb, &vv, cfg.dr_threshold)?;
    check_degenerate(&assignment, cfg)?;
    match_candidates(&truth, &bb, &vv, &assignment, cfg.dr_threshold, cfg.tagger_cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn batch() -> EventBatch {
        let mut b = EventBatch::new();
        b.insert_slots("ak8FatJetPt", array![[400.0, 300.0], [350.0, 250.0]]).unwrap();
        b.insert_slots("ak8FatJetEta", array![[0.0, 1.0], [0.2, -0.3]]).unwrap();
        b.insert_slots("ak8FatJetPhi", array![[0.0, 3.0], [1.0, -2.0]]).unwrap();
        b.insert_slots("ak8FatJetMsd", array![[120.0, 40.0], [110.0, 70.0]]).unwrap();
        b.insert_slots("ak8FatJetParticleNetMD_Txbb", array![[0.9, 0.1], [0.3, 0.95]]).unwrap();
        b.insert_slots("ak8FatJetTau3OverTau2", array![[0.5, 0.6], [0.7, 0.8]]).unwrap();
        b.insert_slots("ak15FatJetPt", array![[420.0, 350.0], [360.0, 300.0]]).unwrap();
        b.insert_slots("ak15FatJetEta", array![[0.0, 0.0], [0.2, -0.3]]).unwrap();
        b.insert_slots("ak15FatJetPhi", array![[0.1, 2.0], [1.0, -2.0]]).unwrap();
        b.insert_slots("ak15FatJetMsd", array![[125.0, 90.0], [115.0, 75.0]]).unwrap();
        b.insert_slots("ak15FatJetParticleNet_Th4q", array![[0.8, 0.3], [0.6, 0.5]]).unwrap();
        b.insert_event("weight", array![1.0, 2.0]).unwrap();
        b
    }

    #[test]
    fn projects_every_slot_field() {
        let out = process_batch(&batch(), &PipelineConfig::default()).unwrap();
        assert_eq!(out.event_column("bbFatJetPt").unwrap(), &array![400.0, 250.0]);
        assert_eq!(out.event_column("bbFatJetTau3OverTau2").unwrap(), &array![0.5, 0.8]);
        // event 0 flips to the far VV jet, event 1 keeps the leading one
        assert_eq!(out.event_column("VVFatJetPt").unwrap(), &array![350.0, 360.0]);
        assert_eq!(out.event_column(VV_CAND_FLIPPED).unwrap(), &array![1.0, 0.0]);
        assert_eq!(out.event_column(VV_CAND_OVERLAP).unwrap(), &array![1.0, 0.0]);
        assert!(out.contains("ak8DijetMass"));
        assert!(out.contains("ak15DijetPt"));
        assert!(out.contains("VVFatJetPtOverbbFatJetPt"));
        assert_eq!(out.event_column("weight").unwrap(), &array![1.0, 2.0]);
    }

    #[test]
    fn missing_weight_fails_before_output() {
        let mut b = EventBatch::new();
        for (name, col) in batch().iter() {
            if name != "weight" {
                b.insert(name, col.clone()).unwrap();
            }
        }
        let err = process_batch(&b, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingField { field } if field == "weight"));
    }

    #[test]
    fn strict_mode_rejects_missing_jets() {
        let mut b = batch();
        b.insert_slots("ak15FatJetPt", array![[420.0, -99999.0], [360.0, 300.0]]).unwrap();
        let mut cfg = PipelineConfig::default();
        let out = process_batch(&b, &cfg).unwrap();
        assert_eq!(out.event_column(DEGENERATE_GEOMETRY).unwrap(), &array![1.0, 0.0]);
        assert_eq!(out.event_column(VV_CAND_FLIPPED).unwrap(), &array![0.0, 0.0]);

        cfg.reject_degenerate_events = true;
        let err = process_batch(&b, &cfg).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateEvents { count: 1, .. }));
    }

    #[test]
    fn chunked_processing_matches_single_batch() {
        let b = EventBatch::concat(&[batch(), batch(), batch()]).unwrap();
        let cfg = PipelineConfig::default();
        let whole = process_batch(&b, &cfg).unwrap();
        let chunked = process_in_batches(&b, 4, &cfg).unwrap();
        assert_eq!(whole, chunked);
    }

    #[test]
    fn narrow_slot_field_is_rejected() {
        let mut b = batch();
        b.insert_slots("ak8FatJetNConstituents", Array2::zeros((2, 1))).unwrap();
        let err = process_batch(&b, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
    }
}
