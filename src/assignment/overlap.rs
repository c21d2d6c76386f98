use ndarray::Array2;
use rayon::prelude::*;

use super::selection::{leading_slots, slot_mask};
use crate::error::{PipelineError, Result};
use crate::event::{CandidateSlot, Jet, JetCollection, JetPair, SlotIndex};

/// Outcome of overlap resolution for one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapDecision {
    pub vv_role: CandidateSlot,
    /// deltaR(bb candidate, VV leading-by-score)
    pub d_cand: f64,
    /// deltaR(bb candidate, VV non-leading)
    pub d_other: f64,
    pub overlapping: bool,
    /// One of the three jets involved is a fill value.
    pub degenerate: bool,
}

impl OverlapDecision {
    #[inline]
    pub fn flipped(&self) -> bool {
        self.vv_role == CandidateSlot::NonLeading
    }
}

/// Keep the VV leading-by-score jet unless it sits within `dr_threshold` of
/// the bb candidate and the other VV jet is strictly farther away. Events
/// with a missing jet are never flipped.
#[inline]
pub fn resolve_event(bb: &Jet, vv: &JetPair, vv_leading: SlotIndex, dr_threshold: f64) -> OverlapDecision {
    let lead = vv.get(vv_leading);
    let other = vv.get(vv_leading.other());

    let d_cand = bb.p4.delta_r(&lead.p4);
    let d_other = bb.p4.delta_r(&other.p4);
    let degenerate = !(bb.valid && lead.valid && other.valid);

    let overlapping = d_cand < dr_threshold;
    let farther = d_other > d_cand;
    let vv_role = if overlapping && farther && !degenerate {
        CandidateSlot::NonLeading
    } else {
        CandidateSlot::Leading
    };

    OverlapDecision {
        vv_role,
        d_cand,
        d_other,
        overlapping,
        degenerate,
    }
}

/// Final bb/VV assignment for a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub bb_slot: Vec<SlotIndex>,
    pub vv_leading: Vec<SlotIndex>,
    pub decisions: Vec<OverlapDecision>,
}

impl Assignment {
    #[inline]
    pub fn n_events(&self) -> usize {
        self.decisions.len()
    }

    pub fn vv_slot(&self) -> Vec<SlotIndex> {
        self.vv_leading
            .iter()
            .zip(&self.decisions)
            .map(|(&lead, d)| d.vv_role.resolve(lead))
            .collect()
    }

    pub fn bb_mask(&self) -> Array2<bool> {
        slot_mask(&self.bb_slot)
    }

    pub fn vv_leading_mask(&self) -> Array2<bool> {
        slot_mask(&self.vv_leading)
    }

    pub fn vv_mask(&self) -> Array2<bool> {
        slot_mask(&self.vv_slot())
    }

    pub fn n_flipped(&self) -> usize {
        self.decisions.iter().filter(|d| d.flipped()).count()
    }

    pub fn n_overlapping(&self) -> usize {
        self.decisions.iter().filter(|d| d.overlapping).count()
    }

    pub fn n_degenerate(&self) -> usize {
        self.decisions.iter().filter(|d| d.degenerate).count()
    }
}

/// Pick the bb candidate from `bb` and the VV candidate from `vv`.
pub fn assign(bb: &JetCollection, vv: &JetCollection, dr_threshold: f64) -> Result<Assignment> {
    if bb.n_events() != vv.n_events() {
        return Err(PipelineError::shape(
            vv.prefix.as_str(),
            format!("{} events", bb.n_events()),
            format!("{} events", vv.n_events()),
        ));
    }

    let bb_slot = leading_slots(bb.scores.view())?;
    let vv_leading = leading_slots(vv.scores.view())?;

    let decisions: Vec<OverlapDecision> = (0..bb.n_events())
        .into_par_iter()
        .map(|event| {
            let bb_jet = bb.jet(event, bb_slot[event]);
            resolve_event(&bb_jet, &vv.pair(event), vv_leading[event], dr_threshold)
        })
        .collect();

    let assignment = Assignment {
        bb_slot,
        vv_leading,
        decisions,
    };

    tracing::debug!(
        events = assignment.n_events(),
        overlapping = assignment.n_overlapping(),
        flipped = assignment.n_flipped(),
        "overlap resolution"
    );
    let degenerate = assignment.n_degenerate();
    if degenerate > 0 {
        tracing::warn!(
            degenerate,
            events = assignment.n_events(),
            "events with a missing fat jet reached overlap resolution; kept VV leading jet"
        );
    }

    Ok(assignment)
}
