use ndarray::{Array2, s};

use super::types::EventBatch;
use crate::config::CollectionSpec;
use crate::error::{PipelineError, Result};
use crate::kinematics::{PtEtaPhiM, SlotVectors, VectorArray};

/// Values at or below this are skim fill values (-99999), not measurements.
pub const FILL_CEILING: f64 = -9999.0;

/// Physical column of a two-slot jet record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotIndex {
    First,
    Second,
}

impl SlotIndex {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            SlotIndex::First => 0,
            SlotIndex::Second => 1,
        }
    }

    #[inline]
    pub fn other(self) -> SlotIndex {
        match self {
            SlotIndex::First => SlotIndex::Second,
            SlotIndex::Second => SlotIndex::First,
        }
    }
}

/// Role of a slot relative to the tagger ranking of its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSlot {
    Leading,
    NonLeading,
}

impl CandidateSlot {
    /// Physical slot for this role given which slot leads by score.
    #[inline]
    pub fn resolve(self, leading: SlotIndex) -> SlotIndex {
        match self {
            CandidateSlot::Leading => leading,
            CandidateSlot::NonLeading => leading.other(),
        }
    }

    #[inline]
    pub fn swapped(self) -> CandidateSlot {
        match self {
            CandidateSlot::Leading => CandidateSlot::NonLeading,
            CandidateSlot::NonLeading => CandidateSlot::Leading,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jet {
    pub p4: PtEtaPhiM,
    pub score: f64,
    pub valid: bool,
}

/// The two leading-by-pt fat jets of one collection in one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JetPair(pub [Jet; 2]);

impl JetPair {
    #[inline]
    pub fn get(&self, slot: SlotIndex) -> &Jet {
        &self.0[slot.index()]
    }

    #[inline]
    pub fn n_valid(&self) -> usize {
        self.0.iter().filter(|j| j.valid).count()
    }
}

/// One clustering hypothesis over a whole batch.
#[derive(Debug, Clone)]
pub struct JetCollection {
    pub prefix: String,
    pub mass_field: String,
    pub vectors: SlotVectors,
    pub scores: Array2<f64>,
    pub valid: Array2<bool>,
}

impl JetCollection {
    /// Pull and validate kinematics and tagger score for `spec`.
    ///
    /// Every field must be (N, num_slots); only the first two slots take part
    /// in candidate assignment.
    pub fn from_batch(batch: &EventBatch, spec: &CollectionSpec, num_slots: usize) -> Result<Self> {
        if num_slots < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "{}: need at least 2 jet slots, got {num_slots}",
                spec.prefix
            )));
        }
        let pt_name = spec.field("Pt");
        let phi_name = spec.field("Phi");
        let eta_name = spec.field("Eta");
        let score_name = spec.score_name();
        let mass_names: Vec<String> = spec.mass_fields.iter().map(|m| spec.field(m)).collect();

        let pt = batch.slots_column(&pt_name)?;
        let phi = batch.slots_column(&phi_name)?;
        let eta = batch.slots_column(&eta_name)?;
        let (mass_name, mass) = batch.first_slots_column(&mass_names)?;
        let scores = batch.slots_column(&score_name)?;

        for (name, col) in [
            (pt_name.as_str(), pt),
            (phi_name.as_str(), phi),
            (eta_name.as_str(), eta),
            (mass_name, mass),
            (score_name.as_str(), scores),
        ] {
            if col.ncols() != num_slots {
                return Err(PipelineError::shape(
                    name,
                    format!("{num_slots} jet slots"),
                    format!("{} jet slots", col.ncols()),
                ));
            }
        }

        let vectors = VectorArray::from_columns(
            [pt_name.as_str(), phi_name.as_str(), eta_name.as_str(), mass_name],
            pt.slice(s![.., 0..2]),
            phi.slice(s![.., 0..2]),
            eta.slice(s![.., 0..2]),
            mass.slice(s![.., 0..2]),
        )?;
        let scores = scores.slice(s![.., 0..2]).to_owned();
        let valid = vectors.physical(FILL_CEILING);

        Ok(JetCollection {
            prefix: spec.prefix.clone(),
            mass_field: mass_name.to_string(),
            vectors,
            scores,
            valid,
        })
    }

    #[inline]
    pub fn n_events(&self) -> usize {
        self.vectors.n_events()
    }

    #[inline]
    pub fn jet(&self, event: usize, slot: SlotIndex) -> Jet {
        let k = slot.index();
        Jet {
            p4: self.vectors.get(event, k),
            score: self.scores[[event, k]],
            valid: self.valid[[event, k]],
        }
    }

    #[inline]
    pub fn pair(&self, event: usize) -> JetPair {
        JetPair([
            self.jet(event, SlotIndex::First),
            self.jet(event, SlotIndex::Second),
        ])
    }
}
