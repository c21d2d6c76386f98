//! Dijet system and pt-ratio features built from the final candidates.

use ndarray::Array1;

use crate::error::Result;
use crate::event::EventBatch;
use crate::kinematics::{EventVectors, SlotVectors};

#[derive(Debug, Clone, PartialEq)]
pub struct DijetColumns {
    pub pt: Array1<f64>,
    pub mass: Array1<f64>,
    pub eta: Array1<f64>,
}

impl DijetColumns {
    pub fn from_pair(first: &EventVectors, second: &EventVectors) -> Result<Self> {
        let dijet = first.add(second)?;
        Ok(DijetColumns {
            pt: dijet.pt(),
            mass: dijet.mass(),
            eta: dijet.eta(),
        })
    }

    /// Slot 0 + slot 1 of a single collection.
    pub fn from_collection(vectors: &SlotVectors) -> Result<Self> {
        Self::from_pair(&vectors.slot(0), &vectors.slot(1))
    }

    pub fn write_into(&self, batch: &mut EventBatch, prefix: &str) -> Result<()> {
        batch.insert_event(format!("{prefix}Pt"), self.pt.clone())?;
        batch.insert_event(format!("{prefix}Mass"), self.mass.clone())?;
        batch.insert_event(format!("{prefix}Eta"), self.eta.clone())?;
        Ok(())
    }
}

/// IEEE division, no special-casing: pt / 0 gives inf (or NaN for 0 / 0).
#[inline]
pub fn pt_ratio(num: &Array1<f64>, den: &Array1<f64>) -> Array1<f64> {
    num / den
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFeatures {
    pub dijet: DijetColumns,
    pub bb_pt_over_dijet_pt: Array1<f64>,
    pub vv_pt_over_dijet_pt: Array1<f64>,
    pub vv_pt_over_bb_pt: Array1<f64>,
}

impl DerivedFeatures {
    pub fn compute(bb: &EventVectors, vv: &EventVectors) -> Result<Self> {
        let dijet = DijetColumns::from_pair(bb, vv)?;
        let bb_pt = bb.pt();
        let vv_pt = vv.pt();
        Ok(DerivedFeatures {
            bb_pt_over_dijet_pt: pt_ratio(&bb_pt, &dijet.pt),
            vv_pt_over_dijet_pt: pt_ratio(&vv_pt, &dijet.pt),
            vv_pt_over_bb_pt: pt_ratio(&vv_pt, &bb_pt),
            dijet,
        })
    }

    /// Events with at least one non-finite derived value.
    pub fn n_non_finite(&self) -> usize {
        let cols = [
            &self.dijet.pt,
            &self.dijet.mass,
            &self.dijet.eta,
            &self.bb_pt_over_dijet_pt,
            &self.vv_pt_over_dijet_pt,
            &self.vv_pt_over_bb_pt,
        ];
        (0..self.dijet.pt.len())
            .filter(|&i| cols.iter().any(|c| !c[i].is_finite()))
            .count()
    }

    pub fn write_into(&self, batch: &mut EventBatch, bb_prefix: &str, vv_prefix: &str) -> Result<()> {
        self.dijet.write_into(batch, "Dijet")?;
        batch.insert_event(
            format!("{bb_prefix}PtOverDijetPt"),
            self.bb_pt_over_dijet_pt.clone(),
        )?;
        batch.insert_event(
            format!("{vv_prefix}PtOverDijetPt"),
            self.vv_pt_over_dijet_pt.clone(),
        )?;
        batch.insert_event(
            format!("{vv_prefix}PtOver{bb_prefix}Pt"),
            self.vv_pt_over_bb_pt.clone(),
        )?;
        Ok(())
    }
}
