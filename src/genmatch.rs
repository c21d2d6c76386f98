//! Truth matching of the assigned candidates against generator-level Higgs
//! bosons. Diagnostic only; nothing here feeds back into the assignment.

use ndarray::{Array1, ArrayView1, Zip};
use serde::Serialize;
use smallvec::SmallVec;

use crate::assignment::Assignment;
use crate::error::{PipelineError, Result};
use crate::event::{EventBatch, JetCollection, SlotIndex};
use crate::kinematics::{EventVectors, PtEtaPhiM, SlotVectors, VectorArray};

pub const GEN_HIGGS_PREFIX: &str = "GenHiggs";
pub const GEN_HIGGS_CHILDREN: &str = "GenHiggsChildren";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticleRole {
    BottomQuark,
    WBoson,
    ZBoson,
    Higgs,
}

impl ParticleRole {
    /// Absolute PDG ids for the role.
    pub fn pdg_codes(self) -> &'static [i32] {
        match self {
            ParticleRole::BottomQuark => &[5],
            ParticleRole::WBoson => &[24],
            ParticleRole::ZBoson => &[23],
            ParticleRole::Higgs => &[25],
        }
    }

    #[inline]
    pub fn matches(self, pdg_id: i32) -> bool {
        self.pdg_codes().contains(&pdg_id.abs())
    }
}

/// Decay mode of a truth Higgs, judged from one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HiggsDecay {
    Bb,
    Vv,
}

impl HiggsDecay {
    pub fn child_roles(self) -> &'static [ParticleRole] {
        match self {
            HiggsDecay::Bb => &[ParticleRole::BottomQuark],
            HiggsDecay::Vv => &[ParticleRole::WBoson, ParticleRole::ZBoson],
        }
    }

    pub fn classify(child_pdg_id: i32) -> Option<HiggsDecay> {
        [HiggsDecay::Bb, HiggsDecay::Vv]
            .into_iter()
            .find(|d| d.child_roles().iter().any(|r| r.matches(child_pdg_id)))
    }
}

/// Truth Higgs pair per event; `None` when the event does not hold exactly
/// one H->bb and one H->VV.
#[derive(Debug, Clone)]
pub struct GenHiggsPairs {
    pub higgs: SlotVectors,
    pub slots: Vec<Option<(usize, usize)>>,
}

fn classify_event(children: ArrayView1<f64>) -> Option<(usize, usize)> {
    let mut bb: SmallVec<[usize; 2]> = SmallVec::new();
    let mut vv: SmallVec<[usize; 2]> = SmallVec::new();
    for (slot, &code) in children.iter().enumerate() {
        if !code.is_finite() {
            continue;
        }
        match HiggsDecay::classify(code as i32) {
            Some(HiggsDecay::Bb) => bb.push(slot),
            Some(HiggsDecay::Vv) => vv.push(slot),
            None => {}
        }
    }
    match (bb.as_slice(), vv.as_slice()) {
        ([b], [v]) => Some((*b, *v)),
        _ => None,
    }
}

impl GenHiggsPairs {
    pub fn from_batch(batch: &EventBatch) -> Result<Self> {
        let field = |s: &str| format!("{GEN_HIGGS_PREFIX}{s}");
        let (pt_name, phi_name, eta_name) = (field("Pt"), field("Phi"), field("Eta"));
        let pt = batch.slots_column(&pt_name)?;
        let phi = batch.slots_column(&phi_name)?;
        let eta = batch.slots_column(&eta_name)?;
        let (mass_name, mass) = batch.first_slots_column(&[field("Mass"), field("Msd")])?;
        let children = batch.slots_column(GEN_HIGGS_CHILDREN)?;
        if children.dim() != pt.dim() {
            return Err(PipelineError::shape(
                GEN_HIGGS_CHILDREN,
                format!("{:?}", pt.dim()),
                format!("{:?}", children.dim()),
            ));
        }
        let higgs = VectorArray::from_columns(
            [pt_name.as_str(), phi_name.as_str(), eta_name.as_str(), mass_name],
            pt.view(),
            phi.view(),
            eta.view(),
            mass.view(),
        )?;
        let slots = children.outer_iter().map(classify_event).collect();
        Ok(GenHiggsPairs { higgs, slots })
    }

    fn pick(&self, which: impl Fn((usize, usize)) -> usize) -> EventVectors {
        let missing = PtEtaPhiM::new(f64::NAN, f64::NAN, f64::NAN, f64::NAN);
        let picked: Array1<PtEtaPhiM> = self
            .slots
            .iter()
            .enumerate()
            .map(|(event, s)| match s {
                Some(pair) => self.higgs.get(event, which(*pair)),
                None => missing,
            })
            .collect();
        VectorArray::from_vectors(picked)
    }

    pub fn hbb(&self) -> EventVectors {
        self.pick(|(b, _)| b)
    }

    pub fn hvv(&self) -> EventVectors {
        self.pick(|(_, v)| v)
    }

    pub fn n_unclassified(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }
}

/// Angular distances used as histogram inputs; NaN for unclassified events.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDistances {
    pub gen_hvv_gen_hbb: Array1<f64>,
    pub gen_hbb_bb_candidate: Array1<f64>,
    pub gen_hvv_vv_leading: Array1<f64>,
    pub gen_hvv_vv_candidate: Array1<f64>,
    pub bb_vv_leading: Array1<f64>,
    pub bb_vv_candidate: Array1<f64>,
}

/// Event masks the report is conditioned on.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSelections {
    /// bb candidate score above `tagger_cut`.
    pub bb_tagged: Array1<bool>,
    /// VV leading-by-score jet above `tagger_cut` (before any flip).
    pub vv_tagged: Array1<bool>,
    /// VV leading jet within `dr_threshold` of the bb candidate.
    pub overlap: Array1<bool>,
}

impl MatchSelections {
    pub fn bbvv_tagged(&self) -> Array1<bool> {
        and(&self.bb_tagged, &self.vv_tagged)
    }

    /// Overlapping events that also pass `cut`.
    pub fn overlap_and(&self, cut: &Array1<bool>) -> Array1<bool> {
        and(&self.overlap, cut)
    }
}

/// Matched fractions over the events of one selection; `None` when it is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchFractions {
    pub events: usize,
    pub bb_candidate: Option<f64>,
    pub vv_leading: Option<f64>,
    pub vv_candidate: Option<f64>,
    pub both: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenMatchReport {
    pub total_events: usize,
    pub unclassified_events: usize,
    pub dr_threshold: f64,
    pub tagger_cut: f64,
    pub overlap_fraction: Option<f64>,
    pub flipped_fraction: Option<f64>,
    pub all: MatchFractions,
    pub bb_tagged: MatchFractions,
    pub vv_tagged: MatchFractions,
    pub bbvv_tagged: MatchFractions,
    pub overlap: MatchFractions,
    pub overlap_bb_tagged: MatchFractions,
    pub overlap_vv_tagged: MatchFractions,
    pub overlap_bbvv_tagged: MatchFractions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenMatch {
    pub report: GenMatchReport,
    pub distances: MatchDistances,
    pub selections: MatchSelections,
}

#[inline]
fn fraction(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

fn and(a: &Array1<bool>, b: &Array1<bool>) -> Array1<bool> {
    Zip::from(a).and(b).map_collect(|&x, &y| x && y)
}

fn count(mask: &Array1<bool>) -> usize {
    mask.iter().filter(|m| **m).count()
}

struct Matched {
    bb: Array1<bool>,
    vv_leading: Array1<bool>,
    vv_candidate: Array1<bool>,
    both: Array1<bool>,
}

impl Matched {
    fn fractions(&self, selection: &Array1<bool>) -> MatchFractions {
        let events = count(selection);
        let within = |m: &Array1<bool>| fraction(count(&and(m, selection)), events);
        MatchFractions {
            events,
            bb_candidate: within(&self.bb),
            vv_leading: within(&self.vv_leading),
            vv_candidate: within(&self.vv_candidate),
            both: within(&self.both),
        }
    }
}

fn leading_scores(coll: &JetCollection, slots: &[SlotIndex]) -> Array1<f64> {
    slots
        .iter()
        .enumerate()
        .map(|(event, s)| coll.scores[[event, s.index()]])
        .collect()
}

fn indices(slots: &[SlotIndex]) -> Vec<usize> {
    slots.iter().map(|s| s.index()).collect()
}

pub fn match_candidates(
    truth: &GenHiggsPairs,
    bb: &JetCollection,
    vv: &JetCollection,
    assignment: &Assignment,
    dr_threshold: f64,
    tagger_cut: f64,
) -> Result<GenMatch> {
    let n = assignment.n_events();
    if truth.slots.len() != n {
        return Err(PipelineError::shape(
            GEN_HIGGS_CHILDREN,
            format!("{n} events"),
            format!("{} events", truth.slots.len()),
        ));
    }

    let bb_cand = bb.vectors.select(&indices(&assignment.bb_slot))?;
    let vv_lead = vv.vectors.select(&indices(&assignment.vv_leading))?;
    let vv_cand = vv.vectors.select(&indices(&assignment.vv_slot()))?;
    let hbb = truth.hbb();
    let hvv = truth.hvv();

    let distances = MatchDistances {
        gen_hvv_gen_hbb: hvv.delta_r(&hbb)?,
        gen_hbb_bb_candidate: hbb.delta_r(&bb_cand)?,
        gen_hvv_vv_leading: hvv.delta_r(&vv_lead)?,
        gen_hvv_vv_candidate: hvv.delta_r(&vv_cand)?,
        bb_vv_leading: bb_cand.delta_r(&vv_lead)?,
        bb_vv_candidate: bb_cand.delta_r(&vv_cand)?,
    };

    let within = |d: &Array1<f64>| d.mapv(|x| x < dr_threshold);
    let bb_ok = within(&distances.gen_hbb_bb_candidate);
    let vv_ok = within(&distances.gen_hvv_vv_candidate);
    let matched = Matched {
        both: and(&bb_ok, &vv_ok),
        bb: bb_ok,
        vv_leading: within(&distances.gen_hvv_vv_leading),
        vv_candidate: vv_ok,
    };

    let above = |scores: Array1<f64>| scores.mapv(|s| s > tagger_cut);
    let selections = MatchSelections {
        bb_tagged: above(leading_scores(bb, &assignment.bb_slot)),
        vv_tagged: above(leading_scores(vv, &assignment.vv_leading)),
        overlap: assignment.decisions.iter().map(|d| d.overlapping).collect(),
    };
    let all = Array1::from_elem(n, true);
    let bbvv = selections.bbvv_tagged();

    let report = GenMatchReport {
        total_events: n,
        unclassified_events: truth.n_unclassified(),
        dr_threshold,
        tagger_cut,
        overlap_fraction: fraction(assignment.n_overlapping(), n),
        flipped_fraction: fraction(assignment.n_flipped(), n),
        all: matched.fractions(&all),
        bb_tagged: matched.fractions(&selections.bb_tagged),
        vv_tagged: matched.fractions(&selections.vv_tagged),
        bbvv_tagged: matched.fractions(&bbvv),
        overlap: matched.fractions(&selections.overlap),
        overlap_bb_tagged: matched.fractions(&selections.overlap_and(&selections.bb_tagged)),
        overlap_vv_tagged: matched.fractions(&selections.overlap_and(&selections.vv_tagged)),
        overlap_bbvv_tagged: matched.fractions(&selections.overlap_and(&bbvv)),
    };

    tracing::info!(
        events = n,
        unclassified = report.unclassified_events,
        bbvv_tagged = report.bbvv_tagged.events,
        overlapping = report.overlap.events,
        "gen matching done"
    );

    Ok(GenMatch {
        report,
        distances,
        selections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::assign;
    use crate::config::CollectionSpec;
    use ndarray::{Array2, array};

    #[test]
    fn roles_map_to_pdg_codes() {
        assert!(ParticleRole::BottomQuark.matches(-5));
        assert!(ParticleRole::WBoson.matches(-24));
        assert!(ParticleRole::ZBoson.matches(23));
        assert!(!ParticleRole::ZBoson.matches(24));
        assert_eq!(ParticleRole::Higgs.pdg_codes(), &[25]);
    }

    #[test]
    fn decay_classification() {
        assert_eq!(HiggsDecay::classify(5), Some(HiggsDecay::Bb));
        assert_eq!(HiggsDecay::classify(-24), Some(HiggsDecay::Vv));
        assert_eq!(HiggsDecay::classify(23), Some(HiggsDecay::Vv));
        assert_eq!(HiggsDecay::classify(21), None);
    }

    /// Event 0: overlapping VV leading jet, flipped; only the VV score passes
    /// the cut. Event 1: no overlap; only the bb score passes the cut.
    fn two_events() -> EventBatch {
        let mut b = EventBatch::new();
        let mut put = |name: &str, rows: [[f64; 2]; 2]| {
            let flat: Vec<f64> = rows.iter().flatten().copied().collect();
            b.insert_slots(name, Array2::from_shape_vec((2, 2), flat).unwrap())
                .unwrap()
        };
        put("ak8FatJetPt", [[400.0, 300.0], [380.0, 260.0]]);
        put("ak8FatJetEta", [[0.0, 0.0], [0.0, 0.0]]);
        put("ak8FatJetPhi", [[0.0, 3.0], [0.0, 3.0]]);
        put("ak8FatJetMsd", [[120.0, 60.0], [115.0, 50.0]]);
        put("ak8FatJetParticleNetMD_Txbb", [[0.5, 0.1], [0.9, 0.1]]);
        put("ak15FatJetPt", [[420.0, 350.0], [390.0, 300.0]]);
        put("ak15FatJetEta", [[0.0, 0.0], [0.0, 0.0]]);
        put("ak15FatJetPhi", [[0.1, 2.0], [2.0, -2.5]]);
        put("ak15FatJetMsd", [[125.0, 110.0], [100.0, 90.0]]);
        put("ak15FatJetParticleNet_Th4q", [[0.95, 0.5], [0.6, 0.5]]);
        put("GenHiggsPt", [[400.0, 350.0], [380.0, 300.0]]);
        put("GenHiggsEta", [[0.0, 0.0], [0.0, 0.0]]);
        put("GenHiggsPhi", [[0.0, 2.0], [0.0, -2.5]]);
        put("GenHiggsMass", [[125.0, 125.0], [125.0, 125.0]]);
        put("GenHiggsChildren", [[5.0, 24.0], [-5.0, 23.0]]);
        b
    }

    fn run(b: &EventBatch) -> GenMatch {
        let bb = JetCollection::from_batch(b, &CollectionSpec::ak8_bb(), 2).unwrap();
        let vv = JetCollection::from_batch(b, &CollectionSpec::ak15_vv(), 2).unwrap();
        let assignment = assign(&bb, &vv, 1.0).unwrap();
        let truth = GenHiggsPairs::from_batch(b).unwrap();
        match_candidates(&truth, &bb, &vv, &assignment, 0.8, 0.8).unwrap()
    }

    #[test]
    fn flipped_candidate_matches_truth() {
        let m = run(&two_events().slice(0..1).unwrap());
        let r = &m.report;
        assert_eq!(r.unclassified_events, 0);
        assert_eq!(r.flipped_fraction, Some(1.0));
        assert_eq!(r.all.bb_candidate, Some(1.0));
        assert_eq!(r.all.vv_leading, Some(0.0));
        assert_eq!(r.all.vv_candidate, Some(1.0));
        assert_eq!(r.all.both, Some(1.0));
        assert!(m.distances.gen_hvv_vv_candidate[0] < 1e-12);
    }

    #[test]
    fn each_tagger_cut_has_its_own_denominator() {
        let m = run(&two_events());
        let r = &m.report;
        assert_eq!(m.selections.bb_tagged, array![false, true]);
        assert_eq!(m.selections.vv_tagged, array![true, false]);
        assert_eq!(m.selections.overlap, array![true, false]);

        assert_eq!(r.all.events, 2);
        assert_eq!(r.all.vv_candidate, Some(0.5));
        assert_eq!(r.all.both, Some(0.5));

        assert_eq!(r.bb_tagged.events, 1);
        assert_eq!(r.bb_tagged.bb_candidate, Some(1.0));
        assert_eq!(r.bb_tagged.vv_candidate, Some(0.0));

        assert_eq!(r.vv_tagged.events, 1);
        assert_eq!(r.vv_tagged.vv_leading, Some(0.0));
        assert_eq!(r.vv_tagged.vv_candidate, Some(1.0));

        assert_eq!(r.bbvv_tagged.events, 0);
        assert_eq!(r.bbvv_tagged.both, None);
    }

    #[test]
    fn overlap_selections_combine_with_cuts() {
        let m = run(&two_events());
        let sel = &m.selections;
        assert_eq!(sel.overlap_and(&sel.vv_tagged), array![true, false]);
        assert_eq!(sel.overlap_and(&sel.bb_tagged), array![false, false]);
        let r = m.report;
        assert_eq!(r.overlap_fraction, Some(0.5));
        assert_eq!(r.overlap.events, 1);
        assert_eq!(r.overlap.vv_leading, Some(0.0));
        assert_eq!(r.overlap.vv_candidate, Some(1.0));
        assert_eq!(r.overlap_vv_tagged.events, 1);
        assert_eq!(r.overlap_vv_tagged.both, Some(1.0));
        assert_eq!(r.overlap_bb_tagged.events, 0);
        assert_eq!(r.overlap_bb_tagged.bb_candidate, None);
        assert_eq!(r.overlap_bbvv_tagged.events, 0);
    }

    #[test]
    fn unclassified_events_count_as_unmatched() {
        let mut b = two_events().slice(0..1).unwrap();
        b.insert_slots("GenHiggsChildren", array![[5.0, 5.0]]).unwrap();
        let m = run(&b);
        assert_eq!(m.report.unclassified_events, 1);
        assert_eq!(m.report.all.bb_candidate, Some(0.0));
        assert!(m.distances.gen_hbb_bb_candidate[0].is_nan());
    }

    #[test]
    fn events_need_one_of_each_decay() {
        assert_eq!(classify_event(array![24.0, 5.0].view()), Some((1, 0)));
        assert_eq!(classify_event(array![5.0, 5.0].view()), None);
        assert_eq!(classify_event(array![5.0, f64::NAN].view()), None);
    }
}
