use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Field naming for one jet-clustering hypothesis. Given in full when
/// overridden from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Input field prefix, e.g. `ak8FatJet` -> `ak8FatJetPt`.
    pub prefix: String,
    /// Tagger discriminant suffix used to rank the slots.
    pub score_field: String,
    /// Mass suffixes in order of preference.
    pub mass_fields: Vec<String>,
    /// Prefix of the projected candidate fields, e.g. `bbFatJet`.
    pub output_prefix: String,
    /// Short name used for the per-collection dijet fields (`ak8Dijet...`).
    pub label: String,
}

impl CollectionSpec {
    pub fn ak8_bb() -> Self {
        CollectionSpec {
            prefix: "ak8FatJet".into(),
            score_field: "ParticleNetMD_Txbb".into(),
            mass_fields: vec!["Msd".into(), "Mass".into()],
            output_prefix: "bbFatJet".into(),
            label: "ak8".into(),
        }
    }

    pub fn ak15_vv() -> Self {
        CollectionSpec {
            prefix: "ak15FatJet".into(),
            score_field: "ParticleNet_Th4q".into(),
            mass_fields: vec!["Msd".into(), "Mass".into()],
            output_prefix: "VVFatJet".into(),
            label: "ak15".into(),
        }
    }

    #[inline]
    pub fn field(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    pub fn score_name(&self) -> String {
        self.field(&self.score_field)
    }
}

/// Which sample plays which role in normalization and BDT labelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleRoles {
    pub data: String,
    pub qcd: String,
    pub signal: Vec<String>,
    pub backgrounds: Vec<String>,
}

impl Default for SampleRoles {
    fn default() -> Self {
        SampleRoles {
            data: "Data".into(),
            qcd: "QCD".into(),
            signal: vec!["HHbbVV4q".into()],
            backgrounds: vec!["V".into(), "Top".into(), "QCD".into()],
        }
    }
}

impl SampleRoles {
    pub fn is_data(&self, sample: &str) -> bool {
        sample == self.data
    }

    pub fn is_signal(&self, sample: &str) -> bool {
        self.signal.iter().any(|s| s == sample)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BdtConfig {
    pub variables: Vec<String>,
    pub events_per_sample: usize,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for BdtConfig {
    fn default() -> Self {
        let variables = [
            "MET_pt",
            "DijetEta",
            "DijetPt",
            "DijetMass",
            "bbFatJetPt",
            "VVFatJetEta",
            "VVFatJetPt",
            "VVFatJetMsd",
            "VVFatJetParticleNet_Th4q",
            "bbFatJetPtOverDijetPt",
            "VVFatJetPtOverDijetPt",
            "VVFatJetPtOverbbFatJetPt",
        ];
        BdtConfig {
            variables: variables.iter().map(|s| s.to_string()).collect(),
            events_per_sample: 10_000,
            test_fraction: 0.3,
            seed: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Overlap cutoff between the bb candidate and the VV candidate.
    pub dr_threshold: f64,
    /// Tagger cut used by the gen-matching report only.
    pub tagger_cut: f64,
    /// Slot columns every per-jet field must carry.
    pub num_jet_slots: usize,
    pub bb_collection: CollectionSpec,
    pub vv_collection: CollectionSpec,
    pub weight_field: String,
    /// Fail the batch instead of flagging events with missing jets.
    pub reject_degenerate_events: bool,
    pub samples: SampleRoles,
    pub bdt: BdtConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            dr_threshold: 1.0,
            tagger_cut: 0.8,
            num_jet_slots: 2,
            bb_collection: CollectionSpec::ak8_bb(),
            vv_collection: CollectionSpec::ak15_vv(),
            weight_field: "weight".into(),
            reject_degenerate_events: false,
            samples: SampleRoles::default(),
            bdt: BdtConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        let cfg: PipelineConfig = serde_json::from_reader(BufReader::new(f))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.dr_threshold.is_finite() || self.dr_threshold <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "dr_threshold must be finite and > 0, got {}",
                self.dr_threshold
            )));
        }
        if !self.tagger_cut.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "tagger_cut must be finite, got {}",
                self.tagger_cut
            )));
        }
        if self.num_jet_slots < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "num_jet_slots must be >= 2, got {}",
                self.num_jet_slots
            )));
        }
        if !(0.0..1.0).contains(&self.bdt.test_fraction) {
            return Err(PipelineError::InvalidConfig(format!(
                "bdt.test_fraction must lie in [0, 1), got {}",
                self.bdt.test_fraction
            )));
        }
        for spec in [&self.bb_collection, &self.vv_collection] {
            if spec.mass_fields.is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "{}: at least one mass field is required",
                    spec.prefix
                )));
            }
        }
        if self.bb_collection.prefix == self.vv_collection.prefix {
            return Err(PipelineError::InvalidConfig(
                "bb and VV collections must use different prefixes".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.dr_threshold, 1.0);
        assert_eq!(cfg.tagger_cut, 0.8);
        assert_eq!(cfg.num_jet_slots, 2);
        assert_eq!(cfg.bb_collection.score_name(), "ak8FatJetParticleNetMD_Txbb");
        assert_eq!(cfg.vv_collection.score_name(), "ak15FatJetParticleNet_Th4q");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"dr_threshold": 0.8, "samples": {"data": "JetHT"}}"#)
                .unwrap();
        assert_eq!(cfg.dr_threshold, 0.8);
        assert_eq!(cfg.samples.data, "JetHT");
        assert_eq!(cfg.samples.qcd, "QCD");
        assert_eq!(cfg.vv_collection.prefix, "ak15FatJet");
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = PipelineConfig::default();
        cfg.num_jet_slots = 1;
        assert!(matches!(
            cfg.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));

        let mut cfg = PipelineConfig::default();
        cfg.dr_threshold = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.vv_collection.prefix = cfg.bb_collection.prefix.clone();
        assert!(cfg.validate().is_err());
    }
}
