//! Fat-jet candidate assignment and derived features for the HH -> bbVV
//! boosted search.
//!
//! Each event carries two fat jets under two clustering hypotheses (AK8 and
//! AK15). The bb candidate is the AK8 jet with the higher Txbb score; the VV
//! candidate is the AK15 jet with the higher Th4q score unless it overlaps the
//! bb candidate and the other AK15 jet lies farther away. Dijet and pt-ratio
//! features are then built from the two candidates.

pub mod assignment;
pub mod bdt;
pub mod config;
pub mod error;
pub mod event;
pub mod features;
pub mod genmatch;
pub mod histogram;
pub mod kinematics;
pub mod pipeline;
pub mod runtime;
pub mod weights;

pub use config::{CollectionSpec, PipelineConfig};
pub use error::{PipelineError, Result};
pub use event::{EventBatch, Sample};
pub use pipeline::{process_batch, process_in_batches, process_samples};
