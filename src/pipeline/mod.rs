//! Batch orchestration: candidate assignment, feature augmentation and
//! per-sample weighting.

pub mod driver;

pub use driver::{
    DEGENERATE_GEOMETRY, VV_CAND_FLIPPED, VV_CAND_OVERLAP, gen_match, process_batch,
    process_in_batches, process_samples,
};
