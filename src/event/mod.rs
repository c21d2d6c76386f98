pub mod io;
pub mod jets;
pub mod types;

pub use io::{load_batch, read_batch, save_batch};
pub use jets::{CandidateSlot, FILL_CEILING, Jet, JetCollection, JetPair, SlotIndex};
pub use types::{Column, EventBatch, Sample};
