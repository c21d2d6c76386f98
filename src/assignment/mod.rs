pub mod overlap;
pub mod selection;

pub use overlap::{Assignment, OverlapDecision, assign, resolve_event};
pub use selection::{leading_slots, slot_mask};
