use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{PipelineError, Result};
use crate::event::SlotIndex;

/// Leading-by-score slot per event. Ties go to the first slot; a NaN in
/// either score fails the `>=` and gives the second.
pub fn leading_slots(scores: ArrayView2<f64>) -> Result<Vec<SlotIndex>> {
    if scores.ncols() < 2 {
        return Err(PipelineError::shape(
            "tagger scores",
            "at least 2 jet slots",
            format!("{} jet slots", scores.ncols()),
        ));
    }
    let leading = Zip::from(scores.column(0))
        .and(scores.column(1))
        .par_map_collect(|&first, &second| {
            if first >= second {
                SlotIndex::First
            } else {
                SlotIndex::Second
            }
        });
    Ok(leading.to_vec())
}

/// (N, 2) boolean form of a per-event slot choice.
pub fn slot_mask(choice: &[SlotIndex]) -> Array2<bool> {
    let mut mask = Array2::from_elem((choice.len(), 2), false);
    for (event, slot) in choice.iter().enumerate() {
        mask[[event, slot.index()]] = true;
    }
    mask
}
