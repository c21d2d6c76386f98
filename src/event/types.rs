use ndarray::{Array1, Array2, Axis, concatenate, s};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{PipelineError, Result};

/// One named field of a batch: a scalar per event or a row of slots.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Event(Array1<f64>),
    Slots(Array2<f64>),
}

impl Column {
    #[inline]
    pub fn n_events(&self) -> usize {
        match self {
            Column::Event(a) => a.len(),
            Column::Slots(a) => a.nrows(),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Column::Event(a) => a.shape().to_vec(),
            Column::Slots(a) => a.shape().to_vec(),
        }
    }

    fn slice(&self, range: Range<usize>) -> Column {
        match self {
            Column::Event(a) => Column::Event(a.slice(s![range]).to_owned()),
            Column::Slots(a) => Column::Slots(a.slice(s![range, ..]).to_owned()),
        }
    }
}

/// Columnar event batch keyed by field name (e.g. `ak8FatJetPt`).
///
/// Every column shares the same event count; the first inserted column fixes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    columns: BTreeMap<String, Column>,
    n_events: Option<usize>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn n_events(&self) -> usize {
        self.n_events.unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_events() == 0
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        let n = column.n_events();
        match self.n_events {
            Some(expected) if expected != n => {
                return Err(PipelineError::shape(
                    name,
                    format!("{expected} events"),
                    format!("{n} events"),
                ));
            }
            _ => self.n_events = Some(n),
        }
        self.columns.insert(name, column);
        Ok(())
    }

    pub fn insert_event(&mut self, name: impl Into<String>, values: Array1<f64>) -> Result<()> {
        self.insert(name, Column::Event(values))
    }

    pub fn insert_slots(&mut self, name: impl Into<String>, values: Array2<f64>) -> Result<()> {
        self.insert(name, Column::Slots(values))
    }

    pub fn event_column(&self, name: &str) -> Result<&Array1<f64>> {
        match self.columns.get(name) {
            Some(Column::Event(a)) => Ok(a),
            Some(Column::Slots(a)) => Err(PipelineError::shape(
                name,
                "(N,)",
                format!("{:?}", a.shape()),
            )),
            None => Err(PipelineError::missing(name)),
        }
    }

    pub fn slots_column(&self, name: &str) -> Result<&Array2<f64>> {
        match self.columns.get(name) {
            Some(Column::Slots(a)) => Ok(a),
            Some(Column::Event(a)) => Err(PipelineError::shape(
                name,
                "(N, k)",
                format!("{:?}", a.shape()),
            )),
            None => Err(PipelineError::missing(name)),
        }
    }

    /// First of `names` present in the batch, as a per-slot column.
    pub fn first_slots_column<'a>(&'a self, names: &[String]) -> Result<(&'a str, &'a Array2<f64>)> {
        for name in names {
            if let Some((key, _)) = self.columns.get_key_value(name.as_str()) {
                return Ok((key.as_str(), self.slots_column(name)?));
            }
        }
        Err(PipelineError::missing(names.join(" | ")))
    }

    /// First of `names` present in the batch, as a per-event column.
    pub fn first_event_column<'a>(&'a self, names: &[String]) -> Result<(&'a str, &'a Array1<f64>)> {
        for name in names {
            if let Some((key, _)) = self.columns.get_key_value(name.as_str()) {
                return Ok((key.as_str(), self.event_column(name)?));
            }
        }
        Err(PipelineError::missing(names.join(" | ")))
    }

    /// Events `range` of every column.
    pub fn slice(&self, range: Range<usize>) -> Result<EventBatch> {
        if range.start > range.end || range.end > self.n_events() {
            return Err(PipelineError::shape(
                "batch slice",
                format!("range within 0..{}", self.n_events()),
                format!("{}..{}", range.start, range.end),
            ));
        }
        let columns = self
            .columns
            .iter()
            .map(|(k, c)| (k.clone(), c.slice(range.clone())))
            .collect();
        Ok(EventBatch {
            columns,
            n_events: Some(range.end - range.start),
        })
    }

    /// Split into consecutive batches of at most `size` events.
    pub fn chunks(&self, size: usize) -> Result<Vec<EventBatch>> {
        let size = size.max(1);
        let n = self.n_events();
        if n == 0 {
            return Ok(vec![self.clone()]);
        }
        (0..n)
            .step_by(size)
            .map(|lo| self.slice(lo..(lo + size).min(n)))
            .collect()
    }

    /// Stack batches event-wise. All parts must carry the same fields and slot widths.
    pub fn concat(parts: &[EventBatch]) -> Result<EventBatch> {
        let Some(first) = parts.first() else {
            return Ok(EventBatch::new());
        };
        let mut out = EventBatch::new();
        for (name, col) in &first.columns {
            let merged = match col {
                Column::Event(_) => {
                    let views = parts
                        .iter()
                        .map(|p| p.event_column(name).map(|a| a.view()))
                        .collect::<Result<Vec<_>>>()?;
                    Column::Event(
                        concatenate(Axis(0), &views)
                            .map_err(|e| PipelineError::shape(name.as_str(), "stackable", e))?,
                    )
                }
                Column::Slots(_) => {
                    let views = parts
                        .iter()
                        .map(|p| p.slots_column(name).map(|a| a.view()))
                        .collect::<Result<Vec<_>>>()?;
                    Column::Slots(
                        concatenate(Axis(0), &views)
                            .map_err(|e| PipelineError::shape(name.as_str(), "stackable", e))?,
                    )
                }
            };
            out.insert(name.clone(), merged)?;
        }
        for part in &parts[1..] {
            if part.n_columns() != first.n_columns() {
                return Err(PipelineError::shape(
                    "batch fields",
                    first.n_columns(),
                    part.n_columns(),
                ));
            }
        }
        Ok(out)
    }
}

/// A named simulation or data sample (`QCD`, `Data`, `HHbbVV4q`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub batch: EventBatch,
}

impl Sample {
    pub fn new(name: impl Into<String>, batch: EventBatch) -> Self {
        Sample {
            name: name.into(),
            batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn batch() -> EventBatch {
        let mut b = EventBatch::new();
        b.insert_event("weight", array![1.0, 2.0, 3.0]).unwrap();
        b.insert_slots("ak8FatJetPt", array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]])
            .unwrap();
        b
    }

    #[test]
    fn insert_rejects_other_event_count() {
        let mut b = batch();
        let err = b.insert_event("MET_pt", array![1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
    }

    #[test]
    fn typed_access_reports_missing_and_rank() {
        let b = batch();
        assert!(matches!(
            b.event_column("nope"),
            Err(PipelineError::MissingField { .. })
        ));
        assert!(matches!(
            b.event_column("ak8FatJetPt"),
            Err(PipelineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn chunks_then_concat_is_identity() {
        let b = batch();
        let parts = b.chunks(2).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].n_events(), 1);
        assert_eq!(EventBatch::concat(&parts).unwrap(), b);
    }

    #[test]
    fn first_slots_column_falls_back() {
        let b = batch();
        let names = vec!["ak8FatJetMsd".to_string(), "ak8FatJetPt".to_string()];
        let (name, _) = b.first_slots_column(&names).unwrap();
        assert_eq!(name, "ak8FatJetPt");
    }
}
