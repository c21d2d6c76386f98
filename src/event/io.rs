use ndarray::{Ix1, Ix2, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use super::types::{Column, EventBatch};
use crate::error::{PipelineError, Result};

// Members are stored one field per `.npy`; everything is widened to f64 on load.
macro_rules! read_as {
    ($npz:expr, $member:expr, $ty:ty) => {
        if let Ok(a) = $npz.by_name::<OwnedRepr<$ty>, Ix1>($member) {
            return Ok(Column::Event(a.mapv(|v| v as f64)));
        }
        if let Ok(a) = $npz.by_name::<OwnedRepr<$ty>, Ix2>($member) {
            return Ok(Column::Slots(a.mapv(|v| v as f64)));
        }
    };
}

fn read_column<R: Read + Seek>(npz: &mut NpzReader<R>, member: &str) -> Result<Column> {
    read_as!(npz, member, f64);
    read_as!(npz, member, f32);
    read_as!(npz, member, i64);
    read_as!(npz, member, i32);
    read_as!(npz, member, u8);
    Err(PipelineError::shape(
        member,
        "rank-1 or rank-2 numeric array",
        "unsupported dtype or rank",
    ))
}

#[inline]
fn field_name(member: &str) -> &str {
    member.strip_suffix(".npy").unwrap_or(member)
}

pub fn read_batch<R: Read + Seek>(reader: R) -> Result<EventBatch> {
    let mut npz = NpzReader::new(reader)?;
    let mut members = npz.names()?;
    members.sort();
    let mut batch = EventBatch::new();
    for member in &members {
        let column = read_column(&mut npz, member)?;
        batch.insert(field_name(member), column)?;
    }
    Ok(batch)
}

pub fn load_batch(path: &Path) -> Result<EventBatch> {
    let f = File::open(path)?;
    let batch = read_batch(f)?;
    tracing::debug!(
        path = %path.display(),
        events = batch.n_events(),
        fields = batch.n_columns(),
        "batch loaded"
    );
    Ok(batch)
}

pub fn save_batch(path: &Path, batch: &EventBatch) -> Result<()> {
    let f = File::create(path)?;
    let mut npz = NpzWriter::new(f);
    for (name, column) in batch.iter() {
        let member = format!("{name}.npy");
        match column {
            Column::Event(a) => npz.add_array(member, a)?,
            Column::Slots(a) => npz.add_array(member, a)?,
        }
    }
    npz.finish()?;
    Ok(())
}
