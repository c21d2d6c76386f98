//! Training matrices for the signal/background BDT. The fit runs elsewhere.

use ndarray::{Array1, Array2, Axis, concatenate};
use ndarray_npy::NpzWriter;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::fs::File;
use std::path::Path;

use crate::config::{BdtConfig, SampleRoles};
use crate::error::{PipelineError, Result};
use crate::event::Sample;
use crate::weights::FINAL_WEIGHT;

#[derive(Debug, Clone, PartialEq)]
pub struct BdtInputs {
    pub variables: Vec<String>,
    pub x: Array2<f64>,
    /// 1 for signal, 0 for background.
    pub y: Array1<f64>,
    pub weights: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BdtSplit {
    pub train: BdtInputs,
    pub test: BdtInputs,
}

fn sample_rows(sample: &Sample, variables: &[String], limit: usize) -> Result<(Array2<f64>, Array1<f64>)> {
    let n = sample.batch.n_events().min(limit);
    let mut x = Array2::<f64>::zeros((n, variables.len()));
    for (j, var) in variables.iter().enumerate() {
        let col = sample.batch.event_column(var)?;
        x.column_mut(j).assign(&col.slice(ndarray::s![..n]));
    }
    let w = sample
        .batch
        .event_column(FINAL_WEIGHT)?
        .slice(ndarray::s![..n])
        .to_owned();
    Ok((x, w))
}

impl BdtInputs {
    /// Stack the first `events_per_sample` events of every non-data sample.
    pub fn assemble(samples: &[Sample], roles: &SampleRoles, cfg: &BdtConfig) -> Result<Self> {
        if cfg.variables.is_empty() {
            return Err(PipelineError::InvalidConfig("bdt.variables is empty".into()));
        }
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        let mut ws = Vec::new();
        for s in samples.iter().filter(|s| !roles.is_data(&s.name)) {
            let (x, w) = sample_rows(s, &cfg.variables, cfg.events_per_sample)?;
            let label = if roles.is_signal(&s.name) { 1.0 } else { 0.0 };
            tracing::debug!(sample = %s.name, rows = x.nrows(), label, "bdt rows");
            ys.push(Array1::from_elem(x.nrows(), label));
            xs.push(x);
            ws.push(w);
        }
        if xs.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "no simulated samples to build BDT inputs from".into(),
            ));
        }

        let stack_err = |e| PipelineError::shape("bdt inputs", "stackable", e);
        let x = concatenate(Axis(0), &xs.iter().map(|a| a.view()).collect::<Vec<_>>()).map_err(stack_err)?;
        let y = concatenate(Axis(0), &ys.iter().map(|a| a.view()).collect::<Vec<_>>()).map_err(stack_err)?;
        let weights = concatenate(Axis(0), &ws.iter().map(|a| a.view()).collect::<Vec<_>>()).map_err(stack_err)?;

        Ok(BdtInputs {
            variables: cfg.variables.clone(),
            x,
            y,
            weights,
        })
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    fn take(&self, rows: &[usize]) -> BdtInputs {
        BdtInputs {
            variables: self.variables.clone(),
            x: self.x.select(Axis(0), rows),
            y: self.y.select(Axis(0), rows),
            weights: self.weights.select(Axis(0), rows),
        }
    }

    /// Seeded shuffle, then the first `ceil(n * test_fraction)` rows go to test.
    pub fn split(&self, test_fraction: f64, seed: u64) -> BdtSplit {
        let mut rows: Vec<usize> = (0..self.n_rows()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        rows.shuffle(&mut rng);
        let n_test = ((self.n_rows() as f64) * test_fraction).ceil() as usize;
        let (test, train) = rows.split_at(n_test.min(rows.len()));
        BdtSplit {
            train: self.take(train),
            test: self.take(test),
        }
    }
}

impl BdtSplit {
    /// `X_train`, `y_train`, `w_train` and the `_test` counterparts.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut npz = NpzWriter::new(File::create(path)?);
        for (tag, part) in [("train", &self.train), ("test", &self.test)] {
            npz.add_array(format!("X_{tag}.npy"), &part.x)?;
            npz.add_array(format!("y_{tag}.npy"), &part.y)?;
            npz.add_array(format!("w_{tag}.npy"), &part.weights)?;
        }
        npz.finish()?;
        Ok(())
    }
}
