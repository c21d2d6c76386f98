use ndarray::{Array, Array1, Array2, ArrayView, Dimension, Ix1, Ix2, Zip};

use super::vector::{LorentzVector, PtEtaPhiM};
use crate::error::{PipelineError, Result};

/// Batch of jet vectors laid out like the input columns: (N,) per event or
/// (N, k) per slot.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorArray<D: Dimension> {
    vectors: Array<PtEtaPhiM, D>,
}

pub type EventVectors = VectorArray<Ix1>;
pub type SlotVectors = VectorArray<Ix2>;

fn shape_str(shape: &[usize]) -> String {
    format!("{:?}", shape)
}

impl<D: Dimension> VectorArray<D> {
    /// Zip four parallel columns into vectors. Names are only used for errors.
    pub fn from_columns(
        names: [&str; 4],
        pt: ArrayView<f64, D>,
        phi: ArrayView<f64, D>,
        eta: ArrayView<f64, D>,
        mass: ArrayView<f64, D>,
    ) -> Result<Self> {
        for (name, col_shape) in names[1..].iter().zip([phi.shape(), eta.shape(), mass.shape()]) {
            if col_shape != pt.shape() {
                return Err(PipelineError::shape(
                    *name,
                    shape_str(pt.shape()),
                    shape_str(col_shape),
                ));
            }
        }
        let vectors = Zip::from(&pt)
            .and(&phi)
            .and(&eta)
            .and(&mass)
            .par_map_collect(|&pt, &phi, &eta, &mass| PtEtaPhiM::new(pt, eta, phi, mass));
        Ok(VectorArray { vectors })
    }

    pub fn from_vectors(vectors: Array<PtEtaPhiM, D>) -> Self {
        VectorArray { vectors }
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.vectors.shape()
    }

    #[inline]
    pub fn n_events(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    pub fn view(&self) -> ArrayView<'_, PtEtaPhiM, D> {
        self.vectors.view()
    }

    fn check_same_shape(&self, other: &Self, what: &str) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(PipelineError::shape(
                what,
                shape_str(self.shape()),
                shape_str(other.shape()),
            ));
        }
        Ok(())
    }

    /// Element-wise angular separation to a same-shaped array.
    pub fn delta_r(&self, other: &Self) -> Result<Array<f64, D>> {
        self.check_same_shape(other, "deltaR operand")?;
        Ok(Zip::from(&self.vectors)
            .and(&other.vectors)
            .par_map_collect(|a, b| a.delta_r(b)))
    }

    /// Element-wise four-vector sum.
    pub fn add(&self, other: &Self) -> Result<FourMomentumArray<D>> {
        self.check_same_shape(other, "four-vector sum operand")?;
        let p4 = Zip::from(&self.vectors)
            .and(&other.vectors)
            .par_map_collect(|a, b| *a + *b);
        Ok(FourMomentumArray { p4 })
    }

    pub fn pt(&self) -> Array<f64, D> {
        self.vectors.mapv(|v| v.pt)
    }

    pub fn eta(&self) -> Array<f64, D> {
        self.vectors.mapv(|v| v.eta)
    }

    pub fn phi(&self) -> Array<f64, D> {
        self.vectors.mapv(|v| v.phi)
    }

    pub fn mass(&self) -> Array<f64, D> {
        self.vectors.mapv(|v| v.mass)
    }

    pub fn physical(&self, fill_ceiling: f64) -> Array<bool, D> {
        self.vectors.mapv(|v| v.is_physical(fill_ceiling))
    }
}

impl VectorArray<Ix1> {
    #[inline]
    pub fn get(&self, event: usize) -> PtEtaPhiM {
        self.vectors[event]
    }

    /// Keep the events where `mask` is true, order preserved.
    pub fn filter(&self, mask: &Array1<bool>) -> Result<Self> {
        if mask.len() != self.vectors.len() {
            return Err(PipelineError::shape(
                "event mask",
                self.vectors.len(),
                mask.len(),
            ));
        }
        let kept: Vec<PtEtaPhiM> = self
            .vectors
            .iter()
            .zip(mask.iter())
            .filter_map(|(v, &m)| m.then_some(*v))
            .collect();
        Ok(VectorArray {
            vectors: Array1::from_vec(kept),
        })
    }
}

impl VectorArray<Ix2> {
    #[inline]
    pub fn n_slots(&self) -> usize {
        self.vectors.ncols()
    }

    #[inline]
    pub fn get(&self, event: usize, slot: usize) -> PtEtaPhiM {
        self.vectors[[event, slot]]
    }

    pub fn slot(&self, slot: usize) -> EventVectors {
        VectorArray {
            vectors: self.vectors.column(slot).to_owned(),
        }
    }

    /// One slot per event, picked by `choice[event]`; keeps event alignment.
    pub fn select(&self, choice: &[usize]) -> Result<EventVectors> {
        if choice.len() != self.n_events() {
            return Err(PipelineError::shape(
                "slot selection",
                self.n_events(),
                choice.len(),
            ));
        }
        if let Some(&bad) = choice.iter().find(|&&c| c >= self.n_slots()) {
            return Err(PipelineError::shape(
                "slot selection index",
                format!("< {}", self.n_slots()),
                bad,
            ));
        }
        let vectors = Array1::from_iter(
            choice
                .iter()
                .enumerate()
                .map(|(event, &slot)| self.vectors[[event, slot]]),
        );
        Ok(VectorArray { vectors })
    }

    /// Boolean-mask form of `select`: exactly one true per row is required.
    pub fn select_mask(&self, mask: &Array2<bool>) -> Result<EventVectors> {
        if mask.shape() != self.shape() {
            return Err(PipelineError::shape(
                "slot mask",
                shape_str(self.shape()),
                shape_str(mask.shape()),
            ));
        }
        let mut choice = Vec::with_capacity(mask.nrows());
        for (event, row) in mask.outer_iter().enumerate() {
            let mut picked = row.iter().enumerate().filter(|(_, m)| **m).map(|(s, _)| s);
            match (picked.next(), picked.next()) {
                (Some(slot), None) => choice.push(slot),
                _ => {
                    return Err(PipelineError::shape(
                        format!("slot mask row {event}"),
                        "exactly one selected slot",
                        row.iter().filter(|m| **m).count(),
                    ));
                }
            }
        }
        self.select(&choice)
    }
}

/// Result of summing two vector arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct FourMomentumArray<D: Dimension> {
    p4: Array<LorentzVector, D>,
}

impl<D: Dimension> FourMomentumArray<D> {
    pub fn pt(&self) -> Array<f64, D> {
        self.p4.mapv(|v| v.pt())
    }

    pub fn eta(&self) -> Array<f64, D> {
        self.p4.mapv(|v| v.eta())
    }

    pub fn phi(&self) -> Array<f64, D> {
        self.p4.mapv(|v| v.phi())
    }

    pub fn mass(&self) -> Array<f64, D> {
        self.p4.mapv(|v| v.mass())
    }

    pub fn view(&self) -> ArrayView<'_, LorentzVector, D> {
        self.p4.view()
    }
}
