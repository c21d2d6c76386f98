pub mod array;
pub mod vector;

pub use array::{EventVectors, FourMomentumArray, SlotVectors, VectorArray};
pub use vector::{LorentzVector, PtEtaPhiM, delta_phi, delta_r};
