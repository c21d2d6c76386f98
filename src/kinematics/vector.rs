use std::f64::consts::PI;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Azimuthal difference wrapped into [-pi, pi).
#[inline]
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    (phi1 - phi2 + PI).rem_euclid(2.0 * PI) - PI
}

/// sqrt(deta^2 + dphi^2) with the azimuthal difference wrapped.
#[inline]
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    (eta1 - eta2).hypot(delta_phi(phi1, phi2))
}

/// Jet direction and mass as stored in the skims.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PtEtaPhiM {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub mass: f64,
}

impl PtEtaPhiM {
    #[inline]
    pub fn new(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        PtEtaPhiM { pt, eta, phi, mass }
    }

    #[inline]
    pub fn delta_r(&self, other: &PtEtaPhiM) -> f64 {
        delta_r(self.eta, self.phi, other.eta, other.phi)
    }

    #[inline]
    pub fn to_cartesian(&self) -> LorentzVector {
        let px = self.pt * self.phi.cos();
        let py = self.pt * self.phi.sin();
        let pz = self.pt * self.eta.sinh();
        let p = self.pt * self.eta.cosh();
        let e = (p * p + self.mass * self.mass).sqrt();
        LorentzVector { px, py, pz, e }
    }

    /// Every component finite and none of them a fill value.
    #[inline]
    pub fn is_physical(&self, fill_ceiling: f64) -> bool {
        [self.pt, self.eta, self.phi, self.mass]
            .iter()
            .all(|v| v.is_finite() && *v > fill_ceiling)
            && self.pt >= 0.0
    }
}

impl Add for PtEtaPhiM {
    type Output = LorentzVector;

    fn add(self, rhs: PtEtaPhiM) -> LorentzVector {
        self.to_cartesian() + rhs.to_cartesian()
    }
}

/// Cartesian four-momentum (px, py, pz, E).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LorentzVector {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub e: f64,
}

impl LorentzVector {
    #[inline]
    pub fn from_cartesian(px: f64, py: f64, pz: f64, e: f64) -> Self {
        LorentzVector { px, py, pz, e }
    }

    #[inline]
    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    #[inline]
    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    /// Pseudorapidity; 0 when pz == 0, +-inf when pt == 0 and pz != 0.
    #[inline]
    pub fn eta(&self) -> f64 {
        if self.pz == 0.0 {
            return 0.0;
        }
        (self.pz / self.pt()).asinh()
    }

    #[inline]
    pub fn p2(&self) -> f64 {
        self.px * self.px + self.py * self.py + self.pz * self.pz
    }

    #[inline]
    pub fn mass2(&self) -> f64 {
        self.e * self.e - self.p2()
    }

    /// Signed invariant mass: negative for space-like vectors.
    #[inline]
    pub fn mass(&self) -> f64 {
        let m2 = self.mass2();
        m2.abs().sqrt().copysign(m2)
    }

    #[inline]
    pub fn to_pt_eta_phi_m(&self) -> PtEtaPhiM {
        PtEtaPhiM {
            pt: self.pt(),
            eta: self.eta(),
            phi: self.phi(),
            mass: self.mass(),
        }
    }
}

impl Add for LorentzVector {
    type Output = LorentzVector;

    #[inline]
    fn add(self, rhs: LorentzVector) -> LorentzVector {
        LorentzVector {
            px: self.px + rhs.px,
            py: self.py + rhs.py,
            pz: self.pz + rhs.pz,
            e: self.e + rhs.e,
        }
    }
}

impl AddAssign for LorentzVector {
    #[inline]
    fn add_assign(&mut self, rhs: LorentzVector) {
        *self = *self + rhs;
    }
}

impl Sum for LorentzVector {
    fn sum<I: Iterator<Item = LorentzVector>>(iter: I) -> Self {
        iter.fold(LorentzVector::default(), |acc, v| acc + v)
    }
}
