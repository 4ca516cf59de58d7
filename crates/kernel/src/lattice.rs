//! Discrete velocity sets and the isothermal equilibrium.
//!
//! Velocities are integer lattice vectors; macroscopic velocities are in
//! lattice units (cells per step), so the speed of sound squared is 1/3.

use serde::{Deserialize, Serialize};

use crate::Real;

/// Squared lattice speed of sound.
pub const CS2: Real = 1.0 / 3.0;

/// Largest velocity count of the supported lattices.
pub const MAX_Q: usize = 19;

/// Supported velocity sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatticeKind {
    /// Two-dimensional, nine velocities.
    D2Q9,
    /// Three-dimensional, nineteen velocities.
    D3Q19,
}

const D2Q9_C: [[i32; 3]; 9] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [-1, 0, 0],
    [0, -1, 0],
    [1, 1, 0],
    [-1, 1, 0],
    [-1, -1, 0],
    [1, -1, 0],
];

const D2Q9_W: [Real; 9] = [
    4.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
];

const D2Q9_OPP: [usize; 9] = [0, 3, 4, 1, 2, 7, 8, 5, 6];

const D3Q19_C: [[i32; 3]; 19] = [
    [0, 0, 0],
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
    [1, 1, 0],
    [-1, -1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 0, 1],
    [-1, 0, -1],
    [1, 0, -1],
    [-1, 0, 1],
    [0, 1, 1],
    [0, -1, -1],
    [0, 1, -1],
    [0, -1, 1],
];

const D3Q19_W: [Real; 19] = [
    1.0 / 3.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 18.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
    1.0 / 36.0,
];

const D3Q19_OPP: [usize; 19] = [0, 2, 1, 4, 3, 6, 5, 8, 7, 10, 9, 12, 11, 14, 13, 16, 15, 18, 17];

/// A velocity set with its weights and opposite-direction table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lattice {
    kind: LatticeKind,
    velocities: &'static [[i32; 3]],
    weights: &'static [Real],
    opposite: &'static [usize],
}

impl Lattice {
    /// Look up the tables for `kind`.
    pub fn new(kind: LatticeKind) -> Self {
        match kind {
            LatticeKind::D2Q9 => Self {
                kind,
                velocities: &D2Q9_C,
                weights: &D2Q9_W,
                opposite: &D2Q9_OPP,
            },
            LatticeKind::D3Q19 => Self {
                kind,
                velocities: &D3Q19_C,
                weights: &D3Q19_W,
                opposite: &D3Q19_OPP,
            },
        }
    }

    /// Which velocity set this is.
    pub fn kind(&self) -> LatticeKind {
        self.kind
    }

    /// Number of discrete velocities.
    pub fn q(&self) -> usize {
        self.velocities.len()
    }

    /// Spatial dimension of the velocity set.
    pub fn dim(&self) -> usize {
        match self.kind {
            LatticeKind::D2Q9 => 2,
            LatticeKind::D3Q19 => 3,
        }
    }

    /// Integer velocity vector of direction `i`.
    #[inline]
    pub fn c(&self, i: usize) -> [i32; 3] {
        self.velocities[i]
    }

    /// Velocity vector of direction `i` as reals.
    #[inline]
    pub fn cr(&self, i: usize) -> [Real; 3] {
        let c = self.velocities[i];
        [c[0] as Real, c[1] as Real, c[2] as Real]
    }

    /// Quadrature weight of direction `i`.
    #[inline]
    pub fn w(&self, i: usize) -> Real {
        self.weights[i]
    }

    /// Index of the direction opposite to `i`.
    #[inline]
    pub fn opposite(&self, i: usize) -> usize {
        self.opposite[i]
    }

    /// Second-order equilibrium of direction `i`.
    #[inline]
    pub fn equilibrium_i(&self, i: usize, rho: Real, u: [Real; 3]) -> Real {
        let c = self.cr(i);
        let cu = c[0] * u[0] + c[1] * u[1] + c[2] * u[2];
        let uu = u[0] * u[0] + u[1] * u[1] + u[2] * u[2];
        self.weights[i] * rho * (1.0 + cu / CS2 + 0.5 * cu * cu / (CS2 * CS2) - 0.5 * uu / CS2)
    }

    /// Fill `out` with the equilibrium distribution.
    pub fn equilibrium(&self, rho: Real, u: [Real; 3], out: &mut [Real]) {
        for (i, slot) in out.iter_mut().enumerate().take(self.q()) {
            *slot = self.equilibrium_i(i, rho, u);
        }
    }

    /// Density and velocity carried by a distribution.
    ///
    /// Returns zero velocity when the density vanishes.
    pub fn moments(&self, f: &[Real]) -> (Real, [Real; 3]) {
        let mut rho = 0.0;
        let mut m = [0.0; 3];
        for (i, &fi) in f.iter().enumerate().take(self.q()) {
            rho += fi;
            let c = self.cr(i);
            m[0] += fi * c[0];
            m[1] += fi * c[1];
            m[2] += fi * c[2];
        }
        if rho.abs() < Real::MIN_POSITIVE {
            return (rho, [0.0; 3]);
        }
        (rho, [m[0] / rho, m[1] / rho, m[2] / rho])
    }

    /// Guo forcing source of direction `i` for acceleration `a`.
    #[inline]
    pub fn force_source_i(&self, i: usize, rho: Real, a: [Real; 3]) -> Real {
        let c = self.cr(i);
        self.weights[i] * rho * (c[0] * a[0] + c[1] * a[1] + c[2] * a[2]) / CS2
    }
}
