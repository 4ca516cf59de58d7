//! Particle storage per block, using struct-of-arrays layout.
//!
//! Each block keeps the particles whose influence region reaches it. Owned
//! particles come first; periodic images follow, so slot ids stay stable
//! while a coupling interval runs.

use serde::{Deserialize, Serialize};

use crate::block::{Block, IterRange};
use crate::error::{KernelError, KernelResult};
use crate::Real;

/// Shape family of the coupled particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticleShape {
    /// Spheres (discs in 2-D) described by their radius.
    Spherical,
    /// Convex polyhedra described by extra shape parameters.
    Polyhedron,
}

impl ParticleShape {
    /// Integer code exchanged with the particle solver.
    pub fn code(self) -> i32 {
        match self {
            ParticleShape::Spherical => 0,
            ParticleShape::Polyhedron => 1,
        }
    }

    /// Decode an exchanged shape code.
    pub fn from_code(code: i32) -> KernelResult<Self> {
        match code {
            0 => Ok(ParticleShape::Spherical),
            1 => Ok(ParticleShape::Polyhedron),
            other => Err(KernelError::Unsupported(format!("particle shape code {other}"))),
        }
    }
}

/// Kinematic state handed to [`BlockParticles::insert_particle`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleState {
    /// Centre.
    pub position: [Real; 3],
    /// Bounding radius.
    pub radius: Real,
    /// Shape-specific parameters beyond the radius.
    pub shape_params: Vec<Real>,
    /// Translational velocity.
    pub velocity: [Real; 3],
    /// Angular velocity.
    pub angular_velocity: [Real; 3],
    /// User-defined values received with the particle.
    pub inputs: Vec<Real>,
}

/// Struct-of-arrays particle storage.
///
/// All arrays are parallel: index `i` across every array refers to the same
/// particle.
#[derive(Debug, Clone, Default)]
pub struct ParticleArrays {
    // ---- Kinematics ----
    /// Centres.
    pub position: Vec<[Real; 3]>,
    /// Translational velocities.
    pub velocity: Vec<[Real; 3]>,
    /// Angular velocities.
    pub angular_velocity: Vec<[Real; 3]>,

    // ---- Shape ----
    /// Bounding radii.
    pub radius: Vec<Real>,
    /// Shape parameters beyond the radius.
    pub shape_params: Vec<Vec<Real>>,

    // ---- Coupling ----
    /// Accumulated hydrodynamic force.
    pub drag_force: Vec<[Real; 3]>,
    /// Accumulated hydrodynamic torque about the centre.
    pub drag_torque: Vec<[Real; 3]>,
    /// Node range the particle may cover on this block.
    pub stencil: Vec<IterRange>,
    /// Extra values received with the particle.
    pub inputs: Vec<Vec<Real>>,
    /// Extra values sent back with the particle.
    pub outputs: Vec<Vec<Real>>,
    /// For periodic images, index of the owned particle they copy.
    pub image_of: Vec<Option<usize>>,
    /// Position the particle was received at; unshifted for images.
    pub received_at: Vec<[Real; 3]>,
}

impl ParticleArrays {
    /// Number of particles.
    pub fn len(&self) -> usize {
        self.position.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    fn push(&mut self, state: &ParticleState, stencil: IterRange, image_of: Option<usize>, received_at: [Real; 3]) {
        self.position.push(state.position);
        self.velocity.push(state.velocity);
        self.angular_velocity.push(state.angular_velocity);
        self.radius.push(state.radius);
        self.shape_params.push(state.shape_params.clone());
        self.drag_force.push([0.0; 3]);
        self.drag_torque.push([0.0; 3]);
        self.stencil.push(stencil);
        self.inputs.push(state.inputs.clone());
        self.outputs.push(Vec::new());
        self.image_of.push(image_of);
        self.received_at.push(received_at);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Surface velocity of particle `i` at offset `r` from its centre.
    #[inline]
    pub fn surface_velocity(&self, i: usize, r: [Real; 3]) -> [Real; 3] {
        let u = self.velocity[i];
        let w = self.angular_velocity[i];
        [
            u[0] + w[1] * r[2] - w[2] * r[1],
            u[1] + w[2] * r[0] - w[0] * r[2],
            u[2] + w[0] * r[1] - w[1] * r[0],
        ]
    }
}

/// Periodic extent of the global domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodicDomain {
    /// Axes that wrap.
    pub periodic: [bool; 3],
    /// Lower corner of the domain.
    pub min: [Real; 3],
    /// Upper corner of the domain.
    pub max: [Real; 3],
}

/// Particles relevant to one block.
#[derive(Debug, Clone)]
pub struct BlockParticles {
    block: Block,
    /// Whether this process computes the block.
    pub owned: bool,
    skin: Real,
    shape: ParticleShape,
    periodic: Option<PeriodicDomain>,
    /// Particles whose centre data arrived for this block.
    pub particles: ParticleArrays,
    /// Periodic images of particles near a wrapping face.
    pub images: ParticleArrays,
}

impl BlockParticles {
    /// Empty particle list for `block`.
    ///
    /// `skin` widens the region within which a particle counts as near the
    /// block.
    pub fn new(block: &Block, owned: bool, skin: Real, shape: ParticleShape, periodic: Option<PeriodicDomain>) -> Self {
        Self {
            block: block.clone(),
            owned,
            skin,
            shape,
            periodic,
            particles: ParticleArrays::default(),
            images: ParticleArrays::default(),
        }
    }

    /// Block id.
    pub fn block_id(&self) -> usize {
        self.block.id
    }

    /// Shape family of every particle here.
    pub fn shape(&self) -> ParticleShape {
        self.shape
    }

    /// Number of owned particles.
    pub fn n_particles(&self) -> usize {
        self.particles.len()
    }

    /// Number of periodic images.
    pub fn n_periodic(&self) -> usize {
        self.images.len()
    }

    /// Owned particles plus images.
    pub fn total(&self) -> usize {
        self.particles.len() + self.images.len()
    }

    /// Storage and local index of slot `slot` (owned first, then images).
    pub fn slot(&self, slot: usize) -> (&ParticleArrays, usize) {
        if slot < self.particles.len() {
            (&self.particles, slot)
        } else {
            (&self.images, slot - self.particles.len())
        }
    }

    /// Mutable storage and local index of slot `slot`.
    pub fn slot_mut(&mut self, slot: usize) -> (&mut ParticleArrays, usize) {
        let n = self.particles.len();
        if slot < n {
            (&mut self.particles, slot)
        } else {
            (&mut self.images, slot - n)
        }
    }

    /// Physical extent of the block.
    pub fn extract_bound(&self) -> ([Real; 3], [Real; 3]) {
        self.block.bounds()
    }

    /// Drop every particle and image.
    pub fn clear_particles(&mut self) {
        self.particles.clear();
        self.images.clear();
    }

    /// Zero accumulated drag force and torque.
    pub fn reset_drag(&mut self) {
        for arrays in [&mut self.particles, &mut self.images] {
            arrays.drag_force.iter_mut().for_each(|f| *f = [0.0; 3]);
            arrays.drag_torque.iter_mut().for_each(|t| *t = [0.0; 3]);
        }
    }

    fn stencil_for(&self, position: [Real; 3], radius: Real) -> Option<IterRange> {
        let dx = self.block.mesh_size;
        let (lo, hi) = self.block.bounds();
        let reach = radius + self.skin;
        for a in 0..self.block.dim {
            if position[a] + reach < lo[a] || position[a] - reach > hi[a] {
                return None;
            }
        }
        let mut plo = position;
        let mut phi = position;
        for a in 0..self.block.dim {
            plo[a] -= radius + dx;
            phi[a] += radius + dx;
        }
        let stencil = self.block.cells_touching(plo, phi);
        (!stencil.is_empty()).then_some(stencil)
    }

    /// Add a particle if its influence region reaches the block.
    ///
    /// Returns the owned index, or `None` when the particle was ignored.
    /// Images are added for every periodic shift that brings a copy near
    /// the block, including shifts of particles not themselves kept here.
    pub fn insert_particle(&mut self, state: ParticleState) -> Option<usize> {
        let index = match self.stencil_for(state.position, state.radius) {
            Some(stencil) => {
                self.particles.push(&state, stencil, None, state.position);
                Some(self.particles.len() - 1)
            }
            None => None,
        };
        if let Some(domain) = self.periodic {
            self.insert_images(&state, &domain, index);
        }
        index
    }

    fn insert_images(&mut self, state: &ParticleState, domain: &PeriodicDomain, origin: Option<usize>) {
        let dim = self.block.dim;
        let mut shifts = vec![[0i32; 3]];
        for a in 0..dim {
            if !domain.periodic[a] {
                continue;
            }
            let mut next = Vec::with_capacity(shifts.len() * 3);
            for s in &shifts {
                for d in [-1, 0, 1] {
                    let mut t = *s;
                    t[a] = d;
                    next.push(t);
                }
            }
            shifts = next;
        }
        for s in shifts.into_iter().filter(|s| *s != [0; 3]) {
            let mut image = state.clone();
            for a in 0..dim {
                image.position[a] += s[a] as Real * (domain.max[a] - domain.min[a]);
            }
            if let Some(stencil) = self.stencil_for(image.position, image.radius) {
                self.images.push(&image, stencil, origin, state.position);
            }
        }
    }

    /// Drag force and torque of every slot, keyed by the position the
    /// particle was received at.
    ///
    /// Images report under their owner's position, so summing by key gives
    /// the total on each received particle.
    pub fn drag_by_particle(&self) -> impl Iterator<Item = ([Real; 3], [Real; 3], [Real; 3])> + '_ {
        [&self.particles, &self.images].into_iter().flat_map(|arrays| {
            (0..arrays.len()).map(move |i| (arrays.received_at[i], arrays.drag_force[i], arrays.drag_torque[i]))
        })
    }

    /// Accumulated drag force and torque of owned particle `i`.
    pub fn drag(&self, i: usize) -> ([Real; 3], [Real; 3]) {
        (self.particles.drag_force[i], self.particles.drag_torque[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Block {
        Block::new(0, "b", 3, [10, 10, 10], 0.1, [0.0; 3]).unwrap()
    }

    fn sphere(position: [Real; 3], radius: Real) -> ParticleState {
        ParticleState {
            position,
            radius,
            ..Default::default()
        }
    }

    #[test]
    fn far_particles_are_ignored() {
        let mut bp = BlockParticles::new(&block(), true, 0.05, ParticleShape::Spherical, None);
        assert_eq!(bp.insert_particle(sphere([0.5, 0.5, 0.5], 0.2)), Some(0));
        assert_eq!(bp.insert_particle(sphere([3.0, 0.5, 0.5], 0.2)), None);
        assert_eq!(bp.n_particles(), 1);
        let stencil = bp.particles.stencil[0];
        assert!(stencil.contains([5, 5, 5]));
        assert!(!stencil.contains([0, 5, 5]));
    }

    #[test]
    fn periodic_images_follow_owned_particles() {
        let domain = PeriodicDomain {
            periodic: [true, false, false],
            min: [-0.05; 3],
            max: [0.95; 3],
        };
        let mut bp = BlockParticles::new(&block(), true, 0.05, ParticleShape::Spherical, Some(domain));
        bp.insert_particle(sphere([0.05, 0.5, 0.5], 0.15));
        bp.insert_particle(sphere([0.5, 0.5, 0.5], 0.1));
        assert_eq!(bp.n_particles(), 2);
        assert_eq!(bp.n_periodic(), 1);
        assert!((bp.images.position[0][0] - 1.05).abs() < 1e-12);
        assert_eq!(bp.images.image_of[0], Some(0));
        let (arrays, local) = bp.slot(2);
        assert_eq!(local, 0);
        assert_eq!(arrays.position[0], bp.images.position[0]);
    }

    #[test]
    fn image_drag_is_reported_under_the_owner_position() {
        let domain = PeriodicDomain {
            periodic: [true, false, false],
            min: [-0.05; 3],
            max: [0.95; 3],
        };
        let mut bp = BlockParticles::new(&block(), true, 0.05, ParticleShape::Spherical, Some(domain));
        bp.insert_particle(sphere([0.05, 0.5, 0.5], 0.15));
        bp.particles.drag_force[0] = [1.0, 0.0, 0.0];
        bp.images.drag_force[0] = [0.5, 0.0, 0.0];
        let drag: Vec<_> = bp.drag_by_particle().collect();
        assert_eq!(drag.len(), 2);
        assert!(drag.iter().all(|(at, _, _)| *at == [0.05, 0.5, 0.5]));
        let total: Real = drag.iter().map(|(_, f, _)| f[0]).sum();
        assert_eq!(total, 1.5);
        bp.reset_drag();
        assert_eq!(bp.drag(0).0, [0.0; 3]);
    }

    #[test]
    fn surface_velocity_adds_rotation() {
        let mut bp = BlockParticles::new(&block(), true, 0.0, ParticleShape::Spherical, None);
        bp.insert_particle(ParticleState {
            position: [0.5; 3],
            radius: 0.1,
            velocity: [1.0, 0.0, 0.0],
            angular_velocity: [0.0, 0.0, 2.0],
            ..Default::default()
        });
        let v = bp.particles.surface_velocity(0, [0.0, 0.1, 0.0]);
        assert!((v[0] - 0.8).abs() < 1e-12 && v[1].abs() < 1e-12);
    }
}
