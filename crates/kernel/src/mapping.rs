//! Particle-to-grid mapping.
//!
//! For each coupled component the mapping layer keeps, per node, `n_elem`
//! slots recording which particle covers the node and how much of it:
//!
//! | field | values per node | meaning |
//! |-------|-----------------|---------|
//! | `sfp` | `n_elem` | solid fraction per slot |
//! | `vp`  | `dim * n_elem` | particle surface velocity per slot |
//! | `xf`  | `dim * n_elem` | node position relative to the particle centre |
//! | `id`  | `n_elem` | particle slot id on the block, `-1` when empty |
//!
//! When more particles touch a node than there are slots, the slot with the
//! smallest solid fraction is taken over by a larger one. Force models sum
//! the slot fractions and clamp the total to one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::engine::{Access, Executor, LoopArg, LoopRecord};
use crate::error::{KernelError, KernelResult};
use crate::field::{FieldDescriptor, FieldSet, IntField, RealField, StartMode};
use crate::particle::{BlockParticles, ParticleShape};
use crate::Real;

/// Sub-cell samples per axis when a node straddles a particle surface.
pub const SUBCELL_SAMPLES: usize = 5;

/// Slot id marking an empty slot.
pub const EMPTY_SLOT: i32 = -1;

/// Upper bound on particle slots per node.
pub const MAX_SLOTS: usize = 8;

/// Particle-to-grid mapping models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingModel {
    /// Analytical solid fraction of spheres, refined by sub-cell sampling.
    Spherical,
}

impl MappingModel {
    fn layout(self, component: &str, n_elem: usize, dim: usize) -> (Vec<FieldDescriptor>, Vec<FieldDescriptor>) {
        match self {
            MappingModel::Spherical => (
                vec![
                    FieldDescriptor::new(format!("sfp_{component}"), n_elem),
                    FieldDescriptor::new(format!("vp_{component}"), dim * n_elem),
                    FieldDescriptor::new(format!("xf_{component}"), dim * n_elem),
                ],
                vec![FieldDescriptor::new(format!("id_{component}"), n_elem)],
            ),
        }
    }
}

/// Mapping fields of one component.
#[derive(Debug, Clone)]
pub struct MappingFieldSet {
    /// Component the fields belong to.
    pub component: usize,
    /// Model filling the fields.
    pub model: MappingModel,
    /// Slots per node.
    pub n_elem: usize,
    /// Spatial dimension.
    pub dim: usize,
    /// Solid fraction per slot.
    pub solid_fraction: RealField,
    /// Particle surface velocity per slot.
    pub surface_velocity: RealField,
    /// Node position relative to the particle centre per slot.
    pub relative_position: RealField,
    /// Particle slot id per slot.
    pub particle_id: IntField,
}

impl MappingFieldSet {
    /// Allocate or restore the fields of `model`.
    ///
    /// Fails when the model cannot map particles of `shape`.
    #[allow(clippy::too_many_arguments)]
    pub fn define(
        component: usize,
        component_name: &str,
        model: MappingModel,
        shape: ParticleShape,
        n_elem: usize,
        dim: usize,
        blocks: &[Block],
        start: &StartMode,
    ) -> KernelResult<Self> {
        if model == MappingModel::Spherical && shape != ParticleShape::Spherical {
            return Err(KernelError::Unsupported(format!(
                "mapping model {model:?} requires spherical particles, got {shape:?}"
            )));
        }
        if n_elem == 0 || n_elem > MAX_SLOTS {
            return Err(KernelError::Invalid(format!(
                "mapping needs between 1 and {MAX_SLOTS} slots per node, got {n_elem}"
            )));
        }
        let (real, int) = model.layout(component_name, n_elem, dim);
        let names = |d: &[FieldDescriptor]| d.iter().map(|f| f.name.clone()).collect::<Vec<_>>();
        let sizes = |d: &[FieldDescriptor]| d.iter().map(|f| f.elements).collect::<Vec<_>>();
        let set = FieldSet::define(&names(&real), &sizes(&real), &names(&int), &sizes(&int), blocks, start)?;
        let FieldSet { real, int } = set;
        let mut real = real.into_iter();
        let mut int = int.into_iter();
        match (real.next(), real.next(), real.next(), int.next()) {
            (Some(solid_fraction), Some(surface_velocity), Some(relative_position), Some(particle_id)) => {
                let mut set = Self {
                    component,
                    model,
                    n_elem,
                    dim,
                    solid_fraction,
                    surface_velocity,
                    relative_position,
                    particle_id,
                };
                if *start == StartMode::Scratch {
                    set.particle_id.fill(EMPTY_SLOT);
                }
                Ok(set)
            }
            _ => Err(KernelError::Invalid(format!("mapping model {model:?} layout is incomplete"))),
        }
    }

    /// Write every mapping field.
    pub fn write_to_file(&self, case_name: &str, time_step: u64) -> KernelResult<()> {
        self.solid_fraction.write_to_file(case_name, time_step)?;
        self.surface_velocity.write_to_file(case_name, time_step)?;
        self.relative_position.write_to_file(case_name, time_step)?;
        self.particle_id.write_to_file(case_name, time_step)?;
        Ok(())
    }

    /// Borrow the fields of one block.
    pub fn block_view(&self, block: usize) -> KernelResult<MappingView<'_>> {
        Ok(MappingView {
            n_elem: self.n_elem,
            dim: self.dim,
            sfp: self.solid_fraction.block(block)?,
            vp: self.surface_velocity.block(block)?,
            xf: self.relative_position.block(block)?,
            id: self.particle_id.block(block)?,
        })
    }
}

/// Read-only mapping data of one block.
#[derive(Debug, Clone, Copy)]
pub struct MappingView<'a> {
    /// Slots per node.
    pub n_elem: usize,
    /// Spatial dimension.
    pub dim: usize,
    /// Solid fractions.
    pub sfp: &'a [Real],
    /// Surface velocities.
    pub vp: &'a [Real],
    /// Relative positions.
    pub xf: &'a [Real],
    /// Slot ids.
    pub id: &'a [i32],
}

impl MappingView<'_> {
    /// Solid fraction of slot `e` at node `idx`.
    #[inline]
    pub fn fraction(&self, idx: usize, e: usize) -> Real {
        self.sfp[idx * self.n_elem + e]
    }

    /// Particle slot id of slot `e` at node `idx`.
    #[inline]
    pub fn particle(&self, idx: usize, e: usize) -> i32 {
        self.id[idx * self.n_elem + e]
    }

    /// Surface velocity of slot `e` at node `idx`.
    #[inline]
    pub fn velocity(&self, idx: usize, e: usize) -> [Real; 3] {
        let mut v = [0.0; 3];
        let at = (idx * self.n_elem + e) * self.dim;
        v[..self.dim].copy_from_slice(&self.vp[at..at + self.dim]);
        v
    }

    /// Relative position of slot `e` at node `idx`.
    #[inline]
    pub fn offset(&self, idx: usize, e: usize) -> [Real; 3] {
        let mut v = [0.0; 3];
        let at = (idx * self.n_elem + e) * self.dim;
        v[..self.dim].copy_from_slice(&self.xf[at..at + self.dim]);
        v
    }
}

/// Where a component's mapping lives.
#[derive(Debug, Clone)]
pub enum MappingEntry {
    /// The component owns its fields.
    Owned(MappingFieldSet),
    /// The component reads the fields of another component.
    Alias(usize),
}

/// Mapping definitions of every coupled component.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    entries: BTreeMap<usize, MappingEntry>,
}

impl MappingRegistry {
    /// Register owned fields.
    pub fn insert(&mut self, set: MappingFieldSet) {
        self.entries.insert(set.component, MappingEntry::Owned(set));
    }

    /// Let `component` read the fields of `source`.
    pub fn alias(&mut self, component: usize, source: usize) -> KernelResult<()> {
        match self.entries.get(&source) {
            Some(MappingEntry::Owned(_)) => {
                self.entries.insert(component, MappingEntry::Alias(source));
                Ok(())
            }
            Some(MappingEntry::Alias(_)) => Err(KernelError::Invalid(format!(
                "component {component} cannot copy the mapping of {source}, which is itself a copy"
            ))),
            None => Err(KernelError::Invalid(format!(
                "component {component} copies the mapping of {source}, which has none"
            ))),
        }
    }

    /// Whether `component` has a mapping.
    pub fn contains(&self, component: usize) -> bool {
        self.entries.contains_key(&component)
    }

    fn resolve(&self, component: usize) -> KernelResult<usize> {
        match self.entries.get(&component) {
            Some(MappingEntry::Owned(_)) => Ok(component),
            Some(MappingEntry::Alias(src)) => Ok(*src),
            None => Err(KernelError::Invalid(format!("component {component} has no particle mapping"))),
        }
    }

    /// Mapping fields seen by `component`.
    pub fn get(&self, component: usize) -> KernelResult<&MappingFieldSet> {
        let owner = self.resolve(component)?;
        match self.entries.get(&owner) {
            Some(MappingEntry::Owned(set)) => Ok(set),
            _ => Err(KernelError::Invalid(format!("component {component} has no particle mapping"))),
        }
    }

    /// Mutable mapping fields seen by `component`.
    pub fn get_mut(&mut self, component: usize) -> KernelResult<&mut MappingFieldSet> {
        let owner = self.resolve(component)?;
        match self.entries.get_mut(&owner) {
            Some(MappingEntry::Owned(set)) => Ok(set),
            _ => Err(KernelError::Invalid(format!("component {component} has no particle mapping"))),
        }
    }

    /// Every set that owns its fields.
    pub fn owned_mut(&mut self) -> impl Iterator<Item = &mut MappingFieldSet> {
        self.entries.values_mut().filter_map(|e| match e {
            MappingEntry::Owned(set) => Some(set),
            MappingEntry::Alias(_) => None,
        })
    }

    /// Every set that owns its fields.
    pub fn owned(&self) -> impl Iterator<Item = &MappingFieldSet> {
        self.entries.values().filter_map(|e| match e {
            MappingEntry::Owned(set) => Some(set),
            MappingEntry::Alias(_) => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Solid fraction
// ---------------------------------------------------------------------------

/// Fraction of the cell centred at `x` (edge `dx`) inside the sphere of
/// radius `r` centred at `p`.
///
/// Cells clearly inside or outside are decided from the centre distance;
/// cells cut by the surface are sampled on a regular sub-grid.
pub fn sphere_solid_fraction(x: [Real; 3], dx: Real, dim: usize, p: [Real; 3], r: Real) -> Real {
    let dist2 = |y: [Real; 3]| (0..dim).map(|a| (y[a] - p[a]).powi(2)).sum::<Real>();
    let d = dist2(x).sqrt();
    let half_diagonal = 0.5 * dx * (dim as Real).sqrt();
    if d >= r + half_diagonal {
        return 0.0;
    }
    if d <= r - half_diagonal {
        return 1.0;
    }
    let n = SUBCELL_SAMPLES;
    let h = dx / n as Real;
    let r2 = r * r;
    let mut inside = 0usize;
    let mut total = 0usize;
    let nz = if dim == 3 { n } else { 1 };
    for k in 0..nz {
        for j in 0..n {
            for i in 0..n {
                let mut y = x;
                y[0] += -0.5 * dx + (i as Real + 0.5) * h;
                y[1] += -0.5 * dx + (j as Real + 0.5) * h;
                if dim == 3 {
                    y[2] += -0.5 * dx + (k as Real + 0.5) * h;
                }
                total += 1;
                if dist2(y) <= r2 {
                    inside += 1;
                }
            }
        }
    }
    inside as Real / total as Real
}

/// Empty every slot on every block.
pub fn initialize_mapping(exec: &Executor, blocks: &[Block], set: &mut MappingFieldSet) -> KernelResult<()> {
    let n_elem = set.n_elem;
    let dim = set.dim;
    for block in blocks {
        let range = block.whole_range();
        exec.launch(LoopRecord {
            kernel: "mapping_init",
            block: block.id,
            range,
            args: vec![
                LoopArg::dat("sfp", n_elem, Access::Write),
                LoopArg::dat("vp", dim * n_elem, Access::Write),
                LoopArg::dat("xf", dim * n_elem, Access::Write),
                LoopArg::dat("id", n_elem, Access::Write),
            ],
        });
        exec.map_cells(block, &range, set.solid_fraction.block_mut(block.id)?, n_elem, |_, _, v| v.fill(0.0));
        exec.map_cells(block, &range, set.surface_velocity.block_mut(block.id)?, dim * n_elem, |_, _, v| {
            v.fill(0.0)
        });
        exec.map_cells(block, &range, set.relative_position.block_mut(block.id)?, dim * n_elem, |_, _, v| {
            v.fill(0.0)
        });
        exec.map_cells(block, &range, set.particle_id.block_mut(block.id)?, n_elem, |_, _, v| {
            v.fill(EMPTY_SLOT)
        });
    }
    Ok(())
}

fn choose_slot(ids: &[i32], fractions: &[Real], particle: i32, fraction: Real) -> Option<usize> {
    if let Some(e) = ids.iter().position(|&id| id == particle) {
        return Some(e);
    }
    if let Some(e) = ids.iter().position(|&id| id == EMPTY_SLOT) {
        return Some(e);
    }
    let (weakest, &smallest) = fractions
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    (fraction > smallest).then_some(weakest)
}

/// Project every particle of owned blocks onto the mapping fields.
///
/// Only nodes within each particle's stencil are visited. Slots must have
/// been emptied by [`initialize_mapping`] at the start of the interval.
pub fn project_particles(
    exec: &Executor,
    blocks: &[Block],
    set: &mut MappingFieldSet,
    particles: &[BlockParticles],
) -> KernelResult<()> {
    let n_elem = set.n_elem;
    let dim = set.dim;
    for bp in particles.iter().filter(|bp| bp.owned) {
        let block = blocks
            .iter()
            .find(|b| b.id == bp.block_id())
            .ok_or(KernelError::UnknownBlock(bp.block_id()))?;
        let sfp = set.solid_fraction.block_mut(block.id)?;
        let vp = set.surface_velocity.block_mut(block.id)?;
        let xf = set.relative_position.block_mut(block.id)?;
        let id = set.particle_id.block_mut(block.id)?;
        for slot in 0..bp.total() {
            let (arrays, i) = bp.slot(slot);
            let stencil = arrays.stencil[i];
            exec.launch(LoopRecord {
                kernel: "solid_fraction_sphere",
                block: block.id,
                range: stencil,
                args: vec![
                    LoopArg::dat("sfp", n_elem, Access::ReadWrite),
                    LoopArg::dat("vp", dim * n_elem, Access::Write),
                    LoopArg::dat("xf", dim * n_elem, Access::Write),
                    LoopArg::dat("id", n_elem, Access::ReadWrite),
                    LoopArg::gbl("particle", 10, Access::Read),
                ],
            });
            let p = arrays.position[i];
            let r = arrays.radius[i];
            let tag = slot as i32;
            exec.for_each_cell(block, &stencil, |idx, ijk| {
                let x = block.coordinate(ijk);
                let fraction = sphere_solid_fraction(x, block.mesh_size, dim, p, r);
                if fraction <= 0.0 {
                    return;
                }
                let slots = idx * n_elem..(idx + 1) * n_elem;
                let Some(e) = choose_slot(&id[slots.clone()], &sfp[slots], tag, fraction) else {
                    tracing::debug!(block = block.id, idx, particle = slot, "mapping slots full; particle dropped at node");
                    return;
                };
                let at = idx * n_elem + e;
                sfp[at] = fraction;
                id[at] = tag;
                let rel = [x[0] - p[0], x[1] - p[1], x[2] - p[2]];
                let v = arrays.surface_velocity(i, rel);
                vp[at * dim..(at + 1) * dim].copy_from_slice(&v[..dim]);
                xf[at * dim..(at + 1) * dim].copy_from_slice(&rel[..dim]);
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleState;

    fn block() -> Block {
        Block::new(0, "b", 3, [12, 12, 12], 0.1, [0.0; 3]).unwrap()
    }

    fn set(n_elem: usize) -> MappingFieldSet {
        MappingFieldSet::define(
            0,
            "fluid",
            MappingModel::Spherical,
            ParticleShape::Spherical,
            n_elem,
            3,
            &[block()],
            &StartMode::Scratch,
        )
        .unwrap()
    }

    #[test]
    fn enclosed_cell_is_fully_solid() {
        assert_eq!(sphere_solid_fraction([0.5; 3], 0.1, 3, [0.52, 0.5, 0.5], 0.3), 1.0);
    }

    #[test]
    fn distant_cell_is_fluid() {
        let r = 0.2;
        let dx = 0.1;
        let x = [0.5 + r + dx + 1e-9, 0.5, 0.5];
        assert_eq!(sphere_solid_fraction(x, dx, 3, [0.5; 3], r), 0.0);
    }

    #[test]
    fn cut_cell_is_partial() {
        let s = sphere_solid_fraction([0.7, 0.5, 0.5], 0.1, 3, [0.5; 3], 0.2);
        assert!(s > 0.2 && s < 0.8, "{s}");
    }

    #[test]
    fn polyhedra_cannot_use_spherical_mapping() {
        let err = MappingFieldSet::define(
            0,
            "fluid",
            MappingModel::Spherical,
            ParticleShape::Polyhedron,
            1,
            3,
            &[block()],
            &StartMode::Scratch,
        );
        assert!(matches!(err, Err(KernelError::Unsupported(_))));
    }

    #[test]
    fn slot_count_is_bounded() {
        for n_elem in [0, MAX_SLOTS + 1] {
            let err = MappingFieldSet::define(
                0,
                "fluid",
                MappingModel::Spherical,
                ParticleShape::Spherical,
                n_elem,
                3,
                &[block()],
                &StartMode::Scratch,
            );
            assert!(matches!(err, Err(KernelError::Invalid(_))), "{n_elem} slots accepted");
        }
    }

    #[test]
    fn projection_marks_particle_nodes() {
        let b = block();
        let mut s = set(2);
        let exec = Executor::serial();
        let mut bp = BlockParticles::new(&b, true, 0.0, ParticleShape::Spherical, None);
        bp.insert_particle(ParticleState {
            position: [0.55; 3],
            radius: 0.2,
            velocity: [0.01, 0.0, 0.0],
            ..Default::default()
        });
        initialize_mapping(&exec, &[b.clone()], &mut s).unwrap();
        project_particles(&exec, &[b.clone()], &mut s, std::slice::from_ref(&bp)).unwrap();
        let view = s.block_view(0).unwrap();
        let centre = b.index([5, 5, 5]);
        assert_eq!(view.particle(centre, 0), 0);
        assert_eq!(view.fraction(centre, 0), 1.0);
        assert_eq!(view.particle(centre, 1), EMPTY_SLOT);
        assert!((view.velocity(centre, 0)[0] - 0.01).abs() < 1e-15);
        let far = b.index([0, 0, 0]);
        assert_eq!(view.particle(far, 0), EMPTY_SLOT);
    }

    #[test]
    fn overlapping_particles_share_slots_and_evict_smallest() {
        let ids = [3, 4];
        let fractions = [0.2, 0.6];
        assert_eq!(choose_slot(&ids, &fractions, 4, 0.1), Some(1));
        assert_eq!(choose_slot(&ids, &fractions, 7, 0.5), Some(0));
        assert_eq!(choose_slot(&ids, &fractions, 7, 0.1), None);
        assert_eq!(choose_slot(&[EMPTY_SLOT, 2], &fractions, 7, 0.1), Some(0));
    }

    #[test]
    fn alias_reads_owner_fields() {
        let mut reg = MappingRegistry::default();
        reg.insert(set(1));
        reg.alias(1, 0).unwrap();
        assert_eq!(reg.get(1).unwrap().component, 0);
        assert!(reg.alias(2, 1).is_err());
        assert!(reg.get(5).is_err());
    }
}
