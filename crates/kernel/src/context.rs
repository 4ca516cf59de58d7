//! The simulation context: sole owner of blocks, components, fields and
//! coupling state.
//!
//! Every operation takes the context explicitly; lookups by id go through
//! methods that fail with a typed error when the id was never defined.

use std::collections::BTreeMap;

use crate::block::Block;
use crate::boundary::{BoundaryDefinition, BoundaryScheme};
use crate::component::Component;
use crate::engine::Executor;
use crate::error::{KernelError, KernelResult};
use crate::field::StartMode;
use crate::fpi::{FpiData, FpiModelKind, ForceType, Forces};
use crate::mapping::{MappingFieldSet, MappingModel, MappingRegistry};
use crate::particle::{BlockParticles, ParticleShape, PeriodicDomain};
use crate::registry::FieldRegistry;
use crate::Real;

/// Coupling-model definition of one component.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionModel {
    /// Component id.
    pub component: usize,
    /// Scheme.
    pub kind: FpiModelKind,
    /// Scheme parameters; the blending coefficient comes first.
    pub params: Vec<Real>,
}

/// Mapping definition of one component.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingDefinition {
    /// Component id.
    pub component: usize,
    /// Mapping model.
    pub model: MappingModel,
    /// Component whose mapping fields are reused instead of owning any.
    pub copy_from: Option<usize>,
}

/// Complete state of one simulation.
#[derive(Debug)]
pub struct SimulationContext {
    /// Prefix of checkpoint files.
    pub case_name: String,
    /// Spatial dimension.
    pub dim: usize,
    /// Blocks, in id order.
    pub blocks: Vec<Block>,
    /// Components by id.
    pub components: BTreeMap<usize, Component>,
    /// Every field.
    pub registry: FieldRegistry,
    /// Boundary definitions in application order.
    pub boundaries: Vec<BoundaryDefinition>,
    /// Particle mapping per component.
    pub mapping: MappingRegistry,
    /// Coupling models per component.
    pub fpi: BTreeMap<usize, FpiData>,
    /// Global force model.
    pub forces: Forces,
    /// Particles per block.
    pub particles: Vec<BlockParticles>,
    /// Particle slots per node.
    pub n_elem: usize,
    /// Loop executor.
    pub executor: Executor,
    /// Fluid time step.
    pub time_step: Real,
    /// How fields were created.
    pub start: StartMode,
}

impl SimulationContext {
    /// Create a context and allocate (or restore) every registry field.
    pub fn new(
        case_name: impl Into<String>,
        blocks: Vec<Block>,
        components: Vec<Component>,
        time_step: Real,
        start: StartMode,
        executor: Executor,
    ) -> KernelResult<Self> {
        let case_name = case_name.into();
        let dim = blocks
            .first()
            .map(|b| b.dim)
            .ok_or_else(|| KernelError::Invalid("a simulation needs at least one block".into()))?;
        if let Some(b) = blocks.iter().find(|b| b.dim != dim) {
            return Err(KernelError::Invalid(format!(
                "block '{}' is {}-D in a {dim}-D simulation",
                b.name, b.dim
            )));
        }
        let mut ids = blocks.iter().map(|b| b.id).collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != blocks.len() {
            return Err(KernelError::Invalid("duplicate block id".into()));
        }
        let mut by_id = BTreeMap::new();
        for c in components {
            if c.dim() != dim {
                return Err(KernelError::Invalid(format!(
                    "component '{}' uses a {}-D lattice in a {dim}-D simulation",
                    c.name,
                    c.dim()
                )));
            }
            if by_id.insert(c.id, c).is_some() {
                return Err(KernelError::Invalid("duplicate component id".into()));
            }
        }
        if !(time_step > 0.0) {
            return Err(KernelError::Invalid(format!("non-positive time step {time_step}")));
        }
        let registry = FieldRegistry::create(&blocks, &by_id, dim, &start)?;
        tracing::info!(
            case = %case_name,
            dim,
            blocks = blocks.len(),
            components = by_id.len(),
            restart = !matches!(start, StartMode::Scratch),
            "simulation context created"
        );
        Ok(Self {
            case_name,
            dim,
            blocks,
            components: by_id,
            registry,
            boundaries: Vec::new(),
            mapping: MappingRegistry::default(),
            fpi: BTreeMap::new(),
            forces: Forces::default(),
            particles: Vec::new(),
            n_elem: 1,
            executor,
            time_step,
            start,
        })
    }

    /// Component `id`.
    pub fn component(&self, id: usize) -> KernelResult<&Component> {
        self.components.get(&id).ok_or(KernelError::UnknownComponent(id))
    }

    /// Block `id`.
    pub fn block(&self, id: usize) -> KernelResult<&Block> {
        self.blocks
            .iter()
            .find(|b| b.id == id)
            .ok_or(KernelError::UnknownBlock(id))
    }

    /// Coupling record of component `id`.
    pub fn fpi(&self, id: usize) -> KernelResult<&FpiData> {
        self.fpi.get(&id).ok_or(KernelError::UnknownComponent(id))
    }

    /// Add a boundary definition.
    ///
    /// Definitions for the same block and component must not overlap.
    pub fn define_boundary(&mut self, def: BoundaryDefinition) -> KernelResult<()> {
        self.block(def.block)?;
        self.component(def.component)?;
        let clash = self.boundaries.iter().any(|other| {
            other.block == def.block && other.component == def.component && other.range.intersect(&def.range).is_some()
        });
        if clash {
            return Err(KernelError::OverlappingBoundary {
                block: def.block,
                component: def.component,
            });
        }
        if def.scheme == BoundaryScheme::Disabled {
            tracing::warn!(block = def.block, component = def.component, surface = ?def.surface, "disabled boundary scheme registered");
        }
        self.boundaries.push(def);
        Ok(())
    }

    /// Set the number of particle slots per node and the per-block particle
    /// lists.
    pub fn define_block_particles(
        &mut self,
        n_elem: usize,
        skin: Real,
        shape: ParticleShape,
        owned_blocks: &[usize],
        periodic: Option<PeriodicDomain>,
    ) -> KernelResult<()> {
        if n_elem == 0 {
            return Err(KernelError::Invalid("particle slots per node must be positive".into()));
        }
        for id in owned_blocks {
            self.block(*id)?;
        }
        self.n_elem = n_elem;
        self.particles = self
            .blocks
            .iter()
            .map(|b| BlockParticles::new(b, owned_blocks.contains(&b.id), skin, shape, periodic))
            .collect();
        Ok(())
    }

    /// Shape family of the coupled particles, if particles were defined.
    pub fn particle_shape(&self) -> Option<ParticleShape> {
        self.particles.first().map(BlockParticles::shape)
    }

    /// Define the mapping model of every listed component.
    ///
    /// Components with `copy_from` are resolved after all owners exist.
    pub fn define_particle_mapping(&mut self, definitions: &[MappingDefinition]) -> KernelResult<()> {
        let shape = self
            .particle_shape()
            .ok_or_else(|| KernelError::Invalid("particle mapping defined before block particles".into()))?;
        for def in definitions.iter().filter(|d| d.copy_from.is_none()) {
            let component = self.component(def.component)?;
            let set = MappingFieldSet::define(
                component.id,
                &component.name,
                def.model,
                shape,
                self.n_elem,
                self.dim,
                &self.blocks,
                &self.start,
            )?;
            self.mapping.insert(set);
        }
        for def in definitions {
            if let Some(source) = def.copy_from {
                self.component(def.component)?;
                self.mapping.alias(def.component, source)?;
            }
        }
        Ok(())
    }

    /// Define the coupling model of every listed component.
    ///
    /// Coupled components need a particle mapping.
    pub fn define_interaction_models(&mut self, models: &[InteractionModel]) -> KernelResult<()> {
        for m in models {
            let component = self.component(m.component)?;
            if m.kind != FpiModelKind::None && !self.mapping.contains(m.component) {
                return Err(KernelError::Invalid(format!(
                    "component '{}' is coupled with {:?} but has no particle mapping",
                    component.name, m.kind
                )));
            }
            let data = FpiData::define(component, m.kind, m.params.clone(), self.n_elem, &self.blocks, &self.start)?;
            self.fpi.insert(m.component, data);
        }
        Ok(())
    }

    /// Define the global force model.
    pub fn define_force_model(&mut self, params: Vec<Real>, kind: ForceType) {
        self.forces = Forces::define(params, kind);
        tracing::debug!(forces = ?self.forces, "force model defined");
    }

    /// Check that every field exists with the right layout on every block.
    ///
    /// Run once before time stepping.
    pub fn validate(&self) -> KernelResult<()> {
        self.registry.validate(&self.blocks, &self.components)?;
        for (&id, data) in &self.fpi {
            let component = self.component(id)?;
            if data.kind() != FpiModelKind::None {
                data.fd.validate(&self.blocks, component.dim() * self.n_elem)?;
                let set = self.mapping.get(id)?;
                set.solid_fraction.validate(&self.blocks, self.n_elem)?;
                set.surface_velocity.validate(&self.blocks, self.dim * self.n_elem)?;
                set.relative_position.validate(&self.blocks, self.dim * self.n_elem)?;
                set.particle_id.validate(&self.blocks, self.n_elem)?;
            }
        }
        for def in &self.boundaries {
            self.block(def.block)?;
            self.component(def.component)?;
        }
        Ok(())
    }

    /// Write every field needed to restart at `time_step`.
    pub fn write_checkpoint(&self, time_step: u64) -> KernelResult<()> {
        self.registry.write_checkpoint(&self.case_name, time_step)?;
        for set in self.mapping.owned() {
            set.write_to_file(&self.case_name, time_step)?;
        }
        for data in self.fpi.values().filter(|d| d.kind() != FpiModelKind::None) {
            data.fd.write_to_file(&self.case_name, time_step)?;
        }
        tracing::info!(case = %self.case_name, time_step, "checkpoint written");
        Ok(())
    }
}
