//! Case file parsing and validation for coupled LBM-DEM runs

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use kernel::{
    BodyForceType, BoundaryScheme, BoundarySurface, CollisionType, ForceType, FpiModelKind, GivenVars, LatticeKind,
    MappingModel, ParticleShape, ParticleState, Real, RelaxationModel,
};
use kernel::mapping::MAX_SLOTS;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Main case configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseConfig {
    /// Case name, also the prefix of checkpoint files
    pub name: String,
    /// Spatial dimension (2 or 3)
    pub space_dim: usize,
    /// Grid spacing shared by every block
    pub mesh_size: Real,
    /// Fluid time step; defaults to the mesh size (lattice units)
    #[serde(default)]
    pub time_step: Option<Real>,
    /// Structured blocks
    pub blocks: Vec<BlockConfig>,
    /// Fluid components
    pub components: Vec<ComponentConfig>,
    /// Boundary conditions, applied in the order listed
    #[serde(default)]
    pub boundaries: Vec<BoundaryConfig>,
    /// Node ranges marked solid
    #[serde(default)]
    pub solid_regions: Vec<SolidRegion>,
    /// When to stop
    pub run: RunMode,
    /// Where and how often to write checkpoints
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Spread large loops over worker threads
    #[serde(default)]
    pub parallel: bool,
    /// Fluid-particle coupling; absent for pure fluid cases
    #[serde(default)]
    pub coupling: Option<CouplingConfig>,
}

/// One structured block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Block id
    pub id: usize,
    /// Block name
    pub name: String,
    /// Nodes per axis; the z count is 1 in 2-D
    pub size: [usize; 3],
    /// Coordinate of node (0, 0, 0)
    #[serde(default)]
    pub origin: [Real; 3],
}

/// One fluid component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Component id
    pub id: usize,
    /// Component name
    pub name: String,
    /// Velocity set
    pub lattice: LatticeKind,
    /// Reference relaxation time
    pub tau_ref: Real,
    /// Collision operator
    #[serde(default = "default_collision")]
    pub collision: CollisionType,
    /// Body force
    #[serde(default = "default_body_force")]
    pub body_force: BodyForceType,
    /// Relaxation time update
    #[serde(default = "default_relaxation")]
    pub relaxation: RelaxationModel,
    /// Initial density
    #[serde(default = "default_rho")]
    pub initial_rho: Real,
    /// Initial velocity
    #[serde(default)]
    pub initial_velocity: [Real; 3],
}

/// A boundary scheme on one block face
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfig {
    /// Block id
    pub block: usize,
    /// Component id
    pub component: usize,
    /// Face
    pub surface: BoundarySurface,
    /// Scheme; unknown names load as a disabled boundary
    pub scheme: BoundaryScheme,
    /// Prescribed density and velocity
    #[serde(default)]
    pub given: GivenVars,
}

/// Half-open node range of one block marked solid for one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolidRegion {
    /// Block id
    pub block: usize,
    /// Component id
    pub component: usize,
    /// First node
    pub start: [usize; 3],
    /// One past the last node
    pub end: [usize; 3],
}

/// Stopping condition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunMode {
    /// Run a fixed number of steps
    Transient {
        /// Steps to run
        steps: u64,
    },
    /// Run until every residual drops below `criterion`
    Steady {
        /// Convergence threshold on the residual
        criterion: Real,
        /// Steps between residual evaluations
        #[serde(default = "default_check_period")]
        check_period: u64,
        /// Give up after this many steps
        max_steps: u64,
    },
}

/// Checkpoint output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory the checkpoint files go to
    #[serde(default = "default_checkpoint_dir")]
    pub directory: String,
    /// Steps between checkpoints; none when absent
    #[serde(default)]
    pub period: Option<u64>,
}

/// Fluid-particle coupling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingConfig {
    /// Particle slots per node
    #[serde(default = "default_slots")]
    pub slots_per_node: usize,
    /// Extra reach added to each particle when deciding which blocks it touches
    #[serde(default)]
    pub skin: Real,
    /// Shape family of every particle
    #[serde(default = "default_shape")]
    pub particle_shape: ParticleShape,
    /// Axes along which the particle domain wraps
    #[serde(default)]
    pub periodic: [bool; 3],
    /// Fluid steps between particle exchanges
    #[serde(default = "default_interval")]
    pub coupling_interval: u64,
    /// Coupling model per component
    pub models: Vec<ModelConfig>,
    /// Mapping model per component
    pub mappings: Vec<MappingConfig>,
    /// Global body-force model
    #[serde(default)]
    pub force: ForceConfig,
    /// Blocks this process computes; all blocks when absent
    #[serde(default)]
    pub owned_blocks: Option<Vec<usize>>,
    /// Particles inserted locally when no particle process is attached
    #[serde(default)]
    pub particles: Vec<ParticleState>,
    /// Keys exchanged with an external particle process
    #[serde(default)]
    pub sync: Option<SyncConfig>,
}

/// Coupling model of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Component id
    pub component: usize,
    /// Scheme
    pub kind: FpiModelKind,
    /// Scheme parameters
    #[serde(default)]
    pub params: Vec<Real>,
}

/// Mapping model of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Component id
    pub component: usize,
    /// Model
    #[serde(default = "default_mapping")]
    pub model: MappingModel,
    /// Reuse the mapping fields of this component instead of owning a set
    #[serde(default)]
    pub copy_from: Option<usize>,
}

/// Global body-force model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceConfig {
    /// Scheme
    #[serde(default = "default_force")]
    pub kind: ForceType,
    /// Scheme parameters; empty selects no force
    #[serde(default)]
    pub params: Vec<Real>,
}

/// User-defined keys exchanged with the particle process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Shape parameters fetched per particle
    #[serde(default)]
    pub shape_keys: Vec<String>,
    /// Extra scalars fetched per particle
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Extra scalars pushed per particle
    #[serde(default)]
    pub outputs: Vec<String>,
}

// Default values
fn default_collision() -> CollisionType {
    CollisionType::Bgk
}

fn default_body_force() -> BodyForceType {
    BodyForceType::None
}

fn default_relaxation() -> RelaxationModel {
    RelaxationModel::Constant
}

fn default_rho() -> Real {
    1.0
}

fn default_check_period() -> u64 {
    100
}

fn default_checkpoint_dir() -> String {
    "checkpoints".to_string()
}

fn default_slots() -> usize {
    1
}

fn default_shape() -> ParticleShape {
    ParticleShape::Spherical
}

fn default_interval() -> u64 {
    1
}

fn default_mapping() -> MappingModel {
    MappingModel::Spherical
}

fn default_force() -> ForceType {
    ForceType::NoForce
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: default_checkpoint_dir(),
            period: None,
        }
    }
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            kind: default_force(),
            params: Vec::new(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> OrchestratorError {
    OrchestratorError::Config(msg.into())
}

impl CaseConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| OrchestratorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CaseConfig = serde_json::from_str(&contents).map_err(|source| OrchestratorError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Fluid time step
    pub fn time_step(&self) -> Real {
        self.time_step.unwrap_or(self.mesh_size)
    }

    /// Checkpoint file prefix: the case name inside the checkpoint directory
    pub fn case_prefix(&self) -> String {
        Path::new(&self.checkpoint.directory)
            .join(&self.name)
            .to_string_lossy()
            .into_owned()
    }

    /// Validate the configuration
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("case name must not be empty"));
        }
        if !(self.space_dim == 2 || self.space_dim == 3) {
            return Err(invalid(format!("space_dim must be 2 or 3, got {}", self.space_dim)));
        }
        if !(self.mesh_size > 0.0) {
            return Err(invalid("mesh_size must be positive"));
        }
        if !(self.time_step() > 0.0) {
            return Err(invalid("time_step must be positive"));
        }

        // Blocks
        if self.blocks.is_empty() {
            return Err(invalid("at least one block is required"));
        }
        let mut block_ids = BTreeSet::new();
        for b in &self.blocks {
            if !block_ids.insert(b.id) {
                return Err(invalid(format!("duplicate block id {}", b.id)));
            }
            for a in 0..self.space_dim {
                if b.size[a] < 2 {
                    return Err(invalid(format!("block '{}' needs at least 2 nodes along axis {a}", b.name)));
                }
            }
            if self.space_dim == 2 && b.size[2] != 1 {
                return Err(invalid(format!("2-D block '{}' must have one node along z", b.name)));
            }
        }

        // Components
        if self.components.is_empty() {
            return Err(invalid("at least one component is required"));
        }
        let mut component_ids = BTreeSet::new();
        for c in &self.components {
            if !component_ids.insert(c.id) {
                return Err(invalid(format!("duplicate component id {}", c.id)));
            }
            let lattice_dim = match c.lattice {
                LatticeKind::D2Q9 => 2,
                LatticeKind::D3Q19 => 3,
            };
            if lattice_dim != self.space_dim {
                return Err(invalid(format!(
                    "component '{}' uses {:?} in a {}-D case",
                    c.name, c.lattice, self.space_dim
                )));
            }
            if !(c.tau_ref > 0.0) {
                return Err(invalid(format!("component '{}' tau_ref must be positive", c.name)));
            }
            if !(c.initial_rho > 0.0) {
                return Err(invalid(format!("component '{}' initial_rho must be positive", c.name)));
            }
        }

        // Boundaries and solids
        for bc in &self.boundaries {
            if !block_ids.contains(&bc.block) {
                return Err(invalid(format!("boundary references unknown block {}", bc.block)));
            }
            if !component_ids.contains(&bc.component) {
                return Err(invalid(format!("boundary references unknown component {}", bc.component)));
            }
            if bc.surface.axis() >= self.space_dim {
                return Err(invalid(format!("surface {:?} does not exist in a {}-D case", bc.surface, self.space_dim)));
            }
        }
        self.validate_periodic_boundaries()?;
        for s in &self.solid_regions {
            let block = self
                .blocks
                .iter()
                .find(|b| b.id == s.block)
                .ok_or_else(|| invalid(format!("solid region references unknown block {}", s.block)))?;
            if !component_ids.contains(&s.component) {
                return Err(invalid(format!("solid region references unknown component {}", s.component)));
            }
            if (0..3).any(|a| s.start[a] >= s.end[a] || s.end[a] > block.size[a]) {
                return Err(invalid(format!("solid region {:?}..{:?} exceeds block '{}'", s.start, s.end, block.name)));
            }
        }

        // Run control
        match self.run {
            RunMode::Transient { steps } => {
                if steps == 0 {
                    return Err(invalid("transient runs need at least 1 step"));
                }
            }
            RunMode::Steady {
                criterion,
                check_period,
                max_steps,
            } => {
                if !(criterion > 0.0) {
                    return Err(invalid("convergence criterion must be positive"));
                }
                if check_period == 0 || max_steps == 0 {
                    return Err(invalid("check_period and max_steps must be at least 1"));
                }
            }
        }
        if self.checkpoint.period == Some(0) {
            return Err(invalid("checkpoint period must be at least 1"));
        }

        if let Some(coupling) = &self.coupling {
            self.validate_coupling(coupling, &block_ids, &component_ids)?;
        }
        Ok(())
    }

    /// Validate that periodic boundaries are properly paired
    fn validate_periodic_boundaries(&self) -> OrchestratorResult<()> {
        let periodic = |block: usize, component: usize, surface: BoundarySurface| {
            self.boundaries.iter().any(|bc| {
                bc.block == block && bc.component == component && bc.surface == surface && bc.scheme == BoundaryScheme::Periodic
            })
        };
        for bc in self.boundaries.iter().filter(|bc| bc.scheme == BoundaryScheme::Periodic) {
            let partner = match bc.surface {
                BoundarySurface::Left => BoundarySurface::Right,
                BoundarySurface::Right => BoundarySurface::Left,
                BoundarySurface::Top => BoundarySurface::Bottom,
                BoundarySurface::Bottom => BoundarySurface::Top,
                BoundarySurface::Front => BoundarySurface::Back,
                BoundarySurface::Back => BoundarySurface::Front,
            };
            if !periodic(bc.block, bc.component, partner) {
                return Err(invalid(format!(
                    "periodic boundaries must be paired: block {} component {} has {:?} without {:?}",
                    bc.block, bc.component, bc.surface, partner
                )));
            }
        }
        Ok(())
    }

    fn validate_coupling(
        &self,
        coupling: &CouplingConfig,
        block_ids: &BTreeSet<usize>,
        component_ids: &BTreeSet<usize>,
    ) -> OrchestratorResult<()> {
        if coupling.slots_per_node == 0 || coupling.slots_per_node > MAX_SLOTS {
            return Err(invalid(format!("slots_per_node must be between 1 and {MAX_SLOTS}")));
        }
        if !(coupling.skin >= 0.0) {
            return Err(invalid("particle skin must be non-negative"));
        }
        if coupling.coupling_interval == 0 {
            return Err(invalid("coupling_interval must be at least 1"));
        }
        if let Some(owned) = &coupling.owned_blocks {
            if let Some(b) = owned.iter().find(|b| !block_ids.contains(b)) {
                return Err(invalid(format!("owned_blocks references unknown block {b}")));
            }
        }

        let mut mapped = BTreeSet::new();
        for m in &coupling.mappings {
            if !component_ids.contains(&m.component) {
                return Err(invalid(format!("mapping references unknown component {}", m.component)));
            }
            if !mapped.insert(m.component) {
                return Err(invalid(format!("component {} has two mapping definitions", m.component)));
            }
        }
        for m in coupling.mappings.iter().filter_map(|m| m.copy_from.map(|src| (m.component, src))) {
            let (component, source) = m;
            let owner = coupling
                .mappings
                .iter()
                .any(|o| o.component == source && o.copy_from.is_none());
            if !owner {
                return Err(invalid(format!(
                    "component {component} copies the mapping of component {source}, which owns none"
                )));
            }
        }

        let mut modelled = BTreeSet::new();
        for m in &coupling.models {
            if !component_ids.contains(&m.component) {
                return Err(invalid(format!("coupling model references unknown component {}", m.component)));
            }
            if !modelled.insert(m.component) {
                return Err(invalid(format!("component {} has two coupling models", m.component)));
            }
            if m.kind != FpiModelKind::None && !mapped.contains(&m.component) {
                return Err(invalid(format!(
                    "component {} is coupled with {:?} but has no mapping",
                    m.component, m.kind
                )));
            }
        }

        for (i, p) in coupling.particles.iter().enumerate() {
            if !(p.radius > 0.0) {
                return Err(invalid(format!("particle {i} has non-positive radius {}", p.radius)));
            }
        }
        if coupling.sync.is_some() && !coupling.particles.is_empty() {
            return Err(invalid("local particles and external synchronization are mutually exclusive"));
        }
        Ok(())
    }
}
