//! Fluid-particle interaction (FPI) models.
//!
//! A coupling model is chosen per component. Each model implements the
//! subset of [`CouplingModel`] hooks it needs and declares them through
//! [`OwnedHooks`]; the evolution pipeline only calls owned hooks. Calling an
//! unowned hook through [`run_hook`] logs a warning and does nothing.

mod prati;
mod psm;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::component::Component;
use crate::engine::{Access, Executor, LoopArg, LoopRecord};
use crate::error::{KernelError, KernelResult};
use crate::field::{FieldDescriptor, RealField, StartMode};
use crate::mapping::{MappingFieldSet, MappingView, EMPTY_SLOT, MAX_SLOTS};
use crate::particle::BlockParticles;
use crate::registry::ComponentFields;
use crate::Real;

pub use prati::Prati;
pub use psm::Psm;

/// Number of entries in a hook flag vector.
pub const HOOK_FLAG_COUNT: usize = 8;

/// Coupling schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FpiModelKind {
    /// No coupling; the component collides normally.
    None,
    /// Partially saturated method (Noble and Torczynski).
    Psm,
    /// Velocity-correction scheme of Prati and co-workers.
    Prati,
}

/// Hooks a model takes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnedHooks {
    /// Macroscopic velocity correction after the moments update.
    pub post_velocity: bool,
    /// Injection of the global force into the forcing source.
    pub force_model: bool,
    /// Hook before collision.
    pub pre_collision: bool,
    /// Replacement collision.
    pub collision_model: bool,
    /// Hook after streaming.
    pub post_streaming: bool,
    /// Drag integration onto particles.
    pub drag_force: bool,
    /// One-time initialisation.
    pub initialize: bool,
    /// Thermal coupling.
    pub thermal: bool,
}

impl OwnedHooks {
    /// Decode a flag vector ordered post-velocity, force, pre-collision,
    /// collision, post-streaming, drag, initialise, thermal.
    pub fn from_flags(flags: &[bool]) -> KernelResult<Self> {
        if flags.len() != HOOK_FLAG_COUNT {
            return Err(KernelError::LengthMismatch {
                what: "coupling hook flags".into(),
                expected: HOOK_FLAG_COUNT,
                actual: flags.len(),
            });
        }
        Ok(Self {
            post_velocity: flags[0],
            force_model: flags[1],
            pre_collision: flags[2],
            collision_model: flags[3],
            post_streaming: flags[4],
            drag_force: flags[5],
            initialize: flags[6],
            thermal: flags[7],
        })
    }

    /// Whether `hook` is owned.
    pub fn owns(&self, hook: Hook) -> bool {
        match hook {
            Hook::PostVelocity => self.post_velocity,
            Hook::Force => self.force_model,
            Hook::PreCollision => self.pre_collision,
            Hook::Collision => self.collision_model,
            Hook::PostStreaming => self.post_streaming,
            Hook::Drag => self.drag_force,
            Hook::Initialize => self.initialize,
        }
    }
}

/// Coupling hooks, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Before the first step.
    Initialize,
    /// After the moments update.
    PostVelocity,
    /// After the equilibrium update.
    Force,
    /// Before collision.
    PreCollision,
    /// In place of the standard collision.
    Collision,
    /// After streaming.
    PostStreaming,
    /// After each fluid step.
    Drag,
}

// ---------------------------------------------------------------------------
// Global force model
// ---------------------------------------------------------------------------

/// Global body-force schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceType {
    /// No force.
    NoForce,
    /// Uniform acceleration given by the first `dim` parameters.
    Constant,
}

/// Process-wide force definition read by the coupling kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct Forces {
    /// Scheme.
    pub kind: ForceType,
    /// Parameters of the scheme.
    pub params: Vec<Real>,
}

impl Default for Forces {
    fn default() -> Self {
        Self::define(Vec::new(), ForceType::NoForce)
    }
}

impl Forces {
    /// Define the force model. No parameters means no force.
    pub fn define(params: Vec<Real>, kind: ForceType) -> Self {
        if params.is_empty() {
            return Self {
                kind: ForceType::NoForce,
                params: vec![0.0],
            };
        }
        Self { kind, params }
    }

    /// Acceleration vector, zero when there is no force.
    pub fn acceleration(&self) -> Option<[Real; 3]> {
        match self.kind {
            ForceType::NoForce => None,
            ForceType::Constant => {
                let mut a = [0.0; 3];
                for (slot, v) in a.iter_mut().zip(&self.params) {
                    *slot = *v;
                }
                Some(a)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Model interface
// ---------------------------------------------------------------------------

/// Everything a hook may read or write for one component.
pub struct CouplingEnv<'a> {
    /// Loop executor.
    pub exec: &'a Executor,
    /// All blocks.
    pub blocks: &'a [Block],
    /// Component being coupled.
    pub component: &'a Component,
    /// Component fields.
    pub fields: &'a mut ComponentFields,
    /// Mapping fields seen by the component.
    pub mapping: &'a MappingFieldSet,
    /// Per-slot force field.
    pub fd: &'a mut RealField,
    /// Particles per block.
    pub particles: &'a mut [BlockParticles],
    /// Global force model.
    pub forces: &'a Forces,
    /// Time step.
    pub dt: Real,
}

/// A coupling scheme.
///
/// Default hook bodies do nothing; a model overrides the hooks its
/// [`CouplingModel::hooks`] marks as owned.
pub trait CouplingModel: Send + Sync + std::fmt::Debug {
    /// Scheme identity.
    fn kind(&self) -> FpiModelKind;

    /// Hooks the model implements.
    fn hooks(&self) -> OwnedHooks;

    /// Prepare auxiliary fields before the first step.
    fn initialize(&self, _env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        Ok(())
    }

    /// Correct macroscopic velocities towards particle velocities.
    fn correct_velocity(&self, _env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        Ok(())
    }

    /// Add particle-aware forcing to the forcing source.
    fn inject_force(&self, _env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        Ok(())
    }

    /// Hook before collision.
    fn pre_collision(&self, _env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        Ok(())
    }

    /// Collide, writing `f_stage` and the per-slot force field.
    fn collide(&self, _env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        Ok(())
    }

    /// Hook after streaming.
    fn post_streaming(&self, _env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        Ok(())
    }

    /// Accumulate drag on particles from the per-slot force field.
    fn compute_drag(&self, _env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        Ok(())
    }
}

/// The model used when a component is not coupled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uncoupled;

impl CouplingModel for Uncoupled {
    fn kind(&self) -> FpiModelKind {
        FpiModelKind::None
    }

    fn hooks(&self) -> OwnedHooks {
        OwnedHooks::default()
    }
}

/// Run `hook` of `model` if the model owns it.
///
/// Returns whether the hook ran. An unowned hook is reported and skipped.
pub fn run_hook(model: &dyn CouplingModel, hook: Hook, env: &mut CouplingEnv<'_>) -> KernelResult<bool> {
    if !model.hooks().owns(hook) {
        tracing::warn!(
            ?hook,
            model = ?model.kind(),
            component = env.component.id,
            "coupling hook requested but not implemented for this model"
        );
        return Ok(false);
    }
    match hook {
        Hook::Initialize => model.initialize(env)?,
        Hook::PostVelocity => model.correct_velocity(env)?,
        Hook::Force => model.inject_force(env)?,
        Hook::PreCollision => model.pre_collision(env)?,
        Hook::Collision => model.collide(env)?,
        Hook::PostStreaming => model.post_streaming(env)?,
        Hook::Drag => model.compute_drag(env)?,
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Per-component record
// ---------------------------------------------------------------------------

/// Coupling state of one component.
#[derive(Debug)]
pub struct FpiData {
    /// Component id.
    pub component: usize,
    /// User parameters the model was built from.
    pub params: Vec<Real>,
    /// Per-slot force exerted by the fluid, `dim * n_elem` values per node.
    pub fd: RealField,
    model: Box<dyn CouplingModel>,
}

impl FpiData {
    /// Build the coupling record of `component`.
    ///
    /// Coupled models need a blending coefficient as first parameter.
    pub fn define(
        component: &Component,
        kind: FpiModelKind,
        params: Vec<Real>,
        n_elem: usize,
        blocks: &[Block],
        start: &StartMode,
    ) -> KernelResult<Self> {
        let model: Box<dyn CouplingModel> = match kind {
            FpiModelKind::None => Box::new(Uncoupled),
            FpiModelKind::Psm => Box::new(Psm::new(blending_coefficient(kind, &params)?)?),
            FpiModelKind::Prati => Box::new(Prati::new(blending_coefficient(kind, &params)?)?),
        };
        let hooks = model.hooks();
        if hooks.thermal {
            return Err(KernelError::Unsupported(format!(
                "coupling model {kind:?} requires thermal coupling"
            )));
        }
        let name = format!("Fd_{}", component.name);
        // An uncoupled component carries an empty force field that is never
        // checkpointed.
        let fd = if kind == FpiModelKind::None {
            RealField::create_from_scratch(FieldDescriptor::new(name, 0), blocks)
        } else {
            RealField::create(FieldDescriptor::new(name, component.dim() * n_elem), blocks, start)?
        };
        tracing::info!(component = %component.name, model = ?kind, ?hooks, "coupling model defined");
        Ok(Self {
            component: component.id,
            params,
            fd,
            model,
        })
    }

    /// Scheme identity.
    pub fn kind(&self) -> FpiModelKind {
        self.model.kind()
    }

    /// The model.
    pub fn model(&self) -> &dyn CouplingModel {
        self.model.as_ref()
    }

    /// Whether the model owns `hook`.
    pub fn owns(&self, hook: Hook) -> bool {
        self.model.hooks().owns(hook)
    }

    /// The model together with the per-slot force field it writes.
    pub fn split_mut(&mut self) -> (&dyn CouplingModel, &mut RealField) {
        (self.model.as_ref(), &mut self.fd)
    }
}

fn blending_coefficient(kind: FpiModelKind, params: &[Real]) -> KernelResult<Real> {
    let gamma = params.first().copied().ok_or_else(|| {
        KernelError::Invalid(format!("coupling model {kind:?} needs a blending coefficient"))
    })?;
    if !(0.0..=1.0).contains(&gamma) {
        return Err(KernelError::Invalid(format!(
            "blending coefficient {gamma} of {kind:?} outside [0, 1]"
        )));
    }
    Ok(gamma)
}

// ---------------------------------------------------------------------------
// Shared numerics
// ---------------------------------------------------------------------------

/// Solid weighting of a slot.
///
/// Blends the solid fraction itself (`gamma = 0`) with the Noble-Torczynski
/// weight `eps (tau* - 1/2) / ((1 - eps) + (tau* - 1/2))` (`gamma = 1`),
/// where `tau*` is the dimensionless relaxation time.
#[inline]
pub fn solid_weight(eps: Real, tau_star: Real, gamma: Real) -> Real {
    let eps = eps.clamp(0.0, 1.0);
    let excess = tau_star - 0.5;
    let nt = eps * excess / ((1.0 - eps) + excess);
    ((1.0 - gamma) * eps + gamma * nt).clamp(0.0, 1.0)
}

/// Slot weights of one node, scaled so their sum is at most one.
///
/// Returns the total weight; empty slots get weight zero.
pub(crate) fn node_weights(view: &MappingView<'_>, idx: usize, tau_star: Real, gamma: Real, out: &mut [Real]) -> Real {
    let mut total = 0.0;
    for (e, b) in out.iter_mut().enumerate().take(view.n_elem) {
        *b = if view.particle(idx, e) == EMPTY_SLOT {
            0.0
        } else {
            solid_weight(view.fraction(idx, e), tau_star, gamma)
        };
        total += *b;
    }
    if total > 1.0 {
        out.iter_mut().for_each(|b| *b /= total);
        total = 1.0;
    }
    total
}

/// Add the global force, weighted by the fluid share of each node, to the
/// forcing source.
pub(crate) fn inject_global_force(env: &mut CouplingEnv<'_>, gamma: Real) -> KernelResult<()> {
    let Some(a) = env.forces.acceleration() else {
        return Ok(());
    };
    let lat = env.component.lattice;
    let q = lat.q();
    let nm = env.component.macro_var_count();
    let n_elem = env.mapping.n_elem;
    for block in env.blocks {
        let range = block.whole_range();
        env.exec.launch(LoopRecord {
            kernel: "fsi_force",
            block: block.id,
            range,
            args: vec![
                LoopArg::dat("macro_vars", nm, Access::Read),
                LoopArg::dat("tau", 1, Access::Read),
                LoopArg::dat("sfp", n_elem, Access::Read),
                LoopArg::dat("id", n_elem, Access::Read),
                LoopArg::dat("body_force", q, Access::Increment),
                LoopArg::gbl("force", 3, Access::Read),
            ],
        });
        let view = env.mapping.block_view(block.id)?;
        let macro_vars = env.fields.macro_vars.block(block.id)?;
        let tau = env.fields.tau.block(block.id)?;
        let body_force = env.fields.body_force.block_mut(block.id)?;
        let dt = env.dt;
        env.exec.map_cells(block, &range, body_force, q, |idx, _, out| {
            let mut weights = [0.0; MAX_SLOTS];
            let tau_star = (tau[idx] + 0.5 * dt) / dt;
            let solid = node_weights(&view, idx, tau_star, gamma, &mut weights[..n_elem]);
            let rho = macro_vars[idx * nm];
            for (i, v) in out.iter_mut().enumerate() {
                *v += (1.0 - solid) * lat.force_source_i(i, rho, a);
            }
        });
    }
    Ok(())
}

/// Integrate the per-slot force field over each particle's stencil and add
/// the result, scaled by the cell volume, to the particle drag.
pub(crate) fn integrate_drag(env: &mut CouplingEnv<'_>) -> KernelResult<()> {
    let dim = env.component.dim();
    let n_elem = env.mapping.n_elem;
    for bp in env.particles.iter_mut().filter(|bp| bp.owned) {
        let block = env
            .blocks
            .iter()
            .find(|b| b.id == bp.block_id())
            .ok_or(KernelError::UnknownBlock(bp.block_id()))?;
        let view = env.mapping.block_view(block.id)?;
        let fd = env.fd.block(block.id)?;
        let volume = block.mesh_size.powi(dim as i32);
        for slot in 0..bp.total() {
            let (arrays, i) = bp.slot_mut(slot);
            let stencil = arrays.stencil[i];
            env.exec.launch(LoopRecord {
                kernel: "drag_force",
                block: block.id,
                range: stencil,
                args: vec![
                    LoopArg::dat("Fd", dim * n_elem, Access::Read),
                    LoopArg::dat("xf", dim * n_elem, Access::Read),
                    LoopArg::dat("id", n_elem, Access::Read),
                    LoopArg::gbl("drag", 6, Access::Increment),
                ],
            });
            let tag = slot as i32;
            let mut force = [0.0; 3];
            let mut torque = [0.0; 3];
            env.exec.for_each_cell(block, &stencil, |idx, _| {
                for e in 0..n_elem {
                    if view.particle(idx, e) != tag {
                        continue;
                    }
                    let at = (idx * n_elem + e) * dim;
                    let mut fl = [0.0; 3];
                    fl[..dim].copy_from_slice(&fd[at..at + dim]);
                    let r = view.offset(idx, e);
                    for a in 0..3 {
                        force[a] += fl[a];
                    }
                    torque[0] += r[1] * fl[2] - r[2] * fl[1];
                    torque[1] += r[2] * fl[0] - r[0] * fl[2];
                    torque[2] += r[0] * fl[1] - r[1] * fl[0];
                }
            });
            for a in 0..3 {
                arrays.drag_force[i][a] += force[a] * volume;
                arrays.drag_torque[i][a] += torque[a] * volume;
            }
        }
    }
    Ok(())
}

/// Zero the per-slot force field.
pub(crate) fn zero_fd(env: &mut CouplingEnv<'_>) -> KernelResult<()> {
    for block in env.blocks {
        env.exec.launch(LoopRecord {
            kernel: "fsi_init",
            block: block.id,
            range: block.whole_range(),
            args: vec![LoopArg::dat("Fd", env.fd.elements(), Access::Write)],
        });
        env.fd.block_mut(block.id)?.fill(0.0);
    }
    Ok(())
}
