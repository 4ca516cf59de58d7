//! Time evolution of every component on every block.
//!
//! One call to [`stream_collision`] advances the fluid by one time step:
//!
//! 1. moments from the distribution, then the coupling velocity correction
//! 2. snapshot of the distribution into the staging field
//! 3. equilibrium and forcing source, then the coupling force injection
//! 4. relaxation time
//! 5. collision (the coupling model's collision when it owns one)
//! 6. streaming
//! 7. embedded and domain boundaries
//!
//! Every stage finishes on all blocks and components before the next one
//! starts.

use crate::block::{Block, IterRange};
use crate::boundary::{apply_boundary, treat_embedded_boundary};
use crate::collision::{self, CollisionInputs};
use crate::component::Component;
use crate::context::SimulationContext;
use crate::engine::{Access, Executor, LoopArg, LoopRecord};
use crate::error::{KernelError, KernelResult};
use crate::fpi::{run_hook, CouplingEnv, Hook};
use crate::mapping::{initialize_mapping, project_particles};
use crate::registry::{ComponentFields, NodeType};
use crate::Real;

// ---------------------------------------------------------------------------
// Iteration helpers
// ---------------------------------------------------------------------------

fn for_each_component_block<F>(ctx: &mut SimulationContext, mut kernel: F) -> KernelResult<()>
where
    F: FnMut(&Executor, &Block, &Component, &mut ComponentFields) -> KernelResult<()>,
{
    let SimulationContext {
        blocks,
        components,
        registry,
        executor,
        ..
    } = ctx;
    for (&id, component) in components.iter() {
        let fields = registry.component_mut(id)?;
        for block in blocks.iter() {
            kernel(&*executor, block, component, &mut *fields)?;
        }
    }
    Ok(())
}

/// Run `hook` of the coupling model of `component`.
///
/// Returns whether the hook ran. A hook the model does not own is reported
/// and skipped; a component without a coupling model has nothing to run.
pub fn fpi_hook(ctx: &mut SimulationContext, component: usize, hook: Hook) -> KernelResult<bool> {
    let SimulationContext {
        blocks,
        components,
        registry,
        mapping,
        fpi,
        forces,
        particles,
        executor,
        time_step,
        ..
    } = ctx;
    let comp = components.get(&component).ok_or(KernelError::UnknownComponent(component))?;
    let Some(data) = fpi.get_mut(&component) else {
        tracing::debug!(component, ?hook, "component has no coupling model");
        return Ok(false);
    };
    if !data.owns(hook) {
        tracing::warn!(
            component,
            ?hook,
            model = ?data.kind(),
            "coupling hook requested but not implemented for this model"
        );
        return Ok(false);
    }
    let (model, fd) = data.split_mut();
    let mut env = CouplingEnv {
        exec: &*executor,
        blocks: blocks.as_slice(),
        component: comp,
        fields: registry.component_mut(component)?,
        mapping: mapping.get(component)?,
        fd,
        particles: particles.as_mut_slice(),
        forces: &*forces,
        dt: *time_step,
    };
    run_hook(model, hook, &mut env)
}

fn owning_components(ctx: &SimulationContext, hook: Hook) -> Vec<usize> {
    ctx.fpi
        .iter()
        .filter(|(_, data)| data.owns(hook))
        .map(|(&id, _)| id)
        .collect()
}

fn run_owned_hooks(ctx: &mut SimulationContext, hook: Hook) -> KernelResult<Vec<usize>> {
    let owners = owning_components(ctx, hook);
    for &id in &owners {
        fpi_hook(ctx, id, hook)?;
    }
    Ok(owners)
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Recompute the macroscopic variables of every component.
pub fn update_macro_vars(ctx: &mut SimulationContext) -> KernelResult<()> {
    for_each_component_block(ctx, |exec, block, component, fields| {
        collision::update_macro_vars(
            exec,
            block,
            component,
            fields.f.block(block.id)?,
            fields.node_type.block(block.id)?,
            fields.macro_vars.block_mut(block.id)?,
        );
        Ok(())
    })
}

/// Copy each distribution into its staging field.
pub fn copy_distribution(ctx: &mut SimulationContext) -> KernelResult<()> {
    for_each_component_block(ctx, |exec, block, component, fields| {
        collision::copy_distribution(
            exec,
            block,
            component.lattice.q(),
            fields.f.block(block.id)?,
            fields.f_stage.block_mut(block.id)?,
        );
        Ok(())
    })
}

/// Recompute equilibria and forcing sources.
pub fn update_feq_and_body_force(ctx: &mut SimulationContext) -> KernelResult<()> {
    for_each_component_block(ctx, |exec, block, component, fields| {
        collision::update_feq_and_body_force(
            exec,
            block,
            component,
            fields.macro_vars.block(block.id)?,
            fields.node_type.block(block.id)?,
            fields.feq.block_mut(block.id)?,
            fields.body_force.block_mut(block.id)?,
        );
        Ok(())
    })
}

/// Update relaxation times.
pub fn update_tau(ctx: &mut SimulationContext) -> KernelResult<()> {
    for_each_component_block(ctx, |exec, block, component, fields| {
        collision::update_tau(
            exec,
            block,
            component,
            fields.macro_vars.block(block.id)?,
            fields.node_type.block(block.id)?,
            fields.tau.block_mut(block.id)?,
        );
        Ok(())
    })
}

/// Standard collision of every component except those listed in `skip`.
pub fn collision(ctx: &mut SimulationContext, skip: &[usize]) -> KernelResult<()> {
    let dt = ctx.time_step;
    for_each_component_block(ctx, |exec, block, component, fields| {
        if skip.contains(&component.id) {
            return Ok(());
        }
        let inputs = CollisionInputs {
            f: fields.f.block(block.id)?,
            feq: fields.feq.block(block.id)?,
            body_force: fields.body_force.block(block.id)?,
            tau: fields.tau.block(block.id)?,
            node_type: fields.node_type.block(block.id)?,
        };
        collision::collide(exec, block, component, dt, &inputs, fields.f_stage.block_mut(block.id)?);
        Ok(())
    })
}

/// Stream the staging distributions into the distributions.
pub fn stream(ctx: &mut SimulationContext) -> KernelResult<()> {
    for_each_component_block(ctx, |exec, block, component, fields| {
        collision::stream(
            exec,
            block,
            component,
            fields.f_stage.block(block.id)?,
            fields.node_type.block(block.id)?,
            fields.f.block_mut(block.id)?,
        );
        Ok(())
    })
}

/// Apply embedded-object bounce-back, then every boundary definition in
/// registration order.
pub fn implement_boundary_conditions(ctx: &mut SimulationContext) -> KernelResult<()> {
    for_each_component_block(ctx, |exec, block, component, fields| {
        treat_embedded_boundary(exec, block, component, fields)
    })?;
    let SimulationContext {
        blocks,
        components,
        registry,
        boundaries,
        executor,
        ..
    } = ctx;
    for def in boundaries.iter() {
        let block = blocks
            .iter()
            .find(|b| b.id == def.block)
            .ok_or(KernelError::UnknownBlock(def.block))?;
        let component = components
            .get(&def.component)
            .ok_or(KernelError::UnknownComponent(def.component))?;
        apply_boundary(executor, block, component, def, registry.component_mut(def.component)?)?;
    }
    Ok(())
}

/// Advance every component by one time step.
pub fn stream_collision(ctx: &mut SimulationContext) -> KernelResult<()> {
    update_macro_vars(ctx)?;
    run_owned_hooks(ctx, Hook::PostVelocity)?;
    copy_distribution(ctx)?;
    update_feq_and_body_force(ctx)?;
    run_owned_hooks(ctx, Hook::Force)?;
    update_tau(ctx)?;
    run_owned_hooks(ctx, Hook::PreCollision)?;
    let replaced = run_owned_hooks(ctx, Hook::Collision)?;
    collision(ctx, &replaced)?;
    stream(ctx)?;
    run_owned_hooks(ctx, Hook::PostStreaming)?;
    implement_boundary_conditions(ctx)
}

// ---------------------------------------------------------------------------
// Coupling entry points
// ---------------------------------------------------------------------------

/// One-time initialisation of coupling models and mapping fields.
pub fn initialise_coupling(ctx: &mut SimulationContext) -> KernelResult<()> {
    let SimulationContext {
        blocks,
        mapping,
        executor,
        ..
    } = ctx;
    for set in mapping.owned_mut() {
        initialize_mapping(executor, blocks, set)?;
    }
    run_owned_hooks(ctx, Hook::Initialize)?;
    Ok(())
}

/// Empty every mapping slot and project the current particles.
pub fn map_particles(ctx: &mut SimulationContext) -> KernelResult<()> {
    let SimulationContext {
        blocks,
        mapping,
        particles,
        executor,
        ..
    } = ctx;
    for set in mapping.owned_mut() {
        initialize_mapping(executor, blocks, set)?;
        project_particles(executor, blocks, set, particles)?;
    }
    Ok(())
}

/// Zero the drag of every particle.
pub fn reset_drag(ctx: &mut SimulationContext) {
    ctx.particles.iter_mut().for_each(|bp| bp.reset_drag());
}

/// Add this step's fluid force onto every particle.
///
/// Drag accumulates across calls until [`reset_drag`].
pub fn calculate_drag(ctx: &mut SimulationContext) -> KernelResult<()> {
    run_owned_hooks(ctx, Hook::Drag)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Initial state and diagnostics
// ---------------------------------------------------------------------------

/// Set a uniform density and velocity on every node of `component`.
pub fn set_initial_macro_vars(
    ctx: &mut SimulationContext,
    component: usize,
    rho: Real,
    velocity: [Real; 3],
) -> KernelResult<()> {
    let comp = ctx.component(component)?;
    let nm = comp.macro_var_count();
    let dim = comp.dim();
    let SimulationContext {
        blocks,
        registry,
        executor,
        ..
    } = ctx;
    let fields = registry.component_mut(component)?;
    for block in blocks.iter() {
        let range = block.whole_range();
        executor.launch(LoopRecord {
            kernel: "set_initial_macro_vars",
            block: block.id,
            range,
            args: vec![
                LoopArg::dat("macro_vars", nm, Access::Write),
                LoopArg::gbl("initial", 1 + dim, Access::Read),
            ],
        });
        executor.map_cells(block, &range, fields.macro_vars.block_mut(block.id)?, nm, |_, _, m| {
            m[0] = rho;
            m[1..=dim].copy_from_slice(&velocity[..dim]);
        });
    }
    Ok(())
}

/// Start every component from equilibrium at its macroscopic state.
///
/// Equilibria are built from the macroscopic variables, copied into the
/// distributions and their staging fields, and forcing sources are zeroed.
pub fn initialise_solution(ctx: &mut SimulationContext) -> KernelResult<()> {
    for_each_component_block(ctx, |exec, block, component, fields| {
        let lat = component.lattice;
        let q = lat.q();
        let nm = component.macro_var_count();
        let dim = component.dim();
        let range = block.whole_range();
        exec.launch(LoopRecord {
            kernel: "init_distribution",
            block: block.id,
            range,
            args: vec![
                LoopArg::dat("macro_vars", nm, Access::Read),
                LoopArg::dat("feq", q, Access::Write),
                LoopArg::dat("body_force", q, Access::Write),
            ],
        });
        let macro_vars = fields.macro_vars.block(block.id)?;
        exec.map_cells(block, &range, fields.feq.block_mut(block.id)?, q, |idx, _, out| {
            let (rho, u) = collision::node_macro(macro_vars, nm, dim, idx);
            lat.equilibrium(rho, u, out);
        });
        fields.body_force.block_mut(block.id)?.fill(0.0);
        collision::copy_distribution(exec, block, q, fields.feq.block(block.id)?, fields.f.block_mut(block.id)?);
        collision::copy_distribution(exec, block, q, fields.feq.block(block.id)?, fields.f_stage.block_mut(block.id)?);
        Ok(())
    })?;
    for fields in ctx.registry.components.values_mut() {
        fields.macro_vars_copy.copy_from(&fields.macro_vars)?;
    }
    tracing::info!(case = %ctx.case_name, "solution initialised from macroscopic state");
    Ok(())
}

/// Mark `range` of `block` as `node_type` for `component`.
pub fn set_node_type(
    ctx: &mut SimulationContext,
    component: usize,
    block: usize,
    range: IterRange,
    node_type: NodeType,
) -> KernelResult<()> {
    let b = ctx.block(block)?;
    if range.intersect(&b.whole_range()) != Some(range) {
        return Err(KernelError::Invalid(format!("node range outside block '{}'", b.name)));
    }
    let index = range.iter().map(|ijk| b.index(ijk)).collect::<Vec<_>>();
    let values = ctx.registry.component_mut(component)?.node_type.block_mut(block)?;
    for idx in index {
        values[idx] = node_type as i32;
    }
    Ok(())
}

/// Total mass of `component`: the sum of every population over fluid nodes.
pub fn calc_total_mass(ctx: &SimulationContext, component: usize) -> KernelResult<Real> {
    let comp = ctx.component(component)?;
    let q = comp.lattice.q();
    let fields = ctx.registry.component(component)?;
    let mut total = 0.0;
    for block in &ctx.blocks {
        let range = block.whole_range();
        ctx.executor.launch(LoopRecord {
            kernel: "calc_total_mass",
            block: block.id,
            range,
            args: vec![
                LoopArg::dat("f", q, Access::Read),
                LoopArg::dat("node_type", 1, Access::Read),
                LoopArg::gbl("mass", 1, Access::Increment),
            ],
        });
        let f = fields.f.block(block.id)?;
        let node_type = fields.node_type.block(block.id)?;
        total += ctx.executor.sum_cells(block, &range, |idx, _| {
            if NodeType::from_i32(node_type[idx]) == NodeType::Solid {
                0.0
            } else {
                f[idx * q..(idx + 1) * q].iter().sum()
            }
        });
    }
    Ok(total)
}

/// Scale every population of `component` by `ratio`.
pub fn normalise_f(ctx: &mut SimulationContext, component: usize, ratio: Real) -> KernelResult<()> {
    let q = ctx.component(component)?.lattice.q();
    let SimulationContext {
        blocks,
        registry,
        executor,
        ..
    } = ctx;
    let fields = registry.component_mut(component)?;
    for block in blocks.iter() {
        let range = block.whole_range();
        executor.launch(LoopRecord {
            kernel: "normalise_f",
            block: block.id,
            range,
            args: vec![
                LoopArg::dat("f", q, Access::ReadWrite),
                LoopArg::gbl("ratio", 1, Access::Read),
            ],
        });
        executor.map_cells(block, &range, fields.f.block_mut(block.id)?, q, |_, _, f| {
            f.iter_mut().for_each(|v| *v *= ratio);
        });
    }
    Ok(())
}

/// Residual of one macroscopic variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Residual {
    /// Component id.
    pub component: usize,
    /// Variable name.
    pub variable: String,
    /// Relative change per unit time since the previous evaluation.
    pub value: Real,
}

/// Residuals of every macroscopic variable of every component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidualReport {
    /// One entry per variable, components in id order.
    pub residuals: Vec<Residual>,
}

impl ResidualReport {
    /// Largest residual, zero when empty.
    pub fn max(&self) -> Real {
        self.residuals.iter().map(|r| r.value).fold(0.0, Real::max)
    }

    /// Whether every residual is below `criterion`.
    pub fn converged(&self, criterion: Real) -> bool {
        self.residuals.iter().all(|r| r.value < criterion)
    }
}

/// Compare macroscopic variables with the previous snapshot and refresh it.
///
/// Each residual is `sum (m - m_prev)^2 / sum m^2 / (check_period dt)`.
pub fn calc_residual_error(ctx: &mut SimulationContext, check_period: usize) -> KernelResult<ResidualReport> {
    let interval = check_period.max(1) as Real * ctx.time_step;
    let mut report = ResidualReport::default();
    let SimulationContext {
        blocks,
        components,
        registry,
        executor,
        ..
    } = ctx;
    for (&id, component) in components.iter() {
        let nm = component.macro_var_count();
        let fields = registry.component_mut(id)?;
        for (slot, var) in component.macro_vars.iter().enumerate() {
            let mut diff = 0.0;
            let mut sum = 0.0;
            for block in blocks.iter() {
                let range = block.whole_range();
                executor.launch(LoopRecord {
                    kernel: "calc_residual_error",
                    block: block.id,
                    range,
                    args: vec![
                        LoopArg::dat("macro_vars", nm, Access::Read),
                        LoopArg::dat("macro_vars_copy", nm, Access::Read),
                        LoopArg::gbl("residual", 2, Access::Increment),
                    ],
                });
                let now = fields.macro_vars.block(block.id)?;
                let before = fields.macro_vars_copy.block(block.id)?;
                diff += executor.sum_cells(block, &range, |idx, _| {
                    let d = now[idx * nm + slot] - before[idx * nm + slot];
                    d * d
                });
                sum += executor.sum_cells(block, &range, |idx, _| {
                    let m = now[idx * nm + slot];
                    m * m
                });
            }
            let value = if sum > 0.0 { diff / sum / interval } else { diff / interval };
            report.residuals.push(Residual {
                component: id,
                variable: var.name.clone(),
                value,
            });
        }
        fields.macro_vars_copy.copy_from(&fields.macro_vars)?;
    }
    tracing::debug!(max = report.max(), "residual evaluated");
    Ok(report)
}
