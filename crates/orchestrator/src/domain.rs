//! Domain setup: blocks, components, boundaries and coupling definitions
//!
//! Turns a validated [`CaseConfig`] into a ready-to-step
//! [`SimulationContext`]. On a fresh start the fluid is set to the configured
//! macroscopic state and initialised at equilibrium; on a restart every
//! field is read back from the checkpoint of the requested step instead.

use kernel::evolution::{initialise_coupling, initialise_solution, set_initial_macro_vars, set_node_type};
use kernel::{
    Block, BoundaryDefinition, Component, Executor, InteractionModel, IterRange, MacroVariable, MappingDefinition,
    NodeType, PeriodicDomain, Real, SimulationContext, StartMode,
};

use crate::config::{CaseConfig, CouplingConfig};
use crate::error::OrchestratorResult;

/// Build the simulation context of `config`.
///
/// `restart_step` 0 starts from scratch; any other value restores the
/// checkpoint written at that step under [`CaseConfig::case_prefix`].
pub fn build_context(config: &CaseConfig, restart_step: u64) -> OrchestratorResult<SimulationContext> {
    let case = config.case_prefix();
    let start = if restart_step == 0 {
        StartMode::Scratch
    } else {
        StartMode::Restart {
            case_name: case.clone(),
            time_step: restart_step,
        }
    };

    let blocks = config
        .blocks
        .iter()
        .map(|b| Block::new(b.id, &b.name, config.space_dim, b.size, config.mesh_size, b.origin))
        .collect::<Result<Vec<_>, _>>()?;

    let mut next_var = 0;
    let mut components = Vec::with_capacity(config.components.len());
    for c in &config.components {
        let vars = MacroVariable::isothermal_set(next_var, config.space_dim);
        next_var += vars.len();
        components.push(Component::new(
            c.id,
            &c.name,
            c.lattice,
            c.tau_ref,
            vars,
            c.collision,
            c.body_force,
            c.relaxation,
        )?);
    }

    let executor = if config.parallel {
        Executor::parallel()
    } else {
        Executor::serial()
    };
    let mut ctx = SimulationContext::new(case, blocks, components, config.time_step(), start, executor)?;

    for bc in &config.boundaries {
        let block = ctx.block(bc.block)?;
        let def = BoundaryDefinition::on_surface(block, bc.component, bc.surface, bc.scheme, bc.given)?;
        ctx.define_boundary(def)?;
    }

    if let Some(coupling) = &config.coupling {
        define_coupling(&mut ctx, coupling)?;
    }

    if restart_step == 0 {
        for c in &config.components {
            set_initial_macro_vars(&mut ctx, c.id, c.initial_rho, c.initial_velocity)?;
        }
        for s in &config.solid_regions {
            set_node_type(&mut ctx, s.component, s.block, IterRange::new(s.start, s.end), NodeType::Solid)?;
        }
        initialise_solution(&mut ctx)?;
        if config.coupling.is_some() {
            initialise_coupling(&mut ctx)?;
        }
    } else {
        for fields in ctx.registry.components.values_mut() {
            fields.macro_vars_copy.copy_from(&fields.macro_vars)?;
        }
        tracing::info!(case = %ctx.case_name, restart_step, "fields restored from checkpoint");
    }

    ctx.validate()?;
    Ok(ctx)
}

fn define_coupling(ctx: &mut SimulationContext, coupling: &CouplingConfig) -> OrchestratorResult<()> {
    let owned = coupling
        .owned_blocks
        .clone()
        .unwrap_or_else(|| ctx.blocks.iter().map(|b| b.id).collect());
    let periodic = coupling
        .periodic
        .iter()
        .any(|&p| p)
        .then(|| periodic_domain(&ctx.blocks, coupling.periodic));
    ctx.define_block_particles(coupling.slots_per_node, coupling.skin, coupling.particle_shape, &owned, periodic)?;

    let mappings = coupling
        .mappings
        .iter()
        .map(|m| MappingDefinition {
            component: m.component,
            model: m.model,
            copy_from: m.copy_from,
        })
        .collect::<Vec<_>>();
    ctx.define_particle_mapping(&mappings)?;

    let models = coupling
        .models
        .iter()
        .map(|m| InteractionModel {
            component: m.component,
            kind: m.kind,
            params: m.params.clone(),
        })
        .collect::<Vec<_>>();
    ctx.define_interaction_models(&models)?;
    ctx.define_force_model(coupling.force.params.clone(), coupling.force.kind);

    tracing::info!(
        slots = coupling.slots_per_node,
        owned_blocks = owned.len(),
        models = models.len(),
        interval = coupling.coupling_interval,
        "coupling defined"
    );
    Ok(())
}

/// Extent of the wrapping particle domain: the union of every block's cells.
pub fn periodic_domain(blocks: &[Block], periodic: [bool; 3]) -> PeriodicDomain {
    let (min, max) = union_bounds(blocks.iter());
    PeriodicDomain { periodic, min, max }
}

/// Bounding box of every block this process owns particles for.
///
/// `None` when no block is owned.
pub fn owned_bounds(ctx: &SimulationContext) -> Option<([Real; 3], [Real; 3])> {
    let owned = ctx
        .particles
        .iter()
        .filter(|p| p.owned)
        .filter_map(|p| ctx.block(p.block_id()).ok())
        .collect::<Vec<_>>();
    (!owned.is_empty()).then(|| union_bounds(owned.into_iter()))
}

fn union_bounds<'a>(blocks: impl Iterator<Item = &'a Block>) -> ([Real; 3], [Real; 3]) {
    let mut min = [Real::INFINITY; 3];
    let mut max = [Real::NEG_INFINITY; 3];
    for b in blocks {
        let (lo, hi) = b.bounds();
        for a in 0..3 {
            min[a] = min[a].min(lo[a]);
            max[a] = max[a].max(hi[a]);
        }
    }
    (min, max)
}
