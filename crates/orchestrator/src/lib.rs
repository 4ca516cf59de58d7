//! Orchestration Layer
//!
//! This crate turns a case file into a running coupled simulation:
//! - [`config`] -- JSON case files and their validation
//! - [`domain`] -- Simulation context construction, fresh or restarted
//! - [`transport`] -- Point-based exchange primitives and an in-process transport
//! - [`sync`] -- Ordered particle exchange with the particle process
//! - [`coupling`] -- Coupling intervals: fetch, map, step, drag, send
//! - [`force`] -- Drag totals
//! - [`runner`] -- Background runner with lifecycle management

#![warn(missing_docs)]

pub mod config;
pub mod coupling;
pub mod domain;
pub mod error;
pub mod force;
pub mod runner;
pub mod sync;
pub mod transport;

pub use config::CaseConfig;
pub use coupling::{CoupledSimulation, ParticleSource};
pub use error::{OrchestratorError, OrchestratorResult};
pub use runner::{RunPlan, RunnerState, SimulationRunner};
pub use sync::ParticleSynchronizer;
pub use transport::{InMemoryTransport, ParticleTransport};

use std::path::Path;

/// Build the coupled simulation described by `config`.
///
/// Cases with a `sync` section need `transport`; other coupled cases insert
/// their configured particles locally every interval.
pub fn prepare_case(
    config: &CaseConfig,
    restart_step: u64,
    transport: Option<Box<dyn ParticleTransport>>,
) -> OrchestratorResult<CoupledSimulation> {
    let ctx = domain::build_context(config, restart_step)?;
    let (source, interval) = match &config.coupling {
        None => (ParticleSource::None, 1),
        Some(coupling) => {
            let source = match (&coupling.sync, transport) {
                (Some(keys), Some(transport)) => ParticleSource::External(ParticleSynchronizer::new(transport, keys.clone())),
                (Some(_), None) => {
                    return Err(OrchestratorError::Config(
                        "case exchanges particles with an external process but no transport is attached".to_string(),
                    ))
                }
                (None, _) => ParticleSource::Local(coupling.particles.clone()),
            };
            (source, coupling.coupling_interval)
        }
    };
    let max_steps = match config.run {
        config::RunMode::Transient { steps } => steps,
        config::RunMode::Steady { max_steps, .. } => max_steps,
    };
    CoupledSimulation::new(ctx, source, interval, restart_step, max_steps)
}

/// Create a complete simulation from a case file
///
/// This function performs the full setup pipeline:
/// 1. Load and validate the configuration
/// 2. Build the simulation context, from scratch or from the checkpoint of
///    `restart_step`
/// 3. Define particles, mapping and coupling models
/// 4. Wrap in a SimulationRunner for lifecycle management
///
/// # Example
/// ```no_run
/// use orchestrator::create_simulation;
///
/// let runner = create_simulation("cases/cavity.json", 0)?;
/// runner.start();
/// let sim = runner.join()?;
/// # Ok::<(), orchestrator::OrchestratorError>(())
/// ```
pub fn create_simulation(config_path: impl AsRef<Path>, restart_step: u64) -> OrchestratorResult<SimulationRunner> {
    let config_path = config_path.as_ref();
    tracing::info!(path = %config_path.display(), restart_step, "creating simulation");

    let config = CaseConfig::load(config_path)?;
    tracing::info!(
        name = %config.name,
        blocks = config.blocks.len(),
        components = config.components.len(),
        coupled = config.coupling.is_some(),
        "configuration loaded"
    );

    let sim = prepare_case(&config, restart_step, None)?;
    let runner = SimulationRunner::new(
        sim,
        RunPlan {
            mode: config.run.clone(),
            checkpoint_period: config.checkpoint.period,
        },
    );
    tracing::info!("simulation ready to start");
    Ok(runner)
}
