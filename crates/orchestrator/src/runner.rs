//! Simulation runner with lifecycle management
//!
//! This module provides the `SimulationRunner` which drives a
//! [`CoupledSimulation`] in a background thread, including start, pause,
//! resume, stop, and status tracking. Checkpoints and residual checks are
//! taken whenever the step counter crosses a multiple of their period.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use kernel::Real;

use crate::config::RunMode;
use crate::coupling::CoupledSimulation;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::force::ParticleDrag;

/// Runner state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Simulation actively running
    Running,
    /// Simulation paused
    Paused,
    /// Simulation finished (reached stopping condition or stopped)
    Finished,
    /// Simulation encountered an error
    Error,
}

/// When to stop and what to write on the way
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Stopping condition; step counts are absolute case steps
    pub mode: RunMode,
    /// Steps between checkpoints
    pub checkpoint_period: Option<u64>,
}

/// Shared state between the runner thread and control interface
struct SharedState {
    /// Current runner state
    state: RunnerState,
    /// Fluid steps taken since the start of the case
    step: u64,
    /// Largest residual at the last check
    residual: Option<Real>,
    /// Drag over the last coupling interval
    drag: Option<ParticleDrag>,
    /// Most recent error message (if state is Error)
    error_message: Option<String>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    /// Shared state (protected by mutex)
    shared: Arc<Mutex<SharedState>>,
    /// Handle to the background thread
    thread_handle: Option<thread::JoinHandle<OrchestratorResult<CoupledSimulation>>>,
    /// Fluid time step
    time_step: Real,
}

impl SimulationRunner {
    /// Create a runner for `sim`; nothing happens until [`Self::start`]
    pub fn new(sim: CoupledSimulation, plan: RunPlan) -> Self {
        let time_step = sim.context().time_step;
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            step: sim.step(),
            residual: None,
            drag: None,
            error_message: None,
        }));

        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::spawn(move || {
            let mut sim = sim;
            match run_simulation_loop(&mut sim, &plan, &shared_clone) {
                Ok(()) => Ok(sim),
                Err(e) => {
                    tracing::error!(error = %e, "simulation failed");
                    let mut guard = lock(&shared_clone);
                    guard.state = RunnerState::Error;
                    guard.error_message = Some(e.to_string());
                    Err(e)
                }
            }
        });

        Self {
            shared,
            thread_handle: Some(thread_handle),
            time_step,
        }
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state
    }

    /// Fluid steps taken since the start of the case
    pub fn timestep_count(&self) -> u64 {
        lock(&self.shared).step
    }

    /// Simulated time
    pub fn sim_time(&self) -> Real {
        self.timestep_count() as Real * self.time_step
    }

    /// Largest residual at the last check, steady runs only
    pub fn last_residual(&self) -> Option<Real> {
        lock(&self.shared).residual
    }

    /// Drag over the last coupling interval
    pub fn last_drag(&self) -> Option<ParticleDrag> {
        lock(&self.shared).drag
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Created {
            guard.state = RunnerState::Running;
        }
    }

    /// Pause the simulation
    pub fn pause(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Running {
            guard.state = RunnerState::Paused;
        }
    }

    /// Resume the simulation
    pub fn resume(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Paused {
            guard.state = RunnerState::Running;
        }
    }

    /// Ask the thread to finish after the interval in progress
    pub fn stop(&self) {
        let mut guard = lock(&self.shared);
        if matches!(guard.state, RunnerState::Created | RunnerState::Running | RunnerState::Paused) {
            guard.state = RunnerState::Finished;
        }
    }

    /// Wait for the simulation thread and take back the simulation
    pub fn join(mut self) -> OrchestratorResult<CoupledSimulation> {
        match self.thread_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| OrchestratorError::Runner("thread panicked".to_string()))?,
            None => Err(OrchestratorError::Runner("already joined".to_string())),
        }
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        // Signal the thread to exit
        self.stop();
    }
}

fn crossed(before: u64, after: u64, period: u64) -> bool {
    period > 0 && after / period > before / period
}

/// Main simulation loop executed in background thread
fn run_simulation_loop(sim: &mut CoupledSimulation, plan: &RunPlan, shared: &Mutex<SharedState>) -> OrchestratorResult<()> {
    // Wait for start signal
    loop {
        let state = lock(shared).state;
        match state {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running => break,
            _ => return Ok(()),
        }
    }

    let end = match plan.mode {
        RunMode::Transient { steps } => steps,
        RunMode::Steady { max_steps, .. } => max_steps,
    };
    let first_step = sim.step();
    let start_wall_time = Instant::now();
    tracing::info!(first_step, end, coupled = sim.is_coupled(), "simulation thread started");

    loop {
        let current_state = lock(shared).state;
        match current_state {
            RunnerState::Running => {
                if sim.step() >= end {
                    if let RunMode::Steady { criterion, .. } = plan.mode {
                        tracing::warn!(criterion, end, "steady run stopped at max_steps without converging");
                    }
                    lock(shared).state = RunnerState::Finished;
                    break;
                }

                let before = sim.step();
                let (_, drag) = sim.advance_interval(end - before)?;
                let after = sim.step();

                {
                    let mut guard = lock(shared);
                    guard.step = after;
                    if sim.is_coupled() {
                        guard.drag = Some(drag);
                    }
                }

                if let Some(period) = plan.checkpoint_period {
                    if crossed(before, after, period) {
                        sim.write_checkpoint()?;
                    }
                }

                if let RunMode::Steady {
                    criterion, check_period, ..
                } = plan.mode
                {
                    if crossed(before, after, check_period) {
                        let report = sim.residual(check_period)?;
                        let max = report.max();
                        lock(shared).residual = Some(max);
                        tracing::info!(step = after, residual = max, "residual checked");
                        if report.converged(criterion) {
                            tracing::info!(step = after, criterion, "converged");
                            lock(shared).state = RunnerState::Finished;
                            break;
                        }
                    }
                }

                if crossed(before, after, 100) {
                    tracing::debug!(
                        step = after,
                        wall_time = start_wall_time.elapsed().as_secs_f64(),
                        "progress"
                    );
                }
            }
            RunnerState::Paused => {
                // Wait while paused
                thread::sleep(Duration::from_millis(20));
            }
            RunnerState::Finished | RunnerState::Error | RunnerState::Created => break,
        }
    }

    tracing::info!(
        steps = sim.step() - first_step,
        wall_time = start_wall_time.elapsed().as_secs_f64(),
        "simulation thread exiting"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlockConfig, BoundaryConfig, CaseConfig, CheckpointConfig, ComponentConfig};
    use crate::coupling::ParticleSource;
    use crate::domain::build_context;
    use kernel::field::checkpoint_path;
    use kernel::{BodyForceType, BoundaryScheme, BoundarySurface, CollisionType, GivenVars, LatticeKind, RelaxationModel};

    fn periodic_case(name: &str, mode: RunMode) -> CaseConfig {
        let periodic = |surface| BoundaryConfig {
            block: 0,
            component: 0,
            surface,
            scheme: BoundaryScheme::Periodic,
            given: GivenVars::default(),
        };
        CaseConfig {
            name: name.to_string(),
            space_dim: 2,
            mesh_size: 1.0 / 16.0,
            time_step: None,
            blocks: vec![BlockConfig {
                id: 0,
                name: "box".to_string(),
                size: [16, 16, 1],
                origin: [0.0; 3],
            }],
            components: vec![ComponentConfig {
                id: 0,
                name: "fluid".to_string(),
                lattice: LatticeKind::D2Q9,
                tau_ref: 0.02,
                collision: CollisionType::Bgk,
                body_force: BodyForceType::None,
                relaxation: RelaxationModel::Constant,
                initial_rho: 1.0,
                initial_velocity: [0.0; 3],
            }],
            boundaries: vec![
                periodic(BoundarySurface::Left),
                periodic(BoundarySurface::Right),
                periodic(BoundarySurface::Top),
                periodic(BoundarySurface::Bottom),
            ],
            solid_regions: Vec::new(),
            run: mode,
            checkpoint: CheckpointConfig {
                directory: std::env::temp_dir()
                    .join(format!("orchestrator_runner_{}", std::process::id()))
                    .to_string_lossy()
                    .into_owned(),
                period: None,
            },
            parallel: false,
            coupling: None,
        }
    }

    fn runner_for(config: &CaseConfig) -> SimulationRunner {
        let ctx = build_context(config, 0).unwrap();
        let sim = CoupledSimulation::new(ctx, ParticleSource::None, 1, 0, 0).unwrap();
        SimulationRunner::new(
            sim,
            RunPlan {
                mode: config.run.clone(),
                checkpoint_period: config.checkpoint.period,
            },
        )
    }

    #[test]
    fn test_runner_lifecycle() {
        let config = periodic_case("lifecycle", RunMode::Transient { steps: 20 });
        let runner = runner_for(&config);

        // Initially Created
        assert_eq!(runner.state(), RunnerState::Created);
        assert_eq!(runner.timestep_count(), 0);

        runner.start();
        let sim = runner.join().unwrap();
        assert_eq!(sim.step(), 20);
    }

    #[test]
    fn test_runner_pause_resume() {
        let config = periodic_case("pause", RunMode::Transient { steps: u64::MAX });
        let runner = runner_for(&config);

        runner.start();
        thread::sleep(Duration::from_millis(50));

        runner.pause();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runner.state(), RunnerState::Paused);

        let steps_paused = runner.timestep_count();
        thread::sleep(Duration::from_millis(100));

        // Should not advance while paused (allow for 1 interval race condition)
        let steps_after_pause = runner.timestep_count();
        assert!(
            steps_after_pause <= steps_paused + 1,
            "Steps should not advance while paused: before={}, after={}",
            steps_paused,
            steps_after_pause
        );

        runner.resume();
        assert_eq!(runner.state(), RunnerState::Running);

        runner.stop();
        assert_eq!(runner.state(), RunnerState::Finished);
        let sim = runner.join().unwrap();
        assert!(sim.step() >= steps_after_pause);
    }

    #[test]
    fn test_stop_before_start_returns_untouched_simulation() {
        let config = periodic_case("never_started", RunMode::Transient { steps: 5 });
        let runner = runner_for(&config);
        runner.stop();
        let sim = runner.join().unwrap();
        assert_eq!(sim.step(), 0);
    }

    #[test]
    fn test_steady_run_converges_on_fluid_at_rest() {
        let config = periodic_case(
            "steady",
            RunMode::Steady {
                criterion: 1e-10,
                check_period: 10,
                max_steps: 1000,
            },
        );
        let runner = runner_for(&config);
        runner.start();
        let shared = Arc::clone(&runner.shared);
        let sim = runner.join().unwrap();
        assert_eq!(sim.step(), 10, "fluid at rest converges at the first check");
        let guard = lock(&shared);
        assert_eq!(guard.state, RunnerState::Finished);
        let residual = guard.residual.unwrap();
        assert!(residual < 1e-10, "residual {residual:e} above criterion");
    }

    #[test]
    fn test_checkpoints_follow_period() {
        let mut config = periodic_case("checkpointed", RunMode::Transient { steps: 10 });
        config.checkpoint.period = Some(5);
        let runner = runner_for(&config);
        runner.start();
        runner.join().unwrap();

        let case = config.case_prefix();
        for step in [5, 10] {
            let path = checkpoint_path(&case, "f_fluid", step);
            assert!(path.exists(), "missing checkpoint {}", path.display());
        }
        assert!(!checkpoint_path(&case, "f_fluid", 3).exists());
    }

    #[test]
    fn test_crossed_detects_period_boundaries() {
        assert!(crossed(4, 5, 5));
        assert!(crossed(3, 7, 5));
        assert!(!crossed(5, 9, 5));
        assert!(!crossed(0, 9, 0));
    }
}
