//! Command-line driver
//!
//! `lbdem <case.json> [restart-step]` loads a case file, runs it to the end
//! on the background runner and reports the final state.

use std::process::ExitCode;

use orchestrator::force::total_drag;
use orchestrator::{create_simulation, OrchestratorError};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: lbdem <case.json> [restart-step]";

fn run(case: &str, restart_step: u64) -> Result<(), OrchestratorError> {
    let runner = create_simulation(case, restart_step)?;
    runner.start();
    let sim = runner.join()?;

    let ctx = sim.context();
    info!(step = sim.step(), sim_time = sim.step() as f64 * ctx.time_step, "run finished");
    if sim.is_coupled() {
        let drag = total_drag(ctx);
        info!(force = ?drag.net_force, moment = ?drag.net_moment, "drag on particles");
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lbdem=info,orchestrator=info,kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(case) = args.next() else {
        error!("{USAGE}");
        return ExitCode::FAILURE;
    };
    let restart_step = match args.next().map(|s| s.parse::<u64>()) {
        None => 0,
        Some(Ok(step)) => step,
        Some(Err(e)) => {
            error!("restart step must be a non-negative integer: {e}");
            error!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match run(&case, restart_step) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
