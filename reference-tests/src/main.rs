//! Reference test binary entry point
//!
//! Runs every reference case at full size and exits non-zero when any of
//! them fails.

use reference_tests::{lid_driven_cavity, periodic_mass_conservation, sphere_in_uniform_flow, ReferenceTest, TestResult};
use orchestrator::OrchestratorResult;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Get all reference tests
fn all_tests() -> OrchestratorResult<Vec<ReferenceTest>> {
    Ok(vec![
        lid_driven_cavity(33, 2000)?,
        periodic_mass_conservation(64, 1000)?,
        sphere_in_uniform_flow(24, 200)?,
    ])
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reference_tests=info,orchestrator=info,kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    tracing::info!("LBM-DEM Reference Test Suite");
    tracing::info!("============================");

    let tests = match all_tests() {
        Ok(tests) => tests,
        Err(e) => {
            tracing::error!("invalid reference case: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("Found {} reference tests", tests.len());

    let mut results: Vec<TestResult> = Vec::new();
    let mut passed_count = 0;
    let mut failed_count = 0;

    for test in tests {
        match test.run() {
            Ok(result) => {
                if result.passed {
                    passed_count += 1;
                } else {
                    failed_count += 1;
                }
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                tracing::error!("ERROR running test {}: {}", test.name, e);
                failed_count += 1;
            }
        }
    }

    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total tests: {}", passed_count + failed_count);
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    if failed_count > 0 {
        std::process::exit(1);
    }
}
