//! Reference test framework for coupled LBM-DEM validation
//!
//! Each reference case is a complete case configuration run through the
//! orchestrator for a fixed number of steps, followed by a set of
//! pass/fail checks on the final state.


use kernel::evolution::calc_total_mass;
use kernel::{Real, SimulationContext};
use orchestrator::config::RunMode;
use orchestrator::force::ParticleDrag;
use orchestrator::{prepare_case, CaseConfig, OrchestratorError, OrchestratorResult};
use serde_json::json;

/// Expected result criteria for a reference case
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Total mass drift of component 0
    pub mass: Option<MassCheck>,
    /// Flow driven by a moving top wall
    pub lid_flow: Option<LidFlowCheck>,
    /// Drag on a particle held fixed in a moving fluid
    pub drag: Option<DragCheck>,
}

/// Check that the total mass does not drift
#[derive(Debug, Clone)]
pub struct MassCheck {
    /// Maximum allowed relative drift of the population sum
    pub max_relative_drift: Real,
}

/// Check that the lid drags the fluid beneath it along
#[derive(Debug, Clone)]
pub struct LidFlowCheck {
    /// Lid velocity, lattice units
    pub lid_velocity: Real,
    /// Minimum mean x-velocity on the row just below the lid, as a fraction
    /// of the lid velocity
    pub min_fraction_below_lid: Real,
}

/// Check the direction and symmetry of the drag on a fixed particle
#[derive(Debug, Clone)]
pub struct DragCheck {
    /// Axis of the free stream
    pub axis: usize,
    /// Maximum allowed ratio of the cross-stream force to the streamwise one
    pub max_cross_ratio: Real,
}

/// Result of running a reference case
#[derive(Debug)]
pub struct TestResult {
    /// Case name
    pub name: String,
    /// Whether every check passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Number of timesteps executed
    pub timesteps: u64,
    /// Simulated time
    pub sim_time: Real,
    /// Drag of the last coupling interval
    pub drag: ParticleDrag,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Details, or the reason for failing
    pub message: Option<String>,
}

impl CheckResult {
    fn new(name: &str, passed: bool, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed,
            message: Some(message),
        }
    }
}

/// A reference case
pub struct ReferenceTest {
    /// Case name
    pub name: String,
    /// Case configuration; its run section sets the step count
    pub config: CaseConfig,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

impl ReferenceTest {
    fn new(name: &str, config: serde_json::Value, expected: ExpectedResult) -> OrchestratorResult<Self> {
        let config: CaseConfig =
            serde_json::from_value(config).map_err(|e| OrchestratorError::Config(format!("{name}: {e}")))?;
        config.validate()?;
        Ok(Self {
            name: name.to_string(),
            config,
            expected,
        })
    }

    /// Steps the case runs for
    pub fn timesteps(&self) -> u64 {
        match self.config.run {
            RunMode::Transient { steps } => steps,
            RunMode::Steady { max_steps, .. } => max_steps,
        }
    }

    /// Run the reference case and return results
    pub fn run(&self) -> OrchestratorResult<TestResult> {
        tracing::info!("Running reference test: {}", self.name);

        let mut sim = prepare_case(&self.config, 0, None)?;
        let mass0 = calc_total_mass(sim.context(), 0)?;

        let total = self.timesteps();
        let report_every = (total / 10).max(1);
        let mut drag = ParticleDrag::default();
        while sim.step() < total {
            let before = sim.step();
            let (_, interval_drag) = sim.advance_interval(total - before)?;
            drag = interval_drag;
            if before / report_every != sim.step() / report_every {
                let progress = sim.step() as f64 / total as f64 * 100.0;
                tracing::info!("Progress: {:.0}% ({}/{})", progress, sim.step(), total);
            }
        }
        let ctx = sim.context();
        let sim_time = sim.step() as Real * ctx.time_step;
        tracing::info!("Simulation complete: {} steps, {:.4} simulated", sim.step(), sim_time);

        let mut checks = vec![validate_finite(ctx)?];
        if let Some(ref mass) = self.expected.mass {
            checks.push(validate_mass(ctx, mass0, mass)?);
        }
        if let Some(ref lid) = self.expected.lid_flow {
            checks.push(validate_lid_flow(ctx, lid)?);
        }
        if let Some(ref check) = self.expected.drag {
            checks.push(validate_drag(&drag, check));
        }

        Ok(TestResult {
            name: self.name.clone(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            timesteps: sim.step(),
            sim_time,
            drag,
        })
    }
}

/// Cubic cavity of `cells` nodes per side closed by six diffuse-reflection
/// walls, the top one moving at 0.01 along x.
pub fn lid_driven_cavity(cells: usize, steps: u64) -> OrchestratorResult<ReferenceTest> {
    let lid_velocity = 0.01;
    let wall = |surface: &str, velocity: [Real; 3]| {
        json!({
            "block": 0, "component": 0, "surface": surface, "scheme": "EqmDiffuseRefl",
            "given": { "rho": 1.0, "velocity": velocity }
        })
    };
    let still = [0.0; 3];
    let config = json!({
        "name": "lid_driven_cavity",
        "space_dim": 3,
        "mesh_size": 1.0 / (cells - 1) as Real,
        "blocks": [{ "id": 0, "name": "cavity", "size": [cells, cells, cells] }],
        "components": [{ "id": 0, "name": "fluid", "lattice": "d3q19", "tau_ref": 0.01 }],
        "boundaries": [
            wall("Left", still),
            wall("Right", still),
            wall("Top", [lid_velocity, 0.0, 0.0]),
            wall("Bottom", still),
            wall("Front", still),
            wall("Back", still)
        ],
        "run": { "mode": "transient", "steps": steps }
    });
    ReferenceTest::new(
        "Lid-Driven Cavity",
        config,
        ExpectedResult {
            mass: Some(MassCheck {
                max_relative_drift: 1e-2,
            }),
            lid_flow: Some(LidFlowCheck {
                lid_velocity,
                min_fraction_below_lid: 0.01,
            }),
            drag: None,
        },
    )
}

/// D2Q9 box wrapped on all four faces with a uniform initial drift.
pub fn periodic_mass_conservation(cells: usize, steps: u64) -> OrchestratorResult<ReferenceTest> {
    let periodic = |surface: &str| json!({ "block": 0, "component": 0, "surface": surface, "scheme": "Periodic" });
    let config = json!({
        "name": "periodic_mass",
        "space_dim": 2,
        "mesh_size": 1.0 / cells as Real,
        "blocks": [{ "id": 0, "name": "box", "size": [cells, cells, 1] }],
        "components": [{
            "id": 0, "name": "fluid", "lattice": "d2q9", "tau_ref": 0.02,
            "initial_velocity": [0.02, -0.01, 0.0]
        }],
        "boundaries": [periodic("Left"), periodic("Right"), periodic("Top"), periodic("Bottom")],
        "run": { "mode": "transient", "steps": steps }
    });
    ReferenceTest::new(
        "Periodic Mass Conservation",
        config,
        ExpectedResult {
            mass: Some(MassCheck {
                max_relative_drift: 1e-12,
            }),
            ..Default::default()
        },
    )
}

/// Sphere held at rest in the centre of a fully periodic box whose fluid
/// starts moving along x.
pub fn sphere_in_uniform_flow(cells: usize, steps: u64) -> OrchestratorResult<ReferenceTest> {
    let dx = 1.0 / cells as Real;
    let centre = 0.5 * (cells - 1) as Real * dx;
    let periodic = |surface: &str| json!({ "block": 0, "component": 0, "surface": surface, "scheme": "Periodic" });
    let config = json!({
        "name": "sphere_in_uniform_flow",
        "space_dim": 3,
        "mesh_size": dx,
        "blocks": [{ "id": 0, "name": "box", "size": [cells, cells, cells] }],
        "components": [{
            "id": 0, "name": "fluid", "lattice": "d3q19", "tau_ref": 0.5 * dx,
            "initial_velocity": [0.01, 0.0, 0.0]
        }],
        "boundaries": [
            periodic("Left"), periodic("Right"),
            periodic("Top"), periodic("Bottom"),
            periodic("Front"), periodic("Back")
        ],
        "run": { "mode": "transient", "steps": steps },
        "coupling": {
            "periodic": [true, true, true],
            "models": [{ "component": 0, "kind": "psm", "params": [1.0] }],
            "mappings": [{ "component": 0 }],
            "particles": [{ "position": [centre, centre, centre], "radius": 0.2 }]
        }
    });
    ReferenceTest::new(
        "Sphere In Uniform Flow",
        config,
        ExpectedResult {
            mass: Some(MassCheck {
                max_relative_drift: 1e-3,
            }),
            drag: Some(DragCheck {
                axis: 0,
                max_cross_ratio: 1e-3,
            }),
            ..Default::default()
        },
    )
}

/// Every populated node must hold finite populations.
fn validate_finite(ctx: &SimulationContext) -> OrchestratorResult<CheckResult> {
    let mut bad = 0usize;
    let mut total = 0usize;
    for &id in ctx.components.keys() {
        let fields = ctx.registry.component(id)?;
        for block in &ctx.blocks {
            let f = fields.f.block(block.id)?;
            bad += f.iter().filter(|v| !v.is_finite()).count();
            total += f.len();
        }
    }
    Ok(if bad == 0 {
        CheckResult::new("Stability", true, format!("{total} populations finite"))
    } else {
        CheckResult::new("Stability", false, format!("{bad} / {total} populations not finite"))
    })
}

fn validate_mass(ctx: &SimulationContext, mass0: Real, check: &MassCheck) -> OrchestratorResult<CheckResult> {
    let mass = calc_total_mass(ctx, 0)?;
    let drift = ((mass - mass0) / mass0).abs();
    let passed = drift <= check.max_relative_drift;
    Ok(CheckResult::new(
        "Mass Conservation",
        passed,
        format!(
            "{mass0:.6} -> {mass:.6}, drift {drift:.3e} (limit {:.1e})",
            check.max_relative_drift
        ),
    ))
}

/// Mean x-velocity of the interior nodes of row `j` of block 0.
fn mean_row_velocity(ctx: &SimulationContext, j: usize) -> OrchestratorResult<Real> {
    let block = ctx.block(0)?;
    let component = ctx.component(0)?;
    let q = component.lattice.q();
    let f = ctx.registry.component(0)?.f.block(0)?;
    let [nx, _, nz] = block.size;
    let mut sum = 0.0;
    let mut count = 0usize;
    for k in 1..nz.saturating_sub(1) {
        for i in 1..nx.saturating_sub(1) {
            let idx = block.index([i, j, k]);
            let (_, u) = component.lattice.moments(&f[idx * q..(idx + 1) * q]);
            sum += u[0];
            count += 1;
        }
    }
    Ok(if count == 0 { 0.0 } else { sum / count as Real })
}

fn validate_lid_flow(ctx: &SimulationContext, check: &LidFlowCheck) -> OrchestratorResult<CheckResult> {
    let ny = ctx.block(0)?.size[1];
    if ny < 3 {
        return Ok(CheckResult::new("Lid Flow", false, format!("cavity too shallow: {ny} rows")));
    }
    let lid = mean_row_velocity(ctx, ny - 1)?;
    let below = mean_row_velocity(ctx, ny - 2)?;
    let required = check.min_fraction_below_lid * check.lid_velocity;
    let passed = lid > 0.0 && below >= required && lid < check.lid_velocity * 1.5;
    Ok(CheckResult::new(
        "Lid Flow",
        passed,
        format!("u at lid {lid:.3e}, one row below {below:.3e} (required {required:.1e})"),
    ))
}

fn validate_drag(drag: &ParticleDrag, check: &DragCheck) -> CheckResult {
    let along = drag.net_force[check.axis];
    let cross = (0..3)
        .filter(|&a| a != check.axis)
        .map(|a| drag.net_force[a].abs())
        .fold(0.0, Real::max);
    let passed = along > 0.0 && cross <= check.max_cross_ratio * along.abs();
    CheckResult::new(
        "Drag",
        passed,
        format!("streamwise {along:.3e}, largest cross-stream {cross:.3e}"),
    )
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Timesteps: {}", self.timesteps);
        println!("Simulated time: {:.6}", self.sim_time);
        if self.drag != ParticleDrag::default() {
            println!("Drag: force {:?}, moment {:?}", self.drag.net_force, self.drag.net_moment);
        }
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
