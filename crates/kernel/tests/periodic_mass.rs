//! Mass conservation on a fully periodic box.
//!
//! A D2Q9 box wrapped on all four faces, no particles and no forcing, is
//! advanced 100 steps. The sum of all populations must not drift by more
//! than the rounding of a single reduction, and worker threads must
//! reproduce the serial result exactly.

use kernel::evolution::{calc_total_mass, initialise_solution, set_initial_macro_vars, stream_collision};
use kernel::{
    BodyForceType, Block, BoundaryDefinition, BoundaryScheme, BoundarySurface, CollisionType, Component, Executor,
    GivenVars, LatticeKind, MacroVariable, RelaxationModel, SimulationContext, StartMode,
};

fn periodic_box(collision: CollisionType, executor: Executor) -> SimulationContext {
    let block = Block::new(0, "box", 2, [16, 16, 1], 1.0 / 16.0, [0.0; 3]).unwrap();
    let fluid = Component::new(
        0,
        "fluid",
        LatticeKind::D2Q9,
        0.02,
        MacroVariable::isothermal_set(0, 2),
        collision,
        BodyForceType::None,
        RelaxationModel::Constant,
    )
    .unwrap();
    let mut ctx = SimulationContext::new("periodic_mass", vec![block.clone()], vec![fluid], 1.0 / 16.0, StartMode::Scratch, executor)
        .unwrap();
    for surface in [BoundarySurface::Left, BoundarySurface::Right, BoundarySurface::Top, BoundarySurface::Bottom] {
        let def = BoundaryDefinition::on_surface(&block, 0, surface, BoundaryScheme::Periodic, GivenVars::default()).unwrap();
        ctx.define_boundary(def).unwrap();
    }
    ctx
}

#[test]
fn uniform_fluid_keeps_its_mass() {
    let mut ctx = periodic_box(CollisionType::Bgk, Executor::serial());
    set_initial_macro_vars(&mut ctx, 0, 1.0, [0.0; 3]).unwrap();
    initialise_solution(&mut ctx).unwrap();
    ctx.validate().unwrap();

    let m0 = calc_total_mass(&ctx, 0).unwrap();
    for _ in 0..100 {
        stream_collision(&mut ctx).unwrap();
    }
    let m1 = calc_total_mass(&ctx, 0).unwrap();
    let drift = ((m1 - m0) / m0).abs();
    eprintln!("mass {m0} -> {m1}, relative drift {drift:e}");
    assert!(drift < 1e-12, "relative mass drift {drift:e} exceeds 1e-12");
}

fn disturbed_box(collision: CollisionType, executor: Executor) -> SimulationContext {
    let mut ctx = periodic_box(collision, executor);
    set_initial_macro_vars(&mut ctx, 0, 1.0, [0.02, -0.01, 0.0]).unwrap();
    {
        let block = ctx.block(0).unwrap().clone();
        let fields = ctx.registry.component_mut(0).unwrap();
        let m = fields.macro_vars.block_mut(0).unwrap();
        let idx = block.index([5, 9, 0]);
        m[idx * 3] = 1.05;
    }
    initialise_solution(&mut ctx).unwrap();
    ctx
}

#[test]
fn disturbed_fluid_keeps_its_mass() {
    for collision in [CollisionType::Bgk, CollisionType::Trt { magic: 0.25 }] {
        let mut ctx = periodic_box(collision, Executor::parallel());
        set_initial_macro_vars(&mut ctx, 0, 1.0, [0.02, -0.01, 0.0]).unwrap();
        {
            let block = ctx.block(0).unwrap().clone();
            let fields = ctx.registry.component_mut(0).unwrap();
            let m = fields.macro_vars.block_mut(0).unwrap();
            let idx = block.index([5, 9, 0]);
            m[idx * 3] = 1.05;
        }
        initialise_solution(&mut ctx).unwrap();

        let m0 = calc_total_mass(&ctx, 0).unwrap();
        for _ in 0..100 {
            stream_collision(&mut ctx).unwrap();
        }
        let m1 = calc_total_mass(&ctx, 0).unwrap();
        let drift = ((m1 - m0) / m0).abs();
        assert!(drift < 1e-12, "{collision:?}: relative mass drift {drift:e} exceeds 1e-12");
    }
}

#[test]
fn worker_threads_match_serial_bit_for_bit() {
    for collision in [CollisionType::Bgk, CollisionType::Trt { magic: 0.25 }] {
        let mut serial = disturbed_box(collision, Executor::serial());
        let mut parallel = disturbed_box(collision, Executor::parallel().with_min_parallel_cells(1));
        for _ in 0..50 {
            stream_collision(&mut serial).unwrap();
            stream_collision(&mut parallel).unwrap();
        }
        let bits = |ctx: &SimulationContext| {
            let fields = ctx.registry.component(0).unwrap();
            fields.f.block(0).unwrap().iter().map(|x| x.to_bits()).collect::<Vec<_>>()
        };
        assert_eq!(bits(&serial), bits(&parallel), "{collision:?}: populations differ");
        assert_eq!(
            calc_total_mass(&serial, 0).unwrap().to_bits(),
            calc_total_mass(&parallel, 0).unwrap().to_bits()
        );
    }
}

#[test]
fn one_step_renders_the_pipeline_in_order() {
    let mut ctx = periodic_box(CollisionType::Bgk, Executor::serial().with_recording());
    set_initial_macro_vars(&mut ctx, 0, 1.0, [0.0; 3]).unwrap();
    initialise_solution(&mut ctx).unwrap();
    ctx.executor.take_records();

    stream_collision(&mut ctx).unwrap();
    let kernels: Vec<&str> = ctx.executor.take_records().iter().map(|r| r.kernel).collect();
    assert_eq!(
        kernels,
        vec![
            "update_macro_vars",
            "copy_distribution",
            "update_feq_and_body_force",
            "update_tau",
            "collision",
            "stream",
            "boundary_periodic",
            "boundary_periodic",
            "boundary_periodic",
            "boundary_periodic",
        ]
    );
}

#[test]
fn overlapping_boundaries_are_rejected() {
    let mut ctx = periodic_box(CollisionType::Bgk, Executor::serial());
    let block = ctx.block(0).unwrap().clone();
    let again = BoundaryDefinition::on_surface(&block, 0, BoundarySurface::Top, BoundaryScheme::EqmDiffuseRefl, GivenVars::default())
        .unwrap();
    let err = ctx.define_boundary(again).unwrap_err();
    assert!(matches!(err, kernel::KernelError::OverlappingBoundary { block: 0, component: 0 }));
}
