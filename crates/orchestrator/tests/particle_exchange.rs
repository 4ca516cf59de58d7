//! Particle exchange with a stand-in particle process
//!
//! The particle side of an in-memory transport plays the particle solver:
//! it publishes one sphere per frame and reads back the drag. A sphere
//! straddling two blocks, or a periodic face, must come back as a single
//! particle carrying the sum of its parts.

use orchestrator::force::total_drag;
use orchestrator::sync::RADIUS;
use orchestrator::{prepare_case, CaseConfig, InMemoryTransport, ParticleTransport};
use serde_json::json;

fn case(blocks: serde_json::Value, boundaries: serde_json::Value, periodic: [bool; 3]) -> CaseConfig {
    let config: CaseConfig = serde_json::from_value(json!({
        "name": "exchange",
        "space_dim": 3,
        "mesh_size": 0.125,
        "blocks": blocks,
        "components": [{ "id": 0, "name": "fluid", "lattice": "d3q19", "tau_ref": 0.05 }],
        "boundaries": boundaries,
        "run": { "mode": "transient", "steps": 4 },
        "coupling": {
            "coupling_interval": 2,
            "periodic": periodic,
            "models": [{ "component": 0, "kind": "psm", "params": [1.0] }],
            "mappings": [{ "component": 0 }],
            "sync": { "inputs": ["temperature"] }
        }
    }))
    .unwrap();
    config.validate().unwrap();
    config
}

fn publish(dem: &mut InMemoryTransport, frame: u64, at: [f64; 3]) {
    dem.push(RADIUS, frame, at, 0.2).unwrap();
    dem.push("u", frame, at, 0.01).unwrap();
    dem.push("temperature", frame, at, 290.0).unwrap();
    dem.commit(frame).unwrap();
}

#[test]
fn sphere_on_a_block_seam_is_pushed_once() {
    let config = case(
        json!([
            { "id": 0, "name": "west", "size": [8, 8, 8] },
            { "id": 1, "name": "east", "size": [8, 8, 8], "origin": [1.0, 0.0, 0.0] }
        ]),
        json!([]),
        [false; 3],
    );
    let (fluid, mut dem) = InMemoryTransport::pair();
    let mut sim = prepare_case(&config, 0, Some(Box::new(fluid.clone()))).unwrap();

    // Two intervals of two steps each.
    let spans = fluid.recv_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].frames, 0..4);

    let at = [0.96, 0.5, 0.5];
    for frame in 0..2 {
        publish(&mut dem, frame, at);
        let (steps, drag) = sim.advance_interval(u64::MAX).unwrap();
        assert_eq!(steps, 2);

        let particles = &sim.context().particles;
        assert_eq!(particles[0].n_particles(), 1, "west block must hold the sphere");
        assert_eq!(particles[1].n_particles(), 1, "east block must hold the sphere");
        assert_eq!(particles[0].particles.inputs[0], vec![290.0]);

        let pushed = dem.fetch("Fdx", frame, at).unwrap();
        eprintln!("frame {frame}: pushed Fdx {pushed:?}, total {:?}", drag.net_force);
        assert_eq!(pushed, Some(drag.net_force[0]), "seam halves must be summed before pushing");
        assert!(drag.net_force[0].is_finite());
    }
    assert_eq!(sim.step(), 4);
}

#[test]
fn periodic_image_drag_returns_to_its_particle() {
    let periodic = |surface: &str| json!({ "block": 0, "component": 0, "surface": surface, "scheme": "Periodic" });
    let config = case(
        json!([{ "id": 0, "name": "box", "size": [8, 8, 8] }]),
        json!([periodic("Left"), periodic("Right")]),
        [true, false, false],
    );
    let (fluid, mut dem) = InMemoryTransport::pair();
    let mut sim = prepare_case(&config, 0, Some(Box::new(fluid))).unwrap();

    let at = [0.05, 0.5, 0.5];
    publish(&mut dem, 0, at);
    let (_, drag) = sim.advance_interval(u64::MAX).unwrap();

    let block = &sim.context().particles[0];
    assert_eq!(block.n_particles(), 1);
    assert_eq!(block.n_periodic(), 1, "sphere near x-min needs one image past x-max");
    assert_eq!(total_drag(sim.context()), drag);

    let pushed = dem.fetch("Fdx", 0, at).unwrap();
    assert_eq!(pushed, Some(drag.net_force[0]));
    let image_at = block.images.position[0];
    assert_eq!(dem.fetch("Fdx", 0, image_at).unwrap(), None, "images are never pushed on their own");
}

#[test]
fn missing_frame_leaves_blocks_empty() {
    let config = case(json!([{ "id": 0, "name": "box", "size": [8, 8, 8] }]), json!([]), [false; 3]);
    let (fluid, _dem) = InMemoryTransport::pair();
    let mut sim = prepare_case(&config, 0, Some(Box::new(fluid))).unwrap();

    let (_, drag) = sim.advance_interval(u64::MAX).unwrap();
    assert_eq!(sim.context().particles[0].n_particles(), 0);
    assert_eq!(drag.net_force, [0.0; 3]);
}
