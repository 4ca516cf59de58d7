//! Particle synchronization with the external particle process
//!
//! The synchronizer owns the transport for its whole lifetime and enforces
//! the exchange order for each frame:
//!
//! 1. [`ParticleSynchronizer::set_domains`] announces the send and receive
//!    span once, covering the owned blocks over `2 * max_iteration` frames.
//! 2. [`ParticleSynchronizer::extract_particles`] replaces the particle list
//!    of every owned block with the particles committed for the frame.
//! 3. [`ParticleSynchronizer::send_particles`] pushes the drag gathered for
//!    that frame and commits it.
//!
//! A frame past the end of the announced span doubles the span first. Using
//! any frame before a span exists is an error.

use std::collections::BTreeMap;
use std::ops::Range;

use kernel::{ParticleShape, ParticleState, Real, SimulationContext};

use crate::config::SyncConfig;
use crate::domain::owned_bounds;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::transport::{ParticleTransport, Region};

/// Per-particle key carrying the radius; every particle has one.
pub const RADIUS: &str = "radius";
/// Per-particle velocity keys.
pub const VELOCITY: [&str; 3] = ["u", "v", "w"];
/// Per-particle angular velocity keys.
pub const ANGULAR_VELOCITY: [&str; 3] = ["ox", "oy", "oz"];
/// Drag force keys pushed back.
pub const DRAG_FORCE: [&str; 3] = ["Fdx", "Fdy", "Fdz"];
/// Drag torque keys pushed back.
pub const DRAG_TORQUE: [&str; 3] = ["Mdx", "Mdy", "Mdz"];

/// Where the synchronizer is in the exchange of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No span announced yet.
    Idle,
    /// Span announced, no frame fetched yet.
    SpanAnnounced,
    /// Particles of `frame` are in place; drag may be computed and sent.
    Fetched {
        /// Frame fetched.
        frame: u64,
    },
    /// Drag of `frame` is published; the next frame may be fetched.
    Committed {
        /// Frame committed.
        frame: u64,
    },
}

/// Run metadata published by the particle process.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunParameters {
    /// Number of particle steps.
    pub n_steps: Option<u64>,
    /// Blending coefficient.
    pub alpha1: Option<Real>,
    /// Particle shape family.
    pub particle_shape: Option<ParticleShape>,
    /// First particle step.
    pub first_step: Option<u64>,
}

const EMPTY_REGION: Region = Region {
    min: [Real::INFINITY; 3],
    max: [Real::NEG_INFINITY; 3],
};

/// Exchanges particle state and drag with the particle process.
#[derive(Debug)]
pub struct ParticleSynchronizer {
    transport: Box<dyn ParticleTransport>,
    keys: SyncConfig,
    state: SyncState,
    span: Option<Range<u64>>,
    region: Region,
}

impl ParticleSynchronizer {
    /// Take ownership of `transport`, exchanging the user keys in `keys`.
    pub fn new(transport: Box<dyn ParticleTransport>, keys: SyncConfig) -> Self {
        Self {
            transport,
            keys,
            state: SyncState::Idle,
            span: None,
            region: EMPTY_REGION,
        }
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Frames currently announced.
    pub fn span(&self) -> Option<Range<u64>> {
        self.span.clone()
    }

    /// Region the spans cover.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Announce the send and receive span over the owned blocks of `ctx`.
    pub fn set_domains(&mut self, ctx: &SimulationContext, max_iteration: u64) -> OrchestratorResult<()> {
        self.region = match owned_bounds(ctx) {
            Some((min, max)) => Region { min, max },
            None => {
                tracing::debug!("no owned particle blocks; announcing an empty region");
                EMPTY_REGION
            }
        };
        let frames = 0..2 * max_iteration;
        self.announce(frames)?;
        self.state = SyncState::SpanAnnounced;
        Ok(())
    }

    fn announce(&mut self, frames: Range<u64>) -> OrchestratorResult<()> {
        self.transport.announce_send_span(frames.clone(), self.region)?;
        self.transport.announce_recv_span(frames.clone(), self.region)?;
        tracing::info!(start = frames.start, end = frames.end, region = ?self.region, "particle span announced");
        self.span = Some(match self.span.take() {
            Some(old) => old.start..frames.end,
            None => frames,
        });
        Ok(())
    }

    fn ensure_frame(&mut self, frame: u64) -> OrchestratorResult<()> {
        let end = match &self.span {
            Some(span) => span.end,
            None => return Err(OrchestratorError::UnannouncedFrame { frame }),
        };
        if frame >= end {
            let mut new_end = end.max(1);
            while new_end <= frame {
                new_end *= 2;
            }
            self.announce(end..new_end)?;
        }
        Ok(())
    }

    /// Fetch the global run parameters published for `frame`.
    pub fn extract_run_parameters(&mut self, frame: u64) -> OrchestratorResult<RunParameters> {
        let t = &mut self.transport;
        let particle_shape = match t.fetch_global("particleShape", frame)? {
            Some(code) => Some(ParticleShape::from_code(code as i32)?),
            None => None,
        };
        Ok(RunParameters {
            n_steps: t.fetch_global("Nsteps", frame)?.map(|v| v as u64),
            alpha1: t.fetch_global("alpha1", frame)?,
            particle_shape,
            first_step: t.fetch_global("firstStep", frame)?.map(|v| v as u64),
        })
    }

    /// Replace the particles of every owned block with those committed for
    /// `frame`, then release the frame.
    ///
    /// Returns the number of particles fetched.
    pub fn extract_particles(&mut self, frame: u64, ctx: &mut SimulationContext) -> OrchestratorResult<usize> {
        self.ensure_frame(frame)?;
        for bp in ctx.particles.iter_mut().filter(|bp| bp.owned) {
            bp.clear_particles();
        }

        let points = self.transport.fetch_points(RADIUS, frame, &self.region)?;
        for &(position, radius) in &points {
            let state = self.fetch_state(frame, position, radius)?;
            for bp in ctx.particles.iter_mut() {
                if !bp.owned {
                    continue;
                }
                bp.insert_particle(state.clone());
            }
        }
        self.transport.forget(frame)?;
        self.state = SyncState::Fetched { frame };

        tracing::debug!(
            frame,
            particles = points.len(),
            images = ctx.particles.iter().map(|bp| bp.n_periodic()).sum::<usize>(),
            "particles extracted"
        );
        Ok(points.len())
    }

    fn fetch_state(&mut self, frame: u64, position: [Real; 3], radius: Real) -> OrchestratorResult<ParticleState> {
        let mut state = ParticleState {
            position,
            radius,
            ..Default::default()
        };
        for a in 0..3 {
            state.velocity[a] = self.transport.fetch(VELOCITY[a], frame, position)?.unwrap_or(0.0);
            state.angular_velocity[a] = self.transport.fetch(ANGULAR_VELOCITY[a], frame, position)?.unwrap_or(0.0);
        }
        for key in &self.keys.shape_keys {
            state.shape_params.push(self.transport.fetch(key, frame, position)?.unwrap_or(0.0));
        }
        for key in &self.keys.inputs {
            state.inputs.push(self.transport.fetch(key, frame, position)?.unwrap_or(0.0));
        }
        Ok(state)
    }

    /// Push the drag of every particle fetched for `frame` and commit it.
    ///
    /// A particle spread over several owned blocks, or over periodic images,
    /// is pushed once with the sum of its parts.
    pub fn send_particles(&mut self, frame: u64, ctx: &SimulationContext) -> OrchestratorResult<usize> {
        self.ensure_frame(frame)?;
        if self.state != (SyncState::Fetched { frame }) {
            return Err(OrchestratorError::Ordering(format!(
                "drag for frame {frame} sent in state {:?}; particles of that frame were never fetched",
                self.state
            )));
        }

        let mut totals: BTreeMap<[u64; 3], ([Real; 3], [Real; 6], Vec<Real>)> = BTreeMap::new();
        for bp in ctx.particles.iter().filter(|bp| bp.owned) {
            for (at, force, torque) in bp.drag_by_particle() {
                let entry = totals
                    .entry(at.map(Real::to_bits))
                    .or_insert_with(|| (at, [0.0; 6], Vec::new()));
                for a in 0..3 {
                    entry.1[a] += force[a];
                    entry.1[3 + a] += torque[a];
                }
            }
            for i in 0..bp.n_particles() {
                let key = bp.particles.received_at[i].map(Real::to_bits);
                if let Some(entry) = totals.get_mut(&key) {
                    if entry.2.is_empty() {
                        entry.2 = bp.particles.outputs[i].clone();
                    }
                }
            }
        }

        for (point, drag, outputs) in totals.values() {
            for a in 0..3 {
                self.transport.push(DRAG_FORCE[a], frame, *point, drag[a])?;
                self.transport.push(DRAG_TORQUE[a], frame, *point, drag[3 + a])?;
            }
            for (k, key) in self.keys.outputs.iter().enumerate() {
                self.transport.push(key, frame, *point, outputs.get(k).copied().unwrap_or(0.0))?;
            }
        }
        self.transport.commit(frame)?;
        self.state = SyncState::Committed { frame };
        tracing::debug!(frame, particles = totals.len(), "drag sent");
        Ok(totals.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use kernel::evolution::{initialise_coupling, initialise_solution, set_initial_macro_vars};
    use kernel::{
        BodyForceType, Block, CollisionType, Component, Executor, FpiModelKind, InteractionModel, LatticeKind,
        MacroVariable, MappingDefinition, MappingModel, RelaxationModel, StartMode,
    };

    fn coupled_box() -> SimulationContext {
        let block = Block::new(0, "box", 3, [8, 8, 8], 0.125, [0.0; 3]).unwrap();
        let fluid = Component::new(
            0,
            "fluid",
            LatticeKind::D3Q19,
            0.05,
            MacroVariable::isothermal_set(0, 3),
            CollisionType::Bgk,
            BodyForceType::None,
            RelaxationModel::Constant,
        )
        .unwrap();
        let mut ctx =
            SimulationContext::new("sync", vec![block], vec![fluid], 0.125, StartMode::Scratch, Executor::serial()).unwrap();
        ctx.define_block_particles(1, 0.0, ParticleShape::Spherical, &[0], None).unwrap();
        ctx.define_particle_mapping(&[MappingDefinition {
            component: 0,
            model: MappingModel::Spherical,
            copy_from: None,
        }])
        .unwrap();
        ctx.define_interaction_models(&[InteractionModel {
            component: 0,
            kind: FpiModelKind::Psm,
            params: vec![1.0],
        }])
        .unwrap();
        set_initial_macro_vars(&mut ctx, 0, 1.0, [0.0; 3]).unwrap();
        initialise_solution(&mut ctx).unwrap();
        initialise_coupling(&mut ctx).unwrap();
        ctx
    }

    fn synchronizer(keys: SyncConfig) -> (ParticleSynchronizer, InMemoryTransport, InMemoryTransport) {
        let (fluid, dem) = InMemoryTransport::pair();
        (ParticleSynchronizer::new(Box::new(fluid.clone()), keys), fluid, dem)
    }

    #[test]
    fn test_send_before_any_span_is_rejected() {
        let ctx = coupled_box();
        let (mut sync, _, _) = synchronizer(SyncConfig::default());
        let err = sync.send_particles(0, &ctx).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnannouncedFrame { frame: 0 }));
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn test_send_before_fetch_is_rejected() {
        let ctx = coupled_box();
        let (mut sync, _, _) = synchronizer(SyncConfig::default());
        sync.set_domains(&ctx, 4).unwrap();
        let err = sync.send_particles(0, &ctx).unwrap_err();
        assert!(matches!(err, OrchestratorError::Ordering(_)), "got {err:?}");
    }

    #[test]
    fn test_extract_replaces_particles_and_releases_frame() {
        let mut ctx = coupled_box();
        let keys = SyncConfig {
            inputs: vec!["temperature".to_string()],
            ..Default::default()
        };
        let (mut sync, fluid, mut dem) = synchronizer(keys);
        sync.set_domains(&ctx, 4).unwrap();
        assert_eq!(sync.span(), Some(0..8));

        let inside = [0.5, 0.5, 0.5];
        dem.push(RADIUS, 0, inside, 0.2).unwrap();
        dem.push("u", 0, inside, 0.01).unwrap();
        dem.push("oz", 0, inside, 0.5).unwrap();
        dem.push("temperature", 0, inside, 300.0).unwrap();
        dem.push(RADIUS, 0, [5.0, 0.5, 0.5], 0.2).unwrap();
        dem.commit(0).unwrap();

        assert_eq!(sync.extract_particles(0, &mut ctx).unwrap(), 1);
        let p = &ctx.particles[0].particles;
        assert_eq!(p.len(), 1);
        assert_eq!(p.velocity[0], [0.01, 0.0, 0.0]);
        assert_eq!(p.angular_velocity[0], [0.0, 0.0, 0.5]);
        assert_eq!(p.inputs[0], vec![300.0]);
        assert!(!fluid.has_pending(0), "fetched frame must be forgotten");

        // A frame with nothing committed empties the blocks.
        assert_eq!(sync.extract_particles(1, &mut ctx).unwrap(), 0);
        assert_eq!(ctx.particles[0].n_particles(), 0);
    }

    #[test]
    fn test_send_pushes_drag_and_commits() {
        let mut ctx = coupled_box();
        let keys = SyncConfig {
            outputs: vec!["heat".to_string()],
            ..Default::default()
        };
        let (mut sync, _, mut dem) = synchronizer(keys);
        sync.set_domains(&ctx, 1).unwrap();
        let at = [0.5, 0.5, 0.5];
        dem.push(RADIUS, 0, at, 0.2).unwrap();
        dem.commit(0).unwrap();
        sync.extract_particles(0, &mut ctx).unwrap();

        ctx.particles[0].particles.drag_force[0] = [-2.0, 0.0, 0.5];
        ctx.particles[0].particles.drag_torque[0] = [0.0, 0.25, 0.0];
        ctx.particles[0].particles.outputs[0] = vec![7.0];
        assert_eq!(sync.send_particles(0, &ctx).unwrap(), 1);
        assert_eq!(sync.state(), SyncState::Committed { frame: 0 });

        assert_eq!(dem.fetch("Fdx", 0, at).unwrap(), Some(-2.0));
        assert_eq!(dem.fetch("Fdz", 0, at).unwrap(), Some(0.5));
        assert_eq!(dem.fetch("Mdy", 0, at).unwrap(), Some(0.25));
        assert_eq!(dem.fetch("heat", 0, at).unwrap(), Some(7.0));

        let again = sync.send_particles(0, &ctx).unwrap_err();
        assert!(matches!(again, OrchestratorError::Ordering(_)), "a frame is committed once");
    }

    #[test]
    fn test_span_doubles_past_its_end() {
        let mut ctx = coupled_box();
        let (mut sync, fluid, _) = synchronizer(SyncConfig::default());
        sync.set_domains(&ctx, 2).unwrap();
        sync.extract_particles(5, &mut ctx).unwrap();
        assert_eq!(sync.span(), Some(0..8));
        let spans = fluid.recv_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].frames, 4..8);
        assert_eq!(spans[1].region, sync.region());
    }

    #[test]
    fn test_run_parameters() {
        let (mut sync, _, mut dem) = synchronizer(SyncConfig::default());
        dem.push_global("Nsteps", 0, 200.0).unwrap();
        dem.push_global("alpha1", 0, 0.5).unwrap();
        dem.push_global("particleShape", 0, ParticleShape::Spherical.code() as Real).unwrap();
        dem.commit(0).unwrap();
        let params = sync.extract_run_parameters(0).unwrap();
        assert_eq!(params.n_steps, Some(200));
        assert_eq!(params.alpha1, Some(0.5));
        assert_eq!(params.particle_shape, Some(ParticleShape::Spherical));
        assert_eq!(params.first_step, None);
    }
}
