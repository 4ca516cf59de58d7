//! Coupled time stepping
//!
//! A [`CoupledSimulation`] advances the fluid in coupling intervals. Each
//! interval loads the particles for the current frame, maps them onto the
//! grid, resets their drag, runs the fluid steps while accumulating drag
//! after every step, and hands the drag back to wherever the particles came
//! from.

use kernel::evolution::{calc_residual_error, calculate_drag, map_particles, reset_drag, stream_collision};
use kernel::{ParticleState, ResidualReport, SimulationContext};

use crate::error::OrchestratorResult;
use crate::force::{total_drag, ParticleDrag};
use crate::sync::ParticleSynchronizer;

/// Where particles come from each interval.
#[derive(Debug)]
pub enum ParticleSource {
    /// Pure fluid run.
    None,
    /// Fixed particles inserted locally every interval.
    Local(Vec<ParticleState>),
    /// Particles exchanged with an external particle process.
    External(ParticleSynchronizer),
}

/// A simulation context with its particle source and step counters.
#[derive(Debug)]
pub struct CoupledSimulation {
    ctx: SimulationContext,
    source: ParticleSource,
    interval: u64,
    step: u64,
    frame: u64,
}

impl CoupledSimulation {
    /// Wrap `ctx`, starting at `start_step`.
    ///
    /// An external source announces its span here, sized for the
    /// `max_steps` the run may take.
    pub fn new(
        ctx: SimulationContext,
        mut source: ParticleSource,
        interval: u64,
        start_step: u64,
        max_steps: u64,
    ) -> OrchestratorResult<Self> {
        let interval = interval.max(1);
        if let ParticleSource::External(sync) = &mut source {
            sync.set_domains(&ctx, max_steps.div_ceil(interval))?;
        }
        Ok(Self {
            ctx,
            source,
            interval,
            step: start_step,
            frame: start_step / interval,
        })
    }

    /// The simulation context.
    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    /// Mutable access to the simulation context.
    pub fn context_mut(&mut self) -> &mut SimulationContext {
        &mut self.ctx
    }

    /// Consume and return the context.
    pub fn into_context(self) -> SimulationContext {
        self.ctx
    }

    /// Fluid steps taken, counting from the start of the case.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Fluid steps per particle exchange.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Whether particles are coupled at all.
    pub fn is_coupled(&self) -> bool {
        !matches!(self.source, ParticleSource::None)
    }

    /// Run one coupling interval of at most `max_steps` fluid steps.
    ///
    /// Returns the steps taken and the total drag over the interval.
    pub fn advance_interval(&mut self, max_steps: u64) -> OrchestratorResult<(u64, ParticleDrag)> {
        let steps = self.interval.min(max_steps);
        if steps == 0 {
            return Ok((0, ParticleDrag::default()));
        }
        if !self.is_coupled() {
            for _ in 0..steps {
                stream_collision(&mut self.ctx)?;
            }
            self.step += steps;
            return Ok((steps, ParticleDrag::default()));
        }

        let frame = self.frame;
        match &mut self.source {
            ParticleSource::External(sync) => {
                sync.extract_particles(frame, &mut self.ctx)?;
            }
            ParticleSource::Local(particles) => {
                for bp in self.ctx.particles.iter_mut().filter(|bp| bp.owned) {
                    bp.clear_particles();
                    for p in particles.iter() {
                        bp.insert_particle(p.clone());
                    }
                }
            }
            ParticleSource::None => {}
        }

        map_particles(&mut self.ctx)?;
        reset_drag(&mut self.ctx);
        for _ in 0..steps {
            stream_collision(&mut self.ctx)?;
            calculate_drag(&mut self.ctx)?;
        }
        self.step += steps;

        let drag = total_drag(&self.ctx);
        if let ParticleSource::External(sync) = &mut self.source {
            sync.send_particles(frame, &self.ctx)?;
        }
        self.frame += 1;
        tracing::debug!(step = self.step, frame, force = ?drag.net_force, "coupling interval done");
        Ok((steps, drag))
    }

    /// Residual of every macroscopic variable since the last evaluation.
    pub fn residual(&mut self, check_period: u64) -> OrchestratorResult<ResidualReport> {
        Ok(calc_residual_error(&mut self.ctx, check_period as usize)?)
    }

    /// Write a checkpoint at the current step.
    pub fn write_checkpoint(&self) -> OrchestratorResult<()> {
        Ok(self.ctx.write_checkpoint(self.step)?)
    }
}
