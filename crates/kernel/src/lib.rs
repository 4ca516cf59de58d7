//! Lattice Boltzmann kernel with fluid-particle coupling
//!
//! This crate holds the fluid side of a coupled lattice Boltzmann / discrete
//! element simulation. Everything is owned by a [`SimulationContext`]; the
//! free functions in [`evolution`] advance it one step at a time.
//!
//! # Modules
//! - [`lattice`] -- D2Q9 / D3Q19 velocity sets, equilibrium and forcing.
//! - [`block`] -- Structured blocks, iteration ranges and face partitions.
//! - [`field`] -- Per-block distributed fields and JSON checkpoints.
//! - [`component`] -- Fluid components and their macroscopic variables.
//! - [`registry`] -- Per-component field bundles.
//! - [`engine`] -- Loop executor: records every kernel launch, runs cells in parallel.
//! - [`collision`] -- Moments, equilibrium, relaxation, collision and streaming kernels.
//! - [`boundary`] -- Boundary schemes and their dispatch.
//! - [`particle`] -- Struct-of-arrays particle storage per block, periodic images.
//! - [`mapping`] -- Projection of particles onto per-node solid-fraction slots.
//! - [`fpi`] -- Coupling models (PSM, Prati) and the global force model.
//! - [`context`] -- The simulation context and its definition operations.
//! - [`evolution`] -- The time-step pipeline, initialisation and diagnostics.

#![warn(missing_docs)]

pub mod block;
pub mod boundary;
pub mod collision;
pub mod component;
pub mod context;
pub mod engine;
pub mod error;
pub mod evolution;
pub mod field;
pub mod fpi;
pub mod lattice;
pub mod mapping;
pub mod particle;
pub mod registry;

/// Floating-point type of every field.
pub type Real = f64;

pub use block::{Block, BoundarySurface, IterRange};
pub use boundary::{BoundaryDefinition, BoundaryScheme, GivenVars};
pub use component::{BodyForceType, CollisionType, Component, MacroVarKind, MacroVariable, RelaxationModel};
pub use context::{InteractionModel, MappingDefinition, SimulationContext};
pub use engine::{Access, Executor, LoopArg, LoopRecord};
pub use error::{KernelError, KernelResult};
pub use evolution::{Residual, ResidualReport};
pub use field::{FieldDescriptor, FieldSet, IntField, RealField, StartMode};
pub use fpi::{FpiData, FpiModelKind, ForceType, Forces, Hook};
pub use lattice::{Lattice, LatticeKind};
pub use mapping::{MappingFieldSet, MappingModel};
pub use particle::{BlockParticles, ParticleShape, ParticleState, PeriodicDomain};
pub use registry::{FieldRegistry, NodeType};
