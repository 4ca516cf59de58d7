//! Field registry: owns every distribution and macroscopic field.

use std::collections::BTreeMap;

use crate::block::Block;
use crate::component::Component;
use crate::error::{KernelError, KernelResult};
use crate::field::{FieldDescriptor, IntField, RealField, StartMode};
use crate::Real;

/// Node classification stored in the node-type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum NodeType {
    /// Ordinary fluid node.
    Fluid = 0,
    /// Solid node excluded from collision and streaming; neighbours bounce
    /// back off it.
    Solid = 1,
}

impl NodeType {
    /// Decode a stored value; anything unknown counts as fluid.
    pub fn from_i32(v: i32) -> Self {
        if v == NodeType::Solid as i32 {
            NodeType::Solid
        } else {
            NodeType::Fluid
        }
    }
}

/// All fields of one component.
#[derive(Debug, Clone)]
pub struct ComponentFields {
    /// Distribution.
    pub f: RealField,
    /// Staging copy of the distribution (post-collision values).
    pub f_stage: RealField,
    /// Equilibrium distribution.
    pub feq: RealField,
    /// Forcing source per direction.
    pub body_force: RealField,
    /// Relaxation time per node.
    pub tau: RealField,
    /// Node classification, see [`NodeType`].
    pub node_type: IntField,
    /// Macroscopic variables, in the component's storage order.
    pub macro_vars: RealField,
    /// Snapshot of the macroscopic variables used for residuals.
    pub macro_vars_copy: RealField,
}

impl ComponentFields {
    fn create(component: &Component, blocks: &[Block], start: &StartMode) -> KernelResult<Self> {
        let q = component.lattice.q();
        let nm = component.macro_var_count();
        let name = |s: &str| format!("{s}_{}", component.name);
        Ok(Self {
            f: RealField::create(FieldDescriptor::new(name("f"), q), blocks, start)?,
            f_stage: RealField::create_from_scratch(FieldDescriptor::new(name("f_stage"), q), blocks),
            feq: RealField::create_from_scratch(FieldDescriptor::new(name("feq"), q), blocks),
            body_force: RealField::create_from_scratch(FieldDescriptor::new(name("body_force"), q), blocks),
            tau: RealField::filled(FieldDescriptor::new(name("tau"), 1), blocks, component.tau_ref),
            node_type: IntField::create(FieldDescriptor::new(name("node_type"), 1), blocks, start)?,
            macro_vars: RealField::create(FieldDescriptor::new(name("macro_vars"), nm), blocks, start)?,
            macro_vars_copy: RealField::create_from_scratch(
                FieldDescriptor::new(name("macro_vars_copy"), nm),
                blocks,
            ),
        })
    }

    fn validate(&self, component: &Component, blocks: &[Block]) -> KernelResult<()> {
        let q = component.lattice.q();
        let nm = component.macro_var_count();
        self.f.validate(blocks, q)?;
        self.f_stage.validate(blocks, q)?;
        self.feq.validate(blocks, q)?;
        self.body_force.validate(blocks, q)?;
        self.tau.validate(blocks, 1)?;
        self.node_type.validate(blocks, 1)?;
        self.macro_vars.validate(blocks, nm)?;
        self.macro_vars_copy.validate(blocks, nm)
    }

    /// Write the fields needed to restart.
    pub fn write_checkpoint(&self, case_name: &str, time_step: u64) -> KernelResult<()> {
        self.f.write_to_file(case_name, time_step)?;
        self.node_type.write_to_file(case_name, time_step)?;
        self.macro_vars.write_to_file(case_name, time_step)?;
        Ok(())
    }
}

/// Owner of every simulation field, keyed by component id.
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    /// Node coordinates, `dim` values per node.
    pub coordinates: RealField,
    /// Per-component fields.
    pub components: BTreeMap<usize, ComponentFields>,
}

impl FieldRegistry {
    /// Allocate (or restore) every field for `components` on `blocks`.
    pub fn create(
        blocks: &[Block],
        components: &BTreeMap<usize, Component>,
        dim: usize,
        start: &StartMode,
    ) -> KernelResult<Self> {
        let mut coordinates = RealField::create_from_scratch(FieldDescriptor::new("coordinates", dim), blocks);
        for block in blocks {
            let values = coordinates.block_mut(block.id)?;
            for ijk in block.whole_range().iter() {
                let x = block.coordinate(ijk);
                let idx = block.index(ijk);
                values[idx * dim..(idx + 1) * dim].copy_from_slice(&x[..dim]);
            }
        }
        let mut fields = BTreeMap::new();
        for (&id, component) in components {
            fields.insert(id, ComponentFields::create(component, blocks, start)?);
        }
        tracing::debug!(components = fields.len(), blocks = blocks.len(), "field registry created");
        Ok(Self {
            coordinates,
            components: fields,
        })
    }

    /// Fields of component `id`.
    pub fn component(&self, id: usize) -> KernelResult<&ComponentFields> {
        self.components.get(&id).ok_or(KernelError::UnknownComponent(id))
    }

    /// Mutable fields of component `id`.
    pub fn component_mut(&mut self, id: usize) -> KernelResult<&mut ComponentFields> {
        self.components.get_mut(&id).ok_or(KernelError::UnknownComponent(id))
    }

    /// Value of macroscopic variable `var_id` of `component` at a node.
    pub fn macro_value(
        &self,
        component: &Component,
        var_id: usize,
        block: usize,
        idx: usize,
    ) -> KernelResult<Real> {
        let slot = component
            .slot_of(var_id)
            .ok_or_else(|| KernelError::Invalid(format!("variable {var_id} not owned by '{}'", component.name)))?;
        let fields = self.component(component.id)?;
        let nm = component.macro_var_count();
        Ok(fields.macro_vars.block(block)?[idx * nm + slot])
    }

    /// Check every field against the component and block definitions.
    pub fn validate(&self, blocks: &[Block], components: &BTreeMap<usize, Component>) -> KernelResult<()> {
        for (&id, component) in components {
            self.component(id)?.validate(component, blocks)?;
        }
        if let Some(extra) = self.components.keys().find(|id| !components.contains_key(id)) {
            return Err(KernelError::UnknownComponent(*extra));
        }
        Ok(())
    }

    /// Write restart data of every component.
    pub fn write_checkpoint(&self, case_name: &str, time_step: u64) -> KernelResult<()> {
        for fields in self.components.values() {
            fields.write_checkpoint(case_name, time_step)?;
        }
        Ok(())
    }
}
