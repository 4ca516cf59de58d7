//! Fluid components and the macroscopic variables they own.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::lattice::{Lattice, LatticeKind};
use crate::Real;

/// Kind of a macroscopic variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacroVarKind {
    /// Density.
    Rho,
    /// Velocity, x component.
    U,
    /// Velocity, y component.
    V,
    /// Velocity, z component.
    W,
    /// Temperature.
    T,
}

/// A macroscopic variable with its global id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroVariable {
    /// Global id.
    pub id: usize,
    /// Name used in checkpoints and logs.
    pub name: String,
    /// What the variable measures.
    pub kind: MacroVarKind,
}

impl MacroVariable {
    /// Density plus one velocity per axis, with consecutive ids from
    /// `first_id`.
    pub fn isothermal_set(first_id: usize, dim: usize) -> Vec<MacroVariable> {
        [(MacroVarKind::Rho, "rho"), (MacroVarKind::U, "u"), (MacroVarKind::V, "v"), (MacroVarKind::W, "w")]
            .into_iter()
            .take(dim + 1)
            .enumerate()
            .map(|(k, (kind, name))| MacroVariable {
                id: first_id + k,
                name: name.to_string(),
                kind,
            })
            .collect()
    }
}

/// Collision operator of a component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollisionType {
    /// Single-relaxation-time BGK with a second-order equilibrium.
    Bgk,
    /// Two-relaxation-time operator with the given magic parameter.
    Trt {
        /// Product of the symmetric and antisymmetric relaxation parameters.
        magic: Real,
    },
}

/// Body force applied to a component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyForceType {
    /// No force.
    None,
    /// Uniform acceleration in lattice units.
    Constant {
        /// Acceleration vector.
        acceleration: [Real; 3],
    },
}

/// How the relaxation time is updated each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxationModel {
    /// `tau = tau_ref` everywhere.
    Constant,
    /// `tau = tau_ref / rho`, keeping the dynamic viscosity fixed.
    DensityScaled,
}

/// One fluid component.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Component id.
    pub id: usize,
    /// Component name.
    pub name: String,
    /// Velocity set.
    pub lattice: Lattice,
    /// Reference relaxation time.
    pub tau_ref: Real,
    /// Macroscopic variables in storage order: density first, then the
    /// velocity components.
    pub macro_vars: Vec<MacroVariable>,
    /// Collision operator.
    pub collision: CollisionType,
    /// Body force.
    pub body_force: BodyForceType,
    /// Relaxation update.
    pub relaxation: RelaxationModel,
}

impl Component {
    /// Build and validate a component.
    ///
    /// `macro_vars` must start with the density and list one velocity
    /// component per lattice dimension in x, y, z order.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        name: impl Into<String>,
        lattice: LatticeKind,
        tau_ref: Real,
        macro_vars: Vec<MacroVariable>,
        collision: CollisionType,
        body_force: BodyForceType,
        relaxation: RelaxationModel,
    ) -> KernelResult<Self> {
        let name = name.into();
        let lattice = Lattice::new(lattice);
        let dim = lattice.dim();
        if !(tau_ref > 0.0) {
            return Err(KernelError::Invalid(format!(
                "component '{name}' has non-positive tau_ref {tau_ref}"
            )));
        }
        if macro_vars.iter().any(|m| m.kind == MacroVarKind::T) {
            return Err(KernelError::Unsupported(format!(
                "component '{name}' declares a temperature variable; thermal models are not available"
            )));
        }
        let expected = [MacroVarKind::Rho, MacroVarKind::U, MacroVarKind::V, MacroVarKind::W];
        let kinds: Vec<MacroVarKind> = macro_vars.iter().map(|m| m.kind).collect();
        if kinds.as_slice() != &expected[..=dim] {
            return Err(KernelError::Invalid(format!(
                "component '{name}' macroscopic variables {kinds:?} do not match {:?}",
                &expected[..=dim]
            )));
        }
        if let CollisionType::Trt { magic } = collision {
            if !(magic > 0.0) {
                return Err(KernelError::Invalid(format!(
                    "component '{name}' has non-positive TRT magic parameter {magic}"
                )));
            }
        }
        Ok(Self {
            id,
            name,
            lattice,
            tau_ref,
            macro_vars,
            collision,
            body_force,
            relaxation,
        })
    }

    /// Spatial dimension of the lattice.
    pub fn dim(&self) -> usize {
        self.lattice.dim()
    }

    /// Number of macroscopic variables stored per node.
    pub fn macro_var_count(&self) -> usize {
        self.macro_vars.len()
    }

    /// Storage slot of the macroscopic variable with global id `id`.
    pub fn slot_of(&self, id: usize) -> Option<usize> {
        self.macro_vars.iter().position(|m| m.id == id)
    }

    /// Global id of the density variable.
    pub fn rho_id(&self) -> usize {
        self.macro_vars[0].id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(kinds: &[MacroVarKind]) -> Vec<MacroVariable> {
        kinds
            .iter()
            .enumerate()
            .map(|(id, &kind)| MacroVariable {
                id,
                name: format!("{kind:?}").to_lowercase(),
                kind,
            })
            .collect()
    }

    #[test]
    fn three_d_component_needs_three_velocities() {
        use MacroVarKind::*;
        let err = Component::new(
            0,
            "fluid",
            LatticeKind::D3Q19,
            0.6,
            vars(&[Rho, U, V]),
            CollisionType::Bgk,
            BodyForceType::None,
            RelaxationModel::Constant,
        );
        assert!(matches!(err, Err(KernelError::Invalid(_))));
        let ok = Component::new(
            0,
            "fluid",
            LatticeKind::D3Q19,
            0.6,
            vars(&[Rho, U, V, W]),
            CollisionType::Bgk,
            BodyForceType::None,
            RelaxationModel::Constant,
        )
        .unwrap();
        assert_eq!(ok.slot_of(3), Some(3));
    }

    #[test]
    fn temperature_is_rejected() {
        use MacroVarKind::*;
        let err = Component::new(
            0,
            "fluid",
            LatticeKind::D2Q9,
            0.6,
            vars(&[Rho, U, V, T]),
            CollisionType::Bgk,
            BodyForceType::None,
            RelaxationModel::Constant,
        );
        assert!(matches!(err, Err(KernelError::Unsupported(_))));
    }
}
