//! Per-block evolution kernels: moments, equilibrium, relaxation, collision
//! and streaming.
//!
//! Each function covers one block and one component and announces itself to
//! the [`Executor`] before running. Solid nodes are left untouched by every
//! kernel here.

use crate::block::Block;
use crate::component::{BodyForceType, CollisionType, Component, RelaxationModel};
use crate::engine::{Access, Executor, LoopArg, LoopRecord};
use crate::registry::NodeType;
use crate::Real;

#[inline]
fn is_solid(node_type: &[i32], idx: usize) -> bool {
    NodeType::from_i32(node_type[idx]) == NodeType::Solid
}

/// Density and velocity of the node at `idx` from a macro-variable slice.
#[inline]
pub fn node_macro(macro_vars: &[Real], nm: usize, dim: usize, idx: usize) -> (Real, [Real; 3]) {
    let m = &macro_vars[idx * nm..(idx + 1) * nm];
    let mut u = [0.0; 3];
    u[..dim].copy_from_slice(&m[1..=dim]);
    (m[0], u)
}

/// Relaxation factor `dt / (tau + dt/2)`.
#[inline]
pub fn relaxation_factor(tau: Real, dt: Real) -> Real {
    dt / (tau + 0.5 * dt)
}

/// Recompute density and velocity from the distribution.
pub fn update_macro_vars(
    exec: &Executor,
    block: &Block,
    component: &Component,
    f: &[Real],
    node_type: &[i32],
    macro_vars: &mut [Real],
) {
    let lat = component.lattice;
    let q = lat.q();
    let nm = component.macro_var_count();
    let dim = component.dim();
    let range = block.whole_range();
    exec.launch(LoopRecord {
        kernel: "update_macro_vars",
        block: block.id,
        range,
        args: vec![
            LoopArg::dat("f", q, Access::Read),
            LoopArg::dat("node_type", 1, Access::Read),
            LoopArg::dat("macro_vars", nm, Access::Write),
        ],
    });
    exec.map_cells(block, &range, macro_vars, nm, |idx, _, m| {
        if is_solid(node_type, idx) {
            return;
        }
        let (rho, u) = lat.moments(&f[idx * q..(idx + 1) * q]);
        m[0] = rho;
        m[1..=dim].copy_from_slice(&u[..dim]);
    });
}

/// Copy one distribution field into another over the whole block.
pub fn copy_distribution(exec: &Executor, block: &Block, q: usize, src: &[Real], dst: &mut [Real]) {
    let range = block.whole_range();
    exec.launch(LoopRecord {
        kernel: "copy_distribution",
        block: block.id,
        range,
        args: vec![
            LoopArg::dat("src", q, Access::Read),
            LoopArg::dat("dst", q, Access::Write),
        ],
    });
    exec.map_cells(block, &range, dst, q, |idx, _, out| {
        out.copy_from_slice(&src[idx * q..(idx + 1) * q]);
    });
}

/// Recompute the equilibrium and the forcing source.
pub fn update_feq_and_body_force(
    exec: &Executor,
    block: &Block,
    component: &Component,
    macro_vars: &[Real],
    node_type: &[i32],
    feq: &mut [Real],
    body_force: &mut [Real],
) {
    let lat = component.lattice;
    let q = lat.q();
    let nm = component.macro_var_count();
    let dim = component.dim();
    let range = block.whole_range();
    exec.launch(LoopRecord {
        kernel: "update_feq_and_body_force",
        block: block.id,
        range,
        args: vec![
            LoopArg::dat("macro_vars", nm, Access::Read),
            LoopArg::dat("node_type", 1, Access::Read),
            LoopArg::dat("feq", q, Access::Write),
            LoopArg::dat("body_force", q, Access::Write),
        ],
    });
    exec.map_cells(block, &range, feq, q, |idx, _, out| {
        if is_solid(node_type, idx) {
            return;
        }
        let (rho, u) = node_macro(macro_vars, nm, dim, idx);
        lat.equilibrium(rho, u, out);
    });
    let acceleration = match component.body_force {
        BodyForceType::None => None,
        BodyForceType::Constant { acceleration } => Some(acceleration),
    };
    exec.map_cells(block, &range, body_force, q, |idx, _, out| {
        if is_solid(node_type, idx) {
            return;
        }
        match acceleration {
            None => out.iter_mut().for_each(|v| *v = 0.0),
            Some(a) => {
                let (rho, _) = node_macro(macro_vars, nm, dim, idx);
                for (i, v) in out.iter_mut().enumerate() {
                    *v = lat.force_source_i(i, rho, a);
                }
            }
        }
    });
}

/// Update the relaxation time from the component's relaxation model.
pub fn update_tau(
    exec: &Executor,
    block: &Block,
    component: &Component,
    macro_vars: &[Real],
    node_type: &[i32],
    tau: &mut [Real],
) {
    let nm = component.macro_var_count();
    let range = block.whole_range();
    exec.launch(LoopRecord {
        kernel: "update_tau",
        block: block.id,
        range,
        args: vec![
            LoopArg::dat("macro_vars", nm, Access::Read),
            LoopArg::dat("tau", 1, Access::Write),
        ],
    });
    let tau_ref = component.tau_ref;
    let model = component.relaxation;
    exec.map_cells(block, &range, tau, 1, |idx, _, t| {
        if is_solid(node_type, idx) {
            return;
        }
        t[0] = match model {
            RelaxationModel::Constant => tau_ref,
            RelaxationModel::DensityScaled => {
                let rho = macro_vars[idx * nm];
                if rho > 0.0 {
                    tau_ref / rho
                } else {
                    tau_ref
                }
            }
        };
    });
}

/// Inputs of a collision launch on one block.
pub struct CollisionInputs<'a> {
    /// Distribution.
    pub f: &'a [Real],
    /// Equilibrium.
    pub feq: &'a [Real],
    /// Forcing source.
    pub body_force: &'a [Real],
    /// Relaxation time.
    pub tau: &'a [Real],
    /// Node classification.
    pub node_type: &'a [i32],
}

/// Relax the distribution towards equilibrium and write the result into
/// `f_stage`.
///
/// BGK: `f* = f - w (f - feq) + tau w F` with `w = dt / (tau + dt/2)`.
pub fn collide(
    exec: &Executor,
    block: &Block,
    component: &Component,
    dt: Real,
    inputs: &CollisionInputs<'_>,
    f_stage: &mut [Real],
) {
    let lat = component.lattice;
    let q = lat.q();
    let range = block.whole_range();
    exec.launch(LoopRecord {
        kernel: "collision",
        block: block.id,
        range,
        args: vec![
            LoopArg::dat("f", q, Access::Read),
            LoopArg::dat("feq", q, Access::Read),
            LoopArg::dat("body_force", q, Access::Read),
            LoopArg::dat("tau", 1, Access::Read),
            LoopArg::dat("f_stage", q, Access::Write),
            LoopArg::gbl("dt", 1, Access::Read),
        ],
    });
    let collision = component.collision;
    exec.map_cells(block, &range, f_stage, q, |idx, _, out| {
        let f = &inputs.f[idx * q..(idx + 1) * q];
        if is_solid(inputs.node_type, idx) {
            out.copy_from_slice(f);
            return;
        }
        let feq = &inputs.feq[idx * q..(idx + 1) * q];
        let force = &inputs.body_force[idx * q..(idx + 1) * q];
        let tau = inputs.tau[idx];
        let omega = relaxation_factor(tau, dt);
        match collision {
            CollisionType::Bgk => {
                for i in 0..q {
                    out[i] = f[i] - omega * (f[i] - feq[i]) + tau * omega * force[i];
                }
            }
            CollisionType::Trt { magic } => {
                let tau_plus = 1.0 / omega;
                let omega_minus = 1.0 / (magic / (tau_plus - 0.5) + 0.5);
                for i in 0..q {
                    let o = lat.opposite(i);
                    let f_sym = 0.5 * (f[i] + f[o]);
                    let f_anti = 0.5 * (f[i] - f[o]);
                    let eq_sym = 0.5 * (feq[i] + feq[o]);
                    let eq_anti = 0.5 * (feq[i] - feq[o]);
                    out[i] = f[i] - omega * (f_sym - eq_sym) - omega_minus * (f_anti - eq_anti)
                        + tau * omega * force[i];
                }
            }
        }
    });
}

/// Pull-stream `f_stage` into `f`.
///
/// A population whose source node lies outside the block keeps its old value
/// and must be set by a boundary condition.
pub fn stream(
    exec: &Executor,
    block: &Block,
    component: &Component,
    f_stage: &[Real],
    node_type: &[i32],
    f: &mut [Real],
) {
    let lat = component.lattice;
    let q = lat.q();
    let range = block.whole_range();
    exec.launch(LoopRecord {
        kernel: "stream",
        block: block.id,
        range,
        args: vec![
            LoopArg::dat("f_stage", q, Access::Read),
            LoopArg::dat("node_type", 1, Access::Read),
            LoopArg::dat("f", q, Access::ReadWrite),
        ],
    });
    exec.map_cells(block, &range, f, q, |idx, ijk, out| {
        if is_solid(node_type, idx) {
            return;
        }
        for (i, v) in out.iter_mut().enumerate() {
            let c = lat.c(i);
            if let Some(src) = block.offset(ijk, [-c[0], -c[1], -c[2]]) {
                *v = f_stage[block.index(src) * q + i];
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{MacroVarKind, MacroVariable};
    use crate::lattice::LatticeKind;

    fn component(collision: CollisionType) -> Component {
        let vars = [MacroVarKind::Rho, MacroVarKind::U, MacroVarKind::V]
            .iter()
            .enumerate()
            .map(|(id, &kind)| MacroVariable {
                id,
                name: format!("m{id}"),
                kind,
            })
            .collect();
        Component::new(
            0,
            "fluid",
            LatticeKind::D2Q9,
            0.8,
            vars,
            collision,
            BodyForceType::None,
            RelaxationModel::Constant,
        )
        .unwrap()
    }

    fn run_collision(collision: CollisionType) -> (Vec<Real>, Vec<Real>) {
        let c = component(collision);
        let block = Block::new(0, "b", 2, [1, 1, 1], 1.0, [0.0; 3]).unwrap();
        let f: Vec<Real> = (0..9).map(|i| 0.1 + 0.01 * i as Real).collect();
        let (rho, u) = c.lattice.moments(&f);
        let mut feq = vec![0.0; 9];
        c.lattice.equilibrium(rho, u, &mut feq);
        let inputs = CollisionInputs {
            f: &f,
            feq: &feq,
            body_force: &[0.0; 9],
            tau: &[0.8],
            node_type: &[0],
        };
        let mut out = vec![0.0; 9];
        collide(&Executor::serial(), &block, &c, 1.0, &inputs, &mut out);
        (f, out)
    }

    #[test]
    fn collision_conserves_mass_and_momentum() {
        for collision in [CollisionType::Bgk, CollisionType::Trt { magic: 0.25 }] {
            let (f, out) = run_collision(collision);
            let lat = component(collision).lattice;
            let (r0, u0) = lat.moments(&f);
            let (r1, u1) = lat.moments(&out);
            assert!((r0 - r1).abs() < 1e-14);
            assert!((u0[0] - u1[0]).abs() < 1e-14 && (u0[1] - u1[1]).abs() < 1e-14);
        }
    }

    #[test]
    fn stream_leaves_incoming_edge_populations() {
        let c = component(CollisionType::Bgk);
        let block = Block::new(0, "b", 2, [3, 1, 1], 1.0, [0.0; 3]).unwrap();
        let f_stage: Vec<Real> = (0..27).map(|v| v as Real).collect();
        let mut f = vec![-1.0; 27];
        stream(&Executor::serial(), &block, &c, &f_stage, &[0; 3], &mut f);
        // direction 1 is +x: node 1 pulls from node 0, node 0 has no source
        assert_eq!(f[9 + 1], f_stage[1]);
        assert_eq!(f[1], -1.0);
    }
}
