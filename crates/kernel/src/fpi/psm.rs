//! Partially saturated method.
//!
//! The collision at a node blends fluid relaxation with a solid collision
//! term per particle slot `s`:
//!
//! ```text
//! f*_i = f_i - (1 - B) w (f_i - feq_i) + sum_s B_s Om^s_i + tau w F_i
//! Om^s_i = [f_-i - feq_-i(rho, u)] - [f_i - feq_i(rho, u_s)]
//! ```
//!
//! and the fluid pushes slot `s` with `-B_s sum_i Om^s_i c_i`.

use crate::collision::{node_macro, relaxation_factor};
use crate::engine::{Access, LoopArg, LoopRecord};
use crate::error::KernelResult;
use crate::registry::NodeType;
use crate::Real;

use super::{
    inject_global_force, integrate_drag, node_weights, zero_fd, CouplingEnv, CouplingModel, FpiModelKind, OwnedHooks,
};

const PSM_FLAGS: [bool; 8] = [false, true, false, true, false, true, true, false];

/// Partially saturated coupling.
#[derive(Debug, Clone, Copy)]
pub struct Psm {
    gamma: Real,
    hooks: OwnedHooks,
}

impl Psm {
    /// Model with blending coefficient `gamma`.
    pub fn new(gamma: Real) -> KernelResult<Self> {
        Ok(Self {
            gamma,
            hooks: OwnedHooks::from_flags(&PSM_FLAGS)?,
        })
    }
}

impl CouplingModel for Psm {
    fn kind(&self) -> FpiModelKind {
        FpiModelKind::Psm
    }

    fn hooks(&self) -> OwnedHooks {
        self.hooks
    }

    fn initialize(&self, env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        zero_fd(env)
    }

    fn inject_force(&self, env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        inject_global_force(env, self.gamma)
    }

    fn collide(&self, env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        let lat = env.component.lattice;
        let q = lat.q();
        let nm = env.component.macro_var_count();
        let dim = env.component.dim();
        let n_elem = env.mapping.n_elem;
        let dt = env.dt;
        let gamma = self.gamma;
        for block in env.blocks {
            let range = block.whole_range();
            env.exec.launch(LoopRecord {
                kernel: "psm_collision",
                block: block.id,
                range,
                args: vec![
                    LoopArg::dat("f", q, Access::Read),
                    LoopArg::dat("feq", q, Access::Read),
                    LoopArg::dat("body_force", q, Access::Read),
                    LoopArg::dat("tau", 1, Access::Read),
                    LoopArg::dat("macro_vars", nm, Access::Read),
                    LoopArg::dat("sfp", n_elem, Access::Read),
                    LoopArg::dat("vp", dim * n_elem, Access::Read),
                    LoopArg::dat("id", n_elem, Access::Read),
                    LoopArg::dat("f_stage", q, Access::Write),
                    LoopArg::dat("Fd", dim * n_elem, Access::Write),
                ],
            });
            let view = env.mapping.block_view(block.id)?;
            let fields = &mut *env.fields;
            let f = fields.f.block(block.id)?;
            let feq = fields.feq.block(block.id)?;
            let force = fields.body_force.block(block.id)?;
            let tau = fields.tau.block(block.id)?;
            let macro_vars = fields.macro_vars.block(block.id)?;
            let node_type = fields.node_type.block(block.id)?;
            let f_stage = fields.f_stage.block_mut(block.id)?;
            let fd = env.fd.block_mut(block.id)?;
            let mut weights = vec![0.0; n_elem];
            env.exec.for_each_cell(block, &range, |idx, _| {
                let fc = &f[idx * q..(idx + 1) * q];
                let eq = &feq[idx * q..(idx + 1) * q];
                let out = &mut f_stage[idx * q..(idx + 1) * q];
                let push = &mut fd[idx * n_elem * dim..(idx + 1) * n_elem * dim];
                push.fill(0.0);
                if NodeType::from_i32(node_type[idx]) == NodeType::Solid {
                    out.copy_from_slice(fc);
                    return;
                }
                let omega = relaxation_factor(tau[idx], dt);
                let solid = node_weights(&view, idx, 1.0 / omega, gamma, &mut weights);
                for i in 0..q {
                    out[i] = fc[i] - (1.0 - solid) * omega * (fc[i] - eq[i]) + tau[idx] * omega * force[idx * q + i];
                }
                if solid <= 0.0 {
                    return;
                }
                let (rho, _) = node_macro(macro_vars, nm, dim, idx);
                for (e, &b) in weights.iter().enumerate() {
                    if b <= 0.0 {
                        continue;
                    }
                    let us = view.velocity(idx, e);
                    for i in 0..q {
                        let o = lat.opposite(i);
                        let om = (fc[o] - eq[o]) - (fc[i] - lat.equilibrium_i(i, rho, us));
                        out[i] += b * om;
                        let c = lat.cr(i);
                        for a in 0..dim {
                            push[e * dim + a] -= b * om * c[a];
                        }
                    }
                }
            });
        }
        Ok(())
    }

    fn compute_drag(&self, env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        integrate_drag(env)
    }
}
