//! Velocity-correction coupling.
//!
//! After the moments update, each velocity component is pulled towards the
//! particle surface velocity, `u <- u + sum_s B_s (u_s - u)`. The equilibrium
//! is then built from the corrected velocity and the fluid collides as usual.
//! The momentum the correction removed is handed to the particles as
//! `-w B_s rho (u_s - u_raw)`, with `u_raw` recomputed from the distribution.

use crate::collision::{node_macro, relaxation_factor};
use crate::engine::{Access, LoopArg, LoopRecord};
use crate::error::KernelResult;
use crate::mapping::MAX_SLOTS;
use crate::registry::NodeType;
use crate::Real;

use super::{
    inject_global_force, integrate_drag, node_weights, zero_fd, CouplingEnv, CouplingModel, FpiModelKind, OwnedHooks,
};

const PRATI_FLAGS: [bool; 8] = [true, true, false, true, false, true, true, false];

const UPDATE_KERNELS: [&str; 3] = ["prati_update_u", "prati_update_v", "prati_update_w"];

/// Velocity-correction coupling.
#[derive(Debug, Clone, Copy)]
pub struct Prati {
    gamma: Real,
    hooks: OwnedHooks,
}

impl Prati {
    /// Model with blending coefficient `gamma`.
    pub fn new(gamma: Real) -> KernelResult<Self> {
        Ok(Self {
            gamma,
            hooks: OwnedHooks::from_flags(&PRATI_FLAGS)?,
        })
    }
}

impl CouplingModel for Prati {
    fn kind(&self) -> FpiModelKind {
        FpiModelKind::Prati
    }

    fn hooks(&self) -> OwnedHooks {
        self.hooks
    }

    fn initialize(&self, env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        zero_fd(env)
    }

    fn correct_velocity(&self, env: &mut CouplingEnv<'_>) -> KernelResult<()> {
        let nm = env.component.macro_var_count();
        let dim = env.component.dim();
        let n_elem = env.mapping.n_elem;
        let dt = env.dt;
        let gamma = self.gamma;
        for block in env.blocks {
            let range = block.whole_range();
            let view = env.mapping.block_view(block.id)?;
            let fields = &mut *env.fields;
            let tau = fields.tau.block(block.id)?;
            let node_type = fields.node_type.block(block.id)?;
            let macro_vars = fields.macro_vars.block_mut(block.id)?;
            for (axis, &kernel) in UPDATE_KERNELS.iter().enumerate().take(dim) {
                env.exec.launch(LoopRecord {
                    kernel,
                    block: block.id,
                    range,
                    args: vec![
                        LoopArg::dat("macro_vars", nm, Access::ReadWrite),
                        LoopArg::dat("tau", 1, Access::Read),
                        LoopArg::dat("sfp", n_elem, Access::Read),
                        LoopArg::dat("vp", dim * n_elem, Access::Read),
                        LoopArg::dat("id", n_elem, Access::Read),
                    ],
                });
                env.exec.map_cells(block, &range, macro_vars, nm, |idx, _, m| {
                    if NodeType::from_i32(node_type[idx]) == NodeType::Solid {
                        return;
                    }
                    let mut weights = [0.0; MAX_SLOTS];
                    let tau_star = (tau[idx] + 0.5 * dt) / dt;
                    let solid = node_weights(&view, idx, tau_star, gamma, &mut weights[..n_elem]);
                    if solid <= 0.0 {
                        return;
                    }
                    let mut u = (1.0 - solid) * m[1 + axis];
                    for (e, &b) in weights[..n_elem].iter().enumerate() {
                        u += b * view.velocity(idx, e)[axis];
                    }
                    m[1 + axis] = u;
                });
            }
        }
        Ok(())
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
                kernel: "prati_collision",
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
                let out = &mut f_stage[idx * q..(idx + 1) * q];
                let push = &mut fd[idx * n_elem * dim..(idx + 1) * n_elem * dim];
                push.fill(0.0);
                if NodeType::from_i32(node_type[idx]) == NodeType::Solid {
                    out.copy_from_slice(fc);
                    return;
                }
                let omega = relaxation_factor(tau[idx], dt);
                for i in 0..q {
                    out[i] = fc[i] - omega * (fc[i] - feq[idx * q + i]) + tau[idx] * omega * force[idx * q + i];
                }
                let solid = node_weights(&view, idx, 1.0 / omega, gamma, &mut weights);
                if solid <= 0.0 {
                    return;
                }
                let (rho, _) = node_macro(macro_vars, nm, dim, idx);
                let (_, u_raw) = lat.moments(fc);
                for (e, &b) in weights.iter().enumerate() {
                    if b <= 0.0 {
                        continue;
                    }
                    let us = view.velocity(idx, e);
                    for a in 0..dim {
                        push[e * dim + a] = -omega * b * rho * (us[a] - u_raw[a]);
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
