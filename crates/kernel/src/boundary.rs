//! Domain and embedded boundary conditions.
//!
//! After streaming, populations arriving at a node from outside the block
//! (its *unknowns*) are stale. Each [`BoundaryDefinition`] assigns a
//! [`BoundaryScheme`] to a node range of one block and component; the
//! dispatcher rebuilds the unknowns there and touches nothing else.
//!
//! Kernels gather their writes before applying them, so neighbour reads are
//! never affected by writes of the same launch.

use serde::{Deserialize, Serialize};

use crate::block::{Block, BoundarySurface, IterRange};
use crate::component::Component;
use crate::engine::{Access, Executor, LoopArg, LoopRecord};
use crate::error::{KernelError, KernelResult};
use crate::lattice::{Lattice, CS2, MAX_Q};
use crate::registry::{ComponentFields, NodeType};
use crate::Real;

/// Boundary schemes understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryScheme {
    /// Equilibrium diffuse reflection with a mass-balanced wall density.
    EqmDiffuseRefl,
    /// Pressure outlet, first-order extrapolation from the inward neighbour.
    ExtrapolPressure1st,
    /// Pressure outlet, second-order extrapolation from two inward neighbours.
    ExtrapolPressure2nd,
    /// Velocity boundary by non-equilibrium extrapolation.
    NonEqExtrapol,
    /// Pressure boundary by non-equilibrium extrapolation.
    NonEqExtrapolPressure,
    /// Half-way bounce-back with optional wall motion.
    BounceBack,
    /// Prescribed velocity through non-equilibrium bounce-back.
    ZouHeVelocity,
    /// Kinetic diffuse wall; identical to [`BoundaryScheme::EqmDiffuseRefl`].
    KineticDiffuseWall,
    /// Zero-gradient outflow.
    FreeFlux,
    /// Unknowns taken from the opposite side of the block.
    Periodic,
    /// Retired or unrecognised scheme; dispatch does nothing.
    #[serde(other)]
    Disabled,
}

/// Prescribed macroscopic values at a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GivenVars {
    /// Density.
    pub rho: Real,
    /// Velocity, lattice units.
    pub velocity: [Real; 3],
}

impl Default for GivenVars {
    fn default() -> Self {
        Self {
            rho: 1.0,
            velocity: [0.0; 3],
        }
    }
}

/// A boundary scheme bound to a node range.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryDefinition {
    /// Block id.
    pub block: usize,
    /// Component id.
    pub component: usize,
    /// Face the range lies on, if it is a face.
    pub surface: Option<BoundarySurface>,
    /// Scheme applied.
    pub scheme: BoundaryScheme,
    /// Prescribed values.
    pub given: GivenVars,
    /// Nodes the scheme covers.
    pub range: IterRange,
}

impl BoundaryDefinition {
    /// Bind `scheme` to a whole face of `block`.
    pub fn on_surface(
        block: &Block,
        component: usize,
        surface: BoundarySurface,
        scheme: BoundaryScheme,
        given: GivenVars,
    ) -> KernelResult<Self> {
        Ok(Self {
            block: block.id,
            component,
            surface: Some(surface),
            scheme,
            given,
            range: block.surface_range(surface)?,
        })
    }

    /// Bind `scheme` to an explicit range of `block`.
    ///
    /// Nodes of the range not lying on the block's outer layer are skipped
    /// by the kernels, having no outward normal.
    pub fn on_range(
        block: &Block,
        component: usize,
        range: IterRange,
        scheme: BoundaryScheme,
        given: GivenVars,
    ) -> KernelResult<Self> {
        if range.intersect(&block.whole_range()) != Some(range) {
            return Err(KernelError::Invalid(format!(
                "boundary range {range:?} exceeds block '{}'",
                block.name
            )));
        }
        Ok(Self {
            block: block.id,
            component,
            surface: None,
            scheme,
            given,
            range,
        })
    }

    fn normal(&self, block: &Block, ijk: [usize; 3]) -> [i32; 3] {
        match self.surface {
            Some(s) => s.normal(),
            None => block.composite_normal(ijk),
        }
    }
}

#[inline]
fn dot(c: [i32; 3], n: [i32; 3]) -> i32 {
    c[0] * n[0] + c[1] * n[1] + c[2] * n[2]
}

#[inline]
fn neg(c: [i32; 3]) -> [i32; 3] {
    [-c[0], -c[1], -c[2]]
}

#[inline]
fn scale(c: [i32; 3], s: i32) -> [i32; 3] {
    [c[0] * s, c[1] * s, c[2] * s]
}

/// Whether direction `i` arrives at `ijk` from outside the block.
#[inline]
fn is_unknown(lat: &Lattice, block: &Block, ijk: [usize; 3], i: usize) -> bool {
    block.offset(ijk, neg(lat.c(i))).is_none()
}

struct Ctx<'a> {
    lat: Lattice,
    q: usize,
    block: &'a Block,
    f: &'a [Real],
    f_stage: &'a [Real],
}

impl Ctx<'_> {
    fn node(&self, ijk: [usize; 3]) -> &[Real] {
        let idx = self.block.index(ijk);
        &self.f[idx * self.q..(idx + 1) * self.q]
    }
}

/// Apply one boundary definition.
pub fn apply_boundary(
    exec: &Executor,
    block: &Block,
    component: &Component,
    def: &BoundaryDefinition,
    fields: &mut ComponentFields,
) -> KernelResult<()> {
    if def.scheme == BoundaryScheme::Disabled {
        tracing::warn!(
            block = def.block,
            component = def.component,
            "boundary scheme is disabled; nothing applied"
        );
        return Ok(());
    }
    let lat = component.lattice;
    let q = lat.q();
    exec.launch(LoopRecord {
        kernel: kernel_name(def.scheme),
        block: block.id,
        range: def.range,
        args: vec![
            LoopArg::dat("f", q, Access::ReadWrite),
            LoopArg::dat("f_stage", q, Access::Read),
            LoopArg::dat("node_type", 1, Access::Read),
            LoopArg::gbl("given", 4, Access::Read),
        ],
    });
    let node_type = fields.node_type.block(block.id)?;
    let f_stage = fields.f_stage.block(block.id)?;
    let f = fields.f.block(block.id)?;
    let ctx = Ctx {
        lat,
        q,
        block,
        f,
        f_stage,
    };
    let mut writes: Vec<(usize, Real)> = Vec::new();
    for ijk in def.range.iter() {
        let idx = block.index(ijk);
        if NodeType::from_i32(node_type[idx]) == NodeType::Solid {
            continue;
        }
        let n = def.normal(block, ijk);
        if n == [0; 3] {
            continue;
        }
        let base = idx * q;
        let mut put = |i: usize, v: Real| writes.push((base + i, v));
        match def.scheme {
            BoundaryScheme::EqmDiffuseRefl | BoundaryScheme::KineticDiffuseWall => {
                diffuse_reflection(&ctx, ijk, n, &def.given, &mut put)
            }
            BoundaryScheme::BounceBack => bounce_back(&ctx, ijk, &def.given, &mut put),
            BoundaryScheme::ZouHeVelocity => nonequilibrium_bounce_back(&ctx, ijk, n, &def.given, &mut put),
            BoundaryScheme::ExtrapolPressure1st => extrapolate_pressure(&ctx, ijk, n, &def.given, false, &mut put),
            BoundaryScheme::ExtrapolPressure2nd => extrapolate_pressure(&ctx, ijk, n, &def.given, true, &mut put),
            BoundaryScheme::NonEqExtrapol => nonequilibrium_extrapolation(&ctx, ijk, n, &def.given, false, &mut put),
            BoundaryScheme::NonEqExtrapolPressure => {
                nonequilibrium_extrapolation(&ctx, ijk, n, &def.given, true, &mut put)
            }
            BoundaryScheme::FreeFlux => free_flux(&ctx, ijk, n, &mut put),
            BoundaryScheme::Periodic => periodic(&ctx, ijk, &mut put),
            BoundaryScheme::Disabled => {}
        }
    }
    let f = fields.f.block_mut(block.id)?;
    for (at, v) in writes {
        f[at] = v;
    }
    Ok(())
}

fn kernel_name(scheme: BoundaryScheme) -> &'static str {
    match scheme {
        BoundaryScheme::EqmDiffuseRefl | BoundaryScheme::KineticDiffuseWall => "boundary_eqm_diffuse_refl",
        BoundaryScheme::ExtrapolPressure1st => "boundary_extrapol_pressure_1st",
        BoundaryScheme::ExtrapolPressure2nd => "boundary_extrapol_pressure_2nd",
        BoundaryScheme::NonEqExtrapol => "boundary_noneq_extrapol",
        BoundaryScheme::NonEqExtrapolPressure => "boundary_noneq_extrapol_pressure",
        BoundaryScheme::BounceBack => "boundary_bounce_back",
        BoundaryScheme::ZouHeVelocity => "boundary_zou_he_velocity",
        BoundaryScheme::FreeFlux => "boundary_free_flux",
        BoundaryScheme::Periodic => "boundary_periodic",
        BoundaryScheme::Disabled => "boundary_disabled",
    }
}

fn diffuse_reflection(ctx: &Ctx<'_>, ijk: [usize; 3], n: [i32; 3], given: &GivenVars, put: &mut impl FnMut(usize, Real)) {
    let f = ctx.node(ijk);
    // Balance over the directions entering through the wall, each against
    // its mirror leaving through it.
    let mut outgoing = 0.0;
    let mut incoming = 0.0;
    for i in 0..ctx.q {
        let cn = dot(ctx.lat.c(i), n);
        if cn < 0 && is_unknown(&ctx.lat, ctx.block, ijk, i) {
            outgoing += f[ctx.lat.opposite(i)] * (-cn) as Real;
            incoming += ctx.lat.equilibrium_i(i, 1.0, given.velocity) * (-cn) as Real;
        }
    }
    if incoming <= Real::EPSILON {
        return;
    }
    let rho_wall = outgoing / incoming;
    for i in 0..ctx.q {
        if is_unknown(&ctx.lat, ctx.block, ijk, i) {
            put(i, rho_wall * ctx.lat.equilibrium_i(i, 1.0, given.velocity));
        }
    }
}

fn bounce_back(ctx: &Ctx<'_>, ijk: [usize; 3], given: &GivenVars, put: &mut impl FnMut(usize, Real)) {
    let f = ctx.node(ijk);
    let u = given.velocity;
    for i in 0..ctx.q {
        if is_unknown(&ctx.lat, ctx.block, ijk, i) {
            let c = ctx.lat.cr(i);
            let cu = c[0] * u[0] + c[1] * u[1] + c[2] * u[2];
            put(i, f[ctx.lat.opposite(i)] + 2.0 * ctx.lat.w(i) * given.rho * cu / CS2);
        }
    }
}

fn nonequilibrium_bounce_back(
    ctx: &Ctx<'_>,
    ijk: [usize; 3],
    n: [i32; 3],
    given: &GivenVars,
    put: &mut impl FnMut(usize, Real),
) {
    let f = ctx.node(ijk);
    let u = given.velocity;
    let flat = n.iter().filter(|&&v| v != 0).count() == 1;
    let rho = if flat {
        let mut parallel = 0.0;
        let mut outgoing = 0.0;
        for i in 0..ctx.q {
            match dot(ctx.lat.c(i), n) {
                0 => parallel += f[i],
                cn if cn > 0 => outgoing += f[i],
                _ => {}
            }
        }
        let un = u[0] * n[0] as Real + u[1] * n[1] as Real + u[2] * n[2] as Real;
        (parallel + 2.0 * outgoing) / (1.0 + un)
    } else {
        match ctx.block.offset(ijk, neg(n)) {
            Some(nb) => ctx.lat.moments(ctx.node(nb)).0,
            None => given.rho,
        }
    };
    let mut g = [0.0; MAX_Q];
    let mut unknown = [false; MAX_Q];
    g[..ctx.q].copy_from_slice(f);
    for i in 0..ctx.q {
        if is_unknown(&ctx.lat, ctx.block, ijk, i) {
            let o = ctx.lat.opposite(i);
            unknown[i] = true;
            g[i] = f[o] + ctx.lat.equilibrium_i(i, rho, u) - ctx.lat.equilibrium_i(o, rho, u);
        }
    }
    if flat {
        // Tangential momentum deficit, shared by the incoming populations
        // moving along that axis. The +/- pairs keep mass and normal
        // momentum unchanged.
        let mut m = [0.0; 3];
        for i in 0..ctx.q {
            let c = ctx.lat.cr(i);
            for a in 0..3 {
                m[a] += c[a] * g[i];
            }
        }
        for a in (0..3).filter(|&a| n[a] == 0) {
            let carriers = |i: &usize| unknown[*i] && dot(ctx.lat.c(*i), n) < 0 && ctx.lat.c(*i)[a] != 0;
            let count = (0..ctx.q).filter(carriers).count();
            if count == 0 {
                continue;
            }
            let share = (rho * u[a] - m[a]) / count as Real;
            for i in (0..ctx.q).filter(carriers) {
                g[i] += ctx.lat.c(i)[a] as Real * share;
            }
        }
    }
    for i in (0..ctx.q).filter(|&i| unknown[i]) {
        put(i, g[i]);
    }
}

fn extrapolate_pressure(
    ctx: &Ctx<'_>,
    ijk: [usize; 3],
    n: [i32; 3],
    given: &GivenVars,
    second_order: bool,
    put: &mut impl FnMut(usize, Real),
) {
    let Some(nb1) = ctx.block.offset(ijk, neg(n)) else {
        return;
    };
    let f1 = ctx.node(nb1);
    let rho1 = ctx.lat.moments(f1).0;
    let nb2 = if second_order {
        ctx.block.offset(ijk, scale(n, -2))
    } else {
        None
    };
    match nb2 {
        Some(nb2) => {
            let f2 = ctx.node(nb2);
            let rho = 2.0 * rho1 - ctx.lat.moments(f2).0;
            if rho.abs() <= Real::EPSILON {
                return;
            }
            let ratio = given.rho / rho;
            for i in 0..ctx.q {
                if is_unknown(&ctx.lat, ctx.block, ijk, i) {
                    put(i, (2.0 * f1[i] - f2[i]) * ratio);
                }
            }
        }
        None => {
            if rho1.abs() <= Real::EPSILON {
                return;
            }
            let ratio = given.rho / rho1;
            for i in 0..ctx.q {
                if is_unknown(&ctx.lat, ctx.block, ijk, i) {
                    put(i, f1[i] * ratio);
                }
            }
        }
    }
}

fn nonequilibrium_extrapolation(
    ctx: &Ctx<'_>,
    ijk: [usize; 3],
    n: [i32; 3],
    given: &GivenVars,
    pressure: bool,
    put: &mut impl FnMut(usize, Real),
) {
    let Some(nb) = ctx.block.offset(ijk, neg(n)) else {
        return;
    };
    let fnb = ctx.node(nb);
    let (rho_nb, u_nb) = ctx.lat.moments(fnb);
    let (rho, u) = if pressure {
        (given.rho, u_nb)
    } else {
        (rho_nb, given.velocity)
    };
    for i in 0..ctx.q {
        let noneq = fnb[i] - ctx.lat.equilibrium_i(i, rho_nb, u_nb);
        put(i, ctx.lat.equilibrium_i(i, rho, u) + noneq);
    }
}

fn free_flux(ctx: &Ctx<'_>, ijk: [usize; 3], n: [i32; 3], put: &mut impl FnMut(usize, Real)) {
    let Some(nb) = ctx.block.offset(ijk, neg(n)) else {
        return;
    };
    let fnb = ctx.node(nb);
    for i in 0..ctx.q {
        if is_unknown(&ctx.lat, ctx.block, ijk, i) {
            put(i, fnb[i]);
        }
    }
}

fn periodic(ctx: &Ctx<'_>, ijk: [usize; 3], put: &mut impl FnMut(usize, Real)) {
    for i in 0..ctx.q {
        if is_unknown(&ctx.lat, ctx.block, ijk, i) {
            let src = ctx.block.wrapped(ijk, neg(ctx.lat.c(i)));
            put(i, ctx.f_stage[ctx.block.index(src) * ctx.q + i]);
        }
    }
}

/// Half-way bounce-back off solid nodes inside the block.
///
/// A population streamed out of a solid node is replaced by the reflected
/// post-collision population of the receiving fluid node.
pub fn treat_embedded_boundary(
    exec: &Executor,
    block: &Block,
    component: &Component,
    fields: &mut ComponentFields,
) -> KernelResult<()> {
    let node_type = fields.node_type.block(block.id)?;
    let solid = |idx: usize| NodeType::from_i32(node_type[idx]) == NodeType::Solid;
    if !(0..block.cell_count()).any(solid) {
        return Ok(());
    }
    let lat = component.lattice;
    let q = lat.q();
    let range = block.whole_range();
    exec.launch(LoopRecord {
        kernel: "embedded_bounce_back",
        block: block.id,
        range,
        args: vec![
            LoopArg::dat("f", q, Access::ReadWrite),
            LoopArg::dat("f_stage", q, Access::Read),
            LoopArg::dat("node_type", 1, Access::Read),
        ],
    });
    let f_stage = fields.f_stage.block(block.id)?;
    let mut writes = Vec::new();
    for ijk in range.iter() {
        let idx = block.index(ijk);
        if solid(idx) {
            continue;
        }
        for i in 0..q {
            if let Some(src) = block.offset(ijk, neg(lat.c(i))) {
                if solid(block.index(src)) {
                    writes.push((idx * q + i, f_stage[idx * q + lat.opposite(i)]));
                }
            }
        }
    }
    let f = fields.f.block_mut(block.id)?;
    for (at, v) in writes {
        f[at] = v;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{BodyForceType, CollisionType, MacroVarKind, MacroVariable, RelaxationModel};
    use crate::field::StartMode;
    use crate::lattice::LatticeKind;
    use crate::registry::FieldRegistry;
    use std::collections::BTreeMap;

    fn setup(size: [usize; 3]) -> (Block, Component, ComponentFields) {
        let block = Block::new(0, "b", 2, size, 1.0, [0.0; 3]).unwrap();
        let vars = [MacroVarKind::Rho, MacroVarKind::U, MacroVarKind::V]
            .iter()
            .enumerate()
            .map(|(id, &kind)| MacroVariable {
                id,
                name: format!("m{id}"),
                kind,
            })
            .collect();
        let component = Component::new(
            0,
            "fluid",
            LatticeKind::D2Q9,
            0.6,
            vars,
            CollisionType::Bgk,
            BodyForceType::None,
            RelaxationModel::Constant,
        )
        .unwrap();
        let mut comps = BTreeMap::new();
        comps.insert(0, component.clone());
        let mut reg = FieldRegistry::create(std::slice::from_ref(&block), &comps, 2, &StartMode::Scratch).unwrap();
        let mut fields = reg.components.remove(&0).unwrap();
        let f = fields.f.block_mut(0).unwrap();
        for (k, v) in f.iter_mut().enumerate() {
            *v = 0.05 + 0.001 * (k % 17) as Real;
        }
        let stage = fields.f_stage.block_mut(0).unwrap();
        for (k, v) in stage.iter_mut().enumerate() {
            *v = 0.07 + 0.002 * (k % 13) as Real;
        }
        (block, component, fields)
    }

    #[test]
    fn kinetic_diffuse_wall_matches_diffuse_reflection() {
        let (block, comp, fields) = setup([6, 5, 1]);
        let exec = Executor::serial();
        let given = GivenVars {
            rho: 1.0,
            velocity: [0.01, 0.0, 0.0],
        };
        let mut a = fields.clone();
        let mut b = fields;
        let da = BoundaryDefinition::on_surface(&block, 0, BoundarySurface::Top, BoundaryScheme::EqmDiffuseRefl, given).unwrap();
        let db =
            BoundaryDefinition::on_surface(&block, 0, BoundarySurface::Top, BoundaryScheme::KineticDiffuseWall, given).unwrap();
        apply_boundary(&exec, &block, &comp, &da, &mut a).unwrap();
        apply_boundary(&exec, &block, &comp, &db, &mut b).unwrap();
        assert_eq!(a.f.block(0).unwrap(), b.f.block(0).unwrap());
    }

    #[test]
    fn disabled_scheme_changes_nothing() {
        let (block, comp, mut fields) = setup([4, 4, 1]);
        let before = fields.f.block(0).unwrap().to_vec();
        let def: BoundaryScheme = serde_json::from_str("\"SomeRetiredScheme\"").unwrap();
        assert_eq!(def, BoundaryScheme::Disabled);
        let d = BoundaryDefinition::on_surface(&block, 0, BoundarySurface::Left, def, GivenVars::default()).unwrap();
        apply_boundary(&Executor::serial(), &block, &comp, &d, &mut fields).unwrap();
        assert_eq!(before, fields.f.block(0).unwrap());
    }

    #[test]
    fn schemes_write_only_their_range() {
        let (block, comp, mut fields) = setup([6, 5, 1]);
        let before = fields.f.block(0).unwrap().to_vec();
        let exec = Executor::serial();
        let top = BoundaryDefinition::on_surface(
            &block,
            0,
            BoundarySurface::Top,
            BoundaryScheme::EqmDiffuseRefl,
            GivenVars {
                rho: 1.0,
                velocity: [0.01, 0.0, 0.0],
            },
        )
        .unwrap();
        apply_boundary(&exec, &block, &comp, &top, &mut fields).unwrap();
        let after = fields.f.block(0).unwrap();
        for ijk in block.whole_range().iter() {
            let idx = block.index(ijk);
            if !top.range.contains(ijk) {
                assert_eq!(&before[idx * 9..idx * 9 + 9], &after[idx * 9..idx * 9 + 9], "{ijk:?}");
            }
        }
        let idx = block.index([2, 4, 0]);
        assert_ne!(&before[idx * 9..idx * 9 + 9], &after[idx * 9..idx * 9 + 9]);
    }

    #[test]
    fn adjacent_faces_keep_their_own_schemes() {
        let (block, comp, fields) = setup([6, 5, 1]);
        let exec = Executor::serial();
        let lid = BoundaryDefinition::on_surface(
            &block,
            0,
            BoundarySurface::Top,
            BoundaryScheme::ZouHeVelocity,
            GivenVars {
                rho: 1.0,
                velocity: [0.01, 0.0, 0.0],
            },
        )
        .unwrap();
        let wall =
            BoundaryDefinition::on_surface(&block, 0, BoundarySurface::Left, BoundaryScheme::EqmDiffuseRefl, GivenVars::default())
                .unwrap();

        // The shared corner goes to the face listed first.
        let corner = [0, 4, 0];
        assert!(wall.range.contains(corner));
        assert!(!lid.range.contains(corner));

        let before = fields.f.block(0).unwrap().to_vec();
        let alone = |def: &BoundaryDefinition| {
            let mut copy = fields.clone();
            apply_boundary(&exec, &block, &comp, def, &mut copy).unwrap();
            copy.f.block(0).unwrap().to_vec()
        };
        let lid_only = alone(&lid);
        let wall_only = alone(&wall);

        let mut both = fields.clone();
        apply_boundary(&exec, &block, &comp, &wall, &mut both).unwrap();
        apply_boundary(&exec, &block, &comp, &lid, &mut both).unwrap();
        let after = both.f.block(0).unwrap();

        for ijk in block.whole_range().iter() {
            let cell = block.index(ijk) * 9..block.index(ijk) * 9 + 9;
            let expected = if lid.range.contains(ijk) {
                &lid_only[cell.clone()]
            } else if wall.range.contains(ijk) {
                &wall_only[cell.clone()]
            } else {
                &before[cell.clone()]
            };
            assert_eq!(&after[cell], expected, "{ijk:?}");
        }
        let idx = block.index(corner);
        assert_ne!(&before[idx * 9..idx * 9 + 9], &after[idx * 9..idx * 9 + 9], "corner untouched");
        let idx = block.index([2, 4, 0]);
        let (_, u) = comp.lattice.moments(&after[idx * 9..idx * 9 + 9]);
        assert!((u[0] - 0.01).abs() < 1e-13, "lid velocity {}", u[0]);
    }

    #[test]
    fn diffuse_reflection_balances_normal_flux() {
        let (block, comp, mut fields) = setup([6, 5, 1]);
        let d = BoundaryDefinition::on_surface(&block, 0, BoundarySurface::Bottom, BoundaryScheme::EqmDiffuseRefl, GivenVars::default())
            .unwrap();
        apply_boundary(&Executor::serial(), &block, &comp, &d, &mut fields).unwrap();
        let f = fields.f.block(0).unwrap();
        let idx = block.index([3, 0, 0]);
        let (_, u) = comp.lattice.moments(&f[idx * 9..idx * 9 + 9]);
        assert!(u[1].abs() < 1e-14, "normal velocity {}", u[1]);
    }

    #[test]
    fn diffuse_wall_keeps_resting_fluid_on_face_edges() {
        let block = Block::new(0, "b", 3, [4, 4, 4], 1.0, [0.0; 3]).unwrap();
        let component = Component::new(
            0,
            "fluid",
            LatticeKind::D3Q19,
            0.6,
            MacroVariable::isothermal_set(0, 3),
            CollisionType::Bgk,
            BodyForceType::None,
            RelaxationModel::Constant,
        )
        .unwrap();
        let mut comps = BTreeMap::new();
        comps.insert(0, component.clone());
        let mut reg = FieldRegistry::create(std::slice::from_ref(&block), &comps, 3, &StartMode::Scratch).unwrap();
        let mut fields = reg.components.remove(&0).unwrap();
        let lat = component.lattice;
        for node in fields.f.block_mut(0).unwrap().chunks_mut(19) {
            for (i, v) in node.iter_mut().enumerate() {
                *v = lat.equilibrium_i(i, 1.0, [0.0; 3]);
            }
        }
        let before = fields.f.block(0).unwrap().to_vec();
        let d = BoundaryDefinition::on_surface(&block, 0, BoundarySurface::Top, BoundaryScheme::EqmDiffuseRefl, GivenVars::default())
            .unwrap();
        apply_boundary(&Executor::serial(), &block, &component, &d, &mut fields).unwrap();
        let after = fields.f.block(0).unwrap();
        // Top face node on the z = 0 edge: (0, 1, 1) arrives from outside
        // but leaves through the face.
        for ijk in [[1, 3, 0], [2, 3, 1]] {
            let idx = block.index(ijk);
            for i in 0..19 {
                let (a, b) = (before[idx * 19 + i], after[idx * 19 + i]);
                assert!((a - b).abs() < 1e-15, "{ijk:?} direction {i}: {a} -> {b}");
            }
        }
    }

    #[test]
    fn zou_he_imposes_wall_velocity() {
        let (block, comp, mut fields) = setup([6, 5, 1]);
        let u = [0.02, 0.0, 0.0];
        let d = BoundaryDefinition::on_surface(
            &block,
            0,
            BoundarySurface::Top,
            BoundaryScheme::ZouHeVelocity,
            GivenVars { rho: 1.0, velocity: u },
        )
        .unwrap();
        apply_boundary(&Executor::serial(), &block, &comp, &d, &mut fields).unwrap();
        let f = fields.f.block(0).unwrap();
        let idx = block.index([2, 4, 0]);
        let (_, v) = comp.lattice.moments(&f[idx * 9..idx * 9 + 9]);
        assert!(v[1].abs() < 1e-13, "normal velocity {}", v[1]);
        assert!((v[0] - u[0]).abs() < 1e-13, "tangential velocity {} != {}", v[0], u[0]);
    }

    #[test]
    fn periodic_reads_staged_values_across_the_block() {
        let (block, comp, mut fields) = setup([4, 3, 1]);
        let d = BoundaryDefinition::on_surface(&block, 0, BoundarySurface::Left, BoundaryScheme::Periodic, GivenVars::default())
            .unwrap();
        apply_boundary(&Executor::serial(), &block, &comp, &d, &mut fields).unwrap();
        let stage = fields.f_stage.block(0).unwrap();
        let f = fields.f.block(0).unwrap();
        // +x population at (0,1) comes from (3,1)
        let dst = block.index([0, 1, 0]);
        let src = block.index([3, 1, 0]);
        assert_eq!(f[dst * 9 + 1], stage[src * 9 + 1]);
    }

    #[test]
    fn embedded_solid_reflects_post_collision_values() {
        let (block, comp, mut fields) = setup([5, 5, 1]);
        let solid = block.index([2, 2, 0]);
        fields.node_type.block_mut(0).unwrap()[solid] = NodeType::Solid as i32;
        treat_embedded_boundary(&Executor::serial(), &block, &comp, &mut fields).unwrap();
        let f = fields.f.block(0).unwrap();
        let stage = fields.f_stage.block(0).unwrap();
        // node (3,2) receives +x from the solid node, reflected from its own -x
        let idx = block.index([3, 2, 0]);
        assert_eq!(f[idx * 9 + 1], stage[idx * 9 + 3]);
    }

    #[test]
    fn ranges_outside_the_block_are_rejected() {
        let (block, _, _) = setup([4, 4, 1]);
        let r = IterRange::new([0, 0, 0], [5, 1, 1]);
        assert!(BoundaryDefinition::on_range(&block, 0, r, BoundaryScheme::BounceBack, GivenVars::default()).is_err());
    }
}
