// External-solver backend over easy-smt. Scalar integer slices are encoded in
// QF_BV, one definition per instruction with phis folded into ite chains over
// edge conditions; vectors, floats and intrinsic calls are not encodable and
// reject the candidate. Equivalence asserts disagreement of the two return
// values and reads the solver's verdict; constant synthesis runs a CEGIS loop
// between a synthesis query over the accumulated counterexamples and a
// verification query for the proposed constants. Solver I/O failure maps to
// the slow-vcgen sentinel, which abandons the slice.

use super::{Backend, Transform, VerifyError};
use crate::expr::ConstMap;
use crate::ir::analysis::Analysis;
use crate::ir::{CastOp, Constant, Function, Opcode, ValueRef};
use crate::ops::{BinOp, ICmpCond};
use easy_smt::{Context, Response, SExpr};
use std::collections::HashMap;

/// CEGIS round bound.
const MAX_REFINEMENTS: usize = 32;

pub struct SmtBackend {
    solver: String,
    args: Vec<String>,
}

impl SmtBackend {
    pub fn new(solver: &str) -> SmtBackend {
        SmtBackend::with_timeout(solver, 60)
    }

    /// Per-query timeout is passed on the command line; only z3's flag
    /// syntax is known here, other solvers run with their own defaults.
    pub fn with_timeout(solver: &str, timeout_secs: u64) -> SmtBackend {
        let mut args = vec!["-smt2".to_string(), "-in".to_string()];
        if solver.contains("z3") {
            args.push(format!("-t:{}", timeout_secs * 1000));
        }
        SmtBackend { solver: solver.to_string(), args }
    }

    fn context(&self) -> Result<Context, VerifyError> {
        easy_smt::ContextBuilder::new()
            .solver(&self.solver, self.args.iter().map(|s| s.as_str()))
            .build()
            .map_err(|e| {
                log::warn!(target: "peepopt::verify", "cannot start solver: {}", e);
                VerifyError::SlowVcgen
            })
    }
}

impl Backend for SmtBackend {
    fn equivalent(&mut self, t: &Transform<'_>) -> Result<(), VerifyError> {
        let mut ctx = self.context()?;
        let params = declare_params(&mut ctx, t.src)?;
        let src_ret = encode_function(&mut ctx, t.src, &params, "s")?;
        let tgt_ret = encode_function(&mut ctx, t.tgt, &params, "t")?;
        let distinct = ctx.not(ctx.eq(src_ret, tgt_ret));
        ctx.assert(distinct).map_err(io_err)?;
        match ctx.check().map_err(io_err)? {
            Response::Unsat => Ok(()),
            Response::Sat => Err(VerifyError::CounterExample),
            Response::Unknown => Err(VerifyError::CounterExample),
        }
    }

    fn synthesize_constants(&mut self, t: &Transform<'_>) -> Result<ConstMap, VerifyError> {
        let live = t.live_in_params();
        // Seed with the all-zero input.
        let mut cex: Vec<Vec<u64>> = vec![vec![0; live.len()]];

        for _ in 0..MAX_REFINEMENTS {
            // Synthesis: find constants agreeing on every counterexample.
            let consts = {
                let mut ctx = self.context()?;
                let mut hole_atoms = Vec::new();
                for h in &t.holes {
                    let w = hole_width(t, h.param)?;
                    let sort = ctx.bit_vec_sort(ctx.numeral(w));
                    let a = ctx
                        .declare_const(format!("c{}", h.hole), sort)
                        .map_err(io_err)?;
                    hole_atoms.push(a);
                }
                for (i, input) in cex.iter().enumerate() {
                    let params =
                        bind_params(&mut ctx, t, input, &hole_atoms, &format!("x{}", i))?;
                    let s = encode_function(&mut ctx, t.src, &params, &format!("s{}", i))?;
                    let g = encode_function(&mut ctx, t.tgt, &params, &format!("t{}", i))?;
                    let eq = ctx.eq(s, g);
                    ctx.assert(eq).map_err(io_err)?;
                }
                match ctx.check().map_err(io_err)? {
                    Response::Sat => read_values(&mut ctx, &hole_atoms)?,
                    _ => return Err(VerifyError::CounterExample),
                }
            };

            // Verification: do the proposed constants work everywhere?
            let mut ctx = self.context()?;
            let params = declare_verify_params(&mut ctx, t, &live, &consts)?;
            let s = encode_function(&mut ctx, t.src, &params, "s")?;
            let g = encode_function(&mut ctx, t.tgt, &params, "t")?;
            let distinct = ctx.not(ctx.eq(s, g));
            ctx.assert(distinct).map_err(io_err)?;
            match ctx.check().map_err(io_err)? {
                Response::Unsat => {
                    let mut map = ConstMap::new();
                    for (h, v) in t.holes.iter().zip(&consts) {
                        map.insert(h.hole, Constant::scalar(h.ty.as_scalar(), *v));
                    }
                    return Ok(map);
                }
                Response::Sat => {
                    let live_atoms: Vec<SExpr> =
                        live.iter().map(|i| params[*i]).collect();
                    let vals = read_values(&mut ctx, &live_atoms)?;
                    if cex.contains(&vals) {
                        return Err(VerifyError::CounterExample);
                    }
                    cex.push(vals);
                }
                Response::Unknown => return Err(VerifyError::CounterExample),
            }
        }
        Err(VerifyError::CounterExample)
    }
}

fn io_err(e: std::io::Error) -> VerifyError {
    log::warn!(target: "peepopt::verify", "solver i/o failure: {}", e);
    VerifyError::SlowVcgen
}

fn scalar_width(f: &Function, v: ValueRef) -> Result<u32, VerifyError> {
    let ty = f.value_type(v);
    if ty.is_fp() || ty.lane() != 1 || ty.bits() > 64 {
        return Err(VerifyError::TypeError(format!("{} is not bit-vector encodable", ty)));
    }
    Ok(ty.bits())
}

fn hole_width(t: &Transform<'_>, param: u32) -> Result<usize, VerifyError> {
    let ty = t.tgt.params[param as usize].ty;
    if ty.is_fp() || ty.lane() != 1 || ty.bits() > 64 {
        return Err(VerifyError::TypeError(format!("hole type {} not encodable", ty)));
    }
    Ok(ty.bits() as usize)
}

fn declare_params(ctx: &mut Context, f: &Function) -> Result<Vec<SExpr>, VerifyError> {
    let mut out = Vec::new();
    for (i, p) in f.params.iter().enumerate() {
        if p.ty.is_fp() || p.ty.lane() != 1 || p.ty.bits() > 64 {
            return Err(VerifyError::TypeError(format!(
                "parameter type {} not encodable",
                p.ty
            )));
        }
        let sort = ctx.bit_vec_sort(ctx.numeral(p.ty.bits() as usize));
        let a = ctx.declare_const(format!("p{}", i), sort).map_err(io_err)?;
        out.push(a);
    }
    Ok(out)
}

/// Parameters for a synthesis round: live-ins pinned to the counterexample,
/// holes bound to the shared hole atoms.
fn bind_params(
    ctx: &mut Context,
    t: &Transform<'_>,
    input: &[u64],
    hole_atoms: &[SExpr],
    _tag: &str,
) -> Result<Vec<SExpr>, VerifyError> {
    let live = t.live_in_params();
    let mut out = vec![None; t.src.params.len()];
    for (h, a) in t.holes.iter().zip(hole_atoms) {
        out[h.param as usize] = Some(*a);
    }
    for (pos, v) in live.iter().zip(input) {
        let w = t.src.params[*pos].ty.bits();
        out[*pos] = Some(bv_literal(ctx, *v, w));
    }
    Ok(out.into_iter().map(|o| o.expect("parameter bound")).collect())
}

/// Parameters for a verification round: live-ins free, holes pinned.
fn declare_verify_params(
    ctx: &mut Context,
    t: &Transform<'_>,
    live: &[usize],
    consts: &[u64],
) -> Result<Vec<SExpr>, VerifyError> {
    let mut out = vec![None; t.src.params.len()];
    for (h, v) in t.holes.iter().zip(consts) {
        let w = t.tgt.params[h.param as usize].ty.bits();
        out[h.param as usize] = Some(bv_literal(ctx, *v, w));
    }
    for pos in live {
        let w = t.src.params[*pos].ty.bits();
        let sort = ctx.bit_vec_sort(ctx.numeral(w as usize));
        let a = ctx.declare_const(format!("p{}", pos), sort).map_err(io_err)?;
        out[*pos] = Some(a);
    }
    Ok(out.into_iter().map(|o| o.expect("parameter bound")).collect())
}

fn bv_literal(ctx: &Context, v: u64, width: u32) -> SExpr {
    let v = crate::ir::mask_to(v, width);
    ctx.list(vec![
        ctx.atoms().und,
        ctx.atom(format!("bv{}", v)),
        ctx.numeral(width as usize),
    ])
}

fn read_values(ctx: &mut Context, atoms: &[SExpr]) -> Result<Vec<u64>, VerifyError> {
    if atoms.is_empty() {
        return Ok(Vec::new());
    }
    let sol = ctx.get_value(atoms.to_vec()).map_err(io_err)?;
    let mut out = Vec::new();
    for (_, value) in sol {
        out.push(parse_bv(&ctx.display(value).to_string())?);
    }
    Ok(out)
}

fn parse_bv(s: &str) -> Result<u64, VerifyError> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("#x") {
        return u64::from_str_radix(hex, 16)
            .map_err(|e| VerifyError::TypeError(format!("bad bv value '{}': {}", s, e)));
    }
    if let Some(bin) = s.strip_prefix("#b") {
        return u64::from_str_radix(bin, 2)
            .map_err(|e| VerifyError::TypeError(format!("bad bv value '{}': {}", s, e)));
    }
    // `(_ bvN W)` form.
    if let Some(rest) = s.strip_prefix("(_ bv") {
        if let Some(num) = rest.split_whitespace().next() {
            return num
                .parse::<u64>()
                .map_err(|e| VerifyError::TypeError(format!("bad bv value '{}': {}", s, e)));
        }
    }
    Err(VerifyError::TypeError(format!("unparseable bv value '{}'", s)))
}

/// Encode every instruction of `f` as a bit-vector term; returns the term of
/// the unique return value. `tag` keeps fresh-variable names distinct across
/// encodings in one context.
fn encode_function(
    ctx: &mut Context,
    f: &Function,
    params: &[SExpr],
    tag: &str,
) -> Result<SExpr, VerifyError> {
    let ret = f
        .unique_return()
        .ok_or_else(|| VerifyError::TypeError("no unique return".into()))?;

    let analysis = Analysis::new(f);
    let mut defs: HashMap<u32, SExpr> = HashMap::new();
    let mut fresh = 0u32;

    // Edge condition: the branch condition under which `from` transfers to
    // `to`. Path conditions are not tracked (pure dataflow), only phis need
    // the edge tests.
    let mut edge_cond = |ctx: &mut Context,
                         defs: &HashMap<u32, SExpr>,
                         from: crate::ir::BlockId,
                         to: crate::ir::BlockId|
     -> Result<SExpr, VerifyError> {
        let term = f.terminator(from).ok_or_else(|| {
            VerifyError::TypeError("block without terminator".into())
        })?;
        let inst = f.inst(term);
        match inst.op {
            Opcode::Br => Ok(ctx.true_()),
            Opcode::CondBr => {
                let c = value_expr(ctx, f, params, defs, inst.args[0])?;
                let is_true = ctx.eq(c, bv_literal(ctx, 1, 1));
                if inst.blocks[0] == to {
                    Ok(is_true)
                } else {
                    Ok(ctx.not(is_true))
                }
            }
            _ => Err(VerifyError::TypeError("unencodable terminator".into())),
        }
    };

    for b in analysis.rpo().to_vec() {
        let ids = f.blocks[b.0 as usize].insts.clone();
        for id in ids {
            let inst = f.inst(id).clone();
            if inst.is_terminator() {
                continue;
            }
            let w = inst.ty.bits();
            if inst.ty.is_fp() || inst.ty.lane() != 1 || w > 64 {
                return Err(VerifyError::TypeError(format!(
                    "{} result not encodable",
                    inst.ty
                )));
            }
            let e = match &inst.op {
                Opcode::Phi => {
                    // Right fold of incomings as ite over edge conditions.
                    let mut acc: Option<SExpr> = None;
                    for (v, from) in inst.args.iter().zip(&inst.blocks).rev() {
                        let val = value_expr(ctx, f, params, &defs, *v)?;
                        acc = Some(match acc {
                            None => val,
                            Some(rest) => {
                                let c = edge_cond(ctx, &defs, *from, b)?;
                                ctx.ite(c, val, rest)
                            }
                        });
                    }
                    acc.ok_or_else(|| VerifyError::TypeError("empty phi".into()))?
                }
                Opcode::Bin(op) => {
                    let a = value_expr(ctx, f, params, &defs, inst.args[0])?;
                    let bb = value_expr(ctx, f, params, &defs, inst.args[1])?;
                    encode_bin(ctx, *op, a, bb, w, tag, &mut fresh)?
                }
                Opcode::ICmp(cond) => {
                    let a = value_expr(ctx, f, params, &defs, inst.args[0])?;
                    let bb = value_expr(ctx, f, params, &defs, inst.args[1])?;
                    let c = encode_icmp(ctx, *cond, a, bb);
                    ctx.ite(c, bv_literal(ctx, 1, 1), bv_literal(ctx, 0, 1))
                }
                Opcode::Cast(op) => {
                    let from_w = scalar_width(f, inst.args[0])?;
                    let a = value_expr(ctx, f, params, &defs, inst.args[0])?;
                    match op {
                        CastOp::Zext => extend(ctx, "zero_extend", a, w - from_w),
                        CastOp::Sext => extend(ctx, "sign_extend", a, w - from_w),
                        CastOp::Trunc => ctx.extract((w - 1) as i32, 0, a),
                        CastOp::Bitcast if from_w == w => a,
                        _ => {
                            return Err(VerifyError::TypeError(format!(
                                "cast {} not encodable",
                                op.name()
                            )))
                        }
                    }
                }
                Opcode::Select => {
                    let c = value_expr(ctx, f, params, &defs, inst.args[0])?;
                    let a = value_expr(ctx, f, params, &defs, inst.args[1])?;
                    let bb = value_expr(ctx, f, params, &defs, inst.args[2])?;
                    let is_true = ctx.eq(c, bv_literal(ctx, 1, 1));
                    ctx.ite(is_true, a, bb)
                }
                _ => {
                    return Err(VerifyError::TypeError(format!(
                        "instruction '{}' not encodable",
                        inst.op.name()
                    )))
                }
            };
            defs.insert(id.0, e);
        }
    }

    value_expr(ctx, f, params, &defs, f.inst(ret).args[0])
}

fn value_expr(
    ctx: &mut Context,
    f: &Function,
    params: &[SExpr],
    defs: &HashMap<u32, SExpr>,
    v: ValueRef,
) -> Result<SExpr, VerifyError> {
    match v {
        ValueRef::Param(i) => Ok(params[i as usize]),
        ValueRef::Inst(i) => defs
            .get(&i.0)
            .copied()
            .ok_or_else(|| VerifyError::TypeError("use before definition".into())),
        ValueRef::Const(c) => {
            let cst = f.constant(c);
            let w = scalar_width(f, v)?;
            if cst.is_poison() {
                return Err(VerifyError::TypeError("poison constant not encodable".into()));
            }
            Ok(bv_literal(ctx, cst.lane(0), w))
        }
    }
}

fn extend(ctx: &Context, op: &str, a: SExpr, delta: u32) -> SExpr {
    ctx.list(vec![
        ctx.list(vec![ctx.atoms().und, ctx.atom(op), ctx.numeral(delta as usize)]),
        a,
    ])
}

fn encode_bin(
    ctx: &mut Context,
    op: BinOp,
    a: SExpr,
    b: SExpr,
    width: u32,
    tag: &str,
    fresh: &mut u32,
) -> Result<SExpr, VerifyError> {
    fn simple(ctx: &Context, name: &str, a: SExpr, b: SExpr) -> SExpr {
        ctx.list(vec![ctx.atom(name), a, b])
    }
    let e = match op {
        BinOp::And => simple(ctx, "bvand", a, b),
        BinOp::Or => simple(ctx, "bvor", a, b),
        BinOp::Xor => simple(ctx, "bvxor", a, b),
        BinOp::Add => simple(ctx, "bvadd", a, b),
        BinOp::Sub => simple(ctx, "bvsub", a, b),
        BinOp::Mul => simple(ctx, "bvmul", a, b),
        BinOp::Shl | BinOp::LShr | BinOp::AShr => {
            // Out-of-range shifts are poison; model them as an unconstrained
            // value so no candidate may rely on them.
            let name = match op {
                BinOp::Shl => "bvshl",
                BinOp::LShr => "bvlshr",
                _ => "bvashr",
            };
            let shifted = ctx.list(vec![ctx.atom(name), a, b]);
            let sort = ctx.bit_vec_sort(ctx.numeral(width as usize));
            let u = ctx
                .declare_const(format!("fresh_{}_{}", tag, fresh), sort)
                .map_err(io_err)?;
            *fresh += 1;
            let in_range = ctx.list(vec![ctx.atom("bvult"), b, bv_literal(ctx, width as u64, width)]);
            ctx.ite(in_range, shifted, u)
        }
        BinOp::UDiv | BinOp::SDiv => {
            let name = if matches!(op, BinOp::UDiv) { "bvudiv" } else { "bvsdiv" };
            let divided = ctx.list(vec![ctx.atom(name), a, b]);
            let sort = ctx.bit_vec_sort(ctx.numeral(width as usize));
            let u = ctx
                .declare_const(format!("fresh_{}_{}", tag, fresh), sort)
                .map_err(io_err)?;
            *fresh += 1;
            let zero = bv_literal(ctx, 0, width);
            let is_zero = ctx.eq(b, zero);
            ctx.ite(is_zero, u, divided)
        }
        BinOp::UMax => cmp_select(ctx, "bvuge", a, b),
        BinOp::UMin => cmp_select(ctx, "bvule", a, b),
        BinOp::SMax => cmp_select(ctx, "bvsge", a, b),
        BinOp::SMin => cmp_select(ctx, "bvsle", a, b),
        _ => return Err(VerifyError::TypeError(format!("fp op '{}' not encodable", op.name()))),
    };
    Ok(e)
}

fn cmp_select(ctx: &Context, rel: &str, a: SExpr, b: SExpr) -> SExpr {
    let c = ctx.list(vec![ctx.atom(rel), a, b]);
    ctx.ite(c, a, b)
}

fn encode_icmp(ctx: &Context, cond: ICmpCond, a: SExpr, b: SExpr) -> SExpr {
    match cond {
        ICmpCond::Eq => ctx.eq(a, b),
        ICmpCond::Ne => ctx.not(ctx.eq(a, b)),
        ICmpCond::Ult => ctx.list(vec![ctx.atom("bvult"), a, b]),
        ICmpCond::Ule => ctx.list(vec![ctx.atom("bvule"), a, b]),
        ICmpCond::Ugt => ctx.list(vec![ctx.atom("bvugt"), a, b]),
        ICmpCond::Uge => ctx.list(vec![ctx.atom("bvuge"), a, b]),
        ICmpCond::Slt => ctx.list(vec![ctx.atom("bvslt"), a, b]),
        ICmpCond::Sle => ctx.list(vec![ctx.atom("bvsle"), a, b]),
        ICmpCond::Sgt => ctx.list(vec![ctx.atom("bvsgt"), a, b]),
        ICmpCond::Sge => ctx.list(vec![ctx.atom("bvsge"), a, b]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_solver_value_forms() {
        assert_eq!(parse_bv("#x2a").unwrap(), 42);
        assert_eq!(parse_bv("#b1010").unwrap(), 10);
        assert_eq!(parse_bv("(_ bv42 32)").unwrap(), 42);
        assert!(parse_bv("garbage").is_err());
    }
}
