// Sketch enumeration and the candidate loop. Given a slice, this produces the
// fixed sequence of well-typed sketches, materializes each into a candidate
// function, prunes by well-formedness, approximate cost and known bits, then
// verifies survivors in ascending approximate-cost order until one wins.
// Generation is deterministic: live-ins are collected in parameter order then
// layout order, and every category iterates in a fixed sequence.

use crate::codegen::CodeGen;
use crate::config::Config;
use crate::cost::{approx_cost, machine_cost};
use crate::expr::parser::LiveIns;
use crate::expr::{ConstMap, Expr, ExprArena, ExprRef, Rewrite, Sketch};
use crate::intrinsics;
use crate::ir::analysis::Analysis;
use crate::ir::knownbits::{known_bits_of_return, KnownBits};
use crate::ir::verifier::verify_function;
use crate::ir::{Function, InstId, Module, ValueRef};
use crate::ops::{BinOp, FCmpCond, ICmpCond, IntConvOp, UnOp};
use crate::slice::Slice;
use crate::types::{integer_vector_types, shuffle_work_types, workty, Type};
use crate::verify::{Backend, HoleParam, Transform, VerifyError};
use std::collections::HashMap;
use std::time::Instant;

/// Counters reported after each slice.
#[derive(Debug, Default, Clone)]
pub struct SynthesisStats {
    pub candidates: usize,
    pub pruned: usize,
    pub good: usize,
    pub type_errors: usize,
}

/// A live-in usable as a sketch operand.
#[derive(Clone, Copy)]
struct LiveIn<'a> {
    var: ExprRef<'a>,
    ty: Type,
}

/// Operand slot during enumeration: a live-in or the shared hole marker.
#[derive(Clone, Copy)]
enum Comp<'a> {
    Var(LiveIn<'a>),
    Rc(u8),
}

impl<'a> Comp<'a> {
    fn is_rc(&self) -> bool {
        matches!(self, Comp::Rc(_))
    }

    fn ty(&self) -> Type {
        match self {
            Comp::Var(v) => v.ty,
            Comp::Rc(_) => Type::null(),
        }
    }
}

pub struct Enumerator<'a, 'c> {
    arena: &'a ExprArena,
    config: &'c Config,
}

impl<'a, 'c> Enumerator<'a, 'c> {
    pub fn new(arena: &'a ExprArena, config: &'c Config) -> Enumerator<'a, 'c> {
        Enumerator { arena, config }
    }

    /// Run the full pipeline on one slice; returns verified rewrites sorted
    /// by machine cost and the run statistics.
    pub fn solve(
        &self,
        slice: &Slice,
        backend: &mut dyn Backend,
        deadline: Option<Instant>,
    ) -> (Vec<Rewrite<'a>>, SynthesisStats) {
        let mut stats = SynthesisStats::default();
        let func = slice.function();
        let root = slice.root;
        let expected = func.inst(root).ty;

        log::debug!(target: "peepopt::enum", "working on slice\n{}", slice.module);

        let src_cost = approx_cost(func);
        let cost_before = machine_cost(&slice.module, func);
        let known_src = known_bits_of_return(func);

        let live_ins = self.find_inputs(func, root);
        let sketches = self.sketches(expected, &live_ins);
        log::debug!(target: "peepopt::enum", "{} sketches enumerated", sketches.len());

        // Sketches -> pruned candidate functions.
        struct Candidate<'a> {
            sketch: Sketch<'a>,
            holes: Vec<(u32, Type)>,
            tgt_module: Module,
            src_module: Module,
            cost: u64,
        }
        let mut survivors: Vec<Candidate<'a>> = Vec::new();
        for sketch in sketches {
            stats.candidates += 1;
            let holes = sketch.holes();
            let (tgt_module, _) = self.materialize(slice, sketch.root, &holes, None);
            let tgt = &tgt_module.functions[0];

            if let Err(e) = verify_function(&tgt_module, tgt) {
                log::debug!(target: "peepopt::enum", "ill-formed candidate dropped: {}", e);
                stats.pruned += 1;
                continue;
            }
            let cost = approx_cost(tgt);
            if cost >= src_cost {
                stats.pruned += 1;
                continue;
            }
            if let Some(ks) = known_src {
                if let Some(kt) = known_bits_of_return(tgt) {
                    if KnownBits::conflicts(ks, kt) {
                        stats.pruned += 1;
                        continue;
                    }
                }
            }

            let src_module = if holes.is_empty() {
                slice.module.clone()
            } else {
                // Source twin with the hole parameters appended unused.
                let mut m = slice.module.clone();
                for (hole, ty) in &holes {
                    let name = format!("_reservedc_{}", hole);
                    m.functions[0].add_param(&name, *ty);
                }
                m
            };
            survivors.push(Candidate { sketch, holes, tgt_module, src_module, cost });
        }

        survivors.sort_by_key(|c| c.cost);

        let mut rewrites: Vec<Rewrite<'a>> = Vec::new();
        for cand in survivors {
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    log::debug!(target: "peepopt::enum", "slice budget exhausted");
                    break;
                }
            }

            let hole_params: Vec<HoleParam> = cand
                .holes
                .iter()
                .enumerate()
                .map(|(i, (hole, ty))| HoleParam {
                    hole: *hole,
                    param: (slice.function().params.len() + i) as u32,
                    ty: *ty,
                })
                .collect();
            let transform = match Transform::new(&cand.src_module, &cand.tgt_module, hole_params) {
                Ok(t) => t,
                Err(VerifyError::TypeError(msg)) => {
                    log::debug!(target: "peepopt::enum", "transform type error: {}", msg);
                    stats.type_errors += 1;
                    continue;
                }
                Err(_) => continue,
            };

            let verdict: Result<ConstMap, VerifyError> = if cand.holes.is_empty() {
                backend.equivalent(&transform).map(|()| ConstMap::new())
            } else {
                backend.synthesize_constants(&transform)
            };

            let consts = match verdict {
                Ok(c) => c,
                Err(VerifyError::CounterExample) => continue,
                Err(VerifyError::SlowVcgen) => {
                    log::debug!(target: "peepopt::enum", "slow vcgen, abandoning slice");
                    return (rewrites, stats);
                }
                Err(VerifyError::TypeError(msg)) => {
                    log::debug!(target: "peepopt::enum", "verifier type error: {}", msg);
                    stats.type_errors += 1;
                    continue;
                }
            };
            stats.good += 1;

            // Re-materialize with the resolved constants: opaque shuffles
            // become native instructions, and the machine cost is measured on
            // what would actually be emitted.
            let (final_module, _) =
                self.materialize(slice, cand.sketch.root, &cand.holes, Some(&consts));
            let cost_after = machine_cost(&final_module, &final_module.functions[0]);

            let gate_passed = match (cost_after, cost_before) {
                (Some(after), Some(before)) => {
                    self.config.ignore_machine_cost || after < before
                }
                // An unavailable measurement disables the gate.
                _ => true,
            };
            if !gate_passed {
                log::debug!(
                    target: "peepopt::enum",
                    "verified rewrite is not cheaper on the machine ({}>= {:?})",
                    cost_after.unwrap_or(0),
                    cost_before
                );
                continue;
            }

            rewrites.push(Rewrite {
                root: cand.sketch.root,
                consts,
                cost_after: cost_after.unwrap_or(cand.cost),
                cost_before: cost_before.unwrap_or(src_cost),
            });

            if self.config.return_first_solution {
                break;
            }
        }

        rewrites.sort_by_key(|r| r.cost_after);
        log::debug!(
            target: "peepopt::enum",
            "#candidates = {}, #pruned = {}, #good = {}",
            stats.candidates, stats.pruned, stats.good
        );
        (rewrites, stats)
    }

    /// Build the candidate function for a sketch: a clone of the slice with
    /// one extra parameter per unresolved hole and the tree materialized over
    /// the root.
    fn materialize(
        &self,
        slice: &Slice,
        root_expr: ExprRef<'a>,
        holes: &[(u32, Type)],
        consts: Option<&ConstMap>,
    ) -> (Module, HashMap<u32, u32>) {
        let mut module = slice.module.clone();
        let mut func = module.functions.remove(0);
        let mut hole_params: HashMap<u32, u32> = HashMap::new();
        let empty = ConstMap::new();
        let consts = consts.unwrap_or(&empty);
        for (hole, ty) in holes {
            if consts.contains_key(hole) {
                continue;
            }
            let idx = func.params.len() as u32;
            func.add_param(&format!("_reservedc_{}", hole), *ty);
            hole_params.insert(*hole, idx);
        }
        let gen = CodeGen::new(&mut func, &mut module, &hole_params, consts, None);
        gen.materialize(root_expr, slice.root);
        func.eliminate_dead_code();
        module.functions.insert(0, func);
        (module, hole_params)
    }

    /// Live-ins: every parameter, then every dominating instruction of
    /// integer or IEEE floating-point shape, in layout order.
    fn find_inputs(&self, func: &Function, root: InstId) -> Vec<LiveIn<'a>> {
        let analysis = Analysis::new(func);
        let mut out = Vec::new();
        for (i, p) in func.params.iter().enumerate() {
            out.push(LiveIn {
                var: self.arena.var(&p.name, ValueRef::Param(i as u32), p.ty),
                ty: p.ty,
            });
        }
        for id in func.inst_ids_in_layout() {
            if id == root {
                continue;
            }
            let inst = func.inst(id);
            if !inst.op.has_result() || !inst.ty.is_valid() {
                continue;
            }
            if !analysis.dominates(ValueRef::Inst(id), root) {
                continue;
            }
            out.push(LiveIn {
                var: self.arena.var(&format!("t{}", id.0), ValueRef::Inst(id), inst.ty),
                ty: inst.ty,
            });
        }
        out
    }

    /// The fixed sketch sequence for one result type.
    fn sketches(&self, expected: Type, live_ins: &[LiveIn<'a>]) -> Vec<Sketch<'a>> {
        let mut out: Vec<Sketch<'a>> = Vec::new();

        // 1. Pure constant.
        {
            let rc = self.arena.hole(expected);
            out.push(Sketch::new(self.arena.alloc(Expr::Copy { rc })));
        }
        // 2. Nop identities.
        for v in live_ins {
            if v.ty.width() != expected.width() {
                continue;
            }
            out.push(Sketch::new(v.var));
        }

        self.conversion_sketches(expected, live_ins, &mut out);
        self.fp_conversion_sketches(expected, live_ins, &mut out);
        self.unary_sketches(expected, live_ins, &mut out);
        self.extract_sketches(expected, live_ins, &mut out);

        // Binary-position operand list: live-ins plus one hole marker.
        let mut comps: Vec<Comp<'a>> = live_ins.iter().map(|v| Comp::Var(*v)).collect();
        comps.push(Comp::Rc(0));

        self.binop_sketches(expected, &comps, &mut out);
        self.icmp_sketches(expected, &comps, &mut out);
        self.fcmp_sketches(expected, &comps, &mut out);
        self.insert_sketches(expected, &comps, &mut out);
        self.simd_sketches(expected, &comps, &mut out);
        self.shuffle_sketches(expected, &comps, &mut out);

        // A second hole marker joins for the ternary position.
        comps.push(Comp::Rc(1));
        self.select_sketches(expected, &comps, &mut out);

        out
    }

    // 3. Integer width conversions. Same-width live-ins get the narrowing
    // round trips (zext/sext of a trunc), which express low-bit masks and
    // sign spreads; everything else gets the single conversion that matches
    // the result width.
    fn conversion_sketches(&self, expected: Type, live_ins: &[LiveIn<'a>], out: &mut Vec<Sketch<'a>>) {
        for v in live_ins {
            let op_w = v.ty.width();
            if v.ty.same_width(&expected) {
                if v.ty.is_fp() || expected.is_fp() {
                    continue;
                }
                for work in integer_vector_types(v.ty) {
                    let lane = work.lane();
                    for nb in [8u32, 16, 32] {
                        if nb >= work.bits() {
                            continue;
                        }
                        let inner = self.arena.alloc(Expr::IntConv {
                            op: IntConvOp::Trunc,
                            v: v.var,
                            lane,
                            prev_bits: work.bits(),
                            new_bits: nb,
                        });
                        for op in [IntConvOp::Zext, IntConvOp::Sext] {
                            out.push(Sketch::new(self.arena.alloc(Expr::IntConv {
                                op,
                                v: inner,
                                lane,
                                prev_bits: nb,
                                new_bits: work.bits(),
                            })));
                        }
                    }
                }
                continue;
            }
            for work in integer_vector_types(v.ty) {
                let op_bits = work.bits();
                let lane = work.lane();
                if expected.width() % lane != 0 {
                    continue;
                }
                if expected.width() > op_w {
                    if expected.width() % op_w != 0 {
                        continue;
                    }
                    let nb = (expected.width() / op_w) * op_bits;
                    for op in [IntConvOp::Sext, IntConvOp::Zext] {
                        out.push(Sketch::new(self.arena.alloc(Expr::IntConv {
                            op,
                            v: v.var,
                            lane,
                            prev_bits: op_bits,
                            new_bits: nb,
                        })));
                    }
                } else if expected.width() < op_w {
                    if op_w % expected.width() != 0 {
                        continue;
                    }
                    let nb = expected.width() * op_bits / op_w;
                    if nb == 0 {
                        continue;
                    }
                    out.push(Sketch::new(self.arena.alloc(Expr::IntConv {
                        op: IntConvOp::Trunc,
                        v: v.var,
                        lane,
                        prev_bits: op_bits,
                        new_bits: nb,
                    })));
                }
            }
        }
    }

    // 4. FP conversions.
    fn fp_conversion_sketches(&self, expected: Type, live_ins: &[LiveIn<'a>], out: &mut Vec<Sketch<'a>>) {
        use crate::ops::FpConvOp::*;
        for v in live_ins {
            let op_ty = v.ty;
            if expected.is_fp() && op_ty.is_fp() {
                if expected.lane() != op_ty.lane() {
                    continue;
                }
                if expected.bits() > op_ty.bits() {
                    out.push(Sketch::new(self.arena.alloc(Expr::FpConv {
                        op: FpExt,
                        v: v.var,
                        ty: expected,
                    })));
                } else if expected.bits() < op_ty.bits() {
                    out.push(Sketch::new(self.arena.alloc(Expr::FpConv {
                        op: FpTrunc,
                        v: v.var,
                        ty: expected,
                    })));
                }
            }
            if expected.is_fp() != op_ty.is_fp() {
                if op_ty.is_fp() {
                    if expected.width() % op_ty.lane() != 0 {
                        continue;
                    }
                    for op in [FpToSi, FpToUi] {
                        out.push(Sketch::new(self.arena.alloc(Expr::FpConv {
                            op,
                            v: v.var,
                            ty: expected,
                        })));
                    }
                } else {
                    if op_ty.width() % expected.lane() != 0 {
                        continue;
                    }
                    for op in [UiToFp, SiToFp] {
                        out.push(Sketch::new(self.arena.alloc(Expr::FpConv {
                            op,
                            v: v.var,
                            ty: expected,
                        })));
                    }
                }
            }
        }
    }

    // 5. Unary ops.
    fn unary_sketches(&self, expected: Type, live_ins: &[LiveIn<'a>], out: &mut Vec<Sketch<'a>>) {
        for v in live_ins {
            if !expected.same_width(&v.ty) {
                continue;
            }
            for op in UnOp::ALL {
                for work in workty::unary(expected, op) {
                    out.push(Sketch::new(self.arena.alloc(Expr::UnaryOp {
                        op,
                        v: v.var,
                        workty: work,
                    })));
                }
            }
        }
    }

    // 6. Extract element.
    fn extract_sketches(&self, expected: Type, live_ins: &[LiveIn<'a>], out: &mut Vec<Sketch<'a>>) {
        for v in live_ins {
            let op_ty = v.ty;
            if op_ty.width() <= expected.width() {
                continue;
            }
            if op_ty.width() % expected.width() != 0 {
                continue;
            }
            if op_ty.is_fp() != expected.is_fp() {
                continue;
            }
            if op_ty.is_fp() {
                if expected.lane() != 1 || op_ty.bits() != expected.bits() {
                    continue;
                }
            }
            let idx = self.arena.hole(Type::integer(16));
            let ety = Type::scalar(expected.width(), expected.is_fp());
            out.push(Sketch::new(self.arena.alloc(Expr::ExtractElement {
                v: v.var,
                idx,
                ety,
            })));
        }
    }

    // 7. Binary ops.
    fn binop_sketches(&self, expected: Type, comps: &[Comp<'a>], out: &mut Vec<Sketch<'a>>) {
        for op in BinOp::ALL {
            if expected.bits() == 1 && !op.is_logical() {
                continue;
            }
            for i in 0..comps.len() {
                let start = if matches!(op, BinOp::Mul | BinOp::FMul) {
                    i
                } else if op.is_commutative() {
                    i + 1
                } else {
                    0
                };
                for j in start..comps.len() {
                    for work in workty::binary(expected, op) {
                        let (lhs, rhs) = match (&comps[i], &comps[j]) {
                            (Comp::Rc(_), Comp::Var(r)) => {
                                if !expected.same_width(&r.ty) {
                                    continue;
                                }
                                (self.arena.hole(work), r.var)
                            }
                            (Comp::Var(l), Comp::Rc(_)) => {
                                // (- x c) is canonicalized as (+ x -c).
                                if matches!(op, BinOp::Sub) {
                                    continue;
                                }
                                if !expected.same_width(&l.ty) {
                                    continue;
                                }
                                (l.var, self.arena.hole(work))
                            }
                            (Comp::Rc(_), Comp::Rc(_)) => continue,
                            (Comp::Var(l), Comp::Var(r)) => {
                                if !expected.same_width(&l.ty) || !expected.same_width(&r.ty) {
                                    continue;
                                }
                                (l.var, r.var)
                            }
                        };
                        out.push(Sketch::new(self.arena.alloc(Expr::BinaryOp {
                            op,
                            lhs,
                            rhs,
                            workty: work,
                        })));
                    }
                }
            }
        }
    }

    // 8a. Integer compares.
    fn icmp_sketches(&self, expected: Type, comps: &[Comp<'a>], out: &mut Vec<Sketch<'a>>) {
        if expected.width() > 64 || expected.is_fp() {
            return;
        }
        let lanes = expected.width();
        for i in 0..comps.len() {
            for j in 0..comps.len() {
                if i == j {
                    continue;
                }
                if comps[i].is_rc() {
                    // Neither (rc, rc) nor (rc, var).
                    continue;
                }
                let Comp::Var(l) = comps[i] else { continue };
                if l.ty.is_fp() || l.ty.width() % lanes != 0 {
                    continue;
                }
                let elem_bits = l.ty.width() / lanes;
                if !matches!(elem_bits, 8 | 16 | 32 | 64) {
                    continue;
                }
                for cond in ICmpCond::ALL {
                    let rhs = match &comps[j] {
                        Comp::Rc(_) => {
                            // (x <= c) is (x < c+1).
                            if matches!(cond, ICmpCond::Sle | ICmpCond::Ule) {
                                continue;
                            }
                            self.arena.hole(Type::integer_vectorizable(lanes, elem_bits))
                        }
                        Comp::Var(r) => {
                            if l.ty.width() != r.ty.width() || r.ty.is_fp() {
                                continue;
                            }
                            r.var
                        }
                    };
                    out.push(Sketch::new(self.arena.alloc(Expr::ICmp {
                        cond,
                        lhs: l.var,
                        rhs,
                        lanes,
                    })));
                }
            }
        }
    }

    // 8b. FP compares.
    fn fcmp_sketches(&self, expected: Type, comps: &[Comp<'a>], out: &mut Vec<Sketch<'a>>) {
        if expected.width() > 64 || expected.is_fp() {
            return;
        }
        let lanes = expected.width();
        for i in 0..comps.len() {
            for j in 0..comps.len() {
                if i == j || comps[i].is_rc() {
                    continue;
                }
                let Comp::Var(l) = comps[i] else { continue };
                if !l.ty.is_fp() || l.ty.lane() != lanes {
                    continue;
                }
                if let Comp::Var(r) = &comps[j] {
                    if l.ty != r.ty {
                        continue;
                    }
                }
                for cond in FCmpCond::ALL {
                    let rhs = match &comps[j] {
                        Comp::Var(r) => r.var,
                        Comp::Rc(_) => self.arena.hole(l.ty),
                    };
                    out.push(Sketch::new(self.arena.alloc(Expr::FCmp {
                        cond,
                        lhs: l.var,
                        rhs,
                        lanes,
                    })));
                }
            }
        }
    }

    // 9. Insert element.
    fn insert_sketches(&self, expected: Type, comps: &[Comp<'a>], out: &mut Vec<Sketch<'a>>) {
        for i in 0..comps.len() {
            for j in 0..comps.len() {
                if comps[j].is_rc() {
                    // Element is a hole: every work vectorization applies.
                    let Comp::Var(v) = comps[i] else { continue };
                    if v.ty.width() != expected.width() {
                        continue;
                    }
                    for work in workty::insert_element(expected) {
                        let elt = self.arena.hole(work.as_scalar());
                        let idx = self.arena.hole(Type::integer(16));
                        out.push(Sketch::new(self.arena.alloc(Expr::InsertElement {
                            v: v.var,
                            elt,
                            idx,
                            vty: work,
                        })));
                    }
                } else {
                    let Comp::Var(elm) = comps[j] else { continue };
                    let (v_expr, v_ty) = match &comps[i] {
                        Comp::Var(v) => (v.var, v.ty),
                        Comp::Rc(_) => (self.arena.hole(expected), expected),
                    };
                    if v_ty.width() != expected.width() {
                        continue;
                    }
                    if elm.ty.width() >= v_ty.width()
                        || v_ty.width() % elm.ty.width() != 0
                        || elm.ty.width() < 8
                        || v_ty.is_fp() != elm.ty.is_fp()
                    {
                        continue;
                    }
                    if elm.ty.is_fp() && (elm.ty.lane() != 1 || v_ty.bits() != elm.ty.bits()) {
                        continue;
                    }
                    let lane = v_ty.width() / elm.ty.width();
                    let vty = if elm.ty.is_fp() {
                        Type::float_vectorizable(lane, elm.ty.bits())
                    } else {
                        Type::integer_vectorizable(lane, elm.ty.width())
                    };
                    let idx = self.arena.hole(Type::integer(16));
                    out.push(Sketch::new(self.arena.alloc(Expr::InsertElement {
                        v: v_expr,
                        elt: elm.var,
                        idx,
                        vty,
                    })));
                }
            }
        }
    }

    // 10. Fixed-shape SIMD intrinsics.
    fn simd_sketches(&self, expected: Type, comps: &[Comp<'a>], out: &mut Vec<Sketch<'a>>) {
        if expected.is_fp() {
            return;
        }
        for (k, _) in intrinsics::binop_table().iter().enumerate() {
            let op = intrinsics::SimdBinOpId(k as u16);
            if self.config.disable_avx512 && intrinsics::is_512(op) {
                continue;
            }
            let ret_ty = intrinsics::binop_ret_ty(op);
            let op0_ty = intrinsics::binop_op0_ty(op);
            let op1_ty = intrinsics::binop_op1_ty(op);
            if !ret_ty.same_width(&expected) {
                continue;
            }
            for i in 0..comps.len() {
                for j in 0..comps.len() {
                    if comps[i].is_rc() && comps[j].is_rc() {
                        continue;
                    }
                    let lhs = match &comps[i] {
                        Comp::Var(l) => {
                            if !l.ty.same_width(&op0_ty) {
                                continue;
                            }
                            l.var
                        }
                        Comp::Rc(_) => self.arena.hole(op0_ty),
                    };
                    let rhs = match &comps[j] {
                        Comp::Var(r) => {
                            if !r.ty.same_width(&op1_ty) {
                                continue;
                            }
                            r.var
                        }
                        Comp::Rc(_) => self.arena.hole(op1_ty),
                    };
                    out.push(Sketch::new(self.arena.alloc(Expr::SimdBin { op, lhs, rhs })));
                }
            }
        }
    }

    // 11. Shuffles.
    fn shuffle_sketches(&self, expected: Type, comps: &[Comp<'a>], out: &mut Vec<Sketch<'a>>) {
        for i in 0..comps.len() {
            let Comp::Var(l) = comps[i] else { continue };
            if expected.is_fp() != l.ty.is_fp() {
                continue;
            }
            for work in shuffle_work_types(expected) {
                if work.lane() == 1 {
                    continue;
                }
                let mask_ty = Type::integer_vectorizable(work.lane(), 32);
                if l.ty.width() % work.bits() != 0 || l.ty.width() == work.bits() {
                    continue;
                }
                // (shuffle var, mask)
                {
                    let mask = self.arena.hole(mask_ty);
                    out.push(Sketch::new(self.arena.alloc(Expr::FakeShuffle {
                        lhs: l.var,
                        rhs: None,
                        mask,
                        expect_ty: work,
                    })));
                }
                // (blend var1, var2, mask)
                for cj in comps.iter().skip(i + 1) {
                    let rhs = match cj {
                        Comp::Var(r) => {
                            if !l.ty.same_width(&r.ty) {
                                continue;
                            }
                            r.var
                        }
                        Comp::Rc(_) => {
                            let lanes = l.ty.width() / work.bits();
                            self.arena.hole(Type::integer_vectorizable(lanes, work.bits()))
                        }
                    };
                    let mask = self.arena.hole(mask_ty);
                    out.push(Sketch::new(self.arena.alloc(Expr::FakeShuffle {
                        lhs: l.var,
                        rhs: Some(rhs),
                        mask,
                        expect_ty: work,
                    })));
                }
            }
        }
    }

    // 12. Selects.
    fn select_sketches(&self, expected: Type, comps: &[Comp<'a>], out: &mut Vec<Sketch<'a>>) {
        for i in 0..comps.len() {
            for j in 0..comps.len() {
                if i == j {
                    continue;
                }
                let (t0, t1) = (comps[i].ty(), comps[j].ty());
                if expected.is_fp() {
                    if t0.is_valid() && t0 != expected {
                        continue;
                    }
                    if t1.is_valid() && t1 != expected {
                        continue;
                    }
                } else {
                    if t0.is_valid() && !t0.same_width(&expected) {
                        continue;
                    }
                    if t1.is_valid() && !t1.same_width(&expected) {
                        continue;
                    }
                }
                for c in comps {
                    let Comp::Var(cond) = c else { continue };
                    if !cond.ty.is_bool() {
                        continue;
                    }
                    let lhs = match &comps[i] {
                        Comp::Rc(n) => {
                            // Only the first marker may take the true arm.
                            if *n != 0 {
                                continue;
                            }
                            self.arena.hole(expected)
                        }
                        Comp::Var(v) => v.var,
                    };
                    let rhs = match &comps[j] {
                        Comp::Rc(n) => {
                            if *n != 1 {
                                continue;
                            }
                            self.arena.hole(expected)
                        }
                        Comp::Var(v) => v.var,
                    };
                    out.push(Sketch::new(self.arena.alloc(Expr::Select {
                        cond: cond.var,
                        lhs,
                        rhs,
                    })));
                }
            }
        }
    }
}

/// Live-in set of a slice function keyed by surface-syntax name; parameters
/// by their name, instructions as `t<n>`.
pub fn live_in_names(func: &Function, root: InstId) -> LiveIns {
    let analysis = Analysis::new(func);
    let mut out = LiveIns::new();
    for (i, p) in func.params.iter().enumerate() {
        out.insert(p.name.clone(), (ValueRef::Param(i as u32), p.ty));
    }
    for id in func.inst_ids_in_layout() {
        if id == root {
            continue;
        }
        let inst = func.inst(id);
        if !inst.op.has_result() || !inst.ty.is_valid() {
            continue;
        }
        if !analysis.dominates(ValueRef::Inst(id), root) {
            continue;
        }
        out.insert(format!("t{}", id.0), (ValueRef::Inst(id), inst.ty));
    }
    out
}

/// Return the root instruction of an already-sliced function: the instruction
/// producing the unique return's value.
pub fn root_of_slice(func: &Function) -> Option<InstId> {
    let ret = func.unique_return()?;
    match func.inst(ret).args[0] {
        ValueRef::Inst(i) => Some(i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::printer::print_expr;
    use crate::ir::parser::parse_module;
    use crate::slice::Slicer;
    use crate::verify::ExecBackend;

    fn setup(text: &str, root: u32) -> (Module, InstId) {
        let m = parse_module(text).unwrap();
        (m, InstId(root))
    }

    fn enumerate_strings(text: &str, root: u32) -> Vec<String> {
        let (m, root) = setup(text, root);
        let slicer = Slicer::new(&m, &m.functions[0]);
        let slice = slicer.extract_expr(root).unwrap();
        let arena = ExprArena::new();
        let config = Config::default();
        let en = Enumerator::new(&arena, &config);
        let func = slice.function();
        let live = en.find_inputs(func, slice.root);
        let expected = func.inst(slice.root).ty;
        en.sketches(expected, &live)
            .into_iter()
            .map(|s| print_expr(s.root, &ConstMap::new()))
            .collect()
    }

    const ADD_SLICE: &str = r#"
        define i32 @f(i32 %x, i32 %y) {
        entry:
          %t = add i32 %y, 0
          %r = add i32 %x, %t
          ret i32 %r
        }
        "#;

    #[test]
    fn enumeration_is_deterministic() {
        let a = enumerate_strings(ADD_SLICE, 1);
        let b = enumerate_strings(ADD_SLICE, 1);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn sketches_start_with_constant_and_nops() {
        let s = enumerate_strings(ADD_SLICE, 1);
        assert!(s[0].starts_with("(copy "), "first sketch is the pure constant: {}", s[0]);
        // Nops follow: the parameters of matching width.
        assert!(s[1].starts_with('%'), "nop sketch: {}", s[1]);
    }

    #[test]
    fn no_sub_var_rc_and_no_rc_rc() {
        for s in enumerate_strings(ADD_SLICE, 1) {
            assert!(
                !(s.starts_with("(sub") && s.ends_with("(hole i32))")),
                "sub with constant rhs must not be emitted: {}",
                s
            );
            // A binary node with two holes never appears.
            let holes = s.matches("(hole").count();
            if s.starts_with("(add") || s.starts_with("(sub") || s.starts_with("(mul") {
                assert!(holes <= 1, "binary sketch with two holes: {}", s);
            }
        }
    }

    #[test]
    fn every_sketch_matches_result_width() {
        let (m, root) = setup(ADD_SLICE, 1);
        let slicer = Slicer::new(&m, &m.functions[0]);
        let slice = slicer.extract_expr(root).unwrap();
        let arena = ExprArena::new();
        let config = Config::default();
        let en = Enumerator::new(&arena, &config);
        let func = slice.function();
        let live = en.find_inputs(func, slice.root);
        let expected = func.inst(slice.root).ty;
        for sk in en.sketches(expected, &live) {
            let ty = sk.root.ty();
            if ty.is_valid() {
                assert_eq!(
                    ty.width(),
                    expected.width(),
                    "sketch {} has width {}",
                    print_expr(sk.root, &ConstMap::new()),
                    ty.width()
                );
            }
        }
    }

    #[test]
    fn solves_add_zero_identity() {
        let (m, root) = setup(ADD_SLICE, 1);
        let slicer = Slicer::new(&m, &m.functions[0]);
        let slice = slicer.extract_expr(root).unwrap();
        let arena = ExprArena::new();
        let mut config = Config::default();
        config.ignore_machine_cost = true;
        let en = Enumerator::new(&arena, &config);
        let mut backend = ExecBackend::new();
        let (rewrites, stats) = en.solve(&slice, &mut backend, None);
        assert!(stats.candidates > 0);
        assert!(!rewrites.is_empty(), "expected a rewrite for add(x, add(y, 0))");
        let r = &rewrites[0];
        assert!(r.cost_after < r.cost_before);
        let printed = print_expr(r.root, &r.consts);
        assert!(printed.contains("%a"), "rewrite should reference live-ins: {}", printed);
    }
}
