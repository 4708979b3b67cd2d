// Materializer: lowers a candidate expression tree into host-IR instructions
// immediately before a root instruction, bit-casting operands into their work
// types and the final value back to the root's type. Unresolved shuffle masks
// lower to a call of a declared opaque function; once constant synthesis has
// resolved the mask the tree is materialized again and the shuffle becomes a
// native instruction. Width inconsistencies here are bugs and abort with a
// diagnostic.

use crate::expr::{ConstMap, Expr};
use crate::intrinsics;
use crate::ir::{
    CastOp, Constant, Function, Inst, InstId, IntrinsicDecl, Module, Opcode, ValueRef,
};
use crate::ops::{FpConvOp, IntConvOp};
use crate::types::Type;
use std::collections::HashMap;

pub struct CodeGen<'g> {
    func: &'g mut Function,
    module: &'g mut Module,
    /// Hole id -> parameter index of the target function.
    hole_params: &'g HashMap<u32, u32>,
    /// Hole id -> resolved constant; takes precedence over the parameter.
    consts: &'g ConstMap,
    /// Optional remap applied to `Var` references (slice value -> host value).
    value_map: Option<&'g HashMap<ValueRef, ValueRef>>,
    /// Instructions emitted so far, spliced in before the root afterwards.
    emitted: Vec<InstId>,
    fksv_counter: u32,
}

impl<'g> CodeGen<'g> {
    pub fn new(
        func: &'g mut Function,
        module: &'g mut Module,
        hole_params: &'g HashMap<u32, u32>,
        consts: &'g ConstMap,
        value_map: Option<&'g HashMap<ValueRef, ValueRef>>,
    ) -> CodeGen<'g> {
        CodeGen { func, module, hole_params, consts, value_map, emitted: Vec::new(), fksv_counter: 0 }
    }

    /// Lower `expr`, splice the emitted instructions in front of `root`, and
    /// replace every use of `root` with the result (bit-cast to root's type).
    pub fn materialize(mut self, expr: &Expr<'_>, root: InstId) -> ValueRef {
        let v = self.lower(expr);
        let root_ty = self.func.inst(root).ty;
        let v = self.bitcast_to(v, root_ty);
        let block = self.func.block_of(root).expect("root is placed in a block");
        let insts = &mut self.func.blocks[block.0 as usize].insts;
        let pos = insts.iter().position(|i| *i == root).expect("root position");
        insts.splice(pos..pos, self.emitted.iter().copied());
        replace_uses(self.func, root, v);
        v
    }

    fn emit(&mut self, inst: Inst) -> ValueRef {
        let id = self.func.add_inst(inst);
        self.emitted.push(id);
        ValueRef::Inst(id)
    }

    /// Bit-cast `v` to `to`, collapsing a bitcast-of-bitcast.
    fn bitcast_to(&mut self, v: ValueRef, to: Type) -> ValueRef {
        let mut v = v;
        if let ValueRef::Inst(i) = v {
            if matches!(self.func.inst(i).op, Opcode::Cast(CastOp::Bitcast)) {
                v = self.func.inst(i).args[0];
            }
        }
        let from = self.func.value_type(v);
        if from == to {
            return v;
        }
        if !from.same_width(&to) {
            panic!(
                "materializer: cannot bitcast {} to {} in @{}",
                from, to, self.func.name
            );
        }
        self.emit(Inst::cast(CastOp::Bitcast, to, v))
    }

    fn lower(&mut self, e: &Expr<'_>) -> ValueRef {
        match e {
            Expr::Var { value, .. } => match self.value_map {
                None => *value,
                Some(map) => *map.get(value).unwrap_or_else(|| {
                    panic!("materializer: live-in missing from value map")
                }),
            },
            Expr::ReservedConst { id, ty } => {
                if let Some(c) = self.consts.get(id) {
                    return self.func.add_const(c.clone());
                }
                match self.hole_params.get(id) {
                    Some(p) => ValueRef::Param(*p),
                    None => panic!("materializer: unresolved hole #{} of type {}", id, ty),
                }
            }
            Expr::Copy { rc } => self.lower(rc),
            Expr::UnaryOp { op, v, workty } => {
                if v.ty().width() != workty.width() {
                    panic!("materializer: operand width mismatch in {}", op.name());
                }
                let op0 = self.lower(v);
                let op0 = self.bitcast_to(op0, *workty);
                self.emit(Inst::un(*op, *workty, op0))
            }
            Expr::BinaryOp { op, lhs, rhs, workty } => {
                if lhs.ty().is_valid() && lhs.ty().width() != workty.width() {
                    panic!("materializer: left operand width mismatch in {}", op.name());
                }
                if rhs.ty().is_valid() && rhs.ty().width() != workty.width() {
                    panic!("materializer: right operand width mismatch in {}", op.name());
                }
                let a = self.lower(lhs);
                let a = self.bitcast_to(a, *workty);
                let b = self.lower(rhs);
                let b = self.bitcast_to(b, *workty);
                self.emit(Inst::bin(*op, *workty, a, b))
            }
            Expr::ICmp { cond, lhs, rhs, lanes } => {
                let workty =
                    Type::integer_vectorizable(*lanes, lhs.ty().width() / *lanes);
                let a = self.lower(lhs);
                let a = self.bitcast_to(a, workty);
                let b = self.lower(rhs);
                let b = self.bitcast_to(b, workty);
                let rty = Type::integer_vectorizable(*lanes, 1);
                self.emit(Inst::icmp(*cond, rty, a, b))
            }
            Expr::FCmp { cond, lhs, rhs, lanes } => {
                let a = self.lower(lhs);
                let b = self.lower(rhs);
                let b = self.bitcast_to(b, lhs.ty());
                let rty = Type::integer_vectorizable(*lanes, 1);
                self.emit(Inst::fcmp(*cond, rty, a, b))
            }
            Expr::SimdBin { op, lhs, rhs } => {
                let op0_ty = intrinsics::binop_op0_ty(*op);
                let op1_ty = intrinsics::binop_op1_ty(*op);
                let ret_ty = intrinsics::binop_ret_ty(*op);
                if lhs.ty().is_valid() && lhs.ty().width() != op0_ty.width() {
                    panic!("materializer: left operand width mismatch in intrinsic");
                }
                if rhs.ty().is_valid() && rhs.ty().width() != op1_ty.width() {
                    panic!("materializer: right operand width mismatch in intrinsic");
                }
                let a = self.lower(lhs);
                let a = self.bitcast_to(a, op0_ty);
                let b = self.lower(rhs);
                let b = self.bitcast_to(b, op1_ty);
                let name = intrinsics::binop(*op).name;
                self.module.declare(IntrinsicDecl {
                    name: name.to_string(),
                    params: vec![op0_ty, op1_ty],
                    ret_ty,
                });
                self.emit(Inst::call(name, ret_ty, vec![a, b]))
            }
            Expr::FakeShuffle { lhs, rhs, mask, expect_ty } => {
                let in_ty = Type::integer_vectorizable(
                    lhs.ty().width() / expect_ty.bits(),
                    expect_ty.bits(),
                );
                let in_ty = if expect_ty.is_fp() {
                    Type::float_vectorizable(in_ty.lane(), in_ty.bits())
                } else {
                    in_ty
                };
                let a = self.lower(lhs);
                let a = self.bitcast_to(a, in_ty);
                let b = match rhs {
                    Some(r) => {
                        let b = self.lower(r);
                        self.bitcast_to(b, in_ty)
                    }
                    None => self.func.add_const(Constant::poison(in_ty)),
                };
                let resolved = match mask {
                    Expr::ReservedConst { id, .. } => self.consts.get(id).cloned(),
                    _ => None,
                };
                match resolved {
                    Some(c) => {
                        // Mask lanes widen to i32 for the native shuffle.
                        let mask_ty = Type::integer_vectorizable(c.ty.lane(), 32);
                        let m = self
                            .func
                            .add_const(Constant::vector(mask_ty, c.lanes().to_vec()));
                        self.emit(Inst::shuffle(*expect_ty, a, b, m))
                    }
                    None => {
                        let mask_v = self.lower(mask);
                        let mask_ty = self.func.value_type(mask_v);
                        let name = format!("__fksv.{}", self.fksv_counter);
                        self.fksv_counter += 1;
                        self.module.declare(IntrinsicDecl {
                            name: name.clone(),
                            params: vec![in_ty, in_ty, mask_ty],
                            ret_ty: *expect_ty,
                        });
                        self.emit(Inst::call(&name, *expect_ty, vec![a, b, mask_v]))
                    }
                }
            }
            Expr::ExtractElement { v, idx, ety } => {
                let in_scalar = ety.as_scalar();
                let lanes = v.ty().width() / in_scalar.width();
                let in_ty = in_scalar.as_vector(lanes);
                let a = self.lower(v);
                let a = self.bitcast_to(a, in_ty);
                let i = self.lower(idx);
                self.emit(Inst::extract_element(in_scalar, a, i))
            }
            Expr::InsertElement { v, elt, idx, vty } => {
                let a = self.lower(v);
                let a = self.bitcast_to(a, *vty);
                let e = self.lower(elt);
                let e = self.bitcast_to(e, vty.as_scalar());
                let i = self.lower(idx);
                self.emit(Inst::insert_element(*vty, a, e, i))
            }
            Expr::IntConv { op, v, lane, prev_bits, new_bits } => {
                let prev = Type::integer_vectorizable(*lane, *prev_bits);
                let new = Type::integer_vectorizable(*lane, *new_bits);
                let a = self.lower(v);
                let a = self.bitcast_to(a, prev);
                let cast = match op {
                    IntConvOp::Sext => CastOp::Sext,
                    IntConvOp::Zext => CastOp::Zext,
                    IntConvOp::Trunc => CastOp::Trunc,
                };
                self.emit(Inst::cast(cast, new, a))
            }
            Expr::FpConv { op, v, ty } => {
                let a = self.lower(v);
                let cast = match op {
                    FpConvOp::FpTrunc => CastOp::FpTrunc,
                    FpConvOp::FpExt => CastOp::FpExt,
                    FpConvOp::FpToUi => CastOp::FpToUi,
                    FpConvOp::FpToSi => CastOp::FpToSi,
                    FpConvOp::UiToFp => CastOp::UiToFp,
                    FpConvOp::SiToFp => CastOp::SiToFp,
                };
                self.emit(Inst::cast(cast, *ty, a))
            }
            Expr::Select { cond, lhs, rhs } => {
                let c = self.lower(cond);
                let a = self.lower(lhs);
                let arm_ty = self.func.value_type(a);
                let b = self.lower(rhs);
                let b = self.bitcast_to(b, arm_ty);
                self.emit(Inst::select(arm_ty, c, a, b))
            }
        }
    }
}

/// Replace every use of `old`'s result with `new` across the function.
pub fn replace_uses(func: &mut Function, old: InstId, new: ValueRef) {
    let old_ref = ValueRef::Inst(old);
    // Skip the instructions that produce `new` to avoid self-reference.
    let skip = match new {
        ValueRef::Inst(i) => Some(i),
        _ => None,
    };
    for (idx, inst) in func.insts.iter_mut().enumerate() {
        if Some(InstId(idx as u32)) == skip {
            continue;
        }
        for arg in inst.args.iter_mut() {
            if *arg == old_ref {
                *arg = new;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, ExprArena};
    use crate::ir::parser::parse_module;
    use crate::ir::verifier::verify_function;

    fn slice_fn() -> Module {
        parse_module(
            r#"
            define i32 @sliced(i32 %x, i32 %y) {
            entry:
              %t = add i32 %y, 0
              %r = add i32 %x, %t
              ret i32 %r
            }
            "#,
        )
        .unwrap()
    }

    #[test]
    fn materializes_binary_replacement() {
        let mut m = slice_fn();
        let arena = ExprArena::new();
        let t = Type::integer(32);
        let x = arena.var("x", ValueRef::Param(0), t);
        let y = arena.var("y", ValueRef::Param(1), t);
        let add = arena.alloc(Expr::BinaryOp { op: BinOp::Add, lhs: x, rhs: y, workty: t });

        let mut func = m.functions[0].clone();
        let holes = HashMap::new();
        let consts = ConstMap::new();
        let root = InstId(1);
        let gen = CodeGen::new(&mut func, &mut m, &holes, &consts, None);
        gen.materialize(add, root);
        func.eliminate_dead_code();
        verify_function(&m, &func).unwrap();
        // The original adds are gone; a single add remains live.
        let live: Vec<_> = func.blocks[0]
            .insts
            .iter()
            .filter(|i| matches!(func.inst(**i).op, Opcode::Bin(BinOp::Add)))
            .collect();
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn unresolved_mask_lowers_to_opaque_call() {
        let mut m = parse_module(
            r#"
            define <4 x i32> @sliced(<4 x i32> %v) {
            entry:
              %r = shufflevector <4 x i32> %v, <4 x i32> poison, <4 x i32> <1, 1, 1, 1>
              ret <4 x i32> %r
            }
            "#,
        )
        .unwrap();
        let arena = ExprArena::new();
        let vty = Type::integer_vectorizable(4, 32);
        let v = arena.var("v", ValueRef::Param(0), vty);
        let mask = arena.hole(Type::integer_vectorizable(4, 32));
        let sh = arena.alloc(Expr::FakeShuffle { lhs: v, rhs: None, mask, expect_ty: vty });

        let mut func = m.functions[0].clone();
        let mut holes = HashMap::new();
        // The mask hole becomes parameter 1.
        func.add_param("_reservedc_0", Type::integer_vectorizable(4, 32));
        holes.insert(0u32, 1u32);
        let consts = ConstMap::new();
        let gen = CodeGen::new(&mut func, &mut m, &holes, &consts, None);
        gen.materialize(sh, InstId(0));
        func.eliminate_dead_code();
        assert!(m.find_decl("__fksv.0").is_some());
        assert!(func
            .insts
            .iter()
            .any(|i| i.callee.as_deref() == Some("__fksv.0")));
    }

    #[test]
    fn resolved_mask_lowers_to_native_shuffle() {
        let mut m = parse_module(
            r#"
            define <4 x i32> @sliced(<4 x i32> %v) {
            entry:
              %r = shufflevector <4 x i32> %v, <4 x i32> poison, <4 x i32> <1, 1, 1, 1>
              ret <4 x i32> %r
            }
            "#,
        )
        .unwrap();
        let arena = ExprArena::new();
        let vty = Type::integer_vectorizable(4, 32);
        let v = arena.var("v", ValueRef::Param(0), vty);
        let mask = arena.hole(Type::integer_vectorizable(4, 32));
        let sh = arena.alloc(Expr::FakeShuffle { lhs: v, rhs: None, mask, expect_ty: vty });

        let mut func = m.functions[0].clone();
        let holes = HashMap::new();
        let mut consts = ConstMap::new();
        consts.insert(0, Constant::vector(Type::integer_vectorizable(4, 32), vec![0, 0, 0, 0]));
        let gen = CodeGen::new(&mut func, &mut m, &holes, &consts, None);
        gen.materialize(sh, InstId(0));
        func.eliminate_dead_code();
        verify_function(&m, &func).unwrap();
        assert!(func
            .blocks[0]
            .insts
            .iter()
            .any(|i| matches!(func.inst(*i).op, Opcode::ShuffleVector)));
    }
}
