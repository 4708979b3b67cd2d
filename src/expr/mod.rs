// Candidate expression IR: the tree shapes the enumerator builds and the
// verifier resolves. Nodes are allocated in a bumpalo arena owned by the
// synthesis session for one slice; children are plain non-owning references
// into it. Constant holes carry a numeric id; their resolved values live in a
// side map (hole id -> constant) so a verified tree never needs mutation.

use crate::intrinsics::{self, SimdBinOpId};
use crate::ir::ValueRef;
use crate::types::Type;
use bumpalo::Bump;
use std::collections::HashMap;

pub use crate::ops::{BinOp, FCmpCond, FpConvOp, ICmpCond, IntConvOp, UnOp};

pub mod parser;
pub mod printer;

pub type ExprRef<'a> = &'a Expr<'a>;

/// Resolved constants for the holes of one rewrite.
pub type ConstMap = HashMap<u32, crate::ir::Constant>;

#[derive(Debug)]
pub enum Expr<'a> {
    /// A live-in value of the slice function. The name is interned in the
    /// arena; nothing in the tree owns heap memory, so dropping the arena
    /// frees everything.
    Var { name: &'a str, value: ValueRef, ty: Type },
    /// A typed constant hole, resolved during constant synthesis.
    ReservedConst { id: u32, ty: Type },
    /// Return a pure constant.
    Copy { rc: ExprRef<'a> },
    UnaryOp { op: UnOp, v: ExprRef<'a>, workty: Type },
    BinaryOp { op: BinOp, lhs: ExprRef<'a>, rhs: ExprRef<'a>, workty: Type },
    ICmp { cond: ICmpCond, lhs: ExprRef<'a>, rhs: ExprRef<'a>, lanes: u32 },
    FCmp { cond: FCmpCond, lhs: ExprRef<'a>, rhs: ExprRef<'a>, lanes: u32 },
    SimdBin { op: SimdBinOpId, lhs: ExprRef<'a>, rhs: ExprRef<'a> },
    /// Two-source shuffle whose mask is a hole; the second source is absent
    /// for single-source shuffles.
    FakeShuffle { lhs: ExprRef<'a>, rhs: Option<ExprRef<'a>>, mask: ExprRef<'a>, expect_ty: Type },
    ExtractElement { v: ExprRef<'a>, idx: ExprRef<'a>, ety: Type },
    InsertElement { v: ExprRef<'a>, elt: ExprRef<'a>, idx: ExprRef<'a>, vty: Type },
    IntConv { op: IntConvOp, v: ExprRef<'a>, lane: u32, prev_bits: u32, new_bits: u32 },
    FpConv { op: FpConvOp, v: ExprRef<'a>, ty: Type },
    Select { cond: ExprRef<'a>, lhs: ExprRef<'a>, rhs: ExprRef<'a> },
}

impl<'a> Expr<'a> {
    /// Result type of this node.
    pub fn ty(&self) -> Type {
        match self {
            Expr::Var { ty, .. } => *ty,
            Expr::ReservedConst { ty, .. } => *ty,
            Expr::Copy { rc } => rc.ty(),
            Expr::UnaryOp { v, .. } => v.ty(),
            Expr::BinaryOp { lhs, .. } => lhs.ty(),
            Expr::ICmp { lanes, .. } | Expr::FCmp { lanes, .. } => {
                Type::integer_vectorizable(*lanes, 1)
            }
            Expr::SimdBin { op, .. } => intrinsics::binop_ret_ty(*op),
            Expr::FakeShuffle { expect_ty, .. } => *expect_ty,
            Expr::ExtractElement { ety, .. } => *ety,
            Expr::InsertElement { vty, .. } => *vty,
            Expr::IntConv { op: _, lane, new_bits, .. } => {
                Type::integer_vectorizable(*lane, *new_bits)
            }
            Expr::FpConv { ty, .. } => *ty,
            Expr::Select { lhs, .. } => lhs.ty(),
        }
    }

    /// Type the operand of an int conversion is reinterpreted as.
    pub fn int_conv_prev_ty(&self) -> Option<Type> {
        match self {
            Expr::IntConv { lane, prev_bits, .. } => {
                Some(Type::integer_vectorizable(*lane, *prev_bits))
            }
            _ => None,
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Expr::Var { .. })
    }

    pub fn is_hole(&self) -> bool {
        matches!(self, Expr::ReservedConst { .. })
    }

    /// Collect the constant holes of this tree in pre-order.
    pub fn holes(&self) -> Vec<(u32, Type)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::ReservedConst { id, ty } = e {
                if !out.iter().any(|(i, _)| i == id) {
                    out.push((*id, *ty));
                }
            }
        });
        out
    }

    pub fn walk(&self, f: &mut impl FnMut(&Expr<'a>)) {
        f(self);
        match self {
            Expr::Var { .. } | Expr::ReservedConst { .. } => {}
            Expr::Copy { rc } => rc.walk(f),
            Expr::UnaryOp { v, .. } => v.walk(f),
            Expr::BinaryOp { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::ICmp { lhs, rhs, .. } | Expr::FCmp { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::SimdBin { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::FakeShuffle { lhs, rhs, mask, .. } => {
                lhs.walk(f);
                if let Some(r) = rhs {
                    r.walk(f);
                }
                mask.walk(f);
            }
            Expr::ExtractElement { v, idx, .. } => {
                v.walk(f);
                idx.walk(f);
            }
            Expr::InsertElement { v, elt, idx, .. } => {
                v.walk(f);
                elt.walk(f);
                idx.walk(f);
            }
            Expr::IntConv { v, .. } => v.walk(f),
            Expr::FpConv { v, .. } => v.walk(f),
            Expr::Select { cond, lhs, rhs } => {
                cond.walk(f);
                lhs.walk(f);
                rhs.walk(f);
            }
        }
    }
}

/// Arena plus hole-id supply for one synthesis session.
pub struct ExprArena {
    bump: Bump,
    next_hole: std::cell::Cell<u32>,
}

impl ExprArena {
    pub fn new() -> ExprArena {
        ExprArena { bump: Bump::new(), next_hole: std::cell::Cell::new(0) }
    }

    pub fn alloc<'a>(&'a self, e: Expr<'a>) -> ExprRef<'a> {
        self.bump.alloc(e)
    }

    /// A fresh constant hole of the given type.
    pub fn hole<'a>(&'a self, ty: Type) -> ExprRef<'a> {
        let id = self.next_hole.get();
        self.next_hole.set(id + 1);
        self.bump.alloc(Expr::ReservedConst { id, ty })
    }

    pub fn var<'a>(&'a self, name: &str, value: ValueRef, ty: Type) -> ExprRef<'a> {
        let name = self.bump.alloc_str(name);
        self.bump.alloc(Expr::Var { name, value, ty })
    }
}

impl Default for ExprArena {
    fn default() -> Self {
        ExprArena::new()
    }
}

/// A candidate: an expression tree plus its constant holes in discovery order.
#[derive(Debug, Clone, Copy)]
pub struct Sketch<'a> {
    pub root: ExprRef<'a>,
}

impl<'a> Sketch<'a> {
    pub fn new(root: ExprRef<'a>) -> Sketch<'a> {
        Sketch { root }
    }

    pub fn holes(&self) -> Vec<(u32, Type)> {
        self.root.holes()
    }

    pub fn has_holes(&self) -> bool {
        !self.holes().is_empty()
    }
}

/// A verified rewrite: the tree, its resolved constants, and both costs.
#[derive(Debug, Clone)]
pub struct Rewrite<'a> {
    pub root: ExprRef<'a>,
    pub consts: ConstMap,
    pub cost_after: u64,
    pub cost_before: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hole_ids_are_fresh_and_collected_in_order() {
        let arena = ExprArena::new();
        let t = Type::integer(32);
        let a = arena.hole(t);
        let b = arena.hole(t);
        let x = arena.var("x", ValueRef::Param(0), t);
        let add = arena.alloc(Expr::BinaryOp { op: BinOp::Add, lhs: x, rhs: a, workty: t });
        let sel_cond = arena.var("c", ValueRef::Param(1), Type::bool());
        let sel = arena.alloc(Expr::Select { cond: sel_cond, lhs: add, rhs: b });
        let holes = sel.holes();
        assert_eq!(holes.len(), 2);
        assert!(holes[0].0 < holes[1].0);
    }

    #[test]
    fn result_types() {
        let arena = ExprArena::new();
        let t = Type::integer_vectorizable(4, 8);
        let x = arena.var("x", ValueRef::Param(0), t);
        let cmp = arena.alloc(Expr::ICmp { cond: ICmpCond::Ult, lhs: x, rhs: x, lanes: 4 });
        assert_eq!(cmp.ty(), Type::integer_vectorizable(4, 1));
        let conv = arena.alloc(Expr::IntConv {
            op: IntConvOp::Zext,
            v: x,
            lane: 4,
            prev_bits: 8,
            new_bits: 16,
        });
        assert_eq!(conv.ty(), Type::integer_vectorizable(4, 16));
    }
}
