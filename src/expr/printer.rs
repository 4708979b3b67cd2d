// Surface-syntax printer for candidate expressions. This is the format stored
// in the result cache, so resolved holes print as concrete constants; an
// unresolved hole can only appear in debug output.

use super::{ConstMap, Expr};
use crate::intrinsics;
use crate::ir::{ConstKind, Constant};
use std::fmt::Write as _;

pub fn print_expr(e: &Expr<'_>, consts: &ConstMap) -> String {
    let mut s = String::new();
    write_expr(&mut s, e, consts);
    s
}

fn write_expr(s: &mut String, e: &Expr<'_>, consts: &ConstMap) {
    match e {
        Expr::Var { name, .. } => {
            let _ = write!(s, "%{}", name);
        }
        Expr::ReservedConst { id, ty } => match consts.get(id) {
            Some(c) => {
                let _ = write!(s, "(const {} {})", c.ty, const_literal(c));
            }
            None => {
                let _ = write!(s, "(hole {})", ty);
            }
        },
        Expr::Copy { rc } => {
            let _ = write!(s, "(copy ");
            write_expr(s, rc, consts);
            let _ = write!(s, ")");
        }
        Expr::UnaryOp { op, v, workty } => {
            let _ = write!(s, "({} {} ", op.name(), workty);
            write_expr(s, v, consts);
            let _ = write!(s, ")");
        }
        Expr::BinaryOp { op, lhs, rhs, workty } => {
            let _ = write!(s, "({} {} ", op.name(), workty);
            write_expr(s, lhs, consts);
            let _ = write!(s, " ");
            write_expr(s, rhs, consts);
            let _ = write!(s, ")");
        }
        Expr::ICmp { cond, lhs, rhs, lanes } => {
            let _ = write!(s, "({} {} ", cond.name(), lanes);
            write_expr(s, lhs, consts);
            let _ = write!(s, " ");
            write_expr(s, rhs, consts);
            let _ = write!(s, ")");
        }
        Expr::FCmp { cond, lhs, rhs, lanes } => {
            let _ = write!(s, "(fcmp_{} {} ", cond.name(), lanes);
            write_expr(s, lhs, consts);
            let _ = write!(s, " ");
            write_expr(s, rhs, consts);
            let _ = write!(s, ")");
        }
        Expr::SimdBin { op, lhs, rhs } => {
            let _ = write!(s, "(x86 {} ", intrinsics::binop(*op).name);
            write_expr(s, lhs, consts);
            let _ = write!(s, " ");
            write_expr(s, rhs, consts);
            let _ = write!(s, ")");
        }
        Expr::FakeShuffle { lhs, rhs, mask, expect_ty } => {
            match rhs {
                None => {
                    let _ = write!(s, "(shuffle {} ", expect_ty);
                    write_expr(s, lhs, consts);
                }
                Some(r) => {
                    let _ = write!(s, "(blend {} ", expect_ty);
                    write_expr(s, lhs, consts);
                    let _ = write!(s, " ");
                    write_expr(s, r, consts);
                }
            }
            let _ = write!(s, " ");
            write_expr(s, mask, consts);
            let _ = write!(s, ")");
        }
        Expr::ExtractElement { v, idx, ety } => {
            let _ = write!(s, "(extractelement {} ", ety);
            write_expr(s, v, consts);
            let _ = write!(s, " ");
            write_expr(s, idx, consts);
            let _ = write!(s, ")");
        }
        Expr::InsertElement { v, elt, idx, vty } => {
            let _ = write!(s, "(insertelement {} ", vty);
            write_expr(s, v, consts);
            let _ = write!(s, " ");
            write_expr(s, elt, consts);
            let _ = write!(s, " ");
            write_expr(s, idx, consts);
            let _ = write!(s, ")");
        }
        Expr::IntConv { op, v, lane, prev_bits, new_bits } => {
            let prev = crate::types::Type::integer_vectorizable(*lane, *prev_bits);
            let new = crate::types::Type::integer_vectorizable(*lane, *new_bits);
            let _ = write!(s, "({} {} {} ", op.name(), prev, new);
            write_expr(s, v, consts);
            let _ = write!(s, ")");
        }
        Expr::FpConv { op, v, ty } => {
            let _ = write!(s, "({} {} ", op.name(), ty);
            write_expr(s, v, consts);
            let _ = write!(s, ")");
        }
        Expr::Select { cond, lhs, rhs } => {
            let _ = write!(s, "(select ");
            write_expr(s, cond, consts);
            let _ = write!(s, " ");
            write_expr(s, lhs, consts);
            let _ = write!(s, " ");
            write_expr(s, rhs, consts);
            let _ = write!(s, ")");
        }
    }
}

fn const_literal(c: &Constant) -> String {
    match &c.kind {
        ConstKind::Poison => "poison".to_string(),
        ConstKind::Int(lanes) => {
            if c.ty.lane() == 1 {
                scalar_literal(lanes[0], c.ty.is_fp())
            } else {
                let mut s = String::from("<");
                for (i, l) in lanes.iter().enumerate() {
                    if i > 0 {
                        s.push_str(", ");
                    }
                    s.push_str(&scalar_literal(*l, c.ty.is_fp()));
                }
                s.push('>');
                s
            }
        }
    }
}

fn scalar_literal(bits: u64, fp: bool) -> String {
    if fp {
        format!("0x{:x}", bits)
    } else {
        format!("{}", bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, ExprArena};
    use crate::ir::ValueRef;
    use crate::types::Type;

    #[test]
    fn prints_resolved_and_unresolved_holes() {
        let arena = ExprArena::new();
        let t = Type::integer(32);
        let x = arena.var("x", ValueRef::Param(0), t);
        let h = arena.hole(t);
        let add = arena.alloc(Expr::BinaryOp { op: BinOp::Add, lhs: x, rhs: h, workty: t });
        let mut consts = ConstMap::new();
        assert_eq!(print_expr(add, &consts), "(add i32 %x (hole i32))");
        consts.insert(0, Constant::scalar(t, 41));
        assert_eq!(print_expr(add, &consts), "(add i32 %x (const i32 41))");
    }
}
