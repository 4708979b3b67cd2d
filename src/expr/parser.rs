// Parser for the rewrite surface syntax. Reconstructs an expression tree in
// the caller's arena given the live-in set of a target function; `%name`
// references resolve against that set, and every `(const ...)` literal is
// assigned a fresh hole whose value lands in the returned constant map.

use super::{BinOp, ConstMap, Expr, ExprArena, ExprRef, FCmpCond, FpConvOp, ICmpCond, IntConvOp, UnOp};
use crate::intrinsics;
use crate::ir::{Constant, ValueRef};
use crate::types::Type;
use std::collections::HashMap;

/// Live-ins the parser may reference: name -> (value, type).
pub type LiveIns = HashMap<String, (ValueRef, Type)>;

pub fn parse_expr<'a>(
    arena: &'a ExprArena,
    text: &str,
    live_ins: &LiveIns,
) -> Result<(ExprRef<'a>, ConstMap), String> {
    let mut p = Parser { text, pos: 0, arena, live_ins, consts: ConstMap::new() };
    let e = p.parse_value()?;
    p.skip_whitespace();
    if !p.is_eof() {
        return Err(format!("trailing input at offset {}", p.pos));
    }
    Ok((e, p.consts))
}

struct Parser<'a, 'b> {
    text: &'b str,
    pos: usize,
    arena: &'a ExprArena,
    live_ins: &'b LiveIns,
    consts: ConstMap,
}

impl<'a, 'b> Parser<'a, 'b> {
    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), String> {
        self.skip_whitespace();
        if self.current_char() == Some(ch) {
            self.advance();
            Ok(())
        } else {
            Err(format!("expected '{}' at offset {}", ch, self.pos))
        }
    }

    fn read_word(&mut self) -> Result<&'b str, String> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                self.advance();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(format!("expected word at offset {}", start));
        }
        Ok(&self.text[start..self.pos])
    }

    fn read_u64(&mut self) -> Result<u64, String> {
        self.skip_whitespace();
        let neg = self.current_char() == Some('-');
        if neg {
            self.advance();
        }
        let start = self.pos;
        let hex = self.text[self.pos..].starts_with("0x");
        if hex {
            self.pos += 2;
        }
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_hexdigit() {
                self.advance();
            } else {
                break;
            }
        }
        let digits = &self.text[start..self.pos];
        let v = if hex {
            u64::from_str_radix(&digits[2..], 16)
        } else {
            digits.parse::<u64>()
        }
        .map_err(|e| format!("bad number '{}': {}", digits, e))?;
        Ok(if neg { v.wrapping_neg() } else { v })
    }

    fn read_type(&mut self) -> Result<Type, String> {
        self.skip_whitespace();
        if self.current_char() == Some('<') {
            self.advance();
            let lane = self.read_u64()? as u32;
            let word = self.read_word()?;
            if word != "x" {
                return Err("expected 'x' in vector type".into());
            }
            let elem = self.read_type()?;
            self.expect('>')?;
            return Ok(elem.as_vector(lane));
        }
        let id = self.read_word()?;
        match id {
            "half" => Ok(Type::scalar(16, true)),
            "float" => Ok(Type::scalar(32, true)),
            "double" => Ok(Type::scalar(64, true)),
            "fp128" => Ok(Type::scalar(128, true)),
            _ if id.starts_with('i') => id[1..]
                .parse::<u32>()
                .map(Type::integer)
                .map_err(|_| format!("bad type '{}'", id)),
            _ => Err(format!("unknown type '{}'", id)),
        }
    }

    fn parse_value(&mut self) -> Result<ExprRef<'a>, String> {
        self.skip_whitespace();
        if self.current_char() == Some('%') {
            self.advance();
            let name = self.read_word()?;
            let Some((value, ty)) = self.live_ins.get(name) else {
                return Err(format!("unknown live-in '%{}'", name));
            };
            return Ok(self.arena.var(name, *value, *ty));
        }
        self.expect('(')?;
        let head = self.read_word()?.to_string();
        let e = self.parse_form(&head)?;
        self.expect(')')?;
        Ok(e)
    }

    fn parse_const(&mut self) -> Result<ExprRef<'a>, String> {
        // `(const <ty> <literal>)`, producing a pre-resolved hole.
        self.expect('(')?;
        let head = self.read_word()?;
        if head != "const" {
            return Err(format!("expected '(const ...)', got '({}'", head));
        }
        let e = self.parse_form("const")?;
        self.expect(')')?;
        Ok(e)
    }

    fn parse_form(&mut self, head: &str) -> Result<ExprRef<'a>, String> {
        if head == "const" {
            let ty = self.read_type()?;
            let c = self.read_literal(ty)?;
            let hole = self.arena.hole(ty);
            if let Expr::ReservedConst { id, .. } = hole {
                self.consts.insert(*id, c);
            }
            return Ok(hole);
        }
        if head == "hole" {
            let ty = self.read_type()?;
            return Ok(self.arena.hole(ty));
        }
        if head == "copy" {
            let rc = self.parse_value()?;
            return Ok(self.arena.alloc(Expr::Copy { rc }));
        }
        if let Some(op) = UnOp::from_name(head) {
            let workty = self.read_type()?;
            let v = self.parse_value()?;
            return Ok(self.arena.alloc(Expr::UnaryOp { op, v, workty }));
        }
        if let Some(op) = BinOp::from_name(head) {
            let workty = self.read_type()?;
            let lhs = self.parse_value()?;
            let rhs = self.parse_value()?;
            return Ok(self.arena.alloc(Expr::BinaryOp { op, lhs, rhs, workty }));
        }
        if let Some(cond) = ICmpCond::from_name(head) {
            let lanes = self.read_u64()? as u32;
            let lhs = self.parse_value()?;
            let rhs = self.parse_value()?;
            return Ok(self.arena.alloc(Expr::ICmp { cond, lhs, rhs, lanes }));
        }
        if let Some(cname) = head.strip_prefix("fcmp_") {
            let cond = FCmpCond::from_name(cname)
                .ok_or_else(|| format!("bad fcmp condition '{}'", cname))?;
            let lanes = self.read_u64()? as u32;
            let lhs = self.parse_value()?;
            let rhs = self.parse_value()?;
            return Ok(self.arena.alloc(Expr::FCmp { cond, lhs, rhs, lanes }));
        }
        match head {
            "zext" | "sext" | "trunc" => {
                let op = match head {
                    "zext" => IntConvOp::Zext,
                    "sext" => IntConvOp::Sext,
                    _ => IntConvOp::Trunc,
                };
                let prev = self.read_type()?;
                let new = self.read_type()?;
                if prev.lane() != new.lane() {
                    return Err("conversion lane mismatch".into());
                }
                let v = self.parse_value()?;
                Ok(self.arena.alloc(Expr::IntConv {
                    op,
                    v,
                    lane: prev.lane(),
                    prev_bits: prev.bits(),
                    new_bits: new.bits(),
                }))
            }
            "fptrunc" | "fpext" | "fptoui" | "fptosi" | "uitofp" | "sitofp" => {
                let op = match head {
                    "fptrunc" => FpConvOp::FpTrunc,
                    "fpext" => FpConvOp::FpExt,
                    "fptoui" => FpConvOp::FpToUi,
                    "fptosi" => FpConvOp::FpToSi,
                    "uitofp" => FpConvOp::UiToFp,
                    _ => FpConvOp::SiToFp,
                };
                let ty = self.read_type()?;
                let v = self.parse_value()?;
                Ok(self.arena.alloc(Expr::FpConv { op, v, ty }))
            }
            "extractelement" => {
                let ety = self.read_type()?;
                let v = self.parse_value()?;
                let idx = self.parse_const()?;
                Ok(self.arena.alloc(Expr::ExtractElement { v, idx, ety }))
            }
            "insertelement" => {
                let vty = self.read_type()?;
                let v = self.parse_value()?;
                let elt = self.parse_value()?;
                let idx = self.parse_const()?;
                Ok(self.arena.alloc(Expr::InsertElement { v, elt, idx, vty }))
            }
            "shuffle" => {
                let ety = self.read_type()?;
                let lhs = self.parse_value()?;
                let mask = self.parse_const()?;
                Ok(self.arena.alloc(Expr::FakeShuffle { lhs, rhs: None, mask, expect_ty: ety }))
            }
            "blend" => {
                let ety = self.read_type()?;
                let lhs = self.parse_value()?;
                let rhs = self.parse_value()?;
                let mask = self.parse_const()?;
                Ok(self
                    .arena
                    .alloc(Expr::FakeShuffle { lhs, rhs: Some(rhs), mask, expect_ty: ety }))
            }
            "select" => {
                let cond = self.parse_value()?;
                let lhs = self.parse_value()?;
                let rhs = self.parse_value()?;
                Ok(self.arena.alloc(Expr::Select { cond, lhs, rhs }))
            }
            "x86" => {
                let name = self.read_word()?;
                let op = intrinsics::find_binop(name)
                    .ok_or_else(|| format!("unknown intrinsic '{}'", name))?;
                let lhs = self.parse_value()?;
                let rhs = self.parse_value()?;
                Ok(self.arena.alloc(Expr::SimdBin { op, lhs, rhs }))
            }
            _ => Err(format!("unknown operator '{}'", head)),
        }
    }

    fn read_literal(&mut self, ty: Type) -> Result<Constant, String> {
        self.skip_whitespace();
        if self.current_char() == Some('<') {
            self.advance();
            let mut lanes = Vec::new();
            loop {
                lanes.push(self.read_u64()?);
                self.skip_whitespace();
                if self.current_char() == Some('>') {
                    self.advance();
                    break;
                }
                self.expect(',')?;
            }
            if lanes.len() != ty.lane() as usize {
                return Err(format!("literal lane count does not match {}", ty));
            }
            return Ok(Constant::vector(ty, lanes));
        }
        if self.text[self.pos..].starts_with("poison") {
            self.pos += "poison".len();
            return Ok(Constant::poison(ty));
        }
        let v = self.read_u64()?;
        Ok(Constant::splat(ty, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::printer::print_expr;

    fn live_ins() -> LiveIns {
        let mut m = LiveIns::new();
        m.insert("x".into(), (ValueRef::Param(0), Type::integer(32)));
        m.insert("y".into(), (ValueRef::Param(1), Type::integer(32)));
        m.insert("v".into(), (ValueRef::Param(2), Type::integer_vectorizable(4, 32)));
        m
    }

    #[test]
    fn parses_binary_with_constant() {
        let arena = ExprArena::new();
        let (e, consts) = parse_expr(&arena, "(add i32 %x (const i32 41))", &live_ins()).unwrap();
        assert_eq!(print_expr(e, &consts), "(add i32 %x (const i32 41))");
        assert_eq!(consts.len(), 1);
    }

    #[test]
    fn parses_nested_conversions() {
        let arena = ExprArena::new();
        let (e, consts) =
            parse_expr(&arena, "(zext i8 i32 (trunc i32 i8 %x))", &live_ins()).unwrap();
        assert_eq!(print_expr(e, &consts), "(zext i8 i32 (trunc i32 i8 %x))");
        assert_eq!(e.ty(), Type::integer(32));
    }

    #[test]
    fn parses_shuffle_and_blend() {
        let arena = ExprArena::new();
        let text = "(shuffle <4 x i32> %v (const <4 x i32> <0, 0, 0, 0>))";
        let (e, consts) = parse_expr(&arena, text, &live_ins()).unwrap();
        assert_eq!(print_expr(e, &consts), text);
    }

    #[test]
    fn rejects_unknown_live_in() {
        let arena = ExprArena::new();
        assert!(parse_expr(&arena, "(add i32 %nope %x)", &live_ins()).is_err());
    }

    #[test]
    fn round_trips_select_and_compare() {
        let arena = ExprArena::new();
        let mut li = live_ins();
        li.insert("c".into(), (ValueRef::Param(3), Type::bool()));
        let text = "(select %c (ult 1 %x %y) (const i1 1))";
        let (e, consts) = parse_expr(&arena, text, &li).unwrap();
        assert_eq!(print_expr(e, &consts), text);
    }
}
