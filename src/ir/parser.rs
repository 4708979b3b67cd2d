// Parser for the textual module format produced by `printer`. Recursive descent
// with a cursor struct; block and value references may appear before their
// definitions (phi incomings, forward branches), so operand slots are filled
// with placeholders and patched from resolve lists once the function is
// complete.

use super::{
    intrinsic_signature, BlockId, CastOp, ConstKind, Constant, Function, Inst, InstId,
    IntrinsicDecl, Module, ValueRef,
};
use crate::ops::{BinOp, FCmpCond, ICmpCond, UnOp};
use crate::types::Type;
use std::collections::HashMap;

pub fn parse_module(text: &str) -> Result<Module, String> {
    Parser::new(text).parse()
}

/// Parse a module expected to contain exactly one defined function.
pub fn parse_single_function(text: &str) -> Result<Module, String> {
    let m = parse_module(text)?;
    if m.functions.len() != 1 {
        return Err(format!("expected exactly one function, got {}", m.functions.len()));
    }
    Ok(m)
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    module: Module,
}

#[derive(Debug)]
struct Resolve {
    inst: usize,
    slot: usize,
    name: String,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Parser { text, pos: 0, module: Module::new() }
    }

    fn parse(mut self) -> Result<Module, String> {
        loop {
            self.skip_whitespace();
            if self.is_eof() {
                break;
            }
            if self.try_keyword("declare") {
                self.parse_declare()?;
            } else if self.try_keyword("define") {
                self.parse_define()?;
            } else {
                return Err(format!(
                    "expected 'declare' or 'define' at offset {}",
                    self.pos
                ));
            }
        }
        Ok(self.module)
    }

    // ---- lexical helpers ----

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn current_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                while let Some(c) = self.current_char() {
                    self.advance();
                    if c == '\n' {
                        break;
                    }
                }
            } else if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), String> {
        if !self.try_read(ch) {
            return Err(format!(
                "expected '{}' but found {:?} at offset {}",
                ch,
                self.current_char(),
                self.pos
            ));
        }
        Ok(())
    }

    fn peek_char_after_ws(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.current_char()
    }

    /// Consume `word` if it appears as the next identifier.
    fn try_keyword(&mut self, word: &str) -> bool {
        self.skip_whitespace();
        let rest = self.rest();
        if rest.starts_with(word) {
            let after = rest[word.len()..].chars().next();
            if after.map_or(true, |c| !c.is_alphanumeric() && c != '_' && c != '.') {
                self.pos += word.len();
                return true;
            }
        }
        false
    }

    fn read_identifier(&mut self) -> Result<&'a str, String> {
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
            return Err(format!("expected identifier at offset {}", start));
        }
        Ok(&self.text[start..self.pos])
    }

    fn read_u64(&mut self) -> Result<u64, String> {
        self.skip_whitespace();
        let neg = self.try_read('-');
        let start = self.pos;
        let hex = self.rest().starts_with("0x");
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
        if self.try_read('<') {
            let lane = self.read_u64()? as u32;
            if !self.try_keyword("x") {
                return Err("expected 'x' in vector type".into());
            }
            let elem = self.read_type()?;
            self.expect('>')?;
            return Ok(elem.as_vector(lane));
        }
        let id = self.read_identifier()?;
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

    // ---- structure ----

    fn parse_declare(&mut self) -> Result<(), String> {
        let ret_ty = self.read_type()?;
        self.expect('@')?;
        let name = self.read_identifier()?.to_string();
        self.expect('(')?;
        let mut params = Vec::new();
        if !self.try_read(')') {
            loop {
                params.push(self.read_type()?);
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }
        self.module.declare(IntrinsicDecl { name, params, ret_ty });
        Ok(())
    }

    fn parse_define(&mut self) -> Result<(), String> {
        let ret_ty = self.read_type()?;
        self.expect('@')?;
        let name = self.read_identifier()?.to_string();
        let mut func = Function::new(&name, ret_ty);
        self.expect('(')?;
        let mut values: HashMap<String, ValueRef> = HashMap::new();
        if !self.try_read(')') {
            loop {
                let ty = self.read_type()?;
                self.expect('%')?;
                let pname = self.read_identifier()?.to_string();
                let v = func.add_param(&pname, ty);
                values.insert(pname, v);
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }
        self.expect('{')?;

        let mut blocks: HashMap<String, BlockId> = HashMap::new();
        let mut value_resolves: Vec<Resolve> = Vec::new();
        let mut block_resolves: Vec<Resolve> = Vec::new();
        let mut cur_block: Option<BlockId> = None;

        loop {
            self.skip_whitespace();
            if self.try_read('}') {
                break;
            }
            if self.is_eof() {
                return Err("unexpected end of input inside function body".into());
            }
            // A block label is `name:`.
            let save = self.pos;
            if self.current_char() != Some('%') {
                let id = self.read_identifier()?;
                if self.try_read(':') {
                    let bname = id.to_string();
                    if blocks.contains_key(&bname) {
                        return Err(format!("duplicate block '{}'", bname));
                    }
                    let b = func.add_block(&bname);
                    blocks.insert(bname, b);
                    cur_block = Some(b);
                    continue;
                }
                self.pos = save;
            }
            let block = cur_block.ok_or("instruction before first block label")?;
            self.parse_inst(
                &mut func,
                block,
                &mut values,
                &mut value_resolves,
                &mut block_resolves,
            )?;
        }

        for r in value_resolves {
            let v = *values
                .get(&r.name)
                .ok_or_else(|| format!("unknown value '%{}'", r.name))?;
            func.insts[r.inst].args[r.slot] = v;
        }
        for r in block_resolves {
            let b = *blocks
                .get(&r.name)
                .ok_or_else(|| format!("unknown block '%{}'", r.name))?;
            func.insts[r.inst].blocks[r.slot] = b;
        }

        self.module.add_function(func);
        Ok(())
    }

    /// A value operand with known context type: `%name`, `poison`, or a
    /// literal. Unknown names become resolve entries filled in later.
    fn parse_operand(
        &mut self,
        func: &mut Function,
        ty: Type,
        values: &HashMap<String, ValueRef>,
        pending: &mut Vec<(String, usize)>,
        arg_idx: usize,
    ) -> Result<ValueRef, String> {
        self.skip_whitespace();
        if self.try_read('%') {
            let name = self.read_identifier()?.to_string();
            if let Some(v) = values.get(&name) {
                return Ok(*v);
            }
            pending.push((name, arg_idx));
            return Ok(ValueRef::Inst(InstId(u32::MAX)));
        }
        if self.try_keyword("poison") {
            return Ok(func.add_const(Constant::poison(ty)));
        }
        if self.peek_char_after_ws() == Some('<') {
            self.expect('<')?;
            let mut lanes = Vec::new();
            loop {
                lanes.push(self.read_u64()?);
                if self.try_read('>') {
                    break;
                }
                self.expect(',')?;
            }
            if lanes.len() != ty.lane() as usize {
                return Err(format!(
                    "vector literal has {} lanes, type {} wants {}",
                    lanes.len(),
                    ty,
                    ty.lane()
                ));
            }
            return Ok(func.add_const(Constant::vector(ty, lanes)));
        }
        let v = self.read_u64()?;
        Ok(func.add_const(Constant { ty, kind: ConstKind::Int(splat_or_scalar(ty, v)) }))
    }

    fn parse_inst(
        &mut self,
        func: &mut Function,
        block: BlockId,
        values: &mut HashMap<String, ValueRef>,
        value_resolves: &mut Vec<Resolve>,
        block_resolves: &mut Vec<Resolve>,
    ) -> Result<(), String> {
        let mut result: Option<String> = None;
        if self.try_read('%') {
            let name = self.read_identifier()?.to_string();
            self.expect('=')?;
            result = Some(name);
        }
        let op = self.read_identifier()?.to_string();
        let mut pending: Vec<(String, usize)> = Vec::new();
        let mut pending_blocks: Vec<(String, usize)> = Vec::new();

        let inst = self.parse_inst_body(&op, func, values, &mut pending, &mut pending_blocks)?;

        let has_result = inst.op.has_result();
        let id = func.push_inst(block, inst);
        if let Some(name) = result {
            if !has_result {
                return Err(format!("'{}' produces no result", op));
            }
            values.insert(name, ValueRef::Inst(id));
        }
        for (name, slot) in pending {
            value_resolves.push(Resolve { inst: id.0 as usize, slot, name });
        }
        for (name, slot) in pending_blocks {
            block_resolves.push(Resolve { inst: id.0 as usize, slot, name });
        }
        Ok(())
    }

    fn read_label(&mut self, pending_blocks: &mut Vec<(String, usize)>, slot: usize) -> Result<BlockId, String> {
        if !self.try_keyword("label") {
            return Err("expected 'label'".into());
        }
        self.expect('%')?;
        let name = self.read_identifier()?.to_string();
        pending_blocks.push((name, slot));
        Ok(BlockId(u32::MAX))
    }

    fn parse_inst_body(
        &mut self,
        op: &str,
        func: &mut Function,
        values: &HashMap<String, ValueRef>,
        pending: &mut Vec<(String, usize)>,
        pending_blocks: &mut Vec<(String, usize)>,
    ) -> Result<Inst, String> {
        if let Some(bop) = BinOp::from_name(op) {
            let ty = self.read_type()?;
            let a = self.parse_operand(func, ty, values, pending, 0)?;
            self.expect(',')?;
            let b = self.parse_operand(func, ty, values, pending, 1)?;
            return Ok(Inst::bin(bop, ty, a, b));
        }
        if let Some(uop) = UnOp::from_name(op) {
            let ty = self.read_type()?;
            let a = self.parse_operand(func, ty, values, pending, 0)?;
            return Ok(Inst::un(uop, ty, a));
        }
        if let Some(cop) = CastOp::from_name(op) {
            let from = self.read_type()?;
            let a = self.parse_operand(func, from, values, pending, 0)?;
            if !self.try_keyword("to") {
                return Err("expected 'to' in cast".into());
            }
            let to = self.read_type()?;
            return Ok(Inst::cast(cop, to, a));
        }
        match op {
            "icmp" => {
                let cname = self.read_identifier()?;
                let cond = ICmpCond::from_name(cname)
                    .ok_or_else(|| format!("bad icmp condition '{}'", cname))?;
                let ty = self.read_type()?;
                let a = self.parse_operand(func, ty, values, pending, 0)?;
                self.expect(',')?;
                let b = self.parse_operand(func, ty, values, pending, 1)?;
                let rty = Type::integer_vectorizable(ty.lane(), 1);
                Ok(Inst::icmp(cond, rty, a, b))
            }
            "fcmp" => {
                let cname = self.read_identifier()?;
                let cond = FCmpCond::from_name(cname)
                    .ok_or_else(|| format!("bad fcmp condition '{}'", cname))?;
                let ty = self.read_type()?;
                let a = self.parse_operand(func, ty, values, pending, 0)?;
                self.expect(',')?;
                let b = self.parse_operand(func, ty, values, pending, 1)?;
                let rty = Type::integer_vectorizable(ty.lane(), 1);
                Ok(Inst::fcmp(cond, rty, a, b))
            }
            "select" => {
                let cty = self.read_type()?;
                let c = self.parse_operand(func, cty, values, pending, 0)?;
                self.expect(',')?;
                let ty = self.read_type()?;
                let a = self.parse_operand(func, ty, values, pending, 1)?;
                self.expect(',')?;
                let bty = self.read_type()?;
                let b = self.parse_operand(func, bty, values, pending, 2)?;
                Ok(Inst::select(ty, c, a, b))
            }
            "extractelement" => {
                let vty = self.read_type()?;
                let v = self.parse_operand(func, vty, values, pending, 0)?;
                self.expect(',')?;
                let ity = self.read_type()?;
                let idx = self.parse_operand(func, ity, values, pending, 1)?;
                Ok(Inst::extract_element(vty.as_scalar(), v, idx))
            }
            "insertelement" => {
                let vty = self.read_type()?;
                let v = self.parse_operand(func, vty, values, pending, 0)?;
                self.expect(',')?;
                let ety = self.read_type()?;
                let e = self.parse_operand(func, ety, values, pending, 1)?;
                self.expect(',')?;
                let ity = self.read_type()?;
                let idx = self.parse_operand(func, ity, values, pending, 2)?;
                Ok(Inst::insert_element(vty, v, e, idx))
            }
            "shufflevector" => {
                let aty = self.read_type()?;
                let a = self.parse_operand(func, aty, values, pending, 0)?;
                self.expect(',')?;
                let bty = self.read_type()?;
                let b = self.parse_operand(func, bty, values, pending, 1)?;
                self.expect(',')?;
                let mty = self.read_type()?;
                let mask = self.parse_operand(func, mty, values, pending, 2)?;
                let rty = aty.as_vector(mty.lane());
                Ok(Inst::shuffle(rty, a, b, mask))
            }
            "call" => {
                let rty = self.read_type()?;
                self.expect('@')?;
                let callee = self.read_identifier()?.to_string();
                self.expect('(')?;
                let mut args = Vec::new();
                if !self.try_read(')') {
                    loop {
                        let aty = self.read_type()?;
                        let a = self.parse_operand(func, aty, values, pending, args.len())?;
                        args.push(a);
                        if self.try_read(')') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                if self.module.find_decl(&callee).is_none() {
                    if let Some(decl) = intrinsic_signature(&callee, rty) {
                        self.module.declare(decl);
                    }
                }
                Ok(Inst::call(&callee, rty, args))
            }
            "phi" => {
                let ty = self.read_type()?;
                let mut inst = Inst::phi(ty, Vec::new());
                let mut slot = 0usize;
                loop {
                    self.expect('[')?;
                    let v = self.parse_operand(func, ty, values, pending, slot)?;
                    self.expect(',')?;
                    self.expect('%')?;
                    let bname = self.read_identifier()?.to_string();
                    self.expect(']')?;
                    inst.args.push(v);
                    inst.blocks.push(BlockId(u32::MAX));
                    pending_blocks.push((bname, slot));
                    slot += 1;
                    if !self.try_read(',') {
                        break;
                    }
                }
                Ok(inst)
            }
            "ret" => {
                let ty = self.read_type()?;
                let v = self.parse_operand(func, ty, values, pending, 0)?;
                Ok(Inst::ret(v))
            }
            "br" => {
                self.skip_whitespace();
                if self.rest().starts_with("label") {
                    let mut i = Inst::br(BlockId(u32::MAX));
                    i.blocks[0] = self.read_label(pending_blocks, 0)?;
                    Ok(i)
                } else {
                    let cty = self.read_type()?;
                    let c = self.parse_operand(func, cty, values, pending, 0)?;
                    self.expect(',')?;
                    let mut i = Inst::cond_br(c, BlockId(u32::MAX), BlockId(u32::MAX));
                    i.blocks[0] = self.read_label(pending_blocks, 0)?;
                    self.expect(',')?;
                    i.blocks[1] = self.read_label(pending_blocks, 1)?;
                    Ok(i)
                }
            }
            "switch" => {
                let sty = self.read_type()?;
                let s = self.parse_operand(func, sty, values, pending, 0)?;
                self.expect(',')?;
                let mut i = Inst::switch(s, BlockId(u32::MAX), Vec::new());
                i.blocks[0] = self.read_label(pending_blocks, 0)?;
                self.expect('[')?;
                let mut slot = 1usize;
                while !self.try_read(']') {
                    let imm = self.read_u64()?;
                    self.expect(',')?;
                    i.imms.push(imm);
                    i.blocks.push(BlockId(u32::MAX));
                    let fixed = self.read_label(pending_blocks, slot)?;
                    i.blocks[slot] = fixed;
                    slot += 1;
                }
                Ok(i)
            }
            "unreachable" => Ok(Inst::unreachable()),
            _ => Err(format!("unknown instruction '{}'", op)),
        }
    }
}

fn splat_or_scalar(ty: Type, v: u64) -> Vec<u64> {
    vec![super::mask_to(v, ty.bits()); ty.lane() as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Opcode;

    #[test]
    fn parses_simple_function() {
        let m = parse_module(
            r#"
            define i32 @f(i32 %x, i32 %y) {
            entry:
              %s = add i32 %x, %y
              ret i32 %s
            }
            "#,
        )
        .unwrap();
        let f = &m.functions[0];
        assert_eq!(f.name, "f");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].insts.len(), 2);
    }

    #[test]
    fn parses_control_flow_with_phi() {
        let m = parse_module(
            r#"
            define i32 @g(i1 %c, i32 %a, i32 %b) {
            entry:
              br i1 %c, label %left, label %right
            left:
              %l = add i32 %a, 1
              br label %join
            right:
              %r = add i32 %b, 2
              br label %join
            join:
              %p = phi i32 [ %l, %left ], [ %r, %right ]
              ret i32 %p
            }
            "#,
        )
        .unwrap();
        let f = &m.functions[0];
        assert_eq!(f.blocks.len(), 4);
        let phi = f
            .insts
            .iter()
            .find(|i| matches!(i.op, Opcode::Phi))
            .unwrap();
        assert_eq!(phi.args.len(), 2);
        assert_eq!(phi.blocks.len(), 2);
    }

    #[test]
    fn parses_vectors_and_shuffle() {
        let m = parse_module(
            r#"
            define <4 x i32> @h(<4 x i32> %v) {
            entry:
              %s = shufflevector <4 x i32> %v, <4 x i32> poison, <4 x i32> <0, 0, 0, 0>
              ret <4 x i32> %s
            }
            "#,
        )
        .unwrap();
        let f = &m.functions[0];
        let sh = &f.insts[0];
        assert!(matches!(sh.op, Opcode::ShuffleVector));
        assert_eq!(sh.ty, Type::integer_vectorizable(4, 32));
    }

    #[test]
    fn print_parse_round_trip() {
        let text = r#"
            define i32 @f(i32 %x, i32 %y) {
            entry:
              %c = icmp ult i32 %x, %y
              %s = select i1 %c, i32 %x, i32 %y
              ret i32 %s
            }
            "#;
        let m = parse_module(text).unwrap();
        let printed = m.to_string();
        let m2 = parse_module(&printed).unwrap();
        assert_eq!(printed, m2.to_string());
    }

    #[test]
    fn call_synthesizes_catalog_decl() {
        let m = parse_module(
            r#"
            define <16 x i8> @f(<16 x i8> %a, <16 x i8> %b) {
            entry:
              %r = call <16 x i8> @ssse3.pshuf.b.128(<16 x i8> %a, <16 x i8> %b)
              ret <16 x i8> %r
            }
            "#,
        )
        .unwrap();
        assert!(m.find_decl("ssse3.pshuf.b.128").is_some());
    }
}
