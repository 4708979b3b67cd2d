// Canonical textual form for modules. The printed text doubles as the result
// cache key, so output is fully deterministic: instruction results are named
// by their arena index, operands carry their types, and FP constants print as
// raw bit patterns.

use super::{ConstKind, Constant, Function, InstId, Module, Opcode, ValueRef};
use std::fmt;
use std::fmt::Write as _;

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.decls {
            write!(f, "declare {} @{}(", d.ret_ty, d.name)?;
            for (i, p) in d.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", p)?;
            }
            writeln!(f, ")")?;
        }
        if !self.decls.is_empty() {
            writeln!(f)?;
        }
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "define {} @{}(", self.ret_ty, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} %{}", p.ty, p.name)?;
        }
        writeln!(f, ") {{")?;
        for (bi, block) in self.blocks.iter().enumerate() {
            if bi > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.name)?;
            for &id in &block.insts {
                writeln!(f, "  {}", print_inst(self, id))?;
            }
        }
        writeln!(f, "}}")
    }
}

/// Render `%name` / literal form of a value without its type.
pub fn value_name(func: &Function, v: ValueRef) -> String {
    match v {
        ValueRef::Param(i) => format!("%{}", func.params[i as usize].name),
        ValueRef::Inst(i) => format!("%t{}", i.0),
        ValueRef::Const(c) => const_literal(func.constant(c)),
    }
}

/// Render `<ty> <value>`.
pub fn typed_value(func: &Function, v: ValueRef) -> String {
    format!("{} {}", func.value_type(v), value_name(func, v))
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

pub fn print_inst(func: &Function, id: InstId) -> String {
    let inst = func.inst(id);
    let mut s = String::new();
    if inst.op.has_result() {
        let _ = write!(s, "%t{} = ", id.0);
    }
    match &inst.op {
        Opcode::Bin(op) => {
            let _ = write!(
                s,
                "{} {} {}, {}",
                op.name(),
                inst.ty,
                value_name(func, inst.args[0]),
                value_name(func, inst.args[1])
            );
        }
        Opcode::Un(op) => {
            let _ = write!(s, "{} {} {}", op.name(), inst.ty, value_name(func, inst.args[0]));
        }
        Opcode::ICmp(c) => {
            let _ = write!(
                s,
                "icmp {} {}, {}",
                c.name(),
                typed_value(func, inst.args[0]),
                value_name(func, inst.args[1])
            );
        }
        Opcode::FCmp(c) => {
            let _ = write!(
                s,
                "fcmp {} {}, {}",
                c.name(),
                typed_value(func, inst.args[0]),
                value_name(func, inst.args[1])
            );
        }
        Opcode::Cast(op) => {
            let _ = write!(
                s,
                "{} {} to {}",
                op.name(),
                typed_value(func, inst.args[0]),
                inst.ty
            );
        }
        Opcode::Select => {
            let _ = write!(
                s,
                "select {}, {}, {}",
                typed_value(func, inst.args[0]),
                typed_value(func, inst.args[1]),
                typed_value(func, inst.args[2])
            );
        }
        Opcode::ExtractElement => {
            let _ = write!(
                s,
                "extractelement {}, {}",
                typed_value(func, inst.args[0]),
                typed_value(func, inst.args[1])
            );
        }
        Opcode::InsertElement => {
            let _ = write!(
                s,
                "insertelement {}, {}, {}",
                typed_value(func, inst.args[0]),
                typed_value(func, inst.args[1]),
                typed_value(func, inst.args[2])
            );
        }
        Opcode::ShuffleVector => {
            let _ = write!(
                s,
                "shufflevector {}, {}, {}",
                typed_value(func, inst.args[0]),
                typed_value(func, inst.args[1]),
                typed_value(func, inst.args[2])
            );
        }
        Opcode::Call => {
            let _ = write!(s, "call {} @{}(", inst.ty, inst.callee.as_deref().unwrap_or("?"));
            for (i, a) in inst.args.iter().enumerate() {
                if i > 0 {
                    let _ = write!(s, ", ");
                }
                let _ = write!(s, "{}", typed_value(func, *a));
            }
            let _ = write!(s, ")");
        }
        Opcode::Phi => {
            let _ = write!(s, "phi {} ", inst.ty);
            for (i, (a, b)) in inst.args.iter().zip(inst.blocks.iter()).enumerate() {
                if i > 0 {
                    let _ = write!(s, ", ");
                }
                let _ = write!(
                    s,
                    "[ {}, %{} ]",
                    value_name(func, *a),
                    func.blocks[b.0 as usize].name
                );
            }
        }
        Opcode::Ret => {
            let _ = write!(s, "ret {}", typed_value(func, inst.args[0]));
        }
        Opcode::Br => {
            let _ = write!(s, "br label %{}", func.blocks[inst.blocks[0].0 as usize].name);
        }
        Opcode::CondBr => {
            let _ = write!(
                s,
                "br {}, label %{}, label %{}",
                typed_value(func, inst.args[0]),
                func.blocks[inst.blocks[0].0 as usize].name,
                func.blocks[inst.blocks[1].0 as usize].name
            );
        }
        Opcode::Switch => {
            let _ = write!(
                s,
                "switch {}, label %{} [",
                typed_value(func, inst.args[0]),
                func.blocks[inst.blocks[0].0 as usize].name
            );
            for (i, imm) in inst.imms.iter().enumerate() {
                let _ = write!(
                    s,
                    " {}, label %{}",
                    imm,
                    func.blocks[inst.blocks[i + 1].0 as usize].name
                );
            }
            let _ = write!(s, " ]");
        }
        Opcode::Unreachable => {
            let _ = write!(s, "unreachable");
        }
    }
    s
}
