// Host SSA module format. A function is a CFG of basic blocks over typed
// instructions stored in flat vectors with u32 newtype ids; blocks hold ordered
// instruction id lists with the terminator last, and constants live in a
// per-function pool. This is the only representation the slicer, enumerator,
// materializer, verifier and cost oracle operate on.
//
// Conventions: entry block is index 0; phi instructions precede non-phi
// instructions in a block; every operand of an instruction is a parameter, a
// pool constant, or another instruction of the same function.

use crate::intrinsics;
use crate::ops::{BinOp, FCmpCond, ICmpCond, UnOp};
use crate::types::Type;
use std::collections::HashSet;

pub mod analysis;
pub mod interp;
pub mod knownbits;
pub mod parser;
pub mod printer;
pub mod verifier;

/// Instruction id within one [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

/// Block id within one [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Constant-pool id within one [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstId(pub u32);

/// A use of a value: parameter, instruction result, or pool constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    Param(u32),
    Inst(InstId),
    Const(ConstId),
}

/// Constant payload: per-lane bit patterns (floats as raw bits), or poison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstKind {
    Int(Vec<u64>),
    Poison,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constant {
    pub ty: Type,
    pub kind: ConstKind,
}

impl Constant {
    pub fn scalar(ty: Type, bits: u64) -> Constant {
        debug_assert!(ty.lane() == 1);
        Constant { ty, kind: ConstKind::Int(vec![mask_to(bits, ty.bits())]) }
    }

    pub fn splat(ty: Type, bits: u64) -> Constant {
        let lanes = vec![mask_to(bits, ty.bits()); ty.lane() as usize];
        Constant { ty, kind: ConstKind::Int(lanes) }
    }

    pub fn vector(ty: Type, lanes: Vec<u64>) -> Constant {
        debug_assert_eq!(lanes.len(), ty.lane() as usize);
        let lanes = lanes.into_iter().map(|v| mask_to(v, ty.bits())).collect();
        Constant { ty, kind: ConstKind::Int(lanes) }
    }

    pub fn poison(ty: Type) -> Constant {
        Constant { ty, kind: ConstKind::Poison }
    }

    pub fn is_poison(&self) -> bool {
        matches!(self.kind, ConstKind::Poison)
    }

    /// Lane `i` as a masked bit pattern; poison reads as zero.
    pub fn lane(&self, i: usize) -> u64 {
        match &self.kind {
            ConstKind::Int(lanes) => lanes[i],
            ConstKind::Poison => 0,
        }
    }

    pub fn lanes(&self) -> &[u64] {
        match &self.kind {
            ConstKind::Int(lanes) => lanes,
            ConstKind::Poison => &[],
        }
    }
}

/// Truncate a bit pattern to `bits` bits.
pub fn mask_to(v: u64, bits: u32) -> u64 {
    if bits >= 64 {
        v
    } else {
        v & ((1u64 << bits) - 1)
    }
}

/// Instruction opcodes. Kind payloads live here; operands live in
/// [`Inst::args`] / [`Inst::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Bin(BinOp),
    Un(UnOp),
    ICmp(ICmpCond),
    FCmp(FCmpCond),
    Cast(CastOp),
    Select,
    ExtractElement,
    InsertElement,
    ShuffleVector,
    Call,
    Phi,
    Ret,
    Br,
    CondBr,
    Switch,
    Unreachable,
}

/// Width and representation conversions, including the free bit reinterpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Sext,
    Zext,
    Trunc,
    FpTrunc,
    FpExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    Bitcast,
}

impl CastOp {
    pub fn name(self) -> &'static str {
        match self {
            CastOp::Sext => "sext",
            CastOp::Zext => "zext",
            CastOp::Trunc => "trunc",
            CastOp::FpTrunc => "fptrunc",
            CastOp::FpExt => "fpext",
            CastOp::FpToUi => "fptoui",
            CastOp::FpToSi => "fptosi",
            CastOp::UiToFp => "uitofp",
            CastOp::SiToFp => "sitofp",
            CastOp::Bitcast => "bitcast",
        }
    }

    pub fn from_name(s: &str) -> Option<CastOp> {
        match s {
            "sext" => Some(CastOp::Sext),
            "zext" => Some(CastOp::Zext),
            "trunc" => Some(CastOp::Trunc),
            "fptrunc" => Some(CastOp::FpTrunc),
            "fpext" => Some(CastOp::FpExt),
            "fptoui" => Some(CastOp::FpToUi),
            "fptosi" => Some(CastOp::FpToSi),
            "uitofp" => Some(CastOp::UiToFp),
            "sitofp" => Some(CastOp::SiToFp),
            "bitcast" => Some(CastOp::Bitcast),
            _ => None,
        }
    }
}

impl Opcode {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Ret | Opcode::Br | Opcode::CondBr | Opcode::Switch | Opcode::Unreachable
        )
    }

    pub fn has_result(&self) -> bool {
        !self.is_terminator()
    }

    pub fn name(&self) -> String {
        match self {
            Opcode::Bin(op) => op.name().to_string(),
            Opcode::Un(op) => op.name().to_string(),
            Opcode::ICmp(c) => format!("icmp {}", c.name()),
            Opcode::FCmp(c) => format!("fcmp {}", c.name()),
            Opcode::Cast(c) => c.name().to_string(),
            Opcode::Select => "select".into(),
            Opcode::ExtractElement => "extractelement".into(),
            Opcode::InsertElement => "insertelement".into(),
            Opcode::ShuffleVector => "shufflevector".into(),
            Opcode::Call => "call".into(),
            Opcode::Phi => "phi".into(),
            Opcode::Ret => "ret".into(),
            Opcode::Br => "br".into(),
            Opcode::CondBr => "br".into(),
            Opcode::Switch => "switch".into(),
            Opcode::Unreachable => "unreachable".into(),
        }
    }
}

/// One instruction. Terminators have `ty == Type::null()`.
///
/// Operand layout by opcode:
/// - `Phi`: `args[i]` arrives from `blocks[i]`.
/// - `CondBr`: `args[0]` condition, `blocks = [then, else]`.
/// - `Switch`: `args[0]` scrutinee, `blocks[0]` default, case `imms[i]`
///   jumps to `blocks[i + 1]`.
/// - `ShuffleVector`: `args = [lhs, rhs, mask]` with a constant mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub op: Opcode,
    pub ty: Type,
    pub args: Vec<ValueRef>,
    pub blocks: Vec<BlockId>,
    pub callee: Option<String>,
    pub imms: Vec<u64>,
}

impl Inst {
    fn new(op: Opcode, ty: Type, args: Vec<ValueRef>) -> Inst {
        Inst { op, ty, args, blocks: Vec::new(), callee: None, imms: Vec::new() }
    }

    pub fn bin(op: BinOp, ty: Type, a: ValueRef, b: ValueRef) -> Inst {
        Inst::new(Opcode::Bin(op), ty, vec![a, b])
    }

    pub fn un(op: UnOp, ty: Type, a: ValueRef) -> Inst {
        Inst::new(Opcode::Un(op), ty, vec![a])
    }

    pub fn icmp(cond: ICmpCond, ty: Type, a: ValueRef, b: ValueRef) -> Inst {
        Inst::new(Opcode::ICmp(cond), ty, vec![a, b])
    }

    pub fn fcmp(cond: FCmpCond, ty: Type, a: ValueRef, b: ValueRef) -> Inst {
        Inst::new(Opcode::FCmp(cond), ty, vec![a, b])
    }

    pub fn cast(op: CastOp, to: Type, a: ValueRef) -> Inst {
        Inst::new(Opcode::Cast(op), to, vec![a])
    }

    pub fn select(ty: Type, cond: ValueRef, t: ValueRef, f: ValueRef) -> Inst {
        Inst::new(Opcode::Select, ty, vec![cond, t, f])
    }

    pub fn extract_element(ty: Type, v: ValueRef, idx: ValueRef) -> Inst {
        Inst::new(Opcode::ExtractElement, ty, vec![v, idx])
    }

    pub fn insert_element(ty: Type, v: ValueRef, elt: ValueRef, idx: ValueRef) -> Inst {
        Inst::new(Opcode::InsertElement, ty, vec![v, elt, idx])
    }

    pub fn shuffle(ty: Type, a: ValueRef, b: ValueRef, mask: ValueRef) -> Inst {
        Inst::new(Opcode::ShuffleVector, ty, vec![a, b, mask])
    }

    pub fn call(callee: &str, ty: Type, args: Vec<ValueRef>) -> Inst {
        let mut i = Inst::new(Opcode::Call, ty, args);
        i.callee = Some(callee.to_string());
        i
    }

    pub fn phi(ty: Type, incoming: Vec<(ValueRef, BlockId)>) -> Inst {
        let mut i = Inst::new(Opcode::Phi, ty, Vec::new());
        for (v, b) in incoming {
            i.args.push(v);
            i.blocks.push(b);
        }
        i
    }

    pub fn ret(v: ValueRef) -> Inst {
        Inst::new(Opcode::Ret, Type::null(), vec![v])
    }

    pub fn br(dest: BlockId) -> Inst {
        let mut i = Inst::new(Opcode::Br, Type::null(), Vec::new());
        i.blocks.push(dest);
        i
    }

    pub fn cond_br(cond: ValueRef, t: BlockId, f: BlockId) -> Inst {
        let mut i = Inst::new(Opcode::CondBr, Type::null(), vec![cond]);
        i.blocks = vec![t, f];
        i
    }

    pub fn switch(v: ValueRef, default: BlockId, cases: Vec<(u64, BlockId)>) -> Inst {
        let mut i = Inst::new(Opcode::Switch, Type::null(), vec![v]);
        i.blocks.push(default);
        for (imm, b) in cases {
            i.imms.push(imm);
            i.blocks.push(b);
        }
        i
    }

    pub fn unreachable() -> Inst {
        Inst::new(Opcode::Unreachable, Type::null(), Vec::new())
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.op, Opcode::Phi)
    }

    pub fn is_terminator(&self) -> bool {
        self.op.is_terminator()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub name: String,
    pub insts: Vec<InstId>,
}

/// A declared external intrinsic with its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrinsicDecl {
    pub name: String,
    pub params: Vec<Type>,
    pub ret_ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<Param>,
    pub blocks: Vec<Block>,
    pub insts: Vec<Inst>,
    pub consts: Vec<Constant>,
}

impl Function {
    pub fn new(name: &str, ret_ty: Type) -> Function {
        Function {
            name: name.to_string(),
            ret_ty,
            params: Vec::new(),
            blocks: Vec::new(),
            insts: Vec::new(),
            consts: Vec::new(),
        }
    }

    pub fn add_param(&mut self, name: &str, ty: Type) -> ValueRef {
        self.params.push(Param { name: name.to_string(), ty });
        ValueRef::Param(self.params.len() as u32 - 1)
    }

    pub fn add_block(&mut self, name: &str) -> BlockId {
        self.blocks.push(Block { name: name.to_string(), insts: Vec::new() });
        BlockId(self.blocks.len() as u32 - 1)
    }

    /// Append an instruction to the arena without placing it in a block.
    pub fn add_inst(&mut self, inst: Inst) -> InstId {
        self.insts.push(inst);
        InstId(self.insts.len() as u32 - 1)
    }

    /// Append an instruction to the end of `block`.
    pub fn push_inst(&mut self, block: BlockId, inst: Inst) -> InstId {
        let id = self.add_inst(inst);
        self.blocks[block.0 as usize].insts.push(id);
        id
    }

    /// Intern a constant, reusing an existing pool slot when equal.
    pub fn add_const(&mut self, c: Constant) -> ValueRef {
        if let Some(pos) = self.consts.iter().position(|e| *e == c) {
            return ValueRef::Const(ConstId(pos as u32));
        }
        self.consts.push(c);
        ValueRef::Const(ConstId(self.consts.len() as u32 - 1))
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.0 as usize]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.0 as usize]
    }

    pub fn constant(&self, id: ConstId) -> &Constant {
        &self.consts[id.0 as usize]
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn value_type(&self, v: ValueRef) -> Type {
        match v {
            ValueRef::Param(i) => self.params[i as usize].ty,
            ValueRef::Inst(i) => self.inst(i).ty,
            ValueRef::Const(i) => self.constant(i).ty,
        }
    }

    /// Terminator of `block`; the builder keeps it last.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let insts = &self.blocks[block.0 as usize].insts;
        insts.last().copied().filter(|id| self.inst(*id).is_terminator())
    }

    pub fn succs(&self, block: BlockId) -> Vec<BlockId> {
        match self.terminator(block) {
            Some(t) => self.inst(t).blocks.clone(),
            None => Vec::new(),
        }
    }

    /// Block containing `inst`, by scan. Functions here are slice-sized.
    pub fn block_of(&self, inst: InstId) -> Option<BlockId> {
        for (bi, b) in self.blocks.iter().enumerate() {
            if b.insts.contains(&inst) {
                return Some(BlockId(bi as u32));
            }
        }
        None
    }

    /// The unique `ret` instruction, if the function has exactly one.
    pub fn unique_return(&self) -> Option<InstId> {
        let mut found = None;
        for (i, inst) in self.insts.iter().enumerate() {
            if matches!(inst.op, Opcode::Ret) {
                let id = InstId(i as u32);
                if self.block_of(id).is_none() {
                    continue;
                }
                if found.is_some() {
                    return None;
                }
                found = Some(id);
            }
        }
        found
    }

    /// Remove instructions whose results are unused, bottom-up. Terminators
    /// and their transitive operands stay. All calls here are to pure
    /// intrinsics, so unused calls are dead too.
    pub fn eliminate_dead_code(&mut self) {
        let mut live: HashSet<InstId> = HashSet::new();
        let mut work: Vec<InstId> = Vec::new();
        for b in &self.blocks {
            for &id in &b.insts {
                if self.inst(id).is_terminator() {
                    work.push(id);
                }
            }
        }
        while let Some(id) = work.pop() {
            if !live.insert(id) {
                continue;
            }
            for &arg in &self.inst(id).args {
                if let ValueRef::Inst(dep) = arg {
                    work.push(dep);
                }
            }
        }
        for b in &mut self.blocks {
            b.insts.retain(|id| live.contains(id));
        }
    }

    /// Iterate instruction ids in block layout order.
    pub fn inst_ids_in_layout(&self) -> Vec<InstId> {
        self.blocks.iter().flat_map(|b| b.insts.iter().copied()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub functions: Vec<Function>,
    pub decls: Vec<IntrinsicDecl>,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    pub fn add_function(&mut self, f: Function) -> usize {
        self.functions.push(f);
        self.functions.len() - 1
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_decl(&self, name: &str) -> Option<&IntrinsicDecl> {
        self.decls.iter().find(|d| d.name == name)
    }

    /// Re-declare an intrinsic; idempotent.
    pub fn declare(&mut self, decl: IntrinsicDecl) {
        if self.find_decl(&decl.name).is_none() {
            self.decls.push(decl);
        }
    }

    /// Drop declarations no function calls anymore.
    pub fn remove_unused_decls(&mut self) {
        let mut used: HashSet<String> = HashSet::new();
        for f in &self.functions {
            for inst in &f.insts {
                if let Some(callee) = &inst.callee {
                    used.insert(callee.clone());
                }
            }
        }
        self.decls.retain(|d| used.contains(&d.name));
    }
}

/// Signature for a cataloged intrinsic call with the given name, if known.
pub fn intrinsic_signature(name: &str, ret_ty: Type) -> Option<IntrinsicDecl> {
    if let Some(id) = intrinsics::find_binop(name) {
        return Some(IntrinsicDecl {
            name: name.to_string(),
            params: vec![intrinsics::binop_op0_ty(id), intrinsics::binop_op1_ty(id)],
            ret_ty: intrinsics::binop_ret_ty(id),
        });
    }
    if let Some(id) = intrinsics::find_ternop(name) {
        let op = intrinsics::ternop(id);
        let t = |s: (u32, u32)| Type::integer_vectorizable(s.0, s.1);
        return Some(IntrinsicDecl {
            name: name.to_string(),
            params: vec![t(op.op0), t(op.op1), t(op.op2)],
            ret_ty: t(op.ret),
        });
    }
    if intrinsics::is_intrinsic_name(name) {
        // Width-generic intrinsics take and return the instruction type;
        // the binary ones take it twice.
        let binary = crate::ops::BinOp::from_name(name).is_some()
            || matches!(name, "maxnum" | "minnum" | "maximum" | "minimum" | "copysign");
        let params = if binary { vec![ret_ty, ret_ty] } else { vec![ret_ty] };
        return Some(IntrinsicDecl { name: name.to_string(), params, ret_ty });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::BinOp;

    fn add_fn() -> Function {
        let mut f = Function::new("f", Type::integer(32));
        let x = f.add_param("x", Type::integer(32));
        let y = f.add_param("y", Type::integer(32));
        let bb = f.add_block("entry");
        let s = f.push_inst(bb, Inst::bin(BinOp::Add, Type::integer(32), x, y));
        f.push_inst(bb, Inst::ret(ValueRef::Inst(s)));
        f
    }

    #[test]
    fn build_and_query() {
        let f = add_fn();
        assert_eq!(f.blocks.len(), 1);
        let ret = f.unique_return().unwrap();
        assert!(f.inst(ret).is_terminator());
        assert_eq!(f.value_type(f.inst(ret).args[0]), Type::integer(32));
    }

    #[test]
    fn dce_removes_unused() {
        let mut f = add_fn();
        let x = ValueRef::Param(0);
        let dead = Inst::bin(BinOp::Mul, Type::integer(32), x, x);
        let entry = f.entry();
        let id = f.add_inst(dead);
        f.blocks[entry.0 as usize].insts.insert(0, id);
        assert_eq!(f.blocks[0].insts.len(), 3);
        f.eliminate_dead_code();
        assert_eq!(f.blocks[0].insts.len(), 2);
    }

    #[test]
    fn constants_are_interned() {
        let mut f = Function::new("g", Type::integer(8));
        let a = f.add_const(Constant::scalar(Type::integer(8), 7));
        let b = f.add_const(Constant::scalar(Type::integer(8), 7));
        assert_eq!(a, b);
        assert_eq!(f.consts.len(), 1);
    }

    #[test]
    fn constant_lanes_masked() {
        let c = Constant::splat(Type::integer_vectorizable(4, 8), 0x1ff);
        assert_eq!(c.lanes(), &[0xff, 0xff, 0xff, 0xff]);
    }
}
