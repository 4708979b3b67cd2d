// Program slicer: given an instruction in a host function, extract a
// self-contained, loop-free, single-return function that computes the same
// value, lifting every unknown dependency into a parameter.
//
// The extraction declines (returns None) on: roots inside non-simplified
// loops, phis with incomings that are not instructions of the same loop,
// non-branch terminators among the selected blocks, and block closures that
// would reintroduce a loop. A slice that fails the module verifier afterwards
// is a bug and panics.

use crate::intrinsics;
use crate::ir::analysis::{is_loop_free, predecessors, Analysis};
use crate::ir::verifier::verify_function;
use crate::ir::{
    BlockId, Function, Inst, InstId, IntrinsicDecl, Module, Opcode, ValueRef,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Backward-walk depth bound.
const MAX_DEPTH: u32 = 5;

/// A successfully extracted slice.
pub struct Slice {
    /// Fresh module holding the slice function and its intrinsic decls.
    pub module: Module,
    /// The root instruction inside the slice function (the returned value).
    pub root: InstId,
    /// Slice-value -> host-value map for every cloned instruction and lifted
    /// parameter; the driver uses it to materialize rewrites back into the
    /// host function.
    pub value_map: HashMap<ValueRef, ValueRef>,
}

impl Slice {
    pub fn function(&self) -> &Function {
        &self.module.functions[0]
    }
}

pub struct Slicer<'m> {
    module: &'m Module,
    func: &'m Function,
    analysis: Analysis,
}

impl<'m> Slicer<'m> {
    pub fn new(module: &'m Module, func: &'m Function) -> Slicer<'m> {
        Slicer { module, func, analysis: Analysis::new(func) }
    }

    pub fn extract_expr(&self, root: InstId) -> Option<Slice> {
        let func = self.func;
        let root_inst = func.inst(root);
        if !root_inst.op.has_result() || !root_inst.ty.is_valid() {
            return None;
        }
        let vbb = func.block_of(root)?;

        let loopv = self.analysis.loop_of(vbb);
        if let Some(header) = loopv {
            if !self.analysis.is_loop_simplified(func, header) {
                log::debug!(target: "peepopt::slice", "loop around root is not in simplified form");
                return None;
            }
        }

        let preds = predecessors(func);

        // Pass 1: backward BFS collecting instructions, blocks, and the
        // block dependencies that pass 2 must connect.
        let mut visited: HashSet<InstId> = HashSet::new();
        let mut insts: Vec<InstId> = Vec::new();
        let mut bb_insts: BTreeMap<BlockId, Vec<InstId>> = BTreeMap::new();
        let mut blocks: BTreeSet<BlockId> = BTreeSet::new();
        let mut bb_deps: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
        let mut have_phi = false;
        let mut worklist: VecDeque<(InstId, u32)> = VecDeque::new();
        worklist.push_back((root, 0));

        while let Some((id, depth)) = worklist.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let inst = func.inst(id);
            let ibb = func.block_of(id)?;

            // Do not harvest beyond the loop boundary of the root.
            if self.analysis.loop_of(ibb) != loopv {
                continue;
            }

            if let Opcode::Call = inst.op {
                let callee = inst.callee.as_deref().unwrap_or("");
                if !intrinsics::is_intrinsic_name(callee) && self.module.find_decl(callee).is_none()
                {
                    log::debug!(target: "peepopt::slice", "unknown callee '{}'", callee);
                    continue;
                }
            } else if inst.is_phi() {
                for (v, income) in inst.args.iter().zip(&inst.blocks) {
                    let ok = matches!(v, ValueRef::Inst(_))
                        && self.analysis.loop_of(*income) == loopv;
                    if !ok {
                        log::debug!(target: "peepopt::slice", "phi has external incoming");
                        return None;
                    }
                }
                for (v, income) in inst.args.iter().zip(&inst.blocks) {
                    blocks.insert(*income);
                    let ValueRef::Inst(vi) = v else { continue };
                    let vb = func.block_of(*vi)?;
                    let income_preds = preds.get(income).cloned().unwrap_or_default();
                    if income_preds.contains(&vb) {
                        continue;
                    }
                    bb_deps.entry(*income).or_default().insert(vb);
                }
                have_phi = true;
            }

            insts.push(id);
            bb_insts.entry(ibb).or_default().push(id);
            let never_visited = blocks.insert(ibb);

            if depth > MAX_DEPTH {
                continue;
            }

            // Branch conditions of blocks along the path.
            if ibb != vbb && never_visited {
                let term = func.terminator(ibb)?;
                match func.inst(term).op {
                    Opcode::Br => {}
                    Opcode::CondBr => {
                        if let ValueRef::Inst(c) = func.inst(term).args[0] {
                            let cbb = func.block_of(c)?;
                            let ibb_preds = preds.get(&ibb).cloned().unwrap_or_default();
                            if cbb != ibb && !ibb_preds.contains(&cbb) {
                                bb_deps.entry(ibb).or_default().insert(cbb);
                            }
                            worklist.push_back((c, depth + 1));
                        }
                    }
                    _ => return None,
                }
            }

            for op in &inst.args {
                let ValueRef::Inst(oi) = op else { continue };
                let ob = func.block_of(*oi)?;
                let ipreds = preds.get(&ibb).cloned().unwrap_or_default();
                if ipreds.contains(&ob) {
                    continue;
                }
                bb_deps.entry(ibb).or_default().insert(ob);
                worklist.push_back((*oi, depth + 1));
            }
        }

        if insts.is_empty() {
            return None;
        }

        // Pass 2: pull in intermediate blocks so every dependency stays
        // reachable; decline if that closure needs a loop.
        for (bb, deps) in &bb_deps {
            let mut seen: HashSet<BlockId> = HashSet::new();
            let mut work: VecDeque<(BTreeSet<BlockId>, BlockId)> = VecDeque::new();
            work.push_back(([*bb].into_iter().collect(), *bb));
            while let Some((mut path, ibb)) = work.pop_front() {
                if deps.contains(&ibb) {
                    blocks.extend(path.iter().copied());
                    if seen.insert(ibb) {
                        path.clear();
                        path.insert(ibb);
                    } else {
                        continue;
                    }
                }
                for pred in preds.get(&ibb).cloned().unwrap_or_default() {
                    if path.contains(&pred) {
                        return None;
                    }
                    let mut p = path.clone();
                    p.insert(pred);
                    work.push_back((p, pred));
                }
            }
        }

        // Every selected block must end in a plain branch.
        for bb in &blocks {
            let term = func.terminator(*bb)?;
            if !matches!(func.inst(term).op, Opcode::Br | Opcode::CondBr) {
                return None;
            }
        }

        Some(self.build(root, vbb, have_phi, &blocks, &bb_insts, &insts))
    }

    /// Passes 3-5: clone blocks and instructions, wire branches through the
    /// sink, lift unknown operands into parameters, pick the entry.
    fn build(
        &self,
        root: InstId,
        vbb: BlockId,
        have_phi: bool,
        blocks: &BTreeSet<BlockId>,
        bb_insts: &BTreeMap<BlockId, Vec<InstId>>,
        insts: &[InstId],
    ) -> Slice {
        let func = self.func;
        let inst_set: HashSet<InstId> = insts.iter().copied().collect();

        // Wired successor targets per cloned block (None = sink).
        let mut wiring: BTreeMap<BlockId, Vec<Option<BlockId>>> = BTreeMap::new();
        let mut cond_of: BTreeMap<BlockId, ValueRef> = BTreeMap::new();
        if have_phi {
            for &bb in blocks {
                if bb == vbb {
                    continue;
                }
                let term = func.terminator(bb).expect("selected block has a terminator");
                let t = func.inst(term);
                let mapped: Vec<Option<BlockId>> = t
                    .blocks
                    .iter()
                    .map(|d| if blocks.contains(d) { Some(*d) } else { None })
                    .collect();
                if matches!(t.op, Opcode::CondBr) {
                    cond_of.insert(bb, t.args[0]);
                }
                wiring.insert(bb, mapped);
            }
        }

        // Entry candidates: cloned blocks that no cloned block branches to.
        let mut has_pred: HashSet<BlockId> = HashSet::new();
        for targets in wiring.values() {
            for t in targets.iter().flatten() {
                has_pred.insert(*t);
            }
        }
        let entry_candidates: Vec<BlockId> = if have_phi {
            blocks.iter().copied().filter(|b| !has_pred.contains(b)).collect()
        } else {
            Vec::new()
        };

        let mut out = Function::new(&format!("sliced_{}", func.name), func.inst(root).ty);
        let mut value_map: HashMap<ValueRef, ValueRef> = HashMap::new(); // host -> slice
        let mut decls: Vec<IntrinsicDecl> = Vec::new();

        // Final block order: [dispatch entry?], blocks (entry candidate
        // first), sink.
        let multi_entry = entry_candidates.len() > 1;
        let mut order: Vec<BlockId> = Vec::new();
        if have_phi {
            if entry_candidates.is_empty() {
                panic!("slicer: no entry block found for {}", func.name);
            }
            if !multi_entry {
                order.push(entry_candidates[0]);
                order.extend(blocks.iter().copied().filter(|b| *b != entry_candidates[0]));
            } else {
                order.extend(blocks.iter().copied());
            }
        }

        let mut new_block_of: HashMap<BlockId, BlockId> = HashMap::new();
        let dispatch = if multi_entry { Some(out.add_block("entry")) } else { None };
        for bb in &order {
            let name = format!("bb{}", bb.0);
            new_block_of.insert(*bb, out.add_block(&name));
        }
        let single = if have_phi { None } else { Some(out.add_block("entry")) };
        let sink = out.add_block("sink");

        // Parameter lifting.
        let mut lift = |host: ValueRef, out: &mut Function, value_map: &mut HashMap<ValueRef, ValueRef>| -> ValueRef {
            if let Some(v) = value_map.get(&host) {
                return *v;
            }
            let mapped = match host {
                ValueRef::Const(c) => out.add_const(func.constant(c).clone()),
                ValueRef::Param(_) | ValueRef::Inst(_) => {
                    let n = out.params.len();
                    out.add_param(&format!("a{}", n), func.value_type(host))
                }
            };
            value_map.insert(host, mapped);
            mapped
        };

        // Clone an instruction with remapped operands. Unknown instruction
        // operands become parameters; names and any metadata are not carried.
        let clone_inst = |id: InstId,
                          out: &mut Function,
                          value_map: &mut HashMap<ValueRef, ValueRef>,
                          new_block_of: &HashMap<BlockId, BlockId>,
                          decls: &mut Vec<IntrinsicDecl>,
                          lift: &mut dyn FnMut(ValueRef, &mut Function, &mut HashMap<ValueRef, ValueRef>) -> ValueRef|
         -> Inst {
            let host = func.inst(id);
            let mut cloned = host.clone();
            for arg in cloned.args.iter_mut() {
                let cur = *arg;
                *arg = match cur {
                    ValueRef::Inst(i) if inst_set.contains(&i) => {
                        *value_map.get(&ValueRef::Inst(i)).expect("operand scheduled before use")
                    }
                    other => lift(other, out, value_map),
                };
            }
            for b in cloned.blocks.iter_mut() {
                *b = *new_block_of.get(b).unwrap_or(&sink);
            }
            if let Some(callee) = &cloned.callee {
                if let Some(decl) = self
                    .module
                    .find_decl(callee)
                    .cloned()
                    .or_else(|| crate::ir::intrinsic_signature(callee, cloned.ty))
                {
                    if !decls.iter().any(|d| d.name == decl.name) {
                        decls.push(decl);
                    }
                }
            }
            cloned
        };

        if have_phi {
            // Clone blocks in topological order so every cross-block operand
            // is mapped before its use; branches are wired afterwards.
            let clone_order = topo_blocks(&order, &wiring);
            for bb in &clone_order {
                let nb = new_block_of[bb];
                let scheduled = schedule_insts(func, bb_insts.get(bb).map_or(&[][..], |v| v));
                for id in scheduled {
                    if func.inst(id).is_terminator() {
                        continue;
                    }
                    let cloned =
                        clone_inst(id, &mut out, &mut value_map, &new_block_of, &mut decls, &mut lift);
                    let new_id = out.push_inst(nb, cloned);
                    value_map.insert(ValueRef::Inst(id), ValueRef::Inst(new_id));
                }
            }
            // Branch wiring.
            for (bb, targets) in &wiring {
                let nb = new_block_of[bb];
                let term = match (cond_of.get(bb), targets.len()) {
                    (Some(c), 2) => {
                        let cond = match c {
                            ValueRef::Inst(i) if inst_set.contains(i) => value_map[&ValueRef::Inst(*i)],
                            other => lift(*other, &mut out, &mut value_map),
                        };
                        Inst::cond_br(
                            cond,
                            targets[0].map_or(sink, |t| new_block_of[&t]),
                            targets[1].map_or(sink, |t| new_block_of[&t]),
                        )
                    }
                    (None, 1) => Inst::br(targets[0].map_or(sink, |t| new_block_of[&t])),
                    _ => panic!("slicer: malformed branch wiring"),
                };
                out.push_inst(nb, term);
            }
            // Return from the root's block.
            let ret_v = value_map[&ValueRef::Inst(root)];
            out.push_inst(new_block_of[&vbb], Inst::ret(ret_v));
        } else {
            let entry = single.expect("phi-free slice has a single block");
            let scheduled = schedule_insts(func, insts);
            for id in scheduled {
                let cloned =
                    clone_inst(id, &mut out, &mut value_map, &new_block_of, &mut decls, &mut lift);
                let new_id = out.push_inst(entry, cloned);
                value_map.insert(ValueRef::Inst(id), ValueRef::Inst(new_id));
            }
            let ret_v = value_map[&ValueRef::Inst(root)];
            out.push_inst(entry, Inst::ret(ret_v));
        }

        out.push_inst(sink, Inst::unreachable());

        // Multiple entry candidates: dispatch over a fresh i8 selector.
        if let Some(d) = dispatch {
            let sel = out.add_param(
                &format!("a{}", out.params.len()),
                crate::types::Type::integer(8),
            );
            let cases: Vec<(u64, BlockId)> = entry_candidates
                .iter()
                .enumerate()
                .map(|(i, b)| (i as u64, new_block_of[b]))
                .collect();
            out.push_inst(d, Inst::switch(sel, sink, cases));
        }

        let new_root = match value_map[&ValueRef::Inst(root)] {
            ValueRef::Inst(i) => i,
            _ => unreachable!("root maps to an instruction"),
        };

        let mut module = Module::new();
        for d in decls {
            module.declare(d);
        }
        module.add_function(out);

        if !is_loop_free(&module.functions[0]) {
            panic!("slicer: generated function contains a loop");
        }
        if let Err(e) = verify_function(&module, &module.functions[0]) {
            panic!("slicer: ill-formed function generated: {}", e);
        }

        // Invert to slice -> host for the driver.
        let value_map = value_map.into_iter().map(|(h, s)| (s, h)).collect();
        Slice { module, root: new_root, value_map }
    }
}

/// Topological order of the selected blocks over their wired branch edges;
/// a cycle here means the extraction is about to rebuild a loop.
fn topo_blocks(
    order: &[BlockId],
    wiring: &BTreeMap<BlockId, Vec<Option<BlockId>>>,
) -> Vec<BlockId> {
    let mut indeg: BTreeMap<BlockId, usize> = order.iter().map(|b| (*b, 0)).collect();
    for targets in wiring.values() {
        for t in targets.iter().flatten() {
            if let Some(d) = indeg.get_mut(t) {
                *d += 1;
            }
        }
    }
    let mut ready: BTreeSet<BlockId> =
        indeg.iter().filter(|(_, d)| **d == 0).map(|(b, _)| *b).collect();
    let mut out = Vec::new();
    while let Some(&b) = ready.iter().next() {
        ready.remove(&b);
        out.push(b);
        if let Some(targets) = wiring.get(&b) {
            for t in targets.iter().flatten() {
                if let Some(d) = indeg.get_mut(t) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(*t);
                    }
                }
            }
        }
    }
    if out.len() != order.len() {
        panic!("slicer: generated region contains a loop");
    }
    out
}

/// Topological order of one block's instructions over intra-block data
/// dependencies, phis before non-phis, original order as the tie break.
fn schedule_insts(func: &Function, ids: &[InstId]) -> Vec<InstId> {
    let set: HashSet<InstId> = ids.iter().copied().collect();
    let mut sorted: Vec<InstId> = ids.to_vec();
    sorted.sort();
    let mut placed: HashSet<InstId> = HashSet::new();
    let mut out: Vec<InstId> = Vec::new();
    // Phis carry no intra-block deps; emit them first in original order.
    for &id in &sorted {
        if func.inst(id).is_phi() {
            out.push(id);
            placed.insert(id);
        }
    }
    while out.len() < sorted.len() {
        let mut progressed = false;
        for &id in &sorted {
            if placed.contains(&id) {
                continue;
            }
            let ready = func.inst(id).args.iter().all(|a| match a {
                ValueRef::Inst(i) => !set.contains(i) || placed.contains(i),
                _ => true,
            });
            if ready {
                out.push(id);
                placed.insert(id);
                progressed = true;
            }
        }
        if !progressed {
            // Cycles cannot occur in SSA within a block; defensive exit.
            for &id in &sorted {
                if placed.insert(id) {
                    out.push(id);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    fn slice_of(text: &str, root_name_idx: usize) -> Option<Slice> {
        let m = parse_module(text).unwrap();
        let f = &m.functions[0];
        let slicer = Slicer::new(&m, f);
        slicer.extract_expr(InstId(root_name_idx as u32))
    }

    #[test]
    fn straight_line_slice() {
        let s = slice_of(
            r#"
            define i32 @f(i32 %x, i32 %y) {
            entry:
              %t = add i32 %y, 0
              %r = add i32 %x, %t
              ret i32 %r
            }
            "#,
            1, // %r
        )
        .unwrap();
        let f = s.function();
        assert_eq!(f.blocks.len(), 2); // entry + sink
        assert!(is_loop_free(f));
        assert_eq!(f.ret_ty, crate::types::Type::integer(32));
        // x and y lifted as parameters.
        assert_eq!(f.params.len(), 2);
    }

    #[test]
    fn slice_of_slice_is_stable() {
        let text = r#"
            define i32 @f(i32 %x, i32 %y) {
            entry:
              %t = add i32 %y, 0
              %r = add i32 %x, %t
              ret i32 %r
            }
            "#;
        let s = slice_of(text, 1).unwrap();
        let printed = s.module.to_string();
        let m2 = parse_module(&printed).unwrap();
        let slicer = Slicer::new(&m2, &m2.functions[0]);
        let s2 = slicer.extract_expr(s.root).unwrap();
        assert!(is_loop_free(s2.function()));
        assert_eq!(s2.function().insts.len(), s.function().insts.len());
    }

    #[test]
    fn declines_root_in_unsimplified_loop() {
        // Two latches make the loop non-simplified.
        let s = slice_of(
            r#"
            define i32 @f(i32 %n, i1 %c) {
            entry:
              br label %head
            head:
              %i = phi i32 [ 0, %entry ], [ %inc, %l1 ], [ %inc, %l2 ]
              %inc = add i32 %i, 1
              br i1 %c, label %l1, label %l2
            l1:
              %d1 = icmp ult i32 %inc, %n
              br i1 %d1, label %head, label %exit
            l2:
              %d2 = icmp ult i32 %inc, %n
              br i1 %d2, label %head, label %exit
            exit:
              ret i32 %i
            }
            "#,
            2, // %inc
        );
        assert!(s.is_none());
    }

    #[test]
    fn phi_with_constant_incoming_declines() {
        let s = slice_of(
            r#"
            define i32 @f(i1 %c, i32 %a) {
            entry:
              br i1 %c, label %l, label %r
            l:
              br label %j
            r:
              br label %j
            j:
              %p = phi i32 [ 1, %l ], [ %a, %r ]
              ret i32 %p
            }
            "#,
            3, // %p
        );
        assert!(s.is_none());
    }

    #[test]
    fn diamond_with_phi_slices_whole_region() {
        let s = slice_of(
            r#"
            define i32 @f(i32 %a, i32 %b, i1 %c) {
            entry:
              br i1 %c, label %l, label %r
            l:
              %x = add i32 %a, 1
              br label %j
            r:
              %y = add i32 %b, 2
              br label %j
            j:
              %p = phi i32 [ %x, %l ], [ %y, %r ]
              %q = mul i32 %p, %p
              ret i32 %q
            }
            "#,
            6, // %q
        )
        .unwrap();
        let f = s.function();
        assert!(f.insts.iter().any(|i| i.is_phi()));
        assert!(is_loop_free(f));
        verify_function(&s.module, f).unwrap();
    }

    #[test]
    fn intrinsic_call_is_redeclared() {
        let s = slice_of(
            r#"
            define <16 x i8> @f(<16 x i8> %a, <16 x i8> %b) {
            entry:
              %r = call <16 x i8> @ssse3.pshuf.b.128(<16 x i8> %a, <16 x i8> %b)
              ret <16 x i8> %r
            }
            "#,
            0,
        )
        .unwrap();
        assert!(s.module.find_decl("ssse3.pshuf.b.128").is_some());
    }
}
