// Online driver: walks every value-producing instruction of a module, slices
// around it, consults the result cache, runs the synthesis pipeline, and
// materializes the first verified, cost-improving rewrite back into the host
// function. Each slice gets its own expression arena and wall-clock budget.

use crate::cache::{CacheValue, RedisKv, ResultCache};
use crate::codegen::CodeGen;
use crate::config::{CacheMode, Config};
use crate::enumerator::{live_in_names, root_of_slice, Enumerator};
use crate::expr::printer::print_expr;
use crate::expr::{parser as expr_parser, ConstMap, ExprArena, ExprRef};
use crate::ir::{InstId, Module, ValueRef};
use crate::slice::{Slice, Slicer};
use crate::verify::{Backend, ExecBackend, SmtBackend};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::io::Write as _;
use std::time::{Duration, Instant};

pub struct Driver {
    config: Config,
    cache: Option<ResultCache>,
}

struct Inferred<'a> {
    root: ExprRef<'a>,
    consts: ConstMap,
    cost_after: u64,
    cost_before: u64,
    from_cache: bool,
}

impl Driver {
    /// Connect the cache if configured; connection failure degrades to
    /// uncached operation.
    pub fn new(config: Config) -> Driver {
        let cache = if config.enable_caching {
            match RedisKv::connect(&config.redis_host, config.redis_port, Duration::from_secs(5)) {
                Ok(kv) => Some(ResultCache::new(Box::new(kv))),
                Err(e) => {
                    log::warn!(target: "peepopt::cache", "cache unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Driver { config, cache }
    }

    /// Use a caller-provided cache store (tests, embedded runs).
    pub fn with_cache(config: Config, cache: ResultCache) -> Driver {
        Driver { config, cache: Some(cache) }
    }

    fn backend(&self) -> Box<dyn Backend> {
        if self.config.solver_path.is_empty() {
            Box::new(ExecBackend::new())
        } else {
            Box::new(SmtBackend::with_timeout(
                &self.config.solver_path,
                self.config.smt_timeout_secs,
            ))
        }
    }

    /// Optimize every function; returns whether anything changed.
    pub fn optimize_module(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        let mut report = String::new();
        for idx in 0..module.functions.len() {
            let fchanged = if self.config.no_slice {
                self.optimize_return(module, idx)
            } else {
                self.optimize_function(module, idx)
            };
            let name = module.functions[idx].name.clone();
            report.push_str(&format!(
                "function @{}: {}\n",
                name,
                if fchanged { "changed" } else { "unchanged" }
            ));
            changed |= fchanged;
        }
        if changed {
            module.remove_unused_decls();
        }
        self.write_report(&report);
        changed
    }

    /// Sliced mode: try every value-producing instruction as a root.
    fn optimize_function(&mut self, module: &mut Module, idx: usize) -> bool {
        let mut changed = false;
        let roots: Vec<InstId> = {
            let func = &module.functions[idx];
            func.inst_ids_in_layout()
                .into_iter()
                .filter(|id| {
                    let inst = func.inst(*id);
                    inst.op.has_result() && inst.ty.is_valid()
                })
                .collect()
        };
        for root in roots {
            if module.functions[idx].block_of(root).is_none() {
                // Removed by an earlier rewrite's cleanup.
                continue;
            }
            let slice = {
                let func = &module.functions[idx];
                let slicer = Slicer::new(module, func);
                match slicer.extract_expr(root) {
                    Some(s) => s,
                    None => continue,
                }
            };
            changed |= self.infer_and_apply(module, idx, root, &slice);
        }
        changed
    }

    /// No-slice mode: optimize the unique return value in place.
    fn optimize_return(&mut self, module: &mut Module, idx: usize) -> bool {
        let func = &module.functions[idx];
        let Some(root) = root_of_slice(func) else {
            log::debug!(target: "peepopt::driver", "return value is not an instruction, skipping");
            return false;
        };
        // The function is treated as its own slice; the value map is the
        // identity.
        let mut value_map: HashMap<ValueRef, ValueRef> = HashMap::new();
        for i in 0..func.params.len() {
            value_map.insert(ValueRef::Param(i as u32), ValueRef::Param(i as u32));
        }
        for i in 0..func.insts.len() {
            value_map.insert(ValueRef::Inst(InstId(i as u32)), ValueRef::Inst(InstId(i as u32)));
        }
        let mut slice_module = Module::new();
        slice_module.decls = module.decls.clone();
        slice_module.add_function(func.clone());
        let slice = Slice { module: slice_module, root, value_map };
        self.infer_and_apply(module, idx, root, &slice)
    }

    fn infer_and_apply(
        &mut self,
        module: &mut Module,
        idx: usize,
        root: InstId,
        slice: &Slice,
    ) -> bool {
        let arena = ExprArena::new();
        let origin = module.functions[idx].name.clone();
        let Some(inferred) = self.infer(slice, &origin, &arena) else {
            return false;
        };
        log::debug!(
            target: "peepopt::driver",
            "applying rewrite {} (cost {} -> {})",
            print_expr(inferred.root, &inferred.consts),
            inferred.cost_before,
            inferred.cost_after
        );
        if !inferred.from_cache {
            if let Some(cache) = &mut self.cache {
                let key = slice.module.to_string();
                cache.put_rewrite(
                    &key,
                    &print_expr(inferred.root, &inferred.consts),
                    inferred.cost_after,
                    inferred.cost_before,
                    &origin,
                );
            }
        }

        // Materialize into the host function, translating slice live-ins
        // through the slice's value map.
        let mut func = module.functions.remove(idx);
        let holes = HashMap::new();
        let gen = CodeGen::new(&mut func, module, &holes, &inferred.consts, Some(&slice.value_map));
        gen.materialize(inferred.root, root);
        func.eliminate_dead_code();
        module.functions.insert(idx, func);
        true
    }

    /// Cache-aware inference for one slice.
    fn infer<'a>(&mut self, slice: &Slice, origin: &str, arena: &'a ExprArena) -> Option<Inferred<'a>> {
        let key = slice.module.to_string();

        // Cache read happens in normal and no-infer modes only.
        if self.cache.is_some() && self.config.cache_mode != CacheMode::ForceInfer {
            let hit = self.cache.as_mut().and_then(|c| c.get(&key));
            match hit {
                Some(CacheValue::NoSolution) => {
                    log::debug!(target: "peepopt::driver", "cache hit: no solution known");
                    return None;
                }
                Some(CacheValue::Rewrite(r)) => {
                    log::debug!(target: "peepopt::driver", "cache hit: {}", r.expr);
                    let live = live_in_names(slice.function(), slice.root);
                    match expr_parser::parse_expr(arena, &r.expr, &live) {
                        Ok((root, consts)) => {
                            return Some(Inferred {
                                root,
                                consts,
                                cost_after: r.cost_after,
                                cost_before: r.cost_before,
                                from_cache: true,
                            })
                        }
                        Err(e) => {
                            log::debug!(target: "peepopt::driver", "failed to parse cached solution: {}", e);
                            return None;
                        }
                    }
                }
                None => {}
            }
        }

        if self.config.cache_mode == CacheMode::NoInfer {
            if let Some(cache) = &mut self.cache {
                cache.put_no_solution(&key, origin);
            }
            log::debug!(target: "peepopt::driver", "skipping synthesizer");
            return None;
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.slice_timeout_secs);
        let enumerator = Enumerator::new(arena, &self.config);
        let mut backend = self.backend();
        let (rewrites, _stats) = enumerator.solve(slice, backend.as_mut(), Some(deadline));
        match rewrites.into_iter().next() {
            Some(r) => Some(Inferred {
                root: r.root,
                consts: r.consts,
                cost_after: r.cost_after,
                cost_before: r.cost_before,
                from_cache: false,
            }),
            None => {
                if let Some(cache) = &mut self.cache {
                    cache.put_no_solution(&key, origin);
                }
                None
            }
        }
    }

    fn write_report(&self, report: &str) {
        if self.config.report_dir.is_empty() {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(&self.config.report_dir) {
            log::warn!(target: "peepopt::driver", "cannot create report directory: {}", e);
            return;
        }
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let path = std::path::Path::new(&self.config.report_dir)
            .join(format!("peepopt_{}.txt", suffix));
        match std::fs::File::create(&path) {
            Ok(mut f) => {
                let _ = f.write_all(report.as_bytes());
            }
            Err(e) => {
                log::warn!(target: "peepopt::driver", "cannot open report file: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemKv, ResultCache};
    use crate::ir::parser::parse_module;

    fn config() -> Config {
        Config { ignore_machine_cost: true, enable_caching: true, ..Config::default() }
    }

    #[test]
    fn rewrites_add_zero_and_caches() {
        let mut m = parse_module(
            r#"
            define i32 @f(i32 %x, i32 %y) {
            entry:
              %t = add i32 %y, 0
              %r = add i32 %x, %t
              ret i32 %r
            }
            "#,
        )
        .unwrap();
        let cache = ResultCache::new(Box::new(MemKv::new()));
        let mut driver = Driver::with_cache(config(), cache);
        let changed = driver.optimize_module(&mut m);
        assert!(changed);
        // The zero-add is gone.
        let f = &m.functions[0];
        let live_adds = f
            .inst_ids_in_layout()
            .iter()
            .filter(|id| matches!(f.inst(**id).op, crate::ir::Opcode::Bin(crate::ops::BinOp::Add)))
            .count();
        assert_eq!(live_adds, 1);
    }

    #[test]
    fn no_infer_records_no_solution() {
        let mut m = parse_module(
            r#"
            define i32 @f(i32 %x, i32 %y) {
            entry:
              %r = add i32 %x, %y
              ret i32 %r
            }
            "#,
        )
        .unwrap();
        let mut cfg = config();
        cfg.cache_mode = CacheMode::NoInfer;
        let cache = ResultCache::new(Box::new(MemKv::new()));
        let mut driver = Driver::with_cache(cfg, cache);
        let changed = driver.optimize_module(&mut m);
        assert!(!changed);
    }
}
