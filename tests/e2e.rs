//! End-to-end scenarios: module in, optimized module out, with the cache
//! observed through a shared in-memory store.

use peepopt::cache::{KvStore, MemKv, ResultCache, NO_SOLUTION};
use peepopt::config::Config;
use peepopt::driver::Driver;
use peepopt::ir::parser::parse_module;
use peepopt::ir::{Module, Opcode};
use peepopt::ops::BinOp;
use peepopt::slice::Slicer;
use pretty_assertions::assert_eq;
use std::io;
use std::sync::{Arc, Mutex};

/// A store handle the test can keep while the driver owns the cache.
#[derive(Clone)]
struct SharedKv(Arc<Mutex<MemKv>>);

impl SharedKv {
    fn new() -> SharedKv {
        SharedKv(Arc::new(Mutex::new(MemKv::new())))
    }
}

impl KvStore for SharedKv {
    fn hget(&mut self, key: &[u8], field: &str) -> io::Result<Option<Vec<u8>>> {
        self.0.lock().unwrap().hget(key, field)
    }

    fn hset(&mut self, key: &[u8], pairs: &[(&str, &[u8])]) -> io::Result<()> {
        self.0.lock().unwrap().hset(key, pairs)
    }
}

fn run(text: &str, config: Config) -> (Module, bool) {
    let mut module = parse_module(text).unwrap();
    let mut driver = Driver::new(config);
    let changed = driver.optimize_module(&mut module);
    (module, changed)
}

fn count_ops(module: &Module, pred: impl Fn(&Opcode) -> bool) -> usize {
    let f = &module.functions[0];
    f.inst_ids_in_layout()
        .iter()
        .filter(|id| pred(&f.inst(**id).op))
        .count()
}

#[test]
fn scenario_add_of_add_zero() {
    let (m, changed) = run(
        r#"
        define i32 @f(i32 %x, i32 %y) {
        entry:
          %t = add i32 %y, 0
          %r = add i32 %x, %t
          ret i32 %r
        }
        "#,
        Config::default(),
    );
    assert!(changed);
    assert_eq!(count_ops(&m, |op| matches!(op, Opcode::Bin(BinOp::Add))), 1);
}

#[test]
fn scenario_xor_absorption() {
    let (m, changed) = run(
        r#"
        define i32 @f(i32 %x, i32 %y) {
        entry:
          %t = xor i32 %x, %y
          %r = xor i32 %x, %t
          ret i32 %r
        }
        "#,
        Config::default(),
    );
    assert!(changed);
    // xor(x, xor(x, y)) collapses to y: no xors remain.
    assert_eq!(count_ops(&m, |op| matches!(op, Opcode::Bin(BinOp::Xor))), 0);
}

#[test]
fn scenario_mask_becomes_narrowing_round_trip() {
    let config = Config { ignore_machine_cost: true, ..Config::default() };
    let (m, changed) = run(
        r#"
        define i32 @f(i32 %x) {
        entry:
          %r = and i32 %x, 255
          ret i32 %r
        }
        "#,
        config,
    );
    assert!(changed);
    assert_eq!(count_ops(&m, |op| matches!(op, Opcode::Bin(BinOp::And))), 0);
    let printed = m.to_string();
    assert!(printed.contains("trunc"), "expected a trunc in:\n{}", printed);
    assert!(printed.contains("zext"), "expected a zext in:\n{}", printed);
    assert!(printed.contains("to i8"), "expected an i8 round trip in:\n{}", printed);
}

#[test]
fn scenario_select_of_ult_becomes_umin() {
    let (m, changed) = run(
        r#"
        define i32 @f(i32 %x, i32 %y) {
        entry:
          %c = icmp ult i32 %x, %y
          %r = select i1 %c, i32 %x, i32 %y
          ret i32 %r
        }
        "#,
        Config::default(),
    );
    assert!(changed);
    assert_eq!(count_ops(&m, |op| matches!(op, Opcode::Bin(BinOp::UMin))), 1);
    assert_eq!(count_ops(&m, |op| matches!(op, Opcode::Select)), 0);
}

#[test]
fn scenario_expensive_broadcast_becomes_splat_shuffle() {
    let config = Config { ignore_machine_cost: true, ..Config::default() };
    let (m, changed) = run(
        r#"
        define <4 x i32> @f(<4 x i32> %v) {
        entry:
          %e = extractelement <4 x i32> %v, i16 0
          %i0 = insertelement <4 x i32> %v, i32 %e, i16 1
          %i1 = insertelement <4 x i32> %i0, i32 %e, i16 2
          %i2 = insertelement <4 x i32> %i1, i32 %e, i16 3
          %i3 = insertelement <4 x i32> %i2, i32 %e, i16 0
          ret <4 x i32> %i3
        }
        "#,
        config,
    );
    assert!(changed);
    let printed = m.to_string();
    assert!(
        printed.contains("shufflevector") && printed.contains("<0, 0, 0, 0>"),
        "expected a constant splat mask in:\n{}",
        printed
    );
}

#[test]
fn scenario_fp_mul_zero_has_no_rewrite_and_caches_no_solution() {
    let text = r#"
        define float @f(float %x, float %y) {
        entry:
          %m = fmul float %y, 0x0
          %r = fadd float %x, %m
          ret float %r
        }
        "#;
    let mut module = parse_module(text).unwrap();

    // Compute the cache key the driver will use for the fadd root.
    let key = {
        let func = &module.functions[0];
        let slicer = Slicer::new(&module, func);
        let root = func
            .inst_ids_in_layout()
            .into_iter()
            .find(|id| matches!(func.inst(*id).op, Opcode::Bin(BinOp::FAdd)))
            .unwrap();
        slicer.extract_expr(root).unwrap().module.to_string()
    };

    let store = SharedKv::new();
    let config = Config { enable_caching: true, ..Config::default() };
    let cache = ResultCache::new(Box::new(store.clone()));
    let mut driver = Driver::with_cache(config, cache);
    let changed = driver.optimize_module(&mut module);
    assert!(!changed, "poison/NaN semantics must block the rewrite");

    let mut probe = store;
    let recorded = probe.hget(key.as_bytes(), "rewrite").unwrap();
    assert_eq!(
        recorded.as_deref(),
        Some(NO_SOLUTION.as_bytes()),
        "a no-solution entry must be recorded"
    );
}

#[test]
fn cached_rewrite_is_replayed_without_inference() {
    let text = r#"
        define i32 @f(i32 %x, i32 %y) {
        entry:
          %t = add i32 %y, 0
          %r = add i32 %x, %t
          ret i32 %r
        }
        "#;
    let store = SharedKv::new();

    // First run populates the cache.
    let mut m1 = parse_module(text).unwrap();
    let config = Config { enable_caching: true, ..Config::default() };
    let mut d1 = Driver::with_cache(config.clone(), ResultCache::new(Box::new(store.clone())));
    assert!(d1.optimize_module(&mut m1));

    // Second run must reach the same result through the cache alone.
    let mut m2 = parse_module(text).unwrap();
    let no_infer = Config {
        cache_mode: peepopt::config::CacheMode::NoInfer,
        ..config
    };
    let mut d2 = Driver::with_cache(no_infer, ResultCache::new(Box::new(store)));
    assert!(d2.optimize_module(&mut m2));
    assert_eq!(m1.to_string(), m2.to_string());
}

#[test]
fn slicing_a_slice_is_stable() {
    // A function already in slice shape survives a slice-optimize round
    // without structural change beyond the rewrite itself.
    let (m, _) = run(
        r#"
        define i32 @sliced(i32 %a0, i32 %a1) {
        entry:
          %r = add i32 %a0, %a1
          ret i32 %r
        }
        "#,
        Config::default(),
    );
    let f = &m.functions[0];
    assert_eq!(f.blocks.len(), 1);
    assert_eq!(count_ops(&m, |op| matches!(op, Opcode::Bin(BinOp::Add))), 1);
}
