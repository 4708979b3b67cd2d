//! Verifier soundness on known algebraic laws, across the type grid the
//! backend must handle.

use peepopt::ir::parser::parse_module;
use peepopt::ir::{Constant, Module};
use peepopt::types::Type;
use peepopt::verify::{Backend, ExecBackend, HoleParam, Transform, VerifyError};

fn modules(src: &str, tgt: &str) -> (Module, Module) {
    (parse_module(src).unwrap(), parse_module(tgt).unwrap())
}

#[test]
fn and_self_is_identity_for_all_integer_types() {
    for ty in ["i1", "i8", "i16", "i32", "i64", "<4 x i8>", "<2 x i16>"] {
        let (src, tgt) = modules(
            &format!(
                "define {ty} @s({ty} %x) {{\nentry:\n  %a = and {ty} %x, %x\n  ret {ty} %a\n}}"
            ),
            &format!("define {ty} @t({ty} %x) {{\nentry:\n  ret {ty} %x\n}}"),
        );
        let t = Transform::new(&src, &tgt, vec![]).unwrap();
        ExecBackend::new()
            .equivalent(&t)
            .unwrap_or_else(|e| panic!("and(x, x) == x failed for {}: {}", ty, e));
    }
}

#[test]
fn or_with_synthesized_zero_is_identity() {
    let (src, tgt) = modules(
        "define i16 @s(i16 %x, i16 %c) {\nentry:\n  ret i16 %x\n}",
        "define i16 @t(i16 %x, i16 %c) {\nentry:\n  %r = or i16 %x, %c\n  ret i16 %r\n}",
    );
    let holes = vec![HoleParam { hole: 7, param: 1, ty: Type::integer(16) }];
    let t = Transform::new(&src, &tgt, holes).unwrap();
    let map = ExecBackend::new().synthesize_constants(&t).unwrap();
    assert_eq!(map[&7], Constant::scalar(Type::integer(16), 0));
}

#[test]
fn shl_matches_mul_by_power_of_two() {
    for (factor, shift) in [(2u64, 1u64), (8, 3), (1 << 10, 10)] {
        let (src, tgt) = modules(
            &format!(
                "define i32 @s(i32 %x, i32 %c) {{\nentry:\n  %m = mul i32 %x, {factor}\n  ret i32 %m\n}}"
            ),
            "define i32 @t(i32 %x, i32 %c) {\nentry:\n  %r = shl i32 %x, %c\n  ret i32 %r\n}",
        );
        let holes = vec![HoleParam { hole: 0, param: 1, ty: Type::integer(32) }];
        let t = Transform::new(&src, &tgt, holes).unwrap();
        let map = ExecBackend::new().synthesize_constants(&t).unwrap();
        assert_eq!(
            map[&0],
            Constant::scalar(Type::integer(32), shift),
            "mul by {} should become shl by {}",
            factor,
            shift
        );
    }
}

#[test]
fn shl_does_not_match_mul_by_non_power() {
    let (src, tgt) = modules(
        "define i32 @s(i32 %x, i32 %c) {\nentry:\n  %m = mul i32 %x, 6\n  ret i32 %m\n}",
        "define i32 @t(i32 %x, i32 %c) {\nentry:\n  %r = shl i32 %x, %c\n  ret i32 %r\n}",
    );
    let holes = vec![HoleParam { hole: 0, param: 1, ty: Type::integer(32) }];
    let t = Transform::new(&src, &tgt, holes).unwrap();
    assert_eq!(
        ExecBackend::new().synthesize_constants(&t),
        Err(VerifyError::CounterExample)
    );
}

#[test]
fn signatures_must_agree() {
    let (src, tgt) = modules(
        "define i32 @s(i32 %x) {\nentry:\n  ret i32 %x\n}",
        "define i16 @t(i16 %x) {\nentry:\n  ret i16 %x\n}",
    );
    assert!(matches!(
        Transform::new(&src, &tgt, vec![]),
        Err(VerifyError::TypeError(_))
    ));
}
