// Verifier interface: a candidate pair (src, tgt) packed into a Transform,
// and a Backend trait with the two operations every prover must offer:
// equivalence of fully-concrete candidates and constant-hole synthesis.
// Swapping the prover must not touch anything outside this directory.

use crate::expr::ConstMap;
use crate::ir::{Function, Module};
use crate::types::Type;
use thiserror::Error;

pub mod exec;
pub mod smt;

pub use exec::ExecBackend;
pub use smt::SmtBackend;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The equivalence was refuted; reject this candidate only.
    #[error("counterexample found")]
    CounterExample,
    /// The prover abandoned the query; abandon the whole slice.
    #[error("slow vcgen")]
    SlowVcgen,
    /// The pair does not type-check or cannot be encoded; enumeration bug.
    #[error("type error: {0}")]
    TypeError(String),
}

/// A constant hole lifted into a target-function parameter.
#[derive(Debug, Clone, Copy)]
pub struct HoleParam {
    pub hole: u32,
    pub param: u32,
    pub ty: Type,
}

/// One verification problem: source and target functions plus the holes the
/// target carries. Both functions share a signature (hole parameters are
/// appended to the source as unused arguments).
pub struct Transform<'t> {
    pub src_module: &'t Module,
    pub tgt_module: &'t Module,
    pub src: &'t Function,
    pub tgt: &'t Function,
    pub holes: Vec<HoleParam>,
}

impl<'t> Transform<'t> {
    /// Pair up src and tgt, checking the single-typing preconditions.
    pub fn new(
        src_module: &'t Module,
        tgt_module: &'t Module,
        holes: Vec<HoleParam>,
    ) -> Result<Transform<'t>, VerifyError> {
        let src = src_module
            .functions
            .first()
            .ok_or_else(|| VerifyError::TypeError("source module has no function".into()))?;
        let tgt = tgt_module
            .functions
            .first()
            .ok_or_else(|| VerifyError::TypeError("target module has no function".into()))?;
        if src.ret_ty != tgt.ret_ty {
            return Err(VerifyError::TypeError(format!(
                "return types differ: {} vs {}",
                src.ret_ty, tgt.ret_ty
            )));
        }
        if src.params.len() != tgt.params.len() {
            return Err(VerifyError::TypeError("signature lengths differ".into()));
        }
        for (a, b) in src.params.iter().zip(&tgt.params) {
            if a.ty != b.ty {
                return Err(VerifyError::TypeError(format!(
                    "parameter types differ: {} vs {}",
                    a.ty, b.ty
                )));
            }
        }
        for h in &holes {
            if h.param as usize >= tgt.params.len() {
                return Err(VerifyError::TypeError("hole parameter out of range".into()));
            }
        }
        Ok(Transform { src_module, tgt_module, src, tgt, holes })
    }

    /// Parameter indexes that are genuine live-ins (not hole parameters).
    pub fn live_in_params(&self) -> Vec<usize> {
        (0..self.src.params.len())
            .filter(|i| !self.holes.iter().any(|h| h.param as usize == *i))
            .collect()
    }
}

/// A prover for candidate equivalence and constant synthesis.
pub trait Backend {
    /// Decide whether src and tgt agree on every input.
    fn equivalent(&mut self, t: &Transform<'_>) -> Result<(), VerifyError>;

    /// Find constants for the target's holes that make the pair equivalent.
    fn synthesize_constants(&mut self, t: &Transform<'_>) -> Result<ConstMap, VerifyError>;
}
