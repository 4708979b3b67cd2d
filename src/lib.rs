//! peepopt - a sketch-based peephole superoptimizer for typed SSA code.
//!
//! Given a function containing a value-producing instruction, peepopt tries
//! to discover a replacement expression that computes the same value on every
//! input at a strictly lower machine cost. The pipeline:
//!
//! 1. [`slice`] extracts a self-contained, loop-free function around the
//!    instruction, lifting unknown dependencies into parameters.
//! 2. [`enumerator`] produces a finite, deterministic sequence of well-typed
//!    sketches over the slice's live-ins, some containing symbolic constant
//!    holes, and prunes them by well-formedness, approximate cost and known
//!    bits.
//! 3. [`verify`] decides equivalence of concrete candidates or synthesizes
//!    the constants for the holes, behind a swappable backend.
//! 4. [`cost`] ranks survivors by assembled machine-code size; the first
//!    verified, cost-improving rewrite wins.
//! 5. [`cache`] persists the outcome keyed by the printed slice.
//!
//! # Example
//!
//! ```
//! use peepopt::config::Config;
//! use peepopt::driver::Driver;
//! use peepopt::ir::parser::parse_module;
//!
//! let mut module = parse_module(
//!     "define i32 @f(i32 %x, i32 %y) {\n\
//!      entry:\n  %t = add i32 %y, 0\n  %r = add i32 %x, %t\n  ret i32 %r\n}",
//! )
//! .unwrap();
//! let mut config = Config::default();
//! config.ignore_machine_cost = true;
//! let changed = Driver::new(config).optimize_module(&mut module);
//! assert!(changed);
//! ```

pub mod cache;
pub mod codegen;
pub mod config;
pub mod cost;
pub mod driver;
pub mod enumerator;
pub mod error;
pub mod expr;
pub mod intrinsics;
pub mod ir;
pub mod ops;
pub mod slice;
pub mod types;
pub mod verify;

pub use config::Config;
pub use driver::Driver;
pub use error::{Error, Result};
