//! Crate-level error taxonomy.
//!
//! Most failure handling is structural: the slicer declines with `None`,
//! ill-formed candidates are dropped inside the enumerator, refuted
//! candidates are skipped, and materializer width bugs abort the process.
//! What remains (driver-facing I/O, module parsing, cache transport and
//! verifier infrastructure) is surfaced through this enum.

use crate::verify::VerifyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("module parse error: {0}")]
    Parse(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

pub type Result<T> = std::result::Result<T, Error>;
