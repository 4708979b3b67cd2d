// Run-time knobs for a synthesis run. The driver fills this from CLI flags;
// library users construct it directly. No hidden global state: one Config is
// threaded through slicing, enumeration and verification.

/// Cache interaction modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Read the cache, write on miss.
    Normal,
    /// Ignore reads, always run the synthesizer and write.
    ForceInfer,
    /// Read only; on miss record the no-solution sentinel and skip inference.
    NoInfer,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Per-query prover timeout in seconds.
    pub smt_timeout_secs: u64,
    /// Wall-clock budget per slice in seconds.
    pub slice_timeout_secs: u64,
    pub enable_caching: bool,
    pub cache_mode: CacheMode,
    pub ignore_machine_cost: bool,
    /// Skip the slicer and optimize the unique return value directly.
    pub no_slice: bool,
    /// Leave the AVX-512 rows of the intrinsic catalog out of enumeration.
    pub disable_avx512: bool,
    /// Stop at the first verified, cost-improving rewrite.
    pub return_first_solution: bool,
    pub redis_host: String,
    pub redis_port: u16,
    /// Structured report directory; empty disables reporting.
    pub report_dir: String,
    /// External SMT solver binary; empty selects the built-in testing
    /// backend.
    pub solver_path: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            smt_timeout_secs: 60,
            slice_timeout_secs: 300,
            enable_caching: false,
            cache_mode: CacheMode::Normal,
            ignore_machine_cost: false,
            no_slice: false,
            disable_avx512: false,
            return_first_solution: true,
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            report_dir: String::new(),
            solver_path: String::new(),
        }
    }
}
