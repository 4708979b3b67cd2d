// Command-line driver: parse a textual module, run the superoptimizer over
// it, and print the (possibly rewritten) module to stdout. The final verdict
// goes to stderr; exit code 0 means the run completed, non-zero means an I/O
// or infrastructure failure.

use clap::Parser;
use peepopt::config::{CacheMode, Config};
use peepopt::driver::Driver;
use peepopt::ir::parser::parse_module;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "peepopt", about = "Sketch-based peephole superoptimizer for typed SSA code")]
struct Args {
    /// Input module in the textual IR format.
    input: PathBuf,

    /// Timeout for SMT queries, in seconds.
    #[arg(long = "smt-to", default_value_t = 60, value_name = "s")]
    smt_to: u64,

    /// Wall-clock budget per slice, in seconds.
    #[arg(long = "slice-to", default_value_t = 300, value_name = "s")]
    slice_to: u64,

    /// Enable the result cache.
    #[arg(long = "enable-caching")]
    enable_caching: bool,

    /// Accept rewrites regardless of the machine-cost model.
    #[arg(long = "ignore-machine-cost")]
    ignore_machine_cost: bool,

    /// Do not run the synthesizer; record cache misses as no-solution.
    #[arg(long = "no-infer")]
    no_infer: bool,

    /// Do not slice; optimize each function's return value in place.
    #[arg(long = "no-slice")]
    no_slice: bool,

    /// Run the synthesizer even on cache hits.
    #[arg(long = "force-infer")]
    force_infer: bool,

    /// Write a run report into this directory.
    #[arg(long = "report-dir", default_value = "", value_name = "path")]
    report_dir: String,

    /// Port of the cache server.
    #[arg(long = "redis-port", default_value_t = 6379, value_name = "n")]
    redis_port: u16,

    /// External SMT solver binary; defaults to the built-in testing backend.
    #[arg(long = "solver", default_value = "", value_name = "path")]
    solver: String,

    /// Leave AVX-512 intrinsics out of the candidate space.
    #[arg(long = "disable-avx512")]
    disable_avx512: bool,

    /// Verbose diagnostics (repeat for debug output).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let text = match std::fs::read_to_string(&args.input) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("peepopt: cannot read {}: {}", args.input.display(), e);
            return ExitCode::from(1);
        }
    };
    let mut module = match parse_module(&text) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("peepopt: parse error: {}", e);
            return ExitCode::from(1);
        }
    };

    let cache_mode = if args.no_infer {
        CacheMode::NoInfer
    } else if args.force_infer {
        CacheMode::ForceInfer
    } else {
        CacheMode::Normal
    };

    let config = Config {
        smt_timeout_secs: args.smt_to,
        slice_timeout_secs: args.slice_to,
        enable_caching: args.enable_caching,
        cache_mode,
        ignore_machine_cost: args.ignore_machine_cost,
        no_slice: args.no_slice,
        disable_avx512: args.disable_avx512,
        redis_port: args.redis_port,
        report_dir: args.report_dir,
        solver_path: args.solver,
        ..Config::default()
    };

    let mut driver = Driver::new(config);
    let changed = driver.optimize_module(&mut module);

    print!("{}", module);
    if changed {
        eprintln!("peepopt: completed, changed the program");
    } else {
        eprintln!("peepopt: completed, no change to the program");
    }
    ExitCode::SUCCESS
}
