use clap::Parser;

/// Ignis - configurable CPU load orchestration and stress-test engine.
#[derive(Parser, Debug)]
#[command(name = "ignis", version, about)]
pub struct Args {
    /// Wall-clock limit in seconds; 0 means unbounded.
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Duty-cycle load percentage (0..=100).
    #[arg(long, default_value_t = 100)]
    pub load: u8,

    /// Duty-cycle period in microseconds; 0 disables modulation.
    #[arg(long, default_value_t = 0)]
    pub period: u64,

    /// Number of worker threads; default is every logical CPU detected.
    /// If `--bind` is also given, its cpuset length must match.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Explicit CPU list to bind workers to, e.g. "0-3,7". If `--threads`
    /// is also given, its count must match this cpuset's length.
    #[arg(long)]
    pub bind: Option<String>,

    /// Selects a platform/thread-count pair by id; 0 = auto-detect.
    #[arg(long, default_value_t = 0)]
    pub function: u32,

    /// Proceed even if the selected payload's required features are missing.
    #[arg(long, default_value_t = false)]
    pub allow_unavailable: bool,

    /// Print the enumerated function table and exit.
    #[arg(long, default_value_t = false)]
    pub list_functions: bool,

    /// Increase logging verbosity (stacks: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all logging below error level.
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}
