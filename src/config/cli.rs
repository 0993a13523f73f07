//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Which service implementation drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceKind {
    /// Timer-backed demo service; completes a request after a configured delay
    Sleep,
    /// In-process mock service; completes instantly
    Mock,
}

/// Treadmill - open-loop load generator
#[derive(Parser, Debug, Clone)]
#[command(name = "treadmill")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Service implementation to load
    #[arg(long, value_enum, default_value = "sleep")]
    pub service: ServiceKind,

    /// The host to load test
    #[arg(long, default_value = "")]
    pub hostname: String,

    /// The port on the host to connect to
    #[arg(long, default_value = "0")]
    pub port: u16,

    // === Load shape ===
    /// The total number of workers
    #[arg(long, default_value = "1")]
    pub number_of_workers: usize,

    /// The number of connections each worker thread handles
    #[arg(long, default_value = "1")]
    pub number_of_connections: usize,

    /// Aggregate request rate to generate, in requests per second
    #[arg(long, default_value = "1000")]
    pub request_per_second: u32,

    /// Aggregate cap on in-flight requests, divided among workers
    #[arg(long, default_value = "1000")]
    pub max_outstanding_requests: i32,

    /// Total testing time in seconds
    #[arg(long, default_value = "10")]
    pub runtime: u64,

    /// The number of keys in the workload
    #[arg(long, default_value = "1000")]
    pub number_of_keys: i64,

    /// Queue depth multiple at which worker-queue overload is logged
    #[arg(long, default_value = "100")]
    pub queue_logging_threshold: u64,

    // === Workload configuration ===
    /// The path to the workload configuration file
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Config file to pass into the workload in JSON format (merged over config_file)
    #[arg(long)]
    pub config_in_file: Option<PathBuf>,

    /// Config string to pass into the workload in JSON format (merged last)
    #[arg(long)]
    pub config_in_json: Option<String>,

    /// Config filename to export from the workload in JSON format
    #[arg(long)]
    pub config_out_file: Option<PathBuf>,

    /// Sleep service: requested sleep per request, in microseconds
    #[arg(long, default_value = "1000")]
    pub sleep_time_us: u64,

    // === Placement ===
    /// Comma-separated list of CPU IDs to pin the workers, one per worker
    #[arg(long, default_value = "")]
    pub cpu_affinity: String,

    // === Control plane ===
    /// Port for the remote-control endpoint (0 disables)
    #[arg(long, default_value = "0")]
    pub control_port: u16,

    /// Port for the status/counters endpoint (0 disables)
    #[arg(long, default_value = "0")]
    pub server_port: u16,

    /// Start paused and wait for a remote resume
    #[arg(long)]
    pub wait_for_runner_ready: bool,

    /// Poll connection readiness before generating load
    #[arg(long)]
    pub wait_for_target_ready: bool,

    /// Readiness counter consulted during the target-ready gate
    #[arg(long, default_value = "")]
    pub counter_name: String,

    /// Threshold at which the readiness counter unblocks the gate
    #[arg(long, default_value = "0")]
    pub counter_threshold: i64,

    /// Abort the process when no control call arrives within the
    /// configured watchdog window (armed via the watchdog_sec
    /// configuration key)
    #[arg(long)]
    pub enable_watchdog_timer: bool,

    /// Refuse resume while the remote configuration store is empty
    #[arg(long)]
    pub require_configuration_on_resume: bool,

    // === Output ===
    /// The file to store the JSON output statistics
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// How many seconds to give workers to finish requests
    #[arg(long, default_value = "1")]
    pub worker_shutdown_delay: u64,

    // === Statistic lifecycle tuning ===
    /// Default number of warm-up samples for continuous statistics
    #[arg(long, default_value = "10")]
    pub default_warmup_samples: usize,

    /// Default number of calibration samples for continuous statistics
    #[arg(long, default_value = "10")]
    pub default_calibration_samples: usize,

    /// Number of warm-up samples for latency statistics
    #[arg(long, default_value = "1000")]
    pub latency_warmup_samples: usize,

    /// Number of calibration samples for latency statistics
    #[arg(long, default_value = "1000")]
    pub latency_calibration_samples: usize,

    /// Seed for random engines; the default means "use wall time"
    #[arg(long, default_value_t = u64::MAX)]
    pub treadmill_random_seed: u64,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
