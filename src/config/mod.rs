//! Configuration module
//!
//! Handles CLI argument parsing, workload-config JSON assembly, and
//! validation. The CLI flags collapse into one typed [`Config`] that the
//! coordinator consumes; validation runs before any thread starts so bad
//! flag combinations die at startup.

pub mod cli;
pub mod validator;
pub mod workload;

use crate::stats::StatSettings;
use crate::Result;
use cli::Cli;
use serde_json::Value;
use std::path::PathBuf;

/// Complete run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target endpoint (unused by in-process services)
    pub hostname: String,
    pub port: u16,

    pub number_of_workers: usize,
    pub number_of_connections: usize,
    pub request_per_second: u32,
    pub max_outstanding_requests: i32,
    /// Seconds after which the run stops
    pub runtime: u64,
    pub number_of_keys: i64,
    pub queue_logging_threshold: u64,

    /// Per-worker CPU pins, one per worker; empty means unpinned
    pub cpu_affinity: Vec<usize>,

    /// Merged workload configuration
    pub workload_config: Value,
    pub config_out_file: Option<PathBuf>,
    pub sleep_time_us: u64,

    pub control_port: u16,
    pub server_port: u16,
    pub wait_for_runner_ready: bool,
    pub wait_for_target_ready: bool,
    pub counter_name: Option<String>,
    pub counter_threshold: i64,
    pub enable_watchdog_timer: bool,
    pub require_configuration_on_resume: bool,

    pub output_file: Option<PathBuf>,
    pub worker_shutdown_delay: u64,

    pub stat_settings: StatSettings,
    pub random_seed: u64,
}

impl Config {
    /// Build from parsed CLI flags. Fails on unreadable or invalid
    /// workload-config sources; flag *combinations* are checked separately
    /// by [`validator::validate_config`].
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let workload_config = workload::load_workload_config(
            cli.config_file.as_deref(),
            cli.config_in_file.as_deref(),
            cli.config_in_json.as_deref(),
        )?;

        let cpu_affinity = if cli.cpu_affinity.is_empty() {
            Vec::new()
        } else {
            crate::worker::affinity::parse_cpu_list(&cli.cpu_affinity)?
        };

        Ok(Self {
            hostname: cli.hostname.clone(),
            port: cli.port,
            number_of_workers: cli.number_of_workers,
            number_of_connections: cli.number_of_connections,
            request_per_second: cli.request_per_second,
            max_outstanding_requests: cli.max_outstanding_requests,
            runtime: cli.runtime,
            number_of_keys: cli.number_of_keys,
            queue_logging_threshold: cli.queue_logging_threshold,
            cpu_affinity,
            workload_config,
            config_out_file: cli.config_out_file.clone(),
            sleep_time_us: cli.sleep_time_us,
            control_port: cli.control_port,
            server_port: cli.server_port,
            wait_for_runner_ready: cli.wait_for_runner_ready,
            wait_for_target_ready: cli.wait_for_target_ready,
            counter_name: if cli.counter_name.is_empty() {
                None
            } else {
                Some(cli.counter_name.clone())
            },
            counter_threshold: cli.counter_threshold,
            enable_watchdog_timer: cli.enable_watchdog_timer,
            require_configuration_on_resume: cli.require_configuration_on_resume,
            output_file: cli.output_file.clone(),
            worker_shutdown_delay: cli.worker_shutdown_delay,
            stat_settings: StatSettings {
                default_warmup_samples: cli.default_warmup_samples,
                default_calibration_samples: cli.default_calibration_samples,
                latency_warmup_samples: cli.latency_warmup_samples,
                latency_calibration_samples: cli.latency_calibration_samples,
            },
            random_seed: cli.treadmill_random_seed,
        })
    }

    /// Per-worker share of the aggregate outstanding cap.
    pub fn max_outstanding_per_worker(&self) -> i32 {
        self.max_outstanding_requests / self.number_of_workers.max(1) as i32
    }

    /// Per-worker share of the aggregate request rate (for logging).
    pub fn rps_per_worker(&self) -> f64 {
        self.request_per_second as f64 / self.number_of_workers.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config_from(args: &[&str]) -> Result<Config> {
        let mut full = vec!["treadmill"];
        full.extend_from_slice(args);
        Config::from_cli(&Cli::parse_from(full))
    }

    #[test]
    fn test_per_worker_shares() {
        let config = config_from(&[
            "--number-of-workers",
            "4",
            "--max-outstanding-requests",
            "100",
            "--request-per-second",
            "1000",
        ])
        .unwrap();
        assert_eq!(config.max_outstanding_per_worker(), 25);
        assert!((config.rps_per_worker() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_counter_name_empty_is_none() {
        let config = config_from(&[]).unwrap();
        assert!(config.counter_name.is_none());
        let config = config_from(&["--counter-name", "warm_keys"]).unwrap();
        assert_eq!(config.counter_name.as_deref(), Some("warm_keys"));
    }

    #[test]
    fn test_workload_config_flows_through() {
        let config = config_from(&["--config-in-json", "{\"sleep_time_us\": 77}"]).unwrap();
        assert_eq!(config.workload_config["sleep_time_us"], 77);
    }

    #[test]
    fn test_bad_affinity_rejected() {
        assert!(config_from(&["--cpu-affinity", "zero,one"]).is_err());
    }
}
