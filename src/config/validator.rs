//! Configuration validation
//!
//! Bad flag combinations are configuration errors and fatal at startup,
//! before any thread spawns. Everything checked here is a cross-flag
//! constraint; single-flag parse errors are caught earlier by clap or by
//! `Config::from_cli`.

use crate::config::Config;
use crate::Result;

pub fn validate_config(config: &Config) -> Result<()> {
    if config.number_of_workers == 0 {
        anyhow::bail!("number_of_workers must be at least 1");
    }
    if config.number_of_connections == 0 {
        anyhow::bail!("number_of_connections must be at least 1");
    }
    if config.request_per_second == 0 {
        anyhow::bail!("request_per_second must be at least 1");
    }
    if config.runtime == 0 {
        anyhow::bail!("runtime must be at least 1 second");
    }
    if config.max_outstanding_requests < config.number_of_workers as i32 {
        anyhow::bail!(
            "max_outstanding_requests ({}) must be at least the number of workers ({})",
            config.max_outstanding_requests,
            config.number_of_workers
        );
    }

    if !config.cpu_affinity.is_empty() && config.cpu_affinity.len() != config.number_of_workers {
        anyhow::bail!(
            "Length of the CPU affinity list ({}) does not match the number of workers ({})",
            config.cpu_affinity.len(),
            config.number_of_workers
        );
    }

    if config.counter_name.is_some() && !config.wait_for_target_ready {
        anyhow::bail!("counter_name requires wait_for_target_ready");
    }
    if config.counter_threshold > 0 && config.counter_name.is_none() {
        anyhow::bail!("counter_threshold requires counter_name");
    }

    if config.control_port != 0 && config.control_port == config.server_port {
        anyhow::bail!(
            "control_port and server_port must differ (both {})",
            config.control_port
        );
    }

    Ok(())
}
