//! Treadmill CLI entry point

use anyhow::Result;
use treadmill::config::cli::{Cli, ServiceKind};
use treadmill::config::{validator, Config};
use treadmill::service::{MockService, SleepService};
use treadmill::{coordinator, stats, util};

fn main() -> Result<()> {
    println!("Treadmill v{}", env!("CARGO_PKG_VERSION"));
    println!("Open-loop load generator");
    println!();

    let cli = Cli::parse_args();
    let config = Config::from_cli(&cli)?;
    validator::validate_config(&config)?;

    // Global knobs must be set before any thread touches them
    util::random::init_seed(config.random_seed);
    stats::configure(config.stat_settings);

    match cli.service {
        ServiceKind::Sleep => {
            let service =
                SleepService::from_config(&config.workload_config, config.sleep_time_us);
            coordinator::run(&config, service)
        }
        ServiceKind::Mock => {
            let service = MockService::new(std::time::Duration::ZERO);
            coordinator::run(&config, service)
        }
    }
}
