//! Run orchestration
//!
//! The coordinator owns the whole lifecycle of a run: build the scheduler
//! and workers, bring up the control endpoints, start everything, wait for
//! the earlier of "runtime elapsed" and "scheduler terminated" (early
//! termination, a stop over the control plane), then shut down in order —
//! stop and join the scheduler, give workers a grace period to drain their
//! outstanding requests, stop and join the workers, and finally report the
//! combined statistics.

use crate::config::Config;
use crate::control::{ControlServer, ControlState, Status};
use crate::scheduler::Scheduler;
use crate::service::Service;
use crate::stats;
use crate::worker::{Worker, WorkerOptions};
use crate::Result;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

/// Run a complete test with the given service. Returns once statistics
/// have been reported.
pub fn run<S: Service>(config: &Config, service: S) -> Result<()> {
    println!("Desired rps per worker: {}", config.rps_per_worker());
    println!(
        "Max outstanding requests per worker: {}",
        config.max_outstanding_per_worker()
    );
    println!("N Workers: {}", config.number_of_workers);
    println!("N Connections: {}", config.number_of_connections);

    let scheduler = Arc::new(Scheduler::new(
        config.request_per_second,
        config.number_of_workers,
        config.max_outstanding_requests,
        config.queue_logging_threshold,
        config.wait_for_runner_ready,
    ));

    // Control endpoints come up before the workers so an orchestrating
    // harness can watch the whole lifecycle
    let control_state = Arc::new(ControlState::new(
        Arc::clone(&scheduler),
        config.require_configuration_on_resume,
        config.enable_watchdog_timer,
    ));
    let mut control_servers = Vec::new();
    for port in [config.control_port, config.server_port] {
        if port != 0 {
            control_servers.push(ControlServer::spawn(port, Arc::clone(&control_state))?);
        }
    }

    let terminate_early: Arc<dyn Fn() + Send + Sync> = {
        let scheduler = Arc::clone(&scheduler);
        Arc::new(move || scheduler.stop())
    };

    let mut workers: Vec<Worker<S>> = Vec::with_capacity(config.number_of_workers);
    for id in 0..config.number_of_workers {
        let queue = scheduler
            .take_worker_queue(id)
            .context("Worker queue already taken")?;
        let options = WorkerOptions {
            wait_for_target_ready: config.wait_for_target_ready,
            counter_name: config.counter_name.clone(),
            counter_threshold: config.counter_threshold,
            cpu_affinity: config.cpu_affinity.get(id).copied(),
        };
        workers.push(Worker::new(
            id,
            queue,
            config.number_of_workers,
            config.number_of_connections,
            config.max_outstanding_per_worker(),
            service.clone(),
            options,
            Arc::clone(&terminate_early),
        ));
    }

    for worker in workers.iter_mut() {
        worker.run()?;
    }
    control_state.set_status(Status::Alive);

    // Start the test and wait for it to finish: whichever comes first of
    // the configured runtime and the scheduler terminating on its own
    let scheduler_done = scheduler.run();
    let _ = scheduler_done.recv_timeout(Duration::from_secs(config.runtime));

    println!("Stopping and joining scheduler thread");
    control_state.set_status(Status::Stopping);
    scheduler.stop();
    scheduler.join();

    if config.worker_shutdown_delay > 0 {
        // Give workers a grace period to finish outstanding requests
        let mut seconds_to_wait = config.worker_shutdown_delay;
        loop {
            let remaining = workers.iter().filter(|w| w.has_more_work()).count();
            if remaining == 0 || seconds_to_wait == 0 {
                break;
            }
            println!("waiting for {} worker(s)", remaining);
            std::thread::sleep(Duration::from_secs(1));
            seconds_to_wait -= 1;
        }
    }

    stats::print_all();
    println!("Stopping workers");

    // Stats are recorded; drop whatever is still scheduled
    for worker in workers.iter() {
        worker.stop();
    }

    println!("Joining worker threads");
    for worker in workers.iter_mut() {
        worker.join()?;
    }

    if let Some(path) = config.config_out_file.as_deref() {
        println!("Saving config");
        let output = workers
            .first()
            .and_then(|w| w.config_output())
            .unwrap_or(serde_json::Value::Null);
        crate::config::workload::write_json_file(path, &output)?;
    }

    if let Some(path) = config.output_file.as_deref() {
        crate::output::json::write_statistics(path)?;
    }

    for (name, value) in stats::export_all_counters() {
        println!("{}: {}", name, value);
    }

    for server in control_servers.iter_mut() {
        server.stop();
    }
    control_state.set_status(Status::Stopped);
    println!("Complete");

    Ok(())
}
