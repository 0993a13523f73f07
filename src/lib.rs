//! Treadmill - distributed load generator
//!
//! Treadmill drives a target service at a precisely controlled request rate
//! and measures the resulting latency distribution. Request send events are
//! scheduled open-loop: arrival times follow a Poisson process, independent
//! of prior completions, so the measured latencies reflect what the target
//! does under the offered load rather than under a lock-step client.
//!
//! # Architecture
//!
//! - **Scheduler**: one spin-timed thread draws exponential inter-arrival
//!   intervals and fans `SEND_REQUEST` events out to worker queues
//!   round-robin
//! - **Workers**: one event loop per thread, each driving a pool of
//!   connections with a per-worker outstanding-request cap
//! - **Statistics**: thread-local streaming statistics (self-calibrating
//!   histograms and counters), combined across threads at shutdown
//! - **Control plane**: optional TCP surface for pause/resume, rate changes,
//!   and counter export while a run is in flight

pub mod config;
pub mod control;
pub mod coordinator;
pub mod event;
pub mod output;
pub mod scheduler;
pub mod service;
pub mod stats;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use scheduler::Scheduler;
pub use service::Service;

/// Result type used throughout Treadmill
pub type Result<T> = anyhow::Result<T>;
