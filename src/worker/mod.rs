//! Worker threads
//!
//! A worker is the execution unit that actually sends requests. Each worker
//! owns one event queue (fed by the scheduler), `M` connections, and one
//! workload, all living on a single-threaded cooperative event loop: request
//! completions are tasks on the same loop as event consumption, so no
//! worker-local state is ever touched from two threads.
//!
//! On each `SEND_REQUEST` the worker applies admission control (drop the
//! event when the outstanding cap is reached), asks the workload for the
//! next request, dispatches it on the next connection round-robin, and
//! attaches a completion that records latency into the thread-local
//! statistics, fulfills the workload's promise, and decrements the
//! outstanding count.
//!
//! Per-request failures are never fatal: they are counted by kind under
//! `exceptions` (and under `uncaught_exceptions` when nobody holds the
//! promise's receiver) and the loop keeps going.

pub mod affinity;

use crate::event::{Event, WorkerQueueReceiver};
use crate::service::{Connection, Service, Workload};
use crate::stats;
use crate::util::time::now_ns;
use crate::Result;
use anyhow::Context;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the worker publishes throughput / outstanding samples.
const SAMPLE_PERIOD_NS: i64 = 100_000_000; // 100ms

/// Options controlling worker setup.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Poll connection readiness before consuming events
    pub wait_for_target_ready: bool,
    /// Readiness counter escape hatch: proceed once this counter reaches
    /// the threshold even if connections still report not-ready
    pub counter_name: Option<String>,
    pub counter_threshold: i64,
    /// Pin the worker thread to this core
    pub cpu_affinity: Option<usize>,
}

/// A worker thread driving one event loop.
pub struct Worker<S: Service> {
    id: usize,
    service: Option<S>,
    queue: Option<WorkerQueueReceiver>,
    state: Arc<WorkerShared>,
    thread: Option<JoinHandle<Result<()>>>,
}

/// State shared between the worker handle, its thread, and the completion
/// tasks. The outstanding count and the cap are atomics because the control
/// plane and the orchestrator read them from other threads.
struct WorkerShared {
    id: usize,
    total_workers: usize,
    number_of_connections: usize,
    options: WorkerOptions,
    max_outstanding: AtomicI32,
    outstanding: Arc<AtomicI32>,
    running: AtomicBool,
    force_stop: AtomicBool,
    terminate_early: Arc<dyn Fn() + Send + Sync>,
    config_output: Mutex<Option<serde_json::Value>>,
}

impl<S: Service> Worker<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        queue: WorkerQueueReceiver,
        total_workers: usize,
        number_of_connections: usize,
        max_outstanding_per_worker: i32,
        service: S,
        options: WorkerOptions,
        terminate_early: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            id,
            service: Some(service),
            queue: Some(queue),
            state: Arc::new(WorkerShared {
                id,
                total_workers,
                number_of_connections: number_of_connections.max(1),
                options,
                max_outstanding: AtomicI32::new(max_outstanding_per_worker),
                outstanding: Arc::new(AtomicI32::new(0)),
                running: AtomicBool::new(false),
                force_stop: AtomicBool::new(false),
                terminate_early,
                config_output: Mutex::new(None),
            }),
            thread: None,
        }
    }

    /// Spawn the worker thread and start its event loop.
    pub fn run(&mut self) -> Result<()> {
        let service = self
            .service
            .take()
            .context("Worker::run called more than once")?;
        let queue = self
            .queue
            .take()
            .context("Worker::run called more than once")?;
        let state = Arc::clone(&self.state);

        let handle = std::thread::Builder::new()
            .name(format!("treadmill-worker-{}", self.id))
            .spawn(move || state.thread_main(service, queue))
            .context("Failed to spawn worker thread")?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Whether the worker still has requests in flight.
    pub fn has_more_work(&self) -> bool {
        self.state.outstanding.load(Ordering::Acquire) > 0
    }

    pub fn outstanding(&self) -> i32 {
        self.state.outstanding.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Ask the event loop to terminate even if requests are still in
    /// flight. Used after the drain grace period expires.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::Release);
        self.state.force_stop.store(true, Ordering::Release);
    }

    /// Join the worker thread, surfacing any setup error it hit.
    pub fn join(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => anyhow::bail!("Worker {} thread panicked", self.id),
            },
            None => Ok(()),
        }
    }

    /// The workload's configuration output, available after the loop ends.
    pub fn config_output(&self) -> Option<serde_json::Value> {
        self.state.config_output.lock().unwrap().clone()
    }
}

impl WorkerShared {
    fn thread_main<S: Service>(
        self: Arc<Self>,
        service: S,
        queue: WorkerQueueReceiver,
    ) -> Result<()> {
        if let Some(core) = self.options.cpu_affinity {
            affinity::set_cpu_affinity(core)
                .with_context(|| format!("Worker {}: affinity setup failed", self.id))?;
        }

        // Connections and workload are built on this thread and never leave it
        let (connections, workload) = match self.setup(&service) {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("Worker {}: setup failed: {:#}", self.id, e);
                (self.terminate_early)();
                return Err(e);
            }
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build worker runtime")?;
        let local = tokio::task::LocalSet::new();

        self.running.store(true, Ordering::Release);
        local.block_on(&runtime, self.event_loop::<S>(connections, workload, queue));
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn setup<S: Service>(&self, service: &S) -> Result<(Vec<S::Connection>, S::Workload)> {
        let mut connections = Vec::with_capacity(self.number_of_connections);
        for i in 0..self.number_of_connections {
            let connection = service
                .connection()
                .with_context(|| format!("Worker {}: failed to open connection {}", self.id, i))?;
            connections.push(connection);
        }

        if self.options.wait_for_target_ready {
            self.wait_until_ready(service, &connections);
        }

        let workload = service
            .workload()
            .with_context(|| format!("Worker {}: failed to build workload", self.id))?;
        Ok((connections, workload))
    }

    /// Poll `is_ready` on every connection once a second until all report
    /// ready, or until the configured readiness counter crosses its
    /// threshold.
    fn wait_until_ready<S: Service>(&self, service: &S, connections: &[S::Connection]) {
        loop {
            if connections.iter().all(|c| c.is_ready()) {
                return;
            }
            if let Some(name) = self.options.counter_name.as_deref() {
                if let Some(value) = service.counter_value(name) {
                    if value >= self.options.counter_threshold {
                        println!(
                            "Worker {}: counter '{}' = {} reached threshold, proceeding",
                            self.id, name, value
                        );
                        return;
                    }
                }
            }
            if self.force_stop.load(Ordering::Acquire) {
                return;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    async fn event_loop<S: Service>(
        &self,
        connections: Vec<S::Connection>,
        mut workload: S::Workload,
        mut queue: WorkerQueueReceiver,
    ) {
        let manager = stats::local();
        let mut connection_index = 0usize;
        // Shared with completion tasks, which run on this same thread
        let period_requests = Rc::new(Cell::new(0u64));
        let mut last_sample_ns = now_ns();

        while let Some(event) = queue.recv().await {
            if self.force_stop.load(Ordering::Acquire) {
                break;
            }
            match event {
                Event::Stop => break,
                Event::Reset => {
                    workload.reset();
                    period_requests.set(0);
                    last_sample_ns = now_ns();
                }
                Event::SetPhase(phase) => workload.set_phase(&phase),
                Event::SetMaxOutstanding(n) => {
                    self.max_outstanding.store(n, Ordering::Release);
                }
                Event::SendRequest => {
                    self.sample_throughput(&manager, &period_requests, &mut last_sample_ns);

                    let outstanding = self.outstanding.load(Ordering::Acquire);
                    if outstanding >= self.max_outstanding.load(Ordering::Acquire)
                        || !self.running.load(Ordering::Acquire)
                    {
                        // Admission control: the event is dropped, not deferred
                        continue;
                    }

                    let next = match workload.next_request() {
                        Some(next) => next,
                        None => {
                            // Workload exhausted: refuse new work and tell
                            // the orchestrator the run is over
                            self.running.store(false, Ordering::Release);
                            (self.terminate_early)();
                            continue;
                        }
                    };

                    let connection = &connections[connection_index];
                    connection_index = (connection_index + 1) % connections.len();

                    let send_time = now_ns();
                    self.outstanding.fetch_add(1, Ordering::AcqRel);
                    let future = connection.send(next.request);

                    let outstanding = Arc::clone(&self.outstanding);
                    let manager = Arc::clone(&manager);
                    let period_requests = Rc::clone(&period_requests);
                    let promise = next.promise;
                    tokio::task::spawn_local(async move {
                        let result = future.await;
                        let latency_us = (now_ns() - send_time) as f64 / 1000.0;
                        {
                            let mut m = manager.lock().unwrap();
                            m.continuous(stats::REQUEST_LATENCY).add_sample(latency_us);
                        }
                        period_requests.set(period_requests.get() + 1);

                        match result {
                            Ok(reply) => {
                                // The workload may have dropped its receiver;
                                // a lost success is not an error
                                let _ = promise.send(Ok(reply));
                            }
                            Err(error) => {
                                let kind = error.kind().to_string();
                                {
                                    let mut m = manager.lock().unwrap();
                                    m.counter(stats::EXCEPTIONS).increase(1, &kind);
                                }
                                if promise.send(Err(error)).is_err() {
                                    let mut m = manager.lock().unwrap();
                                    m.counter(stats::UNCAUGHT_EXCEPTIONS).increase(1, &kind);
                                }
                            }
                        }
                        outstanding.fetch_sub(1, Ordering::AcqRel);
                    });
                }
            }
        }

        self.running.store(false, Ordering::Release);

        // Drain: completions already in flight still run on this loop; wait
        // for them unless the orchestrator forces termination
        while self.outstanding.load(Ordering::Acquire) > 0
            && !self.force_stop.load(Ordering::Acquire)
        {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        *self.config_output.lock().unwrap() = Some(workload.config_output());
    }

    /// Publish throughput and outstanding samples at most once per
    /// `SAMPLE_PERIOD_NS`, extrapolated to the whole worker fleet.
    fn sample_throughput(
        &self,
        manager: &Arc<Mutex<stats::StatisticsManager>>,
        period_requests: &Rc<Cell<u64>>,
        last_sample_ns: &mut i64,
    ) {
        let now = now_ns();
        let elapsed_ns = now - *last_sample_ns;
        if elapsed_ns < SAMPLE_PERIOD_NS {
            return;
        }
        let elapsed_s = elapsed_ns as f64 / 1e9;
        let requests = period_requests.replace(0) as f64;
        let outstanding = self.outstanding.load(Ordering::Acquire) as f64;
        *last_sample_ns = now;

        let mut m = manager.lock().unwrap();
        m.continuous(stats::THROUGHPUT)
            .add_sample(requests / elapsed_s * self.total_workers as f64);
        m.continuous(stats::OUTSTANDING_REQUESTS)
            .add_sample(outstanding * self.total_workers as f64);
    }
}
