//! Open-loop request scheduler
//!
//! One dedicated thread generates `SEND_REQUEST` events at the target
//! throughput. Inter-event intervals are drawn from an exponential
//! distribution, so arrivals form a Poisson process; events land on worker
//! queues in round-robin order. Timing uses the spin-wait clock — the
//! scheduler thread burns a core and never sleeps.
//!
//! # Run states
//!
//! The scheduler is a three-state machine: `RUNNING`, `PAUSED`, `STOPPING`.
//! `pause`/`resume` are compare-and-set transitions between the first two;
//! `stop` is a sticky transition into `STOPPING` from anywhere. Every time
//! the generator (re)enters a running interval it fans `RESET` out to the
//! workers so workloads re-synchronize; on `STOPPING` it fans out `STOP`
//! and exits.
//!
//! # Pacing
//!
//! The generator keeps a nanosecond budget: each iteration subtracts the
//! time the enqueue itself took and the oversleep of the spin wait, then
//! adds the next exponential draw. Inter-arrival times therefore average
//! the requested mean even when sending is non-trivial.

use crate::event::{Event, WorkerQueue, WorkerQueueReceiver};
use crate::util::random::random_exponential_interval;
use crate::util::time::{now_ns, wait_ns, NS_PER_S};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Scheduler run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Running = 0,
    Paused = 1,
    Stopping = 2,
}

impl RunState {
    fn from_u8(v: u8) -> RunState {
        match v {
            0 => RunState::Running,
            1 => RunState::Paused,
            _ => RunState::Stopping,
        }
    }
}

/// State shared between the scheduler handle, the generator thread, and the
/// control plane. Everything mutable is atomic; the generator thread is the
/// only producer on the queues during normal operation.
struct SchedulerShared {
    state: AtomicU8,
    rps: AtomicU32,
    max_outstanding_requests: AtomicI32,
    logging_threshold: u64,
    /// Initial state is PAUSED, and `set_phase` requires PAUSED
    wait_for_resume: bool,
    queues: Vec<WorkerQueue>,
}

/// Poisson event generator and run-state machine.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    receivers: Mutex<Vec<Option<WorkerQueueReceiver>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler for `number_of_workers` queues targeting `rps`
    /// events per second in aggregate.
    ///
    /// `logging_threshold` scales the queue-overload log: worker `i` is
    /// reported when its queue depth exceeds `logging_threshold *
    /// logged[i]`, and `logged[i]` doubles after each report so logging is
    /// exponentially throttled.
    pub fn new(
        rps: u32,
        number_of_workers: usize,
        max_outstanding_requests: i32,
        logging_threshold: u64,
        wait_for_resume: bool,
    ) -> Self {
        let mut queues = Vec::with_capacity(number_of_workers);
        let mut receivers = Vec::with_capacity(number_of_workers);
        for _ in 0..number_of_workers {
            let (tx, rx) = crate::event::worker_queue();
            queues.push(tx);
            receivers.push(Some(rx));
        }
        let initial = if wait_for_resume {
            RunState::Paused
        } else {
            RunState::Running
        };
        Self {
            shared: Arc::new(SchedulerShared {
                state: AtomicU8::new(initial as u8),
                rps: AtomicU32::new(rps.max(1)),
                max_outstanding_requests: AtomicI32::new(max_outstanding_requests),
                logging_threshold: logging_threshold.max(1),
                wait_for_resume,
                queues,
            }),
            receivers: Mutex::new(receivers),
            thread: Mutex::new(None),
        }
    }

    /// Take worker `id`'s queue receiver. Each receiver can be taken once.
    pub fn take_worker_queue(&self, id: usize) -> Option<WorkerQueueReceiver> {
        self.receivers.lock().unwrap()[id].take()
    }

    /// Producer handle for worker `id`'s queue.
    pub fn worker_queue(&self, id: usize) -> WorkerQueue {
        self.shared.queues[id].clone()
    }

    /// Start the generator thread. The returned channel receives one
    /// message when the generator exits (its "done" signal).
    pub fn run(&self) -> mpsc::Receiver<()> {
        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("treadmill-scheduler".into())
            .spawn(move || {
                shared.generator_loop();
                let _ = done_tx.send(());
            })
            .expect("failed to spawn scheduler thread");
        *self.thread.lock().unwrap() = Some(handle);
        done_rx
    }

    /// Transition RUNNING -> PAUSED; no-op in any other state.
    pub fn pause(&self) {
        let _ = self.shared.state.compare_exchange(
            RunState::Running as u8,
            RunState::Paused as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Transition PAUSED -> RUNNING; no-op in any other state. Returns
    /// whether the scheduler is running afterwards.
    pub fn resume(&self) -> bool {
        let _ = self.shared.state.compare_exchange(
            RunState::Paused as u8,
            RunState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shared.state() == RunState::Running
    }

    pub fn is_running(&self) -> bool {
        self.shared.state() == RunState::Running
    }

    /// Enter STOPPING. Safe to call multiple times, from any state.
    pub fn stop(&self) {
        self.shared
            .state
            .store(RunState::Stopping as u8, Ordering::Release);
    }

    /// Wait for the generator thread to exit.
    ///
    /// # Panics
    ///
    /// Panics when called before [`stop`](Self::stop) — joining a scheduler
    /// that was never told to stop would block forever.
    pub fn join(&self) {
        assert_eq!(
            self.shared.state(),
            RunState::Stopping,
            "Scheduler::join called before stop"
        );
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Fan a `SET_PHASE` event out to every worker. When the scheduler was
    /// built with `wait_for_resume`, phases may only change while PAUSED;
    /// returns whether the fan-out happened.
    pub fn set_phase(&self, phase_name: &str) -> bool {
        if self.shared.wait_for_resume && self.shared.state() != RunState::Paused {
            eprintln!(
                "Ignoring phase change to '{}': scheduler is not paused",
                phase_name
            );
            return false;
        }
        self.shared
            .message_all_workers(Event::SetPhase(phase_name.to_string()));
        true
    }

    pub fn rps(&self) -> u32 {
        self.shared.rps.load(Ordering::Relaxed)
    }

    /// Change the target rate. The generator picks the new rate up at the
    /// start of its next interval.
    pub fn set_rps(&self, rps: i32) {
        self.shared.rps.store(rps.max(1) as u32, Ordering::Relaxed);
    }

    pub fn max_outstanding_requests(&self) -> i32 {
        self.shared.max_outstanding_requests.load(Ordering::Relaxed)
    }

    /// Change the aggregate outstanding cap; each worker receives its share
    /// through a `SET_MAX_OUTSTANDING` event.
    pub fn set_max_outstanding_requests(&self, max_outstanding: i32) {
        self.shared
            .max_outstanding_requests
            .store(max_outstanding, Ordering::Relaxed);
        let per_worker = max_outstanding / self.shared.queues.len() as i32;
        self.shared
            .message_all_workers(Event::SetMaxOutstanding(per_worker));
    }
}

impl SchedulerShared {
    fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn message_all_workers(&self, event: Event) {
        for queue in &self.queues {
            queue.enqueue(event.clone());
        }
    }

    /// The generator. Exactly one instance runs, on the scheduler thread.
    fn generator_loop(&self) {
        let number_of_workers = self.queues.len();
        let mut logged = vec![1u64; number_of_workers];

        loop {
            // Entering (or re-entering) a running interval
            self.message_all_workers(Event::Reset);
            let mut next_worker = 0usize;
            let mut rps_snapshot = self.rps.load(Ordering::Relaxed);
            let mut interval_ns = NS_PER_S as f64 / rps_snapshot as f64;
            let mut a: i64 = 0;
            let mut b: i64;
            let mut budget = random_exponential_interval(interval_ns) as i64;

            while self.state() == RunState::Running {
                b = now_ns();
                if a != 0 {
                    // Account for time spent sending the previous message
                    budget -= b - a;
                }
                wait_ns(budget.max(0));
                a = now_ns();
                // Decrease the budget by the exact time slept (possibly
                // more than asked), increase by the next interval
                budget += random_exponential_interval(interval_ns) as i64 - (a - b);

                self.queues[next_worker].enqueue(Event::SendRequest);
                if self.queues[next_worker].len() as u64
                    > self.logging_threshold * logged[next_worker]
                {
                    eprintln!(
                        "Queue for worker {} is overloaded by a factor of {}",
                        next_worker, logged[next_worker]
                    );
                    logged[next_worker] *= 2;
                }

                next_worker += 1;
                if next_worker == number_of_workers {
                    next_worker = 0;
                }

                let rps_now = self.rps.load(Ordering::Relaxed);
                if rps_now != rps_snapshot {
                    rps_snapshot = rps_now;
                    interval_ns = NS_PER_S as f64 / rps_snapshot as f64;
                }
            }

            if self.state() == RunState::Stopping {
                break;
            }
            while self.state() == RunState::Paused {
                wait_ns(1000);
            }
            if self.state() == RunState::Stopping {
                break;
            }
        }

        // Shut down all workers
        self.message_all_workers(Event::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn drain_events(mut rx: WorkerQueueReceiver) -> Vec<Event> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                let is_stop = event == Event::Stop;
                events.push(event);
                if is_stop {
                    break;
                }
            }
            events
        })
    }

    #[test]
    fn test_state_machine_transitions() {
        let scheduler = Scheduler::new(100, 1, 10, 100, false);
        assert!(scheduler.is_running());
        scheduler.pause();
        assert!(!scheduler.is_running());
        // Pause while paused stays paused
        scheduler.pause();
        assert!(!scheduler.is_running());
        assert!(scheduler.resume());
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
        // Resume after stop must fail
        assert!(!scheduler.resume());
    }

    #[test]
    fn test_initial_state_paused_when_waiting() {
        let scheduler = Scheduler::new(100, 1, 10, 100, true);
        assert!(!scheduler.is_running());
        assert!(scheduler.resume());
    }

    #[test]
    #[should_panic(expected = "join called before stop")]
    fn test_join_before_stop_panics() {
        let scheduler = Scheduler::new(100, 1, 10, 100, false);
        scheduler.join();
    }

    #[test]
    fn test_set_phase_requires_paused_in_resume_mode() {
        let scheduler = Scheduler::new(100, 2, 10, 100, true);
        assert!(scheduler.set_phase("p1"));
        scheduler.resume();
        assert!(!scheduler.set_phase("p2"));
    }

    #[test]
    fn test_set_max_outstanding_fans_out_per_worker_share() {
        let scheduler = Scheduler::new(100, 4, 40, 100, false);
        let rx = scheduler.take_worker_queue(0).unwrap();
        scheduler.set_max_outstanding_requests(100);
        assert_eq!(scheduler.max_outstanding_requests(), 100);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let mut rx = rx;
        let event = runtime.block_on(rx.recv()).unwrap();
        assert_eq!(event, Event::SetMaxOutstanding(25));
    }

    #[test]
    fn test_generator_emits_poisson_event_count() {
        // 2000 rps over ~0.5s => ~1000 events, sigma = sqrt(1000) ~ 32.
        // Allow far beyond 3 sigma for loaded test machines.
        let scheduler = Scheduler::new(2000, 2, 10, 1_000_000, false);
        let rx0 = scheduler.take_worker_queue(0).unwrap();
        let rx1 = scheduler.take_worker_queue(1).unwrap();

        let done = scheduler.run();
        std::thread::sleep(Duration::from_millis(500));
        scheduler.stop();
        done.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.join();

        let events0 = drain_events(rx0);
        let events1 = drain_events(rx1);
        let sends = events0
            .iter()
            .chain(events1.iter())
            .filter(|e| **e == Event::SendRequest)
            .count();
        assert!(
            (700..=1300).contains(&sends),
            "expected ~1000 send events, got {}",
            sends
        );

        // Round-robin: the two workers differ by at most one send
        let sends0 = events0.iter().filter(|e| **e == Event::SendRequest).count();
        let sends1 = events1.iter().filter(|e| **e == Event::SendRequest).count();
        assert!(sends0.abs_diff(sends1) <= 1);

        // Every queue starts with RESET and ends with STOP
        assert_eq!(events0.first(), Some(&Event::Reset));
        assert_eq!(events0.last(), Some(&Event::Stop));
        assert_eq!(events1.first(), Some(&Event::Reset));
        assert_eq!(events1.last(), Some(&Event::Stop));
    }

    #[test]
    fn test_exponential_intervals_have_exponential_shape() {
        // For Exp(mean), P(X < mean) = 1 - 1/e ~ 0.632 and the coefficient
        // of variation is 1. Check both on the scheduler's draw helper.
        let mean = 50_000.0;
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| random_exponential_interval(mean)).collect();
        let below = draws.iter().filter(|d| **d < mean).count() as f64 / n as f64;
        assert!((below - 0.632).abs() < 0.02, "P(X<mean) = {}", below);

        let avg = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - avg) * (d - avg)).sum::<f64>() / (n - 1) as f64;
        let cv = var.sqrt() / avg;
        assert!((cv - 1.0).abs() < 0.05, "coefficient of variation = {}", cv);
    }

    #[test]
    fn test_pause_stops_event_flow() {
        let scheduler = Scheduler::new(1000, 1, 10, 1_000_000, false);
        let queue = scheduler.worker_queue(0);
        let _rx = scheduler.take_worker_queue(0).unwrap();

        let done = scheduler.run();
        std::thread::sleep(Duration::from_millis(200));
        scheduler.pause();
        std::thread::sleep(Duration::from_millis(50));
        let depth_at_pause = queue.len();
        std::thread::sleep(Duration::from_millis(300));
        // No new events while paused
        assert!(queue.len() <= depth_at_pause + 1);

        assert!(scheduler.resume());
        std::thread::sleep(Duration::from_millis(200));
        assert!(queue.len() > depth_at_pause);

        scheduler.stop();
        done.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.join();
    }

    #[test]
    fn test_rate_change_picked_up_mid_run() {
        let scheduler = Scheduler::new(200, 1, 10, 1_000_000, false);
        let queue = scheduler.worker_queue(0);
        let _rx = scheduler.take_worker_queue(0).unwrap();

        let done = scheduler.run();
        std::thread::sleep(Duration::from_millis(400));
        let slow_count = queue.len();
        scheduler.set_rps(4000);
        std::thread::sleep(Duration::from_millis(400));
        let fast_count = queue.len() - slow_count;

        scheduler.stop();
        done.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.join();

        // ~80 events in the slow window vs ~1600 in the fast window;
        // require a clear separation rather than exact totals
        assert!(
            fast_count > slow_count.max(1) * 5,
            "slow window {} fast window {}",
            slow_count,
            fast_count
        );
    }

    #[test]
    fn test_stop_while_paused_fans_out_stop() {
        let scheduler = Scheduler::new(100, 1, 10, 100, true);
        let rx = scheduler.take_worker_queue(0).unwrap();
        let done = scheduler.run();
        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();
        done.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.join();

        let events = drain_events(rx);
        assert_eq!(events.last(), Some(&Event::Stop));
    }
}
