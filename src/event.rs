//! Worker events and queues
//!
//! The scheduler talks to workers exclusively through per-worker event
//! queues: unbounded MPSC channels carrying [`Event`] values. The scheduler
//! is the single producer during normal operation; control paths may also
//! enqueue. Delivery is FIFO per producer.
//!
//! Enqueueing must never block or yield — the scheduler calls it from a
//! spin-timed loop — so the queue is unbounded and the send is a plain
//! channel push. A shared depth gauge rides alongside the channel because
//! the scheduler needs the queue length for overload logging and the
//! channel itself does not expose one to the sender.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A control or work message delivered to a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Stop consuming events and begin draining
    Stop,
    /// Reset per-run workload state
    Reset,
    /// Send one request, subject to the outstanding cap
    SendRequest,
    /// Switch the workload to a named phase
    SetPhase(String),
    /// Adjust the per-worker outstanding-request cap
    SetMaxOutstanding(i32),
}

/// Producer handle for one worker's event queue.
#[derive(Debug, Clone)]
pub struct WorkerQueue {
    tx: mpsc::UnboundedSender<Event>,
    depth: Arc<AtomicUsize>,
}

impl WorkerQueue {
    /// Enqueue an event. Non-blocking; silently drops the event when the
    /// worker has already gone away (shutdown races are benign).
    pub fn enqueue(&self, event: Event) {
        if self.tx.send(event).is_ok() {
            self.depth.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events enqueued but not yet consumed.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half of a worker's event queue; owned by exactly one worker.
#[derive(Debug)]
pub struct WorkerQueueReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
    depth: Arc<AtomicUsize>,
}

impl WorkerQueueReceiver {
    /// Receive the next event, in FIFO order. Returns `None` once every
    /// producer handle has been dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        let event = self.rx.recv().await;
        if event.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        event
    }
}

/// Create a worker queue pair.
pub fn worker_queue() -> (WorkerQueue, WorkerQueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        WorkerQueue {
            tx,
            depth: Arc::clone(&depth),
        },
        WorkerQueueReceiver { rx, depth },
    )
}
