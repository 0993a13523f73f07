//! Service capabilities
//!
//! A service plugs into the load generator through three capabilities:
//!
//! - [`Service`]: a factory for per-worker connections and workloads. Each
//!   worker thread clones the service and builds its own instances, so
//!   connections and workloads never cross threads.
//! - [`Connection`]: an outbound channel to the target. `send` hands back an
//!   owned future so many requests can be in flight on one connection; the
//!   future completes on the worker's own event loop.
//! - [`Workload`]: generates requests and receives replies through a
//!   per-request promise. Returning `None` from `next_request` signals
//!   end-of-work and terminates the run early.

pub mod mock;
pub mod sleep;

pub use mock::{MockMetrics, MockService};
pub use sleep::SleepService;

use crate::Result;
use futures::future::LocalBoxFuture;
use std::fmt;
use tokio::sync::oneshot;

/// Why a request failed. Counted per kind under the `exceptions` statistic;
/// unknown kinds carry their label in the `Other` tail.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    Timeout,
    ConnectionClosed,
    Protocol(String),
    Other(String),
}

impl RequestError {
    /// Counter subkey for this error kind (`exceptions.<kind>`).
    pub fn kind(&self) -> &str {
        match self {
            RequestError::Timeout => "timeout",
            RequestError::ConnectionClosed => "connection_closed",
            RequestError::Protocol(_) => "protocol",
            RequestError::Other(kind) => kind,
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Timeout => write!(f, "request timed out"),
            RequestError::ConnectionClosed => write!(f, "connection closed"),
            RequestError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            RequestError::Other(kind) => write!(f, "request error: {}", kind),
        }
    }
}

impl std::error::Error for RequestError {}

/// A request paired with the promise its reply is delivered through.
///
/// The worker fulfills the promise from the request's completion. The
/// workload may keep the matching receiver to observe the reply, or drop
/// it; an error delivered to a dropped receiver is counted as uncaught.
pub struct NextRequest<Req, Rep> {
    pub request: Req,
    pub promise: oneshot::Sender<std::result::Result<Rep, RequestError>>,
}

impl<Req, Rep> NextRequest<Req, Rep> {
    /// Pair a request with a fresh promise, returning the receiver for
    /// callers that want the reply.
    pub fn new(
        request: Req,
    ) -> (
        Self,
        oneshot::Receiver<std::result::Result<Rep, RequestError>>,
    ) {
        let (promise, future) = oneshot::channel();
        (Self { request, promise }, future)
    }
}

/// Outbound channel to the target service.
pub trait Connection<Req, Rep> {
    /// Whether the target is ready to accept load. Polled during the
    /// worker readiness gate when `--wait_for_target_ready` is set.
    fn is_ready(&self) -> bool;

    /// Dispatch a request. The returned future is owned (it borrows
    /// neither the connection nor the request site) and resolves on the
    /// worker's event loop with the reply or the failure.
    fn send(&self, request: Req) -> LocalBoxFuture<'static, std::result::Result<Rep, RequestError>>;
}

/// Request generator for one worker.
pub trait Workload<Req, Rep> {
    /// Produce the next request, or `None` when the workload is exhausted.
    fn next_request(&mut self) -> Option<NextRequest<Req, Rep>>;

    /// Reset per-run state. Fanned out when the scheduler (re)starts a
    /// running interval so paused A/B sides re-synchronize.
    fn reset(&mut self);

    /// Switch to a named phase.
    fn set_phase(&mut self, phase: &str);

    /// Configuration this workload wants written to `config_out_file`.
    fn config_output(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }
}

/// Factory for a worker's connections and workload.
///
/// Cloned once per worker thread; the clone travels to the thread and
/// builds instances there, so the instances themselves need not be `Send`.
pub trait Service: Clone + Send + 'static {
    type Request: 'static;
    type Reply: 'static;
    type Connection: Connection<Self::Request, Self::Reply>;
    type Workload: Workload<Self::Request, Self::Reply>;

    fn name(&self) -> &'static str;

    /// Open one connection to the target.
    fn connection(&self) -> Result<Self::Connection>;

    /// Build this worker's workload.
    fn workload(&self) -> Result<Self::Workload>;

    /// Value of a target-side readiness counter, when the service exposes
    /// one. Consulted by the readiness gate together with
    /// `counter_threshold`.
    fn counter_value(&self, _name: &str) -> Option<i64> {
        None
    }
}
