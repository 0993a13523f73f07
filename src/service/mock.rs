//! Mock service
//!
//! An in-process service for tests and dry runs: requests complete after a
//! configurable delay (zero means "as fast as the loop turns"), optionally
//! failing every Nth request, with shared metrics so a test can observe
//! exactly what the workers did — sends, completions, the in-flight peak,
//! phases and resets seen by the workload.

use crate::service::{Connection, NextRequest, RequestError, Service, Workload};
use crate::Result;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared observation point for everything the mock service sees.
#[derive(Debug, Default)]
pub struct MockMetrics {
    /// Requests handed to a connection
    pub sent: AtomicU64,
    /// Requests whose completion ran
    pub completed: AtomicU64,
    /// Requests that completed with an error
    pub failed: AtomicU64,
    /// Currently in-flight requests
    pub in_flight: AtomicI64,
    /// High-water mark of `in_flight`
    pub peak_in_flight: AtomicI64,
    /// `reset()` calls observed by workloads
    pub resets: AtomicU64,
    /// Phases observed by workloads, in order
    pub phases: Mutex<Vec<String>>,
}

impl MockMetrics {
    fn record_send(&self) {
        self.sent.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn record_completion(&self, failed: bool) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        if failed {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct MockRequest {
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockReply {
    pub sequence: u64,
}

/// Mock service factory. Clones share one [`MockMetrics`].
#[derive(Clone)]
pub struct MockService {
    reply_delay: Duration,
    /// Fail every Nth request with a protocol error
    fail_every: Option<u64>,
    /// Workload returns `None` after this many requests
    exhaust_after: Option<u64>,
    metrics: Arc<MockMetrics>,
}

impl MockService {
    pub fn new(reply_delay: Duration) -> Self {
        Self {
            reply_delay,
            fail_every: None,
            exhaust_after: None,
            metrics: Arc::new(MockMetrics::default()),
        }
    }

    /// Fail every `n`th request (1-based) with a protocol error.
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    /// Exhaust the workload after `n` requests.
    pub fn exhaust_after(mut self, n: u64) -> Self {
        self.exhaust_after = Some(n);
        self
    }

    pub fn metrics(&self) -> Arc<MockMetrics> {
        Arc::clone(&self.metrics)
    }
}

impl Service for MockService {
    type Request = MockRequest;
    type Reply = MockReply;
    type Connection = MockConnection;
    type Workload = MockWorkload;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn connection(&self) -> Result<MockConnection> {
        Ok(MockConnection {
            reply_delay: self.reply_delay,
            fail_every: self.fail_every,
            metrics: Arc::clone(&self.metrics),
        })
    }

    fn workload(&self) -> Result<MockWorkload> {
        Ok(MockWorkload {
            sequence: 0,
            exhaust_after: self.exhaust_after,
            metrics: Arc::clone(&self.metrics),
        })
    }
}

pub struct MockConnection {
    reply_delay: Duration,
    fail_every: Option<u64>,
    metrics: Arc<MockMetrics>,
}

impl Connection<MockRequest, MockReply> for MockConnection {
    fn is_ready(&self) -> bool {
        true
    }

    fn send(
        &self,
        request: MockRequest,
    ) -> LocalBoxFuture<'static, std::result::Result<MockReply, RequestError>> {
        let delay = self.reply_delay;
        let fail_every = self.fail_every;
        let metrics = Arc::clone(&self.metrics);
        metrics.record_send();
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let fail = fail_every.is_some_and(|n| request.sequence % n == n - 1);
            metrics.record_completion(fail);
            if fail {
                Err(RequestError::Protocol("injected failure".into()))
            } else {
                Ok(MockReply {
                    sequence: request.sequence,
                })
            }
        }
        .boxed_local()
    }
}

pub struct MockWorkload {
    sequence: u64,
    exhaust_after: Option<u64>,
    metrics: Arc<MockMetrics>,
}

impl Workload<MockRequest, MockReply> for MockWorkload {
    fn next_request(&mut self) -> Option<NextRequest<MockRequest, MockReply>> {
        if self.exhaust_after.is_some_and(|n| self.sequence >= n) {
            return None;
        }
        let request = MockRequest {
            sequence: self.sequence,
        };
        self.sequence += 1;
        let (next, _future) = NextRequest::new(request);
        Some(next)
    }

    fn reset(&mut self) {
        self.metrics.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn set_phase(&mut self, phase: &str) {
        self.metrics.phases.lock().unwrap().push(phase.to_string());
    }

    fn config_output(&self) -> serde_json::Value {
        serde_json::json!({ "requests_generated": self.sequence })
    }
}
