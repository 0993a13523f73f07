//! Sleep service
//!
//! A demo service whose "target" is a timer: each request asks for a sleep
//! of a configured duration and completes when the timer fires. Useful for
//! exercising the scheduler and workers without a network, and for
//! calibrating the harness itself (measured latency minus requested sleep
//! is pure harness overhead).
//!
//! The sleep duration comes from the workload configuration key
//! `sleep_time_us` (or the `--sleep_time_us` flag); an optional
//! `sleep_jitter_us` adds a uniform jitter on top.

use crate::service::{Connection, NextRequest, RequestError, Service, Workload};
use crate::util::random::ThreadRandomEngine;
use crate::Result;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SleepRequest {
    pub sleep_time_us: u64,
}

#[derive(Debug, Clone)]
pub struct SleepReply {
    pub slept_us: u64,
}

#[derive(Clone)]
pub struct SleepService {
    sleep_time_us: u64,
    sleep_jitter_us: u64,
}

impl SleepService {
    /// Build from workload configuration; missing keys fall back to
    /// `default_sleep_time_us`.
    pub fn from_config(config: &Value, default_sleep_time_us: u64) -> Self {
        let sleep_time_us = config
            .get("sleep_time_us")
            .and_then(Value::as_u64)
            .unwrap_or(default_sleep_time_us);
        let sleep_jitter_us = config
            .get("sleep_jitter_us")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Self {
            sleep_time_us,
            sleep_jitter_us,
        }
    }
}

impl Service for SleepService {
    type Request = SleepRequest;
    type Reply = SleepReply;
    type Connection = SleepConnection;
    type Workload = SleepWorkload;

    fn name(&self) -> &'static str {
        "sleep"
    }

    fn connection(&self) -> Result<SleepConnection> {
        Ok(SleepConnection)
    }

    fn workload(&self) -> Result<SleepWorkload> {
        Ok(SleepWorkload {
            sleep_time_us: self.sleep_time_us,
            sleep_jitter_us: self.sleep_jitter_us,
            phase: String::new(),
            requests_generated: 0,
        })
    }
}

pub struct SleepConnection;

impl Connection<SleepRequest, SleepReply> for SleepConnection {
    fn is_ready(&self) -> bool {
        true
    }

    fn send(
        &self,
        request: SleepRequest,
    ) -> LocalBoxFuture<'static, std::result::Result<SleepReply, RequestError>> {
        let sleep_time_us = request.sleep_time_us;
        async move {
            tokio::time::sleep(Duration::from_micros(sleep_time_us)).await;
            Ok(SleepReply {
                slept_us: sleep_time_us,
            })
        }
        .boxed_local()
    }
}

pub struct SleepWorkload {
    sleep_time_us: u64,
    sleep_jitter_us: u64,
    phase: String,
    requests_generated: u64,
}

impl Workload<SleepRequest, SleepReply> for SleepWorkload {
    fn next_request(&mut self) -> Option<NextRequest<SleepRequest, SleepReply>> {
        let jitter = if self.sleep_jitter_us > 0 {
            ThreadRandomEngine::get_integer(0, self.sleep_jitter_us)
        } else {
            0
        };
        self.requests_generated += 1;
        let (next, _future) = NextRequest::new(SleepRequest {
            sleep_time_us: self.sleep_time_us + jitter,
        });
        Some(next)
    }

    fn reset(&mut self) {
        self.requests_generated = 0;
    }

    fn set_phase(&mut self, phase: &str) {
        self.phase = phase.to_string();
    }

    fn config_output(&self) -> Value {
        serde_json::json!({
            "sleep_time_us": self.sleep_time_us,
            "sleep_jitter_us": self.sleep_jitter_us,
            "requests_generated": self.requests_generated,
        })
    }
}
