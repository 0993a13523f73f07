//! Remote-control protocol
//!
//! The control plane speaks newline-delimited JSON over TCP: one request
//! object per line, answered by one response object per line. The surface
//! is low-rate (a human or a test harness poking the run), so a textual
//! framing beats a binary one — any `nc` session can drive it.
//!
//! ```text
//! Client                            Treadmill
//!   |                                  |
//!   |-- {"method":"pause"} ----------->|
//!   |<------------- {"success":true} --|
//!   |                                  |
//!   |-- {"method":"get_rate"} -------->|
//!   |<-- {"scheduler_running":false,...}|
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A control request. `method` selects the operation; parameters ride in
/// `params`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ControlRequest {
    Pause,
    Resume,
    /// Set the phase, then resume
    Resume2 {
        phase_name: String,
    },
    GetRate,
    SetRps {
        rps: i32,
    },
    SetMaxOutstanding {
        max_outstanding: i32,
    },
    GetConfiguration {
        key: String,
    },
    SetConfiguration {
        key: String,
        value: String,
    },
    ClearConfiguration,
    GetStatus,
    GetStatusDetails,
    AliveSince,
    GetCounters,
}

/// A control response, shaped per method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ControlResponse {
    Rate {
        scheduler_running: bool,
        rps: i32,
        max_outstanding: i32,
    },
    Counters {
        counters: BTreeMap<String, i64>,
    },
    AliveSince {
        alive_since: i64,
    },
    Status {
        status: String,
    },
    Value {
        value: String,
    },
    Success {
        success: bool,
    },
    Error {
        error: String,
    },
}

impl ControlResponse {
    pub fn success(success: bool) -> Self {
        ControlResponse::Success { success }
    }
}
