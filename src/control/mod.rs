//! Remote control plane
//!
//! An optional TCP surface for steering a run while it is in flight:
//! pause/resume, phase changes, rate and outstanding-cap changes, a small
//! configuration store, and status/counter export. The same handler can be
//! bound on two ports — `control_port` for steering and `server_port` for
//! the status/counters surface — matching how the flags are documented.
//!
//! A watchdog, when enabled, records the time of every control call; if an
//! armed window (the `watchdog_sec` configuration key) elapses without a
//! call, the process aborts. The watchdog exists for orchestrated runs
//! where a dead controller must not leave a load generator running
//! unattended.

pub mod protocol;

use crate::scheduler::Scheduler;
use crate::stats;
use crate::Result;
use anyhow::Context;
use protocol::{ControlRequest, ControlResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;

/// Process status exposed through `get_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Starting = 0,
    Alive = 1,
    Stopping = 2,
    Stopped = 3,
}

impl Status {
    fn from_u8(v: u8) -> Status {
        match v {
            0 => Status::Starting,
            1 => Status::Alive,
            2 => Status::Stopping,
            _ => Status::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Starting => "STARTING",
            Status::Alive => "ALIVE",
            Status::Stopping => "STOPPING",
            Status::Stopped => "STOPPED",
        }
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Shared state behind every control endpoint.
pub struct ControlState {
    scheduler: Arc<Scheduler>,
    status: AtomicU8,
    alive_since: i64,
    configuration: Mutex<HashMap<String, String>>,
    require_configuration_on_resume: bool,
    watchdog_enabled: bool,
    watchdog_duration_sec: AtomicU32,
    last_heartbeat: AtomicI64,
}

impl ControlState {
    pub fn new(
        scheduler: Arc<Scheduler>,
        require_configuration_on_resume: bool,
        watchdog_enabled: bool,
    ) -> Self {
        Self {
            scheduler,
            status: AtomicU8::new(Status::Starting as u8),
            alive_since: unix_seconds(),
            configuration: Mutex::new(HashMap::new()),
            require_configuration_on_resume,
            watchdog_enabled,
            watchdog_duration_sec: AtomicU32::new(0),
            last_heartbeat: AtomicI64::new(0),
        }
    }

    pub fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    fn watchdog_update(&self) {
        if self.watchdog_enabled && self.watchdog_duration_sec.load(Ordering::Relaxed) > 0 {
            self.last_heartbeat.store(unix_seconds(), Ordering::Relaxed);
        }
    }

    /// Whether the armed watchdog window has elapsed without a control call.
    fn watchdog_timed_out(&self, now: i64) -> bool {
        if !self.watchdog_enabled {
            return false;
        }
        let duration = self.watchdog_duration_sec.load(Ordering::Relaxed) as i64;
        duration > 0 && now - duration > self.last_heartbeat.load(Ordering::Relaxed)
    }

    /// Execute one control request.
    pub fn handle(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Pause => {
                println!("control: pause");
                self.scheduler.pause();
                // A paused run is deliberately unattended; disarm
                self.watchdog_duration_sec.store(0, Ordering::Relaxed);
                ControlResponse::success(true)
            }
            ControlRequest::Resume => {
                println!("control: resume");
                self.watchdog_update();
                if self.require_configuration_on_resume
                    && self.configuration.lock().unwrap().is_empty()
                {
                    eprintln!("refusing resume without configuration");
                    return ControlResponse::success(false);
                }
                ControlResponse::success(self.scheduler.resume())
            }
            ControlRequest::Resume2 { phase_name } => {
                println!("control: resume2 with phase {}", phase_name);
                self.watchdog_update();
                self.scheduler.set_phase(&phase_name);
                let running = self.scheduler.resume();
                println!(
                    "Scheduler is currently {}",
                    if running { "Running" } else { "Not Running" }
                );
                ControlResponse::success(running)
            }
            ControlRequest::GetRate => ControlResponse::Rate {
                scheduler_running: self.scheduler.is_running(),
                rps: self.scheduler.rps() as i32,
                max_outstanding: self.scheduler.max_outstanding_requests(),
            },
            ControlRequest::SetRps { rps } => {
                println!("control: set_rps to {}", rps);
                self.watchdog_update();
                self.scheduler.set_rps(rps);
                ControlResponse::success(true)
            }
            ControlRequest::SetMaxOutstanding { max_outstanding } => {
                println!("control: set_max_outstanding to {}", max_outstanding);
                self.watchdog_update();
                self.scheduler.set_max_outstanding_requests(max_outstanding);
                ControlResponse::success(true)
            }
            ControlRequest::GetConfiguration { key } => {
                self.watchdog_update();
                let value = self
                    .configuration
                    .lock()
                    .unwrap()
                    .get(&key)
                    .cloned()
                    .unwrap_or_default();
                ControlResponse::Value { value }
            }
            ControlRequest::SetConfiguration { key, value } => {
                println!("control: set_configuration {} = {}", key, value);
                self.watchdog_update();
                if self.watchdog_enabled && key == "watchdog_sec" {
                    // Unparsable values disarm rather than fail the call
                    let secs = value.parse::<u32>().unwrap_or(0);
                    self.watchdog_duration_sec.store(secs, Ordering::Relaxed);
                    self.last_heartbeat.store(unix_seconds(), Ordering::Relaxed);
                }
                self.configuration.lock().unwrap().insert(key, value);
                ControlResponse::success(true)
            }
            ControlRequest::ClearConfiguration => {
                println!("control: clear_configuration");
                self.watchdog_update();
                self.configuration.lock().unwrap().clear();
                ControlResponse::success(true)
            }
            ControlRequest::GetStatus | ControlRequest::GetStatusDetails => {
                ControlResponse::Status {
                    status: self.status().as_str().to_string(),
                }
            }
            ControlRequest::AliveSince => ControlResponse::AliveSince {
                alive_since: self.alive_since,
            },
            ControlRequest::GetCounters => ControlResponse::Counters {
                counters: stats::export_all_counters(),
            },
        }
    }
}

/// A TCP listener serving the control protocol on its own thread.
pub struct ControlServer {
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ControlServer {
    /// Bind `port` (0 picks a free one) and serve until stopped.
    pub fn spawn(port: u16, state: Arc<ControlState>) -> Result<ControlServer> {
        let listener = std::net::TcpListener::bind(("0.0.0.0", port))
            .with_context(|| format!("Failed to bind control port {}", port))?;
        listener
            .set_nonblocking(true)
            .context("Failed to configure control listener")?;
        let bound_port = listener.local_addr().context("No local addr")?.port();
        println!("Control endpoint on port {}", bound_port);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let thread = std::thread::Builder::new()
            .name(format!("treadmill-control-{}", bound_port))
            .spawn(move || serve(listener, state, shutdown_rx))
            .context("Failed to spawn control thread")?;

        Ok(ControlServer {
            port: bound_port,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting and join the server thread.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(
    listener: std::net::TcpListener,
    state: Arc<ControlState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Control server runtime failed: {}", e);
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                eprintln!("Control listener conversion failed: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            eprintln!("Control accept failed: {}", e);
                            continue;
                        }
                    };
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let _ = handle_connection(stream, state).await;
                    });
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                    if state.watchdog_timed_out(unix_seconds()) {
                        eprintln!("watchdog timeout: no control contact within the armed window");
                        std::process::abort();
                    }
                }
            }
        }
    });
}

async fn handle_connection(stream: tokio::net::TcpStream, state: Arc<ControlState>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => state.handle(request),
            Err(e) => ControlResponse::Error {
                error: format!("bad request: {}", e),
            },
        };
        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        write_half.write_all(payload.as_bytes()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader as StdBufReader, Write};
    use std::net::TcpStream;

    fn test_state(wait_for_resume: bool) -> (Arc<ControlState>, Arc<Scheduler>) {
        let scheduler = Arc::new(Scheduler::new(100, 1, 10, 100, wait_for_resume));
        let state = Arc::new(ControlState::new(Arc::clone(&scheduler), false, false));
        (state, scheduler)
    }

    fn call(port: u16, request: &str) -> serde_json::Value {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        stream.write_all(b"\n").unwrap();
        let mut reader = StdBufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn test_handle_pause_resume() {
        let (state, scheduler) = test_state(false);
        assert!(scheduler.is_running());
        state.handle(ControlRequest::Pause);
        assert!(!scheduler.is_running());
        let response = state.handle(ControlRequest::Resume);
        assert_eq!(response, ControlResponse::success(true));
        assert!(scheduler.is_running());
    }

    #[test]
    fn test_handle_resume2_sets_phase_first() {
        let (state, scheduler) = test_state(true);
        let rx = scheduler.take_worker_queue(0).unwrap();
        let response = state.handle(ControlRequest::Resume2 {
            phase_name: "p1".into(),
        });
        assert_eq!(response, ControlResponse::success(true));
        assert!(scheduler.is_running());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let mut rx = rx;
        let event = runtime.block_on(rx.recv()).unwrap();
        assert_eq!(event, crate::event::Event::SetPhase("p1".into()));
    }

    #[test]
    fn test_handle_get_rate_reflects_changes() {
        let (state, _scheduler) = test_state(false);
        state.handle(ControlRequest::SetRps { rps: 5000 });
        state.handle(ControlRequest::SetMaxOutstanding {
            max_outstanding: 64,
        });
        let response = state.handle(ControlRequest::GetRate);
        assert_eq!(
            response,
            ControlResponse::Rate {
                scheduler_running: true,
                rps: 5000,
                max_outstanding: 64,
            }
        );
    }

    #[test]
    fn test_configuration_store() {
        let (state, _) = test_state(false);
        state.handle(ControlRequest::SetConfiguration {
            key: "ab_side".into(),
            value: "b".into(),
        });
        let response = state.handle(ControlRequest::GetConfiguration {
            key: "ab_side".into(),
        });
        assert_eq!(response, ControlResponse::Value { value: "b".into() });

        state.handle(ControlRequest::ClearConfiguration);
        let response = state.handle(ControlRequest::GetConfiguration {
            key: "ab_side".into(),
        });
        assert_eq!(response, ControlResponse::Value { value: "".into() });
    }

    #[test]
    fn test_require_configuration_on_resume() {
        let scheduler = Arc::new(Scheduler::new(100, 1, 10, 100, true));
        let state = ControlState::new(Arc::clone(&scheduler), true, false);
        assert_eq!(
            state.handle(ControlRequest::Resume),
            ControlResponse::success(false)
        );
        state.handle(ControlRequest::SetConfiguration {
            key: "k".into(),
            value: "v".into(),
        });
        assert_eq!(
            state.handle(ControlRequest::Resume),
            ControlResponse::success(true)
        );
    }

    #[test]
    fn test_watchdog_arming_and_timeout() {
        let scheduler = Arc::new(Scheduler::new(100, 1, 10, 100, false));
        let state = ControlState::new(Arc::clone(&scheduler), false, true);
        let now = unix_seconds();
        assert!(!state.watchdog_timed_out(now));

        state.handle(ControlRequest::SetConfiguration {
            key: "watchdog_sec".into(),
            value: "5".into(),
        });
        assert!(!state.watchdog_timed_out(now));
        assert!(state.watchdog_timed_out(now + 10));

        // Any control call is a heartbeat
        state.handle(ControlRequest::GetConfiguration { key: "x".into() });
        assert!(!state.watchdog_timed_out(now + 4));

        // Pause disarms
        state.handle(ControlRequest::Pause);
        assert!(!state.watchdog_timed_out(now + 1000));
    }

    #[test]
    fn test_server_end_to_end() {
        let (state, scheduler) = test_state(false);
        let mut server = ControlServer::spawn(0, state).unwrap();
        let port = server.port();

        let response = call(port, "{\"method\":\"get_status\"}");
        assert_eq!(response["status"], "STARTING");

        let response = call(port, "{\"method\":\"pause\"}");
        assert_eq!(response["success"], true);
        assert!(!scheduler.is_running());

        let response = call(port, "{\"method\":\"get_rate\"}");
        assert_eq!(response["scheduler_running"], false);
        assert_eq!(response["rps"], 100);

        let response = call(port, "{\"method\":\"get_counters\"}");
        assert!(response["counters"].is_object());

        let response = call(port, "not json");
        assert!(response["error"].as_str().unwrap().contains("bad request"));

        server.stop();
    }
}
