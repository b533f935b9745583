//! Protocol-conformant mock hardware worker.
//!
//! Stands in for the real hardware backend during development and in
//! integration tests: reads line-delimited JSON commands on stdin, answers
//! every command with exactly one `DATA:`/`ERROR:` line on stdout, and emits
//! the domain event lines real hardware produces (`TRIGGER_CAMERA`,
//! `DAQ_POSITION`, `DAQ_HOME`, `DAQ_INITIALIZED`, streaming `FRAME:` lines).
//!
//! Fault injection for tests, via environment variables:
//!
//! - `MOCK_WORKER_SUPPRESS_READY=1` — never announce readiness.
//! - `MOCK_WORKER_FAIL_ACTION=<action>` — answer that action with an `ERROR:`
//!   line instead of data.
//! - `MOCK_WORKER_DROP_ACTION=<action>` — swallow that action silently.
//! - `MOCK_WORKER_EXIT_AFTER=<n>` — exit with code 3 upon receiving the
//!   (n+1)-th command.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use serde_json::{json, Value};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn emit(line: &str) {
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

fn send_status(message: &str) {
    emit(&format!("STATUS:{message}"));
}

fn send_error(message: &str) {
    emit(&format!("ERROR:{message}"));
}

fn send_data(data: &Value) {
    emit(&format!("DATA:{data}"));
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1" || v == "true").unwrap_or(false)
}

struct FaultPlan {
    fail_action: Option<String>,
    drop_action: Option<String>,
    exit_after: Option<u64>,
}

impl FaultPlan {
    fn from_env() -> Self {
        Self {
            fail_action: std::env::var("MOCK_WORKER_FAIL_ACTION").ok(),
            drop_action: std::env::var("MOCK_WORKER_DROP_ACTION").ok(),
            exit_after: std::env::var("MOCK_WORKER_EXIT_AFTER")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

#[derive(Default)]
struct MockHardware {
    camera_connected: bool,
    camera_width: u32,
    camera_height: u32,
    daq_initialized: bool,
    position: f64,
    scanner_initialized: bool,
    scanner_frames: u32,
    streaming: Option<Arc<AtomicBool>>,
}

impl MockHardware {
    fn new() -> Self {
        Self {
            camera_width: 640,
            camera_height: 480,
            scanner_frames: 72,
            ..Self::default()
        }
    }

    fn synth_frame(&self) -> String {
        let mut bytes = vec![0u8; 256];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("data:image/png;base64,{}", BASE64.encode(&bytes))
    }

    fn apply_camera_settings(&mut self, settings: &Value) {
        if let Some(width) = settings.get("width").and_then(Value::as_u64) {
            self.camera_width = width as u32;
        }
        if let Some(height) = settings.get("height").and_then(Value::as_u64) {
            self.camera_height = height as u32;
        }
    }

    fn handle_camera(&mut self, action: &str, cmd: &Value) {
        match action {
            "connect" => {
                if let Some(settings) = cmd.get("settings") {
                    self.apply_camera_settings(settings);
                }
                send_status("Using mock camera");
                self.camera_connected = true;
                send_data(&json!({"success": true, "connected": true}));
            }
            "disconnect" => {
                self.stop_streaming();
                self.camera_connected = false;
                send_data(&json!({"success": true, "connected": false}));
            }
            "capture" => {
                if !self.camera_connected {
                    send_data(&json!({
                        "success": false,
                        "error": "Camera not connected. Call connect() first."
                    }));
                    return;
                }
                emit("TRIGGER_CAMERA");
                send_data(&json!({
                    "success": true,
                    "image": self.synth_frame(),
                    "width": self.camera_width,
                    "height": self.camera_height,
                }));
            }
            "configure" => {
                if !self.camera_connected {
                    send_data(&json!({
                        "success": false,
                        "error": "Camera not connected. Call connect() first."
                    }));
                    return;
                }
                if let Some(settings) = cmd.get("settings") {
                    self.apply_camera_settings(settings);
                }
                send_data(&json!({"success": true, "configured": true}));
            }
            "start_stream" => {
                if !self.camera_connected {
                    send_data(&json!({
                        "success": false,
                        "error": "Camera not connected. Call connect() first."
                    }));
                    return;
                }
                if self.streaming.is_none() {
                    let active = Arc::new(AtomicBool::new(true));
                    let flag = active.clone();
                    let frame = self.synth_frame();
                    thread::spawn(move || {
                        while flag.load(Ordering::SeqCst) {
                            emit(&format!("FRAME:{frame}"));
                            thread::sleep(Duration::from_millis(100));
                        }
                        send_status("Streaming worker stopped");
                    });
                    self.streaming = Some(active);
                }
                send_data(&json!({"success": true, "streaming": true}));
            }
            "stop_stream" => {
                self.stop_streaming();
                send_data(&json!({"success": true, "streaming": false}));
            }
            "status" => {
                send_data(&json!({
                    "success": true,
                    "connected": self.camera_connected,
                    "mock": true,
                    "available": true,
                }));
            }
            other => send_error(&format!("Unknown camera action: {other}")),
        }
    }

    fn stop_streaming(&mut self) {
        if let Some(active) = self.streaming.take() {
            active.store(false, Ordering::SeqCst);
        }
    }

    fn handle_daq(&mut self, action: &str, cmd: &Value) {
        match action {
            "initialize" => {
                send_status("Initializing mock DAQ");
                self.daq_initialized = true;
                self.position = 0.0;
                emit("DAQ_INITIALIZED");
                send_data(&json!({"success": true, "initialized": true}));
            }
            "cleanup" => {
                self.daq_initialized = false;
                send_data(&json!({"success": true, "initialized": false}));
            }
            "rotate" => {
                if !self.daq_initialized {
                    send_data(&json!({
                        "success": false,
                        "error": "DAQ not initialized. Call initialize() first."
                    }));
                    return;
                }
                let Some(degrees) = cmd.get("degrees").and_then(Value::as_f64) else {
                    send_data(&json!({
                        "success": false,
                        "error": "degrees parameter required for rotate action"
                    }));
                    return;
                };
                self.position = (self.position + degrees).rem_euclid(360.0);
                emit(&format!("DAQ_POSITION {:.4}", self.position));
                send_data(&json!({"success": true, "position": self.position}));
            }
            "step" => {
                if !self.daq_initialized {
                    send_data(&json!({
                        "success": false,
                        "error": "DAQ not initialized. Call initialize() first."
                    }));
                    return;
                }
                let steps = cmd.get("num_steps").and_then(Value::as_u64).unwrap_or(0);
                let direction = cmd.get("direction").and_then(Value::as_i64).unwrap_or(1);
                let steps_per_rev = 6400.0;
                let degrees = steps as f64 / steps_per_rev * 360.0 * direction as f64;
                self.position = (self.position + degrees).rem_euclid(360.0);
                emit(&format!("DAQ_POSITION {:.4}", self.position));
                send_data(&json!({"success": true, "position": self.position}));
            }
            "home" => {
                if !self.daq_initialized {
                    send_data(&json!({
                        "success": false,
                        "error": "DAQ not initialized. Call initialize() first."
                    }));
                    return;
                }
                self.position = 0.0;
                emit("DAQ_HOME");
                send_data(&json!({"success": true, "position": 0.0}));
            }
            "status" => {
                send_data(&json!({
                    "success": true,
                    "initialized": self.daq_initialized,
                    "position": self.position,
                    "mock": true,
                    "available": true,
                }));
            }
            other => send_error(&format!("Unknown DAQ action: {other}")),
        }
    }

    fn handle_scanner(&mut self, action: &str, cmd: &Value) {
        match action {
            "initialize" => {
                if let Some(frames) = cmd
                    .get("settings")
                    .and_then(|s| s.get("num_frames"))
                    .and_then(Value::as_u64)
                {
                    self.scanner_frames = frames as u32;
                }
                self.scanner_initialized = true;
                send_status("Scanner initialized successfully");
                send_data(&json!({"success": true, "initialized": true}));
            }
            "cleanup" => {
                self.scanner_initialized = false;
                send_data(&json!({"success": true, "initialized": false}));
            }
            "scan" => {
                if !self.scanner_initialized {
                    send_data(&json!({
                        "success": false,
                        "error": "Scanner not initialized. Call initialize() first."
                    }));
                    return;
                }
                send_status(&format!("Starting scan: {} frames", self.scanner_frames));
                self.position = 0.0;
                send_data(&json!({
                    "success": true,
                    "frames_captured": self.scanner_frames,
                    "output_path": "./scans",
                    "error": null,
                }));
            }
            "status" => {
                send_data(&json!({
                    "success": true,
                    "initialized": self.scanner_initialized,
                    "position": self.position,
                    "mock": true,
                }));
            }
            other => send_error(&format!("Unknown scanner action: {other}")),
        }
    }

    fn handle(&mut self, cmd: &Value) {
        let action = cmd.get("action").and_then(Value::as_str).unwrap_or("");
        match cmd.get("command").and_then(Value::as_str) {
            Some("ping") => send_data(&json!({"status": "ok", "message": "pong"})),
            Some("get_version") => send_data(&json!({"version": VERSION})),
            Some("check_hardware") => send_data(&json!({
                "camera": {"library_available": true, "devices_found": 1, "available": true},
                "daq": {"library_available": true, "devices_found": 1, "available": true},
            })),
            Some("camera") => self.handle_camera(action, cmd),
            Some("daq") => self.handle_daq(action, cmd),
            Some("scanner") => self.handle_scanner(action, cmd),
            Some(other) => send_error(&format!("Unknown command: {other}")),
            None => send_error("Invalid command: missing 'command' field"),
        }
    }
}

fn main() {
    let faults = FaultPlan::from_env();
    let mut hardware = MockHardware::new();
    let mut handled: u64 = 0;

    if !env_flag("MOCK_WORKER_SUPPRESS_READY") {
        send_status("IPC handler ready");
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(limit) = faults.exit_after {
            if handled >= limit {
                std::process::exit(3);
            }
        }
        handled += 1;

        let cmd: Value = match serde_json::from_str(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                send_error(&format!("Invalid JSON: {e}"));
                continue;
            }
        };

        let action = cmd.get("action").and_then(Value::as_str).unwrap_or("");
        if faults.drop_action.as_deref() == Some(action) {
            continue;
        }
        if faults.fail_action.as_deref() == Some(action) {
            send_error(&format!("injected failure for action '{action}'"));
            continue;
        }

        hardware.handle(&cmd);
    }

    send_status("Shutting down");
}
