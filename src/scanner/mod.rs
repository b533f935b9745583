//! Scan orchestration.
//!
//! The [`Scanner`] sequences the two device adapters into a deterministic
//! multi-frame scan: home, then for each frame rotate to its target angle,
//! wait for the stage to settle, capture, write the frame to disk, and emit
//! progress. A scan either fully completes (frames on disk, plus an atomic
//! database record when metadata was supplied) or fails observably — the
//! orchestrator never resolves with a silently partial result, and every
//! await underneath it is bounded by the worker command timeout.
//!
//! ## State machine
//!
//! ```text
//! Uninitialized → Initializing → Ready → Scanning → Ready   (repeatable)
//!                                  ↓
//!                               Cleaning → Uninitialized
//! ```

pub mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{AppResult, ScanError};
use crate::hardware::turntable::TurntableController;
use crate::hardware::types::{CameraStatus, TurntableStatus};
use crate::hardware::CameraController;
use crate::storage::{FrameRecord, ScanRecord, ScanStore};
use crate::worker::WorkerSupervisor;

pub use session::{ScanRecordMeta, ScanSession, ScanSettings};

/// Angular slack below which a rotation is skipped.
const POSITION_TOLERANCE: f64 = 1e-6;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Orchestrator lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ScannerState {
    Uninitialized,
    Initializing,
    Ready,
    Scanning,
    Cleaning,
}

/// Progress report emitted after each captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScanProgress {
    /// Zero-based frame index.
    pub frame_number: u32,
    pub total_frames: u32,
    /// Turntable position at capture time, degrees in `[0, 360)`.
    pub position: f64,
}

/// Events for the presentation layer.
#[derive(Clone, Debug)]
pub enum ScanEvent {
    Progress(ScanProgress),
    Frame { frame_number: u32, path: PathBuf },
    Status(String),
    Error(String),
}

/// Final result of one `scan()` call. Always produced — a scan resolves, it
/// never hangs.
#[derive(Debug)]
pub struct ScanOutcome {
    pub success: bool,
    pub frames_captured: u32,
    pub output_path: PathBuf,
    /// Present when persistence metadata was supplied and the record was
    /// created.
    pub scan_id: Option<Uuid>,
    pub error: Option<ScanError>,
}

impl ScanOutcome {
    fn failure(frames_captured: u32, output_path: PathBuf, error: ScanError) -> Self {
        Self {
            success: false,
            frames_captured,
            output_path,
            scan_id: None,
            error: Some(error),
        }
    }
}

/// Result of `cleanup()`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CleanupOutcome {
    pub success: bool,
    pub initialized: bool,
}

/// Combined controller status, safe to query from any state.
#[derive(Clone, Debug, Serialize)]
pub struct ScannerStatus {
    pub state: ScannerState,
    pub initialized: bool,
    pub position: f64,
    pub camera: Option<CameraStatus>,
    pub turntable: Option<TurntableStatus>,
}

/// Sequences rotation and capture into complete scans.
///
/// The scanner is the composition root for one controller instance: it owns
/// the worker supervisor and creates the device adapters when a session is
/// initialized.
pub struct Scanner {
    supervisor: WorkerSupervisor,
    store: Option<Arc<dyn ScanStore>>,
    settle: Duration,
    state: ScannerState,
    session: Option<ScanSession>,
    camera: Option<CameraController>,
    turntable: Option<TurntableController>,
    events: broadcast::Sender<ScanEvent>,
}

impl Scanner {
    pub fn new(supervisor: WorkerSupervisor) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            supervisor,
            store: None,
            settle: Duration::from_millis(50),
            state: ScannerState::Uninitialized,
            session: None,
            camera: None,
            turntable: None,
            events,
        }
    }

    /// Build a scanner wired per application settings.
    pub fn from_settings(settings: &Settings, store: Option<Arc<dyn ScanStore>>) -> Self {
        let mut scanner = Self::new(WorkerSupervisor::new(settings.worker.clone()));
        scanner.settle = settings.scan.settle;
        scanner.store = store;
        scanner
    }

    /// Attach the persistence backend.
    pub fn with_store(mut self, store: Arc<dyn ScanStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the mechanical settling delay.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub fn supervisor_mut(&mut self) -> &mut WorkerSupervisor {
        &mut self.supervisor
    }

    /// Bring both devices up for the given session.
    ///
    /// Valid from `Uninitialized` or `Ready` (re-initializing replaces the
    /// session). On failure the scanner reverts to `Uninitialized` after a
    /// best-effort teardown.
    pub async fn initialize(&mut self, session: ScanSession) -> AppResult<()> {
        match self.state {
            ScannerState::Uninitialized | ScannerState::Ready => {}
            state => {
                return Err(ScanError::InvalidState {
                    operation: "initialize",
                    state: format!("{state:?}"),
                })
            }
        }

        let mut session = session;
        session.settings.reconcile();
        session.settings.validate()?;

        self.state = ScannerState::Initializing;
        if let Err(e) = self.bring_up(&session).await {
            self.camera = None;
            self.turntable = None;
            self.session = None;
            self.state = ScannerState::Uninitialized;
            return Err(e);
        }

        self.session = Some(session);
        self.state = ScannerState::Ready;
        let _ = self.events.send(ScanEvent::Status("scanner initialized".into()));
        Ok(())
    }

    async fn bring_up(&mut self, session: &ScanSession) -> AppResult<()> {
        if !self.supervisor.is_running() {
            self.supervisor.start().await?;
        }
        let client = self.supervisor.client()?;
        let camera = CameraController::new(client.clone());
        let turntable = TurntableController::new(client);

        camera.connect(&session.settings.camera).await?;
        if let Err(e) = turntable.initialize(&session.settings.turntable).await {
            if let Err(disconnect_err) = camera.disconnect().await {
                warn!("camera teardown after failed init: {disconnect_err}");
            }
            return Err(e);
        }

        self.camera = Some(camera);
        self.turntable = Some(turntable);
        Ok(())
    }

    /// Run one complete scan. Valid only from `Ready`; always resolves with
    /// an explicit outcome.
    pub async fn scan(&mut self) -> ScanOutcome {
        if self.state != ScannerState::Ready {
            return ScanOutcome::failure(
                0,
                self.output_dir(),
                ScanError::InvalidState {
                    operation: "scan",
                    state: format!("{:?}", self.state),
                },
            );
        }

        self.state = ScannerState::Scanning;
        let outcome = self.run_scan().await;
        self.state = ScannerState::Ready;

        match &outcome.error {
            None => {
                info!(
                    frames = outcome.frames_captured,
                    path = %outcome.output_path.display(),
                    "scan completed"
                );
            }
            Some(error) => {
                warn!(frames = outcome.frames_captured, "scan failed: {error}");
                let _ = self.events.send(ScanEvent::Error(error.to_string()));
            }
        }
        outcome
    }

    async fn run_scan(&self) -> ScanOutcome {
        let (Some(camera), Some(turntable), Some(session)) =
            (&self.camera, &self.turntable, &self.session)
        else {
            return ScanOutcome::failure(
                0,
                self.output_dir(),
                ScanError::InvalidState {
                    operation: "scan",
                    state: format!("{:?}", self.state),
                },
            );
        };

        let num_frames = session.settings.num_frames;
        let step = 360.0 / f64::from(num_frames);
        let scan_dir = session
            .settings
            .output_dir
            .join(format!("scan_{}", Utc::now().format("%Y%m%d_%H%M%S_%6f")));

        if let Err(e) = tokio::fs::create_dir_all(&scan_dir).await {
            return ScanOutcome::failure(0, scan_dir, ScanError::Io(e));
        }

        info!(
            frames = num_frames,
            degrees_per_frame = step,
            path = %scan_dir.display(),
            "starting scan"
        );
        let _ = self
            .events
            .send(ScanEvent::Status(format!("starting scan: {num_frames} frames")));

        // Home first so frame 0 is captured at 0 degrees.
        let mut position = match turntable.home().await {
            Ok(position) => position,
            Err(e) => return ScanOutcome::failure(0, scan_dir, e),
        };

        let mut captured: Vec<FrameRecord> = Vec::with_capacity(num_frames as usize);
        for frame_number in 0..num_frames {
            let target = f64::from(frame_number) * step;
            let delta = target - position;
            if delta.abs() > POSITION_TOLERANCE {
                position = match turntable.rotate(delta).await {
                    Ok(position) => position,
                    Err(e) => {
                        return_home_best_effort(turntable).await;
                        return ScanOutcome::failure(frame_number, scan_dir, e);
                    }
                };
            }

            if !self.settle.is_zero() {
                tokio::time::sleep(self.settle).await;
            }

            let frame = match camera.capture(None).await {
                Ok(frame) => frame,
                Err(e) => {
                    return_home_best_effort(turntable).await;
                    return ScanOutcome::failure(frame_number, scan_dir, e);
                }
            };

            let path = scan_dir.join(format!("frame_{frame_number:03}.png"));
            if let Err(e) = tokio::fs::write(&path, &frame.data).await {
                return_home_best_effort(turntable).await;
                return ScanOutcome::failure(frame_number, scan_dir, ScanError::Io(e));
            }

            captured.push(FrameRecord {
                frame_index: frame_number,
                angle_degrees: position,
                path: path.clone(),
            });
            let _ = self.events.send(ScanEvent::Progress(ScanProgress {
                frame_number,
                total_frames: num_frames,
                position,
            }));
            let _ = self.events.send(ScanEvent::Frame { frame_number, path });
        }

        if let Err(e) = turntable.home().await {
            return ScanOutcome::failure(num_frames, scan_dir, e);
        }

        // Persistence is all-or-nothing and only attempted when the session
        // carried full identifying metadata. The captured files are kept on
        // disk either way.
        let mut scan_id = None;
        if let Some(meta) = &session.record {
            let Some(store) = &self.store else {
                return ScanOutcome::failure(
                    num_frames,
                    scan_dir,
                    ScanError::Persistence("no scan store configured".into()),
                );
            };
            let record = ScanRecord {
                meta: meta.clone(),
                captured_at: Utc::now(),
                frame_count: num_frames,
                output_path: scan_dir.clone(),
            };
            match store.create_scan_with_images(&record, &captured).await {
                Ok(id) => scan_id = Some(id),
                Err(e) => return ScanOutcome::failure(num_frames, scan_dir, e),
            }
        }

        ScanOutcome {
            success: true,
            frames_captured: num_frames,
            output_path: scan_dir,
            scan_id,
            error: None,
        }
    }

    /// Release both adapters and return to `Uninitialized`.
    ///
    /// Idempotent: calling on an uninitialized scanner succeeds without
    /// touching the worker.
    pub async fn cleanup(&mut self) -> AppResult<CleanupOutcome> {
        match self.state {
            ScannerState::Uninitialized => {
                return Ok(CleanupOutcome {
                    success: true,
                    initialized: false,
                })
            }
            ScannerState::Ready => {}
            state => {
                return Err(ScanError::InvalidState {
                    operation: "cleanup",
                    state: format!("{state:?}"),
                })
            }
        }

        self.state = ScannerState::Cleaning;
        if let Some(camera) = self.camera.take() {
            if let Err(e) = camera.disconnect().await {
                warn!("camera release failed: {e}");
            }
        }
        if let Some(turntable) = self.turntable.take() {
            if let Err(e) = turntable.cleanup().await {
                warn!("turntable release failed: {e}");
            }
        }
        self.session = None;
        self.state = ScannerState::Uninitialized;
        let _ = self.events.send(ScanEvent::Status("scanner cleaned up".into()));
        Ok(CleanupOutcome {
            success: true,
            initialized: false,
        })
    }

    /// Cleanup (if initialized) and stop the worker process.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        if self.state == ScannerState::Ready {
            let _ = self.cleanup().await;
        }
        self.supervisor.stop().await
    }

    /// Report controller status; safe from any state.
    pub async fn status(&self) -> ScannerStatus {
        let camera = match &self.camera {
            Some(camera) => camera.status().await.ok(),
            None => None,
        };
        let turntable = match &self.turntable {
            Some(turntable) => turntable.status().await.ok(),
            None => None,
        };
        ScannerStatus {
            state: self.state,
            initialized: matches!(self.state, ScannerState::Ready | ScannerState::Scanning),
            position: turntable.map(|t| t.position).unwrap_or(0.0),
            camera,
            turntable,
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.session
            .as_ref()
            .map(|s| s.settings.output_dir.clone())
            .unwrap_or_default()
    }
}

async fn return_home_best_effort(turntable: &TurntableController) {
    if let Err(e) = turntable.home().await {
        warn!("best-effort return to home failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::hardware::types::{CameraSettings, TurntableSettings};

    fn scanner() -> Scanner {
        Scanner::new(WorkerSupervisor::new(WorkerConfig {
            executable: "/nonexistent/worker".into(),
            ..WorkerConfig::default()
        }))
    }

    fn session(num_frames: u32) -> ScanSession {
        ScanSession::new(ScanSettings {
            camera: CameraSettings::default(),
            turntable: TurntableSettings::default(),
            num_frames,
            output_dir: "./scans".into(),
        })
    }

    #[tokio::test]
    async fn test_scan_requires_ready_state() {
        let mut scanner = scanner();
        let outcome = scanner.scan().await;
        assert!(!outcome.success);
        assert_eq!(outcome.frames_captured, 0);
        assert!(matches!(
            outcome.error,
            Some(ScanError::InvalidState { operation: "scan", .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent_when_uninitialized() {
        let mut scanner = scanner();
        let outcome = scanner.cleanup().await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.initialized);
        assert_eq!(scanner.state(), ScannerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_settings_before_spawning() {
        let mut scanner = scanner();
        let err = scanner.initialize(session(0)).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidSettings(_)));
        assert_eq!(scanner.state(), ScannerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_failure_reverts_state() {
        let mut scanner = scanner();
        // The worker executable does not exist; spawn fails.
        let err = scanner.initialize(session(12)).await.unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
        assert_eq!(scanner.state(), ScannerState::Uninitialized);
        // And cleanup afterwards is still the idempotent no-op.
        assert!(scanner.cleanup().await.unwrap().success);
    }

    #[tokio::test]
    async fn test_status_safe_from_any_state() {
        let scanner = scanner();
        let status = scanner.status().await;
        assert_eq!(status.state, ScannerState::Uninitialized);
        assert!(!status.initialized);
        assert_eq!(status.position, 0.0);
        assert!(status.camera.is_none());
        assert!(status.turntable.is_none());
    }
}
