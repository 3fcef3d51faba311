//! Capture session controller
//!
//! A single actor task owns the session, the discovered cameras, the flash
//! mode and the orientation tracker. The [`CaptureSessionController`] handle
//! sends it commands and awaits one-shot replies, so input switches, flash
//! changes and captures are applied strictly one at a time. A camera switch
//! requested while a capture is in flight waits for that capture to finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orientation::{OrientationReader, OrientationTracker, SpatialOrientation};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::device::{
    tune_all, CameraDevice, CameraPosition, DeviceDiscovery, DiscoveredCameras, MediaKind,
    TuningOutcome,
};
use crate::photo::{
    decode_photo, resolve_orientation, FlashMode, PhotoCaptureOutput, PhotoCodec, PhotoSettings,
    TaggedImage,
};
use crate::session::{
    AuthorizationStatus, CaptureSession, PermissionAuthority, SessionPreset, SessionState,
};
use crate::{CaptureError, SessionError};

/// Commands buffered ahead of the actor
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Hardware capabilities the controller drives
#[derive(Clone)]
pub struct CaptureHardware {
    pub permissions: Arc<dyn PermissionAuthority>,
    pub discovery: Arc<dyn DeviceDiscovery>,
    pub session: Arc<dyn CaptureSession>,
    pub photo_output: Arc<dyn PhotoCaptureOutput>,
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session quality preset
    pub preset: SessionPreset,
    /// Encoding requested from the photo output
    pub codec: PhotoCodec,
    /// Give up on a capture after this long (milliseconds)
    pub capture_timeout_ms: u64,
    /// Events buffered per subscriber before the oldest are dropped
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preset: SessionPreset::Photo,
            codec: PhotoCodec::Jpeg,
            capture_timeout_ms: 10_000,
            event_capacity: 16,
        }
    }
}

impl SessionConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

/// Which camera feeds the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraSelection {
    #[default]
    None,
    Rear,
    Front,
}

impl From<CameraPosition> for CameraSelection {
    fn from(position: CameraPosition) -> Self {
        match position {
            CameraPosition::Rear => CameraSelection::Rear,
            CameraPosition::Front => CameraSelection::Front,
            CameraPosition::Unspecified => CameraSelection::None,
        }
    }
}

/// Snapshot of the controller's externally visible state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub selection: CameraSelection,
    pub flash_mode: FlashMode,
}

/// Result of a camera switch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched(CameraPosition),
    /// No alternate camera could be attached; the session is untouched
    Unchanged,
}

/// Notifications for the surrounding application
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PermissionDenied,
    /// The session is running and captures may be triggered
    Ready { tuning: Vec<TuningOutcome> },
    ConfigurationFailed(SessionError),
    CameraSwitched(CameraPosition),
    FlashChanged(FlashMode),
    ImageCaptured(Arc<TaggedImage>),
    CaptureFailed(CaptureError),
    Stopped,
}

enum Command {
    RequestAccess(oneshot::Sender<Result<(), SessionError>>),
    Configured(Result<PreparedSession, SessionError>),
    SwitchCamera(oneshot::Sender<Result<SwitchOutcome, SessionError>>),
    ToggleFlash(oneshot::Sender<FlashMode>),
    Capture(oneshot::Sender<Result<Arc<TaggedImage>, CaptureError>>),
    Stop(oneshot::Sender<()>),
}

struct PreparedSession {
    cameras: DiscoveredCameras,
    selection: CameraSelection,
    tuning: Vec<TuningOutcome>,
}

/// Handle to the capture session actor
#[derive(Clone)]
pub struct CaptureSessionController {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    orientation: OrientationReader,
}

impl CaptureSessionController {
    /// Spawn the session actor. Must be called within a tokio runtime.
    pub fn new(
        hardware: CaptureHardware,
        tracker: OrientationTracker,
        config: SessionConfig,
    ) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (status_tx, status) = watch::channel(SessionStatus::default());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let orientation = tracker.reader();

        let actor = SessionActor {
            hardware,
            config,
            tracker,
            cameras: DiscoveredCameras::default(),
            status: status_tx,
            events: events.clone(),
            commands: commands.downgrade(),
        };
        tokio::spawn(actor.run(receiver));
        info!("Capture session controller created");

        Self {
            commands,
            status,
            events,
            orientation,
        }
    }

    /// Check camera permission, prompting if undecided. On success the
    /// session starts configuring in the background and
    /// [`SessionEvent::Ready`] follows once it runs.
    pub async fn request_camera_access(&self) -> Result<(), SessionError> {
        self.request(Command::RequestAccess)
            .await
            .ok_or(SessionError::ControllerClosed)?
    }

    /// Swap between the rear and front camera
    pub async fn switch_camera(&self) -> Result<SwitchOutcome, SessionError> {
        self.request(Command::SwitchCamera)
            .await
            .ok_or(SessionError::ControllerClosed)?
    }

    /// Flip the flash mode used by the next capture; returns the new mode
    pub async fn toggle_flash(&self) -> Result<FlashMode, SessionError> {
        self.request(Command::ToggleFlash)
            .await
            .ok_or(SessionError::ControllerClosed)
    }

    /// Capture a still photo tagged with the device orientation
    pub async fn capture_photo(&self) -> Result<Arc<TaggedImage>, CaptureError> {
        self.request(Command::Capture)
            .await
            .ok_or(CaptureError::ControllerClosed)?
    }

    /// Stop the session and the orientation tracker. Idempotent.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(Command::Stop)
            .await
            .ok_or(SessionError::ControllerClosed)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn selection(&self) -> CameraSelection {
        self.status.borrow().selection
    }

    pub fn flash_mode(&self) -> FlashMode {
        self.status.borrow().flash_mode
    }

    /// Latest device orientation
    pub fn current_orientation(&self) -> SpatialOrientation {
        self.orientation.current()
    }

    pub fn orientation(&self) -> &OrientationReader {
        &self.orientation
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.ok()?;
        response.await.ok()
    }
}

struct SessionActor {
    hardware: CaptureHardware,
    config: SessionConfig,
    tracker: OrientationTracker,
    cameras: DiscoveredCameras,
    status: watch::Sender<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    commands: mpsc::WeakSender<Command>,
}

impl SessionActor {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::RequestAccess(reply) => {
                    let result = self.request_access().await;
                    let _ = reply.send(result);
                }
                Command::Configured(result) => self.finish_configuration(result),
                Command::SwitchCamera(reply) => {
                    let _ = reply.send(self.switch_camera());
                }
                Command::ToggleFlash(reply) => {
                    let _ = reply.send(self.toggle_flash());
                }
                Command::Capture(reply) => {
                    let result = self.capture().await;
                    let _ = reply.send(result);
                }
                Command::Stop(reply) => {
                    self.shutdown();
                    let _ = reply.send(());
                }
            }
        }

        debug!("All controller handles dropped");
        self.shutdown();
    }

    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    fn set_state(&self, state: SessionState) {
        self.status.send_modify(|status| status.state = state);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn request_access(&mut self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Uninitialized => {}
            SessionState::Configuring | SessionState::Running => return Ok(()),
            SessionState::Stopped => return Err(SessionError::Stopped),
        }

        let permissions = self.hardware.permissions.clone();
        let granted = match permissions.status() {
            AuthorizationStatus::Authorized => true,
            AuthorizationStatus::Denied => false,
            AuthorizationStatus::NotDetermined => {
                info!("Requesting camera access");
                permissions.request_access().await
            }
        };

        if !granted {
            warn!("Camera access denied");
            self.emit(SessionEvent::PermissionDenied);
            return Err(SessionError::PermissionDenied);
        }

        info!("Camera access granted, configuring session");
        self.set_state(SessionState::Configuring);
        if let Err(e) = self.tracker.start() {
            warn!("Orientation tracking unavailable: {}", e);
        }
        self.spawn_configuration();
        Ok(())
    }

    fn spawn_configuration(&self) {
        let Some(commands) = self.commands.upgrade() else {
            debug!("Controller gone, skipping configuration");
            return;
        };
        let hardware = self.hardware.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let result = configure(hardware, config).await;
            let _ = commands.send(Command::Configured(result)).await;
        });
    }

    fn finish_configuration(&mut self, result: Result<PreparedSession, SessionError>) {
        match result {
            Ok(prepared) => {
                if self.state() != SessionState::Configuring {
                    debug!("Session configured after stop, releasing it");
                    self.release_session();
                    return;
                }

                self.cameras = prepared.cameras;
                self.status.send_modify(|status| {
                    status.state = SessionState::Running;
                    status.selection = prepared.selection;
                });
                info!("Capture session running ({:?} camera)", prepared.selection);
                self.emit(SessionEvent::Ready {
                    tuning: prepared.tuning,
                });
            }
            Err(e) => {
                if self.state() != SessionState::Configuring {
                    debug!("Session configuration failed after stop: {}", e);
                    self.release_session();
                    return;
                }

                error!("Capture session configuration failed: {}", e);
                self.tracker.stop();
                self.release_session();
                self.set_state(SessionState::Uninitialized);
                self.emit(SessionEvent::ConfigurationFailed(e));
            }
        }
    }

    fn ensure_running(&self) -> Result<(), SessionState> {
        match self.state() {
            SessionState::Running => Ok(()),
            other => Err(other),
        }
    }

    fn switch_camera(&mut self) -> Result<SwitchOutcome, SessionError> {
        self.ensure_running().map_err(SessionError::NotRunning)?;

        let target = match self.status.borrow().selection {
            CameraSelection::Rear => self.cameras.front.clone(),
            CameraSelection::Front => self.cameras.rear.clone(),
            CameraSelection::None => None,
        };
        let Some(target) = target else {
            debug!("No alternate camera to switch to");
            return Ok(SwitchOutcome::Unchanged);
        };

        let session = &self.hardware.session;
        session.begin_configuration();

        let previous = session.inputs();
        for input in &previous {
            session.remove_input(input.id());
        }

        let switched = session.can_add_input(target.as_ref())
            && match session.add_input(target.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to attach camera {}: {}", target.id(), e);
                    false
                }
            };

        if !switched {
            for input in previous {
                let id = input.id().to_string();
                if let Err(e) = session.add_input(input) {
                    error!("Failed to restore camera {}: {}", id, e);
                }
            }
        }
        session.commit_configuration();

        if !switched {
            warn!("Camera switch to {} unavailable", target.id());
            return Ok(SwitchOutcome::Unchanged);
        }

        let position = target.position();
        self.status
            .send_modify(|status| status.selection = CameraSelection::from(position));
        info!("Switched to {:?} camera {}", position, target.id());
        self.emit(SessionEvent::CameraSwitched(position));
        Ok(SwitchOutcome::Switched(position))
    }

    fn toggle_flash(&mut self) -> FlashMode {
        let mut flash_mode = FlashMode::Off;
        self.status.send_modify(|status| {
            status.flash_mode = status.flash_mode.toggled();
            flash_mode = status.flash_mode;
        });
        debug!("Flash mode now {:?}", flash_mode);
        self.emit(SessionEvent::FlashChanged(flash_mode));
        flash_mode
    }

    async fn capture(&mut self) -> Result<Arc<TaggedImage>, CaptureError> {
        self.ensure_running().map_err(CaptureError::NotRunning)?;

        let id = Uuid::new_v4();
        let settings = PhotoSettings {
            flash_mode: self.status.borrow().flash_mode,
            codec: self.config.codec,
        };
        debug!("Capture {} requested: {:?}", id, settings);

        let result = self.complete_capture(id, settings).await;
        match &result {
            Ok(image) => {
                info!(
                    "Capture {} tagged {:?} ({:?} camera, {:?})",
                    id, image.orientation, image.position, image.spatial_orientation
                );
                self.emit(SessionEvent::ImageCaptured(image.clone()));
            }
            Err(e) => {
                warn!("Capture {} failed: {}", id, e);
                self.emit(SessionEvent::CaptureFailed(e.clone()));
            }
        }
        result
    }

    async fn complete_capture(
        &mut self,
        id: Uuid,
        settings: PhotoSettings,
    ) -> Result<Arc<TaggedImage>, CaptureError> {
        let output = self.hardware.photo_output.clone();
        let timeout = self.config.capture_timeout();

        let bytes = tokio::time::timeout(timeout, output.capture(settings))
            .await
            .map_err(|_| CaptureError::Timeout(timeout))??;

        let codec = settings.codec;
        let image = tokio::task::spawn_blocking(move || decode_photo(&bytes, codec))
            .await
            .map_err(|e| CaptureError::Interrupted(e.to_string()))??;

        // Read after decode: the freshest orientation and the input attached now
        let position = self.active_position();
        let spatial_orientation = self.tracker.current();
        let orientation =
            position.and_then(|position| resolve_orientation(position, spatial_orientation));

        Ok(Arc::new(TaggedImage {
            id,
            captured_at: Utc::now(),
            image,
            orientation,
            position: position.unwrap_or(CameraPosition::Unspecified),
            spatial_orientation,
            flash_mode: settings.flash_mode,
        }))
    }

    fn active_position(&self) -> Option<CameraPosition> {
        self.hardware
            .session
            .inputs()
            .first()
            .map(|input| input.position())
    }

    fn release_session(&self) {
        let session = &self.hardware.session;
        if session.is_running() {
            session.stop_running();
        }
        session.begin_configuration();
        for input in session.inputs() {
            session.remove_input(input.id());
        }
        session.remove_output(self.hardware.photo_output.as_ref());
        session.commit_configuration();
    }

    fn shutdown(&mut self) {
        if self.state() == SessionState::Stopped {
            return;
        }

        self.tracker.stop();
        self.release_session();
        self.status.send_modify(|status| {
            status.state = SessionState::Stopped;
            status.selection = CameraSelection::None;
        });
        info!("Capture session stopped");
        self.emit(SessionEvent::Stopped);
    }
}

/// Discover, tune and attach devices off the async workers, then start the
/// session
async fn configure(
    hardware: CaptureHardware,
    config: SessionConfig,
) -> Result<PreparedSession, SessionError> {
    let session = hardware.session.clone();

    let prepared = tokio::task::spawn_blocking(move || prepare_session(&hardware, &config))
        .await
        .map_err(|e| SessionError::Session(format!("configuration task failed: {}", e)))??;

    session.start_running().await?;
    Ok(prepared)
}

fn prepare_session(
    hardware: &CaptureHardware,
    config: &SessionConfig,
) -> Result<PreparedSession, SessionError> {
    let devices = hardware.discovery.discover(MediaKind::Video);
    info!("Discovered {} camera(s)", devices.len());

    let cameras = DiscoveredCameras::partition(devices);
    if cameras.is_empty() {
        return Err(SessionError::DeviceDiscovery(
            "no rear or front camera found".to_string(),
        ));
    }
    let tuning = tune_all(&cameras);

    let session = &hardware.session;
    session.begin_configuration();
    let attached = attach_endpoints(hardware, config, &cameras);
    session.commit_configuration();

    Ok(PreparedSession {
        selection: attached?,
        cameras,
        tuning,
    })
}

fn attach_endpoints(
    hardware: &CaptureHardware,
    config: &SessionConfig,
    cameras: &DiscoveredCameras,
) -> Result<CameraSelection, SessionError> {
    let session = &hardware.session;
    session.set_preset(config.preset);

    let input: Arc<dyn CameraDevice> = hardware
        .discovery
        .default_device(MediaKind::Video)
        .or_else(|| cameras.rear.clone())
        .or_else(|| cameras.front.clone())
        .ok_or_else(|| SessionError::DeviceDiscovery("no default camera".to_string()))?;

    if !session.can_add_input(input.as_ref()) {
        return Err(SessionError::Session(format!(
            "cannot attach camera {}",
            input.id()
        )));
    }
    let selection = CameraSelection::from(input.position());
    info!("Attaching {:?} camera {}", input.position(), input.id());
    session.add_input(input)?;

    let output = hardware.photo_output.clone();
    output.set_prepared_settings(&[PhotoSettings {
        flash_mode: FlashMode::Off,
        codec: config.codec,
    }]);
    if !session.can_add_output(output.as_ref()) {
        return Err(SessionError::Session(
            "cannot attach photo output".to_string(),
        ));
    }
    session.add_output(output)?;

    Ok(selection)
}
