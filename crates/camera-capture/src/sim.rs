//! Simulated camera hardware
//!
//! Stand-ins for the device, session, photo output and permission
//! capabilities. Used by the test suites and by hosts without cameras.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use tokio::sync::oneshot;
use tracing::debug;

use crate::controller::CaptureHardware;
use crate::device::{
    CameraDevice, CameraPosition, DeviceDiscovery, DeviceError, DeviceFormat, FocusMode,
    FrameRateRange, MediaKind,
};
use crate::photo::{encode_photo, PhotoCaptureOutput, PhotoSettings};
use crate::session::{AuthorizationStatus, CaptureSession, PermissionAuthority, SessionPreset};
use crate::{CaptureError, SessionError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Formats offered by simulated cameras unless overridden
pub fn default_formats() -> Vec<DeviceFormat> {
    vec![
        DeviceFormat {
            id: "4032x3024".to_string(),
            width: 4032,
            height: 3024,
            frame_rate_ranges: vec![FrameRateRange::new(1.0, 30.0)],
        },
        DeviceFormat {
            id: "1920x1080".to_string(),
            width: 1920,
            height: 1080,
            frame_rate_ranges: vec![FrameRateRange::new(1.0, 30.0), FrameRateRange::new(1.0, 60.0)],
        },
        DeviceFormat {
            id: "1280x720".to_string(),
            width: 1280,
            height: 720,
            frame_rate_ranges: vec![FrameRateRange::new(1.0, 60.0)],
        },
    ]
}

#[derive(Debug, Default)]
struct CameraState {
    locked: bool,
    active_format: Option<String>,
    frame_duration: Option<(Duration, Duration)>,
    focus_mode: Option<FocusMode>,
}

/// Scriptable camera device
#[derive(Debug)]
pub struct SimulatedCamera {
    id: String,
    position: CameraPosition,
    formats: Vec<DeviceFormat>,
    autofocus: bool,
    fail_lock: bool,
    fail_format: bool,
    state: Mutex<CameraState>,
}

impl SimulatedCamera {
    pub fn new(id: &str, position: CameraPosition) -> Self {
        Self {
            id: id.to_string(),
            position,
            formats: default_formats(),
            autofocus: true,
            fail_lock: false,
            fail_format: false,
            state: Mutex::new(CameraState::default()),
        }
    }

    pub fn rear(id: &str) -> Self {
        Self::new(id, CameraPosition::Rear)
    }

    pub fn front(id: &str) -> Self {
        Self::new(id, CameraPosition::Front)
    }

    /// Camera with no known mount position (e.g. a USB webcam)
    pub fn external(id: &str) -> Self {
        Self::new(id, CameraPosition::Unspecified)
    }

    pub fn with_formats(mut self, formats: Vec<DeviceFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn without_autofocus(mut self) -> Self {
        self.autofocus = false;
        self
    }

    /// Refuse configuration locks
    pub fn failing_lock(mut self) -> Self {
        self.fail_lock = true;
        self
    }

    /// Reject every format change
    pub fn failing_format(mut self) -> Self {
        self.fail_format = true;
        self
    }

    pub fn active_format_id(&self) -> Option<String> {
        lock(&self.state).active_format.clone()
    }

    pub fn frame_duration(&self) -> Option<(Duration, Duration)> {
        lock(&self.state).frame_duration
    }

    pub fn focus_mode(&self) -> Option<FocusMode> {
        lock(&self.state).focus_mode
    }

    pub fn is_locked(&self) -> bool {
        lock(&self.state).locked
    }

    fn ensure_locked(&self, state: &CameraState) -> Result<(), DeviceError> {
        if state.locked {
            Ok(())
        } else {
            Err(DeviceError::Lock(format!("{} is not locked", self.id)))
        }
    }
}

impl CameraDevice for SimulatedCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn position(&self) -> CameraPosition {
        self.position
    }

    fn formats(&self) -> Vec<DeviceFormat> {
        self.formats.clone()
    }

    fn lock_for_configuration(&self) -> Result<(), DeviceError> {
        if self.fail_lock {
            return Err(DeviceError::Lock(format!("{} is in use", self.id)));
        }
        let mut state = lock(&self.state);
        if state.locked {
            return Err(DeviceError::Lock(format!("{} already locked", self.id)));
        }
        state.locked = true;
        Ok(())
    }

    fn unlock_for_configuration(&self) {
        lock(&self.state).locked = false;
    }

    fn set_active_format(&self, format: &DeviceFormat) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        self.ensure_locked(&state)?;
        if self.fail_format {
            return Err(DeviceError::Format(format!("{} rejected {}", self.id, format.id)));
        }
        state.active_format = Some(format.id.clone());
        Ok(())
    }

    fn set_frame_duration(&self, min: Duration, max: Duration) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        self.ensure_locked(&state)?;
        state.frame_duration = Some((min, max));
        Ok(())
    }

    fn is_focus_mode_supported(&self, mode: FocusMode) -> bool {
        match mode {
            FocusMode::Locked => true,
            FocusMode::AutoFocus | FocusMode::ContinuousAutoFocus => self.autofocus,
        }
    }

    fn set_focus_mode(&self, mode: FocusMode) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        self.ensure_locked(&state)?;
        if !self.is_focus_mode_supported(mode) {
            return Err(DeviceError::Focus(format!("{:?} unsupported", mode)));
        }
        state.focus_mode = Some(mode);
        Ok(())
    }
}

/// Discovery over a fixed camera list
pub struct SimulatedDiscovery {
    cameras: Vec<Arc<SimulatedCamera>>,
}

impl SimulatedDiscovery {
    pub fn new(cameras: Vec<Arc<SimulatedCamera>>) -> Self {
        Self { cameras }
    }
}

impl DeviceDiscovery for SimulatedDiscovery {
    fn discover(&self, _media: MediaKind) -> Vec<Arc<dyn CameraDevice>> {
        self.cameras
            .iter()
            .map(|camera| camera.clone() as Arc<dyn CameraDevice>)
            .collect()
    }

    /// First rear camera, else the first camera listed
    fn default_device(&self, _media: MediaKind) -> Option<Arc<dyn CameraDevice>> {
        self.cameras
            .iter()
            .find(|camera| camera.position() == CameraPosition::Rear)
            .or_else(|| self.cameras.first())
            .map(|camera| camera.clone() as Arc<dyn CameraDevice>)
    }
}

#[derive(Default)]
struct SessionInner {
    inputs: Vec<Arc<dyn CameraDevice>>,
    outputs: Vec<Arc<dyn PhotoCaptureOutput>>,
    preset: Option<SessionPreset>,
    running: bool,
    transaction_depth: usize,
    max_inputs_seen: usize,
    rejected: HashSet<String>,
    fail_start: bool,
    start_delay: Duration,
    start_attempts: usize,
}

/// Same output object, compared by address only
fn same_output(a: &dyn PhotoCaptureOutput, b: &dyn PhotoCaptureOutput) -> bool {
    std::ptr::eq(a as *const _ as *const (), b as *const _ as *const ())
}

/// In-memory capture session holding at most one input
#[derive(Default)]
pub struct SimulatedSession {
    inner: Mutex<SessionInner>,
}

impl SimulatedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `can_add_input` refuse the device with this id
    pub fn reject_input(&self, device_id: &str) {
        lock(&self.inner).rejected.insert(device_id.to_string());
    }

    /// Make `start_running` fail
    pub fn fail_start(&self, fail: bool) {
        lock(&self.inner).fail_start = fail;
    }

    /// Simulated time for the session to come up
    pub fn set_start_delay(&self, delay: Duration) {
        lock(&self.inner).start_delay = delay;
    }

    /// Number of `start_running` calls that have resolved
    pub fn start_attempts(&self) -> usize {
        lock(&self.inner).start_attempts
    }

    pub fn input_ids(&self) -> Vec<String> {
        lock(&self.inner)
            .inputs
            .iter()
            .map(|input| input.id().to_string())
            .collect()
    }

    pub fn output_count(&self) -> usize {
        lock(&self.inner).outputs.len()
    }

    pub fn preset(&self) -> Option<SessionPreset> {
        lock(&self.inner).preset
    }

    /// Whether a configuration transaction is open
    pub fn in_transaction(&self) -> bool {
        lock(&self.inner).transaction_depth > 0
    }

    /// Highest number of inputs attached at once
    pub fn max_inputs_seen(&self) -> usize {
        lock(&self.inner).max_inputs_seen
    }
}

#[async_trait]
impl CaptureSession for SimulatedSession {
    fn begin_configuration(&self) {
        lock(&self.inner).transaction_depth += 1;
    }

    fn commit_configuration(&self) {
        let mut inner = lock(&self.inner);
        inner.transaction_depth = inner.transaction_depth.saturating_sub(1);
    }

    fn set_preset(&self, preset: SessionPreset) {
        lock(&self.inner).preset = Some(preset);
    }

    fn can_add_input(&self, device: &dyn CameraDevice) -> bool {
        let inner = lock(&self.inner);
        inner.inputs.is_empty() && !inner.rejected.contains(device.id())
    }

    fn add_input(&self, device: Arc<dyn CameraDevice>) -> Result<(), SessionError> {
        let mut inner = lock(&self.inner);
        if !inner.inputs.is_empty() {
            return Err(SessionError::Session(format!(
                "cannot add {}: an input is already attached",
                device.id()
            )));
        }
        if inner.rejected.contains(device.id()) {
            return Err(SessionError::Session(format!("input {} rejected", device.id())));
        }
        inner.inputs.push(device);
        inner.max_inputs_seen = inner.max_inputs_seen.max(inner.inputs.len());
        Ok(())
    }

    fn remove_input(&self, device_id: &str) {
        lock(&self.inner).inputs.retain(|input| input.id() != device_id);
    }

    fn inputs(&self) -> Vec<Arc<dyn CameraDevice>> {
        lock(&self.inner).inputs.clone()
    }

    fn can_add_output(&self, _output: &dyn PhotoCaptureOutput) -> bool {
        lock(&self.inner).outputs.is_empty()
    }

    fn add_output(&self, output: Arc<dyn PhotoCaptureOutput>) -> Result<(), SessionError> {
        let mut inner = lock(&self.inner);
        if !inner.outputs.is_empty() {
            return Err(SessionError::Session("photo output already attached".to_string()));
        }
        inner.outputs.push(output);
        Ok(())
    }

    fn remove_output(&self, output: &dyn PhotoCaptureOutput) {
        lock(&self.inner)
            .outputs
            .retain(|attached| !same_output(attached.as_ref(), output));
    }

    async fn start_running(&self) -> Result<(), SessionError> {
        let delay = lock(&self.inner).start_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = lock(&self.inner);
        inner.start_attempts += 1;
        if inner.fail_start {
            return Err(SessionError::Session("session failed to start".to_string()));
        }
        inner.running = true;
        Ok(())
    }

    fn stop_running(&self) {
        lock(&self.inner).running = false;
    }

    fn is_running(&self) -> bool {
        lock(&self.inner).running
    }
}

#[derive(Debug)]
struct OutputInner {
    latency: Duration,
    failures: VecDeque<String>,
    prepared: Vec<PhotoSettings>,
    requests: Vec<PhotoSettings>,
}

/// Photo output that encodes a synthetic test card
#[derive(Debug)]
pub struct SimulatedPhotoOutput {
    width: u32,
    height: u32,
    inner: Mutex<OutputInner>,
}

impl SimulatedPhotoOutput {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            inner: Mutex::new(OutputInner {
                latency: Duration::ZERO,
                failures: VecDeque::new(),
                prepared: Vec::new(),
                requests: Vec::new(),
            }),
        }
    }

    /// Dimensions of every encoded photo
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Simulated encode time
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.inner).latency = latency;
    }

    /// Fail the next capture with `reason`
    pub fn fail_next_capture(&self, reason: &str) {
        lock(&self.inner).failures.push_back(reason.to_string());
    }

    pub fn prepared_settings(&self) -> Vec<PhotoSettings> {
        lock(&self.inner).prepared.clone()
    }

    /// Settings of every capture request received
    pub fn requests(&self) -> Vec<PhotoSettings> {
        lock(&self.inner).requests.clone()
    }

    /// Test card: a horizontal gradient with a marker in the top-left corner
    fn render(&self, settings: &PhotoSettings) -> DynamicImage {
        let boost = match settings.flash_mode {
            crate::photo::FlashMode::On => 60,
            crate::photo::FlashMode::Off => 0,
        };
        let width = self.width.max(1);
        let image = RgbImage::from_fn(width, self.height.max(1), |x, y| {
            if x < width / 4 && y < self.height / 4 {
                Rgb([255, 0, 0])
            } else {
                let level = (x * 195 / width) as u8;
                Rgb([level + boost, level + boost, level + boost])
            }
        });
        DynamicImage::ImageRgb8(image)
    }
}

#[async_trait]
impl PhotoCaptureOutput for SimulatedPhotoOutput {
    fn set_prepared_settings(&self, settings: &[PhotoSettings]) {
        lock(&self.inner).prepared = settings.to_vec();
    }

    async fn capture(&self, settings: PhotoSettings) -> Result<Vec<u8>, CaptureError> {
        let (latency, failure) = {
            let mut inner = lock(&self.inner);
            inner.requests.push(settings);
            (inner.latency, inner.failures.pop_front())
        };

        if let Some(reason) = failure {
            return Err(CaptureError::Output(reason));
        }

        let image = self.render(&settings);
        let (done, result) = oneshot::channel();

        // Hardware completion arrives on another task
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let encoded = encode_photo(&image, settings.codec)
                .map_err(|e| CaptureError::Output(e.to_string()));
            if done.send(encoded).is_err() {
                debug!("Capture abandoned before encode finished");
            }
        });

        result
            .await
            .map_err(|_| CaptureError::Interrupted("encoder dropped".to_string()))?
    }
}

/// Permission authority with a fixed answer
#[derive(Debug)]
pub struct StaticPermissions {
    status: Mutex<AuthorizationStatus>,
    grant: bool,
    requests: AtomicUsize,
}

impl StaticPermissions {
    pub fn new(status: AuthorizationStatus, grant: bool) -> Self {
        Self {
            status: Mutex::new(status),
            grant,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn authorized() -> Self {
        Self::new(AuthorizationStatus::Authorized, true)
    }

    /// Number of prompts shown
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionAuthority for StaticPermissions {
    fn status(&self) -> AuthorizationStatus {
        *lock(&self.status)
    }

    async fn request_access(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *lock(&self.status) = if self.grant {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        };
        self.grant
    }
}

/// A full set of simulated capture hardware
pub struct SimulatedHardware {
    pub cameras: Vec<Arc<SimulatedCamera>>,
    pub permissions: Arc<StaticPermissions>,
    pub discovery: Arc<SimulatedDiscovery>,
    pub session: Arc<SimulatedSession>,
    pub photo_output: Arc<SimulatedPhotoOutput>,
}

impl SimulatedHardware {
    pub fn with_cameras(cameras: Vec<SimulatedCamera>) -> Self {
        let cameras: Vec<Arc<SimulatedCamera>> = cameras.into_iter().map(Arc::new).collect();
        Self {
            discovery: Arc::new(SimulatedDiscovery::new(cameras.clone())),
            cameras,
            permissions: Arc::new(StaticPermissions::authorized()),
            session: Arc::new(SimulatedSession::new()),
            photo_output: Arc::new(SimulatedPhotoOutput::new(64, 48)),
        }
    }

    /// Phone-like hardware: one rear and one front camera
    pub fn dual_camera() -> Self {
        Self::with_cameras(vec![
            SimulatedCamera::rear("rear-wide"),
            SimulatedCamera::front("front-true-depth"),
        ])
    }

    pub fn rear_only() -> Self {
        Self::with_cameras(vec![SimulatedCamera::rear("rear-wide")])
    }

    pub fn with_permission(mut self, status: AuthorizationStatus, grant: bool) -> Self {
        self.permissions = Arc::new(StaticPermissions::new(status, grant));
        self
    }

    pub fn with_photo_size(mut self, width: u32, height: u32) -> Self {
        self.photo_output = Arc::new(SimulatedPhotoOutput::new(width, height));
        self
    }

    /// First rear camera
    pub fn rear(&self) -> Option<Arc<SimulatedCamera>> {
        self.camera_at(CameraPosition::Rear)
    }

    /// First front camera
    pub fn front(&self) -> Option<Arc<SimulatedCamera>> {
        self.camera_at(CameraPosition::Front)
    }

    fn camera_at(&self, position: CameraPosition) -> Option<Arc<SimulatedCamera>> {
        self.cameras
            .iter()
            .find(|camera| camera.position() == position)
            .cloned()
    }

    /// Capability handles for a controller
    pub fn hardware(&self) -> CaptureHardware {
        CaptureHardware {
            permissions: self.permissions.clone(),
            discovery: self.discovery.clone(),
            session: self.session.clone(),
            photo_output: self.photo_output.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photo::{decode_photo, FlashMode, PhotoCodec};
    use image::GenericImageView;

    #[test]
    fn test_session_allows_single_input() {
        let session = SimulatedSession::new();
        let rear: Arc<dyn CameraDevice> = Arc::new(SimulatedCamera::rear("rear"));
        let front: Arc<dyn CameraDevice> = Arc::new(SimulatedCamera::front("front"));

        session.add_input(rear.clone()).unwrap();
        assert!(!session.can_add_input(front.as_ref()));
        assert!(session.add_input(front.clone()).is_err());

        session.remove_input("rear");
        assert!(session.can_add_input(front.as_ref()));
    }

    #[test]
    fn test_session_detaches_only_matching_output() {
        let session = SimulatedSession::new();
        let attached: Arc<dyn PhotoCaptureOutput> = Arc::new(SimulatedPhotoOutput::new(8, 8));
        let stranger = SimulatedPhotoOutput::new(8, 8);

        session.add_output(attached.clone()).unwrap();
        session.remove_output(&stranger);
        assert_eq!(session.output_count(), 1);

        session.remove_output(attached.as_ref());
        assert_eq!(session.output_count(), 0);
        assert!(session.can_add_output(attached.as_ref()));
    }

    #[test]
    fn test_discovery_default_prefers_rear() {
        let hardware = SimulatedHardware::with_cameras(vec![
            SimulatedCamera::front("front"),
            SimulatedCamera::rear("rear"),
        ]);
        let default = hardware.discovery.default_device(MediaKind::Video).unwrap();
        assert_eq!(default.id(), "rear");
        assert_eq!(hardware.discovery.discover(MediaKind::Video).len(), 2);
    }

    #[test]
    fn test_camera_setters_require_lock() {
        let camera = SimulatedCamera::rear("rear");
        let format = default_formats().remove(0);
        assert!(matches!(camera.set_active_format(&format), Err(DeviceError::Lock(_))));
    }

    #[tokio::test]
    async fn test_photo_output_encodes_jpeg() {
        let output = SimulatedPhotoOutput::new(32, 24);
        let settings = PhotoSettings {
            flash_mode: FlashMode::Off,
            codec: PhotoCodec::Jpeg,
        };

        let bytes = output.capture(settings).await.unwrap();
        let image = decode_photo(&bytes, PhotoCodec::Jpeg).unwrap();
        assert_eq!(image.dimensions(), (32, 24));
        assert_eq!(output.requests(), vec![settings]);
    }

    #[tokio::test]
    async fn test_photo_output_scripted_failure() {
        let output = SimulatedPhotoOutput::new(8, 8);
        let settings = PhotoSettings {
            flash_mode: FlashMode::On,
            codec: PhotoCodec::Jpeg,
        };

        output.fail_next_capture("lens cap");
        assert_eq!(
            output.capture(settings).await,
            Err(CaptureError::Output("lens cap".to_string()))
        );
        assert!(output.capture(settings).await.is_ok());
    }

    #[tokio::test]
    async fn test_permission_prompt_records_answer() {
        let permissions = StaticPermissions::new(AuthorizationStatus::NotDetermined, false);
        assert!(!permissions.request_access().await);
        assert_eq!(permissions.status(), AuthorizationStatus::Denied);
        assert_eq!(permissions.request_count(), 1);
    }
}
