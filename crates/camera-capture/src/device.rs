//! Camera device capability, discovery and per-device tuning

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Device configuration errors (absorbed per device during tuning)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Failed to lock device for configuration: {0}")]
    Lock(String),

    #[error("Failed to apply format: {0}")]
    Format(String),

    #[error("Failed to apply frame duration: {0}")]
    FrameDuration(String),

    #[error("Failed to apply focus mode: {0}")]
    Focus(String),
}

/// Where a camera is mounted on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraPosition {
    /// Faces away from the user
    Rear,
    /// Faces the user
    Front,
    Unspecified,
}

/// Kind of media a device produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
}

/// Focus modes a device may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusMode {
    Locked,
    AutoFocus,
    ContinuousAutoFocus,
}

/// Frame rate range supported by a format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub min_frame_rate: f64,
    pub max_frame_rate: f64,
}

impl FrameRateRange {
    pub fn new(min_frame_rate: f64, max_frame_rate: f64) -> Self {
        Self {
            min_frame_rate,
            max_frame_rate,
        }
    }

    /// Shortest frame duration (at the maximum frame rate); zero when the
    /// rate is not positive
    pub fn min_frame_duration(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.max_frame_rate).unwrap_or(Duration::ZERO)
    }
}

/// A capture format offered by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFormat {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate_ranges: Vec<FrameRateRange>,
}

/// A physical camera.
///
/// Setters may only be called between `lock_for_configuration` and
/// `unlock_for_configuration`; use [`ConfigurationLock`] to scope them.
pub trait CameraDevice: Send + Sync {
    fn id(&self) -> &str;
    fn position(&self) -> CameraPosition;
    fn formats(&self) -> Vec<DeviceFormat>;

    fn lock_for_configuration(&self) -> Result<(), DeviceError>;
    fn unlock_for_configuration(&self);

    fn set_active_format(&self, format: &DeviceFormat) -> Result<(), DeviceError>;
    fn set_frame_duration(&self, min: Duration, max: Duration) -> Result<(), DeviceError>;
    fn is_focus_mode_supported(&self, mode: FocusMode) -> bool;
    fn set_focus_mode(&self, mode: FocusMode) -> Result<(), DeviceError>;
}

/// Enumerates the cameras attached to the device
pub trait DeviceDiscovery: Send + Sync {
    fn discover(&self, media: MediaKind) -> Vec<Arc<dyn CameraDevice>>;
    /// The system's preferred camera, if any
    fn default_device(&self, media: MediaKind) -> Option<Arc<dyn CameraDevice>>;
}

/// Configuration lock released on drop
pub struct ConfigurationLock<'a> {
    device: &'a dyn CameraDevice,
}

impl<'a> ConfigurationLock<'a> {
    pub fn acquire(device: &'a dyn CameraDevice) -> Result<Self, DeviceError> {
        device.lock_for_configuration()?;
        Ok(Self { device })
    }
}

impl Drop for ConfigurationLock<'_> {
    fn drop(&mut self) {
        self.device.unlock_for_configuration();
    }
}

/// Rear and front cameras retained from discovery
#[derive(Clone, Default)]
pub struct DiscoveredCameras {
    pub rear: Option<Arc<dyn CameraDevice>>,
    pub front: Option<Arc<dyn CameraDevice>>,
}

impl DiscoveredCameras {
    /// Keep the first rear and first front device; later duplicates and
    /// unspecified positions are ignored.
    pub fn partition(devices: Vec<Arc<dyn CameraDevice>>) -> Self {
        let mut cameras = Self::default();
        for device in devices {
            let slot = match device.position() {
                CameraPosition::Rear => &mut cameras.rear,
                CameraPosition::Front => &mut cameras.front,
                CameraPosition::Unspecified => {
                    debug!("Ignoring camera {} with unspecified position", device.id());
                    continue;
                }
            };
            if slot.is_none() {
                *slot = Some(device);
            } else {
                debug!("Ignoring duplicate {:?} camera {}", device.position(), device.id());
            }
        }
        cameras
    }

    pub fn is_empty(&self) -> bool {
        self.rear.is_none() && self.front.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CameraDevice>> {
        self.rear.iter().chain(self.front.iter())
    }
}

/// Settings applied to a device by [`tune_device`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunedDevice {
    pub format_id: Option<String>,
    pub max_frame_rate: Option<f64>,
    pub autofocus: bool,
}

/// Tuning result for one discovered device
#[derive(Debug, Clone, PartialEq)]
pub struct TuningOutcome {
    pub device_id: String,
    pub position: CameraPosition,
    pub result: Result<TunedDevice, DeviceError>,
}

/// Pick the format/range pair with the highest maximum frame rate.
///
/// Ties keep the first pair encountered.
pub fn select_best_format(formats: &[DeviceFormat]) -> Option<(&DeviceFormat, &FrameRateRange)> {
    let mut best: Option<(&DeviceFormat, &FrameRateRange)> = None;
    let mut best_rate = 0.0;

    for format in formats {
        for range in &format.frame_rate_ranges {
            if range.max_frame_rate > best_rate {
                best_rate = range.max_frame_rate;
                best = Some((format, range));
            }
        }
    }
    best
}

/// Lock a device, run it at its fastest format and enable autofocus
pub fn tune_device(device: &dyn CameraDevice) -> Result<TunedDevice, DeviceError> {
    let _lock = ConfigurationLock::acquire(device)?;

    let formats = device.formats();
    let mut tuned = TunedDevice {
        format_id: None,
        max_frame_rate: None,
        autofocus: false,
    };

    if let Some((format, range)) = select_best_format(&formats) {
        device.set_active_format(format)?;
        let duration = range.min_frame_duration();
        device.set_frame_duration(duration, duration)?;
        tuned.format_id = Some(format.id.clone());
        tuned.max_frame_rate = Some(range.max_frame_rate);
    }

    if device.is_focus_mode_supported(FocusMode::AutoFocus) {
        device.set_focus_mode(FocusMode::AutoFocus)?;
        tuned.autofocus = true;
    }

    Ok(tuned)
}

/// Tune every retained camera, logging and keeping going on failure
pub fn tune_all(cameras: &DiscoveredCameras) -> Vec<TuningOutcome> {
    cameras
        .iter()
        .map(|device| {
            let result = tune_device(device.as_ref());
            match &result {
                Ok(tuned) => info!(
                    "Tuned {:?} camera {}: format={:?} fps={:?} autofocus={}",
                    device.position(),
                    device.id(),
                    tuned.format_id,
                    tuned.max_frame_rate,
                    tuned.autofocus
                ),
                Err(e) => warn!("Skipping tuning for camera {}: {}", device.id(), e),
            }
            TuningOutcome {
                device_id: device.id().to_string(),
                position: device.position(),
                result,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedCamera;

    fn format(id: &str, ranges: &[f64]) -> DeviceFormat {
        DeviceFormat {
            id: id.to_string(),
            width: 1920,
            height: 1080,
            frame_rate_ranges: ranges.iter().map(|&max| FrameRateRange::new(1.0, max)).collect(),
        }
    }

    #[test]
    fn test_select_best_format_max_rate() {
        let formats = vec![format("a", &[30.0]), format("b", &[15.0, 60.0]), format("c", &[24.0])];
        let (best, range) = select_best_format(&formats).unwrap();
        assert_eq!(best.id, "b");
        assert_eq!(range.max_frame_rate, 60.0);
    }

    #[test]
    fn test_select_best_format_first_tie_wins() {
        let formats = vec![format("a", &[60.0]), format("b", &[60.0])];
        let (best, _) = select_best_format(&formats).unwrap();
        assert_eq!(best.id, "a");
    }

    #[test]
    fn test_select_best_format_empty() {
        assert!(select_best_format(&[]).is_none());
        assert!(select_best_format(&[format("a", &[])]).is_none());
    }

    #[test]
    fn test_frame_duration_at_max_rate() {
        let range = FrameRateRange::new(0.0, 60.0);
        assert_eq!(range.min_frame_duration(), Duration::from_secs_f64(1.0 / 60.0));
        assert_eq!(FrameRateRange::new(0.0, 0.0).min_frame_duration(), Duration::ZERO);
        assert_eq!(FrameRateRange::new(0.0, -5.0).min_frame_duration(), Duration::ZERO);
    }

    #[test]
    fn test_tune_device_applies_fastest_format() {
        let camera = SimulatedCamera::rear("rear-wide")
            .with_formats(vec![format("720p", &[30.0]), format("1080p", &[60.0])]);

        let tuned = tune_device(&camera).unwrap();
        assert_eq!(tuned.format_id.as_deref(), Some("1080p"));
        assert_eq!(tuned.max_frame_rate, Some(60.0));
        assert!(tuned.autofocus);

        assert_eq!(camera.active_format_id().as_deref(), Some("1080p"));
        let duration = Duration::from_secs_f64(1.0 / 60.0);
        assert_eq!(camera.frame_duration(), Some((duration, duration)));
        assert_eq!(camera.focus_mode(), Some(FocusMode::AutoFocus));
        assert!(!camera.is_locked());
    }

    #[test]
    fn test_tune_device_lock_failure() {
        let camera = SimulatedCamera::front("front").failing_lock();
        let result = tune_device(&camera);
        assert!(matches!(result, Err(DeviceError::Lock(_))));
        assert_eq!(camera.active_format_id(), None);
    }

    #[test]
    fn test_tune_device_unlocks_after_error() {
        let camera = SimulatedCamera::rear("rear").failing_format();
        assert!(matches!(tune_device(&camera), Err(DeviceError::Format(_))));
        assert!(!camera.is_locked());
    }

    #[test]
    fn test_tune_device_without_autofocus() {
        let camera = SimulatedCamera::front("front").without_autofocus();
        let tuned = tune_device(&camera).unwrap();
        assert!(!tuned.autofocus);
        assert_eq!(camera.focus_mode(), None);
    }

    #[test]
    fn test_partition_keeps_first_of_each_position() {
        let devices: Vec<Arc<dyn CameraDevice>> = vec![
            Arc::new(SimulatedCamera::rear("rear-1")),
            Arc::new(SimulatedCamera::external("usb")),
            Arc::new(SimulatedCamera::front("front-1")),
            Arc::new(SimulatedCamera::rear("rear-2")),
            Arc::new(SimulatedCamera::front("front-2")),
        ];

        let cameras = DiscoveredCameras::partition(devices);
        assert_eq!(cameras.rear.as_ref().unwrap().id(), "rear-1");
        assert_eq!(cameras.front.as_ref().unwrap().id(), "front-1");
        assert_eq!(cameras.iter().count(), 2);
    }

    #[test]
    fn test_tune_all_continues_after_failure() {
        let cameras = DiscoveredCameras {
            rear: Some(Arc::new(SimulatedCamera::rear("rear").failing_lock())),
            front: Some(Arc::new(SimulatedCamera::front("front"))),
        };

        let outcomes = tune_all(&cameras);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[0].position, CameraPosition::Rear);
        assert!(outcomes[1].result.is_ok());
    }
}
