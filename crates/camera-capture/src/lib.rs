//! Orientation-Aware Photo Capture
//!
//! Drives a camera capture session whose photos come out tagged with the
//! pixel orientation matching how the device was held:
//! - Camera discovery and per-device tuning (fastest format, autofocus)
//! - Live session with hot-swappable rear/front input and flash toggle
//! - One-shot photo capture resolved against the device orientation
//! - Simulated hardware for tests and headless hosts

pub mod controller;
pub mod device;
pub mod photo;
pub mod session;
pub mod sim;

pub use controller::{
    CameraSelection, CaptureHardware, CaptureSessionController, SessionConfig, SessionEvent,
    SessionStatus, SwitchOutcome,
};
pub use device::{
    CameraDevice, CameraPosition, DeviceDiscovery, DeviceError, DeviceFormat, FocusMode,
    FrameRateRange, MediaKind, TunedDevice, TuningOutcome,
};
pub use photo::{
    resolve_orientation, FlashMode, ImageOrientation, PhotoCaptureOutput, PhotoCodec,
    PhotoSettings, TaggedImage,
};
pub use session::{
    AuthorizationStatus, CaptureSession, PermissionAuthority, SessionPreset, SessionState,
};

use std::time::Duration;

use thiserror::Error;

/// Session lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Camera access denied")]
    PermissionDenied,

    #[error("No usable camera: {0}")]
    DeviceDiscovery(String),

    #[error("Capture session error: {0}")]
    Session(String),

    #[error("Capture session not running (state: {0})")]
    NotRunning(SessionState),

    #[error("Capture session stopped")]
    Stopped,

    #[error("Capture controller shut down")]
    ControllerClosed,
}

/// Per-request capture errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Capture session not running (state: {0})")]
    NotRunning(SessionState),

    #[error("Photo output failed: {0}")]
    Output(String),

    #[error("Photo output returned no image data")]
    NoImageData,

    #[error("Failed to decode photo: {0}")]
    Decode(String),

    #[error("Capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("Capture interrupted: {0}")]
    Interrupted(String),

    #[error("Capture controller shut down")]
    ControllerClosed,
}
