//! Capture session and permission capabilities

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::CameraDevice;
use crate::photo::PhotoCaptureOutput;
use crate::SessionError;

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Configuring,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Configuring => "configuring",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Session quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionPreset {
    #[default]
    Photo,
    High,
    Medium,
    Low,
}

/// Camera permission status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    NotDetermined,
}

/// Grants or denies camera access
#[async_trait]
pub trait PermissionAuthority: Send + Sync {
    fn status(&self) -> AuthorizationStatus;

    /// Prompt for access; resolves to whether it was granted
    async fn request_access(&self) -> bool;
}

/// A live capture session connecting one camera input to photo outputs.
///
/// Input and output changes made between `begin_configuration` and
/// `commit_configuration` are applied atomically.
#[async_trait]
pub trait CaptureSession: Send + Sync {
    fn begin_configuration(&self);
    fn commit_configuration(&self);
    fn set_preset(&self, preset: SessionPreset);

    fn can_add_input(&self, device: &dyn CameraDevice) -> bool;
    fn add_input(&self, device: Arc<dyn CameraDevice>) -> Result<(), SessionError>;
    fn remove_input(&self, device_id: &str);
    fn inputs(&self) -> Vec<Arc<dyn CameraDevice>>;

    fn can_add_output(&self, output: &dyn PhotoCaptureOutput) -> bool;
    fn add_output(&self, output: Arc<dyn PhotoCaptureOutput>) -> Result<(), SessionError>;
    fn remove_output(&self, output: &dyn PhotoCaptureOutput);

    /// Start the session; resolves once the session reports it is running
    async fn start_running(&self) -> Result<(), SessionError>;
    fn stop_running(&self);
    fn is_running(&self) -> bool;
}
