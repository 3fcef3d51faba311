//! Capture Simulator
//!
//! Runs the orientation-aware capture pipeline against simulated cameras
//! and a simulated accelerometer. The device is walked through a list of
//! poses, one photo is taken per pose and the upright images are written
//! next to a JSON capture report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use camera_capture::photo::encode_photo;
use camera_capture::sim::SimulatedHardware;
use camera_capture::{
    CameraPosition, CaptureSessionController, FlashMode, ImageOrientation, PhotoCodec,
    SessionConfig, SessionEvent, TaggedImage, TuningOutcome,
};
use chrono::{DateTime, Utc};
use orientation::sim::SimulatedAccelerometer;
use orientation::{
    classify, GravitySample, OrientationTracker, SpatialOrientation, ThreadedSampler,
    TrackerConfig,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

/// How long the session may take to become ready
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the tracker to report a new pose
const POSE_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Simulator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    pub tracker: TrackerConfig,
    pub session: SessionConfig,
    /// Where photos and the report are written
    pub output_dir: PathBuf,
    /// Raw accelerometer readings (in g), one capture per pose
    pub poses: Vec<[f64; 3]>,
    pub photo_width: u32,
    pub photo_height: u32,
    /// Simulated photo encode time
    pub encode_latency_ms: u64,
    /// Switch camera before every Nth capture (0 never switches)
    pub switch_every: usize,
    /// Toggle flash before every Nth capture (0 never toggles)
    pub flash_every: usize,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            session: SessionConfig::default(),
            output_dir: PathBuf::from("captures"),
            poses: vec![
                [0.02, 0.98, 0.12],
                [-0.97, 0.05, 0.2],
                [0.96, -0.1, 0.15],
                [0.0, -0.99, 0.05],
                [0.1, 0.1, 0.99],
            ],
            photo_width: 640,
            photo_height: 480,
            encode_latency_ms: 30,
            switch_every: 2,
            flash_every: 3,
        }
    }
}

/// Tuning result for one camera, as written to the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningRecord {
    pub device_id: String,
    pub position: CameraPosition,
    pub format_id: Option<String>,
    pub max_frame_rate: Option<f64>,
    pub autofocus: bool,
    pub error: Option<String>,
}

impl From<&TuningOutcome> for TuningRecord {
    fn from(outcome: &TuningOutcome) -> Self {
        let (format_id, max_frame_rate, autofocus, error) = match &outcome.result {
            Ok(tuned) => (tuned.format_id.clone(), tuned.max_frame_rate, tuned.autofocus, None),
            Err(e) => (None, None, false, Some(e.to_string())),
        };
        Self {
            device_id: outcome.device_id.clone(),
            position: outcome.position,
            format_id,
            max_frame_rate,
            autofocus,
            error,
        }
    }
}

/// One pose of the walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub index: usize,
    pub pose: [f64; 3],
    pub id: Option<Uuid>,
    pub captured_at: Option<DateTime<Utc>>,
    pub position: Option<CameraPosition>,
    pub flash_mode: FlashMode,
    pub spatial_orientation: SpatialOrientation,
    pub orientation: Option<ImageOrientation>,
    pub exif_orientation: Option<u8>,
    pub file: Option<String>,
    pub error: Option<String>,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tuning: Vec<TuningRecord>,
    pub captures: Vec<CaptureRecord>,
}

impl CaptureReport {
    /// Number of poses that produced a photo
    pub fn captured(&self) -> usize {
        self.captures.iter().filter(|c| c.error.is_none()).count()
    }
}

/// Initialize logging, filtered by `RUST_LOG` (default `info`)
pub fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Load settings from an optional file, then `CAPTURE_SIM__*` variables.
///
/// The file format follows the extension; a missing file is not an error.
pub fn load_settings(path: &str) -> anyhow::Result<SimSettings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("CAPTURE_SIM")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to load settings from {}", path))?;

    settings
        .try_deserialize()
        .context("Invalid simulator settings")
}

/// Walk the configured poses and capture one photo per pose
pub async fn run(settings: &SimSettings) -> anyhow::Result<CaptureReport> {
    let started_at = Utc::now();
    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", settings.output_dir.display()))?;

    let accelerometer = SimulatedAccelerometer::default();
    let tracker = OrientationTracker::new(
        ThreadedSampler::new(accelerometer.clone()),
        settings.tracker.clone(),
    );

    let hardware = SimulatedHardware::dual_camera()
        .with_photo_size(settings.photo_width, settings.photo_height);
    hardware
        .photo_output
        .set_latency(Duration::from_millis(settings.encode_latency_ms));

    let controller =
        CaptureSessionController::new(hardware.hardware(), tracker, settings.session.clone());
    let mut events = controller.subscribe();

    controller
        .request_camera_access()
        .await
        .context("Camera access failed")?;
    let tuning = wait_until_ready(&mut events).await?;
    for outcome in &tuning {
        debug!("Tuned {}: {:?}", outcome.device_id, outcome.result);
    }

    let mut captures = Vec::with_capacity(settings.poses.len());
    for (index, pose) in settings.poses.iter().enumerate() {
        if every(settings.switch_every, index) {
            let outcome = controller.switch_camera().await?;
            info!("Camera switch before pose {}: {:?}", index, outcome);
        }
        if every(settings.flash_every, index) {
            let mode = controller.toggle_flash().await?;
            info!("Flash {:?} before pose {}", mode, index);
        }

        let sample = GravitySample::from_acceleration(pose[0], pose[1], pose[2]);
        accelerometer.set(sample);
        settle(&controller, sample, settings.tracker.sample_interval()).await;

        let record = match controller.capture_photo().await {
            Ok(image) => {
                let file = save_upright(&settings.output_dir, index, &image).await?;
                info!(
                    "Pose {} ({:?}) captured from {:?} camera, tag {:?}",
                    index, image.spatial_orientation, image.position, image.orientation
                );
                CaptureRecord {
                    index,
                    pose: *pose,
                    id: Some(image.id),
                    captured_at: Some(image.captured_at),
                    position: Some(image.position),
                    flash_mode: image.flash_mode,
                    spatial_orientation: image.spatial_orientation,
                    orientation: image.orientation,
                    exif_orientation: Some(image.exif_orientation()),
                    file: Some(file),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Capture for pose {} failed: {}", index, e);
                CaptureRecord {
                    index,
                    pose: *pose,
                    id: None,
                    captured_at: None,
                    position: None,
                    flash_mode: controller.flash_mode(),
                    spatial_orientation: controller.current_orientation(),
                    orientation: None,
                    exif_orientation: None,
                    file: None,
                    error: Some(e.to_string()),
                }
            }
        };
        captures.push(record);
    }

    controller.stop().await?;

    let report = CaptureReport {
        started_at,
        finished_at: Utc::now(),
        tuning: tuning.iter().map(TuningRecord::from).collect(),
        captures,
    };
    write_report(&settings.output_dir, &report).await?;
    Ok(report)
}

fn every(period: usize, index: usize) -> bool {
    period > 0 && index > 0 && index % period == 0
}

async fn wait_until_ready(
    events: &mut broadcast::Receiver<SessionEvent>,
) -> anyhow::Result<Vec<TuningOutcome>> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Ready { tuning }) => return Ok(tuning),
                Ok(SessionEvent::ConfigurationFailed(e)) => bail!("Session configuration failed: {}", e),
                Ok(SessionEvent::PermissionDenied) => bail!("Camera access denied"),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} session events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => bail!("Controller shut down"),
            }
        }
    };

    tokio::time::timeout(READY_TIMEOUT, wait)
        .await
        .context("Session never became ready")?
}

/// Wait until the tracker reflects `sample`
async fn settle(controller: &CaptureSessionController, sample: GravitySample, interval: Duration) {
    let Some(expected) = classify(&sample) else {
        // Ambiguous poses leave the orientation alone; give the sampler a few ticks
        tokio::time::sleep(interval * 3).await;
        return;
    };

    let mut changes = controller.orientation().subscribe();
    let reached = tokio::time::timeout(POSE_SETTLE_TIMEOUT, async {
        changes.wait_for(|current| *current == expected).await.is_ok()
    })
    .await;

    if !matches!(reached, Ok(true)) {
        warn!("Orientation did not settle on {:?}", expected);
    }
}

async fn save_upright(dir: &Path, index: usize, image: &TaggedImage) -> anyhow::Result<String> {
    let name = format!(
        "{:02}-{}-{}.jpg",
        index,
        format!("{:?}", image.position).to_lowercase(),
        image.id
    );
    let upright = image.upright();
    let bytes = tokio::task::spawn_blocking(move || encode_photo(&upright, PhotoCodec::Jpeg))
        .await
        .context("Encoder task failed")?
        .context("Failed to encode upright photo")?;

    tokio::fs::write(dir.join(&name), bytes)
        .await
        .with_context(|| format!("Failed to write {}", name))?;
    Ok(name)
}

async fn write_report(dir: &Path, report: &CaptureReport) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(dir.join("report.json"), json)
        .await
        .context("Failed to write capture report")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("capture-sim-{}", Uuid::new_v4()))
    }

    fn quick_settings(output_dir: PathBuf) -> SimSettings {
        SimSettings {
            output_dir,
            photo_width: 32,
            photo_height: 24,
            encode_latency_ms: 0,
            tracker: TrackerConfig { sample_rate_hz: 200 },
            ..SimSettings::default()
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let settings = load_settings("definitely-not-a-capture-sim-config").unwrap();
        assert_eq!(settings.poses.len(), 5);
        assert_eq!(settings.tracker.sample_rate_hz, 60);
        assert_eq!(settings.session.capture_timeout_ms, 10_000);
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sim.toml");
        std::fs::write(
            &path,
            "photo_width = 100\nposes = [[1.0, 0.0, 0.0]]\n\n[session]\ncapture_timeout_ms = 250\n",
        )
        .unwrap();

        let settings = load_settings(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.photo_width, 100);
        assert_eq!(settings.photo_height, 480);
        assert_eq!(settings.poses, vec![[1.0, 0.0, 0.0]]);
        assert_eq!(settings.session.capture_timeout_ms, 250);
        assert_eq!(settings.session.event_capacity, 16);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_every() {
        assert!(!every(0, 4));
        assert!(!every(2, 0));
        assert!(every(2, 2));
        assert!(!every(2, 3));
    }

    #[tokio::test]
    async fn test_run_walks_poses() {
        let dir = scratch_dir();
        let settings = SimSettings {
            poses: vec![[0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            switch_every: 1,
            flash_every: 0,
            ..quick_settings(dir.clone())
        };

        let report = run(&settings).await.unwrap();
        assert_eq!(report.captured(), 3);
        assert_eq!(report.tuning.len(), 2);

        // Rear, then front, then rear again
        let first = &report.captures[0];
        assert_eq!(first.position, Some(CameraPosition::Rear));
        assert_eq!(first.spatial_orientation, SpatialOrientation::Portrait);
        assert_eq!(first.orientation, Some(ImageOrientation::Left));

        let second = &report.captures[1];
        assert_eq!(second.position, Some(CameraPosition::Front));
        assert_eq!(second.spatial_orientation, SpatialOrientation::LandscapeLeft);
        assert_eq!(second.orientation, Some(ImageOrientation::DownMirrored));

        let third = &report.captures[2];
        assert_eq!(third.position, Some(CameraPosition::Rear));
        assert_eq!(third.spatial_orientation, SpatialOrientation::FaceUp);
        assert_eq!(third.orientation, None);
        assert_eq!(third.exif_orientation, Some(1));

        for capture in &report.captures {
            let file = capture.file.as_ref().unwrap();
            assert!(dir.join(file).exists());
        }
        let json = std::fs::read_to_string(dir.join("report.json")).unwrap();
        let parsed: CaptureReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.captures.len(), 3);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_run_toggles_flash() {
        let dir = scratch_dir();
        let settings = SimSettings {
            poses: vec![[0.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            switch_every: 0,
            flash_every: 1,
            ..quick_settings(dir.clone())
        };

        let report = run(&settings).await.unwrap();
        assert_eq!(report.captures[0].flash_mode, FlashMode::Off);
        assert_eq!(report.captures[1].flash_mode, FlashMode::On);

        std::fs::remove_dir_all(dir).unwrap();
    }
}
