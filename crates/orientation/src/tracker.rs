//! Orientation tracker service

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SensorError;
use crate::orientation::{classify, SpatialOrientation};
use crate::sampler::{MotionSampler, SampleResult};

/// Samples buffered between the sampler and the classification loop
const SAMPLE_QUEUE_DEPTH: usize = 64;

/// Tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Gravity sample rate in Hz
    pub sample_rate_hz: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { sample_rate_hz: 60 }
    }
}

impl TrackerConfig {
    /// Interval between gravity samples
    pub fn sample_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.sample_rate_hz.max(1) as u64)
    }
}

/// State written by the sampling loop, read by everyone else
#[derive(Debug)]
struct SharedOrientation {
    current: watch::Sender<SpatialOrientation>,
    processed: AtomicU64,
    errors: AtomicU64,
}

impl SharedOrientation {
    fn new() -> Self {
        let (current, _) = watch::channel(SpatialOrientation::Unknown);
        Self {
            current,
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn ingest(&self, result: SampleResult) {
        match result {
            Ok(sample) => {
                if let Some(next) = classify(&sample) {
                    self.current.send_if_modified(|current| {
                        if *current == next {
                            return false;
                        }
                        debug!("Orientation changed: {:?} -> {:?}", current, next);
                        *current = next;
                        true
                    });
                }
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Motion sample error: {}", e);
            }
        }
        self.processed.fetch_add(1, Ordering::Release);
    }
}

/// Cloneable read handle onto the tracker's latest orientation
#[derive(Debug, Clone)]
pub struct OrientationReader {
    shared: Arc<SharedOrientation>,
}

impl OrientationReader {
    /// Most recently classified orientation
    pub fn current(&self) -> SpatialOrientation {
        *self.shared.current.borrow()
    }

    /// Receiver notified on every orientation change
    pub fn subscribe(&self) -> watch::Receiver<SpatialOrientation> {
        self.shared.current.subscribe()
    }

    /// Samples handled by the sampling loop, including errors
    pub fn samples_processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Acquire)
    }

    /// Samples the sampler reported as errors
    pub fn sample_errors(&self) -> u64 {
        self.shared.errors.load(Ordering::Relaxed)
    }
}

/// Tracks device orientation from a motion sampler.
///
/// `start` must be called from within a tokio runtime; classification runs
/// on a spawned task fed by the sampler.
pub struct OrientationTracker {
    config: TrackerConfig,
    sampler: Box<dyn MotionSampler>,
    shared: Arc<SharedOrientation>,
    task: Option<JoinHandle<()>>,
}

impl OrientationTracker {
    /// Create a tracker around a motion sampler
    pub fn new(sampler: impl MotionSampler + 'static, config: TrackerConfig) -> Self {
        Self::with_boxed(Box::new(sampler), config)
    }

    pub fn with_boxed(sampler: Box<dyn MotionSampler>, config: TrackerConfig) -> Self {
        Self {
            config,
            sampler,
            shared: Arc::new(SharedOrientation::new()),
            task: None,
        }
    }

    /// Start sampling. Calling this while already started does nothing.
    pub fn start(&mut self) -> Result<(), SensorError> {
        if self.task.is_some() {
            debug!("Orientation tracker already running");
            return Ok(());
        }

        let interval = self.config.sample_interval();
        let (tx, mut rx) = mpsc::channel::<SampleResult>(SAMPLE_QUEUE_DEPTH);
        self.sampler.start(interval, tx)?;

        let shared = self.shared.clone();
        self.task = Some(tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                shared.ingest(result);
            }
            debug!("Motion sample stream closed");
        }));

        info!("Orientation tracker started at {} Hz", self.config.sample_rate_hz);
        Ok(())
    }

    /// Stop sampling and release the sensor subscription. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            self.sampler.stop();
            task.abort();
            info!("Orientation tracker stopped");
        }
    }

    /// Check if sampling is active
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Most recently classified orientation
    pub fn current(&self) -> SpatialOrientation {
        *self.shared.current.borrow()
    }

    /// Read handle usable from any task
    pub fn reader(&self) -> OrientationReader {
        OrientationReader {
            shared: self.shared.clone(),
        }
    }

    /// Receiver notified on every orientation change
    pub fn subscribe(&self) -> watch::Receiver<SpatialOrientation> {
        self.shared.current.subscribe()
    }
}

impl Drop for OrientationTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::GravitySample;
    use crate::sim::ManualSampler;

    async fn wait_for_samples(reader: &OrientationReader, count: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while reader.samples_processed() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("samples were not processed in time");
    }

    #[test]
    fn test_default_interval() {
        let config = TrackerConfig::default();
        assert_eq!(config.sample_interval(), Duration::from_micros(16_666));
    }

    #[tokio::test]
    async fn test_initial_orientation_unknown() {
        let (sampler, _handle) = ManualSampler::new();
        let tracker = OrientationTracker::new(sampler, TrackerConfig::default());
        assert_eq!(tracker.current(), SpatialOrientation::Unknown);
        assert!(!tracker.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (sampler, handle) = ManualSampler::new();
        let mut tracker = OrientationTracker::new(sampler, TrackerConfig::default());

        tracker.start().unwrap();
        tracker.start().unwrap();
        assert_eq!(handle.start_count(), 1);

        tracker.stop();
        tracker.stop();
        assert_eq!(handle.stop_count(), 1);
        assert!(!handle.is_active());

        // Restart after stop subscribes again
        tracker.start().unwrap();
        assert_eq!(handle.start_count(), 2);
    }

    #[tokio::test]
    async fn test_sample_updates_orientation() {
        let (sampler, handle) = ManualSampler::new();
        let mut tracker = OrientationTracker::new(sampler, TrackerConfig::default());
        let mut updates = tracker.subscribe();
        tracker.start().unwrap();

        assert!(handle.push(GravitySample::new(0.0, 0.7, 0.0)).await);
        updates.changed().await.unwrap();

        assert_eq!(*updates.borrow(), SpatialOrientation::Portrait);
        assert_eq!(tracker.current(), SpatialOrientation::Portrait);
    }

    #[tokio::test]
    async fn test_ambiguous_sample_keeps_previous() {
        let (sampler, handle) = ManualSampler::new();
        let mut tracker = OrientationTracker::new(sampler, TrackerConfig::default());
        let reader = tracker.reader();
        tracker.start().unwrap();

        handle.push(GravitySample::new(-0.8, 0.1, 0.0)).await;
        handle.push(GravitySample::new(0.3, -0.2, 0.5)).await;
        wait_for_samples(&reader, 2).await;

        assert_eq!(reader.current(), SpatialOrientation::LandscapeLeft);
    }

    #[tokio::test]
    async fn test_sample_error_is_absorbed() {
        let (sampler, handle) = ManualSampler::new();
        let mut tracker = OrientationTracker::new(sampler, TrackerConfig::default());
        let reader = tracker.reader();
        tracker.start().unwrap();

        handle.push(GravitySample::new(0.0, 0.0, 0.9)).await;
        handle.push_error(SensorError::Read("dropped frame".to_string())).await;
        wait_for_samples(&reader, 2).await;

        assert_eq!(reader.current(), SpatialOrientation::FaceUp);
        assert_eq!(reader.sample_errors(), 1);
    }

    #[tokio::test]
    async fn test_repeated_orientation_notifies_once() {
        let (sampler, handle) = ManualSampler::new();
        let mut tracker = OrientationTracker::new(sampler, TrackerConfig::default());
        let reader = tracker.reader();
        let mut updates = tracker.subscribe();
        tracker.start().unwrap();

        handle.push(GravitySample::new(0.9, 0.0, 0.0)).await;
        handle.push(GravitySample::new(0.8, 0.2, 0.0)).await;
        wait_for_samples(&reader, 2).await;

        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), SpatialOrientation::LandscapeRight);
        assert!(!updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_samples_ignored_after_stop() {
        let (sampler, handle) = ManualSampler::new();
        let mut tracker = OrientationTracker::new(sampler, TrackerConfig::default());
        tracker.start().unwrap();
        tracker.stop();

        assert!(!handle.push(GravitySample::new(0.0, -0.9, 0.0)).await);
        assert_eq!(tracker.current(), SpatialOrientation::Unknown);
    }
}
