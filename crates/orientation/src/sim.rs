//! Simulated motion hardware for tests and hosts without sensors

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SensorError;
use crate::orientation::GravitySample;
use crate::sampler::{GravitySource, MotionSampler, SampleResult};

#[derive(Debug, Default)]
struct ManualShared {
    updates: Mutex<Option<mpsc::Sender<SampleResult>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

/// Motion sampler driven by hand through a [`ManualSamplerHandle`]
#[derive(Debug)]
pub struct ManualSampler {
    shared: Arc<ManualShared>,
}

impl ManualSampler {
    /// Create a sampler and the handle used to feed it
    pub fn new() -> (Self, ManualSamplerHandle) {
        let shared = Arc::new(ManualShared::default());
        (
            Self {
                shared: shared.clone(),
            },
            ManualSamplerHandle { shared },
        )
    }
}

impl MotionSampler for ManualSampler {
    fn start(
        &mut self,
        interval: Duration,
        updates: mpsc::Sender<SampleResult>,
    ) -> Result<(), SensorError> {
        let mut slot = self
            .shared
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(SensorError::AlreadyStarted);
        }
        debug!("Manual sampler subscribed ({:?} interval)", interval);
        *slot = Some(updates);
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        let mut slot = self
            .shared
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_some() {
            self.shared.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Feeds samples into a [`ManualSampler`]
#[derive(Debug, Clone)]
pub struct ManualSamplerHandle {
    shared: Arc<ManualShared>,
}

impl ManualSamplerHandle {
    /// Deliver a gravity sample. Returns false when nothing is subscribed.
    pub async fn push(&self, sample: GravitySample) -> bool {
        self.send(Ok(sample)).await
    }

    /// Deliver a sampler error. Returns false when nothing is subscribed.
    pub async fn push_error(&self, error: SensorError) -> bool {
        self.send(Err(error)).await
    }

    async fn send(&self, result: SampleResult) -> bool {
        let sender = self
            .shared
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sender {
            Some(tx) => tx.send(result).await.is_ok(),
            None => false,
        }
    }

    /// Number of subscriptions opened so far
    pub fn start_count(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    /// Number of subscriptions closed so far
    pub fn stop_count(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }

    /// Whether a subscription is currently open
    pub fn is_active(&self) -> bool {
        self.shared
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[derive(Debug, Default)]
struct AccelerometerState {
    reading: GravitySample,
    failing: bool,
}

/// Gravity source whose reading can be changed while it is being polled
#[derive(Debug, Clone, Default)]
pub struct SimulatedAccelerometer {
    state: Arc<Mutex<AccelerometerState>>,
}

impl SimulatedAccelerometer {
    pub fn new(reading: GravitySample) -> Self {
        let accelerometer = Self::default();
        accelerometer.set(reading);
        accelerometer
    }

    /// Change the gravity vector reported from now on
    pub fn set(&self, reading: GravitySample) {
        self.lock().reading = reading;
    }

    /// Make every read fail (or succeed again)
    pub fn fail_reads(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AccelerometerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GravitySource for SimulatedAccelerometer {
    fn read_gravity(&mut self) -> SampleResult {
        let state = self.lock();
        if state.failing {
            return Err(SensorError::Read("simulated read failure".to_string()));
        }
        Ok(state.reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_sampler_push_requires_subscription() {
        let (mut sampler, handle) = ManualSampler::new();
        assert!(!handle.push(GravitySample::new(1.0, 0.0, 0.0)).await);

        let (tx, mut rx) = mpsc::channel(4);
        sampler.start(Duration::from_millis(16), tx).unwrap();
        assert!(handle.is_active());
        assert!(handle.push(GravitySample::new(1.0, 0.0, 0.0)).await);
        assert!(handle.push_error(SensorError::PermissionDenied).await);

        assert_eq!(rx.recv().await, Some(Ok(GravitySample::new(1.0, 0.0, 0.0))));
        assert_eq!(rx.recv().await, Some(Err(SensorError::PermissionDenied)));
    }

    #[test]
    fn test_manual_sampler_counts_subscriptions() {
        let (mut sampler, handle) = ManualSampler::new();
        let (tx, _rx) = mpsc::channel(4);

        sampler.start(Duration::from_millis(16), tx.clone()).unwrap();
        assert_eq!(sampler.start(Duration::from_millis(16), tx), Err(SensorError::AlreadyStarted));
        sampler.stop();
        sampler.stop();

        assert_eq!(handle.start_count(), 1);
        assert_eq!(handle.stop_count(), 1);
        assert!(!handle.is_active());
    }

    #[test]
    fn test_accelerometer_reports_latest_reading() {
        let accelerometer = SimulatedAccelerometer::new(GravitySample::new(0.0, 1.0, 0.0));
        let mut source = accelerometer.clone();
        assert_eq!(source.read_gravity(), Ok(GravitySample::new(0.0, 1.0, 0.0)));

        accelerometer.set(GravitySample::new(0.0, 0.0, -1.0));
        assert_eq!(source.read_gravity(), Ok(GravitySample::new(0.0, 0.0, -1.0)));

        accelerometer.fail_reads(true);
        assert!(matches!(source.read_gravity(), Err(SensorError::Read(_))));
    }
}
