//! Motion sampler capability and fixed-rate threaded sampler

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SensorError;
use crate::orientation::GravitySample;

/// Result of a single motion sample
pub type SampleResult = Result<GravitySample, SensorError>;

/// Motion sensor that pushes gravity samples at a fixed interval.
///
/// `start` subscribes the sampler and every sample (or per-sample error) is
/// sent on `updates` until `stop` is called. Implementations drop their
/// sender on `stop`.
pub trait MotionSampler: Send {
    fn start(
        &mut self,
        interval: Duration,
        updates: mpsc::Sender<SampleResult>,
    ) -> Result<(), SensorError>;

    fn stop(&mut self);
}

/// Blocking gravity reader polled by [`ThreadedSampler`]
pub trait GravitySource: Send + 'static {
    fn read_gravity(&mut self) -> SampleResult;
}

/// Polls a [`GravitySource`] on a dedicated thread at a fixed rate
pub struct ThreadedSampler<S: GravitySource> {
    source: Arc<Mutex<S>>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl<S: GravitySource> ThreadedSampler<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            shutdown: None,
        }
    }

    /// Check if the polling thread is active
    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }
}

impl<S: GravitySource> MotionSampler for ThreadedSampler<S> {
    fn start(
        &mut self,
        interval: Duration,
        updates: mpsc::Sender<SampleResult>,
    ) -> Result<(), SensorError> {
        if self.shutdown.is_some() {
            return Err(SensorError::AlreadyStarted);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();
        let source = self.source.clone();

        std::thread::Builder::new()
            .name("motion-sampler".to_string())
            .spawn(move || {
                while !shutdown_flag.load(Ordering::SeqCst) {
                    let result = match source.lock() {
                        Ok(mut source) => source.read_gravity(),
                        Err(_) => Err(SensorError::Unavailable("gravity source poisoned".to_string())),
                    };

                    if updates.blocking_send(result).is_err() {
                        debug!("Motion sample receiver dropped");
                        break;
                    }
                    std::thread::sleep(interval);
                }
                debug!("Motion sampler thread exiting");
            })
            .map_err(|e| SensorError::Unavailable(e.to_string()))?;

        info!("Motion sampler started ({:?} interval)", interval);
        self.shutdown = Some(shutdown);
        Ok(())
    }

    fn stop(&mut self) {
        match self.shutdown.take() {
            Some(shutdown) => {
                shutdown.store(true, Ordering::SeqCst);
                info!("Motion sampler stopped");
            }
            None => warn!("Motion sampler stop requested while idle"),
        }
    }
}

impl<S: GravitySource> Drop for ThreadedSampler<S> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.store(true, Ordering::SeqCst);
        }
    }
}
