//! Device Orientation Tracking
//!
//! Converts a continuous stream of gravity samples into a discrete
//! spatial orientation that other components can read at any instant:
//! - Fixed-rate motion sampling on a dedicated thread
//! - Threshold classification with fixed axis priority (x, y, z)
//! - Lock-free point-in-time reads and change subscriptions

pub mod error;
pub mod orientation;
pub mod sampler;
pub mod sim;
pub mod tracker;

pub use error::SensorError;
pub use orientation::{classify, GravitySample, SpatialOrientation, ORIENTATION_THRESHOLD};
pub use sampler::{GravitySource, MotionSampler, SampleResult, ThreadedSampler};
pub use tracker::{OrientationReader, OrientationTracker, TrackerConfig};
