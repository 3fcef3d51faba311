//! Spatial orientation and gravity classification

use serde::{Deserialize, Serialize};

/// Axis magnitude a gravity component must exceed to decide an orientation
pub const ORIENTATION_THRESHOLD: f64 = 0.65;

/// Physical attitude of the device relative to gravity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpatialOrientation {
    LandscapeLeft,
    LandscapeRight,
    Portrait,
    PortraitUpsideDown,
    FaceUp,
    FaceDown,
    #[default]
    Unknown,
}

/// Gravity vector in device-frame axes, normalized gravity units (-1.0..1.0)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GravitySample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GravitySample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Build a gravity sample from a raw accelerometer reading (in g).
    ///
    /// The reading is scaled to unit length so a device held still reports
    /// the same vector regardless of sensor calibration. A zero (or
    /// non-finite) reading maps to the zero sample, which classifies as
    /// ambiguous.
    pub fn from_acceleration(x: f64, y: f64, z: f64) -> Self {
        let magnitude = Self::new(x, y, z).magnitude();
        if !magnitude.is_finite() || magnitude <= f64::EPSILON {
            return Self::default();
        }
        Self {
            x: x / magnitude,
            y: y / magnitude,
            z: z / magnitude,
        }
    }

    /// Vector magnitude
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Classify a gravity sample into a spatial orientation.
///
/// Axes are checked in the fixed order x, y, z and the first threshold
/// crossed wins, even when a later axis has a larger magnitude. Returns
/// `None` when no axis crosses the threshold.
pub fn classify(sample: &GravitySample) -> Option<SpatialOrientation> {
    let t = ORIENTATION_THRESHOLD;

    if sample.x > t {
        Some(SpatialOrientation::LandscapeRight)
    } else if sample.x < -t {
        Some(SpatialOrientation::LandscapeLeft)
    } else if sample.y > t {
        Some(SpatialOrientation::Portrait)
    } else if sample.y < -t {
        Some(SpatialOrientation::PortraitUpsideDown)
    } else if sample.z > t {
        Some(SpatialOrientation::FaceUp)
    } else if sample.z < -t {
        Some(SpatialOrientation::FaceDown)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_with_axis(axis: usize, dominant: f64, a: f64, b: f64) -> GravitySample {
        match axis {
            0 => GravitySample::new(dominant, a, b),
            1 => GravitySample::new(a, dominant, b),
            _ => GravitySample::new(a, b, dominant),
        }
    }

    fn expected(axis: usize, positive: bool) -> SpatialOrientation {
        match (axis, positive) {
            (0, true) => SpatialOrientation::LandscapeRight,
            (0, false) => SpatialOrientation::LandscapeLeft,
            (1, true) => SpatialOrientation::Portrait,
            (1, false) => SpatialOrientation::PortraitUpsideDown,
            (_, true) => SpatialOrientation::FaceUp,
            (_, false) => SpatialOrientation::FaceDown,
        }
    }

    #[test]
    fn test_single_axis_table() {
        assert_eq!(classify(&GravitySample::new(0.7, 0.0, 0.0)), Some(SpatialOrientation::LandscapeRight));
        assert_eq!(classify(&GravitySample::new(-0.7, 0.0, 0.0)), Some(SpatialOrientation::LandscapeLeft));
        assert_eq!(classify(&GravitySample::new(0.0, 0.7, 0.0)), Some(SpatialOrientation::Portrait));
        assert_eq!(classify(&GravitySample::new(0.0, -0.7, 0.0)), Some(SpatialOrientation::PortraitUpsideDown));
        assert_eq!(classify(&GravitySample::new(0.0, 0.0, 0.7)), Some(SpatialOrientation::FaceUp));
        assert_eq!(classify(&GravitySample::new(0.0, 0.0, -0.7)), Some(SpatialOrientation::FaceDown));
    }

    #[test]
    fn test_priority_beats_magnitude() {
        // y is larger, but x is checked first
        let sample = GravitySample::new(0.66, -0.99, 0.0);
        assert_eq!(classify(&sample), Some(SpatialOrientation::LandscapeRight));

        let sample = GravitySample::new(0.1, 0.7, -0.95);
        assert_eq!(classify(&sample), Some(SpatialOrientation::Portrait));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert_eq!(classify(&GravitySample::new(0.65, 0.0, 0.0)), None);
        assert_eq!(classify(&GravitySample::new(0.0, -0.65, 0.0)), None);
    }

    #[test]
    fn test_non_finite_sample_is_ambiguous() {
        assert_eq!(classify(&GravitySample::new(f64::NAN, 0.0, 0.0)), None);
    }

    #[test]
    fn test_from_acceleration_normalizes() {
        let sample = GravitySample::from_acceleration(0.0, 0.0, -2.0);
        assert!((sample.z + 1.0).abs() < 1e-9);
        assert!((sample.magnitude() - 1.0).abs() < 1e-9);
        assert_eq!(classify(&sample), Some(SpatialOrientation::FaceDown));

        assert_eq!(GravitySample::from_acceleration(0.0, 0.0, 0.0), GravitySample::default());
    }

    proptest! {
        #[test]
        fn prop_single_dominant_axis(
            axis in 0usize..3,
            positive in any::<bool>(),
            magnitude in 0.651f64..=1.0,
            a in -0.65f64..=0.65,
            b in -0.65f64..=0.65,
        ) {
            let dominant = if positive { magnitude } else { -magnitude };
            let sample = sample_with_axis(axis, dominant, a, b);
            prop_assert_eq!(classify(&sample), Some(expected(axis, positive)));
        }

        #[test]
        fn prop_ambiguous_vector_unclassified(
            x in -0.65f64..=0.65,
            y in -0.65f64..=0.65,
            z in -0.65f64..=0.65,
        ) {
            prop_assert_eq!(classify(&GravitySample::new(x, y, z)), None);
        }
    }
}
