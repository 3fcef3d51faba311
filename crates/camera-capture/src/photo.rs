//! Photo output capability, orientation tags and tagged images

use std::io::Cursor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::metadata::Orientation;
use image::{DynamicImage, ImageFormat};
use orientation::SpatialOrientation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::CameraPosition;
use crate::CaptureError;

/// Flash mode used for the next capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlashMode {
    #[default]
    Off,
    On,
}

impl FlashMode {
    /// The other mode
    pub fn toggled(self) -> Self {
        match self {
            FlashMode::Off => FlashMode::On,
            FlashMode::On => FlashMode::Off,
        }
    }
}

/// Encoding the photo output produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhotoCodec {
    #[default]
    Jpeg,
    Png,
}

impl PhotoCodec {
    pub fn image_format(&self) -> ImageFormat {
        match self {
            PhotoCodec::Jpeg => ImageFormat::Jpeg,
            PhotoCodec::Png => ImageFormat::Png,
        }
    }
}

/// Per-request capture settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSettings {
    pub flash_mode: FlashMode,
    pub codec: PhotoCodec,
}

/// Still-photo endpoint attached to a capture session.
///
/// Each `capture` call resolves exactly once, with the encoded image bytes
/// or the error the hardware reported.
#[async_trait]
pub trait PhotoCaptureOutput: Send + Sync {
    /// Settings the output should prepare resources for
    fn set_prepared_settings(&self, settings: &[PhotoSettings]);

    async fn capture(&self, settings: PhotoSettings) -> Result<Vec<u8>, CaptureError>;
}

/// Pixel orientation tag of a captured image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageOrientation {
    Up,
    Down,
    Left,
    Right,
    UpMirrored,
    DownMirrored,
    LeftMirrored,
    RightMirrored,
}

impl ImageOrientation {
    /// EXIF orientation code
    pub fn exif_value(&self) -> u8 {
        match self {
            ImageOrientation::Up => 1,
            ImageOrientation::UpMirrored => 2,
            ImageOrientation::Down => 3,
            ImageOrientation::DownMirrored => 4,
            ImageOrientation::LeftMirrored => 5,
            ImageOrientation::Right => 6,
            ImageOrientation::RightMirrored => 7,
            ImageOrientation::Left => 8,
        }
    }
}

/// Tag for a photo taken by a camera at `position` while the device was in
/// `spatial`.
///
/// Rear cameras get unmirrored tags; every other camera is treated as
/// front-facing and gets the mirrored set. Flat or unknown poses yield no
/// tag so the image keeps its native orientation.
pub fn resolve_orientation(
    position: CameraPosition,
    spatial: SpatialOrientation,
) -> Option<ImageOrientation> {
    use ImageOrientation::*;

    let rear = position == CameraPosition::Rear;
    match spatial {
        SpatialOrientation::LandscapeLeft => Some(if rear { Up } else { DownMirrored }),
        SpatialOrientation::LandscapeRight => Some(if rear { Down } else { UpMirrored }),
        SpatialOrientation::Portrait => Some(if rear { Left } else { RightMirrored }),
        SpatialOrientation::PortraitUpsideDown => Some(if rear { Right } else { LeftMirrored }),
        SpatialOrientation::FaceUp | SpatialOrientation::FaceDown | SpatialOrientation::Unknown => {
            None
        }
    }
}

/// Decode encoded photo bytes
pub fn decode_photo(bytes: &[u8], codec: PhotoCodec) -> Result<DynamicImage, CaptureError> {
    if bytes.is_empty() {
        return Err(CaptureError::NoImageData);
    }
    image::load_from_memory_with_format(bytes, codec.image_format())
        .map_err(|e| CaptureError::Decode(e.to_string()))
}

/// Encode an image the way a photo output would
pub fn encode_photo(image: &DynamicImage, codec: PhotoCodec) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), codec.image_format())?;
    Ok(bytes)
}

/// A decoded photo with its orientation tag and capture metadata
#[derive(Debug, Clone)]
pub struct TaggedImage {
    /// Capture request id
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    /// Pixels as delivered by the sensor
    pub image: DynamicImage,
    /// `None` keeps the native orientation
    pub orientation: Option<ImageOrientation>,
    /// Mount position of the input active when the capture completed
    pub position: CameraPosition,
    /// Device orientation read when the capture completed
    pub spatial_orientation: SpatialOrientation,
    pub flash_mode: FlashMode,
}

impl TaggedImage {
    /// EXIF orientation code (1 when untagged)
    pub fn exif_orientation(&self) -> u8 {
        self.orientation.map_or(1, |o| o.exif_value())
    }

    /// The image as a viewer should see it, with the tag applied to pixels
    pub fn upright(&self) -> DynamicImage {
        let mut image = self.image.clone();
        if let Some(orientation) = Orientation::from_exif(self.exif_orientation()) {
            image.apply_orientation(orientation);
        }
        image
    }
}
