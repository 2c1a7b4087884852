//! Edit request and result value types.

pub mod classifier;

pub use classifier::{EditTask, classify, normalize_prompt};

use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Decoded source image. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pixels: Arc<DynamicImage>,
}

impl SourceImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            pixels: Arc::new(image),
        }
    }

    /// Decode an encoded image (PNG or JPEG).
    pub fn decode(data: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self::new(image::load_from_memory(data)?))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }
}

/// Requested output dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale down so the longest edge is at most `max_edge`, keeping aspect.
    pub fn clamp_to(self, max_edge: u32) -> Self {
        let longest = self.width.max(self.height);
        if longest <= max_edge || longest == 0 {
            return self;
        }
        let scale = max_edge as f64 / longest as f64;
        Self {
            width: ((self.width as f64 * scale).round() as u32).max(1),
            height: ((self.height as f64 * scale).round() as u32).max(1),
        }
    }
}

/// Output-affecting options. All of these participate in the cache key
/// except `priority`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOptions {
    /// Output size; `None` keeps the source size.
    pub target_size: Option<TargetSize>,
    /// Encoder quality, 1-100.
    pub quality: u8,
    /// Stamp a watermark on the result.
    pub watermark: bool,
    /// Ask providers for their priority lane.
    #[serde(default)]
    pub priority: bool,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            target_size: None,
            quality: 90,
            watermark: false,
            priority: false,
        }
    }
}

/// A request to edit one image.
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub image: SourceImage,
    pub prompt: Option<String>,
    /// Skip classification and use this task.
    pub task: Option<EditTask>,
    pub options: EditOptions,
    /// Restrict routing to a single provider id.
    pub provider: Option<String>,
}

impl EditRequest {
    pub fn new(image: SourceImage) -> Self {
        Self {
            image,
            prompt: None,
            task: None,
            options: EditOptions::default(),
            provider: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_task(mut self, task: EditTask) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_options(mut self, options: EditOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider = Some(provider_id.into());
        self
    }

    pub fn prompt_text(&self) -> &str {
        self.prompt.as_deref().unwrap_or("")
    }
}

/// The artifact a provider produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedImage {
    pub data: Bytes,
    pub content_type: String,
}

impl EditedImage {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_small_sizes() {
        let size = TargetSize::new(800, 600);
        assert_eq!(size.clamp_to(2048), size);
    }

    #[test]
    fn clamp_preserves_aspect() {
        let size = TargetSize::new(4000, 3000).clamp_to(2000);
        assert_eq!(size, TargetSize::new(2000, 1500));
        let tall = TargetSize::new(1000, 5000).clamp_to(1000);
        assert_eq!(tall, TargetSize::new(200, 1000));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(SourceImage::decode(b"not an image").is_err());
    }

    #[test]
    fn request_builder_sets_fields() {
        let image = SourceImage::new(DynamicImage::new_rgb8(4, 4));
        let req = EditRequest::new(image)
            .with_prompt("sharpen")
            .with_task(EditTask::Style)
            .with_provider("on-device");
        assert_eq!(req.prompt_text(), "sharpen");
        assert_eq!(req.task, Some(EditTask::Style));
        assert_eq!(req.provider.as_deref(), Some("on-device"));
    }
}
