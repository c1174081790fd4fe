use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }

    /// Output format matching a decoded source format, if one exists
    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
            image::ImageFormat::Png => Some(OutputFormat::Png),
            image::ImageFormat::WebP => Some(OutputFormat::Webp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "amount")]
pub enum ImageFilter {
    Grayscale,
    Sepia,
    /// -1.0 (black) to 1.0 (white)
    Brightness(f32),
    /// Percentage, negative values reduce contrast
    Contrast(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// In (0, 1]; only the JPEG encoder is lossy
    pub quality: f32,
    pub output_format: OutputFormat,
    pub maintain_aspect_ratio: bool,
    /// RGBA fill painted before the image is drawn
    pub background_fill: Option<[u8; 4]>,
    pub strip_metadata: bool,
    pub make_thumbnail: bool,
    pub thumbnail_size: u32,
    pub filter: Option<ImageFilter>,
    pub allow_upscale: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            quality: 0.85,
            output_format: OutputFormat::Jpeg,
            maintain_aspect_ratio: true,
            background_fill: None,
            strip_metadata: true,
            make_thumbnail: false,
            thumbnail_size: 150,
            filter: None,
            allow_upscale: false,
        }
    }
}

impl TransformOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.quality > 0.0 && self.quality <= 1.0) {
            return Err(format!("quality {} is outside (0, 1]", self.quality));
        }
        if self.max_width == 0 || self.max_height == 0 {
            return Err("maximum dimensions must be non-zero".to_string());
        }
        if self.make_thumbnail && self.thumbnail_size == 0 {
            return Err("thumbnail size must be non-zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub bytes: Bytes,
    pub format: OutputFormat,
    pub dimensions: Dimensions,
}

impl ImageAsset {
    pub fn byte_length(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformMetadata {
    pub original_dimensions: Dimensions,
    pub output_dimensions: Dimensions,
    pub original_byte_length: u64,
    pub output_byte_length: u64,
    /// Original length divided by output length; below 1 when the output grew
    pub compression_ratio: f64,
}

impl TransformMetadata {
    /// Percentage of bytes saved, negative when the output grew
    pub fn size_reduction_percent(&self) -> f64 {
        if self.original_byte_length == 0 {
            return 0.0;
        }
        (1.0 - self.output_byte_length as f64 / self.original_byte_length as f64) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformedFile {
    pub primary: ImageAsset,
    pub thumbnail: Option<ImageAsset>,
    pub metadata: TransformMetadata,
}
