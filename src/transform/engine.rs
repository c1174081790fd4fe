use crate::transform::error::{TransformError, TransformResult};
use crate::transform::types::{
    Dimensions, ImageAsset, ImageFilter, OutputFormat, TransformMetadata, TransformOptions,
    TransformedFile,
};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Target size for a source image under the given limits.
///
/// With aspect ratio kept the image is scaled by a single factor that fits
/// both limits, never above 1 unless upscaling is allowed. Otherwise the
/// limits are used as-is.
pub fn compute_target_dimensions(original: Dimensions, options: &TransformOptions) -> Dimensions {
    if !options.maintain_aspect_ratio {
        return Dimensions::new(options.max_width.max(1), options.max_height.max(1));
    }

    let width = original.width.max(1) as f64;
    let height = original.height.max(1) as f64;
    let mut factor = (options.max_width as f64 / width).min(options.max_height as f64 / height);
    if !options.allow_upscale {
        factor = factor.min(1.0);
    }

    Dimensions::new(
        ((width * factor).round() as u32).max(1),
        ((height * factor).round() as u32).max(1),
    )
}

/// Stateless image transformer; every call renders onto its own surface
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTransformer;

impl ImageTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Transform on the blocking pool
    pub async fn transform(
        &self,
        source: Bytes,
        options: TransformOptions,
        cancel: &CancellationToken,
    ) -> TransformResult<TransformedFile> {
        if cancel.is_cancelled() {
            return Err(TransformError::Cancelled);
        }

        let transformer = *self;
        let handle =
            tokio::task::spawn_blocking(move || transformer.transform_blocking(&source, &options));

        tokio::select! {
            _ = cancel.cancelled() => Err(TransformError::Cancelled),
            joined = handle => joined.map_err(|e| TransformError::Task(e.to_string()))?,
        }
    }

    /// Decode, render, encode and optionally thumbnail in one pass
    pub fn transform_blocking(
        &self,
        source: &[u8],
        options: &TransformOptions,
    ) -> TransformResult<TransformedFile> {
        options.validate().map_err(TransformError::InvalidOptions)?;
        let start = Instant::now();

        let decoded = image::load_from_memory(source).map_err(TransformError::Decode)?;
        let original = Dimensions::new(decoded.width(), decoded.height());
        let target = compute_target_dimensions(original, options);

        let rendered = render(&decoded, target, options);
        let primary = encode(rendered, options.output_format, options.quality)?;

        let thumbnail = if options.make_thumbnail {
            let rendered = render_thumbnail(&decoded, options);
            Some(encode(rendered, options.output_format, options.quality)?)
        } else {
            None
        };

        let output_byte_length = primary.byte_length();
        let metadata = TransformMetadata {
            original_dimensions: original,
            output_dimensions: primary.dimensions,
            original_byte_length: source.len() as u64,
            output_byte_length,
            compression_ratio: source.len() as f64 / output_byte_length.max(1) as f64,
        };

        tracing::debug!(
            "Transformed {}x{} -> {}x{} {} ({} -> {} bytes)",
            original.width,
            original.height,
            primary.dimensions.width,
            primary.dimensions.height,
            primary.format.extension(),
            metadata.original_byte_length,
            metadata.output_byte_length
        );
        crate::metrics::recorder::record_transform(start.elapsed(), metadata.compression_ratio);

        Ok(TransformedFile {
            primary,
            thumbnail,
            metadata,
        })
    }

    /// Fit within the limits, re-encoding in the source format at full quality
    pub fn resize_only(
        &self,
        source: &[u8],
        max_width: u32,
        max_height: u32,
    ) -> TransformResult<TransformedFile> {
        let format = image::guess_format(source)
            .ok()
            .and_then(OutputFormat::from_image_format)
            .unwrap_or(OutputFormat::Png);

        self.transform_blocking(
            source,
            &TransformOptions {
                max_width,
                max_height,
                quality: 1.0,
                output_format: format,
                ..TransformOptions::default()
            },
        )
    }

    /// Re-encode at the original size
    pub fn convert_format(
        &self,
        source: &[u8],
        format: OutputFormat,
        quality: f32,
    ) -> TransformResult<TransformedFile> {
        let (width, height) = source_dimensions(source)?;
        self.transform_blocking(
            source,
            &TransformOptions {
                max_width: width,
                max_height: height,
                quality,
                output_format: format,
                ..TransformOptions::default()
            },
        )
    }

    /// Apply a filter at the original size and format
    pub fn apply_filter(&self, source: &[u8], filter: ImageFilter) -> TransformResult<TransformedFile> {
        let (width, height) = source_dimensions(source)?;
        let format = image::guess_format(source)
            .ok()
            .and_then(OutputFormat::from_image_format)
            .unwrap_or(OutputFormat::Png);

        self.transform_blocking(
            source,
            &TransformOptions {
                max_width: width,
                max_height: height,
                quality: 1.0,
                output_format: format,
                filter: Some(filter),
                ..TransformOptions::default()
            },
        )
    }
}

fn source_dimensions(source: &[u8]) -> TransformResult<(u32, u32)> {
    let decoded = image::load_from_memory(source).map_err(TransformError::Decode)?;
    Ok((decoded.width().max(1), decoded.height().max(1)))
}

/// Fresh RGBA surface of the given size
fn surface(width: u32, height: u32, fill: Option<[u8; 4]>) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(fill.unwrap_or([0, 0, 0, 0])))
}

fn render(source: &DynamicImage, target: Dimensions, options: &TransformOptions) -> DynamicImage {
    let scaled = source
        .resize_exact(target.width, target.height, FilterType::Lanczos3)
        .to_rgba8();

    let mut canvas = surface(target.width, target.height, options.background_fill);
    imageops::overlay(&mut canvas, &scaled, 0, 0);

    apply(DynamicImage::ImageRgba8(canvas), options.filter)
}

/// Centered square crop drawn into a thumbnail-sized surface
fn render_thumbnail(source: &DynamicImage, options: &TransformOptions) -> DynamicImage {
    let side = source.width().min(source.height()).max(1);
    let x = source.width().saturating_sub(side) / 2;
    let y = source.height().saturating_sub(side) / 2;
    let size = options.thumbnail_size;

    let scaled = source
        .crop_imm(x, y, side, side)
        .resize_exact(size, size, FilterType::Lanczos3)
        .to_rgba8();

    let mut canvas = surface(size, size, options.background_fill);
    imageops::overlay(&mut canvas, &scaled, 0, 0);

    apply(DynamicImage::ImageRgba8(canvas), options.filter)
}

fn apply(image: DynamicImage, filter: Option<ImageFilter>) -> DynamicImage {
    match filter {
        None => image,
        Some(ImageFilter::Grayscale) => DynamicImage::ImageRgba8(image.grayscale().to_rgba8()),
        Some(ImageFilter::Sepia) => {
            let mut pixels = image.to_rgba8();
            for pixel in pixels.pixels_mut() {
                let [r, g, b, a] = pixel.0;
                let (r, g, b) = (r as f32, g as f32, b as f32);
                let tone = |cr: f32, cg: f32, cb: f32| (r * cr + g * cg + b * cb).min(255.0) as u8;
                pixel.0 = [
                    tone(0.393, 0.769, 0.189),
                    tone(0.349, 0.686, 0.168),
                    tone(0.272, 0.534, 0.131),
                    a,
                ];
            }
            DynamicImage::ImageRgba8(pixels)
        }
        Some(ImageFilter::Brightness(amount)) => {
            image.brighten((amount.clamp(-1.0, 1.0) * 255.0).round() as i32)
        }
        Some(ImageFilter::Contrast(amount)) => image.adjust_contrast(amount),
    }
}

fn encode(image: DynamicImage, format: OutputFormat, quality: f32) -> TransformResult<ImageAsset> {
    let dimensions = Dimensions::new(image.width(), image.height());
    let mut buffer = Vec::new();

    let written = match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel
            let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
        }
        OutputFormat::Png => image.write_with_encoder(PngEncoder::new(&mut buffer)),
        OutputFormat::Webp => image.write_with_encoder(WebPEncoder::new_lossless(&mut buffer)),
    };
    written.map_err(TransformError::Encode)?;

    Ok(ImageAsset {
        bytes: Bytes::from(buffer),
        format,
        dimensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn decode(asset: &ImageAsset) -> DynamicImage {
        image::load_from_memory(&asset.bytes).unwrap()
    }

    #[test]
    fn test_target_dimensions_keep_aspect_ratio() {
        let options = TransformOptions {
            max_width: 300,
            max_height: 300,
            ..TransformOptions::default()
        };
        let target = compute_target_dimensions(Dimensions::new(1200, 800), &options);
        assert_eq!(target, Dimensions::new(300, 200));

        let target = compute_target_dimensions(Dimensions::new(1000, 3000), &options);
        assert_eq!(target, Dimensions::new(100, 300));
    }

    #[test]
    fn test_target_dimensions_never_upscale_by_default() {
        let options = TransformOptions {
            max_width: 300,
            max_height: 300,
            ..TransformOptions::default()
        };
        let target = compute_target_dimensions(Dimensions::new(64, 32), &options);
        assert_eq!(target, Dimensions::new(64, 32));

        let upscale = TransformOptions {
            allow_upscale: true,
            ..options
        };
        let target = compute_target_dimensions(Dimensions::new(64, 32), &upscale);
        assert_eq!(target, Dimensions::new(300, 150));
    }

    #[test]
    fn test_target_dimensions_minimum_one_pixel() {
        let options = TransformOptions {
            max_width: 10,
            max_height: 10,
            ..TransformOptions::default()
        };
        let target = compute_target_dimensions(Dimensions::new(5000, 2), &options);
        assert_eq!(target, Dimensions::new(10, 1));
    }

    #[test]
    fn test_target_dimensions_without_aspect_ratio() {
        let options = TransformOptions {
            max_width: 120,
            max_height: 40,
            maintain_aspect_ratio: false,
            ..TransformOptions::default()
        };
        let target = compute_target_dimensions(Dimensions::new(50, 50), &options);
        assert_eq!(target, Dimensions::new(120, 40));
    }

    #[test]
    fn test_aspect_ratio_within_one_pixel() {
        let options = TransformOptions {
            max_width: 300,
            max_height: 300,
            ..TransformOptions::default()
        };
        for (w, h) in [(1920, 1080), (333, 1000), (1001, 999), (4000, 37)] {
            let target = compute_target_dimensions(Dimensions::new(w, h), &options);
            let expected_height = target.width as f64 * h as f64 / w as f64;
            assert!((target.height as f64 - expected_height).abs() <= 1.0, "{w}x{h}");
            assert!(target.width <= 300 && target.height <= 300);
        }
    }

    #[test]
    fn test_transform_to_webp_with_thumbnail() {
        let source = png_fixture(600, 400);
        let options = TransformOptions {
            max_width: 300,
            max_height: 300,
            output_format: OutputFormat::Webp,
            make_thumbnail: true,
            thumbnail_size: 80,
            ..TransformOptions::default()
        };

        let result = ImageTransformer::new()
            .transform_blocking(&source, &options)
            .unwrap();

        assert_eq!(result.primary.format, OutputFormat::Webp);
        assert_eq!(result.primary.dimensions, Dimensions::new(300, 200));
        let decoded = decode(&result.primary);
        assert_eq!((decoded.width(), decoded.height()), (300, 200));

        let thumbnail = result.thumbnail.unwrap();
        assert_eq!(thumbnail.dimensions, Dimensions::new(80, 80));
        assert_eq!(
            image::guess_format(&thumbnail.bytes).unwrap(),
            image::ImageFormat::WebP
        );

        assert_eq!(result.metadata.original_dimensions, Dimensions::new(600, 400));
        assert_eq!(result.metadata.original_byte_length, source.len() as u64);
        assert!(result.metadata.compression_ratio > 0.0);
    }

    #[test]
    fn test_jpeg_output_from_transparent_source() {
        let image = RgbaImage::from_pixel(40, 40, Rgba([255, 0, 0, 0]));
        let mut source = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut source), image::ImageFormat::Png)
            .unwrap();

        let options = TransformOptions {
            background_fill: Some([255, 255, 255, 255]),
            quality: 0.9,
            ..TransformOptions::default()
        };
        let result = ImageTransformer::new()
            .transform_blocking(&source, &options)
            .unwrap();

        let decoded = decode(&result.primary).to_rgb8();
        let pixel = decoded.get_pixel(20, 20);
        // Fully transparent source pixels show the white background
        assert!(pixel.0.iter().all(|&c| c > 240));
    }

    #[test]
    fn test_decode_failure() {
        let err = ImageTransformer::new()
            .transform_blocking(b"not an image", &TransformOptions::default())
            .unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
    }

    #[test]
    fn test_invalid_options() {
        let source = png_fixture(10, 10);
        for options in [
            TransformOptions {
                quality: 0.0,
                ..TransformOptions::default()
            },
            TransformOptions {
                quality: 1.5,
                ..TransformOptions::default()
            },
            TransformOptions {
                max_width: 0,
                ..TransformOptions::default()
            },
        ] {
            let err = ImageTransformer::new()
                .transform_blocking(&source, &options)
                .unwrap_err();
            assert!(matches!(err, TransformError::InvalidOptions(_)));
        }
    }

    #[test]
    fn test_resize_only_keeps_source_format() {
        let source = png_fixture(200, 100);
        let result = ImageTransformer::new().resize_only(&source, 50, 50).unwrap();

        assert_eq!(result.primary.format, OutputFormat::Png);
        assert_eq!(result.primary.dimensions, Dimensions::new(50, 25));
    }

    #[test]
    fn test_convert_format_keeps_size() {
        let source = png_fixture(64, 48);
        let result = ImageTransformer::new()
            .convert_format(&source, OutputFormat::Jpeg, 0.7)
            .unwrap();

        assert_eq!(result.primary.format, OutputFormat::Jpeg);
        assert_eq!(result.primary.dimensions, Dimensions::new(64, 48));
        assert_eq!(
            image::guess_format(&result.primary.bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_grayscale_filter() {
        let source = png_fixture(16, 16);
        let result = ImageTransformer::new()
            .apply_filter(&source, ImageFilter::Grayscale)
            .unwrap();

        let decoded = decode(&result.primary).to_rgba8();
        for pixel in decoded.pixels() {
            let [r, g, b, _] = pixel.0;
            assert_eq!(r, g);
            assert_eq!(g, b);
        }
    }

    #[test]
    fn test_sepia_and_brightness_filters() {
        let source = png_fixture(8, 8);
        let transformer = ImageTransformer::new();

        let sepia = transformer.apply_filter(&source, ImageFilter::Sepia).unwrap();
        let pixel = decode(&sepia.primary).to_rgba8().get_pixel(4, 4).0;
        assert!(pixel[0] >= pixel[1] && pixel[1] >= pixel[2]);

        let bright = transformer
            .apply_filter(&source, ImageFilter::Brightness(1.0))
            .unwrap();
        let pixel = decode(&bright.primary).to_rgba8().get_pixel(0, 0).0;
        assert_eq!(&pixel[..3], &[255, 255, 255]);
    }

    #[tokio::test]
    async fn test_async_transform() {
        let source = Bytes::from(png_fixture(120, 60));
        let cancel = CancellationToken::new();

        let result = ImageTransformer::new()
            .transform(source, TransformOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(result.primary.dimensions, Dimensions::new(120, 60));
    }

    #[tokio::test]
    async fn test_cancelled_before_entry() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ImageTransformer::new()
            .transform(Bytes::from(png_fixture(4, 4)), TransformOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Cancelled));
    }
}
