//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image::ImageReader` with guessed format |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Crop | `DynamicImage::crop_imm` |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` on an RGB8 copy |
//! | Encode → PNG | `PngEncoder::new_with_quality`, RGBA8 when the layout needs it |
//! | Encode → GIF | `GifEncoder::new_with_speed` |
//! | Encode → other | `DynamicImage::write_to` by extension |
//!
//! Target sizes come from [`calculations`](super::calculations); this module
//! only moves pixels.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::{clip_crop, crop_plan, fit_within};
use super::params::{CropAndScaleParams, CropParams, EncodeOptions, OutputFormat, ThumbnailParams};
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ExtendedColorType, ImageReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

fn resize_if_needed(img: DynamicImage, (w, h): (u32, u32)) -> DynamicImage {
    if img.width() == w && img.height() == h {
        img
    } else {
        img.resize_exact(w, h, FilterType::Lanczos3)
    }
}

/// PNG can store these layouts directly; anything else goes out as RGBA8.
fn png_compatible(color: ColorType) -> bool {
    matches!(
        color,
        ColorType::L8
            | ColorType::La8
            | ColorType::Rgb8
            | ColorType::Rgba8
            | ColorType::L16
            | ColorType::La16
            | ColorType::Rgb16
            | ColorType::Rgba16
    )
}

/// Encode `img` to `path` according to `encode`.
fn save_image(img: &DynamicImage, path: &Path, encode: &EncodeOptions) -> Result<(), BackendError> {
    let file = File::create(path).map_err(BackendError::Io)?;
    let mut writer = BufWriter::new(file);
    let quality = encode.quality.value() as u8;

    let result = match encode.format {
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
        }
        OutputFormat::Png => {
            let compression = if encode.optimize {
                CompressionType::Best
            } else {
                CompressionType::Default
            };
            let encoder = PngEncoder::new_with_quality(&mut writer, compression, PngFilter::Adaptive);
            if png_compatible(img.color()) {
                img.write_with_encoder(encoder)
            } else {
                DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)
            }
        }
        OutputFormat::Gif => {
            let speed = if encode.optimize { 1 } else { 10 };
            let rgba = img.to_rgba8();
            GifEncoder::new_with_speed(&mut writer, speed).encode(
                rgba.as_raw(),
                rgba.width(),
                rgba.height(),
                ExtendedColorType::Rgba8,
            )
        }
        OutputFormat::Other(format) => img.write_to(&mut writer, format),
    };

    result.map_err(|e| {
        BackendError::ProcessingFailed(format!("Encode failed for {}: {}", path.display(), e))
    })
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
        })?;
        Ok(Dimensions { width, height })
    }

    fn thumbnail(&self, params: &ThumbnailParams) -> Result<(), BackendError> {
        let img = load_image(&params.source)?;
        let size = fit_within((img.width(), img.height()), (params.width, params.height));
        let resized = resize_if_needed(img, size);
        save_image(&resized, &params.output, &params.encode)
    }

    fn crop(&self, params: &CropParams) -> Result<(), BackendError> {
        let img = load_image(&params.source)?;
        let plan = crop_plan((img.width(), img.height()), (params.width, params.height));
        let scaled = match plan.resize {
            Some(size) => resize_if_needed(img, size),
            None => img,
        };
        let (x, y, w, h) = plan.window;
        save_image(&scaled.crop_imm(x, y, w, h), &params.output, &params.encode)
    }

    fn crop_and_scale(&self, params: &CropAndScaleParams) -> Result<(), BackendError> {
        let img = load_image(&params.source)?;
        let (x, y, w, h) = clip_crop((img.width(), img.height()), &params.crop).ok_or_else(|| {
            BackendError::ProcessingFailed(format!(
                "Crop box lies outside {}x{} source",
                img.width(),
                img.height()
            ))
        })?;
        let cropped = img.crop_imm(x, y, w, h);
        let scaled = resize_if_needed(cropped, (params.width, params.height));
        save_image(&scaled, &params.output, &params.encode)
    }
}
