//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the high-level [`operations`](super::operations) module
//! (which decides which variant to produce and where) and the
//! [`backend`](super::backend) (which does the pixel work). This separation
//! allows swapping backends (e.g. for testing with a mock) without changing
//! operation logic.
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 85). Clamped on construction.
//! - [`Algorithm`]: `thumbnail`, `crop` or `crop_and_scale`.
//! - [`VariantDecl`]: a declared variant `(key, algorithm, arguments, jit_generation)`.
//! - [`VariantOp`]: a validated, ready-to-run operation derived from a declaration.
//! - [`ThumbnailParams`], [`CropParams`], [`CropAndScaleParams`]: one backend call each.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// Output container, picked from the variant file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    /// Anything else the `image` crate can write, by extension.
    Other(image::ImageFormat),
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "gif" => Some(OutputFormat::Gif),
            other => image::ImageFormat::from_extension(other).map(OutputFormat::Other),
        }
    }
}

/// Encoder settings shared by every variant of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub format: OutputFormat,
    pub quality: Quality,
    /// Spend extra effort for smaller output (PNG compression, GIF quantizer).
    pub optimize: bool,
}

/// Variant generation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// `[width, height]`: fit inside the box, aspect preserved.
    Thumbnail,
    /// `[width, height]`: downscale to cover, then centre-crop.
    Crop,
    /// `[left, top, right, bottom, width, height]`: absolute crop, then scale.
    CropAndScale,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Thumbnail => "thumbnail",
            Algorithm::Crop => "crop",
            Algorithm::CropAndScale => "crop_and_scale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "thumbnail" => Some(Algorithm::Thumbnail),
            "crop" => Some(Algorithm::Crop),
            "crop_and_scale" => Some(Algorithm::CropAndScale),
            _ => None,
        }
    }

    /// Number of integer arguments the algorithm takes.
    pub fn arity(self) -> usize {
        match self {
            Algorithm::Thumbnail | Algorithm::Crop => 2,
            Algorithm::CropAndScale => 6,
        }
    }
}

/// Absolute crop rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// A variant as declared by config, a model or an image type row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDecl {
    pub key: String,
    pub algorithm: Algorithm,
    pub arguments: Vec<u32>,
    pub jit_generation: bool,
}

impl VariantDecl {
    pub fn validate(&self) -> Result<(), String> {
        self.op(None).map(|_| ())
    }

    /// Resolve into a runnable operation.
    ///
    /// A `crop` declaration becomes `crop_and_scale` when the slot stored a
    /// user crop for this key.
    pub fn op(&self, user_crop: Option<&CropBox>) -> Result<VariantOp, String> {
        let args = &self.arguments;
        if args.len() != self.algorithm.arity() {
            return Err(format!(
                "{} takes {} arguments, got {}",
                self.algorithm.as_str(),
                self.algorithm.arity(),
                args.len()
            ));
        }
        let op = match self.algorithm {
            Algorithm::Thumbnail => VariantOp::Thumbnail {
                width: args[0],
                height: args[1],
            },
            Algorithm::Crop => match user_crop {
                Some(crop) => VariantOp::CropAndScale {
                    crop: *crop,
                    width: args[0],
                    height: args[1],
                },
                None => VariantOp::Crop {
                    width: args[0],
                    height: args[1],
                },
            },
            Algorithm::CropAndScale => VariantOp::CropAndScale {
                crop: CropBox {
                    left: args[0],
                    top: args[1],
                    right: args[2],
                    bottom: args[3],
                },
                width: args[4],
                height: args[5],
            },
        };
        op.check()?;
        Ok(op)
    }
}

/// A validated variant operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantOp {
    Thumbnail { width: u32, height: u32 },
    Crop { width: u32, height: u32 },
    CropAndScale { crop: CropBox, width: u32, height: u32 },
}

impl VariantOp {
    fn check(&self) -> Result<(), String> {
        let (width, height) = match self {
            VariantOp::Thumbnail { width, height } | VariantOp::Crop { width, height } => {
                (*width, *height)
            }
            VariantOp::CropAndScale {
                crop,
                width,
                height,
            } => {
                if crop.width() == 0 || crop.height() == 0 {
                    return Err(format!(
                        "empty crop box ({}, {}, {}, {})",
                        crop.left, crop.top, crop.right, crop.bottom
                    ));
                }
                (*width, *height)
            }
        };
        if width == 0 || height == 0 {
            return Err("target width and height must be positive".into());
        }
        Ok(())
    }
}

/// Parameters for a thumbnail operation (fit inside the box).
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub encode: EncodeOptions,
}

/// Parameters for a crop operation (cover, then centre-crop).
#[derive(Debug, Clone, PartialEq)]
pub struct CropParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub encode: EncodeOptions,
}

/// Parameters for an absolute crop followed by a scale to exact size.
#[derive(Debug, Clone, PartialEq)]
pub struct CropAndScaleParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub crop: CropBox,
    pub width: u32,
    pub height: u32,
    pub encode: EncodeOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(algorithm: Algorithm, arguments: &[u32]) -> VariantDecl {
        VariantDecl {
            key: "k".into(),
            algorithm,
            arguments: arguments.to_vec(),
            jit_generation: false,
        }
    }

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_85() {
        assert_eq!(Quality::default().value(), 85);
    }

    #[test]
    fn algorithm_names_round_trip() {
        for alg in [Algorithm::Thumbnail, Algorithm::Crop, Algorithm::CropAndScale] {
            assert_eq!(Algorithm::parse(alg.as_str()), Some(alg));
        }
        assert_eq!(Algorithm::parse("sharpen"), None);
    }

    #[test]
    fn wrong_arity_rejected() {
        assert!(decl(Algorithm::Thumbnail, &[100]).validate().is_err());
        assert!(decl(Algorithm::CropAndScale, &[0, 0, 10, 10]).validate().is_err());
    }

    #[test]
    fn zero_size_rejected() {
        assert!(decl(Algorithm::Crop, &[0, 100]).validate().is_err());
        assert!(
            decl(Algorithm::CropAndScale, &[10, 10, 10, 50, 20, 20])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn user_crop_upgrades_crop() {
        let crop = CropBox {
            left: 10,
            top: 20,
            right: 110,
            bottom: 70,
        };
        let op = decl(Algorithm::Crop, &[50, 25]).op(Some(&crop)).unwrap();
        assert_eq!(
            op,
            VariantOp::CropAndScale {
                crop,
                width: 50,
                height: 25
            }
        );
    }

    #[test]
    fn user_crop_ignored_for_thumbnail() {
        let crop = CropBox {
            left: 0,
            top: 0,
            right: 10,
            bottom: 10,
        };
        let op = decl(Algorithm::Thumbnail, &[50, 25]).op(Some(&crop)).unwrap();
        assert_eq!(
            op,
            VariantOp::Thumbnail {
                width: 50,
                height: 25
            }
        );
    }

    #[test]
    fn output_format_from_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("a/b.JPG")),
            Some(OutputFormat::Jpeg)
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("b.png")),
            Some(OutputFormat::Png)
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("b.webp")),
            Some(OutputFormat::Other(image::ImageFormat::WebP))
        );
        assert_eq!(OutputFormat::from_path(Path::new("b")), None);
    }
}
