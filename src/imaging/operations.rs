//! High-level image operations.
//!
//! These functions combine a [`VariantOp`] with backend execution and own the
//! on-disk protocol for variant files: a variant is rendered into a private
//! temp file next to its final name and renamed into place, so a reader never
//! sees a partial file and concurrent writers of the same variant simply race
//! to an identical result.

use super::backend::{BackendError, ImageBackend};
use super::params::{
    CropAndScaleParams, CropParams, EncodeOptions, OutputFormat, Quality, ThumbnailParams,
    VariantOp,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &dyn ImageBackend, path: &Path) -> Result<(u32, u32)> {
    let dims = backend.identify(path)?;
    Ok((dims.width, dims.height))
}

/// Encoder settings for a variant written to `target`.
pub fn encode_options(target: &Path, quality: Quality, optimize: bool) -> Result<EncodeOptions> {
    let format = OutputFormat::from_path(target).ok_or_else(|| {
        BackendError::ProcessingFailed(format!(
            "Unsupported output format: {}",
            target.display()
        ))
    })?;
    Ok(EncodeOptions {
        format,
        quality,
        optimize,
    })
}

/// Temp name for a variant in progress: `.<basename>.<uuid>.tmp`, same directory.
pub fn temp_path(target: &Path) -> PathBuf {
    let basename = target
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = target.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!(".{basename}.{}.tmp", Uuid::new_v4()))
}

/// Run one operation, writing straight to `output`.
pub fn run_op(
    backend: &dyn ImageBackend,
    source: &Path,
    output: &Path,
    op: VariantOp,
    encode: EncodeOptions,
) -> Result<()> {
    let source = source.to_path_buf();
    let output = output.to_path_buf();
    match op {
        VariantOp::Thumbnail { width, height } => backend.thumbnail(&ThumbnailParams {
            source,
            output,
            width,
            height,
            encode,
        }),
        VariantOp::Crop { width, height } => backend.crop(&CropParams {
            source,
            output,
            width,
            height,
            encode,
        }),
        VariantOp::CropAndScale {
            crop,
            width,
            height,
        } => backend.crop_and_scale(&CropAndScaleParams {
            source,
            output,
            crop,
            width,
            height,
            encode,
        }),
    }
}

/// Make sure the variant at `target` exists.
///
/// Returns `Ok(false)` when the file was already there, `Ok(true)` when this
/// call generated it. On failure no file is left behind at the temp name.
pub fn ensure_variant(
    backend: &dyn ImageBackend,
    source: &Path,
    target: &Path,
    op: VariantOp,
    encode: EncodeOptions,
) -> Result<bool> {
    if target.exists() {
        return Ok(false);
    }
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = temp_path(target);
    let outcome = run_op(backend, source, &tmp, op, encode)
        .and_then(|()| fs::rename(&tmp, target).map_err(BackendError::Io));
    if let Err(e) = outcome {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    debug!(target = %target.display(), "generated variant");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Dimensions;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp, jpeg_options};
    use crate::imaging::params::CropBox;
    use tempfile::TempDir;

    fn leftover_temps(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn get_dimensions_calls_backend() {
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 1920,
            height: 1080,
        }]);

        let dims = get_dimensions(&backend, Path::new("/test.jpg")).unwrap();
        assert_eq!(dims, (1920, 1080));
    }

    #[test]
    fn temp_path_is_hidden_and_unique() {
        let target = Path::new("/media/a-variants/small/a.jpg");
        let one = temp_path(target);
        let two = temp_path(target);
        assert_ne!(one, two);
        assert_eq!(one.parent(), target.parent());
        let name = one.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".a.jpg."));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn encode_options_follow_extension() {
        let opts = encode_options(Path::new("x/a.png"), Quality::new(70), false).unwrap();
        assert_eq!(opts.format, OutputFormat::Png);
        assert!(encode_options(Path::new("x/a"), Quality::new(70), false).is_err());
    }

    #[test]
    fn ensure_variant_generates_then_reuses() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a-variants/small/a.jpg");
        let backend = MockBackend::new();
        let op = VariantOp::Thumbnail {
            width: 10,
            height: 10,
        };

        assert!(ensure_variant(&backend, Path::new("/a.jpg"), &target, op, jpeg_options()).unwrap());
        assert!(target.exists());
        assert!(!ensure_variant(&backend, Path::new("/a.jpg"), &target, op, jpeg_options()).unwrap());
        assert_eq!(backend.get_operations().len(), 1);
        assert!(leftover_temps(target.parent().unwrap()).is_empty());
    }

    #[test]
    fn ensure_variant_cleans_up_after_failure() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a-variants/small/a.jpg");
        let backend = MockBackend::failing();
        let op = VariantOp::Crop {
            width: 10,
            height: 10,
        };

        let result = ensure_variant(&backend, Path::new("/a.jpg"), &target, op, jpeg_options());
        assert!(result.is_err());
        assert!(!target.exists());
        assert!(leftover_temps(target.parent().unwrap()).is_empty());
    }

    #[test]
    fn run_op_dispatches_crop_and_scale() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new();
        let op = VariantOp::CropAndScale {
            crop: CropBox {
                left: 1,
                top: 2,
                right: 3,
                bottom: 4,
            },
            width: 5,
            height: 6,
        };
        run_op(&backend, Path::new("/a.jpg"), &tmp.path().join("o.jpg"), op, jpeg_options())
            .unwrap();
        assert!(matches!(
            &backend.get_operations()[0],
            RecordedOp::CropAndScale {
                crop: (1, 2, 3, 4),
                width: 5,
                height: 6,
                ..
            }
        ));
    }

    #[test]
    fn concurrent_generation_leaves_one_file() {
        use rayon::prelude::*;
        use std::sync::Arc;

        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.jpg");
        crate::test_helpers::write_test_jpeg(&source, 320, 240);
        let target = tmp.path().join("a-variants/small/a.jpg");
        let backend = Arc::new(crate::imaging::RustBackend::new());
        let op = VariantOp::Thumbnail {
            width: 64,
            height: 64,
        };

        (0..8).into_par_iter().for_each(|_| {
            ensure_variant(backend.as_ref(), &source, &target, op, jpeg_options()).unwrap();
        });

        let dir = target.parent().unwrap();
        let names: Vec<_> = fs::read_dir(dir).unwrap().filter_map(|e| e.ok()).collect();
        assert_eq!(names.len(), 1);
        assert!(leftover_temps(dir).is_empty());
        let (w, h) = get_dimensions(backend.as_ref(), &target).unwrap();
        assert_eq!((w, h), (64, 48));
    }
}
