//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the four operations every backend must
//! support: identify, thumbnail, crop, and crop_and_scale.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use the recording `MockBackend` below.

use super::params::{CropAndScaleParams, CropParams, ThumbnailParams};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// Backends write straight to `params.output`; the caller owns temp naming
/// and the final rename. Implementations are shared across request workers
/// and rayon threads, hence `Send + Sync`.
pub trait ImageBackend: Send + Sync {
    /// Get image dimensions.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Scale to fit inside `width × height`, aspect preserved, never upscaling.
    fn thumbnail(&self, params: &ThumbnailParams) -> Result<(), BackendError>;

    /// Scale down to cover `width × height`, then centre-crop.
    fn crop(&self, params: &CropParams) -> Result<(), BackendError>;

    /// Crop an absolute rectangle, then scale to exactly `width × height`.
    fn crop_and_scale(&self, params: &CropAndScaleParams) -> Result<(), BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::params::{EncodeOptions, OutputFormat, Quality};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Mock backend that records operations and writes a stub output file.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    #[derive(Default)]
    pub struct MockBackend {
        pub identify_results: Mutex<Vec<Dimensions>>,
        pub operations: Mutex<Vec<RecordedOp>>,
        /// When set, every render writes a partial file and then fails.
        pub fail: AtomicBool,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(String),
        Thumbnail {
            source: String,
            output: String,
            width: u32,
            height: u32,
            quality: u32,
        },
        Crop {
            source: String,
            output: String,
            width: u32,
            height: u32,
        },
        CropAndScale {
            source: String,
            output: String,
            crop: (u32, u32, u32, u32),
            width: u32,
            height: u32,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_dimensions(dims: Vec<Dimensions>) -> Self {
            Self {
                identify_results: Mutex::new(dims),
                ..Self::default()
            }
        }

        pub fn failing() -> Self {
            let backend = Self::default();
            backend.fail.store(true, Ordering::SeqCst);
            backend
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        fn finish(&self, output: &Path, op: RecordedOp) -> Result<(), BackendError> {
            self.operations.lock().unwrap().push(op);
            std::fs::write(output, b"mock")?;
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::ProcessingFailed("mock failure".into()));
            }
            Ok(())
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify(path.to_string_lossy().to_string()));

            self.identify_results
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| BackendError::ProcessingFailed("No mock dimensions".to_string()))
        }

        fn thumbnail(&self, params: &ThumbnailParams) -> Result<(), BackendError> {
            self.finish(
                &params.output,
                RecordedOp::Thumbnail {
                    source: params.source.to_string_lossy().to_string(),
                    output: params.output.to_string_lossy().to_string(),
                    width: params.width,
                    height: params.height,
                    quality: params.encode.quality.value(),
                },
            )
        }

        fn crop(&self, params: &CropParams) -> Result<(), BackendError> {
            self.finish(
                &params.output,
                RecordedOp::Crop {
                    source: params.source.to_string_lossy().to_string(),
                    output: params.output.to_string_lossy().to_string(),
                    width: params.width,
                    height: params.height,
                },
            )
        }

        fn crop_and_scale(&self, params: &CropAndScaleParams) -> Result<(), BackendError> {
            let c = params.crop;
            self.finish(
                &params.output,
                RecordedOp::CropAndScale {
                    source: params.source.to_string_lossy().to_string(),
                    output: params.output.to_string_lossy().to_string(),
                    crop: (c.left, c.top, c.right, c.bottom),
                    width: params.width,
                    height: params.height,
                },
            )
        }
    }

    pub fn jpeg_options() -> EncodeOptions {
        EncodeOptions {
            format: OutputFormat::Jpeg,
            quality: Quality::new(85),
            optimize: true,
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 800,
            height: 600,
        }]);

        let result = backend.identify(Path::new("/test/image.jpg")).unwrap();
        assert_eq!(result.width, 800);
        assert_eq!(result.height, 600);

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], RecordedOp::Identify(p) if p == "/test/image.jpg"));
    }

    #[test]
    fn mock_records_thumbnail_and_writes_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = tmp.path().join("thumb.jpg");
        let backend = MockBackend::new();

        backend
            .thumbnail(&ThumbnailParams {
                source: "/source.jpg".into(),
                output: output.clone(),
                width: 150,
                height: 150,
                encode: jpeg_options(),
            })
            .unwrap();

        assert!(output.exists());
        let ops = backend.get_operations();
        assert!(matches!(
            &ops[0],
            RecordedOp::Thumbnail {
                width: 150,
                height: 150,
                quality: 85,
                ..
            }
        ));
    }

    #[test]
    fn failing_mock_leaves_partial_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = tmp.path().join("crop.jpg");
        let backend = MockBackend::failing();

        let result = backend.crop(&CropParams {
            source: "/source.jpg".into(),
            output: output.clone(),
            width: 10,
            height: 10,
            encode: jpeg_options(),
        });
        assert!(result.is_err());
        assert!(output.exists());
    }
}
