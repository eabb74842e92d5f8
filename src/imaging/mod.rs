//! Image processing for derived variants.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Thumbnail** | fit-within + `resize_exact` (Lanczos3) |
//! | **Crop** | cover-resize + centred `crop_imm` |
//! | **Crop and scale** | absolute `crop_imm` + `resize_exact` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: Temp-file-and-rename protocol around backend calls

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{crop_plan, fit_within};
pub use operations::{encode_options, ensure_variant, get_dimensions};
pub use params::{Algorithm, CropBox, EncodeOptions, OutputFormat, Quality, VariantDecl, VariantOp};
pub use rust_backend::RustBackend;
