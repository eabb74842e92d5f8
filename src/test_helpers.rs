//! Shared test utilities for the swim test suite.
//!
//! [`TestSite`] is a [`Site`] over an in-memory database with a temporary
//! media root and one resource type (`default`) ready to hang templates on.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = TestSite::new();
//! site.template("page.txt", "text/plain", "{{ resource.title }}");
//! site.page("Eagles", "/eagles");
//! ```
//!
//! The image writers produce small real files for backends that decode.

use std::io::Cursor;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use image::{DynamicImage, ImageFormat, RgbImage};

use crate::config::SiteConfig;
use crate::imaging::{ImageBackend, RustBackend};
use crate::imaging::backend::tests::{MockBackend, RecordedOp};
use crate::resource::{Resource, ResourceSpec};
use crate::resource_type::{ResourceTypeId, TypeSpec, save_type};
use crate::site::Site;
use crate::store::Store;
use crate::templates::{Template, TemplateSpec, map_template, save_template};

// =========================================================================
// Image files
// =========================================================================

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    gradient(width, height)
        .save_with_format(path, ImageFormat::Jpeg)
        .unwrap();
}

pub fn write_test_png(path: &Path, width: u32, height: u32) {
    gradient(width, height)
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

/// An encoded JPEG, as an upload would arrive.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    gradient(width, height)
        .write_to(&mut out, ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

// =========================================================================
// Sites
// =========================================================================

pub struct TestSite {
    site: Site,
    media: TempDir,
    pub default_type: ResourceTypeId,
    mock: Option<Arc<MockBackend>>,
}

impl TestSite {
    pub fn new() -> Self {
        Self::build(|_| {}, None)
    }

    /// A site whose image operations are recorded instead of performed.
    pub fn with_backend(backend: MockBackend) -> Self {
        Self::build(|_| {}, Some(Arc::new(backend)))
    }

    pub fn with_config(configure: impl FnOnce(&mut SiteConfig)) -> Self {
        Self::build(configure, None)
    }

    fn build(configure: impl FnOnce(&mut SiteConfig), mock: Option<Arc<MockBackend>>) -> Self {
        let media = TempDir::new().unwrap();
        let mut config = SiteConfig::default();
        config.media.root = media.path().to_path_buf();
        configure(&mut config);
        let backend: Arc<dyn ImageBackend> = match &mock {
            Some(mock) => Arc::clone(mock) as Arc<dyn ImageBackend>,
            None => Arc::new(RustBackend::new()),
        };
        let site = Site::new(config, Store::open_in_memory().unwrap(), backend).unwrap();
        let default_type = site
            .store
            .write(|tx| save_type(tx, &TypeSpec::resource("default")))
            .unwrap()
            .id;
        Self {
            site,
            media,
            default_type,
            mock,
        }
    }

    pub fn media_root(&self) -> &Path {
        self.media.path()
    }

    /// Operations the mock backend saw. Panics for real-backend sites.
    pub fn mock_operations(&self) -> Vec<RecordedOp> {
        self.mock
            .as_ref()
            .expect("site was not built with a mock backend")
            .get_operations()
    }

    /// Save a resource-payload template and map it to the default type.
    pub fn template(&self, path: &str, mime: &str, body: &str) -> Template {
        self.site
            .store
            .write(|tx| {
                let template = save_template(tx, &TemplateSpec::new(path, mime, body))?;
                map_template(tx, self.default_type, template.id, 0)?;
                Ok(template)
            })
            .unwrap()
    }

    /// A `GET` page of the default type.
    pub fn page(&self, title: &str, path: &str) -> Resource {
        self.page_of_type(title, path, self.default_type)
    }

    pub fn page_of_type(&self, title: &str, path: &str, type_id: ResourceTypeId) -> Resource {
        self.site
            .create_resource(&ResourceSpec::page(title, path, type_id))
            .unwrap()
    }
}

impl Deref for TestSite {
    type Target = Site;

    fn deref(&self) -> &Site {
        &self.site
    }
}
