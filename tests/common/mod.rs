//! Fixtures shared by the integration suites.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::ops::Deref;
use swim::config::SiteConfig;
use swim::pipeline;
use swim::resource::{Resource, ResourceSpec};
use swim::resource_type::{ResourceTypeId, TypeSpec, save_type};
use swim::site::Site;
use swim::templates::{TemplateSpec, map_template, save_template};
use swim::types::{Request, Response};
use tempfile::TempDir;

/// A site over an in-memory database with a temporary media root.
pub struct Fixture {
    site: Site,
    pub media: TempDir,
}

impl Deref for Fixture {
    type Target = Site;

    fn deref(&self) -> &Site {
        &self.site
    }
}

pub fn site() -> Fixture {
    site_with(|_| {})
}

pub fn site_with(configure: impl FnOnce(&mut SiteConfig)) -> Fixture {
    let media = TempDir::new().unwrap();
    let mut config = SiteConfig::default();
    config.media.root = media.path().to_path_buf();
    configure(&mut config);
    Fixture {
        site: Site::in_memory(config).unwrap(),
        media,
    }
}

pub fn resource_type(site: &Site, key: &str) -> ResourceTypeId {
    site.store
        .write(|tx| save_type(tx, &TypeSpec::resource(key)))
        .unwrap()
        .id
}

/// Save a template for `payload` and map it to `type_id` at `order`.
pub fn template(
    site: &Site,
    type_id: ResourceTypeId,
    order: i64,
    spec: TemplateSpec,
) {
    site.store
        .write(|tx| {
            let template = save_template(tx, &spec)?;
            map_template(tx, type_id, template.id, order)
        })
        .unwrap();
}

pub fn page(site: &Site, title: &str, path: &str, type_id: ResourceTypeId) -> Resource {
    site.create_resource(&ResourceSpec::page(title, path, type_id))
        .unwrap()
}

pub fn get(site: &Site, path: &str) -> Response {
    pipeline::handle(site, &Request::get(path))
}

pub fn get_accepting(site: &Site, path: &str, accept: &str) -> Response {
    pipeline::handle(site, &Request::get(path).with_header("Accept", accept))
}

pub fn get_from_host(site: &Site, path: &str, host: &str) -> Response {
    pipeline::handle(site, &Request::get(path).with_header("Host", host))
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 90])
    }));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}
