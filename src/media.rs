//! Images, image types and derived variants.
//!
//! ## Where variants come from
//!
//! | Source | Applies to |
//! |---|---|
//! | `[images.variants]` in config | every image and image slot |
//! | [`Site::register_model_variants`] | images (`"image"`) or slots of one owner class |
//! | [`ImageType`] variant rows | slots whose payload names that image type |
//!
//! When two sources declare the same key the more specific one wins: image
//! type, then model, then config.
//!
//! ## Layout
//!
//! ```text
//! content/image/240301-101500/harbour.jpg                      original
//! content/image/240301-101500/harbour-variants/small/harbour.jpg image-scoped
//! content/image/240301-101500/harbour-variants/imageslot-7-hero/harbour.jpg
//! ```
//!
//! The third form is used only when slot 7 stored its own crop for `hero`.
//! Eager variants are rendered in parallel when an image or image slot is
//! saved; JIT variants on first access. A failed render is logged and the
//! configured placeholder URL is handed out instead.

use crate::cache::RequestCache;
use crate::content_type::{self, ContentTypeId, class, image_type_title};
use crate::entities::{self, FileRecord};
use crate::imaging::{
    Algorithm, BackendError, CropBox, Quality, VariantDecl, VariantOp, encode_options,
    ensure_variant, get_dimensions,
};
use crate::naming::{
    sanitize_file_name, slot_variant_dir, slot_variant_prefix, upload_dir, variant_file,
    variants_root,
};
use crate::site::Site;
use crate::slots::{Payload, Slot, SlotKind, delete_slots_referencing, slots_referencing};
use crate::store::{Store, StoreError};
use rayon::prelude::*;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("variant '{key}': {message}")]
    Variant { key: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageType {
    pub id: i64,
    pub key: String,
    pub title: String,
    pub content_type_id: ContentTypeId,
    pub variants: Vec<VariantDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: i64,
    /// Original, relative to the media root.
    pub path: String,
    pub alt: String,
    pub caption: String,
    pub link_url: String,
    pub folder: String,
    pub width: u32,
    pub height: u32,
}

/// Editable metadata of an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMeta {
    pub alt: String,
    pub caption: String,
    pub link_url: String,
    pub folder: String,
}

/// An image as seen through one slot.
#[derive(Debug, Clone)]
pub struct SlotImage {
    pub slot_id: i64,
    /// Class title of the slot's owner, for per-model variants.
    pub owner_class: Option<String>,
    pub image: ImageRecord,
    pub image_type: Option<Rc<ImageType>>,
    pub user_crop: BTreeMap<String, CropBox>,
}

fn check_decls(decls: &[VariantDecl]) -> Result<(), MediaError> {
    for decl in decls {
        decl.validate().map_err(|message| MediaError::Variant {
            key: decl.key.clone(),
            message,
        })?;
    }
    Ok(())
}

/// Append `more` to `decls`, skipping keys already declared.
fn layer(decls: &mut Vec<VariantDecl>, more: impl IntoIterator<Item = VariantDecl>) {
    for decl in more {
        if !decls.iter().any(|d| d.key == decl.key) {
            decls.push(decl);
        }
    }
}

fn relative_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// =============================================================================
// Image types
// =============================================================================

/// Create or redefine an image type. Variant rows not in `variants` are dropped.
pub fn save_image_type(
    conn: &Connection,
    key: &str,
    title: &str,
    variants: &[VariantDecl],
) -> Result<ImageType, StoreError> {
    for decl in variants {
        decl.validate()
            .map_err(|e| StoreError::Invalid(format!("variant {}: {e}", decl.key)))?;
    }
    let content_type_id = content_type::get_or_create(conn, &image_type_title(key), true)?;
    conn.execute(
        "INSERT INTO image_type (key, title, content_type_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET title = excluded.title",
        params![key, title, content_type_id],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM image_type WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )?;
    conn.execute("DELETE FROM image_variant WHERE image_type_id = ?1", params![id])?;
    for decl in variants {
        conn.execute(
            "INSERT INTO image_variant (image_type_id, key, algorithm, arguments, jit_generation)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                decl.key,
                decl.algorithm.as_str(),
                serde_json::to_string(&decl.arguments)?,
                decl.jit_generation,
            ],
        )?;
    }
    load_image_type(conn, id)
}

fn variants_of(conn: &Connection, image_type_id: i64) -> Result<Vec<VariantDecl>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT key, algorithm, arguments, jit_generation FROM image_variant
         WHERE image_type_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![image_type_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(key, algorithm, arguments, jit_generation)| {
            Ok(VariantDecl {
                algorithm: Algorithm::parse(&algorithm)
                    .ok_or_else(|| StoreError::Invalid(format!("unknown algorithm '{algorithm}'")))?,
                arguments: serde_json::from_str(&arguments)?,
                key,
                jit_generation,
            })
        })
        .collect()
}

pub fn load_image_type(conn: &Connection, id: i64) -> Result<ImageType, StoreError> {
    let (key, title, content_type_id) = conn
        .query_row(
            "SELECT key, title, content_type_id FROM image_type WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("image type", id))?;
    Ok(ImageType {
        id,
        key,
        title,
        content_type_id,
        variants: variants_of(conn, id)?,
    })
}

pub fn find_image_type(conn: &Connection, key: &str) -> Result<Option<ImageType>, StoreError> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM image_type WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|id| load_image_type(conn, id)).transpose()
}

pub fn all_image_types(conn: &Connection) -> Result<Vec<ImageType>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM image_type ORDER BY key")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    ids.into_iter().map(|id| load_image_type(conn, id)).collect()
}

/// Memoized [`load_image_type`].
pub fn cached_image_type(
    store: &Store,
    cache: &RequestCache,
    id: i64,
) -> Result<Rc<ImageType>, StoreError> {
    cache.image_type(id, || {
        store.read(|conn| load_image_type(conn, id)).map(Rc::new)
    })
}

// =============================================================================
// Image rows
// =============================================================================

const IMAGE_COLUMNS: &str = "id, path, alt, caption, link_url, folder, width, height FROM image";

fn row_to_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        alt: row.get(2)?,
        caption: row.get(3)?,
        link_url: row.get(4)?,
        folder: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
    })
}

pub fn insert_image(
    conn: &Connection,
    path: &str,
    meta: &ImageMeta,
    (width, height): (u32, u32),
) -> Result<ImageRecord, StoreError> {
    conn.execute(
        "INSERT INTO image (path, alt, caption, link_url, folder, width, height)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![path, meta.alt, meta.caption, meta.link_url, meta.folder, width, height],
    )?;
    load_image(conn, conn.last_insert_rowid())
}

pub fn load_image(conn: &Connection, id: i64) -> Result<ImageRecord, StoreError> {
    conn.query_row(
        &format!("SELECT {IMAGE_COLUMNS} WHERE id = ?1"),
        params![id],
        row_to_image,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("image", id))
}

pub fn update_image_meta(conn: &Connection, id: i64, meta: &ImageMeta) -> Result<ImageRecord, StoreError> {
    conn.execute(
        "UPDATE image SET alt = ?2, caption = ?3, link_url = ?4, folder = ?5 WHERE id = ?1",
        params![id, meta.alt, meta.caption, meta.link_url, meta.folder],
    )?;
    load_image(conn, id)
}

fn update_image_file(
    conn: &Connection,
    id: i64,
    path: &str,
    (width, height): (u32, u32),
) -> Result<ImageRecord, StoreError> {
    conn.execute(
        "UPDATE image SET path = ?2, width = ?3, height = ?4 WHERE id = ?1",
        params![id, path, width, height],
    )?;
    load_image(conn, id)
}

// =============================================================================
// Variant engine
// =============================================================================

/// One variant file to make.
#[derive(Debug, Clone)]
struct VariantJob {
    key: String,
    source: PathBuf,
    target: PathBuf,
    op: VariantOp,
    url: String,
    jit: bool,
}

fn remove_dir_if_present(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => debug!(dir = %dir.display(), "removed variant directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "could not remove variant directory"),
    }
}

impl Site {
    fn media_path(&self, relative: &str) -> PathBuf {
        self.config.media.root.join(relative)
    }

    /// Variants every standalone image gets.
    pub fn image_variants(&self) -> Vec<VariantDecl> {
        let mut decls = self.model_variants(class::IMAGE);
        layer(&mut decls, self.config.default_variants());
        decls
    }

    /// Variants of an image seen through a slot.
    pub fn slot_variants(&self, slot: &SlotImage) -> Vec<VariantDecl> {
        let mut decls = slot
            .image_type
            .as_ref()
            .map(|t| t.variants.clone())
            .unwrap_or_default();
        if let Some(owner_class) = &slot.owner_class {
            layer(&mut decls, self.model_variants(owner_class));
        }
        layer(&mut decls, self.config.default_variants());
        decls
    }

    fn job_for(
        &self,
        image: &ImageRecord,
        decl: &VariantDecl,
        user_crop: Option<&CropBox>,
        slot_id: Option<i64>,
    ) -> Result<VariantJob, MediaError> {
        let op = decl.op(user_crop).map_err(|message| MediaError::Variant {
            key: decl.key.clone(),
            message,
        })?;
        let dir_name = match (slot_id, user_crop) {
            (Some(slot_id), Some(_)) if decl.algorithm == Algorithm::Crop => {
                slot_variant_dir(slot_id, &decl.key)
            }
            _ => decl.key.clone(),
        };
        let relative = variant_file(Path::new(&image.path), &dir_name);
        Ok(VariantJob {
            key: decl.key.clone(),
            source: self.media_path(&image.path),
            target: self.config.media.root.join(&relative),
            op,
            url: self.config.media.url_for(&relative),
            jit: decl.jit_generation,
        })
    }

    fn image_jobs(&self, image: &ImageRecord) -> Vec<VariantJob> {
        self.image_variants()
            .iter()
            .filter_map(|decl| self.job_for(image, decl, None, None).ok())
            .collect()
    }

    fn slot_jobs(&self, slot: &SlotImage) -> Vec<VariantJob> {
        self.slot_variants(slot)
            .iter()
            .filter_map(|decl| {
                self.job_for(&slot.image, decl, slot.user_crop.get(&decl.key), Some(slot.slot_id))
                    .ok()
            })
            .collect()
    }

    fn realize(&self, job: &VariantJob) -> Result<bool, BackendError> {
        let images = &self.config.images;
        let encode = encode_options(&job.target, Quality::new(images.jpeg_quality), images.jpeg_optimize)?;
        ensure_variant(self.backend.as_ref(), &job.source, &job.target, job.op, encode)
    }

    fn url_or_placeholder(&self, job: Result<VariantJob, MediaError>) -> String {
        let outcome = job.and_then(|job| {
            self.realize(&job)?;
            Ok(job.url)
        });
        match outcome {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "variant generation failed, serving placeholder");
                self.config.images.placeholder_url.clone()
            }
        }
    }

    /// Render every non-JIT job, in parallel. Failures are logged only.
    fn generate_eager(&self, jobs: Vec<VariantJob>) -> usize {
        let generated: usize = jobs
            .par_iter()
            .filter(|job| !job.jit)
            .map(|job| match self.realize(job) {
                Ok(made) => usize::from(made),
                Err(e) => {
                    warn!(variant = %job.key, target = %job.target.display(), error = %e, "eager variant failed");
                    0
                }
            })
            .sum();
        debug!(generated, "eager variants done");
        generated
    }

    /// URL of variant `key` of a standalone image, generating it if needed.
    pub fn image_variant_url(&self, image: &ImageRecord, key: &str) -> String {
        let decl = self.image_variants().into_iter().find(|d| d.key == key);
        self.url_or_placeholder(match decl {
            Some(decl) => self.job_for(image, &decl, None, None),
            None => Err(MediaError::Variant {
                key: key.to_string(),
                message: "not declared for images".into(),
            }),
        })
    }

    /// URL of variant `key` of the image in a slot, generating it if needed.
    pub fn slot_variant_url(&self, slot: &SlotImage, key: &str) -> String {
        let decl = self.slot_variants(slot).into_iter().find(|d| d.key == key);
        self.url_or_placeholder(match decl {
            Some(decl) => self.job_for(&slot.image, &decl, slot.user_crop.get(key), Some(slot.slot_id)),
            None => Err(MediaError::Variant {
                key: key.to_string(),
                message: "not declared for this slot".into(),
            }),
        })
    }

    // =========================================================================
    // Image types and model variants
    // =========================================================================

    pub fn save_image_type(
        &self,
        key: &str,
        title: &str,
        variants: &[VariantDecl],
    ) -> Result<ImageType, MediaError> {
        check_decls(variants)?;
        let image_type = self
            .store
            .write(|tx| save_image_type(tx, key, title, variants))?;
        self.register_image_type_atom(&image_type);
        info!(key, variants = variants.len(), "saved image type");
        Ok(image_type)
    }

    /// Extra variants for images (`class = "image"`) or for image slots owned
    /// by entities of `class`.
    pub fn register_model_variants(&self, class: &str, variants: Vec<VariantDecl>) -> Result<(), MediaError> {
        check_decls(&variants)?;
        self.set_model_variants(class, variants);
        Ok(())
    }

    // =========================================================================
    // Uploads
    // =========================================================================

    /// Store `bytes` under a fresh upload directory; returns the relative path.
    fn store_upload(&self, kind: &str, file_name: &str, bytes: &[u8]) -> Result<String, MediaError> {
        let dir = upload_dir(kind, chrono::Local::now().naive_local());
        let mut name = sanitize_file_name(file_name);
        if self.config.media.root.join(&dir).join(&name).exists() {
            name = format!("{}-{name}", &Uuid::new_v4().simple().to_string()[..8]);
        }
        let relative = dir.join(&name);
        let absolute = self.config.media.root.join(&relative);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&absolute, bytes)?;
        Ok(relative_str(&relative))
    }

    fn identify_upload(&self, relative: &str) -> Result<(u32, u32), MediaError> {
        let absolute = self.media_path(relative);
        get_dimensions(self.backend.as_ref(), &absolute).map_err(|e| {
            let _ = fs::remove_file(&absolute);
            MediaError::from(e)
        })
    }

    /// Upload an image and render its eager variants.
    pub fn save_image(&self, file_name: &str, bytes: &[u8], meta: &ImageMeta) -> Result<ImageRecord, MediaError> {
        let relative = self.store_upload(class::IMAGE, file_name, bytes)?;
        let dims = self.identify_upload(&relative)?;
        let image = self
            .store
            .write(|tx| insert_image(tx, &relative, meta, dims))?;
        info!(id = image.id, path = %image.path, width = dims.0, height = dims.1, "saved image");
        self.generate_eager(self.image_jobs(&image));
        Ok(image)
    }

    /// Swap the file behind an image. Every variant of the old file is
    /// deleted; eager variants of the image and of every slot showing it are
    /// rendered again.
    pub fn replace_image_file(&self, image_id: i64, file_name: &str, bytes: &[u8]) -> Result<ImageRecord, MediaError> {
        let old = self.store.read(|conn| load_image(conn, image_id))?;
        let relative = self.store_upload(class::IMAGE, file_name, bytes)?;
        let dims = self.identify_upload(&relative)?;
        let (image, slots) = self.store.write(|tx| {
            let image = update_image_file(tx, image_id, &relative, dims)?;
            Ok((image, slots_referencing(tx, SlotKind::Image, image_id)?))
        })?;

        let old_original = self.media_path(&old.path);
        remove_dir_if_present(&variants_root(&old_original));
        if let Err(e) = fs::remove_file(&old_original)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %old_original.display(), error = %e, "could not remove replaced original");
        }

        let mut jobs = self.image_jobs(&image);
        for slot in &slots {
            if let Some(view) = self.slot_image(slot)? {
                jobs.extend(self.slot_jobs(&view));
            }
        }
        self.generate_eager(jobs);
        info!(id = image_id, path = %image.path, "replaced image file");
        Ok(image)
    }

    /// Delete an image, its file, every variant and every slot showing it.
    pub fn delete_image(&self, image_id: i64) -> Result<(), MediaError> {
        let (image, slots) = self.store.write(|tx| {
            let image = load_image(tx, image_id)?;
            let slots = delete_slots_referencing(tx, SlotKind::Image, image_id)?;
            tx.execute("DELETE FROM image WHERE id = ?1", params![image_id])?;
            Ok((image, slots))
        })?;
        let original = self.media_path(&image.path);
        remove_dir_if_present(&variants_root(&original));
        if let Err(e) = fs::remove_file(&original)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %original.display(), error = %e, "could not remove original");
        }
        info!(id = image_id, slots = slots.len(), "deleted image");
        Ok(())
    }

    /// Upload a file for file slots.
    pub fn save_file(&self, title: &str, file_name: &str, bytes: &[u8]) -> Result<FileRecord, MediaError> {
        let relative = self.store_upload(class::FILE, file_name, bytes)?;
        Ok(self
            .store
            .write(|tx| entities::create_file(tx, title, &relative))?)
    }

    // =========================================================================
    // Image slots
    // =========================================================================

    /// The image behind an image slot, with its variant context.
    ///
    /// `None` for other kinds of slot.
    pub fn slot_image(&self, slot: &Slot) -> Result<Option<SlotImage>, StoreError> {
        let Payload::Image {
            image_id,
            image_type_id,
            user_variant_crop,
        } = &slot.payload
        else {
            return Ok(None);
        };
        let (image, image_type, owner_class) = self.store.read(|conn| {
            Ok((
                load_image(conn, *image_id)?,
                image_type_id.map(|id| load_image_type(conn, id)).transpose()?,
                match self.classes.title_for(slot.owner.type_id) {
                    Some(title) => title,
                    None => content_type::title_of(conn, slot.owner.type_id)?,
                },
            ))
        })?;
        Ok(Some(SlotImage {
            slot_id: slot.id,
            owner_class: Some(owner_class),
            image,
            image_type: image_type.map(Rc::new),
            user_crop: user_variant_crop.clone(),
        }))
    }

    /// Render the eager variants of a freshly saved image slot.
    pub(crate) fn generate_slot_variants(&self, slot: &Slot) -> Result<usize, StoreError> {
        Ok(match self.slot_image(slot)? {
            Some(view) => self.generate_eager(self.slot_jobs(&view)),
            None => 0,
        })
    }

    /// Delete the files image slots caused to exist: their slot-scoped
    /// crops, and the image-scoped files of their image type's keys that
    /// nothing outside `slots` still declares.
    pub(crate) fn discard_slot_files(&self, slots: &[Slot]) {
        let leaving: BTreeSet<i64> = slots.iter().map(|s| s.id).collect();
        for slot in slots {
            let view = match self.slot_image(slot) {
                Ok(Some(view)) => view,
                Ok(None) => continue,
                Err(e) => {
                    debug!(slot = slot.id, error = %e, "no image left behind slot");
                    continue;
                }
            };
            self.discard_view_files(&view, &leaving);
        }
    }

    fn discard_view_files(&self, view: &SlotImage, leaving: &BTreeSet<i64>) {
        let root = variants_root(&self.media_path(&view.image.path));
        let prefix = slot_variant_prefix(view.slot_id);
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir())
        {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                remove_dir_if_present(entry.path());
            }
        }
        let Some(image_type) = &view.image_type else {
            return;
        };
        let in_use = match self.keys_in_use(view.image.id, leaving) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(image = view.image.id, error = %e, "could not check shared variants, keeping them");
                return;
            }
        };
        for decl in &image_type.variants {
            if in_use.contains(&decl.key) {
                debug!(image = view.image.id, key = %decl.key, "variant still shown elsewhere");
            } else {
                remove_dir_if_present(&root.join(&decl.key));
            }
        }
    }

    /// Variant keys of image `image_id` still declared by the image itself
    /// or by an image slot outside `leaving`.
    fn keys_in_use(&self, image_id: i64, leaving: &BTreeSet<i64>) -> Result<BTreeSet<String>, StoreError> {
        let mut keys: BTreeSet<String> = self.image_variants().into_iter().map(|d| d.key).collect();
        let showing = self
            .store
            .read(|conn| slots_referencing(conn, SlotKind::Image, image_id))?;
        for slot in showing.iter().filter(|s| !leaving.contains(&s.id)) {
            if let Some(view) = self.slot_image(slot)? {
                keys.extend(self.slot_variants(&view).into_iter().map(|d| d.key));
            }
        }
        Ok(keys)
    }
}
