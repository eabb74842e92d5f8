//! Centralized naming rules for URL paths and media files.
//!
//! Every place that turns user input into a stored path, or an image into a
//! file on disk, goes through this module so the conventions stay in one spot.
//!
//! ## URL paths
//!
//! Paths are normalized to a leading `/`, no repeated slashes and no trailing
//! slash except for the root. The canonical form is the lower-cased
//! normalization; that is what the database stores.
//!
//! - `news//today/` → `/news/today`
//! - `/Eagles` → canonical `/eagles`
//!
//! ## Media layout
//!
//! - Upload: `content/<kind>/<yymmdd-hhmmss>/<name>.<ext>`
//! - Image-scoped variant: `<dir>/<name>-variants/<key>/<name>.<ext>`
//! - Slot-scoped variant: `<dir>/<name>-variants/<slot-model>-<slot-id>-<key>/<name>.<ext>`

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Model key used in slot-scoped variant directory names.
pub const IMAGE_SLOT_MODEL: &str = "imageslot";

/// Normalize a URL path: leading `/`, collapsed `//`, no trailing `/` except root.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}

/// The stored form of a path: normalized and lower-cased.
pub fn canonical_path(path: &str) -> String {
    normalize_path(path).to_lowercase()
}

/// Every proper ancestor of `path`, nearest first, ending with `/`.
///
/// `/news/2024/today` → `["/news/2024", "/news", "/"]`; the root has none.
pub fn ancestors(path: &str) -> Vec<String> {
    let normalized = normalize_path(path);
    let mut out = Vec::new();
    let mut current = normalized.as_str();
    while let Some(pos) = current.rfind('/') {
        if current == "/" {
            break;
        }
        current = if pos == 0 { "/" } else { &current[..pos] };
        out.push(current.to_string());
    }
    out
}

/// Whether `path` lies strictly below `root`.
pub fn is_descendant(path: &str, root: &str) -> bool {
    if root == "/" {
        return path != "/";
    }
    path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'/'
}

/// Replace anything outside `[a-z0-9._-]` with `-` and lower-case the rest.
///
/// An empty result becomes `file` so uploads always get a name.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Directory (relative to the media root) an upload of `kind` lands in.
pub fn upload_dir(kind: &str, at: NaiveDateTime) -> PathBuf {
    PathBuf::from("content")
        .join(kind)
        .join(at.format("%y%m%d-%H%M%S").to_string())
}

/// `<dir>/<stem>-variants` for an original at `original`.
pub fn variants_root(original: &Path) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = original.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!("{stem}-variants"))
}

/// Directory name of a slot-scoped variant.
pub fn slot_variant_dir(slot_id: i64, key: &str) -> String {
    format!("{IMAGE_SLOT_MODEL}-{slot_id}-{key}")
}

/// Prefix shared by every slot-scoped variant directory of one slot.
pub fn slot_variant_prefix(slot_id: i64) -> String {
    format!("{IMAGE_SLOT_MODEL}-{slot_id}-")
}

/// Final path of a variant whose directory under the variants root is `dir_name`.
pub fn variant_file(original: &Path, dir_name: &str) -> PathBuf {
    let file_name = original
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    variants_root(original).join(dir_name).join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    // =========================================================================
    // URL paths
    // =========================================================================

    #[test]
    fn normalize_adds_leading_slash() {
        assert_eq!(normalize_path("news"), "/news");
    }

    #[test]
    fn normalize_strips_trailing_slash() {
        assert_eq!(normalize_path("/news/today/"), "/news/today");
    }

    #[test]
    fn normalize_collapses_repeated_slashes() {
        assert_eq!(normalize_path("//news///today"), "/news/today");
    }

    #[test]
    fn normalize_keeps_root() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn normalize_preserves_case() {
        assert_eq!(normalize_path("/Eagles"), "/Eagles");
        assert_eq!(canonical_path("/Eagles/"), "/eagles");
    }

    #[test]
    fn ancestors_nearest_first() {
        assert_eq!(
            ancestors("/news/2024/today"),
            vec!["/news/2024", "/news", "/"]
        );
        assert_eq!(ancestors("/news"), vec!["/"]);
        assert!(ancestors("/").is_empty());
    }

    #[test]
    fn descendant_requires_segment_boundary() {
        assert!(is_descendant("/news/today", "/news"));
        assert!(!is_descendant("/newsletter", "/news"));
        assert!(!is_descendant("/news", "/news"));
        assert!(is_descendant("/anything", "/"));
        assert!(!is_descendant("/", "/"));
    }

    // =========================================================================
    // Media names
    // =========================================================================

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_file_name("My Photo (1).JPG"), "my-photo--1-.jpg");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_file_name("   "), "file");
    }

    #[test]
    fn upload_dir_uses_timestamp() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap();
        assert_eq!(
            upload_dir("image", at),
            PathBuf::from("content/image/240309-140507")
        );
    }

    #[test]
    fn image_scoped_variant_path() {
        let original = Path::new("content/image/240309-140507/bird.jpg");
        assert_eq!(
            variant_file(original, "small_thumb"),
            PathBuf::from("content/image/240309-140507/bird-variants/small_thumb/bird.jpg")
        );
    }

    #[test]
    fn slot_scoped_variant_path() {
        let original = Path::new("content/image/240309-140507/bird.jpg");
        assert_eq!(
            variant_file(original, &slot_variant_dir(12, "hero")),
            PathBuf::from("content/image/240309-140507/bird-variants/imageslot-12-hero/bird.jpg")
        );
        assert!(slot_variant_dir(12, "hero").starts_with(&slot_variant_prefix(12)));
        assert!(!slot_variant_dir(120, "hero").starts_with(&slot_variant_prefix(12)));
    }
}
