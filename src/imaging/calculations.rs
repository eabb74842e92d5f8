//! Pure calculation functions for variant dimensions.
//!
//! All functions here are pure and testable without any I/O or images.
//! None of them ever asks for more pixels than the source has.

use super::params::CropBox;

/// Calculate dimensions needed to fill a target area (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `target` - Target area dimensions (width, height)
///
/// # Returns
/// * `(width, height)` - Fill dimensions (at least one matches target)
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = (h as f64 * src_aspect).round() as u32;
        (w, h)
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = (w as f64 / src_aspect).round() as u32;
        (w, h)
    }
}

/// Dimensions of a `thumbnail(w, h)`: the largest aspect-preserving size that
/// fits inside the box. A source that already fits is left alone.
///
/// ```
/// # use swim::imaging::fit_within;
/// assert_eq!(fit_within((800, 600), (200, 200)), (200, 150));
/// assert_eq!(fit_within((100, 50), (200, 200)), (100, 50));
/// ```
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;
    if src_w <= max_w && src_h <= max_h {
        return source;
    }
    let scale = (max_w as f64 / src_w as f64).min(max_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, max_w);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, max_h);
    (w, h)
}

/// How a `crop(w, h)` is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropPlan {
    /// Intermediate size to scale the source to; `None` keeps the source as is.
    pub resize: Option<(u32, u32)>,
    /// Centred window `(x, y, width, height)` taken from the (resized) image.
    pub window: (u32, u32, u32, u32),
}

/// Plan a `crop(w, h)`.
///
/// When the box fits inside the source, the source is first scaled down to
/// the smallest size that still covers the box, so the crop keeps as much of
/// the picture as possible. Otherwise the source is not scaled and the centred
/// window is clipped to the source.
pub fn crop_plan(source: (u32, u32), target: (u32, u32)) -> CropPlan {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    if tgt_w <= src_w && tgt_h <= src_h {
        let (fill_w, fill_h) = calculate_fill_dimensions(source, target);
        let (fill_w, fill_h) = (fill_w.clamp(tgt_w, src_w), fill_h.clamp(tgt_h, src_h));
        let resize = ((fill_w, fill_h) != source).then_some((fill_w, fill_h));
        CropPlan {
            resize,
            window: centred((fill_w, fill_h), (tgt_w, tgt_h)),
        }
    } else {
        let w = tgt_w.min(src_w);
        let h = tgt_h.min(src_h);
        CropPlan {
            resize: None,
            window: centred(source, (w, h)),
        }
    }
}

fn centred(outer: (u32, u32), inner: (u32, u32)) -> (u32, u32, u32, u32) {
    (
        (outer.0 - inner.0) / 2,
        (outer.1 - inner.1) / 2,
        inner.0,
        inner.1,
    )
}

/// Clip a user crop box to the source bounds, as `(x, y, width, height)`.
///
/// Returns `None` when nothing of the box lies inside the source.
pub fn clip_crop(source: (u32, u32), crop: &CropBox) -> Option<(u32, u32, u32, u32)> {
    let left = crop.left.min(source.0);
    let top = crop.top.min(source.1);
    let right = crop.right.min(source.0);
    let bottom = crop.bottom.min(source.1);
    if right <= left || bottom <= top {
        return None;
    }
    Some((left, top, right - left, bottom - top))
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // calculate_fill_dimensions tests
    // =========================================================================

    #[test]
    fn fill_wider_source_to_portrait_target() {
        // 800x600 (4:3) → 400x500 target
        // Source is wider, so height matches: 500, width = 500 * (4/3) = 667
        assert_eq!(calculate_fill_dimensions((800, 600), (400, 500)), (667, 500));
    }

    #[test]
    fn fill_taller_source_to_landscape_target() {
        assert_eq!(calculate_fill_dimensions((600, 800), (500, 400)), (500, 667));
    }

    #[test]
    fn fill_same_aspect_ratio() {
        assert_eq!(calculate_fill_dimensions((800, 600), (400, 300)), (400, 300));
    }

    // =========================================================================
    // fit_within tests
    // =========================================================================

    #[test]
    fn fit_landscape_into_square() {
        assert_eq!(fit_within((800, 600), (200, 200)), (200, 150));
    }

    #[test]
    fn fit_portrait_into_square() {
        assert_eq!(fit_within((600, 800), (200, 200)), (150, 200));
    }

    #[test]
    fn fit_never_upscales() {
        assert_eq!(fit_within((120, 80), (400, 400)), (120, 80));
    }

    #[test]
    fn fit_extreme_aspect_keeps_one_pixel() {
        assert_eq!(fit_within((10_000, 10), (100, 100)), (100, 1));
    }

    // =========================================================================
    // crop_plan tests
    // =========================================================================

    #[test]
    fn crop_scales_down_before_cropping() {
        // 800x600 → 200x200: cover at 267x200, then centre 200x200
        let plan = crop_plan((800, 600), (200, 200));
        assert_eq!(plan.resize, Some((267, 200)));
        assert_eq!(plan.window, (33, 0, 200, 200));
    }

    #[test]
    fn crop_exact_size_is_noop_resize() {
        let plan = crop_plan((200, 100), (200, 100));
        assert_eq!(plan.resize, None);
        assert_eq!(plan.window, (0, 0, 200, 100));
    }

    #[test]
    fn crop_larger_than_source_clips_without_upscaling() {
        let plan = crop_plan((100, 80), (300, 50));
        assert_eq!(plan.resize, None);
        assert_eq!(plan.window, (0, 15, 100, 50));
    }

    // =========================================================================
    // clip_crop tests
    // =========================================================================

    #[test]
    fn clip_inside_source() {
        let crop = CropBox {
            left: 10,
            top: 10,
            right: 60,
            bottom: 40,
        };
        assert_eq!(clip_crop((100, 100), &crop), Some((10, 10, 50, 30)));
    }

    #[test]
    fn clip_overhanging_box() {
        let crop = CropBox {
            left: 80,
            top: 0,
            right: 200,
            bottom: 50,
        };
        assert_eq!(clip_crop((100, 100), &crop), Some((80, 0, 20, 50)));
    }

    #[test]
    fn clip_outside_source_is_none() {
        let crop = CropBox {
            left: 150,
            top: 0,
            right: 200,
            bottom: 50,
        };
        assert_eq!(clip_crop((100, 100), &crop), None);
    }
}
