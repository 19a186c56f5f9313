//! Size reduction for large uploads before they are sent anywhere.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};

/// Images at or above this size are re-encoded.
pub const DOWNSCALE_THRESHOLD_BYTES: usize = 1024 * 1024;

/// Longest edge after downscaling, in pixels.
pub const MAX_EDGE_PX: u32 = 1920;

pub const JPEG_QUALITY: u8 = 80;

pub fn needs_downscale(len: usize) -> bool {
    len >= DOWNSCALE_THRESHOLD_BYTES
}

/// Compute dimensions that fit within `max_edge` while preserving aspect ratio.
/// Never upscales.
pub fn compute_fit_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }

    let scale = (max_edge as f32 / width as f32).min(max_edge as f32 / height as f32);
    let scale = scale.min(1.0);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, max_edge);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, max_edge);

    (new_w, new_h)
}

/// Decode, fit within [`MAX_EDGE_PX`], and re-encode as JPEG.
///
/// CPU-bound: callers run this on the blocking pool. `abandoned` is checked
/// between decode, resize and encode; once set, the rest is skipped and
/// `Ok(None)` comes back. A phase already under way runs to completion.
pub fn downscale_to_jpeg(
    bytes: &[u8],
    abandoned: &AtomicBool,
) -> Result<Option<Vec<u8>>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    if abandoned.load(Ordering::Relaxed) {
        return Ok(None);
    }

    let (width, height) = (img.width(), img.height());
    let (new_w, new_h) = compute_fit_dimensions(width, height, MAX_EDGE_PX);

    let img = if (new_w, new_h) == (width, height) {
        img
    } else {
        img.resize_exact(new_w, new_h, FilterType::Triangle)
    };
    if abandoned.load(Ordering::Relaxed) {
        return Ok(None);
    }

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut cursor = Cursor::new(Vec::new());
    rgb.write_to(&mut cursor, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;

    tracing::debug!(
        from_w = width,
        from_h = height,
        to_w = new_w,
        to_h = new_h,
        "Downscaled upload"
    );

    Ok(Some(cursor.into_inner()))
}
