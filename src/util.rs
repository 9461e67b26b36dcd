use image::{
    imageops::{self, FilterType},
    GrayImage,
};
use tracing::instrument;

use crate::{BoundingBox, PixelBuffer};

/// Returns an empty box when nothing is drawn.
#[instrument(level = "trace", skip(buffer))]
pub fn ink_bounds(buffer: &PixelBuffer, threshold: u8) -> BoundingBox {
    let mut min = (u32::MAX, u32::MAX);
    let mut max = (0, 0);
    let mut found = false;

    for (x, y, pixel) in buffer.as_gray().enumerate_pixels() {
        if pixel[0] > threshold {
            found = true;
            min = (min.0.min(x), min.1.min(y));
            max = (max.0.max(x), max.1.max(y));
        }
    }

    if !found {
        return BoundingBox::default();
    }
    BoundingBox {
        x: min.0,
        y: min.1,
        width: max.0 - min.0 + 1,
        height: max.1 - min.1 + 1,
    }
}

/// An empty box gives a transparent buffer.
#[instrument(level = "debug", skip(buffer))]
pub fn normalize(
    buffer: &PixelBuffer,
    bounds: BoundingBox,
    size: u32,
    fill_ratio: f32,
) -> PixelBuffer {
    let mut canvas = GrayImage::new(size, size);
    if bounds.is_empty() || size == 0 {
        return PixelBuffer::from_alpha(canvas);
    }

    let target = size as f32 * fill_ratio;
    let scale = (target / bounds.width as f32).min(target / bounds.height as f32);
    let scaled_width = ((bounds.width as f32 * scale).round() as u32).clamp(1, size);
    let scaled_height = ((bounds.height as f32 * scale).round() as u32).clamp(1, size);
    let offset_x = ((size - scaled_width) as f32 / 2.0).round() as i64;
    let offset_y = ((size - scaled_height) as f32 / 2.0).round() as i64;
    log::trace!(
        "Normalizing {bounds:?} by {scale} to {scaled_width}x{scaled_height} at ({offset_x}, {offset_y})"
    );

    let region = imageops::crop_imm(
        buffer.as_gray(),
        bounds.x,
        bounds.y,
        bounds.width,
        bounds.height,
    )
    .to_image();
    let resized = imageops::resize(&region, scaled_width, scaled_height, FilterType::Triangle);
    imageops::replace(&mut canvas, &resized, offset_x, offset_y);

    PixelBuffer::from_alpha(canvas)
}

#[cfg(feature = "debug")]
pub(crate) fn save_debug(buffer: &PixelBuffer, name: &str) {
    if let Err(err) = std::fs::create_dir_all("debug_images")
        .map_err(image::ImageError::IoError)
        .and_then(|_| buffer.as_gray().save(format!("debug_images/{name}.png")))
    {
        log::warn!("Failed to save debug image {name}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};

    fn buffer_with_rect(width: u32, height: u32, rect: Rect) -> PixelBuffer {
        let mut alpha = GrayImage::new(width, height);
        draw_filled_rect_mut(&mut alpha, rect, Luma([255]));
        PixelBuffer::from_alpha(alpha)
    }

    #[test]
    fn blank_buffer_has_empty_bounds() {
        let bounds = ink_bounds(&PixelBuffer::blank(256, 256), 50);
        assert_eq!(bounds.width, 0);
        assert_eq!(bounds.height, 0);
        assert!(bounds.is_empty());
    }

    #[test]
    fn zero_sized_buffer_has_empty_bounds() {
        assert!(ink_bounds(&PixelBuffer::blank(0, 0), 50).is_empty());
    }

    #[test]
    fn bounds_are_tight_and_inclusive() {
        let buffer = buffer_with_rect(64, 48, Rect::at(10, 5).of_size(20, 7));
        assert_eq!(
            ink_bounds(&buffer, 50),
            BoundingBox {
                x: 10,
                y: 5,
                width: 20,
                height: 7
            }
        );
    }

    #[test]
    fn faint_pixels_are_not_ink() {
        let mut alpha = GrayImage::new(10, 10);
        alpha.put_pixel(2, 2, Luma([50]));
        alpha.put_pixel(7, 3, Luma([51]));
        let bounds = ink_bounds(&PixelBuffer::from_alpha(alpha), 50);
        assert_eq!(
            bounds,
            BoundingBox {
                x: 7,
                y: 3,
                width: 1,
                height: 1
            }
        );
    }

    #[test]
    fn empty_bounds_normalize_to_transparent() {
        let buffer = buffer_with_rect(32, 32, Rect::at(4, 4).of_size(8, 8));
        let normalized = normalize(&buffer, BoundingBox::default(), 100, 0.9);
        assert_eq!((normalized.width(), normalized.height()), (100, 100));
        assert!(normalized.as_gray().pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn normalization_fills_and_centers() {
        let buffer = buffer_with_rect(256, 256, Rect::at(200, 10).of_size(40, 20));
        let bounds = ink_bounds(&buffer, 50);
        let normalized = normalize(&buffer, bounds, 100, 0.9);
        assert_eq!((normalized.width(), normalized.height()), (100, 100));

        let out = ink_bounds(&normalized, 50);
        assert!((89..=91).contains(&out.width), "{out:?}");
        assert!((44..=46).contains(&out.height), "{out:?}");
        assert!((4..=6).contains(&out.x), "{out:?}");
        assert!((27..=29).contains(&out.y), "{out:?}");
    }

    #[test]
    fn normalization_ignores_position_and_scale() {
        let small = buffer_with_rect(64, 64, Rect::at(3, 40).of_size(10, 10));
        let large = buffer_with_rect(256, 256, Rect::at(100, 20).of_size(120, 120));
        let a = normalize(&small, ink_bounds(&small, 50), 100, 0.9);
        let b = normalize(&large, ink_bounds(&large, 50), 100, 0.9);
        assert_eq!(ink_bounds(&a, 50), ink_bounds(&b, 50));
    }
}
