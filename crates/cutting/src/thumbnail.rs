//! Thumbnail rendering.
//!
//! BARE is a decoded frame as-is; TEMPLATE crops the frame, scales it
//! into the template's placement box, and composites it under the
//! template image (templates carry a transparent window); CUSTOM is a
//! caller-supplied image passed through. Rendering is deterministic:
//! the SHA-256 of the output is stored for change detection.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage, imageops};
use sha2::{Digest, Sha256};
use std::io::Cursor;

use crate::error::CutError;
use crate::request::Rect;

/// How a thumbnail is produced from a frame.
#[derive(Debug, Clone)]
pub enum ThumbnailSpec {
    /// The decoded frame, untouched.
    Bare,
    /// Frame cropped to `crop`, scaled into `location`, composited
    /// under the template image.
    Template {
        template_png: Vec<u8>,
        crop: Rect,
        location: Rect,
    },
    /// Caller-supplied image, passed through unmodified.
    Custom(Vec<u8>),
}

/// Render the final PNG.
pub fn render_thumbnail(frame_png: &[u8], spec: &ThumbnailSpec) -> Result<Vec<u8>, CutError> {
    match spec {
        ThumbnailSpec::Bare => {
            // Decode and re-encode so the stored hash is stable for
            // identical pixels regardless of encoder quirks upstream.
            let frame = image::load_from_memory(frame_png)?;
            encode_png(&frame)
        }
        ThumbnailSpec::Custom(bytes) => {
            let custom = image::load_from_memory(bytes)?;
            encode_png(&custom)
        }
        ThumbnailSpec::Template {
            template_png,
            crop,
            location,
        } => {
            let frame = image::load_from_memory(frame_png)?;
            let template = image::load_from_memory(template_png)?.to_rgba8();

            let cropped = frame.crop_imm(crop.x, crop.y, crop.width, crop.height);
            let scaled = cropped.resize_exact(location.width, location.height, FilterType::Lanczos3);

            let mut canvas = RgbaImage::new(template.width(), template.height());
            imageops::overlay(
                &mut canvas,
                &scaled.to_rgba8(),
                location.x as i64,
                location.y as i64,
            );
            imageops::overlay(&mut canvas, &template, 0, 0);

            encode_png(&DynamicImage::ImageRgba8(canvas))
        }
    }
}

/// Hash of an uploaded thumbnail, as stored in `thumbnail_last_written`.
pub fn thumbnail_hash(png: &[u8]) -> String {
    hex::encode(Sha256::digest(png))
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, CutError> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid_png(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, color);
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn bare_rendering_is_deterministic() {
        let frame = solid_png(64, 36, Rgba([200, 10, 10, 255]));
        let a = render_thumbnail(&frame, &ThumbnailSpec::Bare).unwrap();
        let b = render_thumbnail(&frame, &ThumbnailSpec::Bare).unwrap();
        assert_eq!(thumbnail_hash(&a), thumbnail_hash(&b));
    }

    #[test]
    fn template_composites_frame_into_window() {
        let frame = solid_png(64, 36, Rgba([0, 255, 0, 255]));
        // Fully transparent template: the frame must show through.
        let template = solid_png(128, 72, Rgba([0, 0, 0, 0]));
        let spec = ThumbnailSpec::Template {
            template_png: template,
            crop: Rect {
                x: 0,
                y: 0,
                width: 64,
                height: 36,
            },
            location: Rect {
                x: 32,
                y: 18,
                width: 64,
                height: 36,
            },
        };
        let out = render_thumbnail(&frame, &spec).unwrap();
        let rendered = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(rendered.dimensions(), (128, 72));
        assert_eq!(rendered.get_pixel(64, 36), &Rgba([0, 255, 0, 255]));
        assert_eq!(rendered.get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn opaque_template_covers_the_frame() {
        let frame = solid_png(64, 36, Rgba([0, 255, 0, 255]));
        let template = solid_png(128, 72, Rgba([20, 20, 20, 255]));
        let spec = ThumbnailSpec::Template {
            template_png: template,
            crop: Rect {
                x: 0,
                y: 0,
                width: 64,
                height: 36,
            },
            location: Rect {
                x: 0,
                y: 0,
                width: 64,
                height: 36,
            },
        };
        let out = render_thumbnail(&frame, &spec).unwrap();
        let rendered = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(rendered.get_pixel(10, 10), &Rgba([20, 20, 20, 255]));
    }

    #[test]
    fn custom_passthrough_reencodes() {
        let custom = solid_png(32, 32, Rgba([1, 2, 3, 255]));
        let out = render_thumbnail(&[], &ThumbnailSpec::Custom(custom)).unwrap();
        let rendered = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(rendered.dimensions(), (32, 32));
    }

    #[test]
    fn hash_changes_with_content() {
        let red = render_thumbnail(
            &solid_png(8, 8, Rgba([255, 0, 0, 255])),
            &ThumbnailSpec::Bare,
        )
        .unwrap();
        let blue = render_thumbnail(
            &solid_png(8, 8, Rgba([0, 0, 255, 255])),
            &ThumbnailSpec::Bare,
        )
        .unwrap();
        assert_ne!(thumbnail_hash(&red), thumbnail_hash(&blue));
    }
}
