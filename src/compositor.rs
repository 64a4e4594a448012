use image::{ImageBuffer, Rgba, RgbaImage};

use crate::loader::ImageHandle;
use crate::transform::TransformState;

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
const SEAM_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const SEAM_DASH: u32 = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Draw the dashed crop seam (preview affordance only).
    pub seam: bool,
}

/// Size of the composite surface: reference plus the overlay column.
pub fn surface_size(reference: &ImageHandle, transform: &TransformState) -> (u32, u32) {
    let crop_width = transform.crop_width(reference.width());
    (reference.width() + crop_width, reference.height())
}

/// Composite the reference (left, untouched) and the transformed overlay (right).
/// Returns `None` until both images are available.
pub fn render(
    reference: Option<&ImageHandle>,
    overlay: Option<&ImageHandle>,
    transform: &TransformState,
    options: RenderOptions,
) -> Option<RgbaImage> {
    let (reference, overlay) = (reference?, overlay?);
    let (width, height) = surface_size(reference, transform);
    let ref_width = reference.width();

    let mut canvas: RgbaImage = ImageBuffer::from_pixel(width, height, BACKGROUND);

    copy_reference(&mut canvas, reference.pixels());
    draw_overlay(
        &mut canvas,
        overlay.pixels(),
        ref_width,
        width - ref_width,
        transform,
    );

    if options.seam {
        draw_seam(&mut canvas, width - 1);
    }

    Some(canvas)
}

/// Row-wise copy of the reference into the left region, 1:1.
fn copy_reference(dst: &mut RgbaImage, src: &RgbaImage) {
    let dst_stride = dst.width() as usize * 4;
    let src_stride = src.width() as usize * 4;
    let rows = dst.height().min(src.height()) as usize;
    let dst_buf: &mut [u8] = dst.as_mut();
    let src_buf: &[u8] = src.as_ref();

    for row in 0..rows {
        let d = row * dst_stride;
        let s = row * src_stride;
        dst_buf[d..d + src_stride].copy_from_slice(&src_buf[s..s + src_stride]);
    }
}

/// Fill `[x0, x0 + crop_width)` by inverse-mapping each surface pixel into the
/// overlay: `((x - x0 - offset_x) / scale, (y - offset_y) / scale)`.
/// Pixels that land outside the overlay keep the background.
fn draw_overlay(
    dst: &mut RgbaImage,
    src: &RgbaImage,
    x0: u32,
    crop_width: u32,
    transform: &TransformState,
) {
    let (sw, sh) = src.dimensions();
    let inv = 1.0 / transform.scale;

    for y in 0..dst.height() {
        let sy = ((y as f32 + 0.5 - transform.offset_y) * inv).floor();
        if sy < 0.0 || sy >= sh as f32 {
            continue;
        }
        for dx in 0..crop_width {
            let sx = ((dx as f32 + 0.5 - transform.offset_x) * inv).floor();
            if sx < 0.0 || sx >= sw as f32 {
                continue;
            }
            let px = *src.get_pixel(sx as u32, sy as u32);
            let out = dst.get_pixel_mut(x0 + dx, y);
            blend_over(out, px);
        }
    }
}

/// Porter-Duff "over" for a single pixel.
fn blend_over(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = src[3] as f32 / 255.0;
    if sa >= 1.0 {
        *dst = src;
        return;
    }
    if sa <= 0.0 {
        return;
    }

    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a > 0.0 {
        for c in 0..3 {
            dst[c] = ((src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a) as u8;
        }
        dst[3] = (out_a * 255.0) as u8;
    }
}

fn draw_seam(canvas: &mut RgbaImage, x: u32) {
    for y in 0..canvas.height() {
        if (y / SEAM_DASH) % 2 == 0 {
            canvas.put_pixel(x, y, SEAM_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> ImageHandle {
        ImageHandle::new(ImageBuffer::from_fn(w, h, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
        }))
    }

    fn solid(w: u32, h: u32, color: [u8; 4]) -> ImageHandle {
        ImageHandle::new(ImageBuffer::from_pixel(w, h, Rgba(color)))
    }

    #[test]
    fn renders_nothing_until_both_images_resolve() {
        let r = gradient(4, 4);
        let t = TransformState::default();
        assert!(render(Some(&r), None, &t, RenderOptions::default()).is_none());
        assert!(render(None, Some(&r), &t, RenderOptions::default()).is_none());
    }

    #[test]
    fn surface_is_reference_plus_crop() {
        let r = gradient(800, 600);
        let o = solid(400, 300, [255, 0, 0, 255]);
        let t = TransformState::with_crop(0.5);
        let out = render(Some(&r), Some(&o), &t, RenderOptions::default()).unwrap();
        assert_eq!(out.dimensions(), (1200, 600));
    }

    #[test]
    fn left_region_is_reference_regardless_of_transform() {
        let r = gradient(64, 48);
        let o = gradient(100, 100);
        let transforms = [
            TransformState::default(),
            TransformState { scale: 5.0, offset_x: -300.0, offset_y: 40.0, crop_fraction: 1.1 },
            TransformState { scale: 0.2, offset_x: 12.5, offset_y: -7.0, crop_fraction: 0.1 },
        ];
        for t in transforms {
            let out = render(Some(&r), Some(&o), &t, RenderOptions { seam: true }).unwrap();
            for y in 0..48 {
                for x in 0..64 {
                    assert_eq!(out.get_pixel(x, y), r.pixels().get_pixel(x, y));
                }
            }
        }
    }

    #[test]
    fn render_is_deterministic() {
        let r = gradient(50, 40);
        let o = gradient(70, 90);
        let t = TransformState { scale: 1.37, offset_x: 3.3, offset_y: -8.1, crop_fraction: 0.6 };
        let a = render(Some(&r), Some(&o), &t, RenderOptions::default()).unwrap();
        let b = render(Some(&r), Some(&o), &t, RenderOptions::default()).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn pan_moves_overlay_within_region() {
        let r = solid(10, 10, [0, 0, 255, 255]);
        let o = gradient(10, 10);
        let t = TransformState { scale: 1.0, offset_x: 2.0, offset_y: 1.0, crop_fraction: 1.0 };
        let out = render(Some(&r), Some(&o), &t, RenderOptions::default()).unwrap();

        // Uncovered corner keeps the background.
        assert_eq!(*out.get_pixel(10, 0), BACKGROUND);
        // Surface (10 + 2, 1) shows overlay (0, 0).
        assert_eq!(out.get_pixel(12, 1), o.pixels().get_pixel(0, 0));
        assert_eq!(out.get_pixel(15, 4), o.pixels().get_pixel(3, 3));
    }

    #[test]
    fn zoom_is_anchored_at_overlay_origin() {
        let r = solid(8, 8, [0, 0, 0, 255]);
        let o = gradient(8, 8);
        let t = TransformState { scale: 2.0, offset_x: 0.0, offset_y: 0.0, crop_fraction: 1.0 };
        let out = render(Some(&r), Some(&o), &t, RenderOptions::default()).unwrap();

        assert_eq!(out.get_pixel(8, 0), o.pixels().get_pixel(0, 0));
        assert_eq!(out.get_pixel(9, 1), o.pixels().get_pixel(0, 0));
        assert_eq!(out.get_pixel(10, 2), o.pixels().get_pixel(1, 1));
    }

    #[test]
    fn translucent_overlay_blends_over_background() {
        let r = solid(2, 2, [0, 0, 0, 255]);
        let o = solid(2, 2, [200, 100, 50, 0]);
        let t = TransformState::with_crop(1.0);
        let out = render(Some(&r), Some(&o), &t, RenderOptions::default()).unwrap();
        assert_eq!(*out.get_pixel(2, 0), BACKGROUND);
    }

    #[test]
    fn seam_is_dashed_on_last_column() {
        let r = solid(20, 32, [0, 0, 0, 255]);
        let o = solid(20, 32, [0, 0, 0, 255]);
        let t = TransformState::with_crop(0.5);
        let out = render(Some(&r), Some(&o), &t, RenderOptions { seam: true }).unwrap();
        assert_eq!(*out.get_pixel(29, 0), SEAM_COLOR);
        assert_eq!(*out.get_pixel(29, SEAM_DASH), Rgba([0, 0, 0, 255]));
        assert_eq!(*out.get_pixel(29, 2 * SEAM_DASH), SEAM_COLOR);
    }
}
