use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f32 = 0.2;
pub const MAX_SCALE: f32 = 5.0;
pub const MIN_CROP_FRACTION: f32 = 0.1;
pub const MAX_CROP_FRACTION: f32 = 1.1;
pub const DEFAULT_CROP_FRACTION: f32 = 0.3;

/// Multiplicative zoom per wheel notch.
pub const WHEEL_STEP: f32 = 1.08;

/// Pan/zoom/crop applied to the overlay image. Offsets are in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub crop_fraction: f32,
}

impl Default for TransformState {
    fn default() -> Self {
        Self::with_crop(DEFAULT_CROP_FRACTION)
    }
}

impl TransformState {
    pub fn with_crop(crop_fraction: f32) -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            crop_fraction: clamp_crop(crop_fraction),
        }
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = clamp_scale(scale);
    }

    /// Multiply the current scale by `factor`, keeping the result in range.
    pub fn zoom_by(&mut self, factor: f32) {
        if factor.is_finite() && factor > 0.0 {
            self.set_scale(self.scale * factor);
        }
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.offset_x += dx;
        self.offset_y += dy;
    }

    pub fn set_crop_fraction(&mut self, crop_fraction: f32) {
        self.crop_fraction = clamp_crop(crop_fraction);
    }

    /// Width of the overlay region for a reference of `reference_width` pixels,
    /// never below one pixel and never above 1.1x the reference.
    pub fn crop_width(&self, reference_width: u32) -> u32 {
        let max = (reference_width as f32 * MAX_CROP_FRACTION).floor().max(1.0);
        (reference_width as f32 * self.crop_fraction)
            .round()
            .clamp(1.0, max) as u32
    }
}

pub fn clamp_scale(scale: f32) -> f32 {
    if scale.is_nan() {
        return 1.0;
    }
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

pub fn clamp_crop(crop_fraction: f32) -> f32 {
    if crop_fraction.is_nan() {
        return DEFAULT_CROP_FRACTION;
    }
    crop_fraction.clamp(MIN_CROP_FRACTION, MAX_CROP_FRACTION)
}

/// Uniform factor that fits a `width`x`height` surface into a bounded dialog.
/// Never upscales. A zero bound means "unbounded" on that axis.
pub fn display_scale(width: u32, height: u32, max_width: u32, max_height: u32) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    let mut scale: f32 = 1.0;
    if max_width > 0 {
        scale = scale.min(max_width as f32 / width as f32);
    }
    if max_height > 0 {
        scale = scale.min(max_height as f32 / height as f32);
    }
    scale
}
