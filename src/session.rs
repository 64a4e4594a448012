use image::RgbaImage;

use crate::compositor::{self, RenderOptions};
use crate::encode::{self, EncodeFormat};
use crate::error::{EncodeError, LoadError};
use crate::interaction::{Action, DeviceClass, InputEvent, InteractionController, Layout};
use crate::loader::{ImageHandle, ImageLoader};
use crate::transform::{self, TransformState};

/// Monotonic id for a render or load request. Only the latest one may land.
pub type RequestToken = u64;

/// Dialog bounds and device affordances for one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub default_crop_fraction: f32,
    pub max_display_width: u32,
    pub max_display_height: u32,
    pub device: DeviceClass,
    pub viewport_width: u32,
    pub narrow_viewport_width: u32,
}

/// Finished composite: encoded bytes plus the transform that produced them.
#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub transform: TransformState,
}

/// One open comparison dialog. Owns both image handles; dropping or
/// finishing the session releases them.
pub struct CompareSession {
    options: SessionOptions,
    reference: Option<ImageHandle>,
    overlay: Option<ImageHandle>,
    transform: TransformState,
    controller: InteractionController,
    dirty: bool,
    latest_load: RequestToken,
    latest_render: RequestToken,
    next_token: RequestToken,
    visible: Option<RgbaImage>,
    renders: u64,
}

impl CompareSession {
    pub fn open(options: SessionOptions) -> Self {
        let narrow = options.viewport_width <= options.narrow_viewport_width;
        Self {
            options,
            reference: None,
            overlay: None,
            transform: TransformState::with_crop(options.default_crop_fraction),
            controller: InteractionController::new(options.device, narrow),
            dirty: false,
            latest_load: 0,
            latest_render: 0,
            next_token: 0,
            visible: None,
            renders: 0,
        }
    }

    pub fn transform(&self) -> TransformState {
        self.transform
    }

    pub fn set_transform(&mut self, transform: TransformState) {
        self.transform = TransformState {
            scale: transform::clamp_scale(transform.scale),
            crop_fraction: transform::clamp_crop(transform.crop_fraction),
            ..transform
        };
        self.dirty = true;
    }

    pub fn controller(&self) -> &InteractionController {
        &self.controller
    }

    pub fn is_ready(&self) -> bool {
        self.reference.is_some() && self.overlay.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The raster currently on screen, if any render has landed.
    pub fn visible(&self) -> Option<&RgbaImage> {
        self.visible.as_ref()
    }

    /// Number of renders that actually reached the screen.
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    fn issue_token(&mut self) -> RequestToken {
        self.next_token += 1;
        self.next_token
    }

    /// Start loading a new image pair. Any load still in flight is superseded.
    pub fn begin_load(&mut self) -> RequestToken {
        let token = self.issue_token();
        self.latest_load = token;
        token
    }

    /// Install loaded images. Returns false if a newer load has started since.
    pub fn finish_load(
        &mut self,
        token: RequestToken,
        reference: ImageHandle,
        overlay: ImageHandle,
    ) -> bool {
        if token != self.latest_load {
            tracing::debug!("Discarding superseded image load {}", token);
            return false;
        }
        self.reference = Some(reference);
        // Replaces and releases the previous overlay.
        self.overlay = Some(overlay);
        self.dirty = true;
        true
    }

    pub async fn load_images(
        &mut self,
        loader: &ImageLoader,
        reference: &str,
        overlay: &str,
    ) -> Result<bool, LoadError> {
        let token = self.begin_load();
        let (r, o) = loader.load_pair(reference, overlay).await?;
        Ok(self.finish_load(token, r, o))
    }

    pub fn layout(&self) -> Option<Layout> {
        let reference = self.reference.as_ref()?;
        let (w, h) = compositor::surface_size(reference, &self.transform);
        Some(Layout {
            reference_width: reference.width(),
            reference_height: reference.height(),
            display_scale: transform::display_scale(
                w,
                h,
                self.options.max_display_width,
                self.options.max_display_height,
            ),
        })
    }

    /// Route an input event. Mutations only mark the session dirty; the
    /// redraw happens once in the next [`frame`](Self::frame).
    pub fn handle(&mut self, event: &InputEvent) -> Vec<Action> {
        let Some(layout) = self.layout() else {
            return Vec::new();
        };
        let actions = self.controller.dispatch(event, &layout, &mut self.transform);
        if actions.contains(&Action::RenderNeeded) {
            self.dirty = true;
        }
        actions
    }

    pub fn begin_render(&mut self) -> RequestToken {
        let token = self.issue_token();
        self.latest_render = token;
        token
    }

    /// Show a finished render unless a newer one was requested meanwhile.
    pub fn commit_render(&mut self, token: RequestToken, surface: RgbaImage) -> bool {
        if token != self.latest_render {
            tracing::debug!(
                "Dropping stale render {} (latest {})",
                token,
                self.latest_render
            );
            return false;
        }
        self.visible = Some(surface);
        self.renders += 1;
        true
    }

    /// Snapshot what a render needs so it can run off the session.
    pub fn render_job(&mut self) -> Option<(RequestToken, RenderJob)> {
        let job = RenderJob {
            reference: self.reference.clone()?,
            overlay: self.overlay.clone()?,
            transform: self.transform,
        };
        Some((self.begin_render(), job))
    }

    /// Coalesced redraw: renders once if anything changed since the last frame.
    pub fn frame(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        let Some((token, job)) = self.render_job() else {
            return false;
        };
        self.dirty = false;
        match job.run(RenderOptions { seam: true }) {
            Some(surface) => self.commit_render(token, surface),
            None => false,
        }
    }

    /// Encode the current transform into a composite and end the session.
    pub fn finalize(mut self, quality: u8) -> Result<CompositeResult, EncodeError> {
        let reference = self.reference.take();
        let overlay = self.overlay.take();
        let surface = compositor::render(
            reference.as_ref(),
            overlay.as_ref(),
            &self.transform,
            RenderOptions::default(),
        )
        .ok_or(EncodeError::Empty {
            width: 0,
            height: 0,
        })?;
        let (width, height) = surface.dimensions();
        let bytes = encode::encode(&surface, EncodeFormat::Jpeg, quality)?;
        tracing::info!(
            "Composite finalized: {}x{}, {} bytes, scale {:.2}, crop {:.2}",
            width,
            height,
            bytes.len(),
            self.transform.scale,
            self.transform.crop_fraction
        );
        Ok(CompositeResult {
            bytes,
            width,
            height,
            transform: self.transform,
        })
    }

    pub fn cancel(self) {
        tracing::debug!("Compare session cancelled");
    }
}

/// Everything one render pass needs, detached from the session.
#[derive(Clone)]
pub struct RenderJob {
    reference: ImageHandle,
    overlay: ImageHandle,
    transform: TransformState,
}

impl RenderJob {
    pub fn run(&self, options: RenderOptions) -> Option<RgbaImage> {
        compositor::render(
            Some(&self.reference),
            Some(&self.overlay),
            &self.transform,
            options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn options() -> SessionOptions {
        SessionOptions {
            default_crop_fraction: 0.5,
            max_display_width: 600,
            max_display_height: 600,
            device: DeviceClass::Mouse,
            viewport_width: 1280,
            narrow_viewport_width: 700,
        }
    }

    fn handle(w: u32, h: u32, v: u8) -> ImageHandle {
        ImageHandle::new(ImageBuffer::from_pixel(w, h, Rgba([v, v, v, 255])))
    }

    fn ready_session() -> CompareSession {
        let mut s = CompareSession::open(options());
        let token = s.begin_load();
        assert!(s.finish_load(token, handle(800, 600, 10), handle(800, 600, 200)));
        s
    }

    #[test]
    fn frame_is_noop_until_images_resolve() {
        let mut s = CompareSession::open(options());
        s.set_transform(TransformState::with_crop(0.4));
        assert!(!s.frame());
        assert!(s.visible().is_none());
    }

    #[test]
    fn layout_uses_display_scale() {
        let s = ready_session();
        let layout = s.layout().unwrap();
        // 1200x600 surface squeezed into 600x600.
        assert_eq!(layout.display_scale, 0.5);
    }

    #[test]
    fn burst_of_moves_renders_once_with_latest_state() {
        let mut s = ready_session();
        s.frame();
        let baseline = s.render_count();

        s.handle(&InputEvent::PointerDown { x: 450.0, y: 100.0 });
        for i in 1..=10 {
            s.handle(&InputEvent::PointerMove { x: 450.0 + i as f32, y: 100.0 });
        }
        assert!(s.is_dirty());
        assert!(s.frame());
        assert!(!s.frame());
        assert_eq!(s.render_count(), baseline + 1);
        assert_eq!(s.transform().offset_x, 20.0);
    }

    #[test]
    fn superseded_render_never_becomes_visible() {
        let mut s = ready_session();

        let (first, first_job) = s.render_job().unwrap();
        s.set_transform(TransformState { offset_x: 40.0, ..s.transform() });
        let (second, second_job) = s.render_job().unwrap();

        let second_surface = second_job.run(RenderOptions::default()).unwrap();
        let first_surface = first_job.run(RenderOptions::default()).unwrap();

        assert!(s.commit_render(second, second_surface.clone()));
        // The older request finishes last but must not overwrite.
        assert!(!s.commit_render(first, first_surface));
        assert_eq!(s.visible().unwrap().as_raw(), second_surface.as_raw());
        assert_eq!(s.render_count(), 1);
    }

    #[test]
    fn superseded_load_is_discarded() {
        let mut s = CompareSession::open(options());
        let stale = s.begin_load();
        let fresh = s.begin_load();
        assert!(!s.finish_load(stale, handle(10, 10, 0), handle(10, 10, 0)));
        assert!(!s.is_ready());
        assert!(s.finish_load(fresh, handle(20, 10, 0), handle(10, 10, 0)));
        assert_eq!(s.layout().unwrap().reference_width, 20);
    }

    #[test]
    fn finalize_produces_jpeg_of_composite_size() {
        let mut s = ready_session();
        s.set_transform(TransformState { scale: 9.0, crop_fraction: 0.01, ..s.transform() });
        assert_eq!(s.transform().scale, transform::MAX_SCALE);

        let result = s.finalize(92).unwrap();
        assert_eq!((result.width, result.height), (880, 600));
        assert_eq!(&result.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(result.transform.crop_fraction, transform::MIN_CROP_FRACTION);
    }

    #[test]
    fn finalize_without_images_is_encode_error() {
        let s = CompareSession::open(options());
        assert!(matches!(s.finalize(92), Err(EncodeError::Empty { .. })));
    }

    #[test]
    fn cancel_releases_image_handles() {
        let overlay = handle(4, 4, 1);
        let mut s = CompareSession::open(options());
        let token = s.begin_load();
        s.finish_load(token, handle(4, 4, 0), overlay.clone());
        assert!(s.frame());
        s.cancel();
        // Only our clone is left holding the overlay pixels.
        assert_eq!(overlay.ref_count(), 1);
    }

    #[test]
    fn narrow_viewport_session_offers_slider() {
        let mut opts = options();
        opts.viewport_width = 390;
        let s = CompareSession::open(opts);
        assert!(s.controller().shows_slider());
    }
}
