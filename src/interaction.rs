//! Gesture state machine for the compare canvas.
//!
//! Pointer positions arrive in display space (the possibly shrunken on-screen
//! canvas). Every delta is divided by the display scale before it touches the
//! [`TransformState`], so offsets and crop are always in surface pixels.

use serde::Deserialize;

use crate::transform::{TransformState, WHEEL_STEP};

/// Half-width of the crop handle hit band, in display pixels.
const MOUSE_HANDLE_RADIUS: f32 = 10.0;
const TOUCH_HANDLE_RADIUS: f32 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Mouse,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Idle,
    Panning { last: Point },
    ResizingCrop { last: Point },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Default,
    Grab,
    Grabbing,
    ColResize,
}

/// What the host should do after an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RenderNeeded,
    SetCursor(Cursor),
}

/// Geometry the controller needs for hit-testing and delta normalization.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub reference_width: u32,
    pub reference_height: u32,
    pub display_scale: f32,
}

impl Layout {
    fn to_surface(&self, p: Point) -> Point {
        Point::new(p.x / self.display_scale, p.y / self.display_scale)
    }

    fn seam_x(&self, transform: &TransformState) -> f32 {
        (self.reference_width + transform.crop_width(self.reference_width)) as f32
    }
}

/// One recorded input event, as found in a gesture script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    PointerDown { x: f32, y: f32 },
    PointerMove { x: f32, y: f32 },
    PointerUp,
    PointerLeave,
    Wheel { delta_y: f32 },
    TouchStart { touches: Vec<Point> },
    TouchMove { touches: Vec<Point> },
    TouchEnd { touches: Vec<Point> },
    Slider { value: f32 },
}

pub struct InteractionController {
    gesture: Gesture,
    device: DeviceClass,
    narrow: bool,
    pinch_distance: Option<f32>,
}

impl InteractionController {
    pub fn new(device: DeviceClass, narrow: bool) -> Self {
        Self {
            gesture: Gesture::Idle,
            device,
            narrow,
            pinch_distance: None,
        }
    }

    pub fn gesture(&self) -> Gesture {
        self.gesture
    }

    /// Narrow viewports get a scale slider instead of wheel/pinch zoom.
    pub fn shows_slider(&self) -> bool {
        self.narrow
    }

    pub fn dispatch(
        &mut self,
        event: &InputEvent,
        layout: &Layout,
        transform: &mut TransformState,
    ) -> Vec<Action> {
        match event {
            InputEvent::PointerDown { x, y } => {
                self.on_pointer_down(Point::new(*x, *y), layout, transform)
            }
            InputEvent::PointerMove { x, y } => {
                self.on_pointer_move(Point::new(*x, *y), layout, transform)
            }
            InputEvent::PointerUp => self.on_pointer_up(),
            InputEvent::PointerLeave => self.on_pointer_leave(),
            InputEvent::Wheel { delta_y } => self.on_wheel(*delta_y, transform),
            InputEvent::TouchStart { touches } => self.on_touch_start(touches, layout, transform),
            InputEvent::TouchMove { touches } => self.on_touch_move(touches, layout, transform),
            InputEvent::TouchEnd { touches } => self.on_touch_end(touches),
            InputEvent::Slider { value } => self.on_slider(*value, transform),
        }
    }

    pub fn on_pointer_down(
        &mut self,
        screen: Point,
        layout: &Layout,
        transform: &TransformState,
    ) -> Vec<Action> {
        if self.gesture != Gesture::Idle {
            return Vec::new();
        }
        let surface = layout.to_surface(screen);
        if surface.y < 0.0 || surface.y >= layout.reference_height as f32 {
            return Vec::new();
        }

        let seam = layout.seam_x(transform);
        let radius = self.handle_radius() / layout.display_scale;
        if (surface.x - seam).abs() <= radius {
            self.gesture = Gesture::ResizingCrop { last: screen };
            return vec![Action::SetCursor(Cursor::ColResize)];
        }
        if surface.x >= layout.reference_width as f32 && surface.x < seam {
            self.gesture = Gesture::Panning { last: screen };
            return vec![Action::SetCursor(Cursor::Grabbing)];
        }
        Vec::new()
    }

    pub fn on_pointer_move(
        &mut self,
        screen: Point,
        layout: &Layout,
        transform: &mut TransformState,
    ) -> Vec<Action> {
        match self.gesture {
            Gesture::Idle => Vec::new(),
            Gesture::Panning { last } => {
                let dx = (screen.x - last.x) / layout.display_scale;
                let dy = (screen.y - last.y) / layout.display_scale;
                transform.pan_by(dx, dy);
                self.gesture = Gesture::Panning { last: screen };
                vec![Action::RenderNeeded]
            }
            Gesture::ResizingCrop { last } => {
                let dx = (screen.x - last.x) / layout.display_scale;
                let before = transform.crop_fraction;
                transform.set_crop_fraction(before + dx / layout.reference_width as f32);
                self.gesture = Gesture::ResizingCrop { last: screen };
                if transform.crop_fraction != before {
                    vec![Action::RenderNeeded]
                } else {
                    Vec::new()
                }
            }
        }
    }

    pub fn on_pointer_up(&mut self) -> Vec<Action> {
        self.pinch_distance = None;
        if self.gesture == Gesture::Idle {
            return Vec::new();
        }
        self.gesture = Gesture::Idle;
        vec![Action::SetCursor(Cursor::Grab)]
    }

    /// Leaving the canvas ends any gesture and hands the cursor back.
    pub fn on_pointer_leave(&mut self) -> Vec<Action> {
        self.pinch_distance = None;
        self.gesture = Gesture::Idle;
        vec![Action::SetCursor(Cursor::Default)]
    }

    /// One notch per event: scrolling up zooms in by [`WHEEL_STEP`], down zooms out.
    pub fn on_wheel(&mut self, delta_y: f32, transform: &mut TransformState) -> Vec<Action> {
        if self.narrow || delta_y == 0.0 || !self.accepts_zoom() {
            return Vec::new();
        }
        let factor = if delta_y < 0.0 { WHEEL_STEP } else { 1.0 / WHEEL_STEP };
        zoom(transform, factor)
    }

    pub fn on_slider(&mut self, value: f32, transform: &mut TransformState) -> Vec<Action> {
        if !self.narrow {
            return Vec::new();
        }
        let before = transform.scale;
        transform.set_scale(value);
        if transform.scale != before {
            vec![Action::RenderNeeded]
        } else {
            Vec::new()
        }
    }

    pub fn on_touch_start(
        &mut self,
        touches: &[Point],
        layout: &Layout,
        transform: &TransformState,
    ) -> Vec<Action> {
        match touches {
            [one] => self.on_pointer_down(*one, layout, transform),
            [a, b, ..] => {
                if !self.narrow && self.accepts_zoom() {
                    self.pinch_distance = Some(a.distance(*b));
                }
                Vec::new()
            }
            [] => Vec::new(),
        }
    }

    pub fn on_touch_move(
        &mut self,
        touches: &[Point],
        layout: &Layout,
        transform: &mut TransformState,
    ) -> Vec<Action> {
        match touches {
            [one] => self.on_pointer_move(*one, layout, transform),
            [a, b, ..] => {
                let Some(last) = self.pinch_distance else {
                    return Vec::new();
                };
                let distance = a.distance(*b);
                self.pinch_distance = Some(distance);
                if last <= f32::EPSILON {
                    return Vec::new();
                }
                zoom(transform, distance / last)
            }
            [] => Vec::new(),
        }
    }

    /// `touches` are the fingers still down after the end event.
    pub fn on_touch_end(&mut self, touches: &[Point]) -> Vec<Action> {
        match touches {
            [] => self.on_pointer_up(),
            [one] => {
                self.pinch_distance = None;
                // Re-anchor so the remaining finger does not jump the pan.
                match self.gesture {
                    Gesture::Panning { .. } => self.gesture = Gesture::Panning { last: *one },
                    Gesture::ResizingCrop { .. } => {
                        self.gesture = Gesture::ResizingCrop { last: *one }
                    }
                    Gesture::Idle => {}
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn accepts_zoom(&self) -> bool {
        matches!(self.gesture, Gesture::Idle | Gesture::Panning { .. })
    }

    fn handle_radius(&self) -> f32 {
        match self.device {
            DeviceClass::Mouse => MOUSE_HANDLE_RADIUS,
            DeviceClass::Touch => TOUCH_HANDLE_RADIUS,
        }
    }
}

fn zoom(transform: &mut TransformState, factor: f32) -> Vec<Action> {
    let before = transform.scale;
    transform.zoom_by(factor);
    if transform.scale != before {
        vec![Action::RenderNeeded]
    } else {
        Vec::new()
    }
}
