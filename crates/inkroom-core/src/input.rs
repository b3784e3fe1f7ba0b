//! Pointer input in canvas coordinates.
//!
//! Mouse, pen and touch all arrive as the same [`PointerEvent`]; the only
//! thing that differs between them is where the display-space position came
//! from, and [`CanvasMapping`] turns that into canvas space.

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Unified pointer event, positions already in canvas space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    /// Button pressed or finger touched down.
    Down { position: Point },
    /// Pointer moved.
    Move { position: Point },
    /// Button released or finger lifted.
    Up,
    /// Pointer left the canvas. Ends a stroke like `Up`.
    Leave,
}

impl PointerEvent {
    pub fn down(position: Point) -> Self {
        Self::Down { position }
    }

    pub fn moved(position: Point) -> Self {
        Self::Move { position }
    }
}

/// Maps display-space positions onto the canvas backing store.
///
/// The canvas may be shown at a different size than its pixel dimensions;
/// positions are scaled by `canvas / display` on each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasMapping {
    /// Canvas size in pixels.
    pub canvas_width: f64,
    pub canvas_height: f64,
    /// Where the canvas is shown, in display coordinates.
    pub display: Rect,
}

impl CanvasMapping {
    pub fn new(canvas_width: u32, canvas_height: u32, display: Rect) -> Self {
        Self {
            canvas_width: canvas_width as f64,
            canvas_height: canvas_height as f64,
            display,
        }
    }

    /// Identity mapping for a canvas shown at its natural size at the origin.
    pub fn identity(canvas_width: u32, canvas_height: u32) -> Self {
        Self::new(
            canvas_width,
            canvas_height,
            Rect::new(0.0, 0.0, canvas_width as f64, canvas_height as f64),
        )
    }

    /// Convert a display-space position to canvas space. A zero-sized
    /// display rect maps everything to the origin.
    pub fn to_canvas(&self, client: Point) -> Point {
        let (w, h) = (self.display.width(), self.display.height());
        if w <= 0.0 || h <= 0.0 {
            return Point::ZERO;
        }
        Point::new(
            (client.x - self.display.x0) * self.canvas_width / w,
            (client.y - self.display.y0) * self.canvas_height / h,
        )
    }

    /// Build a pointer event from display-space input.
    pub fn down(&self, client: Point) -> PointerEvent {
        PointerEvent::down(self.to_canvas(client))
    }

    pub fn moved(&self, client: Point) -> PointerEvent {
        PointerEvent::moved(self.to_canvas(client))
    }
}
