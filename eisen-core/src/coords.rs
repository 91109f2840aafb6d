/// Coordinate system for the priority matrix.
///
/// Three spaces are in play:
/// - logical: the fixed 520×520 canvas card positions are stored in
/// - normalized: [0,1]×[0,1], derived per render from either space
/// - pixel: the rendered container, variable size plus a padding box
///
/// Quadrant classification happens in normalized space only. A midpoint
/// constant in pixel or logical space holds for exactly one container
/// width and silently drifts for every other one.
use serde::{Deserialize, Serialize};

use crate::types::Position;

/// Side length of the logical canvas.
pub const LOGICAL_CANVAS_SIZE: f64 = 520.0;

/// How far a card may overshoot the canvas on each side while dragging.
pub const LOGICAL_OVERFLOW: f64 = 20.0;

/// Valid range for stored logical coordinates, per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for LogicalBounds {
    fn default() -> Self {
        Self {
            min: -LOGICAL_OVERFLOW,
            max: LOGICAL_CANVAS_SIZE + LOGICAL_OVERFLOW,
        }
    }
}

/// Padding box of the rendered container, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeInsets {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

/// Measured dimensions of the rendered container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerDims {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub padding: EdgeInsets,
}

impl ContainerDims {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            padding: EdgeInsets::default(),
        }
    }

    /// Usable content box, never below 1px to keep divisions finite.
    fn usable(&self) -> (f64, f64) {
        let w = (sanitize(self.width) - self.padding.left - self.padding.right).max(1.0);
        let h = (sanitize(self.height) - self.padding.top - self.padding.bottom).max(1.0);
        (w, h)
    }
}

/// A point in rendered pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A point in [0,1]×[0,1]. Construction clamps, so a value outside the
/// unit square cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: sanitize(x).clamp(0.0, 1.0),
            y: sanitize(y).clamp(0.0, 1.0),
        }
    }
}

/// The four quadrants of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quadrant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Quadrant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quadrant::TopLeft => "top-left",
            Quadrant::TopRight => "top-right",
            Quadrant::BottomLeft => "bottom-left",
            Quadrant::BottomRight => "bottom-right",
        }
    }
}

/// Replace non-finite input with 0 so every function here stays total.
fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Map a pixel position inside the container to normalized space.
pub fn to_normalized(pixel: PixelPoint, dims: &ContainerDims) -> NormalizedPoint {
    let (w, h) = dims.usable();
    NormalizedPoint::new(
        (sanitize(pixel.x) - dims.padding.left) / w,
        (sanitize(pixel.y) - dims.padding.top) / h,
    )
}

/// Inverse of [`to_normalized`].
pub fn to_pixel(norm: NormalizedPoint, dims: &ContainerDims) -> PixelPoint {
    let (w, h) = dims.usable();
    PixelPoint::new(
        dims.padding.left + norm.x * w,
        dims.padding.top + norm.y * h,
    )
}

/// Map a stored logical position to normalized space. Overflowed positions
/// (inside the ±20 drag allowance) clamp onto the unit square.
pub fn normalized_from_logical(position: Position) -> NormalizedPoint {
    NormalizedPoint::new(
        sanitize(position.x) / LOGICAL_CANVAS_SIZE,
        sanitize(position.y) / LOGICAL_CANVAS_SIZE,
    )
}

/// Classify a normalized position into a quadrant.
///
/// Boundary rule: exactly 0.5 belongs to the right/bottom side on the
/// respective axis.
pub fn classify_quadrant(norm: NormalizedPoint) -> Quadrant {
    match (norm.x < 0.5, norm.y < 0.5) {
        (true, true) => Quadrant::TopLeft,
        (false, true) => Quadrant::TopRight,
        (true, false) => Quadrant::BottomLeft,
        (false, false) => Quadrant::BottomRight,
    }
}

/// Quadrant of a stored logical position.
pub fn quadrant_of(position: Position) -> Quadrant {
    classify_quadrant(normalized_from_logical(position))
}

/// Constrain a logical position to valid bounds. Total: non-finite input
/// clamps like any other out-of-range value.
pub fn clamp_position(position: Position, bounds: &LogicalBounds) -> Position {
    Position::new(
        sanitize(position.x).clamp(bounds.min, bounds.max),
        sanitize(position.y).clamp(bounds.min, bounds.max),
    )
}
