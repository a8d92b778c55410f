//! Axis-aligned rectangles in map (image pixel) coordinates.
//!
//! The map coordinate system has its origin at the top-left corner of the
//! full-resolution image, x growing to the right and y growing downwards.

use serde::{Deserialize, Serialize};

/// Rectangle given as `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    /// Create a new extent from its four bounds.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Build an extent from a loosely typed bounds slice.
    ///
    /// Returns `None` unless the slice holds exactly four finite values.
    pub fn from_slice(bounds: &[f64]) -> Option<Self> {
        match *bounds {
            [min_x, min_y, max_x, max_y] if bounds.iter().all(|v| v.is_finite()) => {
                Some(Self::new(min_x, min_y, max_x, max_y))
            }
            _ => None,
        }
    }

    /// Bounds as an array, in `[min_x, min_y, max_x, max_y]` order.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Open-interval overlap test on all four bounds.
    ///
    /// Rectangles that merely share an edge do not intersect.
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Euclidean distance between the centers of two rectangles.
    pub fn center_distance(&self, other: &Extent) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Whether the rectangle has a positive, finite area.
    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
            && self.max_x > self.min_x
            && self.max_y > self.min_y
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn buffered(&self, margin: f64) -> Extent {
        Extent::new(
            self.min_x - margin,
            self.min_y - margin,
            self.max_x + margin,
            self.max_y + margin,
        )
    }
}

impl From<[f64; 4]> for Extent {
    fn from(b: [f64; 4]) -> Self {
        Extent::new(b[0], b[1], b[2], b[3])
    }
}

impl From<Extent> for [f64; 4] {
    fn from(e: Extent) -> Self {
        e.to_array()
    }
}
