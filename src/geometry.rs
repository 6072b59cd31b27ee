//! Rectangles in document-relative CSS pixels

use serde::{Deserialize, Serialize};

/// An element's `{x, y, width, height}` in document-relative CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// True when the box covers no area.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Grow the box by `padding` on every side.
    pub fn padded(&self, padding: f64) -> Self {
        if padding <= 0.0 {
            return *self;
        }
        Self {
            x: self.x - padding,
            y: self.y - padding,
            width: self.width + padding * 2.0,
            height: self.height + padding * 2.0,
        }
    }

    /// Smallest axis-aligned box covering both `self` and `other`.
    pub fn union(&self, other: &ElementBox) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Self {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Union of every box in `boxes`, or `None` when there are none.
    pub fn union_all<'a>(boxes: impl IntoIterator<Item = &'a ElementBox>) -> Option<Self> {
        boxes.into_iter().fold(None, |acc, b| match acc {
            None => Some(*b),
            Some(u) => Some(u.union(b)),
        })
    }

    /// Clip the box to `[0, doc_width] x [0, doc_height]`.
    pub fn clamp_to_document(&self, doc_width: f64, doc_height: f64) -> Self {
        let x = self.x.max(0.0);
        let y = self.y.max(0.0);
        let right = self.right().min(doc_width.max(x));
        let bottom = self.bottom().min(doc_height.max(y));
        Self {
            x,
            y,
            width: (right - x).max(0.0),
            height: (bottom - y).max(0.0),
        }
    }
}

/// A clip rectangle plus the beyond-viewport flag; the unit a capture consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub capture_beyond_viewport: bool,
}

impl CaptureRegion {
    pub fn from_box(b: &ElementBox, capture_beyond_viewport: bool) -> Self {
        Self {
            x: b.x,
            y: b.y,
            width: b.width,
            height: b.height,
            capture_beyond_viewport,
        }
    }

    pub fn as_box(&self) -> ElementBox {
        ElementBox::new(self.x, self.y, self.width, self.height)
    }
}
