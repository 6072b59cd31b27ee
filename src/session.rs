//! The browser page as seen by the capture engine
//!
//! Every capture step goes through [`PageSession`]. A session is exclusively
//! owned by one capture run for its whole duration: the operations mutate the
//! scroll position, the viewport and (in stitch mode) the document itself, so
//! they are issued strictly one after another.

use crate::geometry::ElementBox;
use crate::request::ImageFormat;
use crate::{Result, Viewport};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Opaque reference to a node living in the page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Scroll position and scrollable extent of the document, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub scroll_width: f64,
    pub scroll_height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl ScrollMetrics {
    /// True once the viewport bottom reaches the end of the document.
    pub fn at_bottom(&self) -> bool {
        self.scroll_y + self.viewport_height >= self.scroll_height - 1.0
    }
}

/// Styling of the synthetic stitch container
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StitchLayout {
    /// Vertical space between stacked elements
    pub gap: f64,
    /// Inner padding around the whole stack
    pub padding: f64,
    /// Leave the container background transparent
    pub transparent: bool,
}

/// One element moved into the stitch container.
///
/// `placeholder` holds the element's original slot; `wrapper` is the centering
/// box it was moved into.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMove {
    pub moved: ElementHandle,
    pub placeholder: ElementHandle,
    pub wrapper: ElementHandle,
}

/// Arguments of a single screenshot call.
///
/// `capture_beyond_viewport` and `from_surface` are optional so a retry can
/// drop them and fall back to the browser default.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotParams {
    pub format: ImageFormat,
    pub quality: Option<u8>,
    pub clip: Option<ElementBox>,
    pub omit_background: bool,
    pub capture_beyond_viewport: Option<bool>,
    pub from_surface: Option<bool>,
}

/// Capabilities the capture engine needs from a browser page
pub trait PageSession {
    /// Evaluate an expression in the page, awaiting promises, and return its JSON value
    fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    /// Apply viewport size and device scale factor
    fn set_viewport(&self, viewport: &Viewport) -> Result<()>;

    fn scroll_metrics(&self) -> Result<ScrollMetrics>;

    /// Scroll the window so that document offset `y` is at the top
    fn scroll_to(&self, y: f64) -> Result<()>;

    /// Wait for web fonts and pending images. Returns false on timeout.
    fn wait_for_assets(&self, timeout: Duration) -> Result<bool>;

    /// Poll `predicate` until it is truthy. Returns false on timeout.
    fn wait_for_function(&self, predicate: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if is_truthy(&self.evaluate(predicate)?) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Let layout settle for one rendered frame
    fn next_frame(&self) -> Result<()>;

    /// All elements matching `selector`, in document order
    fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>>;

    /// True if some ancestor of `element` also matches `selector`
    fn has_matching_ancestor(&self, element: &ElementHandle, selector: &str) -> Result<bool>;

    /// Document-relative box, or `None` for detached or zero-size elements
    fn bounding_box(&self, element: &ElementHandle) -> Result<Option<ElementBox>>;

    fn scroll_into_view(&self, element: &ElementHandle) -> Result<()>;

    /// Insert an empty, absolutely positioned vertical flex container
    fn create_stitch_container(&self, layout: &StitchLayout) -> Result<ElementHandle>;

    /// Leave a placeholder in `element`'s slot and move it into a new wrapper in `container`
    fn wrap_into(&self, container: &ElementHandle, element: &ElementHandle) -> Result<NodeMove>;

    /// Put a moved element back where its placeholder sits and drop the wrapper
    fn unwrap(&self, node_move: &NodeMove) -> Result<()>;

    fn remove_node(&self, node: &ElementHandle) -> Result<()>;

    /// Hide every top-level block of the document except `container`.
    ///
    /// Returns how many blocks were hidden. Blocks already hidden by an
    /// earlier call are left alone.
    fn hide_outside(&self, container: &ElementHandle) -> Result<usize>;

    /// Undo [`PageSession::hide_outside`], restoring each block's prior styling
    fn show_outside(&self) -> Result<()>;

    /// Drop every element handle handed out so far; they are invalid afterwards
    fn release_handles(&self) -> Result<()>;

    /// Offsets, relative to `region.y`, of block bottoms inside `region`, ascending
    fn cut_candidates(&self, region: &ElementBox) -> Result<Vec<f64>>;

    /// Encoded image bytes
    fn screenshot(&self, params: &ScreenshotParams) -> Result<Vec<u8>>;
}

/// JavaScript truthiness of a JSON value
pub fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("done")));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!(true)));
    }

    #[test]
    fn bottom_detection_tolerates_subpixel_rounding() {
        let m = ScrollMetrics {
            scroll_y: 1399.5,
            scroll_height: 2000.0,
            viewport_height: 600.0,
            ..Default::default()
        };
        assert!(m.at_bottom());
    }
}
