//! docshot
//!
//! Turns a laid-out document in a browser page into one or more raster images.
//! The interesting part is deciding *what* to capture: a whole page, the first
//! match of a selector, every match, a bounding union, or the matches stitched
//! into a clean vertical stack, and when a tall region has to be cut into
//! several images at block boundaries.
//!
//! # Features
//!
//! - **CDP Backend** (default): Drives headless Chrome through the DevTools protocol
//! - **Session Seam**: Every engine step talks to a [`PageSession`], so the
//!   engine runs unchanged against the in-memory [`ScriptedPage`]
//! - **Bounded Waits**: Settling waits time out and proceed instead of aborting
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use docshot::{BrowserConfig, CaptureOptions, CaptureRequest};
//! use docshot::cdp::CdpSession;
//!
//! let browser = docshot::cdp::launch(&BrowserConfig::default())?;
//! let session = CdpSession::new(&browser, BrowserConfig::default())?;
//! session.load_url("https://example.com")?;
//!
//! let options = CaptureOptions::from_json(r#"{"selector": "main", "selectorMode": "each"}"#)?;
//! let request = CaptureRequest::from_options(options)?;
//! let result = docshot::capture(&session, &request)?;
//! println!("captured {} image(s)", result.len());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "cdp"))]
//! # fn main() {}
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod capture;
pub mod geometry;
pub mod output;
pub mod request;
pub mod scripted;
pub mod session;

// Chrome DevTools backend
#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly browser API (worker thread per page)
#[cfg(feature = "cdp")]
pub mod async_api;

#[cfg(feature = "cdp")]
pub use async_api::{Browser, Page};

pub use capture::{capture, CaptureResult};
pub use geometry::{CaptureRegion, ElementBox};
pub use request::{CaptureOptions, CaptureRequest, ImageFormat, SelectorMode, SplitMode};
pub use scripted::ScriptedPage;
pub use session::{ElementHandle, PageSession, ScreenshotParams};

/// Configuration for launching the browser and opening pages
///
/// The defaults launch a sandboxed headless Chrome found on `PATH` with a
/// 1280x720 window.
///
/// # Examples
///
/// ```
/// let cfg = docshot::BrowserConfig::default();
/// assert!(cfg.sandbox);
/// assert_eq!(cfg.viewport.width, 1280);
/// ```
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// User agent override; `None` keeps Chrome's own
    pub user_agent: Option<String>,
    /// Initial window/viewport dimensions
    pub viewport: Viewport,
    /// Timeout for page loads in milliseconds
    pub timeout_ms: u64,
    /// Extra HTTP headers sent with every request
    pub headers: HashMap<String, String>,
    /// Explicit Chrome/Chromium binary; `None` searches the system
    pub chrome_path: Option<PathBuf>,
    /// Whether to keep Chrome's sandbox enabled
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            viewport: Viewport::default(),
            timeout_ms: 30000,
            headers: HashMap::new(),
            chrome_path: None,
            sandbox: true,
        }
    }
}

/// Viewport dimensions in CSS pixels plus the device scale factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

impl Viewport {
    pub fn with_scale(self, device_scale_factor: f64) -> Self {
        Self {
            device_scale_factor,
            ..self
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_scale_factor: 1.0,
        }
    }
}
