//! Capture options and their normalized form
//!
//! `CaptureOptions` is what callers hand in: every field optional, shaped like
//! the JSON accepted by the CLI `--options` file. `CaptureRequest::from_options`
//! turns it into a fully-typed `CaptureRequest` once, at the entry boundary, so
//! no capture component has to re-interpret missing or loosely typed input.

use crate::{Error, Result, Viewport};
use log::warn;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SELECTOR_GAP: f64 = 16.0;
pub const DEFAULT_SPLIT_MAX_PIXEL_HEIGHT: u32 = 14_000;
pub const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CAPTURE_DELAY_MS: u64 = 50;
pub const DEFAULT_LIVE_RENDER_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SCROLL_DELAY_MS: u64 = 100;
pub const DEFAULT_SCROLL_MAX_STEPS: u32 = 200;
pub const DEFAULT_SCROLL_MAX_TIME_MS: u64 = 15_000;

/// Output image encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }

    /// Name used by the DevTools protocol
    pub fn protocol_name(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn supports_quality(&self) -> bool {
        !matches!(self, ImageFormat::Png)
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(Error::ConfigError(format!("unknown image format '{}'", other))),
        }
    }
}

/// How the elements matched by a selector are turned into images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorMode {
    /// Only the first top-level match
    First,
    /// One image per top-level match
    Each,
    /// One bounding rectangle over all matches, page content in between included
    Union,
    /// Matches relocated into a vertical stack, in-between content excluded
    #[default]
    Stitch,
}

impl FromStr for SelectorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(SelectorMode::First),
            "each" => Ok(SelectorMode::Each),
            "union" => Ok(SelectorMode::Union),
            "stitch" => Ok(SelectorMode::Stitch),
            other => Err(Error::ConfigError(format!("unknown selector mode '{}'", other))),
        }
    }
}

/// Whether a tall capture is divided into several images.
///
/// Serialized as `true`, `false` or `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "SplitRepr", into = "SplitRepr")]
pub enum SplitMode {
    Always,
    Never,
    #[default]
    Auto,
}

/// Wire form of `SplitMode`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SplitRepr {
    Flag(bool),
    Named(String),
}

impl TryFrom<SplitRepr> for SplitMode {
    type Error = Error;

    fn try_from(repr: SplitRepr) -> Result<Self> {
        match repr {
            SplitRepr::Flag(true) => Ok(SplitMode::Always),
            SplitRepr::Flag(false) => Ok(SplitMode::Never),
            SplitRepr::Named(s) => s.parse(),
        }
    }
}

impl From<SplitMode> for SplitRepr {
    fn from(mode: SplitMode) -> Self {
        match mode {
            SplitMode::Always => SplitRepr::Flag(true),
            SplitMode::Never => SplitRepr::Flag(false),
            SplitMode::Auto => SplitRepr::Named("auto".into()),
        }
    }
}

impl FromStr for SplitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "always" | "yes" => Ok(SplitMode::Always),
            "false" | "never" | "no" => Ok(SplitMode::Never),
            "auto" => Ok(SplitMode::Auto),
            other => Err(Error::ConfigError(format!("unknown split mode '{}'", other))),
        }
    }
}

/// A selector given either as one CSS string or as a list joined into a CSS union
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorInput {
    One(String),
    Many(Vec<String>),
}

impl SelectorInput {
    /// The CSS selector text, list entries trimmed and joined with `, `.
    pub fn to_css(&self) -> String {
        match self {
            SelectorInput::One(s) => s.trim().to_string(),
            SelectorInput::Many(list) => list
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Viewport as given by the caller; missing fields fall back to `Viewport::default()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewportOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub device_scale_factor: Option<f64>,
}

/// `scrollToLoad` accepts a plain flag or a tuning object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScrollToLoadOptions {
    Toggle(bool),
    Tuned(ScrollTuning),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrollTuning {
    pub enabled: Option<bool>,
    pub step_px: Option<f64>,
    pub delay_ms: Option<u64>,
    pub max_steps: Option<u32>,
    pub max_time_ms: Option<u64>,
}

/// Raw, partially specified capture options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureOptions {
    pub format: Option<ImageFormat>,
    pub quality: Option<u32>,
    pub full_page: Option<bool>,
    pub selector: Option<SelectorInput>,
    pub selector_mode: Option<SelectorMode>,
    pub selector_padding: Option<f64>,
    pub selector_gap: Option<f64>,
    pub split: Option<SplitMode>,
    pub split_max_pixel_height: Option<u32>,
    pub split_overlap_px: Option<f64>,
    pub max_pixel_width: Option<u32>,
    pub viewport: Option<ViewportOptions>,
    pub capture_beyond_viewport: Option<bool>,
    pub from_surface: Option<bool>,
    pub omit_background: Option<bool>,
    pub scroll_to_load: Option<ScrollToLoadOptions>,
    pub settle_timeout_ms: Option<u64>,
    pub capture_delay_ms: Option<u64>,
    pub live_render_predicate: Option<String>,
    pub live_render_timeout_ms: Option<u64>,
}

impl CaptureOptions {
    /// Parse options from a JSON document
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::ConfigError(format!("invalid options JSON: {}", e)))
    }

    /// Overlay every field set in `other` on top of `self`.
    pub fn merge(mut self, other: CaptureOptions) -> Self {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $( if other.$field.is_some() { self.$field = other.$field; } )*
            };
        }
        take!(
            format,
            quality,
            full_page,
            selector,
            selector_mode,
            selector_padding,
            selector_gap,
            split,
            split_max_pixel_height,
            split_overlap_px,
            max_pixel_width,
            viewport,
            capture_beyond_viewport,
            from_surface,
            omit_background,
            scroll_to_load,
            settle_timeout_ms,
            capture_delay_ms,
            live_render_predicate,
            live_render_timeout_ms,
        );
        self
    }
}

/// Resolved auto-scroll settings used while settling lazy content
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollToLoad {
    pub enabled: bool,
    pub step_px: f64,
    pub delay: Duration,
    pub max_steps: u32,
    pub max_time: Duration,
}

/// Bounded wait on an in-page "live render done" predicate
#[derive(Debug, Clone, PartialEq)]
pub struct LiveRenderWait {
    pub predicate: String,
    pub timeout: Duration,
}

/// Fully-typed, immutable input to one capture run
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub format: ImageFormat,
    pub quality: Option<u8>,
    pub full_page: bool,
    pub selector: Option<String>,
    pub selector_mode: SelectorMode,
    pub selector_padding: f64,
    pub selector_gap: f64,
    pub split: SplitMode,
    pub split_max_pixel_height: u32,
    pub split_overlap_px: f64,
    pub max_pixel_width: u32,
    pub viewport: Viewport,
    pub capture_beyond_viewport: Option<bool>,
    pub from_surface: Option<bool>,
    pub omit_background: bool,
    pub scroll_to_load: ScrollToLoad,
    pub settle_timeout: Duration,
    pub capture_delay: Duration,
    pub live_render: Option<LiveRenderWait>,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        let viewport = Viewport::default();
        Self {
            format: ImageFormat::default(),
            quality: None,
            full_page: true,
            selector: None,
            selector_mode: SelectorMode::default(),
            selector_padding: 0.0,
            selector_gap: DEFAULT_SELECTOR_GAP,
            split: SplitMode::default(),
            split_max_pixel_height: DEFAULT_SPLIT_MAX_PIXEL_HEIGHT,
            split_overlap_px: 0.0,
            max_pixel_width: 0,
            viewport,
            capture_beyond_viewport: None,
            from_surface: None,
            omit_background: false,
            scroll_to_load: ScrollToLoad {
                enabled: true,
                step_px: viewport.height as f64,
                delay: Duration::from_millis(DEFAULT_SCROLL_DELAY_MS),
                max_steps: DEFAULT_SCROLL_MAX_STEPS,
                max_time: Duration::from_millis(DEFAULT_SCROLL_MAX_TIME_MS),
            },
            settle_timeout: Duration::from_millis(DEFAULT_SETTLE_TIMEOUT_MS),
            capture_delay: Duration::from_millis(DEFAULT_CAPTURE_DELAY_MS),
            live_render: None,
        }
    }
}

impl CaptureRequest {
    /// Normalize and validate raw options, filling every default.
    pub fn from_options(opts: CaptureOptions) -> Result<Self> {
        let format = opts.format.unwrap_or_default();

        let quality = match opts.quality {
            Some(q) if q > 100 => {
                return Err(Error::ConfigError(format!("quality must be within 0..=100, got {}", q)));
            }
            Some(q) if !format.supports_quality() => {
                warn!("Ignoring quality {} for {} output", q, format.extension());
                None
            }
            Some(q) => Some(q as u8),
            None => None,
        };

        let defaults = Viewport::default();
        let vp = opts.viewport.unwrap_or_default();
        let viewport = Viewport {
            width: vp.width.unwrap_or(defaults.width),
            height: vp.height.unwrap_or(defaults.height),
            device_scale_factor: vp.device_scale_factor.unwrap_or(defaults.device_scale_factor),
        };
        if viewport.width == 0 || viewport.height == 0 {
            return Err(Error::ConfigError(format!(
                "viewport must be non-empty, got {}x{}",
                viewport.width, viewport.height
            )));
        }
        if !(viewport.device_scale_factor.is_finite() && viewport.device_scale_factor > 0.0) {
            return Err(Error::ConfigError(format!(
                "deviceScaleFactor must be positive, got {}",
                viewport.device_scale_factor
            )));
        }

        let selector = opts.selector.as_ref().map(SelectorInput::to_css);
        let full_page = opts.full_page.unwrap_or(true);

        let split_max_pixel_height = match opts.split_max_pixel_height {
            Some(0) | None => DEFAULT_SPLIT_MAX_PIXEL_HEIGHT,
            Some(h) => h,
        };

        let scroll_default = full_page && selector.is_none();
        let tuning = match opts.scroll_to_load {
            Some(ScrollToLoadOptions::Toggle(enabled)) => ScrollTuning {
                enabled: Some(enabled),
                ..Default::default()
            },
            Some(ScrollToLoadOptions::Tuned(t)) => t,
            None => ScrollTuning::default(),
        };
        let scroll_to_load = ScrollToLoad {
            enabled: tuning.enabled.unwrap_or(scroll_default),
            step_px: tuning
                .step_px
                .filter(|s| *s > 0.0)
                .unwrap_or(viewport.height as f64),
            delay: Duration::from_millis(tuning.delay_ms.unwrap_or(DEFAULT_SCROLL_DELAY_MS)),
            max_steps: tuning.max_steps.unwrap_or(DEFAULT_SCROLL_MAX_STEPS),
            max_time: Duration::from_millis(tuning.max_time_ms.unwrap_or(DEFAULT_SCROLL_MAX_TIME_MS)),
        };

        let live_render = opts
            .live_render_predicate
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(|predicate| LiveRenderWait {
                predicate,
                timeout: Duration::from_millis(
                    opts.live_render_timeout_ms.unwrap_or(DEFAULT_LIVE_RENDER_TIMEOUT_MS),
                ),
            });

        Ok(Self {
            format,
            quality,
            full_page,
            selector,
            selector_mode: opts.selector_mode.unwrap_or_default(),
            selector_padding: opts.selector_padding.unwrap_or(0.0).max(0.0),
            selector_gap: opts.selector_gap.unwrap_or(DEFAULT_SELECTOR_GAP).max(0.0),
            split: opts.split.unwrap_or_default(),
            split_max_pixel_height,
            split_overlap_px: opts.split_overlap_px.unwrap_or(0.0).max(0.0),
            max_pixel_width: opts.max_pixel_width.unwrap_or(0),
            viewport,
            capture_beyond_viewport: opts.capture_beyond_viewport,
            from_surface: opts.from_surface,
            omit_background: opts.omit_background.unwrap_or(false),
            scroll_to_load,
            settle_timeout: Duration::from_millis(opts.settle_timeout_ms.unwrap_or(DEFAULT_SETTLE_TIMEOUT_MS)),
            capture_delay: Duration::from_millis(opts.capture_delay_ms.unwrap_or(DEFAULT_CAPTURE_DELAY_MS)),
            live_render,
        })
    }
}
