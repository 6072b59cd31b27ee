//! Issuing screenshot calls

use crate::geometry::CaptureRegion;
use crate::request::{CaptureRequest, ImageFormat};
use crate::session::{PageSession, ScreenshotParams};
use crate::{Error, Result};
use log::{debug, warn};
use std::time::Duration;

/// Encoding options shared by every screenshot of one capture run
#[derive(Debug, Clone, PartialEq)]
pub struct ShotOptions {
    pub format: ImageFormat,
    pub quality: Option<u8>,
    pub omit_background: bool,
    pub from_surface: Option<bool>,
    /// Pause between consecutive captures of a sequence
    pub settle_delay: Duration,
}

impl ShotOptions {
    pub fn from_request(request: &CaptureRequest) -> Self {
        Self {
            format: request.format,
            quality: request.quality,
            omit_background: request.omit_background,
            from_surface: request.from_surface,
            settle_delay: request.capture_delay,
        }
    }
}

/// Parameter variants tried in order by [`CaptureExecutor::capture_with_fallback`].
///
/// The configured parameters come first. An explicit `from_surface: false` is
/// then dropped in favour of the browser default, and finally the
/// beyond-viewport flag is flipped.
pub fn fallback_variants(base: &ScreenshotParams) -> Vec<ScreenshotParams> {
    let mut variants = vec![base.clone()];

    let mut last = base.clone();
    if base.from_surface == Some(false) {
        last.from_surface = None;
        variants.push(last.clone());
    }

    last.capture_beyond_viewport = Some(!base.capture_beyond_viewport.unwrap_or(false));
    variants.push(last);
    variants
}

pub struct CaptureExecutor<'a, S: PageSession + ?Sized> {
    session: &'a S,
    options: ShotOptions,
}

impl<'a, S: PageSession + ?Sized> CaptureExecutor<'a, S> {
    pub fn new(session: &'a S, options: ShotOptions) -> Self {
        Self { session, options }
    }

    pub fn params_for(&self, region: &CaptureRegion) -> ScreenshotParams {
        ScreenshotParams {
            format: self.options.format,
            quality: self.options.quality,
            clip: Some(region.as_box()),
            omit_background: self.options.omit_background,
            capture_beyond_viewport: Some(region.capture_beyond_viewport),
            from_surface: self.options.from_surface,
        }
    }

    /// One screenshot, no retries
    pub fn capture(&self, region: &CaptureRegion) -> Result<Vec<u8>> {
        self.session
            .screenshot(&self.params_for(region))
            .map_err(|e| Error::CaptureFailed {
                message: e.to_string(),
                attempts: 1,
            })
    }

    /// One screenshot walking the fallback chain until an attempt succeeds.
    ///
    /// When every variant fails, the error carries the first failure's message.
    pub fn capture_with_fallback(&self, region: &CaptureRegion) -> Result<Vec<u8>> {
        let variants = fallback_variants(&self.params_for(region));
        let mut first_failure: Option<String> = None;

        for (attempt, params) in variants.iter().enumerate() {
            match self.session.screenshot(params) {
                Ok(bytes) => {
                    if attempt > 0 {
                        debug!("Screenshot succeeded on attempt {} with {:?}", attempt + 1, params);
                    }
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!("Screenshot attempt {} failed: {}", attempt + 1, e);
                    first_failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        Err(Error::CaptureFailed {
            message: first_failure.unwrap_or_default(),
            attempts: variants.len(),
        })
    }

    /// Capture regions strictly in order.
    ///
    /// Every capture after the first waits for the settle delay. With
    /// `scroll_to_slice`, the window is scrolled to each region's top first so
    /// viewport-driven lazy loaders fire.
    pub fn capture_sequence(&self, regions: &[CaptureRegion], scroll_to_slice: bool) -> Result<Vec<Vec<u8>>> {
        let mut buffers = Vec::with_capacity(regions.len());
        for (i, region) in regions.iter().enumerate() {
            if scroll_to_slice {
                self.session.scroll_to(region.y)?;
            }
            if i > 0 {
                self.pause();
            }
            debug!(
                "Capturing region {}/{} at y={} ({}x{})",
                i + 1,
                regions.len(),
                region.y,
                region.width,
                region.height
            );
            buffers.push(self.capture(region)?);
        }
        Ok(buffers)
    }

    /// Wait out the settle delay between captures
    pub fn pause(&self) {
        if !self.options.settle_delay.is_zero() {
            std::thread::sleep(self.options.settle_delay);
        }
    }
}
