//! The capture engine
//!
//! [`capture`] runs one capture against a page session: apply the viewport,
//! settle, scale to the pixel-width budget, then either capture selector
//! matches in the requested mode or capture the page (viewport only, or the
//! full document split into slices when it is too tall).

pub mod executor;
pub mod modes;
pub mod resolver;
pub mod scaler;
pub mod settle;
pub mod split;
pub mod stitch;

use crate::geometry::{CaptureRegion, ElementBox};
use crate::request::CaptureRequest;
use crate::session::{ElementHandle, PageSession};
use crate::{Error, Result, Viewport};
use executor::{CaptureExecutor, ShotOptions};
use log::{debug, info, warn};
use modes::ModeContext;
use split::{should_split, SplitPlanner};

/// Ordered image buffers; index 0 is the top-most or first region
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    buffers: Vec<Vec<u8>>,
}

impl CaptureResult {
    fn new(buffers: Vec<Vec<u8>>) -> Result<Self> {
        if buffers.is_empty() {
            return Err(Error::Other("capture produced no images".into()));
        }
        Ok(Self { buffers })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers were produced
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffers(&self) -> &[Vec<u8>] {
        &self.buffers
    }

    pub fn into_buffers(self) -> Vec<Vec<u8>> {
        self.buffers
    }
}

/// Capture `session` as described by `request`.
///
/// Element handles taken during the capture are released afterwards,
/// whether or not it succeeded.
pub fn capture<S: PageSession + ?Sized>(session: &S, request: &CaptureRequest) -> Result<CaptureResult> {
    let result = run_capture(session, request);
    if let Err(e) = session.release_handles() {
        warn!("Failed to release element handles: {}", e);
    }
    result
}

fn run_capture<S: PageSession + ?Sized>(session: &S, request: &CaptureRequest) -> Result<CaptureResult> {
    session.set_viewport(&request.viewport)?;
    settle::settle(session, request);

    let executor = CaptureExecutor::new(session, ShotOptions::from_request(request));

    let buffers = match request.selector.as_deref() {
        Some(selector) => capture_selector(session, &executor, request, selector)?,
        None if request.full_page => capture_full_page(session, &executor, request)?,
        None => capture_viewport(session, &executor, request)?,
    };

    info!("Captured {} image(s)", buffers.len());
    CaptureResult::new(buffers)
}

fn beyond_viewport(request: &CaptureRequest) -> bool {
    request.capture_beyond_viewport.unwrap_or(true)
}

fn capture_selector<S: PageSession + ?Sized>(
    session: &S,
    executor: &CaptureExecutor<'_, S>,
    request: &CaptureRequest,
    selector: &str,
) -> Result<Vec<Vec<u8>>> {
    let elements = resolver::resolve(session, selector)?;
    let viewport = scale_for_elements(session, request, &elements)?;

    let ctx = ModeContext {
        request,
        viewport,
        capture_beyond_viewport: beyond_viewport(request),
    };
    modes::capture_selector(session, executor, &elements, &ctx)
}

fn scale_for_elements<S: PageSession + ?Sized>(
    session: &S,
    request: &CaptureRequest,
    elements: &[ElementHandle],
) -> Result<Viewport> {
    if request.max_pixel_width == 0 {
        return Ok(request.viewport);
    }
    let mut boxes = Vec::with_capacity(elements.len());
    for element in elements {
        if let Some(b) = session.bounding_box(element)? {
            boxes.push(b);
        }
    }
    match ElementBox::union_all(&boxes) {
        Some(union) => scaler::fit_width(
            session,
            request.viewport,
            request.max_pixel_width,
            union.padded(request.selector_padding).width,
        ),
        None => Ok(request.viewport),
    }
}

fn capture_full_page<S: PageSession + ?Sized>(
    session: &S,
    executor: &CaptureExecutor<'_, S>,
    request: &CaptureRequest,
) -> Result<Vec<Vec<u8>>> {
    let measured = session.scroll_metrics()?;
    let viewport = scaler::fit_width(session, request.viewport, request.max_pixel_width, measured.scroll_width)?;

    // Scaling can reflow resolution-dependent styles
    let metrics = if viewport != request.viewport {
        session.scroll_metrics()?
    } else {
        measured
    };
    let source = ElementBox::new(0.0, 0.0, metrics.scroll_width, metrics.scroll_height.max(1.0));
    let beyond = beyond_viewport(request);
    let dpr = viewport.device_scale_factor;

    if should_split(request.split, source.height, dpr) {
        let planner = SplitPlanner::new(request.split_max_pixel_height, request.split_overlap_px, dpr);
        let candidates = session.cut_candidates(&source)?;
        let plan = planner.plan(source.height, &candidates);
        debug!(
            "Full page {}x{} css px at dsf {} planned as {} slice(s)",
            source.width,
            source.height,
            dpr,
            plan.len()
        );
        if !plan.is_single() {
            let buffers = executor.capture_sequence(&plan.regions(&source, beyond), true);
            if let Err(e) = session.scroll_to(0.0) {
                warn!("Failed to scroll back to top after slicing: {}", e);
            }
            return buffers;
        }
    }

    let region = CaptureRegion::from_box(&source, beyond);
    Ok(vec![executor.capture_with_fallback(&region)?])
}

fn capture_viewport<S: PageSession + ?Sized>(
    session: &S,
    executor: &CaptureExecutor<'_, S>,
    request: &CaptureRequest,
) -> Result<Vec<Vec<u8>>> {
    let viewport = scaler::fit_width(
        session,
        request.viewport,
        request.max_pixel_width,
        request.viewport.width as f64,
    )?;
    let metrics = session.scroll_metrics()?;
    let width = if metrics.viewport_width > 0.0 {
        metrics.viewport_width
    } else {
        viewport.width as f64
    };
    let height = if metrics.viewport_height > 0.0 {
        metrics.viewport_height
    } else {
        viewport.height as f64
    };
    let region = CaptureRegion {
        x: metrics.scroll_x,
        y: metrics.scroll_y,
        width,
        height,
        capture_beyond_viewport: false,
    };
    Ok(vec![executor.capture(&region)?])
}
