//! Selector capture modes: first, each, union and stitch

use super::executor::CaptureExecutor;
use super::split::{should_split, SplitPlanner};
use super::stitch::StitchGuard;
use crate::geometry::{CaptureRegion, ElementBox};
use crate::request::{CaptureRequest, SelectorMode};
use crate::session::{ElementHandle, PageSession, StitchLayout};
use crate::{Error, Result, Viewport};
use log::debug;

/// Everything a selector mode needs besides the session
pub struct ModeContext<'r> {
    pub request: &'r CaptureRequest,
    /// Viewport in effect after scaling
    pub viewport: Viewport,
    pub capture_beyond_viewport: bool,
}

pub fn capture_selector<S: PageSession + ?Sized>(
    session: &S,
    executor: &CaptureExecutor<'_, S>,
    elements: &[ElementHandle],
    ctx: &ModeContext<'_>,
) -> Result<Vec<Vec<u8>>> {
    debug!(
        "Capturing {} element(s) in {:?} mode",
        elements.len(),
        ctx.request.selector_mode
    );
    match ctx.request.selector_mode {
        SelectorMode::First => capture_first(session, executor, elements, ctx),
        SelectorMode::Each => capture_each(session, executor, elements, ctx),
        SelectorMode::Union => capture_union(session, executor, elements, ctx),
        SelectorMode::Stitch => capture_stitch(session, executor, elements, ctx),
    }
}

fn document_clip<S: PageSession + ?Sized>(session: &S, b: &ElementBox, padding: f64) -> Result<ElementBox> {
    let metrics = session.scroll_metrics()?;
    Ok(b.padded(padding)
        .clamp_to_document(metrics.scroll_width, metrics.scroll_height))
}

fn capture_first<S: PageSession + ?Sized>(
    session: &S,
    executor: &CaptureExecutor<'_, S>,
    elements: &[ElementHandle],
    ctx: &ModeContext<'_>,
) -> Result<Vec<Vec<u8>>> {
    let first = elements
        .first()
        .ok_or_else(|| Error::SelectorEmpty(ctx.request.selector.clone().unwrap_or_default()))?;
    let b = session
        .bounding_box(first)?
        .ok_or_else(|| Error::BoundingBoxUnavailable(format!("first match {}", first.id())))?;
    let clip = document_clip(session, &b, ctx.request.selector_padding)?;
    let region = CaptureRegion::from_box(&clip, ctx.capture_beyond_viewport);
    Ok(vec![executor.capture(&region)?])
}

fn capture_each<S: PageSession + ?Sized>(
    session: &S,
    executor: &CaptureExecutor<'_, S>,
    elements: &[ElementHandle],
    ctx: &ModeContext<'_>,
) -> Result<Vec<Vec<u8>>> {
    let mut buffers = Vec::with_capacity(elements.len());
    for element in elements {
        session.scroll_into_view(element)?;
        let Some(b) = session.bounding_box(element)? else {
            debug!("Skipping {}: no bounding box", element.id());
            continue;
        };
        let clip = document_clip(session, &b, ctx.request.selector_padding)?;
        if !buffers.is_empty() {
            executor.pause();
        }
        buffers.push(executor.capture(&CaptureRegion::from_box(&clip, ctx.capture_beyond_viewport))?);
    }

    if buffers.is_empty() {
        return Err(Error::BoundingBoxUnavailable(format!(
            "none of the {} matched element(s) could be measured",
            elements.len()
        )));
    }
    Ok(buffers)
}

fn capture_union<S: PageSession + ?Sized>(
    session: &S,
    executor: &CaptureExecutor<'_, S>,
    elements: &[ElementHandle],
    ctx: &ModeContext<'_>,
) -> Result<Vec<Vec<u8>>> {
    let mut boxes = Vec::with_capacity(elements.len());
    for element in elements {
        if let Some(b) = session.bounding_box(element)? {
            boxes.push(b);
        }
    }
    let union = ElementBox::union_all(&boxes).ok_or_else(|| {
        Error::BoundingBoxUnavailable(format!(
            "none of the {} matched element(s) could be measured",
            elements.len()
        ))
    })?;
    let clip = document_clip(session, &union, ctx.request.selector_padding)?;

    let dpr = ctx.viewport.device_scale_factor;
    if !should_split(ctx.request.split, clip.height, dpr) {
        let region = CaptureRegion::from_box(&clip, ctx.capture_beyond_viewport);
        return Ok(vec![executor.capture(&region)?]);
    }

    let planner = SplitPlanner::new(ctx.request.split_max_pixel_height, ctx.request.split_overlap_px, dpr);
    let candidates = session.cut_candidates(&clip)?;
    let plan = planner.plan(clip.height, &candidates);
    debug!("Union of {}css px split into {} slice(s)", clip.height, plan.len());
    executor.capture_sequence(&plan.regions(&clip, ctx.capture_beyond_viewport), false)
}

fn capture_stitch<S: PageSession + ?Sized>(
    session: &S,
    executor: &CaptureExecutor<'_, S>,
    elements: &[ElementHandle],
    ctx: &ModeContext<'_>,
) -> Result<Vec<Vec<u8>>> {
    let layout = StitchLayout {
        gap: ctx.request.selector_gap,
        padding: ctx.request.selector_padding,
        transparent: ctx.request.omit_background,
    };

    session.scroll_to(0.0)?;
    let mut guard = StitchGuard::build(session, elements, &layout)?;
    let container = guard
        .container()
        .cloned()
        .ok_or_else(|| Error::StitchContainerCreationFailed("container vanished".into()))?;

    session.next_frame()?;
    let b = session
        .bounding_box(&container)?
        .ok_or_else(|| Error::BoundingBoxUnavailable("stitch container".into()))?;
    let metrics = session.scroll_metrics()?;
    let clip = b.clamp_to_document(metrics.scroll_width, metrics.scroll_height);
    let buffer = executor.capture(&CaptureRegion::from_box(&clip, ctx.capture_beyond_viewport))?;

    guard.restore();
    Ok(vec![buffer])
}
