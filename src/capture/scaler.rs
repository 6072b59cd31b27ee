//! Bounding output width through the device scale factor

use crate::session::PageSession;
use crate::{Result, Viewport};
use log::debug;

/// Lowest scale factor the scaler will go to
pub const MIN_SCALE: f64 = 0.25;

/// Changes smaller than this are not worth a relayout
const MIN_SCALE_DELTA: f64 = 0.01;

/// Scale factor that keeps `css_width` within `max_pixel_width` physical
/// pixels, or `None` when the current factor should stay.
///
/// Never returns a factor above `current`.
pub fn desired_scale(current: f64, max_pixel_width: u32, css_width: f64) -> Option<f64> {
    if max_pixel_width == 0 || !(css_width > 0.0) {
        return None;
    }
    let bounded = (max_pixel_width as f64 / css_width).max(MIN_SCALE);
    let desired = bounded.min(current);
    if (current - desired).abs() < MIN_SCALE_DELTA {
        None
    } else {
        Some(desired)
    }
}

/// Re-apply the viewport when `css_width` would exceed the pixel budget.
///
/// Returns the viewport in effect afterwards.
pub fn fit_width<S: PageSession + ?Sized>(
    session: &S,
    viewport: Viewport,
    max_pixel_width: u32,
    css_width: f64,
) -> Result<Viewport> {
    match desired_scale(viewport.device_scale_factor, max_pixel_width, css_width) {
        Some(dsf) => {
            debug!(
                "Scaling {}css px wide capture from dsf {} to {} (max {}px)",
                css_width, viewport.device_scale_factor, dsf, max_pixel_width
            );
            let scaled = viewport.with_scale(dsf);
            session.set_viewport(&scaled)?;
            Ok(scaled)
        }
        None => Ok(viewport),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_budget_is_zero() {
        assert_eq!(desired_scale(2.0, 0, 5000.0), None);
    }

    #[test]
    fn shrinks_to_budget() {
        assert_eq!(desired_scale(2.0, 1000, 1000.0), Some(1.0));
    }

    #[test]
    fn never_upscales() {
        assert_eq!(desired_scale(1.0, 4000, 1000.0), None);
    }

    #[test]
    fn floors_at_quarter_scale() {
        assert_eq!(desired_scale(1.0, 100, 10_000.0), Some(MIN_SCALE));
    }

    #[test]
    fn ignores_tiny_changes() {
        assert_eq!(desired_scale(1.0, 995, 1000.0), None);
        assert_eq!(desired_scale(1.0, 985, 1000.0), Some(0.985));
    }

    #[test]
    fn floor_does_not_raise_an_already_small_scale() {
        assert_eq!(desired_scale(0.2, 10, 1000.0), None);
    }
}
