//! Waiting for the page to finish loading before it is measured
//!
//! All waits here are bounded and non-fatal: a timeout is logged and the
//! capture goes ahead with whatever has rendered.

use crate::request::{CaptureRequest, LiveRenderWait, ScrollToLoad};
use crate::session::PageSession;
use crate::Result;
use log::{debug, warn};
use std::time::{Duration, Instant};

/// Consecutive steps without scroll progress before auto-scroll gives up
const STALL_LIMIT: u32 = 2;

/// What an auto-scroll pass did
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollReport {
    pub steps: u32,
    pub reached_bottom: bool,
    pub stalled: bool,
}

/// Scroll top to bottom in bounded steps so lazy content gets a chance to load.
pub fn auto_scroll<S: PageSession + ?Sized>(session: &S, settings: &ScrollToLoad) -> Result<ScrollReport> {
    let started = Instant::now();
    let mut report = ScrollReport::default();
    let mut without_progress = 0;

    while report.steps < settings.max_steps {
        if started.elapsed() >= settings.max_time {
            debug!("Auto-scroll hit its {:?} time budget", settings.max_time);
            break;
        }

        let before = session.scroll_metrics()?;
        if before.at_bottom() {
            report.reached_bottom = true;
            break;
        }

        session.scroll_to(before.scroll_y + settings.step_px)?;
        report.steps += 1;
        if !settings.delay.is_zero() {
            std::thread::sleep(settings.delay);
        }

        let after = session.scroll_metrics()?;
        if after.scroll_y <= before.scroll_y + 0.5 {
            without_progress += 1;
            if without_progress >= STALL_LIMIT {
                report.stalled = true;
                break;
            }
        } else {
            without_progress = 0;
        }
    }

    debug!("Auto-scroll finished: {:?}", report);
    Ok(report)
}

fn await_assets<S: PageSession + ?Sized>(session: &S, timeout: Duration) {
    match session.wait_for_assets(timeout) {
        Ok(true) => {}
        Ok(false) => warn!("Fonts/images still loading after {:?}; continuing", timeout),
        Err(e) => warn!("Waiting for fonts/images failed: {}; continuing", e),
    }
}

/// Wait for an external "live render done" signal; false when it never came.
pub fn await_live_render<S: PageSession + ?Sized>(session: &S, wait: &LiveRenderWait) -> bool {
    match session.wait_for_function(&wait.predicate, wait.timeout) {
        Ok(true) => true,
        Ok(false) => {
            warn!("Live render signal not seen within {:?}; continuing", wait.timeout);
            false
        }
        Err(e) => {
            warn!("Live render wait failed: {}; continuing", e);
            false
        }
    }
}

/// Fonts/images, optional auto-scroll, then the optional live-render signal.
pub fn settle<S: PageSession + ?Sized>(session: &S, request: &CaptureRequest) {
    await_assets(session, request.settle_timeout);

    if request.scroll_to_load.enabled {
        if let Err(e) = auto_scroll(session, &request.scroll_to_load) {
            warn!("Auto-scroll aborted: {}", e);
        }
        if let Err(e) = session.scroll_to(0.0) {
            warn!("Failed to scroll back to top: {}", e);
        }
        await_assets(session, request.settle_timeout);
    }

    if let Some(wait) = &request.live_render {
        await_live_render(session, wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedPage;
    use crate::Viewport;

    fn settings(max_steps: u32) -> ScrollToLoad {
        ScrollToLoad {
            enabled: true,
            step_px: 500.0,
            delay: Duration::ZERO,
            max_steps,
            max_time: Duration::from_secs(5),
        }
    }

    #[test]
    fn scrolls_until_bottom() {
        let page = ScriptedPage::builder()
            .viewport(Viewport { width: 800, height: 600, device_scale_factor: 1.0 })
            .block("div", 2000.0)
            .build();
        let report = auto_scroll(&page, &settings(100)).unwrap();
        assert!(report.reached_bottom);
        assert_eq!(page.scroll_history(), vec![500.0, 1000.0, 1400.0]);
    }

    #[test]
    fn step_limit_is_respected() {
        let page = ScriptedPage::builder().block("div", 50_000.0).build();
        let report = auto_scroll(&page, &settings(3)).unwrap();
        assert_eq!(report.steps, 3);
        assert!(!report.reached_bottom);
    }

    #[test]
    fn stalled_scrolling_stops_after_two_steps() {
        let page = ScriptedPage::builder().block("div", 5000.0).build();
        page.freeze_scrolling();
        let report = auto_scroll(&page, &settings(100)).unwrap();
        assert!(report.stalled);
        assert_eq!(report.steps, 2);
    }

    #[test]
    fn missing_live_signal_is_not_fatal() {
        let page = ScriptedPage::builder().block("div", 100.0).build();
        let wait = LiveRenderWait {
            predicate: "window.__rendered === true".into(),
            timeout: Duration::from_millis(60),
        };
        assert!(!await_live_render(&page, &wait));

        page.set_eval_result("window.__rendered === true", serde_json::json!(true));
        assert!(await_live_render(&page, &wait));
    }
}
