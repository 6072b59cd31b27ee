//! Capture engine tests against the in-memory page

use docshot::output::png_dimensions;
use docshot::{capture, CaptureOptions, CaptureRequest, Error, ScriptedPage, Viewport};
use serde_json::json;

fn request(options: serde_json::Value) -> CaptureRequest {
    let mut value = json!({
        "viewport": { "width": 800, "height": 600, "deviceScaleFactor": 1 },
        "captureDelayMs": 0,
        "scrollToLoad": false,
    });
    if let (Some(base), Some(extra)) = (value.as_object_mut(), options.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    let options = CaptureOptions::from_json(&value.to_string()).expect("valid options");
    CaptureRequest::from_options(options).expect("valid request")
}

fn page() -> docshot::scripted::ScriptedPageBuilder {
    ScriptedPage::builder().viewport(Viewport {
        width: 800,
        height: 600,
        device_scale_factor: 1.0,
    })
}

fn dimensions(buffers: &[Vec<u8>]) -> Vec<(u32, u32)> {
    buffers.iter().map(|b| png_dimensions(b).expect("png")).collect()
}

/// Two short blocks separated by a tall spacer
fn sparse_page() -> ScriptedPage {
    page()
        .block("section#a", 300.0)
        .block("div.spacer", 2000.0)
        .block("section#c", 300.0)
        .build()
}

#[test]
fn each_mode_skips_unmeasurable_matches() {
    let page = page()
        .block("div.card", 100.0)
        .block("div.card", 0.0)
        .block("div.card", 50.0)
        .build();
    let result = capture(&page, &request(json!({ "selector": ".card", "selectorMode": "each" }))).unwrap();
    assert_eq!(dimensions(result.buffers()), vec![(800, 100), (800, 50)]);
}

#[test]
fn nested_matches_are_captured_once() {
    let page = page()
        .section("div.card#outer", |s| s.block("div.card#inner", 80.0))
        .block("div.card#sibling", 40.0)
        .build();
    let result = capture(&page, &request(json!({ "selector": ".card", "selectorMode": "each" }))).unwrap();
    assert_eq!(result.len(), 2);
}

#[test]
fn first_mode_pads_and_clamps() {
    let page = page().block("header", 50.0).block("main#m", 200.0).build();
    let result = capture(
        &page,
        &request(json!({ "selector": "#m", "selectorMode": "first", "selectorPadding": 10 })),
    )
    .unwrap();
    let shots = page.screenshots();
    let clip = shots[0].clip.unwrap();
    assert_eq!(clip.x, 0.0);
    assert_eq!(clip.y, 40.0);
    assert_eq!(clip.height, 220.0);
    assert_eq!(dimensions(result.buffers()), vec![(800, 220)]);
}

#[test]
fn stitch_is_tighter_than_union() {
    let union_page = sparse_page();
    let union = capture(
        &union_page,
        &request(json!({ "selector": ["#a", "#c"], "selectorMode": "union" })),
    )
    .unwrap();
    assert_eq!(dimensions(union.buffers()), vec![(800, 2600)]);

    let stitch_page = sparse_page();
    let stitch = capture(
        &stitch_page,
        &request(json!({ "selector": ["#a", "#c"], "selectorMode": "stitch" })),
    )
    .unwrap();
    assert_eq!(dimensions(stitch.buffers()), vec![(800, 616)]);
}

#[test]
fn stitch_restores_the_document() {
    let page = sparse_page();
    let before = page.dom_snapshot();
    capture(&page, &request(json!({ "selector": "section" }))).unwrap();
    assert_eq!(page.dom_snapshot(), before);
}

#[test]
fn stitch_restores_after_failed_screenshot() {
    let page = sparse_page();
    let before = page.dom_snapshot();
    page.fail_screenshots_when(|_| Some("renderer crashed".to_string()));

    let err = capture(&page, &request(json!({ "selector": "section" }))).unwrap_err();
    assert!(matches!(err, Error::CaptureFailed { .. }));
    assert_eq!(page.dom_snapshot(), before);
}

#[test]
fn stitch_restores_after_partial_build() {
    let page = sparse_page();
    let before = page.dom_snapshot();
    page.fail_wrap_after(1);

    let err = capture(&page, &request(json!({ "selector": "section" }))).unwrap_err();
    assert!(matches!(err, Error::StitchContainerCreationFailed(_)));
    assert_eq!(page.dom_snapshot(), before);
}

#[test]
fn tall_page_stays_whole_below_auto_threshold() {
    let page = page().block("main", 20_000.0).build();
    let result = capture(&page, &request(json!({}))).unwrap();
    assert_eq!(dimensions(result.buffers()), vec![(800, 20_000)]);
}

#[test]
fn forced_split_slices_tall_page() {
    let page = page().block("main", 20_000.0).build();
    let result = capture(&page, &request(json!({ "split": true }))).unwrap();
    assert_eq!(dimensions(result.buffers()), vec![(800, 14_000), (800, 6_000)]);
    assert_eq!(page.scroll_history().last(), Some(&0.0));
}

#[test]
fn split_prefers_block_boundaries() {
    let page = page()
        .section("article", |a| {
            a.block("p", 9_000.0).block("p", 4_000.0).block("p", 4_000.0)
        })
        .build();
    let result = capture(&page, &request(json!({ "split": true }))).unwrap();
    assert_eq!(dimensions(result.buffers()), vec![(800, 13_000), (800, 4_000)]);
}

#[test]
fn fallback_recovers_without_surface_flag() {
    let page = page().block("main", 1_000.0).build();
    page.fail_screenshots_when(|p| {
        if p.from_surface == Some(false) {
            Some("surface capture unsupported".to_string())
        } else {
            None
        }
    });

    let result = capture(&page, &request(json!({ "fromSurface": false }))).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(page.failed_screenshot_count(), 1);
    assert_eq!(page.screenshots()[0].from_surface, None);
}

#[test]
fn fallback_reports_first_failure_when_exhausted() {
    let page = page().block("main", 1_000.0).build();
    let mut calls = 0;
    page.fail_screenshots_when(move |_| {
        calls += 1;
        Some(format!("failure {}", calls))
    });

    match capture(&page, &request(json!({ "fromSurface": false }))) {
        Err(Error::CaptureFailed { message, attempts }) => {
            assert_eq!(attempts, 3);
            assert!(message.contains("failure 1"));
        }
        other => panic!("expected CaptureFailed, got {:?}", other),
    }
}

#[test]
fn pixel_width_budget_never_upscales() {
    let page = page().block("main", 1_000.0).build();
    capture(&page, &request(json!({ "maxPixelWidth": 4000 }))).unwrap();
    assert_eq!(page.viewport_history().len(), 1);
}

#[test]
fn pixel_width_budget_downscales() {
    let page = page().block("main", 1_000.0).build();
    let result = capture(&page, &request(json!({ "maxPixelWidth": 400 }))).unwrap();
    let history = page.viewport_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].device_scale_factor, 0.5);
    assert_eq!(dimensions(result.buffers()), vec![(400, 500)]);
}

#[test]
fn viewport_only_capture() {
    let page = page().block("main", 5_000.0).build();
    let result = capture(&page, &request(json!({ "fullPage": false }))).unwrap();
    assert_eq!(dimensions(result.buffers()), vec![(800, 600)]);
    assert_eq!(page.screenshots()[0].capture_beyond_viewport, Some(false));
}

#[test]
fn unmatched_selector_is_an_error() {
    let page = page().block("main", 100.0).build();
    let err = capture(&page, &request(json!({ "selector": "#missing" }))).unwrap_err();
    assert!(matches!(err, Error::SelectorEmpty(_)));

    let err = capture(&page, &request(json!({ "selector": "   " }))).unwrap_err();
    assert!(matches!(err, Error::SelectorEmpty(_)));
}

#[test]
fn scroll_to_load_walks_then_returns_to_top() {
    let page = page().block("main", 3_000.0).build();
    let req = request(json!({ "scrollToLoad": { "enabled": true, "stepPx": 1000, "delayMs": 0 } }));
    capture(&page, &req).unwrap();
    let history = page.scroll_history();
    assert!(history.contains(&2_400.0));
    assert_eq!(history.last(), Some(&0.0));
}

#[test]
fn union_taller_than_auto_threshold_is_split() {
    let page = page()
        .block("section#a", 300.0)
        .block("div.spacer", 35_000.0)
        .block("section#c", 300.0)
        .build();
    let result = capture(
        &page,
        &request(json!({ "selector": ["#a", "#c"], "selectorMode": "union" })),
    )
    .unwrap();
    // The 300px boundary is under the minimum slice, so the first cut is the ideal one
    assert_eq!(
        dimensions(result.buffers()),
        vec![(800, 14_000), (800, 14_000), (800, 7_600)]
    );
    let starts: Vec<f64> = page.screenshots().iter().map(|p| p.clip.unwrap().y).collect();
    assert_eq!(starts, vec![0.0, 14_000.0, 28_000.0]);
}

#[test]
fn first_mode_fails_on_zero_height_match() {
    let page = page()
        .block("div.card", 0.0)
        .block("div.card", 100.0)
        .build();
    let err = capture(&page, &request(json!({ "selector": ".card", "selectorMode": "first" }))).unwrap_err();
    assert!(matches!(err, Error::BoundingBoxUnavailable(_)));
    assert!(page.screenshots().is_empty());
}

#[test]
fn each_mode_scrolls_every_match_into_view() {
    let page = page()
        .block("div.card", 100.0)
        .block("div.spacer", 2_000.0)
        .block("div.card", 100.0)
        .build();
    capture(&page, &request(json!({ "selector": ".card", "selectorMode": "each" }))).unwrap();
    // The second card sits at 2100 but scrolling stops at 2200 - 600
    assert_eq!(page.scroll_history(), vec![0.0, 1_600.0]);
    assert_eq!(page.screenshots().len(), 2);
}

#[test]
fn handles_are_released_after_every_capture() {
    let page = sparse_page();
    capture(&page, &request(json!({ "selector": "section", "selectorMode": "stitch" }))).unwrap();
    assert_eq!(page.handle_releases(), 1);

    capture(&page, &request(json!({ "selector": "#missing" }))).unwrap_err();
    assert_eq!(page.handle_releases(), 2);

    page.fail_screenshots_when(|_| Some("renderer crashed".to_string()));
    capture(&page, &request(json!({}))).unwrap_err();
    assert_eq!(page.handle_releases(), 3);
}
