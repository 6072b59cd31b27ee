use criterion::{black_box, criterion_group, criterion_main, Criterion};
use docshot::capture::split::SplitPlanner;
use docshot::{capture, CaptureOptions, CaptureRequest, ScriptedPage};

fn bench_plan(c: &mut Criterion) {
    // A long article: 2000 paragraphs of varying height
    let mut candidates = Vec::with_capacity(2000);
    let mut y = 0.0;
    for i in 0..2000 {
        y += 40.0 + (i % 7) as f64 * 25.0;
        candidates.push(y);
    }
    let height = y;

    let planner = SplitPlanner::new(14_000, 0.0, 2.0);
    c.bench_function("split_plan_article", |b| {
        b.iter(|| planner.plan(black_box(height), black_box(&candidates)))
    });

    let overlapping = SplitPlanner::new(4_000, 200.0, 1.0);
    let none: Vec<f64> = Vec::new();
    c.bench_function("split_plan_overlap_no_candidates", |b| {
        b.iter(|| overlapping.plan(black_box(height), black_box(&none)))
    });
}

fn bench_stitch(c: &mut Criterion) {
    let options = CaptureOptions::from_json(
        r#"{"selector": "section", "selectorMode": "stitch", "captureDelayMs": 0, "scrollToLoad": false}"#,
    )
    .expect("options");
    let request = CaptureRequest::from_options(options).expect("request");

    let page = (0..50)
        .fold(ScriptedPage::builder(), |b, _| b.block("section", 120.0).block("div.filler", 400.0))
        .build();

    c.bench_function("stitch_fifty_sections", |b| {
        b.iter(|| capture(&page, &request).expect("capture"))
    });
}

criterion_group!(benches, bench_plan, bench_stitch);
criterion_main!(benches);
