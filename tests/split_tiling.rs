//! Property tests for split planning

use docshot::capture::split::SplitPlanner;
use proptest::prelude::*;

fn candidates_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..60_000.0, 0..40).prop_map(|mut v| {
        v.sort_by(|a, b| a.total_cmp(b));
        v
    })
}

proptest! {
    #[test]
    fn slices_tile_the_region(
        height in 1.0f64..60_000.0,
        max_px in 1_000u32..20_000,
        dpr in prop::sample::select(vec![1.0f64, 1.5, 2.0, 3.0]),
        candidates in candidates_strategy(),
    ) {
        let planner = SplitPlanner::new(max_px, 0.0, dpr);
        let plan = planner.plan(height, &candidates);

        prop_assert!(!plan.is_empty());
        prop_assert_eq!(plan.slices()[0].start, 0.0);
        prop_assert_eq!(plan.slices()[plan.len() - 1].end, height);
        for pair in plan.slices().windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
        }
        for slice in plan.slices() {
            prop_assert!(slice.end > slice.start);
            prop_assert!(slice.end - slice.start <= planner.target_slice_height() + 1e-6);
        }
    }

    #[test]
    fn only_the_last_slice_may_be_short(
        height in 1.0f64..60_000.0,
        max_px in 1_000u32..20_000,
        candidates in candidates_strategy(),
    ) {
        let planner = SplitPlanner::new(max_px, 0.0, 1.0);
        let plan = planner.plan(height, &candidates);
        let n = plan.len();
        for slice in &plan.slices()[..n - 1] {
            prop_assert!(slice.end - slice.start >= planner.min_slice());
        }
    }

    #[test]
    fn consecutive_slices_overlap_by_the_configured_amount(
        height in 1.0f64..60_000.0,
        overlap in 0.0f64..2_000.0,
        candidates in candidates_strategy(),
    ) {
        let planner = SplitPlanner::new(4_000, overlap, 1.0);
        let plan = planner.plan(height, &candidates);
        prop_assert_eq!(plan.slices()[plan.len() - 1].end, height);
        for pair in plan.slices().windows(2) {
            let stepped_back = pair[0].end - overlap;
            let expected = if stepped_back > pair[0].start { stepped_back } else { pair[0].end };
            prop_assert_eq!(pair[1].start, expected);
            prop_assert!(pair[1].start > pair[0].start);
        }
    }
}

#[test]
fn overlap_at_min_slice_is_not_reduced() {
    // target 1000, min slice 250
    let planner = SplitPlanner::new(1_000, 250.0, 1.0);
    let plan = planner.plan(1_700.0, &[]);
    let starts: Vec<f64> = plan.slices().iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![0.0, 750.0]);
}

#[test]
fn plan_with_overlap_repeats_the_seam() {
    let planner = SplitPlanner::new(1_000, 100.0, 1.0);
    let plan = planner.plan(2_500.0, &[]);
    let bounds: Vec<(f64, f64)> = plan.slices().iter().map(|s| (s.start, s.end)).collect();
    assert_eq!(bounds, vec![(0.0, 1_000.0), (900.0, 1_900.0), (1_800.0, 2_500.0)]);
}
