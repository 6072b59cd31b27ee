//! Dividing tall regions into slices
//!
//! Slices are cut at block-element bottoms where possible so that paragraphs,
//! code blocks and list items are not bisected. When no boundary fits, the cut
//! falls back to the ideal height and may go through an element.

use crate::geometry::{CaptureRegion, ElementBox};
use crate::request::SplitMode;
use log::warn;

/// Physical height above which `split: "auto"` divides a capture.
///
/// Stays below common GPU/compositor texture limits.
pub const AUTO_SPLIT_THRESHOLD_PX: f64 = 30_000.0;

const MAX_ITERATIONS: usize = 10_000;
const MIN_SLICE_CAP: f64 = 400.0;

/// Whether a source of `height_css` CSS pixels should be planned into slices.
pub fn should_split(mode: SplitMode, height_css: f64, dpr: f64) -> bool {
    match mode {
        SplitMode::Always => true,
        SplitMode::Never => false,
        SplitMode::Auto => (height_css * dpr).ceil() > AUTO_SPLIT_THRESHOLD_PX,
    }
}

/// `[start, end)` range within the source, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slice {
    pub start: f64,
    pub end: f64,
}

impl Slice {
    pub fn height(&self) -> f64 {
        self.end - self.start
    }
}

/// Ordered, non-empty slices covering `[0, H)` of a source rectangle
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlan {
    slices: Vec<Slice>,
}

impl SplitPlan {
    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.slices.len() == 1
    }

    /// Map slices onto `source` as capture regions.
    pub fn regions(&self, source: &ElementBox, capture_beyond_viewport: bool) -> Vec<CaptureRegion> {
        self.slices
            .iter()
            .map(|s| CaptureRegion {
                x: source.x,
                y: source.y + s.start,
                width: source.width,
                height: s.height(),
                capture_beyond_viewport,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitPlanner {
    max_pixel_height: u32,
    overlap_px: f64,
    dpr: f64,
}

impl SplitPlanner {
    pub fn new(max_pixel_height: u32, overlap_px: f64, dpr: f64) -> Self {
        Self {
            max_pixel_height: max_pixel_height.max(1),
            overlap_px: overlap_px.max(0.0),
            dpr: if dpr > 0.0 { dpr } else { 1.0 },
        }
    }

    /// Largest slice height in CSS pixels
    pub fn target_slice_height(&self) -> f64 {
        (self.max_pixel_height as f64 / self.dpr).floor().max(1.0)
    }

    /// Smallest height any slice but the last may have
    pub fn min_slice(&self) -> f64 {
        MIN_SLICE_CAP.min(0.25 * self.target_slice_height())
    }

    pub fn overlap(&self) -> f64 {
        self.overlap_px
    }

    /// Plan slices for a source `height` CSS pixels tall.
    ///
    /// `candidates` are offsets of block bottoms within the source; they do not
    /// need to be sorted.
    pub fn plan(&self, height: f64, candidates: &[f64]) -> SplitPlan {
        let height = height.max(0.0);
        let target = self.target_slice_height();
        let min_slice = self.min_slice();
        let overlap = self.overlap_px;

        let mut slices = Vec::new();
        let mut y = 0.0_f64;

        for _ in 0..MAX_ITERATIONS {
            let ideal = (y + target).min(height);
            let cut = if ideal >= height {
                height
            } else {
                candidates
                    .iter()
                    .copied()
                    .filter(|c| *c > y + 1.0 && *c <= ideal && *c - y >= min_slice)
                    .fold(None, |best: Option<f64>, c| Some(best.map_or(c, |b| b.max(c))))
                    .unwrap_or(ideal)
            };

            slices.push(Slice { start: y, end: cut });
            if cut >= height {
                return SplitPlan { slices };
            }
            let next = cut - overlap;
            if next <= y {
                // Overlap covers the whole slice; continue from the cut
                warn!("Overlap {} swallows slice [{}, {}); continuing without it", overlap, y, cut);
                y = cut;
            } else {
                y = next;
            }
        }

        warn!(
            "Split planning stopped after {} slices at y={} of {}",
            MAX_ITERATIONS, y, height
        );
        SplitPlan { slices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_threshold_uses_physical_pixels() {
        assert!(!should_split(SplitMode::Auto, 15_000.0, 2.0));
        assert!(should_split(SplitMode::Auto, 15_000.5, 2.0));
        assert!(should_split(SplitMode::Always, 10.0, 1.0));
        assert!(!should_split(SplitMode::Never, 1e9, 1.0));
    }

    #[test]
    fn short_source_is_a_single_slice() {
        let plan = SplitPlanner::new(14_000, 0.0, 1.0).plan(900.0, &[100.0, 500.0]);
        assert_eq!(plan.slices(), &[Slice { start: 0.0, end: 900.0 }]);
    }

    #[test]
    fn cuts_at_largest_candidate_under_ideal() {
        let planner = SplitPlanner::new(1000, 0.0, 1.0);
        let plan = planner.plan(2500.0, &[300.0, 950.0, 990.0, 1600.0, 1700.0]);
        let ends: Vec<f64> = plan.slices().iter().map(|s| s.end).collect();
        assert_eq!(ends, vec![990.0, 1700.0, 2500.0]);
    }

    #[test]
    fn falls_back_to_ideal_when_candidates_too_close() {
        // min slice is min(400, 250) = 250; 200 is too short to be used
        let planner = SplitPlanner::new(1000, 0.0, 1.0);
        let plan = planner.plan(1500.0, &[200.0]);
        let ends: Vec<f64> = plan.slices().iter().map(|s| s.end).collect();
        assert_eq!(ends, vec![1000.0, 1500.0]);
    }

    #[test]
    fn dpr_shrinks_css_slice_height() {
        let planner = SplitPlanner::new(14_000, 0.0, 2.0);
        assert_eq!(planner.target_slice_height(), 7000.0);
        assert_eq!(planner.min_slice(), 400.0);
        let plan = planner.plan(20_000.0, &[]);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn overlap_steps_back_from_each_cut() {
        let planner = SplitPlanner::new(1000, 50.0, 1.0);
        let plan = planner.plan(2000.0, &[]);
        let s = plan.slices();
        assert_eq!(s[0], Slice { start: 0.0, end: 1000.0 });
        assert_eq!(s[1], Slice { start: 950.0, end: 1950.0 });
        assert_eq!(s[2], Slice { start: 1900.0, end: 2000.0 });
    }

    #[test]
    fn overlap_above_min_slice_is_applied_as_given() {
        // min slice is 250; 500 must not be reduced
        let planner = SplitPlanner::new(1000, 500.0, 1.0);
        let plan = planner.plan(2500.0, &[]);
        let bounds: Vec<(f64, f64)> = plan.slices().iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(
            bounds,
            vec![(0.0, 1000.0), (500.0, 1500.0), (1000.0, 2000.0), (1500.0, 2500.0)]
        );
    }

    #[test]
    fn overlap_covering_a_slice_still_progresses() {
        let planner = SplitPlanner::new(1000, 5000.0, 1.0);
        let plan = planner.plan(3000.0, &[]);
        let ends: Vec<f64> = plan.slices().iter().map(|s| s.end).collect();
        assert_eq!(ends, vec![1000.0, 2000.0, 3000.0]);
    }

    #[test]
    fn regions_are_offset_into_source() {
        let plan = SplitPlanner::new(1000, 0.0, 1.0).plan(1500.0, &[]);
        let regions = plan.regions(&ElementBox::new(10.0, 200.0, 300.0, 1500.0), true);
        assert_eq!(regions[1].y, 1200.0);
        assert_eq!(regions[1].height, 500.0);
        assert_eq!(regions[1].x, 10.0);
        assert!(regions[1].capture_beyond_viewport);
    }
}
