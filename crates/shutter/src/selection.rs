//! Frame selection by time-based criteria

use std::collections::BTreeSet;

use crate::FrameRecord;

/// Rule deciding which frames of a stream go into an archive.
///
/// Built once from validated request input; the selector never sees raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SelectionCriterion {
    /// Every frame of the stream
    #[default]
    Full,
    /// Frames with index >= n
    Offset(u64),
    /// Frames whose elapsed time exactly matches one of the requested values
    ElapsedTimes(BTreeSet<u64>),
}

impl SelectionCriterion {
    /// Build an `ElapsedTimes` criterion, collapsing duplicate values
    pub fn elapsed_times(times: impl IntoIterator<Item = u64>) -> Self {
        Self::ElapsedTimes(times.into_iter().collect())
    }
}

/// Select the frames matching `criterion`, preserving stream order.
///
/// Total: an offset past the end or an unmatched elapsed time simply yields
/// fewer (or no) frames. Each frame appears at most once.
pub fn select(frames: &[FrameRecord], criterion: &SelectionCriterion) -> Vec<FrameRecord> {
    match criterion {
        SelectionCriterion::Full => frames.to_vec(),
        SelectionCriterion::Offset(n) => frames
            .iter()
            .filter(|f| u64::from(f.index) >= *n)
            .copied()
            .collect(),
        SelectionCriterion::ElapsedTimes(times) => frames
            .iter()
            .filter(|f| times.contains(&f.elapsed_us))
            .copied()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `n` frames, 40ms apart
    fn stream(n: u32) -> Vec<FrameRecord> {
        (0..n)
            .map(|i| FrameRecord::new(i, u64::from(i) * 40_000, 921_600))
            .collect()
    }

    fn indexes(frames: &[FrameRecord]) -> Vec<u32> {
        frames.iter().map(|f| f.index).collect()
    }

    #[test]
    fn full_returns_everything_in_order() {
        let frames = stream(30);
        let selected = select(&frames, &SelectionCriterion::Full);
        assert_eq!(selected, frames);
    }

    #[test]
    fn full_on_empty_stream() {
        assert!(select(&[], &SelectionCriterion::Full).is_empty());
    }

    #[test]
    fn offset_skips_leading_frames() {
        let frames = stream(30);
        let selected = select(&frames, &SelectionCriterion::Offset(15));
        assert_eq!(selected.len(), 15);
        assert_eq!(indexes(&selected), (15..30).collect::<Vec<_>>());
    }

    #[test]
    fn offset_zero_is_full() {
        let frames = stream(5);
        assert_eq!(select(&frames, &SelectionCriterion::Offset(0)), frames);
    }

    #[test]
    fn offset_at_or_past_end_is_empty() {
        let frames = stream(30);
        assert!(select(&frames, &SelectionCriterion::Offset(30)).is_empty());
        assert!(select(&frames, &SelectionCriterion::Offset(31)).is_empty());
        assert!(select(&frames, &SelectionCriterion::Offset(u64::MAX)).is_empty());
    }

    // ========== Elapsed times ==========

    #[test]
    fn elapsed_times_exact_match_only() {
        let frames = stream(30);
        let criterion = SelectionCriterion::elapsed_times([40_000, 40_001, 999_999_999]);
        assert_eq!(indexes(&select(&frames, &criterion)), vec![1]);
    }

    #[test]
    fn elapsed_times_no_match_is_empty() {
        let frames = stream(30);
        let criterion = SelectionCriterion::elapsed_times([1]);
        assert!(select(&frames, &criterion).is_empty());
    }

    #[test]
    fn elapsed_times_output_follows_stream_order() {
        let frames = stream(30);
        let criterion = SelectionCriterion::elapsed_times([
            20 * 40_000,
            3 * 40_000,
            11 * 40_000,
        ]);
        assert_eq!(indexes(&select(&frames, &criterion)), vec![3, 11, 20]);
    }

    #[test]
    fn elapsed_times_duplicates_emit_once() {
        let frames = stream(10);
        let criterion = SelectionCriterion::elapsed_times([80_000, 80_000, 80_000]);
        assert_eq!(indexes(&select(&frames, &criterion)), vec![2]);
    }

    #[test]
    fn elapsed_times_tie_returns_every_matching_frame() {
        let frames = vec![
            FrameRecord::new(0, 0, 1),
            FrameRecord::new(1, 500, 1),
            FrameRecord::new(2, 500, 1),
            FrameRecord::new(3, 900, 1),
        ];
        let criterion = SelectionCriterion::elapsed_times([500]);
        assert_eq!(indexes(&select(&frames, &criterion)), vec![1, 2]);
    }

    #[test]
    fn empty_time_set_selects_nothing() {
        let frames = stream(3);
        let criterion = SelectionCriterion::elapsed_times(std::iter::empty());
        assert!(select(&frames, &criterion).is_empty());
    }

    #[test]
    fn default_is_full() {
        assert_eq!(SelectionCriterion::default(), SelectionCriterion::Full);
    }
}
