//! Buffer health: how much of the playing file is already on disk.

use crate::engine::EngineTorrent;
use crate::torrent::PieceWindow;

/// Combines the piece count with the progress-derived ceiling.
///
/// `complete` is how many pieces of the window the engine reports done,
/// `progress` the torrent-wide completion ratio. The result never exceeds
/// `progress * window_len / window_len` and always lies in `[0, 1]`. When
/// the engine reports no complete pieces but positive progress, its
/// piece-state reporting is assumed unreliable and progress is used alone.
pub fn estimate_buffer_health(complete: u32, window_len: u32, progress: f64) -> f64 {
    if window_len == 0 {
        return 0.0;
    }

    let progress = if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let window = f64::from(window_len);
    let ceiling = progress * window;

    let buffered = if complete == 0 && progress > 0.0 {
        ceiling
    } else {
        f64::from(complete.min(window_len)).min(ceiling)
    };

    (buffered / window).clamp(0.0, 1.0)
}

/// Measures buffer health for a window by probing the engine piece by piece.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferHealthEstimator;

impl BufferHealthEstimator {
    pub fn measure(&self, torrent: &dyn EngineTorrent, window: Option<PieceWindow>) -> f64 {
        let Some(window) = window else {
            return 0.0;
        };

        let complete = window
            .as_range()
            .filter(|piece| torrent.is_piece_complete(*piece))
            .count() as u32;
        let progress = torrent.swarm_stats().progress;

        estimate_buffer_health(complete, window.piece_count(), progress)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_empty_window_is_zero() {
        assert_eq!(estimate_buffer_health(0, 0, 0.9), 0.0);
    }

    #[test]
    fn test_capped_by_progress() {
        // 8 of 10 pieces reported, but only half the torrent is done.
        assert_eq!(estimate_buffer_health(8, 10, 0.5), 0.5);
        assert_eq!(estimate_buffer_health(3, 10, 0.5), 0.3);
    }

    #[test]
    fn test_falls_back_to_progress_when_pieces_unreported() {
        assert!((estimate_buffer_health(0, 40, 0.25) - 0.25).abs() < 1e-9);
        assert_eq!(estimate_buffer_health(0, 40, 0.0), 0.0);
    }

    #[test]
    fn test_non_finite_progress() {
        assert_eq!(estimate_buffer_health(5, 10, f64::NAN), 0.0);
        assert_eq!(estimate_buffer_health(5, 10, f64::INFINITY), 0.0);
    }

    proptest! {
        #[test]
        fn prop_health_bounded_by_unit_and_ceiling(
            complete in 0u32..5_000,
            window_len in 1u32..5_000,
            progress in -1.0f64..2.0,
        ) {
            let health = estimate_buffer_health(complete, window_len, progress);
            let ceiling = progress.clamp(0.0, 1.0);

            prop_assert!((0.0..=1.0).contains(&health));
            prop_assert!(health <= ceiling + 1e-12);
        }
    }
}
