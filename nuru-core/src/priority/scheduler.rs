//! Piece priority scheduler.
//!
//! Every pass recomputes the full tier assignment from scratch. Planning is
//! pure ([`plan_tiers`]); [`PriorityScheduler::recompute`] gathers the
//! inputs from the registry and writes the plan through the engine.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use parking_lot::Mutex;

use crate::engine::PieceTier;
use crate::session::SessionRegistry;
use crate::torrent::{InfoHash, PieceWindow};

/// Where a session's primary file sits in its piece table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPlacement {
    pub info_hash: InfoHash,
    /// `None` until metadata arrives or when there is no primary file
    pub window: Option<PieceWindow>,
    pub piece_count: u32,
}

/// One write against a torrent's piece table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierWrite {
    Set {
        pieces: RangeInclusive<u32>,
        tier: PieceTier,
    },
    Restore {
        pieces: RangeInclusive<u32>,
    },
}

/// Output of one planning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPlan {
    /// Writes per session, in application order
    pub writes: Vec<(InfoHash, Vec<TierWrite>)>,
    /// Session whose pieces carry elevated tiers after this pass
    pub elevated: Option<InfoHash>,
}

impl TierPlan {
    pub fn writes_for(&self, info_hash: &InfoHash) -> Option<&[TierWrite]> {
        self.writes
            .iter()
            .find(|(hash, _)| hash == info_hash)
            .map(|(_, writes)| writes.as_slice())
    }
}

/// Leading pieces of a window marked urgent: `ceil(len * fraction)`, at
/// least one, at most the whole window.
pub fn urgent_piece_count(window_len: u32, fraction: f64) -> u32 {
    // Absorb float noise such as 35 * 0.2 = 7.000000000000001.
    let count = (f64::from(window_len) * fraction - 1e-9).ceil() as u32;
    count.clamp(1, window_len.max(1))
}

/// Pieces of `0..piece_count` outside `window`.
fn outside(window: PieceWindow, piece_count: u32) -> Vec<RangeInclusive<u32>> {
    let mut ranges = Vec::with_capacity(2);
    if window.start > 0 {
        ranges.push(0..=window.start - 1);
    }
    if window.end + 1 < piece_count {
        ranges.push(window.end + 1..=piece_count - 1);
    }
    ranges
}

/// Computes tier writes for every schedulable session.
///
/// The focused session gets `Urgent` on the head of its window, `High` on
/// the rest and `Suppressed` everywhere else. Other sessions get `Normal`
/// on their window; a session listed in `restore` (elevated by an earlier
/// pass and not yet restored) first has its out-of-window pieces returned
/// to the engine default. Sessions without a window are skipped.
pub fn plan_tiers(
    focus: Option<InfoHash>,
    restore: &[InfoHash],
    sessions: &[SessionPlacement],
    urgent_fraction: f64,
) -> TierPlan {
    let mut plan = TierPlan::default();

    for session in sessions {
        let Some(window) = session.window else {
            continue;
        };

        let mut writes = Vec::new();
        if focus == Some(session.info_hash) {
            let urgent = urgent_piece_count(window.piece_count(), urgent_fraction);
            let urgent_end = window.start + urgent - 1;
            writes.push(TierWrite::Set {
                pieces: window.start..=urgent_end,
                tier: PieceTier::Urgent,
            });
            if urgent_end < window.end {
                writes.push(TierWrite::Set {
                    pieces: urgent_end + 1..=window.end,
                    tier: PieceTier::High,
                });
            }
            for pieces in outside(window, session.piece_count) {
                writes.push(TierWrite::Set {
                    pieces,
                    tier: PieceTier::Suppressed,
                });
            }
            plan.elevated = Some(session.info_hash);
        } else {
            if restore.contains(&session.info_hash) {
                for pieces in outside(window, session.piece_count) {
                    writes.push(TierWrite::Restore { pieces });
                }
            }
            writes.push(TierWrite::Set {
                pieces: window.as_range(),
                tier: PieceTier::Normal,
            });
        }

        plan.writes.push((session.info_hash, writes));
    }

    plan
}

/// Summary of one applied pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub sessions: usize,
    pub writes: usize,
    pub failed_writes: usize,
    pub elevated: Option<InfoHash>,
}

#[derive(Debug, Default)]
struct Elevation {
    current: Option<InfoHash>,
    /// Formerly elevated sessions whose restore writes have not all landed
    unrestored: HashSet<InfoHash>,
}

/// Applies tier plans and remembers which sessions were elevated.
#[derive(Debug)]
pub struct PriorityScheduler {
    urgent_fraction: f64,
    elevation: Mutex<Elevation>,
}

impl PriorityScheduler {
    pub fn new(urgent_fraction: f64) -> Self {
        Self {
            urgent_fraction,
            elevation: Mutex::new(Elevation::default()),
        }
    }

    pub fn last_elevated(&self) -> Option<InfoHash> {
        self.elevation.lock().current
    }

    /// Sessions still waiting for their out-of-window pieces to be restored.
    pub fn pending_restores(&self) -> usize {
        self.elevation.lock().unrestored.len()
    }

    /// Recomputes and writes tiers for every active session.
    ///
    /// Passes are serialized. A write only happens if the session is still
    /// active at that moment; failed writes are logged and counted, and the
    /// next pass retries them. A session whose restore failed stays queued
    /// for restoring until a pass restores it cleanly.
    pub fn recompute(&self, focus: Option<InfoHash>, registry: &SessionRegistry) -> ScheduleReport {
        let mut elevation = self.elevation.lock();

        let handles = registry.schedulable();
        let placements: Vec<SessionPlacement> =
            handles.iter().map(|(placement, _)| *placement).collect();
        let mut restore: Vec<InfoHash> = elevation.unrestored.iter().copied().collect();
        if let Some(previous) = elevation.current
            && !restore.contains(&previous)
        {
            restore.push(previous);
        }
        let plan = plan_tiers(focus, &restore, &placements, self.urgent_fraction);

        let mut report = ScheduleReport {
            sessions: plan.writes.len(),
            elevated: plan.elevated,
            ..Default::default()
        };

        for (info_hash, writes) in plan.writes {
            let Some((_, torrent)) = handles
                .iter()
                .find(|(placement, _)| placement.info_hash == info_hash)
            else {
                continue;
            };

            let mut restore_failed = false;
            for write in writes {
                if !registry.is_active(&info_hash) {
                    tracing::debug!(%info_hash, "Session no longer active, skipping tier writes");
                    break;
                }
                let result = match &write {
                    TierWrite::Set { pieces, tier } => {
                        torrent.set_piece_priority(pieces.clone(), *tier)
                    }
                    TierWrite::Restore { pieces } => {
                        torrent.restore_piece_priority(pieces.clone())
                    }
                };
                report.writes += 1;
                if let Err(e) = result {
                    report.failed_writes += 1;
                    restore_failed |= matches!(write, TierWrite::Restore { .. });
                    tracing::warn!(%info_hash, ?write, "Tier write failed: {e}");
                }
            }

            if restore_failed && registry.is_active(&info_hash) {
                elevation.unrestored.insert(info_hash);
            } else {
                elevation.unrestored.remove(&info_hash);
            }
        }

        // Removed sessions have nothing left to restore.
        elevation
            .unrestored
            .retain(|pending| placements.iter().any(|p| p.info_hash == *pending));

        let previous = elevation.current;
        if previous != plan.elevated {
            tracing::debug!(?previous, current = ?plan.elevated, "Elevated session changed");
        }
        elevation.current = plan.elevated;

        tracing::trace!(?report, "Priority pass complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> InfoHash {
        InfoHash::new([byte; 20])
    }

    fn placement(byte: u8, start: u32, end: u32, piece_count: u32) -> SessionPlacement {
        SessionPlacement {
            info_hash: hash(byte),
            window: Some(PieceWindow { start, end }),
            piece_count,
        }
    }

    #[test]
    fn test_urgent_count_rounds_up() {
        assert_eq!(urgent_piece_count(10, 0.2), 2);
        assert_eq!(urgent_piece_count(11, 0.2), 3);
        assert_eq!(urgent_piece_count(1, 0.2), 1);
        assert_eq!(urgent_piece_count(3, 1.0), 3);
    }

    #[test]
    fn test_focused_session_tiers() {
        let sessions = [placement(1, 10, 19, 40)];
        let plan = plan_tiers(Some(hash(1)), &[], &sessions, 0.2);

        assert_eq!(plan.elevated, Some(hash(1)));
        assert_eq!(
            plan.writes_for(&hash(1)).unwrap(),
            &[
                TierWrite::Set {
                    pieces: 10..=11,
                    tier: PieceTier::Urgent
                },
                TierWrite::Set {
                    pieces: 12..=19,
                    tier: PieceTier::High
                },
                TierWrite::Set {
                    pieces: 0..=9,
                    tier: PieceTier::Suppressed
                },
                TierWrite::Set {
                    pieces: 20..=39,
                    tier: PieceTier::Suppressed
                },
            ]
        );
    }

    #[test]
    fn test_single_piece_window_is_all_urgent() {
        let sessions = [placement(1, 0, 0, 1)];
        let plan = plan_tiers(Some(hash(1)), &[], &sessions, 0.2);
        assert_eq!(
            plan.writes_for(&hash(1)).unwrap(),
            &[TierWrite::Set {
                pieces: 0..=0,
                tier: PieceTier::Urgent
            }]
        );
    }

    #[test]
    fn test_unfocused_sessions_get_normal_window_only() {
        let sessions = [placement(1, 2, 5, 8), placement(2, 0, 7, 8)];
        let plan = plan_tiers(None, &[], &sessions, 0.2);

        assert_eq!(plan.elevated, None);
        assert_eq!(
            plan.writes_for(&hash(1)).unwrap(),
            &[TierWrite::Set {
                pieces: 2..=5,
                tier: PieceTier::Normal
            }]
        );
    }

    #[test]
    fn test_refocus_restores_previous_session() {
        let sessions = [placement(1, 2, 5, 8), placement(2, 0, 3, 4)];
        let plan = plan_tiers(Some(hash(2)), &[hash(1)], &sessions, 0.2);

        assert_eq!(plan.elevated, Some(hash(2)));
        assert_eq!(
            plan.writes_for(&hash(1)).unwrap(),
            &[
                TierWrite::Restore { pieces: 0..=1 },
                TierWrite::Restore { pieces: 6..=7 },
                TierWrite::Set {
                    pieces: 2..=5,
                    tier: PieceTier::Normal
                },
            ]
        );
    }

    #[test]
    fn test_sessions_without_window_are_skipped() {
        let sessions = [SessionPlacement {
            info_hash: hash(1),
            window: None,
            piece_count: 0,
        }];
        let plan = plan_tiers(Some(hash(1)), &[], &sessions, 0.2);
        assert!(plan.writes.is_empty());
        assert_eq!(plan.elevated, None);
    }
}
