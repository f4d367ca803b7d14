//! Ordered teardown of a session.
//!
//! Removal runs a fixed list of steps. Each step is attempted regardless of
//! earlier failures, its outcome is logged, and all outcomes are collected
//! into a [`CleanupReport`]. The removal itself never fails once the
//! session existed.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{FocusController, SessionRegistry};
use crate::engine::{EngineError, EngineTorrent, TorrentEngine};
use crate::events::{EventBus, NuruEvent, TorrentRemoved};
use crate::health::ConnectionHealthMonitor;
use crate::priority::PriorityScheduler;
use crate::storage::{ArtifactError, ArtifactStore};
use crate::torrent::InfoHash;

/// Teardown steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TeardownStep {
    StopEngine,
    DestroyHandle,
    CancelStreams,
    DeleteArtifacts,
    EraseRecord,
    EraseMonitorState,
    ClearFocus,
    PublishRemoved,
}

impl TeardownStep {
    pub const ORDER: [TeardownStep; 8] = [
        TeardownStep::StopEngine,
        TeardownStep::DestroyHandle,
        TeardownStep::CancelStreams,
        TeardownStep::DeleteArtifacts,
        TeardownStep::EraseRecord,
        TeardownStep::EraseMonitorState,
        TeardownStep::ClearFocus,
        TeardownStep::PublishRemoved,
    ];

    pub fn describe(self) -> &'static str {
        match self {
            TeardownStep::StopEngine => "stop engine torrent",
            TeardownStep::DestroyHandle => "destroy torrent handle",
            TeardownStep::CancelStreams => "cancel open streams",
            TeardownStep::DeleteArtifacts => "delete artifacts",
            TeardownStep::EraseRecord => "erase session record",
            TeardownStep::EraseMonitorState => "erase monitor state",
            TeardownStep::ClearFocus => "clear focus",
            TeardownStep::PublishRemoved => "publish removal",
        }
    }
}

/// Failure of a single teardown step.
#[derive(Debug, thiserror::Error)]
pub enum CleanupStepError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Artifacts(#[from] ArtifactError),

    #[error("session record was already gone")]
    RecordMissing,
}

#[derive(Debug)]
pub struct StepOutcome {
    pub step: TeardownStep,
    pub error: Option<CleanupStepError>,
}

/// Aggregated result of one cascade.
#[derive(Debug)]
pub struct CleanupReport {
    pub info_hash: InfoHash,
    pub outcomes: Vec<StepOutcome>,
    /// The session held focus when it was removed
    pub was_focused: bool,
}

impl CleanupReport {
    /// Whether every step succeeded.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.error.is_none())
    }

    /// One line per failed step.
    pub fn errors(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|outcome| {
                outcome
                    .error
                    .as_ref()
                    .map(|e| format!("{}: {e}", outcome.step.describe()))
            })
            .collect()
    }

    pub fn failed_steps(&self) -> Vec<TeardownStep> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.error.is_some())
            .map(|outcome| outcome.step)
            .collect()
    }
}

/// Everything a cascade touches.
pub struct CleanupContext<'a> {
    pub info_hash: InfoHash,
    pub torrent: Arc<dyn EngineTorrent>,
    pub streams: CancellationToken,
    pub engine: &'a dyn TorrentEngine,
    pub artifacts: &'a dyn ArtifactStore,
    pub registry: &'a SessionRegistry,
    pub monitor: &'a ConnectionHealthMonitor,
    pub focus: &'a FocusController,
    pub scheduler: &'a PriorityScheduler,
    pub events: &'a EventBus,
}

/// Runs every teardown step in order.
pub async fn run_cascade(ctx: CleanupContext<'_>) -> CleanupReport {
    let info_hash = ctx.info_hash;
    let mut report = CleanupReport {
        info_hash,
        outcomes: Vec::with_capacity(TeardownStep::ORDER.len()),
        was_focused: false,
    };

    for step in TeardownStep::ORDER {
        let result = match step {
            TeardownStep::StopEngine => ctx
                .engine
                .remove_torrent(info_hash)
                .await
                .map_err(CleanupStepError::from),
            TeardownStep::DestroyHandle => {
                ctx.torrent.destroy().await.map_err(CleanupStepError::from)
            }
            TeardownStep::CancelStreams => {
                ctx.streams.cancel();
                Ok(())
            }
            TeardownStep::DeleteArtifacts => ctx
                .artifacts
                .remove_artifacts(&ctx.torrent.download_dir())
                .await
                .map_err(CleanupStepError::from),
            TeardownStep::EraseRecord => ctx
                .registry
                .remove(&info_hash)
                .map(|_| ())
                .ok_or(CleanupStepError::RecordMissing),
            TeardownStep::EraseMonitorState => {
                ctx.monitor.forget(&info_hash);
                Ok(())
            }
            TeardownStep::ClearFocus => {
                if ctx.focus.clear_if_focused(&info_hash) {
                    report.was_focused = true;
                    tracing::info!(%info_hash, "Focused session removed, focus cleared");
                    ctx.scheduler.recompute(None, ctx.registry);
                }
                Ok(())
            }
            TeardownStep::PublishRemoved => {
                let errors = report.errors();
                ctx.events.publish(NuruEvent::TorrentRemoved(TorrentRemoved {
                    info_hash,
                    cleanup_complete: errors.is_empty(),
                    errors,
                }));
                Ok(())
            }
        };

        match &result {
            Ok(()) => tracing::debug!(%info_hash, step = step.describe(), "Cleanup step done"),
            Err(e) => tracing::warn!(%info_hash, step = step.describe(), "Cleanup step failed: {e}"),
        }
        report.outcomes.push(StepOutcome {
            step,
            error: result.err(),
        });
    }

    report
}
