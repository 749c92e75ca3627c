use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DetectionConfig;
use crate::core::window::SnapshotWindow;
use crate::detection;
use crate::feed::FeedEvent;
use crate::response::{ResponseEngine, ResponseError};

/// Counters reported when the feed is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub snapshots: u64,
    pub malformed: u64,
    pub stale: u64,
    pub violations: u64,
    pub handled: u64,
    pub cooldown_rejections: u64,
    pub started_at: Option<DateTime<Utc>>,
}

/// Run the pipeline: receive snapshots, analyze the rolling window, forward
/// violations to the response engine as the authorized operator.
pub async fn run_pipeline(
    mut rx: mpsc::Receiver<FeedEvent>,
    engine: Arc<ResponseEngine>,
    detection: DetectionConfig,
    window_size: usize,
) -> PipelineSummary {
    let mut window = SnapshotWindow::new(window_size);
    let mut summary = PipelineSummary {
        started_at: Some(Utc::now()),
        ..PipelineSummary::default()
    };

    info!("Pipeline started, waiting for snapshots...");

    while let Some(event) = rx.recv().await {
        let snapshot = match event {
            FeedEvent::Snapshot(snapshot) => snapshot,
            FeedEvent::Malformed { line, error } => {
                summary.malformed += 1;
                warn!(line, "Skipping undecodable snapshot: {error}");
                continue;
            }
        };

        let seq = snapshot.sequence_number;
        if let Err(rejection) = window.push(*snapshot) {
            summary.stale += 1;
            warn!("Snapshot {seq} not admitted: {rejection:?}");
            continue;
        }
        summary.snapshots += 1;

        let analysis = detection::analyze(window.as_slice(), &detection);
        let Some(report) = analysis.report else {
            debug!(seq, window = window.len(), "No violation");
            continue;
        };
        summary.violations += 1;

        match engine.handle(&report, true) {
            Ok(outcome) => {
                summary.handled += 1;
                info!(
                    seq,
                    kind = %report.detection_kind,
                    action = outcome.action.as_str(),
                    blacklisted = outcome.newly_blacklisted.len(),
                    paused = outcome.paused,
                    "Violation handled"
                );
            }
            Err(ResponseError::CooldownActive { elapsed, required }) => {
                summary.cooldown_rejections += 1;
                debug!(seq, elapsed, required, "Violation suppressed by cooldown");
            }
            Err(e) => warn!(seq, "Violation not handled: {e}"),
        }

        if summary.snapshots % 1000 == 0 {
            info!("Pipeline processed {} snapshots, {} violations", summary.snapshots, summary.violations);
        }
    }

    info!(
        "Pipeline shutting down after {} snapshots, {} violations",
        summary.snapshots, summary.violations
    );
    summary
}
