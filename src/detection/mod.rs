pub mod profiles;
pub mod rules;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DetectionConfig;
use crate::core::{MAX_WINDOW_SNAPSHOTS, Snapshot, ViolationReport};
use rules::{DETECTORS, DetectionContext};

/// Result of one analysis call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Analysis {
    pub triggered: bool,
    pub report: Option<ViolationReport>,
}

impl Analysis {
    fn clean() -> Self {
        Self::default()
    }

    fn violation(report: ViolationReport) -> Self {
        Self {
            triggered: true,
            report: Some(report),
        }
    }
}

impl From<Analysis> for (bool, Option<ViolationReport>) {
    fn from(value: Analysis) -> Self {
        (value.triggered, value.report)
    }
}

/// Inspect a newest-first snapshot window and return the first violation
/// found in detector priority order.
///
/// Pure: no shared state, no clock, no floating point. An empty window or a
/// malformed newest snapshot yields a clean result rather than an error.
pub fn analyze(window: &[Snapshot], config: &DetectionConfig) -> Analysis {
    let Some(current) = window.first() else {
        return Analysis::clean();
    };
    if !current.is_well_formed() {
        debug!(seq = current.sequence_number, "newest snapshot malformed, skipping analysis");
        return Analysis::clean();
    }

    let usable = usable_prefix(window);
    let Some(ctx) = DetectionContext::new(usable, config) else {
        return Analysis::clean();
    };

    for detector in DETECTORS.iter() {
        if usable.len() < detector.min_snapshots() {
            continue;
        }
        if let Some(report) = detector.detect(&ctx) {
            debug!(
                detector = detector.name(),
                seq = report.sequence_number,
                severity = report.severity,
                confidence = report.confidence,
                "violation detected"
            );
            return Analysis::violation(report);
        }
    }
    Analysis::clean()
}

/// Decode a JSON-encoded window and analyze it. Undecodable input is
/// treated as "no violation".
pub fn analyze_encoded(bytes: &[u8], config: &DetectionConfig) -> Analysis {
    match serde_json::from_slice::<Vec<Snapshot>>(bytes) {
        Ok(window) => analyze(&window, config),
        Err(e) => {
            debug!("undecodable snapshot window: {e}");
            Analysis::clean()
        }
    }
}

/// Longest newest-first prefix (at most [`MAX_WINDOW_SNAPSHOTS`]) of
/// well-formed snapshots with strictly decreasing sequence numbers.
fn usable_prefix(window: &[Snapshot]) -> &[Snapshot] {
    let limit = window.len().min(MAX_WINDOW_SNAPSHOTS);
    let mut end = 1;
    while end < limit {
        let newer = &window[end - 1];
        let older = &window[end];
        if older.sequence_number >= newer.sequence_number || !older.is_well_formed() {
            break;
        }
        end += 1;
    }
    &window[..end.min(window.len())]
}
