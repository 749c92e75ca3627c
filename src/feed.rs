use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::Snapshot;

/// Snapshot source configuration.
pub struct FeedSource {
    /// Newline-delimited JSON, one snapshot per line, oldest first.
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    Snapshot(Box<Snapshot>),
    /// A line that could not be decoded into a snapshot.
    Malformed { line: usize, error: String },
}

/// Decode one feed line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Option<Result<Snapshot, serde_json::Error>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(trimmed))
}

/// Start the snapshot reader in a blocking thread.
/// Sends FeedEvents into the provided channel and returns once the source
/// is exhausted or the receiver is dropped.
pub fn start_snapshot_feed(
    source: FeedSource,
    tx: mpsc::Sender<FeedEvent>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let file = match File::open(&source.path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %source.path.display(), "Failed to open snapshot feed: {e}");
                return;
            }
        };
        info!(path = %source.path.display(), "Snapshot feed opened");

        let mut sent: u64 = 0;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line_no = idx + 1;
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(line = line_no, "Feed read error: {e}");
                    break;
                }
            };
            let event = match parse_line(&line) {
                None => continue,
                Some(Ok(snapshot)) => FeedEvent::Snapshot(Box::new(snapshot)),
                Some(Err(e)) => FeedEvent::Malformed {
                    line: line_no,
                    error: e.to_string(),
                },
            };
            if tx.blocking_send(event).is_err() {
                info!("Pipeline channel closed, stopping feed");
                return;
            }
            sent += 1;
        }
        info!("Snapshot feed exhausted after {sent} events");
    })
}
