use std::collections::VecDeque;

use super::{MAX_WINDOW_SNAPSHOTS, Snapshot};

/// Why a snapshot was not admitted to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRejection {
    /// Sequence number did not advance past the newest snapshot.
    Stale { newest: u64, got: u64 },
}

/// Fixed-capacity history of snapshots, newest first.
#[derive(Debug, Clone)]
pub struct SnapshotWindow {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
}

impl Default for SnapshotWindow {
    fn default() -> Self {
        Self::new(MAX_WINDOW_SNAPSHOTS)
    }
}

impl SnapshotWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_WINDOW_SNAPSHOTS);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new snapshot at the front, evicting the oldest when full.
    pub fn push(&mut self, snapshot: Snapshot) -> Result<(), PushRejection> {
        if let Some(newest) = self.snapshots.front() {
            if snapshot.sequence_number <= newest.sequence_number {
                return Err(PushRejection::Stale {
                    newest: newest.sequence_number,
                    got: snapshot.sequence_number,
                });
            }
        }
        self.snapshots.push_front(snapshot);
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_back();
        }
        Ok(())
    }

    /// Contiguous newest-first view for the detection engine.
    pub fn as_slice(&mut self) -> &[Snapshot] {
        self.snapshots.make_contiguous()
    }

    pub fn newest(&self) -> Option<&Snapshot> {
        self.snapshots.front()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
