//! Launch-window manipulation guard.
//!
//! `detection` turns a rolling window of pool snapshots into at most one
//! violation report; `response` applies graduated, rate-limited actions
//! (alert, blacklist, pause) to accepted reports and keeps the ledgers.

pub mod config;
pub mod core;
pub mod db;
pub mod detection;
pub mod feed;
pub mod response;

pub use crate::core::{Snapshot, SwapRecord, ViolationReport};
pub use crate::detection::{Analysis, analyze, analyze_encoded};
pub use crate::response::{OwnerCapability, ResponseEngine, ResponseError, ResponseOutcome};
