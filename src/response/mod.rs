pub mod ledger;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ResponseConfig;
use crate::core::{DetectionKind, PatternSignature, ViolationReport};
use crate::db::SharedDatabase;
use ledger::{BlacklistEntry, Incident, Ledgers, PauseState, ResponseAction, ThreatIntelEntry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("caller is not authorized")]
    Unauthorized,
    #[error("cooldown active: {elapsed} of {required} sequence steps elapsed")]
    CooldownActive { elapsed: u64, required: u64 },
    #[error("invalid threshold ordering: alert {alert} <= blacklist {blacklist} <= pause {pause} <= 100 required")]
    InvalidThresholdOrdering { alert: u8, blacklist: u8, pause: u8 },
}

/// Confidence gates, adjustable by the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub alert: u8,
    pub blacklist: u8,
    pub pause: u8,
}

impl ConfidenceThresholds {
    fn validate(self) -> Result<Self, ResponseError> {
        if self.alert <= self.blacklist && self.blacklist <= self.pause && self.pause <= 100 {
            Ok(self)
        } else {
            Err(ResponseError::InvalidThresholdOrdering {
                alert: self.alert,
                blacklist: self.blacklist,
                pause: self.pause,
            })
        }
    }
}

/// What `handle` did with an accepted report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseOutcome {
    pub incident_index: u64,
    pub action: ResponseAction,
    pub newly_blacklisted: Vec<String>,
    pub paused: bool,
    pub occurrence_count: u64,
}

/// Proof of the owner role for one engine instance. Not cloneable; admin
/// calls presenting a capability minted by another engine are rejected.
#[derive(Debug)]
pub struct OwnerCapability {
    engine_id: u64,
}

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

struct EngineState {
    thresholds: ConfidenceThresholds,
    last_handled_seq: Option<u64>,
    ledgers: Ledgers,
}

/// Gated actuator over the blacklist, pause and threat-intel ledgers.
///
/// All mutation happens under a single lock, so concurrent `handle` calls are
/// serialized. With a database attached every ledger change is written
/// through; write failures are logged and the in-memory state stays
/// authoritative.
pub struct ResponseEngine {
    id: u64,
    pause_severity: u8,
    cooldown_period: u64,
    max_blacklist_batch: usize,
    state: Mutex<EngineState>,
    db: Option<SharedDatabase>,
}

impl ResponseEngine {
    pub fn new(config: &ResponseConfig) -> (Self, OwnerCapability) {
        Self::build(config, None)
    }

    /// Engine with fresh ledgers and write-through persistence into `db`.
    /// Incident indexes continue after the history already stored there.
    pub fn with_database(
        config: &ResponseConfig,
        db: SharedDatabase,
    ) -> Result<(Self, OwnerCapability), rusqlite::Error> {
        let total = db.get_incident_count()?;
        let (engine, cap) = Self::build(config, Some(db));
        engine.lock().ledgers.load_incidents(Vec::new(), total);
        Ok((engine, cap))
    }

    /// Rebuild ledgers and the cooldown marker from `db`, then write through.
    pub fn restore(
        config: &ResponseConfig,
        db: SharedDatabase,
    ) -> Result<(Self, OwnerCapability), rusqlite::Error> {
        let blacklist = db.load_blacklist()?;
        let threats = db.load_threat_intel()?;
        let pause = db.load_pause_state()?;
        let total = db.get_incident_count()?;
        let mut incidents = db.get_recent_incidents(config.incident_capacity)?;
        incidents.reverse();
        let last_seq = db.last_handled_sequence()?;

        let (engine, cap) = Self::build(config, Some(db));
        {
            let mut state = engine.lock();
            info!(
                blacklisted = blacklist.len(),
                threats = threats.len(),
                incidents = total,
                paused = pause.is_paused,
                "Response ledgers restored from database"
            );
            state.ledgers.load_blacklist(blacklist);
            state.ledgers.load_threats(threats);
            state.ledgers.load_pause(pause);
            state.ledgers.load_incidents(incidents, total);
            state.last_handled_seq = last_seq;
        }
        Ok((engine, cap))
    }

    fn build(config: &ResponseConfig, db: Option<SharedDatabase>) -> (Self, OwnerCapability) {
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let thresholds = ConfidenceThresholds {
            alert: config.alert_confidence_threshold,
            blacklist: config.blacklist_confidence_threshold,
            pause: config.pause_confidence_threshold,
        };
        let thresholds = thresholds.validate().unwrap_or_else(|e| {
            warn!("{e}; falling back to default confidence thresholds");
            let defaults = ResponseConfig::default();
            ConfidenceThresholds {
                alert: defaults.alert_confidence_threshold,
                blacklist: defaults.blacklist_confidence_threshold,
                pause: defaults.pause_confidence_threshold,
            }
        });
        let engine = Self {
            id,
            pause_severity: config.pause_severity_threshold,
            cooldown_period: config.cooldown_period,
            max_blacklist_batch: config.max_blacklist_batch,
            state: Mutex::new(EngineState {
                thresholds,
                last_handled_seq: None,
                ledgers: Ledgers::new(config.incident_capacity),
            }),
            db,
        };
        (engine, OwnerCapability { engine_id: id })
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_owner(&self, cap: &OwnerCapability) -> Result<(), ResponseError> {
        if cap.engine_id == self.id {
            Ok(())
        } else {
            Err(ResponseError::Unauthorized)
        }
    }

    /// Consume a violation report and apply graduated actions.
    pub fn handle(
        &self,
        report: &ViolationReport,
        caller_is_authorized: bool,
    ) -> Result<ResponseOutcome, ResponseError> {
        if !caller_is_authorized {
            warn!(kind = %report.detection_kind, "Rejected report from unauthorized caller");
            return Err(ResponseError::Unauthorized);
        }

        let mut state = self.lock();
        if let Some(last) = state.last_handled_seq {
            let elapsed = report.sequence_number.saturating_sub(last);
            if elapsed < self.cooldown_period {
                warn!(
                    seq = report.sequence_number,
                    last, elapsed, "Report rejected, cooldown active"
                );
                return Err(ResponseError::CooldownActive {
                    elapsed,
                    required: self.cooldown_period,
                });
            }
        }
        state.last_handled_seq = Some(report.sequence_number);

        let threat = state.ledgers.record_threat(report);
        self.persist(|db| db.upsert_threat(&threat));

        let thresholds = state.thresholds;
        let mut action = ResponseAction::Logged;
        let mut newly_blacklisted = Vec::new();
        let mut paused = false;

        if report.confidence >= thresholds.alert {
            action = ResponseAction::Alerted;
            warn!(
                kind = %report.detection_kind,
                violator = report.violator.as_deref().unwrap_or("-"),
                severity = report.severity,
                confidence = report.confidence,
                "Manipulation alert"
            );
        }

        if report.confidence >= thresholds.blacklist {
            for address in self.blacklist_targets(report) {
                let added = state.ledgers.blacklist(
                    address,
                    report.observed_at,
                    report.detection_kind,
                    report.confidence,
                );
                if let Some(entry) = added {
                    self.persist(|db| db.insert_blacklist(&entry));
                    info!(address, kind = %report.detection_kind, "Address blacklisted");
                    newly_blacklisted.push(entry.address);
                }
            }
            if !newly_blacklisted.is_empty() {
                action = ResponseAction::Blacklisted;
            }
        }

        if report.confidence >= thresholds.pause
            && report.severity >= self.pause_severity
            && state.ledgers.pause(report.observed_at, report.detection_kind)
        {
            let pause = state.ledgers.pause_state().clone();
            self.persist(|db| db.save_pause_state(&pause));
            warn!(kind = %report.detection_kind, "Emergency pause engaged");
            paused = true;
            action = ResponseAction::Paused;
        }

        let incident = state.ledgers.record_incident(report.clone(), action);
        self.persist(|db| db.insert_incident(&incident));
        info!(
            index = incident.index,
            kind = %report.detection_kind,
            action = action.as_str(),
            occurrences = threat.occurrence_count,
            "Incident recorded"
        );

        Ok(ResponseOutcome {
            incident_index: incident.index,
            action,
            newly_blacklisted,
            paused,
            occurrence_count: threat.occurrence_count,
        })
    }

    /// Violator plus, for clusters, the batch-capped related addresses.
    fn blacklist_targets<'r>(&self, report: &'r ViolationReport) -> Vec<&'r str> {
        let mut targets: Vec<&str> = report.violator.as_deref().into_iter().collect();
        if report.detection_kind == DetectionKind::CoordinatedAttack {
            targets.extend(
                report
                    .related_addresses
                    .iter()
                    .take(self.max_blacklist_batch)
                    .map(String::as_str),
            );
        }
        targets
    }

    fn persist<F>(&self, write: F)
    where
        F: FnOnce(&SharedDatabase) -> Result<(), rusqlite::Error>,
    {
        if let Some(ref db) = self.db {
            if let Err(e) = write(db) {
                warn!("Failed to persist ledger change: {e}");
            }
        }
    }

    // --- Administrative operations ---

    /// Returns whether the engine was paused.
    pub fn unpause(&self, cap: &OwnerCapability) -> Result<bool, ResponseError> {
        self.check_owner(cap)?;
        let mut state = self.lock();
        let changed = state.ledgers.unpause();
        if changed {
            let pause = state.ledgers.pause_state().clone();
            self.persist(|db| db.save_pause_state(&pause));
            info!("Pause lifted by owner");
        }
        Ok(changed)
    }

    /// Returns whether the address was listed.
    pub fn remove_from_blacklist(&self, cap: &OwnerCapability, address: &str) -> Result<bool, ResponseError> {
        self.check_owner(cap)?;
        let mut state = self.lock();
        let removed = state.ledgers.unblacklist(address).is_some();
        if removed {
            self.persist(|db| db.delete_blacklist(address));
            info!(address, "Address removed from blacklist by owner");
        }
        Ok(removed)
    }

    pub fn adjust_thresholds(
        &self,
        cap: &OwnerCapability,
        thresholds: ConfidenceThresholds,
    ) -> Result<(), ResponseError> {
        self.check_owner(cap)?;
        let thresholds = thresholds.validate()?;
        self.lock().thresholds = thresholds;
        info!(
            alert = thresholds.alert,
            blacklist = thresholds.blacklist,
            pause = thresholds.pause,
            "Confidence thresholds adjusted"
        );
        Ok(())
    }

    /// Returns whether the signature was known.
    pub fn mark_resolved(&self, cap: &OwnerCapability, signature: &PatternSignature) -> Result<bool, ResponseError> {
        self.check_owner(cap)?;
        let mut state = self.lock();
        match state.ledgers.resolve(signature) {
            Some(entry) => {
                self.persist(|db| db.upsert_threat(&entry));
                info!(signature = %signature, "Threat pattern marked resolved");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // --- Inspection ---

    pub fn thresholds(&self) -> ConfidenceThresholds {
        self.lock().thresholds
    }

    pub fn pause_state(&self) -> PauseState {
        self.lock().ledgers.pause_state().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().ledgers.pause_state().is_paused
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.lock().ledgers.blacklist_entry(address).is_some()
    }

    pub fn blacklist_entry(&self, address: &str) -> Option<BlacklistEntry> {
        self.lock().ledgers.blacklist_entry(address).cloned()
    }

    pub fn blacklist(&self) -> Vec<BlacklistEntry> {
        self.lock().ledgers.blacklist_entries()
    }

    pub fn threat(&self, signature: &PatternSignature) -> Option<ThreatIntelEntry> {
        self.lock().ledgers.threat(signature).cloned()
    }

    pub fn threat_intel(&self) -> Vec<ThreatIntelEntry> {
        self.lock().ledgers.threat_entries()
    }

    /// Unresolved patterns, most frequent first.
    pub fn unresolved_threats(&self) -> Vec<ThreatIntelEntry> {
        let mut entries: Vec<ThreatIntelEntry> = self
            .lock()
            .ledgers
            .threat_entries()
            .into_iter()
            .filter(|e| !e.resolved)
            .collect();
        entries.sort_by(|a, b| {
            b.occurrence_count
                .cmp(&a.occurrence_count)
                .then_with(|| a.pattern_signature.cmp(&b.pattern_signature))
        });
        entries
    }

    pub fn incident_count(&self) -> u64 {
        self.lock().ledgers.incident_count()
    }

    pub fn incident(&self, index: u64) -> Option<Incident> {
        self.lock().ledgers.incident(index).cloned()
    }

    pub fn recent_incidents(&self, limit: usize) -> Vec<Incident> {
        self.lock().ledgers.recent_incidents(limit)
    }
}
