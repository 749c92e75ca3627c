use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::core::{DetectionKind, PatternSignature, ViolationReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub address: String,
    pub timestamp: u64,
    pub reason_kind: DetectionKind,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PauseState {
    pub is_paused: bool,
    pub timestamp: u64,
    pub reason_kind: Option<DetectionKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatIntelEntry {
    pub pattern_signature: PatternSignature,
    pub first_seen: u64,
    pub last_seen: u64,
    pub occurrence_count: u64,
    pub detection_kind: DetectionKind,
    pub resolved: bool,
}

/// Most severe action actually applied for one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResponseAction {
    Logged,
    Alerted,
    Blacklisted,
    Paused,
}

impl ResponseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseAction::Logged => "logged",
            ResponseAction::Alerted => "alerted",
            ResponseAction::Blacklisted => "blacklisted",
            ResponseAction::Paused => "paused",
        }
    }
}

impl From<&str> for ResponseAction {
    fn from(value: &str) -> Self {
        match value {
            "alerted" => ResponseAction::Alerted,
            "blacklisted" => ResponseAction::Blacklisted,
            "paused" => ResponseAction::Paused,
            _ => ResponseAction::Logged,
        }
    }
}

/// One accepted report, indexed by arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub index: u64,
    pub report: ViolationReport,
    pub action: ResponseAction,
}

/// In-memory ledgers owned by the response engine.
#[derive(Debug)]
pub struct Ledgers {
    blacklist: HashMap<String, BlacklistEntry>,
    pause: PauseState,
    threat_intel: HashMap<PatternSignature, ThreatIntelEntry>,
    incidents: VecDeque<Incident>,
    incident_capacity: usize,
    incident_total: u64,
}

impl Ledgers {
    pub fn new(incident_capacity: usize) -> Self {
        let incident_capacity = incident_capacity.max(1);
        Self {
            blacklist: HashMap::new(),
            pause: PauseState::default(),
            threat_intel: HashMap::new(),
            incidents: VecDeque::with_capacity(incident_capacity.min(1024)),
            incident_capacity,
            incident_total: 0,
        }
    }

    /// Create or bump the threat entry for this report's signature.
    pub fn record_threat(&mut self, report: &ViolationReport) -> ThreatIntelEntry {
        let entry = self
            .threat_intel
            .entry(report.pattern_signature)
            .and_modify(|e| {
                e.occurrence_count = e.occurrence_count.saturating_add(1);
                e.last_seen = report.observed_at;
            })
            .or_insert_with(|| ThreatIntelEntry {
                pattern_signature: report.pattern_signature,
                first_seen: report.observed_at,
                last_seen: report.observed_at,
                occurrence_count: 1,
                detection_kind: report.detection_kind,
                resolved: false,
            });
        entry.clone()
    }

    /// Append an incident, evicting the oldest in-memory one when full.
    pub fn record_incident(&mut self, report: ViolationReport, action: ResponseAction) -> Incident {
        let incident = Incident {
            index: self.incident_total,
            report,
            action,
        };
        self.incident_total += 1;
        self.incidents.push_back(incident.clone());
        while self.incidents.len() > self.incident_capacity {
            self.incidents.pop_front();
        }
        incident
    }

    /// Returns the new entry, or `None` if the address was already listed.
    pub fn blacklist(
        &mut self,
        address: &str,
        timestamp: u64,
        reason_kind: DetectionKind,
        confidence: u8,
    ) -> Option<BlacklistEntry> {
        if self.blacklist.contains_key(address) {
            return None;
        }
        let entry = BlacklistEntry {
            address: address.to_string(),
            timestamp,
            reason_kind,
            confidence,
        };
        self.blacklist.insert(address.to_string(), entry.clone());
        Some(entry)
    }

    pub fn unblacklist(&mut self, address: &str) -> Option<BlacklistEntry> {
        self.blacklist.remove(address)
    }

    /// Returns false when already paused.
    pub fn pause(&mut self, timestamp: u64, reason_kind: DetectionKind) -> bool {
        if self.pause.is_paused {
            return false;
        }
        self.pause = PauseState {
            is_paused: true,
            timestamp,
            reason_kind: Some(reason_kind),
        };
        true
    }

    /// Clears the flag, keeping the last pause metadata for inspection.
    pub fn unpause(&mut self) -> bool {
        if !self.pause.is_paused {
            return false;
        }
        self.pause.is_paused = false;
        true
    }

    pub fn resolve(&mut self, signature: &PatternSignature) -> Option<ThreatIntelEntry> {
        let entry = self.threat_intel.get_mut(signature)?;
        entry.resolved = true;
        Some(entry.clone())
    }

    pub fn pause_state(&self) -> &PauseState {
        &self.pause
    }

    pub fn blacklist_entry(&self, address: &str) -> Option<&BlacklistEntry> {
        self.blacklist.get(address)
    }

    /// All entries sorted by address.
    pub fn blacklist_entries(&self) -> Vec<BlacklistEntry> {
        let mut entries: Vec<BlacklistEntry> = self.blacklist.values().cloned().collect();
        entries.sort_by(|a, b| a.address.cmp(&b.address));
        entries
    }

    pub fn threat(&self, signature: &PatternSignature) -> Option<&ThreatIntelEntry> {
        self.threat_intel.get(signature)
    }

    /// All entries sorted by signature.
    pub fn threat_entries(&self) -> Vec<ThreatIntelEntry> {
        let mut entries: Vec<ThreatIntelEntry> = self.threat_intel.values().cloned().collect();
        entries.sort_by(|a, b| a.pattern_signature.cmp(&b.pattern_signature));
        entries
    }

    pub fn incident_count(&self) -> u64 {
        self.incident_total
    }

    /// Look up by absolute index; `None` once evicted from memory.
    pub fn incident(&self, index: u64) -> Option<&Incident> {
        let oldest = self.incidents.front()?.index;
        let offset = index.checked_sub(oldest)?;
        self.incidents.get(offset as usize)
    }

    pub fn recent_incidents(&self, limit: usize) -> Vec<Incident> {
        self.incidents.iter().rev().take(limit).cloned().collect()
    }

    // --- restore hooks ---

    pub fn load_blacklist(&mut self, entries: Vec<BlacklistEntry>) {
        for entry in entries {
            self.blacklist.insert(entry.address.clone(), entry);
        }
    }

    pub fn load_threats(&mut self, entries: Vec<ThreatIntelEntry>) {
        for entry in entries {
            self.threat_intel.insert(entry.pattern_signature, entry);
        }
    }

    pub fn load_pause(&mut self, state: PauseState) {
        self.pause = state;
    }

    /// `incidents` oldest first; `total` is the persisted incident count.
    pub fn load_incidents(&mut self, incidents: Vec<Incident>, total: u64) {
        self.incidents.clear();
        let skip = incidents.len().saturating_sub(self.incident_capacity);
        self.incidents.extend(incidents.into_iter().skip(skip));
        let next = self.incidents.back().map(|i| i.index + 1).unwrap_or(0);
        self.incident_total = total.max(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SignatureSubject;

    fn report(kind: DetectionKind, wallet: &str, observed_at: u64) -> ViolationReport {
        ViolationReport {
            violator: Some(wallet.to_string()),
            related_addresses: vec![],
            accumulated_basis_points: 0,
            detection_kind: kind,
            sequence_number: observed_at,
            observed_at,
            severity: 50,
            confidence: 70,
            pattern_signature: PatternSignature::compute(kind, SignatureSubject::Wallet(wallet)),
        }
    }

    #[test]
    fn threat_accumulates() {
        let mut ledgers = Ledgers::new(8);
        let first = ledgers.record_threat(&report(DetectionKind::WashTrading, "w", 100));
        let second = ledgers.record_threat(&report(DetectionKind::WashTrading, "w", 200));
        assert_eq!(first.occurrence_count, 1);
        assert_eq!(second.occurrence_count, 2);
        assert_eq!(second.first_seen, 100);
        assert_eq!(second.last_seen, 200);
    }

    #[test]
    fn blacklist_is_idempotent() {
        let mut ledgers = Ledgers::new(8);
        assert!(ledgers.blacklist("w", 10, DetectionKind::WashTrading, 80).is_some());
        assert!(ledgers.blacklist("w", 99, DetectionKind::GasFrontRunning, 99).is_none());
        let entry = ledgers.blacklist_entry("w").unwrap();
        assert_eq!(entry.timestamp, 10);
        assert_eq!(entry.reason_kind, DetectionKind::WashTrading);
        assert_eq!(ledgers.blacklist_entries().len(), 1);
    }

    #[test]
    fn pause_is_idempotent() {
        let mut ledgers = Ledgers::new(8);
        assert!(ledgers.pause(5, DetectionKind::LiquidityDrain));
        assert!(!ledgers.pause(6, DetectionKind::TrendDrain));
        assert_eq!(ledgers.pause_state().timestamp, 5);
        assert!(ledgers.unpause());
        assert!(!ledgers.unpause());
        assert_eq!(ledgers.pause_state().reason_kind, Some(DetectionKind::LiquidityDrain));
    }

    #[test]
    fn incident_log_is_bounded_but_indexed() {
        let mut ledgers = Ledgers::new(3);
        for i in 0..5 {
            ledgers.record_incident(report(DetectionKind::WashTrading, "w", i), ResponseAction::Logged);
        }
        assert_eq!(ledgers.incident_count(), 5);
        assert!(ledgers.incident(0).is_none());
        assert!(ledgers.incident(1).is_none());
        assert_eq!(ledgers.incident(2).unwrap().report.observed_at, 2);
        assert_eq!(ledgers.incident(4).unwrap().index, 4);
        assert!(ledgers.incident(5).is_none());
        let recent = ledgers.recent_incidents(2);
        assert_eq!(recent[0].index, 4);
        assert_eq!(recent[1].index, 3);
    }

    #[test]
    fn resolve_unknown_signature() {
        let mut ledgers = Ledgers::new(1);
        let sig = PatternSignature::compute(DetectionKind::TrendDrain, SignatureSubject::Sequence(1));
        assert!(ledgers.resolve(&sig).is_none());
    }

    #[test]
    fn load_incidents_respects_capacity() {
        let mut ledgers = Ledgers::new(2);
        let incidents: Vec<Incident> = (0..4)
            .map(|i| Incident {
                index: i,
                report: report(DetectionKind::WashTrading, "w", i),
                action: ResponseAction::Logged,
            })
            .collect();
        ledgers.load_incidents(incidents, 4);
        assert_eq!(ledgers.incident_count(), 4);
        assert!(ledgers.incident(1).is_none());
        assert!(ledgers.incident(3).is_some());
        let next = ledgers.record_incident(report(DetectionKind::WashTrading, "w", 9), ResponseAction::Logged);
        assert_eq!(next.index, 4);
    }
}
