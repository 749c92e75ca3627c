use crate::config::DetectionConfig;
use crate::core::{
    DetectionKind, MAX_SWAPS_PER_SNAPSHOT, MAX_WINDOW_SNAPSHOTS, PatternSignature, SignatureSubject, Snapshot, SwapRecord,
    ViolationReport, WalletProfile, basis_points, overshoot_severity,
};

use super::profiles::build_profiles;

/// Pairs walked by the trend detector; bounded by the window itself.
const MAX_TREND_PAIRS: usize = MAX_WINDOW_SNAPSHOTS - 1;
/// Per-pair pool drop (in BP) that counts towards a trend.
const TREND_STEP_BP: u128 = 100;
/// Run of qualifying pairs needed to flag a trend.
const TREND_MIN_RUN: usize = 3;
/// Cluster members must have an average gas within this percentage of the anchor.
const CLUSTER_GAS_TOLERANCE_PCT: u128 = 15;
/// Cluster members must first appear within this many sequence steps of the anchor.
const CLUSTER_SEQ_TOLERANCE: u64 = 2;

/// Read-only view handed to every detector for one analysis call.
pub struct DetectionContext<'a> {
    /// Validated newest-first window, never empty.
    pub window: &'a [Snapshot],
    pub current: &'a Snapshot,
    pub config: &'a DetectionConfig,
}

impl<'a> DetectionContext<'a> {
    pub fn new(window: &'a [Snapshot], config: &'a DetectionConfig) -> Option<Self> {
        let current = window.first()?;
        Some(Self { window, current, config })
    }

    pub fn previous(&self) -> Option<&'a Snapshot> {
        self.window.get(1)
    }

    /// Current snapshot's records, capped at the per-snapshot bound.
    fn swaps(&self) -> &'a [SwapRecord] {
        let records = &self.current.swap_records;
        &records[..records.len().min(MAX_SWAPS_PER_SNAPSHOT)]
    }

    fn report(
        &self,
        kind: DetectionKind,
        violator: Option<String>,
        related_addresses: Vec<String>,
        accumulated_basis_points: u128,
        severity: u8,
        confidence: u8,
        subject: SignatureSubject<'_>,
    ) -> ViolationReport {
        ViolationReport {
            violator,
            related_addresses,
            accumulated_basis_points,
            detection_kind: kind,
            sequence_number: self.current.sequence_number,
            observed_at: self.current.timestamp,
            severity: severity.min(100),
            confidence: confidence.min(100),
            pattern_signature: PatternSignature::compute(kind, subject),
        }
    }
}

/// A pure check over a snapshot window.
pub trait Detector {
    fn name(&self) -> &str;
    fn kind(&self) -> DetectionKind;
    /// Snapshots required before this detector runs.
    fn min_snapshots(&self) -> usize {
        1
    }
    fn detect(&self, ctx: &DetectionContext<'_>) -> Option<ViolationReport>;
}

/// Detectors in evaluation priority; the first hit wins.
pub static DETECTORS: [&(dyn Detector + Send + Sync); 6] = [
    &LiquidityDrainDetector,
    &SupplyChangeDetector,
    &GasPremiumDetector,
    &CoordinatedClusterDetector,
    &TrendDrainDetector,
    &WashTradingDetector,
];

// --- Individual Detectors ---

pub struct LiquidityDrainDetector;
impl Detector for LiquidityDrainDetector {
    fn name(&self) -> &str { "liquidity_drain" }
    fn kind(&self) -> DetectionKind { DetectionKind::LiquidityDrain }
    fn min_snapshots(&self) -> usize { 2 }
    fn detect(&self, ctx: &DetectionContext<'_>) -> Option<ViolationReport> {
        let previous = ctx.previous()?;
        let current = ctx.current;
        if previous.pool_balance <= current.pool_balance {
            return None;
        }
        let drop = previous.pool_balance - current.pool_balance;
        let drop_bp = basis_points(drop, previous.pool_balance)?;
        let threshold = ctx.config.drain_threshold_bp as u128;
        if drop_bp <= threshold {
            return None;
        }

        let confidence = if drop_bp >= 2000 {
            95
        } else if drop_bp >= 1500 {
            80
        } else {
            75
        };
        Some(ctx.report(
            self.kind(),
            largest_seller(ctx.swaps()),
            Vec::new(),
            drop_bp,
            overshoot_severity(drop_bp, threshold),
            confidence,
            SignatureSubject::Sequence(current.sequence_number),
        ))
    }
}

pub struct SupplyChangeDetector;
impl Detector for SupplyChangeDetector {
    fn name(&self) -> &str { "supply_change" }
    fn kind(&self) -> DetectionKind { DetectionKind::SupplyManipulation }
    fn min_snapshots(&self) -> usize { 2 }
    fn detect(&self, ctx: &DetectionContext<'_>) -> Option<ViolationReport> {
        let previous = ctx.previous()?;
        let current = ctx.current;
        let change = previous.total_supply.abs_diff(current.total_supply);
        let change_bp = basis_points(change, previous.total_supply)?;
        let threshold = ctx.config.supply_threshold_bp as u128;
        if change_bp <= threshold {
            return None;
        }

        let confidence = if change_bp >= threshold.saturating_mul(2) { 90 } else { 70 };
        Some(ctx.report(
            self.kind(),
            None,
            Vec::new(),
            change_bp,
            overshoot_severity(change_bp, threshold),
            confidence,
            SignatureSubject::Sequence(current.sequence_number),
        ))
    }
}

/// Flags the highest bidder when its gas price towers over the snapshot average.
pub struct GasPremiumDetector;
impl Detector for GasPremiumDetector {
    fn name(&self) -> &str { "gas_premium" }
    fn kind(&self) -> DetectionKind { DetectionKind::GasFrontRunning }
    fn detect(&self, ctx: &DetectionContext<'_>) -> Option<ViolationReport> {
        let mut count: u128 = 0;
        let mut sum: u128 = 0;
        let mut top: Option<&SwapRecord> = None;
        for record in ctx.swaps().iter().filter(|r| r.gas_price > 0) {
            count += 1;
            sum = sum.saturating_add(record.gas_price);
            if top.is_none_or(|t| record.gas_price > t.gas_price) {
                top = Some(record);
            }
        }
        if count < 2 {
            return None;
        }
        let top = top?;
        let average = sum / count;
        if top.gas_price <= average {
            return None;
        }
        let premium_bp = basis_points(top.gas_price - average, average)?;
        let threshold = ctx.config.gas_threshold_bp as u128;
        if premium_bp <= threshold {
            return None;
        }

        let confidence = if premium_bp >= threshold.saturating_mul(2) { 85 } else { 70 };
        Some(ctx.report(
            self.kind(),
            Some(top.wallet.clone()),
            Vec::new(),
            premium_bp,
            overshoot_severity(premium_bp, threshold),
            confidence,
            SignatureSubject::Wallet(&top.wallet),
        ))
    }
}

/// Wallets buying repeatedly with matching gas and near-identical entry
/// timing, jointly holding an outsized share of supply.
pub struct CoordinatedClusterDetector;
impl Detector for CoordinatedClusterDetector {
    fn name(&self) -> &str { "coordinated_cluster" }
    fn kind(&self) -> DetectionKind { DetectionKind::CoordinatedAttack }
    fn min_snapshots(&self) -> usize { 2 }
    fn detect(&self, ctx: &DetectionContext<'_>) -> Option<ViolationReport> {
        let profiles = build_profiles(ctx.window);
        let anchor = busiest_buyer(&profiles)?;
        if anchor.buy_count < 2 {
            return None;
        }

        let members: Vec<&WalletProfile> = profiles
            .iter()
            .filter(|p| p.wallet != anchor.wallet)
            .filter(|p| gas_within_tolerance(anchor.average_gas_price, p.average_gas_price))
            .filter(|p| p.first_seen_seq.abs_diff(anchor.first_seen_seq) <= CLUSTER_SEQ_TOLERANCE)
            .collect();

        let cluster_size = members.len() + 1;
        let size_threshold = ctx.config.cluster_threshold as usize;
        if cluster_size < size_threshold {
            return None;
        }

        let combined = members
            .iter()
            .fold(anchor.total_bought, |acc, p| acc.saturating_add(p.total_bought));
        let accumulated_bp = basis_points(combined, ctx.current.total_supply)?;
        let threshold = ctx.config.accumulation_threshold_bp as u128;
        if accumulated_bp <= threshold {
            return None;
        }

        let extra_members = (cluster_size - size_threshold).min(5) as u8;
        let volume_bonus = if accumulated_bp >= threshold.saturating_mul(2) { 10 } else { 0 };
        let confidence = (70 + 5 * extra_members + volume_bonus).min(95);

        Some(ctx.report(
            self.kind(),
            Some(anchor.wallet.clone()),
            members.iter().map(|p| p.wallet.clone()).collect(),
            accumulated_bp,
            overshoot_severity(accumulated_bp, threshold),
            confidence,
            SignatureSubject::ClusterSize(cluster_size),
        ))
    }
}

/// Sustained pool decline across consecutive snapshots, each step too small
/// to trip the single-step drain check.
pub struct TrendDrainDetector;
impl Detector for TrendDrainDetector {
    fn name(&self) -> &str { "trend_drain" }
    fn kind(&self) -> DetectionKind { DetectionKind::TrendDrain }
    fn min_snapshots(&self) -> usize { 3 }
    fn detect(&self, ctx: &DetectionContext<'_>) -> Option<ViolationReport> {
        let window = ctx.window;
        if window.len() < 3 {
            return None;
        }
        let pairs = (window.len() - 1).min(MAX_TREND_PAIRS);

        let (mut run, mut run_start) = (0usize, 0usize);
        let (mut best_run, mut best_start) = (0usize, 0usize);
        for (i, pair) in window.windows(2).take(pairs).enumerate() {
            let (newer, older) = (&pair[0], &pair[1]);
            let qualifies = older.pool_balance > newer.pool_balance
                && basis_points(older.pool_balance - newer.pool_balance, older.pool_balance)
                    .is_some_and(|bp| bp > TREND_STEP_BP);
            if qualifies {
                if run == 0 {
                    run_start = i;
                }
                run += 1;
                if run > best_run {
                    best_run = run;
                    best_start = run_start;
                }
            } else {
                run = 0;
            }
        }
        if best_run < TREND_MIN_RUN {
            return None;
        }

        let newest = window.get(best_start)?;
        let oldest = window.get(best_start + best_run)?;
        let total_drop_bp = basis_points(
            oldest.pool_balance.saturating_sub(newest.pool_balance),
            oldest.pool_balance,
        )
        .unwrap_or(0);

        Some(ctx.report(
            self.kind(),
            None,
            Vec::new(),
            total_drop_bp,
            (best_run * 20).min(100) as u8,
            (70 + 5 * (best_run - TREND_MIN_RUN)) as u8,
            SignatureSubject::Sequence(ctx.current.sequence_number),
        ))
    }
}

/// Same wallet on both sides of the book within one snapshot. Pairs are
/// scanned by ascending `(i, j)` record index and the first match wins.
pub struct WashTradingDetector;
impl Detector for WashTradingDetector {
    fn name(&self) -> &str { "wash_trading" }
    fn kind(&self) -> DetectionKind { DetectionKind::WashTrading }
    fn detect(&self, ctx: &DetectionContext<'_>) -> Option<ViolationReport> {
        let swaps = ctx.swaps();
        for (i, a) in swaps.iter().enumerate() {
            for b in &swaps[i + 1..] {
                if a.wallet != b.wallet || a.is_buy == b.is_buy {
                    continue;
                }
                let round_trip = a.token_amount.min(b.token_amount);
                let accumulated_bp = basis_points(round_trip, ctx.current.total_supply).unwrap_or(0);
                return Some(ctx.report(
                    self.kind(),
                    Some(a.wallet.clone()),
                    Vec::new(),
                    accumulated_bp,
                    50,
                    70,
                    SignatureSubject::Wallet(&a.wallet),
                ));
            }
        }
        None
    }
}

// --- Helpers ---

/// Wallet with the largest sell, first by record index on ties.
fn largest_seller(swaps: &[SwapRecord]) -> Option<String> {
    let mut best: Option<&SwapRecord> = None;
    for record in swaps.iter().filter(|r| !r.is_buy) {
        if best.is_none_or(|b| record.token_amount > b.token_amount) {
            best = Some(record);
        }
    }
    best.map(|r| r.wallet.clone())
}

/// Profile with the highest buy count, first in profile order on ties.
fn busiest_buyer(profiles: &[WalletProfile]) -> Option<&WalletProfile> {
    let mut best: Option<&WalletProfile> = None;
    for profile in profiles {
        if best.is_none_or(|b| profile.buy_count > b.buy_count) {
            best = Some(profile);
        }
    }
    best
}

fn gas_within_tolerance(anchor: u128, other: u128) -> bool {
    anchor.abs_diff(other).saturating_mul(100) <= anchor.saturating_mul(CLUSTER_GAS_TOLERANCE_PCT)
}
