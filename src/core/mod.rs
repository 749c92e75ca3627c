pub mod pipeline;
pub mod window;

use serde::{Deserialize, Serialize};
use std::fmt;
use tiny_keccak::{Hasher, Keccak};

/// Maximum snapshots a single analysis call looks at.
pub const MAX_WINDOW_SNAPSHOTS: usize = 5;
/// Maximum swap records a well-formed snapshot may carry.
pub const MAX_SWAPS_PER_SNAPSHOT: usize = 100;
/// Maximum distinct wallets profiled per analysis call.
pub const MAX_WALLET_PROFILES: usize = 50;

/// Integer units of 1/100th of a percent.
pub const BASIS_POINTS: u128 = 10_000;

/// A single observed trade against the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub wallet: String,
    pub is_buy: bool,
    pub token_amount: u128,
    pub counter_amount: u128,
    pub gas_price: u128,
    pub sequence_number: u64,
    pub timestamp: u64,
}

/// Decoded point-in-time capture of token/pool state plus recent swaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub sequence_number: u64,
    pub timestamp: u64,
    pub total_supply: u128,
    pub pool_balance: u128,
    pub reserve_a: u128,
    pub reserve_b: u128,
    #[serde(default)]
    pub swap_records: Vec<SwapRecord>,
}

impl Snapshot {
    /// A snapshot is well formed when its swap list respects the per-snapshot
    /// bound and no record claims to be newer than the snapshot itself.
    pub fn is_well_formed(&self) -> bool {
        self.swap_records.len() <= MAX_SWAPS_PER_SNAPSHOT
            && self
                .swap_records
                .iter()
                .all(|r| r.sequence_number <= self.sequence_number)
    }
}

/// Aggregated buy behaviour of one wallet across a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletProfile {
    pub wallet: String,
    pub total_bought: u128,
    pub buy_count: u32,
    pub average_gas_price: u128,
    pub first_seen_seq: u64,
    pub last_seen_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionKind {
    LiquidityDrain,
    SupplyManipulation,
    GasFrontRunning,
    CoordinatedAttack,
    TrendDrain,
    WashTrading,
}

impl DetectionKind {
    /// Stable one-byte tag used in pattern signatures.
    pub fn tag(&self) -> u8 {
        match self {
            DetectionKind::LiquidityDrain => 1,
            DetectionKind::SupplyManipulation => 2,
            DetectionKind::GasFrontRunning => 3,
            DetectionKind::CoordinatedAttack => 4,
            DetectionKind::TrendDrain => 5,
            DetectionKind::WashTrading => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionKind::LiquidityDrain => "liquidity_drain",
            DetectionKind::SupplyManipulation => "supply_manipulation",
            DetectionKind::GasFrontRunning => "gas_front_running",
            DetectionKind::CoordinatedAttack => "coordinated_attack",
            DetectionKind::TrendDrain => "trend_drain",
            DetectionKind::WashTrading => "wash_trading",
        }
    }
}

impl fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for DetectionKind {
    fn from(value: &str) -> Self {
        match value {
            "supply_manipulation" => DetectionKind::SupplyManipulation,
            "gas_front_running" => DetectionKind::GasFrontRunning,
            "coordinated_attack" => DetectionKind::CoordinatedAttack,
            "trend_drain" => DetectionKind::TrendDrain,
            "wash_trading" => DetectionKind::WashTrading,
            _ => DetectionKind::LiquidityDrain,
        }
    }
}

/// Keccak-256 content hash identifying a recurring violation pattern.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PatternSignature([u8; 32]);

/// The value that distinguishes one occurrence of a pattern from another.
#[derive(Debug, Clone, Copy)]
pub enum SignatureSubject<'a> {
    Wallet(&'a str),
    ClusterSize(usize),
    Sequence(u64),
}

impl PatternSignature {
    pub fn compute(kind: DetectionKind, subject: SignatureSubject<'_>) -> Self {
        let mut keccak = Keccak::v256();
        keccak.update(&[kind.tag()]);
        match subject {
            SignatureSubject::Wallet(wallet) => {
                keccak.update(b"w");
                keccak.update(wallet.as_bytes());
            }
            SignatureSubject::ClusterSize(size) => {
                keccak.update(b"c");
                keccak.update(&(size as u64).to_be_bytes());
            }
            SignatureSubject::Sequence(seq) => {
                keccak.update(b"s");
                keccak.update(&seq.to_be_bytes());
            }
        }
        let mut out = [0u8; 32];
        keccak.finalize(&mut out);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(value: &str) -> Option<Self> {
        let stripped = value.strip_prefix("0x").unwrap_or(value);
        let bytes = hex::decode(stripped).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for PatternSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PatternSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PatternSignature({})", self.to_hex())
    }
}

impl From<PatternSignature> for String {
    fn from(value: PatternSignature) -> Self {
        value.to_hex()
    }
}

impl TryFrom<String> for PatternSignature {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid pattern signature: {value}"))
    }
}

/// Output of a single triggered detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationReport {
    pub violator: Option<String>,
    pub related_addresses: Vec<String>,
    pub accumulated_basis_points: u128,
    pub detection_kind: DetectionKind,
    pub sequence_number: u64,
    /// Timestamp of the newest snapshot in the analysed window.
    pub observed_at: u64,
    pub severity: u8, // 0-100
    pub confidence: u8, // 0-100
    pub pattern_signature: PatternSignature,
}

/// `part * 10000 / whole`, `None` when `whole` is zero.
pub fn basis_points(part: u128, whole: u128) -> Option<u128> {
    if whole == 0 {
        return None;
    }
    match part.checked_mul(BASIS_POINTS) {
        Some(scaled) => Some(scaled / whole),
        None => Some(part / (whole / BASIS_POINTS).max(1)),
    }
}

/// How far `value` overshot `threshold`, scaled to 0-100.
pub fn overshoot_severity(value: u128, threshold: u128) -> u8 {
    if threshold == 0 {
        return 100;
    }
    let over = value.saturating_sub(threshold);
    (over.saturating_mul(100) / threshold).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_points_zero_whole() {
        assert_eq!(basis_points(10, 0), None);
    }

    #[test]
    fn basis_points_twenty_percent() {
        assert_eq!(basis_points(100_000, 500_000), Some(2000));
    }

    #[test]
    fn basis_points_huge_values_do_not_overflow() {
        let whole = u128::MAX / 2;
        let part = whole / 10;
        let bp = basis_points(part, whole).unwrap();
        assert!((999..=1001).contains(&bp), "got {bp}");
    }

    #[test]
    fn severity_clamped() {
        assert_eq!(overshoot_severity(2000, 1000), 100);
        assert_eq!(overshoot_severity(1500, 1000), 50);
        assert_eq!(overshoot_severity(900, 1000), 0);
        assert_eq!(overshoot_severity(5, 0), 100);
    }

    #[test]
    fn signature_stable_and_distinct() {
        let a = PatternSignature::compute(DetectionKind::WashTrading, SignatureSubject::Wallet("0xabc"));
        let b = PatternSignature::compute(DetectionKind::WashTrading, SignatureSubject::Wallet("0xabc"));
        let c = PatternSignature::compute(DetectionKind::GasFrontRunning, SignatureSubject::Wallet("0xabc"));
        let d = PatternSignature::compute(DetectionKind::TrendDrain, SignatureSubject::Sequence(7));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(c, d);
    }

    #[test]
    fn signature_hex_parse() {
        let sig = PatternSignature::compute(DetectionKind::LiquidityDrain, SignatureSubject::Sequence(42));
        let parsed = PatternSignature::from_hex(&sig.to_hex()).unwrap();
        assert_eq!(sig, parsed);
        assert!(PatternSignature::from_hex("0x1234").is_none());
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in [
            DetectionKind::LiquidityDrain,
            DetectionKind::SupplyManipulation,
            DetectionKind::GasFrontRunning,
            DetectionKind::CoordinatedAttack,
            DetectionKind::TrendDrain,
            DetectionKind::WashTrading,
        ] {
            assert_eq!(DetectionKind::from(kind.as_str()), kind);
        }
    }

    #[test]
    fn malformed_snapshot_detected() {
        let mut snap = Snapshot {
            sequence_number: 10,
            timestamp: 0,
            total_supply: 1,
            pool_balance: 1,
            reserve_a: 0,
            reserve_b: 0,
            swap_records: vec![],
        };
        assert!(snap.is_well_formed());
        snap.swap_records.push(SwapRecord {
            wallet: "a".into(),
            is_buy: true,
            token_amount: 1,
            counter_amount: 1,
            gas_price: 1,
            sequence_number: 11,
            timestamp: 0,
        });
        assert!(!snap.is_well_formed());
    }
}
