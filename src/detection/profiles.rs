use std::collections::HashMap;

use crate::core::{MAX_SWAPS_PER_SNAPSHOT, MAX_WALLET_PROFILES, MAX_WINDOW_SNAPSHOTS, Snapshot, WalletProfile};

/// Aggregate buy behaviour per wallet across a newest-first window.
///
/// Snapshots are walked oldest to newest and records in index order, so the
/// returned profiles are ordered by first appearance. Once
/// [`MAX_WALLET_PROFILES`] wallets are tracked, unseen wallets are dropped.
pub fn build_profiles(window: &[Snapshot]) -> Vec<WalletProfile> {
    let mut profiles: Vec<WalletProfile> = Vec::with_capacity(MAX_WALLET_PROFILES);
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(MAX_WALLET_PROFILES);

    for snapshot in window.iter().take(MAX_WINDOW_SNAPSHOTS).rev() {
        for record in snapshot.swap_records.iter().take(MAX_SWAPS_PER_SNAPSHOT) {
            if !record.is_buy {
                continue;
            }
            let slot = match index.get(record.wallet.as_str()) {
                Some(&slot) => slot,
                None => {
                    if profiles.len() >= MAX_WALLET_PROFILES {
                        continue;
                    }
                    profiles.push(WalletProfile {
                        wallet: record.wallet.clone(),
                        total_bought: 0,
                        buy_count: 0,
                        average_gas_price: 0,
                        first_seen_seq: record.sequence_number,
                        last_seen_seq: record.sequence_number,
                    });
                    index.insert(record.wallet.as_str(), profiles.len() - 1);
                    profiles.len() - 1
                }
            };

            let profile = &mut profiles[slot];
            let prev_count = profile.buy_count as u128;
            profile.average_gas_price = (profile
                .average_gas_price
                .saturating_mul(prev_count)
                .saturating_add(record.gas_price))
                / (prev_count + 1);
            profile.buy_count = profile.buy_count.saturating_add(1);
            profile.total_bought = profile.total_bought.saturating_add(record.token_amount);
            profile.first_seen_seq = profile.first_seen_seq.min(record.sequence_number);
            profile.last_seen_seq = profile.last_seen_seq.max(record.sequence_number);
        }
    }

    profiles
}
