use crate::lsps1::LspPolicy;

/// 365 days of 144 blocks.
pub const BLOCKS_PER_YEAR: u64 = 365 * 144;

/// Assumed vsize of a channel-open transaction for chain-fee estimation.
pub const CHANNEL_OPEN_TX_VBYTES: u64 = 300;

/// Total sale price of a channel: a flat base fee, a capacity fee prorated by
/// lease duration, and the estimated on-chain cost of the open transaction.
///
/// Deterministic for identical inputs and never negative.
pub fn total_fee_sat(
    policy: &LspPolicy,
    capacity_sat: u64,
    channel_expiry_blocks: u32,
    is_private: bool,
    chain_fee_sat_per_vbyte: f64,
) -> u64 {
    let ppm_fee_rate = policy.fee_rate_ppm
        + if is_private {
            policy.private_fee_rate_ppm
        } else {
            0
        };

    // Annualized capacity fee, then prorated by the requested lease. The
    // intermediate product needs u128: ppm * capacity * expiry overflows u64.
    let capacity_fee = u128::from(ppm_fee_rate) * u128::from(capacity_sat) / 1_000_000 / 4;
    let prorated_fee =
        capacity_fee * u128::from(channel_expiry_blocks) / u128::from(BLOCKS_PER_YEAR);

    let chain_fee = (CHANNEL_OPEN_TX_VBYTES as f64 * chain_fee_sat_per_vbyte).floor() as u64;

    policy.base_fee_sat + prorated_fee as u64 + chain_fee
}
