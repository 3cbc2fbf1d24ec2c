//! Block subsidy schedule and fee arithmetic

use crate::config::ConsensusParams;
use crate::constants::*;
use crate::types::*;

/// Subsidy for a block at `height`: halves every `subsidy_halving_interval`
/// blocks and reaches zero after 64 halvings.
pub fn block_subsidy(height: Natural, params: &ConsensusParams) -> Amount {
    let halvings = height / params.subsidy_halving_interval.max(1);
    if halvings >= 64 {
        return 0;
    }
    params.initial_subsidy >> halvings
}

/// Sum of all subsidies for heights `0..=height`.
pub fn total_supply(height: Natural, params: &ConsensusParams) -> Amount {
    let interval = params.subsidy_halving_interval.max(1);
    let mut total: Amount = 0;
    let mut start = 0;

    while start <= height {
        let subsidy = block_subsidy(start, params);
        if subsidy == 0 {
            break;
        }
        let end = (start + interval - 1).min(height);
        total = total.saturating_add(subsidy.saturating_mul(end - start + 1));
        start += interval;
    }

    total
}

/// Maximum value a coinbase at `height` may claim.
pub fn coinbase_allowance(height: Natural, fees: Amount, params: &ConsensusParams) -> Option<Amount> {
    block_subsidy(height, params).checked_add(fees)
}

/// Fee rate in base units per 1000 bytes.
pub fn fee_rate(fee: Amount, size: usize) -> u64 {
    if size == 0 {
        return 0;
    }
    ((fee as u128 * 1000) / size as u128).min(u64::MAX as u128) as u64
}

pub fn is_money_range(value: Amount) -> bool {
    value <= MAX_MONEY
}
