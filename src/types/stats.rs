//! Per-round counters.

use std::ops::AddAssign;

use crate::types::FractionalAsset;

/// Offer-level changes made during one round. Merged across units with `+=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockStateUpdateStats {
    pub new_offer_count: u64,
    pub cancel_offer_count: u64,
    pub fully_clear_offer_count: u64,
    pub partial_clear_offer_count: u64,
}

impl AddAssign for BlockStateUpdateStats {
    fn add_assign(&mut self, other: Self) {
        self.new_offer_count += other.new_offer_count;
        self.cancel_offer_count += other.cancel_offer_count;
        self.fully_clear_offer_count += other.fully_clear_offer_count;
        self.partial_clear_offer_count += other.partial_clear_offer_count;
    }
}

/// Supply a validator saw cleared in full, for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitValidationStats {
    pub activated_supply: FractionalAsset,
}

/// Per-market validation accumulators, indexed like the manager's units.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationStatistics {
    pub units: Vec<UnitValidationStats>,
}

impl ValidationStatistics {
    pub fn with_units(count: usize) -> Self {
        Self {
            units: vec![UnitValidationStats::default(); count],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_merge() {
        let mut total = BlockStateUpdateStats::default();
        total += BlockStateUpdateStats {
            new_offer_count: 2,
            fully_clear_offer_count: 1,
            ..Default::default()
        };
        total += BlockStateUpdateStats {
            new_offer_count: 3,
            partial_clear_offer_count: 1,
            ..Default::default()
        };
        assert_eq!(total.new_offer_count, 5);
        assert_eq!(total.fully_clear_offer_count, 1);
        assert_eq!(total.partial_clear_offer_count, 1);
        assert_eq!(total.cancel_offer_count, 0);
    }
}
