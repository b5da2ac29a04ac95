use crate::after_commission;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinflipSide {
    Heads,
    Tails,
}

/// Tickets each player holds: `1 + floor(amount_coins * 100)`. The creator
/// owns `[1, n]`, the joiner the `n` tickets after it.
pub fn ticket_count(amount_atomic: i64) -> u64 {
    (1 + amount_atomic / (money::SCALE / 100)) as u64
}

/// True when the drawn ticket falls in the creator's range.
pub fn coinflip_winner(winner_ticket: u64, creator_end: u64) -> bool {
    winner_ticket <= creator_end
}

/// Winner takes both stakes less commission.
pub fn coinflip_payout(amount_atomic: i64, commission_pct: f64) -> i64 {
    after_commission(amount_atomic * 2, commission_pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_count() {
        assert_eq!(ticket_count(10_000_000), 1_001); // 10 coins
        assert_eq!(ticket_count(10_000), 2);
        assert_eq!(ticket_count(0), 1);
    }

    #[test]
    fn test_winner_by_range() {
        assert!(coinflip_winner(1, 1_001));
        assert!(coinflip_winner(1_001, 1_001));
        assert!(!coinflip_winner(1_002, 1_001));
    }

    #[test]
    fn test_payout() {
        assert_eq!(coinflip_payout(10_000_000, 5.0), 19_000_000);
        assert_eq!(coinflip_payout(10_000_000, 0.0), 20_000_000);
    }
}
