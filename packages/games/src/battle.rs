use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleTeam {
    Red,
    Blue,
}

impl BattleTeam {
    pub fn as_str(&self) -> &'static str {
        match self {
            BattleTeam::Red => "red",
            BattleTeam::Blue => "blue",
        }
    }
}

/// Red's share of the 1000-ticket range, clamped so neither team can own
/// the whole draw.
pub fn red_ticket_end(red_chance_pct: f64) -> u64 {
    let end = (red_chance_pct * 10.0).round() as i64;
    end.clamp(1, 999) as u64
}

/// Resolve the winning team from a ticket in [1, 1000].
pub fn battle_winner(winner_ticket: u64, red_end: u64) -> BattleTeam {
    if winner_ticket <= red_end {
        BattleTeam::Red
    } else {
        BattleTeam::Blue
    }
}

/// Per-winner payout: stake back plus commissioned profit. The winner
/// factor is `total_bank / winner_bank`; profit is clamped at zero so a
/// degenerate bank split never claws back the stake.
pub fn battle_payout(
    amount_atomic: i64,
    total_bank: i64,
    winner_bank: i64,
    commission_pct: f64,
) -> i64 {
    if winner_bank <= 0 {
        return amount_atomic;
    }
    let gross = amount_atomic as i128 * total_bank as i128 / winner_bank as i128;
    let profit = (gross - amount_atomic as i128).max(0);
    let pct_x100 = (commission_pct * 100.0).round() as i128;
    let kept_profit = profit - profit * pct_x100 / 10_000;
    (amount_atomic as i128 + kept_profit) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_red_ticket_end_clamps() {
        assert_eq!(red_ticket_end(50.0), 500);
        assert_eq!(red_ticket_end(0.0), 1);
        assert_eq!(red_ticket_end(100.0), 999);
        assert_eq!(red_ticket_end(33.33), 333);
    }

    #[test]
    fn test_battle_winner() {
        assert_eq!(battle_winner(1, 500), BattleTeam::Red);
        assert_eq!(battle_winner(500, 500), BattleTeam::Red);
        assert_eq!(battle_winner(501, 500), BattleTeam::Blue);
        assert_eq!(battle_winner(1000, 500), BattleTeam::Blue);
    }

    #[test]
    fn test_battle_payout() {
        // Even banks, 10% commission: 10 stake, 10 profit -> 10 + 9 = 19.
        assert_eq!(
            battle_payout(10_000_000, 20_000_000, 10_000_000, 10.0),
            19_000_000
        );
        // No commission returns the full doubled stake.
        assert_eq!(
            battle_payout(10_000_000, 20_000_000, 10_000_000, 0.0),
            20_000_000
        );
    }

    #[test]
    fn test_battle_payout_profit_clamped() {
        // Winner bank exceeding total bank would imply negative profit.
        assert_eq!(
            battle_payout(10_000_000, 10_000_000, 20_000_000, 10.0),
            10_000_000
        );
        assert_eq!(battle_payout(10_000_000, 20_000_000, 0, 10.0), 10_000_000);
    }
}
