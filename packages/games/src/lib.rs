mod battle;
mod coinflip;
mod crash;
mod dice;
mod jackpot;
mod wheel;

pub use battle::{battle_payout, battle_winner, red_ticket_end, BattleTeam};
pub use coinflip::{coinflip_payout, coinflip_winner, ticket_count, CoinflipSide};
pub use crash::{multiplier_at, sample_crash_point, GRAPH_POINT_CAP, GROWTH_PER_MS};
pub use dice::{dice_payout, dice_rate, dice_roll, dice_win, DiceDirection, DICE_RTP};
pub use jackpot::{jackpot_payout, tickets_for_bet, winning_bet_index};
pub use wheel::{sample_wheel_color, wheel_angle, WheelColor};

/// Apply a commission percentage (two-decimal precision) to an atomic
/// amount, returning what the player keeps. Integer arithmetic only.
pub(crate) fn after_commission(amount: i64, commission_pct: f64) -> i64 {
    let pct_x100 = (commission_pct * 100.0).round() as i128;
    let kept = amount as i128 * (10_000 - pct_x100) / 10_000;
    kept as i64
}
