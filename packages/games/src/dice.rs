use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Player return built into the dice rate: `rate * chance = 96`, a 4% edge.
pub const DICE_RTP: f64 = 96.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiceDirection {
    Under,
    Over,
}

/// Derive the roll for one bet from the server seed, the player's seed and
/// the per-user nonce. The hash is published so players can audit the roll.
pub fn dice_roll(server_seed: &[u8], client_seed: &str, nonce: u64) -> (String, f64) {
    let mut hasher = Sha256::new();
    hasher.update(server_seed);
    hasher.update(b":");
    hasher.update(client_seed.as_bytes());
    hasher.update(b":");
    hasher.update(nonce.to_string().as_bytes());
    let digest = hasher.finalize();

    // First 52 bits of the digest, mod 10000, two implied decimals.
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let bits = u64::from_be_bytes(head) >> 12;
    let roll = (bits % 10_000) as f64 / 100.0;
    (hex::encode(digest), roll)
}

/// Payout rate for a winning bet, rounded to two decimals.
pub fn dice_rate(chance: f64) -> f64 {
    ((DICE_RTP / chance) * 100.0).round() / 100.0
}

pub fn dice_win(roll: f64, chance: f64, direction: DiceDirection) -> bool {
    match direction {
        DiceDirection::Under => roll < chance,
        DiceDirection::Over => roll > 100.0 - chance,
    }
}

/// Winning payout in atomics: `amount * rate`, with the rate held at
/// two-decimal precision so no float touches the balance math.
pub fn dice_payout(amount: i64, chance: f64) -> i64 {
    let rate_cents = (dice_rate(chance) * 100.0).round() as i128;
    (amount as i128 * rate_cents / 100) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_is_deterministic() {
        let seed = [7u8; 32];
        let (hash_a, roll_a) = dice_roll(&seed, "abc", 1);
        let (hash_b, roll_b) = dice_roll(&seed, "abc", 1);
        assert_eq!(hash_a, hash_b);
        assert_eq!(roll_a, roll_b);

        let (_, roll_c) = dice_roll(&seed, "abc", 2);
        assert_ne!(roll_a, roll_c); // nonce changes the roll
    }

    #[test]
    fn test_roll_range() {
        let seed = [42u8; 32];
        for nonce in 0..500 {
            let (_, roll) = dice_roll(&seed, "seed", nonce);
            assert!((0.0..100.0).contains(&roll), "roll out of range: {roll}");
        }
    }

    #[test]
    fn test_rate_keeps_house_edge() {
        assert_eq!(dice_rate(50.0), 1.92);
        assert_eq!(dice_rate(96.0), 1.0);
        assert_eq!(dice_rate(1.0), 96.0);
        // rate * chance stays at 96 within rounding
        for chance in [1.0, 2.5, 10.0, 33.0, 50.0, 75.0, 95.0] {
            let product = dice_rate(chance) * chance;
            assert!((product - DICE_RTP).abs() < 0.5, "chance {chance}: {product}");
        }
    }

    #[test]
    fn test_win_predicates() {
        assert!(dice_win(49.99, 50.0, DiceDirection::Under));
        assert!(!dice_win(50.0, 50.0, DiceDirection::Under));
        assert!(dice_win(50.01, 50.0, DiceDirection::Over));
        assert!(!dice_win(50.0, 50.0, DiceDirection::Over));
        assert!(dice_win(99.5, 1.0, DiceDirection::Over));
    }

    #[test]
    fn test_payout_is_integer_math() {
        assert_eq!(dice_payout(10_000_000, 50.0), 19_200_000);
        assert_eq!(dice_payout(1, 50.0), 1); // floor at atomic granularity
    }
}
