use serde::{Deserialize, Serialize};

/// A user's pair of sub-balances in atomics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balances {
    pub main: i64,
    pub bonus: i64,
}

impl Balances {
    pub fn new(main: i64, bonus: i64) -> Self {
        Self { main, bonus }
    }

    /// Apply signed deltas to both sub-balances. Returns `None` when either
    /// result would be negative or the addition overflows; the caller maps
    /// that to an insufficient-balance error.
    pub fn checked_apply(&self, delta_main: i64, delta_bonus: i64) -> Option<Balances> {
        let main = self.main.checked_add(delta_main)?;
        let bonus = self.bonus.checked_add(delta_bonus)?;
        if main < 0 || bonus < 0 {
            return None;
        }
        Some(Balances { main, bonus })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_apply() {
        let b = Balances::new(1_000_000, 500_000);
        assert_eq!(
            b.checked_apply(-400_000, 0),
            Some(Balances::new(600_000, 500_000))
        );
        assert_eq!(
            b.checked_apply(250_000, -500_000),
            Some(Balances::new(1_250_000, 0))
        );
    }

    #[test]
    fn test_checked_apply_refuses_negative() {
        let b = Balances::new(100, 0);
        assert_eq!(b.checked_apply(-101, 0), None);
        assert_eq!(b.checked_apply(0, -1), None);
    }

    #[test]
    fn test_checked_apply_refuses_overflow() {
        let b = Balances::new(i64::MAX, 0);
        assert_eq!(b.checked_apply(1, 0), None);
    }
}
