use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WheelColor {
    Black,
    Red,
    Green,
    Yellow,
}

impl WheelColor {
    pub fn rate(&self) -> i64 {
        match self {
            WheelColor::Black => 2,
            WheelColor::Red => 3,
            WheelColor::Green => 5,
            WheelColor::Yellow => 50,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WheelColor::Black => "black",
            WheelColor::Red => "red",
            WheelColor::Green => "green",
            WheelColor::Yellow => "yellow",
        }
    }

    /// Numeric code published by `fair.check` for wheel rounds.
    pub fn number(&self) -> u32 {
        match self {
            WheelColor::Black => 2,
            WheelColor::Red => 3,
            WheelColor::Green => 5,
            WheelColor::Yellow => 50,
        }
    }
}

// Stop angles the client animation lands on, one table per color. The
// frontend wheel is segmented in 15-degree steps; these must not change
// independently of the client assets.
const BLACK_ANGLES: &[f64] = &[0.0, 30.0, 60.0, 105.0, 135.0, 165.0, 210.0, 240.0, 270.0, 315.0];
const RED_ANGLES: &[f64] = &[15.0, 75.0, 120.0, 180.0, 225.0, 285.0, 330.0];
const GREEN_ANGLES: &[f64] = &[45.0, 150.0, 255.0, 345.0];
const YELLOW_ANGLES: &[f64] = &[300.0];

/// Resolve the round color from a uniform draw in [0, 100).
pub fn sample_wheel_color<R: Rng + ?Sized>(rng: &mut R) -> WheelColor {
    let roll: f64 = rng.gen_range(0.0..100.0);
    if roll < 47.9 {
        WheelColor::Black
    } else if roll < 87.9 {
        WheelColor::Red
    } else if roll < 99.9 {
        WheelColor::Green
    } else {
        WheelColor::Yellow
    }
}

/// Pick the calibrated stop angle for the resolved color.
pub fn wheel_angle<R: Rng + ?Sized>(rng: &mut R, color: WheelColor) -> f64 {
    let table = match color {
        WheelColor::Black => BLACK_ANGLES,
        WheelColor::Red => RED_ANGLES,
        WheelColor::Green => GREEN_ANGLES,
        WheelColor::Yellow => YELLOW_ANGLES,
    };
    table[rng.gen_range(0..table.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_rates() {
        assert_eq!(WheelColor::Black.rate(), 2);
        assert_eq!(WheelColor::Red.rate(), 3);
        assert_eq!(WheelColor::Green.rate(), 5);
        assert_eq!(WheelColor::Yellow.rate(), 50);
    }

    #[test]
    fn test_color_distribution() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut counts = [0u32; 4];
        let n = 100_000;
        for _ in 0..n {
            match sample_wheel_color(&mut rng) {
                WheelColor::Black => counts[0] += 1,
                WheelColor::Red => counts[1] += 1,
                WheelColor::Green => counts[2] += 1,
                WheelColor::Yellow => counts[3] += 1,
            }
        }
        // Expected 47.9% / 40% / 12% / 0.1%, generous tolerance.
        assert!((counts[0] as f64 / n as f64 - 0.479).abs() < 0.02);
        assert!((counts[1] as f64 / n as f64 - 0.400).abs() < 0.02);
        assert!((counts[2] as f64 / n as f64 - 0.120).abs() < 0.02);
        assert!(counts[3] > 0 && (counts[3] as f64 / n as f64) < 0.01);
    }

    #[test]
    fn test_angle_comes_from_color_table() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for _ in 0..100 {
            let a = wheel_angle(&mut rng, WheelColor::Green);
            assert!(GREEN_ANGLES.contains(&a));
        }
        assert_eq!(wheel_angle(&mut rng, WheelColor::Yellow), 300.0);
    }
}
