use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use super::result::{AdfPlaceholder, CriticalValues};
use super::stats::AlignedSeries;

/// Below this many aligned points the placeholder reports "not stationary"
/// with a p-value of 1.
pub const MIN_ADF_POINTS: usize = 10;

pub const DEFAULT_SIGNIFICANCE: f64 = 0.05;

/// Asymptotic MacKinnon critical values for the constant-only case.
pub const CRITICAL_VALUES: CriticalValues = CriticalValues {
    one_pct: -3.43,
    five_pct: -2.86,
    ten_pct: -2.57,
};

pub fn insufficient() -> AdfPlaceholder {
    AdfPlaceholder {
        test_statistic: 0.0,
        p_value: 1.0,
        critical_values: CRITICAL_VALUES,
        is_stationary: false,
        placeholder: true,
    }
}

/// Not an ADF regression. Output comes from a PRNG seeded with a SHA-256
/// digest of the aligned series, so identical input gives identical output.
pub fn placeholder(series: &AlignedSeries, significance: f64) -> AdfPlaceholder {
    if series.len() < MIN_ADF_POINTS {
        return insufficient();
    }
    let mut rng = StdRng::seed_from_u64(seed_for(series));
    let test_statistic = -3.2 + rng.gen_range(-0.5..0.5);
    let p_value = rng.gen_range(0.01..0.09);
    AdfPlaceholder {
        test_statistic,
        p_value,
        critical_values: CRITICAL_VALUES,
        is_stationary: p_value < significance,
        placeholder: true,
    }
}

pub fn seed_for(series: &AlignedSeries) -> u64 {
    let mut hasher = Sha256::new();
    for ((ts, x), y) in series.timestamps.iter().zip(&series.x).zip(&series.y) {
        hasher.update(ts.to_le_bytes());
        hasher.update(x.to_bits().to_le_bytes());
        hasher.update(y.to_bits().to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed)
}
