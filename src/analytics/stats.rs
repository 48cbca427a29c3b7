use std::collections::HashMap;

use crate::error::AnalyticsError;
use crate::model::bar::Bar;
use crate::model::tick::Tick;

use super::result::SymbolSummary;

/// Close prices of two bar series joined on `interval_start_ms`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedSeries {
    pub timestamps: Vec<u64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl AlignedSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OlsFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Inner join on bar start; keeps `bars1` order, so sorted input gives sorted
/// output.
pub fn align_closes(bars1: &[Bar], bars2: &[Bar]) -> AlignedSeries {
    let by_start: HashMap<u64, f64> = bars2
        .iter()
        .map(|b| (b.interval_start_ms, b.close))
        .collect();
    let mut out = AlignedSeries::default();
    for bar in bars1 {
        if let Some(&close2) = by_start.get(&bar.interval_start_ms) {
            out.timestamps.push(bar.interval_start_ms);
            out.x.push(bar.close);
            out.y.push(close2);
        }
    }
    out
}

pub fn mean(values: &[f64]) -> f64 {
    let Some(&origin) = values.first() else {
        return 0.0;
    };
    origin + shifted_mean(values, origin)
}

/// Population (divide-by-n) standard deviation.
pub fn population_std(values: &[f64]) -> f64 {
    mean_and_std(values).1
}

pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let Some(&origin) = values.first() else {
        return (0.0, 0.0);
    };
    let m = shifted_mean(values, origin);
    let var = values
        .iter()
        .map(|v| {
            let d = (v - origin) - m;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    (origin + m, var.max(0.0).sqrt())
}

fn shifted_mean(values: &[f64], origin: f64) -> f64 {
    values.iter().map(|v| v - origin).sum::<f64>() / values.len() as f64
}

/// Closed-form least squares of `y` on `x` with an intercept.
pub fn ols(x: &[f64], y: &[f64]) -> Result<OlsFit, AnalyticsError> {
    let n = x.len().min(y.len());
    if n < 2 {
        return Err(AnalyticsError::InsufficientData {
            required: 2,
            available: n,
        });
    }
    let (x, y) = (&x[..n], &y[..n]);
    let x_mean = mean(x);
    let y_mean = mean(y);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut ss_tot = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - x_mean;
        let dy = yi - y_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        ss_tot += dy * dy;
    }
    if sxx <= 0.0 || !sxx.is_finite() || x.iter().all(|v| *v == x[0]) {
        return Err(AnalyticsError::DegenerateRegression);
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let ss_res: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| {
            let r = yi - (intercept + slope * xi);
            r * r
        })
        .sum();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    Ok(OlsFit {
        slope,
        intercept,
        r_squared,
    })
}

/// `y[i] - hedge_ratio * x[i]` for every index.
pub fn spread(x: &[f64], y: &[f64], hedge_ratio: f64) -> Vec<f64> {
    x.iter().zip(y).map(|(xi, yi)| yi - hedge_ratio * xi).collect()
}

/// Spread windows whose std is below this fraction of the price scale are
/// rounding noise and treated as flat.
pub const FLAT_RELATIVE_STD: f64 = 1e-12;

/// Std at or below which a spread built from `x`, `y` and `hedge_ratio`
/// counts as constant. The residuals carry rounding error proportional to the
/// input prices, not to the spread itself.
pub fn flat_std_threshold(x: &[f64], y: &[f64], hedge_ratio: f64) -> f64 {
    let max_abs = |v: &[f64]| v.iter().fold(0.0f64, |acc, p| acc.max(p.abs()));
    let scale = max_abs(y).max(hedge_ratio.abs() * max_abs(x)).max(1.0);
    FLAT_RELATIVE_STD * scale
}

/// Z-score of each value against the trailing `window` values (itself
/// included). Element `k` of the output belongs to input index
/// `k + window - 1`; a window with std `<= flat_std` yields `0.0`.
pub fn rolling_zscore(values: &[f64], window: usize, flat_std: f64) -> Vec<f64> {
    let window = window.max(1);
    if values.len() < window {
        return Vec::new();
    }
    let flat_std = flat_std.max(0.0);
    values
        .windows(window)
        .map(|w| {
            let (m, std) = mean_and_std(w);
            if std > flat_std {
                (w[w.len() - 1] - m) / std
            } else {
                0.0
            }
        })
        .collect()
}

/// Pearson correlation over trailing windows; same indexing as
/// [`rolling_zscore`].
pub fn rolling_correlation(x: &[f64], y: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let n = x.len().min(y.len());
    if n < window {
        return Vec::new();
    }
    (window - 1..n)
        .map(|end| {
            let start = end + 1 - window;
            pearson(&x[start..=end], &y[start..=end])
        })
        .collect()
}

/// Pearson correlation; `0.0` when either side has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let (x0, y0) = (x[0], y[0]);
    let mx = shifted_mean(x, x0);
    let my = shifted_mean(y, y0);

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        let dx = (xi - x0) - mx;
        let dy = (yi - y0) - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return 0.0;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Descriptive statistics over a run of ticks for one symbol.
pub fn summarize_ticks(symbol: &str, ticks: &[Tick]) -> SymbolSummary {
    let mut summary = SymbolSummary {
        symbol: symbol.to_string(),
        tick_count: ticks.len(),
        ..SymbolSummary::default()
    };
    if ticks.len() < 2 {
        return summary;
    }

    let prices: Vec<f64> = ticks.iter().map(|t| t.price).collect();
    let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let (price_mean, price_std) = mean_and_std(&prices);
    let volume: f64 = ticks.iter().map(|t| t.size).sum();
    let current = prices[prices.len() - 1];

    summary.current_price = current;
    summary.high = prices.iter().copied().fold(f64::MIN, f64::max);
    summary.low = prices.iter().copied().fold(f64::MAX, f64::min);
    summary.mean = price_mean;
    summary.std = price_std;
    summary.volatility_pct = population_std(&returns) * 100.0;
    summary.volume = volume;
    summary.vwap = if volume > 0.0 {
        ticks.iter().map(Tick::notional).sum::<f64>() / volume
    } else {
        current
    };
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tick::Side;

    fn bar(start: u64, close: f64) -> Bar {
        Bar {
            interval_start_ms: start,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            tick_count: 1,
        }
    }

    #[test]
    fn align_keeps_only_shared_starts() {
        let a = vec![bar(0, 1.0), bar(60, 2.0), bar(120, 3.0)];
        let b = vec![bar(60, 20.0), bar(120, 30.0), bar(180, 40.0)];
        let aligned = align_closes(&a, &b);
        assert_eq!(aligned.timestamps, vec![60, 120]);
        assert_eq!(aligned.x, vec![2.0, 3.0]);
        assert_eq!(aligned.y, vec![20.0, 30.0]);
    }

    #[test]
    fn ols_recovers_exact_line() {
        let x: Vec<f64> = (0..50).map(|i| 100.0 + i as f64 * 0.37).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 3.0).collect();
        let fit = ols(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 3.0).abs() < 1e-7);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ols_rejects_constant_regressor() {
        let x = vec![5.0; 10];
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert_eq!(ols(&x, &y), Err(AnalyticsError::DegenerateRegression));
    }

    #[test]
    fn ols_constant_response_has_zero_r_squared() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y = vec![7.0; 10];
        let fit = ols(&x, &y).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.r_squared, 0.0);
    }

    #[test]
    fn zscore_of_constant_series_is_zero() {
        for level in [0.1, 5.0, -3.75, 61_234.56] {
            let values = vec![level; 40];
            let z = rolling_zscore(&values, 20, 0.0);
            assert_eq!(z.len(), 21);
            assert!(z.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn zscore_matches_hand_computation() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        let z = rolling_zscore(&values, 3, 0.0);
        // window [2, 3, 4]: mean 3, population std sqrt(2/3)
        let expected = (4.0 - 3.0) / (2.0f64 / 3.0).sqrt();
        assert_eq!(z.len(), 2);
        assert!((z[1] - expected).abs() < 1e-12);
    }

    #[test]
    fn rounding_noise_below_threshold_is_flat() {
        let values: Vec<f64> = (0..30)
            .map(|i| 3.0 + if i % 2 == 0 { 4e-15 } else { -4e-15 })
            .collect();
        assert!(rolling_zscore(&values, 10, 0.0).iter().any(|z| z.abs() > 0.5));
        let flat = flat_std_threshold(&[150.0], &[303.0], 2.0);
        assert!(rolling_zscore(&values, 10, flat).iter().all(|z| *z == 0.0));

        let real: Vec<f64> = (0..30).map(|i| 3.0 + (i % 5) as f64 * 0.01).collect();
        assert!(rolling_zscore(&real, 10, flat).iter().any(|z| *z != 0.0));
    }

    #[test]
    fn zscore_needs_a_full_window() {
        assert!(rolling_zscore(&[1.0, 2.0], 3, 0.0).is_empty());
    }

    #[test]
    fn self_correlation_is_one() {
        let x: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 3.0).collect();
        let corr = rolling_correlation(&x, &x, 20);
        assert_eq!(corr.len(), 41);
        assert!(corr.iter().all(|c| (c - 1.0).abs() < 1e-12));
    }

    #[test]
    fn anti_correlated_series() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 50.0 - v).collect();
        assert!((pearson(&x, &y) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_variance_window_correlation_is_zero() {
        let x = vec![1.0; 10];
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert!(rolling_correlation(&x, &y, 5).iter().all(|c| *c == 0.0));
    }

    #[test]
    fn summary_statistics() {
        let ticks = vec![
            Tick::new("btcusdt", 100.0, 1.0, 0, Side::Buy),
            Tick::new("btcusdt", 110.0, 3.0, 1, Side::Sell),
        ];
        let s = summarize_ticks("btcusdt", &ticks);
        assert_eq!(s.tick_count, 2);
        assert!((s.current_price - 110.0).abs() < f64::EPSILON);
        assert!((s.high - 110.0).abs() < f64::EPSILON);
        assert!((s.low - 100.0).abs() < f64::EPSILON);
        assert!((s.mean - 105.0).abs() < 1e-12);
        assert!((s.std - 5.0).abs() < 1e-12);
        assert!((s.volume - 4.0).abs() < f64::EPSILON);
        assert!((s.vwap - 107.5).abs() < 1e-12);
        assert_eq!(s.volatility_pct, 0.0);
    }

    #[test]
    fn summary_of_single_tick_is_zeroed() {
        let ticks = vec![Tick::new("btcusdt", 100.0, 1.0, 0, Side::Buy)];
        let s = summarize_ticks("btcusdt", &ticks);
        assert_eq!(s.tick_count, 1);
        assert_eq!(s.current_price, 0.0);
    }
}
