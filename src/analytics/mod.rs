pub mod adf;
pub mod result;
pub mod stats;

use std::sync::Arc;

use crate::error::AnalyticsError;
use crate::model::bar::Bar;
use crate::model::tick::normalize_symbol;
use crate::resample::resample;
use crate::store::TickStore;

pub use result::{
    AdfPlaceholder, AnalyticsResult, CorrelationSummary, PairSpec, SeriesPoint, SpreadSummary,
    SymbolSummary, ZScoreSummary,
};

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// How many intervals back from the newest tick each request reads.
    pub lookback_bars: usize,
    pub adf_significance: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            lookback_bars: 500,
            adf_significance: adf::DEFAULT_SIGNIFICANCE,
        }
    }
}

/// Read-only view over the store. Cheap to clone; requests never block
/// ingestion beyond the per-symbol read lock taken while copying ticks.
#[derive(Clone)]
pub struct AnalyticsEngine {
    store: Arc<TickStore>,
    config: AnalyticsConfig,
}

impl AnalyticsEngine {
    pub fn new(store: Arc<TickStore>, config: AnalyticsConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Analyze the most recent `lookback_bars` intervals of the pair. The
    /// window ends at the newer of the two symbols' last ticks.
    ///
    /// Panics if `interval_ms == 0`.
    pub fn analyze(
        &self,
        symbol1: &str,
        symbol2: &str,
        interval_ms: u64,
        window_size: usize,
    ) -> AnalyticsResult {
        let symbol1 = normalize_symbol(symbol1);
        let symbol2 = normalize_symbol(symbol2);

        let end = self
            .store
            .last_timestamp(&symbol1)
            .max(self.store.last_timestamp(&symbol2));
        let (bars1, bars2) = match end {
            Some(end) => {
                let span = interval_ms.saturating_mul(self.config.lookback_bars as u64);
                let from = end.saturating_sub(span);
                (
                    resample(&self.store.range(&symbol1, from, end), interval_ms),
                    resample(&self.store.range(&symbol2, from, end), interval_ms),
                )
            }
            None => (Vec::new(), Vec::new()),
        };

        let mut result = analyze_bars_with(&bars1, &bars2, window_size, self.config.adf_significance);
        tracing::debug!(
            symbol1 = %symbol1,
            symbol2 = %symbol2,
            interval_ms,
            window_size,
            bars1 = bars1.len(),
            bars2 = bars2.len(),
            aligned = result.aligned_points,
            success = result.success,
            "Pair analytics computed"
        );
        result.pair = Some(PairSpec {
            symbol1,
            symbol2,
            interval_ms,
        });
        result
    }

    pub fn analyze_bars(&self, bars1: &[Bar], bars2: &[Bar], window_size: usize) -> AnalyticsResult {
        analyze_bars_with(bars1, bars2, window_size, self.config.adf_significance)
    }

    /// Descriptive stats over the latest `limit` ticks of one symbol.
    pub fn summarize(&self, symbol: &str, limit: usize) -> SymbolSummary {
        let symbol = normalize_symbol(symbol);
        stats::summarize_ticks(&symbol, &self.store.latest(&symbol, limit))
    }
}

pub fn analyze_bars(bars1: &[Bar], bars2: &[Bar], window_size: usize) -> AnalyticsResult {
    analyze_bars_with(bars1, bars2, window_size, adf::DEFAULT_SIGNIFICANCE)
}

/// Alignment, OLS hedge ratio, spread, rolling z-score, rolling correlation
/// and the ADF placeholder. On a data-sufficiency failure the result carries
/// the first error and whatever could still be computed: the regression and
/// spread whenever at least two non-degenerate points exist, zeros otherwise.
pub fn analyze_bars_with(
    bars1: &[Bar],
    bars2: &[Bar],
    window_size: usize,
    adf_significance: f64,
) -> AnalyticsResult {
    let window = window_size.max(1);
    let required = window.max(2);
    let aligned = stats::align_closes(bars1, bars2);
    let n = aligned.len();

    let mut result = AnalyticsResult {
        window_size,
        aligned_points: n,
        adf: adf::placeholder(&aligned, adf_significance),
        ..AnalyticsResult::default()
    };
    let mut error = (n < required).then_some(AnalyticsError::InsufficientData {
        required,
        available: n,
    });

    let fit = if n >= 2 {
        stats::ols(&aligned.x, &aligned.y)
            .map_err(|e| {
                error.get_or_insert(e);
            })
            .ok()
    } else {
        None
    };

    if let Some(fit) = fit {
        result.hedge_ratio = fit.slope;
        result.intercept = fit.intercept;
        result.r_squared = fit.r_squared;

        let spread = stats::spread(&aligned.x, &aligned.y, fit.slope);
        let (spread_mean, spread_std) = stats::mean_and_std(&spread);
        result.spread = SpreadSummary {
            current: spread.last().copied().unwrap_or(0.0),
            mean: spread_mean,
            std: spread_std,
        };
        result.spread_series = points(&aligned.timestamps, &spread, 0);

        let flat_std = stats::flat_std_threshold(&aligned.x, &aligned.y, fit.slope);
        let z = stats::rolling_zscore(&spread, window, flat_std);
        result.zscore = match z.last() {
            Some(&current) => {
                let (mean, std) = stats::mean_and_std(&spread[n - window..]);
                ZScoreSummary {
                    current,
                    mean,
                    std,
                    window_filled: true,
                }
            }
            None => ZScoreSummary {
                current: 0.0,
                mean: spread_mean,
                std: spread_std,
                window_filled: false,
            },
        };
        result.zscore_series = points(&aligned.timestamps, &z, window - 1);
    }

    let corr = stats::rolling_correlation(&aligned.x, &aligned.y, window);
    result.correlation = CorrelationSummary {
        current: corr.last().copied().unwrap_or(0.0),
        mean: if corr.is_empty() { 0.0 } else { stats::mean(&corr) },
        window_filled: !corr.is_empty(),
    };
    result.correlation_series = points(&aligned.timestamps, &corr, window - 1);

    result.success = error.is_none();
    result.error = error;
    result
}

fn points(timestamps: &[u64], values: &[f64], offset: usize) -> Vec<SeriesPoint> {
    timestamps[offset.min(timestamps.len())..]
        .iter()
        .zip(values)
        .map(|(&timestamp_ms, &value)| SeriesPoint {
            timestamp_ms,
            value,
        })
        .collect()
}
