use serde::Serialize;

use crate::error::AnalyticsError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp_ms: u64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairSpec {
    pub symbol1: String,
    pub symbol2: String,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SpreadSummary {
    pub current: f64,
    pub mean: f64,
    pub std: f64,
}

/// `current` is the last rolling z-score. When no window ever filled it is
/// `0.0` and `window_filled` is false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ZScoreSummary {
    pub current: f64,
    pub mean: f64,
    pub std: f64,
    pub window_filled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CorrelationSummary {
    pub current: f64,
    pub mean: f64,
    pub window_filled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CriticalValues {
    #[serde(rename = "1%")]
    pub one_pct: f64,
    #[serde(rename = "5%")]
    pub five_pct: f64,
    #[serde(rename = "10%")]
    pub ten_pct: f64,
}

/// Stationarity verdict. NOT an Augmented Dickey-Fuller computation: values
/// are pseudo-random, seeded from a hash of the input series, so they are
/// reproducible but carry no statistical meaning. `placeholder` is always
/// true so consumers can tell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdfPlaceholder {
    pub test_statistic: f64,
    pub p_value: f64,
    pub critical_values: CriticalValues,
    pub is_stationary: bool,
    pub placeholder: bool,
}

impl Default for AdfPlaceholder {
    fn default() -> Self {
        super::adf::insufficient()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<PairSpec>,
    pub window_size: usize,
    pub aligned_points: usize,
    pub hedge_ratio: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub spread: SpreadSummary,
    pub spread_series: Vec<SeriesPoint>,
    pub zscore: ZScoreSummary,
    pub zscore_series: Vec<SeriesPoint>,
    pub correlation: CorrelationSummary,
    pub correlation_series: Vec<SeriesPoint>,
    pub adf: AdfPlaceholder,
    pub success: bool,
    pub error: Option<AnalyticsError>,
}

impl AnalyticsResult {
    pub fn current_zscore(&self) -> f64 {
        self.zscore.current
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub tick_count: usize,
    pub current_price: f64,
    pub high: f64,
    pub low: f64,
    pub mean: f64,
    pub std: f64,
    pub volatility_pct: f64,
    pub volume: f64,
    pub vwap: f64,
}
