use serde::Serialize;
use thiserror::Error;

/// Startup failures that are reported to the operator before anything runs.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
}

/// Rejected by `TickStore::append`. The tick is dropped; ingestion continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidTick {
    #[error("invalid tick: price must be finite and > 0, got {0}")]
    Price(f64),

    #[error("invalid tick: size must be finite and >= 0, got {0}")]
    Size(f64),

    #[error("invalid tick: '{0}' is not a canonical symbol")]
    Symbol(String),

    #[error("invalid tick: timestamp {got} precedes last stored timestamp {last}")]
    OutOfOrder { last: u64, got: u64 },
}

/// A raw feed message that could not be normalized into a tick.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed feed message: {reason}")]
pub struct MalformedFeedMessage {
    pub reason: String,
}

impl MalformedFeedMessage {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Soft analytics failures, carried inside `AnalyticsResult::error`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyticsError {
    #[error("insufficient data: {available} aligned points, need {required}")]
    InsufficientData { required: usize, available: usize },

    #[error("degenerate regression: explanatory series has zero variance")]
    DegenerateRegression,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlertError {
    #[error("invalid alert symbol '{0}'")]
    InvalidSymbol(String),

    #[error("alert threshold must be finite and > 0, got {0}")]
    InvalidThreshold(f64),
}
