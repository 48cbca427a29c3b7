use serde::{Deserialize, Serialize};

use crate::error::InvalidTick;

/// Longest instrument code accepted by the store.
pub const MAX_SYMBOL_LEN: usize = 32;

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
    Unknown,
}

impl Side {
    /// Binance reports `m = true` when the buyer was the maker, i.e. the
    /// aggressor sold.
    pub fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
            Side::Unknown => "unknown",
        }
    }

    /// Lenient parse used for stored rows; anything unrecognized is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" => Side::Buy,
            "sell" | "s" => Side::Sell,
            _ => Side::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub size: f64,
    pub timestamp_ms: u64,
    pub side: Side,
}

impl Tick {
    pub fn new(symbol: impl Into<String>, price: f64, size: f64, timestamp_ms: u64, side: Side) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            size,
            timestamp_ms,
            side,
        }
    }

    /// Checks the per-tick invariants. Ordering against the existing series
    /// is checked by the store.
    pub fn validate(&self) -> Result<(), InvalidTick> {
        if !is_valid_symbol(&self.symbol) {
            return Err(InvalidTick::Symbol(self.symbol.clone()));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(InvalidTick::Price(self.price));
        }
        if !self.size.is_finite() || self.size < 0.0 {
            return Err(InvalidTick::Size(self.size));
        }
        Ok(())
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

/// Canonical symbol form: trimmed, lowercase.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Canonical symbols are 1..=32 lowercase ASCII alphanumerics.
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}
