use serde::Deserialize;

use crate::error::MalformedFeedMessage;
use crate::model::tick::{normalize_symbol, Side, Tick};

/// Deserialize Binance string-encoded numbers to f64.
pub fn string_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// Same as `string_to_f64`, but also accepts bare JSON numbers.
pub fn string_or_number_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    match v {
        serde_json::Value::String(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("invalid number")),
        _ => Err(serde::de::Error::custom("invalid numeric value")),
    }
}

/// Binance trade stream event (symbol@trade).
#[derive(Debug, Deserialize)]
pub struct BinanceTradeEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t", default)]
    pub trade_id: u64,
    #[serde(rename = "p", deserialize_with = "string_or_number_to_f64")]
    pub price: f64,
    #[serde(rename = "q", deserialize_with = "string_or_number_to_f64")]
    pub qty: f64,
    #[serde(rename = "T", default)]
    pub trade_time: Option<u64>,
    #[serde(rename = "m", default)]
    pub is_buyer_maker: Option<bool>,
}

impl BinanceTradeEvent {
    /// Trade time when present, event time otherwise.
    pub fn timestamp_ms(&self) -> u64 {
        self.trade_time.unwrap_or(self.event_time)
    }

    pub fn into_tick(self) -> Tick {
        let timestamp_ms = self.timestamp_ms();
        let side = self
            .is_buyer_maker
            .map(Side::from_buyer_maker)
            .unwrap_or(Side::Unknown);
        Tick::new(
            normalize_symbol(&self.symbol),
            self.price,
            self.qty,
            timestamp_ms,
            side,
        )
    }
}

/// Combined stream wrapper (`/stream?streams=a@trade/b@trade`).
#[derive(Debug, Deserialize)]
pub struct CombinedStreamEnvelope {
    pub stream: String,
    pub data: serde_json::Value,
}

/// Parse a raw trade stream payload, bare or wrapped in a combined-stream
/// envelope. Field-level validity (price > 0 etc.) is left to the store.
pub fn parse_trade_message(payload: &str) -> Result<Tick, MalformedFeedMessage> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| MalformedFeedMessage::new(format!("invalid JSON: {}", e)))?;
    let value = if value.get("stream").is_some() && value.get("data").is_some() {
        let envelope: CombinedStreamEnvelope = serde_json::from_value(value)
            .map_err(|e| MalformedFeedMessage::new(format!("invalid stream envelope: {}", e)))?;
        envelope.data
    } else {
        value
    };
    let event: BinanceTradeEvent = serde_json::from_value(value)
        .map_err(|e| MalformedFeedMessage::new(format!("invalid trade event: {}", e)))?;
    if event.event_type != "trade" {
        return Err(MalformedFeedMessage::new(format!(
            "unexpected event type '{}'",
            event.event_type
        )));
    }
    Ok(event.into_tick())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRADE: &str = r#"{"e":"trade","E":1700000000100,"s":"BTCUSDT","t":42,"p":"60000.50","q":"0.25","T":1700000000050,"m":true}"#;

    #[test]
    fn bare_trade_prefers_trade_time() {
        let tick = parse_trade_message(TRADE).unwrap();
        assert_eq!(tick.symbol, "btcusdt");
        assert_eq!(tick.timestamp_ms, 1_700_000_000_050);
        assert!((tick.price - 60000.5).abs() < f64::EPSILON);
        assert!((tick.size - 0.25).abs() < f64::EPSILON);
        assert_eq!(tick.side, Side::Sell);
    }

    #[test]
    fn combined_envelope_is_unwrapped() {
        let payload = format!(r#"{{"stream":"btcusdt@trade","data":{}}}"#, TRADE);
        let tick = parse_trade_message(&payload).unwrap();
        assert_eq!(tick.symbol, "btcusdt");
    }

    #[test]
    fn falls_back_to_event_time_and_unknown_side() {
        let payload = r#"{"e":"trade","E":5000,"s":"ETHUSDT","p":3500,"q":"1"}"#;
        let tick = parse_trade_message(payload).unwrap();
        assert_eq!(tick.timestamp_ms, 5_000);
        assert_eq!(tick.side, Side::Unknown);
    }

    #[test]
    fn rejects_garbage_and_other_events() {
        assert!(parse_trade_message("not json").is_err());
        assert!(parse_trade_message(r#"{"e":"trade","E":1,"s":"X","p":"abc","q":"1"}"#).is_err());
        assert!(parse_trade_message(r#"{"e":"aggTrade","E":1,"s":"X","p":"1","q":"1"}"#).is_err());
        assert!(parse_trade_message(r#"{"result":null,"id":1}"#).is_err());
    }
}
