use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::AlertError;
use crate::feed::now_ms;
use crate::model::tick::{is_valid_symbol, normalize_symbol, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Above,
    Below,
}

impl AlertCondition {
    /// Strict comparison: a price equal to the threshold does not trigger.
    pub fn holds(&self, price: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::Above => price > threshold,
            AlertCondition::Below => price < threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceAlert {
    pub id: u64,
    pub name: String,
    pub symbol: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub is_active: bool,
    pub triggered: bool,
    pub created_at_ms: u64,
    pub triggered_at_ms: Option<u64>,
    pub triggered_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAlert {
    pub name: String,
    pub symbol: String,
    pub condition: AlertCondition,
    pub threshold: f64,
}

#[derive(Debug, Default)]
struct Book {
    next_id: u64,
    alerts: Vec<PriceAlert>,
}

#[derive(Debug, Default)]
pub struct AlertBook {
    inner: RwLock<Book>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, new: NewAlert) -> Result<PriceAlert, AlertError> {
        let symbol = normalize_symbol(&new.symbol);
        if !is_valid_symbol(&symbol) {
            return Err(AlertError::InvalidSymbol(new.symbol));
        }
        if !new.threshold.is_finite() || new.threshold <= 0.0 {
            return Err(AlertError::InvalidThreshold(new.threshold));
        }
        let name = match new.name.trim() {
            "" => format!("{} {:?} {}", symbol, new.condition, new.threshold),
            name => name.to_string(),
        };

        let mut book = self.inner.write();
        book.next_id += 1;
        let alert = PriceAlert {
            id: book.next_id,
            name,
            symbol,
            condition: new.condition,
            threshold: new.threshold,
            is_active: true,
            triggered: false,
            created_at_ms: now_ms(),
            triggered_at_ms: None,
            triggered_price: None,
        };
        book.alerts.push(alert.clone());
        Ok(alert)
    }

    pub fn list(&self) -> Vec<PriceAlert> {
        self.inner.read().alerts.clone()
    }

    pub fn remove(&self, id: u64) -> bool {
        let mut book = self.inner.write();
        let before = book.alerts.len();
        book.alerts.retain(|a| a.id != id);
        book.alerts.len() != before
    }

    /// Mark and return every alert the batch triggers. Each alert fires at
    /// most once, on the first tick that satisfies it.
    pub fn check(&self, ticks: &[Tick]) -> Vec<PriceAlert> {
        if ticks.is_empty() || !self.has_pending() {
            return Vec::new();
        }
        let mut fired = Vec::new();
        let mut book = self.inner.write();
        for alert in book.alerts.iter_mut().filter(|a| a.is_active && !a.triggered) {
            let hit = ticks
                .iter()
                .find(|t| t.symbol == alert.symbol && alert.condition.holds(t.price, alert.threshold));
            if let Some(tick) = hit {
                alert.triggered = true;
                alert.triggered_at_ms = Some(tick.timestamp_ms);
                alert.triggered_price = Some(tick.price);
                fired.push(alert.clone());
            }
        }
        fired
    }

    fn has_pending(&self) -> bool {
        self.inner
            .read()
            .alerts
            .iter()
            .any(|a| a.is_active && !a.triggered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tick::Side;

    fn new_alert(symbol: &str, condition: AlertCondition, threshold: f64) -> NewAlert {
        NewAlert {
            name: String::new(),
            symbol: symbol.to_string(),
            condition,
            threshold,
        }
    }

    #[test]
    fn create_normalizes_and_validates() {
        let book = AlertBook::new();
        let a = book.create(new_alert(" BTCUSDT ", AlertCondition::Above, 1.0)).unwrap();
        assert_eq!(a.symbol, "btcusdt");
        assert_eq!(a.id, 1);
        assert!(!a.name.is_empty());
        assert!(book.create(new_alert("btc-usdt", AlertCondition::Above, 1.0)).is_err());
        assert!(book.create(new_alert("btcusdt", AlertCondition::Below, f64::NAN)).is_err());
        assert_eq!(book.list().len(), 1);
    }

    #[test]
    fn threshold_equality_does_not_trigger() {
        let book = AlertBook::new();
        book.create(new_alert("ethusdt", AlertCondition::Below, 100.0)).unwrap();
        let at = [Tick::new("ethusdt", 100.0, 1.0, 1, Side::Buy)];
        assert!(book.check(&at).is_empty());
        let below = [Tick::new("ethusdt", 99.5, 1.0, 2, Side::Buy)];
        let fired = book.check(&below);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].triggered_price, Some(99.5));
        assert_eq!(fired[0].triggered_at_ms, Some(2));
    }

    #[test]
    fn remove_reports_whether_found() {
        let book = AlertBook::new();
        let a = book.create(new_alert("solusdt", AlertCondition::Above, 200.0)).unwrap();
        assert!(book.remove(a.id));
        assert!(!book.remove(a.id));
        assert!(book.list().is_empty());
    }
}
