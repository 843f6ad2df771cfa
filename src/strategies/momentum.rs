//! Momentum reference strategy: trades in the direction of recent price
//! movement over a sliding window of market events.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::VecDeque;
use std::str::FromStr;
use tracing::debug;

use crate::domain::{Event, EventType, OrderSide, Signal, StrategyRecord, TradingPair};
use crate::engine::runtime::Strategy;
use crate::error::{GambitError, Result};

/// Strategy parameters, read from the persisted record's `parameters` JSON
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MomentumParams {
    /// Window length in observed prices
    pub lookback: usize,
    /// Fractional move across the window that triggers a trade
    pub move_threshold: Decimal,
    /// Order size in base units
    pub quantity: Decimal,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            lookback: 5,
            move_threshold: dec!(0.02),
            quantity: dec!(1),
        }
    }
}

/// Buys when price has risen by the threshold across the lookback window,
/// sells when it has fallen by it. The window resets after each signal so
/// one move produces one trade.
pub struct MomentumStrategy {
    params: MomentumParams,
    prices: VecDeque<Decimal>,
}

impl MomentumStrategy {
    pub fn new(params: MomentumParams) -> Self {
        Self {
            params,
            prices: VecDeque::new(),
        }
    }

    /// Build from a strategy record, falling back to defaults for any
    /// parameter the record omits
    pub fn from_record(record: &StrategyRecord) -> Result<Self> {
        let params: MomentumParams = serde_json::from_value(record.parameters.clone())?;
        if params.lookback < 2 {
            return Err(GambitError::Validation(
                "momentum lookback must be at least 2".into(),
            ));
        }
        Ok(Self::new(params))
    }

    fn observe(&mut self, price: Decimal) -> Option<OrderSide> {
        self.prices.push_back(price);
        if self.prices.len() > self.params.lookback {
            self.prices.pop_front();
        }
        if self.prices.len() < self.params.lookback {
            return None;
        }

        let oldest = *self.prices.front()?;
        if oldest.is_zero() {
            return None;
        }
        let change = (price - oldest) / oldest;
        if change >= self.params.move_threshold {
            Some(OrderSide::Buy)
        } else if change <= -self.params.move_threshold {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }
}

/// Market event payload this strategy understands
#[derive(Debug, Deserialize)]
struct MarketTick {
    pair: String,
    price: Decimal,
}

#[async_trait]
impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    async fn on_event(&mut self, record: &StrategyRecord, event: &Event) -> Result<Vec<Signal>> {
        if event.event_type != EventType::Market {
            return Ok(Vec::new());
        }

        let tick: MarketTick = serde_json::from_value(event.payload.clone())
            .map_err(|e| GambitError::Validation(format!("malformed market payload: {e}")))?;
        let pair = TradingPair::from_str(&tick.pair)
            .map_err(|e| GambitError::Validation(format!("malformed market payload: {e}")))?;
        if pair != record.trading_pair {
            return Ok(Vec::new());
        }

        let Some(side) = self.observe(tick.price) else {
            return Ok(Vec::new());
        };
        debug!(
            strategy = %record.name,
            pair = %pair,
            price = %tick.price,
            side = %side,
            "momentum threshold crossed"
        );
        self.prices.clear();
        Ok(vec![Signal::new(
            record.id,
            record.trading_pair.clone(),
            side,
            self.params.quantity,
            tick.price,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn record() -> StrategyRecord {
        StrategyRecord::new(
            Uuid::new_v4(),
            TradingPair::new("BTC", "USDT"),
            "momentum",
            json!({ "lookback": 3, "move_threshold": "0.02", "quantity": "0.5" }),
        )
    }

    fn tick(pair: &str, price: &str) -> Event {
        Event::new(
            Uuid::new_v4(),
            EventType::Market,
            5,
            json!({ "pair": pair, "price": price }),
        )
    }

    #[tokio::test]
    async fn rising_window_emits_buy() {
        let record = record();
        let mut strategy = MomentumStrategy::from_record(&record).unwrap();

        for price in ["100", "101"] {
            let signals = strategy
                .on_event(&record, &tick("BTC/USDT", price))
                .await
                .unwrap();
            assert!(signals.is_empty());
        }
        // 103/100 = +3% >= 2%
        let signals = strategy
            .on_event(&record, &tick("BTC/USDT", "103"))
            .await
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, OrderSide::Buy);
        assert_eq!(signals[0].quantity, dec!(0.5));
        assert_eq!(signals[0].target_price, dec!(103));
    }

    #[tokio::test]
    async fn falling_window_emits_sell() {
        let record = record();
        let mut strategy = MomentumStrategy::from_record(&record).unwrap();

        for price in ["100", "99"] {
            strategy
                .on_event(&record, &tick("BTC/USDT", price))
                .await
                .unwrap();
        }
        let signals = strategy
            .on_event(&record, &tick("BTC/USDT", "97"))
            .await
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn flat_window_stays_quiet() {
        let record = record();
        let mut strategy = MomentumStrategy::from_record(&record).unwrap();
        for price in ["100", "100.5", "101"] {
            let signals = strategy
                .on_event(&record, &tick("BTC/USDT", price))
                .await
                .unwrap();
            assert!(signals.is_empty());
        }
    }

    #[tokio::test]
    async fn other_pairs_and_event_types_ignored() {
        let record = record();
        let mut strategy = MomentumStrategy::from_record(&record).unwrap();

        let signals = strategy
            .on_event(&record, &tick("ETH/USDT", "100"))
            .await
            .unwrap();
        assert!(signals.is_empty());
        assert!(strategy.prices.is_empty());

        let order_event = Event::new(Uuid::new_v4(), EventType::Order, 1, json!({}));
        let signals = strategy.on_event(&record, &order_event).await.unwrap();
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_a_validation_error() {
        let record = record();
        let mut strategy = MomentumStrategy::from_record(&record).unwrap();
        let event = Event::new(
            Uuid::new_v4(),
            EventType::Market,
            5,
            json!({ "pair": "BTCUSDT" }),
        );
        assert!(matches!(
            strategy.on_event(&record, &event).await,
            Err(GambitError::Validation(_))
        ));
    }

    #[test]
    fn lookback_below_two_rejected() {
        let mut record = record();
        record.parameters = json!({ "lookback": 1 });
        assert!(MomentumStrategy::from_record(&record).is_err());
    }

    #[test]
    fn window_resets_after_signal() {
        let mut strategy = MomentumStrategy::new(MomentumParams {
            lookback: 2,
            move_threshold: dec!(0.02),
            quantity: dec!(1),
        });
        assert!(strategy.observe(dec!(100)).is_none());
        assert_eq!(strategy.observe(dec!(103)), Some(OrderSide::Buy));
        strategy.prices.clear();
        // Fresh window needs to refill before the next trigger
        assert!(strategy.observe(dec!(103)).is_none());
    }
}
