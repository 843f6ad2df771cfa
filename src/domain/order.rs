//! Order state machine and fill accumulation.
//!
//! Lifecycle: pending -> partially_filled -> filled, or cancellation/rejection
//! from any non-terminal state. Fills accumulate into `execution_summary`
//! keyed by price; the portfolio legs for each fill settle through the ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::Signal;
use crate::error::OrderError;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: {other}")),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
    TakeProfit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
            OrderType::StopLoss => "stop_loss",
            OrderType::TakeProfit => "take_profit",
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "limit" => Ok(OrderType::Limit),
            "market" => Ok(OrderType::Market),
            "stop_loss" => Ok(OrderType::StopLoss),
            "take_profit" => Ok(OrderType::TakeProfit),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

/// Order category (exchange account segment)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderCategory {
    Spot,
    Futures,
    Options,
}

impl OrderCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderCategory::Spot => "spot",
            OrderCategory::Futures => "futures",
            OrderCategory::Options => "options",
        }
    }
}

impl std::str::FromStr for OrderCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spot" => Ok(OrderCategory::Spot),
            "futures" => Ok(OrderCategory::Futures),
            "options" => Ok(OrderCategory::Options),
            other => Err(format!("unknown order category: {other}")),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "partially_filled" => Ok(OrderStatus::PartiallyFilled),
            "filled" => Ok(OrderStatus::Filled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "rejected" => Ok(OrderStatus::Rejected),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// A partial or complete execution reported by the exchange.
/// `fill_id` is the idempotency key: the same fill applies at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: Uuid,
    pub order_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    pub fn new(order_id: Uuid, price: Decimal, quantity: Decimal, fee: Decimal) -> Self {
        Self {
            fill_id: Uuid::new_v4(),
            order_id,
            price,
            quantity,
            fee,
            timestamp: Utc::now(),
        }
    }
}

/// Order tracked by the execution manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub event_manager_id: Uuid,
    pub signal_id: Option<Uuid>,
    pub order_type: OrderType,
    pub category: OrderCategory,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub base_currency: String,
    pub quote_currency: String,
    pub initial_quantity: Decimal,
    pub executed_quantity: Decimal,
    pub target_price: Decimal,
    /// price -> cumulative quantity filled at that price
    pub execution_summary: BTreeMap<Decimal, Decimal>,
    pub total_fee: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a pending order from an approved signal
    pub fn from_signal(
        signal: &Signal,
        portfolio_id: Uuid,
        event_manager_id: Uuid,
        order_type: OrderType,
        category: OrderCategory,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            event_manager_id,
            signal_id: Some(signal.id),
            order_type,
            category,
            side: signal.side,
            status: OrderStatus::Pending,
            base_currency: signal.trading_pair.base.clone(),
            quote_currency: signal.trading_pair.quote.clone(),
            initial_quantity: signal.quantity,
            executed_quantity: Decimal::ZERO,
            target_price: signal.target_price,
            execution_summary: BTreeMap::new(),
            total_fee: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            executed_at: None,
        }
    }

    /// Opposite-side protective order (stop-loss / take-profit leg)
    pub fn protective_child(&self, order_type: OrderType, trigger_price: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            portfolio_id: self.portfolio_id,
            event_manager_id: self.event_manager_id,
            signal_id: self.signal_id,
            order_type,
            category: self.category,
            side: self.side.opposite(),
            status: OrderStatus::Pending,
            base_currency: self.base_currency.clone(),
            quote_currency: self.quote_currency.clone(),
            initial_quantity: self.initial_quantity,
            executed_quantity: Decimal::ZERO,
            target_price: trigger_price,
            execution_summary: BTreeMap::new(),
            total_fee: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            executed_at: None,
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.initial_quantity - self.executed_quantity
    }

    /// Quantity-weighted average fill price, from the execution summary
    pub fn average_fill_price(&self) -> Option<Decimal> {
        if self.executed_quantity.is_zero() {
            return None;
        }
        let notional: Decimal = self
            .execution_summary
            .iter()
            .map(|(price, qty)| *price * *qty)
            .sum();
        Some(notional / self.executed_quantity)
    }

    /// Accumulate a fill into the order. Transitions to `filled` when the
    /// remaining quantity drops to `epsilon` or below; `executed_at` is set
    /// only on that transition.
    pub fn apply_fill(&mut self, fill: &Fill, epsilon: Decimal) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::TerminalState {
                status: self.status.as_str().to_string(),
            });
        }
        if fill.quantity <= Decimal::ZERO {
            return Err(OrderError::ZeroQuantity);
        }
        let new_executed = self.executed_quantity + fill.quantity;
        if new_executed > self.initial_quantity + epsilon {
            return Err(OrderError::Overfill {
                initial: self.initial_quantity,
                executed: self.executed_quantity,
                fill: fill.quantity,
            });
        }

        *self
            .execution_summary
            .entry(fill.price)
            .or_insert(Decimal::ZERO) += fill.quantity;
        // executed_quantity never exceeds initial_quantity
        self.executed_quantity = new_executed.min(self.initial_quantity);
        self.total_fee += fill.fee;
        self.updated_at = Utc::now();

        if self.remaining() <= epsilon {
            self.executed_quantity = self.initial_quantity;
            self.status = OrderStatus::Filled;
            self.executed_at = Some(self.updated_at);
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
        Ok(())
    }

    /// Cancel from pending or partially_filled. The filled portion and its
    /// portfolio adjustments stay intact.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Pending | OrderStatus::PartiallyFilled => {
                self.status = OrderStatus::Cancelled;
                self.updated_at = Utc::now();
                Ok(())
            }
            status => Err(OrderError::CancelNotAllowed {
                status: status.as_str().to_string(),
            }),
        }
    }

    /// Reject a pending order (exchange refusal)
    pub fn reject(&mut self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Pending => {
                self.status = OrderStatus::Rejected;
                self.updated_at = Utc::now();
                Ok(())
            }
            status => Err(OrderError::TerminalState {
                status: status.as_str().to_string(),
            }),
        }
    }
}
