use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{OrderSide, TradingPair};
use crate::error::{GambitError, Result};

/// A candidate trade intent produced by a strategy, not yet risk-checked
/// or placed. `strategy_id` provenance is mandatory for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub trading_pair: TradingPair,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub target_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        strategy_id: Uuid,
        trading_pair: TradingPair,
        side: OrderSide,
        quantity: Decimal,
        target_price: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id,
            trading_pair,
            side,
            quantity,
            target_price,
            created_at: Utc::now(),
        }
    }

    /// Reject malformed signals before they reach risk evaluation
    pub fn validate(&self) -> Result<()> {
        if self.quantity <= Decimal::ZERO {
            return Err(GambitError::Validation(format!(
                "signal {} has non-positive quantity {}",
                self.id, self.quantity
            )));
        }
        if self.target_price <= Decimal::ZERO {
            return Err(GambitError::Validation(format!(
                "signal {} has non-positive target price {}",
                self.id, self.target_price
            )));
        }
        Ok(())
    }

    /// Quote-currency notional at the target price
    pub fn notional(&self) -> Decimal {
        self.quantity * self.target_price
    }
}
