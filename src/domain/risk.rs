use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Immutable risk controller configuration, shared read-only across all
/// order evaluations for the portfolios that reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskControllerConfig {
    pub id: Uuid,
    pub risk_model: String,
    /// Tolerated loss fraction relative to entry price (e.g. 0.05 = 5%)
    pub stop_loss_coefficient: Decimal,
    /// Profit fraction above entry at which exits are always permitted
    pub take_profit_coefficient: Decimal,
    /// asset -> maximum allowed share of portfolio value; absent = unconstrained
    pub max_asset_share: HashMap<String, Decimal>,
}

impl RiskControllerConfig {
    pub fn new(
        risk_model: impl Into<String>,
        stop_loss_coefficient: Decimal,
        take_profit_coefficient: Decimal,
        max_asset_share: HashMap<String, Decimal>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            risk_model: risk_model.into(),
            stop_loss_coefficient,
            take_profit_coefficient,
            max_asset_share,
        }
    }

    pub fn share_limit(&self, asset: &str) -> Option<Decimal> {
        self.max_asset_share.get(asset).copied()
    }
}
