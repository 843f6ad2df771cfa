//! Portfolios and their managed-asset balances.
//!
//! Balances are mutated only through the ledger's fill-application path
//! (`engine::ledger`); the mutation helpers here are crate-private so no
//! external caller can bypass that boundary.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::OrderError;

/// Persisted portfolio row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    pub event_manager_id: Uuid,
    pub risk_controller_id: Uuid,
    pub name: String,
    /// asset -> current balance
    pub managed_assets: HashMap<String, Decimal>,
    /// Accounting currency, valued at par
    pub currency: String,
    pub initial_balance: Decimal,
    pub exchange: String,
}

impl Portfolio {
    /// New portfolio seeded with its initial balance in the accounting currency
    pub fn new(
        event_manager_id: Uuid,
        risk_controller_id: Uuid,
        name: impl Into<String>,
        currency: impl Into<String>,
        initial_balance: Decimal,
        exchange: impl Into<String>,
    ) -> Self {
        let currency = currency.into();
        let mut managed_assets = HashMap::new();
        managed_assets.insert(currency.clone(), initial_balance);
        Self {
            id: Uuid::new_v4(),
            event_manager_id,
            risk_controller_id,
            name: name.into(),
            managed_assets,
            currency,
            initial_balance,
            exchange: exchange.into(),
        }
    }

    /// Current balance for an asset (zero if untracked)
    pub fn balance(&self, asset: &str) -> Decimal {
        self.managed_assets
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Total value: accounting currency at par, other assets at their mark.
    /// Assets without a mark price are excluded.
    pub fn total_value(&self, marks: &HashMap<String, Decimal>) -> Decimal {
        self.managed_assets
            .iter()
            .map(|(asset, balance)| {
                if asset == &self.currency {
                    *balance
                } else {
                    marks
                        .get(asset)
                        .map(|mark| *balance * *mark)
                        .unwrap_or(Decimal::ZERO)
                }
            })
            .sum()
    }

    /// Share of total portfolio value held in `asset`, at the given marks
    pub fn asset_share(&self, asset: &str, marks: &HashMap<String, Decimal>) -> Decimal {
        let total = self.total_value(marks);
        if total <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let value = if asset == self.currency {
            self.balance(asset)
        } else {
            self.balance(asset) * marks.get(asset).copied().unwrap_or(Decimal::ZERO)
        };
        value / total
    }

    /// Credit an asset. Ledger-only.
    pub(crate) fn credit(&mut self, asset: &str, amount: Decimal) {
        *self
            .managed_assets
            .entry(asset.to_string())
            .or_insert(Decimal::ZERO) += amount;
    }

    /// Debit an asset, failing if the balance is insufficient. Ledger-only.
    pub(crate) fn debit(&mut self, asset: &str, amount: Decimal) -> Result<(), OrderError> {
        let available = self.balance(asset);
        if available < amount {
            return Err(OrderError::InsufficientBalance {
                asset: asset.to_string(),
                available,
                required: amount,
            });
        }
        *self
            .managed_assets
            .entry(asset.to_string())
            .or_insert(Decimal::ZERO) -= amount;
        Ok(())
    }
}
