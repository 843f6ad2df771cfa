//! Exchange connectivity seam.
//!
//! Live connectors are external collaborators; the engine only needs the
//! submit boundary. `PaperExchange` acknowledges every order with a synthetic
//! full fill at the target price, which drives paper and backtest modes.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{Fill, Order};
use crate::error::Result;

/// Acknowledgment from an exchange submission. Fills reported here are
/// applied immediately; live venues usually return none and stream fills
/// back later through `apply_fill`.
#[derive(Debug, Clone, Default)]
pub struct SubmitAck {
    pub accepted: bool,
    pub fills: Vec<Fill>,
}

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Venue name, for logs and alerts
    fn name(&self) -> &str;

    /// Transmit an order to the venue
    async fn submit(&self, order: &Order) -> Result<SubmitAck>;

    /// Request cancellation on the venue
    async fn cancel(&self, order: &Order) -> Result<()>;
}

/// Paper-trading connector: every order fills completely at its target price
/// with a flat fee rate.
pub struct PaperExchange {
    fee_rate: Decimal,
}

impl PaperExchange {
    pub fn new(fee_rate: Decimal) -> Self {
        Self { fee_rate }
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}

#[async_trait]
impl ExchangeConnector for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit(&self, order: &Order) -> Result<SubmitAck> {
        let fee = order.initial_quantity * order.target_price * self.fee_rate;
        let fill = Fill::new(order.id, order.target_price, order.initial_quantity, fee);
        Ok(SubmitAck {
            accepted: true,
            fills: vec![fill],
        })
    }

    async fn cancel(&self, _order: &Order) -> Result<()> {
        Ok(())
    }
}
