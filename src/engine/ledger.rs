//! Portfolio ledger: the single mutation path for managed-asset balances.
//!
//! Not a separate process but a consistency boundary. Every settled fill goes
//! through `apply_fill_legs` under the owning portfolio's lock, so balances
//! always reconcile against the sum of filled order legs for that portfolio.

use rust_decimal::Decimal;

use crate::domain::{Fill, Order, OrderSide, Portfolio};
use crate::error::Result;

/// Settle both currency legs of a fill against the portfolio.
///
/// Buy:  base += qty, quote -= qty * price + fee
/// Sell: base -= qty, quote += qty * price - fee
///
/// The debit leg is applied first; an insufficient balance rejects the fill
/// before any mutation.
pub(crate) fn apply_fill_legs(portfolio: &mut Portfolio, order: &Order, fill: &Fill) -> Result<()> {
    let notional = fill.quantity * fill.price;
    match order.side {
        OrderSide::Buy => {
            portfolio.debit(&order.quote_currency, notional + fill.fee)?;
            portfolio.credit(&order.base_currency, fill.quantity);
        }
        OrderSide::Sell => {
            portfolio.debit(&order.base_currency, fill.quantity)?;
            portfolio.credit(&order.quote_currency, notional - fill.fee);
        }
    }
    Ok(())
}

/// Quantity-weighted average entry price for an asset, from the filled buy
/// legs in the portfolio's order history. Feeds the stop-loss / take-profit
/// evaluation; `None` when the portfolio has no filled buys for the asset.
pub fn average_entry_price(orders: &[Order], asset: &str) -> Option<Decimal> {
    let mut quantity = Decimal::ZERO;
    let mut notional = Decimal::ZERO;
    for order in orders {
        if order.side != OrderSide::Buy || order.base_currency != asset {
            continue;
        }
        for (price, qty) in &order.execution_summary {
            quantity += *qty;
            notional += *price * *qty;
        }
    }
    if quantity.is_zero() {
        None
    } else {
        Some(notional / quantity)
    }
}
