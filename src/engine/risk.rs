//! Risk controller: pure evaluation of candidate signals against a
//! portfolio's referenced risk configuration. No mutation; rejection is a
//! structured reason the strategy can react to, never a fatal error.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::{OrderSide, Portfolio, RiskControllerConfig, Signal};

/// Structured rejection reason, reported back to the originating strategy
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskRejection {
    #[error("asset share exceeded for {asset}: projected {projected} > limit {limit}")]
    AssetShareExceeded {
        asset: String,
        projected: Decimal,
        limit: Decimal,
    },

    #[error("stop loss breached: price {target_price} below {floor} (entry {entry_price}, coefficient {coefficient})")]
    StopLossBreached {
        entry_price: Decimal,
        target_price: Decimal,
        floor: Decimal,
        coefficient: Decimal,
    },

    #[error("invalid signal: {reason}")]
    InvalidSignal { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved,
    Rejected(RiskRejection),
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approved)
    }
}

/// Read-only inputs the evaluation needs beyond the signal and portfolio:
/// mark prices for valuation and the position's average entry price.
#[derive(Debug, Clone, Default)]
pub struct RiskContext {
    /// asset -> mark price; the signal's target price is the default mark
    /// for its own asset
    pub marks: HashMap<String, Decimal>,
    /// Average entry price of the referenced position, if any
    pub entry_price: Option<Decimal>,
}

/// Stateless evaluation service consulted before every order placement
pub struct RiskController;

impl RiskController {
    /// Evaluate a signal. Checks short-circuit on the first rejection:
    /// take-profit exemption (exits locking in profit are always permitted,
    /// even if they change exposure), then the projected asset-share cap,
    /// then the stop-loss floor.
    pub fn evaluate(
        signal: &Signal,
        portfolio: &Portfolio,
        config: &RiskControllerConfig,
        ctx: &RiskContext,
    ) -> RiskDecision {
        if let Err(e) = signal.validate() {
            return RiskDecision::Rejected(RiskRejection::InvalidSignal {
                reason: e.to_string(),
            });
        }

        let asset = &signal.trading_pair.base;

        // Profit-taking exemption for exits
        if signal.side == OrderSide::Sell {
            if let Some(entry) = ctx.entry_price {
                let ceiling = entry * (Decimal::ONE + config.take_profit_coefficient);
                if signal.target_price >= ceiling {
                    return RiskDecision::Approved;
                }
            }
        }

        // Projected post-trade asset share; absent cap = unconstrained
        if let Some(limit) = config.share_limit(asset) {
            let projected = projected_share(signal, portfolio, ctx);
            if projected > limit {
                return RiskDecision::Rejected(RiskRejection::AssetShareExceeded {
                    asset: asset.clone(),
                    projected,
                    limit,
                });
            }
        }

        // Stop-loss floor relative to the position's entry price
        if signal.side == OrderSide::Sell {
            if let Some(entry) = ctx.entry_price {
                let floor = entry * (Decimal::ONE - config.stop_loss_coefficient);
                if signal.target_price < floor {
                    return RiskDecision::Rejected(RiskRejection::StopLossBreached {
                        entry_price: entry,
                        target_price: signal.target_price,
                        floor,
                        coefficient: config.stop_loss_coefficient,
                    });
                }
            }
        }

        RiskDecision::Approved
    }
}

/// Post-trade share of the signal's base asset in total portfolio value.
/// Marks come from the context; the signal's own asset defaults to its
/// target price, the accounting currency is at par. Fees are ignored here;
/// the ledger enforces exact balances at settlement.
fn projected_share(signal: &Signal, portfolio: &Portfolio, ctx: &RiskContext) -> Decimal {
    let asset = &signal.trading_pair.base;
    let mut marks = ctx.marks.clone();
    marks.entry(asset.clone()).or_insert(signal.target_price);

    let mut projected = portfolio.clone();
    let notional = signal.quantity * signal.target_price;
    match signal.side {
        OrderSide::Buy => {
            projected.credit(asset, signal.quantity);
            // Allow the projection to go negative; the ledger rejects
            // genuinely unaffordable fills at settlement.
            projected.credit(&signal.trading_pair.quote, -notional);
        }
        OrderSide::Sell => {
            projected.credit(asset, -signal.quantity);
            projected.credit(&signal.trading_pair.quote, notional);
        }
    }
    projected.asset_share(asset, &marks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradingPair;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn setup(max_btc_share: Decimal) -> (Portfolio, RiskControllerConfig) {
        let config = RiskControllerConfig::new(
            "static",
            dec!(0.05),
            dec!(0.10),
            HashMap::from([("BTC".to_string(), max_btc_share)]),
        );
        let portfolio = Portfolio::new(
            Uuid::new_v4(),
            config.id,
            "main",
            "USDT",
            dec!(10000),
            "bybit",
        );
        (portfolio, config)
    }

    fn buy(quantity: Decimal, price: Decimal) -> Signal {
        Signal::new(
            Uuid::new_v4(),
            TradingPair::new("BTC", "USDT"),
            OrderSide::Buy,
            quantity,
            price,
        )
    }

    fn sell(quantity: Decimal, price: Decimal) -> Signal {
        Signal::new(
            Uuid::new_v4(),
            TradingPair::new("BTC", "USDT"),
            OrderSide::Sell,
            quantity,
            price,
        )
    }

    #[test]
    fn share_above_cap_rejected_below_approved() {
        let (portfolio, config) = setup(dec!(0.30));
        let ctx = RiskContext::default();

        // 3100 / 10000 = 0.31 > 0.30
        let over = buy(dec!(31), dec!(100));
        match RiskController::evaluate(&over, &portfolio, &config, &ctx) {
            RiskDecision::Rejected(RiskRejection::AssetShareExceeded {
                asset,
                projected,
                limit,
            }) => {
                assert_eq!(asset, "BTC");
                assert_eq!(projected, dec!(0.31));
                assert_eq!(limit, dec!(0.30));
            }
            other => panic!("expected asset-share rejection, got {other:?}"),
        }

        // 2900 / 10000 = 0.29
        let under = buy(dec!(29), dec!(100));
        assert!(RiskController::evaluate(&under, &portfolio, &config, &ctx).is_approved());
    }

    #[test]
    fn unconstrained_asset_passes_share_check() {
        let (portfolio, config) = setup(dec!(0.30));
        let ctx = RiskContext::default();
        let signal = Signal::new(
            Uuid::new_v4(),
            TradingPair::new("ETH", "USDT"),
            OrderSide::Buy,
            dec!(90),
            dec!(100),
        );
        assert!(RiskController::evaluate(&signal, &portfolio, &config, &ctx).is_approved());
    }

    #[test]
    fn sell_beyond_stop_loss_rejected() {
        let (mut portfolio, config) = setup(dec!(0.30));
        portfolio.credit("BTC", dec!(1));
        let ctx = RiskContext {
            entry_price: Some(dec!(100)),
            ..Default::default()
        };

        // Floor at 95; selling at 94 realizes too deep a loss
        let signal = sell(dec!(1), dec!(94));
        match RiskController::evaluate(&signal, &portfolio, &config, &ctx) {
            RiskDecision::Rejected(RiskRejection::StopLossBreached { floor, .. }) => {
                assert_eq!(floor, dec!(95.00));
            }
            other => panic!("expected stop-loss rejection, got {other:?}"),
        }

        // At the floor is still acceptable
        let at_floor = sell(dec!(1), dec!(95));
        assert!(RiskController::evaluate(&at_floor, &portfolio, &config, &ctx).is_approved());
    }

    #[test]
    fn profit_taking_exempt_from_share_cap() {
        let (mut portfolio, config) = setup(dec!(0.0));
        portfolio.credit("BTC", dec!(1));
        let ctx = RiskContext {
            entry_price: Some(dec!(100)),
            ..Default::default()
        };

        // Cap of zero would reject any BTC exposure, but a sell at >= 110
        // locks in the configured profit and is permitted outright.
        let signal = sell(dec!(0.5), dec!(111));
        assert!(RiskController::evaluate(&signal, &portfolio, &config, &ctx).is_approved());
    }

    #[test]
    fn malformed_signal_rejected_with_reason() {
        let (portfolio, config) = setup(dec!(0.30));
        let ctx = RiskContext::default();
        let signal = buy(dec!(0), dec!(100));
        assert!(matches!(
            RiskController::evaluate(&signal, &portfolio, &config, &ctx),
            RiskDecision::Rejected(RiskRejection::InvalidSignal { .. })
        ));
    }
}
