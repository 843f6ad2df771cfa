//! Order execution manager: converts approved signals into orders, applies
//! fills, and finalizes order state. All portfolio mutation funnels through
//! here, serialized per portfolio.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{EngineStore, ExchangeConnector};
use crate::config::ExecutionConfig;
use crate::domain::{
    Event, EventType, Fill, Order, OrderCategory, OrderStatus, OrderType, Portfolio, Signal,
};
use crate::engine::ledger;
use crate::error::{GambitError, OrderError, Result};

/// Status feedback pushed to the owning strategy after every order mutation
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: Uuid,
    pub portfolio_id: Uuid,
    pub signal_id: Option<Uuid>,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl OrderUpdate {
    fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            portfolio_id: order.portfolio_id,
            signal_id: order.signal_id,
            status: order.status,
            executed_quantity: order.executed_quantity,
            average_fill_price: order.average_fill_price(),
            timestamp: order.updated_at,
        }
    }
}

/// Optional protective legs attached to a placement
#[derive(Debug, Clone, Copy, Default)]
pub struct Protection {
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

pub struct OrderExecutionManager {
    store: Arc<dyn EngineStore>,
    exchange: Arc<dyn ExchangeConnector>,
    config: ExecutionConfig,
    /// Per-portfolio serialization: one fill application at a time per portfolio
    locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
    updates: broadcast::Sender<OrderUpdate>,
}

impl OrderExecutionManager {
    pub fn new(
        store: Arc<dyn EngineStore>,
        exchange: Arc<dyn ExchangeConnector>,
        config: ExecutionConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            store,
            exchange,
            config,
            locks: DashMap::new(),
            updates,
        }
    }

    /// Subscribe to order status feedback
    pub fn subscribe_updates(&self) -> broadcast::Receiver<OrderUpdate> {
        self.updates.subscribe()
    }

    /// Per-portfolio serialization handle. The runtime holds this across
    /// risk evaluation and placement so a concurrently settling fill cannot
    /// invalidate an exposure check between projection and placement.
    pub(crate) fn portfolio_lock(&self, portfolio_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(portfolio_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn emit(&self, order: &Order) {
        // No receivers is fine; feedback is best-effort
        let _ = self.updates.send(OrderUpdate::from_order(order));
    }

    /// Create a pending order from an approved signal and transmit it.
    /// Protective stop-loss / take-profit legs become opposite-side child
    /// orders, each announced on the manager's event queue. Fills the venue
    /// acknowledges immediately (paper mode) are applied in-line.
    pub async fn place(
        &self,
        signal: &Signal,
        portfolio: &Portfolio,
        protection: Protection,
    ) -> Result<Order> {
        let lock = self.portfolio_lock(portfolio.id);
        let _guard = lock.lock().await;
        self.place_locked(signal, portfolio, protection).await
    }

    /// Placement body. The caller must hold the portfolio's lock.
    pub(crate) async fn place_locked(
        &self,
        signal: &Signal,
        portfolio: &Portfolio,
        protection: Protection,
    ) -> Result<Order> {
        signal.validate()?;

        let order = Order::from_signal(
            signal,
            portfolio.id,
            portfolio.event_manager_id,
            OrderType::Limit,
            OrderCategory::Spot,
        );
        self.store.insert_order(&order).await?;
        self.announce(&order).await?;
        info!(
            order_id = %order.id,
            signal_id = %signal.id,
            side = %order.side,
            quantity = %order.initial_quantity,
            price = %order.target_price,
            "order placed"
        );

        if let Some(stop_loss) = protection.stop_loss {
            let child = order.protective_child(OrderType::StopLoss, stop_loss);
            self.store.insert_order(&child).await?;
            self.announce(&child).await?;
        }
        if let Some(take_profit) = protection.take_profit {
            let child = order.protective_child(OrderType::TakeProfit, take_profit);
            self.store.insert_order(&child).await?;
            self.announce(&child).await?;
        }

        let ack = self.submit_with_retry(&order).await?;
        if !ack.accepted {
            let mut rejected = order;
            rejected.reject()?;
            self.store.update_order(&rejected).await?;
            self.emit(&rejected);
            warn!(order_id = %rejected.id, "order rejected by venue");
            return Ok(rejected);
        }

        for fill in ack.fills {
            self.fill_locked(order.id, fill).await?;
        }

        self.store
            .get_order(order.id)
            .await?
            .ok_or(GambitError::Order(OrderError::NotFound { order_id: order.id }))
    }

    /// Apply a fill under the owning portfolio's lock. A fill id that was
    /// already applied is a no-op, so retried deliveries have no additional
    /// effect. The order mutation and both portfolio legs persist atomically.
    pub async fn apply_fill(&self, order_id: Uuid, fill: Fill) -> Result<Order> {
        let portfolio_id = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(GambitError::Order(OrderError::NotFound { order_id }))?
            .portfolio_id;

        let lock = self.portfolio_lock(portfolio_id);
        let _guard = lock.lock().await;
        self.fill_locked(order_id, fill).await
    }

    /// Fill application body. The caller must hold the owning portfolio's lock.
    async fn fill_locked(&self, order_id: Uuid, fill: Fill) -> Result<Order> {
        if fill.order_id != order_id {
            return Err(GambitError::Validation(format!(
                "fill {} targets order {}, not {}",
                fill.fill_id, fill.order_id, order_id
            )));
        }

        // Fresh state now that the lock is held
        let mut order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(GambitError::Order(OrderError::NotFound { order_id }))?;

        if self.store.fill_applied(fill.fill_id).await? {
            debug!(fill_id = %fill.fill_id, %order_id, "duplicate fill ignored");
            return Ok(order);
        }

        order.apply_fill(&fill, self.config.fill_epsilon)?;

        let mut portfolio = self
            .store
            .get_portfolio(order.portfolio_id)
            .await?
            .ok_or(GambitError::PortfolioNotFound(order.portfolio_id))?;
        ledger::apply_fill_legs(&mut portfolio, &order, &fill)?;

        self.store.persist_fill(&order, &portfolio, &fill).await?;
        self.emit(&order);

        if order.status == OrderStatus::Filled {
            info!(
                %order_id,
                avg_price = ?order.average_fill_price(),
                total_fee = %order.total_fee,
                "order filled"
            );
        } else {
            debug!(
                %order_id,
                executed = %order.executed_quantity,
                remaining = %order.remaining(),
                "partial fill applied"
            );
        }
        Ok(order)
    }

    /// Cancel from pending or partially filled. The executed portion and its
    /// portfolio adjustments remain intact.
    pub async fn cancel(&self, order_id: Uuid) -> Result<Order> {
        let portfolio_id = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(GambitError::Order(OrderError::NotFound { order_id }))?
            .portfolio_id;

        let lock = self.portfolio_lock(portfolio_id);
        let _guard = lock.lock().await;

        let mut order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(GambitError::Order(OrderError::NotFound { order_id }))?;
        order.cancel()?;

        if let Err(e) = self.exchange.cancel(&order).await {
            // Venue-side cancel is best effort; our book is authoritative
            warn!(%order_id, error = %e, "venue cancel failed");
        }

        self.store.update_order(&order).await?;
        self.emit(&order);
        info!(%order_id, executed = %order.executed_quantity, "order cancelled");
        Ok(order)
    }

    /// Average entry price of filled buy legs for an asset in this portfolio
    pub async fn average_entry(&self, portfolio_id: Uuid, asset: &str) -> Result<Option<Decimal>> {
        let orders = self.store.orders_for_portfolio(portfolio_id).await?;
        Ok(ledger::average_entry_price(&orders, asset))
    }

    /// Announce the placement on the manager's event queue
    async fn announce(&self, order: &Order) -> Result<()> {
        let event = Event::new(
            order.event_manager_id,
            EventType::Order,
            1,
            serde_json::json!({ "order_id": order.id }),
        );
        self.store.insert_event(&event).await
    }

    async fn submit_with_retry(&self, order: &Order) -> Result<crate::adapters::SubmitAck> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            match self.exchange.submit(order).await {
                Ok(ack) => return Ok(ack),
                Err(e) if attempt < self.config.max_retries => {
                    warn!(
                        order_id = %order.id,
                        attempt,
                        error = %e,
                        "order submission failed, retrying"
                    );
                    let backoff = self.config.retry_backoff_ms * attempt as u64;
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    // Order stays pending: last-known safe state
                    error!(
                        order_id = %order.id,
                        attempts = attempt,
                        error = %e,
                        "order submission exhausted retries"
                    );
                    return Err(GambitError::External {
                        component: self.exchange.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryStore, PaperExchange, SubmitAck};
    use crate::domain::{EngineMode, ManagerRecord, OrderSide, TradingPair};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<MemoryStore>,
        manager: ManagerRecord,
        portfolio: Portfolio,
    }

    async fn fixture(balance: Decimal) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let manager = ManagerRecord::new(EngineMode::Paper);
        store.insert_manager(&manager).await.unwrap();
        let portfolio = Portfolio::new(
            manager.id,
            Uuid::new_v4(),
            "main",
            "USDT",
            balance,
            "bybit",
        );
        store.insert_portfolio(&portfolio).await.unwrap();
        Fixture {
            store,
            manager,
            portfolio,
        }
    }

    fn manual_exchange() -> Arc<ManualExchange> {
        Arc::new(ManualExchange)
    }

    /// Accepts orders without synthetic fills, so tests drive fills by hand
    struct ManualExchange;

    #[async_trait]
    impl ExchangeConnector for ManualExchange {
        fn name(&self) -> &str {
            "manual"
        }

        async fn submit(&self, _order: &Order) -> Result<SubmitAck> {
            Ok(SubmitAck {
                accepted: true,
                fills: Vec::new(),
            })
        }

        async fn cancel(&self, _order: &Order) -> Result<()> {
            Ok(())
        }
    }

    fn buy_signal(quantity: Decimal, price: Decimal) -> Signal {
        Signal::new(
            Uuid::new_v4(),
            TradingPair::new("BTC", "USDT"),
            OrderSide::Buy,
            quantity,
            price,
        )
    }

    #[tokio::test]
    async fn paper_placement_fills_and_settles() {
        let fx = fixture(dec!(1000)).await;
        let exec = OrderExecutionManager::new(
            fx.store.clone(),
            Arc::new(PaperExchange::default()),
            ExecutionConfig::default(),
        );

        let signal = buy_signal(dec!(2), dec!(100));
        let order = exec
            .place(&signal, &fx.portfolio, Protection::default())
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.executed_quantity, dec!(2));
        assert!(order.executed_at.is_some());

        let portfolio = fx.store.get_portfolio(fx.portfolio.id).await.unwrap().unwrap();
        assert_eq!(portfolio.balance("BTC"), dec!(2));
        assert_eq!(portfolio.balance("USDT"), dec!(800));
    }

    #[tokio::test]
    async fn partial_fills_progress_and_summary_accumulates() {
        let fx = fixture(dec!(1000)).await;
        let exec = OrderExecutionManager::new(
            fx.store.clone(),
            manual_exchange(),
            ExecutionConfig::default(),
        );

        let signal = buy_signal(dec!(1.0), dec!(100));
        let order = exec
            .place(&signal, &fx.portfolio, Protection::default())
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        let after_first = exec
            .apply_fill(order.id, Fill::new(order.id, dec!(99), dec!(0.4), dec!(0)))
            .await
            .unwrap();
        assert_eq!(after_first.status, OrderStatus::PartiallyFilled);

        let after_second = exec
            .apply_fill(order.id, Fill::new(order.id, dec!(101), dec!(0.6), dec!(0)))
            .await
            .unwrap();
        assert_eq!(after_second.status, OrderStatus::Filled);
        assert_eq!(after_second.execution_summary.len(), 2);

        let portfolio = fx.store.get_portfolio(fx.portfolio.id).await.unwrap().unwrap();
        assert_eq!(portfolio.balance("BTC"), dec!(1.0));
        // 1000 - 0.4*99 - 0.6*101
        assert_eq!(portfolio.balance("USDT"), dec!(899.8));
    }

    #[tokio::test]
    async fn duplicate_fill_has_no_additional_effect() {
        let fx = fixture(dec!(1000)).await;
        let exec = OrderExecutionManager::new(
            fx.store.clone(),
            manual_exchange(),
            ExecutionConfig::default(),
        );

        let signal = buy_signal(dec!(1.0), dec!(100));
        let order = exec
            .place(&signal, &fx.portfolio, Protection::default())
            .await
            .unwrap();

        let fill = Fill::new(order.id, dec!(100), dec!(0.4), dec!(0.1));
        exec.apply_fill(order.id, fill.clone()).await.unwrap();
        let replayed = exec.apply_fill(order.id, fill).await.unwrap();

        assert_eq!(replayed.executed_quantity, dec!(0.4));
        assert_eq!(replayed.total_fee, dec!(0.1));
        let portfolio = fx.store.get_portfolio(fx.portfolio.id).await.unwrap().unwrap();
        assert_eq!(portfolio.balance("BTC"), dec!(0.4));
        assert_eq!(portfolio.balance("USDT"), dec!(959.9));
    }

    #[tokio::test]
    async fn cancel_partial_keeps_filled_portion() {
        let fx = fixture(dec!(1000)).await;
        let exec = OrderExecutionManager::new(
            fx.store.clone(),
            manual_exchange(),
            ExecutionConfig::default(),
        );

        let signal = buy_signal(dec!(1.0), dec!(100));
        let order = exec
            .place(&signal, &fx.portfolio, Protection::default())
            .await
            .unwrap();
        exec.apply_fill(order.id, Fill::new(order.id, dec!(100), dec!(0.4), dec!(0)))
            .await
            .unwrap();

        let cancelled = exec.cancel(order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.executed_quantity, dec!(0.4));

        // Portfolio retains the filled adjustment
        let portfolio = fx.store.get_portfolio(fx.portfolio.id).await.unwrap().unwrap();
        assert_eq!(portfolio.balance("BTC"), dec!(0.4));
        assert_eq!(portfolio.balance("USDT"), dec!(960));

        // No further fills after cancellation
        let late = Fill::new(order.id, dec!(100), dec!(0.1), dec!(0));
        assert!(exec.apply_fill(order.id, late).await.is_err());
    }

    #[tokio::test]
    async fn unaffordable_fill_leaves_state_untouched() {
        let fx = fixture(dec!(10)).await;
        let exec = OrderExecutionManager::new(
            fx.store.clone(),
            manual_exchange(),
            ExecutionConfig::default(),
        );

        let signal = buy_signal(dec!(1.0), dec!(100));
        let order = exec
            .place(&signal, &fx.portfolio, Protection::default())
            .await
            .unwrap();

        let fill = Fill::new(order.id, dec!(100), dec!(1.0), dec!(0));
        assert!(exec.apply_fill(order.id, fill).await.is_err());

        let stored = fx.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.executed_quantity, dec!(0));
        let portfolio = fx.store.get_portfolio(fx.portfolio.id).await.unwrap().unwrap();
        assert_eq!(portfolio.balance("USDT"), dec!(10));
    }

    #[tokio::test]
    async fn held_portfolio_lock_blocks_fill_application() {
        let fx = fixture(dec!(1000)).await;
        let exec = Arc::new(OrderExecutionManager::new(
            fx.store.clone(),
            manual_exchange(),
            ExecutionConfig::default(),
        ));

        let signal = buy_signal(dec!(1.0), dec!(100));
        let order = exec
            .place(&signal, &fx.portfolio, Protection::default())
            .await
            .unwrap();

        let lock = exec.portfolio_lock(fx.portfolio.id);
        let guard = lock.lock().await;

        let racing = {
            let exec = exec.clone();
            let fill = Fill::new(order.id, dec!(100), dec!(0.4), dec!(0));
            let order_id = order.id;
            tokio::spawn(async move { exec.apply_fill(order_id, fill).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!racing.is_finished());

        drop(guard);
        let applied = racing.await.unwrap().unwrap();
        assert_eq!(applied.executed_quantity, dec!(0.4));
    }

    #[tokio::test]
    async fn protective_legs_create_child_orders() {
        let fx = fixture(dec!(1000)).await;
        let exec = OrderExecutionManager::new(
            fx.store.clone(),
            manual_exchange(),
            ExecutionConfig::default(),
        );

        let signal = buy_signal(dec!(1.0), dec!(100));
        exec.place(
            &signal,
            &fx.portfolio,
            Protection {
                stop_loss: Some(dec!(90)),
                take_profit: Some(dec!(120)),
            },
        )
        .await
        .unwrap();

        let orders = fx.store.orders_for_portfolio(fx.portfolio.id).await.unwrap();
        assert_eq!(orders.len(), 3);
        let stop = orders
            .iter()
            .find(|o| o.order_type == OrderType::StopLoss)
            .unwrap();
        assert_eq!(stop.side, OrderSide::Sell);
        assert_eq!(stop.target_price, dec!(90));
        let take = orders
            .iter()
            .find(|o| o.order_type == OrderType::TakeProfit)
            .unwrap();
        assert_eq!(take.side, OrderSide::Sell);
        assert_eq!(take.target_price, dec!(120));
    }
}
