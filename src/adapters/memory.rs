//! In-memory store for tests and paper/backtest runs.
//!
//! DashMap shard locks make each entry mutation atomic, which is all the
//! compare-and-set on `executed_at` needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::domain::{
    Event, Fill, ManagerRecord, ManagerStatus, Order, Portfolio, RiskControllerConfig,
    StrategyRecord,
};
use crate::error::{GambitError, Result};

use super::traits::EngineStore;

#[derive(Default)]
pub struct MemoryStore {
    managers: DashMap<Uuid, ManagerRecord>,
    events: DashMap<Uuid, Event>,
    strategies: DashMap<Uuid, StrategyRecord>,
    subscriptions: DashSet<(Uuid, Uuid)>, // (portfolio_id, strategy_id)
    risk_controllers: DashMap<Uuid, RiskControllerConfig>,
    portfolios: DashMap<Uuid, Portfolio>,
    orders: DashMap<Uuid, Order>,
    fills: DashMap<Uuid, Fill>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn insert_manager(&self, manager: &ManagerRecord) -> Result<()> {
        self.managers.insert(manager.id, manager.clone());
        Ok(())
    }

    async fn get_manager(&self, id: Uuid) -> Result<Option<ManagerRecord>> {
        Ok(self.managers.get(&id).map(|m| m.clone()))
    }

    async fn set_manager_status(&self, id: Uuid, status: ManagerStatus) -> Result<()> {
        let mut manager = self
            .managers
            .get_mut(&id)
            .ok_or(GambitError::ManagerNotFound(id))?;
        manager.status = status;
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        self.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        Ok(self.events.get(&id).map(|e| e.clone()))
    }

    async fn fetch_unexecuted(&self, manager_id: Uuid, limit: i64) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.event_manager_id == manager_id && !e.is_executed())
            .map(|e| e.clone())
            .collect();
        events.sort_by_key(|e| e.dispatch_key());
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn mark_dispatched(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut event = self
            .events
            .get_mut(&event_id)
            .ok_or(GambitError::EventNotFound(event_id))?;
        event.dispatched_at = Some(at);
        Ok(())
    }

    async fn mark_executed(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut event = self
            .events
            .get_mut(&event_id)
            .ok_or(GambitError::EventNotFound(event_id))?;
        if event.executed_at.is_some() {
            return Ok(false);
        }
        event.executed_at = Some(at);
        Ok(true)
    }

    async fn insert_strategy(&self, strategy: &StrategyRecord) -> Result<()> {
        self.strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<StrategyRecord>> {
        Ok(self.strategies.get(&id).map(|s| s.clone()))
    }

    async fn update_strategy_status(&self, strategy: &StrategyRecord) -> Result<()> {
        let mut existing = self
            .strategies
            .get_mut(&strategy.id)
            .ok_or(GambitError::StrategyNotFound(strategy.id))?;
        existing.status = strategy.status;
        existing.started_at = strategy.started_at;
        existing.stopped_at = strategy.stopped_at;
        Ok(())
    }

    async fn subscribe(&self, portfolio_id: Uuid, strategy_id: Uuid) -> Result<()> {
        self.subscriptions.insert((portfolio_id, strategy_id));
        Ok(())
    }

    async fn unsubscribe(&self, portfolio_id: Uuid, strategy_id: Uuid) -> Result<()> {
        self.subscriptions.remove(&(portfolio_id, strategy_id));
        Ok(())
    }

    async fn portfolios_for_strategy(&self, strategy_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|pair| pair.1 == strategy_id)
            .map(|pair| pair.0)
            .collect())
    }

    async fn insert_risk_controller(&self, controller: &RiskControllerConfig) -> Result<()> {
        self.risk_controllers.insert(controller.id, controller.clone());
        Ok(())
    }

    async fn get_risk_controller(&self, id: Uuid) -> Result<Option<RiskControllerConfig>> {
        Ok(self.risk_controllers.get(&id).map(|r| r.clone()))
    }

    async fn insert_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        self.portfolios.insert(portfolio.id, portfolio.clone());
        Ok(())
    }

    async fn get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>> {
        Ok(self.portfolios.get(&id).map(|p| p.clone()))
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn orders_for_portfolio(&self, portfolio_id: Uuid) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.portfolio_id == portfolio_id)
            .map(|o| o.clone())
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn fill_applied(&self, fill_id: Uuid) -> Result<bool> {
        Ok(self.fills.contains_key(&fill_id))
    }

    async fn persist_fill(&self, order: &Order, portfolio: &Portfolio, fill: &Fill) -> Result<()> {
        self.fills.insert(fill.fill_id, fill.clone());
        self.orders.insert(order.id, order.clone());
        self.portfolios.insert(portfolio.id, portfolio.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EngineMode, EventType};

    #[tokio::test]
    async fn mark_executed_is_a_compare_and_set() {
        let store = MemoryStore::new();
        let manager = ManagerRecord::new(EngineMode::Paper);
        store.insert_manager(&manager).await.unwrap();

        let event = Event::new(manager.id, EventType::Market, 1, serde_json::json!({}));
        store.insert_event(&event).await.unwrap();

        assert!(store.mark_executed(event.id, Utc::now()).await.unwrap());
        // Second attempt loses the CAS
        assert!(!store.mark_executed(event.id, Utc::now()).await.unwrap());
        // And is a no-op, not an error
        let stored = store.get_event(event.id).await.unwrap().unwrap();
        assert!(stored.is_executed());
    }

    #[tokio::test]
    async fn fetch_unexecuted_filters_and_orders() {
        let store = MemoryStore::new();
        let manager = ManagerRecord::new(EngineMode::Paper);
        store.insert_manager(&manager).await.unwrap();

        let low = Event::new(manager.id, EventType::Market, 1, serde_json::json!({}));
        let high = Event::new(manager.id, EventType::Market, 9, serde_json::json!({}));
        let done = Event::new(manager.id, EventType::Market, 99, serde_json::json!({}));
        for e in [&low, &high, &done] {
            store.insert_event(e).await.unwrap();
        }
        store.mark_executed(done.id, Utc::now()).await.unwrap();

        let batch = store.fetch_unexecuted(manager.id, 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, high.id);
        assert_eq!(batch[1].id, low.id);
    }
}
