//! Storage seam for the engine.
//!
//! Every component reads and writes through `EngineStore`, so the same engine
//! runs against Postgres in production and the in-memory store in tests and
//! paper/backtest runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Event, Fill, ManagerRecord, ManagerStatus, Order, Portfolio, RiskControllerConfig,
    StrategyRecord,
};
use crate::error::Result;

#[async_trait]
pub trait EngineStore: Send + Sync {
    // ==================== Event managers ====================

    async fn insert_manager(&self, manager: &ManagerRecord) -> Result<()>;

    async fn get_manager(&self, id: Uuid) -> Result<Option<ManagerRecord>>;

    async fn set_manager_status(&self, id: Uuid, status: ManagerStatus) -> Result<()>;

    // ==================== Events ====================

    /// Append-only insert
    async fn insert_event(&self, event: &Event) -> Result<()>;

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>>;

    /// Unexecuted events for a manager, ordered (priority desc, created_at asc)
    async fn fetch_unexecuted(&self, manager_id: Uuid, limit: i64) -> Result<Vec<Event>>;

    /// Stamp dispatch time (dispatch is not completion)
    async fn mark_dispatched(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Compare-and-set `executed_at`. Returns false if already executed,
    /// guaranteeing at-most-once semantics under concurrent attempts.
    async fn mark_executed(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    // ==================== Strategies ====================

    async fn insert_strategy(&self, strategy: &StrategyRecord) -> Result<()>;

    async fn get_strategy(&self, id: Uuid) -> Result<Option<StrategyRecord>>;

    /// Persist status and started_at/stopped_at; other columns are immutable
    /// after creation.
    async fn update_strategy_status(&self, strategy: &StrategyRecord) -> Result<()>;

    // ==================== Subscriptions ====================

    async fn subscribe(&self, portfolio_id: Uuid, strategy_id: Uuid) -> Result<()>;

    async fn unsubscribe(&self, portfolio_id: Uuid, strategy_id: Uuid) -> Result<()>;

    async fn portfolios_for_strategy(&self, strategy_id: Uuid) -> Result<Vec<Uuid>>;

    // ==================== Risk controllers ====================

    async fn insert_risk_controller(&self, controller: &RiskControllerConfig) -> Result<()>;

    async fn get_risk_controller(&self, id: Uuid) -> Result<Option<RiskControllerConfig>>;

    // ==================== Portfolios ====================

    async fn insert_portfolio(&self, portfolio: &Portfolio) -> Result<()>;

    async fn get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>>;

    // ==================== Orders & fills ====================

    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;

    async fn orders_for_portfolio(&self, portfolio_id: Uuid) -> Result<Vec<Order>>;

    /// Persist order mutations that carry no fill (cancel, reject)
    async fn update_order(&self, order: &Order) -> Result<()>;

    /// Whether a fill id has already been applied
    async fn fill_applied(&self, fill_id: Uuid) -> Result<bool>;

    /// Atomically record a fill, the mutated order, and the settled portfolio
    async fn persist_fill(&self, order: &Order, portfolio: &Portfolio, fill: &Fill) -> Result<()>;
}
