//! PostgreSQL storage adapter.
//!
//! Runtime `sqlx::query` with explicit binds; JSONB for payloads, parameters,
//! asset maps, and execution summaries. The at-most-once guarantee lives in
//! `mark_executed`: a single-row UPDATE guarded by `executed_at IS NULL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::{BTreeMap, HashMap};
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    Event, Fill, ManagerRecord, ManagerStatus, Order, Portfolio, RiskControllerConfig,
    StrategyRecord,
};
use crate::error::{GambitError, Result};

use super::traits::EngineStore;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse<T>(value: &str, what: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| GambitError::Internal(format!("corrupt {what} column: {e}")))
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<Event> {
    Ok(Event {
        id: row.get("event_id"),
        event_manager_id: row.get("event_manager_id"),
        event_type: parse(row.get::<String, _>("event_type").as_str(), "event_type")?,
        priority: row.get("priority"),
        payload: row.get("payload"),
        created_at: row.get("created_at"),
        dispatched_at: row.get("dispatched_at"),
        executed_at: row.get("executed_at"),
    })
}

fn strategy_from_row(row: &sqlx::postgres::PgRow) -> Result<StrategyRecord> {
    Ok(StrategyRecord {
        id: row.get("strategy_id"),
        event_manager_id: row.get("event_manager_id"),
        trading_pair: parse(
            row.get::<String, _>("trading_pair").as_str(),
            "trading_pair",
        )?,
        name: row.get("strategy_name"),
        status: parse(row.get::<String, _>("status").as_str(), "status")?,
        parameters: row.get("parameters"),
        started_at: row.get("started_at"),
        stopped_at: row.get("stopped_at"),
    })
}

fn portfolio_from_row(row: &sqlx::postgres::PgRow) -> Result<Portfolio> {
    let managed_assets: HashMap<String, Decimal> =
        serde_json::from_value(row.get("managed_assets"))?;
    Ok(Portfolio {
        id: row.get("portfolio_id"),
        event_manager_id: row.get("event_manager_id"),
        risk_controller_id: row.get("risk_controller_id"),
        name: row.get("portfolio_name"),
        managed_assets,
        currency: row.get("currency"),
        initial_balance: row.get("initial_balance"),
        exchange: row.get("exchange"),
    })
}

fn order_from_row(row: &sqlx::postgres::PgRow) -> Result<Order> {
    let execution_summary: BTreeMap<Decimal, Decimal> =
        serde_json::from_value(row.get("execution_summary"))?;
    Ok(Order {
        id: row.get("order_id"),
        portfolio_id: row.get("portfolio_id"),
        event_manager_id: row.get("event_manager_id"),
        signal_id: row.get("signal_id"),
        order_type: parse(row.get::<String, _>("order_type").as_str(), "order_type")?,
        category: parse(
            row.get::<String, _>("order_category").as_str(),
            "order_category",
        )?,
        side: parse(row.get::<String, _>("order_side").as_str(), "order_side")?,
        status: parse(
            row.get::<String, _>("order_status").as_str(),
            "order_status",
        )?,
        base_currency: row.get("base_currency"),
        quote_currency: row.get("quote_currency"),
        initial_quantity: row.get("initial_quantity"),
        executed_quantity: row.get("executed_quantity"),
        target_price: row.get("target_price"),
        execution_summary,
        total_fee: row.get("total_fee"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        executed_at: row.get("executed_at"),
    })
}

const ORDER_COLUMNS: &str = r#"order_id, portfolio_id, event_manager_id, signal_id, order_type,
       order_category, order_side, order_status, base_currency, quote_currency,
       initial_quantity, executed_quantity, target_price, execution_summary,
       total_fee, created_at, updated_at, executed_at"#;

#[async_trait]
impl EngineStore for PostgresStore {
    async fn insert_manager(&self, manager: &ManagerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_managers (event_manager_id, mode, status)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(manager.id)
        .bind(manager.mode.as_str())
        .bind(manager.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_manager(&self, id: Uuid) -> Result<Option<ManagerRecord>> {
        let row = sqlx::query(
            "SELECT event_manager_id, mode, status FROM event_managers WHERE event_manager_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(ManagerRecord {
                id: r.get("event_manager_id"),
                mode: parse(r.get::<String, _>("mode").as_str(), "mode")?,
                status: parse(r.get::<String, _>("status").as_str(), "status")?,
            })
        })
        .transpose()
    }

    async fn set_manager_status(&self, id: Uuid, status: ManagerStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE event_managers SET status = $2 WHERE event_manager_id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(GambitError::ManagerNotFound(id));
        }
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (event_id, event_manager_id, event_type, priority, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.event_manager_id)
        .bind(event.event_type.as_str())
        .bind(event.priority)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        let row = sqlx::query(
            r#"
            SELECT event_id, event_manager_id, event_type, priority, payload,
                   created_at, dispatched_at, executed_at
            FROM events WHERE event_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| event_from_row(&r)).transpose()
    }

    async fn fetch_unexecuted(&self, manager_id: Uuid, limit: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_manager_id, event_type, priority, payload,
                   created_at, dispatched_at, executed_at
            FROM events
            WHERE event_manager_id = $1 AND executed_at IS NULL
            ORDER BY priority DESC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(manager_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn mark_dispatched(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE events SET dispatched_at = $2 WHERE event_id = $1")
            .bind(event_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GambitError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn mark_executed(&self, event_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        // Only the first marker wins; later attempts affect zero rows.
        let result = sqlx::query(
            "UPDATE events SET executed_at = $2 WHERE event_id = $1 AND executed_at IS NULL",
        )
        .bind(event_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_strategy(&self, strategy: &StrategyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategies (strategy_id, event_manager_id, trading_pair, strategy_name,
                                    status, parameters, started_at, stopped_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(strategy.id)
        .bind(strategy.event_manager_id)
        .bind(strategy.trading_pair.to_string())
        .bind(&strategy.name)
        .bind(strategy.status.as_str())
        .bind(&strategy.parameters)
        .bind(strategy.started_at)
        .bind(strategy.stopped_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<StrategyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT strategy_id, event_manager_id, trading_pair, strategy_name,
                   status, parameters, started_at, stopped_at
            FROM strategies WHERE strategy_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| strategy_from_row(&r)).transpose()
    }

    async fn update_strategy_status(&self, strategy: &StrategyRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE strategies
            SET status = $2, started_at = $3, stopped_at = $4
            WHERE strategy_id = $1
            "#,
        )
        .bind(strategy.id)
        .bind(strategy.status.as_str())
        .bind(strategy.started_at)
        .bind(strategy.stopped_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GambitError::StrategyNotFound(strategy.id));
        }
        Ok(())
    }

    async fn subscribe(&self, portfolio_id: Uuid, strategy_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_subscriptions (portfolio_id, strategy_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(portfolio_id)
        .bind(strategy_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unsubscribe(&self, portfolio_id: Uuid, strategy_id: Uuid) -> Result<()> {
        sqlx::query(
            "DELETE FROM strategy_subscriptions WHERE portfolio_id = $1 AND strategy_id = $2",
        )
        .bind(portfolio_id)
        .bind(strategy_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn portfolios_for_strategy(&self, strategy_id: Uuid) -> Result<Vec<Uuid>> {
        let rows =
            sqlx::query("SELECT portfolio_id FROM strategy_subscriptions WHERE strategy_id = $1")
                .bind(strategy_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(|r| r.get("portfolio_id")).collect())
    }

    async fn insert_risk_controller(&self, controller: &RiskControllerConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_controllers (risk_controller_id, risk_model, stop_loss_coefficient,
                                          take_profit_coefficient, max_asset_share)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(controller.id)
        .bind(&controller.risk_model)
        .bind(controller.stop_loss_coefficient)
        .bind(controller.take_profit_coefficient)
        .bind(serde_json::to_value(&controller.max_asset_share)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_risk_controller(&self, id: Uuid) -> Result<Option<RiskControllerConfig>> {
        let row = sqlx::query(
            r#"
            SELECT risk_controller_id, risk_model, stop_loss_coefficient,
                   take_profit_coefficient, max_asset_share
            FROM risk_controllers WHERE risk_controller_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let max_asset_share: HashMap<String, Decimal> =
                serde_json::from_value(r.get("max_asset_share"))?;
            Ok(RiskControllerConfig {
                id: r.get("risk_controller_id"),
                risk_model: r.get("risk_model"),
                stop_loss_coefficient: r.get("stop_loss_coefficient"),
                take_profit_coefficient: r.get("take_profit_coefficient"),
                max_asset_share,
            })
        })
        .transpose()
    }

    async fn insert_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portfolios (portfolio_id, event_manager_id, risk_controller_id,
                                    portfolio_name, managed_assets, currency,
                                    initial_balance, exchange)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(portfolio.id)
        .bind(portfolio.event_manager_id)
        .bind(portfolio.risk_controller_id)
        .bind(&portfolio.name)
        .bind(serde_json::to_value(&portfolio.managed_assets)?)
        .bind(&portfolio.currency)
        .bind(portfolio.initial_balance)
        .bind(&portfolio.exchange)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>> {
        let row = sqlx::query(
            r#"
            SELECT portfolio_id, event_manager_id, risk_controller_id, portfolio_name,
                   managed_assets, currency, initial_balance, exchange
            FROM portfolios WHERE portfolio_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| portfolio_from_row(&r)).transpose()
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, portfolio_id, event_manager_id, signal_id, order_type,
                                order_category, order_side, order_status, base_currency,
                                quote_currency, initial_quantity, executed_quantity, target_price,
                                execution_summary, total_fee, created_at, updated_at, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(order.id)
        .bind(order.portfolio_id)
        .bind(order.event_manager_id)
        .bind(order.signal_id)
        .bind(order.order_type.as_str())
        .bind(order.category.as_str())
        .bind(order.side.as_str())
        .bind(order.status.as_str())
        .bind(&order.base_currency)
        .bind(&order.quote_currency)
        .bind(order.initial_quantity)
        .bind(order.executed_quantity)
        .bind(order.target_price)
        .bind(serde_json::to_value(&order.execution_summary)?)
        .bind(order.total_fee)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.executed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| order_from_row(&r)).transpose()
    }

    async fn orders_for_portfolio(&self, portfolio_id: Uuid) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE portfolio_id = $1 ORDER BY created_at ASC"
        ))
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET order_status = $2, executed_quantity = $3, execution_summary = $4,
                total_fee = $5, updated_at = $6, executed_at = $7
            WHERE order_id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.executed_quantity)
        .bind(serde_json::to_value(&order.execution_summary)?)
        .bind(order.total_fee)
        .bind(order.updated_at)
        .bind(order.executed_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GambitError::Order(crate::error::OrderError::NotFound {
                order_id: order.id,
            }));
        }
        Ok(())
    }

    async fn fill_applied(&self, fill_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM order_fills WHERE fill_id = $1")
            .bind(fill_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn persist_fill(&self, order: &Order, portfolio: &Portfolio, fill: &Fill) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO order_fills (fill_id, order_id, price, quantity, fee, applied_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(fill.fill_id)
        .bind(fill.order_id)
        .bind(fill.price)
        .bind(fill.quantity)
        .bind(fill.fee)
        .bind(fill.timestamp)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET order_status = $2, executed_quantity = $3, execution_summary = $4,
                total_fee = $5, updated_at = $6, executed_at = $7
            WHERE order_id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.executed_quantity)
        .bind(serde_json::to_value(&order.execution_summary)?)
        .bind(order.total_fee)
        .bind(order.updated_at)
        .bind(order.executed_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE portfolios SET managed_assets = $2 WHERE portfolio_id = $1")
            .bind(portfolio.id)
            .bind(serde_json::to_value(&portfolio.managed_assets)?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
