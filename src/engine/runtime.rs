//! Strategy runtime: one logical execution context per running strategy,
//! fed from the manager's event queue and routing signals through risk
//! evaluation into order placement.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::EngineStore;
use crate::config::DispatchConfig;
use crate::domain::{Event, OrderSide, Portfolio, Signal, StrategyRecord};
use crate::engine::dispatcher::EventDispatcher;
use crate::engine::execution::{OrderExecutionManager, OrderUpdate, Protection};
use crate::engine::risk::{RiskContext, RiskController, RiskDecision, RiskRejection};
use crate::error::{GambitError, Result};

/// Pluggable trading logic. Lifecycle and persistence stay with the runtime;
/// implementations only react to events and feedback.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate one event, emitting zero or more candidate signals
    async fn on_event(&mut self, record: &StrategyRecord, event: &Event) -> Result<Vec<Signal>>;

    /// Order status feedback for signals this strategy emitted
    async fn on_order_update(
        &mut self,
        _record: &StrategyRecord,
        _update: &OrderUpdate,
    ) -> Result<()> {
        Ok(())
    }

    /// A rejected signal may be resubmitted once in modified form
    async fn on_risk_rejection(
        &mut self,
        _record: &StrategyRecord,
        _signal: &Signal,
        _rejection: &RiskRejection,
    ) -> Result<Option<Signal>> {
        Ok(None)
    }
}

struct StrategyHandle {
    record: StrategyRecord,
    logic: Box<dyn Strategy>,
}

/// Per-manager engine loop: dispatches event batches to running strategies,
/// marks processed events executed, and pushes signals through the risk gate
/// into the execution manager.
pub struct EngineRuntime {
    manager_id: Uuid,
    store: Arc<dyn EngineStore>,
    dispatcher: Arc<EventDispatcher>,
    execution: Arc<OrderExecutionManager>,
    config: DispatchConfig,
    strategies: Arc<RwLock<HashMap<Uuid, Arc<Mutex<StrategyHandle>>>>>,
    /// signal id -> originating strategy, for order-update routing
    signal_owners: Arc<dashmap::DashMap<Uuid, Uuid>>,
    shutdown: Arc<RwLock<bool>>,
}

impl EngineRuntime {
    pub fn new(
        manager_id: Uuid,
        store: Arc<dyn EngineStore>,
        dispatcher: Arc<EventDispatcher>,
        execution: Arc<OrderExecutionManager>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            manager_id,
            store,
            dispatcher,
            execution,
            config,
            strategies: Arc::new(RwLock::new(HashMap::new())),
            signal_owners: Arc::new(dashmap::DashMap::new()),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn manager_id(&self) -> Uuid {
        self.manager_id
    }

    /// Persist and register a strategy with its trading logic
    pub async fn register(&self, record: StrategyRecord, logic: Box<dyn Strategy>) -> Result<Uuid> {
        if record.event_manager_id != self.manager_id {
            return Err(GambitError::Validation(format!(
                "strategy {} belongs to manager {}, not {}",
                record.id, record.event_manager_id, self.manager_id
            )));
        }
        let id = record.id;
        self.store.insert_strategy(&record).await?;
        self.strategies
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(StrategyHandle { record, logic })));
        info!(strategy_id = %id, "strategy registered");
        Ok(id)
    }

    /// Subscribe a strategy to a portfolio it may trade
    pub async fn subscribe(&self, portfolio_id: Uuid, strategy_id: Uuid) -> Result<()> {
        self.store.subscribe(portfolio_id, strategy_id).await
    }

    pub async fn start_strategy(&self, strategy_id: Uuid) -> Result<()> {
        let handle = self.handle(strategy_id).await?;
        let mut handle = handle.lock().await;
        handle.record.start()?;
        self.store.update_strategy_status(&handle.record).await?;
        info!(%strategy_id, "strategy running");
        Ok(())
    }

    /// Stop a strategy. Observed within one dispatch cycle: an in-flight
    /// batch finishes its current processing pass, no new batch is delivered.
    pub async fn stop_strategy(&self, strategy_id: Uuid) -> Result<()> {
        let handle = self.handle(strategy_id).await?;
        let mut handle = handle.lock().await;
        handle.record.stop()?;
        self.store.update_strategy_status(&handle.record).await?;
        info!(%strategy_id, "strategy stopped");
        Ok(())
    }

    async fn handle(&self, strategy_id: Uuid) -> Result<Arc<Mutex<StrategyHandle>>> {
        self.strategies
            .read()
            .await
            .get(&strategy_id)
            .cloned()
            .ok_or(GambitError::StrategyNotFound(strategy_id))
    }

    pub async fn request_shutdown(&self) {
        *self.shutdown.write().await = true;
    }

    /// Dispatch loop. Store or venue failures degrade this manager with a
    /// logged error and a backoff; they never panic the process or affect
    /// other managers.
    pub async fn run(&self) -> Result<()> {
        info!(manager_id = %self.manager_id, "engine runtime started");
        let forwarder = self.spawn_update_forwarder();

        loop {
            if *self.shutdown.read().await {
                break;
            }
            match self.run_once().await {
                // Idle queue or a batch nothing consumed: back off either way
                Ok(0) => {
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(manager_id = %self.manager_id, error = %e, "dispatch cycle failed");
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
            }
        }

        forwarder.abort();
        info!(manager_id = %self.manager_id, "engine runtime stopped");
        Ok(())
    }

    /// One dispatch cycle: pull a batch, fan out to running strategies,
    /// mark processed events executed, submit collected signals.
    /// Returns the number of events this cycle marked executed; zero means
    /// no progress was made and the caller should back off before polling
    /// again, since the same batch would only be re-dispatched.
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self
            .dispatcher
            .dispatch_next_batch(self.manager_id, self.config.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let handles: Vec<(Uuid, Arc<Mutex<StrategyHandle>>)> = self
            .strategies
            .read()
            .await
            .iter()
            .map(|(id, h)| (*id, h.clone()))
            .collect();

        let mut tasks: JoinSet<(Uuid, Vec<Uuid>, Vec<Signal>)> = JoinSet::new();
        for (strategy_id, handle) in handles {
            let events = batch.clone();
            let manager_id = self.manager_id;
            tasks.spawn(async move {
                let mut handle = handle.lock().await;
                let mut processed = Vec::new();
                let mut signals = Vec::new();

                if !handle.record.is_running() {
                    return (strategy_id, processed, signals);
                }

                for event in &events {
                    // Stop observed mid-batch: finish nothing further
                    if !handle.record.is_running() {
                        break;
                    }
                    if event.event_manager_id != manager_id {
                        continue;
                    }
                    let StrategyHandle { record, logic } = &mut *handle;
                    match logic.on_event(record, event).await {
                        Ok(emitted) => {
                            processed.push(event.id);
                            for mut signal in emitted {
                                // Enforce provenance regardless of what the
                                // strategy put in the signal
                                signal.strategy_id = strategy_id;
                                signals.push(signal);
                            }
                        }
                        Err(GambitError::Validation(reason)) => {
                            // Malformed event: dropped, logged, non-fatal
                            warn!(%strategy_id, event_id = %event.id, %reason, "event dropped");
                            processed.push(event.id);
                        }
                        Err(e) => {
                            error!(%strategy_id, event_id = %event.id, error = %e, "strategy failed on event");
                        }
                    }
                }
                (strategy_id, processed, signals)
            });
        }

        let mut processed_events: HashMap<Uuid, usize> = HashMap::new();
        let mut collected: Vec<Signal> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, processed, signals)) => {
                    for event_id in processed {
                        *processed_events.entry(event_id).or_insert(0) += 1;
                    }
                    collected.extend(signals);
                }
                Err(e) => {
                    // One strategy context dying never halts the others
                    error!(error = %e, "strategy task panicked");
                }
            }
        }

        // Events no running strategy processed stay unexecuted so a restarted
        // strategy or another subscriber can still see them.
        let mut progressed = 0;
        for (event_id, _) in processed_events {
            if self.dispatcher.mark_executed(event_id).await? {
                progressed += 1;
            }
        }

        for signal in collected {
            if let Err(e) = self.submit_signal(&signal).await {
                error!(signal_id = %signal.id, error = %e, "signal submission failed");
            }
        }
        Ok(progressed)
    }

    /// Route a signal to every portfolio its strategy subscribes to, through
    /// risk evaluation into placement. Rejections go back to the strategy,
    /// which may resubmit a modified signal once. A failure on one portfolio
    /// is logged and the remaining portfolios still get the signal.
    async fn submit_signal(&self, signal: &Signal) -> Result<()> {
        let portfolios = self.store.portfolios_for_strategy(signal.strategy_id).await?;
        if portfolios.is_empty() {
            debug!(signal_id = %signal.id, "signal from strategy with no subscriptions");
            return Ok(());
        }

        for portfolio_id in portfolios {
            if let Err(e) = self.route_to_portfolio(signal, portfolio_id).await {
                error!(
                    signal_id = %signal.id,
                    %portfolio_id,
                    error = %e,
                    "signal routing failed for portfolio"
                );
            }
        }
        Ok(())
    }

    /// Evaluate and place for one portfolio, holding that portfolio's lock
    /// across the whole window so a fill settling concurrently cannot
    /// invalidate the exposure projection between check and placement.
    async fn route_to_portfolio(&self, signal: &Signal, portfolio_id: Uuid) -> Result<()> {
        let lock = self.execution.portfolio_lock(portfolio_id);
        let _guard = lock.lock().await;

        // Fresh balances now that the lock is held
        let portfolio = self
            .store
            .get_portfolio(portfolio_id)
            .await?
            .ok_or(GambitError::PortfolioNotFound(portfolio_id))?;

        match self.evaluate(signal, &portfolio).await? {
            RiskDecision::Approved => {
                self.place(signal, &portfolio).await?;
            }
            RiskDecision::Rejected(rejection) => {
                warn!(
                    signal_id = %signal.id,
                    strategy_id = %signal.strategy_id,
                    %portfolio_id,
                    reason = %rejection,
                    "signal rejected by risk controller"
                );
                if let Some(resubmitted) = self.notify_rejection(signal, &rejection).await? {
                    match self.evaluate(&resubmitted, &portfolio).await? {
                        RiskDecision::Approved => {
                            self.place(&resubmitted, &portfolio).await?;
                        }
                        RiskDecision::Rejected(again) => {
                            warn!(
                                signal_id = %resubmitted.id,
                                reason = %again,
                                "resubmitted signal rejected, dropping"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn evaluate(&self, signal: &Signal, portfolio: &Portfolio) -> Result<RiskDecision> {
        let config = self
            .store
            .get_risk_controller(portfolio.risk_controller_id)
            .await?
            .ok_or(GambitError::RiskControllerNotFound(
                portfolio.risk_controller_id,
            ))?;
        let entry_price = self
            .execution
            .average_entry(portfolio.id, &signal.trading_pair.base)
            .await?;
        let ctx = RiskContext {
            marks: HashMap::new(),
            entry_price,
        };
        Ok(RiskController::evaluate(signal, portfolio, &config, &ctx))
    }

    async fn place(&self, signal: &Signal, portfolio: &Portfolio) -> Result<()> {
        // Protective legs for entries, derived from the portfolio's risk config
        let protection = if signal.side == OrderSide::Buy {
            let config = self
                .store
                .get_risk_controller(portfolio.risk_controller_id)
                .await?
                .ok_or(GambitError::RiskControllerNotFound(
                    portfolio.risk_controller_id,
                ))?;
            Protection {
                stop_loss: Some(
                    signal.target_price
                        * (rust_decimal::Decimal::ONE - config.stop_loss_coefficient),
                ),
                take_profit: Some(
                    signal.target_price
                        * (rust_decimal::Decimal::ONE + config.take_profit_coefficient),
                ),
            }
        } else {
            Protection::default()
        };

        self.signal_owners.insert(signal.id, signal.strategy_id);
        // Caller already holds this portfolio's lock
        self.execution
            .place_locked(signal, portfolio, protection)
            .await?;
        Ok(())
    }

    async fn notify_rejection(
        &self,
        signal: &Signal,
        rejection: &RiskRejection,
    ) -> Result<Option<Signal>> {
        let handle = match self.handle(signal.strategy_id).await {
            Ok(h) => h,
            Err(_) => return Ok(None),
        };
        let mut handle = handle.lock().await;
        let StrategyHandle { record, logic } = &mut *handle;
        let mut resubmitted = logic.on_risk_rejection(record, signal, rejection).await?;
        if let Some(signal) = resubmitted.as_mut() {
            signal.strategy_id = record.id;
        }
        Ok(resubmitted)
    }

    /// Forward order updates to the strategy that originated the signal
    fn spawn_update_forwarder(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.execution.subscribe_updates();
        let strategies = self.strategies.clone();
        let signal_owners = self.signal_owners.clone();
        tokio::spawn(async move {
            loop {
                let update = match rx.recv().await {
                    Ok(update) => update,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "order update stream lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let Some(strategy_id) = update
                    .signal_id
                    .and_then(|sid| signal_owners.get(&sid).map(|s| *s))
                else {
                    continue;
                };
                let handle = strategies.read().await.get(&strategy_id).cloned();
                if let Some(handle) = handle {
                    let mut handle = handle.lock().await;
                    let StrategyHandle { record, logic } = &mut *handle;
                    if let Err(e) = logic.on_order_update(record, &update).await {
                        warn!(%strategy_id, error = %e, "order update handler failed");
                    }
                }
                // Terminal orders need no further routing; drop the owner entry
                if update.status.is_terminal() {
                    if let Some(sid) = update.signal_id {
                        signal_owners.remove(&sid);
                    }
                }
            }
        })
    }
}
