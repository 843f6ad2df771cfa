//! End-to-end paper trading pipeline: market events through the momentum
//! strategy, the risk gate, and paper execution into settled balances.

use gambit::adapters::{EngineStore, MemoryStore, PaperExchange};
use gambit::config::{DispatchConfig, ExecutionConfig};
use gambit::domain::{
    EngineMode, EventType, ManagerRecord, OrderStatus, OrderType, Portfolio, RiskControllerConfig,
    StrategyRecord, TradingPair,
};
use gambit::engine::{EngineRuntime, EventDispatcher, OrderExecutionManager};
use gambit::strategies::MomentumStrategy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryStore>,
    dispatcher: Arc<EventDispatcher>,
    runtime: EngineRuntime,
    manager: ManagerRecord,
    portfolio: Portfolio,
    strategy_id: Uuid,
}

async fn harness(max_btc_share: Option<Decimal>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let manager = ManagerRecord::new(EngineMode::Paper);
    store.insert_manager(&manager).await.unwrap();

    let mut caps = HashMap::new();
    if let Some(limit) = max_btc_share {
        caps.insert("BTC".to_string(), limit);
    }
    let risk = RiskControllerConfig::new("static", dec!(0.05), dec!(0.10), caps);
    store.insert_risk_controller(&risk).await.unwrap();

    let portfolio = Portfolio::new(manager.id, risk.id, "main", "USDT", dec!(10000), "paper");
    store.insert_portfolio(&portfolio).await.unwrap();

    let dispatcher = Arc::new(EventDispatcher::new(store.clone()));
    let execution = Arc::new(OrderExecutionManager::new(
        store.clone(),
        Arc::new(PaperExchange::default()),
        ExecutionConfig::default(),
    ));
    let runtime = EngineRuntime::new(
        manager.id,
        store.clone(),
        dispatcher.clone(),
        execution,
        DispatchConfig::default(),
    );

    let record = StrategyRecord::new(
        manager.id,
        TradingPair::new("BTC", "USDT"),
        "momentum",
        serde_json::json!({ "lookback": 3, "move_threshold": "0.02", "quantity": "0.5" }),
    );
    let logic = MomentumStrategy::from_record(&record).unwrap();
    let strategy_id = runtime.register(record, Box::new(logic)).await.unwrap();
    runtime.subscribe(portfolio.id, strategy_id).await.unwrap();
    runtime.start_strategy(strategy_id).await.unwrap();

    Harness {
        store,
        dispatcher,
        runtime,
        manager,
        portfolio,
        strategy_id,
    }
}

async fn publish_tick(h: &Harness, price: &str) {
    h.dispatcher
        .publish(
            h.manager.id,
            EventType::Market,
            5,
            serde_json::json!({ "pair": "BTC/USDT", "price": price }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn rising_market_ends_in_a_settled_buy() {
    let h = harness(None).await;

    for price in ["100", "101", "103"] {
        publish_tick(&h, price).await;
    }
    let progressed = h.runtime.run_once().await.unwrap();
    assert_eq!(progressed, 3);

    let orders = h.store.orders_for_portfolio(h.portfolio.id).await.unwrap();

    // Main entry plus protective stop-loss and take-profit legs
    let filled: Vec<_> = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Filled)
        .collect();
    assert_eq!(filled.len(), 1);
    assert_eq!(filled[0].order_type, OrderType::Limit);
    assert_eq!(filled[0].executed_quantity, dec!(0.5));
    assert_eq!(filled[0].average_fill_price(), Some(dec!(103)));

    let stop_loss: Vec<_> = orders
        .iter()
        .filter(|o| o.order_type == OrderType::StopLoss)
        .collect();
    assert_eq!(stop_loss.len(), 1);
    assert_eq!(stop_loss[0].status, OrderStatus::Pending);
    assert_eq!(stop_loss[0].target_price, dec!(103) * dec!(0.95));
    let take_profit: Vec<_> = orders
        .iter()
        .filter(|o| o.order_type == OrderType::TakeProfit)
        .collect();
    assert_eq!(take_profit.len(), 1);
    assert_eq!(take_profit[0].target_price, dec!(103) * dec!(1.10));

    // Ledger settled both legs: 0.5 BTC in, 51.5 USDT out
    let portfolio = h
        .store
        .get_portfolio(h.portfolio.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(portfolio.balance("BTC"), dec!(0.5));
    assert_eq!(portfolio.balance("USDT"), dec!(9948.5));

    // All market events were consumed exactly once; the placement
    // announcements remain queued for the next cycle
    let remaining = h
        .dispatcher
        .dispatch_next_batch(h.manager.id, 16)
        .await
        .unwrap();
    assert!(remaining
        .iter()
        .all(|e| e.event_type == EventType::Order && e.priority == 1));
    assert_eq!(remaining.len(), 3);
}

#[tokio::test]
async fn share_cap_blocks_the_entry() {
    let h = harness(Some(dec!(0.001))).await;

    for price in ["100", "101", "103"] {
        publish_tick(&h, price).await;
    }
    h.runtime.run_once().await.unwrap();

    // Projected 0.515% BTC share exceeds the 0.1% cap
    assert!(h
        .store
        .orders_for_portfolio(h.portfolio.id)
        .await
        .unwrap()
        .is_empty());
    let portfolio = h
        .store
        .get_portfolio(h.portfolio.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(portfolio.balance("USDT"), dec!(10000));
}

#[tokio::test]
async fn stopped_strategy_leaves_events_unexecuted() {
    let h = harness(None).await;
    h.runtime.stop_strategy(h.strategy_id).await.unwrap();

    publish_tick(&h, "100").await;
    // No progress either: the run loop would back off, not spin
    assert_eq!(h.runtime.run_once().await.unwrap(), 0);

    // No running subscriber processed the event, so it stays available
    let batch = h
        .dispatcher
        .dispatch_next_batch(h.manager.id, 16)
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert!(h
        .store
        .orders_for_portfolio(h.portfolio.id)
        .await
        .unwrap()
        .is_empty());
}
