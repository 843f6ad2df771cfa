use clap::{Parser, Subcommand};
use gambit::adapters::{EngineStore, PaperExchange, PostgresStore};
use gambit::config::AppConfig;
use gambit::domain::{
    EngineMode, EventType, ManagerRecord, Portfolio, RiskControllerConfig, StrategyRecord,
    TradingPair,
};
use gambit::engine::{EngineRuntime, EventDispatcher, OrderExecutionManager};
use gambit::error::{GambitError, Result};
use gambit::strategies::MomentumStrategy;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gambit", about = "Event-driven trading engine", version)]
struct Cli {
    /// Configuration file (GAMBIT__* env vars override it)
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations and exit
    Migrate,
    /// Run an event manager with a momentum strategy on one trading pair
    Run {
        /// Trading pair, e.g. BTC/USDT
        #[arg(long, default_value = "BTC/USDT")]
        pair: String,
        /// Order size in base units
        #[arg(long, default_value = "0.01")]
        quantity: Decimal,
        /// Fractional price move that triggers a trade
        #[arg(long, default_value = "0.02")]
        move_threshold: Decimal,
        /// Price observations per momentum window
        #[arg(long, default_value_t = 5)]
        lookback: usize,
        /// Initial portfolio balance in the accounting currency
        #[arg(long, default_value = "10000")]
        balance: Decimal,
        /// Accounting currency
        #[arg(long, default_value = "USDT")]
        currency: String,
        /// Stop-loss coefficient for the risk controller
        #[arg(long, default_value = "0.05")]
        stop_loss: Decimal,
        /// Take-profit coefficient for the risk controller
        #[arg(long, default_value = "0.10")]
        take_profit: Decimal,
        /// Maximum portfolio share for the traded asset (omit for no cap)
        #[arg(long)]
        max_share: Option<Decimal>,
        /// Publish a synthetic market tick and exit after one cycle
        #[arg(long)]
        tick: Option<Decimal>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = AppConfig::load(&cli.config)?;
    let store = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    store.migrate().await?;

    match cli.command {
        Commands::Migrate => {
            info!("migrations applied");
            Ok(())
        }
        Commands::Run {
            pair,
            quantity,
            move_threshold,
            lookback,
            balance,
            currency,
            stop_loss,
            take_profit,
            max_share,
            tick,
        } => {
            let pair = TradingPair::from_str(&pair).map_err(GambitError::Validation)?;
            if config.engine.mode == EngineMode::Live {
                return Err(GambitError::Validation(
                    "no live venue connector is configured; use paper or backtest mode".into(),
                ));
            }

            let manager = ManagerRecord::new(config.engine.mode);
            let dispatcher = Arc::new(EventDispatcher::new(store.clone()));
            dispatcher.create_manager(&manager).await?;

            let mut caps = HashMap::new();
            if let Some(limit) = max_share {
                caps.insert(pair.base.clone(), limit);
            }
            let risk = RiskControllerConfig::new("static", stop_loss, take_profit, caps);
            store.insert_risk_controller(&risk).await?;

            let portfolio = Portfolio::new(manager.id, risk.id, "main", &currency, balance, "paper");
            store.insert_portfolio(&portfolio).await?;

            let execution = Arc::new(OrderExecutionManager::new(
                store.clone(),
                Arc::new(PaperExchange::default()),
                config.execution.clone(),
            ));
            let runtime = Arc::new(EngineRuntime::new(
                manager.id,
                store.clone(),
                dispatcher.clone(),
                execution,
                config.dispatch.clone(),
            ));

            let record = StrategyRecord::new(
                manager.id,
                pair.clone(),
                "momentum",
                serde_json::json!({
                    "lookback": lookback,
                    "move_threshold": move_threshold,
                    "quantity": quantity,
                }),
            );
            let logic = MomentumStrategy::from_record(&record)?;
            let strategy_id = runtime.register(record, Box::new(logic)).await?;
            runtime.subscribe(portfolio.id, strategy_id).await?;
            runtime.start_strategy(strategy_id).await?;

            if let Some(price) = tick {
                dispatcher
                    .publish(
                        manager.id,
                        EventType::Market,
                        5,
                        serde_json::json!({ "pair": pair.to_string(), "price": price }),
                    )
                    .await?;
            }

            info!(
                manager_id = %manager.id,
                mode = %manager.mode,
                pair = %pair,
                "engine running, ctrl-c to stop"
            );

            let loop_runtime = runtime.clone();
            let engine = tokio::spawn(async move { loop_runtime.run().await });

            shutdown_signal().await;
            info!("shutdown requested");
            runtime.stop_strategy(strategy_id).await?;
            runtime.request_shutdown().await;
            match engine.await {
                Ok(result) => result?,
                Err(e) => error!(error = %e, "engine task failed"),
            }
            Ok(())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gambit=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
