pub mod adapters;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod strategies;

pub use adapters::{EngineStore, ExchangeConnector, MemoryStore, PaperExchange, PostgresStore};
pub use config::AppConfig;
pub use engine::{
    EngineRuntime, EventDispatcher, OrderExecutionManager, OrderUpdate, Protection, RiskContext,
    RiskController, RiskDecision, RiskRejection, Strategy,
};
pub use error::{GambitError, OrderError, Result};
