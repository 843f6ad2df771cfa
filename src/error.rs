use thiserror::Error;
use uuid::Uuid;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum GambitError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Validation errors (malformed signal/event -- dropped, logged, non-fatal)
    #[error("Validation failed: {0}")]
    Validation(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Exchange/store unavailable after exhausted retries
    #[error("External failure: {component} - {reason}")]
    External { component: String, reason: String },

    // Lookup failures
    #[error("Event manager not found: {0}")]
    ManagerNotFound(Uuid),

    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Strategy not found: {0}")]
    StrategyNotFound(Uuid),

    #[error("Portfolio not found: {0}")]
    PortfolioNotFound(Uuid),

    #[error("Risk controller not found: {0}")]
    RiskControllerNotFound(Uuid),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GambitError
pub type Result<T> = std::result::Result<T, GambitError>;

/// Specific error types for the order state machine
#[derive(Error, Debug, Clone)]
pub enum OrderError {
    #[error("Order not found: {order_id}")]
    NotFound { order_id: Uuid },

    #[error("Order is terminal: {status}")]
    TerminalState { status: String },

    #[error("Cancel not allowed from status: {status}")]
    CancelNotAllowed { status: String },

    #[error("Overfill: initial {initial}, executed {executed}, fill {fill}")]
    Overfill {
        initial: rust_decimal::Decimal,
        executed: rust_decimal::Decimal,
        fill: rust_decimal::Decimal,
    },

    #[error("Insufficient balance in {asset}: available {available}, required {required}")]
    InsufficientBalance {
        asset: String,
        available: rust_decimal::Decimal,
        required: rust_decimal::Decimal,
    },

    #[error("Quantity must be positive")]
    ZeroQuantity,
}
