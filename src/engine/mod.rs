//! Engine core: event dispatch, strategy runtime, risk evaluation, order
//! execution, and the portfolio ledger.

pub mod dispatcher;
pub mod execution;
pub mod ledger;
pub mod risk;
pub mod runtime;

pub use dispatcher::EventDispatcher;
pub use execution::{OrderExecutionManager, OrderUpdate, Protection};
pub use risk::{RiskContext, RiskController, RiskDecision, RiskRejection};
pub use runtime::{EngineRuntime, Strategy};
