pub mod exchange;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use exchange::{ExchangeConnector, PaperExchange, SubmitAck};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::EngineStore;
