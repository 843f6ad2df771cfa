pub mod event;
pub mod market;
pub mod order;
pub mod portfolio;
pub mod risk;
pub mod signal;
pub mod strategy;

pub use event::*;
pub use market::*;
pub use order::*;
pub use portfolio::*;
pub use risk::*;
pub use signal::*;
pub use strategy::*;
