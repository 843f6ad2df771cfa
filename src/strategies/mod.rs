//! Reference strategy implementations.

pub mod momentum;

pub use momentum::MomentumStrategy;
