use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A base/quote currency pair, e.g. "BTC/USDT"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl std::fmt::Display for TradingPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base, quote))
            }
            _ => Err(format!("invalid trading pair: {s}")),
        }
    }
}
