//! Strategy records and their lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TradingPair;
use crate::error::{GambitError, Result};

/// Strategy lifecycle: created -> running -> stopped (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Created,
    Running,
    Stopped,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Created => "created",
            StrategyStatus::Running => "running",
            StrategyStatus::Stopped => "stopped",
        }
    }
}

impl std::str::FromStr for StrategyStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(StrategyStatus::Created),
            "running" => Ok(StrategyStatus::Running),
            "stopped" => Ok(StrategyStatus::Stopped),
            other => Err(format!("unknown strategy status: {other}")),
        }
    }
}

/// Persisted strategy row. A strategy only receives events while running;
/// `started_at`/`stopped_at` bracket the running window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: Uuid,
    pub event_manager_id: Uuid,
    pub trading_pair: TradingPair,
    pub name: String,
    pub status: StrategyStatus,
    pub parameters: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl StrategyRecord {
    pub fn new(
        event_manager_id: Uuid,
        trading_pair: TradingPair,
        name: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_manager_id,
            trading_pair,
            name: name.into(),
            status: StrategyStatus::Created,
            parameters,
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == StrategyStatus::Running
    }

    /// Transition created -> running, stamping `started_at`
    pub fn start(&mut self) -> Result<()> {
        match self.status {
            StrategyStatus::Created => {
                self.status = StrategyStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            from => Err(GambitError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: StrategyStatus::Running.as_str().to_string(),
            }),
        }
    }

    /// Transition running -> stopped (terminal), stamping `stopped_at`
    pub fn stop(&mut self) -> Result<()> {
        match self.status {
            StrategyStatus::Running => {
                self.status = StrategyStatus::Stopped;
                self.stopped_at = Some(Utc::now());
                Ok(())
            }
            from => Err(GambitError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: StrategyStatus::Stopped.as_str().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> StrategyRecord {
        StrategyRecord::new(
            Uuid::new_v4(),
            TradingPair::new("BTC", "USDT"),
            "test",
            serde_json::json!({}),
        )
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut s = record();
        assert_eq!(s.status, StrategyStatus::Created);
        assert!(!s.is_running());

        s.start().unwrap();
        assert!(s.is_running());
        assert!(s.started_at.is_some());
        assert!(s.stopped_at.is_none());

        s.stop().unwrap();
        assert_eq!(s.status, StrategyStatus::Stopped);
        assert!(s.stopped_at.is_some());
    }

    #[test]
    fn stopped_is_terminal() {
        let mut s = record();
        s.start().unwrap();
        s.stop().unwrap();
        assert!(s.start().is_err());
        assert!(s.stop().is_err());
    }

    #[test]
    fn cannot_stop_before_start() {
        let mut s = record();
        assert!(s.stop().is_err());
    }
}
