//! Event managers and the prioritized events they own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use uuid::Uuid;

/// Operating mode of an event manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    Live,
    #[default]
    Paper,
    Backtest,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Live => "live",
            EngineMode::Paper => "paper",
            EngineMode::Backtest => "backtest",
        }
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EngineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(EngineMode::Live),
            "paper" => Ok(EngineMode::Paper),
            "backtest" => Ok(EngineMode::Backtest),
            other => Err(format!("unknown engine mode: {other}")),
        }
    }
}

/// Lifecycle status of an event manager. Managers are never deleted, only stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerStatus {
    Active,
    Paused,
    Stopped,
}

impl ManagerStatus {
    /// Dispatch only happens while active
    pub fn accepts_dispatch(&self) -> bool {
        matches!(self, ManagerStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerStatus::Active => "active",
            ManagerStatus::Paused => "paused",
            ManagerStatus::Stopped => "stopped",
        }
    }
}

impl std::str::FromStr for ManagerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ManagerStatus::Active),
            "paused" => Ok(ManagerStatus::Paused),
            "stopped" => Ok(ManagerStatus::Stopped),
            other => Err(format!("unknown manager status: {other}")),
        }
    }
}

/// Persisted event manager row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerRecord {
    pub id: Uuid,
    pub mode: EngineMode,
    pub status: ManagerStatus,
}

impl ManagerRecord {
    pub fn new(mode: EngineMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            status: ManagerStatus::Active,
        }
    }
}

/// Kind of event flowing through a manager's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Market,
    Order,
    Signal,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Market => "market",
            EventType::Order => "order",
            EventType::Signal => "signal",
            EventType::Error => "error",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(EventType::Market),
            "order" => Ok(EventType::Order),
            "signal" => Ok(EventType::Signal),
            "error" => Ok(EventType::Error),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// A prioritized event. Immutable once created except for `dispatched_at`
/// (stamped on every dispatch) and `executed_at` (compare-and-set exactly once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_manager_id: Uuid,
    pub event_type: EventType,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(
        event_manager_id: Uuid,
        event_type: EventType,
        priority: i32,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_manager_id,
            event_type,
            priority,
            payload,
            created_at: Utc::now(),
            dispatched_at: None,
            executed_at: None,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.executed_at.is_some()
    }

    /// Sort key for dispatch: highest priority first, then oldest first
    pub fn dispatch_key(&self) -> (Reverse<i32>, DateTime<Utc>) {
        (Reverse(self.priority), self.created_at)
    }
}
