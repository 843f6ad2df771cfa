//! Event dispatch: ordered selection of unexecuted events and the
//! compare-and-set execution marker that makes delivery at-most-once.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::EngineStore;
use crate::domain::{Event, EventType, ManagerRecord, ManagerStatus};
use crate::error::{GambitError, Result};

pub struct EventDispatcher {
    store: Arc<dyn EngineStore>,
}

impl EventDispatcher {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self { store }
    }

    /// Select unexecuted events for the manager, highest priority first,
    /// ties broken by age. Paused/stopped managers yield an empty batch,
    /// not an error. Returned events are stamped with a dispatch timestamp;
    /// dispatch is not completion, so an event may be re-dispatched until
    /// it is marked executed.
    pub async fn dispatch_next_batch(&self, manager_id: Uuid, limit: usize) -> Result<Vec<Event>> {
        let manager = self
            .store
            .get_manager(manager_id)
            .await?
            .ok_or(GambitError::ManagerNotFound(manager_id))?;

        if !manager.status.accepts_dispatch() {
            debug!(%manager_id, status = manager.status.as_str(), "dispatch suppressed");
            return Ok(Vec::new());
        }

        let mut events = self
            .store
            .fetch_unexecuted(manager_id, limit as i64)
            .await?;

        let now = Utc::now();
        for event in &mut events {
            self.store.mark_dispatched(event.id, now).await?;
            event.dispatched_at = Some(now);
        }

        if !events.is_empty() {
            debug!(%manager_id, count = events.len(), "dispatched batch");
        }
        Ok(events)
    }

    /// Set `executed_at` exactly once. Idempotent: marking an already
    /// executed event is a no-op and returns false; only the first marker
    /// wins under concurrent attempts.
    pub async fn mark_executed(&self, event_id: Uuid) -> Result<bool> {
        let won = self.store.mark_executed(event_id, Utc::now()).await?;
        if !won {
            debug!(%event_id, "execution marker already set");
        }
        Ok(won)
    }

    /// Append a new event to the manager's queue
    pub async fn publish(
        &self,
        manager_id: Uuid,
        event_type: EventType,
        priority: i32,
        payload: serde_json::Value,
    ) -> Result<Event> {
        let event = Event::new(manager_id, event_type, priority, payload);
        self.store.insert_event(&event).await?;
        Ok(event)
    }

    pub async fn create_manager(&self, manager: &ManagerRecord) -> Result<()> {
        self.store.insert_manager(manager).await?;
        info!(manager_id = %manager.id, mode = %manager.mode, "event manager created");
        Ok(())
    }

    /// Status transitions drive whether dispatch occurs. Managers are never
    /// deleted, only stopped.
    pub async fn set_status(&self, manager_id: Uuid, status: ManagerStatus) -> Result<()> {
        self.store.set_manager_status(manager_id, status).await?;
        if status == ManagerStatus::Stopped {
            warn!(%manager_id, "event manager stopped");
        } else {
            info!(%manager_id, status = status.as_str(), "event manager status changed");
        }
        Ok(())
    }
}
