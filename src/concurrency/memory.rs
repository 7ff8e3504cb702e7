//! Process-local slot manager.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{OperationConfig, SlotError, SlotId, SlotManager, SlotPolicy, SlotStatus};

/// Holds slots in one flat map keyed by `(user, operation)`; the active
/// count is the number of held ids.
///
/// The mutex is held only for the read-modify-write and never across an
/// await point.
#[derive(Debug, Default)]
pub struct InMemorySlotManager {
    policy: SlotPolicy,
    slots: Mutex<HashMap<(Uuid, String), HashSet<SlotId>>>,
}

impl InMemorySlotManager {
    pub fn new(policy: SlotPolicy) -> Self {
        Self {
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Uuid, String), HashSet<SlotId>>> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self, user_id: Uuid, operation: &str) -> u32 {
        self.lock()
            .get(&(user_id, operation.to_string()))
            .map_or(0, held_count)
    }

    #[cfg(test)]
    pub(crate) fn tracked_entries(&self) -> usize {
        self.lock().len()
    }
}

#[async_trait]
impl SlotManager for InMemorySlotManager {
    fn config(&self, operation: &str) -> OperationConfig {
        self.policy.resolve(operation)
    }

    async fn can_start(&self, user_id: Uuid, operation: &str) -> Result<bool, SlotError> {
        Ok(self.active(user_id, operation) < self.config(operation).max_slots_per_user)
    }

    async fn start(&self, user_id: Uuid, operation: &str) -> Result<SlotId, SlotError> {
        let config = self.config(operation);
        let mut slots = self.lock();
        let key = (user_id, operation.to_string());
        let active = slots.get(&key).map_or(0, held_count);
        if active >= config.max_slots_per_user {
            return Err(SlotError::limit_exceeded(operation, active, config));
        }
        let slot = SlotId::new();
        slots.entry(key).or_default().insert(slot);
        Ok(slot)
    }

    async fn finish(&self, user_id: Uuid, operation: &str, slot: SlotId) -> Result<(), SlotError> {
        let mut slots = self.lock();
        let key = (user_id, operation.to_string());
        if let Some(held) = slots.get_mut(&key) {
            held.remove(&slot);
            if held.is_empty() {
                slots.remove(&key);
            }
        }
        Ok(())
    }

    async fn status(&self, user_id: Uuid, operation: &str) -> Result<SlotStatus, SlotError> {
        Ok(SlotStatus::new(
            operation,
            self.active(user_id, operation),
            self.config(operation),
        ))
    }
}

fn held_count(held: &HashSet<SlotId>) -> u32 {
    u32::try_from(held.len()).unwrap_or(u32::MAX)
}
