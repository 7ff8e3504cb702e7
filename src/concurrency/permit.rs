//! Scoped slot ownership.

use std::sync::Arc;

use uuid::Uuid;

use super::{SlotError, SlotId, SlotManager};

/// A held slot. Call [`SlotPermit::release`] when the work is done; a permit
/// dropped without release hands the finish to the runtime.
pub struct SlotPermit {
    manager: Arc<dyn SlotManager>,
    user_id: Uuid,
    operation: String,
    slot: SlotId,
    released: bool,
}

/// Takes a slot for `user_id` and wraps it in a permit.
pub async fn acquire(
    manager: &Arc<dyn SlotManager>,
    user_id: Uuid,
    operation: &str,
) -> Result<SlotPermit, SlotError> {
    let slot = manager.start(user_id, operation).await?;
    Ok(SlotPermit {
        manager: manager.clone(),
        user_id,
        operation: operation.to_string(),
        slot,
        released: false,
    })
}

impl SlotPermit {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Finishes the slot exactly once.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(error) = self.manager.finish(self.user_id, &self.operation, self.slot).await {
            tracing::warn!(
                user_id = %self.user_id,
                operation = %self.operation,
                error = %error,
                "Failed to release concurrency slot"
            );
        }
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let manager = self.manager.clone();
        let user_id = self.user_id;
        let slot = self.slot;
        let operation = std::mem::take(&mut self.operation);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = manager.finish(user_id, &operation, slot).await {
                        tracing::warn!(
                            user_id = %user_id,
                            operation = %operation,
                            error = %error,
                            "Failed to release dropped concurrency slot"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    user_id = %user_id,
                    operation = %operation,
                    "Slot permit dropped outside a runtime; slot not released"
                );
            }
        }
    }
}
