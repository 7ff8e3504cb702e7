//! Concurrency slots.
//!
//! A slot is a per-user, per-operation admission token. Managers enforce a
//! ceiling of concurrently held slots for each `(user, operation)` pair and
//! report when a rejected caller should retry.

pub mod database;
pub mod memory;
mod permit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{ConcurrencyConfig, SlotBackend};

pub use database::DatabaseSlotManager;
pub use memory::InMemorySlotManager;
pub use permit::{SlotPermit, acquire};

/// Archive uploads through the HTTP surface
pub const OPERATION_FILE_UPLOAD: &str = "file-upload";
/// Export generation, held by the export worker for the job owner
pub const OPERATION_EXPORT: &str = "export-generation";
/// Restore processing, held by the restore worker for the job owner
pub const OPERATION_RESTORE: &str = "restore";

/// Identifies one held slot so that a finish returns exactly that slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(Uuid);

impl SlotId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for SlotId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Admission policy for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationConfig {
    pub max_slots_per_user: u32,
    pub retry_interval: Duration,
}

impl OperationConfig {
    pub const fn new(max_slots_per_user: u32, retry_seconds: u64) -> Self {
        Self {
            max_slots_per_user,
            retry_interval: Duration::from_secs(retry_seconds),
        }
    }
}

/// Snapshot of a user's slots for one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SlotStatus {
    pub operation: String,
    pub active: u32,
    pub max: u32,
    pub available: u32,
    pub can_start: bool,
    /// Present only when `can_start` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl SlotStatus {
    pub(crate) fn new(operation: &str, active: u32, config: OperationConfig) -> Self {
        let max = config.max_slots_per_user;
        let can_start = active < max;
        Self {
            operation: operation.to_string(),
            active,
            max,
            available: max.saturating_sub(active),
            can_start,
            retry_after_seconds: (!can_start).then(|| config.retry_interval.as_secs()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SlotError {
    #[error(
        "resource limit exceeded for {operation}: {active}/{max} slots in use, retry in {retry_after_seconds}s"
    )]
    ResourceLimitExceeded {
        operation: String,
        active: u32,
        max: u32,
        retry_after_seconds: u64,
    },
    #[error("slot storage error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl SlotError {
    pub(crate) fn limit_exceeded(operation: &str, active: u32, config: OperationConfig) -> Self {
        metrics::counter!("stockpile_slot_rejections_total", "operation" => operation.to_string())
            .increment(1);
        Self::ResourceLimitExceeded {
            operation: operation.to_string(),
            active,
            max: config.max_slots_per_user,
            retry_after_seconds: config.retry_interval.as_secs(),
        }
    }
}

/// Per-user, per-operation admission control.
#[async_trait]
pub trait SlotManager: Send + Sync {
    /// Policy for `operation`; unknown operations get the default policy.
    fn config(&self, operation: &str) -> OperationConfig;

    /// Read-only check whether `start` would currently succeed.
    async fn can_start(&self, user_id: Uuid, operation: &str) -> Result<bool, SlotError>;

    /// Atomically re-checks the ceiling and takes a slot. Rejection leaves
    /// state untouched.
    async fn start(&self, user_id: Uuid, operation: &str) -> Result<SlotId, SlotError>;

    /// Returns the slot `slot` names. Never goes below zero; finishing a slot
    /// that was never started, already finished or already expired is a no-op.
    async fn finish(&self, user_id: Uuid, operation: &str, slot: SlotId) -> Result<(), SlotError>;

    async fn status(&self, user_id: Uuid, operation: &str) -> Result<SlotStatus, SlotError>;
}

/// Resolved policy table: built-in operation limits overlaid with configuration.
#[derive(Debug, Clone)]
pub struct SlotPolicy {
    default: OperationConfig,
    operations: HashMap<String, OperationConfig>,
}

impl SlotPolicy {
    pub fn from_config(config: &ConcurrencyConfig) -> Self {
        let mut operations = HashMap::from([
            (OPERATION_FILE_UPLOAD.to_string(), OperationConfig::new(3, 30)),
            (OPERATION_EXPORT.to_string(), OperationConfig::new(2, 60)),
            (OPERATION_RESTORE.to_string(), OperationConfig::new(1, 60)),
        ]);
        let default =
            OperationConfig::new(config.default_max_slots, config.default_retry_seconds);

        for (operation, entry) in &config.operation_overrides {
            let base = operations.get(operation).copied().unwrap_or(default);
            operations.insert(
                operation.clone(),
                OperationConfig {
                    max_slots_per_user: entry.max_slots.unwrap_or(base.max_slots_per_user),
                    retry_interval: entry
                        .retry_seconds
                        .map(Duration::from_secs)
                        .unwrap_or(base.retry_interval),
                },
            );
        }

        Self {
            default,
            operations,
        }
    }

    pub fn resolve(&self, operation: &str) -> OperationConfig {
        self.operations
            .get(operation)
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self::from_config(&ConcurrencyConfig::default())
    }
}

/// Builds the configured slot manager.
pub fn build_slot_manager(
    config: &ConcurrencyConfig,
    db: DatabaseConnection,
) -> Arc<dyn SlotManager> {
    let policy = SlotPolicy::from_config(config);
    match config.backend {
        SlotBackend::Memory => Arc::new(InMemorySlotManager::new(policy)),
        SlotBackend::Database => Arc::new(DatabaseSlotManager::new(
            db,
            policy,
            Duration::from_secs(config.slot_ttl_seconds),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlotOverride;

    #[test]
    fn built_in_policies_apply() {
        let policy = SlotPolicy::default();

        assert_eq!(policy.resolve(OPERATION_FILE_UPLOAD), OperationConfig::new(3, 30));
        assert_eq!(policy.resolve(OPERATION_EXPORT), OperationConfig::new(2, 60));
        assert_eq!(policy.resolve(OPERATION_RESTORE), OperationConfig::new(1, 60));
        assert_eq!(policy.resolve("thumbnailing"), OperationConfig::new(1, 60));
    }

    #[test]
    fn overrides_merge_with_built_ins() {
        let mut config = ConcurrencyConfig::default();
        config.operation_overrides.insert(
            OPERATION_EXPORT.to_string(),
            SlotOverride {
                max_slots: Some(5),
                retry_seconds: None,
            },
        );

        let policy = SlotPolicy::from_config(&config);
        assert_eq!(policy.resolve(OPERATION_EXPORT), OperationConfig::new(5, 60));
    }

    #[test]
    fn status_reports_retry_only_when_blocked() {
        let config = OperationConfig::new(2, 45);

        let open = SlotStatus::new("export-generation", 1, config);
        assert!(open.can_start);
        assert_eq!(open.available, 1);
        assert_eq!(open.retry_after_seconds, None);

        let full = SlotStatus::new("export-generation", 2, config);
        assert!(!full.can_start);
        assert_eq!(full.available, 0);
        assert_eq!(full.retry_after_seconds, Some(45));
    }
}
