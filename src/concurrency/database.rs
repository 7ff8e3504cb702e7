//! Database-backed slot manager.
//!
//! Each held slot is a row in `concurrency_slots` with an expiry, so slots
//! leaked by a crashed process stop counting once the TTL passes. Admission
//! for a `(user, operation)` pair is serialised by locking its row in
//! `concurrency_slot_guards` inside the admission transaction. A slot row's
//! id is the [`SlotId`] handed to the caller, and finishing deletes only that
//! row, so a late finish for an expired slot never returns someone else's.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use super::{OperationConfig, SlotError, SlotId, SlotManager, SlotPolicy, SlotStatus};
use crate::models::concurrency_slot::{self, Entity as ConcurrencySlot};
use crate::models::concurrency_slot_guard::{self, Entity as ConcurrencySlotGuard};

pub struct DatabaseSlotManager {
    db: DatabaseConnection,
    policy: SlotPolicy,
    ttl: Duration,
}

impl DatabaseSlotManager {
    pub fn new(db: DatabaseConnection, policy: SlotPolicy, ttl: Duration) -> Self {
        Self { db, policy, ttl }
    }

    async fn live_count<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        operation: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, SlotError> {
        let count = ConcurrencySlot::find()
            .filter(concurrency_slot::Column::UserId.eq(user_id))
            .filter(concurrency_slot::Column::Operation.eq(operation))
            .filter(concurrency_slot::Column::ExpiresAt.gt(now.fixed_offset()))
            .count(conn)
            .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn purge_expired<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        operation: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, SlotError> {
        let result = ConcurrencySlot::delete_many()
            .filter(concurrency_slot::Column::UserId.eq(user_id))
            .filter(concurrency_slot::Column::Operation.eq(operation))
            .filter(concurrency_slot::Column::ExpiresAt.lte(now.fixed_offset()))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(1))
    }
}

#[async_trait]
impl SlotManager for DatabaseSlotManager {
    fn config(&self, operation: &str) -> OperationConfig {
        self.policy.resolve(operation)
    }

    async fn can_start(&self, user_id: Uuid, operation: &str) -> Result<bool, SlotError> {
        let active = Self::live_count(&self.db, user_id, operation, Utc::now()).await?;
        Ok(active < self.config(operation).max_slots_per_user)
    }

    async fn start(&self, user_id: Uuid, operation: &str) -> Result<SlotId, SlotError> {
        let config = self.config(operation);
        let now = Utc::now();
        let txn = self.db.begin().await?;

        ConcurrencySlotGuard::insert(concurrency_slot_guard::ActiveModel {
            user_id: Set(user_id),
            operation: Set(operation.to_string()),
            created_at: Set(now.fixed_offset()),
        })
        .on_conflict(
            OnConflict::columns([
                concurrency_slot_guard::Column::UserId,
                concurrency_slot_guard::Column::Operation,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(&txn)
        .await?;

        ConcurrencySlotGuard::find()
            .filter(concurrency_slot_guard::Column::UserId.eq(user_id))
            .filter(concurrency_slot_guard::Column::Operation.eq(operation))
            .lock_exclusive()
            .one(&txn)
            .await?;

        Self::purge_expired(&txn, user_id, operation, now).await?;
        let active = Self::live_count(&txn, user_id, operation, now).await?;
        if active >= config.max_slots_per_user {
            txn.rollback().await?;
            return Err(SlotError::limit_exceeded(operation, active, config));
        }

        let slot = SlotId::new();
        concurrency_slot::ActiveModel {
            id: Set(slot.as_uuid()),
            user_id: Set(user_id),
            operation: Set(operation.to_string()),
            acquired_at: Set(now.fixed_offset()),
            expires_at: Set((now + self.ttl()).fixed_offset()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(slot)
    }

    async fn finish(&self, user_id: Uuid, operation: &str, slot: SlotId) -> Result<(), SlotError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        ConcurrencySlot::delete_many()
            .filter(concurrency_slot::Column::Id.eq(slot.as_uuid()))
            .filter(concurrency_slot::Column::UserId.eq(user_id))
            .filter(concurrency_slot::Column::Operation.eq(operation))
            .exec(&txn)
            .await?;

        if Self::live_count(&txn, user_id, operation, now).await? == 0 {
            Self::purge_expired(&txn, user_id, operation, now).await?;
            ConcurrencySlotGuard::delete_many()
                .filter(concurrency_slot_guard::Column::UserId.eq(user_id))
                .filter(concurrency_slot_guard::Column::Operation.eq(operation))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn status(&self, user_id: Uuid, operation: &str) -> Result<SlotStatus, SlotError> {
        let active = Self::live_count(&self.db, user_id, operation, Utc::now()).await?;
        Ok(SlotStatus::new(operation, active, self.config(operation)))
    }
}
