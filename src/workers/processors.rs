//! Job processors for the export, import and restore pools.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use tracing::debug;
use uuid::Uuid;

use super::JobProcessor;
use crate::concurrency::{OPERATION_EXPORT, OPERATION_RESTORE, SlotError, SlotManager, SlotPermit, acquire};
use crate::config::WorkerPoolConfig;
use crate::export::ExportService;
use crate::import::ImportService;
use crate::repositories::{ExportQueue, Registries};
use crate::restore::RestoreService;
use crate::storage::Bucket;

/// Pending rows inspected per claim attempt
const CLAIM_BATCH: u64 = 16;

/// A claimed job, with the owner's slot when the stage is slot-gated
pub struct ClaimedJob {
    pub id: Uuid,
    pub permit: Option<SlotPermit>,
}

fn lease_deadline(lease: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::minutes(5))
}

/// Takes the owner's slot; `None` when the owner is at the ceiling.
async fn admit(
    slots: &Arc<dyn SlotManager>,
    user_id: Uuid,
    operation: &str,
) -> anyhow::Result<Option<SlotPermit>> {
    match acquire(slots, user_id, operation).await {
        Ok(permit) => Ok(Some(permit)),
        Err(SlotError::ResourceLimitExceeded { .. }) => {
            debug!(user_id = %user_id, operation, "Owner at slot ceiling, job deferred");
            Ok(None)
        }
        Err(e) => Err(e).context("slot admission failed"),
    }
}

pub struct ExportProcessor {
    db: DatabaseConnection,
    service: ExportService,
    slots: Arc<dyn SlotManager>,
    lease: Duration,
}

impl ExportProcessor {
    pub fn new(
        db: DatabaseConnection,
        bucket: Arc<dyn Bucket>,
        slots: Arc<dyn SlotManager>,
        config: &WorkerPoolConfig,
    ) -> Self {
        let lease = Duration::from_secs(config.lease_seconds);
        Self {
            service: ExportService::new(db.clone(), bucket).with_lease(lease),
            db,
            slots,
            lease,
        }
    }
}

#[async_trait]
impl JobProcessor for ExportProcessor {
    type Job = ClaimedJob;

    fn name(&self) -> &'static str {
        "export"
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        Ok(Registries::service(self.db.clone())
            .exports()
            .reap_expired(ExportQueue::Generated, now)
            .await?)
    }

    async fn claim_next(&self) -> anyhow::Result<Option<ClaimedJob>> {
        let exports = Registries::service(self.db.clone()).exports();
        for candidate in exports.find_pending(ExportQueue::Generated, CLAIM_BATCH).await? {
            let Some(permit) = admit(&self.slots, candidate.user_id, OPERATION_EXPORT).await? else {
                continue;
            };
            if exports.claim(candidate.id, lease_deadline(self.lease)).await? {
                return Ok(Some(ClaimedJob {
                    id: candidate.id,
                    permit: Some(permit),
                }));
            }
            permit.release().await;
        }
        Ok(None)
    }

    async fn process(&self, job: ClaimedJob) -> anyhow::Result<()> {
        let outcome = self.service.process_export(job.id).await;
        if let Some(permit) = job.permit {
            permit.release().await;
        }
        outcome.with_context(|| format!("export {} failed", job.id))
    }
}

pub struct ImportProcessor {
    db: DatabaseConnection,
    service: ImportService,
    lease: Duration,
}

impl ImportProcessor {
    pub fn new(db: DatabaseConnection, bucket: Arc<dyn Bucket>, config: &WorkerPoolConfig) -> Self {
        let lease = Duration::from_secs(config.lease_seconds);
        Self {
            // Uploads were size-checked when stored.
            service: ImportService::new(db.clone(), bucket, u64::MAX).with_lease(lease),
            db,
            lease,
        }
    }
}

#[async_trait]
impl JobProcessor for ImportProcessor {
    type Job = ClaimedJob;

    fn name(&self) -> &'static str {
        "import"
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        Ok(Registries::service(self.db.clone())
            .exports()
            .reap_expired(ExportQueue::Imported, now)
            .await?)
    }

    async fn claim_next(&self) -> anyhow::Result<Option<ClaimedJob>> {
        let exports = Registries::service(self.db.clone()).exports();
        for candidate in exports.find_pending(ExportQueue::Imported, CLAIM_BATCH).await? {
            if exports.claim(candidate.id, lease_deadline(self.lease)).await? {
                return Ok(Some(ClaimedJob {
                    id: candidate.id,
                    permit: None,
                }));
            }
        }
        Ok(None)
    }

    async fn process(&self, job: ClaimedJob) -> anyhow::Result<()> {
        self.service
            .process_import(job.id)
            .await
            .with_context(|| format!("import {} failed", job.id))
    }
}

pub struct RestoreProcessor {
    db: DatabaseConnection,
    service: RestoreService,
    slots: Arc<dyn SlotManager>,
    lease: Duration,
}

impl RestoreProcessor {
    pub fn new(
        db: DatabaseConnection,
        bucket: Arc<dyn Bucket>,
        slots: Arc<dyn SlotManager>,
        config: &WorkerPoolConfig,
    ) -> Self {
        let lease = Duration::from_secs(config.lease_seconds);
        Self {
            service: RestoreService::new(db.clone(), bucket).with_lease(lease),
            db,
            slots,
            lease,
        }
    }
}

#[async_trait]
impl JobProcessor for RestoreProcessor {
    type Job = ClaimedJob;

    fn name(&self) -> &'static str {
        "restore"
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        Ok(Registries::service(self.db.clone())
            .restore_operations()
            .reap_expired(now)
            .await?)
    }

    async fn claim_next(&self) -> anyhow::Result<Option<ClaimedJob>> {
        let operations = Registries::service(self.db.clone()).restore_operations();
        for candidate in operations.find_pending(CLAIM_BATCH).await? {
            let Some(permit) = admit(&self.slots, candidate.user_id, OPERATION_RESTORE).await?
            else {
                continue;
            };
            if operations.claim(candidate.id, lease_deadline(self.lease)).await? {
                return Ok(Some(ClaimedJob {
                    id: candidate.id,
                    permit: Some(permit),
                }));
            }
            permit.release().await;
        }
        Ok(None)
    }

    async fn process(&self, job: ClaimedJob) -> anyhow::Result<()> {
        let outcome = self.service.process_restore(job.id).await;
        if let Some(permit) = job.permit {
            permit.release().await;
        }
        outcome.with_context(|| format!("restore {} failed", job.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::{InMemorySlotManager, SlotPolicy};
    use crate::export::CreateExportRequest;
    use crate::models::export::{ExportStatus, ExportType};
    use crate::storage::MemoryBucket;
    use crate::testing::{new_actor, seed_inventory, setup_db};

    fn pool() -> WorkerPoolConfig {
        WorkerPoolConfig {
            max_concurrency: 1,
            poll_interval_ms: 10,
            max_poll_interval_ms: 100,
            lease_seconds: 60,
        }
    }

    fn locations_request() -> CreateExportRequest {
        CreateExportRequest {
            export_type: ExportType::Locations,
            include_file_data: false,
            selected_items: Vec::new(),
            description: None,
        }
    }

    #[tokio::test]
    async fn export_claim_holds_owner_slot_until_processed() {
        let db = setup_db().await;
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
        let slots: Arc<dyn SlotManager> = Arc::new(InMemorySlotManager::new(SlotPolicy::default()));
        let actor = new_actor(&db).await;
        seed_inventory(&db, actor, "alpha").await;
        let export = ExportService::new(db.clone(), bucket.clone())
            .create_export(actor, locations_request())
            .await
            .unwrap();

        let processor = ExportProcessor::new(db.clone(), bucket, slots.clone(), &pool());
        let job = processor.claim_next().await.unwrap().unwrap();
        assert_eq!(job.id, export.id);
        let held = slots.status(actor.user_id, OPERATION_EXPORT).await.unwrap();
        assert_eq!(held.active, 1);

        processor.process(job).await.unwrap();
        let released = slots.status(actor.user_id, OPERATION_EXPORT).await.unwrap();
        assert_eq!(released.active, 0);

        let done = Registries::service(db.clone())
            .exports()
            .get(export.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ExportStatus::Completed);
        assert!(processor.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn export_owner_at_ceiling_is_deferred() {
        let db = setup_db().await;
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
        let slots: Arc<dyn SlotManager> = Arc::new(InMemorySlotManager::new(SlotPolicy::default()));
        let busy = new_actor(&db).await;
        let idle = new_actor(&db).await;
        let service = ExportService::new(db.clone(), bucket.clone());
        let blocked = service.create_export(busy, locations_request()).await.unwrap();
        let admitted = service.create_export(idle, locations_request()).await.unwrap();

        slots.start(busy.user_id, OPERATION_EXPORT).await.unwrap();
        slots.start(busy.user_id, OPERATION_EXPORT).await.unwrap();

        let processor = ExportProcessor::new(db.clone(), bucket, slots.clone(), &pool());
        let job = processor.claim_next().await.unwrap().unwrap();
        assert_eq!(job.id, admitted.id);
        processor.process(job).await.unwrap();
        assert!(processor.claim_next().await.unwrap().is_none());

        let still_pending = service.get(busy, blocked.id).await.unwrap();
        assert_eq!(still_pending.status, ExportStatus::Pending);
    }

    #[tokio::test]
    async fn expired_export_leases_are_failed() {
        let db = setup_db().await;
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
        let slots: Arc<dyn SlotManager> = Arc::new(InMemorySlotManager::new(SlotPolicy::default()));
        let actor = new_actor(&db).await;
        let export = ExportService::new(db.clone(), bucket.clone())
            .create_export(actor, locations_request())
            .await
            .unwrap();

        let exports = Registries::service(db.clone()).exports();
        assert!(exports
            .claim(export.id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap());

        let processor = ExportProcessor::new(db.clone(), bucket, slots, &pool());
        assert_eq!(processor.reap_expired(Utc::now()).await.unwrap(), 1);

        let reaped = exports.get(export.id).await.unwrap().unwrap();
        assert_eq!(reaped.status, ExportStatus::Failed);
        assert_eq!(
            reaped.error_message.as_deref(),
            Some("worker lease expired before completion")
        );
    }
}
