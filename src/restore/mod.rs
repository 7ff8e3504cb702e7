//! # Restore Engine
//!
//! Replays an archive into the inventory of the operation's owner. Every
//! record becomes one step; a step that cannot be applied is marked
//! `failed` (or `skipped`) and the run carries on. Only storage, parse and
//! database errors end the run, and those mark the whole operation `failed`.
//!
//! Records always get fresh ids. The mapping from archive ids to the ids
//! written in this run lets later records reference earlier ones, and the
//! [`ImportSession`] lets the security validator accept those references
//! without a lookup.

mod steps;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::archive::{
    AreaRecord, ArchiveError, ArchiveReader, ArchiveRecord, CommodityRecord, FileRecord,
    LocationRecord,
};
use crate::error::RepositoryError;
use crate::export::DEFAULT_LEASE;
use crate::models::export::ExportStatus;
use crate::models::file::{FileCategory, LinkedEntityKind};
use crate::models::restore_operation::{
    Model as RestoreOperationModel, RestoreOptions, RestoreStatus, RestoreStrategy,
};
use crate::models::restore_step::{Model as RestoreStepModel, StepResult};
use crate::repositories::{
    ActingUser, AreaInput, CommodityInput, LocationInput, NewFile, Registries, RestoreProgress,
};
use crate::security::{ImportSession, SecurityError, SecurityValidator};
use crate::storage::{BlobReader, Bucket, StorageError};

pub use steps::StepOutcome;
use steps::StepTracker;

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("{0} not found")]
    NotFound(Uuid),

    #[error("restore {id} is {status}")]
    InvalidState { id: Uuid, status: String },

    #[error("export {0} is not a completed archive")]
    ExportNotRestorable(Uuid),

    #[error("ownership lookup failed: {0}")]
    Lookup(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Body of a restore request
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CreateRestoreRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: RestoreOptions,
}

#[derive(Clone)]
pub struct RestoreService {
    db: DatabaseConnection,
    bucket: Arc<dyn Bucket>,
    validator: SecurityValidator,
    lease: Duration,
}

impl RestoreService {
    pub fn new(db: DatabaseConnection, bucket: Arc<dyn Bucket>) -> Self {
        Self {
            validator: SecurityValidator::new(db.clone()),
            db,
            bucket,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_validator(mut self, validator: SecurityValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub async fn create_restore(
        &self,
        actor: ActingUser,
        export_id: Uuid,
        request: CreateRestoreRequest,
    ) -> Result<RestoreOperationModel, RestoreError> {
        let registries = Registries::for_user(self.db.clone(), actor);
        let export = registries
            .exports()
            .get(export_id)
            .await?
            .ok_or(RestoreError::NotFound(export_id))?;
        if export.status != ExportStatus::Completed || export.file_path.is_none() {
            return Err(RestoreError::ExportNotRestorable(export_id));
        }

        let operation = registries
            .restore_operations()
            .create(
                export_id,
                request.description.unwrap_or_default(),
                &request.options,
            )
            .await?;

        counter!("stockpile_restores_created_total").increment(1);
        info!(restore_id = %operation.id, export_id = %export_id, "Restore queued");
        Ok(operation)
    }

    /// The operation and its steps in recorded order.
    pub async fn get_restore(
        &self,
        actor: ActingUser,
        id: Uuid,
    ) -> Result<(RestoreOperationModel, Vec<RestoreStepModel>), RestoreError> {
        let registries = Registries::for_user(self.db.clone(), actor);
        let operation = registries
            .restore_operations()
            .get(id)
            .await?
            .ok_or(RestoreError::NotFound(id))?;
        let steps = registries.restore_steps().list(id).await?;
        Ok((operation, steps))
    }

    pub async fn list_restores(
        &self,
        actor: ActingUser,
        export_id: Uuid,
    ) -> Result<Vec<RestoreOperationModel>, RestoreError> {
        let registries = Registries::for_user(self.db.clone(), actor);
        if registries.exports().get(export_id).await?.is_none() {
            return Err(RestoreError::NotFound(export_id));
        }
        Ok(registries
            .restore_operations()
            .list_for_export(export_id)
            .await?)
    }

    /// Claims (if pending) and runs a restore operation to a terminal state.
    #[instrument(skip(self), fields(restore_id = %operation_id))]
    pub async fn process_restore(&self, operation_id: Uuid) -> Result<(), RestoreError> {
        let operations = Registries::service(self.db.clone()).restore_operations();
        let operation = operations
            .get(operation_id)
            .await?
            .ok_or(RestoreError::NotFound(operation_id))?;

        match operation.status {
            RestoreStatus::Pending => {
                if !operations.claim(operation_id, self.lease_deadline()).await? {
                    return Err(RestoreError::InvalidState {
                        id: operation_id,
                        status: "already claimed".to_string(),
                    });
                }
            }
            RestoreStatus::Running => {}
            status => {
                return Err(RestoreError::InvalidState {
                    id: operation_id,
                    status: status.as_str().to_string(),
                });
            }
        }

        let started = Instant::now();
        match self.run(&operation).await {
            Ok(progress) => {
                if !operations.complete(operation_id, progress).await? {
                    warn!("Restore left running before completion was recorded");
                }
                counter!("stockpile_restores_total", "outcome" => "completed").increment(1);
                histogram!("stockpile_restore_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                info!(
                    locations = progress.counts.locations,
                    areas = progress.counts.areas,
                    commodities = progress.counts.commodities,
                    errors = progress.error_count,
                    "Restore completed"
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "Restore failed");
                operations.fail(operation_id, &message).await?;
                counter!("stockpile_restores_total", "outcome" => "failed").increment(1);
                Err(e)
            }
        }
    }

    fn lease_deadline(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::minutes(5))
    }

    async fn run(&self, operation: &RestoreOperationModel) -> Result<RestoreProgress, RestoreError> {
        let export = Registries::service(self.db.clone())
            .exports()
            .get(operation.export_id)
            .await?;
        let key = match export {
            Some(export) if export.status == ExportStatus::Completed && !export.is_deleted() => {
                export
                    .file_path
                    .ok_or(RestoreError::ExportNotRestorable(operation.export_id))?
            }
            _ => return Err(RestoreError::ExportNotRestorable(operation.export_id)),
        };

        let mut archive = ArchiveReader::new(self.bucket.reader(&key).await?);
        match archive.next_record().await? {
            Some(ArchiveRecord::Header(header)) => {
                debug!(export_type = ?header.export_type, export_date = ?header.export_date, "Archive opened");
            }
            _ => {
                return Err(ArchiveError::Structure("archive has no header".to_string()).into());
            }
        }

        let actor = ActingUser::new(operation.tenant_id, operation.user_id);
        let run = Run {
            service: self,
            operation_id: operation.id,
            actor,
            options: operation.options(),
            registries: Registries::for_user(self.db.clone(), actor),
            steps: StepTracker::resume(self.db.clone(), operation.clone()).await?,
            session: ImportSession::new(),
            ids: HashMap::new(),
            progress: RestoreProgress::default(),
        };
        run.execute(archive).await
    }
}

/// State of one restore run
struct Run<'a> {
    service: &'a RestoreService,
    operation_id: Uuid,
    actor: ActingUser,
    options: RestoreOptions,
    registries: Registries,
    steps: StepTracker,
    session: ImportSession,
    /// Archive id to the id written (or planned, in a dry run)
    ids: HashMap<Uuid, Uuid>,
    progress: RestoreProgress,
}

impl Run<'_> {
    async fn execute(
        mut self,
        mut archive: ArchiveReader<BlobReader>,
    ) -> Result<RestoreProgress, RestoreError> {
        if self.options.strategy == RestoreStrategy::FullReplace && !self.options.dry_run {
            let step = self.steps.begin("Clear existing inventory").await?;
            let outcome = self.clear_existing().await;
            self.settle(step, outcome).await?;
            self.checkpoint().await?;
        }

        while let Some(record) = archive.next_record().await? {
            match record {
                ArchiveRecord::Header(_) => continue,
                ArchiveRecord::Location(record) => {
                    let step = self
                        .steps
                        .begin(&format!("Restore location {}", record.name))
                        .await?;
                    let outcome = self.restore_location(&record).await;
                    self.settle(step, outcome).await?;
                }
                ArchiveRecord::Area(record) => {
                    let step = self
                        .steps
                        .begin(&format!("Restore area {}", record.name))
                        .await?;
                    let outcome = self.restore_area(&record).await;
                    self.settle(step, outcome).await?;
                }
                ArchiveRecord::Commodity(record) => {
                    let step = self
                        .steps
                        .begin(&format!("Restore commodity {}", record.name))
                        .await?;
                    let outcome = self.restore_commodity(&record).await;
                    let attach = matches!(&outcome, Ok(o) if o.result == StepResult::Done);
                    self.settle(step, outcome).await?;

                    if attach {
                        for file in &record.files {
                            let link = Some(("commodity".to_string(), record.id));
                            self.replay_file(file, link).await?;
                        }
                    }
                }
                ArchiveRecord::File(record) => {
                    let link = record
                        .link
                        .as_ref()
                        .map(|link| (link.entity_type.clone(), link.entity_id));
                    self.replay_file(&record, link).await?;
                }
            }
            self.checkpoint().await?;
        }

        Ok(self.progress)
    }

    async fn replay_file(
        &mut self,
        record: &FileRecord,
        link: Option<(String, Uuid)>,
    ) -> Result<(), RestoreError> {
        let step = self
            .steps
            .begin(&format!("Restore {} file {}", record.kind, record.title))
            .await?;
        let outcome = self.restore_file(record, link).await;
        self.settle(step, outcome).await
    }

    /// Records the step result; fatal errors are recorded and passed on.
    async fn settle(
        &mut self,
        step: Uuid,
        outcome: Result<StepOutcome, RestoreError>,
    ) -> Result<(), RestoreError> {
        match outcome {
            Ok(outcome) => {
                if outcome.result == StepResult::Failed {
                    self.progress.error_count += 1;
                    debug!(step_id = %step, detail = %outcome.detail, "Restore step failed");
                }
                self.steps.finish(step, outcome).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(step_error) = self
                    .steps
                    .finish(step, StepOutcome::failed(e.to_string()))
                    .await
                {
                    warn!(step_id = %step, error = %step_error, "Failed to record failed step");
                }
                Err(e)
            }
        }
    }

    async fn checkpoint(&self) -> Result<(), RestoreError> {
        let renewed = Registries::service(self.service.db.clone())
            .restore_operations()
            .record_progress(self.operation_id, self.progress, self.service.lease_deadline())
            .await?;
        if !renewed {
            return Err(RestoreError::InvalidState {
                id: self.operation_id,
                status: "no longer running".to_string(),
            });
        }
        Ok(())
    }

    fn replaces_everything(&self) -> bool {
        self.options.strategy == RestoreStrategy::FullReplace
    }

    async fn clear_existing(&mut self) -> Result<StepOutcome, RestoreError> {
        let blob_keys = self.registries.files().delete_attachments().await?;
        for key in &blob_keys {
            if let Err(e) = self.service.bucket.delete(key).await {
                warn!(blob_key = %key, error = %e, "Failed to remove attachment blob");
            }
        }
        let commodities = self.registries.commodities().delete_all().await?;
        let areas = self.registries.areas().delete_all().await?;
        let locations = self.registries.locations().delete_all().await?;

        Ok(StepOutcome::done(format!(
            "removed {} files, {commodities} commodities, {areas} areas, {locations} locations",
            blob_keys.len()
        )))
    }

    async fn restore_location(&mut self, record: &LocationRecord) -> Result<StepOutcome, RestoreError> {
        let existing = if self.replaces_everything() {
            None
        } else {
            self.registries.locations().get(record.id).await?
        };
        let input = LocationInput {
            name: record.name.clone(),
            address: record.address.clone(),
        };

        match existing {
            Some(existing) if self.options.strategy == RestoreStrategy::MergeAdd => {
                self.ids.insert(record.id, existing.id);
                Ok(StepOutcome::skipped("location already exists"))
            }
            Some(existing) => {
                if !self.options.dry_run {
                    self.registries.locations().update(existing.id, input).await?;
                }
                self.ids.insert(record.id, existing.id);
                self.progress.counts.locations += 1;
                Ok(StepOutcome::done("location updated"))
            }
            None => {
                let id = if self.options.dry_run {
                    Uuid::new_v4()
                } else {
                    self.registries.locations().create(input).await?.id
                };
                self.created(record.id, id, LinkedEntityKind::Location);
                self.progress.counts.locations += 1;
                Ok(StepOutcome::done("location created"))
            }
        }
    }

    async fn restore_area(&mut self, record: &AreaRecord) -> Result<StepOutcome, RestoreError> {
        let Some(location_id) = self.resolve_location(record.location_id).await? else {
            return Ok(StepOutcome::failed(format!(
                "location {} not found",
                record.location_id
            )));
        };
        let existing = if self.replaces_everything() {
            None
        } else {
            self.registries.areas().get(record.id).await?
        };
        let input = AreaInput {
            location_id,
            name: record.name.clone(),
        };

        match existing {
            Some(existing) if self.options.strategy == RestoreStrategy::MergeAdd => {
                self.ids.insert(record.id, existing.id);
                Ok(StepOutcome::skipped("area already exists"))
            }
            Some(existing) => {
                if !self.options.dry_run {
                    self.registries.areas().update(existing.id, input).await?;
                }
                self.ids.insert(record.id, existing.id);
                self.progress.counts.areas += 1;
                Ok(StepOutcome::done("area updated"))
            }
            None => {
                let id = if self.options.dry_run {
                    Uuid::new_v4()
                } else {
                    self.registries.areas().create(input).await?.id
                };
                self.created(record.id, id, LinkedEntityKind::Area);
                self.progress.counts.areas += 1;
                Ok(StepOutcome::done("area created"))
            }
        }
    }

    async fn restore_commodity(
        &mut self,
        record: &CommodityRecord,
    ) -> Result<StepOutcome, RestoreError> {
        let Some(area_id) = self.resolve_area(record.area_id).await? else {
            return Ok(StepOutcome::failed(format!("area {} not found", record.area_id)));
        };
        let existing = if self.replaces_everything() {
            None
        } else {
            self.registries.commodities().get(record.id).await?
        };
        let input = CommodityInput {
            area_id,
            name: record.name.clone(),
            short_name: record.short_name.clone(),
            commodity_type: record.commodity_type.clone(),
            count: record.count,
            status: record.status.clone(),
            original_price: record.original_price,
            original_price_currency: record.original_price_currency.clone(),
            serial_number: record.serial_number.clone(),
            comments: record.comments.clone(),
            draft: record.draft,
        };

        match existing {
            Some(existing) if self.options.strategy == RestoreStrategy::MergeAdd => {
                self.ids.insert(record.id, existing.id);
                Ok(StepOutcome::skipped("commodity already exists"))
            }
            Some(existing) => {
                if !self.options.dry_run {
                    self.registries.commodities().update(existing.id, input).await?;
                }
                self.ids.insert(record.id, existing.id);
                self.progress.counts.commodities += 1;
                Ok(StepOutcome::done("commodity updated"))
            }
            None => {
                let id = if self.options.dry_run {
                    Uuid::new_v4()
                } else {
                    self.registries.commodities().create(input).await?.id
                };
                self.created(record.id, id, LinkedEntityKind::Commodity);
                self.progress.counts.commodities += 1;
                Ok(StepOutcome::done("commodity created"))
            }
        }
    }

    async fn restore_file(
        &mut self,
        record: &FileRecord,
        link: Option<(String, Uuid)>,
    ) -> Result<StepOutcome, RestoreError> {
        let Some((parent_kind, archive_parent)) = link else {
            return match category_for(&record.kind) {
                Some(category) => self.store_file(record, category, None).await,
                None => Ok(StepOutcome::failed(
                    SecurityError::UnknownFileType(record.kind.clone()).to_string(),
                )),
            };
        };

        let parent_id = self
            .ids
            .get(&archive_parent)
            .copied()
            .unwrap_or(archive_parent);
        let verdict = self
            .service
            .validator
            .validate_file_link(&record.kind, &parent_kind, parent_id, self.actor, &self.session)
            .await;

        match verdict {
            Ok((category, kind)) => self.store_file(record, category, Some((kind, parent_id))).await,
            Err(SecurityError::NotFound { .. }) => {
                let Some(category) = category_for(&record.kind) else {
                    return Ok(StepOutcome::failed(
                        SecurityError::UnknownFileType(record.kind.clone()).to_string(),
                    ));
                };
                let stored = self.store_file(record, category, None).await?;
                if stored.result == StepResult::Done {
                    Ok(StepOutcome::skipped("linked entity not found, file stored unlinked"))
                } else {
                    Ok(stored)
                }
            }
            Err(SecurityError::Lookup(message)) => Err(RestoreError::Lookup(message)),
            Err(denied) => Ok(StepOutcome::failed(denied.to_string())),
        }
    }

    async fn store_file(
        &mut self,
        record: &FileRecord,
        category: FileCategory,
        link: Option<(LinkedEntityKind, Uuid)>,
    ) -> Result<StepOutcome, RestoreError> {
        let data = match (&record.data, self.options.include_file_data) {
            (Some(data), true) => data,
            _ => return Ok(StepOutcome::skipped("file data not included")),
        };

        if self.options.dry_run {
            self.tally(category, data.len());
            return Ok(StepOutcome::done("file validated"));
        }

        let key = format!(
            "files/{}/{}/{}",
            self.actor.tenant_id,
            self.actor.user_id,
            Uuid::new_v4()
        );
        let mut writer = self.service.bucket.writer(&key).await?;
        writer.write_all(data).await.map_err(StorageError::from)?;
        writer.shutdown().await.map_err(StorageError::from)?;

        let created = self
            .registries
            .files()
            .create(NewFile {
                title: record.title.clone(),
                original_path: record.original_path.clone(),
                blob_key: key.clone(),
                mime_type: record.mime_type.clone(),
                size_bytes: data.len() as i64,
                category,
                link,
            })
            .await;
        if let Err(e) = created {
            if let Err(cleanup) = self.service.bucket.delete(&key).await {
                warn!(blob_key = %key, error = %cleanup, "Failed to remove orphaned blob");
            }
            return Err(e.into());
        }

        self.tally(category, data.len());
        Ok(StepOutcome::done(if link.is_some() {
            "file linked"
        } else {
            "file stored"
        }))
    }

    fn tally(&mut self, category: FileCategory, bytes: usize) {
        let counts = &mut self.progress.counts;
        match category {
            FileCategory::Images => counts.images += 1,
            FileCategory::Invoices => counts.invoices += 1,
            FileCategory::Manuals => counts.manuals += 1,
            FileCategory::Exports => {}
        }
        counts.binary_data_size += bytes as i64;
    }

    fn created(&mut self, archive_id: Uuid, id: Uuid, kind: LinkedEntityKind) {
        self.ids.insert(archive_id, id);
        self.session.record(id, kind);
    }

    async fn resolve_location(&self, archive_id: Uuid) -> Result<Option<Uuid>, RestoreError> {
        if let Some(id) = self.ids.get(&archive_id) {
            return Ok(Some(*id));
        }
        if self.replaces_everything() && !self.options.dry_run {
            return Ok(None);
        }
        Ok(self
            .registries
            .locations()
            .get(archive_id)
            .await?
            .map(|location| location.id))
    }

    async fn resolve_area(&self, archive_id: Uuid) -> Result<Option<Uuid>, RestoreError> {
        if let Some(id) = self.ids.get(&archive_id) {
            return Ok(Some(*id));
        }
        if self.replaces_everything() && !self.options.dry_run {
            return Ok(None);
        }
        Ok(self
            .registries
            .areas()
            .get(archive_id)
            .await?
            .map(|area| area.id))
    }
}

fn category_for(kind: &str) -> Option<FileCategory> {
    match kind {
        "image" => Some(FileCategory::Images),
        "invoice" => Some(FileCategory::Invoices),
        "manual" => Some(FileCategory::Manuals),
        "export" => Some(FileCategory::Exports),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
