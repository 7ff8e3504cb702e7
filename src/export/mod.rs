//! # Export Engine
//!
//! Turns a pending export job into an XML archive in blob storage. The job
//! row moves `pending → in_progress` before any data is read and reaches
//! `completed` or `failed` only from `in_progress`, so a crash mid-stream
//! leaves the job visibly in progress until its lease is reaped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::archive::{
    AreaRecord, ArchiveError, ArchiveWriter, CommodityRecord, FileRecord, LocationRecord, Section,
};
use crate::error::RepositoryError;
use crate::models::export::{ExportStatus, ExportType, Model as ExportModel, SelectedItem, SelectedItemKind};
use crate::models::commodity::Model as CommodityModel;
use crate::models::file::{FileCategory, LinkedEntityKind, Model as FileModel};
use crate::repositories::{
    ActingUser, CompletedExport, InventoryCounts, NewExport, NewFile, Registries,
};
use crate::storage::{BlobReader, Bucket, StorageError};

pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);
/// Rows fetched per query while streaming a section
pub const DEFAULT_PAGE_SIZE: u64 = 500;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export {0} not found")]
    NotFound(Uuid),

    #[error("export {id} is {status}")]
    InvalidState { id: Uuid, status: String },

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Body of an export request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateExportRequest {
    pub export_type: ExportType,
    #[serde(default)]
    pub include_file_data: bool,
    #[serde(default)]
    pub selected_items: Vec<SelectedItem>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A completed artifact ready to stream
pub struct Download {
    pub reader: BlobReader,
    pub size: u64,
    pub file_name: String,
}

#[derive(Clone)]
pub struct ExportService {
    db: DatabaseConnection,
    bucket: Arc<dyn Bucket>,
    lease: Duration,
    page_size: u64,
}

impl ExportService {
    pub fn new(db: DatabaseConnection, bucket: Arc<dyn Bucket>) -> Self {
        Self {
            db,
            bucket,
            lease: DEFAULT_LEASE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn create_export(
        &self,
        actor: ActingUser,
        request: CreateExportRequest,
    ) -> Result<ExportModel, ExportError> {
        match request.export_type {
            ExportType::Imported => {
                return Err(ExportError::InvalidRequest(
                    "imported exports are created by uploading an archive".to_string(),
                ));
            }
            ExportType::SelectedItems if request.selected_items.is_empty() => {
                return Err(ExportError::InvalidRequest(
                    "selected_items exports need at least one item".to_string(),
                ));
            }
            ExportType::SelectedItems => {}
            _ if !request.selected_items.is_empty() => {
                return Err(ExportError::InvalidRequest(
                    "selected_items is only accepted for selected_items exports".to_string(),
                ));
            }
            _ => {}
        }

        let export = Registries::for_user(self.db.clone(), actor)
            .exports()
            .create(NewExport {
                export_type: request.export_type,
                include_file_data: request.include_file_data,
                selected_items: request.selected_items,
                description: request.description.unwrap_or_default(),
                file_path: None,
                file_size: None,
            })
            .await?;

        counter!(
            "stockpile_exports_created_total",
            "export_type" => export.export_type.as_str()
        )
        .increment(1);
        info!(export_id = %export.id, export_type = export.export_type.as_str(), "Export queued");
        Ok(export)
    }

    pub async fn get(&self, actor: ActingUser, id: Uuid) -> Result<ExportModel, ExportError> {
        Registries::for_user(self.db.clone(), actor)
            .exports()
            .get(id)
            .await?
            .ok_or(ExportError::NotFound(id))
    }

    pub async fn list(&self, actor: ActingUser) -> Result<Vec<ExportModel>, ExportError> {
        Ok(Registries::for_user(self.db.clone(), actor)
            .exports()
            .list()
            .await?)
    }

    /// Every non-deleted export across tenants.
    pub async fn list_all(&self) -> Result<Vec<ExportModel>, ExportError> {
        Ok(Registries::service(self.db.clone()).exports().list().await?)
    }

    pub async fn soft_delete(&self, actor: ActingUser, id: Uuid) -> Result<(), ExportError> {
        let exports = Registries::for_user(self.db.clone(), actor).exports();
        let export = exports.get(id).await?.ok_or(ExportError::NotFound(id))?;
        if !export.status.is_terminal() {
            return Err(ExportError::InvalidState {
                id,
                status: export.status.as_str().to_string(),
            });
        }
        if !exports.soft_delete(id).await? {
            return Err(ExportError::NotFound(id));
        }
        info!(export_id = %id, "Export deleted");
        Ok(())
    }

    pub async fn open_download(&self, actor: ActingUser, id: Uuid) -> Result<Download, ExportError> {
        let export = self.get(actor, id).await?;
        let key = match (export.status, export.file_path) {
            (ExportStatus::Completed, Some(key)) => key,
            (status, _) => {
                return Err(ExportError::InvalidState {
                    id,
                    status: status.as_str().to_string(),
                });
            }
        };

        let size = self.bucket.attributes(&key).await?.size;
        let reader = self.bucket.reader(&key).await?;
        let file_name = key.rsplit('/').next().unwrap_or(key.as_str()).to_string();
        Ok(Download {
            reader,
            size,
            file_name,
        })
    }

    /// Claims (if pending) and runs an export job to a terminal state.
    #[instrument(skip(self), fields(export_id = %export_id))]
    pub async fn process_export(&self, export_id: Uuid) -> Result<(), ExportError> {
        let exports = Registries::service(self.db.clone()).exports();
        let job = exports
            .get(export_id)
            .await?
            .ok_or(ExportError::NotFound(export_id))?;

        match job.status {
            ExportStatus::Pending => {
                if !exports.claim(export_id, self.lease_deadline()).await? {
                    return Err(ExportError::InvalidState {
                        id: export_id,
                        status: "already claimed".to_string(),
                    });
                }
            }
            ExportStatus::InProgress => {}
            status => {
                return Err(ExportError::InvalidState {
                    id: export_id,
                    status: status.as_str().to_string(),
                });
            }
        }

        let started = Instant::now();
        let export_type = job.export_type.as_str();
        match self.generate(&job).await {
            Ok(outcome) => {
                let counts = outcome.counts;
                let (blob_key, file_id) = (outcome.file_path.clone(), outcome.file_id);
                match exports.complete(export_id, outcome).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("Export left in_progress before completion was recorded, discarding artifact");
                        self.discard_artifact(&job, &blob_key, file_id).await;
                        counter!(
                            "stockpile_exports_total",
                            "export_type" => export_type,
                            "outcome" => "discarded"
                        )
                        .increment(1);
                        return Err(ExportError::InvalidState {
                            id: export_id,
                            status: "no longer in progress".to_string(),
                        });
                    }
                    Err(e) => {
                        self.discard_artifact(&job, &blob_key, file_id).await;
                        return Err(e.into());
                    }
                }
                counter!(
                    "stockpile_exports_total",
                    "export_type" => export_type,
                    "outcome" => "completed"
                )
                .increment(1);
                histogram!("stockpile_export_duration_seconds", "export_type" => export_type)
                    .record(started.elapsed().as_secs_f64());
                info!(
                    locations = counts.locations,
                    areas = counts.areas,
                    commodities = counts.commodities,
                    binary_data_size = counts.binary_data_size,
                    "Export completed"
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "Export failed");
                exports.fail(export_id, &message).await?;
                counter!(
                    "stockpile_exports_total",
                    "export_type" => export_type,
                    "outcome" => "failed"
                )
                .increment(1);
                Err(e)
            }
        }
    }

    /// Removes the blob and File row of an archive whose job can no longer
    /// be completed.
    async fn discard_artifact(&self, job: &ExportModel, key: &str, file_id: Option<Uuid>) {
        if let Some(file_id) = file_id {
            let actor = ActingUser::new(job.tenant_id, job.user_id);
            let files = Registries::for_user(self.db.clone(), actor).files();
            if let Err(e) = files.delete(file_id).await {
                warn!(file_id = %file_id, error = %e, "Failed to remove export file row");
            }
        }
        if let Err(e) = self.bucket.delete(key).await {
            warn!(blob_key = %key, error = %e, "Failed to remove export blob");
        }
    }

    fn lease_deadline(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::minutes(5))
    }

    async fn renew_lease(&self, job: &ExportModel) -> Result<(), ExportError> {
        let exports = Registries::service(self.db.clone()).exports();
        let renewed = exports.renew_lease(job.id, self.lease_deadline()).await?;
        if !renewed {
            return Err(ExportError::InvalidState {
                id: job.id,
                status: "no longer in progress".to_string(),
            });
        }
        Ok(())
    }

    /// Writes the archive and registers it. The partial blob is removed on any error.
    async fn generate(&self, job: &ExportModel) -> Result<CompletedExport, ExportError> {
        let actor = ActingUser::new(job.tenant_id, job.user_id);
        let key = blob_key(job, Utc::now());

        let result = async {
            let sink = self.bucket.writer(&key).await?;
            let counts = self.stream_archive(job, actor, sink).await?;
            let size = self.bucket.attributes(&key).await?.size;
            let file_size = i64::try_from(size).unwrap_or(i64::MAX);

            let files = Registries::for_user(self.db.clone(), actor).files();
            let file = files
                .create(NewFile {
                    title: key.rsplit('/').next().unwrap_or(key.as_str()).to_string(),
                    original_path: key.clone(),
                    blob_key: key.clone(),
                    mime_type: "application/xml".to_string(),
                    size_bytes: file_size,
                    category: FileCategory::Exports,
                    link: Some((LinkedEntityKind::Export, job.id)),
                })
                .await?;

            Ok::<_, ExportError>(CompletedExport {
                file_path: key.clone(),
                file_id: Some(file.id),
                file_size,
                counts,
            })
        }
        .await;

        if result.is_err()
            && let Err(cleanup) = self.bucket.delete(&key).await
        {
            warn!(blob_key = %key, error = %cleanup, "Failed to remove partial export");
        }
        result
    }

    async fn stream_archive<W: AsyncWrite + Unpin + Send>(
        &self,
        job: &ExportModel,
        actor: ActingUser,
        sink: W,
    ) -> Result<InventoryCounts, ExportError> {
        let registries = Registries::for_user(self.db.clone(), actor);
        let mut writer = ArchiveWriter::start(sink, job.export_type.as_str(), Utc::now()).await?;
        let mut counts = InventoryCounts::default();

        let (locations, areas, commodities, orphans) = match job.export_type {
            ExportType::FullDatabase => (true, true, true, true),
            ExportType::Locations => (true, false, false, false),
            ExportType::Areas => (false, true, false, false),
            ExportType::Commodities => (false, false, true, false),
            ExportType::SelectedItems => {
                let selected = job.selected_items();
                let selection = resolve_selection(&registries, &selected).await?;
                self.write_selection(job, &registries, selection, &mut writer, &mut counts)
                    .await?;
                let (_, bytes) = writer.finish().await?;
                debug!(bytes, "Archive written");
                return Ok(counts);
            }
            ExportType::Imported => {
                return Err(ExportError::InvalidRequest(
                    "imported archives are not generated".to_string(),
                ));
            }
        };

        if locations {
            let repository = registries.locations();
            writer.begin_section(Section::Locations).await?;
            let mut page = 0;
            loop {
                let batch = repository.list_page(page, self.page_size).await?;
                for location in &batch {
                    writer.write_location(&LocationRecord::from(location)).await?;
                    counts.locations += 1;
                }
                if !self.next_page(job, batch.len()).await? {
                    break;
                }
                page += 1;
            }
            writer.end_section(Section::Locations).await?;
            self.renew_lease(job).await?;
        }

        if areas {
            let repository = registries.areas();
            writer.begin_section(Section::Areas).await?;
            let mut page = 0;
            loop {
                let batch = repository.list_page(page, self.page_size).await?;
                for area in &batch {
                    writer.write_area(&AreaRecord::from(area)).await?;
                    counts.areas += 1;
                }
                if !self.next_page(job, batch.len()).await? {
                    break;
                }
                page += 1;
            }
            writer.end_section(Section::Areas).await?;
            self.renew_lease(job).await?;
        }

        if commodities {
            let repository = registries.commodities();
            writer.begin_section(Section::Commodities).await?;
            let mut page = 0;
            loop {
                let batch = repository.list_page(page, self.page_size).await?;
                for commodity in &batch {
                    self.write_commodity(job, &registries, commodity, &mut writer, &mut counts)
                        .await?;
                }
                if !self.next_page(job, batch.len()).await? {
                    break;
                }
                page += 1;
            }
            writer.end_section(Section::Commodities).await?;
            self.renew_lease(job).await?;
        }

        if orphans {
            let repository = registries.files();
            writer.begin_section(Section::Files).await?;
            let mut page = 0;
            loop {
                let batch = repository.list_orphaned_page(page, self.page_size).await?;
                for orphan in &batch {
                    if orphan.category == FileCategory::Exports {
                        continue;
                    }
                    let record = self
                        .file_record(orphan, job.include_file_data, &mut counts)
                        .await?;
                    writer.write_file(&record).await?;
                }
                if !self.next_page(job, batch.len()).await? {
                    break;
                }
                page += 1;
            }
            writer.end_section(Section::Files).await?;
        }

        let (_, bytes) = writer.finish().await?;
        debug!(bytes, "Archive written");
        Ok(counts)
    }

    /// Renews the lease after a full page; a short page ends the section.
    async fn next_page(&self, job: &ExportModel, fetched: usize) -> Result<bool, ExportError> {
        if (fetched as u64) < self.page_size {
            return Ok(false);
        }
        self.renew_lease(job).await?;
        Ok(true)
    }

    async fn write_selection<W: AsyncWrite + Unpin + Send>(
        &self,
        job: &ExportModel,
        registries: &Registries,
        selection: Selection,
        writer: &mut ArchiveWriter<W>,
        counts: &mut InventoryCounts,
    ) -> Result<(), ExportError> {
        writer.begin_section(Section::Locations).await?;
        for location in &selection.locations {
            writer.write_location(&LocationRecord::from(location)).await?;
            counts.locations += 1;
        }
        writer.end_section(Section::Locations).await?;
        self.renew_lease(job).await?;

        writer.begin_section(Section::Areas).await?;
        for area in &selection.areas {
            writer.write_area(&AreaRecord::from(area)).await?;
            counts.areas += 1;
        }
        writer.end_section(Section::Areas).await?;
        self.renew_lease(job).await?;

        writer.begin_section(Section::Commodities).await?;
        for commodity in &selection.commodities {
            self.write_commodity(job, registries, commodity, writer, counts)
                .await?;
        }
        writer.end_section(Section::Commodities).await?;
        self.renew_lease(job).await?;
        Ok(())
    }

    async fn write_commodity<W: AsyncWrite + Unpin + Send>(
        &self,
        job: &ExportModel,
        registries: &Registries,
        commodity: &CommodityModel,
        writer: &mut ArchiveWriter<W>,
        counts: &mut InventoryCounts,
    ) -> Result<(), ExportError> {
        let files_repository = registries.files();
        let attachments = files_repository
            .list_linked(LinkedEntityKind::Commodity, commodity.id, None)
            .await?;
        let mut files = Vec::with_capacity(attachments.len());
        for attachment in &attachments {
            let record = self
                .file_record(attachment, job.include_file_data, counts)
                .await?;
            files.push(record);
        }
        writer
            .write_commodity(&CommodityRecord::from_model(commodity, files))
            .await?;
        counts.commodities += 1;
        Ok(())
    }

    async fn file_record(
        &self,
        file: &FileModel,
        include_data: bool,
        counts: &mut InventoryCounts,
    ) -> Result<FileRecord, ExportError> {
        match file.category {
            FileCategory::Images => counts.images += 1,
            FileCategory::Invoices => counts.invoices += 1,
            FileCategory::Manuals => counts.manuals += 1,
            FileCategory::Exports => {}
        }

        let data = if include_data {
            match self.bucket.reader(&file.blob_key).await {
                Ok(mut reader) => {
                    let mut data = Vec::new();
                    reader.read_to_end(&mut data).await.map_err(StorageError::from)?;
                    counts.binary_data_size += data.len() as i64;
                    Some(data)
                }
                Err(StorageError::NotFound(_)) => {
                    warn!(file_id = %file.id, blob_key = %file.blob_key, "Attachment blob missing, exporting metadata only");
                    None
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        Ok(FileRecord {
            id: file.id,
            kind: FileRecord::kind_for(file.category).to_string(),
            link: None,
            title: file.title.clone(),
            original_path: file.original_path.clone(),
            mime_type: file.mime_type.clone(),
            data,
        })
    }
}

/// Selected entities grouped by kind, in dependency order.
struct Selection {
    locations: Vec<crate::models::location::Model>,
    areas: Vec<crate::models::area::Model>,
    commodities: Vec<CommodityModel>,
}

async fn resolve_selection(
    registries: &Registries,
    items: &[SelectedItem],
) -> Result<Selection, ExportError> {
    let mut grouped: HashMap<SelectedItemKind, Vec<Uuid>> = HashMap::new();
    for item in items {
        let ids = grouped.entry(item.kind).or_default();
        if !ids.contains(&item.id) {
            ids.push(item.id);
        }
    }

    let mut selection = Selection {
        locations: Vec::new(),
        areas: Vec::new(),
        commodities: Vec::new(),
    };

    let locations = registries.locations();
    let areas = registries.areas();
    let commodities = registries.commodities();

    let location_ids = grouped.remove(&SelectedItemKind::Location).unwrap_or_default();
    for id in location_ids {
        match locations.get(id).await? {
            Some(location) => selection.locations.push(location),
            None => debug!(location_id = %id, "Selected location not found, skipping"),
        }
    }
    let area_ids = grouped.remove(&SelectedItemKind::Area).unwrap_or_default();
    for id in area_ids {
        match areas.get(id).await? {
            Some(area) => selection.areas.push(area),
            None => debug!(area_id = %id, "Selected area not found, skipping"),
        }
    }
    let commodity_ids = grouped.remove(&SelectedItemKind::Commodity).unwrap_or_default();
    for id in commodity_ids {
        match commodities.get(id).await? {
            Some(commodity) => selection.commodities.push(commodity),
            None => debug!(commodity_id = %id, "Selected commodity not found, skipping"),
        }
    }

    Ok(selection)
}

/// `exports/{tenant}/{user}/export_{type}_{timestamp}.xml`
pub fn blob_key(job: &ExportModel, at: DateTime<Utc>) -> String {
    format!(
        "exports/{}/{}/export_{}_{}.xml",
        job.tenant_id,
        job.user_id,
        job.export_type.as_str(),
        at.format("%Y%m%d_%H%M%S_%3f")
    )
}

#[cfg(test)]
mod tests;
