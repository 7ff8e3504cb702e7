//! # Import Engine
//!
//! Uploaded archives are streamed into blob storage and tracked as exports
//! with `export_type = imported`. The import worker parses the whole
//! document once, records what it contains and marks the job `completed`,
//! after which the archive can be restored like a generated export.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use metrics::counter;
use sea_orm::DatabaseConnection;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::archive::{ArchiveError, ArchiveReader, ArchiveRecord, FileRecord};
use crate::error::RepositoryError;
use crate::export::DEFAULT_LEASE;
use crate::models::export::{ExportStatus, ExportType, Model as ExportModel};
use crate::models::file::{FileCategory, LinkedEntityKind};
use crate::repositories::{
    ActingUser, CompletedExport, InventoryCounts, NewExport, NewFile, Registries,
};
use crate::storage::{Bucket, StorageError};

/// Records between lease renewals while scanning an archive
const RENEW_EVERY: u32 = 200;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import {0} not found")]
    NotFound(Uuid),

    #[error("import {id} is {status}")]
    InvalidState { id: Uuid, status: String },

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

#[derive(Clone)]
pub struct ImportService {
    db: DatabaseConnection,
    bucket: Arc<dyn Bucket>,
    lease: Duration,
    max_upload_bytes: u64,
}

impl ImportService {
    pub fn new(db: DatabaseConnection, bucket: Arc<dyn Bucket>, max_upload_bytes: u64) -> Self {
        Self {
            db,
            bucket,
            lease: DEFAULT_LEASE,
            max_upload_bytes,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Streams an upload into storage and queues it for validation.
    pub async fn store_upload<S, B, E>(
        &self,
        actor: ActingUser,
        body: S,
        description: Option<String>,
    ) -> Result<ExportModel, ImportError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let key = upload_key(actor, Utc::now());

        let stored = self.write_upload(&key, body).await;
        let size = match stored {
            Ok(size) => size,
            Err(e) => {
                self.discard(&key).await;
                return Err(e);
            }
        };

        let created = Registries::for_user(self.db.clone(), actor)
            .exports()
            .create(NewExport {
                export_type: ExportType::Imported,
                include_file_data: false,
                selected_items: Vec::new(),
                description: description.unwrap_or_default(),
                file_path: Some(key.clone()),
                file_size: Some(i64::try_from(size).unwrap_or(i64::MAX)),
            })
            .await;

        match created {
            Ok(export) => {
                counter!("stockpile_imports_uploaded_total").increment(1);
                info!(export_id = %export.id, bytes = size, "Archive upload stored");
                Ok(export)
            }
            Err(e) => {
                self.discard(&key).await;
                Err(e.into())
            }
        }
    }

    async fn write_upload<S, B, E>(&self, key: &str, mut body: S) -> Result<u64, ImportError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let mut writer = self.bucket.writer(key).await?;
        let mut size = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ImportError::InvalidArchive(format!("upload interrupted: {e}")))?;
            let bytes = chunk.as_ref();
            size += bytes.len() as u64;
            if size > self.max_upload_bytes {
                return Err(ImportError::InvalidArchive(format!(
                    "upload exceeds {} bytes",
                    self.max_upload_bytes
                )));
            }
            writer.write_all(bytes).await.map_err(StorageError::from)?;
        }
        writer.shutdown().await.map_err(StorageError::from)?;

        if size == 0 {
            return Err(ImportError::InvalidArchive("upload is empty".to_string()));
        }
        Ok(size)
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.bucket.delete(key).await {
            warn!(blob_key = %key, error = %e, "Failed to remove rejected upload");
        }
    }

    /// Claims (if pending) and validates an uploaded archive.
    #[instrument(skip(self), fields(export_id = %export_id))]
    pub async fn process_import(&self, export_id: Uuid) -> Result<(), ImportError> {
        let exports = Registries::service(self.db.clone()).exports();
        let job = exports
            .get(export_id)
            .await?
            .ok_or(ImportError::NotFound(export_id))?;

        if job.export_type != ExportType::Imported {
            return Err(ImportError::InvalidState {
                id: export_id,
                status: "not an uploaded archive".to_string(),
            });
        }

        match job.status {
            ExportStatus::Pending => {
                if !exports.claim(export_id, self.lease_deadline()).await? {
                    return Err(ImportError::InvalidState {
                        id: export_id,
                        status: "already claimed".to_string(),
                    });
                }
            }
            ExportStatus::InProgress => {}
            status => {
                return Err(ImportError::InvalidState {
                    id: export_id,
                    status: status.as_str().to_string(),
                });
            }
        }

        match self.validate(&job).await {
            Ok(outcome) => {
                let counts = outcome.counts;
                if !exports.complete(export_id, outcome).await? {
                    warn!("Import left in_progress before completion was recorded");
                }
                counter!("stockpile_imports_total", "outcome" => "completed").increment(1);
                info!(
                    locations = counts.locations,
                    areas = counts.areas,
                    commodities = counts.commodities,
                    "Archive validated"
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "Archive validation failed");
                exports.fail(export_id, &message).await?;
                counter!("stockpile_imports_total", "outcome" => "failed").increment(1);
                Err(e)
            }
        }
    }

    fn lease_deadline(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::minutes(5))
    }

    async fn validate(&self, job: &ExportModel) -> Result<CompletedExport, ImportError> {
        let key = job
            .file_path
            .clone()
            .ok_or_else(|| ImportError::InvalidArchive("no archive was uploaded".to_string()))?;

        let size = self.bucket.attributes(&key).await?.size;
        let counts = self.scan(job, &key).await?;

        let actor = ActingUser::new(job.tenant_id, job.user_id);
        let file_size = i64::try_from(size).unwrap_or(i64::MAX);
        let file = Registries::for_user(self.db.clone(), actor)
            .files()
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

        Ok(CompletedExport {
            file_path: key,
            file_id: Some(file.id),
            file_size,
            counts,
        })
    }

    async fn scan(&self, job: &ExportModel, key: &str) -> Result<InventoryCounts, ImportError> {
        let exports = Registries::service(self.db.clone()).exports();
        let mut reader = ArchiveReader::new(self.bucket.reader(key).await?);
        let mut counts = InventoryCounts::default();
        let mut records = 0u32;

        while let Some(record) = reader.next_record().await? {
            match record {
                ArchiveRecord::Header(_) => {}
                ArchiveRecord::Location(_) => counts.locations += 1,
                ArchiveRecord::Area(_) => counts.areas += 1,
                ArchiveRecord::Commodity(commodity) => {
                    counts.commodities += 1;
                    for file in &commodity.files {
                        tally_file(&mut counts, file);
                    }
                }
                ArchiveRecord::File(file) => tally_file(&mut counts, &file),
            }

            records += 1;
            if records % RENEW_EVERY == 0
                && !exports.renew_lease(job.id, self.lease_deadline()).await?
            {
                return Err(ImportError::InvalidState {
                    id: job.id,
                    status: "no longer in progress".to_string(),
                });
            }
        }

        Ok(counts)
    }
}

fn tally_file(counts: &mut InventoryCounts, file: &FileRecord) {
    match file.kind.as_str() {
        "image" => counts.images += 1,
        "invoice" => counts.invoices += 1,
        "manual" => counts.manuals += 1,
        _ => {}
    }
    counts.binary_data_size += file.data_len();
}

/// `imports/{tenant}/{user}/import_{timestamp}_{nonce}.xml`
fn upload_key(actor: ActingUser, at: DateTime<Utc>) -> String {
    format!(
        "imports/{}/{}/import_{}_{}.xml",
        actor.tenant_id,
        actor.user_id,
        at.format("%Y%m%d_%H%M%S"),
        Uuid::new_v4().simple()
    )
}
