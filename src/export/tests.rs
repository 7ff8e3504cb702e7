use super::*;
use crate::models::export::SelectedItemKind;
use crate::storage::{BlobAttributes, BlobWriter, MemoryBucket};
use crate::testing::{new_actor, seed_inventory, setup_db};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

fn request(export_type: ExportType) -> CreateExportRequest {
    CreateExportRequest {
        export_type,
        include_file_data: false,
        selected_items: Vec::new(),
        description: Some("nightly".to_string()),
    }
}

async fn read_blob(bucket: &dyn Bucket, key: &str) -> String {
    let mut contents = String::new();
    bucket
        .reader(key)
        .await
        .unwrap()
        .read_to_string(&mut contents)
        .await
        .unwrap();
    contents
}

#[tokio::test]
async fn locations_export_completes_with_owner_data_only() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let stranger = new_actor(&db).await;
    seed_inventory(&db, actor, "alpha").await;
    seed_inventory(&db, actor, "beta").await;
    seed_inventory(&db, stranger, "gamma").await;

    let service = ExportService::new(db.clone(), bucket.clone());
    let export = service
        .create_export(actor, request(ExportType::Locations))
        .await
        .unwrap();
    assert_eq!(export.status, ExportStatus::Pending);

    service.process_export(export.id).await.unwrap();

    let done = service.get(actor, export.id).await.unwrap();
    assert_eq!(done.status, ExportStatus::Completed);
    assert_eq!(done.location_count, 2);
    assert_eq!(done.area_count, 0);
    assert!(done.completed_at.is_some());
    assert!(done.lease_expires_at.is_none());

    let key = done.file_path.clone().unwrap();
    assert!(key.starts_with(&format!("exports/{}/{}/export_locations_", actor.tenant_id, actor.user_id)));

    let file = Registries::for_user(db.clone(), actor)
        .files()
        .get(done.file_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.category, FileCategory::Exports);
    assert_eq!(file.linked_entity_id, Some(export.id));
    assert_eq!(Some(file.size_bytes), done.file_size);

    let xml = read_blob(bucket.as_ref(), &key).await;
    assert!(xml.contains("exportType=\"locations\""));
    assert_eq!(xml.matches("<location ").count(), 2);
    assert!(!xml.contains("gamma"));
    assert!(!xml.contains("<areas>"));
}

#[tokio::test]
async fn terminal_exports_are_not_processed_again() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let service = ExportService::new(db.clone(), bucket);

    let export = service
        .create_export(actor, request(ExportType::Areas))
        .await
        .unwrap();
    service.process_export(export.id).await.unwrap();

    let again = service.process_export(export.id).await;
    assert!(matches!(again, Err(ExportError::InvalidState { .. })));
    assert_eq!(
        service.get(actor, export.id).await.unwrap().status,
        ExportStatus::Completed
    );
}

#[tokio::test]
async fn full_export_embeds_attachment_data() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let inventory = seed_inventory(&db, actor, "attic").await;

    let blob_key = format!("files/{}/manual.pdf", actor.user_id);
    let mut writer = bucket.writer(&blob_key).await.unwrap();
    writer.write_all(b"%PDF-1.4 manual").await.unwrap();
    writer.shutdown().await.unwrap();

    Registries::for_user(db.clone(), actor)
        .files()
        .create(NewFile {
            title: "manual.pdf".to_string(),
            original_path: "manual.pdf".to_string(),
            blob_key,
            mime_type: "application/pdf".to_string(),
            size_bytes: 15,
            category: FileCategory::Manuals,
            link: Some((LinkedEntityKind::Commodity, inventory.commodity.id)),
        })
        .await
        .unwrap();

    let service = ExportService::new(db.clone(), bucket.clone());
    let export = service
        .create_export(
            actor,
            CreateExportRequest {
                include_file_data: true,
                ..request(ExportType::FullDatabase)
            },
        )
        .await
        .unwrap();
    service.process_export(export.id).await.unwrap();

    let done = service.get(actor, export.id).await.unwrap();
    assert_eq!(
        (done.location_count, done.area_count, done.commodity_count, done.manual_count),
        (1, 1, 1, 1)
    );
    assert_eq!(done.binary_data_size, 15);

    let xml = read_blob(bucket.as_ref(), done.file_path.as_deref().unwrap()).await;
    assert!(xml.contains("<manuals>"));
    assert!(xml.contains("<data>"));
}

#[tokio::test]
async fn selected_items_skip_unresolvable_ids() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let stranger = new_actor(&db).await;
    let mine = seed_inventory(&db, actor, "mine").await;
    let theirs = seed_inventory(&db, stranger, "theirs").await;

    let service = ExportService::new(db.clone(), bucket);
    let export = service
        .create_export(
            actor,
            CreateExportRequest {
                selected_items: vec![
                    SelectedItem { id: mine.commodity.id, kind: SelectedItemKind::Commodity },
                    SelectedItem { id: mine.area.id, kind: SelectedItemKind::Area },
                    SelectedItem { id: theirs.location.id, kind: SelectedItemKind::Location },
                    SelectedItem { id: Uuid::new_v4(), kind: SelectedItemKind::Area },
                ],
                ..request(ExportType::SelectedItems)
            },
        )
        .await
        .unwrap();
    service.process_export(export.id).await.unwrap();

    let done = service.get(actor, export.id).await.unwrap();
    assert_eq!(done.status, ExportStatus::Completed);
    assert_eq!(
        (done.location_count, done.area_count, done.commodity_count),
        (0, 1, 1)
    );
}

#[tokio::test]
async fn full_export_streams_every_page() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let names = ["north", "south", "east", "west", "loft"];
    for name in names {
        seed_inventory(&db, actor, name).await;
    }
    for n in 0..3 {
        Registries::for_user(db.clone(), actor)
            .files()
            .create(NewFile {
                title: format!("loose-{n}"),
                original_path: format!("loose-{n}.png"),
                blob_key: format!("files/{}/loose-{n}", actor.user_id),
                mime_type: "image/png".to_string(),
                size_bytes: 0,
                category: FileCategory::Images,
                link: None,
            })
            .await
            .unwrap();
    }

    let service = ExportService::new(db.clone(), bucket.clone()).with_page_size(2);
    let export = service
        .create_export(actor, request(ExportType::FullDatabase))
        .await
        .unwrap();
    service.process_export(export.id).await.unwrap();

    let done = service.get(actor, export.id).await.unwrap();
    assert_eq!(done.status, ExportStatus::Completed);
    assert_eq!(
        (done.location_count, done.area_count, done.commodity_count, done.image_count),
        (5, 5, 5, 3)
    );

    let xml = read_blob(bucket.as_ref(), done.file_path.as_deref().unwrap()).await;
    for name in names {
        assert_eq!(xml.matches(&format!("{name} house")).count(), 1, "{name}");
    }
    for n in 0..3 {
        assert!(xml.contains(&format!("loose-{n}")));
    }
}

#[tokio::test]
async fn processing_runs_on_a_spawned_task() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let mine = seed_inventory(&db, actor, "spawned").await;

    let service = ExportService::new(db.clone(), bucket);
    let full = service
        .create_export(actor, request(ExportType::FullDatabase))
        .await
        .unwrap();
    let selected = service
        .create_export(
            actor,
            CreateExportRequest {
                selected_items: vec![SelectedItem {
                    id: mine.location.id,
                    kind: SelectedItemKind::Location,
                }],
                ..request(ExportType::SelectedItems)
            },
        )
        .await
        .unwrap();

    for id in [full.id, selected.id] {
        let worker = service.clone();
        tokio::spawn(async move { worker.process_export(id).await })
            .await
            .unwrap()
            .unwrap();
        let done = service.get(actor, id).await.unwrap();
        assert_eq!(done.status, ExportStatus::Completed);
        assert_eq!(done.location_count, 1);
    }
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let db = setup_db().await;
    let actor = new_actor(&db).await;
    let service = ExportService::new(db, Arc::new(MemoryBucket::new()));

    for bad in [
        request(ExportType::Imported),
        request(ExportType::SelectedItems),
        CreateExportRequest {
            selected_items: vec![SelectedItem { id: Uuid::new_v4(), kind: SelectedItemKind::Area }],
            ..request(ExportType::Locations)
        },
    ] {
        assert!(matches!(
            service.create_export(actor, bad).await,
            Err(ExportError::InvalidRequest(_))
        ));
    }
}

/// Memory bucket whose attribute lookups fail after the archive is written.
struct BrokenAttributes(MemoryBucket);

#[async_trait]
impl Bucket for BrokenAttributes {
    async fn writer(&self, key: &str) -> Result<BlobWriter, StorageError> {
        self.0.writer(key).await
    }
    async fn reader(&self, key: &str) -> Result<BlobReader, StorageError> {
        self.0.reader(key).await
    }
    async fn attributes(&self, _key: &str) -> Result<BlobAttributes, StorageError> {
        Err(StorageError::Io(std::io::Error::other("disk on fire")))
    }
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.0.exists(key).await
    }
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.0.delete(key).await
    }
}

#[tokio::test]
async fn failure_records_message_and_removes_partial_blob() {
    let db = setup_db().await;
    let inner = MemoryBucket::new();
    let bucket: Arc<dyn Bucket> = Arc::new(BrokenAttributes(inner.clone()));
    let actor = new_actor(&db).await;
    seed_inventory(&db, actor, "cellar").await;

    let service = ExportService::new(db.clone(), bucket);
    let export = service
        .create_export(actor, request(ExportType::Locations))
        .await
        .unwrap();

    assert!(service.process_export(export.id).await.is_err());

    let failed = service.get(actor, export.id).await.unwrap();
    assert_eq!(failed.status, ExportStatus::Failed);
    assert!(failed.error_message.unwrap().contains("disk on fire"));
    assert!(failed.file_path.is_none());

    assert!(inner.keys().is_empty());
}

/// Memory bucket that fails the job out from under the worker once the
/// archive has been written.
struct ReapingBucket {
    inner: MemoryBucket,
    db: DatabaseConnection,
    export_id: Mutex<Option<Uuid>>,
}

#[async_trait]
impl Bucket for ReapingBucket {
    async fn writer(&self, key: &str) -> Result<BlobWriter, StorageError> {
        self.inner.writer(key).await
    }
    async fn reader(&self, key: &str) -> Result<BlobReader, StorageError> {
        self.inner.reader(key).await
    }
    async fn attributes(&self, key: &str) -> Result<BlobAttributes, StorageError> {
        let export_id = *self.export_id.lock().unwrap();
        if let Some(id) = export_id {
            Registries::service(self.db.clone())
                .exports()
                .fail(id, "worker lease expired before completion")
                .await
                .unwrap();
        }
        self.inner.attributes(key).await
    }
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn reaped_job_discards_its_archive() {
    let db = setup_db().await;
    let inner = MemoryBucket::new();
    let reaping = Arc::new(ReapingBucket {
        inner: inner.clone(),
        db: db.clone(),
        export_id: Mutex::new(None),
    });
    let actor = new_actor(&db).await;
    seed_inventory(&db, actor, "shed").await;

    let service = ExportService::new(db.clone(), reaping.clone());
    let export = service
        .create_export(actor, request(ExportType::Locations))
        .await
        .unwrap();
    *reaping.export_id.lock().unwrap() = Some(export.id);

    assert!(matches!(
        service.process_export(export.id).await,
        Err(ExportError::InvalidState { .. })
    ));

    let failed = service.get(actor, export.id).await.unwrap();
    assert_eq!(failed.status, ExportStatus::Failed);
    assert!(failed.file_path.is_none());
    assert!(inner.keys().is_empty());

    let files = Registries::for_user(db.clone(), actor).files();
    assert!(files
        .list_linked(LinkedEntityKind::Export, export.id, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn soft_delete_requires_terminal_state() {
    let db = setup_db().await;
    let actor = new_actor(&db).await;
    let service = ExportService::new(db.clone(), Arc::new(MemoryBucket::new()));

    let export = service
        .create_export(actor, request(ExportType::Commodities))
        .await
        .unwrap();
    assert!(matches!(
        service.soft_delete(actor, export.id).await,
        Err(ExportError::InvalidState { .. })
    ));
    assert!(matches!(
        service.open_download(actor, export.id).await,
        Err(ExportError::InvalidState { .. })
    ));

    service.process_export(export.id).await.unwrap();
    let download = service.open_download(actor, export.id).await.unwrap();
    assert!(download.size > 0);
    assert!(download.file_name.starts_with("export_commodities_"));

    service.soft_delete(actor, export.id).await.unwrap();
    assert!(matches!(
        service.get(actor, export.id).await,
        Err(ExportError::NotFound(_))
    ));
    assert!(service.list_all().await.unwrap().is_empty());
}
