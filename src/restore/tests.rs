use super::*;
use crate::archive::{ArchiveWriter, FileLink, Section};
use crate::import::ImportService;
use crate::models::restore_step::StepResult;
use crate::security::{AttemptLogger, RegistryOwnershipLookup, UnauthorizedAttempt};
use crate::storage::MemoryBucket;
use crate::testing::{new_actor, seed_inventory, setup_db};
use std::sync::Mutex;
use tokio::io::AsyncReadExt;

#[derive(Default)]
struct RecordingLogger {
    attempts: Mutex<Vec<UnauthorizedAttempt>>,
}

impl AttemptLogger for RecordingLogger {
    fn log(&self, attempt: &UnauthorizedAttempt) {
        self.attempts.lock().unwrap().push(attempt.clone());
    }
}

#[derive(Default)]
struct Contents {
    locations: Vec<LocationRecord>,
    areas: Vec<AreaRecord>,
    commodities: Vec<CommodityRecord>,
    files: Vec<FileRecord>,
}

async fn archive_bytes(contents: &Contents) -> Vec<u8> {
    let mut writer = ArchiveWriter::start(Vec::new(), "full_database", Utc::now())
        .await
        .unwrap();
    writer.begin_section(Section::Locations).await.unwrap();
    for location in &contents.locations {
        writer.write_location(location).await.unwrap();
    }
    writer.end_section(Section::Locations).await.unwrap();
    writer.begin_section(Section::Areas).await.unwrap();
    for area in &contents.areas {
        writer.write_area(area).await.unwrap();
    }
    writer.end_section(Section::Areas).await.unwrap();
    writer.begin_section(Section::Commodities).await.unwrap();
    for commodity in &contents.commodities {
        writer.write_commodity(commodity).await.unwrap();
    }
    writer.end_section(Section::Commodities).await.unwrap();
    if !contents.files.is_empty() {
        writer.begin_section(Section::Files).await.unwrap();
        for file in &contents.files {
            writer.write_file(file).await.unwrap();
        }
        writer.end_section(Section::Files).await.unwrap();
    }
    let (bytes, _) = writer.finish().await.unwrap();
    bytes
}

/// Uploads and validates an archive so it can be restored.
async fn stage(
    db: &DatabaseConnection,
    bucket: &Arc<dyn Bucket>,
    actor: ActingUser,
    contents: &Contents,
) -> Uuid {
    let bytes = archive_bytes(contents).await;
    let imports = ImportService::new(db.clone(), bucket.clone(), 1024 * 1024);
    let body = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(bytes)]);
    let export = imports.store_upload(actor, body, None).await.unwrap();
    imports.process_import(export.id).await.unwrap();
    export.id
}

fn location(name: &str) -> LocationRecord {
    LocationRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        address: format!("{name} avenue"),
    }
}

fn area(location: &LocationRecord, name: &str) -> AreaRecord {
    AreaRecord {
        id: Uuid::new_v4(),
        location_id: location.id,
        name: name.to_string(),
    }
}

fn commodity(area: &AreaRecord, name: &str, files: Vec<FileRecord>) -> CommodityRecord {
    CommodityRecord {
        id: Uuid::new_v4(),
        area_id: area.id,
        name: name.to_string(),
        short_name: name.to_string(),
        commodity_type: "electronics".to_string(),
        count: 1,
        status: "in_use".to_string(),
        original_price: Some(99.5),
        original_price_currency: Some("EUR".to_string()),
        serial_number: None,
        comments: None,
        draft: false,
        files,
    }
}

fn image(title: &str, link: Option<(&str, Uuid)>) -> FileRecord {
    FileRecord {
        id: Uuid::new_v4(),
        kind: "image".to_string(),
        link: link.map(|(entity_type, entity_id)| FileLink {
            entity_type: entity_type.to_string(),
            entity_id,
        }),
        title: title.to_string(),
        original_path: format!("{title}.png"),
        mime_type: "image/png".to_string(),
        data: Some(title.as_bytes().to_vec()),
    }
}

fn with_data(strategy: RestoreStrategy) -> CreateRestoreRequest {
    CreateRestoreRequest {
        description: Some("restore".to_string()),
        options: RestoreOptions {
            strategy,
            include_file_data: true,
            dry_run: false,
        },
    }
}

fn results(steps: &[RestoreStepModel]) -> Vec<StepResult> {
    steps.iter().map(|step| step.result).collect()
}

#[tokio::test]
async fn merge_add_recreates_inventory_under_fresh_ids() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;

    let home = location("home");
    let kitchen = area(&home, "kitchen");
    let kettle = commodity(&kitchen, "kettle", vec![image("kettle-front", None)]);
    let kettle_id = kettle.id;
    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            locations: vec![home.clone()],
            areas: vec![kitchen],
            commodities: vec![kettle],
            ..Default::default()
        },
    )
    .await;

    let service = RestoreService::new(db.clone(), bucket.clone());
    let operation = service
        .create_restore(actor, export_id, with_data(RestoreStrategy::MergeAdd))
        .await
        .unwrap();
    service.process_restore(operation.id).await.unwrap();

    let (done, steps) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(done.status, RestoreStatus::Completed);
    assert_eq!(done.location_count, 1);
    assert_eq!(done.area_count, 1);
    assert_eq!(done.commodity_count, 1);
    assert_eq!(done.image_count, 1);
    assert_eq!(done.binary_data_size, "kettle-front".len() as i64);
    assert_eq!(done.error_count, 0);
    assert_eq!(results(&steps), vec![StepResult::Done; 4]);
    let positions: Vec<i32> = steps.iter().map(|step| step.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);

    let registries = Registries::for_user(db.clone(), actor);
    let locations = registries.locations().list().await.unwrap();
    assert_eq!(locations.len(), 1);
    assert_ne!(locations[0].id, home.id);
    assert_eq!(locations[0].name, "home");

    let commodities = registries.commodities().list().await.unwrap();
    assert_eq!(commodities.len(), 1);
    assert_ne!(commodities[0].id, kettle_id);
    let images = registries
        .files()
        .list_linked(LinkedEntityKind::Commodity, commodities[0].id, Some(FileCategory::Images))
        .await
        .unwrap();
    assert_eq!(images.len(), 1);
    let mut stored = Vec::new();
    bucket
        .reader(&images[0].blob_key)
        .await
        .unwrap()
        .read_to_end(&mut stored)
        .await
        .unwrap();
    assert_eq!(stored, b"kettle-front");
}

#[tokio::test]
async fn merge_add_skips_records_that_already_exist() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let existing = seed_inventory(&db, actor, "alpha").await;

    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            locations: vec![LocationRecord::from(&existing.location)],
            areas: vec![AreaRecord::from(&existing.area)],
            commodities: vec![CommodityRecord::from_model(
                &existing.commodity,
                vec![image("ignored", None)],
            )],
            ..Default::default()
        },
    )
    .await;

    let service = RestoreService::new(db.clone(), bucket);
    let operation = service
        .create_restore(actor, export_id, with_data(RestoreStrategy::MergeAdd))
        .await
        .unwrap();
    service.process_restore(operation.id).await.unwrap();

    let (done, steps) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(done.status, RestoreStatus::Completed);
    assert_eq!(done.location_count, 0);
    assert_eq!(done.commodity_count, 0);
    assert_eq!(done.image_count, 0);
    assert_eq!(results(&steps), vec![StepResult::Skipped; 3]);

    let registries = Registries::for_user(db.clone(), actor);
    assert_eq!(registries.locations().list().await.unwrap().len(), 1);
    assert!(registries.files().list_orphaned().await.unwrap().is_empty());
}

#[tokio::test]
async fn merge_update_overwrites_existing_records() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let existing = seed_inventory(&db, actor, "alpha").await;

    let mut renamed = LocationRecord::from(&existing.location);
    renamed.name = "renamed house".to_string();
    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            locations: vec![renamed],
            ..Default::default()
        },
    )
    .await;

    let service = RestoreService::new(db.clone(), bucket);
    let operation = service
        .create_restore(actor, export_id, with_data(RestoreStrategy::MergeUpdate))
        .await
        .unwrap();
    service.process_restore(operation.id).await.unwrap();

    let location = Registries::for_user(db.clone(), actor)
        .locations()
        .get(existing.location.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(location.name, "renamed house");
    let (done, _) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(done.location_count, 1);
}

#[tokio::test]
async fn full_replace_clears_inventory_first() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let stranger = new_actor(&db).await;
    seed_inventory(&db, actor, "old").await;
    seed_inventory(&db, stranger, "other").await;

    let fresh = location("fresh");
    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            locations: vec![fresh],
            ..Default::default()
        },
    )
    .await;

    let service = RestoreService::new(db.clone(), bucket);
    let operation = service
        .create_restore(actor, export_id, with_data(RestoreStrategy::FullReplace))
        .await
        .unwrap();
    service.process_restore(operation.id).await.unwrap();

    let (_, steps) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(steps[0].name, "Clear existing inventory");
    assert_eq!(results(&steps), vec![StepResult::Done; 2]);

    let registries = Registries::for_user(db.clone(), actor);
    let names: Vec<String> = registries
        .locations()
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|location| location.name)
        .collect();
    assert_eq!(names, vec!["fresh".to_string()]);
    assert!(registries.commodities().list().await.unwrap().is_empty());

    let untouched = Registries::for_user(db.clone(), stranger);
    assert_eq!(untouched.commodities().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn foreign_link_fails_one_step_and_the_rest_completes() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let stranger = new_actor(&db).await;
    let foreign = seed_inventory(&db, stranger, "gamma").await;

    let home = location("home");
    let office = area(&home, "office");
    let desk = commodity(&office, "desk", Vec::new());
    let mut files: Vec<FileRecord> = (0..6)
        .map(|n| image(&format!("desk-{n}"), Some(("commodity", desk.id))))
        .collect();
    files.push(image("stolen", Some(("commodity", foreign.commodity.id))));
    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            locations: vec![home],
            areas: vec![office],
            commodities: vec![desk],
            files,
        },
    )
    .await;

    let logger = Arc::new(RecordingLogger::default());
    let validator = SecurityValidator::with_parts(
        Arc::new(RegistryOwnershipLookup::new(db.clone())),
        logger.clone(),
    );
    let service = RestoreService::new(db.clone(), bucket).with_validator(validator);
    let operation = service
        .create_restore(actor, export_id, with_data(RestoreStrategy::MergeAdd))
        .await
        .unwrap();
    service.process_restore(operation.id).await.unwrap();

    let (done, steps) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(done.status, RestoreStatus::Completed);
    assert_eq!(done.error_count, 1);
    assert_eq!(done.image_count, 6);
    assert_eq!(steps.len(), 10);
    assert_eq!(
        steps.iter().filter(|s| s.result == StepResult::Done).count(),
        9
    );
    let failed = steps.last().unwrap();
    assert_eq!(failed.result, StepResult::Failed);
    assert_eq!(
        failed.detail.as_deref(),
        Some("entity not found or access denied")
    );

    let attempts = logger.attempts.lock().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].target_id, foreign.commodity.id);
    assert_eq!(attempts[0].user_id, actor.user_id);

    let stranger_files = Registries::for_user(db.clone(), stranger)
        .files()
        .list_linked(LinkedEntityKind::Commodity, foreign.commodity.id, None)
        .await
        .unwrap();
    assert!(stranger_files.is_empty());
}

#[tokio::test]
async fn file_cannot_attach_to_a_location_posing_as_a_commodity() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let existing = seed_inventory(&db, actor, "delta").await;

    let home = location("home");
    let files = vec![
        image("misfiled", Some(("commodity", existing.location.id))),
        image("also-misfiled", Some(("commodity", home.id))),
    ];
    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            locations: vec![home],
            files,
            ..Default::default()
        },
    )
    .await;

    let logger = Arc::new(RecordingLogger::default());
    let validator = SecurityValidator::with_parts(
        Arc::new(RegistryOwnershipLookup::new(db.clone())),
        logger.clone(),
    );
    let service = RestoreService::new(db.clone(), bucket).with_validator(validator);
    let operation = service
        .create_restore(actor, export_id, with_data(RestoreStrategy::MergeAdd))
        .await
        .unwrap();
    service.process_restore(operation.id).await.unwrap();

    let (done, steps) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(done.status, RestoreStatus::Completed);
    assert_eq!(done.error_count, 2);
    assert_eq!(done.image_count, 0);
    assert_eq!(
        results(&steps),
        vec![StepResult::Done, StepResult::Failed, StepResult::Failed]
    );
    assert_eq!(
        steps[1].detail.as_deref(),
        Some("a image cannot be linked to a location")
    );
    assert_eq!(logger.attempts.lock().unwrap().len(), 2);

    let registries = Registries::for_user(db.clone(), actor);
    let on_location = registries
        .files()
        .list_linked(LinkedEntityKind::Location, existing.location.id, None)
        .await
        .unwrap();
    let on_commodity = registries
        .files()
        .list_linked(LinkedEntityKind::Commodity, existing.location.id, None)
        .await
        .unwrap();
    assert!(on_location.is_empty());
    assert!(on_commodity.is_empty());
    assert!(registries.files().list_orphaned().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_link_target_stores_file_unlinked() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;

    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            files: vec![image("lost", Some(("commodity", Uuid::new_v4())))],
            ..Default::default()
        },
    )
    .await;

    let service = RestoreService::new(db.clone(), bucket);
    let operation = service
        .create_restore(actor, export_id, with_data(RestoreStrategy::MergeAdd))
        .await
        .unwrap();
    service.process_restore(operation.id).await.unwrap();

    let (done, steps) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(results(&steps), vec![StepResult::Skipped]);
    assert_eq!(done.error_count, 0);
    let orphans = Registries::for_user(db.clone(), actor)
        .files()
        .list_orphaned()
        .await
        .unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].title, "lost");
}

#[tokio::test]
async fn dry_run_counts_without_writing() {
    let db = setup_db().await;
    let memory = MemoryBucket::new();
    let bucket: Arc<dyn Bucket> = Arc::new(memory.clone());
    let actor = new_actor(&db).await;
    seed_inventory(&db, actor, "kept").await;

    let home = location("home");
    let hall = area(&home, "hall");
    let coat = commodity(&hall, "coat", vec![image("coat", None)]);
    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            locations: vec![home],
            areas: vec![hall],
            commodities: vec![coat],
            ..Default::default()
        },
    )
    .await;
    let blobs_before = memory.keys();

    let service = RestoreService::new(db.clone(), bucket);
    let mut request = with_data(RestoreStrategy::FullReplace);
    request.options.dry_run = true;
    let operation = service.create_restore(actor, export_id, request).await.unwrap();
    service.process_restore(operation.id).await.unwrap();

    let (done, steps) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(done.status, RestoreStatus::Completed);
    assert_eq!(done.location_count, 1);
    assert_eq!(done.commodity_count, 1);
    assert_eq!(done.image_count, 1);
    assert_eq!(results(&steps), vec![StepResult::Done; 4]);

    let registries = Registries::for_user(db.clone(), actor);
    let names: Vec<String> = registries
        .locations()
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|location| location.name)
        .collect();
    assert_eq!(names, vec!["kept house".to_string()]);
    assert_eq!(memory.keys(), blobs_before);
}

#[tokio::test]
async fn file_data_is_skipped_unless_requested() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;

    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            files: vec![image("loose", None)],
            ..Default::default()
        },
    )
    .await;

    let service = RestoreService::new(db.clone(), bucket);
    let operation = service
        .create_restore(actor, export_id, CreateRestoreRequest::default())
        .await
        .unwrap();
    service.process_restore(operation.id).await.unwrap();

    let (done, steps) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(results(&steps), vec![StepResult::Skipped]);
    assert_eq!(steps[0].detail.as_deref(), Some("file data not included"));
    assert_eq!(done.image_count, 0);
}

#[tokio::test]
async fn missing_archive_blob_fails_before_any_step() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let export_id = stage(
        &db,
        &bucket,
        actor,
        &Contents {
            locations: vec![location("home")],
            ..Default::default()
        },
    )
    .await;

    let service = RestoreService::new(db.clone(), bucket.clone());
    let operation = service
        .create_restore(actor, export_id, CreateRestoreRequest::default())
        .await
        .unwrap();

    let key = Registries::for_user(db.clone(), actor)
        .exports()
        .get(export_id)
        .await
        .unwrap()
        .unwrap()
        .file_path
        .unwrap();
    bucket.delete(&key).await.unwrap();

    let result = service.process_restore(operation.id).await;
    assert!(matches!(result, Err(RestoreError::Storage(StorageError::NotFound(_)))));

    let (failed, steps) = service.get_restore(actor, operation.id).await.unwrap();
    assert_eq!(failed.status, RestoreStatus::Failed);
    assert!(failed.error_message.is_some());
    assert!(steps.is_empty());

    let again = service.process_restore(operation.id).await;
    assert!(matches!(again, Err(RestoreError::InvalidState { .. })));
}

#[tokio::test]
async fn create_restore_requires_a_visible_completed_export() {
    let db = setup_db().await;
    let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
    let actor = new_actor(&db).await;
    let stranger = new_actor(&db).await;
    let export_id = stage(&db, &bucket, actor, &Contents::default()).await;
    let service = RestoreService::new(db.clone(), bucket.clone());

    let hidden = service
        .create_restore(stranger, export_id, CreateRestoreRequest::default())
        .await;
    assert!(matches!(hidden, Err(RestoreError::NotFound(id)) if id == export_id));

    let imports = ImportService::new(db.clone(), bucket, 1024);
    let pending = imports
        .store_upload(
            actor,
            futures_util::stream::iter(vec![Ok::<_, std::io::Error>(b"<inventory/>".to_vec())]),
            None,
        )
        .await
        .unwrap();
    let not_ready = service
        .create_restore(actor, pending.id, CreateRestoreRequest::default())
        .await;
    assert!(matches!(not_ready, Err(RestoreError::ExportNotRestorable(_))));

    let listed = service.list_restores(stranger, export_id).await;
    assert!(matches!(listed, Err(RestoreError::NotFound(_))));
}
