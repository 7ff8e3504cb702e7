//! Test utilities for integration tests.
//!
//! In-memory SQLite with migrations applied, an in-memory bucket and slot
//! manager, and request helpers for driving the router with `oneshot`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, request::Builder};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;
use stockpile::concurrency::{InMemorySlotManager, SlotManager, SlotPolicy};
use stockpile::config::{AppConfig, WorkerPoolConfig};
use stockpile::repositories::{ActingUser, TenantRepository};
use stockpile::server::{AppState, create_app};
use stockpile::storage::{Bucket, MemoryBucket};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_TOKEN: &str = "test-operator-token";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Creates a tenant and returns its id.
pub async fn create_test_tenant(db: &DatabaseConnection, tenant_id: Option<Uuid>) -> Result<Uuid> {
    let tenant = TenantRepository::new(db)
        .create_tenant(tenant_id, Some("Test Tenant".to_string()))
        .await?;
    Ok(tenant.id)
}

/// A fresh user inside a fresh tenant.
pub async fn create_test_user(db: &DatabaseConnection) -> Result<ActingUser> {
    let tenant_id = create_test_tenant(db, None).await?;
    Ok(ActingUser::new(tenant_id, Uuid::new_v4()))
}

fn fast_pool(max_concurrency: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        max_concurrency,
        poll_interval_ms: 10,
        max_poll_interval_ms: 50,
        lease_seconds: 60,
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        operator_tokens: vec![TEST_TOKEN.to_string()],
        storage_location: "mem://".to_string(),
        max_upload_bytes: 1024 * 1024,
        ..AppConfig::default()
    };
    config.workers.export = fast_pool(1);
    config.workers.import = fast_pool(1);
    config.workers.restore = fast_pool(1);
    config
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let config = test_config();
        let slots: Arc<dyn SlotManager> =
            Arc::new(InMemorySlotManager::new(SlotPolicy::from_config(&config.concurrency)));
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
        let state = AppState {
            config: Arc::new(config),
            db: setup_test_db().await?,
            bucket,
            slots,
        };
        Ok(Self {
            router: create_app(state.clone()),
            state,
        })
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Request builder carrying the operator token and the acting user headers.
pub fn user_request(method: &str, uri: &str, actor: ActingUser) -> Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {TEST_TOKEN}"))
        .header("X-Tenant-Id", actor.tenant_id.to_string())
        .header("X-User-Id", actor.user_id.to_string())
}

pub fn json_request(method: &str, uri: &str, actor: ActingUser, body: Value) -> Request<Body> {
    user_request(method, uri, actor)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Polls `uri` until its `status` field equals `expected`.
pub async fn wait_for_status(app: &TestApp, uri: &str, actor: ActingUser, expected: &str) -> Value {
    for _ in 0..400 {
        let response = app
            .send(user_request("GET", uri, actor).body(Body::empty()).unwrap())
            .await;
        let body = body_json(response).await;
        if body["status"] == expected {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{uri} never reached status {expected}");
}
