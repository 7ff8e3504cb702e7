//! # Server Configuration
//!
//! Router assembly, shared state and the `serve` entry point that runs the
//! HTTP surface next to the worker pools.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::concurrency::{SlotManager, build_slot_manager};
use crate::config::AppConfig;
use crate::export::ExportService;
use crate::handlers;
use crate::import::ImportService;
use crate::restore::RestoreService;
use crate::storage::{Bucket, open_bucket};
use crate::telemetry::trace_context_middleware;
use crate::workers::Workers;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub bucket: Arc<dyn Bucket>,
    pub slots: Arc<dyn SlotManager>,
}

impl AppState {
    pub fn exports(&self) -> ExportService {
        ExportService::new(self.db.clone(), self.bucket.clone())
    }

    pub fn imports(&self) -> ImportService {
        ImportService::new(
            self.db.clone(),
            self.bucket.clone(),
            self.config.max_upload_bytes,
        )
    }

    pub fn restores(&self) -> RestoreService {
        RestoreService::new(self.db.clone(), self.bucket.clone())
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/exports",
            post(handlers::exports::create_export).get(handlers::exports::list_exports),
        )
        .route(
            "/exports/{id}",
            get(handlers::exports::get_export).delete(handlers::exports::delete_export),
        )
        .route("/exports/{id}/download", get(handlers::exports::download_export))
        .route(
            "/exports/{id}/restores",
            post(handlers::restores::create_restore).get(handlers::restores::list_restores),
        )
        .route("/restores/{id}", get(handlers::restores::get_restore))
        .route("/imports", post(handlers::imports::upload_archive))
        .route(
            "/concurrency/{operation}",
            get(handlers::concurrency::slot_status),
        )
        .route("/admin/exports", get(handlers::admin::list_all_exports))
        .route(
            "/admin/tenants",
            post(handlers::admin::create_tenant).get(handlers::admin::list_tenants),
        )
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Runs the HTTP server and the worker pools until Ctrl-C.
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let bucket = open_bucket(&config.storage_location)
        .await
        .with_context(|| format!("failed to open storage at {}", config.storage_location))?;
    let slots = build_slot_manager(&config.concurrency, db.clone());

    let shutdown = CancellationToken::new();
    let workers = Workers::new(&config.workers, db.clone(), bucket.clone(), slots.clone());
    workers.start(&shutdown);

    let state = AppState {
        config: config.clone(),
        db,
        bucket,
        slots,
    };
    let app = create_app(state);

    let addr = config.bind_addr().context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, profile = %config.profile, "Server listening");

    let signal_token = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            signal_token.cancel();
        })
        .await;

    shutdown.cancel();
    workers.stop().await;
    info!("Server stopped");
    served.context("server error")
}

struct BearerAuthAddon;

impl Modify for BearerAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::exports::create_export,
        crate::handlers::exports::list_exports,
        crate::handlers::exports::get_export,
        crate::handlers::exports::delete_export,
        crate::handlers::exports::download_export,
        crate::handlers::restores::create_restore,
        crate::handlers::restores::list_restores,
        crate::handlers::restores::get_restore,
        crate::handlers::imports::upload_archive,
        crate::handlers::concurrency::slot_status,
        crate::handlers::admin::list_all_exports,
        crate::handlers::admin::create_tenant,
        crate::handlers::admin::list_tenants,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::export::CreateExportRequest,
            crate::restore::CreateRestoreRequest,
            crate::concurrency::SlotStatus,
            crate::handlers::types::HealthResponse,
            crate::handlers::types::CountsDto,
            crate::handlers::types::ExportResponse,
            crate::handlers::types::ExportListResponse,
            crate::handlers::types::RestoreResponse,
            crate::handlers::types::RestoreStepResponse,
            crate::handlers::types::RestoreListResponse,
            crate::handlers::types::TenantResponse,
            crate::handlers::types::TenantListResponse,
            crate::handlers::admin::CreateTenantRequest,
        )
    ),
    modifiers(&BearerAuthAddon),
    info(
        title = "Stockpile API",
        description = "Inventory export, import and restore pipeline",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
