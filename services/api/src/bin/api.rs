//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{build_auth, build_providers, InMemoryStore, PgDocumentStore},
    config::{Config, ConfigError, StoreBackend},
    error::ApiError,
    web::{router, ApiDoc, AppState, SessionRegistry},
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use mentorship_core::ports::EntityStore;
use mentorship_core::{Orchestrator, StoreClient, WorkflowSettings};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to the Document Store ---
    let store: Arc<dyn EntityStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let pg_store = PgDocumentStore::new(db_pool);
            info!("Running database migrations...");
            pg_store.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(pg_store)
        }
        StoreBackend::Memory => {
            info!("Using the in-memory document store; data is lost on restart.");
            Arc::new(InMemoryStore::new())
        }
    };
    let store = StoreClient::new(store);

    // --- 3. Initialize Provider Adapters ---
    let auth = build_auth(&config)?;
    let providers = build_providers(&config.providers);
    let settings = WorkflowSettings {
        app_base_url: config.app_base_url.clone(),
        invitation_ttl: chrono::Duration::days(config.invitation_ttl_days),
    };

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        orchestrator: Orchestrator::new(store.clone(), providers, settings),
        store,
        auth,
        sessions: SessionRegistry::default(),
    });

    // --- 5. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string())
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
