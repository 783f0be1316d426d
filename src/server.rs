use anyhow::{bail, Context};
use axum::{
    extract::{DefaultBodyLimit, FromRef, State},
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    api::create_api_router,
    auth::{IdentityVerifier, JwtIdentityVerifier},
    config::{Config, StorageBackend},
    database::{chapters::Chapter, close_pool, DbPool},
    error::Result,
    forge::ChapterForge,
    generation::{
        avatar::GeminiAvatarGenerator,
        gemini::GeminiClient,
        image::GeminiImageGenerator,
        placeholder::PlaceholderImageGenerator,
        storage::{FirebaseObjectStore, LocalObjectStore, ObjectStore},
        text::AnthropicTextGenerator,
        AvatarGenerator, ImageGenerator, TextGenerator,
    },
};

/// Photos for avatar generation arrive base64-encoded in JSON bodies
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub forge: Arc<ChapterForge>,
    pub avatars: Option<Arc<dyn AvatarGenerator>>,
    pub identity: Arc<dyn IdentityVerifier>,
}

impl FromRef<AppState> for Arc<dyn IdentityVerifier> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.identity)
    }
}

/// Construct the identity verifier from the configured key material
pub fn build_identity_verifier(config: &Config) -> anyhow::Result<Arc<dyn IdentityVerifier>> {
    let issuer = config.jwt_issuer.as_deref();
    let audience = config.jwt_audience.as_deref();

    if let Some(pem) = &config.jwt_public_key_pem {
        // Accept either the PEM text itself or a path to it
        let pem = if pem.trim_start().starts_with("-----BEGIN") {
            pem.clone()
        } else {
            std::fs::read_to_string(pem)
                .with_context(|| format!("Failed to read JWT public key from {}", pem))?
        };
        let verifier = JwtIdentityVerifier::from_rsa_pem(pem.as_bytes(), issuer, audience)?;
        return Ok(Arc::new(verifier));
    }

    if let Some(secret) = &config.jwt_secret {
        return Ok(Arc::new(JwtIdentityVerifier::from_secret(
            secret.as_bytes(),
            issuer,
            audience,
        )));
    }

    bail!("Either --jwt-secret or --jwt-public-key-pem must be configured")
}

fn build_object_store(config: &Config, http: reqwest::Client) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.storage {
        StorageBackend::Local => {
            std::fs::create_dir_all(&config.media_dir)
                .with_context(|| format!("Failed to create media directory {}", config.media_dir))?;
            Ok(Arc::new(LocalObjectStore::new(
                &config.media_dir,
                &config.public_base_url(),
            )))
        }
        StorageBackend::Firebase => {
            let bucket = config
                .storage_bucket
                .clone()
                .context("--storage-bucket is required for firebase storage")?;
            Ok(Arc::new(FirebaseObjectStore::new(
                http,
                bucket,
                config.storage_access_token.clone(),
            )))
        }
    }
}

/// Wire providers, storage and identity verification into the shared state
pub fn build_state(config: &Config, db: DbPool) -> anyhow::Result<AppState> {
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let anthropic_key = config
        .anthropic_api_key
        .clone()
        .context("--anthropic-api-key (ANTHROPIC_API_KEY) is required")?;

    let text: Arc<dyn TextGenerator> = Arc::new(AnthropicTextGenerator::new(
        http.clone(),
        anthropic_key,
        config.anthropic_model.clone(),
        config.anthropic_base_url.clone(),
    ));

    let (images, avatars): (Arc<dyn ImageGenerator>, Option<Arc<dyn AvatarGenerator>>) =
        match &config.google_api_key {
            Some(key) => {
                let store = build_object_store(config, http.clone())?;
                let gemini = GeminiClient::new(
                    http.clone(),
                    key.clone(),
                    config.gemini_model.clone(),
                    config.gemini_base_url.clone(),
                );
                info!(
                    "Image generation: {} via {} storage",
                    config.gemini_model, config.storage
                );
                (
                    Arc::new(GeminiImageGenerator::new(gemini.clone(), Arc::clone(&store))),
                    Some(Arc::new(GeminiAvatarGenerator::new(gemini, store))),
                )
            }
            None => {
                warn!("GOOGLE_API_KEY not configured, using placeholder images and disabling avatars");
                (Arc::new(PlaceholderImageGenerator), None)
            }
        };

    let forge = ChapterForge::new(db.clone(), text, images).with_retry(config.retry_policy());
    let identity = build_identity_verifier(config)?;

    Ok(AppState {
        db,
        forge: Arc::new(forge),
        avatars,
        identity,
    })
}

/// Routes and middleware, without the static media service
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health_check))
        .merge(create_api_router())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let db = crate::database::create_pool(&config.database_url()).await?;

    Chapter::fail_abandoned(&db).await?;

    let state = build_state(&config, db.clone())?;

    let mut app = build_router(state);
    if config.storage == StorageBackend::Local && config.google_api_key.is_some() {
        app = app.nest_service("/media", ServeDir::new(&config.media_dir));
        info!("Serving generated media from {}", config.media_dir);
    }

    let address = config.server_address();
    info!("Server listening on {}", address);

    let listener = tokio::net::TcpListener::bind(&address).await?;

    match axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => error!("Server error: {}", e),
    }

    // Background forges still running at this point are failed on next startup
    close_pool(db).await;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

async fn health_check(State(state): State<AppState>) -> Result<Json<Value>> {
    let db_version = match crate::database::schema::get_database_info(&state.db).await {
        Ok(version) => version,
        Err(e) => {
            error!("Database health check failed: {}", e);
            return Ok(Json(json!({
                "status": "unhealthy",
                "service": "myth-forge",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "error": "Database connection failed"
            })));
        }
    };

    Ok(Json(json!({
        "status": "healthy",
        "service": "myth-forge",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "database": {
            "version": db_version,
            "status": "connected"
        },
        "imageProvider": if state.avatars.is_some() { "gemini" } else { "placeholder" }
    })))
}
