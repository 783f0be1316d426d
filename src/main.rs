use anyhow::Result;
use clap::Parser;
use myth_forge::{
    config::{
        Config, StorageBackend, DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_ANTHROPIC_MODEL,
        DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL,
    },
    server::run_server,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "myth-forge")]
#[command(about = "Turns short moments into illustrated mythic chapters for a child")]
struct Args {
    /// Database file path
    #[arg(long, env = "MYTH_FORGE_DATABASE_PATH", default_value = "./.myth-forge/myth-forge.db")]
    database_path: String,

    /// Server host
    #[arg(long, env = "MYTH_FORGE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, env = "MYTH_FORGE_PORT", default_value = "3000")]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Anthropic API key for myth text generation
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    /// Anthropic model used for myth text
    #[arg(long, env = "ANTHROPIC_MODEL", default_value = DEFAULT_ANTHROPIC_MODEL)]
    anthropic_model: String,

    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = DEFAULT_ANTHROPIC_BASE_URL)]
    anthropic_base_url: String,

    /// Google API key for Gemini images; placeholders are used without it
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    google_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    gemini_base_url: String,

    /// Object storage for generated images (local, firebase)
    #[arg(long, env = "MYTH_FORGE_STORAGE", default_value_t = StorageBackend::Local)]
    storage: StorageBackend,

    /// Directory for locally stored images, served at /media
    #[arg(long, env = "MYTH_FORGE_MEDIA_DIR", default_value = "./.myth-forge/media")]
    media_dir: String,

    /// Public base URL used to build links to local media
    #[arg(long, env = "MYTH_FORGE_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Firebase Storage bucket name
    #[arg(long, env = "FIREBASE_STORAGE_BUCKET")]
    storage_bucket: Option<String>,

    /// OAuth access token for bucket uploads
    #[arg(long, env = "FIREBASE_STORAGE_ACCESS_TOKEN", hide_env_values = true)]
    storage_access_token: Option<String>,

    /// Shared secret for HS256 identity tokens
    #[arg(long, env = "MYTH_FORGE_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// RS256 public key (PEM text or path) for identity tokens
    #[arg(long, env = "MYTH_FORGE_JWT_PUBLIC_KEY_PEM")]
    jwt_public_key_pem: Option<String>,

    #[arg(long, env = "MYTH_FORGE_JWT_ISSUER")]
    jwt_issuer: Option<String>,

    #[arg(long, env = "MYTH_FORGE_JWT_AUDIENCE")]
    jwt_audience: Option<String>,

    /// Timeout for outbound provider and storage requests in seconds
    #[arg(long, env = "MYTH_FORGE_HTTP_TIMEOUT_SECS", default_value = "120")]
    http_timeout_secs: u64,

    /// Attempts per generation step (1 disables retry)
    #[arg(long, env = "MYTH_FORGE_GENERATION_MAX_ATTEMPTS", default_value = "1")]
    generation_max_attempts: u32,

    #[arg(long, env = "MYTH_FORGE_RETRY_BASE_DELAY_MS", default_value = "500")]
    retry_base_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing with both console and file logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let logs_dir = std::path::Path::new(".myth-forge/logs");
    std::fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter.clone()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter),
        )
        .init();

    info!("Starting Myth Forge");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", args.database_path);
    info!("Server: {}:{}", args.host, args.port);
    info!("Storage: {}", args.storage);
    info!("Generation attempts per step: {}", args.generation_max_attempts);

    let config = Config {
        database_path: args.database_path,
        host: args.host,
        port: args.port,
        anthropic_api_key: args.anthropic_api_key,
        anthropic_model: args.anthropic_model,
        anthropic_base_url: args.anthropic_base_url,
        google_api_key: args.google_api_key.filter(|k| !k.trim().is_empty()),
        gemini_model: args.gemini_model,
        gemini_base_url: args.gemini_base_url,
        storage: args.storage,
        media_dir: args.media_dir,
        public_base_url: args.public_base_url,
        storage_bucket: args.storage_bucket,
        storage_access_token: args.storage_access_token,
        jwt_secret: args.jwt_secret,
        jwt_public_key_pem: args.jwt_public_key_pem,
        jwt_issuer: args.jwt_issuer,
        jwt_audience: args.jwt_audience,
        http_timeout_secs: args.http_timeout_secs,
        generation_max_attempts: args.generation_max_attempts,
        retry_base_delay_ms: args.retry_base_delay_ms,
    };

    run_server(config).await?;

    Ok(())
}
