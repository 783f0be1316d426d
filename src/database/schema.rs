use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use tracing::{debug, info};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations");

    create_children_table(pool).await?;
    create_chapters_table(pool).await?;
    create_indexes(pool).await?;

    info!("Database migrations completed successfully");
    Ok(())
}

async fn create_children_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating children table");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS children (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            birth_date TEXT,
            description TEXT,
            context TEXT,
            avatar_url TEXT,
            created_at INTEGER NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_chapters_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating chapters table");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            child_id TEXT NOT NULL,
            theme TEXT NOT NULL,
            seed_text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            myth_title TEXT NOT NULL DEFAULT '',
            myth_text TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]',
            image_url TEXT NOT NULL DEFAULT '',
            provider_meta TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'generating' CHECK (status IN ('generating', 'ready', 'failed')),
            visibility TEXT CHECK (visibility IS NULL OR visibility IN ('private', 'public'))
        )
    "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    debug!("Creating indexes");
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_children_user ON children (user_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chapters_owner_child ON chapters (user_id, child_id, created_at DESC, id DESC)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_database_info(pool: &SqlitePool) -> Result<String> {
    let row = sqlx::query("SELECT sqlite_version() as version")
        .fetch_one(pool)
        .await?;

    let version: String = row.get("version");
    Ok(version)
}
