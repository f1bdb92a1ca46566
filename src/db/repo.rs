use super::model::{ChannelKind, Contributor};
use anyhow::Result;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

const REPO_KEY: &str = "repo";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ask SQLite to
/// create the file, and ensure the parent directory exists. In-memory URLs
/// pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{q}&mode=rwc"),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{expanded_path}?{query}")
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Subscribe a chat. Returns false if it was already subscribed.
#[instrument(skip_all)]
pub async fn add_channel(pool: &Pool, kind: ChannelKind, chat_id: i64) -> Result<bool> {
    let res = sqlx::query("INSERT OR IGNORE INTO channels (kind, chat_id) VALUES (?, ?)")
        .bind(kind.as_str())
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Unsubscribe a chat. Returns false if it was not subscribed.
#[instrument(skip_all)]
pub async fn remove_channel(pool: &Pool, kind: ChannelKind, chat_id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM channels WHERE kind = ? AND chat_id = ?")
        .bind(kind.as_str())
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Subscribed chats in subscription order.
#[instrument(skip_all)]
pub async fn list_channels(pool: &Pool, kind: ChannelKind) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT chat_id FROM channels WHERE kind = ? ORDER BY id")
        .bind(kind.as_str())
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

#[instrument(skip_all)]
pub async fn set_repo(pool: &Pool, repo: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(REPO_KEY)
    .bind(repo)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_repo(pool: &Pool) -> Result<Option<String>> {
    let repo = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
        .bind(REPO_KEY)
        .fetch_optional(pool)
        .await?;
    Ok(repo)
}

#[instrument(skip_all)]
pub async fn upsert_contributor(pool: &Pool, login: &str, chat_user_id: Option<i64>) -> Result<()> {
    sqlx::query(
        "INSERT INTO contributors (login, chat_user_id) VALUES (?, ?) \
         ON CONFLICT(login) DO UPDATE SET chat_user_id = excluded.chat_user_id",
    )
    .bind(login)
    .bind(chat_user_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_contributor(pool: &Pool, login: &str) -> Result<Option<Contributor>> {
    let row = sqlx::query_as::<_, Contributor>(
        "SELECT login, chat_user_id FROM contributors WHERE login = ?",
    )
    .bind(login)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Contributor logins in a stable order.
#[instrument(skip_all)]
pub async fn contributor_logins(pool: &Pool) -> Result<Vec<String>> {
    let logins = sqlx::query_scalar::<_, String>("SELECT login FROM contributors ORDER BY login")
        .fetch_all(pool)
        .await?;
    Ok(logins)
}
