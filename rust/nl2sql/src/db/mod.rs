//! One-shot database access: schema reflection and query execution.
//!
//! Every call opens its own connection from the request's connection string and drops it when
//! done. Nothing is pooled or cached between requests.

mod pg_value;
mod postgres;
mod sqlite;
mod tls;

use crate::{config::DatabaseConfig, schema::Schema};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{future::Future, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::debug;

/// Column-keyed row as returned to the client.
pub type Record = Map<String, Value>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("unsupported database url scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid database url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to configure TLS: {0}")]
    Tls(String),

    #[error("database operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("database worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

/// Where a connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    Postgres(String),
    Sqlite(SqliteTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    Memory,
    File(PathBuf),
}

impl DatabaseUrl {
    /// Accepts `postgres://`, `postgresql://`, `postgresql+<driver>://` and the
    /// `sqlite://` forms (`sqlite:///relative.db`, `sqlite:////abs/path.db`, `sqlite://`).
    pub fn parse(raw: &str) -> Result<Self, DbError> {
        let raw = raw.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| DbError::InvalidUrl("missing '://' separator".into()))?;
        let backend = scheme
            .split_once('+')
            .map_or(scheme, |(backend, _driver)| backend)
            .to_ascii_lowercase();

        match backend.as_str() {
            "postgres" | "postgresql" => Ok(DatabaseUrl::Postgres(format!("postgresql://{rest}"))),
            "sqlite" => {
                let path = rest.split_once('?').map_or(rest, |(path, _)| path);
                if path.is_empty() {
                    return Ok(DatabaseUrl::Sqlite(SqliteTarget::Memory));
                }
                let path = path.strip_prefix('/').ok_or_else(|| {
                    DbError::InvalidUrl("sqlite urls take the form sqlite:///<path>".into())
                })?;
                if path.is_empty() || path == ":memory:" {
                    Ok(DatabaseUrl::Sqlite(SqliteTarget::Memory))
                } else {
                    Ok(DatabaseUrl::Sqlite(SqliteTarget::File(PathBuf::from(path))))
                }
            }
            _ => Err(DbError::UnsupportedScheme(scheme.to_string())),
        }
    }
}

/// Collapses every whitespace run (newlines and tabs included) into a single space.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub async fn reflect_schema(db_url: &str, config: &DatabaseConfig) -> Result<Schema, DbError> {
    let schema = match DatabaseUrl::parse(db_url)? {
        DatabaseUrl::Postgres(url) => {
            with_timeout(config.timeout, async {
                let client = postgres::connect(&url, config).await?;
                postgres::reflect(&client).await
            })
            .await?
        }
        DatabaseUrl::Sqlite(target) => sqlite::run(target, config.timeout, sqlite::reflect).await?,
    };

    debug!(tables = schema.table_count(), "reflected database schema");
    Ok(schema)
}

/// Runs `sql` verbatim after whitespace normalization.
pub async fn execute_query(
    db_url: &str,
    sql: &str,
    config: &DatabaseConfig,
) -> Result<QueryResult, DbError> {
    let sql = normalize_sql(sql);
    let result = match DatabaseUrl::parse(db_url)? {
        DatabaseUrl::Postgres(url) => {
            with_timeout(config.timeout, async {
                let client = postgres::connect(&url, config).await?;
                postgres::execute(&client, &sql).await
            })
            .await?
        }
        DatabaseUrl::Sqlite(target) => {
            sqlite::run(target, config.timeout, move |conn| sqlite::execute(conn, &sql)).await?
        }
    };

    debug!(
        columns = result.columns.len(),
        rows = result.rows.len(),
        "executed query"
    );
    Ok(result)
}

/// Postgres work is async end to end, so dropping the future on expiry also drops the connection.
async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, DbError>
where
    F: Future<Output = Result<T, DbError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| DbError::Timeout(timeout))?
}
