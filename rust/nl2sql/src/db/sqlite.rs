use super::{DbError, QueryResult, Record, SqliteTarget};
use crate::schema::{Schema, TableSchema};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rusqlite::{types::ValueRef, Connection, InterruptHandle, OpenFlags};
use serde_json::{Number, Value};
use std::{collections::BTreeMap, time::Duration};
use tokio::sync::oneshot;

const TABLES_SQL: &str = "\
    SELECT name FROM sqlite_master \
    WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
    ORDER BY name";

/// Runs `work` against a fresh connection on a blocking thread. When `deadline` passes first, the
/// statement in progress is interrupted and the thread winds down with `SQLITE_INTERRUPT`.
pub(super) async fn run<T, F>(target: SqliteTarget, deadline: Duration, work: F) -> Result<T, DbError>
where
    F: FnOnce(&Connection) -> Result<T, DbError> + Send + 'static,
    T: Send + 'static,
{
    let (handle_tx, mut handle_rx) = oneshot::channel::<InterruptHandle>();
    let task = tokio::task::spawn_blocking(move || {
        let conn = open(&target, deadline / 2)?;
        if handle_tx.send(conn.get_interrupt_handle()).is_err() {
            return Err(DbError::Timeout(deadline));
        }
        work(&conn)
    });

    match tokio::time::timeout(deadline, task).await {
        Ok(joined) => joined.map_err(|err| DbError::Worker(err.to_string()))?,
        Err(_) => {
            // An unsent handle means the worker sees the closed channel and skips `work`.
            if let Ok(handle) = handle_rx.try_recv() {
                handle.interrupt();
            }
            Err(DbError::Timeout(deadline))
        }
    }
}

/// Lock waits are bounded by `busy_timeout`.
fn open(target: &SqliteTarget, busy_timeout: Duration) -> Result<Connection, DbError> {
    let conn = match target {
        SqliteTarget::Memory => Connection::open_in_memory()?,
        // No CREATE flag: a typo in the path should fail rather than reflect an empty file.
        SqliteTarget::File(path) => Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?,
    };
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

struct ColumnInfo {
    name: String,
    pk_position: i64,
}

struct ForeignKeyInfo {
    from: String,
    table: String,
    to: Option<String>,
    seq: i64,
}

pub(super) fn reflect(conn: &Connection) -> Result<Schema, DbError> {
    let names = {
        let mut stmt = conn.prepare(TABLES_SQL)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let mut schema = Schema::new();
    for name in names {
        let columns = table_info(conn, &name)?;

        let mut pk: Vec<&ColumnInfo> = columns.iter().filter(|c| c.pk_position > 0).collect();
        pk.sort_by_key(|c| c.pk_position);
        let pk_names: Vec<&str> = pk.iter().map(|c| c.name.as_str()).collect();

        let mut foreign_keys = BTreeMap::new();
        for fk in foreign_key_list(conn, &name)? {
            let target_column = match fk.to {
                Some(column) => column,
                None => match primary_key_column(conn, &fk.table, fk.seq)? {
                    Some(column) => column,
                    None => continue,
                },
            };
            foreign_keys.insert(fk.from, format!("{}.{}", fk.table, target_column));
        }

        let table = TableSchema {
            primary_key: columns
                .iter()
                .filter(|c| pk_names.contains(&c.name.as_str()))
                .map(|c| c.name.clone())
                .collect(),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            foreign_keys,
        };
        schema.insert(name, table);
    }

    Ok(schema)
}

fn table_info(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get("name")?,
            pk_position: row.get("pk")?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn foreign_key_list(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyInfo>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA foreign_key_list({})",
        quote_ident(table)
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok(ForeignKeyInfo {
            from: row.get("from")?,
            table: row.get("table")?,
            to: row.get("to")?,
            seq: row.get("seq")?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// The `seq`-th primary key column of `table`, used when a foreign key omits its target column.
fn primary_key_column(conn: &Connection, table: &str, seq: i64) -> Result<Option<String>, DbError> {
    let mut pk: Vec<ColumnInfo> = table_info(conn, table)?
        .into_iter()
        .filter(|c| c.pk_position > 0)
        .collect();
    pk.sort_by_key(|c| c.pk_position);
    Ok(usize::try_from(seq)
        .ok()
        .and_then(|idx| pk.into_iter().nth(idx))
        .map(|c| c.name))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(super) fn execute(conn: &Connection, sql: &str) -> Result<QueryResult, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (idx, column) in columns.iter().enumerate() {
            record.insert(column.clone(), cell(row.get_ref(idx)?));
        }
        records.push(record);
    }

    Ok(QueryResult {
        columns,
        rows: records,
    })
}

fn cell(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::from(v),
        ValueRef::Real(v) => Number::from_f64(v).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}
