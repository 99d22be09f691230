use super::{
    pg_value,
    tls::{self, Transport},
    DbError, QueryResult, Record,
};
use crate::{
    config::DatabaseConfig,
    schema::{Schema, TableSchema},
};
use std::collections::{BTreeMap, HashSet};
use tokio_postgres::{Client, Column, Config as PgConfig, NoTls, Row, SimpleQueryMessage};
use tracing::debug;

const TABLES_SQL: &str = "\
    SELECT table_name::text \
    FROM information_schema.tables \
    WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
    ORDER BY table_name";

const COLUMNS_SQL: &str = "\
    SELECT c.table_name::text, c.column_name::text \
    FROM information_schema.columns c \
    JOIN information_schema.tables t \
      ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
    WHERE c.table_schema = current_schema() AND t.table_type = 'BASE TABLE' \
    ORDER BY c.table_name, c.ordinal_position";

const PRIMARY_KEYS_SQL: &str = "\
    SELECT tc.table_name::text, kcu.column_name::text \
    FROM information_schema.table_constraints tc \
    JOIN information_schema.key_column_usage kcu \
      ON kcu.constraint_schema = tc.constraint_schema \
     AND kcu.constraint_name = tc.constraint_name \
     AND kcu.table_name = tc.table_name \
    WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = current_schema()";

const FOREIGN_KEYS_SQL: &str = "\
    SELECT cl.relname::text, att.attname::text, fcl.relname::text, fatt.attname::text \
    FROM pg_constraint con \
    JOIN pg_class cl ON cl.oid = con.conrelid \
    JOIN pg_namespace ns ON ns.oid = cl.relnamespace \
    CROSS JOIN LATERAL unnest(con.conkey, con.confkey) AS k(col, fcol) \
    JOIN pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = k.col \
    JOIN pg_class fcl ON fcl.oid = con.confrelid \
    JOIN pg_attribute fatt ON fatt.attrelid = con.confrelid AND fatt.attnum = k.fcol \
    WHERE con.contype = 'f' AND ns.nspname = current_schema()";

pub(super) async fn connect(url: &str, config: &DatabaseConfig) -> Result<Client, DbError> {
    let mut pg_config = url
        .parse::<PgConfig>()
        .map_err(|err| DbError::InvalidUrl(err.to_string()))?;
    pg_config.connect_timeout(config.timeout);

    let client = match tls::transport(pg_config.get_ssl_mode(), config)? {
        Transport::Plain => {
            let (client, connection) = pg_config.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    debug!(error = %err, "postgres connection closed with error");
                }
            });
            client
        }
        Transport::Tls(connector) => {
            let (client, connection) = pg_config.connect(connector).await?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    debug!(error = %err, "postgres connection closed with error");
                }
            });
            client
        }
    };

    Ok(client)
}

pub(super) async fn reflect(client: &Client) -> Result<Schema, DbError> {
    let mut columns: BTreeMap<String, Vec<String>> = client
        .query(TABLES_SQL, &[])
        .await?
        .iter()
        .map(|row| (row.get::<_, String>(0), Vec::new()))
        .collect();

    for row in client.query(COLUMNS_SQL, &[]).await? {
        let table: String = row.get(0);
        if let Some(list) = columns.get_mut(&table) {
            list.push(row.get(1));
        }
    }

    let mut primary_keys: BTreeMap<String, HashSet<String>> = BTreeMap::new();
    for row in client.query(PRIMARY_KEYS_SQL, &[]).await? {
        primary_keys
            .entry(row.get(0))
            .or_default()
            .insert(row.get(1));
    }

    let mut foreign_keys: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for row in client.query(FOREIGN_KEYS_SQL, &[]).await? {
        let target = format!("{}.{}", row.get::<_, String>(2), row.get::<_, String>(3));
        foreign_keys
            .entry(row.get(0))
            .or_default()
            .insert(row.get(1), target);
    }

    Ok(columns
        .into_iter()
        .map(|(table, columns)| {
            let pk = primary_keys.remove(&table).unwrap_or_default();
            let primary_key = columns
                .iter()
                .filter(|column| pk.contains(*column))
                .cloned()
                .collect();
            let table_schema = TableSchema {
                columns,
                primary_key,
                foreign_keys: foreign_keys.remove(&table).unwrap_or_default(),
            };
            (table, table_schema)
        })
        .collect())
}

/// Prepares first to learn the column types. Results whose columns all have a binary mapping are
/// decoded from the extended protocol; anything else is run once through the simple protocol and
/// read back as text.
pub(super) async fn execute(client: &Client, sql: &str) -> Result<QueryResult, DbError> {
    let statement = client.prepare(sql).await?;
    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    let binary = statement
        .columns()
        .iter()
        .all(|column| pg_value::binary_decodable(column.type_()));

    let rows = if binary {
        client
            .query(&statement, &[])
            .await?
            .iter()
            .map(binary_record)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        debug!("result has columns without a binary mapping; reading text form");
        text_records(client, sql, statement.columns()).await?
    };

    Ok(QueryResult { columns, rows })
}

fn binary_record(row: &Row) -> Result<Record, tokio_postgres::Error> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        record.insert(
            column.name().to_string(),
            pg_value::binary_cell(row, idx, column.type_())?,
        );
    }
    Ok(record)
}

async fn text_records(
    client: &Client,
    sql: &str,
    columns: &[Column],
) -> Result<Vec<Record>, DbError> {
    let mut records = Vec::new();
    for message in client.simple_query(sql).await? {
        if let SimpleQueryMessage::Row(row) = message {
            let mut record = Record::new();
            for (idx, column) in columns.iter().enumerate() {
                record.insert(
                    column.name().to_string(),
                    pg_value::text_cell(column.type_(), row.try_get(idx)?),
                );
            }
            records.push(record);
        }
    }
    Ok(records)
}
