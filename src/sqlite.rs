use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, params};

use crate::{
    fields::FieldMap,
    run::RunId,
    storage::{FieldGroup, RequestId, RequestRow, RequestStore, StoreError},
};

/// Writes into a pre-existing SQLite database with the same tables as the
/// PostgreSQL schema. `values` columns hold JSON arrays and timestamps are
/// RFC 3339 text.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    // No SQLITE_OPEN_CREATE: the schema is owned by whoever created the file.
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;

    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    Ok(conn)
}

#[async_trait]
impl RequestStore for SqliteStore {
    type Config = SqliteConfig;

    async fn connect(config: &SqliteConfig) -> Result<Self, StoreError> {
        let conn = open_connection(&config.path)?;
        tracing::info!(path = %config.path.display(), "opened sqlite database");
        Ok(Self {
            conn,
            path: config.path.clone(),
        })
    }

    async fn insert_request(&mut self, row: &RequestRow<'_>) -> Result<RequestId, StoreError> {
        let id = self.conn.query_row(
            r#"
            INSERT INTO requests (
              run, start_time, host, port, method, scheme, authority, path, http_version, content_raw
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING id
            "#,
            params![
                row.run.get(),
                row.start_time.to_rfc3339_opts(SecondsFormat::Micros, true),
                row.host,
                row.port,
                row.method,
                row.scheme,
                row.authority,
                row.path,
                row.http_version,
                row.content_raw,
            ],
            |result| result.get::<_, i64>(0),
        )?;
        Ok(RequestId(id))
    }

    async fn update_request_content(
        &mut self,
        request: RequestId,
        content: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE requests SET content = ?1 WHERE id = ?2",
            params![content, request.0],
        )?;
        Ok(())
    }

    async fn insert_fields(
        &mut self,
        group: FieldGroup,
        request: RequestId,
        fields: &FieldMap,
    ) -> Result<u64, StoreError> {
        let tx = self.conn.transaction()?;
        let mut written = 0_u64;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (request, name, \"values\") VALUES (?1, ?2, ?3)",
                group.table()
            ))?;
            for (name, values) in fields.iter() {
                let values_json = serde_json::to_string(values)?;
                written += stmt.execute(params![request.0, name, values_json])? as u64;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    async fn finish_run(&mut self, run: RunId) -> Result<u64, StoreError> {
        let end_time = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let updated = self.conn.execute(
            "UPDATE runs SET end_time = ?1 WHERE id = ?2",
            params![end_time, run.get()],
        )?;
        Ok(updated as u64)
    }

    async fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::Sqlite(err))?;
        tracing::debug!(path = %self.path.display(), "closed sqlite database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SqliteConfig, SqliteStore};
    use crate::storage::{RequestStore, StoreError};

    #[tokio::test]
    async fn missing_database_file_is_a_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig {
            path: dir.path().join("absent.db"),
        };

        let err = SqliteStore::connect(&config).await.unwrap_err();

        assert!(matches!(err, StoreError::Sqlite(_)), "unexpected: {err}");
        assert!(!config.path.exists());
    }
}
