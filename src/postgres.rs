use async_trait::async_trait;
use sqlx::{
    Connection, PgConnection, Postgres, QueryBuilder, Row,
    postgres::PgConnectOptions,
};

use crate::{
    config::DatabaseConfig,
    fields::FieldMap,
    run::RunId,
    storage::{FieldGroup, RequestId, RequestRow, RequestStore, StoreError},
};

const PG_MAX_BIND_PARAMS: usize = 65_535;
const FIELD_ROW_BINDS: usize = 3;
const FIELD_ROWS_PER_INSERT: usize = PG_MAX_BIND_PARAMS / FIELD_ROW_BINDS;

const INSERT_REQUEST: &str = r#"
    INSERT INTO requests (
      run, start_time, host, port, method, scheme, authority, path, http_version, content_raw
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    RETURNING id
"#;

/// Single long-lived connection to the capture database. Statements run in
/// auto-commit mode, so each call is durable once it returns.
#[derive(Debug)]
pub struct PgStore {
    conn: PgConnection,
}

fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .password(config.password())
        .application_name("request-recorder")
}

fn insert_fields_query<'a>(
    group: FieldGroup,
    request: RequestId,
    rows: &'a [(String, Vec<String>)],
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} (request, name, values) ",
        group.table()
    ));
    builder.push_values(rows, |mut row, (name, values)| {
        row.push_bind(request.0)
            .push_bind(name.as_str())
            .push_bind(values.as_slice());
    });
    builder
}

#[async_trait]
impl RequestStore for PgStore {
    type Config = DatabaseConfig;

    async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let conn = PgConnection::connect_with(&connect_options(config)).await?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "connected to postgres"
        );
        Ok(Self { conn })
    }

    async fn insert_request(&mut self, row: &RequestRow<'_>) -> Result<RequestId, StoreError> {
        let inserted = sqlx::query(INSERT_REQUEST)
            .bind(row.run.get())
            .bind(row.start_time)
            .bind(row.host)
            .bind(i32::from(row.port))
            .bind(row.method)
            .bind(row.scheme)
            .bind(row.authority)
            .bind(row.path)
            .bind(row.http_version)
            .bind(row.content_raw)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(RequestId(inserted.try_get("id")?))
    }

    async fn update_request_content(
        &mut self,
        request: RequestId,
        content: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE requests SET content = $1 WHERE id = $2")
            .bind(content)
            .bind(request.0)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn insert_fields(
        &mut self,
        group: FieldGroup,
        request: RequestId,
        fields: &FieldMap,
    ) -> Result<u64, StoreError> {
        let rows = fields.entries();

        if rows.len() <= FIELD_ROWS_PER_INSERT {
            let result = insert_fields_query(group, request, rows)
                .build()
                .execute(&mut self.conn)
                .await?;
            return Ok(result.rows_affected());
        }

        // Too many binds for one statement; keep the group atomic anyway.
        let mut tx = self.conn.begin().await?;
        let mut written = 0;
        for chunk in rows.chunks(FIELD_ROWS_PER_INSERT) {
            let result = insert_fields_query(group, request, chunk)
                .build()
                .execute(&mut *tx)
                .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn finish_run(&mut self, run: RunId) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE runs SET end_time = now() WHERE id = $1")
            .bind(run.get())
            .execute(&mut self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}
