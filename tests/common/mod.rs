#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde_json::{Value, json};

pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE runs (
  id INTEGER PRIMARY KEY,
  start_time TEXT NOT NULL,
  end_time TEXT
);

CREATE TABLE requests (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run INTEGER NOT NULL REFERENCES runs(id),
  start_time TEXT NOT NULL,
  host TEXT NOT NULL,
  port INTEGER NOT NULL,
  method TEXT NOT NULL,
  scheme TEXT NOT NULL,
  authority TEXT NOT NULL,
  path TEXT NOT NULL,
  http_version TEXT NOT NULL,
  content_raw BLOB NOT NULL,
  content TEXT
);

CREATE TABLE headers (
  request INTEGER NOT NULL REFERENCES requests(id),
  name TEXT NOT NULL,
  "values" TEXT NOT NULL
);

CREATE TABLE trailers (
  request INTEGER NOT NULL REFERENCES requests(id),
  name TEXT NOT NULL,
  "values" TEXT NOT NULL
);

CREATE TABLE cookies (
  request INTEGER NOT NULL REFERENCES requests(id),
  name TEXT NOT NULL,
  "values" TEXT NOT NULL
);
"#;

/// Creates a capture database with one run row per id in `runs`.
pub fn create_capture_db(dir: &Path, runs: &[i64]) -> PathBuf {
    let path = dir.join("capture.db");
    let conn = Connection::open(&path).expect("sqlite file should be created");
    conn.execute_batch(SQLITE_SCHEMA)
        .expect("schema should be created");
    for run in runs {
        conn.execute(
            "INSERT INTO runs (id, start_time) VALUES (?1, '2024-05-01T12:00:00Z')",
            [run],
        )
        .expect("run row should be inserted");
    }
    path
}

pub fn captured_request(overrides: Value) -> Value {
    let mut base = json!({
        "timestamp_start": 1_714_564_800.125,
        "host": "api.example.net",
        "port": 443,
        "method": "POST",
        "scheme": "https",
        "authority": "api.example.net",
        "path": "/v1/events",
        "http_version": "HTTP/1.1",
        "content": "{\"event\":\"launch\"}",
        "headers": [["X-Test", "1"], ["X-Test", "2"], ["Content-Type", "application/json"]],
        "cookies": [["sid", "s-1"]],
        "trailers": null
    });
    for (key, value) in overrides.as_object().expect("overrides should be an object") {
        base[key] = value.clone();
    }
    base
}

/// `(name, values)` rows of one satellite table for a request, in insertion order.
pub fn field_rows(conn: &Connection, table: &str, request: i64) -> Vec<(String, Vec<String>)> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT name, \"values\" FROM {table} WHERE request = ?1 ORDER BY rowid"
        ))
        .expect("field query should prepare");
    stmt.query_map([request], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })
    .expect("field query should run")
    .map(|row| {
        let (name, values) = row.expect("field row should decode");
        let values: Vec<String> =
            serde_json::from_str(&values).expect("values should be a JSON array");
        (name, values)
    })
    .collect()
}
