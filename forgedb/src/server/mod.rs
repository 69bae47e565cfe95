//! Line-delimited JSON query server.
//!
//! One request object per input line, one response object per output
//! line, handled strictly in order. Bad input produces an error response
//! on the same line slot and the loop keeps going; only output IO
//! failures end the session early.

use crate::error::Result;
use crate::index::KeyValue;
use crate::snapshot::Database;
use serde::Deserialize;
use serde_json::json;
use std::io::{BufRead, Write};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Meta,
    Tables,
    Get { table: String, key: serde_json::Value },
    Range {
        table: String,
        field: String,
        value: serde_json::Value,
    },
}

pub struct QueryServer {
    db: Database,
}

impl QueryServer {
    pub fn new(db: Database) -> Self {
        QueryServer { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Serve requests from `input` until EOF, or until one request has
    /// been answered when `once` is set. Blank lines are skipped and do
    /// not count as a request.
    pub fn serve(&self, input: impl BufRead, mut output: impl Write, once: bool) -> Result<()> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line);
            serde_json::to_writer(&mut output, &response)?;
            output.write_all(b"\n")?;
            output.flush()?;
            if once {
                break;
            }
        }
        Ok(())
    }

    fn handle_line(&self, line: &str) -> serde_json::Value {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return error_response("protocol/bad-request", &format!("invalid request: {e}"))
            }
        };
        match self.handle(request) {
            Ok(response) => response,
            Err((code, message)) => error_response(code, &message),
        }
    }

    fn handle(&self, request: Request) -> std::result::Result<serde_json::Value, Failure> {
        match request {
            Request::Meta => {
                let (major, minor) = self.db.format_version();
                let tables: Vec<serde_json::Value> = self
                    .db
                    .table_names()
                    .map(|name| {
                        let table = self.db.table(name);
                        json!({
                            "name": name,
                            "version": table.map(|t| t.schema_version()),
                            "records": table.map(|t| t.len()),
                        })
                    })
                    .collect();
                Ok(json!({
                    "ok": true,
                    "format": { "major": major, "minor": minor },
                    "generation": self.db.generation(),
                    "tables": tables,
                }))
            }
            Request::Tables => {
                let names: Vec<&str> = self.db.table_names().collect();
                Ok(json!({ "ok": true, "tables": names }))
            }
            Request::Get { table, key } => {
                let reader = self.table(&table)?;
                let key = parse_key(&key)?;
                let record = reader.get(&key).map_err(query_failed)?;
                let record = match record {
                    Some(view) => view.to_json().map_err(query_failed)?,
                    None => serde_json::Value::Null,
                };
                Ok(json!({ "ok": true, "record": record }))
            }
            Request::Range { table, field, value } => {
                let reader = self.table(&table)?;
                let key = parse_key(&value)?;
                let range = reader.range(&field, &key).map_err(query_failed)?;
                let mut records = Vec::with_capacity(range.len());
                for view in range.iter() {
                    records.push(view.map_err(query_failed)?.to_json().map_err(query_failed)?);
                }
                Ok(json!({ "ok": true, "records": records }))
            }
        }
    }

    fn table(&self, name: &str) -> std::result::Result<crate::snapshot::TableReader<'_>, Failure> {
        self.db.table(name).ok_or_else(|| {
            (
                "protocol/unknown-table",
                format!("no table named '{name}'"),
            )
        })
    }
}

type Failure = (&'static str, String);

fn parse_key(value: &serde_json::Value) -> std::result::Result<KeyValue, Failure> {
    match value {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(KeyValue::Int(i)),
            None => Err((
                "protocol/bad-key",
                format!("key must be an integer or string, got {n}"),
            )),
        },
        serde_json::Value::String(s) => Ok(KeyValue::Str(s.clone())),
        other => Err((
            "protocol/bad-key",
            format!("key must be an integer or string, got {other}"),
        )),
    }
}

fn query_failed(e: crate::error::ForgeDbError) -> Failure {
    ("protocol/query-failed", e.to_string())
}

fn error_response(code: &str, message: &str) -> serde_json::Value {
    json!({
        "ok": false,
        "error": { "severity": "error", "code": code, "message": message },
    })
}
