// Row loading - read data/<Table>.yaml into typed in-memory records

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::Result;
use crate::schema::{FieldDefinition, FieldType, TableDefinition};
use serde::Serialize;
use std::path::Path;

/// A typed field value held in memory during an export run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
        }
    }
}

/// One row of a table. `row` is the position in the source file and is
/// the tie-break for grouping identical secondary-key values, so it must
/// survive every later reordering. `values` aligns positionally with the
/// table's field list.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub row: usize,
    pub values: Vec<Value>,
}

/// Load the raw rows of one table from `<root>/data/<name>.yaml`.
///
/// A missing file is an empty table (Info diagnostic). Structural
/// problems — a non-sequence document, type-mismatched or missing
/// fields — are schema-class Error diagnostics on the table; the rows
/// concerned are dropped but loading continues so every problem in the
/// file surfaces in one run. Cross-record checks belong to the
/// validator, not here.
pub fn load_table(
    root: &Path,
    name: &str,
    table: &TableDefinition,
    sink: &mut DiagnosticSink,
) -> Result<Vec<Record>> {
    let path = root.join("data").join(format!("{name}.yaml"));
    if !path.exists() {
        sink.push(
            Diagnostic::info("data/no-data-file", format!("no data file at {}", path.display()))
                .with_table(name),
        );
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(&path)?;
    let doc: serde_yaml::Value = match serde_yaml::from_str(&content) {
        Ok(doc) => doc,
        Err(e) => {
            sink.push(
                Diagnostic::error("data/invalid-yaml", format!("{}: {e}", path.display()))
                    .with_table(name),
            );
            return Ok(Vec::new());
        }
    };

    let rows = match doc {
        serde_yaml::Value::Null => return Ok(Vec::new()),
        serde_yaml::Value::Sequence(rows) => rows,
        other => {
            sink.push(
                Diagnostic::error(
                    "data/not-a-sequence",
                    format!("expected a sequence of rows, got {}", yaml_type_name(&other)),
                )
                .with_table(name),
            );
            return Ok(Vec::new());
        }
    };

    let mut records = Vec::with_capacity(rows.len());
    for (row, entry) in rows.into_iter().enumerate() {
        let Some(mapping) = entry.as_mapping() else {
            sink.push(
                Diagnostic::error(
                    "data/not-a-mapping",
                    format!("row is {}, expected a mapping", yaml_type_name(&entry)),
                )
                .with_table(name)
                .with_row(row),
            );
            continue;
        };

        let mut values = Vec::with_capacity(table.fields.len());
        let mut row_ok = true;
        for field in &table.fields {
            let raw = mapping.get(field.name.as_str());
            match convert_field(field, raw) {
                Ok(value) => values.push(value),
                Err((code, message)) => {
                    row_ok = false;
                    sink.push(
                        Diagnostic::error(code, message)
                            .with_table(name)
                            .with_row(row)
                            .with_field(&field.name),
                    );
                }
            }
        }

        // Fields the schema doesn't declare are ignored, but flag them.
        for key in mapping.keys() {
            if let serde_yaml::Value::String(key_str) = key {
                if table.field_position(key_str).is_none() {
                    sink.push(
                        Diagnostic::warning(
                            "data/unknown-field",
                            format!("field '{key_str}' is not declared in the schema"),
                        )
                        .with_table(name)
                        .with_row(row)
                        .with_field(key_str),
                    );
                }
            }
        }

        if row_ok {
            records.push(Record { row, values });
        }
    }

    Ok(records)
}

type FieldError = (&'static str, String);

fn convert_field(
    field: &FieldDefinition,
    raw: Option<&serde_yaml::Value>,
) -> std::result::Result<Value, FieldError> {
    let value = match raw {
        None | Some(serde_yaml::Value::Null) => {
            if field.nullable {
                return Ok(Value::Null);
            }
            return Err((
                "data/missing-field",
                format!("field '{}' is missing and not nullable", field.name),
            ));
        }
        Some(v) => v,
    };

    match field.field_type {
        FieldType::Int => value
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| mismatch(field, "int", value)),
        FieldType::Float => value
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| mismatch(field, "float", value)),
        FieldType::Bool => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| mismatch(field, "bool", value)),
        FieldType::String => value
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| mismatch(field, "string", value)),
    }
}

fn mismatch(field: &FieldDefinition, expected: &str, value: &serde_yaml::Value) -> FieldError {
    (
        "data/type-mismatch",
        format!(
            "field '{}' expected {expected}, got {}",
            field.name,
            yaml_type_name(value)
        ),
    )
}

fn yaml_type_name(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged",
    }
}
