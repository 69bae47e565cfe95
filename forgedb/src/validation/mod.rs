use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::index::KeyValue;
use crate::loader::{Record, Value};
use crate::schema::{KeyKind, SchemaDefinition, TableDefinition};
use std::collections::{BTreeMap, BTreeSet};

/// Cross-record validation over every loaded table: key uniqueness and
/// foreign-key referential integrity.
///
/// Collect-all by design: a single export surfaces every problem in one
/// run. A table that picks up an Error is excluded from the writers, but
/// validation of the remaining tables continues, and its loaded primary
/// keys still back FK checks from other tables.
pub fn validate_tables(
    schema: &SchemaDefinition,
    records: &BTreeMap<String, Vec<Record>>,
    sink: &mut DiagnosticSink,
) {
    // Primary-key sets for FK resolution, built once per referenced table.
    let mut pk_sets: BTreeMap<&str, BTreeSet<KeyValue>> = BTreeMap::new();
    for (name, table) in &schema.tables {
        if let (Some((pk_pos, _)), Some(rows)) = (table.primary_field(), records.get(name)) {
            let set = rows
                .iter()
                .filter_map(|r| KeyValue::from_value(&r.values[pk_pos]))
                .collect();
            pk_sets.insert(name, set);
        }
    }

    for (name, table) in &schema.tables {
        let Some(rows) = records.get(name) else {
            continue;
        };
        validate_key_uniqueness(name, table, rows, sink);
        validate_references(name, table, rows, &pk_sets, sink);
    }
}

/// Pass (a): no two records may share a primary-key value; unique
/// secondary keys get the same treatment. Both conflicting row positions
/// are named.
fn validate_key_uniqueness(
    name: &str,
    table: &TableDefinition,
    rows: &[Record],
    sink: &mut DiagnosticSink,
) {
    for (field_pos, field) in table.fields.iter().enumerate() {
        let code = match field.key {
            Some(KeyKind::Primary) => "validation/duplicate-primary-key",
            Some(KeyKind::Secondary) if field.unique => "validation/duplicate-unique-key",
            _ => continue,
        };

        let mut seen: BTreeMap<KeyValue, usize> = BTreeMap::new();
        for record in rows {
            let Some(key) = KeyValue::from_value(&record.values[field_pos]) else {
                continue; // loader already rejected non-key values
            };
            if let Some(first_row) = seen.get(&key) {
                sink.push(
                    Diagnostic::error(
                        code,
                        format!(
                            "value {key} appears in rows {first_row} and {}",
                            record.row
                        ),
                    )
                    .with_table(name)
                    .with_row(record.row)
                    .with_field(&field.name),
                );
            } else {
                seen.insert(key, record.row);
            }
        }
    }
}

/// Pass (b): every non-null foreign-key value must equal some primary-key
/// value in the referenced table's loaded records.
fn validate_references(
    name: &str,
    table: &TableDefinition,
    rows: &[Record],
    pk_sets: &BTreeMap<&str, BTreeSet<KeyValue>>,
    sink: &mut DiagnosticSink,
) {
    for (field_pos, field) in table.fields.iter().enumerate() {
        let Some(target) = &field.reference else {
            continue;
        };
        // Registry validation already errored on undeclared targets; an
        // absent set here means the target table never loaded.
        let empty = BTreeSet::new();
        let target_keys = pk_sets.get(target.table.as_str()).unwrap_or(&empty);

        for record in rows {
            let value = &record.values[field_pos];
            if *value == Value::Null {
                continue;
            }
            let Some(key) = KeyValue::from_value(value) else {
                continue;
            };
            if !target_keys.contains(&key) {
                sink.push(
                    Diagnostic::error(
                        "validation/dangling-ref",
                        format!(
                            "'{name}.{}' value {key} has no matching primary key in '{}'",
                            field.name, target.table
                        ),
                    )
                    .with_table(name)
                    .with_row(record.row)
                    .with_field(&field.name),
                );
            }
        }
    }
}
