use super::types::{FieldType, KeyKind, SchemaDefinition};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use std::collections::{BTreeMap, BTreeSet};

/// Validate the shape of every registered table schema: exactly one
/// primary key, unique secondary key index numbers, keyable key types,
/// and foreign keys that target a declared table's primary key.
///
/// Collect-all: every problem across every table is reported in one
/// pass. A table that picks up an Error here is excluded from all
/// downstream writers.
pub fn validate_schema(schema: &SchemaDefinition, sink: &mut DiagnosticSink) {
    for (table_name, table) in &schema.tables {
        if table.version == 0 {
            sink.push(
                Diagnostic::error(
                    "schema/invalid-version",
                    "schema version must be a positive integer",
                )
                .with_table(table_name),
            );
        }

        let mut seen_names: BTreeSet<&str> = BTreeSet::new();
        let mut primary_count = 0usize;
        let mut key_indexes: BTreeMap<u32, &str> = BTreeMap::new();

        for field in &table.fields {
            if !seen_names.insert(&field.name) {
                sink.push(
                    Diagnostic::error(
                        "schema/duplicate-field",
                        format!("field '{}' is declared more than once", field.name),
                    )
                    .with_table(table_name)
                    .with_field(&field.name),
                );
            }

            match field.key {
                Some(KeyKind::Primary) => {
                    primary_count += 1;
                    check_key_field(table_name, field, sink);
                    if field.index.is_some() {
                        sink.push(
                            Diagnostic::warning(
                                "schema/primary-key-index",
                                "index numbers apply to secondary keys only",
                            )
                            .with_table(table_name)
                            .with_field(&field.name),
                        );
                    }
                }
                Some(KeyKind::Secondary) => {
                    check_key_field(table_name, field, sink);
                    match field.index {
                        None => sink.push(
                            Diagnostic::error(
                                "schema/missing-key-index",
                                "secondary key needs an explicit index number",
                            )
                            .with_table(table_name)
                            .with_field(&field.name),
                        ),
                        Some(n) => {
                            if let Some(other) = key_indexes.insert(n, &field.name) {
                                sink.push(
                                    Diagnostic::error(
                                        "schema/duplicate-key-index",
                                        format!(
                                            "key index {n} is already used by field '{other}'"
                                        ),
                                    )
                                    .with_table(table_name)
                                    .with_field(&field.name),
                                );
                            }
                        }
                    }
                }
                None => {}
            }

            if let Some(target) = &field.reference {
                validate_reference(schema, table_name, &field.name, field.field_type, target, sink);
            }
        }

        if primary_count == 0 {
            sink.push(
                Diagnostic::error("schema/no-primary-key", "table declares no primary key")
                    .with_table(table_name),
            );
        } else if primary_count > 1 {
            sink.push(
                Diagnostic::error(
                    "schema/duplicate-primary-key",
                    format!("table declares {primary_count} primary keys, expected exactly one"),
                )
                .with_table(table_name),
            );
        }
    }
}

fn check_key_field(
    table_name: &str,
    field: &super::types::FieldDefinition,
    sink: &mut DiagnosticSink,
) {
    if !field.field_type.is_keyable() {
        sink.push(
            Diagnostic::error(
                "schema/invalid-key-type",
                format!(
                    "key fields must be int or string, found {}",
                    field.field_type.type_name()
                ),
            )
            .with_table(table_name)
            .with_field(&field.name),
        );
    }
    if field.nullable {
        sink.push(
            Diagnostic::error("schema/nullable-key", "key fields cannot be nullable")
                .with_table(table_name)
                .with_field(&field.name),
        );
    }
}

fn validate_reference(
    schema: &SchemaDefinition,
    table_name: &str,
    field_name: &str,
    field_type: FieldType,
    target: &super::types::RefTarget,
    sink: &mut DiagnosticSink,
) {
    let Some(target_table) = schema.tables.get(&target.table) else {
        sink.push(
            Diagnostic::error(
                "schema/unknown-ref-target",
                format!("reference targets undeclared table '{}'", target.table),
            )
            .with_table(table_name)
            .with_field(field_name),
        );
        return;
    };

    let Some(target_field) = target_table.fields.iter().find(|f| f.name == target.field) else {
        sink.push(
            Diagnostic::error(
                "schema/unknown-ref-target",
                format!(
                    "reference targets undeclared field '{}.{}'",
                    target.table, target.field
                ),
            )
            .with_table(table_name)
            .with_field(field_name),
        );
        return;
    };

    if target_field.key != Some(KeyKind::Primary) {
        sink.push(
            Diagnostic::error(
                "schema/ref-not-primary-key",
                format!(
                    "reference target '{}.{}' is not the primary key of '{}'",
                    target.table, target.field, target.table
                ),
            )
            .with_table(table_name)
            .with_field(field_name),
        );
    }

    if target_field.field_type != field_type {
        sink.push(
            Diagnostic::error(
                "schema/ref-type-mismatch",
                format!(
                    "reference field is {} but target '{}.{}' is {}",
                    field_type.type_name(),
                    target.table,
                    target.field,
                    target_field.field_type.type_name()
                ),
            )
            .with_table(table_name)
            .with_field(field_name),
        );
    }
}
