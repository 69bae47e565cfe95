use crate::error::{ForgeDbError, Result};
use crate::loader::{Record, Value};
use crate::schema::TableDefinition;
use std::fmt;

/// A key value usable in an index: totally ordered and with a stable
/// binary encoding. Registry validation restricts key fields to int and
/// string, so every key on a valid table converts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyValue {
    Int(i64),
    Str(String),
}

impl KeyValue {
    pub fn from_value(value: &Value) -> Option<KeyValue> {
        match value {
            Value::Int(v) => Some(KeyValue::Int(*v)),
            Value::String(s) => Some(KeyValue::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Str(s) => write!(f, "'{s}'"),
        }
    }
}

/// A unique secondary index: `(key, disk position)` entries sorted by key.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueIndex {
    /// Position of the indexed field in the table's field list.
    pub field: usize,
    pub entries: Vec<(KeyValue, u32)>,
}

/// One run of a grouped index: all records sharing `key`, as a slice
/// `start..start+len` of the permutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: KeyValue,
    pub start: u32,
    pub len: u32,
}

/// A non-unique secondary index: a permutation of disk positions plus
/// group metadata. Groups are ordered by key ascending; within a group
/// the original row order is preserved. Consumers take contiguous
/// borrowed slices of the permutation, so this ordering is a hard
/// contract: identical input data must reproduce identical ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedIndex {
    pub field: usize,
    pub permutation: Vec<u32>,
    pub groups: Vec<Group>,
}

impl GroupedIndex {
    /// The contiguous run of disk positions for `key`, empty when absent.
    pub fn range(&self, key: &KeyValue) -> &[u32] {
        match self.groups.binary_search_by(|g| g.key.cmp(key)) {
            Ok(i) => {
                let g = &self.groups[i];
                &self.permutation[g.start as usize..(g.start + g.len) as usize]
            }
            Err(_) => &[],
        }
    }
}

/// All indices of one table, expressed against disk positions: the
/// snapshot stores records once, sorted by primary key, and every index
/// refers to ranks in that order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableIndexes {
    /// `primary_order[disk_pos]` is the index into the loaded record
    /// slice. Stable sort by primary-key value.
    pub primary_order: Vec<u32>,
    pub unique: Vec<UniqueIndex>,
    pub grouped: Vec<GroupedIndex>,
}

impl TableIndexes {
    /// Build all indices for a validated table. Secondary indices come
    /// out in declared key-index order, which the snapshot encoding
    /// relies on for determinism.
    pub fn build(table: &TableDefinition, records: &[Record]) -> Result<TableIndexes> {
        let (pk_pos, pk_field) = table.primary_field().ok_or_else(|| {
            ForgeDbError::Schema("cannot index a table without a primary key".into())
        })?;

        let pk_keys = key_column(records, pk_pos, &pk_field.name)?;

        let mut primary_order: Vec<u32> = (0..records.len() as u32).collect();
        primary_order.sort_by(|a, b| pk_keys[*a as usize].cmp(&pk_keys[*b as usize]));

        // Map loaded-record index -> disk position (rank in primary order).
        let mut disk_pos = vec![0u32; records.len()];
        for (rank, rec) in primary_order.iter().enumerate() {
            disk_pos[*rec as usize] = rank as u32;
        }

        let mut unique = Vec::new();
        let mut grouped = Vec::new();
        for (field_pos, field) in table.secondary_fields() {
            let keys = key_column(records, field_pos, &field.name)?;
            if field.unique {
                let mut entries: Vec<(KeyValue, u32)> = keys
                    .iter()
                    .enumerate()
                    .map(|(rec, key)| (key.clone(), disk_pos[rec]))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                unique.push(UniqueIndex {
                    field: field_pos,
                    entries,
                });
            } else {
                grouped.push(build_grouped(field_pos, &keys, records, &disk_pos));
            }
        }

        Ok(TableIndexes {
            primary_order,
            unique,
            grouped,
        })
    }
}

fn build_grouped(
    field_pos: usize,
    keys: &[KeyValue],
    records: &[Record],
    disk_pos: &[u32],
) -> GroupedIndex {
    // Order by key ascending, ties by original row order.
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|a, b| keys[*a].cmp(&keys[*b]).then(records[*a].row.cmp(&records[*b].row)));

    let mut permutation = Vec::with_capacity(order.len());
    let mut groups: Vec<Group> = Vec::new();
    for rec in order {
        let key = &keys[rec];
        match groups.last_mut() {
            Some(last) if last.key == *key => last.len += 1,
            _ => groups.push(Group {
                key: key.clone(),
                start: permutation.len() as u32,
                len: 1,
            }),
        }
        permutation.push(disk_pos[rec]);
    }

    GroupedIndex {
        field: field_pos,
        permutation,
        groups,
    }
}

fn key_column(records: &[Record], field_pos: usize, field_name: &str) -> Result<Vec<KeyValue>> {
    records
        .iter()
        .map(|r| {
            KeyValue::from_value(&r.values[field_pos]).ok_or_else(|| {
                ForgeDbError::Schema(format!(
                    "key field '{field_name}' holds a non-key value at row {}",
                    r.row
                ))
            })
        })
        .collect()
}
