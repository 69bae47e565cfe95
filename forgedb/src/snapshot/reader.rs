//! Snapshot loading and zero-copy record access.
//!
//! The snapshot is read into one owned buffer and live-overlaid tables
//! own their block bytes; record views borrow from the [`Database`].
//! Index metadata is parsed eagerly (it is small); record payloads are
//! never copied per record.

use super::format::{self, FileKind, TableMeta};
use crate::error::{ForgeDbError, Result};
use crate::index::KeyValue;
use crate::schema::{FieldDefinition, FieldType, KeyKind};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

/// A loaded, read-only database: one snapshot buffer plus live-delta
/// overlays. Lookups never allocate per record.
pub struct Database {
    base: Vec<u8>,
    format: (u16, u16),
    generation: u64,
    tables: BTreeMap<String, LoadedTable>,
}

/// Where a table's block bytes live. Base tables borrow the snapshot
/// buffer; live-overlaid tables own a copy of their block, so deltas
/// applied later cannot invalidate them.
enum TableData {
    Base(Range<usize>),
    Live(Vec<u8>),
}

struct LoadedTable {
    data: TableData,
    version: u32,
    record_count: u32,
    fields: Vec<FieldDefinition>,
    /// Position of the primary-key field in `fields`.
    pk_pos: usize,
    meta: TableMeta,
}

impl Database {
    /// Load a snapshot file. Fails on unknown magic or an unsupported
    /// major format version.
    pub fn load(path: &Path) -> Result<Database> {
        let base = std::fs::read(path)?;
        let parsed = format::parse_file(&base)?;
        if parsed.kind != FileKind::Snapshot {
            return Err(ForgeDbError::Snapshot(format!(
                "{} is a live delta, not a full snapshot",
                path.display()
            )));
        }

        let mut tables = BTreeMap::new();
        for table in parsed.tables {
            let block = &base[table.block.clone()];
            let loaded = load_table_entry(block, TableData::Base(table.block.clone()), &table)?;
            tables.insert(table.name, loaded);
        }

        Ok(Database {
            base,
            format: (parsed.major, parsed.minor),
            generation: 0,
            tables,
        })
    }

    /// Overlay a live delta: tables present in the delta replace their
    /// base versions, tables absent from it keep their last-known data.
    /// Deltas compose; apply each generation in order.
    pub fn apply_live(&mut self, path: &Path) -> Result<()> {
        let buf = std::fs::read(path)?;
        let parsed = format::parse_file(&buf)?;
        if parsed.kind != FileKind::Live {
            return Err(ForgeDbError::Snapshot(format!(
                "{} is not a live delta",
                path.display()
            )));
        }

        for table in &parsed.tables {
            let block = buf[table.block.clone()].to_vec();
            let loaded = load_table_entry(&buf[table.block.clone()], TableData::Live(block), table)?;
            self.tables.insert(table.name.clone(), loaded);
        }
        self.generation = parsed.generation;
        log::debug!(
            "applied live delta generation {} ({} tables)",
            parsed.generation,
            parsed.tables.len()
        );
        Ok(())
    }

    pub fn format_version(&self) -> (u16, u16) {
        self.format
    }

    /// Generation of the applied live delta, 0 when none is loaded.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Table names in deterministic (sorted) order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }

    pub fn table(&self, name: &str) -> Option<TableReader<'_>> {
        let entry = self.tables.get(name)?;
        let block = match &entry.data {
            TableData::Base(range) => &self.base[range.clone()],
            TableData::Live(bytes) => bytes.as_slice(),
        };
        Some(TableReader { entry, block })
    }
}

fn load_table_entry(
    block: &[u8],
    data: TableData,
    table: &format::ParsedTable,
) -> Result<LoadedTable> {
    let pk_pos = table
        .fields
        .iter()
        .position(|f| f.key == Some(KeyKind::Primary))
        .ok_or_else(|| {
            ForgeDbError::Snapshot(format!("table '{}' has no primary key field", table.name))
        })?;
    let meta = format::parse_table_block(&table.fields, table.record_count, block)?;
    Ok(LoadedTable {
        data,
        version: table.version,
        record_count: table.record_count,
        fields: table.fields.clone(),
        pk_pos,
        meta,
    })
}

/// Read access to one loaded table. Cheap to copy; borrows the database.
#[derive(Clone, Copy)]
pub struct TableReader<'a> {
    entry: &'a LoadedTable,
    block: &'a [u8],
}

impl<'a> TableReader<'a> {
    pub fn len(&self) -> usize {
        self.entry.record_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.entry.record_count == 0
    }

    pub fn schema_version(&self) -> u32 {
        self.entry.version
    }

    pub fn fields(&self) -> &'a [FieldDefinition] {
        &self.entry.fields
    }

    /// Borrowed view of the record at a disk position.
    pub fn record(&self, pos: u32) -> Result<RecordView<'a>> {
        let offsets = &self.entry.meta.record_offsets;
        let (start, end) = match (offsets.get(pos as usize), offsets.get(pos as usize + 1)) {
            (Some(&s), Some(&e)) => (s as usize, e as usize),
            _ => {
                return Err(ForgeDbError::Snapshot(format!(
                    "record position {pos} out of range"
                )))
            }
        };
        let base = self.entry.meta.records_start;
        let bytes = self
            .block
            .get(base + start..base + end)
            .ok_or_else(|| ForgeDbError::Snapshot("record runs past end of block".into()))?;
        Ok(RecordView {
            fields: &self.entry.fields,
            bytes,
        })
    }

    /// Look up a record by primary-key value. Records are stored in
    /// primary order, so this is a binary search over disk positions.
    pub fn get(&self, key: &KeyValue) -> Result<Option<RecordView<'a>>> {
        let mut lo = 0u32;
        let mut hi = self.entry.record_count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let record = self.record(mid)?;
            let mid_key = record.key_at(self.entry.pk_pos)?;
            match mid_key.cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(record)),
            }
        }
        Ok(None)
    }

    /// Look up a record by a unique secondary key.
    pub fn get_unique(&self, field: &str, key: &KeyValue) -> Result<Option<RecordView<'a>>> {
        let field_pos = self.keyed_field_position(field)?;
        let index = self
            .entry
            .meta
            .unique
            .iter()
            .find(|u| u.field == field_pos)
            .ok_or_else(|| {
                ForgeDbError::Other(format!("field '{field}' has no unique index"))
            })?;
        match index.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(i) => Ok(Some(self.record(index.entries[i].1)?)),
            Err(_) => Ok(None),
        }
    }

    /// The contiguous, ordered range of records sharing a non-unique
    /// secondary-key value. Empty when the key is absent.
    pub fn range(&self, field: &str, key: &KeyValue) -> Result<RangeView<'a>> {
        let field_pos = self.keyed_field_position(field)?;
        let index = self
            .entry
            .meta
            .grouped
            .iter()
            .find(|g| g.field == field_pos)
            .ok_or_else(|| {
                ForgeDbError::Other(format!("field '{field}' has no grouped index"))
            })?;
        Ok(RangeView {
            table: *self,
            positions: index.range(key),
        })
    }

    fn keyed_field_position(&self, field: &str) -> Result<usize> {
        self.entry
            .fields
            .iter()
            .position(|f| f.name == field)
            .ok_or_else(|| ForgeDbError::Other(format!("unknown field '{field}'")))
    }
}

/// A borrowed, decoded-on-access view of one record. String values come
/// back as `&str` slices of the snapshot buffer.
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    fields: &'a [FieldDefinition],
    bytes: &'a [u8],
}

/// A borrowed field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef<'a> {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(&'a str),
}

impl<'a> RecordView<'a> {
    /// Decode the value at a field position.
    pub fn get(&self, pos: usize) -> Result<ValueRef<'a>> {
        if pos >= self.fields.len() {
            return Err(ForgeDbError::Snapshot(format!(
                "field position {pos} out of range"
            )));
        }
        let mut cur = format::Cursor::new(self.bytes);
        for (i, field) in self.fields.iter().enumerate().take(pos + 1) {
            let present = if field.nullable { cur.read_u8()? != 0 } else { true };
            if i == pos {
                if !present {
                    return Ok(ValueRef::Null);
                }
                return decode_value(&mut cur, field.field_type);
            }
            if present {
                skip_value(&mut cur, field.field_type)?;
            }
        }
        unreachable!("loop returns at pos")
    }

    pub fn get_named(&self, name: &str) -> Result<ValueRef<'a>> {
        let pos = self
            .fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| ForgeDbError::Other(format!("unknown field '{name}'")))?;
        self.get(pos)
    }

    fn key_at(&self, pos: usize) -> Result<KeyValue> {
        match self.get(pos)? {
            ValueRef::Int(v) => Ok(KeyValue::Int(v)),
            ValueRef::Str(s) => Ok(KeyValue::Str(s.to_string())),
            other => Err(ForgeDbError::Snapshot(format!(
                "key field holds {other:?}"
            ))),
        }
    }

    // Typed accessors used by generated bindings.

    pub fn int(&self, pos: usize) -> Result<i64> {
        match self.get(pos)? {
            ValueRef::Int(v) => Ok(v),
            other => Err(type_error("int", other)),
        }
    }

    pub fn opt_int(&self, pos: usize) -> Result<Option<i64>> {
        match self.get(pos)? {
            ValueRef::Null => Ok(None),
            ValueRef::Int(v) => Ok(Some(v)),
            other => Err(type_error("int", other)),
        }
    }

    pub fn float(&self, pos: usize) -> Result<f64> {
        match self.get(pos)? {
            ValueRef::Float(v) => Ok(v),
            other => Err(type_error("float", other)),
        }
    }

    pub fn opt_float(&self, pos: usize) -> Result<Option<f64>> {
        match self.get(pos)? {
            ValueRef::Null => Ok(None),
            ValueRef::Float(v) => Ok(Some(v)),
            other => Err(type_error("float", other)),
        }
    }

    pub fn boolean(&self, pos: usize) -> Result<bool> {
        match self.get(pos)? {
            ValueRef::Bool(v) => Ok(v),
            other => Err(type_error("bool", other)),
        }
    }

    pub fn opt_boolean(&self, pos: usize) -> Result<Option<bool>> {
        match self.get(pos)? {
            ValueRef::Null => Ok(None),
            ValueRef::Bool(v) => Ok(Some(v)),
            other => Err(type_error("bool", other)),
        }
    }

    pub fn text(&self, pos: usize) -> Result<&'a str> {
        match self.get(pos)? {
            ValueRef::Str(s) => Ok(s),
            other => Err(type_error("string", other)),
        }
    }

    pub fn opt_text(&self, pos: usize) -> Result<Option<&'a str>> {
        match self.get(pos)? {
            ValueRef::Null => Ok(None),
            ValueRef::Str(s) => Ok(Some(s)),
            other => Err(type_error("string", other)),
        }
    }

    /// The record as a JSON object, for the query-server wire format.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (pos, field) in self.fields.iter().enumerate() {
            let value = match self.get(pos)? {
                ValueRef::Null => serde_json::Value::Null,
                ValueRef::Int(v) => serde_json::Value::from(v),
                ValueRef::Float(v) => serde_json::Value::from(v),
                ValueRef::Bool(v) => serde_json::Value::from(v),
                ValueRef::Str(s) => serde_json::Value::from(s),
            };
            map.insert(field.name.clone(), value);
        }
        Ok(serde_json::Value::Object(map))
    }
}

fn type_error(expected: &str, got: ValueRef<'_>) -> ForgeDbError {
    ForgeDbError::Snapshot(format!("expected {expected}, found {got:?}"))
}

fn decode_value<'a>(cur: &mut format::Cursor<'a>, ty: FieldType) -> Result<ValueRef<'a>> {
    match ty {
        FieldType::Int => Ok(ValueRef::Int(cur.read_u64()? as i64)),
        FieldType::Float => Ok(ValueRef::Float(f64::from_bits(cur.read_u64()?))),
        FieldType::Bool => Ok(ValueRef::Bool(cur.read_u8()? != 0)),
        FieldType::String => Ok(ValueRef::Str(cur.read_str()?)),
    }
}

fn skip_value(cur: &mut format::Cursor<'_>, ty: FieldType) -> Result<()> {
    match ty {
        FieldType::Int | FieldType::Float => cur.skip(8),
        FieldType::Bool => cur.skip(1),
        FieldType::String => {
            let len = cur.read_u32()? as usize;
            cur.skip(len)
        }
    }
}

/// A borrowed, ordered, contiguous view over the records sharing one
/// non-unique secondary-key value. Valid only while the database buffer
/// is alive; it cannot outlive its backing buffer.
#[derive(Clone, Copy)]
pub struct RangeView<'a> {
    table: TableReader<'a>,
    positions: &'a [u32],
}

impl<'a> RangeView<'a> {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<Result<RecordView<'a>>> {
        self.positions.get(i).map(|&pos| self.table.record(pos))
    }

    pub fn iter(&self) -> RangeIter<'a> {
        RangeIter {
            table: self.table,
            positions: self.positions.iter(),
        }
    }
}

impl<'a> IntoIterator for RangeView<'a> {
    type Item = Result<RecordView<'a>>;
    type IntoIter = RangeIter<'a>;

    fn into_iter(self) -> RangeIter<'a> {
        self.iter()
    }
}

pub struct RangeIter<'a> {
    table: TableReader<'a>,
    positions: std::slice::Iter<'a, u32>,
}

impl<'a> Iterator for RangeIter<'a> {
    type Item = Result<RecordView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.positions.next().map(|&pos| self.table.record(pos))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.positions.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::TableIndexes;
    use crate::loader::{Record, Value};
    use crate::schema::parse_schema_str;
    use crate::snapshot::{compile_table, write_snapshot};

    fn item_rows() -> (crate::schema::TableDefinition, Vec<Record>) {
        let schema = parse_schema_str(
            r#"
tables:
  Item:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
      - { name: Category, type: string, key: secondary, index: 0 }
      - { name: Slug, type: string, key: secondary, index: 1, unique: true }
      - { name: Weight, type: float, nullable: true }
"#,
        )
        .unwrap();
        let table = schema.tables["Item"].clone();
        let records = vec![
            Record {
                row: 0,
                values: vec![
                    Value::Int(1),
                    Value::String("Weapon".into()),
                    Value::String("sword".into()),
                    Value::Float(3.5),
                ],
            },
            Record {
                row: 1,
                values: vec![
                    Value::Int(2),
                    Value::String("Armor".into()),
                    Value::String("shield".into()),
                    Value::Null,
                ],
            },
            Record {
                row: 2,
                values: vec![
                    Value::Int(3),
                    Value::String("Weapon".into()),
                    Value::String("axe".into()),
                    Value::Float(7.0),
                ],
            },
        ];
        (table, records)
    }

    fn write_item_snapshot(path: &std::path::Path) {
        let (table, records) = item_rows();
        let indexes = TableIndexes::build(&table, &records).unwrap();
        let compiled = compile_table("Item", &table, &records, &indexes).unwrap();
        write_snapshot(path, &[compiled]).unwrap();
    }

    #[test]
    fn test_round_trip_by_primary_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.fdb");
        write_item_snapshot(&path);

        let db = Database::load(&path).unwrap();
        let items = db.table("Item").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items.schema_version(), 1);

        let record = items.get(&KeyValue::Int(2)).unwrap().unwrap();
        assert_eq!(record.int(0).unwrap(), 2);
        assert_eq!(record.text(1).unwrap(), "Armor");
        assert_eq!(record.opt_float(3).unwrap(), None);

        assert!(items.get(&KeyValue::Int(99)).unwrap().is_none());
    }

    #[test]
    fn test_unique_secondary_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.fdb");
        write_item_snapshot(&path);

        let db = Database::load(&path).unwrap();
        let items = db.table("Item").unwrap();
        let record = items
            .get_unique("Slug", &KeyValue::Str("axe".into()))
            .unwrap()
            .unwrap();
        assert_eq!(record.int(0).unwrap(), 3);
        assert!(items
            .get_unique("Slug", &KeyValue::Str("missing".into()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_range_is_contiguous_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.fdb");
        write_item_snapshot(&path);

        let db = Database::load(&path).unwrap();
        let items = db.table("Item").unwrap();

        let weapons = items
            .range("Category", &KeyValue::Str("Weapon".into()))
            .unwrap();
        assert_eq!(weapons.len(), 2);
        let ids: Vec<i64> = weapons
            .iter()
            .map(|r| r.unwrap().int(0).unwrap())
            .collect();
        // Declaration order within the key: sword (Id 1) before axe (Id 3).
        assert_eq!(ids, vec![1, 3]);

        let potions = items
            .range("Category", &KeyValue::Str("Potion".into()))
            .unwrap();
        assert!(potions.is_empty());
    }

    #[test]
    fn test_range_count_matches_linear_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.fdb");
        write_item_snapshot(&path);

        let db = Database::load(&path).unwrap();
        let items = db.table("Item").unwrap();

        for key in ["Weapon", "Armor", "Potion"] {
            let range = items.range("Category", &KeyValue::Str(key.into())).unwrap();
            let scan = (0..items.len() as u32)
                .filter(|&pos| {
                    let record = items.record(pos).unwrap();
                    record.text(1).unwrap() == key
                })
                .count();
            assert_eq!(range.len(), scan, "range vs scan for key {key}");
        }
    }

    #[test]
    fn test_get_on_unknown_table_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.fdb");
        write_item_snapshot(&path);
        let db = Database::load(&path).unwrap();
        assert!(db.table("Nope").is_none());
    }

    #[test]
    fn test_to_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.fdb");
        write_item_snapshot(&path);
        let db = Database::load(&path).unwrap();
        let items = db.table("Item").unwrap();
        let json = items
            .get(&KeyValue::Int(1))
            .unwrap()
            .unwrap()
            .to_json()
            .unwrap();
        assert_eq!(json["Id"], 1);
        assert_eq!(json["Category"], "Weapon");
        assert_eq!(json["Weight"], 3.5);
    }
}
