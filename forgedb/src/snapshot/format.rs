//! On-disk snapshot format.
//!
//! A snapshot is: header (magic, format version, table count), a table
//! directory (name, schema version, field layout, block offset/len per
//! table, sorted by name), then one block per table. A block holds a
//! record offset table, the records serialized in primary-key order, and
//! the index sections. Everything is little-endian; strings are
//! u32-length-prefixed UTF-8. No timestamps, no hash-order dependence:
//! identical input encodes to identical bytes.

use crate::error::{ForgeDbError, Result};
use crate::index::{Group, GroupedIndex, KeyValue, TableIndexes, UniqueIndex};
use crate::loader::{Record, Value};
use crate::schema::{FieldDefinition, FieldType, KeyKind, TableDefinition};

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"FDBS";
pub const LIVE_MAGIC: [u8; 4] = *b"FDBL";

/// Bumped on incompatible layout changes; a reader refuses any file whose
/// major version it does not know.
pub const FORMAT_MAJOR: u16 = 1;
pub const FORMAT_MINOR: u16 = 0;

const TYPE_INT: u8 = 0;
const TYPE_FLOAT: u8 = 1;
const TYPE_BOOL: u8 = 2;
const TYPE_STRING: u8 = 3;

/// One table compiled to its final block bytes, ready for a writer.
/// Blocks are byte-compared by the hot-reload writer, so the encoding
/// must stay deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTable {
    pub name: String,
    pub version: u32,
    pub record_count: u32,
    pub fields: Vec<FieldDefinition>,
    pub block: Vec<u8>,
}

/// Serialize a validated table: records in primary order, then index
/// sections (unique, then grouped, each in declared key-index order).
pub fn compile_table(
    name: &str,
    table: &TableDefinition,
    records: &[Record],
    indexes: &TableIndexes,
) -> Result<CompiledTable> {
    let mut record_bytes = Vec::new();
    let mut offsets = Vec::with_capacity(records.len() + 1);
    offsets.push(0u32);
    for &rec in &indexes.primary_order {
        let record = &records[rec as usize];
        encode_record(&table.fields, &record.values, &mut record_bytes)?;
        offsets.push(record_bytes.len() as u32);
    }

    let mut block = Vec::new();
    for off in &offsets {
        put_u32(&mut block, *off);
    }
    block.extend_from_slice(&record_bytes);

    put_u16(&mut block, indexes.unique.len() as u16);
    for unique in &indexes.unique {
        let field_type = table.fields[unique.field].field_type;
        put_u16(&mut block, unique.field as u16);
        put_u32(&mut block, unique.entries.len() as u32);
        for (key, pos) in &unique.entries {
            encode_key(&mut block, field_type, key)?;
            put_u32(&mut block, *pos);
        }
    }

    put_u16(&mut block, indexes.grouped.len() as u16);
    for grouped in &indexes.grouped {
        let field_type = table.fields[grouped.field].field_type;
        put_u16(&mut block, grouped.field as u16);
        put_u32(&mut block, grouped.permutation.len() as u32);
        for pos in &grouped.permutation {
            put_u32(&mut block, *pos);
        }
        put_u32(&mut block, grouped.groups.len() as u32);
        for group in &grouped.groups {
            encode_key(&mut block, field_type, &group.key)?;
            put_u32(&mut block, group.start);
            put_u32(&mut block, group.len);
        }
    }

    Ok(CompiledTable {
        name: name.to_string(),
        version: table.version,
        record_count: records.len() as u32,
        fields: table.fields.clone(),
        block,
    })
}

fn encode_record(fields: &[FieldDefinition], values: &[Value], out: &mut Vec<u8>) -> Result<()> {
    for (field, value) in fields.iter().zip(values) {
        if field.nullable {
            out.push(if *value == Value::Null { 0 } else { 1 });
            if *value == Value::Null {
                continue;
            }
        }
        match (field.field_type, value) {
            (FieldType::Int, Value::Int(v)) => put_u64(out, *v as u64),
            (FieldType::Float, Value::Float(v)) => put_u64(out, v.to_bits()),
            (FieldType::Bool, Value::Bool(v)) => out.push(*v as u8),
            (FieldType::String, Value::String(s)) => put_str(out, s),
            (ty, v) => {
                return Err(ForgeDbError::Snapshot(format!(
                    "field '{}' declared {} holds a {} value",
                    field.name,
                    ty.type_name(),
                    v.type_name()
                )))
            }
        }
    }
    Ok(())
}

fn encode_key(out: &mut Vec<u8>, field_type: FieldType, key: &KeyValue) -> Result<()> {
    match (field_type, key) {
        (FieldType::Int, KeyValue::Int(v)) => put_u64(out, *v as u64),
        (FieldType::String, KeyValue::Str(s)) => put_str(out, s),
        (ty, key) => {
            return Err(ForgeDbError::Snapshot(format!(
                "index key {key} on a {} field",
                ty.type_name()
            )))
        }
    }
    Ok(())
}

fn decode_key(cur: &mut Cursor<'_>, field_type: FieldType) -> Result<KeyValue> {
    match field_type {
        FieldType::Int => Ok(KeyValue::Int(cur.read_u64()? as i64)),
        FieldType::String => Ok(KeyValue::Str(cur.read_str()?.to_string())),
        other => Err(ForgeDbError::Snapshot(format!(
            "{} field used as an index key",
            other.type_name()
        ))),
    }
}

/// Encode a whole snapshot file. `generation` selects the live-delta
/// framing; `None` emits a full snapshot.
pub(crate) fn encode_file(generation: Option<u64>, tables: &[CompiledTable]) -> Vec<u8> {
    let mut sorted: Vec<&CompiledTable> = tables.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut header = Vec::new();
    header.extend_from_slice(if generation.is_some() {
        &LIVE_MAGIC
    } else {
        &SNAPSHOT_MAGIC
    });
    put_u16(&mut header, FORMAT_MAJOR);
    put_u16(&mut header, FORMAT_MINOR);
    if let Some(generation) = generation {
        put_u64(&mut header, generation);
    }
    put_u32(&mut header, sorted.len() as u32);

    // Directory entries have a fixed length once names and field layouts
    // are known, so measure with zero offsets, then emit with real ones.
    let measure: usize = sorted
        .iter()
        .map(|t| encode_directory_entry(t, 0, 0).len())
        .sum();

    let mut offset = (header.len() + measure) as u64;
    let mut directory = Vec::new();
    for table in &sorted {
        directory.extend_from_slice(&encode_directory_entry(
            table,
            offset,
            table.block.len() as u64,
        ));
        offset += table.block.len() as u64;
    }

    let mut out = header;
    out.extend_from_slice(&directory);
    for table in &sorted {
        out.extend_from_slice(&table.block);
    }
    out
}

fn encode_directory_entry(table: &CompiledTable, offset: u64, len: u64) -> Vec<u8> {
    let mut out = Vec::new();
    put_str(&mut out, &table.name);
    put_u32(&mut out, table.version);
    put_u32(&mut out, table.record_count);
    put_u16(&mut out, table.fields.len() as u16);
    for field in &table.fields {
        put_str(&mut out, &field.name);
        out.push(type_code(field.field_type));
        out.push(field.nullable as u8);
        out.push(match field.key {
            None => 0,
            Some(KeyKind::Primary) => 1,
            Some(KeyKind::Secondary) => 2,
        });
        out.push(field.unique as u8);
        out.push(field.index.is_some() as u8);
        put_u32(&mut out, field.index.unwrap_or(0));
    }
    put_u64(&mut out, offset);
    put_u64(&mut out, len);
    out
}

fn type_code(ty: FieldType) -> u8 {
    match ty {
        FieldType::Int => TYPE_INT,
        FieldType::Float => TYPE_FLOAT,
        FieldType::Bool => TYPE_BOOL,
        FieldType::String => TYPE_STRING,
    }
}

fn type_from_code(code: u8) -> Result<FieldType> {
    match code {
        TYPE_INT => Ok(FieldType::Int),
        TYPE_FLOAT => Ok(FieldType::Float),
        TYPE_BOOL => Ok(FieldType::Bool),
        TYPE_STRING => Ok(FieldType::String),
        other => Err(ForgeDbError::Snapshot(format!("unknown field type code {other}"))),
    }
}

/// What kind of file a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    Snapshot,
    Live,
}

#[derive(Debug)]
pub(crate) struct ParsedFile {
    pub kind: FileKind,
    pub major: u16,
    pub minor: u16,
    /// Generation counter of a live delta; 0 for a full snapshot.
    pub generation: u64,
    pub tables: Vec<ParsedTable>,
}

#[derive(Debug)]
pub(crate) struct ParsedTable {
    pub name: String,
    pub version: u32,
    pub record_count: u32,
    pub fields: Vec<FieldDefinition>,
    /// Byte range of the table block within the file buffer.
    pub block: std::ops::Range<usize>,
}

/// Parse header and directory. Refuses unknown magics and any major
/// format version this build does not read, rather than misreading.
pub(crate) fn parse_file(buf: &[u8]) -> Result<ParsedFile> {
    let mut cur = Cursor::new(buf);
    let magic = cur.take(4)?;
    let kind = if magic == SNAPSHOT_MAGIC.as_slice() {
        FileKind::Snapshot
    } else if magic == LIVE_MAGIC.as_slice() {
        FileKind::Live
    } else {
        return Err(ForgeDbError::Snapshot("not a forgedb snapshot file".into()));
    };

    let major = cur.read_u16()?;
    let minor = cur.read_u16()?;
    if major != FORMAT_MAJOR {
        return Err(ForgeDbError::Snapshot(format!(
            "unsupported snapshot format {major}.{minor}; this build reads {FORMAT_MAJOR}.x"
        )));
    }

    let generation = if kind == FileKind::Live { cur.read_u64()? } else { 0 };

    let table_count = cur.read_u32()?;
    let mut tables = Vec::with_capacity(table_count as usize);
    for _ in 0..table_count {
        let name = cur.read_str()?.to_string();
        let version = cur.read_u32()?;
        let record_count = cur.read_u32()?;
        let field_count = cur.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field_name = cur.read_str()?.to_string();
            let field_type = type_from_code(cur.read_u8()?)?;
            let nullable = cur.read_u8()? != 0;
            let key = match cur.read_u8()? {
                0 => None,
                1 => Some(KeyKind::Primary),
                2 => Some(KeyKind::Secondary),
                other => {
                    return Err(ForgeDbError::Snapshot(format!("unknown key kind {other}")))
                }
            };
            let unique = cur.read_u8()? != 0;
            let has_index = cur.read_u8()? != 0;
            let index = cur.read_u32()?;
            fields.push(FieldDefinition {
                name: field_name,
                field_type,
                key,
                index: has_index.then_some(index),
                unique,
                nullable,
                reference: None,
            });
        }
        let offset = cur.read_u64()? as usize;
        let len = cur.read_u64()? as usize;
        if offset.checked_add(len).map_or(true, |end| end > buf.len()) {
            return Err(ForgeDbError::Snapshot(format!(
                "table '{name}' block runs past end of file"
            )));
        }
        tables.push(ParsedTable {
            name,
            version,
            record_count,
            fields,
            block: offset..offset + len,
        });
    }

    Ok(ParsedFile {
        kind,
        major,
        minor,
        generation,
        tables,
    })
}

/// Index metadata of one table, parsed eagerly at load time. Small next
/// to the record data, which stays borrowed from the file buffer.
#[derive(Debug)]
pub(crate) struct TableMeta {
    /// `record_count + 1` offsets into the records region.
    pub record_offsets: Vec<u32>,
    /// Start of the records region, relative to the block.
    pub records_start: usize,
    pub unique: Vec<UniqueIndex>,
    pub grouped: Vec<GroupedIndex>,
}

pub(crate) fn parse_table_block(
    fields: &[FieldDefinition],
    record_count: u32,
    block: &[u8],
) -> Result<TableMeta> {
    let mut cur = Cursor::new(block);
    let mut record_offsets = Vec::with_capacity(record_count as usize + 1);
    for _ in 0..=record_count {
        record_offsets.push(cur.read_u32()?);
    }
    let records_start = cur.pos();
    let records_len = *record_offsets.last().unwrap_or(&0) as usize;
    cur.skip(records_len)?;

    let field_type_at = |pos: u16| -> Result<FieldType> {
        fields
            .get(pos as usize)
            .map(|f| f.field_type)
            .ok_or_else(|| ForgeDbError::Snapshot(format!("index names field {pos} out of range")))
    };

    let unique_count = cur.read_u16()?;
    let mut unique = Vec::with_capacity(unique_count as usize);
    for _ in 0..unique_count {
        let field = cur.read_u16()?;
        let field_type = field_type_at(field)?;
        let n = cur.read_u32()?;
        let mut entries = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let key = decode_key(&mut cur, field_type)?;
            let pos = cur.read_u32()?;
            entries.push((key, pos));
        }
        unique.push(UniqueIndex {
            field: field as usize,
            entries,
        });
    }

    let grouped_count = cur.read_u16()?;
    let mut grouped = Vec::with_capacity(grouped_count as usize);
    for _ in 0..grouped_count {
        let field = cur.read_u16()?;
        let field_type = field_type_at(field)?;
        let n = cur.read_u32()?;
        let mut permutation = Vec::with_capacity(n as usize);
        for _ in 0..n {
            permutation.push(cur.read_u32()?);
        }
        let group_count = cur.read_u32()?;
        let mut groups = Vec::with_capacity(group_count as usize);
        for _ in 0..group_count {
            let key = decode_key(&mut cur, field_type)?;
            let start = cur.read_u32()?;
            let len = cur.read_u32()?;
            groups.push(Group { key, start, len });
        }
        grouped.push(GroupedIndex {
            field: field as usize,
            permutation,
            groups,
        });
    }

    Ok(TableMeta {
        record_offsets,
        records_start,
        unique,
        grouped,
    })
}

// ---- primitive encoding ----

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_str(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

/// Bounds-checked reading cursor over a byte buffer. Every truncation is
/// a `Snapshot` error, never a panic.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| ForgeDbError::Snapshot("unexpected end of file".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    pub fn read_str(&mut self) -> Result<&'a str> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map_err(|_| ForgeDbError::Snapshot("string field is not valid UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;

    fn compiled_item() -> CompiledTable {
        let schema = parse_schema_str(
            r#"
tables:
  Item:
    version: 3
    fields:
      - { name: Id, type: int, key: primary }
      - { name: Category, type: string, key: secondary, index: 0 }
      - { name: Weight, type: float, nullable: true }
"#,
        )
        .unwrap();
        let table = &schema.tables["Item"];
        let records = vec![
            Record {
                row: 0,
                values: vec![Value::Int(2), Value::String("Armor".into()), Value::Null],
            },
            Record {
                row: 1,
                values: vec![
                    Value::Int(1),
                    Value::String("Weapon".into()),
                    Value::Float(1.5),
                ],
            },
        ];
        let indexes = TableIndexes::build(table, &records).unwrap();
        compile_table("Item", table, &records, &indexes).unwrap()
    }

    #[test]
    fn test_file_round_trip() {
        let compiled = compiled_item();
        let bytes = encode_file(None, &[compiled.clone()]);
        let parsed = parse_file(&bytes).unwrap();

        assert_eq!(parsed.kind, FileKind::Snapshot);
        assert_eq!((parsed.major, parsed.minor), (FORMAT_MAJOR, FORMAT_MINOR));
        assert_eq!(parsed.generation, 0);
        assert_eq!(parsed.tables.len(), 1);

        let table = &parsed.tables[0];
        assert_eq!(table.name, "Item");
        assert_eq!(table.version, 3);
        assert_eq!(table.record_count, 2);
        assert_eq!(table.fields.len(), 3);
        assert_eq!(&bytes[table.block.clone()], compiled.block.as_slice());

        let meta = parse_table_block(&table.fields, table.record_count, &compiled.block).unwrap();
        assert_eq!(meta.record_offsets.len(), 3);
        assert_eq!(meta.grouped.len(), 1);
        assert_eq!(meta.unique.len(), 0);
    }

    #[test]
    fn test_live_framing_carries_generation() {
        let compiled = compiled_item();
        let bytes = encode_file(Some(7), &[compiled]);
        let parsed = parse_file(&bytes).unwrap();
        assert_eq!(parsed.kind, FileKind::Live);
        assert_eq!(parsed.generation, 7);
    }

    #[test]
    fn test_unknown_major_version_is_refused() {
        let compiled = compiled_item();
        let mut bytes = encode_file(None, &[compiled]);
        // Major version lives right after the 4-byte magic.
        bytes[4] = 0xEE;
        bytes[5] = 0xEE;
        let err = parse_file(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported snapshot format"));
    }

    #[test]
    fn test_bad_magic_is_refused() {
        let err = parse_file(b"NOPEnope").unwrap_err();
        assert!(err.to_string().contains("not a forgedb snapshot"));
    }

    #[test]
    fn test_truncated_file_is_an_error_not_a_panic() {
        let compiled = compiled_item();
        let bytes = encode_file(None, &[compiled]);
        assert!(parse_file(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = encode_file(None, &[compiled_item()]);
        let b = encode_file(None, &[compiled_item()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_compiled_tables_compare_whole() {
        // Equality covers the field layout, not just the block bytes.
        assert_eq!(compiled_item(), compiled_item());
        let mut changed = compiled_item();
        changed.fields[0].nullable = true;
        assert_ne!(compiled_item(), changed);
    }

    #[test]
    fn test_key_type_mismatch_is_an_encode_error() {
        let mut out = Vec::new();
        let err = encode_key(&mut out, FieldType::Int, &KeyValue::Str("x".into())).unwrap_err();
        assert!(err.to_string().contains("index key"));
        assert!(out.is_empty());
    }
}
