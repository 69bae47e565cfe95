use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level schema definition parsed from schema.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub tables: BTreeMap<String, TableDefinition>,
}

/// Definition of a single table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Schema version, stamped into every snapshot. Must be >= 1.
    pub version: u32,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Definition of a single field in a table. Fields keep their declared
/// order; record values are stored positionally against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub key: Option<KeyKind>,
    /// Order number of a secondary key, unique per table.
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(rename = "ref", default)]
    pub reference: Option<RefTarget>,
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int,
    Float,
    Bool,
    String,
}

impl FieldType {
    /// Key fields need a total order and a stable encoding; only int and
    /// string qualify.
    pub fn is_keyable(self) -> bool {
        matches!(self, FieldType::Int | FieldType::String)
    }

    pub fn type_name(self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::String => "string",
        }
    }
}

/// Kind of key a field carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Primary,
    Secondary,
}

/// Foreign-key target: a `(table, field)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefTarget {
    pub table: String,
    pub field: String,
}

impl TableDefinition {
    /// Position and definition of the primary-key field. Registry
    /// validation guarantees exactly one exists on a valid table.
    pub fn primary_field(&self) -> Option<(usize, &FieldDefinition)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.key == Some(KeyKind::Primary))
    }

    /// Secondary-key fields with their positions, ordered by their
    /// declared index number.
    pub fn secondary_fields(&self) -> Vec<(usize, &FieldDefinition)> {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.key == Some(KeyKind::Secondary))
            .collect();
        fields.sort_by_key(|(_, f)| f.index);
        fields
    }

    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}
