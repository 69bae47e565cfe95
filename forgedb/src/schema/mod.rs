mod parser;
mod registry;
mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use registry::validate_schema;
pub use types::{
    FieldDefinition, FieldType, KeyKind, RefTarget, SchemaDefinition, TableDefinition,
};
