//! ForgeDB code generation - generates typed table accessors from schema.yaml.
//!
//! The main entry point is [`generate_from_schema`], which reads a schema.yaml
//! file and writes a Rust source file with typed row views, table handles, and
//! a `DatabaseExt` trait over `forgedb::Database`.

mod db_gen;
mod generator;
mod table_gen;
pub mod type_utils;

use forgedb::schema::SchemaDefinition;
use std::path::Path;

/// Generate typed accessors from a schema.yaml file.
///
/// Reads the schema at `schema_path` and writes the generated source to
/// `output_path`. Intended to be called from a `build.rs` build script or
/// by the CLI after an export.
///
/// # Example
///
/// ```no_run
/// // In build.rs:
/// forgedb_codegen::generate_from_schema("schema.yaml", "src/generated.rs").unwrap();
/// ```
pub fn generate_from_schema(
    schema_path: &str,
    output_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let schema = forgedb::schema::parse_schema(Path::new(schema_path))?;
    let tokens = generator::generate_all(&schema);
    let formatted = generator::format_token_stream(&tokens);
    std::fs::write(output_path, formatted)?;
    Ok(())
}

/// Generate typed accessors from a schema YAML string.
///
/// Like [`generate_from_schema`] but takes the schema content directly
/// instead of reading from a file. Useful for testing.
pub fn generate_from_schema_str(schema_yaml: &str) -> Result<String, Box<dyn std::error::Error>> {
    let schema = forgedb::schema::parse_schema_str(schema_yaml)?;
    let tokens = generator::generate_all(&schema);
    let formatted = generator::format_token_stream(&tokens);
    Ok(formatted)
}

/// Generate typed accessors for a subset of tables, typically the ones an
/// export actually wrote to the snapshot.
pub fn generate_for_tables(schema: &SchemaDefinition, tables: &[String]) -> String {
    let names: Vec<&str> = tables.iter().map(String::as_str).collect();
    let tokens = generator::generate_tables(schema, &names);
    generator::format_token_stream(&tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SCHEMA: &str = r#"
tables:
  Item:
    version: 2
    fields:
      - { name: Id, type: int, key: primary }
      - { name: Name, type: string }
      - { name: Category, type: string, key: secondary, index: 0 }
      - { name: Rarity, type: int, key: secondary, index: 1, unique: true }
      - { name: Weight, type: float, nullable: true }
      - { name: Stackable, type: bool }

  Npc:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
      - { name: Name, type: string, key: secondary, index: 0, unique: true }
      - { name: HomeZone, type: string, key: secondary, index: 1 }
      - { name: FavoriteItemId, type: int, nullable: true, ref: { table: Item, field: Id } }

  QuestStep:
    version: 1
    fields:
      - { name: Key, type: string, key: primary }
      - { name: Type, type: string }
      - { name: NpcId, type: int, ref: { table: Npc, field: Id } }
"#;

    #[test]
    fn test_generate_from_schema_str_full() {
        let result = generate_from_schema_str(TEST_SCHEMA);
        assert!(result.is_ok(), "Generation failed: {:?}", result.err());

        let code = result.unwrap();

        // Verify it's valid Rust
        assert!(
            syn::parse_file(&code).is_ok(),
            "Generated code is not valid Rust:\n{}",
            &code[..code.len().min(2000)]
        );

        // Row views
        assert!(code.contains("pub struct ItemRow"), "Missing ItemRow");
        assert!(code.contains("pub struct NpcRow"), "Missing NpcRow");
        assert!(code.contains("pub struct QuestStepRow"), "Missing QuestStepRow");

        // Table handles and range results
        assert!(code.contains("pub struct ItemTable"), "Missing ItemTable");
        assert!(code.contains("pub struct ItemRows"), "Missing ItemRows");

        // Typed field accessors, including nullable and keyword-clashing names
        assert!(code.contains("fn weight"), "Missing weight accessor");
        assert!(code.contains("Option<f64>"), "Missing nullable float type");
        assert!(code.contains("fn stackable"), "Missing bool accessor");
        assert!(code.contains("fn r#type"), "Missing raw-identifier accessor");

        // Primary-key lookups follow the key's type
        assert!(code.contains("key: i64"), "Missing int key param");
        assert!(code.contains("key: &str"), "Missing string key param");

        // Secondary lookups: unique -> Option, non-unique -> range
        assert!(code.contains("fn by_rarity"), "Missing unique lookup");
        assert!(code.contains("fn by_home_zone"), "Missing range lookup");

        // Database extension
        assert!(code.contains("DatabaseExt"), "Missing DatabaseExt trait");
        assert!(code.contains("fn item"), "Missing item accessor");
        assert!(code.contains("fn npc"), "Missing npc accessor");
        assert!(code.contains("fn quest_step"), "Missing quest_step accessor");
    }

    #[test]
    fn test_generate_minimal_schema() {
        let schema = r#"
tables:
  Item:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
"#;
        let result = generate_from_schema_str(schema);
        assert!(result.is_ok(), "Generation failed: {:?}", result.err());

        let code = result.unwrap();
        assert!(syn::parse_file(&code).is_ok(), "Not valid Rust");
        assert!(code.contains("pub struct ItemRow"));
        assert!(code.contains("pub struct ItemTable"));
    }

    #[test]
    fn test_generate_for_written_tables_only() {
        let schema = forgedb::schema::parse_schema_str(TEST_SCHEMA).unwrap();
        let code = generate_for_tables(&schema, &["Item".to_string()]);

        assert!(syn::parse_file(&code).is_ok(), "Not valid Rust");
        assert!(code.contains("pub struct ItemTable"));
        assert!(!code.contains("pub struct NpcTable"));
        assert!(!code.contains("fn quest_step"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let first = generate_from_schema_str(TEST_SCHEMA).unwrap();
        let second = generate_from_schema_str(TEST_SCHEMA).unwrap();
        assert_eq!(first, second);
    }
}
