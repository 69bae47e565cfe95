use forgedb::schema::SchemaDefinition;
use proc_macro2::TokenStream;

use crate::{db_gen, table_gen};

const HEADER: &str = "// Generated by forgedb-codegen. Do not edit.\n\n";

/// Generate accessors for the named tables only. Tables excluded from
/// the snapshot get no accessor, so stale lookups fail at compile time.
pub fn generate_tables(schema: &SchemaDefinition, tables: &[&str]) -> TokenStream {
    let mut tokens = TokenStream::new();
    for (name, table) in schema.tables.iter().filter(|(n, _)| tables.contains(&n.as_str())) {
        tokens.extend(table_gen::generate_table(name, table));
    }
    tokens.extend(db_gen::generate_database_ext(schema, tables));
    tokens
}

/// Generate accessors for every table in the schema.
pub fn generate_all(schema: &SchemaDefinition) -> TokenStream {
    let names: Vec<&str> = schema.tables.keys().map(String::as_str).collect();
    generate_tables(schema, &names)
}

/// Pretty-print a token stream as a Rust source file. Falls back to the
/// raw token text if the stream does not parse, so a generator bug still
/// produces something inspectable.
pub fn format_token_stream(tokens: &TokenStream) -> String {
    match syn::parse2::<syn::File>(tokens.clone()) {
        Ok(file) => format!("{HEADER}{}", prettyplease::unparse(&file)),
        Err(_) => tokens.to_string(),
    }
}
