use forgedb::schema::SchemaDefinition;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::type_utils::{table_method_name, table_struct_name};

/// Generate the DatabaseExt trait with typed table accessors.
pub fn generate_database_ext(schema: &SchemaDefinition, tables: &[&str]) -> TokenStream {
    let mut trait_methods = Vec::new();
    let mut impl_methods = Vec::new();

    // BTreeMap iteration keeps the output deterministic
    for (table_name, _) in schema.tables.iter().filter(|(n, _)| tables.contains(&n.as_str())) {
        let method_ident = format_ident!("{}", table_method_name(table_name));
        let struct_ident = format_ident!("{}", table_struct_name(table_name));
        let name_lit = table_name.as_str();

        trait_methods.push(quote! {
            fn #method_ident(&self) -> Option<#struct_ident<'_>>;
        });

        impl_methods.push(quote! {
            fn #method_ident(&self) -> Option<#struct_ident<'_>> {
                self.database().table(#name_lit).map(#struct_ident::from_reader)
            }
        });
    }

    quote! {
        /// Extension trait providing typed table accessors. A table
        /// accessor returns None when the snapshot does not carry that
        /// table.
        pub trait DatabaseExt {
            fn database(&self) -> &forgedb::Database;

            #(#trait_methods)*
        }

        impl DatabaseExt for forgedb::Database {
            fn database(&self) -> &forgedb::Database {
                self
            }

            #(#impl_methods)*
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgedb::schema::parse_schema_str;

    #[test]
    fn test_generate_database_ext_basic() {
        let schema = parse_schema_str(
            r#"
tables:
  Item:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
  QuestStep:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
"#,
        )
        .unwrap();

        let code = generate_database_ext(&schema, &["Item", "QuestStep"]).to_string();
        assert!(code.contains("DatabaseExt"));
        assert!(code.contains("fn item"));
        assert!(code.contains("fn quest_step"));
        assert!(code.contains("ItemTable"));
    }

    #[test]
    fn test_filtered_tables_are_omitted() {
        let schema = parse_schema_str(
            r#"
tables:
  Item:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
  Broken:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
"#,
        )
        .unwrap();

        let code = generate_database_ext(&schema, &["Item"]).to_string();
        assert!(code.contains("fn item"));
        assert!(!code.contains("fn broken"));
    }
}
