use forgedb::schema::TableDefinition;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::type_utils::{
    accessor_return_type, accessor_view_method, key_method_name, key_param_type, key_value_expr,
    row_struct_name, rows_struct_name, safe_field_ident, table_struct_name,
};

/// Generate the row view, table handle, and range result types for one
/// table.
pub fn generate_table(table_name: &str, table: &TableDefinition) -> TokenStream {
    let row_ident = format_ident!("{}", row_struct_name(table_name));
    let table_ident = format_ident!("{}", table_struct_name(table_name));
    let rows_ident = format_ident!("{}", rows_struct_name(table_name));

    let accessors: Vec<TokenStream> = table
        .fields
        .iter()
        .enumerate()
        .map(|(pos, field)| {
            let method = safe_field_ident(&field.name);
            let return_type = accessor_return_type(field);
            let view_method = accessor_view_method(field);
            quote! {
                pub fn #method(&self) -> #return_type {
                    self.view.#view_method(#pos)
                }
            }
        })
        .collect();

    let pk_lookup = table.primary_field().map(|(_, field)| {
        let param = format_ident!("key");
        let param_type = key_param_type(field);
        let key_expr = key_value_expr(field, &param);
        quote! {
            pub fn get(&self, #param: #param_type) -> forgedb::Result<Option<#row_ident<'a>>> {
                Ok(self.reader.get(&#key_expr)?.map(#row_ident::from_view))
            }
        }
    });

    let key_lookups: Vec<TokenStream> = table
        .secondary_fields()
        .into_iter()
        .map(|(_, field)| {
            let method = format_ident!("{}", key_method_name(&field.name));
            let param = format_ident!("key");
            let param_type = key_param_type(field);
            let key_expr = key_value_expr(field, &param);
            let field_name = &field.name;
            if field.unique {
                quote! {
                    pub fn #method(&self, #param: #param_type) -> forgedb::Result<Option<#row_ident<'a>>> {
                        Ok(self.reader.get_unique(#field_name, &#key_expr)?.map(#row_ident::from_view))
                    }
                }
            } else {
                quote! {
                    pub fn #method(&self, #param: #param_type) -> forgedb::Result<#rows_ident<'a>> {
                        Ok(#rows_ident {
                            range: self.reader.range(#field_name, &#key_expr)?,
                        })
                    }
                }
            }
        })
        .collect();

    let row_doc = format!(" A typed row of the `{table_name}` table.");
    let table_doc = format!(" Typed handle for the `{table_name}` table.");
    let rows_doc = format!(" A contiguous key range of `{table_name}` rows.");

    quote! {
        #[doc = #row_doc]
        #[derive(Clone, Copy)]
        pub struct #row_ident<'a> {
            view: forgedb::RecordView<'a>,
        }

        impl<'a> #row_ident<'a> {
            pub fn from_view(view: forgedb::RecordView<'a>) -> Self {
                Self { view }
            }

            pub fn view(&self) -> forgedb::RecordView<'a> {
                self.view
            }

            #(#accessors)*
        }

        #[doc = #table_doc]
        #[derive(Clone, Copy)]
        pub struct #table_ident<'a> {
            reader: forgedb::TableReader<'a>,
        }

        impl<'a> #table_ident<'a> {
            pub fn from_reader(reader: forgedb::TableReader<'a>) -> Self {
                Self { reader }
            }

            pub fn reader(&self) -> forgedb::TableReader<'a> {
                self.reader
            }

            pub fn len(&self) -> usize {
                self.reader.len()
            }

            pub fn is_empty(&self) -> bool {
                self.reader.is_empty()
            }

            pub fn schema_version(&self) -> u32 {
                self.reader.schema_version()
            }

            pub fn at(&self, pos: u32) -> forgedb::Result<#row_ident<'a>> {
                Ok(#row_ident::from_view(self.reader.record(pos)?))
            }

            pub fn iter(&self) -> impl Iterator<Item = forgedb::Result<#row_ident<'a>>> + 'a {
                let reader = self.reader;
                (0..reader.len() as u32)
                    .map(move |pos| Ok(#row_ident::from_view(reader.record(pos)?)))
            }

            #pk_lookup

            #(#key_lookups)*
        }

        #[doc = #rows_doc]
        #[derive(Clone, Copy)]
        pub struct #rows_ident<'a> {
            range: forgedb::RangeView<'a>,
        }

        impl<'a> #rows_ident<'a> {
            pub fn len(&self) -> usize {
                self.range.len()
            }

            pub fn is_empty(&self) -> bool {
                self.range.is_empty()
            }

            pub fn get(&self, i: usize) -> Option<forgedb::Result<#row_ident<'a>>> {
                self.range.get(i).map(|r| r.map(#row_ident::from_view))
            }

            pub fn iter(&self) -> impl Iterator<Item = forgedb::Result<#row_ident<'a>>> + 'a {
                self.range.iter().map(|r| r.map(#row_ident::from_view))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgedb::schema::parse_schema_str;

    #[test]
    fn test_generate_table_surface() {
        let schema = parse_schema_str(
            r#"
tables:
  Item:
    version: 1
    fields:
      - { name: Id, type: int, key: primary }
      - { name: Name, type: string }
      - { name: Category, type: string, key: secondary, index: 0 }
      - { name: Rarity, type: int, key: secondary, index: 1, unique: true }
      - { name: Weight, type: float, nullable: true }
"#,
        )
        .unwrap();

        let code = generate_table("Item", &schema.tables["Item"]).to_string();
        assert!(code.contains("pub struct ItemRow"));
        assert!(code.contains("pub struct ItemTable"));
        assert!(code.contains("pub struct ItemRows"));
        assert!(code.contains("fn get"));
        assert!(code.contains("fn by_category"));
        assert!(code.contains("fn by_rarity"));
        assert!(code.contains("fn weight"));
    }
}
