use forgedb::schema::{FieldDefinition, FieldType};
use heck::{ToPascalCase, ToSnakeCase};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

/// Table struct name for a table.
/// e.g. "Item" -> "ItemTable", "quest_step" -> "QuestStepTable"
pub fn table_struct_name(table_name: &str) -> String {
    format!("{}Table", table_name.to_pascal_case())
}

/// Row view struct name for a table.
/// e.g. "Item" -> "ItemRow"
pub fn row_struct_name(table_name: &str) -> String {
    format!("{}Row", table_name.to_pascal_case())
}

/// Range result struct name for a table.
/// e.g. "Item" -> "ItemRows"
pub fn rows_struct_name(table_name: &str) -> String {
    format!("{}Rows", table_name.to_pascal_case())
}

/// Accessor method name on the database extension trait.
/// e.g. "Item" -> "item", "QuestStep" -> "quest_step"
pub fn table_method_name(table_name: &str) -> String {
    table_name.to_snake_case()
}

/// Lookup method name for a secondary-key field.
/// e.g. "Category" -> "by_category"
pub fn key_method_name(field_name: &str) -> String {
    format!("by_{}", field_name.to_snake_case())
}

/// Rust return type for a field accessor on a row view.
pub fn accessor_return_type(field: &FieldDefinition) -> TokenStream {
    let base = match field.field_type {
        FieldType::Int => quote! { i64 },
        FieldType::Float => quote! { f64 },
        FieldType::Bool => quote! { bool },
        FieldType::String => quote! { &'a str },
    };
    if field.nullable {
        quote! { forgedb::Result<Option<#base>> }
    } else {
        quote! { forgedb::Result<#base> }
    }
}

/// The `RecordView` method a field accessor delegates to.
pub fn accessor_view_method(field: &FieldDefinition) -> proc_macro2::Ident {
    let name = match (field.field_type, field.nullable) {
        (FieldType::Int, false) => "int",
        (FieldType::Int, true) => "opt_int",
        (FieldType::Float, false) => "float",
        (FieldType::Float, true) => "opt_float",
        (FieldType::Bool, false) => "boolean",
        (FieldType::Bool, true) => "opt_boolean",
        (FieldType::String, false) => "text",
        (FieldType::String, true) => "opt_text",
    };
    format_ident!("{}", name)
}

/// Parameter type for a typed key lookup. Only int and string fields
/// are keyable, which the schema registry enforces.
pub fn key_param_type(field: &FieldDefinition) -> TokenStream {
    match field.field_type {
        FieldType::String => quote! { &str },
        _ => quote! { i64 },
    }
}

/// Expression converting a typed key parameter into a `KeyValue`.
pub fn key_value_expr(field: &FieldDefinition, param: &proc_macro2::Ident) -> TokenStream {
    match field.field_type {
        FieldType::String => quote! { forgedb::KeyValue::Str(#param.to_owned()) },
        _ => quote! { forgedb::KeyValue::Int(#param) },
    }
}

/// Check if a field name is a Rust keyword and needs raw identifier syntax.
pub fn safe_field_ident(name: &str) -> proc_macro2::Ident {
    let snake = name.to_snake_case();
    match snake.as_str() {
        "type" | "struct" | "enum" | "fn" | "let" | "mut" | "ref" | "self" | "super" | "crate"
        | "mod" | "use" | "pub" | "impl" | "trait" | "for" | "loop" | "while" | "if" | "else"
        | "match" | "return" | "break" | "continue" | "as" | "in" | "where" | "async"
        | "await" | "dyn" | "move" | "static" | "const" | "unsafe" | "extern" | "true"
        | "false" | "abstract" | "become" | "box" | "do" | "final" | "macro" | "override"
        | "priv" | "typeof" | "unsized" | "virtual" | "yield" | "try" => {
            format_ident!("r#{}", snake)
        }
        _ => format_ident!("{}", snake),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_names() {
        assert_eq!(table_struct_name("Item"), "ItemTable");
        assert_eq!(row_struct_name("Item"), "ItemRow");
        assert_eq!(rows_struct_name("Item"), "ItemRows");
        assert_eq!(table_struct_name("quest_step"), "QuestStepTable");
    }

    #[test]
    fn test_method_names() {
        assert_eq!(table_method_name("Item"), "item");
        assert_eq!(table_method_name("QuestStep"), "quest_step");
        assert_eq!(key_method_name("Category"), "by_category");
        assert_eq!(key_method_name("OwnerId"), "by_owner_id");
    }

    #[test]
    fn test_safe_field_ident() {
        assert_eq!(safe_field_ident("Type").to_string(), "r#type");
        assert_eq!(safe_field_ident("Name").to_string(), "name");
        assert_eq!(safe_field_ident("OwnerId").to_string(), "owner_id");
    }
}
