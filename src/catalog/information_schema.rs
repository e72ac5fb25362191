// information_schema access
// Builds the metadata query sent by catalog updates and folds its result rows
// into schema descriptors.

use sqlparser::ast::Value as SqlValue;
use std::collections::HashMap;

use super::{SchemaDescriptor, SchemaTable, SchemaTableColumn};
use crate::batch::{Column, DataType, QueryResult, ResultSchema, Value};

/// Columns selected from information_schema.columns, in result order
pub const INFORMATION_SCHEMA_COLUMNS: [&str; 7] = [
    "table_catalog",
    "table_schema",
    "table_name",
    "column_name",
    "ordinal_position",
    "data_type",
    "is_nullable",
];

/// Result schema of the information_schema query
pub fn information_schema_result_schema() -> ResultSchema {
    ResultSchema::new(
        INFORMATION_SCHEMA_COLUMNS
            .iter()
            .map(|name| {
                let data_type = if *name == "ordinal_position" {
                    DataType::Integer
                } else {
                    DataType::Text
                };
                Column::new(*name, data_type, false)
            })
            .collect(),
    )
}

fn quote(literal: &str) -> String {
    SqlValue::SingleQuotedString(literal.to_string()).to_string()
}

/// Build the metadata query, optionally scoped to a catalog and a set of schemas
pub fn build_information_schema_query(catalog_name: Option<&str>, schema_names: &[String]) -> String {
    let mut query = format!(
        "SELECT {} FROM information_schema.columns",
        INFORMATION_SCHEMA_COLUMNS.join(", ")
    );
    let mut filters = Vec::new();
    if let Some(catalog) = catalog_name {
        filters.push(format!("table_catalog = {}", quote(catalog)));
    }
    if !schema_names.is_empty() {
        let quoted: Vec<String> = schema_names.iter().map(|s| quote(s)).collect();
        filters.push(format!("table_schema IN ({})", quoted.join(", ")));
    }
    if !filters.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&filters.join(" AND "));
    }
    query.push_str(" ORDER BY table_catalog, table_schema, table_name, ordinal_position");
    query
}

/// Group information_schema rows into descriptors.
/// Rows missing a catalog, schema, table or column name are skipped. Tables and
/// schemas keep the order in which they first appear, columns are sorted by
/// their ordinal position.
pub fn collect_schema_descriptors(result: &QueryResult) -> Vec<SchemaDescriptor> {
    let mut descriptors: Vec<SchemaDescriptor> = Vec::new();
    let mut schema_slots: HashMap<(String, String), usize> = HashMap::new();
    let mut table_slots: HashMap<(usize, String), usize> = HashMap::new();

    for batch in &result.batches {
        let index = |name: &str| batch.schema.column_index(name);
        let (Some(catalog_col), Some(schema_col), Some(table_col), Some(column_col)) = (
            index("table_catalog"),
            index("table_schema"),
            index("table_name"),
            index("column_name"),
        ) else {
            continue;
        };
        let ordinal_col = index("ordinal_position");

        for row in &batch.rows {
            let text = |col: usize| row.values.get(col).and_then(Value::as_text);
            let (Some(database), Some(schema), Some(table), Some(column)) =
                (text(catalog_col), text(schema_col), text(table_col), text(column_col))
            else {
                continue;
            };
            let ordinal_position = ordinal_col
                .and_then(|col| row.values.get(col))
                .and_then(Value::as_integer)
                .and_then(|v| u32::try_from(v).ok());

            let schema_slot = *schema_slots
                .entry((database.to_string(), schema.to_string()))
                .or_insert_with(|| {
                    descriptors.push(SchemaDescriptor {
                        database_name: database.to_string(),
                        schema_name: schema.to_string(),
                        tables: Vec::new(),
                    });
                    descriptors.len() - 1
                });
            let tables = &mut descriptors[schema_slot].tables;
            let table_slot = *table_slots
                .entry((schema_slot, table.to_string()))
                .or_insert_with(|| {
                    tables.push(SchemaTable {
                        table_name: table.to_string(),
                        columns: Vec::new(),
                    });
                    tables.len() - 1
                });
            tables[table_slot].columns.push(SchemaTableColumn {
                column_name: column.to_string(),
                ordinal_position,
            });
        }
    }

    for descriptor in &mut descriptors {
        for table in &mut descriptor.tables {
            table.columns.sort_by_key(|c| c.ordinal_position.unwrap_or(u32::MAX));
        }
    }
    descriptors
}
