// Result batches
// Query results arrive as a sequence of record batches that share one schema.
// This module holds the value model of those batches and the tabular rendering
// used by the shell.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single cell value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    /// Convert the value into its display string
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
        }
    }

    /// Borrow the text payload, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read the value as an integer, if it is one
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Approximate in-memory size, used for byte counters
    pub fn byte_size(&self) -> usize {
        match self {
            Value::Null => 1,
            Value::Integer(_) | Value::Float(_) => 8,
            Value::Text(s) => s.len(),
            Value::Boolean(_) => 1,
        }
    }
}

/// A single result row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// The data types a result column can carry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
}

/// A result column definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// The schema shared by all batches of one result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultSchema {
    pub columns: Vec<Column>,
}

impl ResultSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Find the index of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A chunk of result rows
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    pub schema: ResultSchema,
    pub rows: Vec<Row>,
}

impl RecordBatch {
    pub fn new(schema: ResultSchema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Approximate payload size of the batch
    pub fn byte_size(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|row| row.values.iter())
            .map(Value::byte_size)
            .sum()
    }

    /// Read a cell by row index and column name
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.schema.column_index(column)?;
        self.rows.get(row)?.values.get(col)
    }
}

/// The collected result of a finished query
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub schema: Option<ResultSchema>,
    pub batches: Vec<RecordBatch>,
    pub metadata: HashMap<String, String>,
}

impl QueryResult {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Iterate over all rows of all batches in delivery order
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.batches.iter().flat_map(|b| b.rows.iter())
    }

    /// Format the result as a table for display
    pub fn format(&self) -> String {
        let column_names = self
            .schema
            .as_ref()
            .map(ResultSchema::column_names)
            .unwrap_or_default();
        if self.num_rows() == 0 {
            return "No rows returned".to_string();
        }

        // Column widths
        let mut widths: Vec<usize> = column_names.iter().map(|c| c.chars().count()).collect();
        for row in self.rows() {
            for (i, value) in row.values.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(value.to_display().chars().count());
                }
            }
        }

        let mut result = String::new();
        result.push_str(&border('┌', '┬', '┐', &widths));

        result.push('│');
        for (name, width) in column_names.iter().zip(&widths) {
            result.push_str(&format!(" {:<width$} │", name, width = width));
        }
        result.push('\n');

        result.push_str(&border('├', '┼', '┤', &widths));

        for row in self.rows() {
            result.push('│');
            for (value, width) in row.values.iter().zip(&widths) {
                result.push_str(&format!(" {:<width$} │", value.to_display(), width = width));
            }
            result.push('\n');
        }

        result.push_str(&border('└', '┴', '┘', &widths));
        result.push_str(&format!(
            "\n{} row(s) in {} batch(es)",
            self.num_rows(),
            self.batches.len()
        ));
        result
    }
}

fn border(left: char, middle: char, right: char, widths: &[usize]) -> String {
    let mut line = String::new();
    line.push(left);
    for (i, width) in widths.iter().enumerate() {
        line.push_str(&"─".repeat(width + 2));
        if i < widths.len() - 1 {
            line.push(middle);
        }
    }
    line.push(right);
    line.push('\n');
    line
}
