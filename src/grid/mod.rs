// ABOUTME: Host grid contract: typed columns and rows of (text, native) cells
// ABOUTME: Includes an in-memory grid used by the CLI and by import results

pub mod document;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use document::GridDocument;

/// Declared type of a grid column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[serde(alias = "int", alias = "long", alias = "bigint")]
    Integer,
    #[serde(alias = "double", alias = "float", alias = "number", alias = "decimal")]
    Real,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "datetime", alias = "date")]
    Timestamp,
    #[default]
    #[serde(alias = "text")]
    String,
}

/// One column of the source grid.
///
/// Names match destination columns case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(rename = "key", default)]
    pub is_key: bool,
    #[serde(rename = "default", default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_key: false,
            default_value: None,
            enabled: true,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Case-insensitive name comparison used for every source/destination match.
    pub fn matches(&self, name: &str) -> bool {
        names_match(&self.name, name)
    }
}

/// Case-insensitive column-name equality (Unicode aware).
pub fn names_match(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Native typed value supplied by the host alongside the normalized text.
#[derive(Debug, Clone, PartialEq)]
pub enum GridValue {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl fmt::Display for GridValue {
    /// Locale-invariant normalized text form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridValue::Integer(i) => write!(f, "{}", i),
            GridValue::Real(r) if r.is_nan() => f.write_str("NaN"),
            GridValue::Real(r) if r.is_infinite() => {
                f.write_str(if *r > 0.0 { "∞" } else { "-∞" })
            }
            GridValue::Real(r) => write!(f, "{}", r),
            GridValue::Boolean(b) => write!(f, "{}", b),
            GridValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S%.f")),
            GridValue::Text(s) => f.write_str(s),
        }
    }
}

/// A single grid cell: the host's normalized string plus its native value.
///
/// `text == None` means the host supplied no value at all, which is distinct
/// from an empty string.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GridCell {
    pub text: Option<String>,
    pub native: Option<GridValue>,
}

impl GridCell {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            text: Some(value.into()),
            native: None,
        }
    }

    /// Build a cell from a native value, deriving the normalized text from it.
    pub fn native(value: GridValue) -> Self {
        Self {
            text: Some(value.to_string()),
            native: Some(value),
        }
    }
}

impl From<Option<GridValue>> for GridCell {
    fn from(value: Option<GridValue>) -> Self {
        value.map(GridCell::native).unwrap_or_default()
    }
}

/// Read-only view of a host grid table.
pub trait GridTable: Sync {
    /// Columns in grid order.
    fn columns(&self) -> &[SourceColumn];

    /// Rows in grid order; each row has one cell per column.
    fn rows(&self) -> Box<dyn Iterator<Item = &[GridCell]> + '_>;

    fn row_count(&self) -> usize {
        self.rows().count()
    }
}

/// Grid held entirely in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryGrid {
    columns: Vec<SourceColumn>,
    rows: Vec<Vec<GridCell>>,
}

impl MemoryGrid {
    pub fn new(columns: Vec<SourceColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row. Short rows are padded with empty cells, long rows truncated.
    pub fn push_row(&mut self, mut cells: Vec<GridCell>) {
        cells.resize_with(self.columns.len(), GridCell::empty);
        self.rows.push(cells);
    }

    pub fn with_row(mut self, cells: Vec<GridCell>) -> Self {
        self.push_row(cells);
        self
    }
}

impl GridTable for MemoryGrid {
    fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    fn rows(&self) -> Box<dyn Iterator<Item = &[GridCell]> + '_> {
        Box::new(self.rows.iter().map(Vec::as_slice))
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_native_cell_derives_invariant_text() {
        assert_eq!(
            GridCell::native(GridValue::Real(1234.5)).text.as_deref(),
            Some("1234.5")
        );
        assert_eq!(
            GridCell::native(GridValue::Real(f64::NEG_INFINITY))
                .text
                .as_deref(),
            Some("-∞")
        );
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            GridCell::native(GridValue::Timestamp(ts)).text.as_deref(),
            Some("2024-03-01T08:30:00")
        );
    }

    #[test]
    fn test_push_row_pads_to_column_count() {
        let grid = MemoryGrid::new(vec![
            SourceColumn::new("id", ColumnType::Integer).key(),
            SourceColumn::new("name", ColumnType::String),
        ])
        .with_row(vec![GridCell::text("1")]);

        let rows: Vec<&[GridCell]> = grid.rows().collect();
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[0][1], GridCell::empty());
        assert_eq!(grid.row_count(), 1);
    }

    #[test]
    fn test_column_matching_is_case_insensitive() {
        let column = SourceColumn::new("UnitPrice", ColumnType::Real);
        assert!(column.matches("unitprice"));
        assert!(column.matches("UNITPRICE"));
        assert!(!column.matches("unit_price"));
    }
}
