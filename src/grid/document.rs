// ABOUTME: JSON grid document format used by the CLI
// ABOUTME: Converts JSON cells into (normalized text, native value) grid cells and back

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use super::{ColumnType, GridCell, GridTable, GridValue, MemoryGrid, SourceColumn};

/// On-disk representation of a grid:
///
/// ```json
/// {
///   "columns": [
///     {"name": "id", "type": "integer", "key": true},
///     {"name": "price", "type": "real", "default": "0"},
///     {"name": "notes", "type": "string", "enabled": false}
///   ],
///   "rows": [[1, 9.5, "first"], [2, null, "second"]]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridDocument {
    pub columns: Vec<SourceColumn>,
    #[serde(default)]
    pub rows: Vec<Vec<JsonValue>>,
}

impl GridDocument {
    /// Load a grid document from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read grid file {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse grid file {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: GridDocument = serde_json::from_str(json)?;
        for (idx, row) in document.rows.iter().enumerate() {
            if row.len() > document.columns.len() {
                anyhow::bail!(
                    "Row {} has {} cells but the grid declares {} columns",
                    idx + 1,
                    row.len(),
                    document.columns.len()
                );
            }
        }
        Ok(document)
    }

    /// Convert into an in-memory grid, deriving text and native values per cell.
    pub fn into_grid(self) -> MemoryGrid {
        let mut grid = MemoryGrid::new(self.columns);
        let types: Vec<ColumnType> = grid.columns().iter().map(|c| c.column_type).collect();
        for row in self.rows {
            let cells = row
                .into_iter()
                .zip(types.iter())
                .map(|(value, column_type)| cell_from_json(value, *column_type))
                .collect();
            grid.push_row(cells);
        }
        grid
    }

    /// Snapshot any grid as a document (used to print import results).
    pub fn from_grid(grid: &dyn GridTable) -> Self {
        Self {
            columns: grid.columns().to_vec(),
            rows: grid
                .rows()
                .map(|cells| cells.iter().map(json_from_cell).collect())
                .collect(),
        }
    }
}

fn cell_from_json(value: JsonValue, column_type: ColumnType) -> GridCell {
    match value {
        JsonValue::Null => GridCell::empty(),
        JsonValue::Bool(b) => GridCell::native(GridValue::Boolean(b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => GridCell::native(GridValue::Integer(i)),
            None => match n.as_f64() {
                Some(f) => GridCell::native(GridValue::Real(f)),
                None => GridCell::text(n.to_string()),
            },
        },
        JsonValue::String(s) => {
            let native = match column_type {
                ColumnType::Timestamp => {
                    crate::coerce::parse_timestamp(&s, None).map(GridValue::Timestamp)
                }
                _ => Some(GridValue::Text(s.clone())),
            };
            GridCell {
                text: Some(s),
                native,
            }
        }
        // Nested structures travel as their JSON text
        other => GridCell::text(other.to_string()),
    }
}

fn json_from_cell(cell: &GridCell) -> JsonValue {
    match &cell.native {
        Some(GridValue::Integer(i)) => JsonValue::from(*i),
        Some(GridValue::Real(f)) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(GridValue::Real(*f).to_string())),
        Some(GridValue::Boolean(b)) => JsonValue::Bool(*b),
        Some(GridValue::Timestamp(_)) | Some(GridValue::Text(_)) | None => match &cell.text {
            Some(text) => JsonValue::String(text.clone()),
            None => JsonValue::Null,
        },
    }
}
