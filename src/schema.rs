// ABOUTME: Aligns grid columns with the live destination table's columns
// ABOUTME: Case-insensitive name pairing; enabled columns without a match fail the run

use crate::destination::{DestinationColumn, TableName};
use crate::error::{Result, SyncError};
use crate::grid::{names_match, SourceColumn};

/// Pairing of destination columns with source columns for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    destination_to_source: Vec<Option<usize>>,
    write_set: Vec<(usize, usize)>,
}

impl Alignment {
    /// One entry per destination column: the aligned source index, if any.
    pub fn destination_to_source(&self) -> &[Option<usize>] {
        &self.destination_to_source
    }

    /// `(destination_index, source_index)` for every enabled aligned column,
    /// in destination order. These are the columns staged and merged.
    pub fn write_set(&self) -> &[(usize, usize)] {
        &self.write_set
    }

    /// Destination columns in the write set.
    pub fn written_columns(&self, destination: &[DestinationColumn]) -> Vec<DestinationColumn> {
        self.write_set
            .iter()
            .map(|&(dest_idx, _)| destination[dest_idx].clone())
            .collect()
    }

    /// Destination column aligned with the enabled source key, if any.
    pub fn key_column<'a>(
        &self,
        source: &[SourceColumn],
        destination: &'a [DestinationColumn],
    ) -> Option<&'a DestinationColumn> {
        self.write_set
            .iter()
            .find(|&&(_, source_idx)| source[source_idx].is_key)
            .map(|&(dest_idx, _)| &destination[dest_idx])
    }
}

/// Align `source` against `destination`.
///
/// Every enabled source column must have exactly one destination column of
/// the same name (case-insensitive), shared with no other enabled column. Disabled source columns are never required, and
/// destination columns without a source counterpart are left untouched.
pub fn reconcile(
    table: &TableName,
    source: &[SourceColumn],
    destination: &[DestinationColumn],
) -> Result<Alignment> {
    for column in source.iter().filter(|c| c.enabled) {
        let matches: Vec<&str> = destination
            .iter()
            .filter(|d| column.matches(&d.name))
            .map(|d| d.name.as_str())
            .collect();
        match matches.len() {
            0 => {
                return Err(SyncError::SchemaMismatch {
                    table: table.to_string(),
                    column: column.name.clone(),
                })
            }
            1 => {}
            _ => {
                return Err(SyncError::config(format!(
                    "grid column '{}' matches several columns of {} ({}); \
                     column names must be unique ignoring case",
                    column.name,
                    table,
                    matches.join(", ")
                )))
            }
        }

        if let Some(other) = source
            .iter()
            .find(|s| s.enabled && !std::ptr::eq(*s, column) && s.matches(&column.name))
        {
            return Err(SyncError::config(format!(
                "grid columns '{}' and '{}' both match the same column of {}",
                column.name, other.name, table
            )));
        }
    }

    let destination_to_source: Vec<Option<usize>> = destination
        .iter()
        .map(|d| {
            source
                .iter()
                .position(|s| s.enabled && names_match(&s.name, &d.name))
                .or_else(|| source.iter().position(|s| names_match(&s.name, &d.name)))
        })
        .collect();

    let write_set = destination_to_source
        .iter()
        .enumerate()
        .filter_map(|(dest_idx, source_idx)| {
            source_idx
                .filter(|&s| source[s].enabled)
                .map(|s| (dest_idx, s))
        })
        .collect();

    tracing::debug!(
        "Aligned {} of {} destination columns for {}",
        destination_to_source.iter().filter(|s| s.is_some()).count(),
        destination.len(),
        table
    );

    Ok(Alignment {
        destination_to_source,
        write_set,
    })
}
