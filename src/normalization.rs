//! Column length normalization for tables assembled from columns of
//! differing lengths.

use crate::column::{Column, ColumnValue};
use serde::{Deserialize, Serialize};

/// How short columns are padded up to the longest column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnNormalization {
    /// Pad numeric columns with 0 and text columns with "".
    #[default]
    ZeroOrEmpty,
    /// Pad with the row index (as text in text columns).
    RowIndex,
    /// Repeat the last value of the column.
    LastValue,
    /// Repeat the column's values from the start.
    Cycle,
}

impl ColumnNormalization {
    /// Pad every column to `target_len` rows. Columns are never truncated.
    pub fn normalize(&self, columns: Vec<Column>, target_len: usize) -> Vec<Column> {
        columns
            .into_iter()
            .map(|mut column| {
                let len_before = column.len();
                match self {
                    ColumnNormalization::ZeroOrEmpty => {
                        column.resize_with(target_len, |_, col| default_value(col))
                    }
                    ColumnNormalization::RowIndex => column.resize_with(target_len, |row, col| {
                        if col.is_numeric() {
                            ColumnValue::Float64(row as f64)
                        } else {
                            ColumnValue::String(row.to_string())
                        }
                    }),
                    ColumnNormalization::LastValue => column.resize_with(target_len, |row, col| {
                        match row.checked_sub(1) {
                            Some(last) => col.get(last).unwrap_or(ColumnValue::Null),
                            None => default_value(col),
                        }
                    }),
                    ColumnNormalization::Cycle => column.resize_with(target_len, |row, col| {
                        if len_before == 0 {
                            default_value(col)
                        } else {
                            col.get(row % len_before).unwrap_or(ColumnValue::Null)
                        }
                    }),
                }
                column
            })
            .collect()
    }
}

/// Length of the longest column, the target of [`ColumnNormalization::normalize`].
pub fn max_length(columns: &[Column]) -> usize {
    columns.iter().map(|c| c.len()).max().unwrap_or(0)
}

fn default_value(column: &Column) -> ColumnValue {
    if column.is_numeric() {
        ColumnValue::Float64(0.0)
    } else {
        ColumnValue::String(String::new())
    }
}
