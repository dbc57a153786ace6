/// PipeTable Table Implementation in Rust
///
/// A Table is an ordered collection of named columns that all share the
/// same row count (a "results table"). Columns are numeric or text and
/// grow one row at a time.
///
/// # Examples
///
/// ```
/// use pipetable::{Table, ColumnValue};
/// use std::collections::HashMap;
///
/// let mut table = Table::new();
/// table.add_numeric_column("Area");
/// table.add_string_column("Label");
///
/// let mut row = HashMap::new();
/// row.insert("Area".to_string(), ColumnValue::Float64(12.5));
/// row.insert("Label".to_string(), ColumnValue::String("cell".to_string()));
/// table.append_row(row).unwrap();
///
/// assert_eq!(table.len(), 1);
/// assert_eq!(table.get_value(0, "Label").unwrap().as_string(), Some("cell"));
/// ```

use crate::column::{Column, ColumnType, ColumnValue};
use std::collections::HashMap;

/// Root table owning its columns.
#[derive(Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    /// Create an empty table without columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table from existing columns.
    ///
    /// All columns must have the same length and distinct names.
    ///
    /// # Examples
    ///
    /// ```
    /// use pipetable::{Column, Table};
    ///
    /// let table = Table::from_columns(vec![
    ///     Column::numeric("x", vec![1.0, 2.0]),
    ///     Column::string("name", vec!["a".to_string(), "b".to_string()]),
    /// ]).unwrap();
    /// assert_eq!(table.len(), 2);
    ///
    /// let uneven = Table::from_columns(vec![
    ///     Column::numeric("x", vec![1.0]),
    ///     Column::numeric("y", vec![]),
    /// ]);
    /// assert!(uneven.is_err());
    /// ```
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, String> {
        let row_count = columns.first().map(|c| c.len()).unwrap_or(0);
        for (i, col) in columns.iter().enumerate() {
            if col.len() != row_count {
                return Err(format!(
                    "Column '{}' has {} rows, expected {}",
                    col.name(),
                    col.len(),
                    row_count
                ));
            }
            if columns[..i].iter().any(|c| c.name() == col.name()) {
                return Err(format!("Duplicate column '{}'", col.name()));
            }
        }
        Ok(Table { columns, row_count })
    }

    pub fn len(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns a list of all column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    /// Returns the index of a column by name, or None if not found.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_at(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn add_numeric_column(&mut self, name: &str) -> usize {
        self.add_column(name, ColumnType::Float64)
    }

    pub fn add_string_column(&mut self, name: &str) -> usize {
        self.add_column(name, ColumnType::String)
    }

    /// Add a column, filled with the type's default value for existing rows.
    /// If a column with that name already exists, its index is returned.
    pub fn add_column(&mut self, name: &str, column_type: ColumnType) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }
        let mut column = Column::new(name, column_type);
        for _ in 0..self.row_count {
            column.append_default();
        }
        self.columns.push(column);
        self.columns.len() - 1
    }

    /// Append a default-filled row and return its index.
    pub fn add_row(&mut self) -> usize {
        for col in self.columns.iter_mut() {
            col.append_default();
        }
        self.row_count += 1;
        self.row_count - 1
    }

    pub fn get_value(&self, row: usize, column: &str) -> Result<ColumnValue, String> {
        self.column_or_err(column)?.get(row)
    }

    pub fn get_value_as_f64(&self, row: usize, column: &str) -> Result<f64, String> {
        self.column_or_err(column)?
            .get_f64(row)
            .ok_or_else(|| format!("Row {} out of range [0, {})", row, self.row_count))
    }

    pub fn get_value_as_string(&self, row: usize, column: &str) -> Result<String, String> {
        self.column_or_err(column)?
            .get_string(row)
            .ok_or_else(|| format!("Row {} out of range [0, {})", row, self.row_count))
    }

    pub fn set_value(&mut self, row: usize, column: &str, value: ColumnValue) -> Result<(), String> {
        let col_idx = self
            .column_index(column)
            .ok_or_else(|| format!("Column '{}' not found", column))?;
        self.columns[col_idx].set(row, value)
    }

    pub fn get_row(&self, row: usize) -> Result<HashMap<String, ColumnValue>, String> {
        if row >= self.row_count {
            return Err(format!("Row {} out of range [0, {})", row, self.row_count));
        }

        let mut result = HashMap::new();
        for col in &self.columns {
            result.insert(col.name().to_string(), col.get(row)?);
        }

        Ok(result)
    }

    /// Append a row given as column name → value.
    ///
    /// Columns missing from `row` receive their default value; names that
    /// are not columns of this table are rejected before anything changes.
    pub fn append_row(&mut self, mut row: HashMap<String, ColumnValue>) -> Result<(), String> {
        for name in row.keys() {
            if self.column_index(name).is_none() {
                return Err(format!("Column '{}' not found", name));
            }
        }

        for col in self.columns.iter_mut() {
            match row.remove(col.name()) {
                Some(value) => col.append(value),
                None => col.append_default(),
            }
        }

        self.row_count += 1;
        Ok(())
    }

    pub fn iter_rows(&self) -> TableRowIterator<'_> {
        TableRowIterator {
            table: self,
            index: 0,
        }
    }

    fn column_or_err(&self, column: &str) -> Result<&Column, String> {
        self.column(column)
            .ok_or_else(|| format!("Column '{}' not found", column))
    }

    // ========================================================================
    // Serialization Methods
    // ========================================================================

    /// Export table to CSV format.
    ///
    /// Returns a CSV string with headers and data rows.
    /// Strings containing commas, quotes, or newlines are properly escaped.
    ///
    /// # Example
    ///
    /// ```
    /// use pipetable::{Column, Table};
    ///
    /// let table = Table::from_columns(vec![
    ///     Column::numeric("id", vec![1.0]),
    ///     Column::string("name", vec!["Alice".to_string()]),
    /// ]).unwrap();
    ///
    /// let csv = table.to_csv();
    /// assert!(csv.contains("id,name"));
    /// assert!(csv.contains("1,Alice"));
    /// ```
    pub fn to_csv(&self) -> String {
        let mut result = String::new();

        // Header row
        let header: Vec<String> = self.columns.iter().map(|c| escape_csv(c.name())).collect();
        result.push_str(&header.join(","));
        result.push('\n');

        // Data rows
        for row in 0..self.row_count {
            let values: Vec<String> = self
                .columns
                .iter()
                .map(|col| escape_csv(&col.get_string(row).unwrap_or_default()))
                .collect();
            result.push_str(&values.join(","));
            result.push('\n');
        }
        result
    }

    /// Export table to JSON format (array of objects).
    ///
    /// Non-finite numbers become `null`.
    pub fn to_json(&self) -> Result<String, String> {
        let rows: Vec<serde_json::Value> = (0..self.row_count)
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .map(|col| {
                        let json_val = match col.get(row) {
                            Ok(ColumnValue::Float64(f)) => serde_json::Number::from_f64(f)
                                .map(serde_json::Value::Number)
                                .unwrap_or(serde_json::Value::Null),
                            Ok(ColumnValue::String(s)) => serde_json::Value::String(s),
                            Ok(ColumnValue::Null) | Err(_) => serde_json::Value::Null,
                        };
                        (col.name().to_string(), json_val)
                    })
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect();

        serde_json::to_string_pretty(&rows)
            .map_err(|e| format!("JSON serialization error: {}", e))
    }

    /// Create a table from a CSV string.
    ///
    /// The first line is treated as the header row containing column names.
    /// A column is numeric when every non-empty cell parses as a number;
    /// otherwise it is a text column. Empty numeric cells become `NaN`.
    ///
    /// # Example
    ///
    /// ```
    /// use pipetable::{ColumnType, Table};
    ///
    /// let csv = "id,name,score\n1,Alice,95.5\n2,Bob,87.0";
    /// let table = Table::from_csv(csv).unwrap();
    /// assert_eq!(table.len(), 2);
    /// assert_eq!(table.column("name").unwrap().column_type(), ColumnType::String);
    /// assert_eq!(table.get_value_as_f64(1, "score").unwrap(), 87.0);
    /// ```
    pub fn from_csv(csv: &str) -> Result<Table, String> {
        // Parse all rows at once to handle multi-line quoted fields
        let mut all_rows = parse_csv_rows(csv);

        if all_rows.is_empty() {
            return Err("CSV is empty".to_string());
        }

        // First row is the header
        let column_names = all_rows.remove(0);

        if column_names.is_empty() || column_names.iter().all(|n| n.is_empty()) {
            return Err("CSV header is empty".to_string());
        }

        // Filter out empty rows
        let rows: Vec<Vec<String>> = all_rows
            .into_iter()
            .filter(|row| !row.iter().all(|f| f.is_empty()))
            .collect();

        for (i, row) in rows.iter().enumerate() {
            if row.len() != column_names.len() {
                return Err(format!(
                    "Column count mismatch: header has {}, but row {} has {} values",
                    column_names.len(),
                    i + 1,
                    row.len()
                ));
            }
        }

        let columns = column_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let cells: Vec<&str> = rows.iter().map(|r| r[i].trim()).collect();
                build_column_from_cells(name, &cells)
            })
            .collect();

        Table::from_columns(columns)
    }

    /// Create a table from a JSON string (array of objects).
    ///
    /// Column order follows the first appearance of each key. A column is
    /// numeric when all its non-null values are JSON numbers.
    ///
    /// # Example
    ///
    /// ```
    /// use pipetable::Table;
    ///
    /// let json = r#"[{"id": 1, "name": "Alice"}, {"id": 2, "name": "Bob"}]"#;
    /// let table = Table::from_json(json).unwrap();
    /// assert_eq!(table.len(), 2);
    /// assert_eq!(table.get_value_as_string(1, "name").unwrap(), "Bob");
    /// ```
    pub fn from_json(json: &str) -> Result<Table, String> {
        let parsed: Vec<serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| format!("JSON parse error: {}", e))?;

        let mut objects = Vec::with_capacity(parsed.len());
        for item in &parsed {
            objects.push(item.as_object().ok_or("Expected array of objects")?);
        }

        let mut names: Vec<String> = Vec::new();
        for obj in &objects {
            for key in obj.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }

        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let cells = objects
                .iter()
                .map(|obj| json_to_column_value(name, obj.get(name)))
                .collect::<Result<Vec<_>, _>>()?;
            let numeric = cells
                .iter()
                .all(|c| matches!(c, ColumnValue::Float64(_) | ColumnValue::Null));
            let mut column = Column::new(
                name.as_str(),
                if numeric { ColumnType::Float64 } else { ColumnType::String },
            );
            for cell in cells {
                column.append(cell);
            }
            columns.push(column);
        }

        Table::from_columns(columns)
    }
}

// ============================================================================
// Helper functions for serialization
// ============================================================================

fn escape_csv(s: &str) -> String {
    // Escape quotes and wrap if contains comma/quote/newline
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Parse a CSV string into rows, handling quoted fields with embedded newlines
fn parse_csv_rows(csv: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut current_row = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = csv.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                // Check for escaped quote (double quote)
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current_field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if !in_quotes => {
                in_quotes = true;
            }
            ',' if !in_quotes => {
                current_row.push(std::mem::take(&mut current_field));
            }
            '\n' if !in_quotes => {
                current_row.push(std::mem::take(&mut current_field));
                rows.push(std::mem::take(&mut current_row));
            }
            '\r' if !in_quotes => {
                // Skip \r, will be followed by \n
            }
            _ => {
                current_field.push(c);
            }
        }
    }

    // Don't forget the last field/row
    if !current_field.is_empty() || !current_row.is_empty() {
        current_row.push(current_field);
        rows.push(current_row);
    }

    rows
}

/// Build a column from raw CSV cells, inferring numeric vs text
fn build_column_from_cells(name: &str, cells: &[&str]) -> Column {
    let numeric = cells
        .iter()
        .all(|cell| cell.is_empty() || crate::expr::parse_number(cell).is_some());

    if numeric {
        let values = cells
            .iter()
            .map(|cell| crate::expr::parse_number(cell).unwrap_or(f64::NAN))
            .collect();
        Column::numeric(name, values)
    } else {
        Column::string(name, cells.iter().map(|c| c.to_string()).collect())
    }
}

/// Convert a JSON cell to a column value
fn json_to_column_value(key: &str, value: Option<&serde_json::Value>) -> Result<ColumnValue, String> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(ColumnValue::Null),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .map(ColumnValue::Float64)
            .ok_or_else(|| format!("Unsupported number for key '{}'", key)),
        Some(serde_json::Value::String(s)) => Ok(ColumnValue::String(s.clone())),
        Some(serde_json::Value::Bool(b)) => Ok(ColumnValue::String(b.to_string())),
        Some(_) => Err(format!("Unsupported JSON value type for key '{}'", key)),
    }
}

pub struct TableRowIterator<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Iterator for TableRowIterator<'a> {
    type Item = HashMap<String, ColumnValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.table.row_count {
            None
        } else {
            let result = self.table.get_row(self.index).ok();
            self.index += 1;
            result
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Table {{ columns: {:?}, rows: {} }}",
            self.column_names(),
            self.row_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns(vec![
            Column::numeric("id", vec![1.0, 2.0, 3.0]),
            Column::string(
                "name",
                vec!["first".to_string(), "second".to_string(), "third".to_string()],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_table_basic() {
        let mut table = Table::new();
        table.add_numeric_column("id");
        table.add_string_column("name");

        let mut row = HashMap::new();
        row.insert("id".to_string(), ColumnValue::Float64(1.0));
        row.insert("name".to_string(), ColumnValue::String("Alice".to_string()));
        table.append_row(row).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get_value(0, "name").unwrap().as_string(), Some("Alice"));
        assert_eq!(table.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_add_column_keeps_lengths_equal() {
        let mut table = sample();
        let idx = table.add_numeric_column("area");
        assert_eq!(idx, 2);
        assert_eq!(table.column("area").unwrap().len(), 3);
        assert_eq!(table.get_value_as_f64(2, "area").unwrap(), 0.0);

        // Existing column is reused
        assert_eq!(table.add_string_column("id"), 0);
        assert_eq!(table.column_count(), 3);
    }

    #[test]
    fn test_add_row_and_set_value() {
        let mut table = sample();
        let row = table.add_row();
        assert_eq!(row, 3);
        table.set_value(row, "id", ColumnValue::Float64(4.0)).unwrap();
        table.set_value(row, "name", ColumnValue::from("fourth")).unwrap();

        assert_eq!(table.get_value_as_f64(3, "id").unwrap(), 4.0);
        assert_eq!(table.get_value_as_string(3, "name").unwrap(), "fourth");
        assert!(table.set_value(9, "id", ColumnValue::Float64(1.0)).is_err());
        assert!(table.set_value(0, "missing", ColumnValue::Null).is_err());
    }

    #[test]
    fn test_append_row_partial_and_unknown() {
        let mut table = sample();

        let mut row = HashMap::new();
        row.insert("id".to_string(), ColumnValue::Float64(9.0));
        table.append_row(row).unwrap();
        assert_eq!(table.get_value_as_string(3, "name").unwrap(), "");

        let mut bad = HashMap::new();
        bad.insert("nope".to_string(), ColumnValue::Float64(1.0));
        assert!(table.append_row(bad).is_err());
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_table_get_row() {
        let table = sample();
        let retrieved = table.get_row(1).unwrap();
        assert_eq!(retrieved.get("id").unwrap().as_f64(), Some(2.0));
        assert_eq!(retrieved.get("name").unwrap().as_string(), Some("second"));
        assert!(table.get_row(3).is_err());
        assert_eq!(table.iter_rows().count(), 3);
    }

    #[test]
    fn test_from_columns_rejects_duplicates() {
        let result = Table::from_columns(vec![
            Column::numeric("x", vec![1.0]),
            Column::numeric("x", vec![2.0]),
        ]);
        assert!(result.unwrap_err().contains("Duplicate"));
    }

    #[test]
    fn test_csv_round_trip_with_quotes() {
        let table = Table::from_columns(vec![
            Column::string("label", vec!["a,b".to_string(), "say \"hi\"".to_string()]),
            Column::numeric("value", vec![1.5, f64::NAN]),
        ])
        .unwrap();

        let csv = table.to_csv();
        let parsed = Table::from_csv(&csv).unwrap();
        assert_eq!(parsed.get_value_as_string(0, "label").unwrap(), "a,b");
        assert_eq!(parsed.get_value_as_string(1, "label").unwrap(), "say \"hi\"");
        assert_eq!(parsed.get_value_as_f64(0, "value").unwrap(), 1.5);
        assert!(parsed.get_value_as_f64(1, "value").unwrap().is_nan());
    }

    #[test]
    fn test_csv_mixed_column_is_text() {
        let table = Table::from_csv("a,b\n1,x\n,2\n3,4\n").unwrap();
        assert_eq!(table.column("a").unwrap().column_type(), ColumnType::Float64);
        assert_eq!(table.column("b").unwrap().column_type(), ColumnType::String);
        assert!(table.get_value_as_f64(1, "a").unwrap().is_nan());
    }

    #[test]
    fn test_csv_errors() {
        assert!(Table::from_csv("").is_err());
        assert!(Table::from_csv("a,b\n1,2,3\n").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"[{"x": 1, "tag": "a"}, {"x": 2.5, "tag": null}, {"x": null}]"#;
        let table = Table::from_json(json).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.column("x").unwrap().column_type(), ColumnType::Float64);
        assert_eq!(table.get_value_as_string(1, "tag").unwrap(), "");

        let out = table.to_json().unwrap();
        assert!(out.contains("\"x\": 2.5"));
        assert!(out.contains("\"x\": null"));
    }
}
