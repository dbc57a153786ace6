/// PipeTable Column Implementation
///
/// A Column is a named, append-only vector of values indexed by row.
/// Results tables only know two kinds of columns: numeric (f64) and text.
///
/// Text written into a numeric column converts the whole column to text,
/// which mirrors how results tables behave when a measurement column
/// receives a label.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Float64,
    String,
}

impl ColumnType {
    /// Parse a column type from a string.
    ///
    /// Accepts: "numeric", "float64", "number", "string", "text"
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "numeric" | "float64" | "number" => Ok(ColumnType::Float64),
            "string" | "text" => Ok(ColumnType::String),
            _ => Err(format!(
                "Unknown column type: '{}'. Use 'numeric' or 'string'",
                s
            )),
        }
    }
}

/// Column value enum to support both column kinds.
///
/// `Null` is accepted on input only: numeric columns store it as `NaN`,
/// text columns as the empty string.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Float64(f64),
    String(String),
    Null,
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            ColumnValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Text rendering used when a value ends up in a text column.
    pub fn to_display_string(&self) -> String {
        match self {
            ColumnValue::Float64(v) => v.to_string(),
            ColumnValue::String(s) => s.clone(),
            ColumnValue::Null => String::new(),
        }
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float64(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::String(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::String(v)
    }
}

#[derive(Clone, PartialEq)]
enum ColumnData {
    Float64(Vec<f64>),
    String(Vec<String>),
}

/// A single named column of a results table.
#[derive(Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let data = match column_type {
            ColumnType::Float64 => ColumnData::Float64(Vec::new()),
            ColumnType::String => ColumnData::String(Vec::new()),
        };
        Column {
            name: name.into(),
            data,
        }
    }

    /// Create a numeric column from existing values.
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Column {
            name: name.into(),
            data: ColumnData::Float64(values),
        }
    }

    /// Create a text column from existing values.
    pub fn string(name: impl Into<String>, values: Vec<String>) -> Self {
        Column {
            name: name.into(),
            data: ColumnData::String(values),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        match self.data {
            ColumnData::Float64(_) => ColumnType::Float64,
            ColumnData::String(_) => ColumnType::String,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.column_type() == ColumnType::Float64
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ColumnData::Float64(v) => v.len(),
            ColumnData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<ColumnValue, String> {
        let out_of_range = || format!("Index {} out of range [0, {})", index, self.len());
        match &self.data {
            ColumnData::Float64(v) => v
                .get(index)
                .map(|x| ColumnValue::Float64(*x))
                .ok_or_else(out_of_range),
            ColumnData::String(v) => v
                .get(index)
                .map(|s| ColumnValue::String(s.clone()))
                .ok_or_else(out_of_range),
        }
    }

    /// Numeric access. Text cells are parsed; unparseable text yields `NaN`.
    /// Returns None only when the index is out of bounds.
    #[inline]
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match &self.data {
            ColumnData::Float64(v) => v.get(index).copied(),
            ColumnData::String(v) => v.get(index).map(|s| parse_f64_or_nan(s)),
        }
    }

    /// Text access. Numbers are rendered with Rust's shortest display form.
    pub fn get_string(&self, index: usize) -> Option<String> {
        match &self.data {
            ColumnData::Float64(v) => v.get(index).map(|x| x.to_string()),
            ColumnData::String(v) => v.get(index).cloned(),
        }
    }

    pub fn set(&mut self, index: usize, value: ColumnValue) -> Result<(), String> {
        let len = self.len();
        if index >= len {
            return Err(format!("Index {} out of range [0, {})", index, len));
        }
        match value {
            ColumnValue::String(s) => {
                self.convert_to_string();
                if let ColumnData::String(v) = &mut self.data {
                    v[index] = s;
                }
            }
            ColumnValue::Float64(x) => match &mut self.data {
                ColumnData::Float64(v) => v[index] = x,
                ColumnData::String(v) => v[index] = x.to_string(),
            },
            ColumnValue::Null => match &mut self.data {
                ColumnData::Float64(v) => v[index] = f64::NAN,
                ColumnData::String(v) => v[index] = String::new(),
            },
        }
        Ok(())
    }

    pub fn append(&mut self, value: ColumnValue) {
        match value {
            ColumnValue::String(s) => {
                self.convert_to_string();
                if let ColumnData::String(v) = &mut self.data {
                    v.push(s);
                }
            }
            ColumnValue::Float64(x) => match &mut self.data {
                ColumnData::Float64(v) => v.push(x),
                ColumnData::String(v) => v.push(x.to_string()),
            },
            ColumnValue::Null => match &mut self.data {
                ColumnData::Float64(v) => v.push(f64::NAN),
                ColumnData::String(v) => v.push(String::new()),
            },
        }
    }

    /// Append the type's default value (0 or empty string).
    pub fn append_default(&mut self) {
        match &mut self.data {
            ColumnData::Float64(v) => v.push(0.0),
            ColumnData::String(v) => v.push(String::new()),
        }
    }

    /// Convert a numeric column to text in place.
    pub fn convert_to_string(&mut self) {
        if let ColumnData::Float64(v) = &self.data {
            let converted = v.iter().map(|x| x.to_string()).collect();
            self.data = ColumnData::String(converted);
        }
    }

    /// Extend the column to `len` rows, computing each new cell with `fill`.
    /// `fill` receives the row index of the new cell and the column itself.
    /// Columns that are already long enough are left untouched.
    pub fn resize_with<F>(&mut self, len: usize, mut fill: F)
    where
        F: FnMut(usize, &Column) -> ColumnValue,
    {
        while self.len() < len {
            let row = self.len();
            let value = fill(row, self);
            self.append(value);
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            ColumnData::Float64(v) => v.clone(),
            ColumnData::String(v) => v.iter().map(|s| parse_f64_or_nan(s)).collect(),
        }
    }

    pub fn to_string_vec(&self) -> Vec<String> {
        match &self.data {
            ColumnData::Float64(v) => v.iter().map(|x| x.to_string()).collect(),
            ColumnData::String(v) => v.clone(),
        }
    }

    pub fn iter(&self) -> ColumnIterator<'_> {
        ColumnIterator {
            column: self,
            index: 0,
        }
    }
}

fn parse_f64_or_nan(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

pub struct ColumnIterator<'a> {
    column: &'a Column,
    index: usize,
}

impl<'a> Iterator for ColumnIterator<'a> {
    type Item = ColumnValue;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.column.len() {
            None
        } else {
            let result = self.column.get(self.index).ok();
            self.index += 1;
            result
        }
    }
}

impl Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Column {{ name: '{}', type: {:?}, len: {} }}",
            self.name,
            self.column_type(),
            self.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_basic() {
        let mut col = Column::new("area", ColumnType::Float64);
        col.append(ColumnValue::Float64(1.5));
        col.append(ColumnValue::Float64(2.0));
        col.append(ColumnValue::Null);

        assert_eq!(col.len(), 3);
        assert_eq!(col.get(0).unwrap().as_f64(), Some(1.5));
        assert!(col.get_f64(2).unwrap().is_nan());
        assert!(col.get(3).is_err());
    }

    #[test]
    fn test_column_text_access() {
        let col = Column::string("label", vec!["3".to_string(), "cell".to_string()]);
        assert_eq!(col.get_f64(0), Some(3.0));
        assert!(col.get_f64(1).unwrap().is_nan());
        assert_eq!(col.get_string(1).as_deref(), Some("cell"));
        assert_eq!(col.get_f64(2), None);
    }

    #[test]
    fn test_numeric_display() {
        let col = Column::numeric("x", vec![1.0, 1.5, f64::NAN]);
        assert_eq!(col.to_string_vec(), vec!["1", "1.5", "NaN"]);
    }

    #[test]
    fn test_column_converts_on_text() {
        let mut col = Column::numeric("x", vec![1.0, 2.0]);
        col.append(ColumnValue::String("n/a".to_string()));

        assert_eq!(col.column_type(), ColumnType::String);
        assert_eq!(col.to_string_vec(), vec!["1", "2", "n/a"]);

        let mut col = Column::numeric("y", vec![1.0, 2.0]);
        col.set(1, ColumnValue::from("two")).unwrap();
        assert_eq!(col.get(1).unwrap().as_string(), Some("two"));
    }

    #[test]
    fn test_column_set() {
        let mut col = Column::numeric("x", vec![1.0]);
        col.set(0, ColumnValue::Float64(5.0)).unwrap();
        assert_eq!(col.get_f64(0), Some(5.0));
        assert!(col.set(1, ColumnValue::Float64(1.0)).is_err());
    }

    #[test]
    fn test_resize_with() {
        let mut col = Column::numeric("x", vec![7.0]);
        col.resize_with(3, |row, _| ColumnValue::Float64(row as f64));
        assert_eq!(col.to_f64_vec(), vec![7.0, 1.0, 2.0]);

        // Never truncates
        col.resize_with(1, |_, _| ColumnValue::Null);
        assert_eq!(col.len(), 3);
    }

    #[test]
    fn test_column_type_from_str() {
        assert_eq!(ColumnType::from_str("Numeric").unwrap(), ColumnType::Float64);
        assert_eq!(ColumnType::from_str("text").unwrap(), ColumnType::String);
        assert!(ColumnType::from_str("bool").is_err());
    }
}
