//! Column references: picking an existing column by expression, generating
//! one per row, and matching column names.

use crate::column::Column;
use crate::evaluator::{ExpressionEvaluator, Variables};
use crate::expr::Value;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Where a transform reads a logical column from.
///
/// Serialized as `{"mode": "existing" | "generate", "expression": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "expression", rename_all = "snake_case")]
pub enum ColumnSource {
    /// Expression evaluating to a column name (string) or index (number).
    Existing(String),
    /// Expression evaluated once per row to synthesize a column.
    Generate(String),
}

impl ColumnSource {
    /// Reference an existing column by its literal name.
    pub fn column(name: &str) -> Self {
        ColumnSource::Existing(quote(name))
    }

    pub fn generate(expression: impl Into<String>) -> Self {
        ColumnSource::Generate(expression.into())
    }

    pub fn expression(&self) -> &str {
        match self {
            ColumnSource::Existing(e) | ColumnSource::Generate(e) => e,
        }
    }

    /// Resolve the column against `table`.
    ///
    /// Existing columns are borrowed from the table. Generated columns see
    /// `variables` plus `row`, `num_rows` and every cell of the current row
    /// bound by column name; they are numeric when every row evaluates to a
    /// number and text otherwise.
    pub fn pick_or_generate<'a>(
        &self,
        table: &'a Table,
        evaluator: &dyn ExpressionEvaluator,
        variables: &Variables,
    ) -> Result<Cow<'a, Column>, String> {
        match self {
            ColumnSource::Existing(expression) => {
                let index = resolve_existing(table, expression, evaluator, variables)?;
                table
                    .column_at(index)
                    .map(Cow::Borrowed)
                    .ok_or_else(|| format!("Column index {} out of range", index))
            }
            ColumnSource::Generate(expression) => {
                generate(table, expression, evaluator, variables).map(Cow::Owned)
            }
        }
    }
}

impl Default for ColumnSource {
    fn default() -> Self {
        ColumnSource::Existing(quote(""))
    }
}

fn resolve_existing(
    table: &Table,
    expression: &str,
    evaluator: &dyn ExpressionEvaluator,
    variables: &Variables,
) -> Result<usize, String> {
    match evaluator.evaluate(expression, variables)? {
        Value::String(name) => table
            .column_index(&name)
            .ok_or_else(|| format!("Column '{}' not found", name)),
        Value::Number(n) => {
            if n < 0.0 || n.fract() != 0.0 || n as usize >= table.column_count() {
                Err(format!(
                    "Column index {} out of range [0, {})",
                    n,
                    table.column_count()
                ))
            } else {
                Ok(n as usize)
            }
        }
        other => Err(format!(
            "Column reference '{}' must evaluate to a name or an index, got {}",
            expression,
            other.type_name()
        )),
    }
}

fn generate(
    table: &Table,
    expression: &str,
    evaluator: &dyn ExpressionEvaluator,
    variables: &Variables,
) -> Result<Column, String> {
    let mut row_variables = variables.clone();
    row_variables.set("num_rows", table.len());

    let mut results = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        row_variables.set("row", row);
        for column in table.columns() {
            row_variables.set(column.name(), column.get(row)?);
        }
        results.push(evaluator.evaluate(expression, &row_variables)?);
    }

    let numbers: Option<Vec<f64>> = results
        .iter()
        .map(|v| match v {
            Value::Number(n) => Some(*n),
            _ => None,
        })
        .collect();

    Ok(match numbers {
        Some(values) => Column::numeric(expression, values),
        None => Column::string(
            expression,
            results.iter().map(|v| v.to_display_string()).collect(),
        ),
    })
}

/// Matches column names.
///
/// The expression sees `value` bound to a column name. A boolean result
/// is used as the answer; a string result matches a column with exactly
/// that name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnQuery {
    expression: String,
}

impl ColumnQuery {
    pub fn new(expression: impl Into<String>) -> Self {
        ColumnQuery {
            expression: expression.into(),
        }
    }

    /// Match the column with exactly this name.
    pub fn named(name: &str) -> Self {
        Self::new(quote(name))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(
        &self,
        column_name: &str,
        evaluator: &dyn ExpressionEvaluator,
        variables: &mut Variables,
    ) -> Result<bool, String> {
        variables.set("value", column_name);
        match evaluator.evaluate(&self.expression, variables)? {
            Value::Bool(b) => Ok(b),
            Value::String(s) => Ok(s == column_name),
            Value::Null => Ok(false),
            other => Err(format!(
                "Column filter '{}' must evaluate to a boolean or a name, got {}",
                self.expression,
                other.type_name()
            )),
        }
    }

    /// Name of the first column (in table order) that matches.
    pub fn first_match(
        &self,
        table: &Table,
        evaluator: &dyn ExpressionEvaluator,
        variables: &Variables,
    ) -> Result<Option<String>, String> {
        let mut variables = variables.clone();
        for name in table.column_names() {
            if self.matches(name, evaluator, &mut variables)? {
                return Ok(Some(name.to_string()));
            }
        }
        Ok(None)
    }

    /// Names of all matching columns in table order.
    pub fn all_matches(
        &self,
        table: &Table,
        evaluator: &dyn ExpressionEvaluator,
        variables: &Variables,
    ) -> Result<Vec<String>, String> {
        let mut variables = variables.clone();
        let mut matched = Vec::new();
        for name in table.column_names() {
            if self.matches(name, evaluator, &mut variables)? {
                matched.push(name.to_string());
            }
        }
        Ok(matched)
    }
}

/// Render `text` as a double-quoted string literal.
pub(crate) fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::DefaultEvaluator;

    fn table() -> Table {
        Table::from_columns(vec![
            Column::numeric("Area", vec![10.0, 20.0, 30.0]),
            Column::string(
                "Label",
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
            ),
            Column::numeric("Mean \"x\"", vec![1.0, 2.0, 3.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_existing_by_name_and_index() {
        let table = table();
        let evaluator = DefaultEvaluator::new();
        let vars = Variables::new();

        let col = ColumnSource::column("Area")
            .pick_or_generate(&table, &evaluator, &vars)
            .unwrap();
        assert!(matches!(col, Cow::Borrowed(_)));
        assert_eq!(col.name(), "Area");

        let col = ColumnSource::Existing("1".to_string())
            .pick_or_generate(&table, &evaluator, &vars)
            .unwrap();
        assert_eq!(col.name(), "Label");

        let col = ColumnSource::column("Mean \"x\"")
            .pick_or_generate(&table, &evaluator, &vars)
            .unwrap();
        assert_eq!(col.to_f64_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_existing_missing_column() {
        let table = table();
        let evaluator = DefaultEvaluator::new();
        let vars = Variables::new();

        let err = ColumnSource::column("Perimeter")
            .pick_or_generate(&table, &evaluator, &vars)
            .unwrap_err();
        assert_eq!(err, "Column 'Perimeter' not found");
        assert!(ColumnSource::Existing("7".to_string())
            .pick_or_generate(&table, &evaluator, &vars)
            .is_err());
        assert!(ColumnSource::Existing("TRUE".to_string())
            .pick_or_generate(&table, &evaluator, &vars)
            .is_err());
    }

    #[test]
    fn test_existing_uses_annotations() {
        let table = table();
        let evaluator = DefaultEvaluator::new();
        let mut vars = Variables::new();
        vars.set("#Measurement", "Area");

        let col = ColumnSource::Existing("$\"#Measurement\"".to_string())
            .pick_or_generate(&table, &evaluator, &vars)
            .unwrap();
        assert_eq!(col.name(), "Area");
    }

    #[test]
    fn test_generate_numeric_and_text() {
        let table = table();
        let evaluator = DefaultEvaluator::new();
        let vars = Variables::new();

        let col = ColumnSource::generate("Area * 2 + row")
            .pick_or_generate(&table, &evaluator, &vars)
            .unwrap();
        assert!(col.is_numeric());
        assert_eq!(col.to_f64_vec(), vec![20.0, 41.0, 62.0]);

        let col = ColumnSource::generate("Label + \"/\" + num_rows")
            .pick_or_generate(&table, &evaluator, &vars)
            .unwrap();
        assert!(!col.is_numeric());
        assert_eq!(col.to_string_vec(), vec!["a/3", "b/3", "c/3"]);
    }

    #[test]
    fn test_generate_constant_on_empty_table() {
        let table = Table::new();
        let evaluator = DefaultEvaluator::new();
        let col = ColumnSource::generate("1")
            .pick_or_generate(&table, &evaluator, &Variables::new())
            .unwrap();
        assert!(col.is_empty());
    }

    #[test]
    fn test_column_query() {
        let table = table();
        let evaluator = DefaultEvaluator::new();
        let vars = Variables::new();

        let query = ColumnQuery::new("STRING_STARTS_WITH(value, \"Mean\") OR value == \"Area\"");
        assert_eq!(
            query.all_matches(&table, &evaluator, &vars).unwrap(),
            vec!["Area", "Mean \"x\""]
        );
        assert_eq!(
            ColumnQuery::named("Label")
                .first_match(&table, &evaluator, &vars)
                .unwrap()
                .as_deref(),
            Some("Label")
        );
        assert_eq!(
            ColumnQuery::new("FALSE")
                .first_match(&table, &evaluator, &vars)
                .unwrap(),
            None
        );
        assert!(ColumnQuery::new("42")
            .all_matches(&table, &evaluator, &vars)
            .is_err());
    }

    #[test]
    fn test_serde_shapes() {
        let source: ColumnSource =
            serde_json::from_str(r#"{"mode": "generate", "expression": "1"}"#).unwrap();
        assert_eq!(source, ColumnSource::generate("1"));

        let query: ColumnQuery = serde_json::from_str(r#""value == 'x'""#).unwrap();
        assert_eq!(query.expression(), "value == 'x'");
    }
}
