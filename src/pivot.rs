//! Pivot / un-melt ("Pivot table").
//!
//! Every row contributes its value to the output column named by an
//! expression over the row's category cells. Columns of differing lengths
//! are reconciled with a [`ColumnNormalization`].

use crate::column::{Column, ColumnValue};
use crate::expr::Value;
use crate::node::{RunContext, TableTransform};
use crate::normalization::{max_length, ColumnNormalization};
use crate::source::ColumnQuery;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pivot {
    /// Selects the value column; the first matching column is used.
    pub value_column: ColumnQuery,
    /// Selects the category columns, in table order.
    pub category_columns: ColumnQuery,
    /// Output column name, from `value`, `category_values` and
    /// `category_columns`. Rows yielding an empty name are skipped.
    pub new_column_name: String,
    pub normalization: ColumnNormalization,
}

impl Default for Pivot {
    fn default() -> Self {
        Pivot {
            value_column: ColumnQuery::named("Value"),
            category_columns: ColumnQuery::named("Category"),
            new_column_name: "JOIN_STRINGS(category_values, \"_\")".to_string(),
            normalization: ColumnNormalization::default(),
        }
    }
}

impl TableTransform for Pivot {
    fn name(&self) -> &str {
        "Pivot table"
    }

    fn run(&self, input: &Table, ctx: &mut RunContext<'_>) -> Result<Table, String> {
        let evaluator = ctx.evaluator();
        let mut variables = ctx.variables();

        let value_name = self
            .value_column
            .first_match(input, evaluator, &variables)?
            .ok_or_else(|| {
                format!(
                    "No value column matches '{}'",
                    self.value_column.expression()
                )
            })?;
        let category_names = self
            .category_columns
            .all_matches(input, evaluator, &variables)?;

        if input.is_empty() {
            ctx.log("Input table is empty! Skipping.");
            return Ok(Table::new());
        }

        let value_column = input
            .column(&value_name)
            .ok_or_else(|| format!("Column '{}' not found", value_name))?;
        let category_columns = category_names
            .iter()
            .map(|name| {
                input
                    .column(name)
                    .ok_or_else(|| format!("Column '{}' not found", name))
            })
            .collect::<Result<Vec<_>, _>>()?;

        variables.set("category_columns", Value::from(category_names.clone()));

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<ColumnValue>)> = Vec::new();
        let mut skipped = 0usize;

        for row in 0..input.len() {
            let category_values: Vec<String> = category_columns
                .iter()
                .map(|c| c.get_string(row).unwrap_or_default())
                .collect();
            let value = value_column.get(row)?;

            variables.set("value", value.clone());
            variables.set("category_values", Value::from(category_values));

            let key = match evaluator.evaluate(&self.new_column_name, &variables)? {
                Value::Null => String::new(),
                other => other.to_display_string(),
            };
            if key.is_empty() {
                skipped += 1;
                continue;
            }

            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    groups.push((key.clone(), Vec::new()));
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            groups[slot].1.push(value);
        }

        if skipped > 0 {
            log::debug!("Skipped {} rows with an empty column name", skipped);
        }

        let columns: Vec<Column> = groups
            .into_iter()
            .map(|(name, values)| build_column(name, values))
            .collect();
        let target_len = max_length(&columns);

        Table::from_columns(self.normalization.normalize(columns, target_len))
    }
}

/// Numeric when every value is a number, text otherwise.
fn build_column(name: String, values: Vec<ColumnValue>) -> Column {
    let numbers: Option<Vec<f64>> = values.iter().map(|v| v.as_f64()).collect();
    match numbers {
        Some(numbers) => Column::numeric(name, numbers),
        None => Column::string(
            name,
            values.iter().map(|v| v.to_display_string()).collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::DefaultEvaluator;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn run(node: &Pivot, table: &Table) -> Result<Table, String> {
        let evaluator = DefaultEvaluator::new();
        let mut ctx = RunContext::new(&evaluator);
        node.run(table, &mut ctx)
    }

    fn example() -> Table {
        Table::from_columns(vec![
            Column::string("Category", strings(&["A", "A", "B"])),
            Column::numeric("Value", vec![1.0, 2.0, 3.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_zero_fill() {
        let output = run(&Pivot::default(), &example()).unwrap();
        assert_eq!(output.column_names(), vec!["A", "B"]);
        assert_eq!(output.column("A").unwrap().to_f64_vec(), vec![1.0, 2.0]);
        assert_eq!(output.column("B").unwrap().to_f64_vec(), vec![3.0, 0.0]);
    }

    #[test]
    fn test_first_seen_column_order() {
        let table = Table::from_columns(vec![
            Column::string("Category", strings(&["z", "a", "z", "m"])),
            Column::numeric("Value", vec![1.0, 2.0, 3.0, 4.0]),
        ])
        .unwrap();
        let output = run(&Pivot::default(), &table).unwrap();
        assert_eq!(output.column_names(), vec!["z", "a", "m"]);
        assert_eq!(output.len(), 2);
        assert!(output.columns().iter().all(|c| c.len() == 2));
    }

    #[test]
    fn test_multiple_categories() {
        let table = Table::from_columns(vec![
            Column::string("Condition", strings(&["ctrl", "ctrl", "drug"])),
            Column::numeric("Replicate", vec![1.0, 2.0, 1.0]),
            Column::numeric("Intensity", vec![0.5, 0.7, 0.9]),
        ])
        .unwrap();
        let node = Pivot {
            value_column: ColumnQuery::named("Intensity"),
            category_columns: ColumnQuery::new("value != \"Intensity\""),
            ..Pivot::default()
        };
        let output = run(&node, &table).unwrap();
        assert_eq!(output.column_names(), vec!["ctrl_1", "ctrl_2", "drug_1"]);
        assert_eq!(output.column("drug_1").unwrap().to_f64_vec(), vec![0.9]);
    }

    #[test]
    fn test_empty_and_null_keys_are_skipped() {
        let table = Table::from_columns(vec![
            Column::string("Category", strings(&["A", "", "B", "B"])),
            Column::numeric("Value", vec![1.0, 2.0, 3.0, 4.0]),
        ])
        .unwrap();
        let output = run(&Pivot::default(), &table).unwrap();
        assert_eq!(output.column("A").unwrap().to_f64_vec(), vec![1.0, 0.0]);
        assert_eq!(output.column("B").unwrap().to_f64_vec(), vec![3.0, 4.0]);

        let node = Pivot {
            new_column_name: "IF_ELSE(value > 2, \"big\", NULL)".to_string(),
            ..Pivot::default()
        };
        let output = run(&node, &table).unwrap();
        assert_eq!(output.column_names(), vec!["big"]);
        assert_eq!(output.column("big").unwrap().to_f64_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_text_values_make_text_column() {
        let table = Table::from_columns(vec![
            Column::string("Category", strings(&["A", "A", "B"])),
            Column::string("Value", strings(&["x", "y", "z"])),
        ])
        .unwrap();
        let output = run(&Pivot::default(), &table).unwrap();
        assert!(!output.column("B").unwrap().is_numeric());
        assert_eq!(output.column("B").unwrap().to_string_vec(), vec!["z", ""]);
    }

    #[test]
    fn test_no_category_columns() {
        let node = Pivot {
            category_columns: ColumnQuery::new("FALSE"),
            new_column_name: "\"All\"".to_string(),
            ..Pivot::default()
        };
        let output = run(&node, &example()).unwrap();
        assert_eq!(output.column_names(), vec!["All"]);
        assert_eq!(output.column("All").unwrap().to_f64_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_category_columns_variable() {
        let node = Pivot {
            new_column_name: "GET_ITEM(category_columns, 0) + \":\" + GET_ITEM(category_values, 0)"
                .to_string(),
            ..Pivot::default()
        };
        let output = run(&node, &example()).unwrap();
        assert_eq!(output.column_names(), vec!["Category:A", "Category:B"]);
    }

    #[test]
    fn test_missing_value_column() {
        let node = Pivot {
            value_column: ColumnQuery::named("Area"),
            ..Pivot::default()
        };
        let err = run(&node, &example()).unwrap_err();
        assert!(err.contains("No value column"));
    }

    #[test]
    fn test_normalization_policy() {
        let node = Pivot {
            normalization: ColumnNormalization::LastValue,
            ..Pivot::default()
        };
        let output = run(&node, &example()).unwrap();
        assert_eq!(output.column("B").unwrap().to_f64_vec(), vec![3.0, 3.0]);
    }

    #[test]
    fn test_empty_input() {
        let table = Table::from_columns(vec![
            Column::string("Category", vec![]),
            Column::numeric("Value", vec![]),
        ])
        .unwrap();
        let output = run(&Pivot::default(), &table).unwrap();
        assert_eq!(output.column_count(), 0);
    }

    #[test]
    fn test_idempotent() {
        let node = Pivot::default();
        let table = example();
        assert_eq!(run(&node, &table).unwrap(), run(&node, &table).unwrap());
    }
}
