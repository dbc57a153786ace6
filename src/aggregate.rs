//! Per-key aggregation ("Apply expression per label").
//!
//! Rows are grouped by a numeric key, each group's values are reduced with
//! an expression, and one row per distinct key is emitted in ascending key
//! order.

use crate::column::Column;
use crate::expr::Value;
use crate::node::{RunContext, TableTransform};
use crate::source::ColumnSource;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatePerKey {
    /// Column holding the key (label) of each row.
    pub key_column: ColumnSource,
    /// Column holding the values that are reduced per key.
    pub value_column: ColumnSource,
    /// Reduction over `values` (and `key`), e.g. `SUM(values)`.
    pub reduction: String,
    /// Replace each reduced value with the running sum over ascending keys.
    pub cumulative: bool,
    /// Divide all reduced values by their maximum.
    pub normalize: bool,
    /// Expression producing the output key column name.
    pub key_column_name: String,
    /// Expression producing the output value column name.
    pub value_column_name: String,
}

impl Default for AggregatePerKey {
    fn default() -> Self {
        AggregatePerKey {
            key_column: ColumnSource::column("Label"),
            value_column: ColumnSource::column("Value"),
            reduction: "SUM(values)".to_string(),
            cumulative: false,
            normalize: false,
            key_column_name: "\"Label\"".to_string(),
            value_column_name: "\"Value\"".to_string(),
        }
    }
}

impl TableTransform for AggregatePerKey {
    fn name(&self) -> &str {
        "Apply expression per label"
    }

    fn run(&self, input: &Table, ctx: &mut RunContext<'_>) -> Result<Table, String> {
        let evaluator = ctx.evaluator();
        let mut variables = ctx.variables();

        let key_name = evaluator.evaluate_to_string(&self.key_column_name, &variables)?;
        let value_name = evaluator.evaluate_to_string(&self.value_column_name, &variables)?;

        if input.is_empty() {
            ctx.log("Input table is empty! Skipping.");
            return Table::from_columns(vec![
                Column::numeric(key_name, Vec::new()),
                Column::numeric(value_name, Vec::new()),
            ]);
        }

        let key_column = self.key_column.pick_or_generate(input, evaluator, &variables)?;
        let value_column = self.value_column.pick_or_generate(input, evaluator, &variables)?;

        let buckets = group_by_key(&key_column.to_f64_vec(), &value_column.to_f64_vec());

        let mut keys = Vec::with_capacity(buckets.len());
        let mut reduced = Vec::with_capacity(buckets.len());
        for (key, values) in buckets {
            variables.set("key", key);
            variables.set("values", Value::from(values));
            reduced.push(evaluator.evaluate_to_f64(&self.reduction, &variables)?);
            keys.push(key);
        }

        if self.cumulative {
            cumulative_sum(&mut reduced);
        }
        if self.normalize && !normalize_by_max(&mut reduced) {
            ctx.log("Maximum is zero or not finite. Values were not normalized.");
        }

        Table::from_columns(vec![
            Column::numeric(key_name, keys),
            Column::numeric(value_name, reduced),
        ])
    }
}

/// Group `values` by the key of the same row. Buckets come out in ascending
/// key order; values keep their row order within a bucket.
fn group_by_key(keys: &[f64], values: &[f64]) -> Vec<(f64, Vec<f64>)> {
    let mut index: HashMap<u64, usize> = HashMap::new();
    let mut buckets: Vec<(f64, Vec<f64>)> = Vec::new();

    for (&key, &value) in keys.iter().zip(values) {
        // All NaNs are one label, as are -0.0 and 0.0
        let key = if key.is_nan() {
            f64::NAN
        } else if key == 0.0 {
            0.0
        } else {
            key
        };
        let slot = *index.entry(key.to_bits()).or_insert_with(|| {
            buckets.push((key, Vec::new()));
            buckets.len() - 1
        });
        buckets[slot].1.push(value);
    }

    buckets.sort_by(|a, b| a.0.total_cmp(&b.0));
    buckets
}

/// In-place running sum.
pub(crate) fn cumulative_sum(values: &mut [f64]) {
    let mut total = 0.0;
    for v in values.iter_mut() {
        total += *v;
        *v = total;
    }
}

/// Divide by the maximum. Returns false (leaving the values alone) when the
/// maximum is zero or not finite.
pub(crate) fn normalize_by_max(values: &mut [f64]) -> bool {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() || max == 0.0 {
        return false;
    }
    for v in values.iter_mut() {
        *v /= max;
    }
    true
}
