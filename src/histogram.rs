//! Histogram binning ("Table column to histogram").
//!
//! Values of one column are filtered, split into equal-width bins between
//! the smallest and largest surviving value, and each non-empty bin is
//! reduced with an accumulation expression.

use crate::aggregate::{cumulative_sum, normalize_by_max};
use crate::column::Column;
use crate::evaluator::{ExpressionEvaluator, Variables};
use crate::expr::Value;
use crate::node::{RunContext, TableTransform};
use crate::source::ColumnSource;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Histogram {
    /// Column whose values are binned.
    pub input_column: ColumnSource,
    /// Per-row weight, summed into `weighted_count`.
    pub weight_column: ColumnSource,
    /// Predicate over `value` and `weight`; rows failing it are ignored.
    pub value_filter: String,
    /// Number of bins. `INF` or `-INF` creates one bin per distinct value.
    pub num_bins: String,
    /// Reduction producing the count column of each bin.
    pub accumulation: String,
    pub bin_min_column_name: String,
    pub bin_max_column_name: String,
    pub count_column_name: String,
    /// Extra per-bin columns, placed between the bin maximum and the count.
    pub additional_columns: Vec<OutputColumn>,
    pub cumulative: bool,
    pub normalize: bool,
}

impl Default for Histogram {
    fn default() -> Self {
        Histogram {
            input_column: ColumnSource::column("Value"),
            weight_column: ColumnSource::generate("1"),
            value_filter: "NOT IS_NAN(value)".to_string(),
            num_bins: "INF".to_string(),
            accumulation: "COUNT(values)".to_string(),
            bin_min_column_name: "\"Bin min\"".to_string(),
            bin_max_column_name: "\"Bin max\"".to_string(),
            count_column_name: "\"Count\"".to_string(),
            additional_columns: Vec::new(),
            cumulative: false,
            normalize: false,
        }
    }
}

/// An extra output column: both fields are expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputColumn {
    pub name: String,
    pub value: String,
}

impl Default for OutputColumn {
    fn default() -> Self {
        OutputColumn {
            name: "\"Output\"".to_string(),
            value: "count".to_string(),
        }
    }
}

/// A distinct surviving value with its occurrences.
#[derive(Debug, Clone, Copy)]
struct Occurrence {
    value: f64,
    count: usize,
    weight: f64,
}

#[derive(Debug)]
struct Bin {
    limit_min: f64,
    limit_max: f64,
    members: Vec<Occurrence>,
}

impl Bin {
    fn count(&self) -> usize {
        self.members.iter().map(|m| m.count).sum()
    }

    fn weighted_count(&self) -> f64 {
        self.members.iter().map(|m| m.weight).sum()
    }

    /// Member values, each repeated by its number of occurrences.
    fn expanded_values(&self) -> Vec<f64> {
        self.members
            .iter()
            .flat_map(|m| std::iter::repeat(m.value).take(m.count))
            .collect()
    }

    fn unique_values(&self) -> Vec<f64> {
        self.members.iter().map(|m| m.value).collect()
    }
}

/// Per-bin counts, running totals included.
#[derive(Debug, Clone, Copy)]
struct BinStats {
    count: usize,
    weighted_count: f64,
    cumulative_count: usize,
    cumulative_weighted_count: f64,
}

impl BinStats {
    fn collect(bins: &[Bin]) -> Vec<BinStats> {
        let mut cumulative_count = 0usize;
        let mut cumulative_weighted_count = 0.0;
        bins.iter()
            .map(|bin| {
                let count = bin.count();
                let weighted_count = bin.weighted_count();
                cumulative_count += count;
                cumulative_weighted_count += weighted_count;
                BinStats {
                    count,
                    weighted_count,
                    cumulative_count,
                    cumulative_weighted_count,
                }
            })
            .collect()
    }
}

fn max_of(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(f64::NEG_INFINITY, f64::max)
}

/// Equal-width bins over `[min, max]`. Bin `i` covers
/// `[min + i * width, min + (i + 1) * width]`, and the last bin always
/// ends exactly at `max`.
#[derive(Debug, Clone, Copy)]
struct BinLayout {
    min: f64,
    max: f64,
    width: f64,
    bins: usize,
}

impl BinLayout {
    fn new(min: f64, max: f64, bins: usize) -> Self {
        BinLayout {
            min,
            max,
            width: (max - min) / bins as f64,
            bins,
        }
    }

    fn start(&self, i: usize) -> f64 {
        if i == 0 {
            self.min
        } else {
            self.min + i as f64 * self.width
        }
    }

    fn end(&self, i: usize) -> f64 {
        if i + 1 >= self.bins {
            self.max
        } else {
            self.min + (i + 1) as f64 * self.width
        }
    }

    /// First bin at or after `from` whose end is not below `value`. A value
    /// on a shared boundary belongs to the lower bin. Bin ends never decrease, so this is a binary search over `from..bins`.
    fn locate(&self, value: f64, from: usize) -> usize {
        let (mut lo, mut hi) = (from, self.bins - 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if value <= self.end(mid) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }
}

impl TableTransform for Histogram {
    fn name(&self) -> &str {
        "Table column to histogram"
    }

    fn run(&self, input: &Table, ctx: &mut RunContext<'_>) -> Result<Table, String> {
        let evaluator = ctx.evaluator();
        let mut variables = ctx.variables();

        let bin_min_name = evaluator.evaluate_to_string(&self.bin_min_column_name, &variables)?;
        let bin_max_name = evaluator.evaluate_to_string(&self.bin_max_column_name, &variables)?;
        let count_name = evaluator.evaluate_to_string(&self.count_column_name, &variables)?;
        let additional_names = self
            .additional_columns
            .iter()
            .map(|c| evaluator.evaluate_to_string(&c.name, &variables))
            .collect::<Result<Vec<_>, _>>()?;

        let assemble = |bin_min: Vec<f64>,
                        bin_max: Vec<f64>,
                        additional: Vec<Vec<f64>>,
                        counts: Vec<f64>| {
            let mut columns = vec![
                Column::numeric(bin_min_name.as_str(), bin_min),
                Column::numeric(bin_max_name.as_str(), bin_max),
            ];
            for (name, values) in additional_names.iter().zip(additional) {
                columns.push(Column::numeric(name.as_str(), values));
            }
            columns.push(Column::numeric(count_name.as_str(), counts));
            Table::from_columns(columns)
        };
        let empty_output = || {
            assemble(
                Vec::new(),
                Vec::new(),
                vec![Vec::new(); additional_names.len()],
                Vec::new(),
            )
        };

        if input.is_empty() {
            ctx.log("Input table is empty! Skipping.");
            return empty_output();
        }

        let input_column = self.input_column.pick_or_generate(input, evaluator, &variables)?;
        let weight_column = self.weight_column.pick_or_generate(input, evaluator, &variables)?;

        let occurrences = self.filter_values(
            &input_column.to_f64_vec(),
            &weight_column.to_f64_vec(),
            evaluator,
            &mut variables,
            ctx,
        )?;
        if occurrences.is_empty() {
            ctx.log("All values were filtered! Skipping.");
            return empty_output();
        }

        variables.set(
            "filtered_unique_values",
            Value::from(occurrences.iter().map(|o| o.value).collect::<Vec<f64>>()),
        );
        let bin_count = self.resolve_bin_count(occurrences.len(), evaluator, &variables, ctx)?;

        let bins = assign_bins(&occurrences, bin_count);
        log::debug!("{} of {} bins are non-empty", bins.len(), bin_count);

        let mut bin_min = Vec::with_capacity(bins.len());
        let mut bin_max = Vec::with_capacity(bins.len());
        let mut counts = Vec::with_capacity(bins.len());
        let mut additional = vec![Vec::with_capacity(bins.len()); self.additional_columns.len()];

        let stats = BinStats::collect(&bins);
        variables.set("max_count", max_of(stats.iter().map(|s| s.count as f64)));
        variables.set("max_weighted_count", max_of(stats.iter().map(|s| s.weighted_count)));
        variables.set(
            "max_cumulative_count",
            max_of(stats.iter().map(|s| s.cumulative_count as f64)),
        );
        variables.set(
            "max_cumulative_weighted_count",
            max_of(stats.iter().map(|s| s.cumulative_weighted_count)),
        );

        for (bin, stat) in bins.iter().zip(&stats) {
            variables.set("values", Value::from(bin.expanded_values()));
            variables.set("unique_values", Value::from(bin.unique_values()));
            variables.set("count", stat.count);
            variables.set("weighted_count", stat.weighted_count);
            variables.set("cumulative_count", stat.cumulative_count);
            variables.set("cumulative_weighted_count", stat.cumulative_weighted_count);
            variables.set("bin_limit_min", bin.limit_min);
            variables.set("bin_limit_max", bin.limit_max);

            // Members are sorted ascending
            bin_min.push(bin.members.first().map(|m| m.value).unwrap_or(bin.limit_min));
            bin_max.push(bin.members.last().map(|m| m.value).unwrap_or(bin.limit_max));
            counts.push(evaluator.evaluate_to_f64(&self.accumulation, &variables)?);
            for (column, values) in self.additional_columns.iter().zip(additional.iter_mut()) {
                values.push(evaluator.evaluate_to_f64(&column.value, &variables)?);
            }
        }

        if self.cumulative {
            cumulative_sum(&mut counts);
        }
        if self.normalize && !normalize_by_max(&mut counts) {
            ctx.log("Maximum is zero or not finite. Values were not normalized.");
        }

        assemble(bin_min, bin_max, additional, counts)
    }
}

impl Histogram {
    /// Apply the value filter. Returns the distinct surviving values in
    /// ascending order with their occurrence counts and summed weights.
    fn filter_values(
        &self,
        values: &[f64],
        weights: &[f64],
        evaluator: &dyn ExpressionEvaluator,
        variables: &mut Variables,
        ctx: &mut RunContext<'_>,
    ) -> Result<Vec<Occurrence>, String> {
        let mut index: HashMap<u64, usize> = HashMap::new();
        let mut occurrences: Vec<Occurrence> = Vec::new();
        let mut skipped_nan = 0usize;

        for (&value, &weight) in values.iter().zip(weights) {
            variables.set("value", value);
            variables.set("weight", weight);
            if !evaluator.evaluate_to_bool(&self.value_filter, variables)? {
                continue;
            }
            if value.is_nan() {
                skipped_nan += 1;
                continue;
            }
            let value = if value == 0.0 { 0.0 } else { value };
            let slot = *index.entry(value.to_bits()).or_insert_with(|| {
                occurrences.push(Occurrence {
                    value,
                    count: 0,
                    weight: 0.0,
                });
                occurrences.len() - 1
            });
            occurrences[slot].count += 1;
            occurrences[slot].weight += weight;
        }
        variables.remove("value");
        variables.remove("weight");

        if skipped_nan > 0 {
            ctx.log(format!("Ignored {} NaN values that passed the filter", skipped_nan));
        }

        occurrences.sort_by(|a, b| a.value.total_cmp(&b.value));
        Ok(occurrences)
    }

    fn resolve_bin_count(
        &self,
        distinct: usize,
        evaluator: &dyn ExpressionEvaluator,
        variables: &Variables,
        ctx: &mut RunContext<'_>,
    ) -> Result<usize, String> {
        let requested = evaluator.evaluate_to_f64(&self.num_bins, variables)?;
        if requested.is_nan() {
            return Err(format!(
                "Number of bins '{}' evaluated to NaN",
                self.num_bins
            ));
        }
        let bins = if requested.is_infinite() {
            distinct
        } else if requested < 1.0 {
            ctx.log(format!(
                "Number of bins {} is less than 1. Using 1 bin.",
                requested
            ));
            1
        } else {
            requested as usize
        };
        ctx.log(format!("Number of bins = {}", bins));
        Ok(bins)
    }
}

/// Assign each distinct value to exactly one bin and drop empty bins.
fn assign_bins(occurrences: &[Occurrence], bin_count: usize) -> Vec<Bin> {
    let (Some(first), Some(last)) = (occurrences.first(), occurrences.last()) else {
        return Vec::new();
    };
    let layout = BinLayout::new(first.value, last.value, bin_count.max(1));

    let mut bins: Vec<Bin> = Vec::new();
    let mut current_index = 0usize;
    let mut current: Option<Bin> = None;

    for occurrence in occurrences {
        let index = layout.locate(occurrence.value, current_index);
        if index != current_index {
            bins.extend(current.take());
            current_index = index;
        }
        current
            .get_or_insert_with(|| Bin {
                limit_min: layout.start(index),
                limit_max: layout.end(index),
                members: Vec::new(),
            })
            .members
            .push(*occurrence);
    }
    bins.extend(current);
    bins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::DefaultEvaluator;

    fn input(values: Vec<f64>) -> Table {
        Table::from_columns(vec![Column::numeric("Value", values)]).unwrap()
    }

    fn run_with_log(node: &Histogram, table: &Table) -> (Table, Vec<String>) {
        let evaluator = DefaultEvaluator::new();
        let mut ctx = RunContext::new(&evaluator);
        let output = node.run(table, &mut ctx).unwrap();
        (output, ctx.progress().lines().to_vec())
    }

    fn run(node: &Histogram, table: &Table) -> Table {
        run_with_log(node, table).0
    }

    fn column(table: &Table, name: &str) -> Vec<f64> {
        table.column(name).unwrap().to_f64_vec()
    }

    #[test]
    fn test_three_bins() {
        let node = Histogram {
            num_bins: "3".to_string(),
            ..Histogram::default()
        };
        let output = run(&node, &input(vec![1.0, 2.0, 2.0, 3.0]));

        assert_eq!(output.column_names(), vec!["Bin min", "Bin max", "Count"]);
        assert_eq!(column(&output, "Bin min"), vec![1.0, 2.0, 3.0]);
        assert_eq!(column(&output, "Bin max"), vec![1.0, 2.0, 3.0]);
        assert_eq!(column(&output, "Count"), vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_infinite_bins_is_one_per_distinct_value() {
        let (output, log) = run_with_log(&Histogram::default(), &input(vec![5.0, 1.0, 5.0, 3.0, 5.0]));
        assert_eq!(column(&output, "Bin min"), vec![1.0, 3.0, 5.0]);
        assert_eq!(column(&output, "Count"), vec![1.0, 1.0, 3.0]);
        assert!(log.iter().any(|l| l == "Number of bins = 3"));
    }

    #[test]
    fn test_total_count_matches_filtered_rows() {
        let values: Vec<f64> = (0..50).map(|i| ((i * 37) % 23) as f64 * 0.1).collect();
        for bins in ["1", "2", "3", "7", "10", "INF", "1000"] {
            let node = Histogram {
                num_bins: bins.to_string(),
                value_filter: "value >= 0.5".to_string(),
                ..Histogram::default()
            };
            let output = run(&node, &input(values.clone()));
            let expected = values.iter().filter(|v| **v >= 0.5).count() as f64;
            let total: f64 = column(&output, "Count").iter().sum();
            assert_eq!(total, expected, "bins = {}", bins);
        }
    }

    #[test]
    fn test_boundary_value_goes_to_lower_bin() {
        let node = Histogram {
            num_bins: "2".to_string(),
            ..Histogram::default()
        };
        let output = run(&node, &input(vec![0.0, 1.0, 2.0]));
        assert_eq!(column(&output, "Count"), vec![2.0, 1.0]);
        assert_eq!(column(&output, "Bin max"), vec![1.0, 2.0]);
    }

    #[test]
    fn test_last_bin_includes_maximum() {
        let node = Histogram {
            num_bins: "3".to_string(),
            ..Histogram::default()
        };
        let output = run(&node, &input(vec![0.0, 0.1, 0.2, 0.3]));
        let counts = column(&output, "Count");
        assert_eq!(counts.iter().sum::<f64>(), 4.0);
        assert_eq!(column(&output, "Bin max").last(), Some(&0.3));
    }

    #[test]
    fn test_empty_bins_are_dropped() {
        let node = Histogram {
            num_bins: "10".to_string(),
            ..Histogram::default()
        };
        let output = run(&node, &input(vec![0.0, 0.05, 10.0]));
        assert_eq!(output.len(), 2);
        assert_eq!(column(&output, "Count"), vec![2.0, 1.0]);
    }

    #[test]
    fn test_empty_input() {
        let (output, log) = run_with_log(&Histogram::default(), &input(vec![]));
        assert_eq!(output.len(), 0);
        assert_eq!(output.column_names(), vec!["Bin min", "Bin max", "Count"]);
        assert_eq!(log, vec!["Input table is empty! Skipping."]);
    }

    #[test]
    fn test_all_filtered() {
        let node = Histogram {
            value_filter: "value > 100".to_string(),
            additional_columns: vec![OutputColumn::default()],
            ..Histogram::default()
        };
        let (output, log) = run_with_log(&node, &input(vec![1.0, 2.0]));
        assert_eq!(output.len(), 0);
        assert_eq!(output.column_names(), vec!["Bin min", "Bin max", "Output", "Count"]);
        assert!(log.contains(&"All values were filtered! Skipping.".to_string()));
    }

    #[test]
    fn test_nan_filtered_by_default() {
        let output = run(&Histogram::default(), &input(vec![1.0, f64::NAN, 1.0]));
        assert_eq!(column(&output, "Count"), vec![2.0]);
    }

    #[test]
    fn test_bin_count_below_one_clamps() {
        let node = Histogram {
            num_bins: "0".to_string(),
            ..Histogram::default()
        };
        let (output, log) = run_with_log(&node, &input(vec![1.0, 2.0, 3.0]));
        assert_eq!(column(&output, "Count"), vec![3.0]);
        assert_eq!(column(&output, "Bin min"), vec![1.0]);
        assert_eq!(column(&output, "Bin max"), vec![3.0]);
        assert!(log.iter().any(|l| l.contains("less than 1")));
    }

    #[test]
    fn test_negative_infinite_bins_is_one_per_distinct_value() {
        let node = Histogram {
            num_bins: "-INF".to_string(),
            ..Histogram::default()
        };
        let (output, log) = run_with_log(&node, &input(vec![1.0, 2.0, 3.0]));
        assert_eq!(column(&output, "Count"), vec![1.0, 1.0, 1.0]);
        assert!(log.iter().all(|l| !l.contains("less than 1")));
    }

    #[test]
    fn test_nan_bin_count_is_error() {
        let node = Histogram {
            num_bins: "NAN".to_string(),
            ..Histogram::default()
        };
        let evaluator = DefaultEvaluator::new();
        let mut ctx = RunContext::new(&evaluator);
        assert!(node.run(&input(vec![1.0]), &mut ctx).is_err());
    }

    #[test]
    fn test_bin_count_from_unique_values() {
        let node = Histogram {
            num_bins: "COUNT(filtered_unique_values) / 2".to_string(),
            ..Histogram::default()
        };
        let output = run(&node, &input(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(column(&output, "Count"), vec![2.0, 2.0]);
    }

    #[test]
    fn test_cumulative_and_normalize() {
        let table = input(vec![1.0, 2.0, 2.0, 3.0]);

        let node = Histogram {
            cumulative: true,
            ..Histogram::default()
        };
        assert_eq!(column(&run(&node, &table), "Count"), vec![1.0, 3.0, 4.0]);

        let node = Histogram {
            normalize: true,
            ..Histogram::default()
        };
        assert_eq!(column(&run(&node, &table), "Count"), vec![0.5, 1.0, 0.5]);
    }

    #[test]
    fn test_weights_and_additional_columns() {
        let table = Table::from_columns(vec![
            Column::numeric("Value", vec![1.0, 1.0, 2.0]),
            Column::numeric("W", vec![0.5, 1.5, 4.0]),
        ])
        .unwrap();
        let node = Histogram {
            weight_column: ColumnSource::column("W"),
            value_filter: "weight < 3".to_string(),
            count_column_name: "\"Mean\"".to_string(),
            accumulation: "MEAN(values)".to_string(),
            additional_columns: vec![
                OutputColumn {
                    name: "\"Weighted\"".to_string(),
                    value: "weighted_count".to_string(),
                },
                OutputColumn {
                    name: "\"Limit\"".to_string(),
                    value: "bin_limit_max".to_string(),
                },
            ],
            ..Histogram::default()
        };
        let output = run(&node, &table);

        assert_eq!(
            output.column_names(),
            vec!["Bin min", "Bin max", "Weighted", "Limit", "Mean"]
        );
        assert_eq!(column(&output, "Weighted"), vec![2.0]);
        assert_eq!(column(&output, "Limit"), vec![1.0]);
        assert_eq!(column(&output, "Mean"), vec![1.0]);
    }

    #[test]
    fn test_maximum_variables() {
        let table = input(vec![1.0, 2.0, 2.0, 3.0]);
        let node = Histogram {
            additional_columns: vec![
                OutputColumn {
                    name: "\"Share\"".to_string(),
                    value: "count / max_count".to_string(),
                },
                OutputColumn {
                    name: "\"Progress\"".to_string(),
                    value: "cumulative_count / max_cumulative_count".to_string(),
                },
                OutputColumn {
                    name: "\"Weighted share\"".to_string(),
                    value: "weighted_count / max_weighted_count".to_string(),
                },
                OutputColumn {
                    name: "\"Total weight\"".to_string(),
                    value: "max_cumulative_weighted_count".to_string(),
                },
            ],
            ..Histogram::default()
        };
        let output = run(&node, &table);

        assert_eq!(column(&output, "Share"), vec![0.5, 1.0, 0.5]);
        assert_eq!(column(&output, "Progress"), vec![0.25, 0.75, 1.0]);
        assert_eq!(column(&output, "Weighted share"), vec![0.5, 1.0, 0.5]);
        assert_eq!(column(&output, "Total weight"), vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_text_column_values_parse() {
        let table = Table::from_columns(vec![Column::string(
            "Value",
            vec!["1".to_string(), "x".to_string(), "1".to_string()],
        )])
        .unwrap();
        let output = run(&Histogram::default(), &table);
        assert_eq!(column(&output, "Count"), vec![2.0]);
    }

    #[test]
    fn test_idempotent() {
        let table = input(vec![0.3, 1.7, 2.2, 2.2, 9.1, -4.0]);
        let node = Histogram {
            num_bins: "4".to_string(),
            cumulative: true,
            normalize: true,
            ..Histogram::default()
        };
        assert_eq!(run(&node, &table), run(&node, &table));
    }

    #[test]
    fn test_locate_with_zero_width() {
        let layout = BinLayout::new(2.0, 2.0, 3);
        assert_eq!(layout.locate(2.0, 0), 0);
    }

    #[test]
    fn test_locate_with_underflowing_width() {
        let layout = BinLayout::new(0.0, 5e-324, usize::MAX);
        assert_eq!(layout.width, 0.0);
        assert_eq!(layout.locate(0.0, 0), 0);
        assert_eq!(layout.locate(5e-324, 0), usize::MAX - 1);
    }

    #[test]
    fn test_huge_bin_count_over_tiny_range() {
        let node = Histogram {
            num_bins: "1e30".to_string(),
            ..Histogram::default()
        };
        let output = run(&node, &input(vec![0.0, 5e-324, 0.0]));
        assert_eq!(column(&output, "Bin min"), vec![0.0, 5e-324]);
        assert_eq!(column(&output, "Count"), vec![2.0, 1.0]);
    }
}
