/// PipeTable - Table Transforms for Analysis Pipelines
///
/// Results tables (named numeric/text columns) and three single-pass
/// transforms over them: per-key aggregation, histogram binning and
/// pivot/un-melt. All user-facing parameters are expressions evaluated by
/// a pluggable [`ExpressionEvaluator`].

pub mod column;
pub mod table;
pub mod expr;
pub mod functions;
pub mod evaluator;
pub mod source;
pub mod normalization;
pub mod progress;
pub mod node;
pub mod aggregate;
pub mod histogram;
pub mod pivot;

pub use column::{Column, ColumnType, ColumnValue};
pub use table::Table;
pub use expr::{parse_expr, Expr, Value};
pub use evaluator::{DefaultEvaluator, ExpressionEvaluator, Variables};
pub use source::{ColumnQuery, ColumnSource};
pub use normalization::ColumnNormalization;
pub use progress::ProgressInfo;
pub use node::{RunConfig, RunContext, TableTransform, TransformNode};
pub use aggregate::AggregatePerKey;
pub use histogram::{Histogram, OutputColumn};
pub use pivot::Pivot;
