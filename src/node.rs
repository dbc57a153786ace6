//! Transform node plumbing: the common trait, the per-run context and the
//! JSON run configuration.

use crate::aggregate::AggregatePerKey;
use crate::evaluator::{ExpressionEvaluator, Variables};
use crate::histogram::Histogram;
use crate::pivot::Pivot;
use crate::progress::ProgressInfo;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single-input, single-output table transform.
pub trait TableTransform {
    /// Human-readable node name, used as the progress prefix.
    fn name(&self) -> &str;

    fn run(&self, input: &Table, ctx: &mut RunContext<'_>) -> Result<Table, String>;
}

/// Everything a transform may use besides its input table.
pub struct RunContext<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
    annotations: HashMap<String, String>,
    progress: ProgressInfo,
}

impl<'a> RunContext<'a> {
    pub fn new(evaluator: &'a dyn ExpressionEvaluator) -> Self {
        RunContext {
            evaluator,
            annotations: HashMap::new(),
            progress: ProgressInfo::new(),
        }
    }

    pub fn with_annotations(mut self, annotations: HashMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn evaluator(&self) -> &'a dyn ExpressionEvaluator {
        self.evaluator
    }

    pub fn annotations(&self) -> &HashMap<String, String> {
        &self.annotations
    }

    /// Fresh variables with the annotations bound.
    pub fn variables(&self) -> Variables {
        Variables::from_annotations(&self.annotations)
    }

    pub fn progress(&self) -> &ProgressInfo {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut ProgressInfo {
        &mut self.progress
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.progress.log(message);
    }

    pub fn into_progress(self) -> ProgressInfo {
        self.progress
    }
}

/// One configured transform node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformNode {
    AggregatePerKey(AggregatePerKey),
    Histogram(Histogram),
    Pivot(Pivot),
}

impl TransformNode {
    fn inner(&self) -> &dyn TableTransform {
        match self {
            TransformNode::AggregatePerKey(node) => node,
            TransformNode::Histogram(node) => node,
            TransformNode::Pivot(node) => node,
        }
    }
}

impl TableTransform for TransformNode {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn run(&self, input: &Table, ctx: &mut RunContext<'_>) -> Result<Table, String> {
        let node = self.inner();
        ctx.progress_mut().set_prefix(node.name());
        log::debug!(
            "Running '{}' on {} rows x {} columns",
            node.name(),
            input.len(),
            input.column_count()
        );
        node.run(input, ctx)
    }
}

/// A node plus the annotations of the data it runs on.
///
/// # Example
///
/// ```
/// use pipetable::{DefaultEvaluator, RunConfig, Table};
///
/// let config = RunConfig::from_json(r##"{
///     "annotations": {"#Dataset": "control"},
///     "node": {"type": "histogram", "input_column": {"mode": "existing", "expression": "\"Area\""}}
/// }"##).unwrap();
///
/// let input = Table::from_csv("Area\n1\n2\n2\n3\n").unwrap();
/// let (output, _progress) = config.run(&input, &DefaultEvaluator::new()).unwrap();
/// assert_eq!(output.column_names(), vec!["Bin min", "Bin max", "Count"]);
/// assert_eq!(output.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub node: TransformNode,
}

impl RunConfig {
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Invalid run configuration: {}", e))
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| format!("JSON serialization error: {}", e))
    }

    /// Run the configured node and return its output with the progress log.
    pub fn run(
        &self,
        input: &Table,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<(Table, ProgressInfo), String> {
        let mut ctx = RunContext::new(evaluator).with_annotations(self.annotations.clone());
        let output = self.node.run(input, &mut ctx)?;
        Ok((output, ctx.into_progress()))
    }
}
