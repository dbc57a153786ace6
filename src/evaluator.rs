//! Variable bindings and the expression evaluator seam.
//!
//! Transforms never parse expressions themselves; they hand the expression
//! text and a [`Variables`] map to an [`ExpressionEvaluator`]. The built-in
//! [`DefaultEvaluator`] uses the parser in [`crate::expr`].

use crate::expr::{eval_expr, parse_expr, Expr, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Name to value bindings visible to an expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables {
    values: HashMap<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind text annotations (pipeline metadata) as string variables.
    pub fn from_annotations(annotations: &HashMap<String, String>) -> Self {
        let mut variables = Self::new();
        variables.put_annotations(annotations);
        variables
    }

    pub fn put_annotations(&mut self, annotations: &HashMap<String, String>) {
        for (name, value) in annotations {
            self.values.insert(name.clone(), Value::String(value.clone()));
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Evaluates expression text against a set of variables.
///
/// Only [`evaluate`](ExpressionEvaluator::evaluate) is required; the typed
/// helpers convert the result and prefix conversion errors with the
/// offending expression.
pub trait ExpressionEvaluator {
    fn evaluate(&self, expression: &str, variables: &Variables) -> Result<Value, String>;

    fn evaluate_to_f64(&self, expression: &str, variables: &Variables) -> Result<f64, String> {
        self.evaluate(expression, variables)?
            .as_f64()
            .map_err(|e| format!("Expression '{}': {}", expression, e))
    }

    fn evaluate_to_bool(&self, expression: &str, variables: &Variables) -> Result<bool, String> {
        self.evaluate(expression, variables)?
            .as_bool()
            .map_err(|e| format!("Expression '{}': {}", expression, e))
    }

    fn evaluate_to_string(&self, expression: &str, variables: &Variables) -> Result<String, String> {
        Ok(self.evaluate(expression, variables)?.to_display_string())
    }
}

/// Built-in evaluator. Each distinct expression text is parsed once; the
/// syntax trees are shared behind a mutex so one evaluator can serve
/// concurrent transform invocations.
#[derive(Debug, Default)]
pub struct DefaultEvaluator {
    cache: Mutex<HashMap<String, Arc<Expr>>>,
}

impl DefaultEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse (or fetch from cache) the syntax tree of an expression.
    pub fn compile(&self, expression: &str) -> Result<Arc<Expr>, String> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| "Expression cache lock poisoned".to_string())?;
        if let Some(expr) = cache.get(expression) {
            return Ok(Arc::clone(expr));
        }
        let expr = Arc::new(
            parse_expr(expression)
                .map_err(|e| format!("Invalid expression '{}': {}", expression, e))?,
        );
        cache.insert(expression.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    /// Number of parsed expressions held in the cache.
    pub fn cached_expressions(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl ExpressionEvaluator for DefaultEvaluator {
    fn evaluate(&self, expression: &str, variables: &Variables) -> Result<Value, String> {
        let expr = self.compile(expression)?;
        eval_expr(&expr, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_evaluation() {
        let evaluator = DefaultEvaluator::new();
        let mut vars = Variables::new();
        vars.set("value", 4.0);

        assert_eq!(evaluator.evaluate_to_f64("value * 2", &vars).unwrap(), 8.0);
        assert!(evaluator.evaluate_to_bool("value > 3", &vars).unwrap());
        assert_eq!(evaluator.evaluate_to_string("\"Count\"", &vars).unwrap(), "Count");
    }

    #[test]
    fn test_conversion_error_names_expression() {
        let evaluator = DefaultEvaluator::new();
        let err = evaluator
            .evaluate_to_f64("'abc'", &Variables::new())
            .unwrap_err();
        assert!(err.contains("'abc'"));
    }

    #[test]
    fn test_parse_error() {
        let evaluator = DefaultEvaluator::new();
        let err = evaluator.evaluate("1 +", &Variables::new()).unwrap_err();
        assert!(err.starts_with("Invalid expression"));
    }

    #[test]
    fn test_cache_reuses_parsed_expression() {
        let evaluator = DefaultEvaluator::new();
        let vars = Variables::new();
        for _ in 0..3 {
            evaluator.evaluate("1 + 1", &vars).unwrap();
        }
        evaluator.evaluate("2 + 2", &vars).unwrap();
        assert_eq!(evaluator.cached_expressions(), 2);
    }

    #[test]
    fn test_annotations() {
        let mut annotations = HashMap::new();
        annotations.insert("#Dataset".to_string(), "control".to_string());
        let vars = Variables::from_annotations(&annotations);

        let evaluator = DefaultEvaluator::new();
        assert!(evaluator
            .evaluate_to_bool("$\"#Dataset\" == \"control\"", &vars)
            .unwrap());
    }

    #[test]
    fn test_evaluator_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DefaultEvaluator>();
    }
}
