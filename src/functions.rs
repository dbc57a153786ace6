//! Built-in function library of the expression language.
//!
//! Numeric aggregate functions flatten their arguments, so `SUM(values)`,
//! `SUM(1, 2, 3)` and `SUM([1, 2], 3)` are all valid.

use crate::expr::Value;

/// Call a built-in function by its upper-case name.
pub fn call(name: &str, args: &[Value]) -> Result<Value, String> {
    match name {
        // Aggregates over numbers
        "SUM" => Ok(Value::Number(numbers(name, args)?.iter().sum())),
        "COUNT" => Ok(Value::Number(flatten(args).len() as f64)),
        "MIN" => Ok(Value::Number(
            numbers(name, args)?.into_iter().fold(f64::NAN, f64::min),
        )),
        "MAX" => Ok(Value::Number(
            numbers(name, args)?.into_iter().fold(f64::NAN, f64::max),
        )),
        "AVG" | "MEAN" | "AVERAGE" => Ok(Value::Number(mean(&numbers(name, args)?))),
        "MEDIAN" => Ok(Value::Number(median(numbers(name, args)?))),
        "VARIANCE" => Ok(Value::Number(variance(&numbers(name, args)?))),
        "STDEV" | "STD" => Ok(Value::Number(variance(&numbers(name, args)?).sqrt())),

        // Scalar math
        "ABS" => unary_math(name, args, f64::abs),
        "FLOOR" => unary_math(name, args, f64::floor),
        "CEIL" => unary_math(name, args, f64::ceil),
        "ROUND" => unary_math(name, args, f64::round),
        "SQRT" => unary_math(name, args, f64::sqrt),
        "LOG" => unary_math(name, args, f64::ln),
        "EXP" => unary_math(name, args, f64::exp),
        "IS_NAN" => {
            expect_arity(name, args, 1)?;
            Ok(Value::Bool(args[0].as_f64()?.is_nan()))
        }
        "IS_INFINITE" => {
            expect_arity(name, args, 1)?;
            Ok(Value::Bool(args[0].as_f64()?.is_infinite()))
        }

        // Conversion
        "TO_NUMBER" => {
            expect_arity(name, args, 1)?;
            Ok(Value::Number(args[0].as_f64()?))
        }
        "TO_STRING" => {
            expect_arity(name, args, 1)?;
            Ok(Value::String(args[0].to_display_string()))
        }

        // Text and lists
        "LENGTH" => {
            expect_arity(name, args, 1)?;
            match &args[0] {
                Value::List(items) => Ok(Value::Number(items.len() as f64)),
                Value::Null => Ok(Value::Number(0.0)),
                other => Ok(Value::Number(other.to_display_string().chars().count() as f64)),
            }
        }
        "CONCAT" => Ok(Value::String(
            args.iter().map(|v| v.to_display_string()).collect::<String>(),
        )),
        "JOIN_STRINGS" => {
            expect_arity(name, args, 2)?;
            let items: Vec<String> = args[0]
                .as_list()?
                .iter()
                .map(|v| v.to_display_string())
                .collect();
            Ok(Value::String(items.join(&args[1].to_display_string())))
        }
        "STRING_CONTAINS" => string_predicate(name, args, |s, p| s.contains(p)),
        "STRING_STARTS_WITH" => string_predicate(name, args, |s, p| s.starts_with(p)),
        "STRING_ENDS_WITH" => string_predicate(name, args, |s, p| s.ends_with(p)),
        "CONTAINS" => {
            expect_arity(name, args, 2)?;
            match &args[0] {
                Value::List(items) => Ok(Value::Bool(items.contains(&args[1]))),
                other => Ok(Value::Bool(
                    other.to_display_string().contains(&args[1].to_display_string()),
                )),
            }
        }
        "GET_ITEM" => {
            expect_arity(name, args, 2)?;
            let items = args[0].as_list()?;
            let index = args[1].as_f64()?;
            if index < 0.0 || index.fract() != 0.0 {
                return Err(format!("GET_ITEM: invalid index {}", index));
            }
            items
                .get(index as usize)
                .cloned()
                .ok_or_else(|| format!("GET_ITEM: index {} out of range [0, {})", index, items.len()))
        }

        _ => Err(format!("Unknown function '{}'", name)),
    }
}

fn expect_arity(name: &str, args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!(
            "{} expects {} argument(s), got {}",
            name,
            expected,
            args.len()
        ));
    }
    Ok(())
}

fn unary_math(name: &str, args: &[Value], f: fn(f64) -> f64) -> Result<Value, String> {
    expect_arity(name, args, 1)?;
    Ok(Value::Number(f(args[0].as_f64()?)))
}

fn string_predicate(
    name: &str,
    args: &[Value],
    f: fn(&str, &str) -> bool,
) -> Result<Value, String> {
    expect_arity(name, args, 2)?;
    let haystack = args[0].to_display_string();
    let needle = args[1].to_display_string();
    Ok(Value::Bool(f(&haystack, &needle)))
}

fn flatten(args: &[Value]) -> Vec<&Value> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::List(items) => out.extend(flatten(items)),
            other => out.push(other),
        }
    }
    out
}

fn numbers(name: &str, args: &[Value]) -> Result<Vec<f64>, String> {
    flatten(args)
        .into_iter()
        .map(|v| v.as_f64().map_err(|e| format!("{}: {}", name, e)))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Bias-corrected sample variance. A single value has variance 0.
fn variance(values: &[f64]) -> f64 {
    match values.len() {
        0 => f64::NAN,
        1 => 0.0,
        n => {
            let m = mean(values);
            values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
        }
    }
}
