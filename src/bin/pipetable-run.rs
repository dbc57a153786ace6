/// PipeTable Runner
///
/// Runs one configured transform node over a CSV or JSON table and prints
/// the resulting table.
///
/// Usage: pipetable-run <config.json> <input.csv|input.json>

use pipetable::{DefaultEvaluator, RunConfig, Table};
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <config.json> <input.csv|input.json>", args[0]);
        return ExitCode::from(2);
    }

    match run(&args[1], &args[2]) {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str, input_path: &str) -> Result<String, String> {
    // Output format from environment, CSV by default
    let format = std::env::var("PIPETABLE_OUTPUT").unwrap_or_else(|_| "csv".to_string());

    let config_text = std::fs::read_to_string(config_path)
        .map_err(|e| format!("Cannot read '{}': {}", config_path, e))?;
    let config = RunConfig::from_json(&config_text)?;

    let input_text = std::fs::read_to_string(input_path)
        .map_err(|e| format!("Cannot read '{}': {}", input_path, e))?;
    let is_json = Path::new(input_path)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let input = if is_json {
        Table::from_json(&input_text)?
    } else {
        Table::from_csv(&input_text)?
    };
    log::info!(
        "Loaded '{}' ({} rows, {} columns)",
        input_path,
        input.len(),
        input.column_count()
    );

    let evaluator = DefaultEvaluator::new();
    let (output, _progress) = config.run(&input, &evaluator)?;

    match format.to_lowercase().as_str() {
        "csv" => Ok(output.to_csv()),
        "json" => output.to_json().map(|json| json + "\n"),
        other => Err(format!(
            "Unknown PIPETABLE_OUTPUT '{}'. Use 'csv' or 'json'",
            other
        )),
    }
}
