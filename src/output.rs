use crate::cli::OutputFormat;
use copilot::error::code::CLI_ERROR;
use copilot::error::get_error_info;
use copilot::CopilotError;
use serde_json::{json, Value};

pub fn emit_output(output: &OutputFormat, command: &str, payload: Value) {
    match output {
        OutputFormat::Text => payload
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| println!("{payload}"), |msg| println!("{msg}")),
        OutputFormat::Json => println!("{}", success_envelope(command, payload)),
    }
}

/// Prints the failure and returns the process exit code for it.
pub fn emit_error(output: &OutputFormat, command: &str, error: &CopilotError) -> i32 {
    match output {
        OutputFormat::Text => {
            eprintln!("Error: {error}");
            if let Some((_, fix)) = get_error_info(error.code()) {
                eprintln!("Fix: {fix}");
            }
        }
        OutputFormat::Json => println!("{}", error_envelope(command, error)),
    }
    error.exit_code()
}

/// Usage errors exit with 2, the same code as configuration errors.
pub fn emit_cli_error(output: &OutputFormat, message: &str, suggestions: &[String]) -> i32 {
    match output {
        OutputFormat::Text => {
            eprintln!("Error: {message}");
            if !suggestions.is_empty() {
                eprintln!("Did you mean: {}?", suggestions.join(", "));
            }
            if let Some((_, fix)) = get_error_info(CLI_ERROR) {
                eprintln!("Fix: {fix}");
            }
        }
        OutputFormat::Json => println!(
            "{}",
            json!({
                "command": "cli",
                "status": "error",
                "error": {
                    "code": CLI_ERROR,
                    "message": message,
                    "suggestions": suggestions,
                    "fix": get_error_info(CLI_ERROR).map(|(_, fix)| fix),
                    "exit_code": 2,
                },
            })
        ),
    }
    2
}

fn success_envelope(command: &str, payload: Value) -> Value {
    json!({
        "command": command,
        "status": "ok",
        "payload": payload,
    })
}

fn error_envelope(command: &str, error: &CopilotError) -> Value {
    let fix = get_error_info(error.code()).map(|(_, fix)| fix);
    json!({
        "command": command,
        "status": "error",
        "error": {
            "code": error.code(),
            "message": error.to_string(),
            "fix": fix,
            "exit_code": error.exit_code(),
        },
    })
}
