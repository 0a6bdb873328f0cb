#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::action::{CliAction, GlobalOptions, OutputFormat};
use super::args::ensure_no_unknown_flags;
use super::commands::CliCommand;
use std::path::PathBuf;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CliError {
    #[error("Missing required argument: {}", arg)]
    MissingRequiredArg { arg: String },
    #[error("Unknown command: {}", cmd)]
    UnknownCommand { cmd: String },
    #[error("Unknown flag: {}", flag)]
    UnknownFlag { flag: String },
    #[error("Invalid type for {}", arg)]
    InvalidArgType { arg: String },
    #[error("Invalid argument value for {}: {}", arg, error)]
    InvalidArgValue { arg: String, error: String },
}

/// Removes `--json` and `--config <path>` wherever they appear.
///
/// # Errors
/// Returns `MissingRequiredArg` when `--config` has no value.
pub fn split_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>), CliError> {
    let mut options = GlobalOptions::default();
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => options.output = OutputFormat::Json,
            "--config" => {
                let path = iter
                    .next()
                    .filter(|value| !value.starts_with("--"))
                    .ok_or_else(|| CliError::MissingRequiredArg {
                        arg: "config".to_string(),
                    })?;
                options.config = Some(PathBuf::from(path));
            }
            _ => rest.push(arg.clone()),
        }
    }
    Ok((options, rest))
}

/// Parses the command line without the program name and global options.
///
/// # Errors
/// Returns a `CliError` for unknown commands or flags and for missing or
/// malformed arguments.
pub fn parse_cli_args(args: &[String]) -> Result<CliAction, CliError> {
    if args
        .get(1)
        .is_some_and(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        return Ok(CliAction::ShowHelp);
    }

    match args.first().map(String::as_str) {
        None | Some("-h" | "--help") => Ok(CliAction::ShowHelp),
        Some("-v" | "--version" | "version") => Ok(CliAction::ShowVersion),
        Some("?" | "help") => Ok(CliAction::Command(CliCommand::Help)),
        Some("ask") => {
            ensure_no_unknown_flags(
                args,
                &[
                    "--connection",
                    "--question",
                    "--thread",
                    "--profile",
                    "--fast",
                    "--ephemeral",
                ],
            )?;
            Ok(CliAction::Command(CliCommand::Ask {
                connection: parse_required_arg(args, "connection")?,
                question: parse_required_arg(args, "question")?,
                thread: parse_optional_arg(args, "thread")?,
                profile: parse_optional_arg(args, "profile")?,
                fast: parse_optional_arg(args, "fast")?,
                ephemeral: parse_optional_arg(args, "ephemeral")?,
            }))
        }
        Some("resume") => {
            ensure_no_unknown_flags(args, &["--thread", "--answer"])?;
            let thread = parse_required_arg(args, "thread")?;
            let answers = parse_answers(args)?;
            Ok(CliAction::Command(CliCommand::Resume { thread, answers }))
        }
        Some("show") => {
            ensure_no_unknown_flags(args, &["--thread", "--recent"])?;
            Ok(CliAction::Command(CliCommand::Show {
                thread: parse_optional_arg(args, "thread")?,
                recent: parse_optional_arg(args, "recent")?,
            }))
        }
        Some("check-sql") => {
            ensure_no_unknown_flags(args, &["--sql"])?;
            Ok(CliAction::Command(CliCommand::CheckSql {
                sql: parse_required_arg(args, "sql")?,
            }))
        }
        Some("doctor") => {
            ensure_no_unknown_flags(args, &[])?;
            Ok(CliAction::Command(CliCommand::Doctor))
        }
        Some("init-db") => {
            ensure_no_unknown_flags(args, &["--url", "--schema", "--dry"])?;
            Ok(CliAction::Command(CliCommand::InitDb {
                url: parse_optional_arg(args, "url")?,
                schema: parse_optional_arg(args, "schema")?,
                dry: parse_optional_arg(args, "dry")?,
            }))
        }
        Some(cmd) => Err(CliError::UnknownCommand {
            cmd: cmd.to_string(),
        }),
    }
}

/// Every `--answer id=value` pair, in order.
fn parse_answers(args: &[String]) -> Result<Vec<(String, String)>, CliError> {
    let answers: Vec<(String, String)> = args
        .iter()
        .enumerate()
        .filter(|(_, arg)| arg.as_str() == "--answer")
        .map(|(i, _)| {
            let raw = args
                .get(i + 1)
                .filter(|value| !value.starts_with("--"))
                .ok_or_else(|| CliError::MissingRequiredArg {
                    arg: "answer".to_string(),
                })?;
            raw.split_once('=')
                .map(|(id, value)| (id.trim().to_string(), value.trim().to_string()))
                .filter(|(id, value)| !id.is_empty() && !value.is_empty())
                .ok_or_else(|| CliError::InvalidArgValue {
                    arg: "answer".to_string(),
                    error: format!("expected <question_id>=<answer>, got {raw}"),
                })
        })
        .collect::<Result<_, _>>()?;

    if answers.is_empty() {
        return Err(CliError::MissingRequiredArg {
            arg: "answer".to_string(),
        });
    }
    Ok(answers)
}

fn parse_required_arg<T>(args: &[String], name: &str) -> Result<T, CliError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let flag = format!("--{}", name.replace('_', "-"));
    let Some(position) = args.iter().position(|a| a.as_str() == flag) else {
        return Err(CliError::MissingRequiredArg {
            arg: name.to_string(),
        });
    };

    let Some(raw_value) = args.get(position + 1) else {
        return Err(CliError::MissingRequiredArg {
            arg: name.to_string(),
        });
    };

    if raw_value.starts_with("--") {
        return Err(CliError::MissingRequiredArg {
            arg: name.to_string(),
        });
    }

    raw_value
        .parse::<T>()
        .map_err(|_| CliError::InvalidArgType {
            arg: name.to_string(),
        })
}

fn parse_optional_arg<T>(args: &[String], name: &str) -> Result<Option<T>, CliError>
where
    T: std::str::FromStr + 'static,
    T::Err: std::fmt::Display,
{
    let flag = format!("--{}", name.replace('_', "-"));
    let position = args.iter().position(|a| a.as_str() == flag);

    match position {
        None => Ok(None),
        Some(i) => {
            let maybe_value = args.get(i + 1);
            let treat_as_boolean_flag = std::any::TypeId::of::<T>()
                == std::any::TypeId::of::<bool>()
                && maybe_value.is_none_or(|v| v.starts_with("--"));

            if treat_as_boolean_flag {
                return "true"
                    .parse::<T>()
                    .map(Some)
                    .map_err(|e| CliError::InvalidArgValue {
                        arg: name.to_string(),
                        error: format!("{e}"),
                    });
            }

            maybe_value
                .map(|v| {
                    if v.starts_with("--") {
                        return Err(CliError::MissingRequiredArg {
                            arg: name.to_string(),
                        });
                    }
                    v.parse::<T>().map_err(|e| CliError::InvalidArgValue {
                        arg: name.to_string(),
                        error: format!("{e}"),
                    })
                })
                .transpose()
        }
    }
}
