#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::CliCommand;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Flags accepted before or after any command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GlobalOptions {
    pub output: OutputFormat,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum CliAction {
    ShowHelp,
    ShowVersion,
    Command(CliCommand),
}
