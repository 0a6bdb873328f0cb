#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Ask {
        connection: String,
        question: String,
        thread: Option<String>,
        profile: Option<String>,
        fast: Option<bool>,
        ephemeral: Option<bool>,
    },
    Resume {
        thread: String,
        answers: Vec<(String, String)>,
    },
    Show {
        thread: Option<String>,
        recent: Option<i64>,
    },
    CheckSql {
        sql: String,
    },
    Doctor,
    InitDb {
        url: Option<String>,
        schema: Option<String>,
        dry: Option<bool>,
    },
    Help,
}

impl CliCommand {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ask { .. } => "ask",
            Self::Resume { .. } => "resume",
            Self::Show { .. } => "show",
            Self::CheckSql { .. } => "check-sql",
            Self::Doctor => "doctor",
            Self::InitDb { .. } => "init-db",
            Self::Help => "help",
        }
    }
}
