#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use copilot::db::ConnectionSpec;
use copilot::llm::LlmSettings;
use copilot::{ConnectionId, CopilotError, Dialect, Result, Skill};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = ".copilot/config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub database_url: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_embedding_model: Option<String>,
    pub llm_api_key_env: Option<String>,
    pub llm_max_concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub skills_path: Option<PathBuf>,
    pub retrieval_snapshot: Option<PathBuf>,
    pub connections: HashMap<ConnectionId, ConnectionSpec>,
}

impl Config {
    /// LLM settings with the API key read from the configured env var
    /// (`OPENAI_API_KEY` by default).
    #[must_use]
    pub fn llm_settings(&self) -> LlmSettings {
        let defaults = LlmSettings::default();
        let key_env = self.llm_api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
        LlmSettings {
            base_url: self.llm_base_url.clone().unwrap_or(defaults.base_url),
            model: self.llm_model.clone().unwrap_or(defaults.model),
            embedding_model: self.llm_embedding_model.clone(),
            api_key: non_empty_env_var(key_env),
            max_concurrency: self.llm_max_concurrency.unwrap_or(defaults.max_concurrency),
        }
    }
}

/// # Errors
/// Returns `ConfigError` when an existing config file cannot be read or
/// holds an invalid value.
pub async fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let config_path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|e| CopilotError::ConfigError(format!("Failed to read config: {e}")))?;
    parse_config_content(&content)
}

/// Parses `key = "value"` lines; `${VAR:-default}` is expanded in values.
///
/// # Errors
/// Returns `ConfigError` for numbers or dialects that do not parse.
pub fn parse_config_content(content: &str) -> Result<Config> {
    let mut config = Config::default();
    let mut dialects: Vec<(String, Dialect)> = Vec::new();
    let mut schemas: Vec<(String, String)> = Vec::new();

    for line in content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('['))
    {
        let Some((key, raw)) = split_key_value(line) else {
            continue;
        };
        let value = expand_env_vars(raw);
        match key {
            "database_url" => config.database_url = Some(value),
            "llm_base_url" => config.llm_base_url = Some(value),
            "llm_model" => config.llm_model = Some(value),
            "llm_embedding_model" => config.llm_embedding_model = Some(value),
            "llm_api_key_env" => config.llm_api_key_env = Some(value),
            "llm_max_concurrency" => config.llm_max_concurrency = Some(parse_number(key, &value)?),
            "max_retries" => config.max_retries = Some(parse_number(key, &value)?),
            "skills_path" => config.skills_path = Some(PathBuf::from(value)),
            "retrieval_snapshot" => config.retrieval_snapshot = Some(PathBuf::from(value)),
            _ => {
                if let Some(rest) = key.strip_prefix("connection.") {
                    match rest.split_once('.') {
                        None => {
                            config
                                .connections
                                .insert(ConnectionId::new(rest), ConnectionSpec::postgres(value));
                        }
                        Some((id, "dialect")) => {
                            let dialect = Dialect::try_from(value.as_str())
                                .map_err(CopilotError::ConfigError)?;
                            dialects.push((id.to_string(), dialect));
                        }
                        Some((id, "schema")) => schemas.push((id.to_string(), value)),
                        Some(_) => {}
                    }
                }
            }
        }
    }

    for (id, dialect) in dialects {
        if let Some(spec) = config.connections.get_mut(&ConnectionId::new(id)) {
            spec.dialect = dialect;
        }
    }
    for (id, schema) in schemas {
        if let Some(spec) = config.connections.get_mut(&ConnectionId::new(id)) {
            spec.schema = schema;
        }
    }
    Ok(config)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| CopilotError::ConfigError(format!("{key} must be a number, got {value}")))
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    line.split_once('=')
        .map(|(lhs, rhs)| (lhs.trim(), rhs.trim().trim_matches('"')))
        .filter(|(lhs, _)| !lhs.is_empty())
}

fn expand_env_vars(input: &str) -> String {
    expand_env_vars_with(input, |name| std::env::var(name).ok())
}

fn expand_env_vars_with<F>(input: &str, env_lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = input.to_string();
    let mut cursor = 0;
    while let Some(offset) = result[cursor..].find("${") {
        let start = cursor + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_part = &result[start + 2..start + end];
        let (var_name, default) = var_part.split_once(":-").unwrap_or((var_part, ""));
        let value = env_lookup(var_name).unwrap_or_else(|| default.to_string());
        result.replace_range(start..=(start + end), &value);
        cursor = start + value.len();
    }
    result
}

/// Skills file: a JSON array of skill objects.
///
/// # Errors
/// Returns `IoError` or `SerializationError` when the file is unreadable.
pub async fn load_skills(path: &Path) -> Result<Vec<Skill>> {
    let raw = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Checkpoint store URL: `DATABASE_URL`, then the config file, then the
/// computed default from `COPILOT_DB_*`.
#[must_use]
pub fn checkpoint_database_url(config: &Config) -> String {
    database_url_candidates(config)
        .into_iter()
        .next()
        .unwrap_or_else(computed_default_database_url)
}

fn database_url_candidates(config: &Config) -> Vec<String> {
    let mut candidates = Vec::new();

    push_unique(&mut candidates, non_empty_env_var("DATABASE_URL"));
    push_unique(
        &mut candidates,
        config
            .database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string),
    );
    push_unique(&mut candidates, Some(computed_default_database_url()));

    candidates
}

fn push_unique(target: &mut Vec<String>, value: Option<String>) {
    if let Some(candidate) = value {
        if !target.iter().any(|existing| existing == &candidate) {
            target.push(candidate);
        }
    }
}

fn non_empty_env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn computed_default_database_url() -> String {
    let user = std::env::var("COPILOT_DB_USER").unwrap_or_else(|_| "copilot".to_string());
    let pass = std::env::var("COPILOT_DB_PASSWORD").unwrap_or_else(|_| "copilot".to_string());
    let host = std::env::var("COPILOT_DB_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("COPILOT_DB_PORT").unwrap_or_else(|_| "5432".to_string());
    let db = std::env::var("COPILOT_DB_NAME").unwrap_or_else(|_| "copilot".to_string());
    format!("postgres://{user}:{pass}@{host}:{port}/{db}")
}
