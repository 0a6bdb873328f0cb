//! Prompt assembly and output parsing for SQL generation.

use super::dialect::rules_for;
use super::safety::strip_code_fences;
use super::text::normalize_sql;
use crate::orchestrator_service::ports::{
    CompletionPort, CompletionPurpose, CompletionRequest, PromptMessage,
};
use crate::prompts::SQL_GENERATION_PROMPT;
use crate::types::{FewShotExample, Message, Role, SchemaInfo, SkillContext};
use crate::Result;
use serde_json::{json, Value};
use std::fmt::Write as _;
use tracing::{debug, warn};

pub const DEFAULT_PROFILE: &str = "default";

/// Knobs a worker profile may override.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub profile: String,
    pub preamble: Option<String>,
    pub temperature: f32,
    pub row_limit: usize,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE.to_string(),
            preamble: None,
            temperature: 0.0,
            row_limit: 1000,
        }
    }
}

/// What went wrong last time, fed back on a repair cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepairContext {
    pub previous_sql: Option<String>,
    pub error: String,
    pub hint: Option<String>,
    /// Every statement that already failed this turn.
    pub failed_sql: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationContext<'a> {
    pub question: &'a str,
    pub schema: &'a SchemaInfo,
    pub skill: Option<&'a SkillContext>,
    pub examples: &'a [FewShotExample],
    pub history: Vec<&'a Message>,
    pub repair: Option<RepairContext>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Sql { sql: String, rationale: String },
    NeedsClarification { description: String },
    Failed { message: String },
}

fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sql": {"type": "string"},
            "rationale": {"type": "string"},
            "needs_clarification": {"type": "boolean"},
            "ambiguity": {"type": ["string", "null"]}
        },
        "required": ["sql", "rationale", "needs_clarification", "ambiguity"],
        "additionalProperties": false
    })
}

fn describe_schema(schema: &SchemaInfo) -> String {
    let mut out = String::from("## Schema\n");
    for table in &schema.tables {
        let columns = table
            .columns
            .iter()
            .map(|column| {
                let mut traits = vec![column.semantic_type.as_str()];
                if column.aggregatable {
                    traits.push("aggregatable");
                }
                if column.groupable {
                    traits.push("groupable");
                }
                format!("{} {} [{}]", column.name, column.data_type, traits.join(", "))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "- {}: {columns}", table.name);
    }
    if !schema.relationships.is_empty() {
        out.push_str("## Relationships\n");
        for link in &schema.relationships {
            let _ = writeln!(
                out,
                "- {}.{} = {}.{}",
                link.from_table, link.from_column, link.to_table, link.to_column
            );
        }
    }
    out
}

fn describe_skill(skill: &SkillContext) -> String {
    let mut out = String::new();
    if !skill.join_rules.is_empty() {
        out.push_str("## Join rules\n");
        for rule in &skill.join_rules {
            let _ = writeln!(out, "- {rule}");
        }
    }
    if !skill.business_rules.is_empty() {
        out.push_str("## Business rules\n");
        for rule in &skill.business_rules {
            let _ = writeln!(out, "- {rule}");
        }
    }
    if !skill.clarifications.is_empty() {
        out.push_str("## Clarified by the user\n");
        for term in &skill.clarifications {
            let _ = writeln!(out, "- {}: {}", term.question_id, term.answer);
        }
    }
    out
}

fn describe_repair(repair: &RepairContext) -> String {
    let mut out = String::from("The previous attempt failed.\n");
    if let Some(sql) = &repair.previous_sql {
        let _ = writeln!(out, "Previous SQL:\n{sql}");
    }
    let _ = writeln!(out, "Error: {}", repair.error);
    if let Some(hint) = &repair.hint {
        let _ = writeln!(out, "Hint: {hint}");
    }
    out.push_str("Write a corrected statement. Do not repeat a statement that already failed.");
    out
}

fn parse_reply(text: &str, structured: Option<Value>) -> GenerationOutcome {
    let Some(value) = structured else {
        let sql = strip_code_fences(text);
        return if sql.is_empty() {
            GenerationOutcome::Failed {
                message: "The model returned an empty reply".to_string(),
            }
        } else {
            GenerationOutcome::Sql {
                sql,
                rationale: String::new(),
            }
        };
    };

    let needs_clarification = value
        .get("needs_clarification")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let sql = value
        .get("sql")
        .and_then(Value::as_str)
        .map(strip_code_fences)
        .unwrap_or_default();
    let rationale = value
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if needs_clarification {
        let description = value
            .get("ambiguity")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .unwrap_or("The question can be read more than one way.")
            .to_string();
        return GenerationOutcome::NeedsClarification { description };
    }
    if sql.is_empty() {
        return GenerationOutcome::Failed {
            message: "The model did not return a statement".to_string(),
        };
    }
    GenerationOutcome::Sql { sql, rationale }
}

/// One configured SQL generation worker.
#[derive(Debug, Clone, Default)]
pub struct SqlGenerator {
    settings: GeneratorSettings,
}

impl SqlGenerator {
    #[must_use]
    pub const fn new(settings: GeneratorSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    #[must_use]
    pub fn build_request(&self, context: &GenerationContext<'_>) -> CompletionRequest {
        let rules = rules_for(context.schema.dialect);
        let mut system = String::new();
        if let Some(preamble) = &self.settings.preamble {
            let _ = writeln!(system, "{preamble}\n");
        }
        let _ = writeln!(system, "{SQL_GENERATION_PROMPT}\n");
        let _ = writeln!(system, "## Dialect\n{}", rules.prompt_section());
        let _ = writeln!(
            system,
            "Return at most {} rows unless the question asks for fewer.\n",
            self.settings.row_limit
        );
        system.push_str(&describe_schema(context.schema));
        if let Some(skill) = context.skill {
            system.push_str(&describe_skill(skill));
        }

        let mut messages = vec![PromptMessage::system(system)];
        for example in context.examples {
            messages.push(PromptMessage::user(example.question.clone()));
            messages.push(PromptMessage::assistant(
                json!({"sql": example.sql, "rationale": "Previously answered question", "needs_clarification": false, "ambiguity": null})
                    .to_string(),
            ));
        }
        for message in &context.history {
            match message.role {
                Role::User => messages.push(PromptMessage::user(message.content.clone())),
                Role::Assistant => {
                    let content = message
                        .payload
                        .as_ref()
                        .and_then(|payload| payload.get("sql"))
                        .and_then(Value::as_str)
                        .map_or_else(|| message.content.clone(), ToString::to_string);
                    messages.push(PromptMessage::assistant(content));
                }
                Role::Tool => {}
            }
        }

        let mut question = context.question.to_string();
        if let Some(repair) = &context.repair {
            let _ = write!(question, "\n\n{}", describe_repair(repair));
        }
        messages.push(PromptMessage::user(question));

        CompletionRequest::new(CompletionPurpose::SqlGeneration, messages)
            .with_schema(response_schema())
            .with_temperature(self.settings.temperature)
    }

    /// Asks the model for SQL. A statement that repeats one which already
    /// failed this turn earns one re-prompt; a second repeat is a failure.
    ///
    /// # Errors
    ///
    /// Propagates completion port errors.
    pub async fn generate<C: CompletionPort + Sync + ?Sized>(
        &self,
        port: &C,
        context: &GenerationContext<'_>,
    ) -> Result<GenerationOutcome> {
        let request = self.build_request(context);
        let completion = port.complete(request.clone()).await?;
        let outcome = parse_reply(&completion.text, completion.json());

        let Some(repeated) = repeated_statement(&outcome, context.repair.as_ref()) else {
            return Ok(outcome);
        };
        warn!(profile = %self.settings.profile, "generator repeated a failing statement; re-prompting");

        let mut retry = request;
        retry.messages.push(PromptMessage::assistant(repeated.clone()));
        retry.messages.push(PromptMessage::user(
            "That statement already failed with the error above. Write a different statement.",
        ));
        let completion = port.complete(retry).await?;
        let second = parse_reply(&completion.text, completion.json());
        if repeated_statement(&second, context.repair.as_ref()).is_some() {
            debug!(profile = %self.settings.profile, "generator repeated itself twice");
            return Ok(GenerationOutcome::Failed {
                message: format!("The model kept producing a failing statement: {repeated}"),
            });
        }
        Ok(second)
    }
}

fn repeated_statement(
    outcome: &GenerationOutcome,
    repair: Option<&RepairContext>,
) -> Option<String> {
    let (GenerationOutcome::Sql { sql, .. }, Some(repair)) = (outcome, repair) else {
        return None;
    };
    let normalized = normalize_sql(sql);
    repair
        .failed_sql
        .iter()
        .any(|failed| normalize_sql(failed) == normalized)
        .then(|| sql.clone())
}
