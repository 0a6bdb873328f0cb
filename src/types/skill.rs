use serde::{Deserialize, Serialize};

/// Domain knowledge pack loaded from the skills file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub table_patterns: Vec<String>,
    #[serde(default)]
    pub join_rules: Vec<String>,
    #[serde(default)]
    pub business_rules: Vec<String>,
}

impl Skill {
    /// Glob-lite match: `*` at either end is a wildcard, otherwise exact.
    #[must_use]
    pub fn matches_table(&self, table: &str) -> bool {
        let table = table.to_ascii_lowercase();
        self.table_patterns.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
                (Some(rest), _) if rest.ends_with('*') => {
                    table.contains(rest.trim_end_matches('*'))
                }
                (Some(suffix), _) => table.ends_with(suffix),
                (None, Some(prefix)) => table.starts_with(prefix),
                (None, None) => table == pattern,
            }
        })
    }

    #[must_use]
    pub fn keyword_hits(&self, question: &str) -> usize {
        let question = question.to_lowercase();
        self.keywords
            .iter()
            .filter(|keyword| question.contains(&keyword.to_lowercase()))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifiedTerm {
    pub question_id: String,
    pub answer: String,
}

/// Skill knowledge plus any clarified terms, fed to SQL generation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SkillContext {
    pub skill_name: Option<String>,
    #[serde(default)]
    pub join_rules: Vec<String>,
    #[serde(default)]
    pub business_rules: Vec<String>,
    #[serde(default)]
    pub clarifications: Vec<ClarifiedTerm>,
}

impl SkillContext {
    #[must_use]
    pub fn from_skill(skill: &Skill) -> Self {
        Self {
            skill_name: Some(skill.name.clone()),
            join_rules: skill.join_rules.clone(),
            business_rules: skill.business_rules.clone(),
            clarifications: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skill_name.is_none()
            && self.join_rules.is_empty()
            && self.business_rules.is_empty()
            && self.clarifications.is_empty()
    }
}
