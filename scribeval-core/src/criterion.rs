// Copyright 2025 Scribeval Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Evaluation criteria: a named rubric with a prompt template, a scoring
//! strategy, and the record fields its user message is built from.
//!
//! Criteria are immutable once constructed and can be loaded from TOML:
//!
//! ```toml
//! [[criteria]]
//! title = "duplication"
//! prompt_template = "List every repeated line in the note."
//! strategy = "list"
//! required_inputs = "notes"
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a numeric score is derived from the model's free-text response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringStrategy {
    /// Count the non-blank lines of the response.
    List,
    /// Parse the last integer the model states (justify-then-score prompts).
    Score,
}

/// Which record fields the per-row user message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredInputs {
    Notes,
    Transcript,
    Both,
}

/// A named evaluation rubric. `title` must be unique within a run; the
/// orchestrator derives output column names from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub title: String,
    pub prompt_template: String,
    pub strategy: ScoringStrategy,
    pub required_inputs: RequiredInputs,
}

impl Criterion {
    pub fn new(
        title: impl Into<String>,
        prompt_template: impl Into<String>,
        strategy: ScoringStrategy,
        required_inputs: RequiredInputs,
    ) -> Self {
        Self {
            title: title.into(),
            prompt_template: prompt_template.into(),
            strategy,
            required_inputs,
        }
    }

    /// The system prompt sent per call: the template plus the strategy's
    /// output-format instructions, so list responses stay countable and score
    /// responses state the number exactly once (the extractor takes the last
    /// integer).
    pub fn decorated_prompt(&self) -> String {
        match self.strategy {
            ScoringStrategy::List => format!(
                "{}\nYou must not preamble your response whatsoever, simply output the list \
                 straight away, with each new point on its own newline, no space separation",
                self.prompt_template
            ),
            ScoringStrategy::Score => format!(
                "{}\nRatings must be done on a scale of [0-100]\nYou must first justify your \
                 score, explaining the reasoning behind how you arrived at the number, and then \
                 output the number. The number should only be mentioned once.",
                self.prompt_template
            ),
        }
    }
}

/// Errors from criteria configuration.
#[derive(Debug, Error)]
pub enum CriteriaError {
    #[error("failed to parse criteria file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("criteria file defines no criteria")]
    Empty,

    #[error("duplicate criterion title: {0}")]
    DuplicateTitle(String),

    #[error("criterion '{0}' has an empty prompt template")]
    EmptyTemplate(String),
}

#[derive(Debug, Deserialize)]
struct CriteriaFile {
    criteria: Vec<Criterion>,
}

/// Load and validate a criteria list from TOML text.
pub fn criteria_from_toml(data: &str) -> Result<Vec<Criterion>, CriteriaError> {
    let file: CriteriaFile = toml::from_str(data)?;
    if file.criteria.is_empty() {
        return Err(CriteriaError::Empty);
    }
    let mut seen = Vec::new();
    for criterion in &file.criteria {
        if seen.contains(&&criterion.title) {
            return Err(CriteriaError::DuplicateTitle(criterion.title.clone()));
        }
        if criterion.prompt_template.trim().is_empty() {
            return Err(CriteriaError::EmptyTemplate(criterion.title.clone()));
        }
        seen.push(&criterion.title);
    }
    Ok(file.criteria)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decorated_prompt_list() {
        let criterion = Criterion::new(
            "duplication",
            "Find repeated lines.",
            ScoringStrategy::List,
            RequiredInputs::Notes,
        );
        let prompt = criterion.decorated_prompt();
        assert!(prompt.starts_with("Find repeated lines."));
        assert!(prompt.contains("must not preamble"));
    }

    #[test]
    fn test_decorated_prompt_score() {
        let criterion = Criterion::new(
            "level_of_detail",
            "Rate the level of detail.",
            ScoringStrategy::Score,
            RequiredInputs::Both,
        );
        let prompt = criterion.decorated_prompt();
        assert!(prompt.contains("scale of [0-100]"));
        assert!(prompt.contains("mentioned once"));
    }

    #[test]
    fn test_criteria_from_toml() {
        let toml = r#"
            [[criteria]]
            title = "duplication"
            prompt_template = "List every repeated line."
            strategy = "list"
            required_inputs = "notes"

            [[criteria]]
            title = "level_of_detail"
            prompt_template = "Rate the level of detail."
            strategy = "score"
            required_inputs = "both"
        "#;
        let criteria = criteria_from_toml(toml).unwrap();
        assert_eq!(criteria.len(), 2);
        assert_eq!(criteria[0].strategy, ScoringStrategy::List);
        assert_eq!(criteria[1].required_inputs, RequiredInputs::Both);
    }

    #[test]
    fn test_criteria_duplicate_title_rejected() {
        let toml = r#"
            [[criteria]]
            title = "dup"
            prompt_template = "a"
            strategy = "list"
            required_inputs = "notes"

            [[criteria]]
            title = "dup"
            prompt_template = "b"
            strategy = "list"
            required_inputs = "notes"
        "#;
        assert!(matches!(
            criteria_from_toml(toml),
            Err(CriteriaError::DuplicateTitle(t)) if t == "dup"
        ));
    }

    #[test]
    fn test_criteria_empty_template_rejected() {
        let toml = r#"
            [[criteria]]
            title = "blank"
            prompt_template = "   "
            strategy = "score"
            required_inputs = "notes"
        "#;
        assert!(matches!(
            criteria_from_toml(toml),
            Err(CriteriaError::EmptyTemplate(t)) if t == "blank"
        ));
    }
}
