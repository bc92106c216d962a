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

//! Top-level evaluation passes over a record table.
//!
//! The orchestrator owns the model client, the config, and one
//! [`BatchDispatcher`] shared across everything it runs. It validates
//! configuration up front, snapshots the table rows, runs the pass, and
//! merges result columns back in. Criteria run sequentially; rows within a
//! criterion run concurrently under the dispatcher's bound.

use crate::dispatcher::{BatchDispatcher, BatchProgress, TaskError};
use crate::llm_client::{ChatClient, ChatError, ChatMessage};
use crate::runner::{CriterionRunner, InputColumns};
use crate::template::{bind_pair, interpolate, referenced_fields};
use crate::EvalConfig;
use scribeval_core::{CellValue, Criterion, RecordTable, RequiredInputs, TableError, TrialSequence};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Configuration errors, all detected before the first model call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("table has no rows")]
    EmptyTable,

    #[error("no criteria to run")]
    NoCriteria,

    #[error("duplicate criterion title: {0}")]
    DuplicateCriterion(String),

    #[error("table is missing required column: {0}")]
    MissingColumn(String),

    #[error("system prompt is empty")]
    EmptySystemPrompt,

    #[error("output column name is empty")]
    EmptyColumnName,

    #[error("table error: {0}")]
    Table(#[from] TableError),
}

/// What a completed pass reports back, beyond the mutated table.
#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    /// Model calls that failed, timed out, or panicked. Their slots hold
    /// null scores and error markers rather than aborting the pass.
    pub failures: usize,

    /// Template fields that were referenced but absent from the table.
    pub warnings: Vec<String>,
}

/// A per-row generation pass: interpolate a template, write responses to a
/// fresh column.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_template: String,
    pub output_column: String,
}

/// A side-by-side comparison pass over two existing columns, bound to the
/// template's `{{columnA}}` / `{{columnB}}` slots.
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub system_prompt: String,
    pub user_template: String,
    pub column_a: String,
    pub column_b: String,
    pub output_column: String,
}

pub struct Orchestrator {
    client: Arc<dyn ChatClient>,
    config: EvalConfig,
    dispatcher: BatchDispatcher,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ChatClient>, config: EvalConfig) -> Self {
        let dispatcher = BatchDispatcher::new(&config);
        Self {
            client,
            config,
            dispatcher,
        }
    }

    /// Stop the pass currently in flight. Rows already completed keep their
    /// results; unfinished rows resolve to error-marker cells. The next pass
    /// starts clean.
    pub fn cancel(&self) {
        self.dispatcher.cancel();
    }

    /// Observe per-batch completion counts.
    pub fn watch_progress(&self) -> watch::Receiver<BatchProgress> {
        self.dispatcher.watch_progress()
    }

    /// Run every criterion over every row of `table`, merging score and
    /// response columns back in. Column names derive from the criterion
    /// title and the trial count:
    ///
    /// * one trial: `"<title> Score"` (number or null) and
    ///   `"<title> Response"` (text)
    /// * several trials: `"<title> Scores"` and `"<title> Responses"`
    ///   (per-trial sequences)
    ///
    /// Re-running a criterion overwrites its columns in place.
    pub async fn evaluate(
        &self,
        table: &mut RecordTable,
        criteria: &[Criterion],
        inputs: &InputColumns,
    ) -> Result<EvalReport, EngineError> {
        if table.is_empty() {
            return Err(EngineError::EmptyTable);
        }
        if criteria.is_empty() {
            return Err(EngineError::NoCriteria);
        }
        let mut seen: Vec<&str> = Vec::new();
        for criterion in criteria {
            if seen.contains(&criterion.title.as_str()) {
                return Err(EngineError::DuplicateCriterion(criterion.title.clone()));
            }
            seen.push(&criterion.title);
        }

        // Input columns are only required when some criterion reads them.
        let needs_notes = criteria.iter().any(|c| {
            matches!(c.required_inputs, RequiredInputs::Notes | RequiredInputs::Both)
        });
        let needs_transcript = criteria.iter().any(|c| {
            matches!(
                c.required_inputs,
                RequiredInputs::Transcript | RequiredInputs::Both
            )
        });
        if needs_notes && !table.has_column(&inputs.notes) {
            return Err(EngineError::MissingColumn(inputs.notes.clone()));
        }
        if needs_transcript && !table.has_column(&inputs.transcript) {
            return Err(EngineError::MissingColumn(inputs.transcript.clone()));
        }

        self.dispatcher.begin_run();
        let records = table.records();
        let runner = CriterionRunner::new(
            Arc::clone(&self.client),
            &self.dispatcher,
            self.config.trial_count,
        );

        let mut failures = 0;
        for criterion in criteria {
            info!(
                criterion = %criterion.title,
                rows = records.len(),
                trials = self.config.trial_count,
                model = self.client.model_name(),
                "running criterion"
            );
            let output = runner.run(&records, criterion, inputs).await;
            failures += output.failures;
            self.merge_criterion(table, criterion, &output.sequences)?;
        }

        Ok(EvalReport {
            failures,
            warnings: Vec::new(),
        })
    }

    fn merge_criterion(
        &self,
        table: &mut RecordTable,
        criterion: &Criterion,
        sequences: &[TrialSequence],
    ) -> Result<(), EngineError> {
        if self.config.trial_count <= 1 {
            let scores = sequences
                .iter()
                .map(|s| match s.outcomes.first().and_then(|o| o.score) {
                    Some(n) => CellValue::Number(n),
                    None => CellValue::Null,
                })
                .collect();
            let responses = sequences
                .iter()
                .map(|s| {
                    CellValue::Text(
                        s.outcomes
                            .first()
                            .map(|o| o.response.clone())
                            .unwrap_or_default(),
                    )
                })
                .collect();
            table.set_column(&format!("{} Score", criterion.title), scores)?;
            table.set_column(&format!("{} Response", criterion.title), responses)?;
        } else {
            let scores = sequences
                .iter()
                .map(|s| CellValue::NumberSeq(s.scores()))
                .collect();
            let responses = sequences
                .iter()
                .map(|s| CellValue::TextSeq(s.responses()))
                .collect();
            table.set_column(&format!("{} Scores", criterion.title), scores)?;
            table.set_column(&format!("{} Responses", criterion.title), responses)?;
        }
        Ok(())
    }

    /// Interpolate `user_template` against each row and write the model
    /// responses to `output_column`. Fields the table lacks stay literal in
    /// the prompt; each such field is warned once for the whole pass.
    pub async fn generate(
        &self,
        table: &mut RecordTable,
        request: &GenerationRequest,
    ) -> Result<EvalReport, EngineError> {
        if table.is_empty() {
            return Err(EngineError::EmptyTable);
        }
        if request.system_prompt.trim().is_empty() {
            return Err(EngineError::EmptySystemPrompt);
        }
        if request.output_column.trim().is_empty() {
            return Err(EngineError::EmptyColumnName);
        }

        let mut warnings = Vec::new();
        for field in referenced_fields(&request.user_template) {
            if !table.has_column(&field) {
                warn!(field = %field, "template references a column the table does not have");
                warnings.push(field);
            }
        }

        self.dispatcher.begin_run();
        let records = table.records();
        info!(
            rows = records.len(),
            output = %request.output_column,
            model = self.client.model_name(),
            "running generation pass"
        );

        let tasks: Vec<_> = records
            .iter()
            .map(|record| {
                let rendered = interpolate(&request.user_template, record);
                let messages = vec![
                    ChatMessage::system(request.system_prompt.clone()),
                    ChatMessage::user(rendered.text),
                ];
                let client = Arc::clone(&self.client);
                async move { client.complete(&messages).await }
            })
            .collect();

        let results = self.dispatcher.dispatch(tasks).await;
        let mut failures = 0;
        let cells = results
            .into_iter()
            .map(|result| CellValue::Text(flatten_text(result, &mut failures)))
            .collect();
        table.set_column(&request.output_column, cells)?;

        Ok(EvalReport { failures, warnings })
    }

    /// Present two columns side by side to the model for each row and write
    /// the verdicts to `output_column`.
    pub async fn compare(
        &self,
        table: &mut RecordTable,
        request: &ComparisonRequest,
    ) -> Result<EvalReport, EngineError> {
        if table.is_empty() {
            return Err(EngineError::EmptyTable);
        }
        if request.system_prompt.trim().is_empty() {
            return Err(EngineError::EmptySystemPrompt);
        }
        if request.output_column.trim().is_empty() {
            return Err(EngineError::EmptyColumnName);
        }
        if !table.has_column(&request.column_a) {
            return Err(EngineError::MissingColumn(request.column_a.clone()));
        }
        if !table.has_column(&request.column_b) {
            return Err(EngineError::MissingColumn(request.column_b.clone()));
        }

        self.dispatcher.begin_run();
        let records = table.records();
        info!(
            rows = records.len(),
            a = %request.column_a,
            b = %request.column_b,
            model = self.client.model_name(),
            "running comparison pass"
        );

        let tasks: Vec<_> = records
            .iter()
            .map(|record| {
                let a = record.get(&request.column_a).unwrap_or_default();
                let b = record.get(&request.column_b).unwrap_or_default();
                let user = bind_pair(&request.user_template, a, b);
                let messages = vec![
                    ChatMessage::system(request.system_prompt.clone()),
                    ChatMessage::user(user),
                ];
                let client = Arc::clone(&self.client);
                async move { client.complete(&messages).await }
            })
            .collect();

        let results = self.dispatcher.dispatch(tasks).await;
        let mut failures = 0;
        let cells = results
            .into_iter()
            .map(|result| CellValue::Text(flatten_text(result, &mut failures)))
            .collect();
        table.set_column(&request.output_column, cells)?;

        Ok(EvalReport {
            failures,
            warnings: Vec::new(),
        })
    }
}

fn flatten_text(
    result: Result<Result<String, ChatError>, TaskError>,
    failures: &mut usize,
) -> String {
    match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            *failures += 1;
            format!("<error: {e}>")
        }
        Err(e) => {
            *failures += 1;
            format!("<error: {e}>")
        }
    }
}
