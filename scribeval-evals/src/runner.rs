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

//! Per-row evaluation and repeated-trial execution of one criterion.

use crate::dispatcher::BatchDispatcher;
use crate::llm_client::{ChatClient, ChatError, ChatMessage};
use crate::score::extract_score;
use scribeval_core::{Criterion, EvalOutcome, Record, RequiredInputs, ScoringStrategy, TrialSequence};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which table columns hold the notes and transcript fields the criteria
/// user messages are built from. Selected by the caller, validated by the
/// orchestrator against the inputs the criteria actually require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputColumns {
    pub notes: String,
    pub transcript: String,
}

impl InputColumns {
    pub fn new(notes: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            transcript: transcript.into(),
        }
    }
}

/// Build the per-row user message from the criterion's required inputs.
/// Notes come first when both are sent.
pub(crate) fn user_message(criterion: &Criterion, record: &Record, inputs: &InputColumns) -> String {
    let notes = record.get(&inputs.notes).unwrap_or_default();
    let transcript = record.get(&inputs.transcript).unwrap_or_default();
    match criterion.required_inputs {
        RequiredInputs::Notes => format!("NOTES: {notes}"),
        RequiredInputs::Transcript => format!("TRANSCRIPT: {transcript}"),
        RequiredInputs::Both => format!("NOTES: {notes}\nTRANSCRIPT: {transcript}"),
    }
}

/// Evaluate one (record, criterion) pair: call the model, extract the score.
/// Transport failures propagate to the dispatch boundary, where the runner
/// converts them into null-score outcomes.
async fn evaluate_row(
    client: Arc<dyn ChatClient>,
    strategy: ScoringStrategy,
    messages: Vec<ChatMessage>,
) -> Result<EvalOutcome, ChatError> {
    let response = client.complete(&messages).await?;
    let score = extract_score(strategy, &response);
    Ok(EvalOutcome::new(score, response))
}

/// Per-criterion result: one [`TrialSequence`] per record, aligned by row
/// index, plus the count of calls that failed or timed out.
#[derive(Debug, Clone)]
pub struct CriterionOutput {
    pub sequences: Vec<TrialSequence>,
    pub failures: usize,
}

/// Runs a criterion's repeated trials over a record snapshot.
pub struct CriterionRunner<'a> {
    client: Arc<dyn ChatClient>,
    dispatcher: &'a BatchDispatcher,
    trial_count: usize,
}

impl<'a> CriterionRunner<'a> {
    pub fn new(
        client: Arc<dyn ChatClient>,
        dispatcher: &'a BatchDispatcher,
        trial_count: usize,
    ) -> Self {
        Self {
            client,
            dispatcher,
            trial_count: trial_count.max(1),
        }
    }

    /// Dispatch one batch per trial. Trial `k + 1` does not start until
    /// trial `k` has fully completed, and the outcome of trial `k` lands at
    /// index `k` of every record's sequence.
    pub async fn run(
        &self,
        records: &[Record],
        criterion: &Criterion,
        inputs: &InputColumns,
    ) -> CriterionOutput {
        let mut sequences = vec![TrialSequence::default(); records.len()];
        let mut failures = 0;
        let system = criterion.decorated_prompt();

        for trial in 0..self.trial_count {
            let tasks: Vec<_> = records
                .iter()
                .map(|record| {
                    let messages = vec![
                        ChatMessage::system(system.clone()),
                        ChatMessage::user(user_message(criterion, record, inputs)),
                    ];
                    let client = Arc::clone(&self.client);
                    let strategy = criterion.strategy;
                    async move { evaluate_row(client, strategy, messages).await }
                })
                .collect();

            let results = self.dispatcher.dispatch(tasks).await;
            for (row, (sequence, result)) in sequences.iter_mut().zip(results).enumerate() {
                let outcome = match result {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => {
                        warn!(criterion = %criterion.title, trial, row, "model call failed: {}", e);
                        failures += 1;
                        EvalOutcome::failed(format!("<error: {e}>"))
                    }
                    Err(e) => {
                        warn!(criterion = %criterion.title, trial, row, "task failed: {}", e);
                        failures += 1;
                        EvalOutcome::failed(format!("<error: {e}>"))
                    }
                };
                sequence.push(outcome);
            }
            debug!(criterion = %criterion.title, trial, "trial complete");
        }

        CriterionOutput {
            sequences,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FnClient;
    use crate::EvalConfig;
    use scribeval_core::ScoringStrategy;

    fn records() -> Vec<Record> {
        vec![
            Record::from_pairs(vec![
                ("notes".to_string(), "note one".to_string()),
                ("transcript".to_string(), "transcript one".to_string()),
            ]),
            Record::from_pairs(vec![
                ("notes".to_string(), "note two".to_string()),
                ("transcript".to_string(), "transcript two".to_string()),
            ]),
        ]
    }

    fn inputs() -> InputColumns {
        InputColumns::new("notes", "transcript")
    }

    fn dispatcher() -> BatchDispatcher {
        BatchDispatcher::new(&EvalConfig::default())
    }

    #[test]
    fn test_user_message_shapes() {
        let record = &records()[0];
        let c = |ri| Criterion::new("t", "p", ScoringStrategy::List, ri);
        assert_eq!(
            user_message(&c(RequiredInputs::Notes), record, &inputs()),
            "NOTES: note one"
        );
        assert_eq!(
            user_message(&c(RequiredInputs::Transcript), record, &inputs()),
            "TRANSCRIPT: transcript one"
        );
        assert_eq!(
            user_message(&c(RequiredInputs::Both), record, &inputs()),
            "NOTES: note one\nTRANSCRIPT: transcript one"
        );
    }

    #[tokio::test]
    async fn test_trial_count_sequences() {
        let client = Arc::new(FnClient(|_: &[ChatMessage]| Ok("a\nb".to_string())));
        let dispatcher = dispatcher();
        let runner = CriterionRunner::new(client, &dispatcher, 3);
        let criterion = Criterion::new(
            "dup",
            "find duplicates",
            ScoringStrategy::List,
            RequiredInputs::Notes,
        );

        let output = runner.run(&records(), &criterion, &inputs()).await;
        assert_eq!(output.failures, 0);
        assert_eq!(output.sequences.len(), 2);
        for sequence in &output.sequences {
            assert_eq!(sequence.len(), 3);
            assert_eq!(sequence.mean_score(), Some(2.0));
        }
    }

    #[tokio::test]
    async fn test_failed_call_becomes_null_outcome() {
        // The second record's call fails every trial; the batch continues.
        let client = Arc::new(FnClient(|messages: &[ChatMessage]| {
            if messages[1].content.contains("note two") {
                Err(ChatError::Api("backend down".to_string()))
            } else {
                Ok("only line".to_string())
            }
        }));
        let dispatcher = dispatcher();
        let runner = CriterionRunner::new(client, &dispatcher, 2);
        let criterion = Criterion::new(
            "dup",
            "find duplicates",
            ScoringStrategy::List,
            RequiredInputs::Notes,
        );

        let output = runner.run(&records(), &criterion, &inputs()).await;
        assert_eq!(output.failures, 2);
        assert_eq!(output.sequences[0].mean_score(), Some(1.0));
        assert_eq!(output.sequences[1].mean_score(), None);
        assert!(output.sequences[1].outcomes[0]
            .response
            .starts_with("<error:"));
    }

    #[tokio::test]
    async fn test_score_strategy_parses_last_number() {
        let client = Arc::new(FnClient(|_: &[ChatMessage]| {
            Ok("The note scores 7 of 10 overall; final: 85".to_string())
        }));
        let dispatcher = dispatcher();
        let runner = CriterionRunner::new(client, &dispatcher, 1);
        let criterion = Criterion::new(
            "detail",
            "rate the detail",
            ScoringStrategy::Score,
            RequiredInputs::Both,
        );

        let output = runner.run(&records(), &criterion, &inputs()).await;
        assert_eq!(output.sequences[0].outcomes[0].score, Some(85.0));
    }

    #[tokio::test]
    async fn test_system_message_is_decorated_prompt() {
        let criterion = Criterion::new(
            "dup",
            "find duplicates",
            ScoringStrategy::List,
            RequiredInputs::Notes,
        );
        let expected = criterion.decorated_prompt();
        let seen = expected.clone();
        let client = Arc::new(FnClient(move |messages: &[ChatMessage]| {
            assert_eq!(messages[0].content, seen);
            Ok(String::new())
        }));
        let dispatcher = dispatcher();
        let runner = CriterionRunner::new(client, &dispatcher, 1);
        let output = runner.run(&records(), &criterion, &inputs()).await;
        assert_eq!(output.failures, 0);
    }
}
