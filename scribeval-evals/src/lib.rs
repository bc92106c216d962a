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

//! # Scribeval Evaluation Engine
//!
//! Batch-evaluates a table of transcript/note records against named criteria:
//! interpolates prompt templates per row, fans model calls out across a
//! bounded worker set, derives numeric scores from free-text responses, and
//! merges score/response columns back into the table.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scribeval_core::RecordTable;
//! use scribeval_evals::{llm_client::OpenAIClient, presets, EvalConfig, InputColumns, Orchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Arc::new(OpenAIClient::new(
//!         std::env::var("OPENAI_API_KEY").unwrap(),
//!         "gpt-4o".to_string(),
//!     ));
//!     let orchestrator = Orchestrator::new(client, EvalConfig::default());
//!
//!     let mut table = RecordTable::from_csv(&std::fs::read_to_string("notes.csv").unwrap()).unwrap();
//!     let criteria = presets::note_review_criteria();
//!     let inputs = InputColumns::new("notes", "transcript");
//!
//!     let report = orchestrator.evaluate(&mut table, &criteria, &inputs).await.unwrap();
//!     println!("{} failed calls", report.failures);
//!     std::fs::write("results.csv", table.to_csv()).unwrap();
//! }
//! ```
//!
//! Failure policy: unresolved template fields and unparsable scores are
//! recovered per call; transport failures and timeouts become null-score
//! outcomes with an error marker, never a batch abort. Only configuration
//! errors (empty table, missing columns, duplicate titles) fail a run, and
//! those are checked before any model call.

pub mod dispatcher;
pub mod llm_client;
pub mod orchestrator;
pub mod presets;
pub mod runner;
pub mod score;
pub mod template;

pub use dispatcher::{BatchDispatcher, BatchProgress, TaskError};
pub use llm_client::{ChatClient, ChatError, ChatMessage, ChatRole, ProviderConfig};
pub use orchestrator::{
    ComparisonRequest, EngineError, EvalReport, GenerationRequest, Orchestrator,
};
pub use runner::{CriterionRunner, InputColumns};
pub use score::extract_score;
pub use template::{bind_pair, interpolate, referenced_fields, Rendered};

/// Configuration for evaluation execution.
///
/// One `EvalConfig` governs a whole [`Orchestrator`]: the concurrency bound
/// applies across every batch, trial, and criterion it runs.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Maximum concurrent model calls, system-wide.
    pub max_concurrent: usize,

    /// Timeout per model call in seconds; a timed-out call becomes a
    /// null-score outcome, not a stalled batch.
    pub timeout_secs: u64,

    /// Repeated trials per criterion, for variance estimation.
    pub trial_count: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            timeout_secs: 120,
            trial_count: 1,
        }
    }
}

impl EvalConfig {
    pub fn with_trial_count(mut self, trial_count: usize) -> Self {
        self.trial_count = trial_count;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}
