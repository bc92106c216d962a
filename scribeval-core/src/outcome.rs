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

//! Evaluation result contracts, shared between the engine and any consumer
//! of the augmented table.

use serde::{Deserialize, Serialize};

/// The atomic result of one model call under one criterion for one record.
///
/// `score` is `None` when the response carried no parsable score or the call
/// itself failed; the raw response (or error marker) is always retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub score: Option<f64>,
    pub response: String,
}

impl EvalOutcome {
    pub fn new(score: Option<f64>, response: impl Into<String>) -> Self {
        Self {
            score,
            response: response.into(),
        }
    }

    /// A null-score outcome carrying an error marker in place of a response.
    pub fn failed(marker: impl Into<String>) -> Self {
        Self {
            score: None,
            response: marker.into(),
        }
    }
}

/// Ordered outcomes for one (record, criterion) pair across repeated trials.
/// The outcome at index `k` belongs to trial `k`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialSequence {
    pub outcomes: Vec<EvalOutcome>,
}

impl TrialSequence {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn push(&mut self, outcome: EvalOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn scores(&self) -> Vec<Option<f64>> {
        self.outcomes.iter().map(|o| o.score).collect()
    }

    pub fn responses(&self) -> Vec<String> {
        self.outcomes.iter().map(|o| o.response.clone()).collect()
    }

    /// Mean of the non-null scores; `None` when every trial was null.
    pub fn mean_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self.outcomes.iter().filter_map(|o| o.score).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}
