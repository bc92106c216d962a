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

//! # Scribeval Core
//!
//! Data contracts shared across the Scribeval evaluation engine:
//!
//! - [`RecordTable`] — the working table of transcript/note records, with
//!   CSV import/export
//! - [`Criterion`] — a named evaluation rubric (prompt template + scoring
//!   strategy), loadable from TOML
//! - [`EvalOutcome`] / [`TrialSequence`] — per-call and per-record results
//!
//! The engine itself lives in `scribeval-evals`; this crate is pure data and
//! synchronous parsing, with no network or runtime dependencies.

pub mod criterion;
pub mod outcome;
pub mod table;

pub use criterion::{
    criteria_from_toml, CriteriaError, Criterion, RequiredInputs, ScoringStrategy,
};
pub use outcome::{EvalOutcome, TrialSequence};
pub use table::{CellValue, Record, RecordTable, TableError};
