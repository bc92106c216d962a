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

//! Score extraction from free-text model responses.

use once_cell::sync::Lazy;
use regex::Regex;
use scribeval_core::ScoringStrategy;

static DIGIT_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));

/// Derive a numeric score from a raw response under the given strategy.
///
/// `List` counts the non-blank lines of the trimmed response (0 for an empty
/// response, never `None`). `Score` takes the LAST integer anywhere in the
/// response — score prompts instruct the model to justify first and state the
/// number once at the end, so the final digit run wins over any numbers in
/// the justification. No digit run, or a run too large to parse, yields
/// `None`; extraction never errors.
pub fn extract_score(strategy: ScoringStrategy, response: &str) -> Option<f64> {
    match strategy {
        ScoringStrategy::List => {
            let count = response
                .trim()
                .lines()
                .filter(|line| !line.trim().is_empty())
                .count();
            Some(count as f64)
        }
        ScoringStrategy::Score => DIGIT_RUN_RE
            .find_iter(response)
            .last()
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .map(|n| n as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_counts_non_blank_lines() {
        assert_eq!(extract_score(ScoringStrategy::List, "a\nb\n\nc"), Some(3.0));
    }

    #[test]
    fn test_list_empty_response_is_zero() {
        assert_eq!(extract_score(ScoringStrategy::List, ""), Some(0.0));
        assert_eq!(extract_score(ScoringStrategy::List, "   \n  \n"), Some(0.0));
    }

    #[test]
    fn test_score_takes_last_integer() {
        let response = "Reasoning... final rating: 7 out of 10, overall 85";
        assert_eq!(extract_score(ScoringStrategy::Score, response), Some(85.0));
    }

    #[test]
    fn test_score_no_digits_is_null() {
        assert_eq!(extract_score(ScoringStrategy::Score, "no numbers here"), None);
    }

    #[test]
    fn test_score_unparsable_run_is_null() {
        // A digit run longer than i64 can hold fails parsing, not the batch.
        let response = "id 99999999999999999999999999999999";
        assert_eq!(extract_score(ScoringStrategy::Score, response), None);
    }

    #[test]
    fn test_score_digits_embedded_in_words() {
        assert_eq!(extract_score(ScoringStrategy::Score, "rated4stars"), Some(4.0));
    }
}
