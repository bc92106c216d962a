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

//! Built-in criteria for reviewing generated clinical notes.
//!
//! Instead of authoring criteria from scratch, callers can start from this
//! suite and extend or replace entries:
//!
//! ```rust,ignore
//! let mut criteria = presets::note_review_criteria();
//! criteria.push(Criterion::new(
//!     "readability",
//!     "Rate how readable the note is",
//!     ScoringStrategy::Score,
//!     RequiredInputs::Notes,
//! ));
//! orchestrator.evaluate(&mut table, &criteria, &inputs).await?;
//! ```

use scribeval_core::{Criterion, RequiredInputs, ScoringStrategy};

/// The standard note-review suite: hallucinations, missed information, and
/// duplication counted as lists, plus one model-rated detail score.
pub fn note_review_criteria() -> Vec<Criterion> {
    vec![
        Criterion::new(
            "num_hallucinations",
            "You are an expert medical documentation specialist obsessed with details. \
             Your task is to compare the medical note with the transcript and identify \
             all hallucinations. A hallucination is anything stated in the note that is \
             not entirely objectively clear in the transcript.\n\
             - You must output each line from the note that you are confident contains \
             a hallucination, exactly as it is\n\
             - You must minimize false positives by triple checking the transcript\n\
             - Your output should be every hallucinated line of the note, verbatim, \
             with nothing else",
            ScoringStrategy::List,
            RequiredInputs::Both,
        ),
        Criterion::new(
            "missed_information",
            "You are an expert medical documentation specialist obsessed with details. \
             You will be given the transcript for the consult and the generated note. \
             You must evaluate the amount of missed information in the note.\n\
             - List any and all clinically relevant information in the transcript that \
             was missed in the note, including specific details left out of sections \
             the clinician would have wanted\n\
             - Find all examination findings and measurements present in the \
             transcript but not included in the note\n\
             - Find all pertinent negatives missed in the note: every time the patient \
             answers in the negative to a specific feeling, symptom, or question by \
             the doctor, and it does not appear in the note, output it verbatim on a \
             new line\n\
             - If something is absent from the note but also not clear in the \
             transcript, do not mention it",
            ScoringStrategy::List,
            RequiredInputs::Both,
        ),
        Criterion::new(
            "duplication",
            "You are an expert medical documentation specialist obsessed with details. \
             You are evaluating a clinical note generated from a consult transcript. \
             Similar information should appear only once, under one heading, and never \
             be repeated. Find every instance where the same information is repeated \
             multiple times in the note.\n\
             - Your output should be every line of the note that is a duplication, \
             verbatim, with nothing else",
            ScoringStrategy::List,
            RequiredInputs::Notes,
        ),
        Criterion::new(
            "level_of_detail",
            "Rate the level of detail in the note compared to the transcript, where \
             100 means nothing relevant was omitted, subtracting for every omission \
             or thin section.",
            ScoringStrategy::Score,
            RequiredInputs::Both,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_titles_are_unique() {
        let criteria = note_review_criteria();
        let mut titles: Vec<&str> = criteria.iter().map(|c| c.title.as_str()).collect();
        titles.sort_unstable();
        titles.dedup();
        assert_eq!(titles.len(), criteria.len());
    }

    #[test]
    fn test_suite_shape() {
        let criteria = note_review_criteria();
        assert_eq!(criteria.len(), 4);

        let duplication = criteria
            .iter()
            .find(|c| c.title == "duplication")
            .unwrap();
        assert_eq!(duplication.strategy, ScoringStrategy::List);
        assert_eq!(duplication.required_inputs, RequiredInputs::Notes);

        let detail = criteria
            .iter()
            .find(|c| c.title == "level_of_detail")
            .unwrap();
        assert_eq!(detail.strategy, ScoringStrategy::Score);
        assert_eq!(detail.required_inputs, RequiredInputs::Both);
    }

    #[test]
    fn test_decorated_prompts_carry_format_rules() {
        for criterion in note_review_criteria() {
            let decorated = criterion.decorated_prompt();
            assert!(decorated.starts_with(&criterion.prompt_template));
            match criterion.strategy {
                ScoringStrategy::List => assert!(decorated.contains("own newline")),
                ScoringStrategy::Score => assert!(decorated.contains("[0-100]")),
            }
        }
    }
}
