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

//! Prompt-template interpolation.
//!
//! Placeholders have the exact form `{{name}}` where `name` is one or more
//! letters, underscores, or whitespace. Digits and punctuation are NOT part
//! of the token class, so column names containing them are unmatchable; this
//! mirrors the behavior the rest of the system was built against and is kept
//! deliberately (see DESIGN.md).
//!
//! Unresolved fields never fail a render: the token is left literal and a
//! warning is collected for the caller.

use once_cell::sync::Lazy;
use regex::Regex;
use scribeval_core::Record;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[A-Za-z_\s]+\}\}").expect("token pattern is valid"));

/// Output of one interpolation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    /// Field names referenced by the template but absent from the record,
    /// in first-appearance order.
    pub warnings: Vec<String>,
}

impl Rendered {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// The field names a template references, deduplicated, in appearance order.
pub fn referenced_fields(template: &str) -> Vec<String> {
    let mut fields = Vec::new();
    for token in TOKEN_RE.find_iter(template) {
        let inner = inner_name(token.as_str());
        if !fields.iter().any(|f| f == inner) {
            fields.push(inner.to_string());
        }
    }
    fields
}

/// Resolve `{{field}}` tokens in `template` against `record`.
///
/// Known fields are replaced (every occurrence) with the record value; each
/// unknown field produces one warning and its tokens stay literal. Pure:
/// identical inputs always yield identical output and warnings.
pub fn interpolate(template: &str, record: &Record) -> Rendered {
    let mut text = template.to_string();
    let mut warnings = Vec::new();
    for field in referenced_fields(template) {
        match record.get(&field) {
            Some(value) => {
                let token = format!("{{{{{field}}}}}");
                text = text.replace(&token, value);
            }
            None => warnings.push(field),
        }
    }
    Rendered { text, warnings }
}

/// Positional binding for side-by-side comparison templates: `{{columnA}}`
/// and `{{columnB}}` are bound explicitly by the caller rather than looked up
/// in the record.
pub fn bind_pair(template: &str, a: &str, b: &str) -> String {
    template.replace("{{columnA}}", a).replace("{{columnB}}", b)
}

fn inner_name(token: &str) -> &str {
    &token[2..token.len() - 2]
}
