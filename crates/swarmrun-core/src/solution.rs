//! Solution marker contract with the agent program.
//!
//! An agent reports success in one of two ways:
//!
//! - the legacy marker line `Found a correct solution in run <n>.` followed
//!   by the solution block, which ends at a blank line, a `>>>>>>>` section
//!   header, or the end of the text;
//! - a single JSON line `{"swarmrun":"solution","run":<n>,"solution":"..."}`.
//!
//! When both are present the structured record wins.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Marker text emitted by agents that found a correct solution.
pub const SUCCESS_MARKER: &str = "Found a correct solution in run";

/// Prefix of a section header; ends a solution block.
pub const SECTION_DELIMITER: &str = ">>>>>>>";

/// Tag value identifying a structured solution record.
const RECORD_TAG: &str = "solution";

/// A solution extracted from agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    /// Agent-internal run number that produced the solution, if reported.
    pub run: Option<u32>,
    /// Solution text, trimmed.
    pub text: String,
}

/// Machine-readable success line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionRecord {
    /// Must be `"solution"`.
    pub swarmrun: String,
    /// Agent-internal run number.
    #[serde(default)]
    pub run: Option<u32>,
    /// Solution payload.
    pub solution: String,
}

impl SolutionRecord {
    /// Create a record for the given payload.
    pub fn new(run: Option<u32>, solution: impl Into<String>) -> Self {
        Self {
            swarmrun: RECORD_TAG.to_string(),
            run,
            solution: solution.into(),
        }
    }

    /// Parse a single line, returning `None` for anything that is not a record.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str::<SolutionRecord>(line)
            .ok()
            .filter(|record| record.swarmrun == RECORD_TAG)
    }
}

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"Found a correct solution in run (\d+)\.").expect("static regex is valid")
    })
}

/// Returns true if the text signals success in either form.
pub fn contains_marker(text: &str) -> bool {
    text.contains(SUCCESS_MARKER) || text.lines().any(|l| SolutionRecord::parse_line(l).is_some())
}

/// Extract the solution payload from agent output or a log artifact.
pub fn extract_solution(text: &str) -> Option<Solution> {
    find_record(text).or_else(|| find_marker_block(text))
}

fn find_record(text: &str) -> Option<Solution> {
    text.lines()
        .filter_map(SolutionRecord::parse_line)
        .map(|record| Solution {
            run: record.run,
            text: record.solution.trim().to_string(),
        })
        .find(|solution| !solution.text.is_empty())
}

fn find_marker_block(text: &str) -> Option<Solution> {
    for caps in marker_regex().captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let rest = &text[whole.end()..];

        // The block starts on the first line after the marker; blank lines
        // directly after the marker are skipped. Trailing text on the marker
        // line disqualifies this occurrence.
        let leading = rest.len() - rest.trim_start().len();
        let Some(newline) = rest[..leading].rfind('\n') else {
            continue;
        };
        let body = &rest[newline + 1..];
        if body.starts_with(SECTION_DELIMITER) {
            continue;
        }

        let end = [body.find("\n\n"), body.find(&format!("\n{SECTION_DELIMITER}"))]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(body.len());
        let block = body[..end].trim();
        if block.is_empty() {
            continue;
        }

        return Some(Solution {
            run: caps.get(1).and_then(|m| m.as_str().parse().ok()),
            text: block.to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_block_until_blank_line() {
        let log = "thinking...\nFound a correct solution in run 3.\n42\n\nmore chatter\n";
        let solution = extract_solution(log).unwrap();
        assert_eq!(solution.run, Some(3));
        assert_eq!(solution.text, "42");
    }

    #[test]
    fn test_legacy_block_until_section_header() {
        let log = "Found a correct solution in run 1.\n{\"answer\": 7}\nline two\n>>>>>>> STDERR\nwarn\n";
        let solution = extract_solution(log).unwrap();
        assert_eq!(solution.text, "{\"answer\": 7}\nline two");
    }

    #[test]
    fn test_legacy_block_to_end_of_text() {
        let log = "Found a correct solution in run 12.\n\n  final answer  ";
        let solution = extract_solution(log).unwrap();
        assert_eq!(solution.run, Some(12));
        assert_eq!(solution.text, "final answer");
    }

    #[test]
    fn test_marker_without_block() {
        let log = "Found a correct solution in run 2.\n\n";
        assert!(contains_marker(log));
        assert!(extract_solution(log).is_none());
    }

    #[test]
    fn test_marker_with_trailing_text_is_skipped() {
        let log = "Found a correct solution in run 2. (pending review)\nnot a block\n";
        assert!(extract_solution(log).is_none());
    }

    #[test]
    fn test_structured_record_wins() {
        let record = serde_json::to_string(&SolutionRecord::new(Some(5), "x = 1")).unwrap();
        let log = format!("Found a correct solution in run 1.\nlegacy\n\n{record}\n");
        assert!(contains_marker(&log));
        let solution = extract_solution(&log).unwrap();
        assert_eq!(solution.run, Some(5));
        assert_eq!(solution.text, "x = 1");
    }

    #[test]
    fn test_other_json_lines_ignored() {
        let log = "{\"swarmrun\":\"progress\",\"solution\":\"no\"}\n{\"foo\": 1}\n";
        assert!(!contains_marker(log));
        assert!(extract_solution(log).is_none());
    }

    #[test]
    fn test_no_marker() {
        assert!(!contains_marker("all done, nothing found"));
        assert!(extract_solution("all done").is_none());
    }
}
