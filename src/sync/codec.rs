//! Checkbox document codec.
//!
//! # Format
//!
//! ```text
//! # Work
//!
//! - [ ] Ship release
//!   - [x] Write changelog
//!   - [ ] Tag build
//! - [ ] Book flights
//! ```
//!
//! One `# ` heading carries the category name. Each task line is
//! `{"  " × depth}- [ ] {title}` or `- [x]` for completed tasks. An empty
//! category is the heading line alone.
//!
//! Decoding never fails: malformed lines become [`ParseDiagnostic`]s and are
//! skipped, the rest of the document is still decoded.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

use crate::model::Task;
use crate::sync::hierarchy::build_hierarchy;

/// Columns of indentation per depth level.
pub const INDENT_UNIT: usize = 2;

const OPEN_MARKER: &str = "- [ ] ";
const DONE_MARKER: &str = "- [x] ";
/// Written by some markdown editors. Decodes as done, encodes back as `[x]`.
const DONE_MARKER_UPPER: &str = "- [X] ";

/// One decoded task line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLine {
    pub title: String,
    pub completed: bool,
    pub depth: usize,
    /// 1-indexed line number in the source text
    pub line_number: usize,
}

/// Why a line was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Indentation is not a multiple of [`INDENT_UNIT`].
    OddIndent { indent: usize },
    /// Line descends more than one level below the previous task line.
    DepthJump { depth: usize, max_depth: usize },
    /// Neither a heading nor a task line.
    InvalidLine,
}

/// A non-fatal decode problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseDiagnostic {
    pub line_number: usize,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
    pub text: String,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DiagnosticKind::OddIndent { indent } => write!(
                f,
                "line {}: indentation of {indent} is not a multiple of {INDENT_UNIT}",
                self.line_number
            ),
            DiagnosticKind::DepthJump { depth, max_depth } => write!(
                f,
                "line {}: depth {depth} exceeds maximum {max_depth} after previous task",
                self.line_number
            ),
            DiagnosticKind::InvalidLine => {
                write!(f, "line {}: not a task line: {:?}", self.line_number, self.text)
            }
        }
    }
}

/// Result of decoding a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Document {
    /// Name from the first `# ` heading, if any
    pub heading: Option<String>,
    pub lines: Vec<ParsedLine>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// Decode document text into task lines.
#[must_use]
pub fn decode(text: &str) -> Document {
    let mut doc = Document::default();
    let mut previous_depth: Option<usize> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_number = idx + 1;

        if raw.trim().is_empty() {
            continue;
        }

        if let Some(name) = raw.strip_prefix("# ") {
            let name = name.trim();
            if doc.heading.is_none() && !name.is_empty() {
                doc.heading = Some(name.to_string());
            }
            continue;
        }

        let diagnostic = |kind| ParseDiagnostic {
            line_number,
            kind,
            text: raw.to_string(),
        };

        let Some((indent, completed, title)) = split_task_line(raw) else {
            doc.diagnostics.push(diagnostic(DiagnosticKind::InvalidLine));
            continue;
        };

        if indent % INDENT_UNIT != 0 {
            doc.diagnostics
                .push(diagnostic(DiagnosticKind::OddIndent { indent }));
            continue;
        }

        let depth = indent / INDENT_UNIT;
        let max_depth = previous_depth.map_or(0, |d| d + 1);
        if depth > max_depth {
            doc.diagnostics
                .push(diagnostic(DiagnosticKind::DepthJump { depth, max_depth }));
            continue;
        }

        doc.lines.push(ParsedLine {
            title: title.to_string(),
            completed,
            depth,
            line_number,
        });
        previous_depth = Some(depth);
    }

    doc
}

/// Split a task line into (indent columns, completed, title).
fn split_task_line(raw: &str) -> Option<(usize, bool, &str)> {
    let body = raw.trim_start_matches(' ');
    let indent = raw.len() - body.len();

    let (completed, title) = if let Some(title) = body.strip_prefix(OPEN_MARKER) {
        (false, title)
    } else if let Some(title) = body
        .strip_prefix(DONE_MARKER)
        .or_else(|| body.strip_prefix(DONE_MARKER_UPPER))
    {
        (true, title)
    } else {
        return None;
    };

    if title.trim().is_empty() {
        return None;
    }

    Some((indent, completed, title))
}

/// Encode a category's tasks as document text.
#[must_use]
pub fn encode(category_name: &str, tasks: &[Task]) -> String {
    let mut out = format!("# {}\n", single_line(category_name));
    if tasks.is_empty() {
        return out;
    }

    out.push('\n');
    for entry in build_hierarchy(tasks) {
        for _ in 0..entry.depth {
            out.push_str("  ");
        }
        out.push_str(if entry.task.is_completed() {
            DONE_MARKER
        } else {
            OPEN_MARKER
        });
        out.push_str(&single_line(&entry.task.title));
        out.push('\n');
    }

    out
}

/// Line breaks would split a title across task lines.
fn single_line(s: &str) -> Cow<'_, str> {
    if s.contains(['\n', '\r']) {
        Cow::Owned(s.replace(['\n', '\r'], " "))
    } else {
        Cow::Borrowed(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use crate::sync::hierarchy::tests::task;

    fn triples(lines: &[ParsedLine]) -> Vec<(String, bool, usize)> {
        lines
            .iter()
            .map(|l| (l.title.clone(), l.completed, l.depth))
            .collect()
    }

    #[test]
    fn test_empty_category_export() {
        assert_eq!(encode("Work", &[]), "# Work\n");
    }

    #[test]
    fn test_encode_exact_format() {
        let mut done = task("c", "Write changelog", Some("a"), 0);
        done.status = TaskStatus::Completed;
        let tasks = vec![
            task("a", "Ship release", None, 0),
            done,
            task("d", "Tag build", Some("a"), 1),
            task("b", "Book flights", None, 1),
        ];

        assert_eq!(
            encode("Work", &tasks),
            "# Work\n\n- [ ] Ship release\n  - [x] Write changelog\n  - [ ] Tag build\n- [ ] Book flights\n"
        );
    }

    #[test]
    fn test_round_trip_matches_hierarchy() {
        let mut tasks = vec![
            task("a", "A", None, 0),
            task("a1", "A1", Some("a"), 0),
            task("a1a", "A1a", Some("a1"), 0),
            task("a1a1", "A1a1", Some("a1a"), 0),
            task("b", "B", None, 1),
            task("b1", "B1", Some("b"), 0),
            task("c", "C", None, 2),
        ];
        tasks[2].status = TaskStatus::Completed;
        tasks[6].status = TaskStatus::Completed;

        let doc = decode(&encode("Cat", &tasks));

        assert!(doc.diagnostics.is_empty());
        assert_eq!(doc.heading.as_deref(), Some("Cat"));
        let expected: Vec<_> = build_hierarchy(&tasks)
            .iter()
            .map(|e| (e.task.title.clone(), e.task.is_completed(), e.depth))
            .collect();
        assert_eq!(triples(&doc.lines), expected);
    }

    #[test]
    fn test_odd_indent_is_diagnosed_and_skipped() {
        let doc = decode("- [ ] A\n - [ ] B\n");

        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(doc.diagnostics[0].kind, DiagnosticKind::OddIndent { indent: 1 });
        assert_eq!(doc.diagnostics[0].line_number, 2);
        assert_eq!(triples(&doc.lines), vec![("A".to_string(), false, 0)]);
    }

    #[test]
    fn test_depth_jump_is_diagnosed_and_skipped() {
        let doc = decode("- [ ] A\n    - [ ] B\n");

        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(
            doc.diagnostics[0].kind,
            DiagnosticKind::DepthJump {
                depth: 2,
                max_depth: 1
            }
        );
        assert_eq!(triples(&doc.lines), vec![("A".to_string(), false, 0)]);
    }

    #[test]
    fn test_first_task_must_be_top_level() {
        let doc = decode("# Home\n  - [ ] Nested first\n- [ ] Top\n");
        assert_eq!(doc.lines.len(), 1);
        assert_eq!(doc.lines[0].title, "Top");
        assert!(matches!(
            doc.diagnostics[0].kind,
            DiagnosticKind::DepthJump { depth: 1, max_depth: 0 }
        ));
    }

    #[test]
    fn test_ascending_any_number_of_levels() {
        let doc = decode("- [ ] A\n  - [ ] B\n    - [ ] C\n- [x] D\n");
        assert!(doc.diagnostics.is_empty());
        assert_eq!(
            triples(&doc.lines),
            vec![
                ("A".to_string(), false, 0),
                ("B".to_string(), false, 1),
                ("C".to_string(), false, 2),
                ("D".to_string(), true, 0),
            ]
        );
    }

    #[test]
    fn test_invalid_lines_and_blank_lines() {
        let doc = decode("# Inbox\n\nsome prose\n- [ ] A\n\n- [] broken\n- [ ] \n  - [ ] B\n");

        assert_eq!(doc.heading.as_deref(), Some("Inbox"));
        assert_eq!(doc.diagnostics.len(), 3);
        assert!(doc
            .diagnostics
            .iter()
            .all(|d| d.kind == DiagnosticKind::InvalidLine));
        // blank lines do not reset depth tracking
        assert_eq!(
            triples(&doc.lines),
            vec![("A".to_string(), false, 0), ("B".to_string(), false, 1)]
        );
        assert_eq!(doc.lines[1].line_number, 8);
    }

    #[test]
    fn test_first_heading_wins() {
        let doc = decode("# First\n# Second\n- [ ] A\n");
        assert_eq!(doc.heading.as_deref(), Some("First"));
        assert!(doc.diagnostics.is_empty());
    }

    #[test]
    fn test_crlf_and_uppercase_marker() {
        let doc = decode("# Win\r\n- [X] Done\r\n  - [ ] Child\r\n");
        assert_eq!(
            triples(&doc.lines),
            vec![("Done".to_string(), true, 0), ("Child".to_string(), false, 1)]
        );
    }

    #[test]
    fn test_skipped_line_does_not_count_as_previous() {
        // B is skipped, so C at depth 2 still jumps from A at depth 0
        let doc = decode("- [ ] A\n    - [ ] B\n    - [ ] C\n  - [ ] D\n");
        assert_eq!(doc.diagnostics.len(), 2);
        assert_eq!(
            triples(&doc.lines),
            vec![("A".to_string(), false, 0), ("D".to_string(), false, 1)]
        );
    }

    #[test]
    fn test_title_keeps_inner_text_verbatim() {
        let doc = decode("- [ ] Call [Bob] re: - [ ] list\n");
        assert_eq!(doc.lines[0].title, "Call [Bob] re: - [ ] list");
    }

    #[test]
    fn test_encode_flattens_line_breaks_in_titles() {
        let tasks = vec![task("a", "two\nlines", None, 0)];
        assert_eq!(encode("Cat", &tasks), "# Cat\n\n- [ ] two lines\n");
    }

    #[test]
    fn test_decode_is_total() {
        for text in ["", "\n\n", "#", "# ", "-", "- [x]", "\t- [ ] tab", "🙂"] {
            let _ = decode(text);
        }
        assert_eq!(decode("").lines.len(), 0);
    }
}
