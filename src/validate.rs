//! Input validation for command arguments.
//!
//! Statuses resolve in three tiers: exact match → synonym lookup → error
//! with the closest suggestion.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::model::TaskStatus;

// ── Valid value sets ─────────────────────────────────────────

pub static VALID_STATUSES: LazyLock<HashSet<&str>> =
    LazyLock::new(|| ["open", "completed"].into_iter().collect());

// ── Synonym maps ─────────────────────────────────────────────

pub static STATUS_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("done", "completed"),
        ("complete", "completed"),
        ("closed", "completed"),
        ("finished", "completed"),
        ("checked", "completed"),
        ("x", "completed"),
        ("todo", "open"),
        ("new", "open"),
        ("pending", "open"),
        ("reopen", "open"),
        ("unchecked", "open"),
    ]
    .into_iter()
    .collect()
});

/// Normalize a status string via exact match or synonym lookup.
///
/// # Errors
///
/// Returns `Error::InvalidStatus` with the closest suggestion, if any.
pub fn normalize_status(input: &str) -> Result<TaskStatus> {
    let lower = input.trim().to_lowercase();

    let canonical = if VALID_STATUSES.contains(lower.as_str()) {
        Some(lower.as_str())
    } else {
        STATUS_SYNONYMS.get(lower.as_str()).copied()
    };

    match canonical.map(str::parse::<TaskStatus>) {
        Some(Ok(status)) => Ok(status),
        _ => Err(Error::InvalidStatus {
            value: input.to_string(),
            suggestion: find_closest_match(&lower, &VALID_STATUSES, &STATUS_SYNONYMS),
        }),
    }
}

/// A title must contain something other than whitespace. It is kept as
/// typed so documents round-trip without churn.
///
/// # Errors
///
/// Returns `Error::RequiredField` for a blank title.
pub fn require_title(title: &str) -> Result<&str> {
    if title.trim().is_empty() {
        return Err(Error::RequiredField("title"));
    }
    Ok(title)
}

/// Validate a `#rrggbb` color and lowercase it.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` for anything else.
pub fn normalize_color(input: &str) -> Result<String> {
    let color = input.trim();
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(color.to_ascii_lowercase())
    } else {
        Err(Error::InvalidArgument(format!(
            "Color must look like #rrggbb, got {input:?}"
        )))
    }
}

/// Find the closest matching value across valid set and synonyms.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;

    for &v in valid.iter().chain(synonyms.keys()) {
        let dist = levenshtein_distance(input, v);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            // For synonyms, show what it maps to
            best = Some((synonyms.get(v).copied().unwrap_or(v), dist));
        }
    }

    best.map(|(v, _)| v.to_string())
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Single-row optimization
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
