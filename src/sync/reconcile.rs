//! Document ↔ record reconciliation.
//!
//! Documents carry no record IDs, so lines are matched to existing tasks by
//! weak identity in four ordered phases. Every line and every task is
//! consumed at most once.
//!
//! 1. **Positional**: walk lines and the existing hierarchy order in
//!    lock-step; same index + same title is a match.
//! 2. **Title**: each unmatched line takes the first unmatched task (in
//!    hierarchy order) with an identical title.
//! 3. **Create**: lines still unmatched become creates.
//! 4. **Delete**: tasks still unmatched become deletes.
//!
//! Matching is greedy: the first acceptable match wins, duplicate titles are
//! tie-broken by position. For every matched pair the status is compared with
//! the checkbox and the parent implied by indentation with the task's
//! effective parent.

use serde::Serialize;

use crate::model::{Task, TaskChanges, TaskStatus};
use crate::sync::codec::ParsedLine;
use crate::sync::hierarchy::build_hierarchy;

/// A line with no matching task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskCreate {
    pub title: String,
    pub completed: bool,
    /// Depth 0 is a root; deeper lines get their parent from the caller
    pub depth: usize,
    /// Index into the reconciled lines
    pub line_index: usize,
}

/// Field changes for a matched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskUpdate {
    pub id: String,
    pub changes: TaskChanges,
}

/// Create/update/delete instructions for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Changeset {
    pub to_create: Vec<TaskCreate>,
    pub to_update: Vec<TaskUpdate>,
    pub to_delete: Vec<String>,
    /// Matched task ID per line, `None` for lines in `to_create`
    #[serde(skip)]
    pub line_ids: Vec<Option<String>>,
}

impl Changeset {
    /// Returns true if applying this changeset would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Reconcile freshly parsed lines against one category's tasks.
#[must_use]
pub fn reconcile(lines: &[ParsedLine], existing: &[Task]) -> Changeset {
    let order = build_hierarchy(existing);

    let mut line_match: Vec<Option<usize>> = vec![None; lines.len()];
    let mut taken = vec![false; order.len()];

    // Phase 1: positional
    for (i, (line, entry)) in lines.iter().zip(order.iter()).enumerate() {
        if line.title == entry.task.title {
            line_match[i] = Some(i);
            taken[i] = true;
        }
    }

    // Phase 2: title
    for (i, line) in lines.iter().enumerate() {
        if line_match[i].is_some() {
            continue;
        }
        let found = order
            .iter()
            .enumerate()
            .find(|(j, entry)| !taken[*j] && entry.task.title == line.title)
            .map(|(j, _)| j);
        if let Some(j) = found {
            line_match[i] = Some(j);
            taken[j] = true;
        }
    }

    let line_ids: Vec<Option<String>> = line_match
        .iter()
        .map(|m| m.map(|j| order[j].task.id.clone()))
        .collect();

    let mut changeset = Changeset::default();

    for (i, line) in lines.iter().enumerate() {
        match line_match[i] {
            Some(j) => {
                let task = order[j].task;
                let changes = field_changes(task, existing, lines, &line_ids, i);
                if !changes.is_empty() {
                    changeset.to_update.push(TaskUpdate {
                        id: task.id.clone(),
                        changes,
                    });
                }
            }
            // Phase 3: create
            None => changeset.to_create.push(TaskCreate {
                title: line.title.clone(),
                completed: line.completed,
                depth: line.depth,
                line_index: i,
            }),
        }
    }

    // Phase 4: delete
    changeset.to_delete = order
        .iter()
        .zip(taken.iter())
        .filter(|(_, taken)| !**taken)
        .map(|(entry, _)| entry.task.id.clone())
        .collect();

    changeset.line_ids = line_ids;
    changeset
}

fn field_changes(
    task: &Task,
    existing: &[Task],
    lines: &[ParsedLine],
    line_ids: &[Option<String>],
    index: usize,
) -> TaskChanges {
    let mut changes = TaskChanges::default();

    let status = TaskStatus::from_checked(lines[index].completed);
    if status != task.status {
        changes.status = Some(status);
    }

    if let Some(parent) = implied_parent(lines, line_ids, index) {
        if parent.as_deref() != effective_parent(task, existing) {
            changes.parent_id = Some(parent);
        }
    }

    changes
}

/// Parent implied by indentation, resolved through already-matched lines.
///
/// `Some(None)` means root. `None` means the parent line is not matched to a
/// task, so the parent cannot be determined and is left alone.
pub(crate) fn implied_parent(
    lines: &[ParsedLine],
    line_ids: &[Option<String>],
    index: usize,
) -> Option<Option<String>> {
    let depth = lines[index].depth;
    if depth == 0 {
        return Some(None);
    }

    for j in (0..index).rev() {
        let candidate = lines[j].depth;
        if candidate == depth - 1 {
            return line_ids[j].clone().map(Some);
        }
        if candidate < depth - 1 {
            break;
        }
    }
    None
}

/// Parent as the hierarchy sees it: dangling references count as root.
fn effective_parent<'a>(task: &'a Task, existing: &[Task]) -> Option<&'a str> {
    task.parent_id
        .as_deref()
        .filter(|p| *p != task.id && existing.iter().any(|t| t.id == *p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::codec::{decode, encode};
    use crate::sync::hierarchy::tests::task;

    fn line(title: &str, completed: bool, depth: usize) -> ParsedLine {
        ParsedLine {
            title: title.to_string(),
            completed,
            depth,
            line_number: 0,
        }
    }

    #[test]
    fn test_idempotent_on_own_encoding() {
        let mut tasks = vec![
            task("a", "Plan trip", None, 0),
            task("a1", "Flights", Some("a"), 0),
            task("a2", "Hotel", Some("a"), 1),
            task("a2x", "Compare prices", Some("a2"), 0),
            task("b", "Taxes", None, 1),
            task("c", "Renew passport", Some("elsewhere"), 2),
        ];
        tasks[1].status = TaskStatus::Completed;

        let doc = decode(&encode("Personal", &tasks));
        let changeset = reconcile(&doc.lines, &tasks);

        assert!(changeset.is_empty(), "unexpected changes: {changeset:?}");
        assert_eq!(changeset.line_ids.len(), tasks.len());
        assert!(changeset.line_ids.iter().all(Option::is_some));
    }

    #[test]
    fn test_status_change_detection() {
        let existing = vec![task("x", "X", None, 0)];
        let changeset = reconcile(&[line("X", true, 0)], &existing);

        assert_eq!(
            changeset.to_update,
            vec![TaskUpdate {
                id: "x".to_string(),
                changes: TaskChanges::status(TaskStatus::Completed),
            }]
        );
        assert!(changeset.to_create.is_empty());
        assert!(changeset.to_delete.is_empty());
    }

    #[test]
    fn test_reopen_detection() {
        let mut done = task("x", "X", None, 0);
        done.status = TaskStatus::Completed;
        let changeset = reconcile(&[line("X", false, 0)], &[done]);
        assert_eq!(
            changeset.to_update[0].changes,
            TaskChanges::status(TaskStatus::Open)
        );
    }

    #[test]
    fn test_create_delete_symmetry() {
        let existing = vec![task("old", "Old", None, 0)];
        let changeset = reconcile(&[line("New", false, 0)], &existing);

        assert_eq!(
            changeset.to_create,
            vec![TaskCreate {
                title: "New".to_string(),
                completed: false,
                depth: 0,
                line_index: 0,
            }]
        );
        assert_eq!(changeset.to_delete, vec!["old".to_string()]);
        assert!(changeset.to_update.is_empty());
    }

    #[test]
    fn test_reparenting() {
        let existing = vec![
            task("p", "Parent", None, 0),
            task("c", "Child", None, 1),
        ];
        let lines = vec![line("Parent", false, 0), line("Child", false, 1)];

        let changeset = reconcile(&lines, &existing);

        assert_eq!(
            changeset.to_update,
            vec![TaskUpdate {
                id: "c".to_string(),
                changes: TaskChanges::parent(Some("p".to_string())),
            }]
        );
        assert!(changeset.to_create.is_empty());
        assert!(changeset.to_delete.is_empty());
    }

    #[test]
    fn test_outdent_to_root() {
        let existing = vec![task("p", "Parent", None, 0), task("c", "Child", Some("p"), 0)];
        let lines = vec![line("Parent", false, 0), line("Child", false, 0)];

        let changeset = reconcile(&lines, &existing);
        assert_eq!(changeset.to_update.len(), 1);
        assert_eq!(changeset.to_update[0].changes, TaskChanges::parent(None));
    }

    #[test]
    fn test_reorder_matches_by_title() {
        let existing = vec![task("a", "A", None, 0), task("b", "B", None, 1), task("c", "C", None, 2)];
        let lines = vec![line("C", false, 0), line("A", false, 0), line("B", false, 0)];

        let changeset = reconcile(&lines, &existing);
        assert!(changeset.is_empty());
        assert_eq!(
            changeset.line_ids,
            vec![Some("c".to_string()), Some("a".to_string()), Some("b".to_string())]
        );
    }

    #[test]
    fn test_move_subtree_under_other_parent() {
        let existing = vec![
            task("a", "A", None, 0),
            task("a1", "A1", Some("a"), 0),
            task("b", "B", None, 1),
        ];
        let lines = vec![line("A", false, 0), line("B", false, 0), line("A1", false, 1)];

        let changeset = reconcile(&lines, &existing);
        assert_eq!(
            changeset.to_update,
            vec![TaskUpdate {
                id: "a1".to_string(),
                changes: TaskChanges::parent(Some("b".to_string())),
            }]
        );
    }

    #[test]
    fn test_duplicate_titles_tie_break_by_position() {
        let existing = vec![task("first", "Dup", None, 0), task("second", "Dup", None, 1)];
        let lines = vec![line("Other", false, 0), line("Dup", true, 0)];

        let changeset = reconcile(&lines, &existing);

        // positional: index 1 matches "second"; "first" is left over
        assert_eq!(changeset.to_update[0].id, "second");
        assert_eq!(changeset.to_delete, vec!["first".to_string()]);
        assert_eq!(changeset.to_create[0].title, "Other");
    }

    #[test]
    fn test_title_phase_takes_first_in_hierarchy_order() {
        let existing = vec![task("one", "Dup", None, 0), task("two", "Dup", None, 1)];
        let lines = vec![line("New", false, 0), line("Else", false, 0), line("Dup", false, 0)];

        let changeset = reconcile(&lines, &existing);
        assert_eq!(changeset.line_ids[2].as_deref(), Some("one"));
        assert_eq!(changeset.to_delete, vec!["two".to_string()]);
    }

    #[test]
    fn test_parent_left_alone_under_unmatched_line() {
        let existing = vec![task("c", "Child", None, 0)];
        let lines = vec![line("Brand new", false, 0), line("Child", false, 1)];

        let changeset = reconcile(&lines, &existing);

        assert!(changeset.to_update.is_empty());
        assert_eq!(changeset.to_create.len(), 1);
        assert_eq!(changeset.to_create[0].title, "Brand new");
        assert!(changeset.to_delete.is_empty());
    }

    #[test]
    fn test_nested_creates_keep_depth() {
        let lines = vec![line("Root", false, 0), line("Leaf", true, 1)];
        let changeset = reconcile(&lines, &[]);

        assert_eq!(changeset.to_create.len(), 2);
        assert_eq!(changeset.to_create[1].depth, 1);
        assert_eq!(changeset.to_create[1].line_index, 1);
        assert!(changeset.to_create[1].completed);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(reconcile(&[], &[]).is_empty());

        let all_delete = reconcile(&[], &[task("a", "A", None, 0), task("b", "B", Some("a"), 0)]);
        assert_eq!(all_delete.to_delete, vec!["a".to_string(), "b".to_string()]);
        assert!(all_delete.to_create.is_empty());
    }

    #[test]
    fn test_cyclic_parent_is_broken_by_document() {
        let existing = vec![task("a", "A", Some("b"), 0), task("b", "B", Some("a"), 1)];
        // A is promoted to root, so its encoding puts it at depth 0
        let doc = decode(&encode("Cat", &existing));
        let changeset = reconcile(&doc.lines, &existing);

        assert_eq!(
            changeset.to_update,
            vec![TaskUpdate {
                id: "a".to_string(),
                changes: TaskChanges::parent(None),
            }]
        );
    }
}
