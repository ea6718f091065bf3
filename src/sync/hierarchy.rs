//! Flat parent-pointer list → ordered, depth-annotated sequence.
//!
//! Roots are tasks without a parent or whose parent is not in the list
//! (orphan-as-root). Siblings are ordered by `sort_order`, ties keep input
//! order. The output is depth-first pre-order: a parent is immediately
//! followed by all of its descendants before its next sibling.
//!
//! Parent references are expected to be acyclic. If they are not, tasks only
//! reachable through a cycle are promoted to roots so the traversal always
//! terminates and every task is emitted exactly once.

use std::collections::{HashMap, HashSet};

use crate::model::Task;

/// A task at its position in the hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct HierarchyEntry<'a> {
    pub task: &'a Task,
    pub depth: usize,
}

/// Build the depth-annotated pre-order of `tasks`.
#[must_use]
pub fn build_hierarchy(tasks: &[Task]) -> Vec<HierarchyEntry<'_>> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

    let mut roots: Vec<&Task> = Vec::new();
    let mut children: HashMap<&str, Vec<&Task>> = HashMap::new();

    for task in tasks {
        match task.parent_id.as_deref() {
            Some(parent) if parent != task.id && ids.contains(parent) => {
                children.entry(parent).or_default().push(task);
            }
            _ => roots.push(task),
        }
    }

    roots.sort_by_key(|t| t.sort_order);
    for siblings in children.values_mut() {
        siblings.sort_by_key(|t| t.sort_order);
    }

    let mut out = Vec::with_capacity(tasks.len());
    let mut visited: HashSet<&str> = HashSet::with_capacity(tasks.len());

    for root in roots {
        walk(root, &children, &mut visited, &mut out);
    }

    if out.len() < tasks.len() {
        for task in tasks {
            if !visited.contains(task.id.as_str()) {
                tracing::warn!(task = %task.id, "Parent cycle detected, exporting task as root");
                walk(task, &children, &mut visited, &mut out);
            }
        }
    }

    out
}

fn walk<'a>(
    start: &'a Task,
    children: &HashMap<&str, Vec<&'a Task>>,
    visited: &mut HashSet<&'a str>,
    out: &mut Vec<HierarchyEntry<'a>>,
) {
    let mut stack = vec![(start, 0usize)];

    while let Some((task, depth)) = stack.pop() {
        if !visited.insert(task.id.as_str()) {
            continue;
        }
        out.push(HierarchyEntry { task, depth });

        if let Some(kids) = children.get(task.id.as_str()) {
            for kid in kids.iter().rev() {
                stack.push((kid, depth + 1));
            }
        }
    }
}
