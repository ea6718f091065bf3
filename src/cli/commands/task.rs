//! Task command implementations.

use crate::cli::{TaskAddArgs, TaskCommands, TaskUpdateArgs};
use crate::config::default_actor;
use crate::error::{Error, Result};
use crate::model::{Category, NewTask, Task, TaskChanges, TaskStatus};
use crate::storage::{Event, SqliteStorage};
use crate::sync::build_hierarchy;
use crate::validate::{normalize_status, require_title};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use super::open_storage;

#[derive(Serialize)]
struct TaskListOutput {
    categories: Vec<CategoryTasks>,
    count: usize,
}

#[derive(Serialize)]
struct CategoryTasks {
    category: String,
    tasks: Vec<TaskRow>,
}

#[derive(Serialize)]
struct TaskRow {
    #[serde(flatten)]
    task: Task,
    depth: usize,
}

#[derive(Serialize)]
struct TaskHistoryOutput {
    id: String,
    events: Vec<Event>,
}

/// Execute task commands.
pub fn execute(
    command: &TaskCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let actor = actor.map_or_else(default_actor, ToString::to_string);

    match command {
        TaskCommands::Add(args) => add(args, db_path, &actor, json),
        TaskCommands::List { category } => list(category.as_deref(), db_path, json),
        TaskCommands::Done { id } => {
            set_status(id, TaskStatus::Completed, db_path, &actor, json)
        }
        TaskCommands::Reopen { id } => set_status(id, TaskStatus::Open, db_path, &actor, json),
        TaskCommands::Delete { id } => delete(id, db_path, &actor, json),
        TaskCommands::Update(args) => update(args, db_path, &actor, json),
        TaskCommands::History { id, limit } => history(id, *limit, db_path, json),
    }
}

fn find_category(storage: &SqliteStorage, name: &str) -> Result<Category> {
    storage
        .find_category_by_name(name)?
        .ok_or_else(|| Error::CategoryNotFound {
            name: name.to_string(),
        })
}

fn print_task(task: &Task, json: bool, verb: &str) -> Result<()> {
    if crate::is_silent() {
        println!("{}", task.id);
    } else if json {
        println!("{}", serde_json::to_string(task)?);
    } else {
        let marker = if task.is_completed() { "[x]" } else { "[ ]" };
        println!("{verb}: {marker} {} [{}]", task.title, task.id);
    }
    Ok(())
}

fn add(args: &TaskAddArgs, db_path: Option<&PathBuf>, actor: &str, json: bool) -> Result<()> {
    let title = require_title(&args.title)?;
    let mut storage = open_storage(db_path)?;
    let category = find_category(&storage, &args.category)?;

    let input = NewTask {
        description: args.description.clone(),
        ..NewTask::in_category(title, category.id)
    }
    .with_parent(args.parent.clone());
    let task = storage.create_task(&input, actor)?;

    print_task(&task, json, "Created task")
}

fn list(category: Option<&str>, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;

    let categories = match category {
        Some(name) => vec![find_category(&storage, name)?],
        None => storage.list_categories(false)?,
    };

    let mut groups = Vec::with_capacity(categories.len());
    for category in categories {
        let tasks = storage.list_tasks(&category.id)?;
        groups.push((category, tasks));
    }

    if json {
        let categories: Vec<CategoryTasks> = groups
            .iter()
            .map(|(category, tasks)| CategoryTasks {
                category: category.name.clone(),
                tasks: build_hierarchy(tasks)
                    .into_iter()
                    .map(|entry| TaskRow {
                        task: entry.task.clone(),
                        depth: entry.depth,
                    })
                    .collect(),
            })
            .collect();
        let output = TaskListOutput {
            count: categories.iter().map(|c| c.tasks.len()).sum(),
            categories,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("{}", "No categories.".dimmed());
        return Ok(());
    }

    for (i, (category, tasks)) in groups.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", format!("# {}", category.name).bold());
        for entry in build_hierarchy(tasks) {
            let indent = "  ".repeat(entry.depth);
            let line = if entry.task.is_completed() {
                format!("- [x] {}", entry.task.title).dimmed().to_string()
            } else {
                format!("- [ ] {}", entry.task.title)
            };
            println!("{indent}{line}  {}", entry.task.id.dimmed());
        }
    }
    Ok(())
}

fn set_status(
    id: &str,
    status: TaskStatus,
    db_path: Option<&PathBuf>,
    actor: &str,
    json: bool,
) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    let task = storage.update_task(id, &TaskChanges::status(status), actor)?;

    let verb = if status.is_completed() { "Completed" } else { "Reopened" };
    print_task(&task, json, verb)
}

fn delete(id: &str, db_path: Option<&PathBuf>, actor: &str, json: bool) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    storage.delete_task(id, actor)?;

    if crate::is_silent() {
        println!("{id}");
    } else if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted task: {id}");
    }
    Ok(())
}

fn update(args: &TaskUpdateArgs, db_path: Option<&PathBuf>, actor: &str, json: bool) -> Result<()> {
    let parent_id = if args.root {
        Some(None)
    } else {
        args.parent.clone().map(Some)
    };

    let changes = TaskChanges {
        title: args
            .title
            .as_deref()
            .map(require_title)
            .transpose()?
            .map(ToString::to_string),
        description: args.description.clone(),
        status: args.status.as_deref().map(normalize_status).transpose()?,
        parent_id,
        sort_order: None,
    };
    if changes.is_empty() {
        return Err(Error::InvalidArgument(
            "Nothing to update: pass --title, --description, --status, --parent or --root"
                .to_string(),
        ));
    }

    let mut storage = open_storage(db_path)?;
    let task = storage.update_task(&args.id, &changes, actor)?;
    print_task(&task, json, "Updated task")
}

fn history(id: &str, limit: u32, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    if storage.get_task(id)?.is_none() {
        return Err(Error::TaskNotFound { id: id.to_string() });
    }
    let events = storage.task_history(id, Some(limit))?;

    if json {
        let output = TaskHistoryOutput {
            id: id.to_string(),
            events,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("{}", "No history.".dimmed());
        return Ok(());
    }

    for event in &events {
        let when = chrono::DateTime::from_timestamp_millis(event.created_at)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let change = match (&event.old_value, &event.new_value) {
            (Some(old), Some(new)) => format!(" {old} → {new}"),
            (None, Some(new)) => format!(" {new}"),
            _ => String::new(),
        };
        println!(
            "{}  {:<15}{}  {}",
            when.dimmed(),
            event.event_type.as_str(),
            change,
            format!("by {}", event.actor).dimmed()
        );
    }
    Ok(())
}
