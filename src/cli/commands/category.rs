//! Category command implementations.

use crate::cli::CategoryCommands;
use crate::config::default_actor;
use crate::error::{Error, Result};
use crate::model::Category;
use crate::sync::assign_file_names;
use crate::validate::normalize_color;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use super::open_storage;

#[derive(Serialize)]
struct CategoryListOutput {
    categories: Vec<CategoryRow>,
    count: usize,
}

#[derive(Serialize)]
struct CategoryRow {
    #[serde(flatten)]
    category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    tasks: usize,
}

/// Execute category commands.
pub fn execute(
    command: &CategoryCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    match command {
        CategoryCommands::Add { name, color } => add(name, color.as_deref(), db_path, actor, json),
        CategoryCommands::List { all } => list(*all, db_path, json),
        CategoryCommands::Archive { name } => archive(name, db_path, actor, json),
    }
}

fn add(
    name: &str,
    color: Option<&str>,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let color = color.map(normalize_color).transpose()?;
    let mut storage = open_storage(db_path)?;
    let actor = actor.map_or_else(default_actor, ToString::to_string);

    let category = storage.create_category(name, color.as_deref(), &actor)?;

    if crate::is_silent() {
        println!("{}", category.id);
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string(&category)?);
    } else {
        println!("Created category: {} [{}]", category.name, category.id);
        let names: Vec<String> = storage
            .list_categories(false)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let file_names = assign_file_names(names.iter().map(String::as_str), &[]);
        if let Some(file_name) = file_names.last() {
            println!("  Document: {file_name}");
        }
    }
    Ok(())
}

fn list(include_archived: bool, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;

    let categories = storage.list_categories(include_archived)?;
    let active = categories.iter().filter(|c| !c.archived).map(|c| c.name.as_str());
    let mut file_names = assign_file_names(active, &[]).into_iter();

    let rows = categories
        .into_iter()
        .map(|category| {
            // Archived categories are not mirrored
            let file_name = if category.archived {
                None
            } else {
                file_names.next()
            };
            Ok(CategoryRow {
                file_name,
                tasks: storage.list_tasks(&category.id)?.len(),
                category,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if json {
        let output = CategoryListOutput {
            count: rows.len(),
            categories: rows,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("{}", "No categories. Create one with 'td category add <name>'.".dimmed());
        return Ok(());
    }

    for row in &rows {
        let name = if row.category.archived {
            format!("{} (archived)", row.category.name).dimmed().to_string()
        } else {
            row.category.name.bold().to_string()
        };
        println!(
            "{name}  {} tasks  {}  {}",
            row.tasks,
            row.file_name.as_deref().unwrap_or("-").dimmed(),
            row.category.id.dimmed()
        );
    }
    Ok(())
}

fn archive(name: &str, db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    let actor = actor.map_or_else(default_actor, ToString::to_string);

    let category = storage
        .find_category_by_name(name)?
        .ok_or_else(|| Error::CategoryNotFound {
            name: name.to_string(),
        })?;
    storage.archive_category(&category.id, &actor)?;

    if crate::is_silent() {
        println!("{}", category.id);
    } else if json {
        let output = serde_json::json!({ "archived": category.id, "name": category.name });
        println!("{output}");
    } else {
        println!("Archived category: {}", category.name);
    }
    Ok(())
}
