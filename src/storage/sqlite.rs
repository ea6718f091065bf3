//! SQLite storage implementation.
//!
//! This module provides the record store for tasks and categories. It follows
//! the `MutationContext` pattern for transaction discipline and audit logging,
//! and publishes a [`StoreEvent`] on a broadcast channel after every commit.

use crate::error::{Error, Result};
use crate::model::{Category, NewTask, Task, TaskChanges, TaskStatus};
use crate::storage::events::{get_events, insert_event, Event, EventType, StoreEvent};
use crate::storage::schema::apply_schema;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of the change feed. Slow subscribers see `Lagged` and should
/// treat it as "something changed".
const EVENT_CHANNEL_CAPACITY: usize = 256;

const TASK_COLUMNS: &str = "t.id, t.title, t.description, t.status, t.parent_id, t.sort_order,
    t.due_at, t.recurrence, t.completed_at, t.created_at, t.updated_at,
    (SELECT group_concat(tc.category_id) FROM task_categories tc WHERE tc.task_id = t.id)";

const CATEGORY_COLUMNS: &str = "id, name, color, archived, created_at, updated_at";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    events: broadcast::Sender<StoreEvent>,
    data_version: i64,
}

/// Context for a mutation operation, tracking side effects.
///
/// Passed to mutation closures to record audit events. Entities touched by
/// recorded events are reported to subscribers after commit.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation (`cli`, `folder-sync`, ...).
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }

    fn touched_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .filter(|e| seen.insert(e.entity_id.as_str()))
            .map(|e| e.entity_id.clone())
            .collect()
    }
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        apply_schema(&conn)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let data_version = read_data_version(&conn)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            conn,
            events,
            data_version,
        })
    }

    /// Subscribe to committed changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// This method:
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits (or rolls back on error)
    /// 5. Publishes a [`StoreEvent`] if any event was recorded
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;

        if !ctx.events.is_empty() {
            // No subscribers is not an error
            let _ = self.events.send(StoreEvent::Committed {
                op: ctx.op_name.clone(),
                actor: ctx.actor.clone(),
                entity_ids: ctx.touched_ids(),
            });
        }

        Ok(result)
    }

    /// Detect commits made by other connections since the last check.
    ///
    /// Publishes [`StoreEvent::External`] when the database changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the pragma query fails.
    pub fn check_external_changes(&mut self) -> Result<bool> {
        let version = read_data_version(&self.conn)?;
        if version == self.data_version {
            return Ok(false);
        }

        self.data_version = version;
        tracing::debug!(version, "External database change detected");
        let _ = self.events.send(StoreEvent::External);
        Ok(true)
    }

    // ==================
    // Category Operations
    // ==================

    /// Create a category. Names are unique among active categories, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `CategoryExists` on a duplicate name, `RequiredField` on an empty one.
    pub fn create_category(
        &mut self,
        name: &str,
        color: Option<&str>,
        actor: &str,
    ) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::RequiredField("category name"));
        }
        if self.find_category_by_name(name)?.is_some() {
            return Err(Error::CategoryExists {
                name: name.to_string(),
            });
        }

        let category = Category::new(name.to_string(), color.map(String::from));

        self.mutate("create_category", actor, |tx, ctx| {
            tx.execute(
                "INSERT INTO categories (id, name, color, archived, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                rusqlite::params![
                    category.id,
                    category.name,
                    category.color,
                    category.created_at,
                    category.updated_at
                ],
            )?;

            ctx.record_change(
                "category",
                &category.id,
                EventType::CategoryCreated,
                None,
                Some(category.name.clone()),
            );
            Ok(())
        })?;

        Ok(category)
    }

    /// Find an active category by name, ignoring case and surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let sql = format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories
             WHERE archived = 0 AND name = ?1 COLLATE NOCASE"
        );
        let category = self
            .conn
            .query_row(&sql, [name.trim()], map_category_row)
            .optional()?;
        Ok(category)
    }

    /// List categories in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_categories(&self, include_archived: bool) -> Result<Vec<Category>> {
        let sql = if include_archived {
            format!("SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY created_at ASC, rowid ASC")
        } else {
            format!(
                "SELECT {CATEGORY_COLUMNS} FROM categories WHERE archived = 0
                 ORDER BY created_at ASC, rowid ASC"
            )
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_category_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Archive a category. Archived categories are no longer mirrored.
    ///
    /// # Errors
    ///
    /// Returns `CategoryNotFound` if no active category has this ID.
    pub fn archive_category(&mut self, id: &str, actor: &str) -> Result<()> {
        self.mutate("archive_category", actor, |tx, ctx| {
            let rows = tx.execute(
                "UPDATE categories SET archived = 1 WHERE id = ?1 AND archived = 0",
                [id],
            )?;

            if rows == 0 {
                return Err(Error::CategoryNotFound {
                    name: id.to_string(),
                });
            }

            ctx.record_event("category", id, EventType::CategoryArchived);
            Ok(())
        })
    }

    // ==================
    // Task Operations
    // ==================

    /// Create a task.
    ///
    /// Without an explicit `sort_order` the task is appended after the
    /// existing tasks of its first category.
    ///
    /// # Errors
    ///
    /// Returns `RequiredField` for a blank title, `CategoryNotFound` for an
    /// unknown category and `TaskNotFound` for an unknown parent.
    pub fn create_task(&mut self, input: &NewTask, actor: &str) -> Result<Task> {
        if input.title.trim().is_empty() {
            return Err(Error::RequiredField("title"));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let id = format!("task_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        self.mutate("create_task", actor, |tx, ctx| {
            for category_id in &input.category_ids {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM categories WHERE id = ?1)",
                    [category_id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(Error::CategoryNotFound {
                        name: category_id.clone(),
                    });
                }
            }

            if let Some(parent) = &input.parent_id {
                if !task_exists(tx, parent)? {
                    return Err(Error::TaskNotFound { id: parent.clone() });
                }
            }

            let sort_order = match input.sort_order {
                Some(order) => order,
                None => next_sort_order(tx, input.category_ids.first().map(String::as_str))?,
            };

            tx.execute(
                "INSERT INTO tasks (id, title, description, status, parent_id, sort_order, due_at, recurrence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'open', ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    id,
                    input.title,
                    input.description,
                    input.parent_id,
                    sort_order,
                    input.due_at,
                    input.recurrence,
                    now
                ],
            )?;

            for category_id in &input.category_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO task_categories (task_id, category_id, added_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, category_id, now],
                )?;
            }

            ctx.record_change(
                "task",
                &id,
                EventType::TaskCreated,
                None,
                Some(input.title.clone()),
            );

            load_task(tx, &id)?.ok_or_else(|| Error::TaskNotFound { id: id.clone() })
        })
    }

    /// Get a task by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        load_task(&self.conn, id)
    }

    /// List the tasks of one category, ordered by sort key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_tasks(&self, category_id: &str) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks t
             JOIN task_categories m ON m.task_id = t.id
             WHERE m.category_id = ?1
             ORDER BY t.sort_order ASC, t.created_at ASC, t.rowid ASC"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([category_id], map_task_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Apply partial changes to a task.
    ///
    /// `completed_at` follows the status. A parent assignment is rejected if
    /// the parent does not exist or would make the task its own ancestor.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound`, `CycleDetected` or `RequiredField`.
    pub fn update_task(&mut self, id: &str, changes: &TaskChanges, actor: &str) -> Result<Task> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("update_task", actor, |tx, ctx| {
            let current = load_task(tx, id)?.ok_or_else(|| Error::TaskNotFound { id: id.to_string() })?;
            let mut next = current.clone();

            if let Some(title) = &changes.title {
                if title.trim().is_empty() {
                    return Err(Error::RequiredField("title"));
                }
                if *title != current.title {
                    next.title.clone_from(title);
                    ctx.record_change(
                        "task",
                        id,
                        EventType::TaskUpdated,
                        Some(current.title.clone()),
                        Some(title.clone()),
                    );
                }
            }

            if let Some(description) = &changes.description {
                next.description = (!description.is_empty()).then(|| description.clone());
                if next.description != current.description {
                    ctx.record_event("task", id, EventType::TaskUpdated);
                }
            }

            if let Some(status) = changes.status {
                if status != current.status {
                    next.status = status;
                    next.completed_at = status.is_completed().then_some(now);
                    let event_type = if status.is_completed() {
                        EventType::TaskCompleted
                    } else {
                        EventType::TaskReopened
                    };
                    ctx.record_change(
                        "task",
                        id,
                        event_type,
                        Some(current.status.to_string()),
                        Some(status.to_string()),
                    );
                }
            }

            if let Some(parent) = &changes.parent_id {
                if let Some(parent_id) = parent {
                    if !task_exists(tx, parent_id)? {
                        return Err(Error::TaskNotFound { id: parent_id.clone() });
                    }
                    if creates_cycle(tx, id, parent_id)? {
                        return Err(Error::CycleDetected {
                            task_id: id.to_string(),
                            parent_id: parent_id.clone(),
                        });
                    }
                }
                if *parent != current.parent_id {
                    next.parent_id.clone_from(parent);
                    ctx.record_change(
                        "task",
                        id,
                        EventType::TaskMoved,
                        current.parent_id.clone(),
                        parent.clone(),
                    );
                }
            }

            if let Some(order) = changes.sort_order {
                if order != current.sort_order {
                    next.sort_order = order;
                    ctx.record_event("task", id, EventType::TaskMoved);
                }
            }

            if ctx.events.is_empty() {
                return Ok(current);
            }

            next.updated_at = now;
            tx.execute(
                "UPDATE tasks SET title = ?1, description = ?2, status = ?3, parent_id = ?4,
                   sort_order = ?5, completed_at = ?6, updated_at = ?7
                 WHERE id = ?8",
                rusqlite::params![
                    next.title,
                    next.description,
                    next.status.as_str(),
                    next.parent_id,
                    next.sort_order,
                    next.completed_at,
                    next.updated_at,
                    id
                ],
            )?;

            Ok(next)
        })
    }

    /// Delete a task. Its children are detached and become roots.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if the task does not exist.
    pub fn delete_task(&mut self, id: &str, actor: &str) -> Result<()> {
        self.mutate("delete_task", actor, |tx, ctx| {
            let title: Option<String> = tx
                .query_row("SELECT title FROM tasks WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            let Some(title) = title else {
                return Err(Error::TaskNotFound { id: id.to_string() });
            };

            // parent_id is ON DELETE SET NULL
            tx.execute("DELETE FROM tasks WHERE id = ?1", [id])?;

            ctx.record_change("task", id, EventType::TaskDeleted, Some(title), None);
            Ok(())
        })
    }

    /// Audit history of a task, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn task_history(&self, id: &str, limit: Option<u32>) -> Result<Vec<Event>> {
        get_events(&self.conn, "task", id, limit).map_err(Error::from)
    }

    // ==================
    // Metadata
    // ==================

    /// Get a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn set_meta(&mut self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn.execute(
            "INSERT INTO meta (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            rusqlite::params![key, value, now],
        )?;
        Ok(())
    }

    /// Delete a metadata value. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_meta(&mut self, key: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM meta WHERE key = ?1", [key])?;
        Ok(rows > 0)
    }
}

fn read_data_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA data_version", [], |row| row.get(0))?)
}

fn load_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ?1");
    let task = conn.query_row(&sql, [id], map_task_row).optional()?;
    Ok(task)
}

fn task_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )?)
}

fn next_sort_order(conn: &Connection, category_id: Option<&str>) -> Result<i64> {
    let order = match category_id {
        Some(category_id) => conn.query_row(
            "SELECT COALESCE(MAX(t.sort_order), -1) + 1 FROM tasks t
             JOIN task_categories m ON m.task_id = t.id
             WHERE m.category_id = ?1",
            [category_id],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM tasks",
            [],
            |row| row.get(0),
        )?,
    };
    Ok(order)
}

/// Whether making `parent_id` the parent of `task_id` would close a loop.
fn creates_cycle(conn: &Connection, task_id: &str, parent_id: &str) -> Result<bool> {
    let mut seen = HashSet::new();
    let mut current = Some(parent_id.to_string());

    while let Some(id) = current {
        if id == task_id {
            return Ok(true);
        }
        // Pre-existing loop above us that does not include the task
        if !seen.insert(id.clone()) {
            return Ok(false);
        }
        current = conn
            .query_row("SELECT parent_id FROM tasks WHERE id = ?1", [&id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
    }

    Ok(false)
}

fn map_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    let status = status.parse::<TaskStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;

    let mut category_ids: Vec<String> = row
        .get::<_, Option<String>>(11)?
        .map(|s| s.split(',').map(String::from).collect())
        .unwrap_or_default();
    category_ids.sort();

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status,
        parent_id: row.get(4)?,
        sort_order: row.get(5)?,
        due_at: row.get(6)?,
        recurrence: row.get(7)?,
        completed_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        category_ids,
    })
}

fn map_category_row(row: &rusqlite::Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        archived: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
