//! Data models for taskdoc.
//!
//! This module contains the domain records:
//! - Task
//! - Category

pub mod category;
pub mod task;

pub use category::Category;
pub use task::{NewTask, Task, TaskChanges, TaskStatus};
