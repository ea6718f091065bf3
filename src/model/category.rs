//! Category model.
//!
//! A category is a named partition of tasks. Each active category is mirrored
//! to exactly one document whose heading is the category name.

use serde::{Deserialize, Serialize};

/// Default color for categories created without one (e.g. by folder import).
pub const DEFAULT_COLOR: &str = "#6b7280";

/// A task category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Unique identifier (`cat_` prefix)
    pub id: String,

    /// Display name, unique among active categories ignoring case
    pub name: String,

    /// Hex color (`#rrggbb`)
    pub color: String,

    /// Archived categories are not exported
    pub archived: bool,

    pub created_at: i64,

    pub updated_at: i64,
}

impl Category {
    /// Create a new category with a generated ID.
    #[must_use]
    pub fn new(name: String, color: Option<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let id = format!("cat_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        Self {
            id,
            name,
            color: color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive name comparison used for find-or-create.
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.trim().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_category() {
        let category = Category::new("Work".to_string(), None);

        assert!(category.id.starts_with("cat_"));
        assert_eq!(category.id.len(), 16);
        assert_eq!(category.name, "Work");
        assert_eq!(category.color, DEFAULT_COLOR);
        assert!(!category.archived);
    }

    #[test]
    fn test_matches_name_ignores_case() {
        let category = Category::new("Groceries".to_string(), Some("#22c55e".into()));
        assert!(category.matches_name("groceries"));
        assert!(category.matches_name("  GROCERIES "));
        assert!(!category.matches_name("Grocery"));
    }
}
