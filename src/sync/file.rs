//! File naming and atomic writes for the sync folder.
//!
//! Each active category is mirrored to `{sanitized name}.md`. Names are
//! compared ignoring case, so `work.md` on disk is the file of category
//! `Work`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Extension of mirrored documents.
pub const DOCUMENT_EXTENSION: &str = "md";

/// Characters that cannot appear in a file name on common filesystems.
const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// File name for a category's document.
#[must_use]
pub fn category_file_name(category_name: &str) -> String {
    let sanitized: String = category_name
        .trim()
        .chars()
        .map(|c| {
            if RESERVED.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("{sanitized}.{DOCUMENT_EXTENSION}")
}

/// Key used to compare file names ignoring case.
#[must_use]
pub fn file_key(name: &str) -> String {
    name.to_lowercase()
}

/// Whether a directory entry looks like a mirrored document.
///
/// Hidden files (including in-progress temp files) are never documents.
#[must_use]
pub fn is_document_name(name: &str) -> bool {
    !name.starts_with('.')
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
}

/// File name without its extension, used when a document has no heading.
#[must_use]
pub fn document_stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// Write content to a file atomically.
///
/// This function:
/// 1. Writes content to a hidden temporary file next to the target
/// 2. Calls `fsync` to ensure data is on disk
/// 3. Atomically renames the temp file to the target path
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        // Sync to disk before rename
        writer.get_ref().sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_category_file_name() {
        assert_eq!(category_file_name("Work"), "Work.md");
        assert_eq!(category_file_name("Home/Garden"), "Home_Garden.md");
        assert_eq!(category_file_name("a:b*c?\"d<e>f|g\\h"), "a_b_c__d_e_f_g_h.md");
        assert_eq!(category_file_name("tab\there"), "tab_here.md");
        assert_eq!(category_file_name("  Trips 2025 "), "Trips 2025.md");
    }

    #[test]
    fn test_is_document_name() {
        assert!(is_document_name("Work.md"));
        assert!(is_document_name("notes.MD"));
        assert!(!is_document_name(".Work.md.tmp"));
        assert!(!is_document_name(".hidden.md"));
        assert!(!is_document_name("image.png"));
        assert!(!is_document_name("README"));
    }

    #[test]
    fn test_document_stem() {
        assert_eq!(document_stem("Groceries.md"), "Groceries");
        assert_eq!(document_stem("v1.2 plan.md"), "v1.2 plan");
    }

    #[test]
    fn test_file_key_ignores_case() {
        assert_eq!(file_key("Work.md"), file_key("WORK.MD"));
    }

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Work.md");

        atomic_write(&path, "# Work\n").unwrap();
        atomic_write(&path, "# Work\n\n- [ ] A\n").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "# Work\n\n- [ ] A\n");

        // No temp file left behind
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_atomic_write_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone").join("Work.md");
        assert!(atomic_write(&path, "# Work\n").is_err());
    }
}
