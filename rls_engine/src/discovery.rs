//! Migration file discovery for the static analyzer.
//!
//! Uses the `ignore` crate (same library used by ripgrep) for `.gitignore`-aware
//! file walking, plus support for `.rlsguardignore` files with gitignore-compatible
//! syntax.
//!
//! A single file is always analyzed, whatever its extension. A directory is
//! walked and filtered by the configured extensions and exclusions. Results
//! are sorted by relative path so migrations keep their numbered order.

use std::io;
use std::path::Path;

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

use crate::config::CheckConfig;

/// Directory names that are always excluded from file walking.
const HARDCODED_EXCLUDES: &[&str] = &["target", "node_modules", ".git", ".venv"];

/// Name of the project-level ignore file.
const IGNORE_FILE: &str = ".rlsguardignore";

/// A discovered SQL file with its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the analyzed root, with forward slashes.
    pub rel_path: String,
    pub content: String,
    /// `sha256:<hex>` digest of `content`.
    pub content_hash: String,
}

impl SourceFile {
    /// Build a source from in-memory content.
    #[must_use]
    pub fn new(rel_path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let content_hash = compute_sha256(&content);
        Self {
            rel_path: rel_path.into(),
            content,
            content_hash,
        }
    }
}

/// Discover the files to analyze under `path`.
///
/// # Errors
///
/// Returns an I/O error when `path` does not exist or a single-file target
/// cannot be read. Unreadable files inside a directory are skipped with a
/// warning.
pub fn discover(path: &Path, config: &CheckConfig) -> io::Result<Vec<SourceFile>> {
    let metadata = std::fs::metadata(path)?;
    if metadata.is_file() {
        let content = std::fs::read_to_string(path)?;
        let rel_path = path.to_string_lossy().replace('\\', "/");
        return Ok(vec![SourceFile::new(rel_path, content)]);
    }
    Ok(walk_files(path, config))
}

/// Walk a directory and collect every file to analyze.
///
/// Respects `.gitignore`, `.rlsguardignore`, hardcoded exclusions, and
/// config-defined exclusions. Returns only files with matching extensions.
#[must_use]
pub fn walk_files(root: &Path, config: &CheckConfig) -> Vec<SourceFile> {
    let mut builder = WalkBuilder::new(root);

    builder.git_ignore(true);
    builder.git_global(false);
    builder.git_exclude(false);

    let custom_ignore = root.join(IGNORE_FILE);
    if custom_ignore.is_file() {
        builder.add_ignore(&custom_ignore);
    }

    let mut files = Vec::new();

    for entry in builder.build().flatten() {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        if is_in_excluded_dir(root, path) || is_config_excluded(root, path, config) {
            continue;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !config
            .extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        {
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Skipping file {}: read error: {}", path.display(), e);
                continue;
            }
        };

        let rel_path = match path.strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().replace('\\', "/"),
        };

        files.push(SourceFile::new(rel_path, content));
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    log::debug!("Discovered {} file(s) under {}", files.len(), root.display());
    files
}

/// Check if a path is inside a hardcoded-excluded directory.
fn is_in_excluded_dir(root: &Path, path: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };

    rel.components().any(|component| match component {
        std::path::Component::Normal(name) => {
            HARDCODED_EXCLUDES.contains(&name.to_string_lossy().as_ref())
        }
        _ => false,
    })
}

/// Check if a path matches any config-level exclusion pattern.
fn is_config_excluded(root: &Path, path: &Path, config: &CheckConfig) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return false;
    };
    let rel_str = rel.to_string_lossy().replace('\\', "/");

    for pattern in &config.exclude {
        // Prefix matching for directory patterns (e.g., "seeds/")
        let normalized = pattern.trim_end_matches('/');
        if rel_str.starts_with(&format!("{normalized}/"))
            || rel_str == normalized
            || rel_str.contains(&format!("/{normalized}/"))
        {
            return true;
        }

        if let Ok(glob) = globset::Glob::new(pattern) {
            if glob.compile_matcher().is_match(&rel_str) {
                return true;
            }
        }
    }
    false
}

/// Compute the SHA-256 hex digest of a string.
#[must_use]
pub fn compute_sha256(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_walk_files_sql_only_sorted() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("002_policies.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("001_tables.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("readme.md"), "# Hello\n").unwrap();

        let files = walk_files(dir.path(), &CheckConfig::default());
        let names: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(names, vec!["001_tables.sql", "002_policies.sql"]);
    }

    #[test]
    fn test_walk_files_excludes_gitignored() {
        let dir = tempdir().unwrap();
        // The ignore crate requires a .git dir to respect .gitignore
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".gitignore"), "ignored.sql\n").unwrap();
        fs::write(dir.path().join("good.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("ignored.sql"), "SELECT 2").unwrap();

        let files = walk_files(dir.path(), &CheckConfig::default());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "good.sql");
    }

    #[test]
    fn test_walk_files_custom_ignore_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(IGNORE_FILE), "seed_*.sql\n").unwrap();
        fs::write(dir.path().join("schema.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("seed_demo.sql"), "SELECT 2").unwrap();

        let files = walk_files(dir.path(), &CheckConfig::default());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "schema.sql");
    }

    #[test]
    fn test_walk_files_config_exclude_and_nested_paths() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("supabase").join("migrations");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(dir.path().join("fixtures")).unwrap();
        fs::write(nested.join("001_init.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("fixtures").join("data.sql"), "SELECT 1").unwrap();

        let mut config = CheckConfig::default();
        config.exclude.push("fixtures/".to_owned());
        let files = walk_files(dir.path(), &config);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "supabase/migrations/001_init.sql");
    }

    #[test]
    fn test_discover_single_file_any_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schema.psql");
        fs::write(&path, "CREATE TABLE t (id int);").unwrap();

        let files = discover(&path, &CheckConfig::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].rel_path.ends_with("schema.psql"));
    }

    #[test]
    fn test_discover_missing_path_errors() {
        let dir = tempdir().unwrap();
        assert!(discover(&dir.path().join("nope"), &CheckConfig::default()).is_err());
    }

    #[test]
    fn test_compute_sha256() {
        let hash = compute_sha256("SELECT 1");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), 7 + 64);
        assert_eq!(hash, compute_sha256("SELECT 1"));
        assert_ne!(hash, compute_sha256("SELECT 2"));
    }
}
