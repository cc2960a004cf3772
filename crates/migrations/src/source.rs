//! Migration Source - File system discovery of migrations
//!
//! Scans the migrations directory (non-recursively) and builds the catalog.
//! File names follow `<id>_<slug>.<ext>` or `<id>_<slug>_up.<ext>` for
//! forward scripts and `<id>_<slug>_down.<ext>` for rollback scripts.
//! Unparsable names are skipped with a warning; they never abort discovery.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::definitions::{Discovery, Migration, SkippedFile};
use crate::error::{DiscoveryError, MigrationError, MigrationResult};

/// Which half of a migration a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScriptRole {
    Forward,
    Backward,
}

/// Components of a migration file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedName {
    pub id: u32,
    pub slug: String,
    pub role: ScriptRole,
}

struct ScriptFile {
    slug: String,
    path: PathBuf,
    file_name: String,
}

/// Reads migrations from a directory
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
    extension: String,
}

impl MigrationSource {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Load the catalog, ascending by id
    pub fn discover(&self) -> MigrationResult<Vec<Migration>> {
        Ok(self.scan()?.migrations)
    }

    /// Load the catalog together with the files that were skipped
    pub fn scan(&self) -> MigrationResult<Discovery> {
        if !self.dir.exists() {
            return Ok(Discovery::default());
        }

        let mut forwards: BTreeMap<u32, ScriptFile> = BTreeMap::new();
        let mut backwards: BTreeMap<u32, ScriptFile> = BTreeMap::new();
        let mut skipped = Vec::new();

        let entries = fs::read_dir(&self.dir).map_err(|e| MigrationError::io(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| MigrationError::io(&self.dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                if path.extension().is_some_and(|ext| ext == self.extension.as_str()) {
                    tracing::warn!(file = %path.display(), "Skipping migration file with a non UTF-8 name");
                    skipped.push(SkippedFile {
                        path,
                        reason: DiscoveryError::NonUtf8Name,
                    });
                }
                continue;
            };

            let parsed = match parse_file_name(&file_name, &self.extension) {
                None => continue,
                Some(Ok(parsed)) => parsed,
                Some(Err(reason)) => {
                    tracing::warn!(file = %path.display(), "Skipping migration file: {}", reason);
                    skipped.push(SkippedFile { path, reason });
                    continue;
                }
            };

            let scripts = match parsed.role {
                ScriptRole::Forward => &mut forwards,
                ScriptRole::Backward => &mut backwards,
            };
            if let Some(existing) = scripts.get(&parsed.id) {
                let (first, second) = ordered(existing.path.clone(), path);
                return Err(MigrationError::DuplicateMigrationId {
                    id: parsed.id,
                    first,
                    second,
                });
            }
            scripts.insert(
                parsed.id,
                ScriptFile {
                    slug: parsed.slug,
                    file_name,
                    path,
                },
            );
        }

        let mut migrations = Vec::with_capacity(forwards.len());
        for (id, forward) in forwards {
            let backward = match backwards.remove(&id) {
                Some(candidate) if candidate.slug == forward.slug => Some(candidate),
                Some(candidate) => {
                    backwards.insert(id, candidate);
                    None
                }
                None => None,
            };

            let forward_script = read_script(&forward.path)?;
            let backward_script = match &backward {
                Some(file) => Some(read_script(&file.path)?),
                None => None,
            };

            migrations.push(Migration {
                id,
                name: forward.slug,
                filename: forward.file_name,
                forward_script,
                backward_script,
                forward_path: forward.path,
                backward_path: backward.map(|file| file.path),
            });
        }

        for (_, orphan) in backwards {
            tracing::warn!(file = %orphan.path.display(), "Skipping rollback script without a forward script");
            skipped.push(SkippedFile {
                path: orphan.path,
                reason: DiscoveryError::OrphanedBackward,
            });
        }
        skipped.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(Discovery {
            migrations,
            skipped,
        })
    }

    /// Highest id used by any well-formed file in the directory, 0 when empty
    pub fn highest_id(&self) -> MigrationResult<u32> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let mut highest = 0;
        let entries = fs::read_dir(&self.dir).map_err(|e| MigrationError::io(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| MigrationError::io(&self.dir, e))?;
            let file_name = entry.file_name();
            if let Some(Ok(parsed)) = file_name
                .to_str()
                .and_then(|name| parse_file_name(name, &self.extension))
            {
                highest = highest.max(parsed.id);
            }
        }
        Ok(highest)
    }
}

fn ordered(a: PathBuf, b: PathBuf) -> (PathBuf, PathBuf) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn read_script(path: &Path) -> MigrationResult<String> {
    fs::read_to_string(path).map_err(|e| MigrationError::io(path, e))
}

/// Parse a migration file name.
///
/// Returns `None` for files that are not migration candidates at all (other
/// extensions, hidden files).
pub(crate) fn parse_file_name(
    file_name: &str,
    extension: &str,
) -> Option<Result<ParsedName, DiscoveryError>> {
    if file_name.starts_with('.') {
        return None;
    }
    let stem = file_name.strip_suffix(extension)?.strip_suffix('.')?;

    let Some((prefix, rest)) = stem.split_once('_') else {
        let reason = if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()) {
            DiscoveryError::MissingSlug
        } else {
            DiscoveryError::InvalidPrefix {
                prefix: stem.to_string(),
            }
        };
        return Some(Err(reason));
    };

    Some(parse_parts(prefix, rest))
}

fn parse_parts(prefix: &str, rest: &str) -> Result<ParsedName, DiscoveryError> {
    let invalid_prefix = || DiscoveryError::InvalidPrefix {
        prefix: prefix.to_string(),
    };

    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid_prefix());
    }
    let id: u32 = prefix.parse().map_err(|_| invalid_prefix())?;
    if id == 0 {
        return Err(invalid_prefix());
    }

    let (slug, role) = if let Some(slug) = rest.strip_suffix("_down") {
        (slug, ScriptRole::Backward)
    } else if let Some(slug) = rest.strip_suffix("_up") {
        (slug, ScriptRole::Forward)
    } else {
        (rest, ScriptRole::Forward)
    };

    if slug.is_empty() {
        return Err(DiscoveryError::MissingSlug);
    }

    Ok(ParsedName {
        id,
        slug: slug.to_string(),
        role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(temp_dir: &TempDir) -> MigrationSource {
        MigrationSource::new(temp_dir.path(), "sql")
    }

    fn write(temp_dir: &TempDir, name: &str, content: &str) {
        fs::write(temp_dir.path().join(name), content).unwrap();
    }

    #[test]
    fn test_parse_file_names() {
        assert_eq!(
            parse_file_name("0001_create_posts.sql", "sql"),
            Some(Ok(ParsedName {
                id: 1,
                slug: "create_posts".to_string(),
                role: ScriptRole::Forward,
            }))
        );
        assert_eq!(
            parse_file_name("0002_add_index_up.sql", "sql"),
            Some(Ok(ParsedName {
                id: 2,
                slug: "add_index".to_string(),
                role: ScriptRole::Forward,
            }))
        );
        assert_eq!(
            parse_file_name("0002_add_index_down.sql", "sql"),
            Some(Ok(ParsedName {
                id: 2,
                slug: "add_index".to_string(),
                role: ScriptRole::Backward,
            }))
        );
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        assert_eq!(
            parse_file_name("abcd_create_posts.sql", "sql"),
            Some(Err(DiscoveryError::InvalidPrefix {
                prefix: "abcd".to_string()
            }))
        );
        assert_eq!(
            parse_file_name("0000_zero.sql", "sql"),
            Some(Err(DiscoveryError::InvalidPrefix {
                prefix: "0000".to_string()
            }))
        );
        assert_eq!(
            parse_file_name("0003.sql", "sql"),
            Some(Err(DiscoveryError::MissingSlug))
        );
        assert_eq!(
            parse_file_name("0003__down.sql", "sql"),
            Some(Err(DiscoveryError::MissingSlug))
        );
        assert_eq!(parse_file_name("README.md", "sql"), None);
        assert_eq!(parse_file_name(".0001_hidden.sql", "sql"), None);
    }

    #[test]
    fn test_discover_orders_by_id() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "0010_tenth.sql", "SELECT 10;");
        write(&temp_dir, "0002_second_up.sql", "SELECT 2;");
        write(&temp_dir, "0002_second_down.sql", "SELECT -2;");
        write(&temp_dir, "0001_first.sql", "SELECT 1;");

        let migrations = source(&temp_dir).discover().unwrap();
        let ids: Vec<u32> = migrations.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 10]);

        assert_eq!(migrations[1].name, "second");
        assert_eq!(migrations[1].filename, "0002_second_up.sql");
        assert_eq!(migrations[1].backward_script.as_deref(), Some("SELECT -2;"));
        assert_eq!(migrations[1].version_name(), "0002_second");
        assert!(!migrations[0].has_rollback());
    }

    #[test]
    fn test_bare_forward_pairs_with_down_file() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "0001_create_posts.sql", "CREATE TABLE posts (id INTEGER);");
        write(&temp_dir, "0001_create_posts_down.sql", "DROP TABLE posts;");

        let migrations = source(&temp_dir).discover().unwrap();
        assert_eq!(migrations.len(), 1);
        assert_eq!(
            migrations[0].backward_script.as_deref(),
            Some("DROP TABLE posts;")
        );
    }

    #[test]
    fn test_malformed_files_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "0001_first.sql", "SELECT 1;");
        write(&temp_dir, "draft_notes.sql", "SELECT 0;");
        write(&temp_dir, "0002.sql", "SELECT 2;");
        write(&temp_dir, "0003_third.sql", "SELECT 3;");
        write(&temp_dir, "notes.txt", "ignored entirely");

        let discovery = source(&temp_dir).scan().unwrap();
        let ids: Vec<u32> = discovery.migrations.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(discovery.skipped.len(), 2);
        assert_eq!(discovery.skipped[0].reason, DiscoveryError::MissingSlug);
        assert_eq!(
            discovery.skipped[1].reason,
            DiscoveryError::InvalidPrefix {
                prefix: "draft".to_string()
            }
        );
    }

    #[test]
    fn test_orphaned_backward_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "0001_first.sql", "SELECT 1;");
        write(&temp_dir, "0001_other_down.sql", "SELECT -1;");
        write(&temp_dir, "0004_gone_down.sql", "SELECT -4;");

        let discovery = source(&temp_dir).scan().unwrap();
        assert_eq!(discovery.migrations.len(), 1);
        assert!(discovery.migrations[0].backward_script.is_none());
        assert_eq!(discovery.skipped.len(), 2);
        assert!(discovery
            .skipped
            .iter()
            .all(|file| file.reason == DiscoveryError::OrphanedBackward));
    }

    #[test]
    fn test_duplicate_ids_are_fatal() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "0001_first.sql", "SELECT 1;");
        write(&temp_dir, "0001_also_first.sql", "SELECT 1;");

        let err = source(&temp_dir).discover().unwrap_err();
        match err {
            MigrationError::DuplicateMigrationId { id, first, second } => {
                assert_eq!(id, 1);
                assert!(first.ends_with("0001_also_first.sql"));
                assert!(second.ends_with("0001_first.sql"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "0001_first.sql", "SELECT 1;");
        let raw_name = OsStr::from_bytes(b"0002_caf\xe9.sql");
        fs::write(temp_dir.path().join(raw_name), "SELECT 2;").unwrap();
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"notes\xe9.txt")), "ignored").unwrap();

        let discovery = source(&temp_dir).scan().unwrap();
        assert_eq!(discovery.migrations.len(), 1);
        assert_eq!(discovery.skipped.len(), 1);
        assert_eq!(discovery.skipped[0].reason, DiscoveryError::NonUtf8Name);
        assert_eq!(discovery.skipped[0].path.file_name(), Some(raw_name));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let source = MigrationSource::new(temp_dir.path().join("missing"), "sql");
        assert!(source.discover().unwrap().is_empty());
        assert_eq!(source.highest_id().unwrap(), 0);
    }

    #[test]
    fn test_highest_id_includes_rollback_files() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "0001_first.sql", "SELECT 1;");
        write(&temp_dir, "0007_lonely_down.sql", "SELECT -7;");
        write(&temp_dir, "junk.sql", "SELECT 0;");

        assert_eq!(source(&temp_dir).highest_id().unwrap(), 7);
    }
}
