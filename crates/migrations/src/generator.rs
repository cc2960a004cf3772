//! Migration Generator - Writes new migration file pairs
//!
//! Generated files take the next sequential id in the migrations directory
//! and are named `NNNN_slug_up.<ext>` / `NNNN_slug_down.<ext>`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;

use crate::definitions::{version_name, GeneratedMigration};
use crate::dialect::Dialect;
use crate::error::{MigrationError, MigrationResult};
use crate::schema_builder::SchemaBuilder;
use crate::source::MigrationSource;

/// Template used for a generated migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationKind {
    CreateTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: String,
        column_type: String,
    },
    CreateIndex {
        table: String,
        columns: Vec<String>,
    },
    Custom,
}

impl MigrationKind {
    /// Guess the template from conventional names such as
    /// `create_posts_table` or `add_slug_to_posts`
    pub fn infer(name: &str) -> Self {
        let slug = slugify(name);

        if let Some(table) = slug
            .strip_prefix("create_")
            .and_then(|rest| rest.strip_suffix("_table"))
            .filter(|table| !table.is_empty())
        {
            return MigrationKind::CreateTable {
                table: table.to_string(),
            };
        }

        if let Some((column, table)) = slug
            .strip_prefix("add_")
            .and_then(|rest| rest.rsplit_once("_to_"))
            .filter(|(column, table)| !column.is_empty() && !table.is_empty())
        {
            return MigrationKind::AddColumn {
                table: table.to_string(),
                column: column.to_string(),
                column_type: "TEXT".to_string(),
            };
        }

        MigrationKind::Custom
    }
}

/// Writes migration templates into the migrations directory
#[derive(Debug, Clone)]
pub struct MigrationGenerator {
    source: MigrationSource,
    dialect: Dialect,
}

impl MigrationGenerator {
    pub fn new(source: MigrationSource, dialect: Dialect) -> Self {
        Self { source, dialect }
    }

    /// Create the forward/backward pair for a new migration
    pub fn generate(&self, name: &str, kind: &MigrationKind) -> MigrationResult<GeneratedMigration> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(MigrationError::InvalidName(format!(
                "'{}' contains no letters or digits",
                name
            )));
        }

        let dir = self.source.dir();
        fs::create_dir_all(dir).map_err(|e| MigrationError::io(dir, e))?;

        let id = self.source.highest_id()?.checked_add(1).ok_or_else(|| {
            MigrationError::InvalidName("migration ids are exhausted".to_string())
        })?;
        let stem = version_name(id, &slug);
        let extension = self.source.extension();
        let up_path = dir.join(format!("{}_up.{}", stem, extension));
        let down_path = dir.join(format!("{}_down.{}", stem, extension));

        for path in [&up_path, &down_path] {
            if path.exists() {
                return Err(MigrationError::io(
                    path.as_path(),
                    std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file already exists"),
                ));
            }
        }

        let (up, down) = self.render(id, &slug, kind);
        write_new(&up_path, &up)?;
        write_new(&down_path, &down)?;

        tracing::info!(id, name = %slug, "Created migration {}", stem);

        Ok(GeneratedMigration {
            id,
            name: slug,
            up_path,
            down_path,
        })
    }

    /// Render the forward and backward file contents
    pub fn render(&self, id: u32, slug: &str, kind: &MigrationKind) -> (String, String) {
        let mut up = SchemaBuilder::new(self.dialect);
        let mut down = SchemaBuilder::new(self.dialect);

        match kind {
            MigrationKind::CreateTable { table } => {
                up.create_table(table, |t| {
                    t.id("id");
                    t.timestamps();
                });
                down.drop_table(table);
            }
            MigrationKind::AddColumn {
                table,
                column,
                column_type,
            } => {
                up.add_column(table, column, column_type);
                down.drop_column(table, column);
            }
            MigrationKind::CreateIndex { table, columns } => {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                let index = SchemaBuilder::index_name(table, &columns);
                up.create_index(table, &columns, &index);
                down.drop_index(table, &index);
            }
            MigrationKind::Custom => {
                up.comment("Add your schema changes here");
                down.comment("Add rollback statements here");
            }
        }

        (
            format!("{}{}\n", self.header(id, slug, "up"), up.build()),
            format!("{}{}\n", self.header(id, slug, "down"), down.build()),
        )
    }

    fn header(&self, id: u32, slug: &str, direction: &str) -> String {
        format!(
            "-- Migration: {} ({})\n\
             -- ID: {:04}\n\
             -- Dialect: {}\n\
             -- Created: {}\n\n",
            slug,
            direction,
            id,
            self.dialect,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

fn write_new(path: &Path, content: &str) -> MigrationResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| MigrationError::io(path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| MigrationError::io(path, e))
}

/// Lowercase `name`, collapsing every run of non-alphanumerics into `_`
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn generator(temp_dir: &TempDir, dialect: Dialect) -> MigrationGenerator {
        MigrationGenerator::new(MigrationSource::new(temp_dir.path(), "sql"), dialect)
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Create Posts Table"), "create_posts_table");
        assert_eq!(slugify("  add--slug to posts! "), "add_slug_to_posts");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_infer_kind() {
        assert_eq!(
            MigrationKind::infer("create_posts_table"),
            MigrationKind::CreateTable {
                table: "posts".to_string()
            }
        );
        assert_eq!(
            MigrationKind::infer("add published_at to posts"),
            MigrationKind::AddColumn {
                table: "posts".to_string(),
                column: "published_at".to_string(),
                column_type: "TEXT".to_string(),
            }
        );
        assert_eq!(MigrationKind::infer("backfill_authors"), MigrationKind::Custom);
        assert_eq!(MigrationKind::infer("create_table"), MigrationKind::Custom);
    }

    #[test]
    fn test_generate_writes_pair_with_next_id() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("0004_existing.sql"), "SELECT 1;").unwrap();

        let generated = generator(&temp_dir, Dialect::Sqlite)
            .generate(
                "Create Posts Table",
                &MigrationKind::CreateTable {
                    table: "posts".to_string(),
                },
            )
            .unwrap();

        assert_eq!(generated.id, 5);
        assert_eq!(generated.name, "create_posts_table");
        assert!(generated.up_path.ends_with("0005_create_posts_table_up.sql"));
        assert!(generated.down_path.ends_with("0005_create_posts_table_down.sql"));

        let up = fs::read_to_string(&generated.up_path).unwrap();
        assert!(up.contains("-- Migration: create_posts_table (up)"));
        assert!(up.contains("CREATE TABLE posts"));
        assert!(up.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));

        let down = fs::read_to_string(&generated.down_path).unwrap();
        assert!(down.contains("DROP TABLE IF EXISTS posts;"));
    }

    #[test]
    fn test_generate_creates_directory_and_starts_at_one() {
        let temp_dir = TempDir::new().unwrap();
        let source = MigrationSource::new(temp_dir.path().join("db/migrations"), "sql");
        let generator = MigrationGenerator::new(source.clone(), Dialect::Postgres);

        let first = generator.generate("backfill", &MigrationKind::Custom).unwrap();
        let second = generator.generate("backfill again", &MigrationKind::Custom).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let catalog = source.discover().unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.iter().all(|m| m.has_rollback()));
    }

    #[test]
    fn test_generate_rejects_empty_name() {
        let temp_dir = TempDir::new().unwrap();
        let err = generator(&temp_dir, Dialect::Sqlite)
            .generate("!!!", &MigrationKind::Custom)
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidName(_)));
    }

    #[test]
    fn test_render_index_templates() {
        let temp_dir = TempDir::new().unwrap();
        let kind = MigrationKind::CreateIndex {
            table: "posts".to_string(),
            columns: vec!["title".to_string()],
        };

        let (up, down) = generator(&temp_dir, Dialect::MySql).render(2, "add_index", &kind);
        assert!(up.contains("CREATE INDEX idx_posts_title ON posts (title);"));
        assert!(down.contains("DROP INDEX idx_posts_title ON posts;"));
    }

    #[test]
    fn test_render_add_column_templates() {
        let temp_dir = TempDir::new().unwrap();
        let kind = MigrationKind::AddColumn {
            table: "posts".to_string(),
            column: "slug".to_string(),
            column_type: "VARCHAR(255)".to_string(),
        };

        let (up, down) = generator(&temp_dir, Dialect::Postgres).render(3, "add_slug_to_posts", &kind);
        assert!(up.contains("ALTER TABLE posts ADD COLUMN slug VARCHAR(255);"));
        assert!(down.contains("ALTER TABLE posts DROP COLUMN slug;"));
    }
}
