//! Dialect-aware SQL snippets for generated migration templates
//!
//! [`MigrationGenerator`](crate::generator::MigrationGenerator) renders both
//! halves of a new migration through [`SchemaBuilder`], so the statements it
//! writes match the target [`Dialect`].

use crate::dialect::Dialect;

/// Accumulates the statements of one migration script
pub struct SchemaBuilder {
    dialect: Dialect,
    statements: Vec<String>,
}

impl SchemaBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            statements: Vec::new(),
        }
    }

    /// Conventional index name, e.g. `idx_posts_title`
    pub fn index_name(table: &str, columns: &[&str]) -> String {
        format!("idx_{}_{}", table, columns.join("_"))
    }

    pub fn create_table<F>(&mut self, table: &str, define: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut builder = TableBuilder::new(table, self.dialect);
        define(&mut builder);
        self.push(builder.to_sql())
    }

    pub fn drop_table(&mut self, table: &str) -> &mut Self {
        self.push(format!("DROP TABLE IF EXISTS {};", table))
    }

    pub fn add_column(&mut self, table: &str, column: &str, column_type: &str) -> &mut Self {
        self.push(format!("ALTER TABLE {} ADD COLUMN {} {};", table, column, column_type))
    }

    pub fn drop_column(&mut self, table: &str, column: &str) -> &mut Self {
        self.push(format!("ALTER TABLE {} DROP COLUMN {};", table, column))
    }

    pub fn create_index(&mut self, table: &str, columns: &[&str], index: &str) -> &mut Self {
        self.push(format!("CREATE INDEX {} ON {} ({});", index, table, columns.join(", ")))
    }

    pub fn drop_index(&mut self, table: &str, index: &str) -> &mut Self {
        let sql = self.dialect.drop_index_sql(index, table);
        self.push(sql)
    }

    /// SQL line comment, used as a placeholder in custom templates
    pub fn comment(&mut self, text: &str) -> &mut Self {
        self.push(format!("-- {}", text))
    }

    /// One statement per line
    pub fn build(&self) -> String {
        self.statements.join("\n")
    }

    fn push(&mut self, statement: String) -> &mut Self {
        self.statements.push(statement);
        self
    }
}

/// Column list of a generated CREATE TABLE
pub struct TableBuilder {
    table_name: String,
    dialect: Dialect,
    columns: Vec<String>,
}

impl TableBuilder {
    pub fn new(table_name: &str, dialect: Dialect) -> Self {
        Self {
            table_name: table_name.to_string(),
            dialect,
            columns: Vec::new(),
        }
    }

    /// Auto-increment primary key in the dialect's syntax
    pub fn id(&mut self, name: &str) -> &mut Self {
        self.columns.push(self.dialect.auto_increment_key(name));
        self
    }

    /// `created_at` and `updated_at`, both defaulting to now
    pub fn timestamps(&mut self) -> &mut Self {
        for column in ["created_at", "updated_at"] {
            self.columns.push(format!(
                "{} TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
                column
            ));
        }
        self
    }

    pub fn to_sql(&self) -> String {
        format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.table_name,
            self.columns.join(",\n    ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_follows_dialect() {
        let mut postgres = SchemaBuilder::new(Dialect::Postgres);
        postgres.create_table("widgets", |table| {
            table.id("id").timestamps();
        });
        assert_eq!(
            postgres.build(),
            "CREATE TABLE widgets (\n    \
             id BIGSERIAL PRIMARY KEY,\n    \
             created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,\n    \
             updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP\n);"
        );

        let mut mysql = TableBuilder::new("widgets", Dialect::MySql);
        mysql.id("id");
        assert!(mysql.to_sql().contains("id BIGINT AUTO_INCREMENT PRIMARY KEY"));
    }

    #[test]
    fn test_index_statements_follow_dialect() {
        let mut mysql = SchemaBuilder::new(Dialect::MySql);
        mysql
            .create_index("posts", &["title"], "idx_posts_title")
            .drop_index("posts", "idx_posts_title");
        assert_eq!(
            mysql.build(),
            "CREATE INDEX idx_posts_title ON posts (title);\nDROP INDEX idx_posts_title ON posts;"
        );

        let mut sqlite = SchemaBuilder::new(Dialect::Sqlite);
        sqlite.drop_index("posts", "idx_posts_title");
        assert_eq!(sqlite.build(), "DROP INDEX IF EXISTS idx_posts_title;");
    }

    #[test]
    fn test_column_changes() {
        let mut builder = SchemaBuilder::new(Dialect::Postgres);
        builder
            .comment("publishing workflow")
            .add_column("posts", "published_at", "TIMESTAMP")
            .drop_column("posts", "draft")
            .drop_table("legacy_posts");

        let sql = builder.build();
        assert!(sql.starts_with("-- publishing workflow\n"));
        assert!(sql.contains("ALTER TABLE posts ADD COLUMN published_at TIMESTAMP;"));
        assert!(sql.contains("ALTER TABLE posts DROP COLUMN draft;"));
        assert!(sql.contains("DROP TABLE IF EXISTS legacy_posts;"));
    }
}
