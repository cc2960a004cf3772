//! Database dialects
//!
//! The engine supports a closed set of relational backends. Everything that
//! differs between them (ledger DDL, placeholder style, how timestamps are
//! read back as text, how scripts are split into statements) is answered by
//! [`Dialect`], which is resolved once when a connection is created.

use serde::{Deserialize, Serialize};
use sqlparser::dialect::{MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Supported database dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgresql"),
            Dialect::MySql => write!(f, "mysql"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgresql" | "postgres" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dialect> for String {
    fn from(dialect: Dialect) -> Self {
        dialect.to_string()
    }
}

impl Dialect {
    /// Detect the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once(':')?;
        scheme.parse().ok()
    }

    /// Bind parameter for the 1-based position `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    /// Auto-incrementing primary key column definition
    pub fn auto_increment_key(&self, column: &str) -> String {
        match self {
            Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column),
            Dialect::Postgres => format!("{} BIGSERIAL PRIMARY KEY", column),
            Dialect::MySql => format!("{} BIGINT AUTO_INCREMENT PRIMARY KEY", column),
        }
    }

    /// Name of the ledger's `applied_at` index
    pub fn ledger_index_name(table: &str) -> String {
        format!("idx_{}_applied_at", table)
    }

    /// SQL to create the ledger table
    pub fn create_ledger_table_sql(&self, table: &str) -> String {
        let (text_type, inline_index) = match self {
            Dialect::Sqlite => ("TEXT", String::new()),
            Dialect::Postgres => ("VARCHAR(255)", String::new()),
            // MySQL has no CREATE INDEX IF NOT EXISTS, declare it inline
            Dialect::MySql => (
                "VARCHAR(255)",
                format!(",\n    INDEX {} (applied_at)", Self::ledger_index_name(table)),
            ),
        };

        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    \
                {id},\n    \
                name {text} NOT NULL UNIQUE,\n    \
                filename {text} NOT NULL,\n    \
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP{index}\n\
            )",
            table = table,
            id = self.auto_increment_key("id"),
            text = text_type,
            index = inline_index,
        )
    }

    /// SQL to create the ledger `applied_at` index, if it is a separate statement
    pub fn create_ledger_index_sql(&self, table: &str) -> Option<String> {
        match self {
            Dialect::Sqlite | Dialect::Postgres => Some(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (applied_at)",
                Self::ledger_index_name(table),
                table
            )),
            Dialect::MySql => None,
        }
    }

    /// SQL to record a migration as applied
    pub fn insert_ledger_sql(&self, table: &str) -> String {
        format!(
            "INSERT INTO {} (id, name, filename) VALUES ({}, {}, {})",
            table,
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3)
        )
    }

    /// SQL to remove a migration record (for rollback)
    pub fn delete_ledger_sql(&self, table: &str) -> String {
        format!("DELETE FROM {} WHERE id = {}", table, self.placeholder(1))
    }

    /// SQL to read the ledger in id order, with `applied_at` as text
    pub fn select_ledger_sql(&self, table: &str) -> String {
        let text_cast = match self {
            Dialect::Sqlite | Dialect::Postgres => "CAST(applied_at AS TEXT)",
            Dialect::MySql => "CAST(applied_at AS CHAR)",
        };
        format!(
            "SELECT id, name, filename, {} AS applied_at FROM {} ORDER BY id ASC",
            text_cast, table
        )
    }

    /// Statement dropping an index created on `table`
    pub fn drop_index_sql(&self, index: &str, table: &str) -> String {
        match self {
            Dialect::MySql => format!("DROP INDEX {} ON {};", index, table),
            Dialect::Sqlite | Dialect::Postgres => format!("DROP INDEX IF EXISTS {};", index),
        }
    }

    /// Split a script into executable statements using this dialect's parser.
    ///
    /// Returns `None` when the parser rejects the script; semicolons inside
    /// trigger bodies make any textual split unsafe, so such scripts must run
    /// as a single batch.
    pub fn split_statements(&self, sql: &str) -> Option<Vec<String>> {
        let parsed = match self {
            Dialect::Sqlite => Parser::parse_sql(&SQLiteDialect {}, sql),
            Dialect::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
            Dialect::MySql => Parser::parse_sql(&MySqlDialect {}, sql),
        };

        match parsed {
            Ok(statements) => Some(
                statements
                    .into_iter()
                    .map(|stmt| format!("{};", stmt))
                    .collect(),
            ),
            Err(e) => {
                tracing::debug!(dialect = %self, "SQL parsing failed, script will run unsplit: {}", e);
                None
            }
        }
    }
}

/// Check that `name` can be interpolated into SQL as a bare identifier
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_parsing() {
        assert_eq!("postgres".parse::<Dialect>(), Ok(Dialect::Postgres));
        assert_eq!("PostgreSQL".parse::<Dialect>(), Ok(Dialect::Postgres));
        assert_eq!("sqlite".parse::<Dialect>(), Ok(Dialect::Sqlite));
        assert_eq!("mariadb".parse::<Dialect>(), Ok(Dialect::MySql));
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(
            Dialect::from_url("postgres://localhost/app"),
            Some(Dialect::Postgres)
        );
        assert_eq!(
            Dialect::from_url("sqlite://data/app.db?mode=rwc"),
            Some(Dialect::Sqlite)
        );
        assert_eq!(Dialect::from_url("sqlite::memory:"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_url("mysql://root@localhost/app"), Some(Dialect::MySql));
        assert_eq!(Dialect::from_url("app.db"), None);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?");
        assert_eq!(
            Dialect::Postgres.insert_ledger_sql("elif_migrations"),
            "INSERT INTO elif_migrations (id, name, filename) VALUES ($1, $2, $3)"
        );
        assert_eq!(
            Dialect::MySql.delete_ledger_sql("elif_migrations"),
            "DELETE FROM elif_migrations WHERE id = ?"
        );
    }

    #[test]
    fn test_ledger_ddl() {
        let sqlite = Dialect::Sqlite.create_ledger_table_sql("elif_migrations");
        assert!(sqlite.contains("CREATE TABLE IF NOT EXISTS elif_migrations"));
        assert!(sqlite.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sqlite.contains("name TEXT NOT NULL UNIQUE"));

        let postgres = Dialect::Postgres.create_ledger_table_sql("elif_migrations");
        assert!(postgres.contains("id BIGSERIAL PRIMARY KEY"));
        assert!(postgres.contains("applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP"));

        let mysql = Dialect::MySql.create_ledger_table_sql("elif_migrations");
        assert!(mysql.contains("INDEX idx_elif_migrations_applied_at (applied_at)"));
        assert!(Dialect::MySql.create_ledger_index_sql("elif_migrations").is_none());

        assert_eq!(
            Dialect::Postgres.create_ledger_index_sql("elif_migrations").as_deref(),
            Some("CREATE INDEX IF NOT EXISTS idx_elif_migrations_applied_at ON elif_migrations (applied_at)")
        );
    }

    #[test]
    fn test_split_statements() {
        let script = "-- create the table\n\
                      CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT NOT NULL);\n\
                      CREATE INDEX idx_posts_title ON posts (title);\n";
        let statements = Dialect::Sqlite.split_statements(script).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE posts"));
        assert!(statements[1].starts_with("CREATE INDEX idx_posts_title"));
    }

    #[test]
    fn test_split_empty_script() {
        assert_eq!(Dialect::Sqlite.split_statements("-- nothing here\n"), Some(Vec::new()));
        assert_eq!(Dialect::Postgres.split_statements(""), Some(Vec::new()));
    }

    #[test]
    fn test_unparsable_script_is_not_split() {
        let script = "CREATE TABLE posts (id INTEGER);\nTHIS IS NOT SQL; SELECT 1;";
        assert_eq!(Dialect::Sqlite.split_statements(script), None);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("elif_migrations"));
        assert!(is_valid_identifier("_ledger2"));
        assert!(!is_valid_identifier("2ledger"));
        assert!(!is_valid_identifier("ledger; DROP TABLE users"));
        assert!(!is_valid_identifier(""));
    }
}
