//! Migration service - applies embedded schema migrations
//!
//! Applied migrations are recorded in `sys_migrations`, so running the
//! service repeatedly is a no-op once the schema is current.

use duckdb::Connection;

use crate::domain::result::Result;
use crate::migrations::MIGRATIONS;

const BOOTSTRAP: &str = "000_migrations.sql";

/// Result of running migrations
#[derive(Debug)]
pub struct MigrationResult {
    /// Names of newly applied migrations
    pub applied: Vec<String>,
    /// Count of migrations that were already applied
    pub already_applied: usize,
}

/// Applies pending migrations over a borrowed connection
pub struct MigrationService<'a> {
    conn: &'a Connection,
}

impl<'a> MigrationService<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Run all pending migrations in order
    ///
    /// The bootstrap migration creating `sys_migrations` runs first when the
    /// table is missing; everything else is checked against that table.
    pub fn run_pending(&self) -> Result<MigrationResult> {
        let mut applied = Vec::new();

        let bootstrapped = if self.migrations_table_exists()? {
            false
        } else {
            match MIGRATIONS.iter().find(|(name, _)| *name == BOOTSTRAP) {
                Some((name, sql)) => {
                    self.apply(name, sql)?;
                    applied.push(name.to_string());
                    true
                }
                None => false,
            }
        };

        let recorded = self.get_applied()?;
        let already_applied = recorded.len() - usize::from(bootstrapped);

        for (name, sql) in MIGRATIONS.iter().filter(|(name, _)| *name != BOOTSTRAP) {
            if !recorded.iter().any(|r| r == name) {
                self.apply(name, sql)?;
                applied.push(name.to_string());
            }
        }

        Ok(MigrationResult {
            applied,
            already_applied,
        })
    }

    /// Names of applied migrations, sorted
    pub fn get_applied(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT migration_name FROM sys_migrations ORDER BY migration_name")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut result = Vec::new();
        for name in names {
            result.push(name?);
        }
        Ok(result)
    }

    /// Names of embedded migrations not yet applied
    pub fn get_pending(&self) -> Result<Vec<String>> {
        let applied = if self.migrations_table_exists()? {
            self.get_applied()?
        } else {
            Vec::new()
        };
        Ok(MIGRATIONS
            .iter()
            .filter(|(name, _)| !applied.iter().any(|a| a == name))
            .map(|(name, _)| name.to_string())
            .collect())
    }

    fn migrations_table_exists(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'sys_migrations'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn apply(&self, name: &str, sql: &str) -> Result<()> {
        tracing::debug!(migration = name, "applying migration");
        self.conn.execute_batch(sql)?;
        self.conn
            .execute("INSERT INTO sys_migrations (migration_name) VALUES (?)", [name])?;
        Ok(())
    }
}
