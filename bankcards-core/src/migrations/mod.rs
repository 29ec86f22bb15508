//! Schema migrations, embedded at compile time
//!
//! Each entry is `(file name, sql)`. Entries are applied in order and
//! recorded in `sys_migrations`; the first one creates that table.

/// When adding a migration, create `NNN_description.sql` and append it here
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
];
