//! SQL migration definitions for the SiteKB index database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: namespaced chunk index",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Indexed chunks. `embedding` is a little-endian f32 array.
CREATE TABLE IF NOT EXISTS chunks (
    namespace     TEXT NOT NULL,
    id            TEXT NOT NULL,
    text          TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    dimensions    INTEGER NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (namespace, id)
);

CREATE INDEX IF NOT EXISTS idx_chunks_namespace ON chunks(namespace);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
