//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use coffer_core::Timestamp;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, Timestamp::now().as_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Realms and their maintenance status
        CREATE TABLE realms (
            realm_id BLOB PRIMARY KEY,           -- 16 bytes
            encryption_revision INTEGER NOT NULL,
            maintenance_type TEXT,               -- NULL when not in maintenance
            maintenance_started_on INTEGER,
            maintenance_started_by TEXT          -- user@device
        );

        -- Append-only role log
        CREATE TABLE realm_user_roles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            realm_id BLOB NOT NULL REFERENCES realms(realm_id),
            user_id TEXT NOT NULL,
            role INTEGER,                        -- NULL means revoked
            granted_by TEXT,
            granted_on INTEGER NOT NULL,
            certificate BLOB NOT NULL
        );

        -- Buckets receiving vlobs of a given encryption revision
        CREATE TABLE vlob_encryption_revisions (
            realm_id BLOB NOT NULL REFERENCES realms(realm_id),
            encryption_revision INTEGER NOT NULL,
            PRIMARY KEY (realm_id, encryption_revision)
        );

        CREATE TABLE vlobs (
            entry_id BLOB PRIMARY KEY,
            realm_id BLOB NOT NULL REFERENCES realms(realm_id)
        );

        CREATE TABLE vlob_atoms (
            entry_id BLOB NOT NULL REFERENCES vlobs(entry_id),
            encryption_revision INTEGER NOT NULL,
            version INTEGER NOT NULL,
            realm_id BLOB NOT NULL,
            blob BLOB NOT NULL,
            size INTEGER NOT NULL,
            author TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            PRIMARY KEY (entry_id, encryption_revision, version)
        );

        CREATE TABLE blocks (
            block_id BLOB PRIMARY KEY,
            realm_id BLOB NOT NULL REFERENCES realms(realm_id),
            author TEXT NOT NULL,
            created_on INTEGER NOT NULL,
            data BLOB NOT NULL,
            size INTEGER NOT NULL
        );

        CREATE TABLE users (
            user_id TEXT PRIMARY KEY,
            profile INTEGER NOT NULL,
            public_key BLOB NOT NULL,
            user_certificate BLOB NOT NULL,
            user_certifier TEXT,
            created_on INTEGER NOT NULL,
            revoked_on INTEGER,
            revoked_user_certificate BLOB,
            revoked_user_certifier TEXT
        );

        CREATE TABLE devices (
            device_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(user_id),
            verify_key BLOB NOT NULL,
            device_certificate BLOB NOT NULL,
            device_certifier TEXT,
            created_on INTEGER NOT NULL
        );

        CREATE TABLE messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient TEXT NOT NULL,
            sender TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            body BLOB NOT NULL
        );

        CREATE INDEX idx_roles_realm ON realm_user_roles(realm_id, granted_on);
        CREATE INDEX idx_roles_user ON realm_user_roles(user_id);
        CREATE INDEX idx_atoms_realm_revision ON vlob_atoms(realm_id, encryption_revision);
        CREATE INDEX idx_blocks_realm ON blocks(realm_id);
        CREATE INDEX idx_devices_user ON devices(user_id);
        CREATE INDEX idx_messages_recipient ON messages(recipient, id);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "realms",
            "realm_user_roles",
            "vlob_encryption_revisions",
            "vlobs",
            "vlob_atoms",
            "blocks",
            "users",
            "devices",
            "messages",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }
}
