//! SQLite implementation of the store traits.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use coffer_core::{
    BlockId, DeviceId, EntryId, MaintenanceType, RealmId, RealmRole, RealmStatus, RoleGrant,
    Timestamp, UserId, UserProfile, VerifyKey,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    DeviceEntry, DirectoryStore, RealmStats, RealmStore, ReencryptionItem, StoredBlock,
    StoredMessage, UserEntry, VlobAtom,
};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` on the connection in a blocking task.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn conversion_error<E>(idx: usize, ty: Type, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

fn get_device_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<DeviceId> {
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn get_opt_device_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DeviceId>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| s.parse().map_err(|e| conversion_error(idx, Type::Text, e)))
        .transpose()
}

fn get_user_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<UserId> {
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn get_bytes16(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; 16]> {
    let b: Vec<u8> = row.get(idx)?;
    b.try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, "16-byte id".into(), Type::Blob))
}

fn get_bytes32(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; 32]> {
    let b: Vec<u8> = row.get(idx)?;
    b.try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, "32-byte key".into(), Type::Blob))
}

fn get_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    Ok(Timestamp::from_millis(row.get(idx)?))
}

fn get_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(idx)?;
    Ok(v as u64)
}

fn role_to_sql(role: Option<RealmRole>) -> Option<i64> {
    role.map(|r| r.as_u8() as i64)
}

fn get_role(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<RealmRole>> {
    let v: Option<i64> = row.get(idx)?;
    match v {
        None => Ok(None),
        Some(v) => RealmRole::from_u8(v as u8)
            .map(Some)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(idx, "role".into(), Type::Integer)),
    }
}

const GRANT_COLUMNS: &str = "realm_id, user_id, role, granted_by, granted_on, certificate";

fn row_to_grant(row: &Row<'_>) -> rusqlite::Result<RoleGrant> {
    Ok(RoleGrant {
        realm_id: RealmId::from_bytes(get_bytes16(row, 0)?),
        user_id: get_user_id(row, 1)?,
        role: get_role(row, 2)?,
        granted_by: get_opt_device_id(row, 3)?,
        granted_on: get_timestamp(row, 4)?,
        certificate: row.get(5)?,
    })
}

const ATOM_COLUMNS: &str =
    "realm_id, entry_id, encryption_revision, version, blob, author, timestamp";

fn row_to_atom(row: &Row<'_>) -> rusqlite::Result<VlobAtom> {
    Ok(VlobAtom {
        realm_id: RealmId::from_bytes(get_bytes16(row, 0)?),
        entry_id: EntryId::from_bytes(get_bytes16(row, 1)?),
        encryption_revision: get_u64(row, 2)?,
        version: get_u64(row, 3)?,
        blob: row.get(4)?,
        author: get_device_id(row, 5)?,
        timestamp: get_timestamp(row, 6)?,
    })
}

const USER_COLUMNS: &str = "user_id, profile, public_key, user_certificate, user_certifier, \
     created_on, revoked_on, revoked_user_certificate, revoked_user_certifier";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserEntry> {
    let profile: i64 = row.get(1)?;
    Ok(UserEntry {
        user_id: get_user_id(row, 0)?,
        profile: UserProfile::from_u8(profile as u8)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(1, "profile".into(), Type::Integer))?,
        public_key: get_bytes32(row, 2)?,
        user_certificate: row.get(3)?,
        user_certifier: get_opt_device_id(row, 4)?,
        created_on: get_timestamp(row, 5)?,
        revoked_on: row.get::<_, Option<i64>>(6)?.map(Timestamp::from_millis),
        revoked_user_certificate: row.get(7)?,
        revoked_user_certifier: get_opt_device_id(row, 8)?,
    })
}

const DEVICE_COLUMNS: &str =
    "device_id, verify_key, device_certificate, device_certifier, created_on";

fn row_to_device(row: &Row<'_>) -> rusqlite::Result<DeviceEntry> {
    Ok(DeviceEntry {
        device_id: get_device_id(row, 0)?,
        verify_key: VerifyKey::from_bytes(get_bytes32(row, 1)?),
        device_certificate: row.get(2)?,
        device_certifier: get_opt_device_id(row, 3)?,
        created_on: get_timestamp(row, 4)?,
    })
}

fn realm_exists(conn: &Connection, realm_id: &RealmId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM realms WHERE realm_id = ?1",
            params![realm_id.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn require_realm(conn: &Connection, realm_id: &RealmId) -> Result<()> {
    if realm_exists(conn, realm_id)? {
        Ok(())
    } else {
        Err(StoreError::NotFound(format!("realm {}", realm_id)))
    }
}

fn bucket_exists(conn: &Connection, realm_id: &RealmId, revision: u64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM vlob_encryption_revisions
             WHERE realm_id = ?1 AND encryption_revision = ?2",
            params![realm_id.as_bytes().as_slice(), revision as i64],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn count_at(conn: &Connection, realm_id: &RealmId, revision: u64) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vlob_atoms WHERE realm_id = ?1 AND encryption_revision = ?2",
        params![realm_id.as_bytes().as_slice(), revision as i64],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn write_status(tx: &Transaction<'_>, realm_id: &RealmId, status: &RealmStatus) -> Result<()> {
    let updated = tx.execute(
        "UPDATE realms SET encryption_revision = ?2, maintenance_type = ?3,
                maintenance_started_on = ?4, maintenance_started_by = ?5
         WHERE realm_id = ?1",
        params![
            realm_id.as_bytes().as_slice(),
            status.encryption_revision as i64,
            status.maintenance_type.map(MaintenanceType::as_str),
            status.maintenance_started_on.map(|t| t.as_millis()),
            status.maintenance_started_by.as_ref().map(|d| d.to_string()),
        ],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound(format!("realm {}", realm_id)));
    }
    Ok(())
}

fn insert_grant(conn: &Connection, grant: &RoleGrant) -> Result<()> {
    conn.execute(
        "INSERT INTO realm_user_roles (realm_id, user_id, role, granted_by, granted_on, certificate)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            grant.realm_id.as_bytes().as_slice(),
            grant.user_id.as_str(),
            role_to_sql(grant.role),
            grant.granted_by.as_ref().map(|d| d.to_string()),
            grant.granted_on.as_millis(),
            grant.certificate,
        ],
    )?;
    Ok(())
}

fn insert_atom(conn: &Connection, atom: &VlobAtom) -> Result<()> {
    conn.execute(
        "INSERT INTO vlob_atoms (entry_id, encryption_revision, version, realm_id, blob, size,
                                 author, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            atom.entry_id.as_bytes().as_slice(),
            atom.encryption_revision as i64,
            atom.version as i64,
            atom.realm_id.as_bytes().as_slice(),
            atom.blob,
            atom.blob.len() as i64,
            atom.author.to_string(),
            atom.timestamp.as_millis(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl RealmStore for SqliteStore {
    async fn create_realm(&self, realm_id: &RealmId, root_grant: &RoleGrant) -> Result<()> {
        let realm_id = *realm_id;
        let root_grant = root_grant.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if realm_exists(&tx, &realm_id)? {
                return Err(StoreError::AlreadyExists(format!("realm {}", realm_id)));
            }
            let status = RealmStatus::initial();
            tx.execute(
                "INSERT INTO realms (realm_id, encryption_revision) VALUES (?1, ?2)",
                params![realm_id.as_bytes().as_slice(), status.encryption_revision as i64],
            )?;
            tx.execute(
                "INSERT INTO vlob_encryption_revisions (realm_id, encryption_revision)
                 VALUES (?1, ?2)",
                params![realm_id.as_bytes().as_slice(), status.encryption_revision as i64],
            )?;
            insert_grant(&tx, &root_grant)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_realm_status(&self, realm_id: &RealmId) -> Result<Option<RealmStatus>> {
        let realm_id = *realm_id;
        self.run(move |conn| {
            conn.query_row(
                "SELECT encryption_revision, maintenance_type, maintenance_started_on,
                        maintenance_started_by
                 FROM realms WHERE realm_id = ?1",
                params![realm_id.as_bytes().as_slice()],
                |row| {
                    let maintenance_type: Option<String> = row.get(1)?;
                    Ok(RealmStatus {
                        encryption_revision: get_u64(row, 0)?,
                        maintenance_type: maintenance_type.map(|_| MaintenanceType::Reencryption),
                        maintenance_started_on: row
                            .get::<_, Option<i64>>(2)?
                            .map(Timestamp::from_millis),
                        maintenance_started_by: get_opt_device_id(row, 3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn set_realm_status(&self, realm_id: &RealmId, status: &RealmStatus) -> Result<()> {
        let realm_id = *realm_id;
        let status = status.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            write_status(&tx, &realm_id, &status)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn start_reencryption(&self, realm_id: &RealmId, status: &RealmStatus) -> Result<()> {
        let realm_id = *realm_id;
        let status = status.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            write_status(&tx, &realm_id, &status)?;
            tx.execute(
                "INSERT OR IGNORE INTO vlob_encryption_revisions (realm_id, encryption_revision)
                 VALUES (?1, ?2)",
                params![realm_id.as_bytes().as_slice(), status.encryption_revision as i64],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_realm_ids_for_user(&self, user_id: &UserId) -> Result<Vec<RealmId>> {
        let user_id = user_id.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT realm_id FROM realm_user_roles WHERE user_id = ?1
                 ORDER BY realm_id",
            )?;
            let rows = stmt.query_map(params![user_id.as_str()], |row| {
                Ok(RealmId::from_bytes(get_bytes16(row, 0)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn append_role_grant(&self, grant: &RoleGrant) -> Result<()> {
        let grant = grant.clone();
        self.run(move |conn| {
            require_realm(conn, &grant.realm_id)?;
            insert_grant(conn, &grant)
        })
        .await
    }

    async fn get_role_grants(
        &self,
        realm_id: &RealmId,
        since: Option<Timestamp>,
    ) -> Result<Vec<RoleGrant>> {
        let realm_id = *realm_id;
        self.run(move |conn| {
            require_realm(conn, &realm_id)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM realm_user_roles
                 WHERE realm_id = ?1 AND (?2 IS NULL OR granted_on > ?2)
                 ORDER BY granted_on, id",
                GRANT_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![realm_id.as_bytes().as_slice(), since.map(|t| t.as_millis())],
                row_to_grant,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn create_vlob_revision_bucket(&self, realm_id: &RealmId, revision: u64) -> Result<()> {
        let realm_id = *realm_id;
        self.run(move |conn| {
            require_realm(conn, &realm_id)?;
            conn.execute(
                "INSERT OR IGNORE INTO vlob_encryption_revisions (realm_id, encryption_revision)
                 VALUES (?1, ?2)",
                params![realm_id.as_bytes().as_slice(), revision as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_items_at_revision(
        &self,
        realm_id: &RealmId,
        revision: u64,
    ) -> Result<Option<u64>> {
        let realm_id = *realm_id;
        self.run(move |conn| {
            require_realm(conn, &realm_id)?;
            if !bucket_exists(conn, &realm_id, revision)? {
                return Ok(None);
            }
            Ok(Some(count_at(conn, &realm_id, revision)?))
        })
        .await
    }

    async fn get_vlob_realm(&self, entry_id: &EntryId) -> Result<Option<RealmId>> {
        let entry_id = *entry_id;
        self.run(move |conn| {
            conn.query_row(
                "SELECT realm_id FROM vlobs WHERE entry_id = ?1",
                params![entry_id.as_bytes().as_slice()],
                |row| Ok(RealmId::from_bytes(get_bytes16(row, 0)?)),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn insert_vlob_atom(&self, atom: &VlobAtom) -> Result<()> {
        let atom = atom.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            require_realm(&tx, &atom.realm_id)?;
            if !bucket_exists(&tx, &atom.realm_id, atom.encryption_revision)? {
                return Err(StoreError::NotFound(format!(
                    "revision {} bucket of realm {}",
                    atom.encryption_revision, atom.realm_id
                )));
            }

            let owner: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT realm_id FROM vlobs WHERE entry_id = ?1",
                    params![atom.entry_id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            match owner {
                Some(owner) if owner.as_slice() != atom.realm_id.as_bytes().as_slice() => {
                    return Err(StoreError::InvalidData(format!(
                        "vlob {} belongs to another realm",
                        atom.entry_id
                    )));
                }
                Some(_) => {}
                None => {
                    tx.execute(
                        "INSERT INTO vlobs (entry_id, realm_id) VALUES (?1, ?2)",
                        params![
                            atom.entry_id.as_bytes().as_slice(),
                            atom.realm_id.as_bytes().as_slice()
                        ],
                    )?;
                }
            }

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM vlob_atoms
                     WHERE entry_id = ?1 AND encryption_revision = ?2 AND version = ?3",
                    params![
                        atom.entry_id.as_bytes().as_slice(),
                        atom.encryption_revision as i64,
                        atom.version as i64
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "vlob {} version {}",
                    atom.entry_id, atom.version
                )));
            }

            insert_atom(&tx, &atom)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn read_vlob_atom(
        &self,
        entry_id: &EntryId,
        revision: u64,
        version: Option<u64>,
        timestamp: Option<Timestamp>,
    ) -> Result<Option<VlobAtom>> {
        let entry_id = *entry_id;
        self.run(move |conn| {
            let (filter, bound) = match (version, timestamp) {
                (Some(version), _) => ("AND version = ?3", Some(version as i64)),
                (None, Some(timestamp)) => ("AND timestamp <= ?3", Some(timestamp.as_millis())),
                (None, None) => ("AND ?3 IS NULL", None),
            };
            conn.query_row(
                &format!(
                    "SELECT {} FROM vlob_atoms
                     WHERE entry_id = ?1 AND encryption_revision = ?2 {}
                     ORDER BY version DESC LIMIT 1",
                    ATOM_COLUMNS, filter
                ),
                params![entry_id.as_bytes().as_slice(), revision as i64, bound],
                row_to_atom,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_vlob_atoms(&self, entry_id: &EntryId, revision: u64) -> Result<Vec<VlobAtom>> {
        let entry_id = *entry_id;
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM vlob_atoms
                 WHERE entry_id = ?1 AND encryption_revision = ?2
                 ORDER BY version",
                ATOM_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![entry_id.as_bytes().as_slice(), revision as i64],
                row_to_atom,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn get_reencryption_batch(
        &self,
        realm_id: &RealmId,
        revision: u64,
        size: usize,
    ) -> Result<Vec<ReencryptionItem>> {
        let realm_id = *realm_id;
        self.run(move |conn| {
            require_realm(conn, &realm_id)?;
            let mut stmt = conn.prepare(
                "SELECT old.entry_id, old.version, old.blob
                 FROM vlob_atoms AS old
                 JOIN vlobs ON vlobs.entry_id = old.entry_id
                 WHERE old.realm_id = ?1 AND old.encryption_revision = ?2
                   AND NOT EXISTS (
                       SELECT 1 FROM vlob_atoms AS new
                       WHERE new.entry_id = old.entry_id
                         AND new.version = old.version
                         AND new.encryption_revision = ?3
                   )
                 ORDER BY vlobs.rowid, old.version
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                params![
                    realm_id.as_bytes().as_slice(),
                    revision.saturating_sub(1) as i64,
                    revision as i64,
                    size as i64
                ],
                |row| {
                    Ok(ReencryptionItem {
                        entry_id: EntryId::from_bytes(get_bytes16(row, 0)?),
                        version: get_u64(row, 1)?,
                        blob: row.get(2)?,
                    })
                },
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn save_reencryption_batch(
        &self,
        realm_id: &RealmId,
        revision: u64,
        batch: &[ReencryptionItem],
    ) -> Result<(u64, u64)> {
        let realm_id = *realm_id;
        let batch = batch.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            require_realm(&tx, &realm_id)?;
            if !bucket_exists(&tx, &realm_id, revision)? {
                return Err(StoreError::NotFound(format!(
                    "revision {} bucket of realm {}",
                    revision, realm_id
                )));
            }
            let previous = revision.saturating_sub(1);

            for item in &batch {
                tx.execute(
                    "INSERT OR IGNORE INTO vlob_atoms (entry_id, encryption_revision, version,
                                                       realm_id, blob, size, author, timestamp)
                     SELECT entry_id, ?3, version, realm_id, ?4, ?5, author, timestamp
                     FROM vlob_atoms
                     WHERE realm_id = ?1 AND entry_id = ?2 AND encryption_revision = ?6
                       AND version = ?7",
                    params![
                        realm_id.as_bytes().as_slice(),
                        item.entry_id.as_bytes().as_slice(),
                        revision as i64,
                        item.blob,
                        item.blob.len() as i64,
                        previous as i64,
                        item.version as i64,
                    ],
                )?;
            }

            let total = count_at(&tx, &realm_id, previous)?;
            let done = count_at(&tx, &realm_id, revision)?;
            tx.commit()?;
            Ok((total, done))
        })
        .await
    }

    async fn create_block(&self, block: &StoredBlock) -> Result<()> {
        let block = block.clone();
        self.run(move |conn| {
            require_realm(conn, &block.realm_id)?;
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM blocks WHERE block_id = ?1",
                    params![block.block_id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(StoreError::AlreadyExists(format!("block {}", block.block_id)));
            }
            conn.execute(
                "INSERT INTO blocks (block_id, realm_id, author, created_on, data, size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    block.block_id.as_bytes().as_slice(),
                    block.realm_id.as_bytes().as_slice(),
                    block.author.to_string(),
                    block.created_on.as_millis(),
                    block.data,
                    block.data.len() as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn read_block(&self, block_id: &BlockId) -> Result<Option<StoredBlock>> {
        let block_id = *block_id;
        self.run(move |conn| {
            conn.query_row(
                "SELECT block_id, realm_id, author, created_on, data FROM blocks
                 WHERE block_id = ?1",
                params![block_id.as_bytes().as_slice()],
                |row| {
                    Ok(StoredBlock {
                        block_id: BlockId::from_bytes(get_bytes16(row, 0)?),
                        realm_id: RealmId::from_bytes(get_bytes16(row, 1)?),
                        author: get_device_id(row, 2)?,
                        created_on: get_timestamp(row, 3)?,
                        data: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_realm_stats(&self, realm_id: &RealmId) -> Result<RealmStats> {
        let realm_id = *realm_id;
        self.run(move |conn| {
            require_realm(conn, &realm_id)?;
            let blocks_size: i64 = conn.query_row(
                "SELECT COALESCE(SUM(size), 0) FROM blocks WHERE realm_id = ?1",
                params![realm_id.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            let vlobs_size: i64 = conn.query_row(
                "SELECT COALESCE(SUM(size), 0) FROM vlob_atoms WHERE realm_id = ?1",
                params![realm_id.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            Ok(RealmStats {
                blocks_size: blocks_size as u64,
                vlobs_size: vlobs_size as u64,
            })
        })
        .await
    }
}

fn insert_device(conn: &Connection, device: &DeviceEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO devices (device_id, user_id, verify_key, device_certificate,
                              device_certifier, created_on)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            device.device_id.to_string(),
            device.device_id.user_id().as_str(),
            device.verify_key.as_bytes().as_slice(),
            device.device_certificate,
            device.device_certifier.as_ref().map(|d| d.to_string()),
            device.created_on.as_millis(),
        ],
    )?;
    Ok(())
}

fn device_exists(conn: &Connection, device_id: &DeviceId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM devices WHERE device_id = ?1",
            params![device_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn user_exists(conn: &Connection, user_id: &UserId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE user_id = ?1",
            params![user_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl DirectoryStore for SqliteStore {
    async fn create_user(&self, user: &UserEntry, first_device: &DeviceEntry) -> Result<()> {
        let user = user.clone();
        let first_device = first_device.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if user_exists(&tx, &user.user_id)? {
                return Err(StoreError::AlreadyExists(format!("user {}", user.user_id)));
            }
            if device_exists(&tx, &first_device.device_id)? {
                return Err(StoreError::AlreadyExists(format!(
                    "device {}",
                    first_device.device_id
                )));
            }
            tx.execute(
                &format!(
                    "INSERT INTO users ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    USER_COLUMNS
                ),
                params![
                    user.user_id.as_str(),
                    user.profile.as_u8() as i64,
                    user.public_key.as_slice(),
                    user.user_certificate,
                    user.user_certifier.as_ref().map(|d| d.to_string()),
                    user.created_on.as_millis(),
                    user.revoked_on.map(|t| t.as_millis()),
                    user.revoked_user_certificate,
                    user.revoked_user_certifier.as_ref().map(|d| d.to_string()),
                ],
            )?;
            insert_device(&tx, &first_device)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn create_device(&self, device: &DeviceEntry) -> Result<()> {
        let device = device.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if !user_exists(&tx, device.device_id.user_id())? {
                return Err(StoreError::NotFound(format!(
                    "user {}",
                    device.device_id.user_id()
                )));
            }
            if device_exists(&tx, &device.device_id)? {
                return Err(StoreError::AlreadyExists(format!("device {}", device.device_id)));
            }
            insert_device(&tx, &device)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserEntry>> {
        let user_id = user_id.clone();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE user_id = ?1", USER_COLUMNS),
                params![user_id.as_str()],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<DeviceEntry>> {
        let device_id = device_id.clone();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM devices WHERE device_id = ?1", DEVICE_COLUMNS),
                params![device_id.to_string()],
                row_to_device,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_user_devices(&self, user_id: &UserId) -> Result<Vec<DeviceEntry>> {
        let user_id = user_id.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM devices WHERE user_id = ?1 ORDER BY device_id",
                DEVICE_COLUMNS
            ))?;
            let rows = stmt.query_map(params![user_id.as_str()], row_to_device)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn list_users(&self) -> Result<Vec<UserEntry>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users ORDER BY user_id",
                USER_COLUMNS
            ))?;
            let rows = stmt.query_map([], row_to_user)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn revoke_user(
        &self,
        user_id: &UserId,
        revoked_user_certificate: &[u8],
        revoked_user_certifier: &DeviceId,
        revoked_on: Timestamp,
    ) -> Result<()> {
        let user_id = user_id.clone();
        let certificate = revoked_user_certificate.to_vec();
        let certifier = revoked_user_certifier.to_string();
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE users SET revoked_on = ?2, revoked_user_certificate = ?3,
                                  revoked_user_certifier = ?4
                 WHERE user_id = ?1",
                params![user_id.as_str(), revoked_on.as_millis(), certificate, certifier],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("user {}", user_id)));
            }
            Ok(())
        })
        .await
    }

    async fn push_message(&self, recipient: &UserId, message: &StoredMessage) -> Result<()> {
        let recipient = recipient.clone();
        let message = message.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO messages (recipient, sender, timestamp, body) VALUES (?1, ?2, ?3, ?4)",
                params![
                    recipient.as_str(),
                    message.sender.to_string(),
                    message.timestamp.as_millis(),
                    message.body,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_messages(&self, recipient: &UserId, offset: usize) -> Result<Vec<StoredMessage>> {
        let recipient = recipient.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sender, timestamp, body FROM messages WHERE recipient = ?1
                 ORDER BY id LIMIT -1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![recipient.as_str(), offset as i64], |row| {
                Ok(StoredMessage {
                    sender: get_device_id(row, 0)?,
                    timestamp: get_timestamp(row, 1)?,
                    body: row.get(2)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }
}
