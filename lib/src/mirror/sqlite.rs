use super::store::{GroupRecord, MirrorStore};
use super::MirrorError;
use crate::events::{EventCursor, PermissionEvent};
use crate::mask::{GroupId, Mask};
use alloy_primitives::{Address, Selector};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS group_admins (
        id     INTEGER PRIMARY KEY,
        admins BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS memberships (
        account  BLOB NOT NULL,
        group_id INTEGER NOT NULL,
        PRIMARY KEY (account, group_id)
    );
    CREATE TABLE IF NOT EXISTS requirements (
        target   BLOB NOT NULL,
        selector BLOB NOT NULL,
        required BLOB NOT NULL,
        PRIMARY KEY (target, selector)
    );
";

const CURSOR_KEY: &str = "cursor";
const ADDRESS_BYTES: usize = 20;

/// Mirror projection in SQLite. Each event runs in its own transaction
/// together with the cursor update, so a crash never leaves the
/// projection ahead of or behind its cursor.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, MirrorError> {
        debug!("opening mirror database {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, MirrorError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, MirrorError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn })
    }
}

fn address(bytes: &[u8]) -> Result<Address, MirrorError> {
    if bytes.len() != ADDRESS_BYTES {
        return Err(MirrorError::Corrupt(format!(
            "address of {} bytes",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(bytes))
}

fn mask(bytes: &[u8]) -> Result<Mask, MirrorError> {
    Mask::from_be_slice(bytes).map_err(|e| MirrorError::Corrupt(e.to_string()))
}

impl MirrorStore for SqliteStore {
    fn cursor(&self) -> Result<Option<EventCursor>, MirrorError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![CURSOR_KEY],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| serde_json::from_str(&v).map_err(|e| MirrorError::Corrupt(e.to_string())))
            .transpose()
    }

    fn apply(
        &mut self,
        cursor: EventCursor,
        event: Option<&PermissionEvent>,
    ) -> Result<(), MirrorError> {
        let tx = self.conn.transaction()?;
        match event {
            Some(PermissionEvent::GroupAdded { group, account }) => {
                tx.execute(
                    "INSERT OR IGNORE INTO memberships (account, group_id) VALUES (?1, ?2)",
                    params![account.as_slice(), group],
                )?;
            }
            Some(PermissionEvent::GroupRemoved { group, account }) => {
                tx.execute(
                    "DELETE FROM memberships WHERE account = ?1 AND group_id = ?2",
                    params![account.as_slice(), group],
                )?;
            }
            Some(PermissionEvent::GroupAdmins { group, admins }) => {
                tx.execute(
                    "INSERT OR REPLACE INTO group_admins (id, admins) VALUES (?1, ?2)",
                    params![group, admins.to_be_bytes().as_slice()],
                )?;
            }
            Some(PermissionEvent::Requirements {
                target,
                selector,
                groups,
            }) => {
                tx.execute(
                    "INSERT OR REPLACE INTO requirements (target, selector, required) VALUES (?1, ?2, ?3)",
                    params![
                        target.as_slice(),
                        selector.as_slice(),
                        groups.to_be_bytes().as_slice()
                    ],
                )?;
            }
            None => {}
        }
        let cursor =
            serde_json::to_string(&cursor).map_err(|e| MirrorError::Corrupt(e.to_string()))?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![CURSOR_KEY, cursor],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn group(&self, id: GroupId) -> Result<Option<GroupRecord>, MirrorError> {
        let admins: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT admins FROM group_admins WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        admins
            .map(|bytes| {
                Ok(GroupRecord {
                    id,
                    admins: mask(&bytes)?.to_vec(),
                })
            })
            .transpose()
    }

    fn membership(&self, account: Address) -> Result<Vec<GroupId>, MirrorError> {
        let mut stmt = self.conn.prepare(
            "SELECT group_id FROM memberships WHERE account = ?1 ORDER BY group_id",
        )?;
        let groups = stmt
            .query_map(params![account.as_slice()], |row| row.get(0))?
            .collect::<Result<Vec<GroupId>, _>>()?;
        Ok(groups)
    }

    fn requirement(
        &self,
        target: Address,
        selector: Selector,
    ) -> Result<Option<Mask>, MirrorError> {
        let groups: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT required FROM requirements WHERE target = ?1 AND selector = ?2",
                params![target.as_slice(), selector.as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        groups.map(|bytes| mask(&bytes)).transpose()
    }

    fn members_of(&self, group: GroupId) -> Result<Vec<Address>, MirrorError> {
        let mut stmt = self.conn.prepare(
            "SELECT account FROM memberships WHERE group_id = ?1 ORDER BY account",
        )?;
        let rows = stmt
            .query_map(params![group], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|bytes| address(bytes)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(block: u64) -> EventCursor {
        EventCursor {
            block,
            tx_index: 0,
            log_index: 0,
        }
    }

    #[test]
    fn test_cursor_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");
        let account = Address::repeat_byte(0xa1);

        {
            let mut store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.cursor().unwrap(), None);
            store
                .apply(
                    at(4),
                    Some(&PermissionEvent::GroupAdded {
                        group: 3,
                        account,
                    }),
                )
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.cursor().unwrap(), Some(at(4)));
        assert_eq!(store.membership(account).unwrap(), vec![3]);
        assert_eq!(store.members_of(3).unwrap(), vec![account]);
    }

    #[test]
    fn test_snapshots_overwrite() {
        let mut store = SqliteStore::in_memory().unwrap();
        let target = Address::repeat_byte(0x70);
        let selector = Selector::from([1, 2, 3, 4]);
        for (block, groups) in [(1, Mask::of(1)), (2, Mask::from_groups([2, 255]))] {
            store
                .apply(
                    at(block),
                    Some(&PermissionEvent::Requirements {
                        target,
                        selector,
                        groups,
                    }),
                )
                .unwrap();
        }
        assert_eq!(
            store.requirement(target, selector).unwrap(),
            Some(Mask::from_groups([2, 255]))
        );
        assert_eq!(store.requirement(target, Selector::ZERO).unwrap(), None);
    }

    #[test]
    fn test_removing_absent_membership_only_moves_cursor() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .apply(
                at(9),
                Some(&PermissionEvent::GroupRemoved {
                    group: 1,
                    account: Address::repeat_byte(1),
                }),
            )
            .unwrap();
        assert_eq!(store.cursor().unwrap(), Some(at(9)));
        assert!(store.members_of(1).unwrap().is_empty());
    }
}
