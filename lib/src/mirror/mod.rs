//! Off-chain read model of a permission manager, rebuilt by folding its
//! event log in ledger order.
//!
//! The projection is disposable: dropping the store and syncing from
//! genesis yields the same state.

mod sqlite;
mod store;

pub use sqlite::SqliteStore;
pub use store::{GroupRecord, MemoryStore, MirrorStore};

use crate::events::{DecodeError, EventCursor, LoggedEvent, PermissionEvent};
use crate::ledger::{EventSource, LedgerError};
use crate::mask::{GroupId, PUBLIC};
use alloy_primitives::{Address, Selector};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("replay stopped at {cursor}: {source}")]
    Decode {
        cursor: EventCursor,
        #[source]
        source: DecodeError,
    },
    #[error("log at {cursor} is not after the last folded log {last}")]
    OutOfOrder {
        cursor: EventCursor,
        last: EventCursor,
    },
    #[error("failed to fetch event log: {0}")]
    Source(#[from] LedgerError),
    #[error("mirror storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("mirror storage holds corrupt data: {0}")]
    Corrupt(String),
}

impl MirrorError {
    pub fn kind(&self) -> &str {
        match *self {
            MirrorError::Decode { .. } => "DecodeError",
            MirrorError::OutOfOrder { .. } => "DecodeError",
            MirrorError::Source(_) => "CollaboratorFailure",
            MirrorError::Storage(_) => "StorageFailure",
            MirrorError::Corrupt(_) => "StorageFailure",
        }
    }
}

/// Who may call a function, according to the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callers {
    Anyone,
    /// explicit members of the required groups, ascending
    Accounts(Vec<Address>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// permission events folded into the projection
    pub applied: usize,
    /// logs that only advanced the cursor
    pub skipped: usize,
    pub cursor: Option<EventCursor>,
}

/// Folds the logs of the manager at `manager` into `S`.
pub struct Mirror<S> {
    store: S,
    manager: Address,
}

impl<S: MirrorStore> Mirror<S> {
    pub fn new(store: S, manager: Address) -> Self {
        Mirror { store, manager }
    }

    pub fn manager(&self) -> Address {
        self.manager
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn cursor(&self) -> Result<Option<EventCursor>, MirrorError> {
        self.store.cursor()
    }

    /// Folds one log. Returns whether it changed the projection. Logs of
    /// other contracts and unknown events only advance the cursor; a
    /// malformed permission log stops the fold without advancing it.
    pub fn apply_log(&mut self, log: &LoggedEvent) -> Result<bool, MirrorError> {
        if let Some(last) = self.store.cursor()? {
            if log.cursor <= last {
                return Err(MirrorError::OutOfOrder {
                    cursor: log.cursor,
                    last,
                });
            }
        }

        if log.address != self.manager {
            self.store.apply(log.cursor, None)?;
            return Ok(false);
        }

        let event = PermissionEvent::from_log_data(&log.data).map_err(|source| {
            error!("malformed log at {}: {source}", log.cursor);
            MirrorError::Decode {
                cursor: log.cursor,
                source,
            }
        })?;
        match event {
            Some(event) => {
                debug!("{}: {event:?}", log.cursor);
                self.store.apply(log.cursor, Some(&event))?;
                Ok(true)
            }
            None => {
                self.store.apply(log.cursor, None)?;
                Ok(false)
            }
        }
    }

    /// Folds every log `source` has past the stored cursor.
    pub async fn sync<E: EventSource>(&mut self, source: &E) -> Result<SyncReport, MirrorError> {
        let mut report = SyncReport {
            cursor: self.store.cursor()?,
            ..Default::default()
        };
        loop {
            let page = source.get_event_log(report.cursor).await?;
            if page.is_empty() {
                break;
            }
            for log in &page {
                if self.apply_log(log)? {
                    report.applied += 1;
                } else {
                    report.skipped += 1;
                }
                report.cursor = Some(log.cursor);
            }
        }
        info!(
            "mirror synced: {} applied, {} skipped, at {}",
            report.applied,
            report.skipped,
            report
                .cursor
                .map_or_else(|| "genesis".to_string(), |c| c.to_string())
        );
        Ok(report)
    }

    pub fn group(&self, id: GroupId) -> Result<Option<GroupRecord>, MirrorError> {
        self.store.group(id)
    }

    pub fn membership(&self, account: Address) -> Result<Vec<GroupId>, MirrorError> {
        self.store.membership(account)
    }

    pub fn requirement(
        &self,
        target: Address,
        selector: Selector,
    ) -> Result<Option<Vec<GroupId>>, MirrorError> {
        Ok(self
            .store
            .requirement(target, selector)?
            .map(|mask| mask.to_vec()))
    }

    /// Who can call `selector` on `target`. An unset or empty requirement
    /// is open, as is one that includes PUBLIC.
    pub fn callers(&self, target: Address, selector: Selector) -> Result<Callers, MirrorError> {
        let required = match self.store.requirement(target, selector)? {
            Some(mask) if !mask.is_empty() && !mask.contains(PUBLIC) => mask,
            _ => return Ok(Callers::Anyone),
        };
        let mut accounts = BTreeSet::new();
        for group in required.groups() {
            accounts.extend(self.store.members_of(group)?);
        }
        Ok(Callers::Accounts(accounts.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::Mask;
    use alloy_primitives::{Bytes, LogData, B256};

    fn manager() -> Address {
        Address::repeat_byte(0x11)
    }

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn log(block: u64, event: PermissionEvent) -> LoggedEvent {
        LoggedEvent {
            cursor: EventCursor {
                block,
                tx_index: 0,
                log_index: 0,
            },
            address: manager(),
            data: event.to_log_data(),
        }
    }

    #[test]
    fn test_rejects_stale_logs() {
        let mut mirror = Mirror::new(MemoryStore::new(), manager());
        let added = log(
            2,
            PermissionEvent::GroupAdded {
                group: 1,
                account: alice(),
            },
        );
        assert!(mirror.apply_log(&added).unwrap());
        let err = mirror.apply_log(&added).unwrap_err();
        assert!(matches!(err, MirrorError::OutOfOrder { .. }));
        assert_eq!(err.kind(), "DecodeError");
    }

    #[test]
    fn test_foreign_logs_only_advance_cursor() {
        let mut mirror = Mirror::new(MemoryStore::new(), manager());
        let mut foreign = log(
            3,
            PermissionEvent::GroupAdded {
                group: 1,
                account: alice(),
            },
        );
        foreign.address = Address::repeat_byte(0x99);
        assert!(!mirror.apply_log(&foreign).unwrap());
        assert!(mirror.membership(alice()).unwrap().is_empty());
        assert_eq!(mirror.cursor().unwrap(), Some(foreign.cursor));
    }

    #[test]
    fn test_unknown_event_is_skipped() {
        let mut mirror = Mirror::new(MemoryStore::new(), manager());
        let other = LoggedEvent {
            cursor: EventCursor::default(),
            address: manager(),
            data: LogData::new_unchecked(vec![B256::repeat_byte(0x42)], Bytes::new()),
        };
        assert!(!mirror.apply_log(&other).unwrap());
        assert_eq!(mirror.cursor().unwrap(), Some(EventCursor::default()));
    }

    #[test]
    fn test_callers() {
        let mut mirror = Mirror::new(MemoryStore::new(), manager());
        let target = Address::repeat_byte(0x70);
        let mint = Selector::from([0x40, 0xc1, 0x0f, 0x19]);
        assert_eq!(mirror.callers(target, mint).unwrap(), Callers::Anyone);

        let bob = Address::repeat_byte(0xb0);
        let events = [
            PermissionEvent::GroupAdded {
                group: 1,
                account: bob,
            },
            PermissionEvent::GroupAdded {
                group: 2,
                account: alice(),
            },
            PermissionEvent::GroupAdded {
                group: 1,
                account: alice(),
            },
            PermissionEvent::Requirements {
                target,
                selector: mint,
                groups: Mask::from_groups([1, 2]),
            },
        ];
        for (block, event) in events.into_iter().enumerate() {
            mirror.apply_log(&log(block as u64 + 1, event)).unwrap();
        }
        let mut expected = vec![alice(), bob];
        expected.sort();
        assert_eq!(
            mirror.callers(target, mint).unwrap(),
            Callers::Accounts(expected)
        );

        mirror
            .apply_log(&log(
                10,
                PermissionEvent::Requirements {
                    target,
                    selector: mint,
                    groups: Mask::from_groups([1, PUBLIC]),
                },
            ))
            .unwrap();
        assert_eq!(mirror.callers(target, mint).unwrap(), Callers::Anyone);
    }
}
