//! Interfaces to the ledger that hosts the permission manager and the
//! components it protects. The core only ever talks to these traits; the
//! in-process [`LocalChain`] implements all of them.

use crate::artifacts::ProxyKind;
use crate::engine::{EngineError, Operation};
use crate::events::{EventCursor, LoggedEvent};
use crate::mask::{GroupId, Mask};
use alloy_primitives::{Address, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod local;

pub use local::{ChainState, LocalChain, EVENT_PAGE_SIZE};

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerError {
    #[error("transaction reverted: {0}")]
    Reverted(#[from] EngineError),
    #[error("no contract at {0}")]
    NoContract(Address),
    #[error("contract at {0} is not a permission manager")]
    NotManager(Address),
    #[error("unknown code reference {0}")]
    UnknownCode(String),
    #[error("invalid constructor arguments for {code}: {reason}")]
    BadConstructorArgs { code: String, reason: String },
    #[error("{0}")]
    Transport(String),
}

impl LedgerError {
    pub fn kind(&self) -> &str {
        match *self {
            LedgerError::Reverted(ref e) => e.kind(),
            LedgerError::NoContract(_) => "NoContract",
            LedgerError::NotManager(_) => "NotManager",
            LedgerError::UnknownCode(_) => "UnknownCode",
            LedgerError::BadConstructorArgs { .. } => "BadConstructorArgs",
            LedgerError::Transport(_) => "Transport",
        }
    }
}

/// What the deployer needs to bring a component to life.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploySpec {
    pub code: String,
    pub constructor_args: Vec<String>,
    pub proxy_kind: ProxyKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub block: u64,
    pub tx_index: u64,
    pub logs: usize,
}

#[allow(async_fn_in_trait)]
pub trait Ledger {
    /// Executes all operations in one transaction; all land or none do.
    async fn submit_batch(&self, manager: Address, ops: &[Operation])
        -> Result<Receipt, LedgerError>;

    async fn read_group_admins(&self, manager: Address, group: GroupId)
        -> Result<Mask, LedgerError>;

    /// The stored mask; empty when no requirement was ever set.
    async fn read_requirement(
        &self,
        manager: Address,
        target: Address,
        selector: Selector,
    ) -> Result<Mask, LedgerError>;

    async fn read_membership(&self, manager: Address, account: Address)
        -> Result<Mask, LedgerError>;
}

#[allow(async_fn_in_trait)]
pub trait Deployer {
    async fn deploy(&self, spec: &DeploySpec) -> Result<Address, LedgerError>;
}

#[allow(async_fn_in_trait)]
pub trait EventSource {
    /// Logs strictly after `from` (from genesis when `None`), in ledger
    /// order. A page may be short; an empty page means caught up.
    async fn get_event_log(&self, from: Option<EventCursor>)
        -> Result<Vec<LoggedEvent>, LedgerError>;
}

/// A recorded log replays like a live ledger.
impl EventSource for Vec<LoggedEvent> {
    async fn get_event_log(
        &self,
        from: Option<EventCursor>,
    ) -> Result<Vec<LoggedEvent>, LedgerError> {
        Ok(self
            .iter()
            .filter(|log| from.map_or(true, |cursor| log.cursor > cursor))
            .take(EVENT_PAGE_SIZE)
            .cloned()
            .collect())
    }
}
