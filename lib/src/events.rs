use crate::abi;
use crate::mask::{GroupId, Mask};
use alloy_primitives::{Address, LogData, Selector};
use alloy_sol_types::SolEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A state change of the permission manager, as carried in its event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum PermissionEvent {
    GroupAdded {
        group: GroupId,
        account: Address,
    },
    GroupRemoved {
        group: GroupId,
        account: Address,
    },
    GroupAdmins {
        group: GroupId,
        admins: Mask,
    },
    Requirements {
        target: Address,
        selector: Selector,
        groups: Mask,
    },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("log carries no topics")]
    Anonymous,
    #[error("malformed {event} log: {source}")]
    Abi {
        event: &'static str,
        #[source]
        source: alloy_sol_types::Error,
    },
    #[error("{event} log has an indexed topic that does not encode its field")]
    NonCanonicalTopic { event: &'static str },
}

impl PermissionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PermissionEvent::GroupAdded { .. } => "GroupAdded",
            PermissionEvent::GroupRemoved { .. } => "GroupRemoved",
            PermissionEvent::GroupAdmins { .. } => "GroupAdmins",
            PermissionEvent::Requirements { .. } => "Requirements",
        }
    }

    pub fn to_log_data(&self) -> LogData {
        match *self {
            PermissionEvent::GroupAdded { group, account } => {
                abi::GroupAdded { group, account }.encode_log_data()
            }
            PermissionEvent::GroupRemoved { group, account } => {
                abi::GroupRemoved { group, account }.encode_log_data()
            }
            PermissionEvent::GroupAdmins { group, admins } => abi::GroupAdmins {
                group,
                admins: admins.as_u256(),
            }
            .encode_log_data(),
            PermissionEvent::Requirements {
                target,
                selector,
                groups,
            } => abi::Requirements {
                target,
                selector,
                groups: groups.as_u256(),
            }
            .encode_log_data(),
        }
    }

    /// Decodes a manager log. `Ok(None)` means the log is some other event
    /// the mirror does not track; a known signature with a bad body is an
    /// error.
    pub fn from_log_data(log: &LogData) -> Result<Option<Self>, DecodeError> {
        let Some(topic0) = log.topics().first() else {
            return Err(DecodeError::Anonymous);
        };

        let event = match *topic0 {
            abi::GroupAdded::SIGNATURE_HASH => {
                let decoded = abi::GroupAdded::decode_log_data(log, true)
                    .map_err(|source| DecodeError::Abi {
                        event: "GroupAdded",
                        source,
                    })?;
                PermissionEvent::GroupAdded {
                    group: decoded.group,
                    account: decoded.account,
                }
            }
            abi::GroupRemoved::SIGNATURE_HASH => {
                let decoded = abi::GroupRemoved::decode_log_data(log, true)
                    .map_err(|source| DecodeError::Abi {
                        event: "GroupRemoved",
                        source,
                    })?;
                PermissionEvent::GroupRemoved {
                    group: decoded.group,
                    account: decoded.account,
                }
            }
            abi::GroupAdmins::SIGNATURE_HASH => {
                let decoded = abi::GroupAdmins::decode_log_data(log, true)
                    .map_err(|source| DecodeError::Abi {
                        event: "GroupAdmins",
                        source,
                    })?;
                PermissionEvent::GroupAdmins {
                    group: decoded.group,
                    admins: decoded.admins.into(),
                }
            }
            abi::Requirements::SIGNATURE_HASH => {
                let decoded = abi::Requirements::decode_log_data(log, true)
                    .map_err(|source| DecodeError::Abi {
                        event: "Requirements",
                        source,
                    })?;
                PermissionEvent::Requirements {
                    target: decoded.target,
                    selector: decoded.selector,
                    groups: decoded.groups.into(),
                }
            }
            _ => return Ok(None),
        };

        // indexed fields narrower than a word decode by truncation, so a topic
        // with stray high bits would otherwise yield a different field
        if event.to_log_data().topics() != log.topics() {
            return Err(DecodeError::NonCanonicalTopic {
                event: event.name(),
            });
        }

        Ok(Some(event))
    }
}

/// Position of a log in the ledger's total order.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventCursor {
    pub block: u64,
    pub tx_index: u64,
    pub log_index: u64,
}

impl std::fmt::Display for EventCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.block, self.tx_index, self.log_index)
    }
}

/// A raw log as delivered by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub cursor: EventCursor,
    pub address: Address,
    pub data: LogData,
}
