use super::MirrorError;
use crate::events::{EventCursor, PermissionEvent};
use crate::mask::{GroupId, Mask};
use alloy_primitives::{Address, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Projection of a group: its admin groups, ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub admins: Vec<GroupId>,
}

/// Backing store of a mirror. Every `apply` must land the event's effects
/// and the new cursor together or not at all.
pub trait MirrorStore {
    /// Position of the last folded log, `None` before the first.
    fn cursor(&self) -> Result<Option<EventCursor>, MirrorError>;

    /// Folds one event at `cursor`. `None` only advances the cursor.
    fn apply(
        &mut self,
        cursor: EventCursor,
        event: Option<&PermissionEvent>,
    ) -> Result<(), MirrorError>;

    fn group(&self, id: GroupId) -> Result<Option<GroupRecord>, MirrorError>;

    /// Explicit groups of `account`, ascending.
    fn membership(&self, account: Address) -> Result<Vec<GroupId>, MirrorError>;

    fn requirement(&self, target: Address, selector: Selector)
        -> Result<Option<Mask>, MirrorError>;

    fn members_of(&self, group: GroupId) -> Result<Vec<Address>, MirrorError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStore {
    cursor: Option<EventCursor>,
    groups: BTreeMap<GroupId, Mask>,
    memberships: BTreeSet<(Address, GroupId)>,
    requirements: BTreeMap<(Address, Selector), Mask>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MirrorStore for MemoryStore {
    fn cursor(&self) -> Result<Option<EventCursor>, MirrorError> {
        Ok(self.cursor)
    }

    fn apply(
        &mut self,
        cursor: EventCursor,
        event: Option<&PermissionEvent>,
    ) -> Result<(), MirrorError> {
        match event {
            Some(PermissionEvent::GroupAdded { group, account }) => {
                self.memberships.insert((*account, *group));
            }
            Some(PermissionEvent::GroupRemoved { group, account }) => {
                self.memberships.remove(&(*account, *group));
            }
            Some(PermissionEvent::GroupAdmins { group, admins }) => {
                self.groups.insert(*group, *admins);
            }
            Some(PermissionEvent::Requirements {
                target,
                selector,
                groups,
            }) => {
                self.requirements.insert((*target, *selector), *groups);
            }
            None => {}
        }
        self.cursor = Some(cursor);
        Ok(())
    }

    fn group(&self, id: GroupId) -> Result<Option<GroupRecord>, MirrorError> {
        Ok(self.groups.get(&id).map(|admins| GroupRecord {
            id,
            admins: admins.to_vec(),
        }))
    }

    fn membership(&self, account: Address) -> Result<Vec<GroupId>, MirrorError> {
        Ok(self
            .memberships
            .range((account, GroupId::MIN)..=(account, GroupId::MAX))
            .map(|(_, group)| *group)
            .collect())
    }

    fn requirement(
        &self,
        target: Address,
        selector: Selector,
    ) -> Result<Option<Mask>, MirrorError> {
        Ok(self.requirements.get(&(target, selector)).copied())
    }

    fn members_of(&self, group: GroupId) -> Result<Vec<Address>, MirrorError> {
        Ok(self
            .memberships
            .iter()
            .filter(|(_, g)| *g == group)
            .map(|(account, _)| *account)
            .collect())
    }
}
