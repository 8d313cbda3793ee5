//! The permission manager's state machine.
//!
//! State is the triple (admin masks, memberships, requirements). It only
//! changes through the authorized operations below, and every effective
//! change produces exactly one [`PermissionEvent`] per touched record.

use crate::events::PermissionEvent;
use crate::mask::{GroupId, Mask, ADMIN, PUBLIC};
use alloy_primitives::{Address, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: Address, action: String },
}

impl EngineError {
    pub fn kind(&self) -> &str {
        match *self {
            EngineError::Unauthorized { .. } => "Unauthorized",
        }
    }
}

/// One mutating call on the manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    SetGroupAdmins {
        group: GroupId,
        admins: Vec<GroupId>,
    },
    AddGroup {
        account: Address,
        group: GroupId,
    },
    RemoveGroup {
        account: Address,
        group: GroupId,
    },
    SetRequirements {
        target: Address,
        selectors: Vec<Selector>,
        groups: Vec<GroupId>,
    },
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::SetGroupAdmins { group, admins } => {
                write!(f, "setGroupAdmins({group}, {admins:?})")
            }
            Operation::AddGroup { account, group } => write!(f, "addGroup({account}, {group})"),
            Operation::RemoveGroup { account, group } => {
                write!(f, "removeGroup({account}, {group})")
            }
            Operation::SetRequirements {
                target,
                selectors,
                groups,
            } => {
                let selectors = selectors
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "setRequirements({target}, [{selectors}], {groups:?})")
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEngine {
    /// group -> groups allowed to manage its members
    admins: BTreeMap<GroupId, Mask>,
    /// account -> explicit memberships (never includes the implicit PUBLIC bit)
    members: BTreeMap<Address, Mask>,
    /// target -> selector -> required groups
    requirements: BTreeMap<Address, BTreeMap<Selector, Mask>>,
}

impl PermissionEngine {
    /// A fresh manager whose deployer is the sole ADMIN member.
    pub fn new(root: Address) -> (Self, Vec<PermissionEvent>) {
        let mut engine = Self::default();
        engine.members.insert(root, Mask::of(ADMIN));
        let events = vec![PermissionEvent::GroupAdded {
            group: ADMIN,
            account: root,
        }];
        (engine, events)
    }

    /// Explicit memberships of `account`.
    pub fn membership(&self, account: &Address) -> Mask {
        self.members.get(account).copied().unwrap_or_default()
    }

    /// Explicit memberships plus PUBLIC.
    pub fn effective_mask(&self, account: &Address) -> Mask {
        self.membership(account).with(PUBLIC)
    }

    /// Stored admin mask of `group`; empty until first set.
    pub fn group_admins(&self, group: GroupId) -> Mask {
        self.admins.get(&group).copied().unwrap_or_default()
    }

    /// Stored requirement; empty when nothing was ever configured.
    pub fn requirement(&self, target: &Address, selector: &Selector) -> Mask {
        self.requirements
            .get(target)
            .and_then(|by_selector| by_selector.get(selector))
            .copied()
            .unwrap_or_default()
    }

    /// Unconfigured functions are open to everyone.
    pub fn check_access(&self, caller: &Address, target: &Address, selector: &Selector) -> bool {
        let required = match self.requirement(target, selector) {
            m if m.is_empty() => Mask::of(PUBLIC),
            m => m,
        };
        self.effective_mask(caller).intersects(required)
    }

    pub fn members_of(&self, group: GroupId) -> Vec<Address> {
        self.members
            .iter()
            .filter(|(_, mask)| mask.contains(group))
            .map(|(account, _)| *account)
            .collect()
    }

    fn can_manage(&self, caller: &Address, group: GroupId) -> bool {
        let admins = self.group_admins(group).with(ADMIN);
        self.effective_mask(caller).intersects(admins)
    }

    fn ensure_manages(&self, caller: &Address, group: GroupId) -> Result<(), EngineError> {
        if self.can_manage(caller, group) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                caller: *caller,
                action: format!("manage group {group}"),
            })
        }
    }

    pub fn set_group_admins(
        &mut self,
        caller: &Address,
        group: GroupId,
        admins: &[GroupId],
    ) -> Result<Vec<PermissionEvent>, EngineError> {
        self.ensure_manages(caller, group)?;

        let mask = Mask::from_groups(admins.iter().copied()).with(ADMIN);
        self.admins.insert(group, mask);
        Ok(vec![PermissionEvent::GroupAdmins {
            group,
            admins: mask,
        }])
    }

    pub fn add_group(
        &mut self,
        caller: &Address,
        account: Address,
        group: GroupId,
    ) -> Result<Vec<PermissionEvent>, EngineError> {
        self.ensure_manages(caller, group)?;

        let current = self.membership(&account);
        if current.contains(group) {
            return Ok(vec![]);
        }
        self.members.insert(account, current.with(group));
        Ok(vec![PermissionEvent::GroupAdded { group, account }])
    }

    pub fn remove_group(
        &mut self,
        caller: &Address,
        account: Address,
        group: GroupId,
    ) -> Result<Vec<PermissionEvent>, EngineError> {
        self.ensure_manages(caller, group)?;

        let current = self.membership(&account);
        if !current.contains(group) {
            return Ok(vec![]);
        }
        let remaining = current.without(group);
        if remaining.is_empty() {
            self.members.remove(&account);
        } else {
            self.members.insert(account, remaining);
        }
        Ok(vec![PermissionEvent::GroupRemoved { group, account }])
    }

    pub fn set_requirements(
        &mut self,
        caller: &Address,
        target: Address,
        selectors: &[Selector],
        groups: &[GroupId],
    ) -> Result<Vec<PermissionEvent>, EngineError> {
        if !self.membership(caller).contains(ADMIN) {
            return Err(EngineError::Unauthorized {
                caller: *caller,
                action: format!("set requirements on {target}"),
            });
        }

        let mask = Mask::from_groups(groups.iter().copied());
        let by_selector = self.requirements.entry(target).or_default();
        let mut events = Vec::with_capacity(selectors.len());
        for selector in selectors {
            by_selector.insert(*selector, mask);
            events.push(PermissionEvent::Requirements {
                target,
                selector: *selector,
                groups: mask,
            });
        }
        Ok(events)
    }

    pub fn apply(
        &mut self,
        caller: &Address,
        op: &Operation,
    ) -> Result<Vec<PermissionEvent>, EngineError> {
        match op {
            Operation::SetGroupAdmins { group, admins } => {
                self.set_group_admins(caller, *group, admins)
            }
            Operation::AddGroup { account, group } => self.add_group(caller, *account, *group),
            Operation::RemoveGroup { account, group } => {
                self.remove_group(caller, *account, *group)
            }
            Operation::SetRequirements {
                target,
                selectors,
                groups,
            } => self.set_requirements(caller, *target, selectors, groups),
        }
    }

    /// Applies `ops` in order, each authorized against the state left by the
    /// previous ones. Either every operation lands or none does.
    pub fn apply_batch(
        &mut self,
        caller: &Address,
        ops: &[Operation],
    ) -> Result<Vec<PermissionEvent>, EngineError> {
        let mut staged = self.clone();
        let mut events = Vec::new();
        for op in ops {
            events.extend(staged.apply(caller, op)?);
        }
        *self = staged;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPERATOR: GroupId = 1;
    const WHITELISTED: GroupId = 2;

    fn root() -> Address {
        Address::repeat_byte(0x01)
    }

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xb0)
    }

    fn token() -> Address {
        Address::repeat_byte(0x70)
    }

    fn mint() -> Selector {
        Selector::from([0x40, 0xc1, 0x0f, 0x19])
    }

    #[test]
    fn test_public_without_membership() {
        let (engine, _) = PermissionEngine::new(root());
        assert!(engine.membership(&alice()).is_empty());
        assert_eq!(engine.effective_mask(&alice()).to_vec(), vec![PUBLIC]);
    }

    #[test]
    fn test_constructor_grants_admin() {
        let (engine, events) = PermissionEngine::new(root());
        assert!(engine.membership(&root()).contains(ADMIN));
        assert_eq!(
            events,
            vec![PermissionEvent::GroupAdded {
                group: ADMIN,
                account: root()
            }]
        );
    }

    #[test]
    fn test_add_group_is_idempotent() {
        let (mut engine, _) = PermissionEngine::new(root());
        let first = engine.add_group(&root(), alice(), OPERATOR).unwrap();
        let second = engine.add_group(&root(), alice(), OPERATOR).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(engine.members_of(OPERATOR), vec![alice()]);
    }

    #[test]
    fn test_remove_absent_membership_is_noop() {
        let (mut engine, _) = PermissionEngine::new(root());
        let before = engine.clone();
        let events = engine.remove_group(&root(), alice(), OPERATOR).unwrap();
        assert!(events.is_empty());
        assert_eq!(engine, before);
    }

    #[test]
    fn test_set_group_admins_always_includes_admin() {
        let (mut engine, _) = PermissionEngine::new(root());
        engine.set_group_admins(&root(), WHITELISTED, &[OPERATOR]).unwrap();
        assert_eq!(engine.group_admins(WHITELISTED).to_vec(), vec![ADMIN, OPERATOR]);

        engine.set_group_admins(&root(), WHITELISTED, &[]).unwrap();
        assert_eq!(engine.group_admins(WHITELISTED).to_vec(), vec![ADMIN]);
    }

    #[test]
    fn test_delegated_admin_manages_members() {
        let (mut engine, _) = PermissionEngine::new(root());
        engine.set_group_admins(&root(), WHITELISTED, &[OPERATOR]).unwrap();
        engine.add_group(&root(), alice(), OPERATOR).unwrap();

        assert!(engine.add_group(&alice(), bob(), WHITELISTED).is_ok());
        assert!(engine.membership(&bob()).contains(WHITELISTED));

        // operators do not administer their own group
        let err = engine.add_group(&alice(), bob(), OPERATOR).unwrap_err();
        assert_eq!(err.kind(), "Unauthorized");
    }

    #[test]
    fn test_requirements_need_admin() {
        let (mut engine, _) = PermissionEngine::new(root());
        engine.add_group(&root(), alice(), OPERATOR).unwrap();
        let err = engine
            .set_requirements(&alice(), token(), &[mint()], &[OPERATOR])
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized { .. }));
    }

    #[test]
    fn test_requirement_last_write_wins() {
        let (mut engine, _) = PermissionEngine::new(root());
        engine
            .set_requirements(&root(), token(), &[mint()], &[OPERATOR, WHITELISTED])
            .unwrap();
        engine
            .set_requirements(&root(), token(), &[mint()], &[OPERATOR])
            .unwrap();
        assert_eq!(engine.requirement(&token(), &mint()), Mask::of(OPERATOR));
    }

    #[test]
    fn test_check_access() {
        let (mut engine, _) = PermissionEngine::new(root());
        // unconfigured: open
        assert!(engine.check_access(&bob(), &token(), &mint()));

        engine.add_group(&root(), alice(), OPERATOR).unwrap();
        engine.add_group(&root(), bob(), WHITELISTED).unwrap();
        engine
            .set_requirements(&root(), token(), &[mint()], &[OPERATOR])
            .unwrap();
        assert!(engine.check_access(&alice(), &token(), &mint()));
        assert!(!engine.check_access(&bob(), &token(), &mint()));

        engine
            .set_requirements(&root(), token(), &[mint()], &[PUBLIC])
            .unwrap();
        assert!(engine.check_access(&bob(), &token(), &mint()));
    }

    #[test]
    fn test_batch_is_atomic() {
        let (mut engine, _) = PermissionEngine::new(root());
        engine.add_group(&root(), alice(), OPERATOR).unwrap();
        let before = engine.clone();

        let ops = vec![
            Operation::AddGroup {
                account: bob(),
                group: OPERATOR,
            },
            // alice is not ADMIN
            Operation::SetRequirements {
                target: token(),
                selectors: vec![mint()],
                groups: vec![OPERATOR],
            },
        ];
        let err = engine.apply_batch(&alice(), &ops).unwrap_err();
        assert_eq!(err.kind(), "Unauthorized");
        assert_eq!(engine, before);
    }

    #[test]
    fn test_batch_authorizes_against_staged_state() {
        let (mut engine, _) = PermissionEngine::new(root());
        engine.add_group(&root(), alice(), OPERATOR).unwrap();
        engine.set_group_admins(&root(), WHITELISTED, &[OPERATOR]).unwrap();
        let before = engine.clone();

        // the first op drops OPERATOR from the admins, so the second fails
        let ops = vec![
            Operation::SetGroupAdmins {
                group: WHITELISTED,
                admins: vec![],
            },
            Operation::AddGroup {
                account: bob(),
                group: WHITELISTED,
            },
        ];
        assert!(engine.apply_batch(&alice(), &ops).is_err());
        assert_eq!(engine, before);

        let ops = vec![
            Operation::AddGroup {
                account: bob(),
                group: WHITELISTED,
            },
            Operation::SetGroupAdmins {
                group: WHITELISTED,
                admins: vec![],
            },
        ];
        let events = engine.apply_batch(&alice(), &ops).unwrap();
        assert_eq!(events.len(), 2);
        assert!(engine.membership(&bob()).contains(WHITELISTED));
        assert_eq!(engine.group_admins(WHITELISTED), Mask::of(ADMIN));
    }
}
