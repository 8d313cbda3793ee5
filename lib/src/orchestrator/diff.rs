//! Desired vs live permission state. [`diff`] is pure; reading the live
//! side is the only part that talks to the ledger.

use super::provision::Deployments;
use super::ReconcileError;
use crate::artifacts::MANAGER;
use crate::config::{MemberRef, ValidatedConfig};
use crate::engine::Operation;
use crate::ledger::{Ledger, LedgerError};
use crate::mask::{GroupId, Mask, ADMIN};
use alloy_primitives::{Address, Selector};
use futures::future::try_join_all;
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeMap;

/// The configuration with every logical name replaced by an address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub manager: Address,
    /// full admin masks, ADMIN included
    pub admins: Vec<(GroupId, Mask)>,
    /// in declaration order; a later entry for the same pair wins
    pub requirements: Vec<(Address, Selector, Mask)>,
    pub memberships: Vec<(Address, GroupId)>,
}

impl DesiredState {
    /// Components missing from `deployments` are left out, except the
    /// manager, which must be there.
    pub fn resolve(
        validated: &ValidatedConfig,
        deployments: &Deployments,
    ) -> Result<Self, ReconcileError> {
        let manager = *deployments
            .get(MANAGER)
            .ok_or_else(|| ReconcileError::NotProvisioned(MANAGER.to_string()))?;

        let addresses = |reference: &str| -> Vec<Address> {
            validated
                .matching_components(reference)
                .filter_map(|c| deployments.get(&c.name).copied())
                .collect()
        };

        let mut requirements = vec![];
        for requirement in &validated.requirements {
            for target in addresses(&requirement.component) {
                requirements.push((target, requirement.selector, requirement.groups));
            }
        }

        let mut memberships = vec![];
        for (group, members) in &validated.members {
            for member in members {
                match member {
                    MemberRef::Account(account) => memberships.push((*account, *group)),
                    MemberRef::Component(name) => {
                        memberships.extend(addresses(name).into_iter().map(|a| (a, *group)))
                    }
                }
            }
        }

        Ok(DesiredState {
            manager,
            admins: validated.admins.clone(),
            requirements,
            memberships,
        })
    }
}

/// The slice of live manager state the desired state talks about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSnapshot {
    pub admins: BTreeMap<GroupId, Mask>,
    pub requirements: BTreeMap<(Address, Selector), Mask>,
    pub memberships: BTreeMap<Address, Mask>,
}

/// Reads everything `desired` refers to. Reads run concurrently; the diff
/// is then computed against this one snapshot.
pub async fn read_live<L: Ledger>(
    ledger: &L,
    desired: &DesiredState,
) -> Result<LiveSnapshot, LedgerError> {
    let manager = desired.manager;

    let groups: IndexSet<GroupId> = desired.admins.iter().map(|(g, _)| *g).collect();
    let pairs: IndexSet<(Address, Selector)> =
        desired.requirements.iter().map(|(t, s, _)| (*t, *s)).collect();
    let accounts: IndexSet<Address> = desired.memberships.iter().map(|(a, _)| *a).collect();

    let (admins, requirements, memberships) = futures::try_join!(
        try_join_all(groups.iter().map(|group| async move {
            Ok::<_, LedgerError>((*group, ledger.read_group_admins(manager, *group).await?))
        })),
        try_join_all(pairs.iter().map(|(target, selector)| async move {
            Ok::<_, LedgerError>((
                (*target, *selector),
                ledger.read_requirement(manager, *target, *selector).await?,
            ))
        })),
        try_join_all(accounts.iter().map(|account| async move {
            Ok::<_, LedgerError>((*account, ledger.read_membership(manager, *account).await?))
        })),
    )?;

    Ok(LiveSnapshot {
        admins: admins.into_iter().collect(),
        requirements: requirements.into_iter().collect(),
        memberships: memberships.into_iter().collect(),
    })
}

/// Operations that move `live` to `desired`: admin changes, then
/// requirements, then new memberships. Memberships are only ever added.
pub fn diff(desired: &DesiredState, live: &LiveSnapshot) -> Vec<Operation> {
    let mut ops = vec![];

    for (group, mask) in &desired.admins {
        if live.admins.get(group) != Some(mask) {
            ops.push(Operation::SetGroupAdmins {
                group: *group,
                admins: mask.without(ADMIN).to_vec(),
            });
        }
    }

    let mut wanted: IndexMap<(Address, Selector), Mask> = IndexMap::new();
    for (target, selector, mask) in &desired.requirements {
        wanted.insert((*target, *selector), *mask);
    }
    let mut batched: IndexMap<(Address, Mask), Vec<Selector>> = IndexMap::new();
    for ((target, selector), mask) in wanted {
        let current = live
            .requirements
            .get(&(target, selector))
            .copied()
            .unwrap_or_default();
        if current != mask {
            batched.entry((target, mask)).or_default().push(selector);
        }
    }
    for ((target, mask), selectors) in batched {
        ops.push(Operation::SetRequirements {
            target,
            selectors,
            groups: mask.to_vec(),
        });
    }

    let unique: IndexSet<(Address, GroupId)> = desired.memberships.iter().copied().collect();
    for (account, group) in unique {
        let current = live.memberships.get(&account).copied().unwrap_or_default();
        if !current.contains(group) {
            ops.push(Operation::AddGroup { account, group });
        }
    }

    ops
}
