//! Solidity-facing surface of the permission manager: the events it emits
//! and the calls the reconciler batches through `multicall`.

use crate::engine::Operation;
use alloy_primitives::Bytes;
use alloy_sol_types::{sol, SolCall};

sol! {
    #![sol(all_derives)]

    event GroupAdded(uint8 indexed group, address indexed account);
    event GroupRemoved(uint8 indexed group, address indexed account);
    event GroupAdmins(uint8 indexed group, uint256 admins);
    event Requirements(address indexed target, bytes4 indexed selector, uint256 groups);

    function setGroupAdmins(uint8 group, uint8[] admins);
    function addGroup(address account, uint8 group);
    function removeGroup(address account, uint8 group);
    function setRequirements(address target, bytes4[] selectors, uint8[] groups);
    function multicall(bytes[] data);
}

/// Call data for a single manager operation.
pub fn encode_operation(op: &Operation) -> Bytes {
    let encoded = match op {
        Operation::SetGroupAdmins { group, admins } => setGroupAdminsCall {
            group: *group,
            admins: admins.clone(),
        }
        .abi_encode(),
        Operation::AddGroup { account, group } => addGroupCall {
            account: *account,
            group: *group,
        }
        .abi_encode(),
        Operation::RemoveGroup { account, group } => removeGroupCall {
            account: *account,
            group: *group,
        }
        .abi_encode(),
        Operation::SetRequirements {
            target,
            selectors,
            groups,
        } => setRequirementsCall {
            target: *target,
            selectors: selectors.clone(),
            groups: groups.clone(),
        }
        .abi_encode(),
    };
    encoded.into()
}

/// Call data for submitting `ops` as one `multicall`, which the manager
/// executes all-or-nothing.
pub fn encode_batch(ops: &[Operation]) -> Bytes {
    multicallCall {
        data: ops.iter().map(encode_operation).collect(),
    }
    .abi_encode()
    .into()
}
