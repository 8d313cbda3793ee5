//! Catalog of deployable components: what code they run, how they are
//! proxied, and which functions they expose for permission requirements.

use alloy_primitives::{keccak256, Selector, B256};
use serde::{Deserialize, Serialize};

pub const MANAGER: &str = "manager";
pub const TOKEN: &str = "token";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    None,
    Uups,
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyKind::None => f.write_str("none"),
            ProxyKind::Uups => f.write_str("uups"),
        }
    }
}

#[derive(Debug)]
pub struct Artifact {
    /// logical kind, e.g. `token`; instances are named `<kind>-<suffix>`
    pub kind: &'static str,
    /// code reference handed to the deployer
    pub code: &'static str,
    pub proxy: ProxyKind,
    pub functions: &'static [&'static str],
}

pub static MANAGER_ARTIFACT: Artifact = Artifact {
    kind: MANAGER,
    code: "AccessManager",
    proxy: ProxyKind::None,
    functions: &[
        "setGroupAdmins(uint8,uint8[])",
        "addGroup(address,uint8)",
        "removeGroup(address,uint8)",
        "setRequirements(address,bytes4[],uint8[])",
        "multicall(bytes[])",
    ],
};

pub static TOKEN_ARTIFACT: Artifact = Artifact {
    kind: TOKEN,
    code: "AssetToken",
    proxy: ProxyKind::Uups,
    functions: &[
        "mint(address,uint256)",
        "burn(address,uint256)",
        "pause()",
        "unpause()",
        "transfer(address,uint256)",
        "transferFrom(address,address,uint256)",
        "approve(address,uint256)",
        "upgradeToAndCall(address,bytes)",
    ],
};

pub fn artifact(kind: &str) -> Option<&'static Artifact> {
    match kind {
        MANAGER => Some(&MANAGER_ARTIFACT),
        TOKEN => Some(&TOKEN_ARTIFACT),
        _ => None,
    }
}

/// Looks up the artifact by its code reference rather than its kind.
pub fn artifact_by_code(code: &str) -> Option<&'static Artifact> {
    [&MANAGER_ARTIFACT, &TOKEN_ARTIFACT]
        .into_iter()
        .find(|a| a.code == code)
}

/// First four bytes of the keccak256 of a canonical signature.
pub fn selector_of(signature: &str) -> Selector {
    Selector::from_slice(&keccak256(signature.as_bytes())[..4])
}

pub fn code_hash(code: &str) -> B256 {
    keccak256(code.as_bytes())
}

impl Artifact {
    /// Resolves a bare function name (`mint`) or a full signature
    /// (`mint(address,uint256)`) against this artifact.
    pub fn signature(&self, function: &str) -> Option<&'static str> {
        self.functions.iter().copied().find(|sig| {
            *sig == function || sig.split_once('(').map(|(name, _)| name) == Some(function)
        })
    }

    pub fn selector(&self, function: &str) -> Option<Selector> {
        self.signature(function).map(selector_of)
    }
}
