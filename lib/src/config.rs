//! Declarative desired state and its closed-world validation.
//!
//! ```json
//! {
//!   "roles": {
//!     "ADMIN": {},
//!     "OPERATOR": { "admins": ["ADMIN"], "members": ["0x..."] },
//!     "MINTER": { "admins": ["OPERATOR"], "members": ["token"] }
//!   },
//!   "contracts": {
//!     "tokens": [{ "name": "Dollar", "symbol": "USD" }],
//!     "fns": { "token-mint": ["MINTER"] }
//!   }
//! }
//! ```
//!
//! Roles get group ids in declaration order starting at ADMIN = 0. A role
//! named `PUBLIC` always maps to group 255.
//!
//! `fns` may only name protected components. The manager's own functions
//! are governed by group admin masks and ADMIN, so a `manager-*` key is
//! rejected rather than recorded without effect.

use crate::artifacts::{self, MANAGER, TOKEN};
use crate::mask::{group_id, GroupId, Mask, ADMIN, PUBLIC};
use alloy_primitives::{Address, Selector};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const ADMIN_ROLE: &str = "ADMIN";
pub const PUBLIC_ROLE: &str = "PUBLIC";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub roles: IndexMap<String, RoleConfig>,
    #[serde(default)]
    pub contracts: ContractsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    /// `None` leaves the live admin mask alone; `Some(vec![])` resets it to ADMIN only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admins: Option<Vec<String>>,
    /// accounts (`0x...`) or logical component names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractsConfig {
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    /// `"<component>-<function>" -> roles`
    #[serde(default)]
    pub fns: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read configuration {path}: {error}")]
    Read { path: String, error: String },
    #[error("no roles declared")]
    NoRoles,
    #[error("first declared role must be {ADMIN_ROLE}, found {0}")]
    FirstRoleNotAdmin(String),
    #[error("too many roles: {0} does not fit below the reserved PUBLIC group")]
    TooManyRoles(String),
    #[error("role {role} referenced by {referenced_by} is not declared")]
    UndeclaredRole { role: String, referenced_by: String },
    #[error("component {name} referenced by {referenced_by} is not declared")]
    UnknownComponent { name: String, referenced_by: String },
    #[error("{component} has no function {function}")]
    UnknownFunction { component: String, function: String },
    #[error("function key {0} is not of the form <component>-<function>")]
    MalformedFunctionKey(String),
    #[error("function key {0} targets the manager, whose functions are gated by group admins")]
    ManagerFunction(String),
    #[error("token symbol {0} declared twice")]
    DuplicateToken(String),
}

/// A constructor argument, possibly the address of an earlier component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructorArg {
    Component(String),
    Value(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpec {
    /// logical name, e.g. `token-USD`
    pub name: String,
    pub kind: &'static str,
    pub args: Vec<ConstructorArg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberRef {
    Account(Address),
    /// every component whose name or kind matches
    Component(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRequirement {
    /// component name or kind, as written in the key
    pub component: String,
    pub function: String,
    pub selector: Selector,
    pub groups: Mask,
}

/// A configuration that passed validation, with every role resolved to a group id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub roles: IndexMap<String, GroupId>,
    /// roles with an explicit admin list, with the desired full mask
    pub admins: Vec<(GroupId, Mask)>,
    pub members: Vec<(GroupId, Vec<MemberRef>)>,
    /// dependency order: the manager first
    pub components: Vec<ComponentSpec>,
    pub requirements: Vec<FunctionRequirement>,
}

impl ValidatedConfig {
    pub fn group(&self, role: &str) -> Option<GroupId> {
        self.roles.get(role).copied()
    }

    pub fn role_name(&self, group: GroupId) -> Option<&str> {
        self.roles
            .iter()
            .find(|(_, id)| **id == group)
            .map(|(name, _)| name.as_str())
    }

    /// Components matched by a reference: an exact name, or every instance of a kind.
    pub fn matching_components<'a>(
        &'a self,
        reference: &'a str,
    ) -> impl Iterator<Item = &'a ComponentSpec> + 'a {
        self.components
            .iter()
            .filter(move |c| c.name == reference || c.kind == reference)
    }
}

impl DeployConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::Read {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
        Self::from_json(&contents)
    }

    pub fn token_name(symbol: &str) -> String {
        format!("{TOKEN}-{symbol}")
    }

    /// Closed-world check of the whole configuration. Nothing here touches
    /// a collaborator, so a failure always precedes any side effect.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let roles = self.assign_groups()?;
        let lookup = |role: &str, referenced_by: &str| -> Result<GroupId, ConfigError> {
            roles
                .get(role)
                .copied()
                .ok_or_else(|| ConfigError::UndeclaredRole {
                    role: role.to_string(),
                    referenced_by: referenced_by.to_string(),
                })
        };

        let components = self.components()?;
        let is_component =
            |reference: &str| components.iter().any(|c| c.name == reference || c.kind == reference);

        let mut admins = Vec::new();
        let mut members = Vec::new();
        for (name, role) in &self.roles {
            let group = roles[name.as_str()];
            if let Some(list) = &role.admins {
                let referenced_by = format!("admins of {name}");
                let mut mask = Mask::of(ADMIN);
                for admin in list {
                    mask |= Mask::of(lookup(admin, &referenced_by)?);
                }
                admins.push((group, mask));
            }
            if let Some(list) = &role.members {
                let mut refs = Vec::with_capacity(list.len());
                for member in list {
                    let member_ref = match Address::from_str(member) {
                        Ok(account) => MemberRef::Account(account),
                        Err(_) if is_component(member) => MemberRef::Component(member.clone()),
                        Err(_) => {
                            return Err(ConfigError::UnknownComponent {
                                name: member.clone(),
                                referenced_by: format!("members of {name}"),
                            })
                        }
                    };
                    refs.push(member_ref);
                }
                members.push((group, refs));
            }
        }

        let mut requirements = Vec::new();
        for (key, required) in &self.contracts.fns {
            let (component, function) = key
                .rsplit_once('-')
                .filter(|(c, f)| !c.is_empty() && !f.is_empty())
                .ok_or_else(|| ConfigError::MalformedFunctionKey(key.clone()))?;
            let Some(spec) = components
                .iter()
                .find(|c| c.name == component || c.kind == component)
            else {
                return Err(ConfigError::UnknownComponent {
                    name: component.to_string(),
                    referenced_by: key.clone(),
                });
            };
            if spec.kind == MANAGER {
                return Err(ConfigError::ManagerFunction(key.clone()));
            }
            // kinds come from the catalog, so this lookup cannot miss
            let selector = artifacts::artifact(spec.kind)
                .and_then(|a| a.selector(function))
                .ok_or_else(|| ConfigError::UnknownFunction {
                    component: component.to_string(),
                    function: function.to_string(),
                })?;
            let mut groups = Mask::EMPTY;
            for role in required {
                groups |= Mask::of(lookup(role, key)?);
            }
            requirements.push(FunctionRequirement {
                component: component.to_string(),
                function: function.to_string(),
                selector,
                groups,
            });
        }

        Ok(ValidatedConfig {
            roles,
            admins,
            members,
            components,
            requirements,
        })
    }

    fn assign_groups(&self) -> Result<IndexMap<String, GroupId>, ConfigError> {
        let Some((first, _)) = self.roles.first() else {
            return Err(ConfigError::NoRoles);
        };
        if first != ADMIN_ROLE {
            return Err(ConfigError::FirstRoleNotAdmin(first.clone()));
        }

        let mut roles = IndexMap::with_capacity(self.roles.len());
        let mut next = usize::from(ADMIN);
        for name in self.roles.keys() {
            if name == PUBLIC_ROLE {
                roles.insert(name.clone(), PUBLIC);
                continue;
            }
            let group = group_id(next)
                .ok()
                .filter(|g| *g != PUBLIC)
                .ok_or_else(|| ConfigError::TooManyRoles(name.clone()))?;
            roles.insert(name.clone(), group);
            next += 1;
        }
        Ok(roles)
    }

    fn components(&self) -> Result<Vec<ComponentSpec>, ConfigError> {
        let mut components = vec![ComponentSpec {
            name: MANAGER.to_string(),
            kind: MANAGER,
            args: vec![],
        }];
        for token in &self.contracts.tokens {
            let name = Self::token_name(&token.symbol);
            if components.iter().any(|c| c.name == name) {
                return Err(ConfigError::DuplicateToken(token.symbol.clone()));
            }
            let mut args = vec![
                ConstructorArg::Component(MANAGER.to_string()),
                ConstructorArg::Value(token.name.clone()),
                ConstructorArg::Value(token.symbol.clone()),
            ];
            if let Some(quote) = &token.quote {
                args.push(ConstructorArg::Value(quote.clone()));
            }
            components.push(ComponentSpec {
                name,
                kind: TOKEN,
                args,
            });
        }
        Ok(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> DeployConfig {
        serde_json::from_value(value).unwrap()
    }

    fn sample() -> serde_json::Value {
        json!({
            "roles": {
                "ADMIN": {},
                "OPERATOR": { "admins": ["ADMIN"], "members": ["0x00000000000000000000000000000000000000a1"] },
                "WHITELISTED": { "admins": ["OPERATOR"], "members": ["token"] },
                "PUBLIC": {}
            },
            "contracts": {
                "tokens": [
                    { "name": "Dollar", "symbol": "USD" },
                    { "name": "Euro", "symbol": "EUR", "quote": "USD" }
                ],
                "fns": {
                    "token-mint": ["OPERATOR"],
                    "token-transfer": ["WHITELISTED", "PUBLIC"]
                }
            }
        })
    }

    #[test]
    fn test_roles_in_declaration_order() {
        let validated = parse(sample()).validate().unwrap();
        assert_eq!(validated.group("ADMIN"), Some(0));
        assert_eq!(validated.group("OPERATOR"), Some(1));
        assert_eq!(validated.group("WHITELISTED"), Some(2));
        assert_eq!(validated.group("PUBLIC"), Some(255));
        assert_eq!(validated.role_name(2), Some("WHITELISTED"));
    }

    #[test]
    fn test_admin_masks_include_admin() {
        let validated = parse(sample()).validate().unwrap();
        assert_eq!(
            validated.admins,
            vec![
                (1, Mask::of(0)),
                (2, Mask::from_groups([0, 1])),
            ]
        );
    }

    #[test]
    fn test_components_manager_first() {
        let validated = parse(sample()).validate().unwrap();
        let names: Vec<_> = validated.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["manager", "token-USD", "token-EUR"]);
        assert_eq!(
            validated.components[2].args.last(),
            Some(&ConstructorArg::Value("USD".to_string()))
        );
        assert_eq!(validated.matching_components("token").count(), 2);
        assert_eq!(validated.matching_components("token-EUR").count(), 1);
    }

    #[test]
    fn test_requirements_resolved() {
        let validated = parse(sample()).validate().unwrap();
        let transfer = &validated.requirements[1];
        assert_eq!(transfer.component, "token");
        assert_eq!(transfer.function, "transfer");
        assert_eq!(transfer.groups.to_vec(), vec![2, 255]);
    }

    #[test]
    fn test_members_split_accounts_and_components() {
        let validated = parse(sample()).validate().unwrap();
        let (group, refs) = &validated.members[1];
        assert_eq!(*group, 2);
        assert_eq!(refs, &vec![MemberRef::Component("token".to_string())]);
    }

    #[test]
    fn test_undeclared_role_in_fns() {
        let mut config = parse(sample());
        config
            .contracts
            .fns
            .insert("token-burn".to_string(), vec!["MANAGER".to_string()]);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::UndeclaredRole {
                role: "MANAGER".to_string(),
                referenced_by: "token-burn".to_string(),
            }
        );
    }

    #[test]
    fn test_undeclared_admin() {
        let config = parse(json!({
            "roles": { "ADMIN": {}, "OPERATOR": { "admins": ["OWNER"] } }
        }));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UndeclaredRole { .. })
        ));
    }

    #[test]
    fn test_first_role_must_be_admin() {
        let config = parse(json!({ "roles": { "OPERATOR": {}, "ADMIN": {} } }));
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::FirstRoleNotAdmin("OPERATOR".to_string())
        );
        let empty = parse(json!({ "roles": {} }));
        assert_eq!(empty.validate().unwrap_err(), ConfigError::NoRoles);
    }

    #[test]
    fn test_unknown_member_component() {
        let config = parse(json!({
            "roles": { "ADMIN": { "members": ["oracle"] } }
        }));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn test_unknown_function() {
        let config = parse(json!({
            "roles": { "ADMIN": {} },
            "contracts": { "tokens": [{ "name": "Dollar", "symbol": "USD" }], "fns": { "token-fly": ["ADMIN"] } }
        }));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_malformed_key() {
        let config = parse(json!({
            "roles": { "ADMIN": {} },
            "contracts": { "fns": { "mint": ["ADMIN"] } }
        }));
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::MalformedFunctionKey("mint".to_string())
        );
    }

    #[test]
    fn test_manager_functions_rejected() {
        let mut json = sample();
        json["contracts"]["fns"]["manager-addGroup"] = json!(["OPERATOR"]);
        assert_eq!(
            parse(json).validate().unwrap_err(),
            ConfigError::ManagerFunction("manager-addGroup".to_string())
        );
    }

    #[test]
    fn test_duplicate_token() {
        let config = parse(json!({
            "roles": { "ADMIN": {} },
            "contracts": { "tokens": [
                { "name": "Dollar", "symbol": "USD" },
                { "name": "Other Dollar", "symbol": "USD" }
            ] }
        }));
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::DuplicateToken("USD".to_string())
        );
    }

    #[test]
    fn test_too_many_roles() {
        let mut roles = serde_json::Map::new();
        roles.insert("ADMIN".to_string(), json!({}));
        for i in 1..=255 {
            roles.insert(format!("R{i}"), json!({}));
        }
        let config = parse(json!({ "roles": roles }));
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::TooManyRoles("R255".to_string())
        );
    }
}
