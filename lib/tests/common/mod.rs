#![allow(dead_code)]

use alloy_primitives::{Address, Selector};
use lib::artifacts::TOKEN_ARTIFACT;
use lib::config::DeployConfig;
use serde_json::json;

pub const OPERATOR: u8 = 1;
pub const WHITELISTED: u8 = 2;

pub fn deployer() -> Address {
    Address::repeat_byte(0xde)
}

pub fn operator() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn whitelisted() -> Address {
    Address::repeat_byte(0xb2)
}

pub fn mint() -> Selector {
    TOKEN_ARTIFACT.selector("mint").unwrap()
}

pub fn transfer() -> Selector {
    TOKEN_ARTIFACT.selector("transfer").unwrap()
}

pub fn config_json() -> serde_json::Value {
    json!({
        "roles": {
            "ADMIN": {},
            "OPERATOR": { "admins": ["ADMIN"], "members": [operator().to_string()] },
            "WHITELISTED": { "admins": ["OPERATOR"], "members": [whitelisted().to_string()] }
        },
        "contracts": {
            "tokens": [{ "name": "Dollar", "symbol": "USD" }],
            "fns": { "token-mint": ["OPERATOR"] }
        }
    })
}

pub fn config() -> DeployConfig {
    serde_json::from_value(config_json()).unwrap()
}
