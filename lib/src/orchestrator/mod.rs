//! Idempotent deployment and configuration of a permission manager and the
//! components it protects.
//!
//! A run validates the desired state, provisions components through the
//! deployment cache, reads the manager's live state, and submits the
//! difference as a single atomic batch. Running it twice against an
//! unchanged configuration deploys nothing and sends nothing.

mod cache;
mod diff;
mod provision;

pub use cache::{CacheError, CacheStore, DeploymentRecord, FileCache, MemoryCache};
pub use diff::{diff, read_live, DesiredState, LiveSnapshot};
pub use provision::{provision, Deployments};

use crate::abi;
use crate::artifacts::MANAGER;
use crate::config::{ConfigError, DeployConfig};
use crate::engine::Operation;
use crate::ledger::{Deployer, Ledger, LedgerError, Receipt};
use alloy_primitives::{Address, Bytes};
use provision::{cache_status, deploy_spec, CacheStatus};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// ignore cached deployments and deploy everything again
    pub no_cache: bool,
    /// skip the confirmation gate
    pub no_confirm: bool,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("invalid configuration: {0}")]
    Validation(#[from] ConfigError),
    #[error("cached {name} does not match the desired deployment ({})", fields.join(", "))]
    CacheInconsistency {
        name: String,
        fields: Vec<&'static str>,
    },
    #[error("{action} failed: {source}")]
    Collaborator {
        action: String,
        #[source]
        source: LedgerError,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("{0} is not provisioned")]
    NotProvisioned(String),
    #[error("declined: {0}")]
    Declined(String),
}

impl ReconcileError {
    pub fn kind(&self) -> &str {
        match *self {
            ReconcileError::Validation(_) => "ValidationError",
            ReconcileError::NotProvisioned(_) => "ValidationError",
            ReconcileError::CacheInconsistency { .. } => "CacheInconsistency",
            ReconcileError::Collaborator { ref source, .. } => match source {
                LedgerError::Reverted(_) => "Unauthorized",
                _ => "CollaboratorFailure",
            },
            ReconcileError::Cache(_) => "CollaboratorFailure",
            ReconcileError::Declined(_) => "Declined",
        }
    }
}

/// Asked before each deployment and before submitting a batch.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

pub(crate) fn gate<F: Confirm>(
    confirm: &mut F,
    options: &ReconcileOptions,
    prompt: &str,
) -> Result<(), ReconcileError> {
    if options.no_confirm || confirm.confirm(prompt) {
        Ok(())
    } else {
        warn!("declined: {prompt}");
        Err(ReconcileError::Declined(prompt.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub deployments: Deployments,
    /// names deployed during this run
    pub deployed: Vec<String>,
    pub operations: Vec<Operation>,
    /// `None` when nothing had to be sent
    pub receipt: Option<Receipt>,
}

/// What a reconcile would do, computed without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// components that a run would deploy
    pub pending: Vec<String>,
    /// operations against the components already provisioned
    pub operations: Vec<Operation>,
}

impl Plan {
    /// `multicall` call data for the planned operations, for submission
    /// through some other channel.
    pub fn calldata(&self) -> Option<Bytes> {
        (!self.operations.is_empty()).then(|| abi::encode_batch(&self.operations))
    }
}

/// Brings the ledger in line with `config`.
pub async fn reconcile<L, D, C, F>(
    config: &DeployConfig,
    ledger: &L,
    deployer: &D,
    cache: &mut C,
    options: &ReconcileOptions,
    mut confirm: F,
) -> Result<ReconcileReport, ReconcileError>
where
    L: Ledger,
    D: Deployer,
    C: CacheStore,
    F: Confirm,
{
    let validated = config.validate()?;
    info!(
        "reconciling {} roles across {} components",
        validated.roles.len(),
        validated.components.len()
    );

    let (deployments, deployed) =
        provision(&validated, deployer, cache, options, &mut confirm).await?;

    let desired = DesiredState::resolve(&validated, &deployments)?;
    let live = read_live(ledger, &desired)
        .await
        .map_err(|source| ReconcileError::Collaborator {
            action: "read live state".to_string(),
            source,
        })?;
    let operations = diff(&desired, &live);
    info!("{} operations to converge", operations.len());

    if operations.is_empty() {
        return Ok(ReconcileReport {
            deployments,
            deployed,
            operations,
            receipt: None,
        });
    }

    for op in &operations {
        info!("  {op}");
    }
    gate(
        &mut confirm,
        options,
        &format!("submit {} operations to {}", operations.len(), desired.manager),
    )?;
    let receipt = ledger
        .submit_batch(desired.manager, &operations)
        .await
        .map_err(|source| ReconcileError::Collaborator {
            action: "submit batch".to_string(),
            source,
        })?;

    Ok(ReconcileReport {
        deployments,
        deployed,
        operations,
        receipt: Some(receipt),
    })
}

/// The dry-run counterpart of [`reconcile`]: consults the cache and the
/// live state but deploys and sends nothing.
pub async fn plan<L, C>(
    config: &DeployConfig,
    ledger: &L,
    cache: &C,
    options: &ReconcileOptions,
) -> Result<Plan, ReconcileError>
where
    L: Ledger,
    C: CacheStore,
{
    let validated = config.validate()?;

    let mut deployments = Deployments::new();
    let mut pending = vec![];
    for component in &validated.components {
        // a pending dependency makes every dependent pending as well
        let Ok(spec) = deploy_spec(component, &deployments) else {
            pending.push(component.name.clone());
            continue;
        };
        match cache_status(&component.name, &spec, cache, options)? {
            CacheStatus::Reuse(address) => {
                deployments.insert(component.name.clone(), address);
            }
            CacheStatus::Deploy => pending.push(component.name.clone()),
        }
    }

    if !deployments.contains_key(MANAGER) {
        return Ok(Plan {
            pending,
            operations: vec![],
        });
    }

    let desired = DesiredState::resolve(&validated, &deployments)?;
    let live = read_live(ledger, &desired)
        .await
        .map_err(|source| ReconcileError::Collaborator {
            action: "read live state".to_string(),
            source,
        })?;
    Ok(Plan {
        pending,
        operations: diff(&desired, &live),
    })
}

/// Removes `account` from the group of `role`. Reconciliation never does
/// this on its own.
pub async fn revoke<L, C, F>(
    config: &DeployConfig,
    ledger: &L,
    cache: &C,
    role: &str,
    account: Address,
    options: &ReconcileOptions,
    mut confirm: F,
) -> Result<Option<Receipt>, ReconcileError>
where
    L: Ledger,
    C: CacheStore,
    F: Confirm,
{
    let validated = config.validate()?;
    let group = validated
        .group(role)
        .ok_or_else(|| ConfigError::UndeclaredRole {
            role: role.to_string(),
            referenced_by: "revoke".to_string(),
        })?;
    let manager = cache
        .get(MANAGER)
        .ok_or_else(|| ReconcileError::NotProvisioned(MANAGER.to_string()))?
        .address;

    let current = ledger
        .read_membership(manager, account)
        .await
        .map_err(|source| ReconcileError::Collaborator {
            action: format!("read membership of {account}"),
            source,
        })?;
    if !current.contains(group) {
        info!("{account} is not in {role}, nothing to revoke");
        return Ok(None);
    }

    let op = Operation::RemoveGroup { account, group };
    gate(&mut confirm, options, &op.to_string())?;
    let receipt = ledger
        .submit_batch(manager, &[op])
        .await
        .map_err(|source| ReconcileError::Collaborator {
            action: format!("revoke {role} from {account}"),
            source,
        })?;
    Ok(Some(receipt))
}
