use super::cache::{CacheStore, DeploymentRecord};
use super::{gate, Confirm, ReconcileError, ReconcileOptions};
use crate::artifacts;
use crate::config::{ComponentSpec, ConstructorArg, ValidatedConfig};
use crate::ledger::{DeploySpec, Deployer};
use alloy_primitives::Address;
use indexmap::IndexMap;
use tracing::{debug, info};

/// Logical name -> address, in provisioning order.
pub type Deployments = IndexMap<String, Address>;

/// Where a component stands relative to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CacheStatus {
    Reuse(Address),
    Deploy,
}

/// Builds the deploy spec of `component`, substituting the addresses of
/// components provisioned before it.
pub(crate) fn deploy_spec(
    component: &ComponentSpec,
    deployments: &Deployments,
) -> Result<DeploySpec, ReconcileError> {
    let artifact = artifacts::artifact(component.kind)
        .ok_or_else(|| ReconcileError::NotProvisioned(component.name.clone()))?;
    let constructor_args = component
        .args
        .iter()
        .map(|arg| match arg {
            ConstructorArg::Value(value) => Ok(value.clone()),
            ConstructorArg::Component(name) => deployments
                .get(name)
                .map(|address| address.to_string())
                .ok_or_else(|| ReconcileError::NotProvisioned(name.clone())),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DeploySpec {
        code: artifact.code.to_string(),
        constructor_args,
        proxy_kind: artifact.proxy,
    })
}

/// Cache lookup for one component. A hit whose parameters moved is fatal
/// unless the cache is bypassed.
pub(crate) fn cache_status<C: CacheStore>(
    name: &str,
    spec: &DeploySpec,
    cache: &C,
    options: &ReconcileOptions,
) -> Result<CacheStatus, ReconcileError> {
    match cache.get(name) {
        Some(_) if options.no_cache => {
            info!("{name}: cache bypassed, deploying fresh");
            Ok(CacheStatus::Deploy)
        }
        Some(record) => {
            let fields = record.mismatches(spec);
            if !fields.is_empty() {
                return Err(ReconcileError::CacheInconsistency {
                    name: name.to_string(),
                    fields,
                });
            }
            debug!("{name}: cache hit at {}", record.address);
            Ok(CacheStatus::Reuse(record.address))
        }
        None => {
            debug!("{name}: cache miss");
            Ok(CacheStatus::Deploy)
        }
    }
}

/// Makes every component exist, manager first. Returns the address map and
/// the names that were freshly deployed. Records are written as soon as a
/// deployment succeeds, so a later failure keeps earlier work.
pub async fn provision<D, C, F>(
    validated: &ValidatedConfig,
    deployer: &D,
    cache: &mut C,
    options: &ReconcileOptions,
    confirm: &mut F,
) -> Result<(Deployments, Vec<String>), ReconcileError>
where
    D: Deployer,
    C: CacheStore,
    F: Confirm,
{
    let mut deployments = Deployments::new();
    let mut deployed = vec![];

    for component in &validated.components {
        let spec = deploy_spec(component, &deployments)?;
        let address = match cache_status(&component.name, &spec, cache, options)? {
            CacheStatus::Reuse(address) => address,
            CacheStatus::Deploy => {
                gate(
                    confirm,
                    options,
                    &format!("deploy {} ({})", component.name, spec.code),
                )?;
                let address = deployer.deploy(&spec).await.map_err(|source| {
                    ReconcileError::Collaborator {
                        action: format!("deploy {}", component.name),
                        source,
                    }
                })?;
                cache
                    .put(&component.name, DeploymentRecord::new(address, &spec))
                    .await?;
                info!("{}: deployed at {address}", component.name);
                deployed.push(component.name.clone());
                address
            }
        };
        deployments.insert(component.name.clone(), address);
    }

    Ok((deployments, deployed))
}
