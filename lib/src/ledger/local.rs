use super::{DeploySpec, Deployer, EventSource, Ledger, LedgerError, Receipt};
use crate::artifacts::{self, MANAGER};
use crate::engine::{Operation, PermissionEngine};
use crate::events::{EventCursor, LoggedEvent, PermissionEvent};
use crate::mask::{GroupId, Mask};
use alloy_primitives::{Address, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Upper bound on logs returned by one `get_event_log` call.
pub const EVENT_PAGE_SIZE: usize = 500;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Contract {
    Manager {
        spec: DeploySpec,
        engine: PermissionEngine,
    },
    /// a component whose functions are gated by `manager`
    Protected { spec: DeploySpec, manager: Address },
}

impl Contract {
    fn spec(&self) -> &DeploySpec {
        match self {
            Contract::Manager { spec, .. } | Contract::Protected { spec, .. } => spec,
        }
    }
}

/// Everything the local chain knows; serializable so a CLI session can
/// pick up where the previous one left off.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChainState {
    block: u64,
    nonces: BTreeMap<Address, u64>,
    contracts: BTreeMap<Address, Contract>,
    logs: Vec<LoggedEvent>,
}

impl ChainState {
    fn next_address(&mut self, sender: Address) -> Address {
        let nonce = self.nonces.entry(sender).or_default();
        let address = sender.create(*nonce);
        *nonce += 1;
        address
    }

    /// Seals one single-transaction block carrying `events` from `address`.
    fn seal(&mut self, address: Address, events: Vec<PermissionEvent>) -> Receipt {
        self.block += 1;
        let logs = events.len();
        for (log_index, event) in events.into_iter().enumerate() {
            self.logs.push(LoggedEvent {
                cursor: EventCursor {
                    block: self.block,
                    tx_index: 0,
                    log_index: log_index as u64,
                },
                address,
                data: event.to_log_data(),
            });
        }
        Receipt {
            block: self.block,
            tx_index: 0,
            logs,
        }
    }

    fn engine(&self, manager: Address) -> Result<&PermissionEngine, LedgerError> {
        match self.contracts.get(&manager) {
            Some(Contract::Manager { engine, .. }) => Ok(engine),
            Some(Contract::Protected { .. }) => Err(LedgerError::NotManager(manager)),
            None => Err(LedgerError::NoContract(manager)),
        }
    }

    fn engine_mut(&mut self, manager: Address) -> Result<&mut PermissionEngine, LedgerError> {
        match self.contracts.get_mut(&manager) {
            Some(Contract::Manager { engine, .. }) => Ok(engine),
            Some(Contract::Protected { .. }) => Err(LedgerError::NotManager(manager)),
            None => Err(LedgerError::NoContract(manager)),
        }
    }

    /// The manager guarding `target`; a manager guards itself.
    fn manager_of(&self, target: Address) -> Result<Address, LedgerError> {
        match self.contracts.get(&target) {
            Some(Contract::Manager { .. }) => Ok(target),
            Some(Contract::Protected { manager, .. }) => Ok(*manager),
            None => Err(LedgerError::NoContract(target)),
        }
    }

    fn deploy(&mut self, sender: Address, spec: &DeploySpec) -> Result<Address, LedgerError> {
        let artifact = artifacts::artifact_by_code(&spec.code)
            .ok_or_else(|| LedgerError::UnknownCode(spec.code.clone()))?;

        let (contract, events) = if artifact.kind == MANAGER {
            let (engine, events) = PermissionEngine::new(sender);
            (
                Contract::Manager {
                    spec: spec.clone(),
                    engine,
                },
                events,
            )
        } else {
            let manager = spec
                .constructor_args
                .first()
                .and_then(|arg| Address::from_str(arg).ok())
                .ok_or_else(|| LedgerError::BadConstructorArgs {
                    code: spec.code.clone(),
                    reason: "first argument must be the manager address".to_string(),
                })?;
            self.engine(manager)?;
            (
                Contract::Protected {
                    spec: spec.clone(),
                    manager,
                },
                vec![],
            )
        };

        let address = self.next_address(sender);
        self.contracts.insert(address, contract);
        self.seal(address, events);
        Ok(address)
    }
}

/// In-process ledger: deploys components, hosts their permission managers
/// and records every emitted event in order. Clones share the same chain;
/// [`LocalChain::connect`] switches the sending account.
#[derive(Clone, Debug)]
pub struct LocalChain {
    state: Arc<Mutex<ChainState>>,
    sender: Address,
}

impl LocalChain {
    pub fn new(sender: Address) -> Self {
        Self::from_state(ChainState::default(), sender)
    }

    pub fn from_state(state: ChainState, sender: Address) -> Self {
        LocalChain {
            state: Arc::new(Mutex::new(state)),
            sender,
        }
    }

    /// The same chain, sending as `sender`.
    pub fn connect(&self, sender: Address) -> Self {
        LocalChain {
            state: self.state.clone(),
            sender,
        }
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub async fn snapshot(&self) -> ChainState {
        self.state.lock().await.clone()
    }

    /// Loads a saved chain, or starts an empty one if `path` does not exist.
    pub async fn load(path: &Path, sender: Address) -> Result<Self, LedgerError> {
        let state = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                LedgerError::Transport(format!("corrupt chain state {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no chain state at {}, starting empty", path.display());
                ChainState::default()
            }
            Err(e) => {
                return Err(LedgerError::Transport(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        Ok(Self::from_state(state, sender))
    }

    pub async fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(&*self.state.lock().await)
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LedgerError::Transport(e.to_string()))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| LedgerError::Transport(format!("failed to write {}: {e}", path.display())))
    }

    pub async fn block_number(&self) -> u64 {
        self.state.lock().await.block
    }

    pub async fn deployment_count(&self) -> usize {
        self.state.lock().await.contracts.len()
    }

    pub async fn code_at(&self, address: Address) -> Option<String> {
        self.state
            .lock()
            .await
            .contracts
            .get(&address)
            .map(|c| c.spec().code.clone())
    }

    /// Evaluates the guarding manager's access check for `caller`.
    pub async fn check_access(
        &self,
        caller: Address,
        target: Address,
        selector: Selector,
    ) -> Result<bool, LedgerError> {
        let state = self.state.lock().await;
        let manager = state.manager_of(target)?;
        Ok(state.engine(manager)?.check_access(&caller, &target, &selector))
    }

    /// Calls a protected function as the current sender. Only the access
    /// gate is modelled; the function body itself is out of scope.
    pub async fn invoke(&self, target: Address, selector: Selector) -> Result<(), LedgerError> {
        if self.check_access(self.sender, target, selector).await? {
            debug!("{} invoked {selector} on {target}", self.sender);
            Ok(())
        } else {
            Err(LedgerError::Reverted(
                crate::engine::EngineError::Unauthorized {
                    caller: self.sender,
                    action: format!("call {selector} on {target}"),
                },
            ))
        }
    }
}

impl Ledger for LocalChain {
    async fn submit_batch(
        &self,
        manager: Address,
        ops: &[Operation],
    ) -> Result<Receipt, LedgerError> {
        let mut state = self.state.lock().await;
        let events = state.engine_mut(manager)?.apply_batch(&self.sender, ops)?;
        let receipt = state.seal(manager, events);
        info!(
            "batch of {} operations mined in block {} ({} logs)",
            ops.len(),
            receipt.block,
            receipt.logs
        );
        Ok(receipt)
    }

    async fn read_group_admins(
        &self,
        manager: Address,
        group: GroupId,
    ) -> Result<Mask, LedgerError> {
        Ok(self.state.lock().await.engine(manager)?.group_admins(group))
    }

    async fn read_requirement(
        &self,
        manager: Address,
        target: Address,
        selector: Selector,
    ) -> Result<Mask, LedgerError> {
        Ok(self
            .state
            .lock()
            .await
            .engine(manager)?
            .requirement(&target, &selector))
    }

    async fn read_membership(
        &self,
        manager: Address,
        account: Address,
    ) -> Result<Mask, LedgerError> {
        Ok(self.state.lock().await.engine(manager)?.membership(&account))
    }
}

impl Deployer for LocalChain {
    async fn deploy(&self, spec: &DeploySpec) -> Result<Address, LedgerError> {
        let address = self.state.lock().await.deploy(self.sender, spec)?;
        info!("deployed {} at {address}", spec.code);
        Ok(address)
    }
}

impl EventSource for LocalChain {
    async fn get_event_log(
        &self,
        from: Option<EventCursor>,
    ) -> Result<Vec<LoggedEvent>, LedgerError> {
        let state = self.state.lock().await;
        // logs are appended in cursor order
        let start = match from {
            Some(cursor) => state.logs.partition_point(|log| log.cursor <= cursor),
            None => 0,
        };
        Ok(state.logs[start..]
            .iter()
            .take(EVENT_PAGE_SIZE)
            .cloned()
            .collect())
    }
}
