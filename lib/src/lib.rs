//! Group-bitmask permissions for a set of deployed components: the
//! permission manager's state machine, a reconciler that deploys and
//! configures components idempotently, and an event-sourced mirror of the
//! manager's state.

pub mod abi;
pub mod artifacts;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod mask;
pub mod mirror;
pub mod orchestrator;

pub use config::DeployConfig;
pub use engine::{Operation, PermissionEngine};
pub use mask::{GroupId, Mask, ADMIN, PUBLIC};
