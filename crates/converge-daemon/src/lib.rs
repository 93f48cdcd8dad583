//! Converge daemon library
//!
//! Wires the reconcile loop to the outside world:
//! - Layered configuration
//! - Manifest loading
//! - Container runtime and prober seams with in-memory implementations
//! - The tick scheduler

pub mod config;
pub mod error;
pub mod manifest;
pub mod prober;
pub mod runtime;
pub mod scheduler;

pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult, RuntimeError};
pub use manifest::DeploymentManifest;
pub use prober::{Prober, RuntimeProber};
pub use runtime::{ContainerRuntime, ContainerStatus, InMemoryRuntime};
pub use scheduler::{Scheduler, TickSummary};
