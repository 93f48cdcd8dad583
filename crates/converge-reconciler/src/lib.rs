//! Converge reconciler
//!
//! A control loop that compares observed instances against a desired spec
//! and emits the create, destroy and restart actions that close the gap.
//!
//! The loop does not talk to a container runtime itself. Each tick returns
//! the actions it decided on; a driver (see `converge-daemon`) hands them
//! to the runtime and feeds probe results and refusals back in.
//!
//! ```
//! use converge_reconciler::{Reconciler, ReconcilerConfig};
//! use converge_types::{DesiredSpec, ImageRef};
//!
//! let spec = DesiredSpec::new("web", ImageRef::new("nginx", "1.25"), 3);
//! let reconciler = Reconciler::new(spec, ReconcilerConfig::default()).unwrap();
//!
//! let actions = reconciler.tick();
//! assert_eq!(actions.creates().count(), 3);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod error;
mod probe;
pub mod reconciler;
pub mod state;

pub use config::ReconcilerConfig;
pub use error::{ReconcileError, Result};
pub use probe::ProbeOutcome;
pub use reconciler::Reconciler;
pub use state::{plan, startup_timed_out, ReconcileState};
