//! Converge Types - Core types for the deployment reconciler
//!
//! Converge drives a set of running workload instances toward a declared
//! desired state. This crate holds the vocabulary shared by the reconcile
//! loop and the collaborators around it.
//!
//! ## Key Concepts
//!
//! - **DesiredSpec**: immutable description of the intended state
//! - **ObservedInstance**: one running workload unit as the reconciler sees it
//! - **InstancePhase**: lifecycle phase, ordered from least to most ready
//! - **ReconcileAction**: corrective action emitted by a tick
//! - **Events**: observability stream of lifecycle transitions

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod action;
pub mod events;
pub mod ids;
pub mod instance;
pub mod spec;

pub mod duration_serde;

pub use action::{ReconcileAction, ReconcileActions};
pub use events::{EventSeverity, ReconcileEvent, ReconcileEventEnvelope};
pub use ids::InstanceId;
pub use instance::{InstancePhase, ObservedInstance, ProbeRecord, ProbeReport};
pub use spec::{
    DesiredSpec, ImageRef, InvalidSpec, ProbeConfig, ResourceQuantity, ResourceRequirements,
    TemplateHash,
};
