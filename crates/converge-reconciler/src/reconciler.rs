//! The reconcile loop.
//!
//! `Reconciler` owns the desired spec and the observed instance records.
//! Ticks are serialized against each other; probe reports and spec
//! replacement may arrive from any thread at any time.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use converge_types::{
    DesiredSpec, InstanceId, InstancePhase, ObservedInstance, ProbeReport, ReconcileAction,
    ReconcileActions, ReconcileEvent, ReconcileEventEnvelope,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, Result};
use crate::probe::{apply_probe, ProbeOutcome};
use crate::state::{plan, startup_timed_out, ReconcileState};

/// Drives observed instances toward a desired spec.
pub struct Reconciler {
    config: ReconcilerConfig,

    /// Replaced wholesale; readers clone the Arc.
    spec: RwLock<Arc<DesiredSpec>>,

    /// Per-instance records. Shard locks give each id exclusive access.
    instances: DashMap<InstanceId, ObservedInstance>,

    /// Held for the duration of a tick.
    tick_guard: Mutex<()>,

    ticks: AtomicU64,

    event_tx: broadcast::Sender<ReconcileEventEnvelope>,
}

impl Reconciler {
    /// Create a reconciler with no instances.
    pub fn new(spec: DesiredSpec, config: ReconcilerConfig) -> Result<Self> {
        spec.validate()?;
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            config,
            spec: RwLock::new(Arc::new(spec)),
            instances: DashMap::new(),
            tick_guard: Mutex::new(()),
            ticks: AtomicU64::new(0),
            event_tx,
        })
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Subscribe to reconcile events.
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Current desired spec.
    pub fn desired_spec(&self) -> Arc<DesiredSpec> {
        self.spec.read().clone()
    }

    /// Replace the desired spec. Takes effect on the next tick.
    #[instrument(skip(self, spec), fields(workload = %spec.name, replicas = spec.replica_count))]
    pub fn set_desired_spec(&self, spec: DesiredSpec) -> Result<()> {
        spec.validate()?;

        let event = ReconcileEvent::SpecReplaced {
            replica_count: spec.replica_count,
            image: spec.image.to_string(),
        };
        let workload = spec.name.clone();

        *self.spec.write() = Arc::new(spec);

        info!("Desired spec replaced");
        self.emit(event, &workload, None);
        Ok(())
    }

    /// Run one reconcile pass against the wall clock.
    pub fn tick(&self) -> ReconcileActions {
        self.tick_at(Utc::now())
    }

    /// Run one reconcile pass as of `now`.
    ///
    /// Returned actions are already reflected in the instance records:
    /// destroyed instances are Terminating, restarted ones Pending again and
    /// created ones present as Pending.
    pub fn tick_at(&self, now: DateTime<Utc>) -> ReconcileActions {
        let _guard = self.tick_guard.lock();
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;

        let spec = self.desired_spec();
        self.purge_terminated(&spec.name, tick);

        let state = ReconcileState {
            spec: spec.clone(),
            instances: self.collect_instances(),
        };

        let actions = plan(&state, now, &self.config, InstanceId::generate);

        for action in &actions {
            self.apply_action(action, &state, now, tick);
        }

        if actions.is_empty() {
            debug!(tick, live = state.live_count(), "Converged");
        } else {
            info!(
                tick,
                workload = %spec.name,
                creates = actions.creates().count(),
                destroys = actions.destroys().count(),
                restarts = actions.restarts().count(),
                "Reconcile actions issued"
            );
        }

        actions
    }

    /// Record a probe outcome for an instance.
    pub fn record_probe_result(&self, id: &InstanceId, success: bool, timestamp: DateTime<Utc>) {
        let report = if success {
            ProbeReport::success(timestamp)
        } else {
            ProbeReport::failure(timestamp)
        };
        self.record_probe(id, report);
    }

    /// Record a probe report, including any restart count the prober saw.
    ///
    /// Reports for unknown ids are dropped.
    pub fn record_probe(&self, id: &InstanceId, report: ProbeReport) {
        let spec = self.desired_spec();

        let outcome = match self.instances.get_mut(id) {
            Some(mut instance) => apply_probe(&mut instance, &spec, &report),
            None => {
                warn!(instance_id = %id, "Probe result for unknown instance");
                return;
            }
        };

        match outcome {
            ProbeOutcome::Stale => {
                debug!(instance_id = %id, at = %report.timestamp, "Ignoring stale probe result");
            }
            ProbeOutcome::Recorded => {}
            ProbeOutcome::Transition { from, to } => {
                if to == InstancePhase::Failed {
                    warn!(instance_id = %id, %from, "Instance failed liveness");
                } else {
                    info!(instance_id = %id, %from, %to, "Instance phase changed");
                }
                self.emit(
                    ReconcileEvent::PhaseChanged {
                        instance_id: id.clone(),
                        from,
                        to,
                    },
                    &spec.name,
                    None,
                );
            }
        }
    }

    /// The runtime refused an action issued by an earlier tick.
    ///
    /// Leaves the records so the next tick re-evaluates the gap: a refused
    /// create disappears, a refused destroy or restart is marked Failed and
    /// destroyed again.
    #[instrument(skip(self, action), fields(action = %action))]
    pub fn report_action_failed(&self, action: &ReconcileAction, reason: &str) -> Result<()> {
        let id = action.instance_id();

        match action {
            ReconcileAction::CreateInstance { .. } => {
                self.instances
                    .remove(id)
                    .ok_or_else(|| ReconcileError::InstanceNotFound(id.clone()))?;
            }
            ReconcileAction::DestroyInstance { .. } | ReconcileAction::RestartInstance { .. } => {
                let mut instance = self
                    .instances
                    .get_mut(id)
                    .ok_or_else(|| ReconcileError::InstanceNotFound(id.clone()))?;
                instance.phase = InstancePhase::Failed;
            }
        }

        warn!(reason, "Runtime refused action");
        self.emit(
            ReconcileEvent::ActionFailed {
                instance_id: id.clone(),
                action: action.kind().to_string(),
                reason: reason.to_string(),
            },
            &self.desired_spec().name,
            None,
        );
        Ok(())
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ReconcileState {
        ReconcileState {
            spec: self.desired_spec(),
            instances: self.collect_instances(),
        }
    }

    pub fn instance(&self, id: &InstanceId) -> Option<ObservedInstance> {
        self.instances.get(id).map(|entry| entry.value().clone())
    }

    /// Instances counting toward the replica count.
    pub fn live_count(&self) -> usize {
        self.instances.iter().filter(|entry| entry.is_live()).count()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn collect_instances(&self) -> BTreeMap<InstanceId, ObservedInstance> {
        self.instances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop records destroyed by a previous tick.
    fn purge_terminated(&self, workload: &str, tick: u64) {
        let terminated: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|entry| entry.phase == InstancePhase::Terminating)
            .map(|entry| entry.key().clone())
            .collect();

        for id in terminated {
            let removed = self
                .instances
                .remove_if(&id, |_, instance| {
                    instance.phase == InstancePhase::Terminating
                })
                .is_some();
            if removed {
                debug!(instance_id = %id, "Removed terminated instance");
                self.emit(
                    ReconcileEvent::InstanceRemoved { instance_id: id },
                    workload,
                    Some(tick),
                );
            }
        }
    }

    fn apply_action(
        &self,
        action: &ReconcileAction,
        state: &ReconcileState,
        now: DateTime<Utc>,
        tick: u64,
    ) {
        let workload = state.spec.name.as_str();

        match action {
            ReconcileAction::CreateInstance { id } => {
                self.instances.insert(
                    id.clone(),
                    ObservedInstance::pending(id.clone(), state.spec.template_hash(), now),
                );
                debug!(instance_id = %id, "Create issued");
                self.emit(
                    ReconcileEvent::InstanceCreated {
                        instance_id: id.clone(),
                    },
                    workload,
                    Some(tick),
                );
            }
            ReconcileAction::DestroyInstance { id } => {
                let Some(mut instance) = self.instances.get_mut(id) else {
                    return;
                };
                let from_phase = instance.phase;

                let timed_out = state
                    .instances
                    .get(id)
                    .is_some_and(|planned| startup_timed_out(planned, now, &self.config));
                if timed_out {
                    warn!(
                        instance_id = %id,
                        timeout_ms = self.config.startup_timeout.as_millis() as u64,
                        "Instance never reported a probe result"
                    );
                }

                instance.phase = InstancePhase::Terminating;
                drop(instance);

                debug!(instance_id = %id, %from_phase, "Destroy issued");
                self.emit(
                    ReconcileEvent::InstanceTerminating {
                        instance_id: id.clone(),
                        from_phase,
                    },
                    workload,
                    Some(tick),
                );
            }
            ReconcileAction::RestartInstance { id } => {
                let Some(mut instance) = self.instances.get_mut(id) else {
                    return;
                };
                instance.restart_count = instance.restart_count.saturating_add(1);
                instance.phase = InstancePhase::Pending;
                instance.created_at = now;
                instance.template_hash = state.spec.template_hash();
                instance.reset_probe_counters();
                let restart_count = instance.restart_count;
                drop(instance);

                debug!(instance_id = %id, restart_count, "Restart issued");
                self.emit(
                    ReconcileEvent::InstanceRestarted {
                        instance_id: id.clone(),
                        restart_count,
                    },
                    workload,
                    Some(tick),
                );
            }
        }
    }

    fn emit(&self, event: ReconcileEvent, workload: &str, tick: Option<u64>) {
        let mut envelope = ReconcileEventEnvelope::new(event, workload);
        if let Some(tick) = tick {
            envelope = envelope.with_tick(tick);
        }
        // No subscribers is fine.
        let _ = self.event_tx.send(envelope);
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("spec", &self.spec.read().name)
            .field("instances", &self.instances.len())
            .field("ticks", &self.tick_count())
            .finish()
    }
}
