//! Tick scheduler
//!
//! Runs the reconcile loop on a fixed interval (or on demand), hands the
//! resulting actions to the container runtime and feeds refusals back.
//! A second loop probes every live instance and records the results.

use std::sync::Arc;
use std::time::Duration;

use converge_reconciler::Reconciler;
use converge_types::{
    DesiredSpec, InstanceId, InstancePhase, ProbeConfig, ReconcileAction, ReconcileEventEnvelope,
};
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::error::{DaemonResult, RuntimeError};
use crate::prober::Prober;
use crate::runtime::ContainerRuntime;

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Actions handed to the runtime
    pub issued: usize,

    /// Actions the runtime refused or did not finish in time
    pub failed: usize,
}

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    reconciler: Arc<Reconciler>,
    runtime: Arc<dyn ContainerRuntime>,
    prober: Arc<dyn Prober>,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        config: SchedulerConfig,
        reconciler: Arc<Reconciler>,
        runtime: Arc<dyn ContainerRuntime>,
        prober: Arc<dyn Prober>,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(10);
        let (shutdown_tx, _) = watch::channel(false);

        let scheduler = Arc::new(Self {
            config,
            reconciler,
            runtime,
            prober,
            trigger_tx,
            shutdown_tx,
        });

        (scheduler, trigger_rx)
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Subscribe to reconcile events.
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEventEnvelope> {
        self.reconciler.subscribe()
    }

    /// Replace the desired spec and reconcile right away.
    pub fn set_desired_spec(&self, spec: DesiredSpec) -> DaemonResult<()> {
        self.reconciler.set_desired_spec(spec)?;
        self.trigger_reconcile();
        Ok(())
    }

    /// Trigger an immediate reconciliation
    pub fn trigger_reconcile(&self) {
        // A full queue already guarantees a pending tick.
        let _ = self.trigger_tx.try_send(());
    }

    /// Run the reconcile and probe loops until `stop` is called.
    pub async fn start(self: Arc<Self>, mut trigger_rx: mpsc::Receiver<()>) {
        info!(
            tick_interval_ms = self.config.tick_interval_ms,
            "Scheduler started"
        );

        let reconcile_scheduler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let reconcile_handle = tokio::spawn(async move {
            let mut ticker = interval(reconcile_scheduler.config.tick_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reconcile_scheduler.reconcile_once().await;
                    }
                    Some(_) = trigger_rx.recv() => {
                        reconcile_scheduler.reconcile_once().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        let probe_scheduler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let probe_handle = tokio::spawn(async move {
            loop {
                let period = probe_scheduler.probe_interval();
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        probe_scheduler.probe_once().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        let (reconcile_result, probe_result) = tokio::join!(reconcile_handle, probe_handle);
        for result in [reconcile_result, probe_result] {
            if let Err(e) = result {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }

        info!("Scheduler stopped");
    }

    /// Stop the scheduler
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Tick once and dispatch the resulting actions.
    #[instrument(skip(self))]
    pub async fn reconcile_once(&self) -> TickSummary {
        let actions = self.reconciler.tick();
        if actions.is_empty() {
            return TickSummary::default();
        }

        let spec = self.reconciler.desired_spec();
        let action_timeout = self.config.action_timeout();

        let results = join_all(actions.iter().map(|action| {
            let spec = spec.clone();
            async move {
                let result = match timeout(action_timeout, self.dispatch(action, &spec)).await {
                    Ok(result) => result,
                    Err(_) => Err(RuntimeError::Timeout(action.instance_id().clone())),
                };
                (action, result)
            }
        }))
        .await;

        let mut summary = TickSummary {
            issued: results.len(),
            failed: 0,
        };

        for (action, result) in results {
            let Err(err) = result else { continue };
            summary.failed += 1;

            warn!(action = %action, error = %err, "Action failed");
            if let Err(e) = self.reconciler.report_action_failed(action, &err.to_string()) {
                error!(error = %e, "Could not record action failure");
            }

            if let (ReconcileAction::CreateInstance { id }, RuntimeError::Timeout(_)) =
                (action, &err)
            {
                self.reap_abandoned_create(id.clone());
            }
        }

        summary
    }

    /// Probe every live instance once.
    pub async fn probe_once(&self) -> usize {
        let spec = self.reconciler.desired_spec();
        let targets: Vec<_> = self
            .reconciler
            .snapshot()
            .instances
            .into_values()
            .filter(|instance| instance.is_live())
            .collect();

        let probes = targets.iter().map(|instance| {
            let config = probe_for(&spec, instance.phase);
            async move {
                let report = self.prober.probe(&instance.id, config).await;
                self.reconciler.record_probe(&instance.id, report);
            }
        });
        join_all(probes).await;

        debug!(probed = targets.len(), "Probe round complete");
        targets.len()
    }

    async fn dispatch(&self, action: &ReconcileAction, spec: &DesiredSpec) -> Result<(), RuntimeError> {
        match action {
            ReconcileAction::CreateInstance { id } => self.runtime.create(id, spec).await,
            ReconcileAction::DestroyInstance { id } => match self.runtime.destroy(id).await {
                // Already gone is what we wanted.
                Err(RuntimeError::NotFound(_)) => Ok(()),
                other => other,
            },
            ReconcileAction::RestartInstance { id } => self.runtime.restart(id, spec).await,
        }
    }

    /// The record for a timed-out create is gone, but the runtime may still
    /// finish the call. Remove whatever it leaves behind once the same
    /// window has passed again.
    fn reap_abandoned_create(&self, id: InstanceId) {
        let runtime = self.runtime.clone();
        let grace = self.config.action_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match runtime.destroy(&id).await {
                Ok(()) => info!(instance_id = %id, "Removed container left by timed-out create"),
                Err(RuntimeError::NotFound(_)) => {}
                Err(e) => warn!(
                    instance_id = %id,
                    error = %e,
                    "Could not remove container left by timed-out create"
                ),
            }
        });
    }

    fn probe_interval(&self) -> Duration {
        match self.config.probe_interval_ms {
            Some(ms) => Duration::from_millis(ms.max(1)),
            None => {
                let spec = self.reconciler.desired_spec();
                spec.readiness.period.min(spec.liveness.period)
            }
        }
    }
}

/// Readiness settings until an instance serves, liveness after.
fn probe_for(spec: &DesiredSpec, phase: InstancePhase) -> &ProbeConfig {
    match phase {
        InstancePhase::Ready => &spec.liveness,
        _ => &spec.readiness,
    }
}
