//! Probe bookkeeping.
//!
//! Folds one probe report into an instance record and decides the phase
//! transition it causes, if any. Callers hold exclusive access to the
//! record for the duration of the call.

use std::time::Duration;

use chrono::{DateTime, Utc};
use converge_types::{DesiredSpec, InstancePhase, ObservedInstance, ProbeRecord, ProbeReport};

/// Outcome of applying a probe report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Report was older than the last one recorded.
    Stale,
    /// Recorded; phase unchanged.
    Recorded,
    /// Recorded and the phase moved.
    Transition {
        from: InstancePhase,
        to: InstancePhase,
    },
}

/// Whether `delay` has elapsed between `since` and `at`.
pub(crate) fn delay_elapsed(since: DateTime<Utc>, at: DateTime<Utc>, delay: Duration) -> bool {
    (at - since)
        .to_std()
        .map(|elapsed| elapsed >= delay)
        .unwrap_or(false)
}

/// Apply a probe report to an instance record.
pub(crate) fn apply_probe(
    instance: &mut ObservedInstance,
    spec: &DesiredSpec,
    report: &ProbeReport,
) -> ProbeOutcome {
    if let Some(last) = instance.last_probe {
        if report.timestamp < last.at {
            return ProbeOutcome::Stale;
        }
    }

    instance.last_probe = Some(ProbeRecord {
        at: report.timestamp,
        success: report.success,
    });

    if !instance.is_live() {
        return ProbeOutcome::Recorded;
    }

    let from = instance.phase;

    if let Some(restarts) = report.observed_restarts {
        if restarts > instance.observed_restarts {
            // Restarted underneath us: readiness has to be earned again.
            instance.restart_count = instance
                .restart_count
                .saturating_add(restarts - instance.observed_restarts);
            instance.observed_restarts = restarts;
            instance.created_at = report.timestamp;
            instance.reset_probe_counters();
            instance.phase = InstancePhase::Pending;
        }
    }

    if report.success {
        record_success(instance, spec, report.timestamp);
    } else {
        record_failure(instance, spec, report.timestamp);
    }

    if instance.phase == from {
        ProbeOutcome::Recorded
    } else {
        ProbeOutcome::Transition {
            from,
            to: instance.phase,
        }
    }
}

fn record_success(instance: &mut ObservedInstance, spec: &DesiredSpec, at: DateTime<Utc>) {
    instance.consecutive_failures = 0;

    if !delay_elapsed(instance.created_at, at, spec.readiness.initial_delay) {
        return;
    }

    instance.consecutive_successes = instance.consecutive_successes.saturating_add(1);

    if instance.phase == InstancePhase::Pending {
        instance.phase = InstancePhase::Running;
    }
    if instance.phase == InstancePhase::Running
        && instance.consecutive_successes >= spec.readiness.failure_threshold
    {
        instance.phase = InstancePhase::Ready;
    }
}

fn record_failure(instance: &mut ObservedInstance, spec: &DesiredSpec, at: DateTime<Utc>) {
    instance.consecutive_successes = 0;

    if !delay_elapsed(instance.created_at, at, spec.liveness.initial_delay) {
        return;
    }

    instance.consecutive_failures = instance.consecutive_failures.saturating_add(1);

    if instance.consecutive_failures >= spec.liveness.failure_threshold {
        instance.phase = InstancePhase::Failed;
    } else if instance.phase == InstancePhase::Ready
        && instance.consecutive_failures >= spec.readiness.failure_threshold
    {
        instance.phase = InstancePhase::Running;
    }
}
