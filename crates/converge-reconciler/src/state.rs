//! Reconcile state and the planning step.
//!
//! `plan` is a pure function from a state snapshot to the actions that
//! close the gap between observed and desired. The only input it does not
//! control is the id generator handed in by the caller.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use converge_types::{
    DesiredSpec, InstanceId, InstancePhase, ObservedInstance, ReconcileAction, ReconcileActions,
};
use serde::{Deserialize, Serialize};

use crate::config::ReconcilerConfig;
use crate::probe::delay_elapsed;

/// Observed instances plus the spec they are reconciled against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileState {
    pub spec: Arc<DesiredSpec>,
    pub instances: BTreeMap<InstanceId, ObservedInstance>,
}

impl ReconcileState {
    pub fn new(spec: Arc<DesiredSpec>) -> Self {
        Self {
            spec,
            instances: BTreeMap::new(),
        }
    }

    pub fn with_instances(
        spec: Arc<DesiredSpec>,
        instances: impl IntoIterator<Item = ObservedInstance>,
    ) -> Self {
        Self {
            spec,
            instances: instances.into_iter().map(|i| (i.id.clone(), i)).collect(),
        }
    }

    /// Instances in Pending, Running or Ready.
    pub fn live_count(&self) -> usize {
        self.instances.values().filter(|i| i.is_live()).count()
    }

    pub fn count_in(&self, phase: InstancePhase) -> usize {
        self.instances.values().filter(|i| i.phase == phase).count()
    }
}

/// A Pending instance that has produced no probe result since it was
/// (re)started within the startup timeout.
pub fn startup_timed_out(
    instance: &ObservedInstance,
    now: DateTime<Utc>,
    config: &ReconcilerConfig,
) -> bool {
    instance.phase == InstancePhase::Pending
        && instance
            .last_probe
            .map_or(true, |probe| probe.at < instance.created_at)
        && delay_elapsed(instance.created_at, now, config.startup_timeout)
}

/// Phase the planner acts on: a stalled Pending instance counts as Failed.
fn effective_phase(
    instance: &ObservedInstance,
    now: DateTime<Utc>,
    config: &ReconcilerConfig,
) -> InstancePhase {
    if startup_timed_out(instance, now, config) {
        InstancePhase::Failed
    } else {
        instance.phase
    }
}

/// Compute the actions for one tick.
///
/// Emits destroys first (in selection order), then restarts, then creates.
/// Failed instances are always destroyed and keep their slot for this
/// tick, so their replacements are created on the next one.
pub fn plan(
    state: &ReconcileState,
    now: DateTime<Utc>,
    config: &ReconcilerConfig,
    mut next_id: impl FnMut() -> InstanceId,
) -> ReconcileActions {
    let spec = &state.spec;

    let mut candidates: Vec<(&ObservedInstance, InstancePhase)> = state
        .instances
        .values()
        .filter(|i| i.phase != InstancePhase::Terminating)
        .map(|i| (i, effective_phase(i, now, config)))
        .collect();

    // Least ready first; within a phase the youngest goes first.
    candidates.sort_by_key(|(instance, phase)| {
        (
            phase.removal_rank(),
            Reverse(instance.created_at),
            instance.id.clone(),
        )
    });

    let live = candidates.iter().filter(|(_, p)| p.is_live()).count();
    let failed = candidates
        .iter()
        .filter(|(_, p)| *p == InstancePhase::Failed)
        .count();
    let delta = i64::from(spec.replica_count) - live as i64;

    let excess = if delta < 0 { delta.unsigned_abs() as usize } else { 0 };
    let destroy_count = excess.max(failed);

    // Failed candidates sort first, so this takes every failed instance
    // plus, on scale-down, the least ready live ones.
    let destroyed: Vec<&InstanceId> = candidates
        .iter()
        .take(destroy_count)
        .map(|(i, _)| &i.id)
        .collect();
    let destroyed_set: HashSet<&InstanceId> = destroyed.iter().copied().collect();

    let mut actions = ReconcileActions::new();
    for id in &destroyed {
        actions.push(ReconcileAction::DestroyInstance { id: (*id).clone() });
    }

    for id in plan_restarts(&candidates, &destroyed_set, spec, config) {
        actions.push(ReconcileAction::RestartInstance { id });
    }

    let creates = if delta > 0 {
        (delta as usize).saturating_sub(failed)
    } else {
        0
    };
    for _ in 0..creates {
        actions.push(ReconcileAction::CreateInstance { id: next_id() });
    }

    actions
}

/// Surviving live instances still on an old template.
///
/// Instances that are not serving are restarted freely; Ready ones only
/// while the number of live instances out of service stays within
/// `max_unavailable`. Oldest first.
fn plan_restarts(
    candidates: &[(&ObservedInstance, InstancePhase)],
    destroyed: &HashSet<&InstanceId>,
    spec: &DesiredSpec,
    config: &ReconcilerConfig,
) -> Vec<InstanceId> {
    let desired = spec.template_hash();

    let survivors: Vec<(&ObservedInstance, InstancePhase)> = candidates
        .iter()
        .filter(|(i, p)| p.is_live() && !destroyed.contains(&i.id))
        .copied()
        .collect();

    let mut outdated: Vec<&(&ObservedInstance, InstancePhase)> = survivors
        .iter()
        .filter(|(i, _)| i.template_hash != desired)
        .collect();
    if outdated.is_empty() {
        return Vec::new();
    }
    outdated.sort_by_key(|(i, _)| (i.created_at, i.id.clone()));

    let mut unavailable = survivors
        .iter()
        .filter(|(_, p)| *p != InstancePhase::Ready)
        .count();

    let mut restarts = Vec::new();
    for (instance, phase) in outdated {
        if *phase == InstancePhase::Ready {
            if unavailable >= config.max_unavailable as usize {
                continue;
            }
            unavailable += 1;
        }
        restarts.push(instance.id.clone());
    }
    restarts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use converge_types::{ImageRef, ProbeRecord};
    use std::time::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn spec(replicas: u32) -> Arc<DesiredSpec> {
        Arc::new(DesiredSpec::new(
            "web",
            ImageRef::new("web", "1.0"),
            replicas,
        ))
    }

    fn instance(spec: &DesiredSpec, phase: InstancePhase, created: i64) -> ObservedInstance {
        let mut instance =
            ObservedInstance::pending(InstanceId::generate(), spec.template_hash(), t(created));
        instance.phase = phase;
        instance.last_probe = Some(ProbeRecord {
            at: t(created + 1),
            success: phase != InstancePhase::Failed,
        });
        instance
    }

    fn plan_at(state: &ReconcileState, now: i64) -> ReconcileActions {
        plan(state, t(now), &ReconcilerConfig::default(), InstanceId::generate)
    }

    #[test]
    fn test_empty_state_creates_replicas() {
        let state = ReconcileState::new(spec(3));
        let actions = plan_at(&state, 0);

        assert_eq!(actions.len(), 3);
        assert_eq!(actions.creates().count(), 3);
    }

    #[test]
    fn test_zero_replicas_on_empty_state_is_noop() {
        let state = ReconcileState::new(spec(0));
        assert!(plan_at(&state, 0).is_empty());
    }

    #[test]
    fn test_converged_state_is_idempotent() {
        let spec = spec(2);
        let state = ReconcileState::with_instances(
            spec.clone(),
            [
                instance(&spec, InstancePhase::Ready, 0),
                instance(&spec, InstancePhase::Pending, 1),
            ],
        );

        assert!(plan_at(&state, 10).is_empty());
    }

    #[test]
    fn test_scale_down_prefers_failed() {
        let spec = spec(1);
        let a = instance(&spec, InstancePhase::Ready, 0);
        let b = instance(&spec, InstancePhase::Pending, 1);
        let c = instance(&spec, InstancePhase::Failed, 2);
        let state = ReconcileState::with_instances(spec, [a, b, c.clone()]);

        let actions = plan_at(&state, 10);
        assert_eq!(
            actions.as_slice(),
            &[ReconcileAction::DestroyInstance { id: c.id }]
        );
    }

    #[test]
    fn test_scale_down_removes_youngest_within_phase() {
        let spec = spec(1);
        let old = instance(&spec, InstancePhase::Ready, 0);
        let young = instance(&spec, InstancePhase::Ready, 5);
        let state = ReconcileState::with_instances(spec, [old.clone(), young.clone()]);

        let actions = plan_at(&state, 10);
        assert_eq!(actions.destroys().collect::<Vec<_>>(), vec![&young.id]);
    }

    #[test]
    fn test_drain_to_zero() {
        let spec = spec(0);
        let state = ReconcileState::with_instances(
            spec.clone(),
            [
                instance(&spec, InstancePhase::Ready, 0),
                instance(&spec, InstancePhase::Running, 1),
                instance(&spec, InstancePhase::Pending, 2),
            ],
        );

        let actions = plan_at(&state, 10);
        assert_eq!(actions.destroys().count(), 3);
        assert_eq!(actions.creates().count(), 0);
    }

    #[test]
    fn test_failed_instance_replaced_on_following_tick() {
        let spec = spec(2);
        let ready = instance(&spec, InstancePhase::Ready, 0);
        let failed = instance(&spec, InstancePhase::Failed, 1);
        let state = ReconcileState::with_instances(spec, [ready, failed.clone()]);

        let actions = plan_at(&state, 10);
        assert_eq!(
            actions.as_slice(),
            &[ReconcileAction::DestroyInstance { id: failed.id }]
        );
    }

    #[test]
    fn test_terminating_instances_are_ignored() {
        let spec = spec(1);
        let ready = instance(&spec, InstancePhase::Ready, 0);
        let terminating = instance(&spec, InstancePhase::Terminating, 1);
        let state = ReconcileState::with_instances(spec, [ready, terminating]);

        assert!(plan_at(&state, 10).is_empty());
    }

    #[test]
    fn test_stalled_pending_instance_is_destroyed() {
        let spec = spec(1);
        let mut stalled =
            ObservedInstance::pending(InstanceId::generate(), spec.template_hash(), t(0));
        stalled.last_probe = None;
        let state = ReconcileState::with_instances(spec, [stalled.clone()]);

        let config = ReconcilerConfig {
            startup_timeout: Duration::from_secs(30),
            ..Default::default()
        };

        assert!(plan(&state, t(29), &config, InstanceId::generate).is_empty());

        let actions = plan(&state, t(30), &config, InstanceId::generate);
        assert_eq!(
            actions.as_slice(),
            &[ReconcileAction::DestroyInstance { id: stalled.id }]
        );
    }

    #[test]
    fn test_template_change_restarts_within_budget() {
        let old_spec = spec(3);
        let instances = [
            instance(&old_spec, InstancePhase::Ready, 0),
            instance(&old_spec, InstancePhase::Ready, 1),
            instance(&old_spec, InstancePhase::Ready, 2),
        ];
        let oldest = instances[0].id.clone();

        let mut new_spec = (*old_spec).clone();
        new_spec.image.tag = "1.1".into();
        let state = ReconcileState::with_instances(Arc::new(new_spec), instances);

        let actions = plan_at(&state, 10);
        assert_eq!(
            actions.as_slice(),
            &[ReconcileAction::RestartInstance { id: oldest }]
        );
    }

    #[test]
    fn test_template_change_waits_while_instance_unavailable() {
        let old_spec = spec(2);
        let mut new_spec = (*old_spec).clone();
        new_spec.env.insert("MODE".into(), "blue".into());

        let restarted = instance(&new_spec, InstancePhase::Pending, 5);
        let outdated = instance(&old_spec, InstancePhase::Ready, 0);
        let state = ReconcileState::with_instances(Arc::new(new_spec), [restarted, outdated]);

        assert!(plan_at(&state, 10).is_empty());
    }

    #[test]
    fn test_outdated_instances_not_serving_restart_freely() {
        let old_spec = spec(2);
        let mut new_spec = (*old_spec).clone();
        new_spec.image.tag = "2.0".into();

        let state = ReconcileState::with_instances(
            Arc::new(new_spec),
            [
                instance(&old_spec, InstancePhase::Pending, 0),
                instance(&old_spec, InstancePhase::Running, 1),
            ],
        );

        assert_eq!(plan_at(&state, 10).restarts().count(), 2);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let spec = spec(1);
        let state = ReconcileState::with_instances(
            spec.clone(),
            [
                instance(&spec, InstancePhase::Ready, 0),
                instance(&spec, InstancePhase::Ready, 0),
                instance(&spec, InstancePhase::Running, 0),
            ],
        );

        let first = plan_at(&state, 10);
        let second = plan_at(&state, 10);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
