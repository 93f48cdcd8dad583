//! Property tests: any interleaving of spec changes, probe results and
//! refused actions never overshoots the desired count, and two quiet ticks
//! converge to the desired replica count.

use chrono::{DateTime, TimeZone, Utc};
use converge_reconciler::{plan, Reconciler, ReconcilerConfig};
use converge_types::{DesiredSpec, ImageRef, InstanceId, ProbeConfig, ReconcileAction};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Scale(u32),
    Tick,
    ProbeAll(bool),
    RefuseNextTick,
    Retag(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..8).prop_map(Op::Scale),
        Just(Op::Tick),
        any::<bool>().prop_map(Op::ProbeAll),
        Just(Op::RefuseNextTick),
        (0u8..3).prop_map(Op::Retag),
    ]
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn spec(replicas: u32) -> DesiredSpec {
    DesiredSpec::new("web", ImageRef::new("web", "1.0"), replicas)
        .with_readiness(ProbeConfig::new("/ready", 8080).with_failure_threshold(2))
        .with_liveness(ProbeConfig::new("/health", 8080).with_failure_threshold(2))
}

fn probe_all(reconciler: &Reconciler, success: bool, at: i64) {
    for id in reconciler.snapshot().instances.keys() {
        reconciler.record_probe_result(id, success, t(at));
    }
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// A tick never leaves more live instances than the larger of the
    /// desired count and what was live before it, and once the noise stops
    /// two ticks reach the desired count exactly.
    #[test]
    fn live_count_bounded_and_converges(
        initial in 0u32..8,
        ops in prop::collection::vec(arb_op(), 0..40),
    ) {
        let reconciler = Reconciler::new(spec(initial), ReconcilerConfig::default()).unwrap();
        let mut refuse_next = false;

        for (step, op) in ops.into_iter().enumerate() {
            let now = step as i64;
            match op {
                Op::Scale(replicas) => {
                    let next = reconciler.desired_spec().scaled(i64::from(replicas)).unwrap();
                    reconciler.set_desired_spec(next).unwrap();
                }
                Op::Retag(tag) => {
                    let mut next = (*reconciler.desired_spec()).clone();
                    next.image.tag = format!("1.{tag}");
                    reconciler.set_desired_spec(next).unwrap();
                }
                Op::Tick => {
                    let live_before = reconciler.live_count();
                    let actions = reconciler.tick_at(t(now));
                    if refuse_next {
                        for action in &actions {
                            reconciler.report_action_failed(action, "refused").unwrap();
                        }
                        refuse_next = false;
                    }
                    // Failed instances take part of the scale-down budget, so
                    // a tick may stop short of the target but never overshoot.
                    let desired = reconciler.desired_spec().replica_count as usize;
                    prop_assert!(reconciler.live_count() <= desired.max(live_before));
                }
                Op::ProbeAll(success) => probe_all(&reconciler, success, now),
                Op::RefuseNextTick => refuse_next = true,
            }
        }

        reconciler.tick_at(t(100));
        reconciler.tick_at(t(101));
        let desired = reconciler.desired_spec().replica_count as usize;
        prop_assert_eq!(reconciler.live_count(), desired);
        prop_assert!(reconciler.tick_at(t(102)).is_empty());
    }

    /// Planning from an empty state creates exactly the desired count.
    #[test]
    fn empty_state_plans_only_creates(replicas in 0u32..64) {
        let state = converge_reconciler::ReconcileState::new(spec(replicas).into());
        let actions = plan(&state, t(0), &ReconcilerConfig::default(), InstanceId::generate);

        prop_assert_eq!(actions.len(), replicas as usize);
        let only_creates = actions
            .iter()
            .all(|a| matches!(a, ReconcileAction::CreateInstance { .. }));
        prop_assert!(only_creates);
    }
}
