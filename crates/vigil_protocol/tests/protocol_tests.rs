//! End-to-end protocol scenarios driven through the mock harness:
//! nominal readiness, throttled hosts, critical gaps, required failures,
//! flapping visual requirements and the after-ready hook.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{record_events, Harness, MockScene, ScriptedUnit};
use parking_lot::Mutex;
use vigil_frame::HealthStatus;
use vigil_protocol::{
    AwakenedDisposition, LoadingEvent, Phase, ProtocolCallbacks, ProtocolError, ProtocolOptions,
    RequirementProbe, UnitStatus, VisualRequirement,
};

#[test]
fn test_nominal_run_reaches_ready() {
    let mut harness = Harness::new(ProtocolOptions::default());
    let unit = ScriptedUnit::new(&harness.clock, "grid-mesh", Phase::Warming)
        .steps(2)
        .step_cost(1.5);
    harness.protocol.register_unit(unit.boxed()).unwrap();
    let events = record_events(&harness.protocol);

    harness.start();
    assert!(harness.run_until_finished(16.67, 300));

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Ready);
    assert!(report.failed_units.is_empty());
    assert!(!report.stabilization_fail_safe);

    let awakened = report.awakened.expect("awakened evidence");
    assert_eq!(awakened.disposition, AwakenedDisposition::Normal);
    assert_eq!(awakened.burst_count, 5);

    // The run spends at least the stabilization sustain period.
    assert!(report.elapsed_ms >= 400.0);

    let events = events.lock();
    let launches = events
        .iter()
        .filter(|e| matches!(e, LoadingEvent::Launch))
        .count();
    assert_eq!(launches, 1);

    // Barrier and visual milestones in causal order.
    let index_of = |needle: &LoadingEvent| events.iter().position(|e| e == needle).unwrap();
    let barrier_enter = index_of(&LoadingEvent::BarrierEnter);
    let barrier_resolve = index_of(&LoadingEvent::BarrierResolve);
    let visual_enter = index_of(&LoadingEvent::VisualReadyEnter);
    let visual_complete = index_of(&LoadingEvent::VisualReadyComplete);
    let stabilizing_enter = index_of(&LoadingEvent::StabilizingEnter);
    let stabilizing_complete = index_of(&LoadingEvent::StabilizingComplete);
    let launch = index_of(&LoadingEvent::Launch);
    assert!(barrier_enter < barrier_resolve);
    assert!(barrier_resolve < visual_enter);
    assert!(visual_enter < visual_complete);
    assert!(visual_complete < stabilizing_enter);
    assert!(stabilizing_enter < stabilizing_complete);
    assert!(stabilizing_complete < launch);

    assert_eq!(
        harness.protocol.registry().get("grid-mesh").unwrap().status(),
        UnitStatus::Validated
    );
}

#[test]
fn test_throttled_host_passes_throttle_stable() {
    let mut harness = Harness::new(ProtocolOptions::default());
    let unit = ScriptedUnit::new(&harness.clock, "grid-mesh", Phase::Warming)
        .steps(2)
        .step_cost(1.5);
    harness.protocol.register_unit(unit.boxed()).unwrap();

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = transitions.clone();
    harness
        .protocol
        .guard()
        .set_on_status_change(move |old, new| {
            seen.lock().push((old, new));
        });

    harness.start();
    // The compositor has locked the callback chain to ~10 Hz.
    for _ in 0..20 {
        harness.frame(104.0);
    }
    assert!(!harness.protocol.is_finished());

    // The throttle lifts; the host returns to a healthy cadence for
    // stabilization.
    assert!(harness.run_until_finished(16.0, 300));

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Ready);
    assert_eq!(
        report.awakened.as_ref().unwrap().disposition,
        AwakenedDisposition::ThrottleStable
    );

    let transitions = transitions.lock();
    assert!(
        transitions.iter().any(|(_, new)| *new == HealthStatus::Locked),
        "guard never reported a throttle lock"
    );
    assert!(
        transitions
            .iter()
            .any(|t| *t == (HealthStatus::Recovering, HealthStatus::Healthy)),
        "guard never verified recovery"
    );
}

#[test]
fn test_critical_gap_pauses_and_recovers() {
    let mut harness = Harness::new(ProtocolOptions::default());
    // Heavy unit: 20 steps at 1ms against the aggressive 2ms budget.
    let unit = ScriptedUnit::new(&harness.clock, "atlas-decode", Phase::Warming)
        .heavy()
        .steps(20)
        .step_cost(1.0);
    harness.protocol.register_unit(unit.boxed()).unwrap();

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = transitions.clone();
    harness
        .protocol
        .guard()
        .set_on_status_change(move |old, new| {
            seen.lock().push((old, new));
        });

    harness.start();
    // A few healthy frames of loading, then a 200ms compositor stall.
    for _ in 0..3 {
        harness.frame(16.0);
    }
    assert_eq!(
        harness.protocol.registry().get("atlas-decode").unwrap().status(),
        UnitStatus::Loading
    );
    harness.frame(200.0);

    assert!(harness.run_until_finished(16.0, 300));

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Ready);
    assert!(report.failed_units.is_empty());
    assert_eq!(
        harness.protocol.registry().get("atlas-decode").unwrap().status(),
        UnitStatus::Validated
    );

    let transitions = transitions.lock();
    assert!(transitions
        .iter()
        .any(|(_, new)| *new == HealthStatus::Critical));
    assert!(transitions
        .iter()
        .any(|t| *t == (HealthStatus::Recovering, HealthStatus::Healthy)));
}

#[test]
fn test_required_failure_fails_fast() {
    let mut harness = Harness::new(ProtocolOptions::default());
    let unit = ScriptedUnit::new(&harness.clock, "level-geometry", Phase::Building).failing_at(1);
    harness.protocol.register_unit(unit.boxed()).unwrap();
    let events = record_events(&harness.protocol);

    harness.start();
    assert!(harness.run_until_finished(16.0, 20));

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Failed);
    assert_eq!(report.failed_units, vec!["level-geometry".to_string()]);
    match report.first_error {
        Some(ProtocolError::UnitFailed { ref id, .. }) => assert_eq!(id, "level-geometry"),
        ref other => panic!("expected unit failure, got {:?}", other),
    }

    let display_at_failure = harness.protocol.progress().1;
    // A few more frames: the failure is latched and display holds.
    for _ in 0..5 {
        harness.frame(16.0);
    }
    assert_eq!(harness.protocol.progress().1, display_at_failure);
    assert!(display_at_failure < 1.0);

    let events = events.lock();
    let failed = events
        .iter()
        .filter(|e| matches!(e, LoadingEvent::Failed { .. }))
        .count();
    assert_eq!(failed, 1);
    assert!(!events.iter().any(|e| matches!(e, LoadingEvent::BarrierEnter)));
    assert!(!events.iter().any(|e| matches!(e, LoadingEvent::Launch)));
}

#[test]
fn test_flapping_visual_requirement_fails() {
    let mut options = ProtocolOptions::default();
    options.visual.max_attempts = 6;
    let mut harness = Harness::new(options);

    let attempt = Arc::new(AtomicU32::new(0));
    let counter = attempt.clone();
    harness
        .protocol
        .add_visual_requirement(VisualRequirement::new(
            "hero-mesh",
            "Hero mesh",
            move |_scene| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n % 2 == 1 {
                    RequirementProbe::Ready
                } else {
                    RequirementProbe::NotReady("hero flickered out".to_string())
                }
            },
        ));

    harness.start();
    assert!(harness.run_until_finished(16.0, 300));

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Failed);
    match report.first_error {
        Some(ProtocolError::VisualRequirementUnmet(ref pending)) => {
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].id, "hero-mesh");
            assert_eq!(pending[0].reason, "hero flickered out");
        }
        ref other => panic!("expected visual failure, got {:?}", other),
    }
}

#[test]
fn test_after_ready_hook_fires_on_next_frame() {
    let mut harness = Harness::new(ProtocolOptions::default());
    let fired = Arc::new(AtomicU32::new(0));
    let hook = fired.clone();
    harness.protocol.set_callbacks(ProtocolCallbacks {
        on_after_ready: Some(Box::new(move |_scene| {
            hook.fetch_add(1, Ordering::SeqCst);
        })),
        ..Default::default()
    });

    harness.start();
    let mut frames_after_ready = 0;
    for _ in 0..300 {
        harness.frame(16.0);
        if harness.protocol.is_finished() {
            if frames_after_ready == 0 {
                // The declaring frame itself: the hook must not run here.
                assert_eq!(fired.load(Ordering::SeqCst), 0);
            }
            frames_after_ready += 1;
            if frames_after_ready >= 3 {
                break;
            }
        }
    }
    assert!(frames_after_ready >= 3, "run never finished");
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_steady_visual_requirement_validates() {
    let mut harness = Harness::new(ProtocolOptions::default());
    harness
        .protocol
        .add_visual_requirement(VisualRequirement::new(
            "hero-mesh",
            "Hero mesh",
            |scene: &MockScene| {
                if scene.hero_visible {
                    RequirementProbe::Ready
                } else {
                    RequirementProbe::NotReady("hero hidden".to_string())
                }
            },
        ));

    harness.start();
    assert!(harness.run_until_finished(16.0, 300));
    assert_eq!(harness.protocol.report().unwrap().phase, Phase::Ready);
}

#[test]
fn test_zero_units_reaches_ready() {
    let mut harness = Harness::new(ProtocolOptions::default());
    harness.start();
    assert!(harness.run_until_finished(16.0, 300));
    assert_eq!(harness.protocol.report().unwrap().phase, Phase::Ready);
}

#[test]
fn test_all_optional_failures_still_ready() {
    let mut harness = Harness::new(ProtocolOptions::default());
    harness
        .protocol
        .register_unit(
            ScriptedUnit::new(&harness.clock, "decals", Phase::Building)
                .optional()
                .failing_at(1)
                .boxed(),
        )
        .unwrap();
    harness
        .protocol
        .register_unit(
            ScriptedUnit::new(&harness.clock, "ambient-audio", Phase::Warming)
                .optional()
                .failing_at(1)
                .boxed(),
        )
        .unwrap();

    harness.start();
    assert!(harness.run_until_finished(16.0, 300));

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Ready);
    assert!(report.failed_units.is_empty());
    assert_eq!(report.skipped_units.len(), 2);
    assert!(report.skipped_units.contains(&"decals".to_string()));
    assert!(report.skipped_units.contains(&"ambient-audio".to_string()));
}

#[test]
fn test_cancellation_before_first_frame() {
    let mut harness = Harness::new(ProtocolOptions::default());
    harness
        .protocol
        .register_unit(ScriptedUnit::new(&harness.clock, "grid-mesh", Phase::Warming).boxed())
        .unwrap();

    harness.start();
    harness.protocol.cancel("menu closed");
    harness.frame(16.0);

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Failed);
    match report.first_error {
        Some(ProtocolError::Cancelled(ref reason)) => assert_eq!(reason, "menu closed"),
        ref other => panic!("expected cancellation, got {:?}", other),
    }
    // The unit never ran.
    assert_eq!(
        harness.protocol.registry().get("grid-mesh").unwrap().status(),
        UnitStatus::Pending
    );
}

#[test]
fn test_cancellation_mid_pipeline() {
    let mut harness = Harness::new(ProtocolOptions::default());
    harness
        .protocol
        .register_unit(ScriptedUnit::new(&harness.clock, "grid-mesh", Phase::Warming).boxed())
        .unwrap();

    harness.start();
    // Run into the visual-ready pipeline, then cancel from outside.
    let handle = harness.protocol.cancel_handle();
    for _ in 0..300 {
        harness.frame(16.0);
        if harness.protocol.phase() == Phase::VisualReady {
            break;
        }
    }
    assert_eq!(harness.protocol.phase(), Phase::VisualReady);
    handle.cancel("surface torn down");

    for _ in 0..10 {
        harness.frame(16.0);
        if harness.protocol.is_finished() {
            break;
        }
    }
    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Failed);
    assert!(matches!(
        report.first_error,
        Some(ProtocolError::Cancelled(_))
    ));
}

#[test]
fn test_awakened_zero_wait_hard_fails() {
    let mut options = ProtocolOptions::default();
    options.engine_awakened.max_wait_ms = 0.0;
    let mut harness = Harness::new(options);

    harness.start();
    assert!(harness.run_until_finished(16.0, 50));

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Failed);
    assert!(matches!(
        report.first_error,
        Some(ProtocolError::AwakenedHardFail(_))
    ));
    assert_eq!(
        report.awakened.as_ref().unwrap().disposition,
        AwakenedDisposition::HardFail
    );
}

#[test]
fn test_stabilization_fail_safe_with_stalled_renderer() {
    let mut harness = Harness::new(ProtocolOptions::default());
    harness.start();

    // Renderer runs normally until stabilization begins.
    for _ in 0..300 {
        harness.frame(16.0);
        if harness.protocol.phase() == Phase::Stabilizing {
            break;
        }
    }
    assert_eq!(harness.protocol.phase(), Phase::Stabilizing);

    // From here the renderer produces nothing: no stable frames can
    // accumulate, so the fail-safe cap must end stabilization.
    assert!({
        let mut finished = false;
        for _ in 0..200 {
            harness.frame_host_only(16.0);
            if harness.protocol.is_finished() {
                finished = true;
                break;
            }
        }
        finished
    });

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Ready);
    assert!(report.stabilization_fail_safe);
}

#[test]
fn test_failed_validator_fails_protocol() {
    let mut harness = Harness::new(ProtocolOptions::default());
    harness
        .protocol
        .register_unit(
            ScriptedUnit::new(&harness.clock, "nav-mesh", Phase::Building)
                .validated(false)
                .boxed(),
        )
        .unwrap();

    harness.start();
    assert!(harness.run_until_finished(16.0, 100));

    let report = harness.protocol.report().unwrap().clone();
    assert_eq!(report.phase, Phase::Failed);
    match report.first_error {
        Some(ProtocolError::UnitFailed { ref id, ref cause }) => {
            assert_eq!(id, "nav-mesh");
            assert!(cause.contains("validation"));
        }
        ref other => panic!("expected validation failure, got {:?}", other),
    }
}
