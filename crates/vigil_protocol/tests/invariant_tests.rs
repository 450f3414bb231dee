//! Protocol invariants checked over full runs: display monotonicity,
//! band containment, event ordering, status partial order and
//! reset/re-execute equivalence.

mod common;

use std::sync::Arc;

use common::{record_events, Harness, ScriptedUnit};
use parking_lot::Mutex;
use vigil_protocol::{
    LoadingEvent, Phase, ProtocolCallbacks, ProtocolOptions, UnitStatus,
};

fn status_rank(status: UnitStatus) -> u8 {
    match status {
        UnitStatus::Pending => 0,
        UnitStatus::Loading => 1,
        UnitStatus::Loaded => 2,
        UnitStatus::Failed => 2,
        UnitStatus::Validated => 3,
        UnitStatus::Skipped => 3,
    }
}

fn populated_harness() -> Harness {
    let mut harness = Harness::new(ProtocolOptions::default());
    let units = [
        ("manifest", Phase::Fetching, true),
        ("textures", Phase::Fetching, false),
        ("level-geometry", Phase::Building, true),
        ("materials", Phase::Warming, true),
        ("probe-bake", Phase::Barrier, true),
        ("hud-fade", Phase::VisualReady, true),
    ];
    for (id, phase, required) in units {
        let mut unit = ScriptedUnit::new(&harness.clock, id, phase)
            .steps(3)
            .step_cost(1.0);
        if !required {
            unit = unit.optional();
        }
        harness.protocol.register_unit(unit.boxed()).unwrap();
    }
    harness
}

#[test]
fn test_display_monotone_and_bounded() {
    let mut harness = populated_harness();
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = samples.clone();
    harness.protocol.emitter().subscribe_all(move |event| {
        if let LoadingEvent::ProgressUpdate { raw, display } = event {
            sink.lock().push((*raw, *display));
        }
    });

    harness.start();
    assert!(harness.run_until_finished(16.0, 400));
    assert_eq!(harness.protocol.report().unwrap().phase, Phase::Ready);

    let samples = samples.lock();
    assert!(!samples.is_empty());
    let mut last_display = 0.0;
    for &(raw, display) in samples.iter() {
        assert!((0.0..=1.0).contains(&raw));
        assert!((0.0..=1.0).contains(&display));
        // Display lags raw (compression) but never runs ahead of it.
        assert!(display <= raw + 1e-9);
        assert!(display + 1e-9 >= last_display, "display decreased");
        last_display = display;
    }
    assert!((harness.protocol.progress().1 - 1.0).abs() < 1e-9);
}

#[test]
fn test_display_full_only_after_visual_complete() {
    let mut harness = populated_harness();
    let events = record_events(&harness.protocol);

    harness.start();
    assert!(harness.run_until_finished(16.0, 400));

    let events = events.lock();
    let visual_complete = events
        .iter()
        .position(|e| matches!(e, LoadingEvent::VisualReadyComplete))
        .expect("visual readiness must be verified");
    let first_full_display = events
        .iter()
        .position(|e| matches!(e, LoadingEvent::ProgressUpdate { display, .. } if *display >= 1.0))
        .expect("display must reach 1.0 on a ready run");
    assert!(visual_complete < first_full_display);
}

#[test]
fn test_phase_changes_fire_once_in_canonical_order() {
    let mut harness = populated_harness();
    let events = record_events(&harness.protocol);

    harness.start();
    assert!(harness.run_until_finished(16.0, 400));

    let events = events.lock();
    let changes: Vec<(Phase, Phase)> = events
        .iter()
        .filter_map(|e| match e {
            LoadingEvent::PhaseChange { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();

    // Each phase entered exactly once.
    let mut entered = Vec::new();
    for (_, to) in &changes {
        assert!(!entered.contains(to), "phase {} entered twice", to);
        entered.push(*to);
    }
    assert_eq!(
        entered,
        vec![
            Phase::Fetching,
            Phase::Building,
            Phase::Warming,
            Phase::Barrier,
            Phase::VisualReady,
            Phase::Stabilizing,
            Phase::Ready,
        ]
    );
    // Transitions chain: each `from` is the previous `to`.
    for pair in changes.windows(2) {
        assert_eq!(pair[0].1, pair[1].0);
    }
}

#[test]
fn test_unit_status_partial_order() {
    let mut harness = populated_harness();
    let statuses: Arc<Mutex<Vec<(String, UnitStatus)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = statuses.clone();
    harness.protocol.set_callbacks(ProtocolCallbacks {
        on_unit_status_change: Some(Box::new(move |id, status| {
            sink.lock().push((id.to_string(), status));
        })),
        ..Default::default()
    });

    harness.start();
    assert!(harness.run_until_finished(16.0, 400));
    assert_eq!(harness.protocol.report().unwrap().phase, Phase::Ready);

    let statuses = statuses.lock();
    let mut per_unit: std::collections::HashMap<&str, Vec<UnitStatus>> =
        std::collections::HashMap::new();
    for (id, status) in statuses.iter() {
        per_unit.entry(id).or_default().push(*status);
    }

    assert_eq!(per_unit.len(), 6);
    for (id, sequence) in per_unit {
        let mut last = 0;
        for status in sequence {
            let rank = status_rank(status);
            assert!(rank >= last, "unit '{}' regressed to {}", id, status);
            last = rank;
        }
    }
}

#[test]
fn test_launch_fires_iff_ready() {
    // Successful run: exactly one launch.
    let mut harness = populated_harness();
    let events = record_events(&harness.protocol);
    harness.start();
    assert!(harness.run_until_finished(16.0, 400));
    assert_eq!(
        events
            .lock()
            .iter()
            .filter(|e| matches!(e, LoadingEvent::Launch))
            .count(),
        1
    );

    // Failing run: no launch at all.
    let mut harness = Harness::new(ProtocolOptions::default());
    harness
        .protocol
        .register_unit(
            ScriptedUnit::new(&harness.clock, "broken", Phase::Fetching)
                .failing_at(1)
                .boxed(),
        )
        .unwrap();
    let events = record_events(&harness.protocol);
    harness.start();
    assert!(harness.run_until_finished(16.0, 50));
    assert_eq!(harness.protocol.report().unwrap().phase, Phase::Failed);
    assert!(!events.lock().iter().any(|e| matches!(e, LoadingEvent::Launch)));
}

#[test]
fn test_reset_and_reexecute_reaches_same_phase() {
    let mut harness = populated_harness();
    harness.start();
    assert!(harness.run_until_finished(16.0, 400));
    assert_eq!(harness.protocol.report().unwrap().phase, Phase::Ready);

    harness.protocol.reset().unwrap();
    assert_eq!(harness.protocol.phase(), Phase::Pending);
    assert!(harness.protocol.report().is_none());
    for entry in harness.protocol.registry().in_phase_order() {
        assert_eq!(entry.status(), UnitStatus::Pending);
    }

    harness.start();
    assert!(harness.run_until_finished(16.0, 400));
    assert_eq!(harness.protocol.report().unwrap().phase, Phase::Ready);
}

#[test]
fn test_forced_frames_precede_counted_naturals() {
    let mut harness = Harness::new(ProtocolOptions::default());
    harness.start();
    assert!(harness.run_until_finished(16.0, 400));

    let report = harness.protocol.report().unwrap().clone();
    let awakened = report.awakened.unwrap();
    // One full burst, every cycle observed by the mock renderer, and all
    // of it issued before any natural frame was counted.
    assert_eq!(awakened.burst_count, 5);
    assert_eq!(harness.scene.renders, awakened.burst_count);
    assert_eq!(harness.scene.begin_frames, harness.scene.end_frames);
    assert!(awakened.natural_frames > 0);
}

#[test]
fn test_report_phase_timings_cover_traversal() {
    let mut harness = populated_harness();
    harness.start();
    assert!(harness.run_until_finished(16.0, 400));

    let report = harness.protocol.report().unwrap().clone();
    let phases: Vec<Phase> = report.phase_timings.iter().map(|t| t.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Fetching,
            Phase::Building,
            Phase::Warming,
            Phase::Barrier,
            Phase::VisualReady,
            Phase::Stabilizing,
        ]
    );
    for timing in &report.phase_timings {
        assert!(timing.elapsed_ms >= 0.0);
    }
}
