//! Loading protocol
//!
//! The ordered pipeline that drives a scene from "assets requested" to
//! readiness: fetching, building and warming execute load units under the
//! frame budget; the barrier phase demands camera evidence from the
//! renderer; visual-ready runs the engine-awakened gate, visual units and
//! the visual requirement checker; stabilizing holds until render
//! stability has been sustained. Every transition is gated by evidence,
//! never by a timer - the three authoritative timeouts (engine-awakened
//! hard wait, visual attempts, stabilization cap) are the only clocks.
//!
//! The protocol is pumped from the host: `on_host_frame` once per host
//! frame callback, `on_before_render` / `on_after_render` from the
//! renderer's observables. It never panics at the run surface and never
//! returns an error to the caller; every run ends in a [`ProtocolReport`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vigil_frame::{FrameClock, FrameHealthGuard};
use vigil_load::{
    LoadExecutor, LoadUnit, OptionalPool, Phase, PoolPump, SequencePump, SequentialDrive,
    UnitRegistry, UnitStatus, UnitTransition,
};

use crate::awakened::{AwakenedPump, EngineAwakenedBarrier};
use crate::emitter::{LoadingEvent, StateEmitter};
use crate::error::{AwakenedReport, PhaseTiming, ProtocolError, ProtocolReport};
use crate::options::{ProtocolCallbacks, ProtocolOptions};
use crate::progress::ProgressModel;
use crate::render_ready::{BarrierPump, RenderReadyBarrier};
use crate::surface::RenderSurface;
use crate::visual::{CheckerPump, VisualReadyChecker, VisualRequirement};

/// Cooperative cancellation handle, safe to hand to UI code.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelHandle {
    /// Request cancellation; honored at the next phase boundary or
    /// between sequential units.
    pub fn cancel(&self, reason: impl Into<String>) {
        *self.reason.lock() = Some(reason.into());
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

enum DriveState<S> {
    Idle,
    /// Fetching, building or warming units (the phase field says which)
    Units {
        required: SequentialDrive,
        optionals: OptionalPool,
    },
    Barrier {
        barrier: RenderReadyBarrier,
        required: SequentialDrive,
        optionals: OptionalPool,
        barrier_confirmed: bool,
    },
    Awakened {
        barrier: EngineAwakenedBarrier,
    },
    VisualUnits {
        required: SequentialDrive,
        optionals: OptionalPool,
    },
    VisualCheck {
        checker: VisualReadyChecker<S>,
    },
    Stabilizing {
        entered_ms: f64,
        window_start_ms: f64,
        stable_frames: u32,
        last_frame_ms: Option<f64>,
    },
    /// Ready declared; the after-ready hook fires on the next host frame
    AwaitAfterReady,
    Done,
}

/// The readiness protocol state machine.
pub struct LoadingProtocol<S> {
    options: ProtocolOptions,
    callbacks: ProtocolCallbacks<S>,
    guard: Arc<FrameHealthGuard>,
    executor: LoadExecutor,
    registry: UnitRegistry<S>,
    progress: ProgressModel,
    emitter: Arc<StateEmitter>,
    requirements: Vec<VisualRequirement<S>>,
    cancelled: Arc<AtomicBool>,
    cancel_reason: Arc<Mutex<Option<String>>>,
    phase: Phase,
    state: DriveState<S>,
    run_started_ms: Option<f64>,
    phase_started_ms: f64,
    phase_timings: Vec<PhaseTiming>,
    awakened_report: Option<AwakenedReport>,
    stabilization_fail_safe: bool,
    report: Option<ProtocolReport>,
    last_emitted_progress: (f64, f64),
}

impl<S: RenderSurface> LoadingProtocol<S> {
    /// Create a protocol with its own health guard.
    pub fn new(clock: Arc<dyn FrameClock>, options: ProtocolOptions) -> Self {
        let guard = Arc::new(FrameHealthGuard::new(options.guard.clone()));
        Self::with_guard(clock, options, guard)
    }

    /// Create a protocol sharing an externally owned guard (one guard per
    /// surface; several protocols may observe it).
    pub fn with_guard(
        clock: Arc<dyn FrameClock>,
        options: ProtocolOptions,
        guard: Arc<FrameHealthGuard>,
    ) -> Self {
        let executor = LoadExecutor::new(options.executor.clone(), clock, guard.clone());
        let progress = ProgressModel::new(options.progress.clone());
        Self {
            options,
            callbacks: ProtocolCallbacks::default(),
            guard,
            executor,
            registry: UnitRegistry::new(),
            progress,
            emitter: Arc::new(StateEmitter::new()),
            requirements: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_reason: Arc::new(Mutex::new(None)),
            phase: Phase::Pending,
            state: DriveState::Idle,
            run_started_ms: None,
            phase_started_ms: 0.0,
            phase_timings: Vec::new(),
            awakened_report: None,
            stabilization_fail_safe: false,
            report: None,
            last_emitted_progress: (0.0, 0.0),
        }
    }

    /// Register a load unit. Only valid before `start`.
    pub fn register_unit(&mut self, unit: Box<dyn LoadUnit<S>>) -> Result<(), ProtocolError> {
        if !matches!(self.state, DriveState::Idle) {
            return Err(ProtocolError::InvalidState(
                "units cannot be registered while a run is active".to_string(),
            ));
        }
        let id = unit.id().to_string();
        let phase = unit.phase();
        let required = unit.required();
        self.registry.register(unit).map_err(|err| match err {
            vigil_load::RegistryError::DuplicateRegistration(id) => {
                ProtocolError::DuplicateRegistration(id)
            }
            other => ProtocolError::InvalidState(other.to_string()),
        })?;
        self.progress.register_unit(id, phase, required);
        Ok(())
    }

    /// Override a unit's progress weight.
    pub fn set_unit_weight(&mut self, id: &str, weight: f64) {
        self.progress.set_weight(id, weight);
    }

    /// Add a visual requirement evaluated in the visual-ready phase.
    pub fn add_visual_requirement(&mut self, requirement: VisualRequirement<S>) {
        self.requirements.push(requirement);
    }

    /// Install caller hooks.
    pub fn set_callbacks(&mut self, callbacks: ProtocolCallbacks<S>) {
        self.callbacks = callbacks;
    }

    /// The emitter observers subscribe to.
    pub fn emitter(&self) -> &Arc<StateEmitter> {
        &self.emitter
    }

    /// The health guard in use.
    pub fn guard(&self) -> &Arc<FrameHealthGuard> {
        &self.guard
    }

    /// The unit registry, read-only.
    pub fn registry(&self) -> &UnitRegistry<S> {
        &self.registry
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current raw and display progress.
    pub fn progress(&self) -> (f64, f64) {
        (self.progress.raw(), self.progress.display())
    }

    /// Whether the run has reached a terminal phase.
    pub fn is_finished(&self) -> bool {
        self.report.is_some()
    }

    /// The run's result, present once the run is finished.
    pub fn report(&self) -> Option<&ProtocolReport> {
        self.report.as_ref()
    }

    /// A cancellation handle usable from outside the pump.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: self.cancelled.clone(),
            reason: self.cancel_reason.clone(),
        }
    }

    /// Request cancellation directly.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.cancel_handle().cancel(reason);
    }

    /// Begin the run. Fails when a run is already active or finished.
    pub fn start(&mut self, now_ms: f64) -> Result<(), ProtocolError> {
        if !matches!(self.state, DriveState::Idle) || self.phase != Phase::Pending {
            return Err(ProtocolError::InvalidState(
                "execute called twice on an active protocol".to_string(),
            ));
        }
        self.run_started_ms = Some(now_ms);
        self.phase_started_ms = now_ms;
        log::info!(
            "loading protocol started: {} units, {} visual requirements",
            self.registry.len(),
            self.requirements.len()
        );
        self.enter_phase(Phase::Fetching, now_ms);
        self.state = self.unit_state_for(Phase::Fetching);
        Ok(())
    }

    /// Return a finished protocol to the idle state for another run.
    ///
    /// Unit statuses return to pending (elapsed hints survive) and the
    /// registered units and requirements stay in place.
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        if !matches!(
            self.state,
            DriveState::Idle | DriveState::Done | DriveState::AwaitAfterReady
        ) {
            return Err(ProtocolError::InvalidState(
                "reset requires an idle or finished protocol".to_string(),
            ));
        }
        self.registry.reset_all();
        self.progress.reset();
        for entry in self.registry.in_phase_order() {
            self.progress
                .register_unit(entry.id().to_string(), entry.phase(), entry.required());
        }
        self.cancelled.store(false, Ordering::Release);
        *self.cancel_reason.lock() = None;
        self.phase = Phase::Pending;
        self.state = DriveState::Idle;
        self.run_started_ms = None;
        self.phase_timings.clear();
        self.awakened_report = None;
        self.stabilization_fail_safe = false;
        self.report = None;
        self.last_emitted_progress = (0.0, 0.0);
        Ok(())
    }

    /// Dispose every registered unit and clear the registry.
    pub fn clear_units(&mut self) {
        self.registry.clear();
    }
}

impl<S: RenderSurface> LoadingProtocol<S> {
    /// Drive the protocol from one host frame callback.
    pub fn on_host_frame(&mut self, scene: &mut S, now_ms: f64) {
        self.guard.tick(now_ms);
        self.emitter.flush(now_ms);
        if self.progress.tick() {
            self.emit_progress(now_ms);
        }

        if matches!(self.state, DriveState::Idle | DriveState::Done) {
            return;
        }

        if matches!(self.state, DriveState::AwaitAfterReady) {
            // The frame after the one that declared readiness.
            if let Some(hook) = self.callbacks.on_after_ready.take() {
                hook(scene);
            }
            self.state = DriveState::Done;
            return;
        }

        if let Some(error) = self.take_cancel() {
            self.fail(error, now_ms);
            return;
        }

        loop {
            let state = std::mem::replace(&mut self.state, DriveState::Done);
            match state {
                DriveState::Units {
                    required,
                    optionals,
                } => {
                    let phase = self.phase;
                    match self.pump_units(scene, now_ms, required, optionals) {
                        UnitsStep::Pending(required, optionals) => {
                            self.state = DriveState::Units {
                                required,
                                optionals,
                            };
                            return;
                        }
                        UnitsStep::Failed(error) => {
                            self.fail(error, now_ms);
                            return;
                        }
                        UnitsStep::Complete => {
                            if let Some(error) = self.take_cancel() {
                                self.fail(error, now_ms);
                                return;
                            }
                            let next = match phase {
                                Phase::Fetching => Phase::Building,
                                Phase::Building => Phase::Warming,
                                _ => Phase::Barrier,
                            };
                            self.enter_phase(next, now_ms);
                            self.state = if next == Phase::Barrier {
                                let (required, optionals) = self.unit_drives_for(Phase::Barrier);
                                DriveState::Barrier {
                                    barrier: RenderReadyBarrier::new(
                                        self.options.barrier_validation.clone(),
                                    ),
                                    required,
                                    optionals,
                                    barrier_confirmed: false,
                                }
                            } else {
                                self.unit_state_for(next)
                            };
                        }
                    }
                }
                DriveState::Barrier {
                    barrier,
                    required,
                    optionals,
                    barrier_confirmed,
                } => {
                    let units_done = required.is_done() && optionals.is_done();
                    let (required, optionals) = if units_done {
                        (required, optionals)
                    } else {
                        match self.pump_units(scene, now_ms, required, optionals) {
                            UnitsStep::Pending(required, optionals) => {
                                self.state = DriveState::Barrier {
                                    barrier,
                                    required,
                                    optionals,
                                    barrier_confirmed,
                                };
                                return;
                            }
                            UnitsStep::Failed(error) => {
                                self.fail(error, now_ms);
                                return;
                            }
                            UnitsStep::Complete => {
                                (SequentialDrive::new(Vec::new()), OptionalPool::new(Vec::new()))
                            }
                        }
                    };

                    if !barrier_confirmed {
                        // Waiting for after-render evidence.
                        self.state = DriveState::Barrier {
                            barrier,
                            required,
                            optionals,
                            barrier_confirmed,
                        };
                        return;
                    }

                    if let Err(error) = self.finish_barrier(scene, now_ms) {
                        self.fail(error, now_ms);
                        return;
                    }
                    if let Some(error) = self.take_cancel() {
                        self.fail(error, now_ms);
                        return;
                    }
                    self.enter_phase(Phase::VisualReady, now_ms);
                    self.state = DriveState::Awakened {
                        barrier: EngineAwakenedBarrier::new(
                            self.options.engine_awakened.clone(),
                            now_ms,
                        ),
                    };
                    return;
                }
                DriveState::Awakened { mut barrier } => {
                    match barrier.on_host_frame(scene, now_ms) {
                        AwakenedPump::Pending => {
                            self.state = DriveState::Awakened { barrier };
                            return;
                        }
                        AwakenedPump::Passed(report) => {
                            self.resolve_awakened(report, now_ms);
                        }
                        AwakenedPump::Failed { report, reason } => {
                            self.awakened_report = Some(report);
                            self.fail(ProtocolError::AwakenedHardFail(reason), now_ms);
                            return;
                        }
                    }
                }
                DriveState::VisualUnits {
                    required,
                    optionals,
                } => match self.pump_units(scene, now_ms, required, optionals) {
                    UnitsStep::Pending(required, optionals) => {
                        self.state = DriveState::VisualUnits {
                            required,
                            optionals,
                        };
                        return;
                    }
                    UnitsStep::Failed(error) => {
                        self.fail(error, now_ms);
                        return;
                    }
                    UnitsStep::Complete => {
                        self.state = DriveState::VisualCheck {
                            checker: VisualReadyChecker::new(
                                self.options.visual.clone(),
                                self.requirements.clone(),
                            ),
                        };
                    }
                },
                DriveState::VisualCheck { mut checker } => {
                    match checker.pump(scene, now_ms) {
                        CheckerPump::Pending => {
                            self.state = DriveState::VisualCheck { checker };
                            return;
                        }
                        CheckerPump::Passed { attempts } => {
                            log::info!("visual readiness verified in {} attempts", attempts);
                            self.emitter.emit(LoadingEvent::VisualReadyComplete, now_ms);
                            self.progress.set_visual_complete();
                            self.progress.complete_phase();
                            if let Some(error) = self.take_cancel() {
                                self.fail(error, now_ms);
                                return;
                            }
                            self.enter_phase(Phase::Stabilizing, now_ms);
                            self.state = DriveState::Stabilizing {
                                entered_ms: now_ms,
                                window_start_ms: now_ms,
                                stable_frames: 0,
                                last_frame_ms: None,
                            };
                            return;
                        }
                        CheckerPump::Failed { pending } => {
                            self.fail(ProtocolError::VisualRequirementUnmet(pending), now_ms);
                            return;
                        }
                    }
                }
                DriveState::Stabilizing {
                    entered_ms,
                    window_start_ms,
                    stable_frames,
                    last_frame_ms,
                } => {
                    let stabilization = &self.options.stabilization;
                    let sustained = now_ms - window_start_ms >= stabilization.min_time_ms
                        && stable_frames >= stabilization.min_stable_frames;
                    let capped = now_ms - entered_ms >= stabilization.max_time_ms;
                    if !sustained && !capped {
                        self.state = DriveState::Stabilizing {
                            entered_ms,
                            window_start_ms,
                            stable_frames,
                            last_frame_ms,
                        };
                        return;
                    }
                    if capped && !sustained {
                        log::warn!(
                            "stabilization fail-safe: {:.0}ms cap reached with {} sustained frames",
                            stabilization.max_time_ms,
                            stable_frames
                        );
                        self.stabilization_fail_safe = true;
                    }
                    self.emitter.emit(LoadingEvent::StabilizingComplete, now_ms);
                    self.declare_ready(now_ms);
                    return;
                }
                DriveState::Idle
                | DriveState::Done
                | DriveState::AwaitAfterReady => {
                    self.state = state;
                    return;
                }
            }
        }
    }

    /// Observe one natural before-render frame from the renderer.
    pub fn on_before_render(&mut self, now_ms: f64) {
        let awakened = match &mut self.state {
            DriveState::Awakened { barrier } => Some(barrier.on_before_render(now_ms)),
            _ => None,
        };
        if let Some(result) = awakened {
            match result {
                AwakenedPump::Pending => {}
                AwakenedPump::Passed(report) => self.resolve_awakened(report, now_ms),
                AwakenedPump::Failed { report, reason } => {
                    self.awakened_report = Some(report);
                    self.fail(ProtocolError::AwakenedHardFail(reason), now_ms);
                }
            }
            return;
        }

        if let DriveState::Stabilizing {
            window_start_ms,
            stable_frames,
            last_frame_ms,
            ..
        } = &mut self.state
        {
            let gap = self.options.engine_awakened.max_allowed_frame_gap_ms;
            match last_frame_ms.replace(now_ms) {
                None => *stable_frames += 1,
                Some(last) if now_ms - last < gap => *stable_frames += 1,
                Some(_) => {
                    // The sustain window restarts on an unstable frame.
                    *stable_frames = 0;
                    *window_start_ms = now_ms;
                }
            }
        }
    }

    /// Observe one after-render frame from the renderer.
    pub fn on_after_render(&mut self, scene: &mut S, now_ms: f64) {
        let result = match &mut self.state {
            DriveState::Barrier { barrier, .. } => barrier.on_after_render(scene),
            _ => return,
        };
        match result {
            BarrierPump::Pending => {}
            BarrierPump::Confirmed { frames_seen } => {
                log::info!("render loop confirmed after {} rendered frames", frames_seen);
                if let DriveState::Barrier {
                    barrier_confirmed, ..
                } = &mut self.state
                {
                    *barrier_confirmed = true;
                }
            }
            BarrierPump::Failed { reason } => {
                self.fail(ProtocolError::BarrierTimeout(reason), now_ms);
            }
        }
    }

    fn unit_state_for(&self, phase: Phase) -> DriveState<S> {
        let (required, optionals) = self.unit_drives_for(phase);
        DriveState::Units {
            required,
            optionals,
        }
    }

    fn unit_drives_for(&self, phase: Phase) -> (SequentialDrive, OptionalPool) {
        let (required, optional) = self.registry.phase_split(phase);
        (SequentialDrive::new(required), OptionalPool::new(optional))
    }

    fn pump_units(
        &mut self,
        scene: &mut S,
        now_ms: f64,
        mut required: SequentialDrive,
        mut optionals: OptionalPool,
    ) -> UnitsStep {
        let cancelled = self.cancelled.clone();
        let cancel = move || cancelled.load(Ordering::Acquire);
        let unit_progress = |fraction: f64| {
            log::trace!("unit progress {:.0}%", fraction * 100.0);
        };

        let mut transitions = Vec::new();
        let mut failure = None;
        let mut pending = false;

        if !required.is_done() {
            match required.pump(
                &self.executor,
                &mut self.registry,
                scene,
                &unit_progress,
                &cancel,
                &mut transitions,
            ) {
                SequencePump::Pending => pending = true,
                SequencePump::Complete(_) => {}
                SequencePump::Aborted { unit_id, error, .. } => {
                    failure = Some(ProtocolError::UnitFailed {
                        id: unit_id,
                        cause: error.to_string(),
                    });
                }
                SequencePump::Cancelled { .. } => {
                    failure = Some(self.cancel_error());
                }
            }
        }

        if failure.is_none() && !pending && !optionals.is_done() {
            match optionals.pump(
                &self.executor,
                &mut self.registry,
                scene,
                &unit_progress,
                &mut transitions,
            ) {
                PoolPump::Pending => pending = true,
                PoolPump::Complete(_) => {}
            }
        }

        self.apply_transitions(&transitions, now_ms);

        if let Some(error) = failure {
            UnitsStep::Failed(error)
        } else if pending {
            UnitsStep::Pending(required, optionals)
        } else {
            UnitsStep::Complete
        }
    }

    fn apply_transitions(&mut self, transitions: &[UnitTransition], now_ms: f64) {
        for transition in transitions {
            match transition {
                UnitTransition::Started(id) => {
                    self.progress.update_status(id, UnitStatus::Loading);
                    self.emitter
                        .emit(LoadingEvent::UnitStart { id: id.clone() }, now_ms);
                    if let Some(cb) = &mut self.callbacks.on_unit_start {
                        cb(id);
                    }
                    if let Some(cb) = &mut self.callbacks.on_unit_status_change {
                        cb(id, UnitStatus::Loading);
                    }
                }
                UnitTransition::Completed(id) | UnitTransition::Skipped(id) => {
                    let status = self
                        .registry
                        .get(id)
                        .map(|e| e.status())
                        .unwrap_or(UnitStatus::Skipped);
                    self.progress.update_status(id, status);
                    self.emitter
                        .emit(LoadingEvent::UnitComplete { id: id.clone() }, now_ms);
                    if let Some(cb) = &mut self.callbacks.on_unit_status_change {
                        cb(id, status);
                    }
                    if let Some(cb) = &mut self.callbacks.on_unit_end {
                        cb(id);
                    }
                }
                UnitTransition::Failed(id) => {
                    self.progress.update_status(id, UnitStatus::Failed);
                    if let Some(cb) = &mut self.callbacks.on_unit_status_change {
                        cb(id, UnitStatus::Failed);
                    }
                    if let Some(cb) = &mut self.callbacks.on_unit_end {
                        cb(id);
                    }
                }
            }
        }
        if !transitions.is_empty() {
            self.emit_progress(now_ms);
        }
    }

    /// Validators and the post-barrier conformance assertion.
    fn finish_barrier(&mut self, scene: &S, now_ms: f64) -> Result<(), ProtocolError> {
        let unit_phases = [
            Phase::Fetching,
            Phase::Building,
            Phase::Warming,
            Phase::Barrier,
        ];

        let loaded: Vec<String> = self
            .registry
            .in_phase_order()
            .iter()
            .filter(|e| {
                e.required()
                    && unit_phases.contains(&e.phase())
                    && e.status() == UnitStatus::Loaded
            })
            .map(|e| e.id().to_string())
            .collect();

        for id in loaded {
            let verdict = self
                .registry
                .get(&id)
                .and_then(|entry| entry.unit().validate(scene));
            match verdict {
                Some(false) => {
                    let _ = self.registry.set_status(&id, UnitStatus::Failed);
                    self.progress.update_status(&id, UnitStatus::Failed);
                    return Err(ProtocolError::UnitFailed {
                        id,
                        cause: "post-load validation failed".to_string(),
                    });
                }
                // No validator counts as vacuously valid.
                Some(true) | None => {
                    let _ = self.registry.set_status(&id, UnitStatus::Validated);
                    self.progress.update_status(&id, UnitStatus::Validated);
                    if let Some(cb) = &mut self.callbacks.on_unit_status_change {
                        cb(&id, UnitStatus::Validated);
                    }
                }
            }
        }

        let nonconforming: Vec<String> = self
            .registry
            .in_phase_order()
            .iter()
            .filter(|e| {
                e.required()
                    && unit_phases.contains(&e.phase())
                    && !matches!(e.status(), UnitStatus::Validated | UnitStatus::Skipped)
            })
            .map(|e| e.id().to_string())
            .collect();
        if !nonconforming.is_empty() {
            return Err(ProtocolError::InvalidState(format!(
                "required units not ready after barrier: {}",
                nonconforming.join(", ")
            )));
        }

        self.emitter.emit(LoadingEvent::BarrierResolve, now_ms);
        self.progress.complete_phase();
        self.emit_progress(now_ms);
        Ok(())
    }

    fn resolve_awakened(&mut self, report: AwakenedReport, now_ms: f64) {
        log::info!(
            "engine awakened ({}) after {} forced and {} natural frames",
            report.disposition,
            report.burst_count,
            report.natural_frames
        );
        self.awakened_report = Some(report);
        self.guard.begin_post_awakening_watch(now_ms);
        let (required, optionals) = self.unit_drives_for(Phase::VisualReady);
        self.state = DriveState::VisualUnits {
            required,
            optionals,
        };
    }

    fn enter_phase(&mut self, to: Phase, now_ms: f64) {
        let from = self.phase;
        if from != Phase::Pending {
            self.phase_timings.push(PhaseTiming {
                phase: from,
                elapsed_ms: now_ms - self.phase_started_ms,
            });
        }
        self.phase = to;
        self.phase_started_ms = now_ms;
        self.progress.set_phase(to);
        log::info!("loading phase {} -> {}", from, to);
        self.emitter
            .emit(LoadingEvent::PhaseChange { from, to }, now_ms);
        if let Some(cb) = &mut self.callbacks.on_phase_change {
            cb(from, to);
        }
        if let Some(cb) = &mut self.callbacks.on_log {
            cb(&format!("entering phase {}", to));
        }
        match to {
            Phase::Barrier => self.emitter.emit(LoadingEvent::BarrierEnter, now_ms),
            Phase::VisualReady => self.emitter.emit(LoadingEvent::VisualReadyEnter, now_ms),
            Phase::Stabilizing => self.emitter.emit(LoadingEvent::StabilizingEnter, now_ms),
            _ => {}
        }
        self.emit_progress(now_ms);
    }

    fn declare_ready(&mut self, now_ms: f64) {
        self.enter_phase(Phase::Ready, now_ms);
        self.emitter.emit(LoadingEvent::Launch, now_ms);
        if let Some(cb) = &mut self.callbacks.on_log {
            cb("scene ready");
        }
        self.report = Some(self.build_report(Phase::Ready, None, now_ms));
        self.state = DriveState::AwaitAfterReady;
        log::info!(
            "scene ready in {:.0}ms",
            self.report.as_ref().map(|r| r.elapsed_ms).unwrap_or(0.0)
        );
    }

    fn fail(&mut self, error: ProtocolError, now_ms: f64) {
        if self.phase.is_terminal() {
            return;
        }
        log::error!("loading protocol failed in phase {}: {}", self.phase, error);
        self.enter_phase(Phase::Failed, now_ms);
        self.emitter.emit(
            LoadingEvent::Failed {
                error: error.clone(),
            },
            now_ms,
        );
        if let Some(cb) = &mut self.callbacks.on_log {
            cb(&format!("loading failed: {}", error));
        }
        self.report = Some(self.build_report(Phase::Failed, Some(error), now_ms));
        self.state = DriveState::Done;
    }

    fn build_report(
        &self,
        phase: Phase,
        first_error: Option<ProtocolError>,
        now_ms: f64,
    ) -> ProtocolReport {
        let failed_units = self
            .registry
            .by_status(UnitStatus::Failed)
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        let skipped_units = self
            .registry
            .by_status(UnitStatus::Skipped)
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        let design_failures = self
            .registry
            .in_phase_order()
            .iter()
            .filter(|e| e.stats().design_failure)
            .map(|e| e.id().to_string())
            .collect();
        ProtocolReport {
            phase,
            elapsed_ms: now_ms - self.run_started_ms.unwrap_or(now_ms),
            phase_timings: self.phase_timings.clone(),
            failed_units,
            skipped_units,
            first_error,
            awakened: self.awakened_report.clone(),
            stabilization_fail_safe: self.stabilization_fail_safe,
            design_failures,
        }
    }

    fn emit_progress(&mut self, now_ms: f64) {
        let current = (self.progress.raw(), self.progress.display());
        if current != self.last_emitted_progress {
            self.last_emitted_progress = current;
            self.emitter.emit(
                LoadingEvent::ProgressUpdate {
                    raw: current.0,
                    display: current.1,
                },
                now_ms,
            );
            if let Some(cb) = &mut self.callbacks.on_progress {
                cb(current.0, current.1);
            }
        }
    }

    fn take_cancel(&self) -> Option<ProtocolError> {
        if self.cancelled.load(Ordering::Acquire) {
            Some(self.cancel_error())
        } else {
            None
        }
    }

    fn cancel_error(&self) -> ProtocolError {
        let reason = self
            .cancel_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "cancelled by caller".to_string());
        ProtocolError::Cancelled(reason)
    }
}

enum UnitsStep {
    Pending(SequentialDrive, OptionalPool),
    Failed(ProtocolError),
    Complete,
}
