//! Shared harness for protocol integration tests: a manual clock, a mock
//! render surface and scripted load units, driven frame by frame with no
//! real sleeping.

use std::sync::Arc;

use glam::{DMat4, DVec3};
use parking_lot::Mutex;
use vigil_frame::{FrameClock, ManualClock};
use vigil_protocol::{
    CameraPose, CostHint, LoadUnit, LoadingEvent, LoadingProtocol, Phase, ProtocolOptions,
    RenderSurface, StepContext, StepOutcome, UnitError,
};

/// Mock render surface with a controllable camera and entity state.
pub struct MockScene {
    pub camera: Option<CameraPose>,
    pub scaling: f64,
    pub begin_frames: u32,
    pub renders: u32,
    pub end_frames: u32,
    pub hero_visible: bool,
}

impl MockScene {
    pub fn with_camera() -> Self {
        Self {
            camera: Some(CameraPose {
                position: DVec3::new(0.0, 3.0, -12.0),
                view_matrix: DMat4::IDENTITY,
            }),
            scaling: 1.0,
            begin_frames: 0,
            renders: 0,
            end_frames: 0,
            hero_visible: true,
        }
    }
}

impl RenderSurface for MockScene {
    fn camera_pose(&self) -> Option<CameraPose> {
        self.camera
    }

    fn begin_frame(&mut self) {
        self.begin_frames += 1;
    }

    fn render_frame(&mut self) {
        self.renders += 1;
    }

    fn end_frame(&mut self) {
        self.end_frames += 1;
    }

    fn render_size(&self) -> (u32, u32) {
        (1280, 720)
    }

    fn hardware_scaling(&self) -> f64 {
        self.scaling
    }

    fn set_hardware_scaling(&mut self, scaling: f64) {
        self.scaling = scaling;
    }
}

/// Load unit whose steps consume scripted amounts of manual-clock time.
pub struct ScriptedUnit {
    id: String,
    phase: Phase,
    required: bool,
    cost: CostHint,
    total_steps: u32,
    steps_left: u32,
    step_cost_ms: f64,
    fail_on_step: Option<u32>,
    validate_result: Option<bool>,
    clock: Arc<ManualClock>,
    steps_taken: u32,
}

impl ScriptedUnit {
    pub fn new(clock: &Arc<ManualClock>, id: &str, phase: Phase) -> Self {
        Self {
            id: id.to_string(),
            phase,
            required: true,
            cost: CostHint::Light,
            total_steps: 2,
            steps_left: 2,
            step_cost_ms: 1.5,
            fail_on_step: None,
            validate_result: None,
            clock: clock.clone(),
            steps_taken: 0,
        }
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.total_steps = steps;
        self.steps_left = steps;
        self
    }

    pub fn step_cost(mut self, ms: f64) -> Self {
        self.step_cost_ms = ms;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn heavy(mut self) -> Self {
        self.cost = CostHint::Heavy;
        self
    }

    pub fn failing_at(mut self, step: u32) -> Self {
        self.fail_on_step = Some(step);
        self
    }

    pub fn validated(mut self, result: bool) -> Self {
        self.validate_result = Some(result);
        self
    }

    pub fn boxed(self) -> Box<dyn LoadUnit<MockScene>> {
        Box::new(self)
    }
}

impl LoadUnit<MockScene> for ScriptedUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn required(&self) -> bool {
        self.required
    }

    fn cost(&self) -> CostHint {
        self.cost
    }

    fn step(
        &mut self,
        _scene: &mut MockScene,
        _ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, UnitError> {
        self.steps_taken += 1;
        if self.fail_on_step == Some(self.steps_taken) {
            return Err(UnitError::Parse("scripted failure".to_string()));
        }
        self.clock.advance(self.step_cost_ms);
        self.steps_left -= 1;
        if self.steps_left == 0 {
            Ok(StepOutcome::Complete)
        } else {
            Ok(StepOutcome::Continue)
        }
    }

    fn validate(&self, _scene: &MockScene) -> Option<bool> {
        self.validate_result
    }

    fn reset(&mut self) {
        self.steps_left = self.total_steps;
        self.steps_taken = 0;
    }
}

/// Full driving harness: clock + scene + protocol.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub scene: MockScene,
    pub protocol: LoadingProtocol<MockScene>,
}

impl Harness {
    pub fn new(options: ProtocolOptions) -> Self {
        let clock = Arc::new(ManualClock::new());
        let protocol = LoadingProtocol::new(clock.clone(), options);
        Self {
            clock,
            scene: MockScene::with_camera(),
            protocol,
        }
    }

    pub fn start(&mut self) {
        self.protocol
            .start(self.clock.now_ms())
            .expect("protocol start");
    }

    /// One frame where the renderer runs at host cadence: host callback,
    /// then before-render and after-render observables.
    pub fn frame(&mut self, dt: f64) {
        self.clock.advance(dt);
        let now = self.clock.now_ms();
        self.protocol.on_host_frame(&mut self.scene, now);
        self.protocol.on_before_render(now);
        self.protocol.on_after_render(&mut self.scene, now);
    }

    /// One host frame with a stalled renderer: no render observables.
    pub fn frame_host_only(&mut self, dt: f64) {
        self.clock.advance(dt);
        let now = self.clock.now_ms();
        self.protocol.on_host_frame(&mut self.scene, now);
    }

    /// Drive uniform frames until the run finishes or `max_frames` pass.
    pub fn run_until_finished(&mut self, dt: f64, max_frames: u32) -> bool {
        for _ in 0..max_frames {
            if self.protocol.is_finished() {
                return true;
            }
            self.frame(dt);
        }
        self.protocol.is_finished()
    }
}

/// Record every emitted event for later inspection.
pub fn record_events(protocol: &LoadingProtocol<MockScene>) -> Arc<Mutex<Vec<LoadingEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    protocol.emitter().subscribe_all(move |event| {
        sink.lock().push(event.clone());
    });
    events
}
