//! Scene boot demo
//!
//! Boots a simulated renderer through the full readiness pipeline: a
//! ticker thread stands in for the host's frame-callback primitive, a
//! handful of units load and warm a fake scene, a visual requirement
//! watches the hero entity, and the run's report is printed as JSON.
//!
//! Run with `RUST_LOG=debug` for per-yield detail.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use glam::{DMat4, DVec3};
use vigil_frame::{FrameClock, MonotonicClock};
use vigil_protocol::{
    CameraPose, CostHint, LoadUnit, LoadingProtocol, Phase, ProtocolCallbacks, ProtocolOptions,
    RenderSurface, RequirementProbe, StepContext, StepOutcome, UnitError, VisualRequirement,
};

/// Simulated scene and renderer.
struct SimScene {
    camera: CameraPose,
    hardware_scaling: f64,
    frames_rendered: u64,
    hero_in_graph: bool,
    materials_warm: bool,
}

impl SimScene {
    fn new() -> Self {
        Self {
            camera: CameraPose {
                position: DVec3::new(0.0, 4.0, -14.0),
                view_matrix: DMat4::look_at_rh(
                    DVec3::new(0.0, 4.0, -14.0),
                    DVec3::ZERO,
                    DVec3::Y,
                ),
            },
            hardware_scaling: 1.0,
            frames_rendered: 0,
            hero_in_graph: false,
            materials_warm: false,
        }
    }
}

impl RenderSurface for SimScene {
    fn camera_pose(&self) -> Option<CameraPose> {
        Some(self.camera)
    }

    fn begin_frame(&mut self) {}

    fn render_frame(&mut self) {
        self.frames_rendered += 1;
    }

    fn end_frame(&mut self) {}

    fn render_size(&self) -> (u32, u32) {
        (1920, 1080)
    }

    fn hardware_scaling(&self) -> f64 {
        self.hardware_scaling
    }

    fn set_hardware_scaling(&mut self, scaling: f64) {
        self.hardware_scaling = scaling;
    }
}

/// Burn a little real CPU time to stand in for asset work.
fn busy_chunk() {
    let mut acc = 0u64;
    for i in 0..40_000u64 {
        acc = acc.wrapping_add(i.wrapping_mul(2654435761));
    }
    std::hint::black_box(acc);
}

/// Fetches the scene manifest in a few bounded chunks.
struct FetchManifest {
    chunks_left: u32,
}

impl LoadUnit<SimScene> for FetchManifest {
    fn id(&self) -> &str {
        "manifest"
    }

    fn phase(&self) -> Phase {
        Phase::Fetching
    }

    fn step(
        &mut self,
        _scene: &mut SimScene,
        _ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, UnitError> {
        busy_chunk();
        self.chunks_left -= 1;
        if self.chunks_left == 0 {
            Ok(StepOutcome::Complete)
        } else {
            Ok(StepOutcome::Continue)
        }
    }

    fn reset(&mut self) {
        self.chunks_left = 3;
    }
}

/// Builds scene geometry; places the hero entity on completion.
struct BuildGeometry {
    chunks_left: u32,
}

impl LoadUnit<SimScene> for BuildGeometry {
    fn id(&self) -> &str {
        "geometry"
    }

    fn phase(&self) -> Phase {
        Phase::Building
    }

    fn step(
        &mut self,
        scene: &mut SimScene,
        _ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, UnitError> {
        busy_chunk();
        self.chunks_left -= 1;
        if self.chunks_left == 0 {
            scene.hero_in_graph = true;
            Ok(StepOutcome::Complete)
        } else {
            Ok(StepOutcome::Continue)
        }
    }

    fn validate(&self, scene: &SimScene) -> Option<bool> {
        Some(scene.hero_in_graph)
    }

    fn reset(&mut self) {
        self.chunks_left = 8;
    }
}

/// Warms materials; the compile chunk is uncooperative, so the unit asks
/// for a recovery frame afterwards.
struct WarmMaterials {
    compiled: bool,
}

impl LoadUnit<SimScene> for WarmMaterials {
    fn id(&self) -> &str {
        "materials"
    }

    fn phase(&self) -> Phase {
        Phase::Warming
    }

    fn cost(&self) -> CostHint {
        CostHint::Heavy
    }

    fn step(
        &mut self,
        scene: &mut SimScene,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, UnitError> {
        if !self.compiled {
            // A synchronous compile that cannot yield midway.
            for _ in 0..4 {
                busy_chunk();
            }
            self.compiled = true;
            ctx.request_recovery_frames(1);
            return Ok(StepOutcome::Continue);
        }
        scene.materials_warm = true;
        Ok(StepOutcome::Complete)
    }

    fn validate(&self, scene: &SimScene) -> Option<bool> {
        Some(scene.materials_warm)
    }

    fn reset(&mut self) {
        self.compiled = false;
    }
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let clock = Arc::new(MonotonicClock::new());
    let mut protocol = LoadingProtocol::new(clock.clone(), ProtocolOptions::default());

    protocol
        .register_unit(Box::new(FetchManifest { chunks_left: 3 }))
        .expect("register manifest");
    protocol
        .register_unit(Box::new(BuildGeometry { chunks_left: 8 }))
        .expect("register geometry");
    protocol
        .register_unit(Box::new(WarmMaterials { compiled: false }))
        .expect("register materials");

    protocol.add_visual_requirement(VisualRequirement::new(
        "hero-in-graph",
        "Hero entity participates in the scene graph",
        |scene: &SimScene| {
            if scene.hero_in_graph {
                RequirementProbe::Ready
            } else {
                RequirementProbe::NotReady("hero not yet in scene graph".to_string())
            }
        },
    ));

    protocol.set_callbacks(ProtocolCallbacks {
        on_phase_change: Some(Box::new(|from, to| {
            log::info!("phase change: {} -> {}", from, to);
        })),
        on_after_ready: Some(Box::new(|scene: &mut SimScene| {
            log::info!(
                "game logic may start: {} frames rendered during boot",
                scene.frames_rendered
            );
        })),
        ..Default::default()
    });

    // The host's frame-callback primitive: a ticker thread delivering
    // one-shot frame signals at roughly 60 Hz.
    let (tick_tx, tick_rx) = crossbeam_channel::bounded::<()>(1);
    let ticker = thread::spawn(move || {
        while tick_tx.send(()).is_ok() {
            thread::sleep(Duration::from_millis(16));
        }
    });

    let mut scene = SimScene::new();
    protocol.start(clock.now_ms()).expect("protocol start");

    let mut frames_after_finish = 0u32;
    while let Ok(()) = tick_rx.recv() {
        let now = clock.now_ms();
        protocol.on_host_frame(&mut scene, now);
        // The simulated renderer runs on the same cadence as the host.
        protocol.on_before_render(now);
        protocol.on_after_render(&mut scene, now);

        if protocol.is_finished() {
            frames_after_finish += 1;
            // One extra frame so the after-ready hook can fire.
            if frames_after_finish >= 2 {
                break;
            }
        }
    }
    drop(tick_rx);
    let _ = ticker.join();

    let report = protocol.report().expect("run finished");
    println!(
        "{}",
        serde_json::to_string_pretty(report).expect("report serializes")
    );
}
