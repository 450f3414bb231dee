//! Load executor
//!
//! Drives one unit's step sequence to completion under a strict per-frame
//! budget. Each pump call corresponds to one host frame callback: the
//! executor steps the unit until the budget is consumed, a recovery wait
//! is requested, the health guard holds the frame chain degraded, or the
//! unit finishes.
//!
//! A single unyielded step beyond the design-failure threshold never
//! aborts the run; it is recorded on the unit's statistics and reported.

use std::sync::Arc;

use vigil_frame::{ExecutionContext, FrameClock, FrameHealthGuard};

use crate::registry::{RegistryError, UnitRegistry};
use crate::unit::{CostHint, StepContext, StepOutcome, UnitError, UnitStatus};

/// Executor configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutorConfig {
    /// Per-frame budget for light and medium units (ms)
    pub default_budget_ms: f64,
    /// Per-frame budget for heavy units (ms)
    pub aggressive_budget_ms: f64,
    /// Prior wall elapsed beyond this infers a heavy unit (ms)
    pub auto_heavy_threshold_ms: f64,
    /// Single-block span that flags a design failure (ms)
    pub design_failure_ms: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_budget_ms: 4.0,
            aggressive_budget_ms: 2.0,
            auto_heavy_threshold_ms: 16.0,
            design_failure_ms: 50.0,
        }
    }
}

/// Result of pumping one unit for one host frame.
#[derive(Debug)]
pub enum UnitPump {
    /// The unit needs more frames
    Pending,
    /// The unit finished and was marked loaded
    Complete,
    /// The unit failed; status and error are recorded on the registry
    Failed(UnitError),
}

/// How a unit's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Skipped,
    Failed,
}

/// Outcome record for one unit execution.
#[derive(Debug, Clone)]
pub struct UnitRunReport {
    pub unit_id: String,
    pub outcome: RunOutcome,
    /// Wall-clock time from begin to resolution (ms)
    pub elapsed_ms: f64,
    pub stats: vigil_frame::ContextStats,
    pub error: Option<UnitError>,
}

/// Observable transitions produced while pumping drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitTransition {
    Started(String),
    Completed(String),
    /// Optional unit failed and was absorbed
    Skipped(String),
    Failed(String),
}

/// In-flight execution state for one unit.
pub struct UnitDrive {
    unit_id: String,
    ctx: Arc<ExecutionContext>,
    started_ms: f64,
}

impl UnitDrive {
    /// Identity of the unit being driven.
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// The execution context, for observation.
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }
}

/// Budget-enforcing cooperative executor.
pub struct LoadExecutor {
    config: ExecutorConfig,
    clock: Arc<dyn FrameClock>,
    guard: Arc<FrameHealthGuard>,
}

impl LoadExecutor {
    /// Create an executor over a clock and health guard.
    pub fn new(
        config: ExecutorConfig,
        clock: Arc<dyn FrameClock>,
        guard: Arc<FrameHealthGuard>,
    ) -> Self {
        Self {
            config,
            clock,
            guard,
        }
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// The guard this executor consults.
    pub fn guard(&self) -> &Arc<FrameHealthGuard> {
        &self.guard
    }

    /// Begin executing a unit.
    ///
    /// Returns `None` when the unit is not `Pending` (already resolved):
    /// per contract the unit is skipped, its status untouched. Otherwise
    /// the unit is marked `Loading`, its budget inferred from the cost
    /// hint and prior elapsed time, and its context connected to the
    /// guard.
    pub fn begin<S>(
        &self,
        registry: &mut UnitRegistry<S>,
        id: &str,
    ) -> Result<Option<UnitDrive>, RegistryError> {
        let entry = registry
            .get(id)
            .ok_or_else(|| RegistryError::UnknownUnit(id.to_string()))?;
        if entry.status() != UnitStatus::Pending {
            log::debug!("unit '{}' is {}, skipping execution", id, entry.status());
            return Ok(None);
        }

        let heavy = entry.unit().cost() == CostHint::Heavy
            || (entry.elapsed_ms() > self.config.auto_heavy_threshold_ms);
        let budget = if heavy {
            self.config.aggressive_budget_ms
        } else {
            self.config.default_budget_ms
        };

        let ctx = Arc::new(ExecutionContext::new(
            self.clock.clone(),
            budget,
            self.config.design_failure_ms,
        ));
        self.guard.connect(&ctx);
        registry.set_status(id, UnitStatus::Loading)?;
        log::debug!("unit '{}' loading with {:.1}ms budget", id, budget);

        Ok(Some(UnitDrive {
            unit_id: id.to_string(),
            ctx,
            started_ms: self.clock.now_ms(),
        }))
    }

    /// Pump a unit for one host frame.
    pub fn pump<S>(
        &self,
        drive: &mut UnitDrive,
        registry: &mut UnitRegistry<S>,
        scene: &mut S,
        on_progress: &dyn Fn(f64),
    ) -> UnitPump {
        // Hold while the guard has the chain degraded or has paused us.
        // The frame timer restarts below once stepping actually resumes.
        if drive.ctx.is_paused() || self.guard.is_degraded() {
            return UnitPump::Pending;
        }

        // One recovery frame is consumed per host frame; stepping resumes
        // in the frame that completes the countdown.
        if drive.ctx.pending_recovery_frames() > 0 && !drive.ctx.consume_recovery_frame() {
            return UnitPump::Pending;
        }

        drive.ctx.start_frame();

        enum Resolution {
            Suspend,
            Complete,
            Failed(UnitError),
        }

        let resolution = {
            let entry = match registry.get_mut(&drive.unit_id) {
                Some(entry) => entry,
                None => {
                    return UnitPump::Failed(UnitError::Message(format!(
                        "unit '{}' vanished from the registry",
                        drive.unit_id
                    )))
                }
            };
            let step_ctx = StepContext::new(&drive.ctx, on_progress);

            loop {
                let step_start = self.clock.now_ms();
                let result = entry.unit_mut().step(scene, &step_ctx);
                drive.ctx.record_block(self.clock.now_ms() - step_start);

                match result {
                    Err(error) => break Resolution::Failed(error),
                    Ok(StepOutcome::Complete) => break Resolution::Complete,
                    Ok(StepOutcome::Continue) => {
                        if drive.ctx.pending_recovery_frames() > 0 {
                            drive.ctx.record_yield(false);
                            break Resolution::Suspend;
                        }
                        if drive.ctx.is_over_budget() {
                            drive.ctx.record_yield(true);
                            break Resolution::Suspend;
                        }
                        drive.ctx.record_yield(false);
                    }
                }
            }
        };

        let elapsed = self.clock.now_ms() - drive.started_ms;
        match resolution {
            Resolution::Suspend => UnitPump::Pending,
            Resolution::Complete => {
                let stats = drive.ctx.stats();
                self.guard.disconnect(&drive.ctx);
                let _ = registry.record_run(
                    &drive.unit_id,
                    UnitStatus::Loaded,
                    elapsed,
                    stats.clone(),
                    None,
                );
                log::info!(
                    "unit '{}' loaded in {:.1}ms ({} yields, {} forced)",
                    drive.unit_id,
                    elapsed,
                    stats.yields,
                    stats.forced_yields
                );
                UnitPump::Complete
            }
            Resolution::Failed(error) => {
                let stats = drive.ctx.stats();
                self.guard.disconnect(&drive.ctx);
                let _ = registry.record_run(
                    &drive.unit_id,
                    UnitStatus::Failed,
                    elapsed,
                    stats,
                    Some(error.clone()),
                );
                log::error!("unit '{}' failed: {}", drive.unit_id, error);
                UnitPump::Failed(error)
            }
        }
    }

    /// Build the outcome record for a resolved unit from its entry.
    pub fn report_for<S>(&self, registry: &UnitRegistry<S>, id: &str) -> Option<UnitRunReport> {
        let entry = registry.get(id)?;
        let outcome = match entry.status() {
            UnitStatus::Loaded | UnitStatus::Validated => RunOutcome::Completed,
            UnitStatus::Failed => RunOutcome::Failed,
            _ => RunOutcome::Skipped,
        };
        Some(UnitRunReport {
            unit_id: id.to_string(),
            outcome,
            elapsed_ms: entry.elapsed_ms(),
            stats: entry.stats().clone(),
            error: entry.error().cloned(),
        })
    }
}

/// Result of pumping a sequential run.
#[derive(Debug)]
pub enum SequencePump {
    Pending,
    Complete(Vec<UnitRunReport>),
    /// A required unit failed; the sequence stops here
    Aborted {
        unit_id: String,
        error: UnitError,
        reports: Vec<UnitRunReport>,
    },
    /// The cancel check tripped between units
    Cancelled { reports: Vec<UnitRunReport> },
}

/// Sequential, fail-fast orchestration over a unit list.
///
/// Units run in input order. A required unit's failure aborts the
/// sequence; an optional unit's failure is absorbed and its status
/// becomes `Skipped`.
pub struct SequentialDrive {
    ids: Vec<String>,
    index: usize,
    current: Option<UnitDrive>,
    reports: Vec<UnitRunReport>,
}

impl SequentialDrive {
    /// Create a sequence over unit ids in execution order.
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            index: 0,
            current: None,
            reports: Vec::new(),
        }
    }

    /// Whether any units remain.
    pub fn is_done(&self) -> bool {
        self.index >= self.ids.len() && self.current.is_none()
    }

    /// Pump the sequence for one host frame.
    ///
    /// `cancel` is consulted between units (in-flight steps are never
    /// pre-empted). Observable transitions are appended to `transitions`
    /// in the order they occurred.
    pub fn pump<S>(
        &mut self,
        executor: &LoadExecutor,
        registry: &mut UnitRegistry<S>,
        scene: &mut S,
        on_progress: &dyn Fn(f64),
        cancel: &dyn Fn() -> bool,
        transitions: &mut Vec<UnitTransition>,
    ) -> SequencePump {
        loop {
            if self.current.is_none() {
                if cancel() {
                    return SequencePump::Cancelled {
                        reports: std::mem::take(&mut self.reports),
                    };
                }
                let Some(id) = self.ids.get(self.index).cloned() else {
                    return SequencePump::Complete(std::mem::take(&mut self.reports));
                };
                match executor.begin(registry, &id) {
                    Ok(Some(drive)) => {
                        transitions.push(UnitTransition::Started(id));
                        self.current = Some(drive);
                    }
                    Ok(None) => {
                        // Already resolved: skip-result, status untouched.
                        if let Some(report) = executor.report_for(registry, &id) {
                            self.reports.push(report);
                        }
                        self.index += 1;
                        continue;
                    }
                    Err(err) => {
                        let error = UnitError::Message(err.to_string());
                        return SequencePump::Aborted {
                            unit_id: id,
                            error,
                            reports: std::mem::take(&mut self.reports),
                        };
                    }
                }
            }

            let drive = self.current.as_mut().expect("drive present");
            match executor.pump(drive, registry, scene, on_progress) {
                UnitPump::Pending => return SequencePump::Pending,
                UnitPump::Complete => {
                    let id = drive.unit_id().to_string();
                    transitions.push(UnitTransition::Completed(id.clone()));
                    if let Some(report) = executor.report_for(registry, &id) {
                        self.reports.push(report);
                    }
                    self.current = None;
                    self.index += 1;
                }
                UnitPump::Failed(error) => {
                    let id = drive.unit_id().to_string();
                    self.current = None;
                    let required = registry.get(&id).map(|e| e.required()).unwrap_or(true);
                    if required {
                        transitions.push(UnitTransition::Failed(id.clone()));
                        return SequencePump::Aborted {
                            unit_id: id,
                            error,
                            reports: std::mem::take(&mut self.reports),
                        };
                    }
                    // Optional failure absorbed.
                    log::warn!("optional unit '{}' failed, skipping: {}", id, error);
                    let _ = registry.set_status(&id, UnitStatus::Skipped);
                    transitions.push(UnitTransition::Skipped(id.clone()));
                    if let Some(report) = executor.report_for(registry, &id) {
                        self.reports.push(report);
                    }
                    self.index += 1;
                }
            }
        }
    }
}

/// Result of pumping an optional pool.
#[derive(Debug)]
pub enum PoolPump {
    Pending,
    Complete(Vec<UnitRunReport>),
}

/// Best-effort interleaved orchestration for optional units.
///
/// Every unit gets one pump per host frame; completions resolve in any
/// order, failures become `Skipped`, and the pool completes only when
/// every unit has resolved.
pub struct OptionalPool {
    pending_begin: Vec<String>,
    drives: Vec<UnitDrive>,
    reports: Vec<UnitRunReport>,
}

impl OptionalPool {
    /// Create a pool over optional unit ids.
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            pending_begin: ids,
            drives: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Whether every unit has resolved.
    pub fn is_done(&self) -> bool {
        self.pending_begin.is_empty() && self.drives.is_empty()
    }

    /// Pump every in-flight unit once for this host frame.
    pub fn pump<S>(
        &mut self,
        executor: &LoadExecutor,
        registry: &mut UnitRegistry<S>,
        scene: &mut S,
        on_progress: &dyn Fn(f64),
        transitions: &mut Vec<UnitTransition>,
    ) -> PoolPump {
        for id in self.pending_begin.drain(..) {
            match executor.begin(registry, &id) {
                Ok(Some(drive)) => {
                    transitions.push(UnitTransition::Started(id));
                    self.drives.push(drive);
                }
                Ok(None) => {
                    if let Some(report) = executor.report_for(registry, &id) {
                        self.reports.push(report);
                    }
                }
                Err(err) => {
                    log::warn!("optional unit '{}' could not begin: {}", id, err);
                    let _ = registry.set_status(&id, UnitStatus::Skipped);
                    transitions.push(UnitTransition::Skipped(id));
                }
            }
        }

        let mut still_running = Vec::new();
        for mut drive in self.drives.drain(..) {
            match executor.pump(&mut drive, registry, scene, on_progress) {
                UnitPump::Pending => still_running.push(drive),
                UnitPump::Complete => {
                    let id = drive.unit_id().to_string();
                    transitions.push(UnitTransition::Completed(id.clone()));
                    if let Some(report) = executor.report_for(registry, &id) {
                        self.reports.push(report);
                    }
                }
                UnitPump::Failed(error) => {
                    let id = drive.unit_id().to_string();
                    log::warn!("optional unit '{}' failed, skipping: {}", id, error);
                    let _ = registry.set_status(&id, UnitStatus::Skipped);
                    transitions.push(UnitTransition::Skipped(id.clone()));
                    if let Some(report) = executor.report_for(registry, &id) {
                        self.reports.push(report);
                    }
                }
            }
        }
        self.drives = still_running;

        if self.is_done() {
            PoolPump::Complete(std::mem::take(&mut self.reports))
        } else {
            PoolPump::Pending
        }
    }
}
