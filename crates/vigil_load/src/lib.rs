//! # Vigil Load
//!
//! Cooperative load execution for the Vigil readiness protocol:
//! - Load units as restartable step sequences with cost hints
//! - A registry owning units for the run, keyed by identity
//! - An executor that drives one unit under a strict per-frame budget,
//!   consulting the frame health guard at every yield point
//!
//! Units never block the frame: each `step` performs a bounded chunk of
//! work and returns. The executor decides, after every step, whether the
//! unit may continue inside the current frame slice or must wait for the
//! next host callback.

pub mod executor;
pub mod phase;
pub mod registry;
pub mod unit;

pub use executor::{
    ExecutorConfig, LoadExecutor, OptionalPool, PoolPump, RunOutcome, SequencePump,
    SequentialDrive, UnitDrive, UnitPump, UnitRunReport, UnitTransition,
};
pub use phase::Phase;
pub use registry::{RegistryError, UnitEntry, UnitRegistry};
pub use unit::{status_weight, CostHint, LoadUnit, StepContext, StepOutcome, UnitError, UnitStatus};
