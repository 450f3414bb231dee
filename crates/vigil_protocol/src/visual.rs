//! Visual-ready checker
//!
//! A visual requirement is a side-effect-free predicate over the scene,
//! with an identity and display name. A single passing attempt is
//! explicitly insufficient: GPU spikes can briefly satisfy a predicate,
//! so a requirement only validates after several consecutive ready
//! observations. Time-based conditions and "rendered at least once"
//! heuristics are out of contract.

use std::sync::Arc;

use crate::error::PendingRequirement;
use crate::options::VisualCheckerOptions;

/// One observation of a requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementProbe {
    Ready,
    NotReady(String),
}

/// A scene predicate the protocol must see hold steadily.
pub struct VisualRequirement<S> {
    id: String,
    name: String,
    predicate: Arc<dyn Fn(&S) -> RequirementProbe + Send + Sync>,
}

impl<S> Clone for VisualRequirement<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<S> VisualRequirement<S> {
    /// Create a requirement over a side-effect-free predicate.
    pub fn new<F>(id: impl Into<String>, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&S) -> RequirementProbe + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Requirement identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct RequirementState<S> {
    requirement: VisualRequirement<S>,
    consecutive: u32,
    validated: bool,
    last_reason: Option<String>,
}

/// Result of pumping the checker.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckerPump {
    Pending,
    /// All requirements validated
    Passed { attempts: u32 },
    /// Attempts exhausted with requirements still pending
    Failed { pending: Vec<PendingRequirement> },
}

/// Evaluates requirements over multiple consecutive frames.
pub struct VisualReadyChecker<S> {
    options: VisualCheckerOptions,
    requirements: Vec<RequirementState<S>>,
    attempts: u32,
    next_attempt_at_ms: Option<f64>,
    resolved: bool,
}

impl<S> VisualReadyChecker<S> {
    /// Create a checker over the given requirements.
    pub fn new(options: VisualCheckerOptions, requirements: Vec<VisualRequirement<S>>) -> Self {
        Self {
            options,
            requirements: requirements
                .into_iter()
                .map(|requirement| RequirementState {
                    requirement,
                    consecutive: 0,
                    validated: false,
                    last_reason: None,
                })
                .collect(),
            attempts: 0,
            next_attempt_at_ms: None,
            resolved: false,
        }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pump the checker; an attempt runs when the attempt delay has
    /// elapsed (the first attempt runs immediately).
    pub fn pump(&mut self, scene: &S, now_ms: f64) -> CheckerPump {
        if self.resolved {
            return CheckerPump::Pending;
        }
        if self.requirements.is_empty() {
            self.resolved = true;
            return CheckerPump::Passed { attempts: 0 };
        }
        if let Some(next) = self.next_attempt_at_ms {
            if now_ms < next {
                return CheckerPump::Pending;
            }
        }

        self.attempts += 1;
        self.next_attempt_at_ms = Some(now_ms + self.options.attempt_delay_ms);

        let needed = self.options.min_consecutive;
        let mut all_validated = true;
        for state in self.requirements.iter_mut().filter(|s| !s.validated) {
            match (state.requirement.predicate)(scene) {
                RequirementProbe::Ready => {
                    state.consecutive += 1;
                    if state.consecutive >= needed {
                        state.validated = true;
                        log::debug!(
                            "visual requirement '{}' validated after {} consecutive observations",
                            state.requirement.id,
                            state.consecutive
                        );
                    } else {
                        all_validated = false;
                    }
                }
                RequirementProbe::NotReady(reason) => {
                    state.consecutive = 0;
                    state.last_reason = Some(reason);
                    all_validated = false;
                }
            }
        }

        if all_validated {
            self.resolved = true;
            return CheckerPump::Passed {
                attempts: self.attempts,
            };
        }

        if self.attempts >= self.options.max_attempts {
            self.resolved = true;
            let pending = self
                .requirements
                .iter()
                .filter(|s| !s.validated)
                .map(|s| PendingRequirement {
                    id: s.requirement.id.clone(),
                    name: s.requirement.name.clone(),
                    reason: s
                        .last_reason
                        .clone()
                        .unwrap_or_else(|| "never observed ready long enough".to_string()),
                })
                .collect();
            return CheckerPump::Failed { pending };
        }

        CheckerPump::Pending
    }
}
