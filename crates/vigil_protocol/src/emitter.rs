//! Loading state emitter
//!
//! Typed fan-out of readiness events to reactive observers (UI,
//! diagnostics). Progress updates are throttled so a chatty loader
//! cannot spam subscribers more often than the animation cadence; the
//! decisive events (barrier resolve, launch, failure) always fire
//! immediately. Each subscriber is isolated: one panicking listener is
//! logged and contained, never allowed to break the protocol.

use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use vigil_load::Phase;

use crate::error::ProtocolError;

/// Events produced by the protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum LoadingEvent {
    PhaseChange { from: Phase, to: Phase },
    ProgressUpdate { raw: f64, display: f64 },
    UnitStart { id: String },
    UnitComplete { id: String },
    BarrierEnter,
    BarrierResolve,
    VisualReadyEnter,
    VisualReadyComplete,
    StabilizingEnter,
    StabilizingComplete,
    Launch,
    Failed { error: ProtocolError },
}

/// Discriminant for per-event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PhaseChange,
    ProgressUpdate,
    UnitStart,
    UnitComplete,
    BarrierEnter,
    BarrierResolve,
    VisualReadyEnter,
    VisualReadyComplete,
    StabilizingEnter,
    StabilizingComplete,
    Launch,
    Failed,
}

impl LoadingEvent {
    /// The subscription discriminant for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PhaseChange { .. } => EventKind::PhaseChange,
            Self::ProgressUpdate { .. } => EventKind::ProgressUpdate,
            Self::UnitStart { .. } => EventKind::UnitStart,
            Self::UnitComplete { .. } => EventKind::UnitComplete,
            Self::BarrierEnter => EventKind::BarrierEnter,
            Self::BarrierResolve => EventKind::BarrierResolve,
            Self::VisualReadyEnter => EventKind::VisualReadyEnter,
            Self::VisualReadyComplete => EventKind::VisualReadyComplete,
            Self::StabilizingEnter => EventKind::StabilizingEnter,
            Self::StabilizingComplete => EventKind::StabilizingComplete,
            Self::Launch => EventKind::Launch,
            Self::Failed { .. } => EventKind::Failed,
        }
    }
}

/// Revocation handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

type Handler = Arc<dyn Fn(&LoadingEvent) + Send + Sync>;

struct SubEntry {
    id: u64,
    /// `None` subscribes to every event
    kind: Option<EventKind>,
    handler: Handler,
}

struct ProgressThrottle {
    last_emit_ms: Option<f64>,
    /// Latest progress values held back by the throttle
    pending: Option<(f64, f64)>,
}

/// Typed pub/sub hub for loading events.
pub struct StateEmitter {
    /// Minimum spacing between progress-update deliveries (ms)
    throttle_ms: f64,
    next_id: Mutex<u64>,
    subscribers: Mutex<Vec<SubEntry>>,
    progress: Mutex<ProgressThrottle>,
}

impl StateEmitter {
    /// Create an emitter with the default 16 ms progress throttle.
    pub fn new() -> Self {
        Self::with_throttle(16.0)
    }

    /// Create an emitter with an explicit progress throttle (ms).
    pub fn with_throttle(throttle_ms: f64) -> Self {
        Self {
            throttle_ms,
            next_id: Mutex::new(1),
            subscribers: Mutex::new(Vec::new()),
            progress: Mutex::new(ProgressThrottle {
                last_emit_ms: None,
                pending: None,
            }),
        }
    }

    /// Subscribe to one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&LoadingEvent) + Send + Sync + 'static,
    {
        self.push_subscriber(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every event.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&LoadingEvent) + Send + Sync + 'static,
    {
        self.push_subscriber(None, Arc::new(handler))
    }

    /// Revoke a subscription.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.subscribers.lock().retain(|s| s.id != subscription.0);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Emit an event at `now_ms`.
    ///
    /// Progress updates are throttled with the trailing value retained;
    /// every other event is delivered immediately.
    pub fn emit(&self, event: LoadingEvent, now_ms: f64) {
        if let LoadingEvent::ProgressUpdate { raw, display } = event {
            let due = {
                let mut throttle = self.progress.lock();
                let due = throttle
                    .last_emit_ms
                    .map(|last| now_ms - last >= self.throttle_ms)
                    .unwrap_or(true);
                if due {
                    throttle.last_emit_ms = Some(now_ms);
                    throttle.pending = None;
                } else {
                    throttle.pending = Some((raw, display));
                }
                due
            };
            if due {
                self.deliver(&event);
            }
            return;
        }
        self.deliver(&event);
    }

    /// Deliver a trailing progress update once the throttle allows it.
    pub fn flush(&self, now_ms: f64) {
        let ready = {
            let mut throttle = self.progress.lock();
            match (throttle.pending, throttle.last_emit_ms) {
                (Some(values), Some(last)) if now_ms - last >= self.throttle_ms => {
                    throttle.pending = None;
                    throttle.last_emit_ms = Some(now_ms);
                    Some(values)
                }
                _ => None,
            }
        };
        if let Some((raw, display)) = ready {
            self.deliver(&LoadingEvent::ProgressUpdate { raw, display });
        }
    }

    fn push_subscriber(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        self.subscribers.lock().push(SubEntry { id, kind, handler });
        Subscription(id)
    }

    fn deliver(&self, event: &LoadingEvent) {
        // Snapshot under the lock, invoke outside it: a handler may
        // subscribe or unsubscribe reentrantly.
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.kind.is_none() || s.kind == Some(kind))
            .map(|s| s.handler.clone())
            .collect();

        for handler in handlers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
            if result.is_err() {
                log::warn!("loading event subscriber panicked on {:?}", kind);
            }
        }
    }
}

impl Default for StateEmitter {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: RwLock<Option<Arc<StateEmitter>>> = RwLock::new(None);

/// Install a process-global emitter for caller convenience.
pub fn init_global(emitter: Arc<StateEmitter>) {
    *GLOBAL.write() = Some(emitter);
}

/// The process-global emitter, if installed.
pub fn global() -> Option<Arc<StateEmitter>> {
    GLOBAL.read().clone()
}

/// Tear down the process-global emitter.
pub fn dispose_global() {
    *GLOBAL.write() = None;
}
