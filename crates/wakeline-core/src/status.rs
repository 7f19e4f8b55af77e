use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use wakeline_types::{HealthSnapshot, HealthState, HealthTransition, OperationKind};

/// Error code carried by the internal "authentication required" signal; never surfaced.
pub const AUTH_REQUIRED_CODE: &str = "auth_required";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfacedError {
    pub code: String,
    pub message: String,
    pub at_ms: u64,
}

impl SurfacedError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            at_ms: now_ms(),
        }
    }

    pub fn auth_required() -> Self {
        Self::new(AUTH_REQUIRED_CODE, "authentication required")
    }
}

/// Hints from the request path that the monitor listens to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusSignal {
    ColdStartSuspected { operation: OperationKind },
    WakeSucceeded { attempts: u32 },
    WakeFailed { attempts: u32 },
}

/// Shared health and error state, owned by the application root and handed to every component
/// that reads or writes it.
#[derive(Clone)]
pub struct StatusStore {
    health: watch::Sender<HealthSnapshot>,
    error: watch::Sender<Option<SurfacedError>>,
    transitions: broadcast::Sender<HealthTransition>,
    signals: broadcast::Sender<StatusSignal>,
}

impl StatusStore {
    pub fn new() -> Self {
        let (health, _) = watch::channel(HealthSnapshot::default());
        let (error, _) = watch::channel(None);
        let (transitions, _) = broadcast::channel(256);
        let (signals, _) = broadcast::channel(256);
        Self {
            health,
            error,
            transitions,
            signals,
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.health.borrow().clone()
    }

    pub fn state(&self) -> HealthState {
        self.health.borrow().state
    }

    /// Applies `to` if the edge is allowed from the current state. Returns whether the state
    /// changed; rejected edges leave the snapshot untouched.
    pub fn transition(&self, to: HealthState, reason: &str, failures: u32) -> bool {
        let mut record = None;
        self.health.send_if_modified(|snapshot| {
            let from = snapshot.state;
            if !(from.is_automatic_edge(to) || from.is_signalled_edge(to)) {
                return false;
            }
            let at_ms = now_ms();
            snapshot.state = to;
            snapshot.failures = failures;
            snapshot.blocking = to.is_blocking();
            snapshot.updated_at_ms = at_ms;
            if to != HealthState::ColdStart {
                snapshot.eta_secs = 0;
            }
            record = Some(HealthTransition {
                from,
                to,
                reason: reason.to_string(),
                failures,
                at_ms,
            });
            true
        });
        match record {
            Some(transition) => {
                tracing::info!(
                    from = transition.from.as_str(),
                    to = transition.to.as_str(),
                    failures = transition.failures,
                    "health transition: {}",
                    transition.reason
                );
                let _ = self.transitions.send(transition);
                true
            }
            None => false,
        }
    }

    /// Countdown updates race with probes; the latest write wins.
    pub fn set_eta(&self, eta_secs: u32) {
        self.health.send_modify(|snapshot| {
            snapshot.eta_secs = eta_secs;
            snapshot.updated_at_ms = now_ms();
        });
    }

    pub fn set_blocking(&self, blocking: bool) {
        self.health.send_if_modified(|snapshot| {
            if snapshot.blocking == blocking {
                return false;
            }
            snapshot.blocking = blocking;
            snapshot.updated_at_ms = now_ms();
            true
        });
    }

    /// Surfaces a confirmed business failure. Nothing is shown on the landing page or for the
    /// internal auth-required signal.
    pub fn report_error(&self, error: SurfacedError, current_path: &str) -> bool {
        if current_path.trim() == "/" || error.code == AUTH_REQUIRED_CODE {
            tracing::debug!(code = %error.code, path = current_path, "error suppressed");
            return false;
        }
        self.error.send_replace(Some(error));
        true
    }

    pub fn current_error(&self) -> Option<SurfacedError> {
        self.error.borrow().clone()
    }

    pub fn dismiss_error(&self) {
        self.error.send_if_modified(|slot| slot.take().is_some());
    }

    pub fn signal(&self, signal: StatusSignal) {
        let _ = self.signals.send(signal);
    }

    pub fn subscribe_health(&self) -> watch::Receiver<HealthSnapshot> {
        self.health.subscribe()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<SurfacedError>> {
        self.error.subscribe()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<HealthTransition> {
        self.transitions.subscribe()
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<StatusSignal> {
        self.signals.subscribe()
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
