use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Level;

use wakeline_core::{StatusSignal, StatusStore, WakeConfig};
use wakeline_observability::{emit_event, ObservabilityEvent, ProcessKind};
use wakeline_types::WakeReport;

use crate::{Transport, TransportError, WireRequest};

/// Drives a sleeping backend awake with bounded, growing backoff.
pub struct WakeOrchestrator {
    transport: Arc<dyn Transport>,
    origin: String,
    config: WakeConfig,
    status: Option<StatusStore>,
}

impl WakeOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, origin: impl Into<String>, config: WakeConfig) -> Self {
        Self {
            transport,
            origin: origin.into().trim_end_matches('/').to_string(),
            config,
            status: None,
        }
    }

    /// Publish wake outcomes so the health monitor sees wakes it did not start.
    pub fn with_status(mut self, status: StatusStore) -> Self {
        self.status = Some(status);
        self
    }

    pub fn config(&self) -> &WakeConfig {
        &self.config
    }

    /// Delay slept after failed attempt `attempt` (1-based) before the next one.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let ms = self.config.base_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        Duration::from_millis(ms.round() as u64)
    }

    /// Calls the wake endpoint until it answers 2xx or the attempt budget runs out. Never fails;
    /// the report says how it went.
    pub async fn wake_up_server(&self) -> WakeReport {
        let started = Instant::now();
        let url = format!("{}{}", self.origin, self.config.wake_path);
        let timeout = Duration::from_millis(self.config.wake_timeout_ms);
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempts = 0;
        let mut success = false;
        while attempts < max_attempts {
            if attempts > 0 {
                tokio::time::sleep(self.backoff_delay(attempts)).await;
            }
            attempts += 1;

            let outcome = self.call(WireRequest::get(&url, timeout), timeout).await;
            match outcome {
                Ok(status) if (200..300).contains(&status) => {
                    success = true;
                    self.emit_attempt(Level::INFO, attempts, "ok", None);
                    break;
                }
                Ok(status) => {
                    let detail = format!("status={status}");
                    self.emit_attempt(Level::WARN, attempts, "failed", Some(&detail));
                }
                Err(err) => {
                    let detail = err.to_string();
                    self.emit_attempt(Level::WARN, attempts, err.code(), Some(&detail));
                }
            }
        }

        let report = WakeReport {
            success,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        if let Some(status) = &self.status {
            status.signal(if success {
                StatusSignal::WakeSucceeded { attempts }
            } else {
                StatusSignal::WakeFailed { attempts }
            });
        }
        tracing::info!(
            success = report.success,
            attempts = report.attempts,
            duration_ms = report.duration_ms,
            "wake sequence finished"
        );
        report
    }

    /// Single probe against the health endpoint. Errors read as "not awake".
    pub async fn is_server_awake(&self) -> bool {
        let url = format!("{}{}", self.origin, self.config.health_path);
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        match self.call(WireRequest::get(&url, timeout), timeout).await {
            Ok(status) if (200..300).contains(&status) => true,
            Ok(status) => {
                tracing::warn!("health probe returned status {}", status);
                false
            }
            Err(err) => {
                tracing::warn!("health probe failed: {}", err);
                false
            }
        }
    }

    async fn call(&self, request: WireRequest, timeout: Duration) -> Result<u16, TransportError> {
        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result.map(|response| response.status),
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        }
    }

    fn emit_attempt(&self, level: Level, attempt: u32, status: &str, detail: Option<&str>) {
        emit_event(
            level,
            ProcessKind::Client,
            ObservabilityEvent {
                event: "wake.attempt",
                component: "wake",
                attempt: Some(attempt),
                status: Some(status),
                detail,
                ..Default::default()
            },
        );
    }
}
