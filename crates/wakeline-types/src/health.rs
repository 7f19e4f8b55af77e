use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Unknown,
    Checking,
    Awake,
    ColdStart,
    Offline,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Checking => "checking",
            HealthState::Awake => "awake",
            HealthState::ColdStart => "cold_start",
            HealthState::Offline => "offline",
        }
    }

    /// Edges the monitor may take on its own, from timers and probe results.
    pub fn is_automatic_edge(self, next: HealthState) -> bool {
        matches!(
            (self, next),
            (HealthState::Unknown, HealthState::Checking)
                | (HealthState::Checking, HealthState::Awake)
                | (HealthState::Checking, HealthState::ColdStart)
                | (HealthState::ColdStart, HealthState::Checking)
                | (HealthState::ColdStart, HealthState::Offline)
        )
    }

    /// Edges that need an outside trigger: a cold-start report while awake, a background
    /// probe succeeding while offline, the persisted offline flag at startup, or the user.
    pub fn is_signalled_edge(self, next: HealthState) -> bool {
        matches!(
            (self, next),
            (HealthState::Awake, HealthState::Checking)
                | (HealthState::Offline, HealthState::Awake)
                | (HealthState::Offline, HealthState::Checking)
                | (HealthState::Unknown, HealthState::Offline)
        )
    }

    /// Whether the status surface should block interaction in this state.
    pub fn is_blocking(self) -> bool {
        matches!(self, HealthState::ColdStart | HealthState::Offline)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub failures: u32,
    /// Seconds left on the visible cold-start countdown.
    pub eta_secs: u32,
    pub blocking: bool,
    pub updated_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthTransition {
    pub from: HealthState,
    pub to: HealthState,
    pub reason: String,
    pub failures: u32,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeReport {
    pub success: bool,
    pub attempts: u32,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_never_loops_back_to_checking_automatically() {
        assert!(!HealthState::Offline.is_automatic_edge(HealthState::Checking));
        assert!(HealthState::Offline.is_signalled_edge(HealthState::Checking));
        assert!(HealthState::ColdStart.is_automatic_edge(HealthState::Offline));
        assert!(!HealthState::Awake.is_automatic_edge(HealthState::ColdStart));
    }

    #[test]
    fn wake_report_uses_camel_case() {
        let report = WakeReport {
            success: false,
            attempts: 5,
            duration_ms: 12,
        };
        let value = serde_json::to_value(report).expect("json");
        assert_eq!(value["durationMs"], serde_json::json!(12));
    }
}
