use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use serde_json::{Map, Value};
use tracing::Level;
use uuid::Uuid;

use wakeline_core::{BackendConfig, SessionStore, StatusSignal, StatusStore};
use wakeline_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use wakeline_types::{
    AvailabilityInfo, BodyEncoding, HealthSnapshot, IdentitySource, OperationDescriptor,
    OperationKind, OperationOutcome, OperationPayload, Route, SessionCredential,
    TransportVariant, UserProfile,
};

use crate::{
    descriptor, DispatchError, Transport, TransportError, WakeOrchestrator, WireBody, WireRequest,
    WireResponse,
};

const TOKEN_KEYS: &[&str] = &["token", "Token", "accessToken", "access_token", "jwt"];
const REFRESH_TOKEN_KEYS: &[&str] = &["refreshToken", "refresh_token", "RefreshToken"];
const SECRET_FIELDS: &[&str] = &["password"];

/// How one delivered response bears on the chain.
#[derive(Debug)]
enum Verdict {
    Won(OperationOutcome),
    Rejected(DispatchError),
    /// Advance. `cold` marks failures that look like a sleeping backend.
    Failed { cold: bool, reason: String },
}

#[derive(Debug)]
enum ChainOutcome {
    Won {
        outcome: OperationOutcome,
        attempts: u32,
    },
    Rejected {
        error: DispatchError,
        variant: &'static str,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        cold_start: bool,
    },
}

/// Pushes one logical operation through its ordered variant table.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<SessionStore>,
    status: StatusStore,
    wake: Option<Arc<WakeOrchestrator>>,
    origin: String,
    proxy_base: Option<String>,
    attempt_timeout: Duration,
    offline_seq: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<SessionStore>,
        status: StatusStore,
        backend: &BackendConfig,
    ) -> Self {
        Self {
            transport,
            store,
            status,
            wake: None,
            origin: backend.origin.trim_end_matches('/').to_string(),
            proxy_base: backend
                .proxy_base
                .as_deref()
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(|b| b.trim_end_matches('/').to_string()),
            attempt_timeout: Duration::from_millis(backend.attempt_timeout_ms.max(1)),
            offline_seq: AtomicU64::new(0),
        }
    }

    /// Cold-start exhaustion hands off to `wake` and retries the chain once if it succeeds.
    pub fn with_wake(mut self, wake: Arc<WakeOrchestrator>) -> Self {
        self.wake = Some(wake);
        self
    }

    pub async fn submit_credentials(
        &self,
        payload: &OperationPayload,
    ) -> Result<OperationOutcome, DispatchError> {
        self.perform_operation(OperationKind::Login, payload).await
    }

    pub async fn create_account(
        &self,
        payload: &OperationPayload,
    ) -> Result<OperationOutcome, DispatchError> {
        self.perform_operation(OperationKind::CreateAccount, payload)
            .await
    }

    pub async fn check_availability(
        &self,
        username: &str,
    ) -> Result<AvailabilityInfo, DispatchError> {
        let payload = OperationPayload::new().with("username", username);
        let outcome = self
            .perform_operation(OperationKind::CheckUsername, &payload)
            .await?;
        Ok(outcome
            .availability()
            .cloned()
            .unwrap_or_else(|| assumed_available(&payload)))
    }

    pub fn health(&self) -> HealthSnapshot {
        self.status.snapshot()
    }

    pub async fn perform_operation(
        &self,
        kind: OperationKind,
        payload: &OperationPayload,
    ) -> Result<OperationOutcome, DispatchError> {
        let correlation_id = Uuid::new_v4().to_string();
        let descriptor = descriptor(kind);

        if self.store.offline_mode().await {
            self.emit(
                Level::INFO,
                &correlation_id,
                kind,
                None,
                None,
                "offline_shortcut",
                None,
            );
            return self.resolve_exhausted(kind, payload, false).await;
        }

        let mut chain = self.run_chain(descriptor, payload, &correlation_id).await;
        if let ChainOutcome::Exhausted {
            cold_start: true, ..
        } = chain
        {
            if let Some(wake) = &self.wake {
                self.status
                    .signal(StatusSignal::ColdStartSuspected { operation: kind });
                let report = wake.wake_up_server().await;
                if report.success {
                    tracing::info!(
                        operation = kind.as_str(),
                        "backend woke after {} attempts, retrying chain once",
                        report.attempts
                    );
                    chain = self.run_chain(descriptor, payload, &correlation_id).await;
                }
            }
        }

        match chain {
            ChainOutcome::Won { outcome, attempts } => {
                if let OperationOutcome::Identity(credential) = &outcome {
                    self.store.save_credential(credential).await?;
                }
                tracing::info!(
                    operation = kind.as_str(),
                    attempts,
                    token = %outcome
                        .credential()
                        .map(|c| redact_text(&c.token))
                        .unwrap_or_default(),
                    "operation succeeded"
                );
                Ok(outcome)
            }
            ChainOutcome::Rejected {
                error,
                variant,
                attempts,
            } => {
                self.emit(
                    Level::WARN,
                    &correlation_id,
                    kind,
                    Some(variant),
                    Some(attempts),
                    "rejected",
                    Some(&error.to_string()),
                );
                Err(error)
            }
            ChainOutcome::Exhausted { attempts, .. } => {
                tracing::warn!(
                    operation = kind.as_str(),
                    attempts,
                    "every transport variant failed"
                );
                self.resolve_exhausted(kind, payload, true).await
            }
        }
    }

    async fn run_chain(
        &self,
        descriptor: &OperationDescriptor,
        payload: &OperationPayload,
        correlation_id: &str,
    ) -> ChainOutcome {
        let kind = descriptor.kind;
        let mut attempts = 0u32;
        let mut cold_start = true;

        for (index, variant) in descriptor.variants.iter().enumerate() {
            let Some(request) = self.build_request(descriptor, variant, payload) else {
                self.emit(
                    Level::DEBUG,
                    correlation_id,
                    kind,
                    Some(variant.label),
                    None,
                    "skipped",
                    None,
                );
                continue;
            };
            attempts += 1;
            tracing::debug!(
                operation = kind.as_str(),
                index,
                variant = variant.label,
                url = %request.url,
                body = %describe_body(&request.body),
                "dispatching variant"
            );

            let response = match tokio::time::timeout(
                self.attempt_timeout,
                self.transport.send(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(
                    self.attempt_timeout.as_millis() as u64
                )),
            };

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    let detail = err.to_string();
                    self.emit(
                        Level::WARN,
                        correlation_id,
                        kind,
                        Some(variant.label),
                        Some(attempts),
                        err.code(),
                        Some(&detail),
                    );
                    continue;
                }
            };

            match classify(descriptor, &response, payload) {
                Verdict::Won(outcome) => {
                    self.emit(
                        Level::INFO,
                        correlation_id,
                        kind,
                        Some(variant.label),
                        Some(attempts),
                        "won",
                        None,
                    );
                    return ChainOutcome::Won { outcome, attempts };
                }
                Verdict::Rejected(error) => {
                    return ChainOutcome::Rejected {
                        error,
                        variant: variant.label,
                        attempts,
                    }
                }
                Verdict::Failed { cold, reason } => {
                    cold_start &= cold;
                    self.emit(
                        Level::WARN,
                        correlation_id,
                        kind,
                        Some(variant.label),
                        Some(attempts),
                        "failed",
                        Some(&reason),
                    );
                }
            }
        }

        ChainOutcome::Exhausted {
            attempts,
            cold_start: cold_start && attempts > 0,
        }
    }

    fn build_request(
        &self,
        descriptor: &OperationDescriptor,
        variant: &TransportVariant,
        payload: &OperationPayload,
    ) -> Option<WireRequest> {
        let base = match variant.route {
            Route::Origin => self.origin.clone(),
            Route::Forwarded => format!("{}/api", self.proxy_base.as_deref()?),
        };
        let mut url = format!("{}{}", base, variant.path);
        let mut query = Vec::new();
        let body = match variant.encoding {
            BodyEncoding::Json => {
                let mut map = Map::new();
                for field in descriptor.fields {
                    if let Some(value) = payload.raw(field) {
                        map.insert(variant.casing.apply(field), value.clone());
                    }
                }
                WireBody::Json(Value::Object(map))
            }
            BodyEncoding::Form => WireBody::Form(text_pairs(descriptor, variant, payload)),
            BodyEncoding::Query => {
                query = text_pairs(descriptor, variant, payload);
                WireBody::Empty
            }
            BodyEncoding::PathParam => {
                let first = descriptor.fields.first()?;
                let value = payload.field(first)?;
                let mut parsed = Url::parse(&url).ok()?;
                parsed.path_segments_mut().ok()?.push(&value);
                url = parsed.to_string();
                WireBody::Empty
            }
        };
        Some(WireRequest {
            channel: variant.channel,
            method: variant.method,
            url,
            query,
            body,
            timeout: self.attempt_timeout,
        })
    }

    async fn resolve_exhausted(
        &self,
        kind: OperationKind,
        payload: &OperationPayload,
        persist_flag: bool,
    ) -> Result<OperationOutcome, DispatchError> {
        if !kind.establishes_identity() {
            return Ok(OperationOutcome::Availability(assumed_available(payload)));
        }
        let credential = self.synthesize_credential(payload);
        self.store.save_credential(&credential).await?;
        if persist_flag {
            self.store.set_offline(true).await?;
        }
        tracing::warn!(
            operation = kind.as_str(),
            username = %credential.profile.username,
            "issued offline identity"
        );
        Ok(OperationOutcome::Identity(credential))
    }

    fn synthesize_credential(&self, payload: &OperationPayload) -> SessionCredential {
        let issued_at = Utc::now();
        let seq = self.offline_seq.fetch_add(1, Ordering::Relaxed);
        SessionCredential {
            token: format!("offline_{}_{}", issued_at.timestamp_millis(), seq),
            refresh_token: None,
            profile: profile_from(None, payload),
            source: IdentitySource::Synthesized,
            issued_at,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        level: Level,
        correlation_id: &str,
        kind: OperationKind,
        variant: Option<&str>,
        attempt: Option<u32>,
        status: &str,
        detail: Option<&str>,
    ) {
        emit_event(
            level,
            ProcessKind::Client,
            ObservabilityEvent {
                event: "dispatch.attempt",
                component: "dispatcher",
                correlation_id: Some(correlation_id),
                operation: Some(kind.as_str()),
                variant,
                attempt,
                status: Some(status),
                error_code: None,
                detail,
            },
        );
    }
}

fn classify(
    descriptor: &OperationDescriptor,
    response: &WireResponse,
    payload: &OperationPayload,
) -> Verdict {
    let kind = descriptor.kind;
    let status = response.status;

    if response.is_success() {
        return match kind {
            OperationKind::CheckUsername => match availability_from(response, payload) {
                Some(info) => Verdict::Won(OperationOutcome::Availability(info)),
                None => Verdict::Failed {
                    cold: false,
                    reason: "malformed availability response".to_string(),
                },
            },
            OperationKind::Login | OperationKind::CreateAccount => {
                match credential_from(response, payload) {
                    Some(credential) => Verdict::Won(OperationOutcome::Identity(credential)),
                    None => Verdict::Failed {
                        cold: false,
                        reason: format!("status={status} without token"),
                    },
                }
            }
        };
    }

    let message = response.message();
    match (kind, status) {
        (OperationKind::Login, 401) => {
            return Verdict::Rejected(DispatchError::InvalidCredentials {
                message: message.unwrap_or_else(|| "Invalid credentials".to_string()),
            })
        }
        (OperationKind::CreateAccount, 409) => {
            return Verdict::Rejected(DispatchError::AlreadyExists {
                message: message.unwrap_or_else(|| "Account already exists".to_string()),
            })
        }
        (OperationKind::CheckUsername, 409) => {
            return Verdict::Won(OperationOutcome::Availability(AvailabilityInfo {
                username: payload.field("username").unwrap_or_default(),
                available: false,
                assumed: false,
            }))
        }
        _ => {}
    }

    if (400..500).contains(&status) {
        if let Some(message) = &message {
            let lowered = message.to_ascii_lowercase();
            if descriptor
                .rejection_markers
                .iter()
                .any(|marker| lowered.contains(marker))
            {
                return Verdict::Rejected(DispatchError::Rejected {
                    operation: kind,
                    status,
                    message: message.clone(),
                });
            }
        }
    }

    Verdict::Failed {
        cold: matches!(status, 502..=504),
        reason: format!("status={status}"),
    }
}

fn credential_from(response: &WireResponse, payload: &OperationPayload) -> Option<SessionCredential> {
    let body = response.json()?;
    let object = body.as_object()?;
    let token = lookup_str(object, TOKEN_KEYS)?;
    Some(SessionCredential {
        token,
        refresh_token: lookup_str(object, REFRESH_TOKEN_KEYS),
        profile: profile_from(Some(object), payload),
        source: IdentitySource::Remote,
        issued_at: Utc::now(),
    })
}

fn availability_from(response: &WireResponse, payload: &OperationPayload) -> Option<AvailabilityInfo> {
    let body = response.json()?;
    let available = match &body {
        Value::Bool(b) => *b,
        Value::Object(object) => {
            if let Some(b) = lookup_bool(object, &["available", "isAvailable", "Available"]) {
                b
            } else {
                !lookup_bool(object, &["exists", "taken", "Exists", "Taken"])?
            }
        }
        _ => return None,
    };
    Some(AvailabilityInfo {
        username: payload.field("username").unwrap_or_default(),
        available,
        assumed: false,
    })
}

fn assumed_available(payload: &OperationPayload) -> AvailabilityInfo {
    AvailabilityInfo {
        username: payload.field("username").unwrap_or_default(),
        available: true,
        assumed: true,
    }
}

/// Response fields win over caller input; missing values fall back to defaults.
fn profile_from(response: Option<&Map<String, Value>>, payload: &OperationPayload) -> UserProfile {
    let nested = response
        .and_then(|o| o.get("user").or_else(|| o.get("User")))
        .and_then(Value::as_object);
    let remote = |key: &str| -> Option<String> {
        let pascal_key = pascal(key);
        [response, nested]
            .into_iter()
            .flatten()
            .find_map(|object| lookup_str(object, &[key, pascal_key.as_str()]))
    };

    let email = remote("email").or_else(|| payload.field("email")).unwrap_or_default();
    let username = remote("username")
        .or_else(|| payload.field("username"))
        .or_else(|| {
            email
                .split_once('@')
                .map(|(local, _)| local.to_string())
                .filter(|local| !local.is_empty())
        })
        .unwrap_or_else(|| "guest".to_string());
    let country = remote("country")
        .or_else(|| payload.field("country"))
        .unwrap_or_else(|| "Unknown".to_string());
    let age = [response, nested]
        .into_iter()
        .flatten()
        .find_map(|object| object.get("age").or_else(|| object.get("Age")))
        .and_then(value_as_u32)
        .or_else(|| payload.field("age").and_then(|a| a.parse().ok()));

    UserProfile {
        username,
        email,
        country,
        age,
    }
}

fn text_pairs(
    descriptor: &OperationDescriptor,
    variant: &TransportVariant,
    payload: &OperationPayload,
) -> Vec<(String, String)> {
    descriptor
        .fields
        .iter()
        .filter_map(|field| {
            payload
                .field(field)
                .map(|value| (variant.casing.apply(field), value))
        })
        .collect()
}

fn describe_body(body: &WireBody) -> String {
    let is_secret = |key: &str| SECRET_FIELDS.iter().any(|s| key.eq_ignore_ascii_case(s));
    match body {
        WireBody::Empty => String::new(),
        WireBody::Json(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                if is_secret(k) {
                    format!("{k}={}", redact_text(&v.to_string()))
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
        WireBody::Json(other) => other.to_string(),
        WireBody::Form(pairs) => pairs
            .iter()
            .map(|(k, v)| {
                if is_secret(k) {
                    format!("{k}={}", redact_text(v))
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn lookup_str(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn lookup_bool(object: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(Value::as_bool)
}

fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn pascal(key: &str) -> String {
    wakeline_types::FieldCasing::Pascal.apply(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{refused, Scripted, ScriptedTransport};
    use wakeline_core::WakeConfig;
    use wakeline_types::Channel;

    fn backend(proxy_base: Option<&str>) -> BackendConfig {
        BackendConfig {
            origin: "http://origin.test".to_string(),
            proxy_base: proxy_base.map(ToString::to_string),
            attempt_timeout_ms: 8000,
        }
    }

    fn dispatcher(transport: Arc<ScriptedTransport>, proxy_base: Option<&str>) -> Dispatcher {
        Dispatcher::new(
            transport,
            Arc::new(SessionStore::in_memory()),
            StatusStore::new(),
            &backend(proxy_base),
        )
    }

    fn login_payload() -> OperationPayload {
        OperationPayload::new()
            .with("email", "a@b.com")
            .with("password", "hunter2")
    }

    fn signup_payload() -> OperationPayload {
        OperationPayload::new()
            .with("username", "ada")
            .with("password", "hunter2")
            .with("email", "ada@b.com")
            .with("country", "NO")
            .with("age", 36)
    }

    #[tokio::test]
    async fn fourth_variant_wins_after_three_network_failures() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                refused(),
                refused(),
                refused(),
                Scripted::Respond(200, r#"{"token":"T","username":"a"}"#),
            ],
            refused(),
        ));
        let dispatcher = dispatcher(transport.clone(), Some("http://app.test"));

        let outcome = dispatcher
            .submit_credentials(&login_payload())
            .await
            .expect("login");

        let credential = outcome.credential().expect("identity");
        assert_eq!(credential.token, "T");
        assert_eq!(credential.profile.username, "a");
        assert!(!outcome.offline_synthesized());
        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3].url, "http://app.test/api/auth/login-with-password");
        assert_eq!(
            calls[3].body,
            WireBody::Json(serde_json::json!({"email": "a@b.com", "password": "hunter2"}))
        );
        let stored = dispatcher.store.load_credential().await.expect("stored");
        assert_eq!(stored.token, "T");
    }

    #[tokio::test]
    async fn rejection_stops_the_chain() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                refused(),
                Scripted::Respond(404, ""),
                Scripted::Respond(401, r#"{"message":"Invalid email or password"}"#),
            ],
            Scripted::Respond(200, r#"{"token":"late"}"#),
        ));
        let dispatcher = dispatcher(transport.clone(), Some("http://app.test"));

        let err = dispatcher
            .submit_credentials(&login_payload())
            .await
            .expect_err("rejected");

        assert!(matches!(err, DispatchError::InvalidCredentials { .. }));
        assert_eq!(err.to_string(), "Invalid email or password");
        assert_eq!(transport.call_count(), 3);
        assert!(dispatcher.store.load_credential().await.is_none());
    }

    #[tokio::test]
    async fn rejection_names_the_variant_that_drew_it() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                refused(),
                Scripted::Respond(404, ""),
                Scripted::Respond(401, r#"{"message":"Wrong password"}"#),
            ],
            refused(),
        ));
        let dispatcher = dispatcher(transport, None);

        let chain = dispatcher
            .run_chain(descriptor(OperationKind::Login), &login_payload(), "corr")
            .await;

        // forwarded variants are skipped without a proxy base and do not count
        match chain {
            ChainOutcome::Rejected {
                error,
                variant,
                attempts,
            } => {
                assert_eq!(variant, "form-pascal");
                assert_eq!(attempts, 3);
                assert_eq!(error.code(), "invalid_credentials");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn health_reads_the_shared_status_store() {
        let status = StatusStore::new();
        let dispatcher = Dispatcher::new(
            Arc::new(ScriptedTransport::offline()),
            Arc::new(SessionStore::in_memory()),
            status.clone(),
            &backend(None),
        );
        status.transition(wakeline_types::HealthState::Checking, "start", 0);
        assert_eq!(
            dispatcher.health().state,
            wakeline_types::HealthState::Checking
        );
    }

    #[tokio::test]
    async fn marker_in_a_400_body_is_a_rejection() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Scripted::Respond(400, "Username already exists")],
            refused(),
        ));
        let dispatcher = dispatcher(transport.clone(), None);

        let err = dispatcher
            .create_account(&signup_payload())
            .await
            .expect_err("rejected");
        assert!(matches!(err, DispatchError::Rejected { status: 400, .. }));
        assert_eq!(err.to_string(), "Username already exists");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_signup_synthesizes_offline_identity() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Scripted::Respond(500, "boom"), Scripted::Respond(415, "")],
            refused(),
        ));
        let dispatcher = dispatcher(transport.clone(), None);

        let outcome = dispatcher
            .create_account(&signup_payload())
            .await
            .expect("synthesized");

        assert!(outcome.offline_synthesized());
        assert_eq!(
            outcome.to_json(OperationKind::CreateAccount)["offlineSynthesized"],
            serde_json::json!(true)
        );
        let credential = outcome.credential().expect("identity");
        assert!(credential.token.starts_with("offline_"));
        assert_eq!(credential.profile.username, "ada");
        assert_eq!(credential.profile.age, Some(36));
        // forwarded variants skipped without a proxy base
        assert_eq!(transport.call_count(), 5);
        assert!(dispatcher.store.offline_mode().await);
    }

    #[tokio::test]
    async fn offline_flag_short_circuits_without_traffic() {
        let transport = Arc::new(ScriptedTransport::offline());
        let dispatcher = dispatcher(transport.clone(), None);
        dispatcher.store.set_offline(true).await.expect("flag");

        let login = dispatcher
            .submit_credentials(&login_payload())
            .await
            .expect("login");
        assert!(login.offline_synthesized());
        assert_eq!(login.credential().map(|c| c.profile.username.as_str()), Some("a"));

        let info = dispatcher.check_availability("ada").await.expect("lookup");
        assert!(info.available && info.assumed);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn lookup_exhaustion_assumes_available_without_identity() {
        let transport = Arc::new(ScriptedTransport::offline());
        let dispatcher = dispatcher(transport.clone(), Some("http://app.test"));

        let info = dispatcher.check_availability("ada").await.expect("lookup");

        assert!(info.available);
        assert!(info.assumed);
        assert_eq!(transport.call_count(), 8);
        assert!(dispatcher.store.load_credential().await.is_none());
        assert!(!dispatcher.store.offline_mode().await);
    }

    #[tokio::test]
    async fn lookup_answers_from_conflict_and_object_bodies() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                Scripted::Respond(409, "taken"),
                Scripted::Respond(200, r#"{"exists":false}"#),
            ],
            refused(),
        ));
        let dispatcher = dispatcher(transport, None);

        assert!(!dispatcher.check_availability("ada").await.expect("409").available);
        let info = dispatcher.check_availability("ada").await.expect("200");
        assert!(info.available && !info.assumed);
    }

    #[tokio::test]
    async fn path_param_variant_escapes_the_username() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                refused(),
                refused(),
                refused(),
                refused(),
                refused(),
                refused(),
                Scripted::Respond(200, "true"),
            ],
            refused(),
        ));
        let dispatcher = dispatcher(transport.clone(), Some("http://app.test"));

        let info = dispatcher.check_availability("a b").await.expect("lookup");
        assert!(info.available);
        let calls = transport.calls();
        assert_eq!(calls[5].url, "http://origin.test/Auth/CheckUsername");
        assert_eq!(calls[6].url, "http://origin.test/auth/check-username/a%20b");
        assert_eq!(calls[6].body, WireBody::Empty);
    }

    #[tokio::test]
    async fn malformed_success_advances_to_alternate_channel() {
        let mut script = vec![Scripted::Respond(200, "<html>ok</html>")];
        script.extend(std::iter::repeat(refused()).take(7));
        script.push(Scripted::Respond(200, r#"{"accessToken":"A","refresh_token":"R"}"#));
        let transport = Arc::new(ScriptedTransport::new(script, refused()));
        let dispatcher = dispatcher(transport.clone(), Some("http://app.test"));

        let outcome = dispatcher
            .submit_credentials(&login_payload())
            .await
            .expect("login");

        let credential = outcome.credential().expect("identity");
        assert_eq!(credential.token, "A");
        assert_eq!(credential.refresh_token.as_deref(), Some("R"));
        let calls = transport.calls();
        assert_eq!(calls.len(), 9);
        assert_eq!(calls[8].channel, Channel::Alternate);
        assert_eq!(calls[7].query.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_wakes_backend_and_retries_once() {
        // first pass: 5 refused (no proxy base); wake: 1 ok; retry pass wins immediately
        let mut script = std::iter::repeat(refused()).take(5).collect::<Vec<_>>();
        script.push(Scripted::Respond(200, "awake"));
        script.push(Scripted::Respond(
            200,
            r#"{"token":"W","user":{"username":"ada","country":"NO","age":36}}"#,
        ));
        let transport = Arc::new(ScriptedTransport::new(script, refused()));
        let status = StatusStore::new();
        let mut signals = status.subscribe_signals();
        let wake = Arc::new(
            WakeOrchestrator::new(transport.clone(), "http://origin.test", WakeConfig::default())
                .with_status(status.clone()),
        );
        let dispatcher = Dispatcher::new(
            transport.clone(),
            Arc::new(SessionStore::in_memory()),
            status,
            &backend(None),
        )
        .with_wake(wake);

        let outcome = dispatcher
            .create_account(&signup_payload())
            .await
            .expect("account");

        assert_eq!(outcome.credential().map(|c| c.token.as_str()), Some("W"));
        assert_eq!(
            outcome.credential().map(|c| c.profile.country.as_str()),
            Some("NO")
        );
        assert_eq!(transport.call_count(), 7);
        assert_eq!(transport.calls()[5].url, "http://origin.test/health/wake");
        assert_eq!(
            signals.recv().await.expect("signal"),
            StatusSignal::ColdStartSuspected {
                operation: OperationKind::CreateAccount
            }
        );
    }

    #[tokio::test]
    async fn non_cold_failures_skip_the_wake_handoff() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Scripted::Respond(404, "")],
            refused(),
        ));
        let status = StatusStore::new();
        let wake = Arc::new(WakeOrchestrator::new(
            transport.clone(),
            "http://origin.test",
            WakeConfig::default(),
        ));
        let dispatcher = Dispatcher::new(
            transport.clone(),
            Arc::new(SessionStore::in_memory()),
            status,
            &backend(None),
        )
        .with_wake(wake);

        let outcome = dispatcher
            .submit_credentials(&login_payload())
            .await
            .expect("synthesized");
        assert!(outcome.offline_synthesized());
        // 7 primary-route variants, no wake calls
        assert_eq!(transport.call_count(), 7);
    }

    #[test]
    fn request_log_redacts_passwords() {
        let body = WireBody::Form(vec![
            ("Email".to_string(), "a@b.com".to_string()),
            ("Password".to_string(), "hunter2".to_string()),
        ]);
        let described = describe_body(&body);
        assert!(described.contains("Email=a@b.com"));
        assert!(!described.contains("hunter2"));
    }
}
