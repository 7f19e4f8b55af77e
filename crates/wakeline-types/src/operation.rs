use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Login,
    CreateAccount,
    CheckUsername,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Login => "login",
            OperationKind::CreateAccount => "create-account",
            OperationKind::CheckUsername => "check-username",
        }
    }

    /// Accepts the canonical names plus the aliases the web client used over time.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "login" | "sign-in" | "signin" => Some(OperationKind::Login),
            "create-account" | "create-user" | "signup" | "sign-up" | "register" => {
                Some(OperationKind::CreateAccount)
            }
            "check-username" | "check-availability" | "availability" => {
                Some(OperationKind::CheckUsername)
            }
            _ => None,
        }
    }

    /// Login and account creation yield a session; availability checks are pure lookups.
    pub fn establishes_identity(self) -> bool {
        matches!(self, OperationKind::Login | OperationKind::CreateAccount)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    Json,
    Form,
    /// Fields travel in the query string, no body.
    Query,
    /// The first descriptor field is appended as a path segment, no body.
    PathParam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCasing {
    Pascal,
    Lower,
}

impl FieldCasing {
    pub fn apply(self, field: &str) -> String {
        match self {
            FieldCasing::Lower => field.to_ascii_lowercase(),
            FieldCasing::Pascal => {
                let mut chars = field.chars();
                match chars.next() {
                    Some(first) => {
                        let mut out = first.to_ascii_uppercase().to_string();
                        out.push_str(&chars.as_str().to_ascii_lowercase());
                        out
                    }
                    None => String::new(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Straight to the backend origin.
    Origin,
    /// Through the same-origin forwarding proxy under `/api`.
    Forwarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Primary,
    /// Separately configured HTTP/1.1 client used as the last resort.
    Alternate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportVariant {
    pub label: &'static str,
    pub method: HttpMethod,
    pub encoding: BodyEncoding,
    pub casing: FieldCasing,
    pub route: Route,
    pub channel: Channel,
    pub path: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    pub canonical_path: &'static str,
    /// Logical field names in lower case; casing is applied per variant.
    pub fields: &'static [&'static str],
    /// Substrings (lower case) that mark a 4xx body as a business rejection.
    pub rejection_markers: &'static [&'static str],
    pub variants: &'static [TransportVariant],
}

/// Caller-supplied fields for one operation, keyed by logical name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationPayload(Map<String, Value>);

impl OperationPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Case-insensitive lookup; numbers and booleans are rendered as text.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = self
            .0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)?;
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pascal_casing_capitalizes_first_letter_only() {
        assert_eq!(FieldCasing::Pascal.apply("email"), "Email");
        assert_eq!(FieldCasing::Pascal.apply("PASSWORD"), "Password");
        assert_eq!(FieldCasing::Lower.apply("Username"), "username");
    }

    #[test]
    fn operation_kind_parses_aliases() {
        assert_eq!(OperationKind::parse("signup"), Some(OperationKind::CreateAccount));
        assert_eq!(OperationKind::parse(" Login "), Some(OperationKind::Login));
        assert_eq!(
            OperationKind::parse("check-availability"),
            Some(OperationKind::CheckUsername)
        );
        assert_eq!(OperationKind::parse("leaderboard"), None);
        assert!(!OperationKind::CheckUsername.establishes_identity());
    }

    #[test]
    fn payload_field_lookup_ignores_key_case() {
        let payload = OperationPayload::from_value(json!({"Email": " a@b.com ", "age": 30}));
        assert_eq!(payload.field("email").as_deref(), Some("a@b.com"));
        assert_eq!(payload.field("AGE").as_deref(), Some("30"));
        assert_eq!(payload.field("country"), None);
    }
}
