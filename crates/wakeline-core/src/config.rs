use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

use crate::{DEFAULT_BACKEND_ORIGIN, DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub origin: String,
    /// Base URL of the same-origin forwarding proxy. Forwarded variants are skipped without it.
    pub proxy_base: Option<String>,
    pub attempt_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_BACKEND_ORIGIN.to_string(),
            proxy_base: None,
            attempt_timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    pub wake_path: String,
    pub health_path: String,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub wake_timeout_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            wake_path: "/health/wake".to_string(),
            health_path: "/health".to_string(),
            max_attempts: 5,
            base_delay_ms: 2_000,
            backoff_multiplier: 1.5,
            wake_timeout_ms: 60_000,
            probe_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub countdown_secs: u32,
    pub poll_interval_secs: u64,
    pub max_failures: u32,
    pub background_probe_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 60,
            poll_interval_secs: 5,
            max_failures: 10,
            background_probe_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Production,
    Development,
}

impl DeploymentMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(DeploymentMode::Production),
            "development" | "dev" => Some(DeploymentMode::Development),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentMode::Production => "production",
            DeploymentMode::Development => "development",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub hostname: String,
    pub port: u16,
    pub mode: DeploymentMode,
    pub production_origin: String,
    pub development_origin: String,
    pub routing_prefixes: Vec<String>,
    pub forward_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_PROXY_HOST.to_string(),
            port: DEFAULT_PROXY_PORT,
            mode: DeploymentMode::Production,
            production_origin: DEFAULT_BACKEND_ORIGIN.to_string(),
            development_origin: "http://localhost:5000".to_string(),
            routing_prefixes: vec!["api".to_string()],
            forward_timeout_ms: 60_000,
        }
    }
}

impl ProxyConfig {
    pub fn upstream_origin(&self) -> &str {
        match self.mode {
            DeploymentMode::Production => &self.production_origin,
            DeploymentMode::Development => &self.development_origin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub wake: WakeConfig,
    pub monitor: MonitorConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    cli: Value,
}

#[derive(Clone)]
pub struct ConfigStore {
    project_path: PathBuf,
    global_path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let project_path = path.as_ref().to_path_buf();
        if let Some(parent) = project_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let global_path = resolve_global_config_path().await?;

        let global = read_json_file(&global_path)
            .await
            .unwrap_or_else(|_| empty_object());
        let project = read_json_file(&project_path)
            .await
            .unwrap_or_else(|_| empty_object());

        let layers = ConfigLayers {
            global,
            project,
            env: env_layer(),
            cli: cli_overrides.unwrap_or_else(empty_object),
        };

        let store = Self {
            project_path,
            global_path,
            layers: Arc::new(RwLock::new(layers)),
        };
        store.save_project().await?;
        store.save_global().await?;
        Ok(store)
    }

    pub async fn get(&self) -> AppConfig {
        let merged = self.get_effective_value().await;
        match serde_json::from_value(merged) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("invalid configuration, falling back to defaults: {}", err);
                AppConfig::default()
            }
        }
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.cli);
        merged
    }

    pub async fn patch_project(&self, patch: Value) -> anyhow::Result<Value> {
        {
            let mut layers = self.layers.write().await;
            deep_merge(&mut layers.project, &patch);
        }
        self.save_project().await?;
        Ok(self.get_effective_value().await)
    }

    async fn save_project(&self) -> anyhow::Result<()> {
        let snapshot = self.layers.read().await.project.clone();
        write_json_file(&self.project_path, &snapshot).await
    }

    async fn save_global(&self) -> anyhow::Result<()> {
        let snapshot = self.layers.read().await.global.clone();
        write_json_file(&self.global_path, &snapshot).await
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn write_json_file(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).await?;
    Ok(())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| empty_object()))
}

async fn resolve_global_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("WAKELINE_GLOBAL_CONFIG") {
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        return Ok(path);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("wakeline").join("config.json");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        return Ok(path);
    }
    Ok(PathBuf::from(".wakeline/global_config.json"))
}

fn env_layer() -> Value {
    env_layer_from(|key| std::env::var(key).ok())
}

fn env_layer_from(lookup: impl Fn(&str) -> Option<String>) -> Value {
    let mut root = empty_object();
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(origin) = non_empty("WAKELINE_ORIGIN") {
        deep_merge(&mut root, &json!({ "backend": { "origin": origin.trim() } }));
    }
    if let Some(proxy_base) = non_empty("WAKELINE_PROXY_BASE") {
        deep_merge(
            &mut root,
            &json!({ "backend": { "proxy_base": proxy_base.trim() } }),
        );
    }
    if let Some(timeout) =
        non_empty("WAKELINE_ATTEMPT_TIMEOUT_MS").and_then(|v| v.trim().parse::<u64>().ok())
    {
        deep_merge(
            &mut root,
            &json!({ "backend": { "attempt_timeout_ms": timeout } }),
        );
    }
    if let Some(mode) = non_empty("WAKELINE_MODE").and_then(|v| DeploymentMode::parse(&v)) {
        deep_merge(&mut root, &json!({ "proxy": { "mode": mode } }));
    }
    if let Some(origin) = non_empty("WAKELINE_PRODUCTION_ORIGIN") {
        deep_merge(
            &mut root,
            &json!({ "proxy": { "production_origin": origin.trim() } }),
        );
    }
    if let Some(origin) = non_empty("WAKELINE_DEVELOPMENT_ORIGIN") {
        deep_merge(
            &mut root,
            &json!({ "proxy": { "development_origin": origin.trim() } }),
        );
    }

    root
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}
