use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;

use wakeline_core::{DeploymentMode, ProxyConfig};

mod http;
pub mod normalize;

pub use http::{app_router, serve};
pub use normalize::normalize_path;

pub const FORWARDED_BY: &str = "wakeline-proxy";

#[derive(Clone)]
pub struct ProxyState {
    pub client: Client,
    pub upstream: Arc<str>,
    pub mode: DeploymentMode,
    pub routing_prefixes: Arc<Vec<String>>,
    pub started_at_ms: u64,
}

impl ProxyState {
    pub fn new(config: &ProxyConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.forward_timeout_ms.max(1)))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            upstream: Arc::from(config.upstream_origin().trim_end_matches('/')),
            mode: config.mode,
            routing_prefixes: Arc::new(config.routing_prefixes.clone()),
            started_at_ms: now_ms(),
        })
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
