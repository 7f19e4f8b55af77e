use std::time::Duration;

use reqwest::{Client, Method};
use serde::Serialize;

const SAMPLE_DATA_PATH: &str = "/api/test/types";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorCheck {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorReport {
    pub url: String,
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    pub fn render(&self) -> String {
        let mut out = format!("wakeline doctor: {}\n", self.url);
        for check in &self.checks {
            let mark = if check.ok { "ok" } else { "FAIL" };
            out.push_str(&format!("  [{mark:>4}] {:<12} {}\n", check.name, check.detail));
        }
        out
    }
}

/// One-shot reachability report. Failures are findings, never errors.
pub async fn run_doctor(url: &str, timeout: Duration) -> DoctorReport {
    let base = url.trim().trim_end_matches('/').to_string();
    let client = match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(err) => {
            return DoctorReport {
                url: base,
                checks: vec![DoctorCheck {
                    name: "client",
                    ok: false,
                    detail: format!("could not build HTTP client: {err}"),
                }],
            }
        }
    };

    let health = check_get(&client, "health", &format!("{base}/health")).await;
    let sample = check_get(&client, "sample-data", &format!("{base}{SAMPLE_DATA_PATH}")).await;
    let cors = check_cors(&client, &format!("{base}{SAMPLE_DATA_PATH}")).await;

    DoctorReport {
        url: base,
        checks: vec![health, sample, cors],
    }
}

async fn check_get(client: &Client, name: &'static str, url: &str) -> DoctorCheck {
    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status();
            DoctorCheck {
                name,
                ok: status.is_success(),
                detail: format!("GET {url} -> {status}"),
            }
        }
        Err(err) => DoctorCheck {
            name,
            ok: false,
            detail: format!("GET {url} failed: {err}"),
        },
    }
}

async fn check_cors(client: &Client, url: &str) -> DoctorCheck {
    let response = client
        .request(Method::OPTIONS, url)
        .header("Origin", "http://localhost")
        .header("Access-Control-Request-Method", "GET")
        .send()
        .await;
    match response {
        Ok(response) => {
            let allow_origin = response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            match allow_origin {
                Some(value) => DoctorCheck {
                    name: "cors",
                    ok: true,
                    detail: format!("access-control-allow-origin: {value}"),
                },
                None => DoctorCheck {
                    name: "cors",
                    ok: false,
                    detail: format!("preflight -> {} without CORS headers", response.status()),
                },
            }
        }
        Err(err) => DoctorCheck {
            name: "cors",
            ok: false,
            detail: format!("preflight failed: {err}"),
        },
    }
}
