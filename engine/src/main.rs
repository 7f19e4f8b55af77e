use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use wakeline_client::{
    DispatchError, Dispatcher, HealthMonitor, HttpTransport, Transport, WakeOrchestrator,
};
use wakeline_core::{
    resolve_state_root, AppConfig, ConfigStore, DeploymentMode, SessionStore, SharedPaths,
    StatusStore,
};
use wakeline_observability::{
    emit_event, init_process_logging, ObservabilityEvent, ProcessKind, WorkerGuard,
};
use wakeline_server::{serve, ProxyState};
use wakeline_types::{HealthState, OperationKind, OperationOutcome, OperationPayload};

mod doctor;

const LOG_RETENTION_DAYS: u64 = 14;
const CLI_PAGE: &str = "/cli";

#[derive(Parser, Debug)]
#[command(name = "wakeline")]
#[command(about = "Reach a cold-starting backend reliably, or degrade to offline")]
struct Cli {
    #[arg(long, global = true)]
    state_dir: Option<String>,
    #[arg(long, global = true)]
    config: Option<String>,
    /// Backend origin for this invocation.
    #[arg(long, global = true)]
    origin: Option<String>,
    /// Base URL of the forwarding proxy used by forwarded variants.
    #[arg(long, global = true)]
    proxy_base: Option<String>,
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the same-origin forwarding proxy.
    Proxy {
        #[arg(long, alias = "host")]
        hostname: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// production | development
        #[arg(long)]
        mode: Option<String>,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "WAKELINE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Signup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "WAKELINE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        age: Option<u32>,
    },
    CheckUsername {
        username: String,
    },
    /// Show the stored credential and offline flag.
    Whoami,
    /// Forget the stored credential and clear the offline flag.
    Logout,
    /// Run the wake sequence once and print the report.
    Wake,
    /// Single health probe.
    Health,
    /// Watch backend health until it is awake or offline.
    Monitor {
        #[arg(long, default_value_t = false)]
        continue_offline: bool,
    },
    /// One-shot reachability report. Always exits 0.
    Doctor {
        #[arg(long, default_value = "http://127.0.0.1:5000")]
        url: String,
        #[arg(long, default_value_t = 10_000)]
        probe_timeout_ms: u64,
    },
}

struct ClientRuntime {
    config: AppConfig,
    store: Arc<SessionStore>,
    status: StatusStore,
    wake: Arc<WakeOrchestrator>,
    dispatcher: Dispatcher,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = SharedPaths::from_root(resolve_state_root(cli.state_dir.clone()));
    let overrides = build_cli_overrides(
        cli.origin.clone(),
        cli.proxy_base.clone(),
        cli.timeout_ms,
        &cli.command,
    )?;
    let config_path = cli.config.clone().map(PathBuf::from);

    match cli.command {
        Command::Proxy { .. } => {
            let _log_guard = init_logging(ProcessKind::Proxy, &paths)?;
            let config = load_config(&paths, overrides, config_path).await?;
            let addr: SocketAddr = format!("{}:{}", config.proxy.hostname, config.proxy.port)
                .parse()
                .context("invalid hostname or port")?;
            info!(
                "starting wakeline proxy on http://{addr} (mode={}, upstream={})",
                config.proxy.mode.as_str(),
                config.proxy.upstream_origin()
            );
            serve(addr, ProxyState::new(&config.proxy)?).await?;
        }
        Command::Doctor {
            url,
            probe_timeout_ms,
        } => {
            // the report must print even when the log directory is unusable
            let _log_guard = init_logging(ProcessKind::Doctor, &paths).ok();
            let report = doctor::run_doctor(&url, Duration::from_millis(probe_timeout_ms)).await;
            print!("{}", report.render());
        }
        command => {
            let _log_guard = init_logging(ProcessKind::Client, &paths)?;
            let runtime = build_runtime(&paths, overrides, config_path).await?;
            run_client_command(&runtime, command).await?;
        }
    }

    Ok(())
}

async fn run_client_command(runtime: &ClientRuntime, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login { email, password } => {
            let payload = OperationPayload::new()
                .with("email", email)
                .with("password", password);
            let outcome = runtime.dispatcher.submit_credentials(&payload).await;
            print_outcome(runtime, OperationKind::Login, outcome)?;
        }
        Command::Signup {
            username,
            email,
            password,
            country,
            age,
        } => {
            let mut payload = OperationPayload::new()
                .with("username", username)
                .with("email", email)
                .with("password", password);
            if let Some(country) = country {
                payload = payload.with("country", country);
            }
            if let Some(age) = age {
                payload = payload.with("age", age);
            }
            let outcome = runtime.dispatcher.create_account(&payload).await;
            print_outcome(runtime, OperationKind::CreateAccount, outcome)?;
        }
        Command::CheckUsername { username } => {
            let outcome = runtime
                .dispatcher
                .check_availability(&username)
                .await
                .map(OperationOutcome::Availability);
            print_outcome(runtime, OperationKind::CheckUsername, outcome)?;
        }
        Command::Whoami => {
            let credential = runtime.store.load_credential().await;
            let profile = match &credential {
                Some(credential) => Some(credential.profile.clone()),
                None => runtime.store.stored_profile().await,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "signedIn": credential.is_some(),
                    "offlineSynthesized": credential.as_ref().is_some_and(|c| c.offline_synthesized()),
                    "profile": profile,
                    "offlineMode": runtime.store.offline_mode().await,
                }))?
            );
        }
        Command::Logout => {
            runtime.store.clear_credential().await?;
            runtime.store.set_offline(false).await?;
            info!("stored credential cleared");
            println!("signed out");
        }
        Command::Wake => {
            let report = runtime.wake.wake_up_server().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Health => {
            let awake = runtime.wake.is_server_awake().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "origin": runtime.config.backend.origin,
                    "awake": awake,
                    "monitor": runtime.dispatcher.health(),
                }))?
            );
        }
        Command::Monitor { continue_offline } => {
            let state = watch_health(runtime, continue_offline).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "state": state,
                    "snapshot": runtime.status.snapshot(),
                    "offlineMode": runtime.store.offline_mode().await,
                }))?
            );
        }
        Command::Proxy { .. } | Command::Doctor { .. } => {}
    }
    Ok(())
}

fn print_outcome(
    runtime: &ClientRuntime,
    kind: OperationKind,
    outcome: Result<OperationOutcome, DispatchError>,
) -> anyhow::Result<()> {
    match outcome {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome.to_json(kind))?);
            Ok(())
        }
        Err(err) => {
            if err.is_rejection() {
                runtime.status.report_error(err.to_surfaced(), CLI_PAGE);
            }
            if let Some(surfaced) = runtime.status.current_error() {
                println!("{}", serde_json::to_string_pretty(&surfaced)?);
            }
            Err(anyhow::Error::new(err).context(format!("{} failed", kind.as_str())))
        }
    }
}

async fn watch_health(runtime: &ClientRuntime, continue_offline: bool) -> anyhow::Result<HealthState> {
    let (monitor, handle) = HealthMonitor::new(
        runtime.wake.clone(),
        runtime.store.clone(),
        runtime.status.clone(),
        runtime.config.monitor.clone(),
    );
    let mut transitions = runtime.status.subscribe_transitions();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.run(cancel.clone()));

    let final_state = loop {
        let transition = transitions
            .recv()
            .await
            .context("health monitor stopped unexpectedly")?;
        println!("{}", serde_json::to_string(&transition)?);
        match transition.to {
            HealthState::Awake => break HealthState::Awake,
            HealthState::Offline => {
                if continue_offline && handle.continue_offline().await {
                    let mut health = runtime.status.subscribe_health();
                    health
                        .wait_for(|snapshot| !snapshot.blocking)
                        .await
                        .context("health store closed")?;
                }
                break HealthState::Offline;
            }
            _ => {}
        }
    };

    cancel.cancel();
    let _ = task.await;
    Ok(final_state)
}

fn init_logging(
    process: ProcessKind,
    paths: &SharedPaths,
) -> anyhow::Result<WorkerGuard> {
    let (guard, log_info) = init_process_logging(process, &paths.logs_dir, LOG_RETENTION_DAYS)?;
    emit_event(
        tracing::Level::INFO,
        process,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "wakeline.main",
            status: Some("ok"),
            detail: Some("jsonl logging initialized"),
            ..Default::default()
        },
    );
    info!("logging initialized: {:?}", log_info);
    Ok(guard)
}

async fn load_config(
    paths: &SharedPaths,
    overrides: Option<serde_json::Value>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<AppConfig> {
    let config_path = config_path.unwrap_or_else(|| paths.config_path.clone());
    let store = ConfigStore::new(&config_path, overrides)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    Ok(store.get().await)
}

async fn build_runtime(
    paths: &SharedPaths,
    overrides: Option<serde_json::Value>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<ClientRuntime> {
    let config = load_config(paths, overrides, config_path).await?;
    let store = Arc::new(open_session_store(&paths.session_store_path).await?);
    let status = StatusStore::new();
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
    let wake = Arc::new(
        WakeOrchestrator::new(
            transport.clone(),
            config.backend.origin.clone(),
            config.wake.clone(),
        )
        .with_status(status.clone()),
    );
    let dispatcher = Dispatcher::new(transport, store.clone(), status.clone(), &config.backend)
        .with_wake(wake.clone());
    info!(
        "client runtime ready: origin={} proxy_base={} state={}",
        config.backend.origin,
        config.backend.proxy_base.as_deref().unwrap_or("-"),
        paths.state_dir.display()
    );
    Ok(ClientRuntime {
        config,
        store,
        status,
        wake,
        dispatcher,
    })
}

async fn open_session_store(path: &Path) -> anyhow::Result<SessionStore> {
    SessionStore::open(path)
        .await
        .with_context(|| format!("failed to open session store at {}", path.display()))
}

fn build_cli_overrides(
    origin: Option<String>,
    proxy_base: Option<String>,
    timeout_ms: Option<u64>,
    command: &Command,
) -> anyhow::Result<Option<serde_json::Value>> {
    let mut backend = serde_json::Map::new();
    if let Some(origin) = origin.map(|o| o.trim().to_string()).filter(|o| !o.is_empty()) {
        backend.insert("origin".to_string(), serde_json::Value::String(origin));
    }
    if let Some(base) = proxy_base
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
    {
        backend.insert("proxy_base".to_string(), serde_json::Value::String(base));
    }
    if let Some(timeout_ms) = timeout_ms {
        if timeout_ms == 0 {
            anyhow::bail!("--timeout-ms must be greater than zero");
        }
        backend.insert("attempt_timeout_ms".to_string(), timeout_ms.into());
    }

    let mut proxy = serde_json::Map::new();
    if let Command::Proxy {
        hostname,
        port,
        mode,
    } = command
    {
        if let Some(hostname) = hostname {
            proxy.insert("hostname".to_string(), hostname.clone().into());
        }
        if let Some(port) = port {
            proxy.insert("port".to_string(), (*port).into());
        }
        if let Some(mode) = mode {
            let parsed = DeploymentMode::parse(mode).with_context(|| {
                format!("unsupported mode `{mode}`. supported modes: production, development")
            })?;
            proxy.insert("mode".to_string(), parsed.as_str().into());
        }
    }

    if backend.is_empty() && proxy.is_empty() {
        return Ok(None);
    }
    let mut root = serde_json::Map::new();
    if !backend.is_empty() {
        root.insert("backend".to_string(), serde_json::Value::Object(backend));
    }
    if !proxy.is_empty() {
        root.insert("proxy".to_string(), serde_json::Value::Object(proxy));
    }
    Ok(Some(serde_json::Value::Object(root)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_are_none_without_flags() {
        let overrides = build_cli_overrides(None, None, None, &Command::Wake).expect("overrides");
        assert!(overrides.is_none());
    }

    #[test]
    fn backend_flags_land_under_backend() {
        let overrides = build_cli_overrides(
            Some(" https://api.example ".to_string()),
            Some("http://127.0.0.1:8787".to_string()),
            Some(3000),
            &Command::Health,
        )
        .expect("overrides")
        .expect("some");
        assert_eq!(overrides["backend"]["origin"], json!("https://api.example"));
        assert_eq!(
            overrides["backend"]["proxy_base"],
            json!("http://127.0.0.1:8787")
        );
        assert_eq!(overrides["backend"]["attempt_timeout_ms"], json!(3000));
        assert!(overrides.get("proxy").is_none());
    }

    #[test]
    fn proxy_mode_is_validated_and_normalized() {
        let command = Command::Proxy {
            hostname: None,
            port: Some(9000),
            mode: Some("Dev".to_string()),
        };
        let overrides = build_cli_overrides(None, None, None, &command)
            .expect("overrides")
            .expect("some");
        assert_eq!(overrides["proxy"]["mode"], json!("development"));
        assert_eq!(overrides["proxy"]["port"], json!(9000));

        let bad = Command::Proxy {
            hostname: None,
            port: None,
            mode: Some("staging".to_string()),
        };
        let err = build_cli_overrides(None, None, None, &bad).unwrap_err();
        assert!(err.to_string().contains("unsupported mode `staging`"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = build_cli_overrides(None, None, Some(0), &Command::Wake).unwrap_err();
        assert!(err.to_string().contains("--timeout-ms"));
    }

    #[test]
    fn cli_parses_signup_with_optional_profile_fields() {
        let cli = Cli::try_parse_from([
            "wakeline",
            "--origin",
            "http://localhost:5000",
            "signup",
            "--username",
            "ada",
            "--email",
            "ada@example.com",
            "--password",
            "pw",
            "--age",
            "36",
        ])
        .expect("parse");
        assert_eq!(cli.origin.as_deref(), Some("http://localhost:5000"));
        match cli.command {
            Command::Signup { age, country, .. } => {
                assert_eq!(age, Some(36));
                assert_eq!(country, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
