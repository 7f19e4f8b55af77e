use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use wakeline_core::{MonitorConfig, SessionStore, StatusSignal, StatusStore};
use wakeline_observability::{emit_event, ObservabilityEvent, ProcessKind};
use wakeline_types::HealthState;

use crate::WakeOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    Start { offline_flag: bool },
    ProbeResult(bool),
    /// One second of countdown elapsed.
    Tick,
    PollDue,
    ColdStartReported,
    WakeSucceeded,
    BackgroundProbe(bool),
    ContinueOffline,
    RetryRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Probe,
    ArmColdStartTimers,
    DisarmColdStartTimers,
    ArmBackgroundProbe,
    DisarmBackgroundProbe,
    PersistOffline,
    /// Drop the durable offline flag once the backend answers again.
    ClearOffline,
    Unblock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    pub transitions: Vec<Transition>,
    pub effects: Vec<Effect>,
    pub eta_secs: Option<u32>,
}

/// The health monitor's transition function. Holds no timers and does no I/O; the driver
/// carries out the returned effects.
#[derive(Debug, Clone)]
pub struct HealthMachine {
    state: HealthState,
    failures: u32,
    eta_secs: u32,
    countdown_secs: u32,
    max_failures: u32,
}

impl HealthMachine {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            state: HealthState::Unknown,
            failures: 0,
            eta_secs: 0,
            countdown_secs: config.countdown_secs.max(1),
            max_failures: config.max_failures,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn eta_secs(&self) -> u32 {
        self.eta_secs
    }

    pub fn apply(&mut self, event: MonitorEvent) -> Step {
        use HealthState::*;

        let mut step = Step::default();
        match (self.state, event) {
            (Unknown, MonitorEvent::Start { offline_flag: true }) => {
                self.go(&mut step, Offline, "offline flag persisted");
                step.effects.push(Effect::ArmBackgroundProbe);
            }
            (Unknown, MonitorEvent::Start { offline_flag: false }) => {
                self.go(&mut step, Checking, "startup");
                step.effects.push(Effect::Probe);
            }
            (Checking, MonitorEvent::ProbeResult(true)) => {
                self.failures = 0;
                self.eta_secs = 0;
                self.go(&mut step, Awake, "health probe ok");
                step.effects.push(Effect::DisarmColdStartTimers);
                step.effects.push(Effect::ClearOffline);
            }
            (Checking, MonitorEvent::ProbeResult(false)) => {
                self.failures += 1;
                let fresh_episode = self.eta_secs == 0;
                if fresh_episode {
                    self.eta_secs = self.countdown_secs;
                    step.eta_secs = Some(self.eta_secs);
                }
                self.go(&mut step, ColdStart, "health probe failed");
                if self.failures > self.max_failures {
                    self.eta_secs = 0;
                    self.go(&mut step, Offline, "failure budget exhausted");
                    step.effects.push(Effect::DisarmColdStartTimers);
                    step.effects.push(Effect::ArmBackgroundProbe);
                } else if fresh_episode {
                    step.effects.push(Effect::ArmColdStartTimers);
                }
            }
            (ColdStart, MonitorEvent::Tick) => {
                self.eta_secs = self.eta_secs.saturating_sub(1);
                if self.eta_secs == 0 {
                    self.eta_secs = self.countdown_secs;
                    self.go(&mut step, Checking, "countdown elapsed");
                    step.effects.push(Effect::Probe);
                }
                step.eta_secs = Some(self.eta_secs);
            }
            (ColdStart, MonitorEvent::PollDue | MonitorEvent::WakeSucceeded) => {
                self.go(&mut step, Checking, "poll");
                step.effects.push(Effect::Probe);
            }
            (Awake, MonitorEvent::ColdStartReported) => {
                self.go(&mut step, Checking, "cold start reported by dispatcher");
                step.effects.push(Effect::Probe);
            }
            (Offline, MonitorEvent::BackgroundProbe(true)) => {
                self.failures = 0;
                self.go(&mut step, Awake, "background probe ok");
                step.effects.push(Effect::DisarmBackgroundProbe);
                step.effects.push(Effect::ClearOffline);
            }
            (Offline, MonitorEvent::ContinueOffline) => {
                step.effects.push(Effect::PersistOffline);
                step.effects.push(Effect::Unblock);
            }
            (Offline, MonitorEvent::RetryRequested) => {
                self.failures = 0;
                self.go(&mut step, Checking, "retry requested");
                step.effects.push(Effect::DisarmBackgroundProbe);
                step.effects.push(Effect::Probe);
            }
            _ => {}
        }
        step
    }

    fn go(&mut self, step: &mut Step, to: HealthState, reason: &'static str) {
        step.transitions.push(Transition {
            from: self.state,
            to,
            reason,
        });
        self.state = to;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    ContinueOffline,
    Retry,
}

/// User-facing handle: the exit actions the blocking status offers.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    pub async fn continue_offline(&self) -> bool {
        self.tx.send(MonitorCommand::ContinueOffline).await.is_ok()
    }

    pub async fn retry(&self) -> bool {
        self.tx.send(MonitorCommand::Retry).await.is_ok()
    }
}

/// Session-wide driver for [`HealthMachine`]. Owns every timer.
pub struct HealthMonitor {
    probe: Arc<WakeOrchestrator>,
    store: Arc<SessionStore>,
    status: StatusStore,
    config: MonitorConfig,
    commands: mpsc::Receiver<MonitorCommand>,
}

struct Timers {
    countdown: Option<Interval>,
    poll: Option<Interval>,
    background: Option<Interval>,
}

impl HealthMonitor {
    pub fn new(
        probe: Arc<WakeOrchestrator>,
        store: Arc<SessionStore>,
        status: StatusStore,
        config: MonitorConfig,
    ) -> (Self, MonitorHandle) {
        let (tx, commands) = mpsc::channel(16);
        (
            Self {
                probe,
                store,
                status,
                config,
                commands,
            },
            MonitorHandle { tx },
        )
    }

    /// Runs until `cancel` fires. Timers are dropped with the task.
    pub async fn run(mut self, cancel: CancellationToken) -> HealthState {
        let mut machine = HealthMachine::new(&self.config);
        let mut timers = Timers {
            countdown: None,
            poll: None,
            background: None,
        };
        let mut signals = self.status.subscribe_signals();

        let offline_flag = self.store.offline_mode().await;
        let mut running = self
            .drive(
                &mut machine,
                &mut timers,
                &cancel,
                MonitorEvent::Start { offline_flag },
            )
            .await;

        while running {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = next_tick(&mut timers.countdown) => MonitorEvent::Tick,
                _ = next_tick(&mut timers.poll) => MonitorEvent::PollDue,
                _ = next_tick(&mut timers.background) => {
                    match self.probe_unless_cancelled(&cancel).await {
                        Some(awake) => MonitorEvent::BackgroundProbe(awake),
                        None => break,
                    }
                }
                signal = signals.recv() => match signal {
                    Ok(StatusSignal::ColdStartSuspected { .. }) => MonitorEvent::ColdStartReported,
                    Ok(StatusSignal::WakeSucceeded { .. }) => MonitorEvent::WakeSucceeded,
                    Ok(StatusSignal::WakeFailed { .. }) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("health monitor skipped {} status signals", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(command) = self.commands.recv() => match command {
                    MonitorCommand::ContinueOffline => MonitorEvent::ContinueOffline,
                    MonitorCommand::Retry => MonitorEvent::RetryRequested,
                },
            };
            running = self.drive(&mut machine, &mut timers, &cancel, event).await;
        }

        tracing::debug!(state = machine.state().as_str(), "health monitor stopped");
        machine.state()
    }

    /// Applies `first` and every event its effects produce. Returns false once `cancel` fired
    /// during a probe.
    async fn drive(
        &self,
        machine: &mut HealthMachine,
        timers: &mut Timers,
        cancel: &CancellationToken,
        first: MonitorEvent,
    ) -> bool {
        let mut pending = VecDeque::from([first]);
        while let Some(event) = pending.pop_front() {
            let step = machine.apply(event);
            for transition in &step.transitions {
                self.publish(transition, machine.failures());
            }
            if let Some(eta) = step.eta_secs {
                self.status.set_eta(eta);
            }
            for effect in step.effects {
                match effect {
                    Effect::Probe => {
                        let Some(awake) = self.probe_unless_cancelled(cancel).await else {
                            return false;
                        };
                        pending.push_back(MonitorEvent::ProbeResult(awake));
                    }
                    Effect::ArmColdStartTimers => {
                        timers.countdown = Some(every(Duration::from_secs(1)));
                        timers.poll = Some(every(Duration::from_secs(
                            self.config.poll_interval_secs.max(1),
                        )));
                    }
                    Effect::DisarmColdStartTimers => {
                        timers.countdown = None;
                        timers.poll = None;
                    }
                    Effect::ArmBackgroundProbe => {
                        timers.background = Some(every(Duration::from_secs(
                            self.config.background_probe_secs.max(1),
                        )));
                    }
                    Effect::DisarmBackgroundProbe => timers.background = None,
                    Effect::PersistOffline => {
                        if let Err(err) = self.store.set_offline(true).await {
                            tracing::warn!("failed to persist offline flag: {}", err);
                        }
                    }
                    Effect::ClearOffline => {
                        if self.store.offline_mode().await {
                            match self.store.set_offline(false).await {
                                Ok(()) => tracing::info!("backend reachable, offline flag cleared"),
                                Err(err) => {
                                    tracing::warn!("failed to clear offline flag: {}", err)
                                }
                            }
                        }
                    }
                    Effect::Unblock => self.status.set_blocking(false),
                }
            }
        }
        true
    }

    async fn probe_unless_cancelled(&self, cancel: &CancellationToken) -> Option<bool> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            awake = self.probe.is_server_awake() => Some(awake),
        }
    }

    fn publish(&self, transition: &Transition, failures: u32) {
        let applied = self
            .status
            .transition(transition.to, transition.reason, failures);
        let (from, to) = (transition.from.as_str(), transition.to.as_str());
        let detail = format!("{from}->{to} failures={failures}");
        emit_event(
            if transition.to == HealthState::Offline {
                Level::WARN
            } else {
                Level::INFO
            },
            ProcessKind::Client,
            ObservabilityEvent {
                event: "health.transition",
                component: "monitor",
                status: Some(if applied { to } else { "ignored" }),
                detail: Some(&detail),
                ..Default::default()
            },
        );
    }
}

fn every(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
