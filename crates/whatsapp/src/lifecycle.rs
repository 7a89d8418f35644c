//! Connection lifecycle state machine.
//!
//! [`Lifecycle::handle`] is the single ingestion point: it consumes one
//! [`Input`] (a transport event, an elapsed timer, an administrative command),
//! updates the owned [`SessionState`] and returns the [`Effect`]s the caller
//! must perform, in order. Timers are returned as [`Effect::Schedule`] rather
//! than started here, so the machine runs without a clock in tests.
//!
//! Every transport instance and every scheduled timer is stamped with an
//! epoch. The epoch moves whenever the transport is torn down or started, so
//! late events from a dead instance and timers that outlived their transition
//! are recognised and dropped.

use std::time::Duration;

use {
    tracing::{debug, info, warn},
    wagate_channels::{ClientInfo, StampedEvent, TransportEvent},
};

use crate::{
    policy::{ReconnectDecision, ReconnectPolicy},
    state::{Phase, SessionState},
};

// ── Inputs and effects ───────────────────────────────────────────────────────

/// Human-triggered lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOp {
    /// Tear down, purge stale session files, pair again.
    Reconnect,
    /// Unlink the device, tear down, pair again.
    Logout,
}

impl AdminOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reconnect => "reconnect",
            Self::Logout => "logout",
        }
    }
}

/// A multi-step transition that has started but not yet re-initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlight {
    AutoReconnect,
    Admin(AdminOp),
}

impl InFlight {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoReconnect => "auto-reconnect",
            Self::Admin(op) => op.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Issue the first `initialize()`.
    Start,
    Transport(StampedEvent),
    InitializeFailed { epoch: u64, error: String },
    ClientInfo { epoch: u64, info: ClientInfo },
    SettleElapsed { epoch: u64 },
    ReconnectDue { epoch: u64 },
    ReinitDue { epoch: u64 },
    Admin(AdminOp),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a transport instance whose events carry `epoch`.
    Initialize { epoch: u64 },
    Teardown,
    Logout,
    PurgeSessionFiles,
    PublishArtifact(String),
    ClearArtifact,
    FetchClientInfo { epoch: u64 },
    /// Feed `input` back into the machine after `after`.
    Schedule { after: Duration, input: Input },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("a {0} transition is already in progress")]
    Busy(&'static str),
    #[error("session is already ready")]
    AlreadyReady,
    #[error("lifecycle controller has terminated")]
    Terminated,
    #[error("lifecycle controller is not running")]
    ControllerGone,
}

// ── Machine ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    pub ready_settle: Duration,
    pub reinit_delay: Duration,
    pub policy: ReconnectPolicy,
    pub refuse_reconnect_when_ready: bool,
}

impl LifecycleSettings {
    pub fn from_config(cfg: &wagate_config::LifecycleConfig) -> Self {
        Self {
            ready_settle: cfg.ready_settle(),
            reinit_delay: cfg.reinit_delay(),
            policy: ReconnectPolicy::from_config(cfg),
            refuse_reconnect_when_ready: cfg.refuse_reconnect_when_ready,
        }
    }
}

pub struct Lifecycle {
    state: SessionState,
    settings: LifecycleSettings,
    epoch: u64,
    in_flight: Option<InFlight>,
}

impl Lifecycle {
    pub fn new(settings: LifecycleSettings) -> Self {
        Self {
            state: SessionState::new(settings.policy.ceiling),
            settings,
            epoch: 0,
            in_flight: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn in_flight(&self) -> Option<InFlight> {
        self.in_flight
    }

    /// Consume one input. Errors are only returned for administrative
    /// commands; anything else that does not apply is ignored.
    pub fn handle(&mut self, input: Input) -> Result<Vec<Effect>, LifecycleError> {
        if self.state.phase == Phase::Terminated {
            return match input {
                Input::Admin(_) => Err(LifecycleError::Terminated),
                other => {
                    debug!(input = ?other, "lifecycle terminated, ignoring input");
                    Ok(Vec::new())
                },
            };
        }

        let effects = match input {
            Input::Start => self.on_start(),
            Input::Transport(stamped) => self.on_transport(stamped),
            Input::InitializeFailed { epoch, error } => {
                if self.is_live(epoch) {
                    warn!(error = %error, "transport initialize failed");
                    self.on_disconnect(&error)
                } else {
                    self.ignored("initialize failure", epoch)
                }
            },
            Input::ClientInfo { epoch, info } => {
                if epoch == self.epoch && self.state.phase == Phase::Ready {
                    info!(id = %info.id, name = %info.display_name, "client info available");
                    self.state.client_info = Some(info);
                }
                Vec::new()
            },
            Input::SettleElapsed { epoch } => {
                if epoch == self.epoch && self.state.phase == Phase::Authenticated {
                    info!("settle delay elapsed, declaring session ready");
                    self.enter_ready()
                } else {
                    self.ignored("settle timer", epoch)
                }
            },
            Input::ReconnectDue { epoch } => {
                if epoch == self.epoch && self.in_flight == Some(InFlight::AutoReconnect) {
                    self.in_flight = None;
                    info!(
                        attempt = self.state.reconnect_attempts,
                        max = self.settings.policy.ceiling,
                        "re-initializing after disconnect"
                    );
                    self.begin_initialize()
                } else {
                    self.ignored("reconnect timer", epoch)
                }
            },
            Input::ReinitDue { epoch } => {
                if epoch == self.epoch && matches!(self.in_flight, Some(InFlight::Admin(_))) {
                    self.in_flight = None;
                    self.begin_initialize()
                } else {
                    self.ignored("re-init timer", epoch)
                }
            },
            Input::Admin(op) => return self.on_admin(op),
            Input::Shutdown => {
                info!(from = %self.state.phase, "lifecycle terminating");
                self.epoch += 1;
                self.in_flight = None;
                self.state.phase = Phase::Terminated;
                self.state.client_info = None;
                vec![Effect::Teardown]
            },
        };
        Ok(effects)
    }

    /// True when inputs stamped with `epoch` still concern the running
    /// transport and no multi-step transition owns the session.
    fn is_live(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.in_flight.is_none()
    }

    fn ignored(&self, what: &str, epoch: u64) -> Vec<Effect> {
        debug!(
            what,
            epoch,
            current_epoch = self.epoch,
            phase = %self.state.phase,
            "ignoring stale input"
        );
        Vec::new()
    }

    fn on_start(&mut self) -> Vec<Effect> {
        if self.state.phase != Phase::Uninitialized {
            debug!(phase = %self.state.phase, "start requested twice, ignoring");
            return Vec::new();
        }
        self.state.reconnect_attempts = 0;
        self.begin_initialize()
    }

    fn begin_initialize(&mut self) -> Vec<Effect> {
        self.epoch += 1;
        self.state.phase = Phase::AwaitingPairing;
        self.state.client_info = None;
        vec![Effect::Initialize { epoch: self.epoch }]
    }

    fn on_transport(&mut self, stamped: StampedEvent) -> Vec<Effect> {
        if !self.is_live(stamped.epoch) {
            return self.ignored("transport event", stamped.epoch);
        }

        match (stamped.event, self.state.phase) {
            (TransportEvent::Qr(payload), Phase::AwaitingPairing) => {
                info!("pairing payload received");
                vec![Effect::PublishArtifact(payload)]
            },
            (TransportEvent::Authenticated, Phase::AwaitingPairing) => {
                info!(
                    settle_ms = self.settings.ready_settle.as_millis() as u64,
                    "authenticated, waiting before declaring ready"
                );
                self.state.phase = Phase::Authenticated;
                vec![Effect::Schedule {
                    after: self.settings.ready_settle,
                    input: Input::SettleElapsed { epoch: self.epoch },
                }]
            },
            (TransportEvent::Ready, Phase::AwaitingPairing | Phase::Authenticated) => {
                info!("transport reported ready");
                self.enter_ready()
            },
            (
                TransportEvent::Disconnected(reason),
                Phase::AwaitingPairing | Phase::Authenticated | Phase::Ready,
            ) => self.on_disconnect(&reason),
            (event, phase) => {
                debug!(?event, %phase, "transport event does not apply in this phase");
                Vec::new()
            },
        }
    }

    fn enter_ready(&mut self) -> Vec<Effect> {
        self.state.phase = Phase::Ready;
        self.state.reconnect_attempts = 0;
        info!("WhatsApp client is ready");
        vec![Effect::ClearArtifact, Effect::FetchClientInfo {
            epoch: self.epoch,
        }]
    }

    fn on_disconnect(&mut self, reason: &str) -> Vec<Effect> {
        info!(reason, from = %self.state.phase, "WhatsApp client disconnected");
        self.epoch += 1;
        self.state.phase = Phase::Disconnected;
        self.state.client_info = None;
        let mut effects = vec![Effect::Teardown, Effect::ClearArtifact];

        match self.settings.policy.decide(self.state.reconnect_attempts) {
            ReconnectDecision::Retry { delay } => {
                self.state.reconnect_attempts += 1;
                self.state.phase = Phase::AwaitingPairing;
                self.in_flight = Some(InFlight::AutoReconnect);
                info!(
                    attempt = self.state.reconnect_attempts,
                    max = self.settings.policy.ceiling,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                effects.push(Effect::Schedule {
                    after: delay,
                    input: Input::ReconnectDue { epoch: self.epoch },
                });
            },
            ReconnectDecision::Stop => {
                self.state.phase = Phase::ReconnectExhausted;
                warn!(
                    attempts = self.state.reconnect_attempts,
                    "reconnect attempts exhausted, waiting for an administrative reconnect"
                );
            },
        }
        effects
    }

    fn on_admin(&mut self, op: AdminOp) -> Result<Vec<Effect>, LifecycleError> {
        if let Some(current) = self.in_flight {
            warn!(requested = op.as_str(), current = current.as_str(), "rejecting admin command");
            return Err(LifecycleError::Busy(current.as_str()));
        }
        if op == AdminOp::Reconnect
            && self.settings.refuse_reconnect_when_ready
            && self.state.phase == Phase::Ready
        {
            return Err(LifecycleError::AlreadyReady);
        }

        info!(op = op.as_str(), from = %self.state.phase, "administrative transition");
        self.epoch += 1;
        self.in_flight = Some(InFlight::Admin(op));
        self.state.phase = Phase::AwaitingPairing;
        self.state.reconnect_attempts = 0;
        self.state.client_info = None;

        let reinit = Effect::Schedule {
            after: self.settings.reinit_delay,
            input: Input::ReinitDue { epoch: self.epoch },
        };
        Ok(match op {
            AdminOp::Reconnect => vec![
                Effect::Teardown,
                Effect::PurgeSessionFiles,
                Effect::ClearArtifact,
                reinit,
            ],
            AdminOp::Logout => vec![
                Effect::Logout,
                Effect::Teardown,
                Effect::ClearArtifact,
                reinit,
            ],
        })
    }
}
