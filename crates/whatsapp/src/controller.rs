//! Async runtime around the [`Lifecycle`] machine.
//!
//! One actor task owns the machine. Administrative commands, transport events
//! and elapsed timers all arrive on channels and are applied one at a time;
//! the effects of each input run to completion before the next input is
//! read. Readers never touch the actor: they get [`SessionState`] snapshots
//! from a `watch` channel.

use std::sync::Arc;

use {
    tokio::{
        sync::{mpsc, oneshot, watch},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
    wagate_channels::{EventSink, StampedEvent, Transport},
};

use crate::{
    cleanup::SessionCleaner,
    lifecycle::{AdminOp, Effect, Input, Lifecycle, LifecycleError, LifecycleSettings},
    pairing::PairingArtifacts,
    state::{Phase, SessionState},
};

enum Command {
    Admin(AdminOp, oneshot::Sender<Result<(), LifecycleError>>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable access to the running controller.
#[derive(Clone)]
pub struct LifecycleHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl LifecycleHandle {
    /// Current snapshot.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Tear down, purge stale session files and pair again.
    pub async fn reconnect(&self) -> Result<(), LifecycleError> {
        self.admin(AdminOp::Reconnect).await
    }

    /// Unlink the device and pair again.
    pub async fn logout(&self) -> Result<(), LifecycleError> {
        self.admin(AdminOp::Logout).await
    }

    /// Stop the controller and wait until the transport has been torn down.
    /// Calling it again, or after the controller has exited, is a no-op.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            // Dropped without reply means another shutdown already finished.
            let _ = rx.await;
        }
    }

    async fn admin(&self, op: AdminOp) -> Result<(), LifecycleError> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Admin(op, tx)).is_err() {
            return Err(self.gone());
        }
        rx.await.unwrap_or_else(|_| Err(self.gone()))
    }

    fn gone(&self) -> LifecycleError {
        if self.state.borrow().phase == Phase::Terminated {
            LifecycleError::Terminated
        } else {
            LifecycleError::ControllerGone
        }
    }
}

pub struct LifecycleController {
    machine: Lifecycle,
    transport: Arc<dyn Transport>,
    artifacts: Arc<PairingArtifacts>,
    cleaner: Arc<dyn SessionCleaner>,
    state_tx: watch::Sender<SessionState>,
    events_tx: mpsc::UnboundedSender<StampedEvent>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    init_task: Option<JoinHandle<()>>,
}

impl LifecycleController {
    /// Start the actor and issue the first `initialize()`.
    pub fn spawn(
        settings: LifecycleSettings,
        transport: Arc<dyn Transport>,
        artifacts: Arc<PairingArtifacts>,
        cleaner: Arc<dyn SessionCleaner>,
    ) -> (LifecycleHandle, JoinHandle<()>) {
        let machine = Lifecycle::new(settings);
        let (state_tx, state_rx) = watch::channel(machine.state().clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        let _ = inputs_tx.send(Input::Start);

        let controller = Self {
            machine,
            transport,
            artifacts,
            cleaner,
            state_tx,
            events_tx,
            inputs_tx,
            init_task: None,
        };
        let task = tokio::spawn(controller.run(commands_rx, events_rx, inputs_rx));

        (
            LifecycleHandle {
                commands: commands_tx,
                state: state_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<StampedEvent>,
        mut inputs: mpsc::UnboundedReceiver<Input>,
    ) {
        info!("lifecycle controller started");
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Admin(op, reply)) => {
                        match self.machine.handle(Input::Admin(op)) {
                            Ok(effects) => {
                                self.publish();
                                let _ = reply.send(Ok(()));
                                self.execute(effects).await;
                            },
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            },
                        }
                    },
                    Some(Command::Shutdown(reply)) => {
                        self.apply(Input::Shutdown).await;
                        let _ = reply.send(());
                        break;
                    },
                    None => {
                        debug!("all lifecycle handles dropped, shutting down");
                        self.apply(Input::Shutdown).await;
                        break;
                    },
                },
                Some(event) = events.recv() => self.apply(Input::Transport(event)).await,
                Some(input) = inputs.recv() => self.apply(input).await,
            }
        }
        info!("lifecycle controller stopped");
    }

    async fn apply(&mut self, input: Input) {
        match self.machine.handle(input) {
            Ok(effects) => {
                self.publish();
                self.execute(effects).await;
            },
            // Only administrative inputs can fail, and those go through
            // the command path.
            Err(e) => debug!(error = %e, "lifecycle input refused"),
        }
    }

    /// Push the machine's state to readers if it changed.
    fn publish(&self) {
        let next = self.machine.state().clone();
        let prev = self.state_tx.send_replace(next.clone());
        if prev.phase != next.phase {
            metrics::counter!("wagate_lifecycle_transitions_total", "phase" => next.phase.as_str())
                .increment(1);
        }
        if next.reconnect_attempts > prev.reconnect_attempts {
            metrics::counter!("wagate_reconnect_attempts_total").increment(1);
        }
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Initialize { epoch } => self.initialize(epoch),
                Effect::Teardown => {
                    self.cancel_initialize().await;
                    if let Err(e) = self.transport.destroy().await {
                        warn!(error = %e, "transport teardown failed, continuing");
                    }
                },
                Effect::Logout => {
                    if let Err(e) = self.transport.logout().await {
                        warn!(error = %e, "transport logout failed, continuing");
                    }
                },
                Effect::PurgeSessionFiles => {
                    let outcomes = self.cleaner.purge().await;
                    for outcome in &outcomes {
                        match &outcome.error {
                            None => info!(path = %outcome.path.display(), "removed stale session file"),
                            Some(error) => warn!(
                                path = %outcome.path.display(),
                                error = %error,
                                "failed to remove stale session file"
                            ),
                        }
                    }
                    let removed = outcomes.iter().filter(|o| o.succeeded()).count();
                    info!(
                        removed,
                        failed = outcomes.len() - removed,
                        "session file purge finished"
                    );
                },
                Effect::PublishArtifact(payload) => {
                    self.artifacts.publish(payload).await;
                },
                Effect::ClearArtifact => self.artifacts.clear().await,
                Effect::FetchClientInfo { epoch } => self.fetch_client_info(epoch),
                Effect::Schedule { after, input } => {
                    let tx = self.inputs_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx.send(input);
                    });
                },
            }
        }
    }

    /// `initialize()` can take as long as the pairing itself, so it runs off
    /// the actor; a failure comes back as an input.
    fn initialize(&mut self, epoch: u64) {
        let transport = Arc::clone(&self.transport);
        let sink = EventSink::new(epoch, self.events_tx.clone());
        let inputs = self.inputs_tx.clone();
        self.init_task = Some(tokio::spawn(async move {
            debug!(epoch, "initializing transport");
            if let Err(e) = transport.initialize(sink).await {
                let _ = inputs.send(Input::InitializeFailed {
                    epoch,
                    error: e.to_string(),
                });
            }
        }));
    }

    /// A teardown must not race a pending `initialize()`: the instance it
    /// brings up would outlive the teardown.
    async fn cancel_initialize(&mut self) {
        if let Some(task) = self.init_task.take()
            && !task.is_finished()
        {
            debug!("cancelling pending transport initialize");
            task.abort();
            let _ = task.await;
        }
    }

    fn fetch_client_info(&self, epoch: u64) {
        let transport = Arc::clone(&self.transport);
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            match transport.info().await {
                Ok(info) => {
                    let _ = inputs.send(Input::ClientInfo { epoch, info });
                },
                Err(e) => warn!(error = %e, "failed to read client info"),
            }
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{cleanup::CleanupOutcome, policy::ReconnectPolicy},
        async_trait::async_trait,
        std::{
            sync::{
                Mutex,
                atomic::{AtomicBool, AtomicUsize, Ordering},
            },
            time::Duration,
        },
        wagate_channels::{ClientInfo, TransportError, TransportEvent},
    };

    #[derive(Default)]
    struct MockTransport {
        inits: AtomicUsize,
        destroys: AtomicUsize,
        logouts: AtomicUsize,
        fail_init: AtomicBool,
        sinks: Mutex<Vec<EventSink>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl MockTransport {
        fn sink(&self, n: usize) -> EventSink {
            self.sinks.lock().unwrap()[n].clone()
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn initialize(&self, events: EventSink) -> Result<(), TransportError> {
            self.record("initialize");
            self.sinks.lock().unwrap().push(events);
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(TransportError::Remote("browser failed to launch".into()));
            }
            Ok(())
        }

        async fn send_message(&self, _chat_id: &str, _text: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn destroy(&self) -> Result<(), TransportError> {
            self.record("destroy");
            self.destroys.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::NotRunning)
        }

        async fn logout(&self) -> Result<(), TransportError> {
            self.record("logout");
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn info(&self) -> Result<ClientInfo, TransportError> {
            Ok(ClientInfo {
                id: "628111@c.us".into(),
                display_name: "Gateway".into(),
                platform: "android".into(),
            })
        }
    }

    #[derive(Default)]
    struct CountingCleaner {
        purges: AtomicUsize,
    }

    #[async_trait]
    impl SessionCleaner for CountingCleaner {
        async fn purge(&self) -> Vec<CleanupOutcome> {
            self.purges.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }
    }

    struct Harness {
        handle: LifecycleHandle,
        transport: Arc<MockTransport>,
        cleaner: Arc<CountingCleaner>,
        artifacts: Arc<PairingArtifacts>,
    }

    fn settings(ceiling: u32, reinit_ms: u64) -> LifecycleSettings {
        LifecycleSettings {
            ready_settle: Duration::from_millis(20),
            reinit_delay: Duration::from_millis(reinit_ms),
            policy: ReconnectPolicy::new(Duration::from_millis(10), ceiling),
            refuse_reconnect_when_ready: false,
        }
    }

    fn start(settings: LifecycleSettings) -> Harness {
        let transport = Arc::new(MockTransport::default());
        let cleaner = Arc::new(CountingCleaner::default());
        let artifacts = Arc::new(PairingArtifacts::new(None, false));
        let (handle, _task) = LifecycleController::spawn(
            settings,
            transport.clone(),
            artifacts.clone(),
            cleaner.clone(),
        );
        Harness {
            handle,
            transport,
            cleaner,
            artifacts,
        }
    }

    async fn eventually(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    async fn wait_phase(handle: &LifecycleHandle, phase: Phase) {
        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.phase == phase))
            .await
            .unwrap()
            .unwrap();
    }

    async fn ready(h: &Harness) {
        eventually("first initialize", || h.transport.inits.load(Ordering::SeqCst) == 1).await;
        h.transport.sink(0).emit(TransportEvent::Ready);
        wait_phase(&h.handle, Phase::Ready).await;
    }

    #[tokio::test]
    async fn pairing_artifact_lives_until_ready() {
        let h = start(settings(3, 10));
        eventually("initialize", || h.transport.inits.load(Ordering::SeqCst) == 1).await;
        assert_eq!(h.handle.state().phase, Phase::AwaitingPairing);

        h.transport.sink(0).emit(TransportEvent::Qr("2@abc".into()));
        for _ in 0..200 {
            if h.artifacts.current().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.artifacts.current().await.unwrap().payload, "2@abc");

        h.transport.sink(0).emit(TransportEvent::Authenticated);
        wait_phase(&h.handle, Phase::Ready).await;
        assert!(h.artifacts.current().await.is_none());

        let mut rx = h.handle.subscribe();
        let state = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| s.client_info.is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(state.client_info.unwrap().display_name, "Gateway");
    }

    #[tokio::test]
    async fn disconnect_reinitializes_and_ignores_old_instance() {
        let h = start(settings(3, 10));
        ready(&h).await;

        h.transport
            .sink(0)
            .emit(TransportEvent::Disconnected("NAVIGATION".into()));
        eventually("re-initialize", || h.transport.inits.load(Ordering::SeqCst) == 2).await;
        assert_eq!(h.handle.state().reconnect_attempts, 1);
        assert_eq!(h.transport.destroys.load(Ordering::SeqCst), 1);

        // The first instance is dead; its events must not move the session.
        h.transport.sink(0).emit(TransportEvent::Ready);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.handle.state().phase, Phase::AwaitingPairing);

        h.transport.sink(1).emit(TransportEvent::Ready);
        wait_phase(&h.handle, Phase::Ready).await;
        assert_eq!(h.handle.state().reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn failing_initialize_exhausts_retries() {
        let h = start(settings(2, 10));
        h.transport.fail_init.store(true, Ordering::SeqCst);

        wait_phase(&h.handle, Phase::ReconnectExhausted).await;
        assert_eq!(h.transport.inits.load(Ordering::SeqCst), 3);
        assert_eq!(h.handle.state().reconnect_attempts, 2);

        h.transport.fail_init.store(false, Ordering::SeqCst);
        h.handle.reconnect().await.unwrap();
        eventually("admin re-initialize", || h.transport.inits.load(Ordering::SeqCst) == 4).await;
        assert_eq!(h.handle.state().reconnect_attempts, 0);
        assert_eq!(h.cleaner.purges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_admin_command_is_rejected_while_in_flight() {
        let h = start(settings(3, 200));
        ready(&h).await;

        h.handle.reconnect().await.unwrap();
        assert_eq!(h.handle.logout().await, Err(LifecycleError::Busy("reconnect")));
        assert_eq!(h.transport.logouts.load(Ordering::SeqCst), 0);
        assert_eq!(h.cleaner.purges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logout_unlinks_then_tears_down() {
        let h = start(settings(3, 10));
        ready(&h).await;

        h.handle.logout().await.unwrap();
        eventually("re-initialize", || h.transport.inits.load(Ordering::SeqCst) == 2).await;
        assert_eq!(*h.transport.calls.lock().unwrap(), vec![
            "initialize",
            "logout",
            "destroy",
            "initialize"
        ]);
    }

    /// Brings an instance up only after a delay; `destroy` takes it down.
    #[derive(Default)]
    struct SlowStartTransport {
        started: AtomicUsize,
        live: AtomicBool,
    }

    #[async_trait]
    impl Transport for SlowStartTransport {
        async fn initialize(&self, _events: EventSink) -> Result<(), TransportError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.live.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send_message(&self, _chat_id: &str, _text: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn destroy(&self) -> Result<(), TransportError> {
            self.live.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn logout(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn info(&self) -> Result<ClientInfo, TransportError> {
            Err(TransportError::NotRunning)
        }
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_initialize() {
        let transport = Arc::new(SlowStartTransport::default());
        let (handle, task) = LifecycleController::spawn(
            settings(3, 10),
            transport.clone(),
            Arc::new(PairingArtifacts::new(None, false)),
            Arc::new(CountingCleaner::default()),
        );
        eventually("initialize started", || {
            transport.started.load(Ordering::SeqCst) == 1
        })
        .await;

        handle.shutdown().await;
        task.await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!transport.live.load(Ordering::SeqCst));
        assert_eq!(handle.state().phase, Phase::Terminated);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_final() {
        let h = start(settings(3, 10));
        ready(&h).await;

        tokio::join!(h.handle.shutdown(), h.handle.shutdown());
        h.handle.shutdown().await;

        assert_eq!(h.handle.state().phase, Phase::Terminated);
        assert_eq!(h.transport.destroys.load(Ordering::SeqCst), 1);
        assert_eq!(h.handle.reconnect().await, Err(LifecycleError::Terminated));
    }
}
