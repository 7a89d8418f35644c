//! Stdio bridge transport: a child process drives the actual WhatsApp Web
//! client and talks to us in newline-delimited JSON.
//!
//! Requests carry an `id` and are answered by a line with the same `id`.
//! Lines without an `id` are events and are forwarded to the [`EventSink`]
//! handed to the latest `initialize()`.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, ChildStdout, Command},
        sync::{Mutex, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, trace, warn},
    wagate_channels::{ClientInfo, EventSink, Transport, TransportError, TransportEvent},
    wagate_config::BridgeConfig,
};

/// Environment variable carrying extra browser flags to the bridge.
pub const BROWSER_ARGS_ENV: &str = "WAGATE_BROWSER_ARGS";

/// Error code the bridge uses for "page/session not settled yet".
const NOT_SETTLED_CODE: &str = "not_settled";

/// Upper bound for the courtesy `destroy` request during teardown.
const DESTROY_TIMEOUT: Duration = Duration::from_secs(5);

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<BridgeErrorBody>,
}

#[derive(Debug, Deserialize)]
struct BridgeErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    Qr {
        data: String,
    },
    Authenticated,
    Ready,
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
}

impl From<BridgeEvent> for TransportEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Qr { data } => Self::Qr(data),
            BridgeEvent::Authenticated => Self::Authenticated,
            BridgeEvent::Ready => Self::Ready,
            BridgeEvent::Disconnected { reason } => Self::Disconnected(reason),
            BridgeEvent::AuthFailure { message } => {
                Self::Disconnected(format!("auth failure: {message}"))
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Response(BridgeResponse),
    Event(BridgeEvent),
}

fn parse_line(line: &str) -> Option<Incoming> {
    match serde_json::from_str(line) {
        Ok(incoming) => Some(incoming),
        Err(e) => {
            debug!(error = %e, raw = %line, "ignoring unrecognised bridge line");
            None
        },
    }
}

fn into_result(resp: BridgeResponse) -> Result<Value, TransportError> {
    match resp.error {
        Some(err) if err.code.as_deref() == Some(NOT_SETTLED_CODE) => {
            Err(TransportError::NotSettled(err.message))
        },
        Some(err) => Err(TransportError::Remote(err.message)),
        None => Ok(resp.result),
    }
}

// ── Process plumbing ─────────────────────────────────────────────────────────

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeResponse>>>>;

/// Write side of a running bridge plus its in-flight requests.
#[derive(Clone)]
struct Channel {
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Pending,
}

impl Channel {
    async fn call(
        &self,
        id: u64,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let mut payload = serde_json::to_string(&BridgeRequest { id, method, params })
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        payload.push('\n');
        trace!(method, id, "gateway -> bridge");

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(payload.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => into_result(resp),
            Ok(Err(_)) => Err(TransportError::Closed("bridge exited before replying".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout(timeout.as_secs()))
            },
        }
    }
}

struct BridgeProcess {
    child: Child,
    channel: Channel,
    reader: JoinHandle<()>,
}

/// [`Transport`] backed by a bridge child process.
pub struct BridgeTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    request_timeout: Duration,
    process: Mutex<Option<BridgeProcess>>,
    next_id: AtomicU64,
}

impl BridgeTransport {
    pub fn new(cfg: &BridgeConfig) -> Self {
        let mut env = cfg.env.clone();
        if !cfg.browser_args.is_empty() {
            env.insert(BROWSER_ARGS_ENV.into(), cfg.browser_args.join(" "));
        }
        Self {
            command: cfg.command.clone(),
            args: cfg.args.clone(),
            env,
            request_timeout: cfg.request_timeout(),
            process: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn spawn_process(&self, events: EventSink) -> Result<BridgeProcess, TransportError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Closed("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Closed("bridge stdout unavailable".into()))?;

        let epoch = events.epoch();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(stdout, Arc::clone(&pending), events));
        info!(command = %self.command, pid = ?child.id(), epoch, "bridge process started");

        Ok(BridgeProcess {
            child,
            channel: Channel {
                stdin: Arc::new(Mutex::new(stdin)),
                pending,
            },
            reader,
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let channel = match self.process.lock().await.as_ref() {
            Some(process) => process.channel.clone(),
            None => return Err(TransportError::NotRunning),
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        channel.call(id, method, params, self.request_timeout).await
    }

    /// Stop the bridge, if any. The reader is aborted first so the exit is
    /// not reported as a disconnect.
    async fn stop(&self) {
        let Some(mut process) = self.process.lock().await.take() else {
            return;
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = process
            .channel
            .call(id, "destroy", Value::Null, DESTROY_TIMEOUT)
            .await
        {
            debug!(error = %e, "bridge destroy request failed");
        }
        process.reader.abort();
        if let Err(e) = process.child.kill().await {
            debug!(error = %e, "bridge process already gone");
        }
        info!("bridge process stopped");
    }
}

async fn read_loop(stdout: ChildStdout, pending: Pending, events: EventSink) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("bridge stdout closed");
                break;
            },
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                trace!(raw = %trimmed, "bridge -> gateway");
                match parse_line(trimmed) {
                    Some(Incoming::Response(resp)) => {
                        match pending.lock().await.remove(&resp.id) {
                            Some(tx) => {
                                let _ = tx.send(resp);
                            },
                            None => warn!(id = resp.id, "response for unknown bridge request"),
                        }
                    },
                    Some(Incoming::Event(event)) => {
                        events.emit(event.into());
                    },
                    None => {},
                }
            },
            Err(e) => {
                warn!(error = %e, "error reading from bridge stdout");
                break;
            },
        }
    }

    // Waiters see their sender dropped and report the bridge as closed.
    pending.lock().await.clear();
    events.emit(TransportEvent::Disconnected("bridge process exited".into()));
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn initialize(&self, events: EventSink) -> Result<(), TransportError> {
        self.stop().await;
        let process = self.spawn_process(events)?;
        *self.process.lock().await = Some(process);
        self.request("initialize", Value::Null).await.map(|_| ())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        self.request("sendMessage", json!({ "chatId": chat_id, "text": text }))
            .await
            .map(|_| ())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.stop().await;
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.request("logout", Value::Null).await.map(|_| ())
    }

    async fn info(&self) -> Result<ClientInfo, TransportError> {
        let value = self.request("info", Value::Null).await?;
        serde_json::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tokio::sync::mpsc};

    #[test]
    fn parses_events_and_responses() {
        assert!(matches!(
            parse_line(r#"{"event":"qr","data":"2@abc"}"#),
            Some(Incoming::Event(BridgeEvent::Qr { data })) if data == "2@abc"
        ));
        assert!(matches!(
            parse_line(r#"{"event":"disconnected","reason":"NAVIGATION"}"#),
            Some(Incoming::Event(BridgeEvent::Disconnected { reason })) if reason == "NAVIGATION"
        ));
        assert!(matches!(
            parse_line(r#"{"id":4,"result":{"ok":true}}"#),
            Some(Incoming::Response(BridgeResponse { id: 4, .. }))
        ));
        assert!(parse_line("[bridge] booting chromium").is_none());
    }

    #[test]
    fn auth_failure_becomes_disconnect() {
        let event: TransportEvent = BridgeEvent::AuthFailure {
            message: "session expired".into(),
        }
        .into();
        assert_eq!(
            event,
            TransportEvent::Disconnected("auth failure: session expired".into())
        );
    }

    #[test]
    fn not_settled_code_is_transient() {
        let resp: BridgeResponse = serde_json::from_str(
            r#"{"id":1,"error":{"code":"not_settled","message":"Evaluation failed"}}"#,
        )
        .unwrap();
        assert!(matches!(into_result(resp), Err(TransportError::NotSettled(_))));

        let resp: BridgeResponse =
            serde_json::from_str(r#"{"id":2,"error":{"message":"invalid wid"}}"#).unwrap();
        assert!(matches!(into_result(resp), Err(TransportError::Remote(m)) if m == "invalid wid"));
    }

    #[test]
    fn browser_args_are_exported() {
        let cfg = BridgeConfig {
            browser_args: vec!["--no-sandbox".into(), "--disable-setuid-sandbox".into()],
            ..Default::default()
        };
        let transport = BridgeTransport::new(&cfg);
        assert_eq!(
            transport.env.get(BROWSER_ARGS_ENV).map(String::as_str),
            Some("--no-sandbox --disable-setuid-sandbox")
        );
    }

    #[tokio::test]
    async fn requests_fail_when_not_running() {
        let transport = BridgeTransport::new(&BridgeConfig::default());
        assert!(matches!(
            transport.send_message("6281@c.us", "hi").await,
            Err(TransportError::NotRunning)
        ));
        // Destroying nothing is fine.
        transport.destroy().await.unwrap();
    }

    /// Minimal bridge: answers every request, pairs on initialize and refuses
    /// to send because the page is not settled.
    #[cfg(unix)]
    const FAKE_BRIDGE: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*) echo '{"event":"qr","data":"2@abc"}'; echo "{\"id\":$id,\"result\":null}" ;;
    *'"sendMessage"'*) echo "{\"id\":$id,\"error\":{\"code\":\"not_settled\",\"message\":\"Evaluation failed\"}}" ;;
    *'"info"'*) echo "{\"id\":$id,\"result\":{\"id\":\"628111@c.us\",\"displayName\":\"Gateway\",\"platform\":\"android\"}}" ;;
    *) echo "{\"id\":$id,\"result\":null}" ;;
  esac
done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn talks_to_a_bridge_process() {
        let cfg = BridgeConfig {
            command: "sh".into(),
            args: vec!["-c".into(), FAKE_BRIDGE.into()],
            request_timeout_secs: 5,
            ..Default::default()
        };
        let transport = BridgeTransport::new(&cfg);
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.initialize(EventSink::new(3, tx)).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.epoch, 3);
        assert_eq!(first.event, TransportEvent::Qr("2@abc".into()));

        let info = transport.info().await.unwrap();
        assert_eq!(info.display_name, "Gateway");

        assert!(matches!(
            transport.send_message("6281234567890@c.us", "hi").await,
            Err(TransportError::NotSettled(_))
        ));

        transport.destroy().await.unwrap();
        assert!(matches!(
            transport.info().await,
            Err(TransportError::NotRunning)
        ));
        // A deliberate stop is not reported as a disconnect.
        assert!(rx.try_recv().is_err());
    }
}
