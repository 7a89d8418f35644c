//! End-to-end tests of the HTTP control plane against a scripted transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    reqwest::StatusCode,
    secrecy::Secret,
    serde_json::{Value, json},
    tokio::net::TcpListener,
    wagate_channels::{ClientInfo, EventSink, Transport, TransportError, TransportEvent},
    wagate_gateway::{GatewayState, build_gateway_app},
    wagate_whatsapp::{
        CleanupOutcome, Dispatcher, LifecycleController, LifecycleHandle, LifecycleSettings,
        PairingArtifacts, Phase, ReconnectPolicy, SessionCleaner,
    },
};

#[derive(Default)]
struct ScriptedTransport {
    sinks: Mutex<Vec<EventSink>>,
    sent: Mutex<Vec<String>>,
    sends: AtomicUsize,
}

impl ScriptedTransport {
    fn emit(&self, event: TransportEvent) {
        let sinks = self.sinks.lock().unwrap();
        sinks.last().unwrap().emit(event);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn initialize(&self, events: EventSink) -> Result<(), TransportError> {
        self.sinks.lock().unwrap().push(events);
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, _text: &str) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(chat_id.to_string());
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
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

struct NoopCleaner;

#[async_trait]
impl SessionCleaner for NoopCleaner {
    async fn purge(&self) -> Vec<CleanupOutcome> {
        Vec::new()
    }
}

struct TestGateway {
    base: String,
    client: reqwest::Client,
    transport: Arc<ScriptedTransport>,
    lifecycle: LifecycleHandle,
}

impl TestGateway {
    async fn start(admin_token: Option<&str>) -> Self {
        let transport = Arc::new(ScriptedTransport::default());
        let artifacts = Arc::new(PairingArtifacts::new(None, false));
        let settings = LifecycleSettings {
            ready_settle: Duration::from_millis(20),
            reinit_delay: Duration::from_millis(500),
            policy: ReconnectPolicy::new(Duration::from_millis(10), 3),
            refuse_reconnect_when_ready: false,
        };
        let (lifecycle, _task) = LifecycleController::spawn(
            settings,
            transport.clone(),
            artifacts.clone(),
            Arc::new(NoopCleaner),
        );
        let dispatch = wagate_config::DispatchConfig {
            expected_sender: Some("628111".into()),
            retry_delay_ms: 5,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(transport.clone(), lifecycle.subscribe(), &dispatch);
        let state = GatewayState::new(
            lifecycle.clone(),
            dispatcher,
            artifacts,
            admin_token.map(|t| Secret::new(t.to_string())),
        );
        let app = build_gateway_app(Arc::new(state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let gw = Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            transport,
            lifecycle,
        };
        gw.wait_until(|| !gw.transport.sinks.lock().unwrap().is_empty())
            .await;
        gw
    }

    async fn wait_until(&self, cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn make_ready(&self) {
        self.transport.emit(TransportEvent::Ready);
        self.wait_until(|| self.lifecycle.state().phase == Phase::Ready)
            .await;
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value, token: Option<&str>) -> reqwest::Response {
        let mut req = self.client.post(format!("{}{path}", self.base)).json(&body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        req.send().await.unwrap()
    }
}

#[tokio::test]
async fn root_serves_banner() {
    let gw = TestGateway::start(None).await;
    let resp = gw.get("/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "WhatsApp Gateway is running!");
}

#[tokio::test]
async fn health_and_status_follow_readiness() {
    let gw = TestGateway::start(None).await;

    let resp = gw.get("/health").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "unavailable");
    assert_eq!(body["phase"], "awaiting_pairing");
    assert!(body["uptimeSecs"].is_u64());

    let resp = gw.get("/status").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ready"], false);
    assert_eq!(body["reconnectAttempts"], 0);
    assert_eq!(body["maxAttempts"], 3);

    gw.make_ready().await;

    let resp = gw.get("/health").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap()["status"], "ok");

    gw.wait_until(|| gw.lifecycle.state().client_info.is_some())
        .await;
    let body: Value = gw.get("/status").await.json().await.unwrap();
    assert_eq!(body["ready"], true);
    assert_eq!(body["clientInfo"]["displayName"], "Gateway");
}

#[tokio::test]
async fn send_message_maps_outcomes_to_status_codes() {
    let gw = TestGateway::start(None).await;
    let valid = json!({ "phone": "6281234567890", "message": "hi", "sender": "628111" });

    let resp = gw.post("/send-message", valid.clone(), None).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    gw.make_ready().await;

    let resp = gw
        .post("/send-message", json!({ "phone": "6281234567890" }), None)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = gw
        .post(
            "/send-message",
            json!({ "phone": "6281234567890", "message": "hi", "sender": "628999" }),
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], false);

    let resp = gw
        .post(
            "/send-message",
            json!({ "phone": "6281234", "message": "hi", "sender": "628111" }),
            None,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(gw.transport.sends.load(Ordering::SeqCst), 0);

    let resp = gw.post("/send-message", valid, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap()["status"], true);
    assert_eq!(*gw.transport.sent.lock().unwrap(), vec![
        "6281234567890@c.us".to_string()
    ]);
}

#[tokio::test]
async fn qr_is_served_while_pairing() {
    let gw = TestGateway::start(None).await;
    assert_eq!(gw.get("/qr").await.status(), StatusCode::NOT_FOUND);

    gw.transport.emit(TransportEvent::Qr("2@pairing-payload".into()));
    let mut resp = gw.get("/qr").await;
    for _ in 0..100 {
        if resp.status() == StatusCode::OK {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        resp = gw.get("/qr").await;
    }
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert!(resp.bytes().await.unwrap().starts_with(b"\x89PNG"));

    gw.make_ready().await;
    assert_eq!(gw.get("/qr").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_require_token_and_reject_concurrent_transitions() {
    let gw = TestGateway::start(Some("s3cret")).await;
    gw.make_ready().await;

    let resp = gw.post("/admin/reconnect", json!({}), None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = gw.post("/admin/reconnect", json!({}), Some("wrong")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = gw.post("/admin/reconnect", json!({}), Some("s3cret")).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(gw.lifecycle.state().phase, Phase::AwaitingPairing);

    let resp = gw.post("/admin/logout", json!({}), Some("s3cret")).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(resp.json::<Value>().await.unwrap()["status"], false);
}

#[tokio::test]
async fn admin_routes_report_terminated_controller() {
    let gw = TestGateway::start(None).await;
    gw.lifecycle.shutdown().await;

    let resp = gw.post("/admin/logout", json!({}), None).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}
