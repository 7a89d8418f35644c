use std::sync::Arc;

#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;
use {
    axum::{
        Router, middleware,
        routing::{get, post},
    },
    tokio::{net::TcpListener, signal},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
    wagate_channels::Transport,
    wagate_config::WagateConfig,
    wagate_telegram::TelegramQrNotifier,
    wagate_whatsapp::{
        BridgeTransport, Dispatcher, FsSessionCleaner, LifecycleController, LifecycleSettings,
        PairingArtifacts,
    },
};

use crate::{auth, routes, state::GatewayState};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route("/admin/reconnect", post(routes::admin_reconnect))
        .route("/admin/logout", post(routes::admin_logout))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_admin,
        ));

    let router = Router::new()
        .route("/", get(routes::root))
        .route("/send-message", post(routes::send_message))
        .route("/status", get(routes::status))
        .route("/health", get(routes::health))
        .route("/qr", get(routes::qr))
        .merge(admin);

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(routes::metrics));

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the gateway until Ctrl+C / SIGTERM.
///
/// HTTP stops accepting and drains first; only then is the WhatsApp session
/// torn down, and the function returns once the teardown has finished.
pub async fn start_gateway(config: WagateConfig) -> anyhow::Result<()> {
    #[cfg(feature = "prometheus")]
    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "failed to install Prometheus recorder, /metrics disabled");
            None
        },
    };

    let transport: Arc<dyn Transport> = Arc::new(BridgeTransport::new(&config.bridge));

    let mut artifacts = PairingArtifacts::from_config(&config.pairing);
    let notifier = match TelegramQrNotifier::from_config(&config.telegram) {
        Some(telegram) => {
            artifacts = artifacts.with_notifier(Arc::new(telegram));
            "telegram"
        },
        None => "none",
    };
    let artifacts = Arc::new(artifacts);
    let cleaner = Arc::new(FsSessionCleaner::from_config(&config.cleanup));

    let (lifecycle, controller) = LifecycleController::spawn(
        LifecycleSettings::from_config(&config.lifecycle),
        Arc::clone(&transport),
        Arc::clone(&artifacts),
        cleaner,
    );
    let dispatcher = Dispatcher::new(transport, lifecycle.subscribe(), &config.dispatch);

    if config.server.admin_token.is_none() {
        warn!("no admin token configured, /admin routes are open to anyone who can reach them");
    }

    let state = GatewayState::new(
        lifecycle.clone(),
        dispatcher,
        artifacts,
        config.server.admin_token.clone(),
    );
    #[cfg(feature = "prometheus")]
    let state = match prometheus {
        Some(handle) => state.with_metrics(handle),
        None => state,
    };
    let state = Arc::new(state);
    let app = build_gateway_app(Arc::clone(&state));

    let listener = TcpListener::bind((config.server.bind.as_str(), config.server.port)).await?;
    let addr = listener.local_addr()?;

    // Startup banner.
    let lines = [
        format!("wagate gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("bridge: {} {}", config.bridge.command, config.bridge.args.join(" ")),
        format!(
            "sender check: {}",
            config.dispatch.expected_sender.as_deref().unwrap_or("disabled")
        ),
        format!("qr notifier: {notifier}"),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server drained, shutting down WhatsApp session");
    lifecycle.shutdown().await;
    if let Err(e) = controller.await {
        warn!(error = %e, "lifecycle controller task failed");
    }
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
