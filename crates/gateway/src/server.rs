use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, Path, State, WebSocketUpgrade},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    parley_config::ParleyConfig,
    parley_otp::OtpEngine,
    parley_protocol::{CLIENT_ID_HEADER, PROTOCOL_VERSION},
    tokio::net::TcpListener,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{
    clock::SystemClock,
    hub::Hub,
    session::{Relay, SessionLimits},
    transport,
};

// ── Server startup ───────────────────────────────────────────────────────────

/// Spawn the hub and wire it to the configured secret store.
pub fn build_relay(config: &ParleyConfig) -> Relay {
    let otp = OtpEngine::new(&config.otp);
    let hub = Hub::new(otp.clone(), Arc::new(SystemClock), config.hub.clone()).spawn();
    let store = parley_vault::from_config(&config.secrets);
    Relay::new(
        hub,
        store,
        Arc::new(otp),
        SessionLimits::from(&config.session),
    )
}

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(relay: Relay) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(missing_alias_handler))
        .route("/ws/{alias}", get(ws_upgrade_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

/// Serve the gateway on an already-bound listener until the server fails.
pub async fn serve(listener: TcpListener, relay: Relay) -> anyhow::Result<()> {
    let app = build_gateway_app(relay);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Start the gateway HTTP + WebSocket server.
pub async fn start_gateway(config: ParleyConfig) -> anyhow::Result<()> {
    let port = config.server.resolved_port();
    let addr: SocketAddr = format!("{}:{port}", config.server.bind).parse()?;
    let listener = TcpListener::bind(addr).await?;

    let relay = build_relay(&config);

    // Startup banner.
    let lines = [
        format!("parley gateway v{}", env!("CARGO_PKG_VERSION")),
        format!("protocol v{PROTOCOL_VERSION}, listening on {addr}"),
        format!("secrets: {:?}", config.secrets.backend),
        format!(
            "frames <= {} bytes, pong wait {}s",
            config.session.max_message_size, config.session.pong_wait_secs
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    serve(listener, relay).await
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(relay): State<Relay>) -> impl IntoResponse {
    let count = relay.hub.client_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION,
        "connections": count,
    }))
}

async fn missing_alias_handler() -> Response {
    bad_request("missing alias")
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Path(alias): Path<String>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(relay): State<Relay>,
) -> Response {
    let Some(client_id) = client_id_header(&headers) else {
        return bad_request("missing X-Client-Id header");
    };
    let alias = alias.trim().to_string();
    if alias.is_empty() {
        return bad_request("missing alias");
    }

    let limit = relay.limits.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            let (writer, reader) = transport::split(socket);
            match relay.attach(&client_id, &alias, writer, reader).await {
                Ok(attached) => info!(
                    conn_id = %attached.conn_id,
                    client_id,
                    alias,
                    remote = %addr,
                    "session attached"
                ),
                Err(e) => warn!(client_id, remote = %addr, error = %e, "attach failed"),
            }
        })
        .into_response()
}

fn client_id_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn bad_request(reason: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": reason })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use {super::*, axum::http::HeaderValue};

    #[test]
    fn client_id_header_is_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("  alice "));
        assert_eq!(client_id_header(&headers).as_deref(), Some("alice"));
    }

    #[test]
    fn blank_client_id_header_is_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_id_header(&headers), None);
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("   "));
        assert_eq!(client_id_header(&headers), None);
    }

    #[tokio::test]
    async fn relay_uses_session_config() {
        let mut config = ParleyConfig::default();
        config.session.max_message_size = 1024;
        config.secrets.backend = parley_config::SecretsBackend::Memory;
        let relay = build_relay(&config);
        assert_eq!(relay.limits.max_message_size, 1024);
        assert_eq!(relay.hub.client_count().await, 0);
    }
}
