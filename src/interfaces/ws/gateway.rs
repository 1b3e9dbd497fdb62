//! OCPP 1.6 WebSocket gateway
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{station_id}`
//! (or `/{station_id}`). Every accepted socket gets one station actor: a task
//! that owns the station's [`ProtocolSession`] and multiplexes inbound frames,
//! relayed commands, command completions and shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::application::charging::context::SharedGatewayContext;
use crate::application::charging::handlers::{Completion, ProtocolSession, RelayDirective};
use crate::application::relay::{DuplicatePolicy, Registration, RelayError, TransactionEvent};
use crate::shared::shutdown::ShutdownSignal;

/// OCPP 1.6 WebSocket subprotocol
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Bound on reading the request line and completing the upgrade
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

/// Station-facing WebSocket endpoint
pub struct OcppGateway {
    ctx: SharedGatewayContext,
    shutdown: Option<ShutdownSignal>,
}

impl OcppGateway {
    pub fn new(ctx: SharedGatewayContext) -> Self {
        Self {
            ctx,
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    pub async fn run(&self, addr: &str) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(addr).await?;
        info!("🔌 OCPP 1.6 gateway listening on ws://{}", listener.local_addr()?);
        info!(
            "   Charge points should connect to: ws://{}/ocpp/{{station_id}}",
            addr
        );
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener. Returns once shutdown fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        let shutdown = self.shutdown.clone().unwrap_or_default();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr, shutdown.clone()),
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                _ = shutdown.notified().wait() => {
                    info!(
                        stations = self.ctx.registry.count(),
                        "🛑 WebSocket gateway stopped accepting connections"
                    );
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr, shutdown: ShutdownSignal) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, ctx, shutdown).await {
                warn!(peer = %addr, error = %e, "Connection ended with error");
            }
        });
    }
}

/// Station id from the request path: `/ocpp/{id}` or `/{id}`.
fn extract_station_id(path: &str) -> Option<String> {
    let path = path.split('?').next().unwrap_or(path).trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some(id.to_string());
        }
        return None;
    }

    let id = path.trim_end_matches('/');
    if !id.is_empty() && !id.contains('/') {
        return Some(id.to_string());
    }

    None
}

fn offers_ocpp16(req: &Request) -> bool {
    req.headers()
        .get_all("Sec-WebSocket-Protocol")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == OCPP_SUBPROTOCOL)
}

fn refusal(status: StatusCode, message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = status;
    response
}

/// Read the request target off the socket without consuming it, so the
/// station id is known before the handshake answers.
async fn peek_request_path(stream: &TcpStream) -> Option<String> {
    let deadline = tokio::time::Instant::now() + HANDSHAKE_TIMEOUT;
    let mut buf = [0u8; 2048];
    loop {
        let n = tokio::time::timeout_at(deadline, stream.peek(&mut buf))
            .await
            .ok()?
            .ok()?;
        if n == 0 {
            return None;
        }
        if let Some(end) = buf[..n].windows(2).position(|w| w == b"\r\n") {
            let line = std::str::from_utf8(&buf[..end]).ok()?;
            let mut parts = line.split_whitespace();
            parts.next()?;
            return parts.next().map(str::to_string);
        }
        if n == buf.len() {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: SharedGatewayContext,
    shutdown: ShutdownSignal,
) -> Result<(), GatewayError> {
    debug!(peer = %addr, "New TCP connection");

    let station_id = peek_request_path(&stream)
        .await
        .as_deref()
        .and_then(extract_station_id);

    // Nothing is claimed until the upgrade succeeds; under `reject` a
    // registered station is refused up front and `register` settles races.
    let refused = match station_id.as_deref() {
        _ if shutdown.is_triggered() => {
            debug!(peer = %addr, "Handshake during shutdown refused");
            Some((StatusCode::SERVICE_UNAVAILABLE, "gateway shutting down"))
        }
        None => {
            warn!(peer = %addr, "Handshake without a station id refused");
            Some((StatusCode::BAD_REQUEST, "missing station id"))
        }
        Some(id) if ctx.settings.duplicate_policy == DuplicatePolicy::Reject => {
            match ctx.relay.is_connected(id).await {
                Ok(false) => None,
                Ok(true) => {
                    warn!(station_id = id, peer = %addr, "Duplicate connection refused");
                    Some((StatusCode::CONFLICT, "station already connected"))
                }
                Err(e) => {
                    error!(peer = %addr, error = %e, "Relay lookup failed");
                    Some((StatusCode::SERVICE_UNAVAILABLE, "relay unavailable"))
                }
            }
        }
        Some(_) => None,
    };

    let handshake = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::accept_hdr_async(stream, |req: &Request, mut response: Response| {
            if let Some((status, message)) = refused {
                return Err(refusal(status, message));
            }
            if !offers_ocpp16(req) {
                warn!(peer = %addr, path = req.uri().path(), "Client does not offer ocpp1.6");
                return Err(refusal(StatusCode::BAD_REQUEST, "ocpp1.6 subprotocol required"));
            }
            response.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static(OCPP_SUBPROTOCOL),
            );
            Ok(response)
        }),
    )
    .await;

    let mut ws_stream = match handshake {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            warn!(peer = %addr, "Handshake timed out");
            return Ok(());
        }
    };
    let Some(station_id) = station_id else {
        return Ok(());
    };

    let registration = match ctx
        .relay
        .register(&station_id, ctx.settings.duplicate_policy)
        .await
    {
        Ok(registration) => registration,
        Err(e) => {
            warn!(station_id = station_id.as_str(), peer = %addr, error = %e, "Relay registration refused");
            let reason = match e {
                RelayError::AlreadyRegistered(_) => "station already connected",
                _ => "relay unavailable",
            };
            let _ = ws_stream
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: reason.into(),
                }))
                .await;
            return Ok(());
        }
    };

    run_station(ws_stream, addr, registration, ctx, shutdown).await
}

/// Station actor: the only task that touches this connection's protocol
/// state.
async fn run_station(
    ws_stream: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    registration: Registration,
    ctx: SharedGatewayContext,
    shutdown: ShutdownSignal,
) -> Result<(), GatewayError> {
    let station_id = registration.station_id.clone();

    let mut commands = match ctx.relay.subscribe_commands(&registration).await {
        Ok(subscription) => subscription,
        Err(e) => {
            // Superseded between register and subscribe.
            warn!(station_id = station_id.as_str(), error = %e, "Command subscription refused");
            ctx.relay.unregister(&registration).await?;
            return Ok(());
        }
    };

    let connection_id = ctx.registry.next_connection_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if let Some(old) = ctx.registry.register(connection_id, &station_id, tx) {
        info!(
            station_id = station_id.as_str(),
            replaced = old,
            connection_id,
            "Older connection evicted"
        );
    }
    metrics::counter!("gateway_connections_total").increment(1);
    info!(
        station_id = station_id.as_str(),
        connection_id,
        peer = %addr,
        "✅ Station connected"
    );

    if let Err(e) = ctx
        .relay
        .record(&station_id, TransactionEvent::Connected { connection_id })
        .await
    {
        warn!(station_id = station_id.as_str(), error = %e, "Failed to record connect");
    }

    let (completion_tx, mut completions) = mpsc::unbounded_channel::<Completion>();
    let mut session = ProtocolSession::new(&station_id, connection_id, ctx.clone(), completion_tx);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Drains until the registry entry (and with it the sender) is dropped.
    let writer_station = station_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            debug!(station_id = writer_station.as_str(), "-> {}", msg);
            if let Err(e) = ws_sender.send(Message::Text(msg)).await {
                warn!(station_id = writer_station.as_str(), error = %e, "Send failed");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let shutdown_wait = shutdown.notified().wait();
    tokio::pin!(shutdown_wait);

    let reason = loop {
        tokio::select! {
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    debug!(station_id = station_id.as_str(), "<- {}", text);
                    ctx.registry.touch(&station_id, connection_id);
                    if let Some(reply) = session.handle_text(&text).await {
                        if !ctx.registry.send_to(&station_id, connection_id, reply) {
                            break "connection replaced".to_string();
                        }
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!(
                        station_id = station_id.as_str(),
                        bytes = data.len(),
                        "Binary message ignored"
                    );
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    ctx.registry.touch(&station_id, connection_id);
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(f) => format!("closed by station ({})", f.code),
                        None => "closed by station".to_string(),
                    };
                }
                Some(Err(e)) => break format!("socket error: {}", e),
                None => break "socket closed".to_string(),
            },
            command = commands.recv() => match command {
                Some(envelope) => {
                    if session.handle_relay_command(envelope).await == RelayDirective::Close {
                        break "disconnect requested".to_string();
                    }
                }
                None => break "evicted by newer connection".to_string(),
            },
            Some(completion) = completions.recv() => session.handle_completion(completion),
            _ = &mut shutdown_wait => break "gateway shutdown".to_string(),
        }
    };

    session.close(&reason).await;
    drop(commands);
    if let Err(e) = ctx.relay.unregister(&registration).await {
        warn!(station_id = station_id.as_str(), error = %e, "Relay unregister failed");
    }
    ctx.registry.unregister(&station_id, connection_id);

    // With the registry entry gone the writer's channel closes.
    if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
        warn!(station_id = station_id.as_str(), "Writer did not finish in time");
    }

    info!(
        station_id = station_id.as_str(),
        connection_id,
        reason = reason.as_str(),
        "Station disconnected"
    );
    Ok(())
}
