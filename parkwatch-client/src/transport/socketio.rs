//! Client Socket.IO sur un WebSocket brut (trames Engine.IO v4).
//!
//! Seulement ce que parle le serveur d'occupation : événements texte, pings
//! serveur, et un namespace optionnel tiré du chemin de l'URL. Les pièces
//! jointes binaires et les acks sont ignorés.

use crate::contracts::Frame;
use crate::error::TransportError;
use crate::transport::{CloseReason, Session, SessionEvent};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

/// Corps du handshake Engine.IO (`0{...}`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    #[serde(default)]
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

impl OpenInfo {
    /// Silence maximal du serveur avant de considérer le lien mort.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

/// Une trame texte, couches Engine.IO et Socket.IO aplaties.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    /// Fermeture côté engine (`1`).
    Close,
    Ping,
    Pong,
    /// Ack de connexion au namespace (`40`).
    Connect,
    /// Déconnexion du namespace (`41`) : le serveur a clos la session volontairement.
    Disconnect,
    Event(Frame),
    ConnectError(String),
    Noop,
}

pub fn decode_packet(text: &str) -> Result<Packet, TransportError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| TransportError::Protocol("empty packet".into()))?;
    let rest = chars.as_str();

    match kind {
        '0' => serde_json::from_str(rest)
            .map(Packet::Open)
            .map_err(|e| TransportError::Protocol(format!("bad open packet: {e}"))),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_packet(rest),
        '5' | '6' => Ok(Packet::Noop),
        other => Err(TransportError::Protocol(format!("unknown engine packet type '{other}'"))),
    }
}

fn decode_socket_packet(body: &str) -> Result<Packet, TransportError> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| TransportError::Protocol("empty socket packet".into()))?;
    let payload = strip_ack_id(strip_namespace(chars.as_str()));

    match kind {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(payload).map(Packet::Event),
        '4' => {
            let message = serde_json::from_str::<Value>(payload)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| payload.to_string());
            Ok(Packet::ConnectError(message))
        }
        '3' | '5' | '6' => Ok(Packet::Noop),
        other => Err(TransportError::Protocol(format!("unknown socket packet type '{other}'"))),
    }
}

/// `/admin,rest` → `rest` ; le namespace par défaut n'a pas de préfixe.
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn decode_event(payload: &str) -> Result<Frame, TransportError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| TransportError::Protocol(format!("bad event payload: {e}")))?;
    let mut items = match value {
        Value::Array(items) => items.into_iter(),
        _ => return Err(TransportError::Protocol("event payload is not an array".into())),
    };
    let event = match items.next() {
        Some(Value::String(name)) => name,
        _ => return Err(TransportError::Protocol("event without a name".into())),
    };
    Ok(Frame::new(event, items.next().unwrap_or(Value::Null)))
}

/// `40` ou `40/parking,` selon le namespace.
fn socket_packet(code: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{code}{ns},"),
        None => code.to_string(),
    }
}

/// `42["event"]`, `42["event",data]`, préfixé du namespace s'il y en a un.
pub fn encode_event(frame: &Frame, namespace: Option<&str>) -> String {
    let mut items = vec![Value::String(frame.event.clone())];
    if !frame.data.is_null() {
        items.push(frame.data.clone());
    }
    format!("{}{}", socket_packet("42", namespace), Value::Array(items))
}

/// `http://host:5000/parking` → `ws://host:5000/socket.io/?EIO=4&transport=websocket`.
/// Le chemin Engine.IO est toujours `/socket.io/` ; le chemin de la base
/// désigne le namespace (voir [`namespace`]).
pub fn socket_url(base: &Url) -> Url {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    if url.set_scheme(scheme).is_err() {
        debug!("keeping scheme of {base}");
    }
    url.set_path("/socket.io/");
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    url
}

/// `http://host/parking/` → `Some("/parking")`, racine → `None`.
pub fn namespace(base: &Url) -> Option<String> {
    let path = base.path().trim_end_matches('/');
    if path.is_empty() || path == "/socket.io" {
        None
    } else {
        Some(path.to_string())
    }
}

enum Incoming {
    Packet(Packet),
    Closed(String),
}

async fn read_packet(ws: &mut WsStream) -> Incoming {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match decode_packet(text.as_str()) {
                Ok(packet) => return Incoming::Packet(packet),
                Err(e) => warn!("skipping packet: {e}"),
            },
            Some(Ok(Message::Close(_))) | None => return Incoming::Closed("transport close".into()),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Incoming::Closed(format!("transport error: {e}")),
        }
    }
}

pub struct SocketIoSession {
    ws: WsStream,
    namespace: Option<String>,
    liveness: Duration,
    deadline: Instant,
    pong_due: bool,
    /// Événements arrivés avant l'ack du namespace.
    pending: VecDeque<Frame>,
}

impl SocketIoSession {
    /// Ouvre la socket et enchaîne les deux handshakes (open engine, connexion au namespace).
    pub async fn connect(base: &Url) -> Result<Self, TransportError> {
        let target = socket_url(base);
        let namespace = namespace(base);
        debug!("opening {target}");
        let (mut ws, _) = connect_async(target.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let open = loop {
            match read_packet(&mut ws).await {
                Incoming::Packet(Packet::Open(info)) => break info,
                Incoming::Packet(Packet::Ping) => send_text(&mut ws, "3").await?,
                Incoming::Packet(Packet::Noop) => {}
                Incoming::Packet(other) => {
                    return Err(TransportError::Protocol(format!("expected open packet, got {other:?}")))
                }
                Incoming::Closed(reason) => return Err(TransportError::Connect(reason)),
            }
        };
        debug!(sid = %open.sid, ping_interval = open.ping_interval, "engine open");

        send_text(&mut ws, &socket_packet("40", namespace.as_deref())).await?;
        let mut pending = VecDeque::new();
        loop {
            match read_packet(&mut ws).await {
                Incoming::Packet(Packet::Connect) => break,
                Incoming::Packet(Packet::ConnectError(message)) => return Err(TransportError::Handshake(message)),
                Incoming::Packet(Packet::Disconnect) => {
                    return Err(TransportError::Handshake("namespace refused".into()))
                }
                Incoming::Packet(Packet::Ping) => send_text(&mut ws, "3").await?,
                Incoming::Packet(Packet::Event(frame)) => pending.push_back(frame),
                Incoming::Packet(_) => {}
                Incoming::Closed(reason) => return Err(TransportError::Connect(reason)),
            }
        }

        let liveness = open.liveness_window();
        Ok(Self {
            ws,
            namespace,
            liveness,
            deadline: Instant::now() + liveness,
            pong_due: false,
            pending,
        })
    }
}

async fn send_text(ws: &mut WsStream, text: &str) -> Result<(), TransportError> {
    ws.send(Message::text(text.to_string()))
        .await
        .map_err(|e| TransportError::Io(e.to_string()))
}

#[async_trait]
impl Session for SocketIoSession {
    async fn next_event(&mut self) -> SessionEvent {
        if let Some(frame) = self.pending.pop_front() {
            return SessionEvent::Frame(frame);
        }
        loop {
            if self.pong_due {
                if let Err(e) = send_text(&mut self.ws, "3").await {
                    return SessionEvent::Closed(CloseReason::Network(e.to_string()));
                }
                self.pong_due = false;
            }

            let incoming = match timeout_at(self.deadline, read_packet(&mut self.ws)).await {
                Ok(incoming) => incoming,
                Err(_) => return SessionEvent::Closed(CloseReason::Network("ping timeout".into())),
            };
            let packet = match incoming {
                Incoming::Packet(packet) => packet,
                Incoming::Closed(reason) => return SessionEvent::Closed(CloseReason::Network(reason)),
            };
            self.deadline = Instant::now() + self.liveness;

            match packet {
                Packet::Event(frame) => return SessionEvent::Frame(frame),
                Packet::Ping => self.pong_due = true,
                Packet::Disconnect => return SessionEvent::Closed(CloseReason::ServerShutdown),
                Packet::Close => return SessionEvent::Closed(CloseReason::Network("engine closed".into())),
                Packet::ConnectError(message) => return SessionEvent::Closed(CloseReason::Network(message)),
                Packet::Open(_) | Packet::Connect | Packet::Pong | Packet::Noop => {}
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        send_text(&mut self.ws, &encode_event(&frame, self.namespace.as_deref())).await
    }

    async fn close(&mut self) {
        let _ = send_text(&mut self.ws, &socket_packet("41", self.namespace.as_deref())).await;
        let _ = self.ws.close(None).await;
    }
}
