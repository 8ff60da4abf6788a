//! Transports push.
//!
//! Le gestionnaire de connexion ne voit que [`Connector`] et [`Session`] ; un
//! transport traduit son protocole en [`Frame`]s et classe chaque fermeture en
//! [`CloseReason::Network`] (on relance nous-mêmes) ou
//! [`CloseReason::ServerShutdown`] (le serveur nous a congédiés).

pub mod mqtt;
pub mod socketio;

use crate::contracts::Frame;
use crate::error::{ConfigurationError, TransportError};
use async_trait::async_trait;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Socket perdue, ping expiré, broker injoignable…
    Network(String),
    /// Arrêt explicite côté serveur ; il ne reprendra pas tout seul.
    ServerShutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Network(reason) => write!(f, "network closure: {reason}"),
            CloseReason::ServerShutdown => f.write_str("server-initiated shutdown"),
        }
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    Frame(Frame),
    Closed(CloseReason),
}

/// Où se connecter, déjà validé.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Serveur Socket.IO `http(s)://` ou `ws(s)://` ; le chemin éventuel est le namespace.
    SocketIo(Url),
    /// `mqtt://host[:port][/prefix]`
    Mqtt { host: String, port: u16, topic_prefix: String },
}

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC_PREFIX: &str = "parking";

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, ConfigurationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigurationError::EmptyEndpoint);
        }
        let invalid = |reason: String| ConfigurationError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason,
        };
        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".into()))?
            .to_string();

        match url.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(Endpoint::SocketIo(url)),
            "mqtt" => {
                let prefix = url.path().trim_matches('/');
                Ok(Endpoint::Mqtt {
                    host,
                    port: url.port().unwrap_or(DEFAULT_MQTT_PORT),
                    topic_prefix: if prefix.is_empty() { DEFAULT_TOPIC_PREFIX.into() } else { prefix.into() },
                })
            }
            other => Err(ConfigurationError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::SocketIo(url) => write!(f, "{url}"),
            Endpoint::Mqtt { host, port, topic_prefix } => write!(f, "mqtt://{host}:{port}/{topic_prefix}"),
        }
    }
}

/// Ouvre des sessions. Un appel = une tentative, handshake compris.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>, TransportError>;
}

/// Une session vivante, handshake terminé.
#[async_trait]
pub trait Session: Send {
    /// Prochaine trame entrante, ou la fermeture qui a terminé la session.
    /// Doit supporter l'annulation : mise en course avec les envois et l'arrêt.
    async fn next_event(&mut self) -> SessionEvent;

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Fermeture propre, au mieux.
    async fn close(&mut self);
}

/// Choisit le transport d'après le schéma de l'endpoint.
#[derive(Debug, Default, Clone)]
pub struct TransportConnector;

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>, TransportError> {
        match endpoint {
            Endpoint::SocketIo(url) => {
                let session = socketio::SocketIoSession::connect(url).await?;
                Ok(Box::new(session))
            }
            Endpoint::Mqtt { host, port, topic_prefix } => {
                let session = mqtt::MqttSession::connect(host, *port, topic_prefix).await?;
                Ok(Box::new(session))
            }
        }
    }
}
