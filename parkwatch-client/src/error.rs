//! Taxonomie des erreurs du cœur client.
//!
//! Seule [`ConfigurationError`] franchit la frontière du cœur (depuis
//! `ConnectionManager::start`). Les échecs de transport deviennent des
//! événements de cycle de vie ; les payloads malformés sont absorbés par le store.

/// Endpoint invalide passé à `start` ; fatal au démarrage de session, pas au processus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("endpoint is empty")]
    EmptyEndpoint,
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),
}

/// Échecs de connexion, de handshake ou de socket en cours de route. Toujours récupérables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("handshake rejected: {0}")]
    Handshake(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("socket error: {0}")]
    Io(String),
    #[error("session closed")]
    Closed,
}

/// Payloads entrants malformés. Journalisés, jamais remontés.
#[derive(Debug, thiserror::Error)]
pub enum MessageFormatError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("'{field}' is not an object")]
    NotAnObject { field: &'static str },
    #[error("location '{0}' is outside the facility")]
    UnknownLocation(String),
    #[error("record for {location} is not an object")]
    InvalidRecord { location: String },
}
