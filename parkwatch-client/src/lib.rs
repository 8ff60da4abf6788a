//! Miroir temps réel de l'occupation d'un parking.
//!
//! Garde une copie locale des 60 places synchronisée avec un serveur push
//! (Socket.IO ou MQTT) et la projette en vues prêtes à afficher :
//! transport → [`ConnectionManager`] → file d'événements unique → [`StateStore`] →
//! projections [`view`].

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod contracts;
pub mod error;
pub mod health;
pub mod models;
pub mod state;
pub mod transport;
pub mod view;

pub use client::{ClientHandle, Notice, ParkingClient};
pub use config::{load_config, Mode, TransportConfig};
pub use connection::{ClientEvent, ConnectionEvent, ConnectionManager, ConnectionState, EventStream, ReconnectPolicy};
pub use contracts::{ExitNotice, Frame, Inbound};
pub use error::{ConfigurationError, MessageFormatError, TransportError};
pub use models::{LocationCode, ParkingState, SlotRecord, SlotStatus, Statistics};
pub use state::{StateReader, StateStore};
pub use transport::{CloseReason, Connector, Endpoint, Session, SessionEvent, TransportConnector};
