//! Branche le gestionnaire de connexion sur le store d'état.
//!
//! [`ParkingClient`] possède l'unique boucle consommatrice : il tire les
//! événements dans l'ordre d'arrivée, applique les messages au store et
//! diffuse cycle de vie et avis de sortie aux abonnés. Le reste passe par un
//! [`ClientHandle`] peu coûteux à cloner.

use crate::config::{Mode, TransportConfig};
use crate::connection::{ClientEvent, ConnectionEvent, ConnectionManager, ConnectionState, EventStream};
use crate::contracts::{ExitNotice, Frame};
use crate::error::ConfigurationError;
use crate::health::{ConnectionHealth, HealthSnapshot};
use crate::models::ParkingState;
use crate::state::{Applied, StateReader, StateStore};
use crate::transport::Connector;
use crate::view::{self, GridView, ListingView, StatsPanel, StatusBar};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const NOTICE_CAPACITY: usize = 64;

/// Notifications annexes pour les collaborateurs (toasts, logs).
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Connection(ConnectionEvent),
    VehicleExited(ExitNotice),
}

pub struct ParkingClient {
    manager: Arc<ConnectionManager>,
    store: StateStore,
    events: EventStream,
    notices: broadcast::Sender<Notice>,
    health: ConnectionHealth,
    config: TransportConfig,
}

impl ParkingClient {
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let (manager, events) = ConnectionManager::new(connector, config.reconnect.clone());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            manager: Arc::new(manager),
            store: StateStore::new(),
            events,
            notices,
            health: ConnectionHealth::new(),
            config,
        }
    }

    /// Attend l'unique chargement de configuration, puis construit le client.
    pub async fn resolve<F>(config: F, connector: Arc<dyn Connector>) -> Self
    where
        F: Future<Output = TransportConfig>,
    {
        Self::new(config.await, connector)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            manager: self.manager.clone(),
            reader: self.store.reader(),
            notices: self.notices.clone(),
            health: self.health.clone(),
            mode: self.config.mode,
        }
    }

    /// Lance la connexion vers l'endpoint configuré.
    pub fn start(&self) -> Result<(), ConfigurationError> {
        self.manager.start(&self.config.endpoint)
    }

    /// Traite les événements jusqu'au `stop()` du manager (ou tout de suite
    /// s'il n'a jamais démarré). Les derniers événements du stop sont appliqués
    /// avant le retour.
    pub async fn run(&mut self) {
        let mut running = self.manager.running();
        loop {
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => return,
                },
                _ = running.wait_for(|up| !*up) => return,
            }
        }
    }

    /// Reçoit et applique un événement, puis le renvoie.
    pub async fn step(&mut self) -> Option<ClientEvent> {
        let event = self.events.recv().await?;
        self.dispatch(event.clone());
        Some(event)
    }

    pub fn dispatch(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Lifecycle(event) => {
                self.health.record(&event);
                match &event {
                    ConnectionEvent::ConnectivityChanged(up) => info!(connected = up, "connectivity changed"),
                    ConnectionEvent::GaveUp => warn!("gave up connecting"),
                    other => debug!("{other:?}"),
                }
                self.notify(Notice::Connection(event));
            }
            ClientEvent::Message(message) => {
                let name = message.event_name();
                match self.store.apply(message) {
                    Applied::Replaced { changed } => {
                        self.health.record_message();
                        if changed {
                            let state = self.store.read();
                            info!(
                                occupied = state.statistics.occupied_count,
                                available = state.statistics.available_count,
                                "{name} applied"
                            );
                        }
                    }
                    Applied::VehicleExited(notice) => {
                        self.health.record_message();
                        info!(
                            location = notice.location.as_deref().unwrap_or("?"),
                            plate = notice.license_plate.as_deref().unwrap_or("?"),
                            "vehicle exited"
                        );
                        self.notify(Notice::VehicleExited(notice));
                    }
                    Applied::Acknowledged => debug!("server acknowledged connection"),
                }
            }
        }
    }

    fn notify(&self, notice: Notice) {
        // aucun abonné : pas grave
        let _ = self.notices.send(notice);
    }
}

/// Surface de contrôle et de lecture, clonable.
#[derive(Clone)]
pub struct ClientHandle {
    manager: Arc<ConnectionManager>,
    reader: StateReader,
    notices: broadcast::Sender<Notice>,
    health: ConnectionHealth,
    mode: Mode,
}

impl ClientHandle {
    pub fn stop(&self) {
        self.manager.stop();
    }

    pub fn reconnect(&self) -> bool {
        self.manager.reconnect()
    }

    /// Demande au serveur de rediffuser un `parking_update` frais.
    pub fn request_update(&self) -> bool {
        self.manager.send(Frame::request_update())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn read(&self) -> Arc<ParkingState> {
        self.reader.read()
    }

    pub fn watch_state(&self) -> StateReader {
        self.reader.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn grid(&self) -> GridView {
        view::grid_view(&self.read())
    }

    pub fn listing(&self) -> ListingView {
        view::listing_view(&self.read())
    }

    pub fn stats(&self) -> StatsPanel {
        view::stats_panel(&self.read())
    }

    pub fn status_bar(&self) -> StatusBar {
        view::status_bar(self.manager.is_connected(), self.mode)
    }
}
