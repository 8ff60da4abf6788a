/*!
Test Harness pour le client parkwatch

Facilite l'écriture de scénarios :
- client branché sur un `MockConnector` scripté
- attente d'événements avec timeout
- extraction des transitions d'état observées
*/

use crate::mock_transport::MockConnector;
use anyhow::Result;
use parkwatch::{ClientEvent, ClientHandle, ConnectionEvent, ConnectionState, ParkingClient, TransportConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Harness de test complet autour d'un `ParkingClient`
pub struct TestHarness {
    pub connector: MockConnector,
    pub client: ParkingClient,
    pub handle: ClientHandle,
}

impl TestHarness {
    /// Crée un harness avec la configuration par défaut
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let connector = MockConnector::new();
        let client = ParkingClient::new(config, Arc::new(connector.clone()));
        let handle = client.handle();
        Self { connector, client, handle }
    }

    pub fn start(&self) -> Result<()> {
        self.client.start()?;
        log::info!("🚀 Client started against {}", self.client.config().endpoint);
        Ok(())
    }

    /// Attend le prochain événement (appliqué au store au passage)
    pub async fn next_event(&mut self, within: Duration) -> Result<ClientEvent> {
        match timeout(within, self.client.step()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => anyhow::bail!("event stream closed"),
            Err(_) => anyhow::bail!("no event within {within:?}"),
        }
    }

    /// Consomme les événements jusqu'à celui qui satisfait `matches` (inclus)
    pub async fn wait_for<F>(&mut self, within: Duration, matches: F) -> Result<Vec<ClientEvent>>
    where
        F: Fn(&ClientEvent) -> bool,
    {
        let deadline = Instant::now() + within;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match self.next_event(remaining).await {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("⏰ Timeout after {} events: {e}", seen.len());
                    anyhow::bail!("expected event not seen ({e}); got {seen:?}");
                }
            };
            let done = matches(&event);
            seen.push(event);
            if done {
                return Ok(seen);
            }
        }
    }

    pub async fn wait_for_state(&mut self, state: ConnectionState, within: Duration) -> Result<Vec<ClientEvent>> {
        self.wait_for(within, |e| *e == ClientEvent::Lifecycle(ConnectionEvent::StateChanged(state)))
            .await
    }

    /// Tout ce qui arrive pendant `window`
    pub async fn collect(&mut self, window: Duration) -> Vec<ClientEvent> {
        let deadline = Instant::now() + window;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return seen;
            }
            match self.next_event(remaining).await {
                Ok(event) => seen.push(event),
                Err(_) => return seen,
            }
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Transitions d'état contenues dans une suite d'événements
pub fn states(events: &[ClientEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Lifecycle(ConnectionEvent::StateChanged(state)) => Some(*state),
            _ => None,
        })
        .collect()
}

/// Nombre d'événements de cycle de vie satisfaisant `matches`
pub fn count_lifecycle<F>(events: &[ClientEvent], matches: F) -> usize
where
    F: Fn(&ConnectionEvent) -> bool,
{
    events
        .iter()
        .filter(|e| matches!(e, ClientEvent::Lifecycle(event) if matches(event)))
        .count()
}
