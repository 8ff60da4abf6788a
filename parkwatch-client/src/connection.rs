//! Cycle de vie de la connexion au-dessus d'un [`Connector`].
//!
//! Une tâche worker par cycle de session. Chaque événement émis porte l'époque
//! du cycle, estampillée sous le verrou du manager ; `stop()` et `reconnect()`
//! avancent l'époque sous ce même verrou, et [`EventStream`] jette tout ce qui
//! est en dessous du plancher courant. Une fois `stop()` revenu, plus rien du
//! cycle démonté n'atteint le consommateur. La session elle-même est fermée
//! par le worker juste après, de façon asynchrone.

use crate::backoff::Backoff;
use crate::contracts::{Frame, Inbound};
use crate::error::ConfigurationError;
use crate::transport::{CloseReason, Connector, Endpoint, Session, SessionEvent};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    ConnectivityChanged(bool),
    AttemptStarted(u32),
    AttemptFailed { attempt: u32, reason: String },
    /// Seulement après un `stop()` explicite pendant une tentative.
    GaveUp,
}

/// Tout ce que voit le consommateur, dans l'ordre d'arrivée.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Lifecycle(ConnectionEvent),
    Message(Inbound),
}

struct Stamped {
    epoch: u64,
    event: ClientEvent,
}

struct Inner {
    state: ConnectionState,
    epoch: u64,
    endpoint: Option<Endpoint>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    cancel: Option<CancellationToken>,
    events: mpsc::UnboundedSender<Stamped>,
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        // récepteur disparu = plus personne n'écoute
        let _ = self.events.send(Stamped { epoch: self.epoch, event });
    }

    fn lifecycle(&self, event: ConnectionEvent) {
        self.emit(ClientEvent::Lifecycle(event));
    }

    fn transition(&mut self, state: ConnectionState) {
        debug!(from = self.state.label(), to = state.label(), "connection state");
        self.state = state;
        self.lifecycle(ConnectionEvent::StateChanged(state));
    }

    /// Annule le cycle en cours et passe à une nouvelle époque.
    fn retire_cycle(&mut self, floor: &AtomicU64) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.outbound = None;
        self.epoch += 1;
        floor.store(self.epoch, Ordering::SeqCst);
    }
}

struct Shared {
    inner: Mutex<Inner>,
    floor: Arc<AtomicU64>,
    /// `true` entre `start()`/`reconnect()` et `stop()`.
    running: watch::Sender<bool>,
}

/// Côté réception de l'unique file d'événements du manager.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Stamped>,
    floor: Arc<AtomicU64>,
}

impl EventStream {
    /// Prochain événement vivant. `None` une fois le manager disparu.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            let stamped = self.rx.recv().await?;
            if self.is_live(&stamped) {
                return Some(stamped.event);
            }
        }
    }

    /// Variante non bloquante ; `None` si la file est vide.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        while let Ok(stamped) = self.rx.try_recv() {
            if self.is_live(&stamped) {
                return Some(stamped.event);
            }
        }
        None
    }

    fn is_live(&self, stamped: &Stamped) -> bool {
        stamped.epoch >= self.floor.load(Ordering::SeqCst)
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> (Self, EventStream) {
        let (events, rx) = mpsc::unbounded_channel();
        let floor = Arc::new(AtomicU64::new(0));
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                epoch: 0,
                endpoint: None,
                outbound: None,
                cancel: None,
                events,
            }),
            floor: floor.clone(),
            running: watch::channel(false).0,
        });
        (Self { connector, policy, shared }, EventStream { rx, floor })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.shared.inner.lock().endpoint.clone()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Passe à `false` au `stop()`, une fois ses derniers événements en file.
    pub fn running(&self) -> watch::Receiver<bool> {
        self.shared.running.subscribe()
    }

    /// Valide `endpoint` et commence à se connecter. Sur un manager déjà
    /// lancé, remplace la session courante. Exige un runtime tokio.
    pub fn start(&self, endpoint: &str) -> Result<(), ConfigurationError> {
        let endpoint = Endpoint::parse(endpoint)?;
        info!("connecting to {endpoint}");
        let mut inner = self.shared.inner.lock();
        self.launch(&mut inner, endpoint, ConnectionState::Connecting);
        Ok(())
    }

    /// Abandonne la session courante (s'il y en a une) et relance un cycle de
    /// tentatives vers le dernier endpoint. `false` si `start` n'a jamais été appelé.
    pub fn reconnect(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        let Some(endpoint) = inner.endpoint.clone() else {
            return false;
        };
        info!("forced reconnect to {endpoint}");
        self.launch(&mut inner, endpoint, ConnectionState::Reconnecting);
        true
    }

    /// Sûr depuis n'importe quel état. Pendant une tentative, on abandonne
    /// (`Failed` + `GaveUp`) ; sinon le manager revient à `Idle`. La session
    /// est fermée par le worker après le retour, sans rien émettre.
    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock();
        let was = inner.state;
        inner.retire_cycle(&self.shared.floor);
        match was {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                inner.transition(ConnectionState::Failed);
                inner.lifecycle(ConnectionEvent::GaveUp);
            }
            ConnectionState::Connected => {
                inner.lifecycle(ConnectionEvent::ConnectivityChanged(false));
                inner.transition(ConnectionState::Idle);
            }
            ConnectionState::Idle | ConnectionState::Failed => {}
        }
        self.shared.running.send_replace(false);
        info!("connection stopped ({})", inner.state.label());
    }

    /// Met `frame` en file sur la session vivante. `false` hors connexion.
    pub fn send(&self, frame: Frame) -> bool {
        let inner = self.shared.inner.lock();
        if inner.state != ConnectionState::Connected {
            debug!("not connected, dropping outbound {}", frame.event);
            return false;
        }
        inner.outbound.as_ref().is_some_and(|tx| tx.send(frame).is_ok())
    }

    fn launch(&self, inner: &mut Inner, endpoint: Endpoint, initial: ConnectionState) {
        let was_connected = inner.state == ConnectionState::Connected;
        inner.retire_cycle(&self.shared.floor);
        if was_connected {
            inner.lifecycle(ConnectionEvent::ConnectivityChanged(false));
        }
        inner.endpoint = Some(endpoint.clone());
        inner.transition(initial);
        self.shared.running.send_replace(true);

        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        inner.cancel = Some(cancel.clone());
        inner.outbound = Some(outbound_tx);

        let worker = Worker {
            connector: self.connector.clone(),
            policy: self.policy.clone(),
            shared: self.shared.clone(),
            epoch: inner.epoch,
            endpoint,
            cancel,
            outbound: outbound_rx,
        };
        tokio::spawn(worker.run());
    }
}

struct Worker {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    epoch: u64,
    endpoint: Endpoint,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedReceiver<Frame>,
}

impl Worker {
    /// Exécute `f` sous le verrou du manager si ce cycle est toujours courant.
    fn publish(&self, f: impl FnOnce(&mut Inner)) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.epoch != self.epoch {
            return false;
        }
        f(&mut inner);
        true
    }

    async fn run(mut self) {
        let mut backoff = Backoff::new(self.policy.base_delay, self.policy.max_delay);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if !self.publish(|inner| inner.lifecycle(ConnectionEvent::AttemptStarted(attempt))) {
                return;
            }

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return,
                res = timeout(self.policy.handshake_timeout, self.connector.connect(&self.endpoint)) => res,
            };

            let failure = match outcome {
                Ok(Ok(mut session)) => {
                    backoff.reset();
                    attempt = 0;
                    let live = self.publish(|inner| {
                        inner.transition(ConnectionState::Connected);
                        inner.lifecycle(ConnectionEvent::ConnectivityChanged(true));
                    });
                    if !live {
                        close_quietly(session.as_mut()).await;
                        return;
                    }
                    info!("connected to {}", self.endpoint);

                    let Some(reason) = self.pump(session.as_mut()).await else {
                        close_quietly(session.as_mut()).await;
                        return;
                    };
                    while self.outbound.try_recv().is_ok() {}

                    let live = match reason {
                        CloseReason::Network(detail) => {
                            warn!("connection lost: {detail}");
                            self.publish(|inner| {
                                inner.lifecycle(ConnectionEvent::ConnectivityChanged(false));
                                inner.transition(ConnectionState::Reconnecting);
                            })
                        }
                        CloseReason::ServerShutdown => {
                            warn!("server closed the session, reconnecting");
                            self.publish(|inner| {
                                inner.transition(ConnectionState::Idle);
                                inner.lifecycle(ConnectionEvent::ConnectivityChanged(false));
                                inner.transition(ConnectionState::Reconnecting);
                            })
                        }
                    };
                    if !live {
                        return;
                    }
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("handshake timed out after {}s", self.policy.handshake_timeout.as_secs())),
            };

            if let Some(reason) = failure {
                warn!(attempt, "connection attempt failed: {reason}");
                let live = self.publish(|inner| {
                    inner.lifecycle(ConnectionEvent::AttemptFailed { attempt, reason });
                    inner.transition(ConnectionState::Reconnecting);
                });
                if !live {
                    return;
                }
            }

            let delay = backoff.next_delay();
            debug!("next attempt in {delay:?}");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(delay) => {}
            }
        }
    }

    /// Fait circuler les trames dans les deux sens jusqu'à la fermeture. `None` si annulé.
    async fn pump(&mut self, session: &mut dyn Session) -> Option<CloseReason> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                Some(frame) = self.outbound.recv() => {
                    debug!("sending {}", frame.event);
                    if let Err(e) = session.send(frame).await {
                        return Some(CloseReason::Network(e.to_string()));
                    }
                }
                event = session.next_event() => match event {
                    SessionEvent::Frame(frame) => match Inbound::from_frame(frame) {
                        Ok(message) => {
                            if !self.publish(|inner| inner.emit(ClientEvent::Message(message))) {
                                return None;
                            }
                        }
                        Err(e) => debug!("ignoring inbound frame: {e}"),
                    },
                    SessionEvent::Closed(reason) => return Some(reason),
                },
            }
        }
    }
}

async fn close_quietly(session: &mut dyn Session) {
    if timeout(CLOSE_GRACE, session.close()).await.is_err() {
        debug!("session close timed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;

    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn Session>, TransportError> {
            Err(TransportError::Connect("connection refused".into()))
        }
    }

    fn manager() -> (ConnectionManager, EventStream) {
        ConnectionManager::new(Arc::new(Refusing), ReconnectPolicy::default())
    }

    fn drain(events: &mut EventStream) -> Vec<ConnectionEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.try_recv() {
            if let ClientEvent::Lifecycle(event) = event {
                out.push(event);
            }
        }
        out
    }

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert_eq!(policy.handshake_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_start_rejects_bad_endpoint() {
        let (manager, mut events) = manager();
        assert_eq!(manager.start(""), Err(ConfigurationError::EmptyEndpoint));
        assert!(manager.start("gopher://old.lan").is_err());
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_idle_manager() {
        let (manager, mut events) = manager();
        assert!(!manager.send(Frame::request_update()));
        assert!(!manager.reconnect());
        manager.stop();
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(events.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_keep_retrying() {
        let (manager, mut events) = manager();
        manager.start("http://localhost:5000").unwrap();
        sleep(Duration::from_millis(3500)).await;

        let seen = drain(&mut events);
        let failures = seen
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::AttemptFailed { .. }))
            .count();
        // tentatives à t=0, 1s, 3s
        assert_eq!(failures, 3);
        assert_eq!(seen.first(), Some(&ConnectionEvent::StateChanged(ConnectionState::Connecting)));
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_reconnecting_gives_up() {
        let (manager, mut events) = manager();
        manager.start("http://localhost:5000").unwrap();
        sleep(Duration::from_millis(10)).await;
        drain(&mut events);

        manager.stop();
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(
            drain(&mut events),
            vec![ConnectionEvent::StateChanged(ConnectionState::Failed), ConnectionEvent::GaveUp]
        );

        sleep(Duration::from_secs(30)).await;
        assert!(events.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_flag_follows_start_and_stop() {
        let (manager, _events) = manager();
        let running = manager.running();
        assert!(!*running.borrow());

        manager.start("http://localhost:5000").unwrap();
        assert!(*running.borrow());
        manager.stop();
        assert!(!*running.borrow());
        assert!(manager.reconnect());
        assert!(*running.borrow());
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_refused_while_reconnecting() {
        let (manager, _events) = manager();
        manager.start("http://localhost:5000").unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(!manager.send(Frame::request_update()));
        manager.stop();
    }
}
