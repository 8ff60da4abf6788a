/*!
Transport mock pour développement sans serveur

Un `MockConnector` rejoue un script de tentatives (refus, blocage, session
acceptée). Chaque session acceptée est pilotée depuis le test par son
`MockPeer` : injection de frames, coupure réseau, arrêt côté serveur, et
lecture des frames envoyées par le client.
*/

use async_trait::async_trait;
use parkwatch::transport::{CloseReason, Connector, Endpoint, Session, SessionEvent};
use parkwatch::{Frame, TransportError};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Step {
    Refuse(String),
    Hang,
    Accept(MockSession),
}

/// Connector scripté : une entrée consommée par tentative.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<VecDeque<Step>>>,
    attempts: Arc<AtomicU32>,
    endpoints: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// La prochaine tentative échoue au handshake.
    pub fn refuse(&self, reason: &str) -> &Self {
        lock(&self.script).push_back(Step::Refuse(reason.to_string()));
        self
    }

    /// La prochaine tentative ne répond jamais (timeout côté manager).
    pub fn hang(&self) -> &Self {
        lock(&self.script).push_back(Step::Hang);
        self
    }

    /// La prochaine tentative réussit ; le peer retourné pilote la session.
    pub fn accept(&self) -> MockPeer {
        let (session, peer) = MockSession::pair();
        lock(&self.script).push_back(Step::Accept(session));
        peer
    }

    /// Nombre de tentatives de connexion reçues.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<String> {
        lock(&self.endpoints).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.endpoints).push(endpoint.to_string());
        let step = lock(&self.script).pop_front();

        match step {
            Some(Step::Accept(session)) => {
                log::info!("🔌 [MOCK] attempt {attempt} accepted");
                Ok(Box::new(session))
            }
            Some(Step::Refuse(reason)) => {
                log::info!("🚫 [MOCK] attempt {attempt} refused: {reason}");
                Err(TransportError::Handshake(reason))
            }
            Some(Step::Hang) => {
                log::info!("⏳ [MOCK] attempt {attempt} hanging");
                std::future::pending().await
            }
            None => Err(TransportError::Connect("no scripted session".into())),
        }
    }
}

/// Côté client d'une session simulée.
pub struct MockSession {
    incoming: mpsc::UnboundedReceiver<SessionEvent>,
    sent: Arc<Mutex<Vec<Frame>>>,
    closed: Arc<AtomicBool>,
}

/// Côté serveur d'une session simulée.
#[derive(Clone)]
pub struct MockPeer {
    outgoing: mpsc::UnboundedSender<SessionEvent>,
    sent: Arc<Mutex<Vec<Frame>>>,
    closed: Arc<AtomicBool>,
}

impl MockSession {
    pub fn pair() -> (MockSession, MockPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        (
            MockSession { incoming: rx, sent: sent.clone(), closed: closed.clone() },
            MockPeer { outgoing: tx, sent, closed },
        )
    }
}

#[async_trait]
impl Session for MockSession {
    async fn next_event(&mut self) -> SessionEvent {
        match self.incoming.recv().await {
            Some(event) => event,
            None => SessionEvent::Closed(CloseReason::Network("peer dropped".into())),
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        log::info!("📤 [MOCK] client sent {}", frame.event);
        lock(&self.sent).push(frame);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl MockPeer {
    /// Pousse un événement serveur ; `false` si la session n'existe plus.
    pub fn push(&self, event: &str, data: Value) -> bool {
        self.push_frame(Frame::new(event, data))
    }

    pub fn push_frame(&self, frame: Frame) -> bool {
        log::info!("📨 [MOCK] server pushed {}", frame.event);
        self.outgoing.send(SessionEvent::Frame(frame)).is_ok()
    }

    /// Coupure réseau (le client doit se reconnecter seul).
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.outgoing
            .send(SessionEvent::Closed(CloseReason::Network(reason.to_string())))
            .is_ok()
    }

    /// Déconnexion explicite côté serveur.
    pub fn shutdown(&self) -> bool {
        self.outgoing.send(SessionEvent::Closed(CloseReason::ServerShutdown)).is_ok()
    }

    /// Frames envoyées par le client sur cette session.
    pub fn sent(&self) -> Vec<Frame> {
        lock(&self.sent).clone()
    }

    /// Vrai une fois la session fermée ou abandonnée par le client.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
