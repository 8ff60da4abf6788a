//! Transport MQTT : un topic par événement sous un préfixe commun.
//!
//! `parking/initial_state`, `parking/parking_update`, ... portent les mêmes
//! corps JSON que les événements Socket.IO. Les trames sortantes vont sur
//! `<prefix>/<event>`.

use crate::contracts::{Frame, INBOUND_EVENTS};
use crate::error::TransportError;
use crate::transport::{CloseReason, Session, SessionEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

const KEEP_ALIVE: Duration = Duration::from_secs(15);
const REQUEST_CAPACITY: usize = 16;

pub struct MqttSession {
    client: AsyncClient,
    topic_prefix: String,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    driver: JoinHandle<()>,
}

impl MqttSession {
    /// Connexion, attente du CONNACK du broker, abonnements puis demande
    /// d'instantané.
    pub async fn connect(host: &str, port: u16, topic_prefix: &str) -> Result<Self, TransportError> {
        let client_id = format!("parkwatch-{}", Uuid::new_v4().simple());
        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(KEEP_ALIVE);
        let (client, mut eventloop) = AsyncClient::new(opts, REQUEST_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Handshake(format!("broker refused: {:?}", ack.code)));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(TransportError::Connect(e.to_string())),
            }
        }
        debug!("mqtt session up on {host}:{port}");

        for event in INBOUND_EVENTS {
            client
                .subscribe(topic(topic_prefix, event), QoS::AtLeastOnce)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
        }

        let (tx, events) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(eventloop, topic_prefix.to_string(), tx));

        let mut session = Self {
            client,
            topic_prefix: topic_prefix.to_string(),
            events,
            driver,
        };
        // pas de push à la connexion en MQTT : on réclame l'état courant
        session.send(Frame::request_update()).await?;
        Ok(session)
    }
}

fn topic(prefix: &str, event: &str) -> String {
    format!("{prefix}/{event}")
}

/// `parking/parking_update` + corps JSON → trame. Corps vide = pas de données.
fn decode_publish(prefix: &str, topic: &str, payload: &[u8]) -> Option<Frame> {
    let event = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    if payload.is_empty() {
        return Some(Frame::new(event, Value::Null));
    }
    match serde_json::from_slice(payload) {
        Ok(data) => Some(Frame::new(event, data)),
        Err(e) => {
            warn!("dropping {topic}: invalid JSON ({e})");
            None
        }
    }
}

/// Classe un résultat de `poll()` : trame, fermeture, ou rien à remonter.
fn classify(prefix: &str, polled: Result<Event, ConnectionError>) -> Option<SessionEvent> {
    match polled {
        Ok(Event::Incoming(Incoming::Publish(p))) => decode_publish(prefix, &p.topic, &p.payload).map(SessionEvent::Frame),
        Ok(Event::Incoming(Incoming::Disconnect)) => Some(SessionEvent::Closed(CloseReason::ServerShutdown)),
        Ok(_) => None,
        Err(e) => Some(SessionEvent::Closed(CloseReason::Network(e.to_string()))),
    }
}

async fn drive(mut eventloop: EventLoop, prefix: String, tx: mpsc::UnboundedSender<SessionEvent>) {
    loop {
        let Some(event) = classify(&prefix, eventloop.poll().await) else {
            continue;
        };
        let closed = matches!(event, SessionEvent::Closed(_));
        if tx.send(event).is_err() || closed {
            return;
        }
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn next_event(&mut self) -> SessionEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => SessionEvent::Closed(CloseReason::Network("event loop stopped".into())),
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let payload = if frame.data.is_null() {
            Vec::new()
        } else {
            frame.data.to_string().into_bytes()
        };
        self.client
            .publish(topic(&self.topic_prefix, &frame.event), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("mqtt disconnect: {e}");
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), &mut self.driver).await;
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
