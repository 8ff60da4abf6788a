use crate::connection::{ConnectionEvent, ConnectionState};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub failed_attempts: u32,
    pub reconnects: u32,
    pub messages_applied: u64,
    /// RFC 3339
    pub connected_since: Option<String>,
    pub last_message_at: Option<String>,
}

#[derive(Debug)]
struct Counters {
    status: ConnectionState,
    failed_attempts: u32,
    reconnects: u32,
    messages_applied: u64,
    ever_connected: bool,
    connected_since: Option<OffsetDateTime>,
    last_message_at: Option<OffsetDateTime>,
}

/// Santé de la connexion, alimentée par le flux de cycle de vie.
#[derive(Clone, Debug)]
pub struct ConnectionHealth {
    inner: Arc<Mutex<Counters>>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Counters {
                status: ConnectionState::Idle,
                failed_attempts: 0,
                reconnects: 0,
                messages_applied: 0,
                ever_connected: false,
                connected_since: None,
                last_message_at: None,
            })),
        }
    }

    pub fn record(&self, event: &ConnectionEvent) {
        let mut c = self.inner.lock();
        match event {
            ConnectionEvent::StateChanged(state) => {
                c.status = *state;
                if *state != ConnectionState::Connected {
                    c.connected_since = None;
                }
            }
            ConnectionEvent::ConnectivityChanged(true) => {
                if c.ever_connected {
                    c.reconnects += 1;
                }
                c.ever_connected = true;
                c.connected_since = Some(OffsetDateTime::now_utc());
            }
            ConnectionEvent::AttemptFailed { .. } => c.failed_attempts += 1,
            ConnectionEvent::ConnectivityChanged(false)
            | ConnectionEvent::AttemptStarted(_)
            | ConnectionEvent::GaveUp => {}
        }
    }

    pub fn record_message(&self) {
        let mut c = self.inner.lock();
        c.messages_applied += 1;
        c.last_message_at = Some(OffsetDateTime::now_utc());
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let c = self.inner.lock();
        HealthSnapshot {
            status: c.status.label().to_string(),
            failed_attempts: c.failed_attempts,
            reconnects: c.reconnects,
            messages_applied: c.messages_applied,
            connected_since: c.connected_since.and_then(rfc3339),
            last_message_at: c.last_message_at.and_then(rfc3339),
        }
    }
}

fn rfc3339(at: OffsetDateTime) -> Option<String> {
    at.format(&Rfc3339).ok()
}
