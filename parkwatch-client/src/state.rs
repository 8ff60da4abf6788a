//! État d'occupation canonique.
//!
//! [`StateStore`] est l'unique écrivain ; les lecteurs tiennent un
//! [`StateReader`] et reçoivent un `Arc<ParkingState>` immuable qui ne bouge
//! jamais sous leurs pieds. Les observateurs sont réveillés via un canal
//! `watch`, seulement quand un message a vraiment changé quelque chose.

use crate::contracts::{decode_record, decode_statistics, ExitNotice, Inbound, StatePayload};
use crate::error::MessageFormatError;
use crate::models::{LocationCode, OccupancyMap, ParkingState};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Effet de l'application d'un message.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Map et statistiques remplacées ; `changed` est faux pour un payload répété.
    Replaced { changed: bool },
    VehicleExited(ExitNotice),
    Acknowledged,
}

pub struct StateStore {
    tx: watch::Sender<Arc<ParkingState>>,
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(ParkingState::default()));
        Self { tx }
    }

    /// Instantané courant.
    pub fn read(&self) -> Arc<ParkingState> {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> StateReader {
        StateReader { rx: self.tx.subscribe() }
    }

    /// Applique un message entrant. N'échoue jamais : les parties malformées
    /// retombent sur ce qui est déjà stocké.
    pub fn apply(&mut self, message: Inbound) -> Applied {
        match message {
            Inbound::InitialState(payload) | Inbound::ParkingUpdate(payload) => {
                let current = self.read();
                let next = merge(&current, &payload);
                let changed = self.tx.send_if_modified(|state| {
                    if **state == next {
                        false
                    } else {
                        *state = Arc::new(next);
                        true
                    }
                });
                debug!(changed, occupied = self.read().map.len(), "state payload applied");
                Applied::Replaced { changed }
            }
            Inbound::VehicleExited(notice) => {
                debug!(location = ?notice.location, "vehicle exited");
                Applied::VehicleExited(notice)
            }
            Inbound::Connected(ack) => {
                debug!(status = ?ack.status, "server acknowledged session");
                Applied::Acknowledged
            }
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Accès en lecture seule au store ; clonage peu coûteux.
#[derive(Clone)]
pub struct StateReader {
    rx: watch::Receiver<Arc<ParkingState>>,
}

impl StateReader {
    pub fn read(&self) -> Arc<ParkingState> {
        self.rx.borrow().clone()
    }

    /// Attend le prochain changement. `None` une fois le store disparu.
    pub async fn changed(&mut self) -> Option<Arc<ParkingState>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

fn merge(current: &ParkingState, payload: &StatePayload) -> ParkingState {
    let map = match &payload.parking_lot_map {
        Some(entries) => {
            let mut map = OccupancyMap::with_capacity(entries.len());
            for (key, value) in entries {
                let Ok(code) = key.parse::<LocationCode>() else {
                    warn!("{}", MessageFormatError::UnknownLocation(key.clone()));
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                let previous = current.map.get(&code);
                match decode_record(key, value, previous) {
                    Ok(record) => {
                        map.insert(code, record);
                    }
                    Err(e) => {
                        warn!("{e}");
                        if let Some(previous) = previous {
                            map.insert(code, previous.clone());
                        }
                    }
                }
            }
            map
        }
        None => current.map.clone(),
    };

    let statistics = match &payload.statistics {
        Some(fields) => decode_statistics(fields, &current.statistics),
        None => current.statistics.clone(),
    };

    ParkingState { map, statistics }
}
