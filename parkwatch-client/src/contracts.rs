//! Contrat de fil avec le serveur d'occupation.
//!
//! Chaque transport livre des trames `(nom d'événement, payload JSON)` ; ce
//! module les transforme en messages [`Inbound`] typés et projette les
//! enregistrements sur le modèle. Décodage tolérant : un champ mal typé compte
//! comme absent, le store retombe alors sur ce qu'il détient déjà.

use crate::error::MessageFormatError;
use crate::models::{SlotRecord, SlotStatus, Statistics};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

pub const CONNECTED: &str = "connected";
pub const INITIAL_STATE: &str = "initial_state";
pub const PARKING_UPDATE: &str = "parking_update";
pub const VEHICLE_EXITED: &str = "vehicle_exited";
pub const REQUEST_UPDATE: &str = "request_update";

/// Événements écoutés, dans l'ordre habituel d'envoi du serveur.
pub const INBOUND_EVENTS: [&str; 4] = [CONNECTED, INITIAL_STATE, PARKING_UPDATE, VEHICLE_EXITED];

/// Un événement nommé et son payload JSON, dans un sens ou dans l'autre.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub event: String,
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self { event: event.into(), data }
    }

    /// Demande au serveur de rediffuser un `parking_update` frais.
    pub fn request_update() -> Self {
        Self::new(REQUEST_UPDATE, Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connected(ConnectedAck),
    InitialState(StatePayload),
    ParkingUpdate(StatePayload),
    VehicleExited(ExitNotice),
}

impl Inbound {
    pub fn from_frame(frame: Frame) -> Result<Self, MessageFormatError> {
        match frame.event.as_str() {
            CONNECTED => Ok(Inbound::Connected(ConnectedAck {
                status: frame.data.get("status").and_then(text),
            })),
            INITIAL_STATE => Ok(Inbound::InitialState(StatePayload::from_value(&frame.data))),
            PARKING_UPDATE => Ok(Inbound::ParkingUpdate(StatePayload::from_value(&frame.data))),
            VEHICLE_EXITED => Ok(Inbound::VehicleExited(ExitNotice::from_value(&frame.data))),
            other => Err(MessageFormatError::UnknownEvent(other.to_string())),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Inbound::Connected(_) => CONNECTED,
            Inbound::InitialState(_) => INITIAL_STATE,
            Inbound::ParkingUpdate(_) => PARKING_UPDATE,
            Inbound::VehicleExited(_) => VEHICLE_EXITED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectedAck {
    pub status: Option<String>,
}

/// Corps commun à `initial_state` et `parking_update`. `None` : champ absent
/// ou qui n'est pas un objet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatePayload {
    pub parking_lot_map: Option<Map<String, Value>>,
    pub statistics: Option<Map<String, Value>>,
}

impl StatePayload {
    pub fn from_value(data: &Value) -> Self {
        let Some(body) = data.as_object() else {
            warn!("state payload ignored: {}", MessageFormatError::NotAnObject { field: "data" });
            return Self::default();
        };
        Self {
            parking_lot_map: object_field(body, "parking_lot_map"),
            statistics: object_field(body, "statistics"),
        }
    }
}

/// Avis informatif à la sortie d'un véhicule ; la mise à jour suivante
/// reflète déjà le retrait.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ExitNotice {
    pub license_plate: Option<String>,
    pub location: Option<String>,
    pub final_duration_minutes: Option<f64>,
    pub final_blocks: Option<u64>,
    pub final_cost: Option<f64>,
}

impl ExitNotice {
    pub fn from_value(data: &Value) -> Self {
        Self {
            license_plate: data.get("license_plate").and_then(text),
            location: data.get("location").and_then(text),
            final_duration_minutes: data.get("final_duration_minutes").and_then(amount),
            final_blocks: data.get("final_blocks").and_then(count),
            final_cost: data.get("final_cost").and_then(amount),
        }
    }
}

/// Construit un enregistrement depuis sa forme filaire. Les champs manquants
/// héritent de `previous` (dernier enregistrement de la même place), sinon zéro/absent.
pub fn decode_record(
    location: &str,
    value: &Value,
    previous: Option<&SlotRecord>,
) -> Result<SlotRecord, MessageFormatError> {
    let fields = value.as_object().ok_or_else(|| MessageFormatError::InvalidRecord {
        location: location.to_string(),
    })?;
    let base = previous.cloned().unwrap_or_default();

    Ok(SlotRecord {
        license_plate: fields.get("license_plate").and_then(text).or(base.license_plate),
        status: fields
            .get("status")
            .and_then(Value::as_str)
            .map(SlotStatus::from_tag)
            .unwrap_or(base.status),
        parked_duration_minutes: fields
            .get("parked_duration_minutes")
            .and_then(amount)
            .unwrap_or(base.parked_duration_minutes),
        parked_blocks: fields.get("parked_blocks").and_then(count).unwrap_or(base.parked_blocks),
        total_cost: fields.get("total_cost").and_then(amount).unwrap_or(base.total_cost),
        parked_start_time: fields.get("parked_start_time").and_then(text).or(base.parked_start_time),
        last_update: fields.get("last_update").and_then(text).or(base.last_update),
    })
}

/// Fusion champ par champ sur les statistiques détenues.
pub fn decode_statistics(fields: &Map<String, Value>, previous: &Statistics) -> Statistics {
    let counter = |key: &str, fallback: u32| {
        fields
            .get(key)
            .and_then(count)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(fallback)
    };

    Statistics {
        total_locations: counter("total_locations", previous.total_locations),
        occupied_count: counter("occupied_count", previous.occupied_count),
        available_count: counter("available_count", previous.available_count),
        total_revenue: fields
            .get("total_revenue")
            .and_then(amount)
            .unwrap_or(previous.total_revenue),
        messages_processed: fields
            .get("messages_processed")
            .and_then(count)
            .unwrap_or(previous.messages_processed),
    }
}

fn object_field(body: &Map<String, Value>, field: &'static str) -> Option<Map<String, Value>> {
    match body.get(field) {
        Some(Value::Object(map)) => Some(map.clone()),
        Some(Value::Null) | None => None,
        Some(_) => {
            warn!("{}", MessageFormatError::NotAnObject { field });
            None
        }
    }
}

fn text(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Nombre fini, positif ou nul.
fn amount(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite() && *n >= 0.0)
}

/// Entier positif ou nul ; les flottants entiers comme `3.0` passent.
fn count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0)
            .map(|n| n as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_event_rejected() {
        let err = Inbound::from_frame(Frame::new("heartbeat", json!({}))).unwrap_err();
        assert!(matches!(err, MessageFormatError::UnknownEvent(name) if name == "heartbeat"));
    }

    #[test]
    fn test_state_payload_tolerates_wrong_types() {
        let payload = StatePayload::from_value(&json!({
            "parking_lot_map": "oops",
            "statistics": {"occupied_count": 3}
        }));
        assert!(payload.parking_lot_map.is_none());
        assert_eq!(payload.statistics.unwrap()["occupied_count"], 3);

        assert_eq!(StatePayload::from_value(&json!([1, 2])), StatePayload::default());
    }

    #[test]
    fn test_decode_record_inherits_missing_fields() {
        let previous = decode_record(
            "A1",
            &json!({
                "license_plate": "30B-55555",
                "status": "PARKED",
                "parked_duration_minutes": 12.5,
                "parked_blocks": 2,
                "total_cost": 20000
            }),
            None,
        )
        .unwrap();

        let next = decode_record("A1", &json!({"parked_duration_minutes": 21.0, "total_cost": "x"}), Some(&previous)).unwrap();
        assert_eq!(next.license_plate.as_deref(), Some("30B-55555"));
        assert_eq!(next.status, SlotStatus::Parked);
        assert_eq!(next.parked_duration_minutes, 21.0);
        assert_eq!(next.total_cost, 20000.0);
        assert_eq!(next.parked_blocks, 2);
    }

    #[test]
    fn test_decode_record_zero_baseline() {
        let record = decode_record("B4", &json!({}), None).unwrap();
        assert_eq!(record, SlotRecord::default());
        assert!(decode_record("B4", &json!(42), None).is_err());
    }

    #[test]
    fn test_decode_statistics_merges() {
        let previous = Statistics { messages_processed: 7, ..Statistics::default() };
        let fields = json!({"occupied_count": 4, "available_count": 56, "total_revenue": 80000, "total_locations": -1});
        let stats = decode_statistics(fields.as_object().unwrap(), &previous);
        assert_eq!(stats.total_locations, 60);
        assert_eq!(stats.occupied_count, 4);
        assert_eq!(stats.total_revenue, 80000.0);
        assert_eq!(stats.messages_processed, 7);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_exit_notice_partial() {
        let notice = ExitNotice::from_value(&json!({"location": "C3", "final_cost": 30000, "final_blocks": 3.0}));
        assert_eq!(notice.location.as_deref(), Some("C3"));
        assert_eq!(notice.final_cost, Some(30000.0));
        assert_eq!(notice.final_blocks, Some(3));
        assert!(notice.license_plate.is_none());
    }
}
