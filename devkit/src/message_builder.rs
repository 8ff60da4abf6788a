/*!
Builders de messages serveur

Produit les événements tels que le serveur de parking les pousse
(`initial_state`, `parking_update`, `vehicle_exited`, `connected`), avec des
statistiques cohérentes calculées à partir des places fournies.
*/

use parkwatch::contracts::{CONNECTED, INITIAL_STATE, PARKING_UPDATE, VEHICLE_EXITED};
use parkwatch::models::TOTAL_LOCATIONS;
use parkwatch::Frame;
use serde_json::{json, Map, Value};

/// Helper pour créer des messages conformes au contrat du serveur
#[derive(Debug, Default)]
pub struct ParkingMessageBuilder {
    messages_processed: u64,
}

impl ParkingMessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistrement d'une place occupée.
    pub fn slot(plate: &str, status: &str, minutes: f64, blocks: u64, cost: f64) -> Value {
        let now = chrono::Utc::now();
        let start = now - chrono::Duration::seconds((minutes * 60.0) as i64);
        json!({
            "license_plate": plate,
            "status": status,
            "parked_start_time": start.to_rfc3339(),
            "parked_duration_minutes": minutes,
            "parked_blocks": blocks,
            "total_cost": cost,
            "last_update": now.to_rfc3339()
        })
    }

    /// Raccourci : véhicule garé.
    pub fn parked(plate: &str, minutes: f64, cost: f64) -> Value {
        let blocks = (minutes / 30.0).ceil().max(1.0) as u64;
        Self::slot(plate, "PARKED", minutes, blocks, cost)
    }

    /// Corps `{parking_lot_map, statistics}` ; chaque appel compte un message traité.
    pub fn state_payload(&mut self, slots: &[(&str, Value)]) -> Value {
        self.messages_processed += 1;
        let mut map = Map::new();
        let mut revenue = 0.0;
        for (location, record) in slots {
            revenue += record["total_cost"].as_f64().unwrap_or_default();
            map.insert(location.to_string(), record.clone());
        }
        let occupied = map.len() as u32;
        json!({
            "parking_lot_map": map,
            "statistics": {
                "total_locations": TOTAL_LOCATIONS,
                "occupied_count": occupied,
                "available_count": TOTAL_LOCATIONS.saturating_sub(occupied),
                "total_revenue": revenue,
                "messages_processed": self.messages_processed
            }
        })
    }

    pub fn initial_state(&mut self, slots: &[(&str, Value)]) -> Frame {
        Frame::new(INITIAL_STATE, self.state_payload(slots))
    }

    pub fn parking_update(&mut self, slots: &[(&str, Value)]) -> Frame {
        Frame::new(PARKING_UPDATE, self.state_payload(slots))
    }

    pub fn connected() -> Frame {
        Frame::new(CONNECTED, json!({"status": "Connected to parking system"}))
    }

    pub fn vehicle_exited(plate: &str, location: &str, minutes: f64, blocks: u64, cost: f64) -> Frame {
        Frame::new(
            VEHICLE_EXITED,
            json!({
                "license_plate": plate,
                "location": location,
                "final_duration_minutes": minutes,
                "final_blocks": blocks,
                "final_cost": cost
            }),
        )
    }
}
