use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Lettres d'étage, dans l'ordre d'affichage.
pub const FLOORS: [char; 6] = ['A', 'B', 'C', 'D', 'E', 'F'];
pub const SLOTS_PER_FLOOR: u8 = 10;
pub const TOTAL_LOCATIONS: u32 = FLOORS.len() as u32 * SLOTS_PER_FLOOR as u32;

/// Une place : lettre d'étage + numéro à partir de 1 ("A1" .. "F10").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationCode {
    floor: char,
    slot: u8,
}

impl LocationCode {
    pub fn new(floor: char, slot: u8) -> Option<Self> {
        if FLOORS.contains(&floor) && (1..=SLOTS_PER_FLOOR).contains(&slot) {
            Some(Self { floor, slot })
        } else {
            None
        }
    }

    pub fn floor(&self) -> char {
        self.floor
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// L'univers complet des 60 clés, étage par étage, place 1 à 10.
    pub fn all() -> impl Iterator<Item = LocationCode> {
        FLOORS
            .iter()
            .flat_map(|&floor| (1..=SLOTS_PER_FLOOR).map(move |slot| LocationCode { floor, slot }))
    }
}

impl fmt::Display for LocationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.floor, self.slot)
    }
}

impl FromStr for LocationCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let floor = chars.next().ok_or(())?;
        let digits = chars.as_str();
        let slot: u8 = digits.parse().map_err(|_| ())?;
        // "A01" ou "A+1" ne sont pas des clés canoniques
        if digits != slot.to_string() {
            return Err(());
        }
        LocationCode::new(floor, slot).ok_or(())
    }
}

impl Serialize for LocationCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Étiquette de cycle de vie posée en amont sur un véhicule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Entering,
    Parked,
    Moving,
    Exiting,
    /// Étiquette absente ou inconnue, conservée telle quelle.
    Unknown(String),
}

impl SlotStatus {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "ENTERING" => SlotStatus::Entering,
            "PARKED" => SlotStatus::Parked,
            "MOVING" => SlotStatus::Moving,
            "EXITING" => SlotStatus::Exiting,
            _ => SlotStatus::Unknown(tag.to_string()),
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            SlotStatus::Entering => "ENTERING",
            SlotStatus::Parked => "PARKED",
            SlotStatus::Moving => "MOVING",
            SlotStatus::Exiting => "EXITING",
            SlotStatus::Unknown(tag) => tag,
        }
    }

    pub fn is_parked(&self) -> bool {
        matches!(self, SlotStatus::Parked)
    }
}

impl Default for SlotStatus {
    fn default() -> Self {
        SlotStatus::Unknown(String::new())
    }
}

/// Une place occupée. Remplacée en entier à chaque mise à jour, jamais rapiécée.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlotRecord {
    pub license_plate: Option<String>,
    pub status: SlotStatus,
    pub parked_duration_minutes: f64,
    pub parked_blocks: u64,
    pub total_cost: f64,
    pub parked_start_time: Option<String>,
    pub last_update: Option<String>,
}

pub type OccupancyMap = HashMap<LocationCode, SlotRecord>;

/// Compteurs agrégés, tels que calculés en amont.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_locations: u32,
    pub occupied_count: u32,
    pub available_count: u32,
    pub total_revenue: f64,
    pub messages_processed: u64,
}

impl Statistics {
    /// occupied + available == total
    pub fn is_consistent(&self) -> bool {
        self.occupied_count as u64 + self.available_count as u64 == self.total_locations as u64
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            total_locations: TOTAL_LOCATIONS,
            occupied_count: 0,
            available_count: TOTAL_LOCATIONS,
            total_revenue: 0.0,
            messages_processed: 0,
        }
    }
}

/// État canonique détenu par le store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParkingState {
    pub map: OccupancyMap,
    pub statistics: Statistics,
}

impl ParkingState {
    pub fn slot(&self, code: &LocationCode) -> Option<&SlotRecord> {
        self.map.get(code)
    }
}
