//! Modèles de vue dérivés d'une lecture du store.
//!
//! Tout ici est une fonction pure de son entrée : ni horloge, ni cache. La
//! durée affichée est celle calculée en amont.

use crate::config::Mode;
use crate::models::{LocationCode, ParkingState, SlotRecord, Statistics, FLOORS, TOTAL_LOCATIONS};
use serde::Serialize;

pub const PLATE_PLACEHOLDER: &str = "N/A";
pub const EMPTY_SLOT_TOOLTIP: &str = "Trống";
pub const EMPTY_LISTING_MESSAGE: &str = "Chưa có xe nào đang đỗ";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridView {
    pub floors: Vec<FloorRow>,
}

impl GridView {
    pub fn cells(&self) -> impl Iterator<Item = &GridCell> {
        self.floors.iter().flat_map(|floor| floor.cells.iter())
    }

    pub fn cell(&self, code: &LocationCode) -> Option<&GridCell> {
        self.cells().find(|cell| cell.location == *code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloorRow {
    pub floor: char,
    /// "Tầng A"
    pub title: String,
    pub cells: Vec<GridCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridCell {
    pub location: LocationCode,
    pub occupied: bool,
    /// Présent seulement si la place est occupée.
    pub vehicle: Option<CellVehicle>,
    pub tooltip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellVehicle {
    pub license_plate: String,
    pub duration: String,
    /// "1.500.000 đ"
    pub cost: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingView {
    pub rows: Vec<ListingRow>,
}

impl ListingView {
    /// Texte à afficher à la place d'un tableau vide.
    pub fn empty_message(&self) -> Option<&'static str> {
        self.rows.is_empty().then_some(EMPTY_LISTING_MESSAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingRow {
    pub location: LocationCode,
    pub license_plate: String,
    pub duration: String,
    pub blocks: u64,
    /// Montant groupé, sans suffixe (l'en-tête de colonne porte "VNĐ").
    pub cost: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsPanel {
    pub total_locations: u32,
    pub occupied_count: u32,
    pub available_count: u32,
    /// "80.000 VNĐ"
    pub revenue: String,
    pub messages_processed: u64,
    /// Statistiques cohérentes entre elles et avec la taille de la map.
    pub consistent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBar {
    pub connected: bool,
    pub connection_label: &'static str,
    pub mode_label: &'static str,
}

pub fn grid_view(state: &ParkingState) -> GridView {
    let floors = FLOORS
        .iter()
        .map(|&floor| FloorRow {
            floor,
            title: format!("Tầng {floor}"),
            cells: LocationCode::all()
                .filter(|code| code.floor() == floor)
                .map(|code| grid_cell(code, state.slot(&code)))
                .collect(),
        })
        .collect();
    GridView { floors }
}

fn grid_cell(location: LocationCode, record: Option<&SlotRecord>) -> GridCell {
    match record {
        Some(record) => {
            let plate = plate_label(record);
            let duration = format_duration(record.parked_duration_minutes);
            let amount = format_currency(record.total_cost);
            GridCell {
                location,
                occupied: true,
                tooltip: format!("{plate} - {duration} - {amount} VNĐ"),
                vehicle: Some(CellVehicle {
                    license_plate: plate,
                    duration,
                    cost: format!("{amount} đ"),
                }),
            }
        }
        None => GridCell {
            location,
            occupied: false,
            vehicle: None,
            tooltip: EMPTY_SLOT_TOOLTIP.to_string(),
        },
    }
}

/// Véhicules garés uniquement, triés sur la chaîne brute ("A10" < "A2").
pub fn listing_view(state: &ParkingState) -> ListingView {
    let mut rows: Vec<(String, ListingRow)> = state
        .map
        .iter()
        .filter(|(_, record)| record.status.is_parked())
        .map(|(code, record)| {
            let row = ListingRow {
                location: *code,
                license_plate: plate_label(record),
                duration: format_duration(record.parked_duration_minutes),
                blocks: record.parked_blocks,
                cost: format_currency(record.total_cost),
            };
            (code.to_string(), row)
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    ListingView { rows: rows.into_iter().map(|(_, row)| row).collect() }
}

pub fn stats_panel(state: &ParkingState) -> StatsPanel {
    let stats = &state.statistics;
    StatsPanel {
        total_locations: stats.total_locations,
        occupied_count: stats.occupied_count,
        available_count: stats.available_count,
        revenue: format!("{} VNĐ", format_currency(stats.total_revenue)),
        messages_processed: stats.messages_processed,
        consistent: cross_check(stats, state.map.len()),
    }
}

/// Statistiques cohérentes et égales au nombre de places présentes.
pub fn cross_check(stats: &Statistics, mapped: usize) -> bool {
    stats.is_consistent()
        && stats.total_locations == TOTAL_LOCATIONS
        && stats.occupied_count as usize == mapped
}

pub fn status_bar(connected: bool, mode: Mode) -> StatusBar {
    StatusBar {
        connected,
        connection_label: if connected { "Đã kết nối" } else { "Chưa kết nối" },
        mode_label: match mode {
            Mode::Local => "Local",
            Mode::Distributed => "Distributed",
        },
    }
}

fn plate_label(record: &SlotRecord) -> String {
    record
        .license_plate
        .clone()
        .unwrap_or_else(|| PLATE_PLACEHOLDER.to_string())
}

/// "45 phút" sous l'heure, "2h 5 phút" au-delà. Minutes arrondies au demi supérieur.
pub fn format_duration(minutes: f64) -> String {
    let minutes = if minutes.is_finite() { minutes.max(0.0) } else { 0.0 };
    if minutes < 60.0 {
        return format!("{} phút", round_half_up(minutes));
    }
    let hours = (minutes / 60.0).floor() as u64;
    let rest = round_half_up(minutes % 60.0);
    format!("{hours}h {rest} phút")
}

/// Groupement vi-VN : "." entre milliers, "," avant trois décimales au plus.
pub fn format_currency(amount: f64) -> String {
    if !amount.is_finite() {
        return "0".to_string();
    }
    let scaled = (amount.abs() * 1000.0).round() as u128;
    let (whole, fraction) = (scaled / 1000, scaled % 1000);

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if fraction > 0 {
        let decimals = format!("{fraction:03}");
        grouped.push(',');
        grouped.push_str(decimals.trim_end_matches('0'));
    }
    if amount < 0.0 && scaled > 0 {
        grouped.insert(0, '-');
    }
    grouped
}

fn round_half_up(value: f64) -> u64 {
    (value + 0.5).floor() as u64
}
