//! WebAssembly module for the Seed Warehouse canvas client
//!
//! Provides client-side computation for:
//! - Address normalization while typing
//! - Map document validation before upload
//! - Occupancy colouring of map elements
//! - Empenho previews against a stock snapshot

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::simulation::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    web_sys::console::debug_1(&JsValue::from_str("seed warehouse wasm ready"));
}

fn js_error(context: &str, err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{}: {}", context, err))
}

/// Normalize a warehouse address the way the server stores it
#[wasm_bindgen]
pub fn normalize_warehouse_address(raw: &str) -> Result<String, JsValue> {
    normalize_address(raw).map_err(JsValue::from_str)
}

/// SC equivalent of a quantity in the given packaging ("BAG" or "SC")
#[wasm_bindgen]
pub fn sc_equivalent(packaging: &str, quantity: f64) -> Result<f64, JsValue> {
    let packaging = Packaging::parse(&packaging.trim().to_uppercase())
        .ok_or_else(|| JsValue::from_str("Packaging must be BAG or SC"))?;
    Ok(quantity * packaging.sc_factor() as f64)
}

/// Status of one address, for colouring an element while editing
#[wasm_bindgen]
pub fn address_status(
    total_balance: f64,
    lot_count: f64,
    total_weight: f64,
    capacity_kg: Option<f64>,
) -> String {
    let weight = rust_decimal::Decimal::try_from(total_weight).unwrap_or_default();
    let capacity = capacity_kg.and_then(|c| rust_decimal::Decimal::try_from(c).ok());
    let status = occupancy_status(total_balance as i64, lot_count as i64, weight, capacity);
    status.as_str().to_string()
}

/// Validate and normalize a map document; returns the normalized JSON
#[wasm_bindgen]
pub fn validate_map_document(document_json: &str) -> Result<String, JsValue> {
    let document: MapDocument = serde_json::from_str(document_json)
        .map_err(|e| js_error("Invalid map document JSON", e))?;
    let document = document
        .validated()
        .map_err(|e| js_error("Invalid map document", e))?;
    serde_json::to_string(&document).map_err(|e| js_error("Serialization failed", e))
}

/// Resolve element occupancy from elements and per-address aggregates (both JSON arrays)
#[wasm_bindgen]
pub fn resolve_map_occupancy(elements_json: &str, balances_json: &str) -> Result<String, JsValue> {
    let elements: Vec<MapElement> = serde_json::from_str(elements_json)
        .map_err(|e| js_error("Invalid elements JSON", e))?;
    let balances: Vec<AddressBalance> = serde_json::from_str(balances_json)
        .map_err(|e| js_error("Invalid balances JSON", e))?;
    let occupancy = resolve_occupancy(&elements, &balances);
    serde_json::to_string(&occupancy).map_err(|e| js_error("Serialization failed", e))
}

/// Result of replaying an empenho against a stock snapshot
#[derive(Debug, Serialize)]
pub struct EmpenhoPreview {
    pub stocks: Vec<Stock>,
    pub movements: Vec<SimulatedMovement>,
    pub total_balance: i64,
}

fn preview(
    stocks: Vec<Stock>,
    kind: &str,
    items: &[PlannedItem],
    now: DateTime<Utc>,
) -> Result<EmpenhoPreview, String> {
    let kind = MovementKind::parse(kind).ok_or_else(|| format!("Unknown movement kind {}", kind))?;
    let mut ledger = LedgerSimulation::new(stocks, Uuid::nil(), now);
    ledger.apply_empenho(kind, items).map_err(|e| e.to_string())?;
    Ok(EmpenhoPreview {
        total_balance: ledger.total_balance(),
        stocks: ledger.stocks().to_vec(),
        movements: ledger.movements().to_vec(),
    })
}

/// Preview what executing an empenho would do to the given stock rows
#[wasm_bindgen]
pub fn preview_empenho(stocks_json: &str, kind: &str, items_json: &str) -> Result<String, JsValue> {
    let stocks: Vec<Stock> =
        serde_json::from_str(stocks_json).map_err(|e| js_error("Invalid stocks JSON", e))?;
    let items: Vec<PlannedItem> =
        serde_json::from_str(items_json).map_err(|e| js_error("Invalid items JSON", e))?;
    let now = Utc
        .timestamp_millis_opt(js_sys::Date::now() as i64)
        .single()
        .ok_or_else(|| JsValue::from_str("Clock out of range"))?;

    let result = preview(stocks, kind, &items, now).map_err(|e| JsValue::from_str(&e))?;
    serde_json::to_string(&result).map_err(|e| js_error("Serialization failed", e))
}
