//! Movement history: the append-only trail of every ledger mutation
//!
//! Descriptions are short HTML fragments meant for display; anything that
//! came from an operator is escaped before it is embedded. The structured
//! fields (`movement_type`, `quantity`, `empenho_id`) carry the semantics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::StockView;
use crate::validation::escape_html;

/// Kind of movement recorded in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    EntryInitial,
    EntrySum,
    TransferOut,
    TransferIn,
    TransferInSum,
    Exit,
    Edit,
    Exclusion,
    EmpenhoEntryInitial,
    EmpenhoEntrySum,
    EmpenhoTransferOut,
    EmpenhoTransferIn,
    EmpenhoTransferInSum,
    EmpenhoExit,
}

/// How a movement affects the `entries`/`exits` counters of its stock row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityEffect {
    Entry,
    Exit,
    None,
}

impl MovementType {
    pub const ALL: [MovementType; 14] = [
        MovementType::EntryInitial,
        MovementType::EntrySum,
        MovementType::TransferOut,
        MovementType::TransferIn,
        MovementType::TransferInSum,
        MovementType::Exit,
        MovementType::Edit,
        MovementType::Exclusion,
        MovementType::EmpenhoEntryInitial,
        MovementType::EmpenhoEntrySum,
        MovementType::EmpenhoTransferOut,
        MovementType::EmpenhoTransferIn,
        MovementType::EmpenhoTransferInSum,
        MovementType::EmpenhoExit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::EntryInitial => "ENTRY_INITIAL",
            MovementType::EntrySum => "ENTRY_SUM",
            MovementType::TransferOut => "TRANSFER_OUT",
            MovementType::TransferIn => "TRANSFER_IN",
            MovementType::TransferInSum => "TRANSFER_IN_SUM",
            MovementType::Exit => "EXIT",
            MovementType::Edit => "EDIT",
            MovementType::Exclusion => "EXCLUSION",
            MovementType::EmpenhoEntryInitial => "EMPENHO_ENTRY_INITIAL",
            MovementType::EmpenhoEntrySum => "EMPENHO_ENTRY_SUM",
            MovementType::EmpenhoTransferOut => "EMPENHO_TRANSFER_OUT",
            MovementType::EmpenhoTransferIn => "EMPENHO_TRANSFER_IN",
            MovementType::EmpenhoTransferInSum => "EMPENHO_TRANSFER_IN_SUM",
            MovementType::EmpenhoExit => "EMPENHO_EXIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// The `EMPENHO_` variant of a ledger movement, used when an empenho executes it
    pub fn for_empenho(self) -> Self {
        match self {
            MovementType::EntryInitial => MovementType::EmpenhoEntryInitial,
            MovementType::EntrySum => MovementType::EmpenhoEntrySum,
            MovementType::TransferOut => MovementType::EmpenhoTransferOut,
            MovementType::TransferIn => MovementType::EmpenhoTransferIn,
            MovementType::TransferInSum => MovementType::EmpenhoTransferInSum,
            MovementType::Exit => MovementType::EmpenhoExit,
            other => other,
        }
    }

    /// Pick the plain or `EMPENHO_` variant depending on whether an empenho is executing
    pub fn tagged(self, empenho_id: Option<Uuid>) -> Self {
        if empenho_id.is_some() {
            self.for_empenho()
        } else {
            self
        }
    }

    pub fn effect(&self) -> QuantityEffect {
        match self {
            MovementType::EntryInitial
            | MovementType::EntrySum
            | MovementType::TransferIn
            | MovementType::TransferInSum
            | MovementType::EmpenhoEntryInitial
            | MovementType::EmpenhoEntrySum
            | MovementType::EmpenhoTransferIn
            | MovementType::EmpenhoTransferInSum => QuantityEffect::Entry,
            MovementType::TransferOut
            | MovementType::Exit
            | MovementType::EmpenhoTransferOut
            | MovementType::EmpenhoExit => QuantityEffect::Exit,
            MovementType::Edit | MovementType::Exclusion => QuantityEffect::None,
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only history row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovementHistory {
    pub id: Uuid,
    pub seq: i64,
    pub stock_id: Option<Uuid>,
    pub lot_ref: String,
    pub user_id: Uuid,
    pub username: Option<String>,
    pub movement_type: MovementType,
    pub quantity: Option<i64>,
    pub description: String,
    pub empenho_id: Option<Uuid>,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// Canonical byte string covered by a history checksum
pub fn checksum_payload(
    movement_type: MovementType,
    description: &str,
    created_at: DateTime<Utc>,
    user_id: Uuid,
) -> String {
    format!(
        "{}|{}|{}|{}",
        movement_type.as_str(),
        description,
        created_at.timestamp_micros(),
        user_id
    )
}

/// Replay history quantities into `(entries, exits)` for one stock row
pub fn replay_quantities<I>(rows: I) -> (i64, i64)
where
    I: IntoIterator<Item = (MovementType, Option<i64>)>,
{
    rows.into_iter()
        .fold((0, 0), |(entries, exits), (movement_type, quantity)| {
            let quantity = quantity.unwrap_or(0);
            match movement_type.effect() {
                QuantityEffect::Entry => (entries + quantity, exits),
                QuantityEffect::Exit => (entries, exits + quantity),
                QuantityEffect::None => (entries, exits),
            }
        })
}

// ============================================================================
// Descriptions
// ============================================================================

pub mod describe {
    //! Builders for the operator-facing history descriptions

    use super::*;

    fn empenho_suffix(empenho_id: Option<Uuid>) -> String {
        match empenho_id {
            Some(id) => format!(" (Empenho <b>{}</b>)", short_id(id)),
            None => String::new(),
        }
    }

    /// First block of a UUID, enough to recognise an empenho in the trail
    pub fn short_id(id: Uuid) -> String {
        id.simple().to_string()[..8].to_uppercase()
    }

    pub fn entry_initial(quantity: i64, address: &str, empenho_id: Option<Uuid>) -> String {
        format!(
            "Entrada de <b>{}</b> no endereço <b>{}</b>.{}",
            quantity,
            escape_html(address),
            empenho_suffix(empenho_id)
        )
    }

    pub fn entry_sum(quantity: i64, new_balance: i64, empenho_id: Option<Uuid>) -> String {
        format!(
            "Adicionado <b>{}</b> unid. (Saldo atual: {}){}",
            quantity,
            new_balance,
            empenho_suffix(empenho_id)
        )
    }

    pub fn transfer_out(quantity: i64, destination: &str, empenho_id: Option<Uuid>) -> String {
        format!(
            "Enviado <b>{}</b> para <b>{}</b>.{}",
            quantity,
            escape_html(destination),
            empenho_suffix(empenho_id)
        )
    }

    pub fn transfer_in(quantity: i64, source_address: &str, empenho_id: Option<Uuid>) -> String {
        format!(
            "Recebido <b>{}</b> de <b>{}</b>.{}",
            quantity,
            escape_html(source_address),
            empenho_suffix(empenho_id)
        )
    }

    pub fn exit(quantity: i64, reason: Option<&str>, empenho_id: Option<Uuid>) -> String {
        let mut text = format!("Saída de <b>{}</b> unid.", quantity);
        if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
            text.push_str("<br>Motivo: ");
            text.push_str(&escape_html(reason));
        }
        text.push_str(&empenho_suffix(empenho_id));
        text
    }

    pub fn exclusion(lot: &str, address: &str) -> String {
        format!(
            "Lote <b>{}</b> do endereço <b>{}</b> foi excluído.",
            escape_html(lot),
            escape_html(address)
        )
    }

    /// `lot_ref` kept on the exclusion row once the stock is gone
    pub fn deleted_lot_ref(lot: &str) -> String {
        format!("{} (deleted)", lot)
    }

    pub fn edit(changes: &[String]) -> String {
        if changes.is_empty() {
            "Salvo sem alterações visíveis.".to_string()
        } else {
            format!("Alterações:<br>{}", changes.join("<br>"))
        }
    }
}

// ============================================================================
// Edit Diff
// ============================================================================

/// Display values of a stock row, compared before and after an edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub lot: String,
    pub address: String,
    pub product: String,
    pub cultivar: String,
    pub screen: String,
    pub category: String,
    pub treatment: Option<String>,
    pub species: Option<String>,
    pub packaging: String,
    pub unit_weight: Decimal,
    pub company: String,
    pub origin_destination: String,
    pub az: String,
    pub client: String,
    pub observation: Option<String>,
}

impl From<&StockView> for StockSnapshot {
    fn from(view: &StockView) -> Self {
        let attrs = &view.stock.attributes;
        Self {
            lot: attrs.lot.clone(),
            address: view.stock.address.clone(),
            product: attrs.product.clone(),
            cultivar: view.cultivar_name.clone(),
            screen: view.screen_name.clone(),
            category: view.category_name.clone(),
            treatment: view.treatment_name.clone(),
            species: view.species_name.clone(),
            packaging: attrs.packaging.as_str().to_string(),
            unit_weight: attrs.unit_weight,
            company: attrs.company.clone(),
            origin_destination: attrs.origin_destination.clone(),
            az: attrs.az.clone(),
            client: attrs.client.clone(),
            observation: attrs.observation.clone(),
        }
    }
}

fn field_change(label: &str, old: &str, new: &str) -> Option<String> {
    (old != new).then(|| {
        format!(
            "{}: {} -&gt; <b>{}</b>",
            label,
            escape_html(old),
            escape_html(new)
        )
    })
}

fn optional_text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

/// One line per changed field, in a fixed field order
pub fn describe_changes(old: &StockSnapshot, new: &StockSnapshot) -> Vec<String> {
    let mut changes: Vec<String> = [
        field_change("Lote", &old.lot, &new.lot),
        field_change("Endereço", &old.address, &new.address),
        field_change("Produto", &old.product, &new.product),
        field_change("Cultivar", &old.cultivar, &new.cultivar),
        field_change("Peneira", &old.screen, &new.screen),
        field_change("Categoria", &old.category, &new.category),
        field_change(
            "Tratamento",
            optional_text(&old.treatment),
            optional_text(&new.treatment),
        ),
        field_change(
            "Espécie",
            optional_text(&old.species),
            optional_text(&new.species),
        ),
        field_change("Embalagem", &old.packaging, &new.packaging),
        field_change(
            "Peso unitário",
            &old.unit_weight.normalize().to_string(),
            &new.unit_weight.normalize().to_string(),
        ),
        field_change("AZ", &old.az, &new.az),
        field_change("Cliente", &old.client, &new.client),
    ]
    .into_iter()
    .flatten()
    .collect();

    // Free-text fields only note that they changed
    if old.company != new.company {
        changes.push("Empresa alterada.".to_string());
    }
    if old.origin_destination != new.origin_destination {
        changes.push("Origem/Destino alterado.".to_string());
    }
    if old.observation != new.observation {
        changes.push("Observação alterada.".to_string());
    }
    changes
}
