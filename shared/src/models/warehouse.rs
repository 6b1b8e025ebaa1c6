//! Warehouse layouts and the map elements drawn on their canvas

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::DomainError;
use crate::validation::{
    normalize_identifier, normalize_rotation, validate_canvas, validate_coordinate,
    validate_dimension,
};

/// Version written into, and required from, map documents
pub const MAP_DOCUMENT_VERSION: u32 = 1;

pub const DEFAULT_CANVAS_WIDTH: i32 = 1200;
pub const DEFAULT_CANVAS_HEIGHT: i32 = 800;

/// Kind of element drawn on a warehouse map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Shelf,
    Pallet,
    Wall,
    Label,
    AddressMarker,
    Line,
    Door,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Shelf => "shelf",
            ElementKind::Pallet => "pallet",
            ElementKind::Wall => "wall",
            ElementKind::Label => "label",
            ElementKind::AddressMarker => "address_marker",
            ElementKind::Line => "line",
            ElementKind::Door => "door",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "shelf" => Some(ElementKind::Shelf),
            "pallet" => Some(ElementKind::Pallet),
            "wall" => Some(ElementKind::Wall),
            "label" => Some(ElementKind::Label),
            "address_marker" => Some(ElementKind::AddressMarker),
            "line" => Some(ElementKind::Line),
            "door" => Some(ElementKind::Door),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseLayout {
    pub id: Uuid,
    pub number: i32,
    pub name: String,
    pub canvas_width: i32,
    pub canvas_height: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Geometry and content of one element, independent of its storage id.
///
/// Field order is the order of the map document format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub kind: ElementKind,
    pub identifier: Option<String>,
    pub pos_x: f64,
    pub pos_y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub z_order: i32,
    pub text_content: Option<String>,
    pub style: Option<serde_json::Value>,
}

impl ElementSpec {
    /// Capacity in kg configured under `style.capacity_kg`
    pub fn capacity_kg(&self) -> Option<Decimal> {
        self.style
            .as_ref()?
            .get("capacity_kg")?
            .as_f64()
            .and_then(|v| Decimal::try_from(v).ok())
            .filter(|v| *v > Decimal::ZERO)
    }

    /// Validate geometry and canonicalize identifier and rotation
    pub fn normalized(mut self) -> Result<Self, DomainError> {
        self.identifier = normalize_identifier(self.identifier.as_deref())
            .map_err(|m| DomainError::invalid("identifier", m))?;
        validate_coordinate(self.pos_x).map_err(|m| DomainError::invalid("pos_x", m))?;
        validate_coordinate(self.pos_y).map_err(|m| DomainError::invalid("pos_y", m))?;
        validate_dimension(self.width).map_err(|m| DomainError::invalid("width", m))?;
        validate_dimension(self.height).map_err(|m| DomainError::invalid("height", m))?;
        self.rotation =
            normalize_rotation(self.rotation).map_err(|m| DomainError::invalid("rotation", m))?;
        if let Some(style) = &self.style {
            if !style.is_object() && !style.is_null() {
                return Err(DomainError::invalid("style", "Style must be a JSON object"));
            }
        }
        if matches!(self.style, Some(serde_json::Value::Null)) {
            self.style = None;
        }
        Ok(self)
    }
}

/// A persisted map element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapElement {
    pub id: Uuid,
    pub warehouse_id: Uuid,
    #[serde(flatten)]
    pub spec: ElementSpec,
}

/// Validate and normalize a full scene before it replaces a warehouse's elements
pub fn normalize_scene(elements: Vec<ElementSpec>) -> Result<Vec<ElementSpec>, DomainError> {
    let mut seen = HashSet::new();
    elements
        .into_iter()
        .map(|element| {
            let element = element.normalized()?;
            if let Some(identifier) = &element.identifier {
                if !seen.insert(identifier.clone()) {
                    return Err(DomainError::invalid(
                        "identifier",
                        "Identifiers must be unique within a warehouse",
                    ));
                }
            }
            Ok(element)
        })
        .collect()
}

// ============================================================================
// Map Document (JSON export / import)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapWarehouse {
    pub number: i32,
    pub name: String,
    pub canvas_width: i32,
    pub canvas_height: i32,
}

/// Portable description of a warehouse and its whole scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDocument {
    pub warehouse: MapWarehouse,
    pub elements: Vec<ElementSpec>,
    pub version: u32,
}

impl MapDocument {
    /// Build an export document; elements are ordered by `(z_order, id)`
    pub fn export(layout: &WarehouseLayout, elements: &[MapElement]) -> Self {
        let mut ordered: Vec<&MapElement> = elements.iter().collect();
        ordered.sort_by(|a, b| {
            a.spec
                .z_order
                .cmp(&b.spec.z_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self {
            warehouse: MapWarehouse {
                number: layout.number,
                name: layout.name.clone(),
                canvas_width: layout.canvas_width,
                canvas_height: layout.canvas_height,
            },
            elements: ordered.into_iter().map(|e| e.spec.clone()).collect(),
            version: MAP_DOCUMENT_VERSION,
        }
    }

    /// Check version and header, and normalize the scene for import
    pub fn validated(self) -> Result<Self, DomainError> {
        if self.version != MAP_DOCUMENT_VERSION {
            return Err(DomainError::UnsupportedVersion(self.version));
        }
        if self.warehouse.number <= 0 {
            return Err(DomainError::invalid(
                "warehouse.number",
                "Warehouse number must be positive",
            ));
        }
        if self.warehouse.name.trim().is_empty() {
            return Err(DomainError::invalid(
                "warehouse.name",
                "Warehouse name is required",
            ));
        }
        validate_canvas(self.warehouse.canvas_width, self.warehouse.canvas_height)
            .map_err(|m| DomainError::invalid("warehouse.canvas", m))?;
        let elements = normalize_scene(self.elements)?;
        Ok(Self {
            warehouse: MapWarehouse {
                name: self.warehouse.name.trim().to_string(),
                ..self.warehouse
            },
            elements,
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shelf(identifier: Option<&str>, z_order: i32) -> ElementSpec {
        ElementSpec {
            kind: ElementKind::Shelf,
            identifier: identifier.map(str::to_string),
            pos_x: 10.0,
            pos_y: 20.0,
            width: 100.0,
            height: 40.0,
            rotation: 0.0,
            z_order,
            text_content: None,
            style: None,
        }
    }

    #[test]
    fn test_element_serializes_in_document_order() {
        let text = serde_json::to_string(&shelf(Some("P-01-02-03"), 1)).unwrap();
        assert_eq!(
            text,
            r#"{"kind":"shelf","identifier":"P-01-02-03","pos_x":10.0,"pos_y":20.0,"width":100.0,"height":40.0,"rotation":0.0,"z_order":1,"text_content":null,"style":null}"#
        );
    }

    #[test]
    fn test_document_key_order() {
        let now = Utc::now();
        let layout = WarehouseLayout {
            id: Uuid::new_v4(),
            number: 2,
            name: "Armazém 2".into(),
            canvas_width: 1200,
            canvas_height: 800,
            active: true,
            created_at: now,
            updated_at: now,
        };
        let doc = MapDocument::export(&layout, &[]);
        let text = serde_json::to_string(&doc).unwrap();
        assert!(text.starts_with(r#"{"warehouse":{"number":2,"name":"Armazém 2","canvas_width":1200,"canvas_height":800},"elements":[]"#));
        assert!(text.ends_with(r#""version":1}"#));
    }

    #[test]
    fn test_scene_rejects_duplicate_identifiers_after_normalizing() {
        let scene = vec![shelf(Some("p-01"), 0), shelf(Some("P-01 "), 1)];
        assert!(normalize_scene(scene).is_err());
    }

    #[test]
    fn test_scene_allows_many_unnamed_elements() {
        let scene = vec![shelf(None, 0), shelf(Some(""), 1), shelf(None, 2)];
        let normalized = normalize_scene(scene).unwrap();
        assert!(normalized.iter().all(|e| e.identifier.is_none()));
    }

    #[test]
    fn test_rotation_is_normalized() {
        let mut element = shelf(None, 0);
        element.rotation = -45.0;
        assert_eq!(element.normalized().unwrap().rotation, 315.0);
    }

    #[test]
    fn test_capacity_from_style() {
        let mut element = shelf(Some("P-01"), 0);
        assert_eq!(element.capacity_kg(), None);
        element.style = Some(json!({"capacity_kg": 12000, "fill": "#ccc"}));
        assert_eq!(element.capacity_kg(), Some(Decimal::new(12000, 0)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let doc = MapDocument {
            warehouse: MapWarehouse {
                number: 1,
                name: "A".into(),
                canvas_width: 100,
                canvas_height: 100,
            },
            elements: vec![],
            version: 2,
        };
        assert_eq!(doc.validated(), Err(DomainError::UnsupportedVersion(2)));
    }
}
