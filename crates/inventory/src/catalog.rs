//! Catalog of item types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use assetflow_core::{DomainError, DomainResult, define_id};

define_id!(
    /// Identifier of a catalog item (an item *type*, not a physical unit).
    CatalogItemId,
    "CatalogItemId"
);

/// Description of an item type not yet present in the catalog.
///
/// A procurement line may reference one of these until somebody registers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItemDescriptor {
    pub name: String,
    /// Category code used to derive the item code (e.g. `NET` -> `NET-004`).
    pub category_code: Option<String>,
    pub unit: String,
    pub requires_serial: bool,
}

impl NewItemDescriptor {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category_code: None,
            unit: unit.into(),
            requires_serial: false,
        }
    }

    pub fn with_category(mut self, code: impl Into<String>) -> Self {
        self.category_code = Some(code.into());
        self
    }

    pub fn with_serial_required(mut self, required: bool) -> Self {
        self.requires_serial = required;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    id: CatalogItemId,
    item_code: String,
    name: String,
    unit: String,
    requires_serial: bool,
}

impl CatalogItem {
    pub fn id(&self) -> CatalogItemId {
        self.id
    }

    pub fn item_code(&self) -> &str {
        &self.item_code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Whether callers must supply one serial number per received unit.
    pub fn requires_serial(&self) -> bool {
        self.requires_serial
    }
}

const FALLBACK_PREFIX: &str = "NEW";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    items: BTreeMap<CatalogItemId, CatalogItem>,
    next_id: u64,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: CatalogItemId) -> Option<&CatalogItem> {
        self.items.get(&id)
    }

    pub fn find_by_code(&self, code: &str) -> Option<&CatalogItem> {
        self.items.values().find(|i| i.item_code == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Next free code for a category: `PREFIX-001`, `PREFIX-002`, ...
    ///
    /// Items without a category code share the `NEW` prefix.
    pub fn next_item_code(&self, category_code: Option<&str>) -> String {
        let prefix = category_code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_uppercase)
            .unwrap_or_else(|| FALLBACK_PREFIX.to_string());

        let last = self
            .items
            .values()
            .filter_map(|i| i.item_code.strip_prefix(&prefix)?.strip_prefix('-'))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0);

        format!("{prefix}-{:03}", last + 1)
    }

    /// Register a new item type and return its id.
    pub fn register(&mut self, descriptor: &NewItemDescriptor) -> DomainResult<CatalogItemId> {
        let name = descriptor.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("catalog item name cannot be empty"));
        }
        if descriptor.unit.trim().is_empty() {
            return Err(DomainError::validation("catalog item unit cannot be empty"));
        }

        let item_code = self.next_item_code(descriptor.category_code.as_deref());
        self.next_id += 1;
        let id = CatalogItemId::new(self.next_id);

        self.items.insert(
            id,
            CatalogItem {
                id,
                item_code,
                name: name.to_string(),
                unit: descriptor.unit.trim().to_string(),
                requires_serial: descriptor.requires_serial,
            },
        );
        Ok(id)
    }
}
