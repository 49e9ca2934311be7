//! Physical item instances and the system-wide identity registry.
//!
//! Serial numbers and serial-unit codes are unique across the entire system,
//! not per request. The registry indexes both and is consulted by every
//! receiving operation.
//!
//! Status and location changes go through the registry, which appends one
//! [`UnitMovement`] per change. The trail is never rewritten.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use assetflow_core::{Actor, RoomId, Stamp, UnitId, WarehouseId, define_id};

use crate::catalog::CatalogItemId;

define_id!(
    /// Identifier of one physical unit.
    InstanceId,
    "InstanceId"
);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    Processing,
    #[serde(rename = "used")]
    InUse,
    Maintenance,
    Returned,
    Loaned,
}

impl core::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ItemStatus::Available => "available",
            ItemStatus::Processing => "processing",
            ItemStatus::InUse => "used",
            ItemStatus::Maintenance => "maintenance",
            ItemStatus::Returned => "returned",
            ItemStatus::Loaned => "loaned",
        };
        f.write_str(s)
    }
}

/// Where a unit currently is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    Warehouse { warehouse: WarehouseId },
    Unit { unit: UnitId, room: Option<RoomId> },
}

impl Location {
    pub fn warehouse(&self) -> Option<WarehouseId> {
        match self {
            Location::Warehouse { warehouse } => Some(*warehouse),
            Location::Unit { .. } => None,
        }
    }

    pub fn room(&self) -> Option<RoomId> {
        match self {
            Location::Unit { room, .. } => *room,
            Location::Warehouse { .. } => None,
        }
    }
}

/// Result of binding an instance to a warehouse at completion time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Was unplaced, now in the warehouse.
    Bound,
    /// Already in the same warehouse.
    AlreadyBound,
    /// Placed somewhere else; left untouched.
    Conflict(Location),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInstance {
    id: InstanceId,
    serial_number: Option<String>,
    serial_unit: String,
    catalog_item: Option<CatalogItemId>,
    status: ItemStatus,
    location: Option<Location>,
    created_at: DateTime<Utc>,
}

impl ItemInstance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn serial_unit(&self) -> &str {
        &self.serial_unit
    }

    pub fn catalog_item(&self) -> Option<CatalogItemId> {
        self.catalog_item
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn set_status(&mut self, status: ItemStatus) -> ItemStatus {
        core::mem::replace(&mut self.status, status)
    }

    pub fn relocate(&mut self, location: Location) {
        self.location = Some(location);
    }

    /// Record which catalog item this unit is, once the item type is known.
    pub fn assign_catalog_item(&mut self, item: CatalogItemId) {
        self.catalog_item = Some(item);
    }

    /// Place an unplaced unit in `warehouse`; idempotent for the same warehouse.
    pub fn bind_warehouse(&mut self, warehouse: WarehouseId) -> Binding {
        match self.location {
            None => {
                self.location = Some(Location::Warehouse { warehouse });
                Binding::Bound
            }
            Some(Location::Warehouse { warehouse: w }) if w == warehouse => Binding::AlreadyBound,
            Some(other) => Binding::Conflict(other),
        }
    }
}

/// One change of a unit's status or whereabouts.
///
/// `status_before` is `None` for the entry written at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMovement {
    pub instance: InstanceId,
    pub serial_unit: String,
    pub from: Option<Location>,
    pub to: Option<Location>,
    pub status_before: Option<ItemStatus>,
    pub status_after: ItemStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,
    pub note: String,
}

/// A unit about to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstance {
    pub serial_number: Option<String>,
    pub serial_unit: String,
    pub catalog_item: Option<CatalogItemId>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("serial number {0} already exists")]
    DuplicateSerial(String),

    #[error("serial unit {0} already exists")]
    DuplicateSerialUnit(String),

    #[error("item instance {0} not found")]
    UnknownInstance(InstanceId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceRegistry {
    instances: BTreeMap<InstanceId, ItemInstance>,
    by_serial: HashMap<String, InstanceId>,
    by_serial_unit: HashMap<String, InstanceId>,
    movements: Vec<UnitMovement>,
    next_id: u64,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, id: InstanceId) -> Option<&ItemInstance> {
        self.instances.get(&id)
    }

    fn get_mut(&mut self, id: InstanceId) -> Result<&mut ItemInstance, RegistryError> {
        self.instances
            .get_mut(&id)
            .ok_or(RegistryError::UnknownInstance(id))
    }

    /// Change one unit through `f` and log the change, if any.
    ///
    /// Identity fields have no setters, so the indexes stay valid.
    pub fn update<R>(
        &mut self,
        id: InstanceId,
        stamp: Stamp,
        note: impl Into<String>,
        f: impl FnOnce(&mut ItemInstance) -> R,
    ) -> Result<R, RegistryError> {
        let unit = self.get_mut(id)?;
        let (status_before, from) = (unit.status, unit.location);
        let value = f(unit);

        if unit.status != status_before || unit.location != from {
            let movement = UnitMovement {
                instance: id,
                serial_unit: unit.serial_unit.clone(),
                from,
                to: unit.location,
                status_before: Some(status_before),
                status_after: unit.status,
                actor: stamp.actor,
                at: stamp.at,
                note: note.into(),
            };
            self.movements.push(movement);
        }
        Ok(value)
    }

    /// Every logged movement, oldest first.
    pub fn movements(&self) -> &[UnitMovement] {
        &self.movements
    }

    /// Movement trail of one unit, oldest first.
    pub fn history(&self, id: InstanceId) -> impl Iterator<Item = &UnitMovement> {
        self.movements.iter().filter(move |m| m.instance == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemInstance> {
        self.instances.values()
    }

    pub fn contains_serial(&self, serial: &str) -> bool {
        self.by_serial.contains_key(serial)
    }

    pub fn contains_serial_unit(&self, code: &str) -> bool {
        self.by_serial_unit.contains_key(code)
    }

    pub fn find_by_serial(&self, serial: &str) -> Option<&ItemInstance> {
        self.by_serial.get(serial).and_then(|id| self.instances.get(id))
    }

    pub fn find_by_serial_unit(&self, code: &str) -> Option<&ItemInstance> {
        self.by_serial_unit
            .get(code)
            .and_then(|id| self.instances.get(id))
    }

    pub fn id_for_serial_unit(&self, code: &str) -> Option<InstanceId> {
        self.by_serial_unit.get(code).copied()
    }

    /// Units currently placed in `room`, in id order.
    pub fn in_room(&self, room: RoomId) -> impl Iterator<Item = &ItemInstance> {
        self.instances
            .values()
            .filter(move |i| i.location.and_then(|l| l.room()) == Some(room))
    }

    pub fn set_status(
        &mut self,
        id: InstanceId,
        status: ItemStatus,
        stamp: Stamp,
        note: impl Into<String>,
    ) -> Result<ItemStatus, RegistryError> {
        self.update(id, stamp, note, |unit| unit.set_status(status))
    }

    /// First identity conflict `batch` would cause, checked against the
    /// registry and within the batch itself.
    pub fn check_batch(&self, batch: &[NewInstance]) -> Result<(), RegistryError> {
        let mut serials = HashSet::new();
        let mut units = HashSet::new();

        for new in batch {
            if let Some(serial) = &new.serial_number {
                if self.contains_serial(serial) || !serials.insert(serial.as_str()) {
                    return Err(RegistryError::DuplicateSerial(serial.clone()));
                }
            }
            if self.contains_serial_unit(&new.serial_unit) || !units.insert(new.serial_unit.as_str())
            {
                return Err(RegistryError::DuplicateSerialUnit(new.serial_unit.clone()));
            }
        }
        Ok(())
    }

    /// Register every unit of `batch` or none of them.
    ///
    /// New instances start `available` and unplaced.
    pub fn register_batch(
        &mut self,
        batch: Vec<NewInstance>,
        stamp: Stamp,
        note: &str,
    ) -> Result<Vec<InstanceId>, RegistryError> {
        self.check_batch(&batch)?;

        let mut ids = Vec::with_capacity(batch.len());
        for new in batch {
            self.next_id += 1;
            let id = InstanceId::new(self.next_id);

            if let Some(serial) = &new.serial_number {
                self.by_serial.insert(serial.clone(), id);
            }
            self.by_serial_unit.insert(new.serial_unit.clone(), id);
            self.movements.push(UnitMovement {
                instance: id,
                serial_unit: new.serial_unit.clone(),
                from: None,
                to: None,
                status_before: None,
                status_after: ItemStatus::Available,
                actor: stamp.actor,
                at: stamp.at,
                note: note.to_string(),
            });
            self.instances.insert(
                id,
                ItemInstance {
                    id,
                    serial_number: new.serial_number,
                    serial_unit: new.serial_unit,
                    catalog_item: new.catalog_item,
                    status: ItemStatus::Available,
                    location: None,
                    created_at: stamp.at,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }
}
