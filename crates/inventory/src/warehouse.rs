use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taller_core::{DomainError, DomainResult, WarehouseId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WarehouseKind {
    #[default]
    #[serde(rename = "almacen")]
    Storage,
    #[serde(rename = "deposito")]
    Depot,
    #[serde(rename = "taller")]
    Workshop,
    #[serde(rename = "otro")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WarehouseStatus {
    #[default]
    #[serde(rename = "activo")]
    Active,
    #[serde(rename = "inactivo")]
    Inactive,
}

/// Physical stock location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WarehouseKind,
    pub capacity: Option<i64>,
    pub location: Option<String>,
    pub status: WarehouseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWarehouse {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: WarehouseKind,
    #[serde(default)]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: WarehouseStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehousePatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<WarehouseKind>,
    pub capacity: Option<i64>,
    pub location: Option<String>,
    pub status: Option<WarehouseStatus>,
}

impl NewWarehouse {
    pub fn into_warehouse(self, id: WarehouseId, now: DateTime<Utc>) -> DomainResult<Warehouse> {
        let wh = Warehouse {
            id,
            name: self.name.trim().to_string(),
            kind: self.kind,
            capacity: self.capacity,
            location: self.location,
            status: self.status,
            created_at: now,
            updated_at: now,
        };
        wh.validate()?;
        Ok(wh)
    }
}

impl Warehouse {
    pub fn is_active(&self) -> bool {
        self.status == WarehouseStatus::Active
    }

    /// Case-insensitive name comparison used for the uniqueness rule.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }

    pub fn apply_patch(&mut self, patch: WarehousePatch, now: DateTime<Utc>) -> DomainResult<()> {
        let mut next = self.clone();
        if let Some(name) = patch.name {
            next.name = name.trim().to_string();
        }
        if let Some(kind) = patch.kind {
            next.kind = kind;
        }
        if patch.capacity.is_some() {
            next.capacity = patch.capacity;
        }
        if patch.location.is_some() {
            next.location = patch.location;
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        next.validate()?;
        next.updated_at = now;

        *self = next;
        Ok(())
    }

    fn validate(&self) -> DomainResult<()> {
        if self.name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if matches!(self.capacity, Some(c) if c < 0) {
            return Err(DomainError::validation("capacity cannot be negative"));
        }
        Ok(())
    }
}
