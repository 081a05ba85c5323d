use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taller_core::{DomainError, DomainResult, ItemId};

const DEFAULT_UNIT: &str = "unidad";

/// Catalog item (part, accessory, consumable).
///
/// Items are soft-deleted: once stock rows or movements reference an item it is
/// only ever flagged `eliminado`, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    /// SKU / internal code.
    pub code: String,
    pub name: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub unit: String,
    /// Price in smallest currency unit (e.g., cents).
    pub cost_price: u64,
    /// Price in smallest currency unit (e.g., cents).
    pub sale_price: u64,
    pub min_stock: i64,
    pub max_stock: Option<i64>,
    #[serde(rename = "eliminado")]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub cost_price: u64,
    #[serde(default)]
    pub sale_price: u64,
    #[serde(default)]
    pub min_stock: i64,
    #[serde(default)]
    pub max_stock: Option<i64>,
}

/// Partial update of an item; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub cost_price: Option<u64>,
    pub sale_price: Option<u64>,
    pub min_stock: Option<i64>,
    pub max_stock: Option<i64>,
}

impl NewItem {
    pub fn into_item(self, id: ItemId, now: DateTime<Utc>) -> DomainResult<Item> {
        let item = Item {
            id,
            code: self.code.trim().to_string(),
            name: self.name.trim().to_string(),
            brand: self.brand,
            model: self.model,
            category: self.category,
            unit: self
                .unit
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_UNIT.to_string()),
            cost_price: self.cost_price,
            sale_price: self.sale_price,
            min_stock: self.min_stock,
            max_stock: self.max_stock,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        item.validate()?;
        Ok(item)
    }
}

impl Item {
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Apply a patch; the item is left untouched if the result would be invalid.
    pub fn apply_patch(&mut self, patch: ItemPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if self.deleted {
            return Err(DomainError::invalid_transition("cannot modify a deleted item"));
        }

        let mut next = self.clone();
        if let Some(code) = patch.code {
            next.code = code.trim().to_string();
        }
        if let Some(name) = patch.name {
            next.name = name.trim().to_string();
        }
        if patch.brand.is_some() {
            next.brand = patch.brand;
        }
        if patch.model.is_some() {
            next.model = patch.model;
        }
        if patch.category.is_some() {
            next.category = patch.category;
        }
        if let Some(unit) = patch.unit {
            next.unit = unit.trim().to_string();
        }
        if let Some(cost) = patch.cost_price {
            next.cost_price = cost;
        }
        if let Some(price) = patch.sale_price {
            next.sale_price = price;
        }
        if let Some(min) = patch.min_stock {
            next.min_stock = min;
        }
        if patch.max_stock.is_some() {
            next.max_stock = patch.max_stock;
        }
        next.validate()?;
        next.updated_at = now;

        *self = next;
        Ok(())
    }

    pub fn mark_deleted(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.deleted {
            return Err(DomainError::not_found(format!("item {}", self.id)));
        }
        self.deleted = true;
        self.updated_at = now;
        Ok(())
    }

    fn validate(&self) -> DomainResult<()> {
        if self.code.is_empty() {
            return Err(DomainError::validation("code cannot be empty"));
        }
        if self.name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.unit.is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        if self.min_stock < 0 {
            return Err(DomainError::validation("minStock cannot be negative"));
        }
        if let Some(max) = self.max_stock {
            if max < self.min_stock {
                return Err(DomainError::validation("maxStock must be >= minStock"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> NewItem {
        NewItem {
            code: " FLT-001 ".to_string(),
            name: "Filtro de aceite".to_string(),
            brand: Some("Bosch".to_string()),
            model: None,
            category: None,
            unit: None,
            cost_price: 450,
            sale_price: 900,
            min_stock: 2,
            max_stock: Some(40),
        }
    }

    #[test]
    fn new_item_is_trimmed_and_defaults_unit() {
        let item = draft().into_item(ItemId::new(), Utc::now()).unwrap();
        assert_eq!(item.code, "FLT-001");
        assert_eq!(item.unit, "unidad");
        assert!(item.is_active());
    }

    #[test]
    fn thresholds_are_validated() {
        let mut bad = draft();
        bad.max_stock = Some(1);
        let err = bad.into_item(ItemId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn invalid_patch_leaves_item_untouched() {
        let mut item = draft().into_item(ItemId::new(), Utc::now()).unwrap();
        let before = item.clone();
        let err = item
            .apply_patch(
                ItemPatch {
                    name: Some("   ".to_string()),
                    ..ItemPatch::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(item, before);
    }

    #[test]
    fn soft_delete_is_reported_once() {
        let mut item = draft().into_item(ItemId::new(), Utc::now()).unwrap();
        item.mark_deleted(Utc::now()).unwrap();
        assert!(item.deleted);
        assert!(matches!(item.mark_deleted(Utc::now()), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn deleted_flag_serializes_as_eliminado() {
        let item = draft().into_item(ItemId::new(), Utc::now()).unwrap();
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["eliminado"], false);
        assert_eq!(json["costPrice"], 450);
    }
}
