//! Catalog entry returned by the store.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::ProductId;

/// A purchasable product as described by the store.
///
/// Only `id` is interpreted by the core. Display name, price string and any
/// extra attributes are carried through untouched for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    display_name: String,
    display_price: String,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    attributes: JsonValue,
}

impl Product {
    pub fn new(
        id: impl Into<ProductId>,
        display_name: impl Into<String>,
        display_price: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            display_price: display_price.into(),
            attributes: JsonValue::Null,
        }
    }

    /// Attach opaque store-specific data (subscription group, locale, ...).
    pub fn with_attributes(mut self, attributes: JsonValue) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn id(&self) -> &ProductId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn display_price(&self) -> &str {
        &self.display_price
    }

    pub fn attributes(&self) -> &JsonValue {
        &self.attributes
    }
}
