//! Product domain events.

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{CategoryId, Money};

/// Events that can occur on a product aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProductEvent {
    ProductCreated(ProductCreatedData),
    ProductPriceUpdated(ProductPriceUpdatedData),
    ProductDeactivated(ProductDeactivatedData),
}

impl DomainEvent for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "product.created",
            ProductEvent::ProductPriceUpdated(_) => "product.price-updated",
            ProductEvent::ProductDeactivated(_) => "product.deactivated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCreatedData {
    pub product_id: AggregateId,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub category_id: CategoryId,
    pub sku: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPriceUpdatedData {
    pub old_price: Money,
    pub new_price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDeactivatedData {
    pub reason: String,
}
