//! Product commands.

use common::AggregateId;

use super::{CategoryId, Money};

/// Command to create a new product.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub product_id: AggregateId,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub category_id: CategoryId,
    pub sku: String,
}

impl CreateProduct {
    /// Creates the command with a generated product ID.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        price: Money,
        category_id: CategoryId,
        sku: impl Into<String>,
    ) -> Self {
        Self {
            product_id: AggregateId::new(),
            name: name.into(),
            description: description.into(),
            price,
            category_id,
            sku: sku.into(),
        }
    }

    pub fn with_id(mut self, product_id: AggregateId) -> Self {
        self.product_id = product_id;
        self
    }
}

/// Command to change a product's price.
#[derive(Debug, Clone)]
pub struct UpdateProductPrice {
    pub product_id: AggregateId,
    pub new_price: Money,
    pub reason: Option<String>,
}

impl UpdateProductPrice {
    pub fn new(product_id: AggregateId, new_price: Money) -> Self {
        Self {
            product_id,
            new_price,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Command to take a product off sale.
#[derive(Debug, Clone)]
pub struct DeactivateProduct {
    pub product_id: AggregateId,
    pub reason: String,
}

impl DeactivateProduct {
    pub fn new(product_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            product_id,
            reason: reason.into(),
        }
    }
}
