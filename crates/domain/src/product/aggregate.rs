//! Product aggregate implementation.

use common::{AggregateId, CommandContext};
use serde::{Deserialize, Serialize};

use crate::{Aggregate, AggregateRoot, DomainError};

use super::{
    CategoryId, Money, ProductCreatedData, ProductDeactivatedData, ProductEvent,
    ProductPriceUpdatedData,
};

/// A catalog product.
///
/// Products start active and can be deactivated exactly once; there is no
/// reactivation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub is_active: bool,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub category_id: Option<CategoryId>,
    pub sku: String,
    pub deactivation_reason: Option<String>,
}

/// A product together with its identity and version.
pub type ProductRoot = AggregateRoot<Product>;

impl Aggregate for Product {
    type Event = ProductEvent;

    fn aggregate_type() -> &'static str {
        "Product"
    }

    fn bounded_context() -> &'static str {
        "catalog"
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(data) => {
                self.is_active = true;
                self.name = data.name.clone();
                self.description = data.description.clone();
                self.price = data.price;
                self.category_id = Some(data.category_id);
                self.sku = data.sku.clone();
            }
            ProductEvent::ProductPriceUpdated(data) => {
                self.price = data.new_price;
            }
            ProductEvent::ProductDeactivated(data) => {
                self.is_active = false;
                self.deactivation_reason = Some(data.reason.clone());
            }
        }
    }
}

fn ensure_active(product: &Product, message: &str) -> Result<(), DomainError> {
    if product.is_active {
        Ok(())
    } else {
        Err(DomainError::invariant(message))
    }
}

fn ensure_non_negative(price: Money) -> Result<(), DomainError> {
    if price.is_negative() {
        Err(DomainError::validation("Price cannot be negative"))
    } else {
        Ok(())
    }
}

impl AggregateRoot<Product> {
    /// Creates a new product at version 0 with one `product.created` event pending.
    pub fn create(
        id: AggregateId,
        name: impl Into<String>,
        description: impl Into<String>,
        price: Money,
        category_id: CategoryId,
        sku: impl Into<String>,
        ctx: &CommandContext,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        let sku = sku.into();

        if name.trim().is_empty() {
            return Err(DomainError::validation("Product name is required"));
        }
        ensure_non_negative(price)?;
        if sku.trim().is_empty() {
            return Err(DomainError::validation("SKU is required"));
        }

        let mut root = Self::new(id);
        root.apply(
            ProductEvent::ProductCreated(ProductCreatedData {
                product_id: id,
                name,
                description: description.into(),
                price,
                category_id,
                sku,
            }),
            ctx,
        );
        Ok(root)
    }

    /// Changes the price of an active product.
    pub fn update_price(
        &mut self,
        new_price: Money,
        reason: Option<String>,
        ctx: &CommandContext,
    ) -> Result<(), DomainError> {
        self.execute_business_logic(
            |product| {
                ensure_active(product, "Cannot update price of inactive product")?;
                ensure_non_negative(new_price)?;
                if product.price == new_price {
                    return Err(DomainError::validation(
                        "New price must be different from current price",
                    ));
                }
                Ok(())
            },
            |root| {
                let old_price = root.state().price;
                root.apply(
                    ProductEvent::ProductPriceUpdated(ProductPriceUpdatedData {
                        old_price,
                        new_price,
                        reason,
                    }),
                    ctx,
                );
                Ok(())
            },
        )
    }

    /// Permanently takes the product off sale.
    pub fn deactivate(
        &mut self,
        reason: impl Into<String>,
        ctx: &CommandContext,
    ) -> Result<(), DomainError> {
        let reason = reason.into();
        let missing_reason = reason.trim().is_empty();
        self.execute_business_logic(
            |product| {
                ensure_active(product, "Product is already inactive")?;
                if missing_reason {
                    return Err(DomainError::validation("Deactivation reason is required"));
                }
                Ok(())
            },
            |root| {
                root.apply(
                    ProductEvent::ProductDeactivated(ProductDeactivatedData { reason }),
                    ctx,
                );
                Ok(())
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomainEvent;
    use event_store::Version;

    fn ctx() -> CommandContext {
        CommandContext::new("acme")
    }

    fn create_product() -> ProductRoot {
        ProductRoot::create(
            AggregateId::new(),
            "Test Product",
            "desc",
            Money::from_cents(9999),
            CategoryId::new(),
            "SKU-001",
            &ctx(),
        )
        .unwrap()
    }

    fn assert_validation(result: Result<impl std::fmt::Debug, DomainError>, message: &str) {
        match result {
            Err(DomainError::Validation(m)) => assert_eq!(m, message),
            other => panic!("expected validation error '{message}', got {other:?}"),
        }
    }

    fn assert_invariant(result: Result<impl std::fmt::Debug, DomainError>, message: &str) {
        match result {
            Err(DomainError::InvariantViolation(m)) => assert_eq!(m, message),
            other => panic!("expected invariant violation '{message}', got {other:?}"),
        }
    }

    #[test]
    fn test_create_product() {
        let product = create_product();

        assert_eq!(product.version(), Version::first());
        assert_eq!(product.uncommitted_events().len(), 1);
        assert_eq!(
            product.uncommitted_events()[0].event.event_type(),
            "product.created"
        );
        assert!(product.state().is_active);
        assert_eq!(product.state().price, Money::from_cents(9999));
        assert_eq!(product.state().sku, "SKU-001");
    }

    #[test]
    fn test_create_validation() {
        let id = AggregateId::new();
        let category = CategoryId::new();
        let price = Money::from_cents(100);

        assert_validation(
            ProductRoot::create(id, "  ", "d", price, category, "SKU", &ctx()),
            "Product name is required",
        );
        assert_validation(
            ProductRoot::create(id, "n", "d", Money::from_cents(-1), category, "SKU", &ctx()),
            "Price cannot be negative",
        );
        assert_validation(
            ProductRoot::create(id, "n", "d", price, category, "", &ctx()),
            "SKU is required",
        );
    }

    #[test]
    fn test_free_product_is_allowed() {
        let product = ProductRoot::create(
            AggregateId::new(),
            "Sample",
            "",
            Money::zero(),
            CategoryId::new(),
            "SKU-FREE",
            &ctx(),
        )
        .unwrap();
        assert!(product.state().price.is_zero());
    }

    #[test]
    fn test_update_price() {
        let mut product = create_product();
        product
            .update_price(Money::from_cents(15000), Some("increase".into()), &ctx())
            .unwrap();

        assert_eq!(product.version(), Version::new(1));
        assert_eq!(product.state().price, Money::from_cents(15000));
        match &product.uncommitted_events()[1].event {
            ProductEvent::ProductPriceUpdated(data) => {
                assert_eq!(data.old_price, Money::from_cents(9999));
                assert_eq!(data.reason.as_deref(), Some("increase"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_same_price_is_rejected_without_changing_version() {
        let mut product = create_product();

        assert_validation(
            product.update_price(Money::from_cents(9999), None, &ctx()),
            "New price must be different from current price",
        );
        assert_validation(
            product.update_price(Money::from_cents(-5), None, &ctx()),
            "Price cannot be negative",
        );
        assert_eq!(product.version(), Version::first());
        assert_eq!(product.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_deactivate_is_terminal() {
        let mut product = create_product();
        product.deactivate("EOL", &ctx()).unwrap();

        assert!(!product.state().is_active);
        assert_eq!(product.state().deactivation_reason.as_deref(), Some("EOL"));
        assert_eq!(product.version(), Version::new(1));

        assert_invariant(product.deactivate("again", &ctx()), "Product is already inactive");
        assert_invariant(product.deactivate("", &ctx()), "Product is already inactive");
        assert_invariant(
            product.update_price(Money::from_cents(1), None, &ctx()),
            "Cannot update price of inactive product",
        );
        assert_eq!(product.version(), Version::new(1));
    }

    #[test]
    fn test_deactivate_requires_reason() {
        let mut product = create_product();
        assert_validation(
            product.deactivate("   ", &ctx()),
            "Deactivation reason is required",
        );
        assert!(product.state().is_active);
    }
}
