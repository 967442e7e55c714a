//! Product service providing a simplified API for product operations.

use common::{AggregateId, Clock, CommandContext};
use event_store::{EventStore, SnapshotStore, Version};
use outbox::OutboxStore;

use crate::error::DomainError;
use crate::repository::AggregateRepository;

use super::{CreateProduct, DeactivateProduct, Product, ProductRoot, UpdateProductPrice};

/// Service for managing products.
///
/// Wraps an [`AggregateRepository`]; mutations of existing products go through
/// its optimistic retry loop.
pub struct ProductService<E, S, O> {
    repository: AggregateRepository<E, S, O>,
    max_attempts: u32,
}

impl<E, S, O> ProductService<E, S, O>
where
    E: EventStore,
    S: SnapshotStore,
    O: OutboxStore,
{
    pub fn new(repository: AggregateRepository<E, S, O>) -> Self {
        Self {
            repository,
            max_attempts: 3,
        }
    }

    /// Sets how many times a conflicting mutation is attempted.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn repository(&self) -> &AggregateRepository<E, S, O> {
        &self.repository
    }

    /// Events are timed by the repository's clock, like their outbox records.
    fn stamped(&self, ctx: &CommandContext) -> CommandContext {
        ctx.clone().with_issued_at(self.repository.clock().now())
    }

    /// Creates a product. Fails with a conflict if the id is already taken.
    #[tracing::instrument(skip(self, ctx), fields(product_id = %cmd.product_id))]
    pub async fn create_product(
        &self,
        cmd: CreateProduct,
        ctx: &CommandContext,
    ) -> Result<ProductRoot, DomainError> {
        let ctx = &self.stamped(ctx);
        let mut product = ProductRoot::create(
            cmd.product_id,
            cmd.name,
            cmd.description,
            cmd.price,
            cmd.category_id,
            cmd.sku,
            ctx,
        )?;

        self.repository
            .save(&mut product, Some(Version::initial()), ctx)
            .await?;
        tracing::info!(version = %product.version(), "product created");
        Ok(product)
    }

    #[tracing::instrument(skip(self, ctx), fields(product_id = %cmd.product_id))]
    pub async fn update_price(
        &self,
        cmd: UpdateProductPrice,
        ctx: &CommandContext,
    ) -> Result<ProductRoot, DomainError> {
        let ctx = &self.stamped(ctx);
        let (product, ()) = self
            .repository
            .with_optimistic_retry::<Product, _, _>(
                cmd.product_id,
                ctx,
                self.max_attempts,
                |product| product.update_price(cmd.new_price, cmd.reason.clone(), ctx),
            )
            .await?;
        tracing::info!(price = %product.state().price, "product price updated");
        Ok(product)
    }

    #[tracing::instrument(skip(self, ctx), fields(product_id = %cmd.product_id))]
    pub async fn deactivate(
        &self,
        cmd: DeactivateProduct,
        ctx: &CommandContext,
    ) -> Result<ProductRoot, DomainError> {
        let ctx = &self.stamped(ctx);
        let (product, ()) = self
            .repository
            .with_optimistic_retry::<Product, _, _>(
                cmd.product_id,
                ctx,
                self.max_attempts,
                |product| product.deactivate(cmd.reason.as_str(), ctx),
            )
            .await?;
        tracing::info!("product deactivated");
        Ok(product)
    }

    pub async fn get_product(
        &self,
        product_id: AggregateId,
        ctx: &CommandContext,
    ) -> Result<ProductRoot, DomainError> {
        self.repository.load::<Product>(product_id, ctx).await
    }
}
