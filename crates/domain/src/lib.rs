//! Domain layer of the persistence core.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits describing event-sourced state
//! - AggregateRoot, which tracks identity, version and uncommitted events
//! - AggregateRepository, which loads and saves roots with snapshots and outbox writes
//! - The Product aggregate and its service

pub mod aggregate;
pub mod error;
pub mod product;
pub mod repository;
pub mod root;

pub use aggregate::{Aggregate, DomainEvent};
pub use error::DomainError;
pub use product::{
    CategoryId, CreateProduct, DeactivateProduct, Money, Product, ProductEvent, ProductRoot,
    ProductService, UpdateProductPrice,
};
pub use repository::{AggregateRepository, RepositoryConfig, SnapshotPolicy};
pub use root::{AggregateRoot, PendingEvent, SnapshotMarker};
