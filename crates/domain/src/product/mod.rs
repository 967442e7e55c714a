//! Product aggregate: a catalog item with a price and a one-way deactivation.

mod aggregate;
mod commands;
mod events;
mod service;
mod value_objects;

pub use aggregate::{Product, ProductRoot};
pub use commands::{CreateProduct, DeactivateProduct, UpdateProductPrice};
pub use events::{ProductCreatedData, ProductDeactivatedData, ProductEvent, ProductPriceUpdatedData};
pub use service::ProductService;
pub use value_objects::{CategoryId, Money};
