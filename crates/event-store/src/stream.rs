//! Stream identifiers.

use std::str::FromStr;

use common::{AggregateId, TenantId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of the ordered event log of a single aggregate instance.
///
/// Rendered as `{context}.{aggregate_type}.v{schema}-{tenant}-{aggregate_id}`, so
/// everything before the first `-` is the stream category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    bounded_context: String,
    aggregate_type: String,
    schema_version: u32,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// A string that is not a well-formed stream identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid stream id '{0}'")]
pub struct InvalidStreamId(pub String);

impl StreamId {
    /// Builds the stream identifier for an aggregate instance.
    pub fn new(
        bounded_context: &str,
        aggregate_type: &str,
        schema_version: u32,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Self {
        Self {
            bounded_context: normalize(bounded_context),
            aggregate_type: normalize(aggregate_type),
            schema_version,
            tenant_id,
            aggregate_id,
        }
    }

    /// Returns the stream category (`{context}.{aggregate_type}.v{schema}`).
    pub fn category(&self) -> String {
        format!(
            "{}.{}.v{}",
            self.bounded_context, self.aggregate_type, self.schema_version
        )
    }

    pub fn bounded_context(&self) -> &str {
        &self.bounded_context
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }
}

fn normalize(part: &str) -> String {
    part.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '.' { '_' } else { c })
        .collect()
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.category(),
            self.tenant_id,
            self.aggregate_id
        )
    }
}

impl FromStr for StreamId {
    type Err = InvalidStreamId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidStreamId(s.to_string());

        let mut parts = s.splitn(3, '-');
        let category = parts.next().ok_or_else(invalid)?;
        let tenant = parts.next().ok_or_else(invalid)?;
        let aggregate_id: AggregateId = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;

        let mut category_parts = category.split('.');
        let (Some(context), Some(aggregate_type), Some(schema), None) = (
            category_parts.next(),
            category_parts.next(),
            category_parts.next(),
            category_parts.next(),
        ) else {
            return Err(invalid());
        };
        let schema_version = schema
            .strip_prefix('v')
            .and_then(|v| v.parse().ok())
            .ok_or_else(invalid)?;

        if context.is_empty() || aggregate_type.is_empty() || tenant.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            bounded_context: context.to_string(),
            aggregate_type: aggregate_type.to_string(),
            schema_version,
            tenant_id: TenantId::new(tenant),
            aggregate_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_category_tenant_and_id() {
        let id = AggregateId::new();
        let stream = StreamId::new("Catalog", "Product", 1, TenantId::new("acme"), id);

        assert_eq!(stream.category(), "catalog.product.v1");
        assert_eq!(stream.to_string(), format!("catalog.product.v1-acme-{id}"));
    }

    #[test]
    fn parses_rendered_form() {
        let id = AggregateId::new();
        let stream = StreamId::new("catalog", "product", 3, TenantId::new("acme"), id);

        let parsed: StreamId = stream.to_string().parse().unwrap();
        assert_eq!(parsed, stream);
        assert_eq!(parsed.schema_version(), 3);
        assert_eq!(parsed.aggregate_id(), id);
    }

    #[test]
    fn different_tenants_get_different_streams() {
        let id = AggregateId::new();
        let a = StreamId::new("catalog", "product", 1, TenantId::new("a"), id);
        let b = StreamId::new("catalog", "product", 1, TenantId::new("b"), id);
        assert_ne!(a, b);
    }

    #[test]
    fn streams_order_by_category_then_tenant() {
        let id = AggregateId::new();
        let acme = StreamId::new("catalog", "product", 1, TenantId::new("acme"), id);
        let zeta = StreamId::new("catalog", "product", 1, TenantId::new("zeta"), id);
        let billing = StreamId::new("billing", "invoice", 1, TenantId::new("zeta"), id);

        let sorted: std::collections::BTreeSet<_> =
            [zeta.clone(), acme.clone(), billing.clone()].into_iter().collect();
        assert_eq!(sorted.into_iter().collect::<Vec<_>>(), vec![billing, acme, zeta]);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!("catalog.product.v1-acme".parse::<StreamId>().is_err());
        assert!("catalog.product-acme-not-a-uuid".parse::<StreamId>().is_err());
        assert!(
            format!("catalog.product.x1-acme-{}", AggregateId::new())
                .parse::<StreamId>()
                .is_err()
        );
    }
}
