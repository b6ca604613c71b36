//! Catalog service boundary: pricing and stock snapshots per SKU.

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::{ProductId, ShopId, SkuId};
use domain::{ItemSnapshot, Money};
use thiserror::Error;

/// Pricing and availability of one SKU at the time of the lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuSnapshot {
    pub sku_id: SkuId,
    pub product_id: ProductId,
    pub shop_id: ShopId,
    pub product_name: String,
    pub image_url: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub price: Money,
    /// Sellable quantity: owned stock minus what is currently held.
    pub available: u32,
}

impl SkuSnapshot {
    /// The part of the snapshot frozen onto an order item.
    pub fn item_snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            product_name: self.product_name.clone(),
            image_url: self.image_url.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("SKU not found: {0}")]
    SkuNotFound(SkuId),

    #[error("Catalog service unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the external catalog service.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn sku_snapshot(&self, sku_id: &SkuId) -> Result<SkuSnapshot, CatalogError>;
}
