//! Stock reservation client and an in-memory inventory service.
//!
//! The inventory service owns two counters per SKU: `quantity` (owned stock)
//! and `reserved` (held but not yet committed). Every operation keeps
//! `0 <= reserved <= quantity`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{ProductId, ShopId, SkuId};
use domain::{Money, StockLine};
use thiserror::Error;
use tokio::sync::Mutex;

use super::catalog::{CatalogError, CatalogService, SkuSnapshot};

#[derive(Debug, Clone, Error)]
pub enum StockError {
    /// Not enough sellable stock to hold the requested quantity.
    #[error("Insufficient stock for {sku_id}: available {available}, requested {requested}")]
    InsufficientStock {
        sku_id: SkuId,
        available: u32,
        requested: u32,
    },

    /// Commit or rollback asked for more than is currently held.
    #[error("Only {held} units of {sku_id} are held, cannot release {requested}")]
    NotHeld {
        sku_id: SkuId,
        held: u32,
        requested: u32,
    },

    #[error("Unknown SKU: {0}")]
    UnknownSku(SkuId),

    #[error("Inventory service unavailable: {0}")]
    Unavailable(String),
}

/// Three-phase reservation protocol against the external inventory service.
///
/// Each call covers every line or none of them.
#[async_trait]
pub trait StockReservationClient: Send + Sync {
    /// Marks stock as provisionally unavailable.
    async fn hold(&self, lines: &[StockLine]) -> Result<(), StockError>;

    /// Converts held quantity into a permanent deduction.
    async fn commit(&self, lines: &[StockLine]) -> Result<(), StockError>;

    /// Releases held quantity without deducting it.
    async fn rollback(&self, lines: &[StockLine]) -> Result<(), StockError>;
}

/// A SKU offered by a shop, as registered with the in-memory inventory.
#[derive(Debug, Clone)]
pub struct SkuListing {
    pub sku_id: SkuId,
    pub product_id: ProductId,
    pub shop_id: ShopId,
    pub product_name: String,
    pub image_url: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub price: Money,
    pub quantity: u32,
}

impl SkuListing {
    pub fn new(
        sku_id: impl Into<SkuId>,
        product_id: impl Into<ProductId>,
        shop_id: impl Into<ShopId>,
        product_name: impl Into<String>,
        price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            sku_id: sku_id.into(),
            product_id: product_id.into(),
            shop_id: shop_id.into(),
            product_name: product_name.into(),
            image_url: None,
            attributes: BTreeMap::new(),
            price,
            quantity,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Stock counters of one SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub quantity: u32,
    pub reserved: u32,
}

impl StockLevel {
    pub fn available(&self) -> u32 {
        self.quantity - self.reserved
    }
}

#[derive(Debug)]
struct StockedSku {
    listing: SkuListing,
    level: StockLevel,
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    skus: HashMap<SkuId, StockedSku>,
    total_sold: HashMap<ProductId, u64>,
}

impl InMemoryInventoryState {
    /// Sums lines per SKU and checks each one against `check`, before
    /// anything is mutated.
    fn totals(
        &self,
        lines: &[StockLine],
        check: impl Fn(&SkuId, StockLevel, u32) -> Result<(), StockError>,
    ) -> Result<BTreeMap<SkuId, u32>, StockError> {
        let mut totals: BTreeMap<SkuId, u32> = BTreeMap::new();
        for line in lines {
            *totals.entry(line.sku_id.clone()).or_default() += line.quantity;
        }
        for (sku_id, requested) in &totals {
            let sku = self
                .skus
                .get(sku_id)
                .ok_or_else(|| StockError::UnknownSku(sku_id.clone()))?;
            check(sku_id, sku.level, *requested)?;
        }
        Ok(totals)
    }
}

fn ensure_held(sku_id: &SkuId, level: StockLevel, requested: u32) -> Result<(), StockError> {
    if requested > level.reserved {
        return Err(StockError::NotHeld {
            sku_id: sku_id.clone(),
            held: level.reserved,
            requested,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Faults {
    fail_on_lookup: AtomicBool,
    fail_on_hold: AtomicBool,
    fail_on_commit: AtomicBool,
    fail_on_rollback: AtomicBool,
}

/// In-memory catalog and inventory service for testing and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<Mutex<InMemoryInventoryState>>,
    faults: Arc<Faults>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a SKU with its initial stock.
    pub async fn add_sku(&self, listing: SkuListing) {
        let level = StockLevel {
            quantity: listing.quantity,
            reserved: 0,
        };
        self.state
            .lock()
            .await
            .skus
            .insert(listing.sku_id.clone(), StockedSku { listing, level });
    }

    pub async fn stock_level(&self, sku_id: &SkuId) -> Option<StockLevel> {
        self.state.lock().await.skus.get(sku_id).map(|s| s.level)
    }

    /// Units of a product committed through shipped orders.
    pub async fn total_sold(&self, product_id: &ProductId) -> u64 {
        self.state
            .lock()
            .await
            .total_sold
            .get(product_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_fail_on_lookup(&self, fail: bool) {
        self.faults.fail_on_lookup.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_hold(&self, fail: bool) {
        self.faults.fail_on_hold.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_commit(&self, fail: bool) {
        self.faults.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_rollback(&self, fail: bool) {
        self.faults.fail_on_rollback.store(fail, Ordering::SeqCst);
    }

    fn check_fault(flag: &AtomicBool) -> Result<(), StockError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StockError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogService for InMemoryInventoryService {
    async fn sku_snapshot(&self, sku_id: &SkuId) -> Result<SkuSnapshot, CatalogError> {
        if self.faults.fail_on_lookup.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("connection refused".to_string()));
        }

        let state = self.state.lock().await;
        let sku = state
            .skus
            .get(sku_id)
            .ok_or_else(|| CatalogError::SkuNotFound(sku_id.clone()))?;
        let listing = &sku.listing;

        Ok(SkuSnapshot {
            sku_id: listing.sku_id.clone(),
            product_id: listing.product_id.clone(),
            shop_id: listing.shop_id.clone(),
            product_name: listing.product_name.clone(),
            image_url: listing.image_url.clone(),
            attributes: listing.attributes.clone(),
            price: listing.price,
            available: sku.level.available(),
        })
    }
}

#[async_trait]
impl StockReservationClient for InMemoryInventoryService {
    async fn hold(&self, lines: &[StockLine]) -> Result<(), StockError> {
        Self::check_fault(&self.faults.fail_on_hold)?;

        let mut state = self.state.lock().await;
        let totals = state.totals(lines, |sku_id, level, requested| {
            if requested > level.available() {
                return Err(StockError::InsufficientStock {
                    sku_id: sku_id.clone(),
                    available: level.available(),
                    requested,
                });
            }
            Ok(())
        })?;

        for (sku_id, quantity) in totals {
            if let Some(sku) = state.skus.get_mut(&sku_id) {
                sku.level.reserved += quantity;
            }
        }
        Ok(())
    }

    async fn commit(&self, lines: &[StockLine]) -> Result<(), StockError> {
        Self::check_fault(&self.faults.fail_on_commit)?;

        let mut state = self.state.lock().await;
        let totals = state.totals(lines, ensure_held)?;

        for (sku_id, quantity) in totals {
            let Some(sku) = state.skus.get_mut(&sku_id) else {
                continue;
            };
            sku.level.reserved -= quantity;
            sku.level.quantity -= quantity;
            let product_id = sku.listing.product_id.clone();
            *state.total_sold.entry(product_id).or_default() += u64::from(quantity);
        }
        Ok(())
    }

    async fn rollback(&self, lines: &[StockLine]) -> Result<(), StockError> {
        Self::check_fault(&self.faults.fail_on_rollback)?;

        let mut state = self.state.lock().await;
        let totals = state.totals(lines, ensure_held)?;

        for (sku_id, quantity) in totals {
            if let Some(sku) = state.skus.get_mut(&sku_id) {
                sku.level.reserved -= quantity;
            }
        }
        Ok(())
    }
}
