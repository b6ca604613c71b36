//! Boundaries to the services the saga calls, with in-memory implementations.

pub mod catalog;
pub mod inventory;
pub mod payment;
pub mod voucher;

pub use catalog::{CatalogError, CatalogService, SkuSnapshot};
pub use inventory::{
    InMemoryInventoryService, SkuListing, StockError, StockLevel, StockReservationClient,
};
pub use payment::{
    InMemoryPaymentService, PaymentAdapter, PaymentError, PaymentInitiation, PaymentItemLine,
    PaymentRequest, PaymentUserInfo,
};
pub use voucher::{InMemoryVoucherLedger, VoucherError, VoucherLedger, VoucherUsage, WalletStatus};
