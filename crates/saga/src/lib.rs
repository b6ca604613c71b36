//! Order creation saga for a multi-vendor marketplace.
//!
//! Turns a cart spanning several shops into a persisted order tree:
//! 1. Validate the request
//! 2. Fetch pricing and stock snapshots from the catalog
//! 3. Check stock
//! 4. Group items into one shop order per shop
//! 5. Price and reserve vouchers
//! 6. Hold stock
//! 7. Persist the order tree and payment transaction
//! 8. Initiate payment
//!
//! Each external side effect registers its compensation on a
//! [`CompensationLog`]; if a later step fails the log is unwound in reverse
//! order before the error is returned.
//!
//! [`ShopOrderService`] drives the shop order state machine afterwards, for
//! admin actions and payment outcomes.

pub mod compensation;
pub mod error;
pub mod orchestrator;
pub mod order_creation;
pub mod services;
pub mod shop_orders;
pub mod state;

pub use compensation::{Compensation, CompensationLog, FailedCompensation, UnwindReport};
pub use error::{OrderSagaError, Result};
pub use orchestrator::{OrderCreated, OrderOrchestrator, SagaServices, SagaSettings};
pub use services::{
    CatalogError, CatalogService, InMemoryInventoryService, InMemoryPaymentService,
    InMemoryVoucherLedger, PaymentAdapter, PaymentError, PaymentInitiation, PaymentItemLine,
    PaymentRequest, PaymentUserInfo, SkuListing, SkuSnapshot, StockError, StockLevel,
    StockReservationClient, VoucherError, VoucherLedger, VoucherUsage, WalletStatus,
};
pub use shop_orders::{PaymentSettled, ShopOrderService, StatusUpdate, StockTaskOutcome, StockTaskRun};
pub use state::SagaState;
