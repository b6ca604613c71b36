//! Domain layer for the multi-vendor order saga.
//!
//! This crate is pure computation, with no I/O:
//! - `Money` and the order tree records (order, shop order, item, payment, stock task)
//! - the shop order status state machine and its stock side effects
//! - voucher definitions and the discount allocator
//! - the `CreateOrder` command and its structural validation

pub mod error;
pub mod order;
pub mod voucher;

pub use error::{CommandError, DiscountError};
pub use order::{
    AppliedVoucher, CartItem, CreateOrder, InvalidTransition, ItemSnapshot, Money, Order,
    OrderItem, PaymentMethodSnapshot, PaymentMethodType, PaymentStatus, PaymentTransaction,
    SettlementBreakdown, ShippingAddress, ShopOrder, ShopOrderStatus, ShopVoucherSelection,
    StockAction, StockLine, StockTask, Transition, order_code, shop_order_code,
};
pub use voucher::{
    AppliesTo, Audience, Discount, PlatformShare, Voucher, VoucherOwner,
    allocate_platform_discounts, compute_discount, distribute_pro_rata, settlement_for,
};
