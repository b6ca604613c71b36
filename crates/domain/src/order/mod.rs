//! Order tree records, the checkout command and the shop order state machine.

mod commands;
mod model;
mod state;
mod value_objects;

pub use commands::{CartItem, CreateOrder, ShopVoucherSelection};
pub use model::{
    AppliedVoucher, Order, OrderItem, PaymentStatus, PaymentTransaction, SettlementBreakdown,
    ShopOrder, StockAction, StockLine, StockTask, order_code, shop_order_code,
};
pub use state::{InvalidTransition, ShopOrderStatus, Transition};
pub use value_objects::{
    ItemSnapshot, Money, PaymentMethodSnapshot, PaymentMethodType, ShippingAddress,
};
