//! Order creation saga constants.

/// The saga type identifier for order creation.
pub const SAGA_TYPE: &str = "CreateOrder";

/// Step name: Check the request's structural invariants.
pub const STEP_VALIDATE_REQUEST: &str = "validate_request";

/// Step name: Fetch pricing and stock snapshots from the catalog.
pub const STEP_FETCH_CATALOG: &str = "fetch_catalog";

/// Step name: Resolve the payment method.
pub const STEP_RESOLVE_PAYMENT_METHOD: &str = "resolve_payment_method";

/// Step name: Compare requested quantities against available stock.
pub const STEP_CHECK_STOCK: &str = "check_stock";

/// Step name: Build one shop order per shop in the cart.
pub const STEP_GROUP_BY_SHOP: &str = "group_by_shop";

/// Step name: Price and reserve shop and platform vouchers.
pub const STEP_APPLY_VOUCHERS: &str = "apply_vouchers";

/// Step name: Hold stock for every item.
pub const STEP_HOLD_STOCK: &str = "hold_stock";

/// Step name: Persist the order tree and payment transaction.
pub const STEP_PERSIST_ORDER: &str = "persist_order";

/// Step name: Register the payment with the gateway.
pub const STEP_INITIATE_PAYMENT: &str = "initiate_payment";
