//! Payment adapter trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{OrderId, PaymentMethodId, ProductId, SkuId, TransactionId, UserId};
use domain::{Money, PaymentMethodSnapshot, PaymentMethodType, SettlementBreakdown};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Unknown payment method: {0}")]
    UnknownMethod(PaymentMethodId),

    #[error("Payment method is not active: {0}")]
    MethodInactive(PaymentMethodId),

    #[error("Payment gateway error: {0}")]
    Gateway(String),
}

/// A purchased line as shown on the gateway's checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentItemLine {
    pub product_id: ProductId,
    pub sku_id: SkuId,
    pub name: String,
    pub image_url: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Payer details derived from the shipping address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUserInfo {
    pub user_id: UserId,
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
}

/// Everything the gateway needs to collect payment for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub order_code: String,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub method: PaymentMethodSnapshot,
    pub settlements: Vec<SettlementBreakdown>,
    pub items: Vec<PaymentItemLine>,
    pub user: PaymentUserInfo,
}

/// How the gateway accepted a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentInitiation {
    /// Online method: the customer completes payment at `url`.
    Redirect { url: String },
    /// Offline method: nothing to collect until delivery.
    Confirmed,
}

impl PaymentInitiation {
    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            PaymentInitiation::Redirect { url } => Some(url),
            PaymentInitiation::Confirmed => None,
        }
    }
}

/// Boundary to the external payment service.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Resolves an active payment method.
    async fn payment_method(
        &self,
        method_id: &PaymentMethodId,
    ) -> Result<PaymentMethodSnapshot, PaymentError>;

    /// Registers the payment with the gateway.
    async fn initiate_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentInitiation, PaymentError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    methods: HashMap<PaymentMethodId, (PaymentMethodSnapshot, bool)>,
    initiated: Vec<PaymentRequest>,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
    fail_on_initiate: Arc<AtomicBool>,
    gateway_url: String,
}

impl Default for InMemoryPaymentService {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            fail_on_initiate: Arc::default(),
            gateway_url: "https://sandbox.pay.local".to_string(),
        }
    }
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an active payment method.
    pub async fn add_method(
        &self,
        method_id: impl Into<PaymentMethodId>,
        name: impl Into<String>,
        method_type: PaymentMethodType,
    ) {
        let id = method_id.into();
        let snapshot = PaymentMethodSnapshot {
            id: id.clone(),
            name: name.into(),
            method_type,
        };
        self.state.lock().await.methods.insert(id, (snapshot, true));
    }

    pub async fn deactivate_method(&self, method_id: &PaymentMethodId) {
        if let Some((_, active)) = self.state.lock().await.methods.get_mut(method_id) {
            *active = false;
        }
    }

    /// Configures the gateway to reject payment requests.
    pub fn set_fail_on_initiate(&self, fail: bool) {
        self.fail_on_initiate.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of payment requests the gateway accepted.
    pub async fn payment_count(&self) -> usize {
        self.state.lock().await.initiated.len()
    }

    pub async fn last_request(&self) -> Option<PaymentRequest> {
        self.state.lock().await.initiated.last().cloned()
    }
}

#[async_trait]
impl PaymentAdapter for InMemoryPaymentService {
    async fn payment_method(
        &self,
        method_id: &PaymentMethodId,
    ) -> Result<PaymentMethodSnapshot, PaymentError> {
        let state = self.state.lock().await;
        match state.methods.get(method_id) {
            Some((snapshot, true)) => Ok(snapshot.clone()),
            Some((_, false)) => Err(PaymentError::MethodInactive(method_id.clone())),
            None => Err(PaymentError::UnknownMethod(method_id.clone())),
        }
    }

    async fn initiate_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentInitiation, PaymentError> {
        if self.fail_on_initiate.load(Ordering::SeqCst) {
            return Err(PaymentError::Gateway("gateway timed out".to_string()));
        }

        let initiation = match request.method.method_type {
            PaymentMethodType::Online => PaymentInitiation::Redirect {
                url: format!(
                    "{}/checkout?order={}&txn={}&amount={}",
                    self.gateway_url, request.order_code, request.transaction_id, request.amount
                ),
            },
            PaymentMethodType::Offline => PaymentInitiation::Confirmed,
        };

        self.state.lock().await.initiated.push(request.clone());
        Ok(initiation)
    }
}
