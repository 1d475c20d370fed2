use {
    crate::domain::{
        error::PipelineError,
        money::{Currency, Money, MoneyAmount},
        payment::{NewPaymentRecord, PaymentRecord},
        reference::{Namespace, ReferenceInput, generate},
        store::PaymentStore,
    },
    chrono::Utc,
    serde::{Deserialize, Serialize},
    std::sync::Arc,
    uuid::Uuid,
};

#[derive(Debug, Clone, Deserialize)]
pub struct OrderRequest {
    pub customer_id: String,
    pub customer_email: String,
    pub sku: String,
    /// Minor units.
    pub amount: i64,
    pub currency: Currency,
    /// Client-chosen key. Retries with the same key land on the same order.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderOutcome {
    Created { payment_id: Uuid, reference: String },
    Duplicate { payment_id: Uuid, reference: String },
}

/// Records pending order payments. The `reference` is what checkout passes
/// to the gateway as its external reference.
#[derive(Clone)]
pub struct OrderService {
    payments: Arc<dyn PaymentStore>,
}

impl OrderService {
    pub fn new(payments: Arc<dyn PaymentStore>) -> Self {
        Self { payments }
    }

    pub async fn create(&self, request: &OrderRequest) -> Result<OrderOutcome, PipelineError> {
        if request.customer_email.trim().is_empty() {
            return Err(PipelineError::Validation("customer_email cannot be empty".into()));
        }
        let amount = MoneyAmount::new(request.amount)?;

        let salt = match &request.idempotency_key {
            Some(key) => key.clone(),
            None => format!("{}:{}", Utc::now().timestamp_millis(), Uuid::now_v7()),
        };
        let reference = generate(&ReferenceInput {
            namespace: Namespace::Order,
            actor: &request.customer_id,
            plan: &request.sku,
            amount: Some(amount),
            currency: Some(request.currency),
            salt: Some(&salt),
        })?;

        let payment = NewPaymentRecord {
            id: Uuid::now_v7(),
            reference: reference.clone(),
            money: Money::new(amount, request.currency),
            customer_email: request.customer_email.clone(),
        };

        if self.payments.insert_payment(&payment).await? {
            tracing::info!(payment_id = %payment.id, reference = %reference, "order recorded");
            return Ok(OrderOutcome::Created {
                payment_id: payment.id,
                reference,
            });
        }

        let existing = self
            .payments
            .find_payment_by_reference(&reference)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("payment {reference}")))?;
        Ok(OrderOutcome::Duplicate {
            payment_id: existing.id,
            reference,
        })
    }

    pub async fn get(&self, payment_id: Uuid) -> Result<PaymentRecord, PipelineError> {
        self.payments
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("payment {payment_id}")))
    }
}
