use {
    super::BoxFuture,
    super::error::PipelineError,
    super::id::RemoteId,
    super::money::Money,
    super::subscription::BillingCadence,
    chrono::{DateTime, Utc},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePaymentStatus {
    Pending,
    InProcess,
    Authorized,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
}

impl RemotePaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProcess => "in_process",
            Self::Authorized => "authorized",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::ChargedBack => "charged_back",
        }
    }
}

impl TryFrom<&str> for RemotePaymentStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_process" | "in_mediation" => Ok(Self::InProcess),
            "authorized" => Ok(Self::Authorized),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            "charged_back" => Ok(Self::ChargedBack),
            other => Err(PipelineError::GatewayDecode(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSubscriptionStatus {
    Pending,
    Authorized,
    Paused,
    Cancelled,
    Finished,
}

impl RemoteSubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorized => "authorized",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
        }
    }
}

impl TryFrom<&str> for RemoteSubscriptionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "authorized" | "active" => Ok(Self::Authorized),
            "paused" => Ok(Self::Paused),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "finished" | "expired" => Ok(Self::Finished),
            other => Err(PipelineError::GatewayDecode(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

/// Canonical payment state as returned by the gateway.
#[derive(Debug, Clone)]
pub struct RemotePayment {
    pub id: RemoteId,
    pub status: RemotePaymentStatus,
    pub money: Money,
    pub external_reference: Option<String>,
    pub payment_method: Option<String>,
    /// Set when the gateway charged this payment on behalf of a subscription.
    pub subscription_id: Option<RemoteId>,
    pub metadata: serde_json::Value,
    pub approved_at: Option<DateTime<Utc>>,
}

/// Canonical subscription state as returned by the gateway.
#[derive(Debug, Clone)]
pub struct RemoteSubscription {
    pub id: RemoteId,
    pub status: RemoteSubscriptionStatus,
    pub external_reference: Option<String>,
    pub next_payment_at: Option<DateTime<Utc>>,
    pub cadence: Option<BillingCadence>,
    pub money: Option<Money>,
    /// Gateway modification stamp. Moves on every remote change.
    pub last_modified: Option<DateTime<Utc>>,
}

/// What we ask the gateway to create.
#[derive(Debug, Clone)]
pub struct SubscriptionSpec {
    pub external_reference: String,
    pub payer_email: String,
    pub reason: String,
    pub cadence: BillingCadence,
    pub money: Money,
    pub back_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedSubscription {
    pub id: RemoteId,
    /// Checkout URL the customer is sent to, if the gateway returns one.
    pub init_point: Option<String>,
}

/// Gateway API. Errors are `NotFound`, `Transient` or `GatewayDecode`.
pub trait PaymentGateway: Send + Sync {
    fn get_payment<'a>(
        &'a self,
        id: &'a RemoteId,
    ) -> BoxFuture<'a, Result<RemotePayment, PipelineError>>;

    fn get_subscription<'a>(
        &'a self,
        id: &'a RemoteId,
    ) -> BoxFuture<'a, Result<RemoteSubscription, PipelineError>>;

    fn create_subscription<'a>(
        &'a self,
        spec: &'a SubscriptionSpec,
    ) -> BoxFuture<'a, Result<CreatedSubscription, PipelineError>>;

    fn cancel_subscription<'a>(
        &'a self,
        id: &'a RemoteId,
    ) -> BoxFuture<'a, Result<RemoteSubscription, PipelineError>>;
}
