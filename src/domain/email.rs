use {
    super::BoxFuture,
    super::error::PipelineError,
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    PaymentConfirmed,
    PaymentRefunded,
    SubscriptionActivated,
    SubscriptionCancelled,
    RenewalReceipt,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub template: TemplateKind,
    pub data: serde_json::Value,
}

/// Outbound transactional email. Callers log failures and move on.
pub trait EmailDispatcher: Send + Sync {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), PipelineError>>;
}
