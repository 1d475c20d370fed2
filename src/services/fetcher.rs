use {
    super::retry::RetryPolicy,
    crate::domain::{
        error::PipelineError,
        id::RemoteId,
        provider::{
            CreatedSubscription, PaymentGateway, RemotePayment, RemoteSubscription,
            SubscriptionSpec,
        },
    },
    std::{future::Future, sync::Arc, time::Duration},
};

/// Reads authoritative state from the gateway. Notifications are only
/// triggers; this is the sole source of what we apply.
#[derive(Clone)]
pub struct StateFetcher {
    gateway: Arc<dyn PaymentGateway>,
    timeout: Duration,
    policy: RetryPolicy,
}

impl StateFetcher {
    pub fn new(gateway: Arc<dyn PaymentGateway>, timeout: Duration, policy: RetryPolicy) -> Self {
        Self {
            gateway,
            timeout,
            policy,
        }
    }

    pub async fn fetch_payment(&self, id: &RemoteId) -> Result<RemotePayment, PipelineError> {
        self.policy
            .run("fetch_payment", || {
                with_timeout(self.timeout, id, self.gateway.get_payment(id))
            })
            .await
    }

    pub async fn fetch_subscription(
        &self,
        id: &RemoteId,
    ) -> Result<RemoteSubscription, PipelineError> {
        self.policy
            .run("fetch_subscription", || {
                with_timeout(self.timeout, id, self.gateway.get_subscription(id))
            })
            .await
    }

    /// Single attempt: creation is not idempotent at the gateway.
    pub async fn create_subscription(
        &self,
        spec: &SubscriptionSpec,
    ) -> Result<CreatedSubscription, PipelineError> {
        match tokio::time::timeout(self.timeout, self.gateway.create_subscription(spec)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Transient(format!(
                "gateway did not confirm subscription {} within {}ms",
                spec.external_reference,
                self.timeout.as_millis()
            ))),
        }
    }

    pub async fn cancel_subscription(
        &self,
        id: &RemoteId,
    ) -> Result<RemoteSubscription, PipelineError> {
        self.policy
            .run("cancel_subscription", || {
                with_timeout(self.timeout, id, self.gateway.cancel_subscription(id))
            })
            .await
    }
}

/// A timeout is never evidence that the resource is missing.
async fn with_timeout<T>(
    limit: Duration,
    id: &RemoteId,
    call: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Transient(format!(
            "gateway did not answer for {id} within {}ms",
            limit.as_millis()
        ))),
    }
}
