use {
    super::{
        fetcher::StateFetcher,
        lock_manager::{LockHandle, LockManager},
        reconciler::{ReconcileOutcome, Reconciler},
    },
    crate::domain::{
        audit::{Actor, EntityType, NewSyncLogEntry},
        error::PipelineError,
        id::RemoteId,
        money::{Currency, Money, MoneyAmount},
        provider::SubscriptionSpec,
        reference::subscription_reference,
        store::SubscriptionStore,
        subscription::{
            BillingCadence, NewSubscription, Pricing, SubscriptionRecord, SubscriptionStatus,
            SubscriptionUpdate,
        },
    },
    chrono::Utc,
    serde::{Deserialize, Serialize},
    serde_json::json,
    std::{future::Future, sync::Arc, time::Duration},
    uuid::Uuid,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    pub owner_id: String,
    pub owner_email: String,
    pub plan_id: String,
    /// Minor units.
    pub base_price: i64,
    #[serde(default)]
    pub discount_percent: u8,
    pub currency: Currency,
    #[serde(default)]
    pub cadence: Option<BillingCadence>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubscribeOutcome {
    Created {
        subscription_id: Uuid,
        external_reference: String,
        remote_subscription_id: String,
        init_point: Option<String>,
    },
    /// An equivalent intent is already live or being created.
    Duplicate {
        subscription_id: Option<Uuid>,
        external_reference: Option<String>,
    },
}

#[derive(Clone)]
pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionStore>,
    locks: LockManager,
    fetcher: StateFetcher,
    reconciler: Reconciler,
    dedup_window: Duration,
    back_url: Option<String>,
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        locks: LockManager,
        fetcher: StateFetcher,
        reconciler: Reconciler,
        dedup_window: Duration,
        back_url: Option<String>,
    ) -> Self {
        Self {
            subscriptions,
            locks,
            fetcher,
            reconciler,
            dedup_window,
            back_url,
        }
    }

    /// Records a subscribe intent and creates it at the gateway, unless an
    /// equivalent intent already exists for the same owner and plan.
    pub async fn subscribe(
        &self,
        request: &SubscribeRequest,
    ) -> Result<SubscribeOutcome, PipelineError> {
        if request.owner_email.trim().is_empty() {
            return Err(PipelineError::Validation("owner_email cannot be empty".into()));
        }
        let pricing = Pricing::new(MoneyAmount::new(request.base_price)?, request.discount_percent)?;
        let cadence = request.cadence.unwrap_or_else(BillingCadence::monthly);
        let reference = subscription_reference(
            &request.owner_id,
            &request.plan_id,
            Some(pricing.effective),
            Some(request.currency),
            None,
        )?;

        let lock_name = format!("subscribe:{}:{}", request.owner_id, request.plan_id);
        let handle = match self.locks.acquire(&lock_name).await {
            Ok(handle) => handle,
            Err(PipelineError::LockUnavailable(_)) => {
                tracing::info!(owner_id = %request.owner_id, plan_id = %request.plan_id, "subscribe already in flight");
                return Ok(SubscribeOutcome::Duplicate {
                    subscription_id: None,
                    external_reference: Some(reference),
                });
            }
            Err(e) => return Err(e),
        };

        let result = self
            .subscribe_locked(request, reference, cadence, pricing)
            .await;
        self.release(handle).await;
        result
    }

    async fn subscribe_locked(
        &self,
        request: &SubscribeRequest,
        mut reference: String,
        cadence: BillingCadence,
        pricing: Pricing,
    ) -> Result<SubscribeOutcome, PipelineError> {
        let window = chrono::Duration::from_std(self.dedup_window)
            .map_err(|e| PipelineError::Configuration(format!("dedup window out of range: {e}")))?;

        if let Some(latest) = self
            .subscriptions
            .latest_subscription_for(&request.owner_id, &request.plan_id)
            .await?
        {
            if latest.blocks_new_intent(Utc::now(), window) {
                tracing::info!(
                    subscription_id = %latest.id,
                    status = %latest.status,
                    "duplicate subscribe intent"
                );
                return Ok(SubscribeOutcome::Duplicate {
                    subscription_id: Some(latest.id),
                    external_reference: Some(latest.external_reference),
                });
            }
        }

        // The deterministic reference belongs to a finished intent; a fresh
        // one needs a fresh reference.
        if self
            .subscriptions
            .find_subscription_by_reference(&reference)
            .await?
            .is_some()
        {
            let salt = Utc::now().timestamp_millis().to_string();
            reference = subscription_reference(
                &request.owner_id,
                &request.plan_id,
                Some(pricing.effective),
                Some(request.currency),
                Some(&salt),
            )?;
        }

        let new = NewSubscription {
            id: Uuid::now_v7(),
            owner_id: request.owner_id.clone(),
            owner_email: request.owner_email.clone(),
            plan_id: request.plan_id.clone(),
            external_reference: reference.clone(),
            cadence,
            pricing,
            currency: request.currency,
        };
        if !self.subscriptions.insert_subscription(&new).await? {
            return Ok(SubscribeOutcome::Duplicate {
                subscription_id: None,
                external_reference: Some(reference),
            });
        }
        tracing::info!(subscription_id = %new.id, external_reference = %reference, "subscription intent recorded");

        let spec = SubscriptionSpec {
            external_reference: reference.clone(),
            payer_email: request.owner_email.clone(),
            reason: request
                .reason
                .clone()
                .unwrap_or_else(|| format!("Plan {}", request.plan_id)),
            cadence,
            money: Money::new(pricing.effective, request.currency),
            back_url: self.back_url.clone(),
        };

        let created = match self.fetcher.create_subscription(&spec).await {
            Ok(created) => created,
            Err(e) => {
                tracing::error!(subscription_id = %new.id, error = %e, "gateway rejected subscription");
                self.abandon(new.id, &e).await;
                return Err(e);
            }
        };

        let update = SubscriptionUpdate {
            id: new.id,
            expected_status: SubscriptionStatus::Pending,
            status: SubscriptionStatus::Pending,
            remote_subscription_id: Some(created.id.as_str().to_string()),
            activated_at: None,
            activation_source: None,
            next_billing_at: None,
            last_billing_at: None,
            synced_at: Utc::now(),
            log: NewSyncLogEntry::new(
                EntityType::Subscription,
                new.id,
                "remote_attached",
                Actor::Manual,
                json!({ "remote_subscription_id": created.id.as_str() }),
            ),
        };
        // A webhook may already have moved the row on; it attached the id.
        if !self.subscriptions.apply_subscription_update(&update).await? {
            tracing::info!(subscription_id = %new.id, "subscription advanced before remote id attach");
        }

        Ok(SubscribeOutcome::Created {
            subscription_id: new.id,
            external_reference: reference,
            remote_subscription_id: created.id.into_inner(),
            init_point: created.init_point,
        })
    }

    /// Cancels at the gateway and applies whatever state it reports back.
    /// Records that never reached the gateway are cancelled locally.
    pub async fn cancel(&self, subscription_id: Uuid) -> Result<ReconcileOutcome, PipelineError> {
        let record = self.reconciler.reload_subscription(subscription_id).await?;
        if record.status.is_terminal() {
            return Ok(ReconcileOutcome::Ignored {
                reason: format!("subscription already {}", record.status),
            });
        }

        self.with_record_lock(&record, || async {
            let current = self.reconciler.reload_subscription(record.id).await?;
            match current.remote_subscription_id.clone() {
                Some(remote_id) => {
                    let remote = self
                        .fetcher
                        .cancel_subscription(&RemoteId::new(remote_id)?)
                        .await?;
                    self.reconciler
                        .reconcile_subscription(&current, &remote, Actor::Manual)
                        .await
                }
                None => {
                    self.reconciler
                        .force_subscription_status(
                            &current,
                            SubscriptionStatus::Cancelled,
                            "cancelled before gateway creation",
                            Actor::Manual,
                        )
                        .await
                }
            }
        })
        .await
    }

    pub async fn get(&self, subscription_id: Uuid) -> Result<SubscriptionRecord, PipelineError> {
        self.reconciler.reload_subscription(subscription_id).await
    }

    async fn with_record_lock<F, Fut>(
        &self,
        record: &SubscriptionRecord,
        op: F,
    ) -> Result<ReconcileOutcome, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ReconcileOutcome, PipelineError>>,
    {
        let handle = self.locks.acquire(&record.lock_name()).await?;
        let result = op().await;
        self.release(handle).await;
        result
    }

    /// A failed creation must not keep blocking retries for the whole dedup
    /// window.
    async fn abandon(&self, id: Uuid, cause: &PipelineError) {
        let outcome = match self.reconciler.reload_subscription(id).await {
            Ok(record) => {
                self.reconciler
                    .force_subscription_status(
                        &record,
                        SubscriptionStatus::Error,
                        &format!("gateway creation failed: {cause}"),
                        Actor::Manual,
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            tracing::error!(subscription_id = %id, error = %e, "could not mark failed subscription");
        }
    }

    async fn release(&self, handle: LockHandle) {
        if let Err(e) = self.locks.release(handle).await {
            tracing::error!(error = %e, "lock release failed, it will expire");
        }
    }
}
