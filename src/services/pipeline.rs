use {
    super::{
        classifier::classify,
        fetcher::StateFetcher,
        lock_manager::LockManager,
        reconciler::{ReconcileOutcome, Reconciler},
        result_cache::{ResultCache, cache_key},
    },
    crate::domain::{
        audit::Actor,
        error::PipelineError,
        id::RemoteId,
        notification::{Notification, NotificationKind},
        payment::PaymentRecord,
        provider::{RemotePayment, RemoteSubscription},
        subscription::{SubscriptionRecord, SubscriptionStatus},
    },
    serde::Serialize,
    std::future::Future,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum ProcessResult {
    /// This call did the work.
    Reconciled(ReconcileOutcome),
    /// Someone already applied this exact fetched state.
    Cached(ReconcileOutcome),
    /// Another worker holds the resource lock; it will apply the state.
    Contended,
    Ignored(String),
}

impl ProcessResult {
    pub fn status(&self) -> &str {
        match self {
            Self::Reconciled(outcome) => outcome.status(),
            Self::Cached(_) => "duplicate",
            Self::Contended => "in_progress",
            Self::Ignored(_) => "ignored",
        }
    }
}

/// Fetch, lock, check the cache, reconcile, store the result, release.
/// Shared by the webhook handler and the staleness sweeper.
#[derive(Clone)]
pub struct NotificationPipeline {
    fetcher: StateFetcher,
    locks: LockManager,
    cache: ResultCache,
    reconciler: Reconciler,
}

impl NotificationPipeline {
    pub fn new(
        fetcher: StateFetcher,
        locks: LockManager,
        cache: ResultCache,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            fetcher,
            locks,
            cache,
            reconciler,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn handle(
        &self,
        notification: &Notification,
        actor: Actor,
    ) -> Result<ProcessResult, PipelineError> {
        let kind = classify(notification, None);
        if kind == NotificationKind::Unrecognized {
            tracing::info!(
                notification_id = notification.log_id(),
                event_type = ?notification.event_type,
                action = ?notification.action,
                "unrecognized notification, acknowledging"
            );
            return Ok(ProcessResult::Ignored("unrecognized".into()));
        }

        let resource_id = notification.resource_id()?;
        tracing::debug!(kind = kind.as_str(), %resource_id, "notification classified");

        if kind == NotificationKind::SubscriptionLifecycle {
            let remote = self.fetcher.fetch_subscription(&resource_id).await?;
            return self.apply_subscription(remote, actor).await;
        }

        let payment = self.fetcher.fetch_payment(&resource_id).await?;
        match classify(notification, Some(&payment)) {
            NotificationKind::SubscriptionPayment => {
                self.apply_subscription_payment(payment, actor).await
            }
            _ => self.apply_payment(payment, actor).await,
        }
    }

    pub async fn apply_payment(
        &self,
        remote: RemotePayment,
        actor: Actor,
    ) -> Result<ProcessResult, PipelineError> {
        let record = self.reconciler.locate_payment(&remote).await?;
        self.reconcile_payment_locked(record, remote, actor).await
    }

    pub async fn apply_subscription(
        &self,
        remote: RemoteSubscription,
        actor: Actor,
    ) -> Result<ProcessResult, PipelineError> {
        let record = self
            .reconciler
            .locate_subscription(Some(remote.id.as_str()), remote.external_reference.as_deref())
            .await?;
        self.reconcile_subscription_locked(record, remote, actor).await
    }

    pub async fn apply_subscription_payment(
        &self,
        payment: RemotePayment,
        actor: Actor,
    ) -> Result<ProcessResult, PipelineError> {
        let record = self
            .reconciler
            .locate_subscription_for_payment(&payment)
            .await?;
        let key = cache_key(
            "subscription_payment",
            payment.id.as_str(),
            payment.status.as_str(),
        );

        self.run_locked(&record.lock_name(), &key, || async {
            let current = self.reload_subscription(&record).await?;
            self.reconciler
                .reconcile_subscription_payment(&current, &payment, actor)
                .await
        })
        .await
    }

    /// Re-drives a pending subscription from its remote state. A record the
    /// gateway never heard of, or no longer knows, is moved to `error`.
    pub async fn resync_subscription(
        &self,
        record: SubscriptionRecord,
        actor: Actor,
    ) -> Result<ProcessResult, PipelineError> {
        let Some(remote_id) = record.remote_subscription_id.clone() else {
            return self
                .mark_error_locked(record, "no remote subscription created", actor)
                .await;
        };
        let remote_id = RemoteId::new(remote_id)?;

        match self.fetcher.fetch_subscription(&remote_id).await {
            Ok(remote) => self.reconcile_subscription_locked(record, remote, actor).await,
            Err(PipelineError::NotFound(_)) => {
                self.mark_error_locked(record, "remote subscription not found", actor)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Re-drives a pending order payment. Without a remote id there is
    /// nothing to ask the gateway about yet.
    pub async fn resync_payment(
        &self,
        record: PaymentRecord,
        actor: Actor,
    ) -> Result<ProcessResult, PipelineError> {
        let Some(remote_id) = record.remote_payment_id.clone() else {
            return Ok(ProcessResult::Ignored("no_remote_id".into()));
        };
        let remote = self.fetcher.fetch_payment(&RemoteId::new(remote_id)?).await?;
        self.reconcile_payment_locked(record, remote, actor).await
    }

    async fn reconcile_payment_locked(
        &self,
        record: PaymentRecord,
        remote: RemotePayment,
        actor: Actor,
    ) -> Result<ProcessResult, PipelineError> {
        let key = cache_key("payment", remote.id.as_str(), remote.status.as_str());

        self.run_locked(&record.lock_name(), &key, || async {
            let current = self
                .reconciler
                .reload_payment(record.id)
                .await?;
            self.reconciler
                .reconcile_payment(&current, &remote, actor)
                .await
        })
        .await
    }

    async fn reconcile_subscription_locked(
        &self,
        record: SubscriptionRecord,
        remote: RemoteSubscription,
        actor: Actor,
    ) -> Result<ProcessResult, PipelineError> {
        let key = cache_key(
            "subscription",
            remote.id.as_str(),
            &subscription_state(&record, &remote),
        );

        self.run_locked(&record.lock_name(), &key, || async {
            let current = self.reload_subscription(&record).await?;
            self.reconciler
                .reconcile_subscription(&current, &remote, actor)
                .await
        })
        .await
    }

    async fn mark_error_locked(
        &self,
        record: SubscriptionRecord,
        reason: &str,
        actor: Actor,
    ) -> Result<ProcessResult, PipelineError> {
        let key = cache_key("subscription_error", &record.id.to_string(), "error");

        self.run_locked(&record.lock_name(), &key, || async {
            let current = self.reload_subscription(&record).await?;
            self.reconciler
                .force_subscription_status(&current, SubscriptionStatus::Error, reason, actor)
                .await
        })
        .await
    }

    async fn reload_subscription(
        &self,
        record: &SubscriptionRecord,
    ) -> Result<SubscriptionRecord, PipelineError> {
        self.reconciler.reload_subscription(record.id).await
    }

    /// Lock, double-checked cache lookup, then `op`. A busy lock means the
    /// holder is applying the same state, so it is not an error.
    async fn run_locked<F, Fut>(
        &self,
        lock_name: &str,
        key: &str,
        op: F,
    ) -> Result<ProcessResult, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ReconcileOutcome, PipelineError>>,
    {
        if let Some(cached) = self.cache.get::<ReconcileOutcome>(key).await {
            tracing::debug!(key, "cache hit before lock");
            return Ok(ProcessResult::Cached(cached));
        }

        let handle = match self.locks.acquire(lock_name).await {
            Ok(handle) => handle,
            Err(PipelineError::LockUnavailable(_)) => {
                if let Some(cached) = self.cache.get::<ReconcileOutcome>(key).await {
                    return Ok(ProcessResult::Cached(cached));
                }
                tracing::info!(lock = lock_name, key, "resource busy, leaving it to the holder");
                return Ok(ProcessResult::Contended);
            }
            Err(e) => return Err(e),
        };

        let result = match self.cache.get::<ReconcileOutcome>(key).await {
            Some(cached) => Ok(ProcessResult::Cached(cached)),
            None => match op().await {
                Ok(outcome) => {
                    if !matches!(outcome, ReconcileOutcome::Ignored { .. }) {
                        self.cache.put(key, &outcome).await;
                    }
                    Ok(ProcessResult::Reconciled(outcome))
                }
                Err(e) => Err(e),
            },
        };

        if let Err(e) = self.locks.release(handle).await {
            tracing::error!(lock = lock_name, error = %e, "lock release failed, it will expire");
        }

        result
    }
}

/// Subscriptions can cycle (active, paused, active), so the remote status
/// alone does not name a change. The gateway's modification stamp does;
/// without one, the local status read before locking scopes the key.
fn subscription_state(record: &SubscriptionRecord, remote: &RemoteSubscription) -> String {
    match remote.last_modified {
        Some(stamp) => format!("{}@{}", remote.status.as_str(), stamp.timestamp_millis()),
        None => format!("{}->{}", record.status.as_str(), remote.status.as_str()),
    }
}
