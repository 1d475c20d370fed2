//! Data-access seams consumed by the engine.
//!
//! Every mutation of a payment or subscription row is a compare-and-set on the
//! status the caller last observed, committed together with its sync-log
//! entry. Implementations: `infra::postgres::PgStore`, `infra::memory::MemoryStore`.

use {
    super::BoxFuture,
    super::error::PipelineError,
    super::payment::{NewPaymentRecord, PaymentRecord, PaymentUpdate},
    super::subscription::{NewSubscription, SubscriptionRecord, SubscriptionUpdate},
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

pub trait LockStore: Send + Sync {
    /// Delete lock rows whose expiry is before `now`.
    fn purge_expired_locks(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64, PipelineError>>;

    /// Constrained insert. `Ok(false)` means the name is already held.
    fn try_insert_lock<'a>(
        &'a self,
        name: &'a str,
        owner: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool, PipelineError>>;

    /// Delete scoped to both name and owner. `Ok(false)` if nothing matched.
    fn delete_lock<'a>(
        &'a self,
        name: &'a str,
        owner: &'a str,
    ) -> BoxFuture<'a, Result<bool, PipelineError>>;
}

pub trait ResultStore: Send + Sync {
    /// Serialized outcome for `key`, ignoring rows expired at `now`.
    fn get_result<'a>(
        &'a self,
        key: &'a str,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<String>, PipelineError>>;

    fn upsert_result<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), PipelineError>>;

    fn purge_expired_results(&self, now: DateTime<Utc>)
    -> BoxFuture<'_, Result<u64, PipelineError>>;
}

pub trait PaymentStore: Send + Sync {
    /// `Ok(false)` when the reference already exists.
    fn insert_payment<'a>(
        &'a self,
        payment: &'a NewPaymentRecord,
    ) -> BoxFuture<'a, Result<bool, PipelineError>>;

    fn get_payment(&self, id: Uuid) -> BoxFuture<'_, Result<Option<PaymentRecord>, PipelineError>>;

    fn find_payment_by_remote_id<'a>(
        &'a self,
        remote_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaymentRecord>, PipelineError>>;

    fn find_payment_by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaymentRecord>, PipelineError>>;

    /// `Ok(false)` when the row no longer has `expected_status`.
    fn apply_payment_update<'a>(
        &'a self,
        update: &'a PaymentUpdate,
    ) -> BoxFuture<'a, Result<bool, PipelineError>>;

    /// Pending payments created and last synced before `older_than`.
    fn list_stale_payments(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<PaymentRecord>, PipelineError>>;
}

pub trait SubscriptionStore: Send + Sync {
    /// `Ok(false)` when the external reference already exists.
    fn insert_subscription<'a>(
        &'a self,
        subscription: &'a NewSubscription,
    ) -> BoxFuture<'a, Result<bool, PipelineError>>;

    fn get_subscription(
        &self,
        id: Uuid,
    ) -> BoxFuture<'_, Result<Option<SubscriptionRecord>, PipelineError>>;

    fn find_subscription_by_remote_id<'a>(
        &'a self,
        remote_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SubscriptionRecord>, PipelineError>>;

    fn find_subscription_by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<SubscriptionRecord>, PipelineError>>;

    /// Most recently created record for the pair, any status.
    fn latest_subscription_for<'a>(
        &'a self,
        owner_id: &'a str,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SubscriptionRecord>, PipelineError>>;

    /// `Ok(false)` when the row no longer has `expected_status`. Activating a
    /// second record for the same owner and plan fails with
    /// `InvalidTransition`.
    fn apply_subscription_update<'a>(
        &'a self,
        update: &'a SubscriptionUpdate,
    ) -> BoxFuture<'a, Result<bool, PipelineError>>;

    /// Pending subscriptions created and last synced before `older_than`.
    fn list_stale_subscriptions(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<SubscriptionRecord>, PipelineError>>;
}

/// Everything the engine needs from one backing store.
pub trait Store: LockStore + ResultStore + PaymentStore + SubscriptionStore {}

impl<T> Store for T where T: LockStore + ResultStore + PaymentStore + SubscriptionStore {}
