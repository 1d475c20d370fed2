pub mod audit_repo;
pub mod lock_repo;
pub mod payment_repo;
pub mod result_repo;
pub mod subscription_repo;

use {
    crate::domain::{
        BoxFuture,
        error::PipelineError,
        payment::{NewPaymentRecord, PaymentRecord, PaymentUpdate},
        store::{LockStore, PaymentStore, ResultStore, SubscriptionStore},
        subscription::{NewSubscription, SubscriptionRecord, SubscriptionUpdate},
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

/// Store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl LockStore for PgStore {
    fn purge_expired_locks(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(lock_repo::purge_expired(&self.pool, now))
    }

    fn try_insert_lock<'a>(
        &'a self,
        name: &'a str,
        owner: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(lock_repo::try_insert(&self.pool, name, owner, expires_at))
    }

    fn delete_lock<'a>(
        &'a self,
        name: &'a str,
        owner: &'a str,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(lock_repo::delete(&self.pool, name, owner))
    }
}

impl ResultStore for PgStore {
    fn get_result<'a>(
        &'a self,
        key: &'a str,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<String>, PipelineError>> {
        Box::pin(result_repo::get(&self.pool, key, now))
    }

    fn upsert_result<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(result_repo::upsert(&self.pool, key, value, expires_at))
    }

    fn purge_expired_results(
        &self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(result_repo::purge_expired(&self.pool, now))
    }
}

impl PaymentStore for PgStore {
    fn insert_payment<'a>(
        &'a self,
        payment: &'a NewPaymentRecord,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(payment_repo::insert_payment(&self.pool, payment))
    }

    fn get_payment(&self, id: Uuid) -> BoxFuture<'_, Result<Option<PaymentRecord>, PipelineError>> {
        Box::pin(payment_repo::get_payment(&self.pool, id))
    }

    fn find_payment_by_remote_id<'a>(
        &'a self,
        remote_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaymentRecord>, PipelineError>> {
        Box::pin(payment_repo::find_by_remote_id(&self.pool, remote_id))
    }

    fn find_payment_by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaymentRecord>, PipelineError>> {
        Box::pin(payment_repo::find_by_reference(&self.pool, reference))
    }

    fn apply_payment_update<'a>(
        &'a self,
        update: &'a PaymentUpdate,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(payment_repo::apply_update(&self.pool, update))
    }

    fn list_stale_payments(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<PaymentRecord>, PipelineError>> {
        Box::pin(payment_repo::list_stale(&self.pool, older_than, limit))
    }
}

impl SubscriptionStore for PgStore {
    fn insert_subscription<'a>(
        &'a self,
        subscription: &'a NewSubscription,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(subscription_repo::insert_subscription(&self.pool, subscription))
    }

    fn get_subscription(
        &self,
        id: Uuid,
    ) -> BoxFuture<'_, Result<Option<SubscriptionRecord>, PipelineError>> {
        Box::pin(subscription_repo::get_subscription(&self.pool, id))
    }

    fn find_subscription_by_remote_id<'a>(
        &'a self,
        remote_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SubscriptionRecord>, PipelineError>> {
        Box::pin(subscription_repo::find_by_remote_id(&self.pool, remote_id))
    }

    fn find_subscription_by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<SubscriptionRecord>, PipelineError>> {
        Box::pin(subscription_repo::find_by_reference(&self.pool, reference))
    }

    fn latest_subscription_for<'a>(
        &'a self,
        owner_id: &'a str,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SubscriptionRecord>, PipelineError>> {
        Box::pin(subscription_repo::latest_for(&self.pool, owner_id, plan_id))
    }

    fn apply_subscription_update<'a>(
        &'a self,
        update: &'a SubscriptionUpdate,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(subscription_repo::apply_update(&self.pool, update))
    }

    fn list_stale_subscriptions(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<SubscriptionRecord>, PipelineError>> {
        Box::pin(subscription_repo::list_stale(&self.pool, older_than, limit))
    }
}
