//! In-process store with the same uniqueness and compare-and-set rules as
//! the Postgres schema. Used by the test suite and for local runs without a
//! database.

use {
    crate::domain::{
        BoxFuture,
        audit::NewSyncLogEntry,
        error::PipelineError,
        payment::{NewPaymentRecord, PaymentRecord, PaymentStatus, PaymentUpdate},
        store::{LockStore, PaymentStore, ResultStore, SubscriptionStore},
        subscription::{NewSubscription, SubscriptionRecord, SubscriptionStatus, SubscriptionUpdate},
    },
    chrono::{DateTime, Utc},
    std::{
        collections::HashMap,
        sync::{Mutex, MutexGuard, PoisonError},
    },
    uuid::Uuid,
};

struct LockRow {
    owner: String,
    expires_at: DateTime<Utc>,
}

struct ResultRow {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    locks: HashMap<String, LockRow>,
    results: HashMap<String, ResultRow>,
    payments: Vec<PaymentRecord>,
    subscriptions: Vec<SubscriptionRecord>,
    sync_log: Vec<NewSyncLogEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every sync-log entry written so far, oldest first.
    pub fn sync_log(&self) -> Vec<NewSyncLogEntry> {
        self.tables().sync_log.clone()
    }

    pub fn lock_count(&self) -> usize {
        self.tables().locks.len()
    }

    /// Rewrites `created_at`, for exercising the staleness sweep.
    pub fn backdate_subscription(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(sub) = self.tables().subscriptions.iter_mut().find(|s| s.id == id) {
            sub.created_at = created_at;
            sub.last_synced_at = None;
        }
    }

    pub fn backdate_payment(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(payment) = self.tables().payments.iter_mut().find(|p| p.id == id) {
            payment.created_at = created_at;
            payment.last_synced_at = None;
        }
    }

    /// Links a remote payment id, as a checkout redirect would.
    pub fn link_remote_payment(&self, id: Uuid, remote_id: &str) {
        if let Some(payment) = self.tables().payments.iter_mut().find(|p| p.id == id) {
            payment.remote_payment_id = Some(remote_id.to_string());
        }
    }
}

impl LockStore for MemoryStore {
    fn purge_expired_locks(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(async move {
            let mut tables = self.tables();
            let before = tables.locks.len();
            tables.locks.retain(|_, row| row.expires_at >= now);
            Ok((before - tables.locks.len()) as u64)
        })
    }

    fn try_insert_lock<'a>(
        &'a self,
        name: &'a str,
        owner: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(async move {
            let mut tables = self.tables();
            if tables.locks.contains_key(name) {
                return Ok(false);
            }
            tables.locks.insert(
                name.to_string(),
                LockRow {
                    owner: owner.to_string(),
                    expires_at,
                },
            );
            Ok(true)
        })
    }

    fn delete_lock<'a>(
        &'a self,
        name: &'a str,
        owner: &'a str,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(async move {
            let mut tables = self.tables();
            match tables.locks.get(name) {
                Some(row) if row.owner == owner => {
                    tables.locks.remove(name);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

impl ResultStore for MemoryStore {
    fn get_result<'a>(
        &'a self,
        key: &'a str,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<String>, PipelineError>> {
        Box::pin(async move {
            let tables = self.tables();
            Ok(tables
                .results
                .get(key)
                .filter(|row| row.expires_at > now)
                .map(|row| row.value.clone()))
        })
    }

    fn upsert_result<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            self.tables().results.insert(
                key.to_string(),
                ResultRow {
                    value: value.to_string(),
                    expires_at,
                },
            );
            Ok(())
        })
    }

    fn purge_expired_results(
        &self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(async move {
            let mut tables = self.tables();
            let before = tables.results.len();
            tables.results.retain(|_, row| row.expires_at >= now);
            Ok((before - tables.results.len()) as u64)
        })
    }
}

impl PaymentStore for MemoryStore {
    fn insert_payment<'a>(
        &'a self,
        payment: &'a NewPaymentRecord,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(async move {
            let mut tables = self.tables();
            if tables.payments.iter().any(|p| p.reference == payment.reference) {
                return Ok(false);
            }
            tables.payments.push(PaymentRecord {
                id: payment.id,
                remote_payment_id: None,
                status: PaymentStatus::Pending,
                money: payment.money.clone(),
                payment_method: None,
                reference: payment.reference.clone(),
                customer_email: payment.customer_email.clone(),
                created_at: Utc::now(),
                confirmed_at: None,
                last_synced_at: None,
            });
            Ok(true)
        })
    }

    fn get_payment(&self, id: Uuid) -> BoxFuture<'_, Result<Option<PaymentRecord>, PipelineError>> {
        Box::pin(async move { Ok(self.tables().payments.iter().find(|p| p.id == id).cloned()) })
    }

    fn find_payment_by_remote_id<'a>(
        &'a self,
        remote_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaymentRecord>, PipelineError>> {
        Box::pin(async move {
            Ok(self
                .tables()
                .payments
                .iter()
                .find(|p| p.remote_payment_id.as_deref() == Some(remote_id))
                .cloned())
        })
    }

    fn find_payment_by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaymentRecord>, PipelineError>> {
        Box::pin(async move {
            Ok(self
                .tables()
                .payments
                .iter()
                .find(|p| p.reference == reference)
                .cloned())
        })
    }

    fn apply_payment_update<'a>(
        &'a self,
        update: &'a PaymentUpdate,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(async move {
            let mut tables = self.tables();

            if let Some(remote_id) = update.remote_payment_id.as_deref() {
                let taken = tables.payments.iter().any(|p| {
                    p.id != update.id && p.remote_payment_id.as_deref() == Some(remote_id)
                });
                if taken {
                    return Err(PipelineError::InvalidTransition(format!(
                        "remote payment id {remote_id} already linked to another payment"
                    )));
                }
            }

            let Some(row) = tables
                .payments
                .iter_mut()
                .find(|p| p.id == update.id && p.status == update.expected_status)
            else {
                return Ok(false);
            };

            if row.remote_payment_id.is_none() {
                row.remote_payment_id = update.remote_payment_id.clone();
            }
            if let (PaymentStatus::Pending, Some(money)) = (row.status, update.money.as_ref()) {
                row.money = money.clone();
            }
            if update.payment_method.is_some() {
                row.payment_method = update.payment_method.clone();
            }
            if row.confirmed_at.is_none() {
                row.confirmed_at = update.confirmed_at;
            }
            row.status = update.status;
            row.last_synced_at = Some(update.synced_at);

            tables.sync_log.push(update.log.clone());
            Ok(true)
        })
    }

    fn list_stale_payments(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<PaymentRecord>, PipelineError>> {
        Box::pin(async move {
            let tables = self.tables();
            let mut stale: Vec<PaymentRecord> = tables
                .payments
                .iter()
                .filter(|p| {
                    p.status == PaymentStatus::Pending
                        && p.created_at < older_than
                        && p.last_synced_at.is_none_or(|t| t < older_than)
                })
                .cloned()
                .collect();
            stale.sort_by_key(|p| p.created_at);
            stale.truncate(usize::try_from(limit).unwrap_or(0));
            Ok(stale)
        })
    }
}

impl SubscriptionStore for MemoryStore {
    fn insert_subscription<'a>(
        &'a self,
        subscription: &'a NewSubscription,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(async move {
            let mut tables = self.tables();
            if tables
                .subscriptions
                .iter()
                .any(|s| s.external_reference == subscription.external_reference)
            {
                return Ok(false);
            }
            tables.subscriptions.push(SubscriptionRecord {
                id: subscription.id,
                owner_id: subscription.owner_id.clone(),
                owner_email: subscription.owner_email.clone(),
                plan_id: subscription.plan_id.clone(),
                remote_subscription_id: None,
                status: SubscriptionStatus::Pending,
                external_reference: subscription.external_reference.clone(),
                cadence: subscription.cadence,
                pricing: subscription.pricing,
                currency: subscription.currency,
                next_billing_at: None,
                last_billing_at: None,
                activated_at: None,
                activation_source: None,
                last_synced_at: None,
                created_at: Utc::now(),
            });
            Ok(true)
        })
    }

    fn get_subscription(
        &self,
        id: Uuid,
    ) -> BoxFuture<'_, Result<Option<SubscriptionRecord>, PipelineError>> {
        Box::pin(async move {
            Ok(self
                .tables()
                .subscriptions
                .iter()
                .find(|s| s.id == id)
                .cloned())
        })
    }

    fn find_subscription_by_remote_id<'a>(
        &'a self,
        remote_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SubscriptionRecord>, PipelineError>> {
        Box::pin(async move {
            Ok(self
                .tables()
                .subscriptions
                .iter()
                .find(|s| s.remote_subscription_id.as_deref() == Some(remote_id))
                .cloned())
        })
    }

    fn find_subscription_by_reference<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<SubscriptionRecord>, PipelineError>> {
        Box::pin(async move {
            Ok(self
                .tables()
                .subscriptions
                .iter()
                .find(|s| s.external_reference == reference)
                .cloned())
        })
    }

    fn latest_subscription_for<'a>(
        &'a self,
        owner_id: &'a str,
        plan_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SubscriptionRecord>, PipelineError>> {
        Box::pin(async move {
            Ok(self
                .tables()
                .subscriptions
                .iter()
                .filter(|s| s.owner_id == owner_id && s.plan_id == plan_id)
                .max_by_key(|s| (s.created_at, s.id))
                .cloned())
        })
    }

    fn apply_subscription_update<'a>(
        &'a self,
        update: &'a SubscriptionUpdate,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(async move {
            let mut tables = self.tables();

            let Some(index) = tables
                .subscriptions
                .iter()
                .position(|s| s.id == update.id && s.status == update.expected_status)
            else {
                return Ok(false);
            };

            let (owner_id, plan_id) = {
                let row = &tables.subscriptions[index];
                (row.owner_id.clone(), row.plan_id.clone())
            };
            let conflict = tables.subscriptions.iter().any(|s| {
                s.id != update.id
                    && ((update.status == SubscriptionStatus::Active
                        && s.status == SubscriptionStatus::Active
                        && s.owner_id == owner_id
                        && s.plan_id == plan_id)
                        || (update.remote_subscription_id.is_some()
                            && s.remote_subscription_id == update.remote_subscription_id))
            });
            if conflict {
                return Err(PipelineError::InvalidTransition(format!(
                    "subscription {} conflicts with an existing active subscription or remote id",
                    update.id
                )));
            }

            let row = &mut tables.subscriptions[index];
            if row.remote_subscription_id.is_none() {
                row.remote_subscription_id = update.remote_subscription_id.clone();
            }
            if row.activated_at.is_none() {
                row.activated_at = update.activated_at;
            }
            if row.activation_source.is_none() {
                row.activation_source = update.activation_source;
            }
            if update.next_billing_at.is_some() {
                row.next_billing_at = update.next_billing_at;
            }
            if update.last_billing_at.is_some() {
                row.last_billing_at = update.last_billing_at;
            }
            row.status = update.status;
            row.last_synced_at = Some(update.synced_at);

            tables.sync_log.push(update.log.clone());
            Ok(true)
        })
    }

    fn list_stale_subscriptions(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<SubscriptionRecord>, PipelineError>> {
        Box::pin(async move {
            let tables = self.tables();
            let mut stale: Vec<SubscriptionRecord> = tables
                .subscriptions
                .iter()
                .filter(|s| {
                    s.status == SubscriptionStatus::Pending
                        && s.created_at < older_than
                        && s.last_synced_at.is_none_or(|t| t < older_than)
                })
                .cloned()
                .collect();
            stale.sort_by_key(|s| s.created_at);
            stale.truncate(usize::try_from(limit).unwrap_or(0));
            Ok(stale)
        })
    }
}
