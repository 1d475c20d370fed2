#![allow(dead_code)]

use chrono::{DateTime, Utc};
use recon_engine::domain::BoxFuture;
use recon_engine::domain::email::{EmailDispatcher, EmailMessage, TemplateKind};
use recon_engine::domain::error::PipelineError;
use recon_engine::domain::id::RemoteId;
use recon_engine::domain::money::{Currency, Money, MoneyAmount};
use recon_engine::domain::notification::Notification;
use recon_engine::domain::payment::PaymentRecord;
use recon_engine::domain::provider::{
    CreatedSubscription, PaymentGateway, RemotePayment, RemotePaymentStatus, RemoteSubscription,
    RemoteSubscriptionStatus, SubscriptionSpec,
};
use recon_engine::infra::memory::MemoryStore;
use recon_engine::services::orders::{OrderOutcome, OrderRequest};
use recon_engine::services::retry::{Backoff, RetryPolicy};
use recon_engine::services::subscriptions::{SubscribeOutcome, SubscribeRequest};
use recon_engine::services::sweeper::SweepSettings;
use recon_engine::services::{Engine, EngineSettings};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fake gateway ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GatewayMode {
    #[default]
    Normal,
    /// Never answers; exercises the fetch timeout.
    Hang,
    /// Answers every read with a 5xx-style transient failure.
    Unavailable,
}

/// In-memory gateway. Reads serve whatever state the test put there.
#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, RemotePayment>>,
    subscriptions: Mutex<HashMap<String, RemoteSubscription>>,
    mode: Mutex<GatewayMode>,
    reject_creates: AtomicBool,
    creates: AtomicUsize,
    reads: AtomicUsize,
    edits: AtomicUsize,
    omit_last_modified: AtomicBool,
}

impl FakeGateway {
    pub fn set_mode(&self, mode: GatewayMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn reject_creates(&self, reject: bool) {
        self.reject_creates.store(reject, Ordering::SeqCst);
    }

    pub fn put_payment(&self, payment: RemotePayment) {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.id.as_str().to_string(), payment);
    }

    pub fn put_subscription(&self, sub: RemoteSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(sub.id.as_str().to_string(), sub);
    }

    pub fn set_subscription_status(&self, id: &str, status: RemoteSubscriptionStatus) {
        let stamp = self.next_stamp();
        if let Some(sub) = self.subscriptions.lock().unwrap().get_mut(id) {
            sub.status = status;
            sub.last_modified = stamp;
        }
    }

    /// Serve preapprovals without `last_modified` from the next edit on.
    pub fn omit_last_modified(&self, omit: bool) {
        self.omit_last_modified.store(omit, Ordering::SeqCst);
    }

    /// Distinct per edit, like the gateway's `last_modified`.
    fn next_stamp(&self) -> Option<DateTime<Utc>> {
        if self.omit_last_modified.load(Ordering::SeqCst) {
            return None;
        }
        let n = self.edits.fetch_add(1, Ordering::SeqCst) as i64;
        Some(Utc::now() + chrono::Duration::milliseconds(n))
    }

    /// Drops a preapproval, as when it was created in another environment.
    pub fn forget_subscription(&self, id: &str) {
        self.subscriptions.lock().unwrap().remove(id);
    }

    pub fn subscription(&self, id: &str) -> Option<RemoteSubscription> {
        self.subscriptions.lock().unwrap().get(id).cloned()
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn before_read(&self, id: &RemoteId) -> Result<(), PipelineError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            GatewayMode::Normal => Ok(()),
            GatewayMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(PipelineError::Transient(format!("{id} hung")))
            }
            GatewayMode::Unavailable => {
                Err(PipelineError::Transient(format!("gateway returned 503 for {id}")))
            }
        }
    }
}

impl PaymentGateway for FakeGateway {
    fn get_payment<'a>(
        &'a self,
        id: &'a RemoteId,
    ) -> BoxFuture<'a, Result<RemotePayment, PipelineError>> {
        Box::pin(async move {
            self.before_read(id).await?;
            self.payments
                .lock()
                .unwrap()
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| PipelineError::NotFound(format!("payment {id}")))
        })
    }

    fn get_subscription<'a>(
        &'a self,
        id: &'a RemoteId,
    ) -> BoxFuture<'a, Result<RemoteSubscription, PipelineError>> {
        Box::pin(async move {
            self.before_read(id).await?;
            self.subscription(id.as_str())
                .ok_or_else(|| PipelineError::NotFound(format!("preapproval {id}")))
        })
    }

    fn create_subscription<'a>(
        &'a self,
        spec: &'a SubscriptionSpec,
    ) -> BoxFuture<'a, Result<CreatedSubscription, PipelineError>> {
        Box::pin(async move {
            if self.reject_creates.load(Ordering::SeqCst) {
                return Err(PipelineError::Transient("gateway returned 502".into()));
            }
            let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            let id = RemoteId::new(format!("pre{n:04}"))?;
            self.subscriptions.lock().unwrap().insert(
                id.as_str().to_string(),
                RemoteSubscription {
                    id: id.clone(),
                    status: RemoteSubscriptionStatus::Pending,
                    external_reference: Some(spec.external_reference.clone()),
                    next_payment_at: None,
                    cadence: Some(spec.cadence),
                    money: Some(spec.money.clone()),
                    last_modified: self.next_stamp(),
                },
            );
            Ok(CreatedSubscription {
                init_point: Some(format!("https://gateway.test/checkout/{id}")),
                id,
            })
        })
    }

    fn cancel_subscription<'a>(
        &'a self,
        id: &'a RemoteId,
    ) -> BoxFuture<'a, Result<RemoteSubscription, PipelineError>> {
        Box::pin(async move {
            let stamp = self.next_stamp();
            let mut subs = self.subscriptions.lock().unwrap();
            let sub = subs
                .get_mut(id.as_str())
                .ok_or_else(|| PipelineError::NotFound(format!("preapproval {id}")))?;
            sub.status = RemoteSubscriptionStatus::Cancelled;
            sub.last_modified = stamp;
            Ok(sub.clone())
        })
    }
}

// ── Recording mailer ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingEmailDispatcher {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmailDispatcher {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, template: TemplateKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.template == template)
            .count()
    }
}

impl EmailDispatcher for RecordingEmailDispatcher {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        })
    }
}

// ── Harness ────────────────────────────────────────────────────────────────

/// Short timeouts and tight lock retries so contention tests stay fast.
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        lock_ttl: Duration::from_secs(5),
        lock_retry: RetryPolicy::new(40, Duration::from_millis(5), Backoff::Fixed),
        result_ttl: Duration::from_secs(60),
        fetch_timeout: Duration::from_millis(150),
        fetch_retry: RetryPolicy::new(2, Duration::from_millis(10), Backoff::Fixed),
        dedup_window: Duration::from_secs(300),
        sweep: SweepSettings {
            interval: Duration::from_secs(1),
            threshold: Duration::from_secs(30 * 60),
            batch_size: 50,
        },
        back_url: None,
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub email: Arc<RecordingEmailDispatcher>,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let email = Arc::new(RecordingEmailDispatcher::default());
        let engine = Engine::new(store.clone(), gateway.clone(), email.clone(), test_settings());
        Self {
            store,
            gateway,
            email,
            engine,
        }
    }

    /// Records a pending order and returns its stored row.
    pub async fn pending_order(&self, customer: &str) -> PaymentRecord {
        let request = OrderRequest {
            customer_id: customer.to_string(),
            customer_email: format!("{customer}@example.com"),
            sku: "course-rust".to_string(),
            amount: 4990,
            currency: Currency::Brl,
            idempotency_key: None,
        };
        let payment_id = match self.engine.orders.create(&request).await.unwrap() {
            OrderOutcome::Created { payment_id, .. } => payment_id,
            other => panic!("expected a new order, got {other:?}"),
        };
        self.engine.orders.get(payment_id).await.unwrap()
    }

    pub async fn subscribe(&self, owner: &str, plan: &str) -> SubscribeOutcome {
        self.engine
            .subscriptions
            .subscribe(&subscribe_request(owner, plan))
            .await
            .unwrap()
    }
}

pub fn subscribe_request(owner: &str, plan: &str) -> SubscribeRequest {
    SubscribeRequest {
        owner_id: owner.to_string(),
        owner_email: format!("{owner}@example.com"),
        plan_id: plan.to_string(),
        base_price: 2990,
        discount_percent: 0,
        currency: Currency::Brl,
        cadence: None,
        reason: None,
    }
}

pub fn remote_payment(id: &str, status: RemotePaymentStatus, reference: Option<&str>) -> RemotePayment {
    RemotePayment {
        id: RemoteId::new(id).unwrap(),
        status,
        money: Money::new(MoneyAmount::new(4990).unwrap(), Currency::Brl),
        external_reference: reference.map(String::from),
        payment_method: Some("pix".to_string()),
        subscription_id: None,
        metadata: serde_json::json!({}),
        approved_at: (status == RemotePaymentStatus::Approved).then(Utc::now),
    }
}

pub fn notification(event_type: &str, resource_id: &str) -> Notification {
    serde_json::from_value(serde_json::json!({
        "id": format!("evt-{resource_id}"),
        "type": event_type,
        "action": format!("{event_type}.updated"),
        "data": { "id": resource_id },
    }))
    .unwrap()
}

pub fn notification_body(event_type: &str, resource_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": format!("evt-{resource_id}"),
        "type": event_type,
        "action": format!("{event_type}.updated"),
        "data": { "id": resource_id },
    }))
    .unwrap()
}
