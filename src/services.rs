pub mod classifier;
pub mod fetcher;
pub mod lock_manager;
pub mod orders;
pub mod pipeline;
pub mod reconciler;
pub mod result_cache;
pub mod retry;
pub mod subscriptions;
pub mod sweeper;

use {
    crate::domain::{email::EmailDispatcher, provider::PaymentGateway, store::Store},
    fetcher::StateFetcher,
    lock_manager::LockManager,
    orders::OrderService,
    pipeline::NotificationPipeline,
    reconciler::Reconciler,
    result_cache::ResultCache,
    retry::{Backoff, RetryPolicy},
    std::{sync::Arc, time::Duration},
    subscriptions::SubscriptionService,
    sweeper::{StalenessSweeper, SweepSettings},
};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub lock_ttl: Duration,
    pub lock_retry: RetryPolicy,
    pub result_ttl: Duration,
    pub fetch_timeout: Duration,
    pub fetch_retry: RetryPolicy,
    pub dedup_window: Duration,
    pub sweep: SweepSettings,
    pub back_url: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            lock_retry: RetryPolicy::new(5, Duration::from_millis(100), Backoff::Linear),
            result_ttl: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(10),
            fetch_retry: RetryPolicy::new(3, Duration::from_millis(250), Backoff::Exponential),
            dedup_window: Duration::from_secs(300),
            sweep: SweepSettings {
                interval: Duration::from_secs(300),
                threshold: Duration::from_secs(30 * 60),
                batch_size: 100,
            },
            back_url: None,
        }
    }
}

/// Every service wired over one store, gateway and mailer.
#[derive(Clone)]
pub struct Engine {
    pub pipeline: NotificationPipeline,
    pub subscriptions: SubscriptionService,
    pub orders: OrderService,
    pub sweeper: StalenessSweeper,
}

impl Engine {
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        email: Arc<dyn EmailDispatcher>,
        settings: EngineSettings,
    ) -> Self {
        let locks = LockManager::new(store.clone(), settings.lock_ttl, settings.lock_retry);
        let cache = ResultCache::new(store.clone(), settings.result_ttl);
        let fetcher = StateFetcher::new(gateway, settings.fetch_timeout, settings.fetch_retry);
        let reconciler = Reconciler::new(store.clone(), store.clone(), email);

        let pipeline =
            NotificationPipeline::new(fetcher.clone(), locks.clone(), cache, reconciler.clone());
        let subscriptions = SubscriptionService::new(
            store.clone(),
            locks,
            fetcher,
            reconciler,
            settings.dedup_window,
            settings.back_url.clone(),
        );
        let orders = OrderService::new(store.clone());
        let sweeper = StalenessSweeper::new(
            pipeline.clone(),
            store.clone(),
            store.clone(),
            store,
            settings.sweep,
        );

        Self {
            pipeline,
            subscriptions,
            orders,
            sweeper,
        }
    }
}
