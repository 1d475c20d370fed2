use {
    super::pipeline::{NotificationPipeline, ProcessResult},
    crate::domain::{
        audit::Actor,
        error::PipelineError,
        store::{LockStore, PaymentStore, SubscriptionStore},
    },
    chrono::Utc,
    serde::Serialize,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub reconciled: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl SweepReport {
    fn record(&mut self, result: Result<ProcessResult, PipelineError>, entity: &str) {
        match result {
            Ok(ProcessResult::Reconciled(_)) => self.reconciled += 1,
            Ok(_) => self.skipped += 1,
            Err(e) => {
                tracing::warn!(entity, error = %e, "sweep reconcile failed");
                self.errored += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub interval: Duration,
    pub threshold: Duration,
    pub batch_size: i64,
}

/// Recovers records whose webhooks never arrived by re-driving them through
/// the notification pipeline.
#[derive(Clone)]
pub struct StalenessSweeper {
    pipeline: NotificationPipeline,
    payments: Arc<dyn PaymentStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    locks: Arc<dyn LockStore>,
    settings: SweepSettings,
}

impl StalenessSweeper {
    pub fn new(
        pipeline: NotificationPipeline,
        payments: Arc<dyn PaymentStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        locks: Arc<dyn LockStore>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            pipeline,
            payments,
            subscriptions,
            locks,
            settings,
        }
    }

    pub async fn sweep(&self, threshold: Duration) -> Result<SweepReport, PipelineError> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| PipelineError::Configuration(format!("sweep threshold out of range: {e}")))?;
        let older_than = Utc::now() - threshold;
        let mut report = SweepReport::default();

        let subscriptions = self
            .subscriptions
            .list_stale_subscriptions(older_than, self.settings.batch_size)
            .await?;
        for record in subscriptions {
            report.scanned += 1;
            let result = self.pipeline.resync_subscription(record, Actor::Sweep).await;
            report.record(result, "subscription");
        }

        let payments = self
            .payments
            .list_stale_payments(older_than, self.settings.batch_size)
            .await?;
        for record in payments {
            report.scanned += 1;
            let result = self.pipeline.resync_payment(record, Actor::Sweep).await;
            report.record(result, "payment");
        }

        Ok(report)
    }

    async fn housekeeping(&self) {
        match self.locks.purge_expired_locks(Utc::now()).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "reaped expired locks"),
            Err(e) => tracing::error!(error = %e, "lock purge error"),
        }
        match self.pipeline.cache().purge_expired().await {
            0 => {}
            n => tracing::debug!(count = n, "purged expired results"),
        }
    }
}

/// Runs a sweep every `interval` until `shutdown` flips.
pub async fn run_sweeper(sweeper: StalenessSweeper, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(
        interval_secs = sweeper.settings.interval.as_secs(),
        threshold_secs = sweeper.settings.threshold.as_secs(),
        "staleness sweeper started"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("staleness sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(sweeper.settings.interval) => {}
        }

        match sweeper.sweep(sweeper.settings.threshold).await {
            Ok(report) if report.scanned == 0 => {}
            Ok(report) => tracing::info!(
                scanned = report.scanned,
                reconciled = report.reconciled,
                skipped = report.skipped,
                errored = report.errored,
                "sweep finished"
            ),
            Err(e) => tracing::error!(error = %e, "sweep error"),
        }

        sweeper.housekeeping().await;
    }
}
