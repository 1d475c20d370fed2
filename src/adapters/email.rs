use {
    crate::domain::{
        BoxFuture,
        email::{EmailDispatcher, EmailMessage},
        error::PipelineError,
    },
    reqwest::Client,
    std::{sync::Arc, time::Duration},
};

/// Posts messages as JSON to a transactional-email relay, which owns
/// templates and delivery.
#[derive(Clone)]
pub struct HttpEmailDispatcher {
    client: Client,
    relay_url: Arc<str>,
}

impl HttpEmailDispatcher {
    pub fn new(client: Client, relay_url: &str) -> Self {
        Self {
            client,
            relay_url: relay_url.into(),
        }
    }
}

impl EmailDispatcher for HttpEmailDispatcher {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&*self.relay_url)
                .timeout(Duration::from_secs(5))
                .json(message)
                .send()
                .await
                .map_err(|e| PipelineError::Transient(format!("email relay: {e}")))?;

            if !response.status().is_success() {
                return Err(PipelineError::Transient(format!(
                    "email relay returned {}",
                    response.status()
                )));
            }
            tracing::info!(template = ?message.template, to = %message.to, "email dispatched");
            Ok(())
        })
    }
}

/// Logs instead of sending. Used when no relay is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailDispatcher;

impl EmailDispatcher for LogEmailDispatcher {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            tracing::info!(
                template = ?message.template,
                to = %message.to,
                data = %message.data,
                "email relay not configured, message logged only"
            );
            Ok(())
        })
    }
}
