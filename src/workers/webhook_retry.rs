use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

use crate::services::webhook_dispatcher::WebhookDispatcher;

pub struct WebhookRetryWorker {
    dispatcher: Arc<WebhookDispatcher>,
    interval_secs: u64,
}

impl WebhookRetryWorker {
    pub fn new(dispatcher: Arc<WebhookDispatcher>, interval_secs: u64) -> Self {
        Self {
            dispatcher,
            interval_secs,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        info!(
            interval_secs = self.interval_secs,
            "Webhook retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.dispatcher.run_once().await {
                        Ok(count) => {
                            if count > 0 {
                                info!(processed = count, "Dispatched due webhooks");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to dispatch pending webhooks");
                        }
                    }
                }
            }
        }

        info!("Webhook retry worker stopped");
    }
}
