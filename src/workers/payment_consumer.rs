//! Payment event consumer
//!
//! The single consumer group that advances the transaction state machine.
//! One task per bus partition keeps per-transaction ordering; everything
//! else about redelivery safety lives in `PaymentService::process_payment`.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bus::BusMessage;
use crate::payments::types::PaymentEventType;
use crate::services::payment_service::PaymentService;

pub struct PaymentEventConsumer {
    service: Arc<PaymentService>,
}

impl PaymentEventConsumer {
    pub fn new(service: Arc<PaymentService>) -> Self {
        Self { service }
    }

    /// Spawn one consumer task per partition receiver
    pub fn start(
        &self,
        receivers: Vec<mpsc::UnboundedReceiver<BusMessage>>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        receivers
            .into_iter()
            .enumerate()
            .map(|(partition, receiver)| {
                let service = self.service.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(consume_partition(service, partition, receiver, shutdown))
            })
            .collect()
    }
}

async fn consume_partition(
    service: Arc<PaymentService>,
    partition: usize,
    mut receiver: mpsc::UnboundedReceiver<BusMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(partition = partition, "Payment consumer started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            message = receiver.recv() => {
                match message {
                    Some(message) => handle_message(&service, partition, message).await,
                    None => break,
                }
            }
        }
    }

    info!(partition = partition, "Payment consumer stopped");
}

async fn handle_message(service: &PaymentService, partition: usize, message: BusMessage) {
    let event = match message.decode() {
        Ok(event) => event,
        Err(e) => {
            error!(
                partition = partition,
                key = %message.key,
                error = %e,
                "Dropping undecodable payment event"
            );
            return;
        }
    };

    info!(
        partition = partition,
        transaction_id = %event.transaction_id,
        event_type = ?event.event_type,
        "Received payment event"
    );

    match event.event_type {
        PaymentEventType::PaymentInitiated => {
            if let Err(e) = service.process_payment(event.transaction_id).await {
                // The transaction keeps its current state; redelivery retries
                error!(
                    transaction_id = %event.transaction_id,
                    error = %e,
                    "Payment processing failed"
                );
            }
        }
        other => {
            // Terminal and webhook events carry no work for this group
            debug!(
                transaction_id = %event.transaction_id,
                event_type = ?other,
                "No-op event for the processing group"
            );
        }
    }
}
