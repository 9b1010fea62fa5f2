//! In-process bus with one durable queue per subject.

use super::{Delivery, MessageBus, Subject, Subscription};
use crate::config::BusConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

struct SubjectQueue {
    tx: Option<mpsc::Sender<Delivery>>,
    rx: Option<mpsc::Receiver<Delivery>>,
}

/// Bus living inside the process.
///
/// Messages published before the consumer group binds are buffered up to
/// `capacity`. Publishing waits while the queue is full.
pub struct InMemoryBus {
    queues: Mutex<HashMap<Subject, SubjectQueue>>,
    max_deliver: u32,
}

impl InMemoryBus {
    pub fn new(config: &BusConfig) -> Self {
        let capacity = config.capacity.max(1);
        let queues = [Subject::Balance, Subject::Candle]
            .into_iter()
            .map(|subject| {
                let (tx, rx) = mpsc::channel(capacity);
                (
                    subject,
                    SubjectQueue {
                        tx: Some(tx),
                        rx: Some(rx),
                    },
                )
            })
            .collect();

        Self {
            queues: Mutex::new(queues),
            max_deliver: config.max_deliver.max(1),
        }
    }

    /// Stop accepting messages on every subject.
    ///
    /// Subscriptions end once queued messages are drained and settled.
    pub async fn close(&self) {
        let mut queues = self.queues.lock().await;
        for queue in queues.values_mut() {
            queue.tx = None;
        }
    }

    async fn sender(&self, subject: Subject) -> Result<mpsc::Sender<Delivery>> {
        let queues = self.queues.lock().await;
        queues
            .get(&subject)
            .and_then(|queue| queue.tx.clone())
            .ok_or_else(|| anyhow!("subject '{}' is closed", subject))
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: Subject, payload: Vec<u8>) -> Result<()> {
        let tx = self.sender(subject).await?;
        let delivery = Delivery::new(subject, payload, 1, tx.clone(), self.max_deliver);

        debug!(%subject, "Publishing message");

        tx.send(delivery)
            .await
            .map_err(|e| {
                e.0.ack();
                anyhow!("subject '{}' has no consumer", subject)
            })
            .context("Failed to publish")
    }

    async fn subscribe(&self, subject: Subject) -> Result<Subscription> {
        let mut queues = self.queues.lock().await;
        let rx = queues
            .get_mut(&subject)
            .and_then(|queue| queue.rx.take())
            .ok_or_else(|| anyhow!("consumer group for '{}' is already bound", subject))?;

        Ok(Subscription::new(rx))
    }
}
