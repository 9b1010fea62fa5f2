//! Message bus carrying balance and candle events into the engine.
//!
//! Delivery is at-least-once: a [`Delivery`] that is dropped without being
//! acknowledged goes back to its subject until the redelivery budget runs
//! out. Each subject has a single consumer group.

mod memory;

pub use memory::InMemoryBus;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Subjects consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Account balance and lot size per symbol
    Balance,
    /// Candle open price per symbol
    Candle,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Balance => "balance",
            Subject::Candle => "candle",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishing and subscribing side of a bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on a subject.
    async fn publish(&self, subject: Subject, payload: Vec<u8>) -> Result<()>;

    /// Bind the consumer group of a subject.
    async fn subscribe(&self, subject: Subject) -> Result<Subscription>;
}

/// Stream of deliveries for one subject.
pub struct Subscription {
    rx: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<Delivery>) -> Self {
        Self { rx }
    }

    /// Next delivery, or `None` once the subject is closed and drained.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

struct Redelivery {
    tx: mpsc::Sender<Delivery>,
    max_deliver: u32,
}

/// One delivery attempt of a message.
///
/// Dropping it unacknowledged requeues the message at the back of its
/// subject, behind anything published in the meantime. Consumers that stop
/// with unacknowledged work can therefore see same-symbol messages out of
/// publish order on redelivery.
pub struct Delivery {
    subject: Subject,
    payload: Vec<u8>,
    attempt: u32,
    redelivery: Option<Redelivery>,
}

impl Delivery {
    pub(crate) fn new(
        subject: Subject,
        payload: Vec<u8>,
        attempt: u32,
        tx: mpsc::Sender<Delivery>,
        max_deliver: u32,
    ) -> Self {
        Self {
            subject,
            payload,
            attempt,
            redelivery: Some(Redelivery { tx, max_deliver }),
        }
    }

    pub fn subject(&self) -> Subject {
        self.subject
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 1 for the first delivery, incremented on every redelivery.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Acknowledge: the message will not be delivered again.
    pub fn ack(mut self) {
        self.redelivery = None;
    }

    /// Negative acknowledgement: redeliver now.
    pub fn nak(self) {
        drop(self);
    }

    fn redeliver(&mut self) {
        let Some(redelivery) = self.redelivery.take() else {
            return;
        };

        if self.attempt >= redelivery.max_deliver {
            warn!(
                subject = %self.subject,
                attempts = self.attempt,
                "Delivery budget exhausted, dropping message"
            );
            return;
        }

        let next = Delivery {
            subject: self.subject,
            payload: std::mem::take(&mut self.payload),
            attempt: self.attempt + 1,
            redelivery: Some(Redelivery {
                tx: redelivery.tx.clone(),
                max_deliver: redelivery.max_deliver,
            }),
        };

        debug!(subject = %self.subject, attempt = next.attempt, "Redelivering unacknowledged message");

        match redelivery.tx.try_send(next) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(next)) => {
                // Queue is full; hand off to the runtime if there is one
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let tx = redelivery.tx;
                        handle.spawn(async move {
                            if let Err(mut lost) = tx.send(next).await.map_err(|e| e.0) {
                                lost.redelivery = None;
                            }
                        });
                    }
                    Err(_) => {
                        let mut next = next;
                        next.redelivery = None;
                        warn!(subject = %self.subject, "No runtime for redelivery, dropping message");
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(mut next)) => {
                next.redelivery = None;
            }
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.redeliver();
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("attempt", &self.attempt)
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .finish()
    }
}
