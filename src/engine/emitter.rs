//! Fire-and-forget audit emitter.
//!
//! `record` hands an entry to a bounded queue and returns immediately; a
//! single background writer persists entries with paced retries. Under
//! sustained store failure the writer's buffer evicts the oldest entries
//! and counts the drops instead of exerting backpressure on evaluations.
//! If the writer stalls long enough for the intake queue itself to fill,
//! `record` sheds the incoming entry instead; both paths feed the same
//! drop counter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;

use crate::config::AuditConfig;
use crate::domain::NewAuditEntry;
use crate::storage::GuardrailsRepository;

/// Salted one-way hash of an input text, hex-encoded.
///
/// This is the only form in which evaluated text reaches the audit trail.
pub fn salted_hash(salt: &str, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cloneable handle to the audit queue.
#[derive(Clone)]
pub struct AuditEmitter {
    tx: mpsc::Sender<NewAuditEntry>,
    dropped: Arc<AtomicU64>,
    salt: String,
}

impl AuditEmitter {
    /// Start the background writer and return the producer handle.
    pub fn spawn(repository: GuardrailsRepository, config: AuditConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        let writer = AuditWriter {
            repository,
            rx,
            buffer: VecDeque::new(),
            capacity,
            retry_interval: Duration::from_millis(config.retry_interval_ms.max(1)),
            dropped: dropped.clone(),
        };
        tokio::spawn(writer.run());

        Self {
            tx,
            dropped,
            salt: config.hash_salt,
        }
    }

    /// Enqueue an entry without blocking. A full intake queue sheds the
    /// incoming entry and counts it; the verdict path is never delayed.
    pub fn record(&self, entry: NewAuditEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped_total = total, "Audit queue full, dropping entry");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Audit writer stopped, dropping entry");
            }
        }
    }

    /// Hash an input with this emitter's salt.
    pub fn hash_input(&self, input: &str) -> String {
        salted_hash(&self.salt, input)
    }

    /// Total entries dropped so far, from either the queue or the writer's
    /// buffer.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct AuditWriter {
    repository: GuardrailsRepository,
    rx: mpsc::Receiver<NewAuditEntry>,
    buffer: VecDeque<NewAuditEntry>,
    capacity: usize,
    retry_interval: Duration,
    dropped: Arc<AtomicU64>,
}

impl AuditWriter {
    async fn run(mut self) {
        let mut retry = tokio::time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(entry) => {
                        self.push(entry);
                        self.flush().await;
                    }
                    None => break,
                },
                _ = retry.tick(), if !self.buffer.is_empty() => {
                    self.flush().await;
                }
            }
        }

        // Producers are gone; drain what the store will take.
        self.flush().await;
        if !self.buffer.is_empty() {
            tracing::warn!(
                pending = self.buffer.len(),
                "Audit writer stopping with unwritten entries"
            );
        }
    }

    fn push(&mut self, entry: NewAuditEntry) {
        self.buffer.push_back(entry);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                dropped_total = total,
                "Audit buffer over capacity, dropping oldest entry"
            );
        }
    }

    /// Write from the front until the store refuses; retries resume on the
    /// next tick or the next received entry.
    async fn flush(&mut self) {
        while let Some(entry) = self.buffer.front() {
            match self.repository.append_audit_entry(entry).await {
                Ok(()) => {
                    self.buffer.pop_front();
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        pending = self.buffer.len(),
                        "Audit write failed, will retry"
                    );
                    break;
                }
            }
        }
    }
}
