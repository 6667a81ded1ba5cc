//! Retrieval scheduler
//!
//! A single task that owns the retry lifecycle of stored receipts. Each
//! iteration takes a batch of due records, fetches them one by one through the
//! matching [`FetchClient`], records the outcome and publishes the updated
//! record. Between iterations it sleeps until the next record becomes due or
//! until a submission wakes it through [`SchedulerHandle::trigger`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rqs_common::db::{PendingReceipt, ReceiptStore};
use rqs_common::events::{EventBus, ReceiptEvent};
use rqs_common::receipts::search_key::build_search_key;
use rqs_common::receipts::DomainCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::clients::{ClientRegistry, CorrectnessSink, FetchError};

pub const DEFAULT_BATCH_SIZE: i64 = 5;

/// Shortest pause between iterations
const MIN_DELAY: Duration = Duration::from_secs(1);
/// Longest pause, reached when nothing is pending; a missed trigger or a
/// wall-clock jump delays work by at most this much
const MAX_DELAY: Duration = Duration::from_secs(24 * 3600);

/// Conditions that stop the scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("receipt store failure: {0}")]
    Store(#[from] rqs_common::Error),

    #[error("no fetch client for domain {0}")]
    NoClient(DomainCode),
}

/// Wakes a running [`Scheduler`]
///
/// Triggers coalesce: any number of calls while the scheduler is busy cause
/// exactly one extra iteration.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }
}

pub struct Scheduler {
    store: ReceiptStore,
    clients: ClientRegistry,
    event_bus: EventBus,
    trigger: Arc<Notify>,
    batch_size: i64,
}

impl Scheduler {
    pub fn new(store: ReceiptStore, clients: ClientRegistry, event_bus: EventBus) -> Self {
        Self {
            store,
            clients,
            event_bus,
            trigger: Arc::new(Notify::new()),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            trigger: Arc::clone(&self.trigger),
        }
    }

    /// Runs until the store fails; never returns `Ok`.
    pub async fn run(self) -> Result<(), SchedulerError> {
        let domains = self.clients.domains();
        info!(domains = ?domains, batch_size = self.batch_size, "scheduler started");

        loop {
            self.run_batch().await?;

            let next_due = self.store.next_due_time(&domains).await?;
            let delay = wake_delay(next_due, Utc::now());
            debug!(next_due = %next_due, delay_secs = delay.as_secs(), "scheduler idle");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.trigger.notified() => {
                    debug!("scheduler triggered");
                }
            }
        }
    }

    /// Processes one batch of due records, returns how many were attempted
    pub async fn run_batch(&self) -> Result<usize, SchedulerError> {
        let due = self
            .store
            .load_due(&self.clients.domains(), self.batch_size)
            .await?;

        for pending in &due {
            self.process(pending).await?;
        }
        Ok(due.len())
    }

    async fn process(&self, pending: &PendingReceipt) -> Result<(), SchedulerError> {
        let reference = &pending.reference;
        let domain = reference.domain();
        let client = self
            .clients
            .get(domain)
            .ok_or(SchedulerError::NoClient(domain))?;
        let unique_key = reference.unique_key();

        debug!(id = pending.id, domain = %domain, "fetching receipt");

        let sink = RecordSink {
            store: &self.store,
            event_bus: &self.event_bus,
            id: pending.id,
            unique_key: &unique_key,
            marked: AtomicBool::new(pending.is_correct),
        };

        match client.fetch_receipt(reference, &sink).await {
            Ok(payload) => match build_search_key(reference, Some(&payload)) {
                Ok(search_key) => {
                    self.store.mark_fetched(&unique_key, &payload, &search_key).await?;
                    info!(id = pending.id, domain = %domain, len = payload.len(), "receipt fetched");
                }
                Err(e) => {
                    warn!(id = pending.id, domain = %domain, error = %e, "can not index receipt payload");
                    self.store.mark_failed(&unique_key, true).await?;
                }
            },
            Err(FetchError::Store(e)) => return Err(e.into()),
            Err(e) => {
                let decrease = e.decreases_retry_budget();
                warn!(
                    id = pending.id,
                    domain = %domain,
                    error = %e,
                    decrease_retries = decrease,
                    "receipt fetch failed"
                );
                self.store.mark_failed(&unique_key, decrease).await?;
            }
        }

        emit_updated(&self.store, &self.event_bus, pending.id).await?;
        Ok(())
    }
}

/// Time to sleep until `next_due`, clamped to `[MIN_DELAY, MAX_DELAY]`
pub fn wake_delay(next_due: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (next_due - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .clamp(MIN_DELAY, MAX_DELAY)
}

async fn emit_updated(store: &ReceiptStore, event_bus: &EventBus, id: i64) -> rqs_common::Result<()> {
    match store.load_by_id(id).await? {
        Some(record) => event_bus.emit_lossy(ReceiptEvent::updated(record)),
        None => warn!(id, "receipt disappeared while processing"),
    }
    Ok(())
}

/// Persists the correctness flag of the record being fetched, once
struct RecordSink<'a> {
    store: &'a ReceiptStore,
    event_bus: &'a EventBus,
    id: i64,
    unique_key: &'a str,
    marked: AtomicBool,
}

#[async_trait]
impl CorrectnessSink for RecordSink<'_> {
    async fn mark_likely_correct(&self) -> rqs_common::Result<()> {
        if self.marked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.store.mark_correct(self.unique_key).await?;
        debug!(id = self.id, "receipt marked correct");
        emit_updated(self.store, self.event_bus, self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_wake_delay_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        assert_eq!(wake_delay(now - chrono::Duration::hours(1), now), MIN_DELAY);
        assert_eq!(wake_delay(now, now), MIN_DELAY);
        assert_eq!(
            wake_delay(now + chrono::Duration::seconds(30), now),
            Duration::from_secs(30)
        );
        assert_eq!(
            wake_delay(rqs_common::db::receipts::no_pending_sentinel(), now),
            MAX_DELAY
        );
    }
}
