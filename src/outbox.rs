//! Local-first outbox for one record collection
//!
//! Records are persisted before any network attempt. A failed delivery
//! mirrors the record into the pending queue, which `flush` retries in
//! order until each entry is delivered or deleted.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::db::Database;
use crate::error::{OutboxError, StoreError};
use crate::models::{Record, Validate, ValidationRules};
use crate::store::{PendingQueue, RecordStore};
use crate::sync::SyncClient;

/// Default period between flush passes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
}

/// A persisted submission and what happened to its delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Submission<R> {
    pub record: R,
    pub delivery: Delivery,
    pub edited: bool,
}

impl<R: Record> Submission<R> {
    /// Transient status line for the user
    pub fn notice(&self) -> String {
        let noun = R::COLLECTION.noun();
        match (self.delivery, self.edited) {
            (Delivery::Sent, false) => format!("{} sent to server", capitalize(noun)),
            (Delivery::Sent, true) => format!("{} updated on server", capitalize(noun)),
            (Delivery::Queued, _) => {
                format!("Offline: {noun} saved locally and will be retried.")
            }
        }
    }
}

/// Result of one pass over the pending queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub delivered: usize,
    pub remaining: usize,
}

/// Store, pending queue and delivery for one collection
pub struct Outbox<R, C> {
    records: RecordStore<R>,
    pending: PendingQueue<R>,
    client: C,
    endpoint: String,
    rules: ValidationRules,
}

impl<R: Record, C: SyncClient> Outbox<R, C> {
    pub fn new(db: Arc<Database>, client: C, endpoint: impl Into<String>) -> Self {
        Self {
            records: RecordStore::new(db.clone()),
            pending: PendingQueue::new(db),
            client,
            endpoint: endpoint.into(),
            rules: ValidationRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Validate, persist and attempt delivery of a new record
    pub async fn submit(&self, draft: R::Draft) -> Result<Submission<R>, OutboxError> {
        draft.validate(&self.rules)?;

        let now = Utc::now();
        let record = self
            .records
            .insert_with(now, |id| R::create(id, draft, now))?;
        tracing::info!(collection = %R::COLLECTION, id = record.id(), "Record saved");

        let delivery = self.deliver(&record).await?;
        Ok(Submission {
            record,
            delivery,
            edited: false,
        })
    }

    /// Apply `change` to the editable fields of record `id` and resend it
    ///
    /// The record keeps its id and position; a queued snapshot is replaced
    /// rather than duplicated.
    pub async fn edit(
        &self,
        id: i64,
        change: impl FnOnce(&mut R::Draft),
    ) -> Result<Submission<R>, OutboxError> {
        let existing = self.records.get(id)?.ok_or(OutboxError::NotFound(id))?;

        let mut draft = existing.to_draft();
        change(&mut draft);
        draft.validate(&self.rules)?;

        let record = existing.revise(draft);
        self.records.upsert(record.clone())?;
        self.pending.replace(&record)?;
        tracing::info!(collection = %R::COLLECTION, id, "Record updated");

        let delivery = self.deliver(&record).await?;
        Ok(Submission {
            record,
            delivery,
            edited: true,
        })
    }

    /// Remove a record and cancel any pending delivery of it
    ///
    /// Returns whether the record existed in the store.
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let (removed, dequeued) = self.records.remove_with_pending(&self.pending, id)?;
        tracing::info!(collection = %R::COLLECTION, id, removed, dequeued, "Record deleted");
        Ok(removed)
    }

    /// Remove every record and every pending delivery
    pub fn clear(&self) -> Result<(), StoreError> {
        self.records.clear()?;
        self.pending.clear()?;
        tracing::info!(collection = %R::COLLECTION, "Collection cleared");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<R>, StoreError> {
        self.records.load()
    }

    pub fn search(&self, name: &str) -> Result<Vec<R>, StoreError> {
        self.records.filter_by_name(name)
    }

    pub fn pending(&self) -> Result<Vec<R>, StoreError> {
        self.pending.drain()
    }

    pub fn pending_ids(&self) -> Result<Vec<i64>, StoreError> {
        self.pending.ids()
    }

    async fn deliver(&self, record: &R) -> Result<Delivery, StoreError> {
        if self.client.send(&self.endpoint, record).await {
            // A stale snapshot from an earlier failure is now superseded
            self.pending.dequeue(record.id())?;
            Ok(Delivery::Sent)
        } else {
            self.pending.enqueue(record.clone())?;
            tracing::info!(collection = %R::COLLECTION, id = record.id(), "Queued for retry");
            Ok(Delivery::Queued)
        }
    }

    /// Try every pending record once, oldest first
    ///
    /// Sends are sequential; a failure leaves that entry queued and moves on.
    pub async fn flush(&self) -> Result<FlushReport, StoreError> {
        let snapshot = self.pending.drain()?;
        let mut report = FlushReport {
            attempted: snapshot.len(),
            ..FlushReport::default()
        };

        for record in &snapshot {
            if self.client.send(&self.endpoint, record).await
                && self.pending.acknowledge(record)?
            {
                report.delivered += 1;
            }
        }

        report.remaining = self.pending.drain()?.len();
        Ok(report)
    }

    /// Flush now, then every `period`, for as long as the task runs
    pub async fn run_flusher(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.flush().await {
                Ok(report) if report.attempted > 0 => {
                    tracing::info!(
                        collection = %R::COLLECTION,
                        attempted = report.attempted,
                        delivered = report.delivered,
                        remaining = report.remaining,
                        "Flushed pending records"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(collection = %R::COLLECTION, error = %e, "Flush failed");
                }
            }
        }
    }
}

pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::models::{
        Complaint, ComplaintDraft, ComplaintStatus, Feedback, FeedbackDraft, Ratings,
    };
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Stub client: succeeds when online, except for ids in `failing`
    #[derive(Clone, Default)]
    struct StubClient {
        online: Arc<AtomicBool>,
        failing: Arc<Mutex<HashSet<i64>>>,
        sent: Arc<Mutex<Vec<i64>>>,
    }

    impl StubClient {
        fn online() -> Self {
            let stub = Self::default();
            stub.set_online(true);
            stub
        }

        fn offline() -> Self {
            Self::default()
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        fn fail_id(&self, id: i64) {
            self.failing.lock().unwrap().insert(id);
        }

        fn sent(&self) -> Vec<i64> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl SyncClient for StubClient {
        async fn send<R: Record>(&self, _endpoint: &str, record: &R) -> bool {
            self.sent.lock().unwrap().push(record.id());
            self.online.load(Ordering::SeqCst)
                && !self.failing.lock().unwrap().contains(&record.id())
        }
    }

    fn outbox<R: Record>(client: StubClient) -> Outbox<R, StubClient> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Outbox::new(db, client, "http://portal.test/api")
    }

    fn leak() -> ComplaintDraft {
        ComplaintDraft {
            category: "plumbing".to_string(),
            room: "B-204".to_string(),
            description: "leak".to_string(),
            ..ComplaintDraft::default()
        }
    }

    fn food_rating(score: u8) -> FeedbackDraft {
        FeedbackDraft {
            name: "Asha".to_string(),
            ratings: Ratings {
                food: Some(score),
                ..Ratings::default()
            },
            ..FeedbackDraft::default()
        }
    }

    #[tokio::test]
    async fn test_online_submit_is_not_queued() {
        let client = StubClient::online();
        let outbox = outbox::<Complaint>(client.clone());

        let submission = outbox.submit(leak()).await.unwrap();
        assert_eq!(submission.delivery, Delivery::Sent);
        assert_eq!(submission.notice(), "Complaint sent to server");
        assert_eq!(outbox.list().unwrap(), vec![submission.record.clone()]);
        assert!(outbox.pending().unwrap().is_empty());
        assert_eq!(client.sent(), vec![submission.record.id]);
    }

    #[tokio::test]
    async fn test_invalid_submit_persists_nothing() {
        let client = StubClient::online();
        let outbox = outbox::<Feedback>(client.clone());

        let err = outbox.submit(FeedbackDraft::default()).await.unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Validation(ValidationError::NoRatings)
        ));
        assert!(outbox.list().unwrap().is_empty());
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rules_are_applied() {
        let outbox = outbox::<Feedback>(StubClient::online()).with_rules(ValidationRules {
            require_all_ratings: true,
        });
        let err = outbox.submit(food_rating(4)).await.unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Validation(ValidationError::IncompleteRatings)
        ));
    }

    #[tokio::test]
    async fn test_offline_complaint_scenario() {
        let client = StubClient::offline();
        let outbox = outbox::<Complaint>(client.clone());

        let submission = outbox.submit(leak()).await.unwrap();
        assert_eq!(submission.delivery, Delivery::Queued);
        assert_eq!(
            submission.notice(),
            "Offline: complaint saved locally and will be retried."
        );

        let stored = outbox.list().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ComplaintStatus::Pending);
        assert_eq!(stored[0].room, "B-204");
        assert_eq!(outbox.pending().unwrap(), stored);

        // Still offline: entry stays
        let report = outbox.flush().await.unwrap();
        assert_eq!(
            report,
            FlushReport {
                attempted: 1,
                delivered: 0,
                remaining: 1
            }
        );
        assert_eq!(outbox.pending().unwrap(), stored);

        // Back online: entry leaves the queue, the store is untouched
        client.set_online(true);
        let report = outbox.flush().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(outbox.pending().unwrap().is_empty());
        assert_eq!(outbox.list().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_flush_partial_failure_keeps_order() {
        let client = StubClient::offline();
        let outbox = outbox::<Feedback>(client.clone());

        let a = outbox.submit(food_rating(2)).await.unwrap().record;
        let b = outbox.submit(food_rating(5)).await.unwrap().record;
        let c = outbox.submit(food_rating(3)).await.unwrap().record;
        assert_eq!(outbox.pending_ids().unwrap(), vec![a.id, b.id, c.id]);

        client.set_online(true);
        client.fail_id(a.id);
        client.fail_id(c.id);
        let before = client.sent().len();

        let report = outbox.flush().await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(outbox.pending().unwrap(), vec![a.clone(), c.clone()]);
        // One failure does not abort the pass, and order is enqueue order
        assert_eq!(client.sent()[before..].to_vec(), vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn test_flush_empty_queue() {
        let client = StubClient::online();
        let outbox = outbox::<Complaint>(client.clone());
        assert_eq!(outbox.flush().await.unwrap(), FlushReport::default());
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_edit_queued_record_updates_both_in_place() {
        let client = StubClient::offline();
        let outbox = outbox::<Complaint>(client.clone());

        let first = outbox.submit(leak()).await.unwrap().record;
        let second = outbox
            .submit(ComplaintDraft {
                room: "C-310".to_string(),
                ..leak()
            })
            .await
            .unwrap()
            .record;

        let edited = outbox
            .edit(first.id, |draft| draft.description = "leak near window".to_string())
            .await
            .unwrap();
        assert_eq!(edited.delivery, Delivery::Queued);
        assert!(edited.edited);

        let stored = outbox.list().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, first.id);
        assert_eq!(stored[0].description, "leak near window");
        assert_eq!(stored[0].date, first.date);
        assert_eq!(stored[1], second);

        let pending = outbox.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0], stored[0]);
        assert_eq!(pending[1], second);
    }

    #[tokio::test]
    async fn test_edit_delivered_record_online() {
        let client = StubClient::online();
        let outbox = outbox::<Feedback>(client.clone());

        let original = outbox.submit(food_rating(2)).await.unwrap().record;
        let edited = outbox
            .edit(original.id, |draft| draft.ratings.food = Some(4))
            .await
            .unwrap();

        assert_eq!(edited.delivery, Delivery::Sent);
        assert_eq!(edited.notice(), "Feedback updated on server");
        assert_eq!(edited.record.created_at, original.created_at);
        assert_eq!(outbox.list().unwrap(), vec![edited.record]);
        assert!(outbox.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_resend_drops_stale_snapshot() {
        let client = StubClient::offline();
        let outbox = outbox::<Complaint>(client.clone());
        let record = outbox.submit(leak()).await.unwrap().record;

        client.set_online(true);
        outbox
            .edit(record.id, |draft| draft.urgency = Some("high".to_string()))
            .await
            .unwrap();
        assert!(outbox.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_invalid_or_missing() {
        let outbox = outbox::<Complaint>(StubClient::offline());
        let record = outbox.submit(leak()).await.unwrap().record;

        let err = outbox
            .edit(record.id, |draft| draft.description.clear())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Validation(ValidationError::MissingField("description"))
        ));
        assert_eq!(outbox.list().unwrap(), vec![record.clone()]);

        let err = outbox.edit(record.id + 1, |_| {}).await.unwrap_err();
        assert!(matches!(err, OutboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_cancels_pending_delivery() {
        let client = StubClient::offline();
        let outbox = outbox::<Complaint>(client.clone());
        let record = outbox.submit(leak()).await.unwrap().record;
        assert_eq!(outbox.pending_ids().unwrap(), vec![record.id]);

        assert!(outbox.delete(record.id).unwrap());
        assert!(outbox.list().unwrap().is_empty());
        assert!(outbox.pending().unwrap().is_empty());

        // Nothing left to retry
        client.set_online(true);
        let sent_before = client.sent().len();
        outbox.flush().await.unwrap();
        assert_eq!(client.sent().len(), sent_before);

        assert!(!outbox.delete(record.id).unwrap());
    }

    #[tokio::test]
    async fn test_clear_empties_both() {
        let outbox = outbox::<Feedback>(StubClient::offline());
        outbox.submit(food_rating(1)).await.unwrap();
        outbox.submit(food_rating(5)).await.unwrap();

        outbox.clear().unwrap();
        assert!(outbox.list().unwrap().is_empty());
        assert!(outbox.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_by_name() {
        let outbox = outbox::<Complaint>(StubClient::online());
        outbox
            .submit(ComplaintDraft {
                name: "Ravi Kumar".to_string(),
                ..leak()
            })
            .await
            .unwrap();
        outbox.submit(leak()).await.unwrap();

        let hits = outbox.search("ravi").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Ravi Kumar");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flusher_flushes_eagerly_then_periodically() {
        let client = StubClient::offline();
        let outbox = Arc::new(outbox::<Complaint>(client.clone()));
        outbox.submit(leak()).await.unwrap();
        let sends_after_submit = client.sent().len();

        let runner = outbox.clone();
        let task = tokio::spawn(async move { runner.run_flusher(DEFAULT_FLUSH_INTERVAL).await });

        // Eager pass at start
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.sent().len(), sends_after_submit + 1);

        client.set_online(true);
        tokio::time::sleep(DEFAULT_FLUSH_INTERVAL).await;
        assert_eq!(client.sent().len(), sends_after_submit + 2);
        assert!(outbox.pending().unwrap().is_empty());

        task.abort();
    }
}
