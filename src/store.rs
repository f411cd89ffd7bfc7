//! Durable record collections and their pending-delivery queues
//!
//! Each collection is one JSON array under a fixed key. Reads that find
//! something other than a valid array of records recover to an empty
//! collection; the next write replaces the bad value.

use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::db::Database;
use crate::error::StoreError;
use crate::models::Record;

type Result<T> = std::result::Result<T, StoreError>;

/// An ordered JSON list of records under one key
struct JsonList<R> {
    db: Arc<Database>,
    key: &'static str,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> JsonList<R> {
    fn new(db: Arc<Database>, key: &'static str) -> Self {
        Self {
            db,
            key,
            _record: PhantomData,
        }
    }

    fn load(&self) -> Result<Vec<R>> {
        let raw = self.db.get(self.key)?;
        Ok(decode(self.key, raw.as_deref()))
    }

    /// Rewrites the whole list when `apply` reports a change
    fn modify<T>(&self, apply: impl FnOnce(&mut Vec<R>) -> (bool, T)) -> Result<T> {
        let key = self.key;
        self.db.update(key, |raw| {
            let mut records = decode(key, raw.as_deref());
            let (changed, output) = apply(&mut records);
            let next = if changed {
                Some(serde_json::to_string(&records)?)
            } else {
                None
            };
            Ok((next, output))
        })
    }

    fn clear(&self) -> Result<()> {
        self.db.remove(self.key)
    }
}

fn decode<R: Record>(key: &str, raw: Option<&str>) -> Vec<R> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    match serde_json::from_str(raw) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(key, error = %e, "Discarding unreadable collection");
            Vec::new()
        }
    }
}

/// Replace the entry with the same id in place, or append
fn upsert_in<R: Record>(records: &mut Vec<R>, record: R) {
    match records.iter_mut().find(|r| r.id() == record.id()) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

fn remove_in<R: Record>(records: &mut Vec<R>, id: i64) -> bool {
    let before = records.len();
    records.retain(|r| r.id() != id);
    records.len() != before
}

/// The primary, user-visible collection
pub struct RecordStore<R> {
    list: JsonList<R>,
}

impl<R: Record> RecordStore<R> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            list: JsonList::new(db, R::COLLECTION.store_key()),
        }
    }

    /// All records in insertion order
    pub fn load(&self) -> Result<Vec<R>> {
        self.list.load()
    }

    pub fn get(&self, id: i64) -> Result<Option<R>> {
        Ok(self.load()?.into_iter().find(|r| r.id() == id))
    }

    pub fn upsert(&self, record: R) -> Result<()> {
        self.list.modify(|records| {
            upsert_in(records, record);
            (true, ())
        })
    }

    /// Append a new record built with a fresh id
    ///
    /// Ids come from the creation time in milliseconds, bumped past the
    /// largest existing id when the clock would collide.
    pub fn insert_with(&self, now: DateTime<Utc>, build: impl FnOnce(i64) -> R) -> Result<R> {
        self.list.modify(|records| {
            let next_free = records
                .iter()
                .map(Record::id)
                .max()
                .map_or(i64::MIN, |max| max.saturating_add(1));
            let id = now.timestamp_millis().max(next_free);
            let record = build(id);
            records.push(record.clone());
            (true, record)
        })
    }

    /// Returns whether a record was removed
    pub fn remove(&self, id: i64) -> Result<bool> {
        self.list.modify(|records| {
            let removed = remove_in(records, id);
            (removed, removed)
        })
    }

    /// Remove `id` from this collection and from `pending` in one transaction
    ///
    /// Returns whether it was stored and whether it was queued.
    pub fn remove_with_pending(&self, pending: &PendingQueue<R>, id: i64) -> Result<(bool, bool)> {
        let (records_key, pending_key) = (self.list.key, pending.list.key);
        self.list
            .db
            .update_pair(records_key, pending_key, |stored, queued| {
                let mut records: Vec<R> = decode(records_key, stored.as_deref());
                let mut queue: Vec<R> = decode(pending_key, queued.as_deref());
                let removed = remove_in(&mut records, id);
                let dequeued = remove_in(&mut queue, id);

                let next_records = if removed {
                    Some(serde_json::to_string(&records)?)
                } else {
                    None
                };
                let next_queue = if dequeued {
                    Some(serde_json::to_string(&queue)?)
                } else {
                    None
                };
                Ok((next_records, next_queue, (removed, dequeued)))
            })
    }

    /// Records whose name contains `needle`, ignoring case
    pub fn filter_by_name(&self, needle: &str) -> Result<Vec<R>> {
        let needle = needle.to_lowercase();
        Ok(self
            .load()?
            .into_iter()
            .filter(|r| r.name().to_lowercase().contains(&needle))
            .collect())
    }

    pub fn clear(&self) -> Result<()> {
        self.list.clear()
    }
}

/// Records not yet acknowledged by the remote endpoint
pub struct PendingQueue<R> {
    list: JsonList<R>,
}

impl<R: Record> PendingQueue<R> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            list: JsonList::new(db, R::COLLECTION.pending_key()),
        }
    }

    /// Queue a record, replacing an older snapshot with the same id
    pub fn enqueue(&self, record: R) -> Result<()> {
        self.list.modify(|records| {
            upsert_in(records, record);
            (true, ())
        })
    }

    /// Update a queued snapshot; records that are not queued stay unqueued
    pub fn replace(&self, record: &R) -> Result<bool> {
        self.list.modify(|records| {
            match records.iter_mut().find(|r| r.id() == record.id()) {
                Some(existing) => {
                    *existing = record.clone();
                    (true, true)
                }
                None => (false, false),
            }
        })
    }

    pub fn dequeue(&self, id: i64) -> Result<bool> {
        self.list.modify(|records| {
            let removed = remove_in(records, id);
            (removed, removed)
        })
    }

    /// Remove `delivered` if the queued snapshot is still the one sent
    ///
    /// An edit that replaced the snapshot mid-delivery stays queued.
    pub fn acknowledge(&self, delivered: &R) -> Result<bool> {
        self.list.modify(|records| {
            let before = records.len();
            records.retain(|r| r != delivered);
            let removed = records.len() != before;
            (removed, removed)
        })
    }

    /// Snapshot of the queue in enqueue order; nothing is removed
    pub fn drain(&self) -> Result<Vec<R>> {
        self.list.load()
    }

    pub fn ids(&self) -> Result<Vec<i64>> {
        Ok(self.drain()?.iter().map(Record::id).collect())
    }

    pub fn clear(&self) -> Result<()> {
        self.list.clear()
    }
}
