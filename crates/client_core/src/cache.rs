use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::future::join_all;
use shared::{
    domain::{InvoiceKind, InvoiceLine, InvoiceRow, RequisitionRow},
    protocol::DeleteTarget,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::{error::SourceError, source::DataSource};

/// A row held in a cached collection. Rows are addressed by a stable id and,
/// for child rows, the id of the record they belong to.
pub trait Row: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;

    fn parent_id(&self) -> Option<&str> {
        None
    }

    fn delete_target(&self) -> DeleteTarget {
        DeleteTarget::new(self.id(), self.parent_id().map(str::to_string))
    }
}

impl Row for InvoiceLine {
    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn parent_id(&self) -> Option<&str> {
        Some(self.invoice_id.as_str())
    }
}

impl Row for InvoiceRow {
    fn id(&self) -> &str {
        self.id.as_str()
    }
}

impl Row for RequisitionRow {
    fn id(&self) -> &str {
        self.id.as_str()
    }
}

/// Immutable snapshot of the rows stored under one query key. Cloning is
/// cheap; every change produces a new collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<R> {
    rows: Arc<[R]>,
}

impl<R> Default for Collection<R> {
    fn default() -> Self {
        Self {
            rows: Arc::from(Vec::new()),
        }
    }
}

impl<R> From<Vec<R>> for Collection<R> {
    fn from(rows: Vec<R>) -> Self {
        Self::new(rows)
    }
}

impl<R> Collection<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self { rows: rows.into() }
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.rows.iter()
    }
}

impl<R: Row> Collection<R> {
    pub fn get(&self, id: &str) -> Option<&R> {
        self.rows.iter().find(|row| row.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Keeps every row whose id is not in `ids`, preserving order.
    pub fn without_ids(&self, ids: &HashSet<String>) -> Self {
        Self::new(
            self.rows
                .iter()
                .filter(|row| !ids.contains(row.id()))
                .cloned()
                .collect(),
        )
    }

    /// Swaps in each replacement at the position of the row with the same id.
    /// Replacements with no matching row are ignored.
    pub fn with_replacements(&self, replacements: &[R]) -> Self {
        let by_id: HashMap<&str, &R> = replacements.iter().map(|row| (row.id(), row)).collect();
        Self::new(
            self.rows
                .iter()
                .map(|row| by_id.get(row.id()).copied().unwrap_or(row).clone())
                .collect(),
        )
    }
}

/// Identifies one cached collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    InvoiceList(InvoiceKind),
    InvoiceDetail {
        kind: InvoiceKind,
        invoice_number: i64,
    },
    RequisitionList,
}

/// A family of query keys, used for prefix invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryScope {
    All,
    Invoices(InvoiceKind),
    Requisitions,
}

impl QueryKey {
    pub fn in_scope(&self, scope: QueryScope) -> bool {
        match (scope, self) {
            (QueryScope::All, _) => true,
            (QueryScope::Invoices(kind), QueryKey::InvoiceList(k)) => kind == *k,
            (QueryScope::Invoices(kind), QueryKey::InvoiceDetail { kind: k, .. }) => kind == *k,
            (QueryScope::Requisitions, QueryKey::RequisitionList) => true,
            _ => false,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::InvoiceList(kind) => write!(f, "invoices/{kind}"),
            QueryKey::InvoiceDetail {
                kind,
                invoice_number,
            } => write!(f, "invoices/{kind}/{invoice_number}"),
            QueryKey::RequisitionList => write!(f, "requisitions"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChange {
    /// A local write replaced the collection.
    Updated,
    /// Fresh rows arrived from the data source.
    Refreshed,
    /// The collection was marked stale.
    Invalidated,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub change: CacheChange,
}

struct CacheEntry<R> {
    collection: Collection<R>,
    /// Stamp of the last local write; zero when only fetches have filled it.
    written: u64,
    /// Ticket of the fetch whose rows are stored, if any.
    fetched: u64,
    stale: bool,
}

/// Keyed store of row collections backed by a [`DataSource`].
///
/// Local writes and fetches draw stamps from one counter. A refresh takes a
/// ticket and remembers the entry's last write stamp. Its rows are dropped if
/// a local write landed while it was in flight, so an optimistic write is
/// never clobbered by a fetch that was already running. They are also dropped
/// if a fetch that started later has already been stored, so overlapping
/// refreshes settle on the newest server state. No lock is held while the
/// data source is awaited.
pub struct QueryCache<R: Row> {
    source: Arc<dyn DataSource<R>>,
    entries: RwLock<HashMap<QueryKey, CacheEntry<R>>>,
    events: broadcast::Sender<CacheEvent>,
    stamps: AtomicU64,
}

impl<R: Row> QueryCache<R> {
    pub fn new(source: Arc<dyn DataSource<R>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            source,
            entries: RwLock::new(HashMap::new()),
            events,
            stamps: AtomicU64::new(1),
        })
    }

    pub fn source(&self) -> &Arc<dyn DataSource<R>> {
        &self.source
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub async fn get(&self, key: &QueryKey) -> Option<Collection<R>> {
        self.entries
            .read()
            .await
            .get(key)
            .map(|entry| entry.collection.clone())
    }

    pub async fn is_stale(&self, key: &QueryKey) -> Option<bool> {
        self.entries.read().await.get(key).map(|entry| entry.stale)
    }

    pub async fn keys(&self) -> Vec<QueryKey> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Replaces the collection under `key` outright.
    pub async fn set(&self, key: QueryKey, collection: Collection<R>) {
        let written = self.next_stamp();
        self.entries.write().await.insert(
            key.clone(),
            CacheEntry {
                collection,
                written,
                fetched: 0,
                stale: false,
            },
        );
        self.publish(key, CacheChange::Updated);
    }

    /// Atomically rewrites the collection under `key` and returns what it
    /// held before. Absent keys are left untouched and yield `None`.
    pub async fn update<F>(&self, key: &QueryKey, change: F) -> Option<Collection<R>>
    where
        F: FnOnce(&Collection<R>) -> Collection<R> + Send,
    {
        let previous = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(key)?;
            let next = change(&entry.collection);
            entry.written = self.next_stamp();
            std::mem::replace(&mut entry.collection, next)
        };
        self.publish(key.clone(), CacheChange::Updated);
        Some(previous)
    }

    /// Returns the cached collection, fetching it first if the key is absent
    /// or stale.
    pub async fn ensure(&self, key: &QueryKey) -> Result<Collection<R>, SourceError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key).filter(|entry| !entry.stale) {
                return Ok(entry.collection.clone());
            }
        }
        self.refresh(key).await
    }

    /// Fetches `key` from the data source and stores the result, unless a
    /// local write or a later fetch landed while this one was in flight.
    pub async fn refresh(&self, key: &QueryKey) -> Result<Collection<R>, SourceError> {
        let written_at = self.written_stamp(key).await;
        let ticket = self.next_stamp();

        let fetched = match self.source.fetch(key).await {
            Ok(rows) => Collection::new(rows),
            Err(error) => {
                self.mark_stale(key, written_at, ticket).await;
                return Err(error);
            }
        };

        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get(key) {
                if entry.written != written_at.unwrap_or_default() {
                    debug!(%key, "discarding refresh superseded by a local write");
                    return Ok(entry.collection.clone());
                }
                if entry.fetched > ticket {
                    debug!(%key, "discarding refresh older than the stored one");
                    return Ok(entry.collection.clone());
                }
            } else if written_at.is_some() {
                debug!(%key, "discarding refresh of a removed entry");
                return Ok(fetched);
            }
            entries.insert(
                key.clone(),
                CacheEntry {
                    collection: fetched.clone(),
                    written: written_at.unwrap_or_default(),
                    fetched: ticket,
                    stale: false,
                },
            );
        }
        self.publish(key.clone(), CacheChange::Refreshed);
        Ok(fetched)
    }

    /// Marks `key` stale and refetches it. On failure the entry stays stale
    /// and keeps its last rows.
    pub async fn invalidate(&self, key: &QueryKey) -> Result<Collection<R>, SourceError> {
        let known = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.stale = true;
                    true
                }
                None => false,
            }
        };
        if known {
            self.publish(key.clone(), CacheChange::Invalidated);
        }
        self.refresh(key).await
    }

    /// Invalidates every cached key in `scope`. All keys are attempted; the
    /// first failure is returned.
    pub async fn invalidate_scope(&self, scope: QueryScope) -> Result<usize, SourceError> {
        let keys: Vec<QueryKey> = self
            .keys()
            .await
            .into_iter()
            .filter(|key| key.in_scope(scope))
            .collect();
        let count = keys.len();
        let results = join_all(keys.iter().map(|key| self.invalidate(key))).await;
        for (key, result) in keys.iter().zip(&results) {
            if let Err(error) = result {
                warn!(%key, %error, "scoped refresh failed");
            }
        }
        match results.into_iter().find_map(Result::err) {
            Some(error) => Err(error),
            None => Ok(count),
        }
    }

    pub async fn remove(&self, key: &QueryKey) -> Option<Collection<R>> {
        let removed = self.entries.write().await.remove(key)?;
        self.publish(key.clone(), CacheChange::Removed);
        Some(removed.collection)
    }

    pub async fn clear(&self) {
        let keys: Vec<QueryKey> = self.entries.write().await.drain().map(|(k, _)| k).collect();
        for key in keys {
            self.publish(key, CacheChange::Removed);
        }
    }

    async fn written_stamp(&self, key: &QueryKey) -> Option<u64> {
        self.entries.read().await.get(key).map(|entry| entry.written)
    }

    async fn mark_stale(&self, key: &QueryKey, written_at: Option<u64>, ticket: u64) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries
            .get_mut(key)
            .filter(|entry| Some(entry.written) == written_at && entry.fetched <= ticket)
        {
            entry.stale = true;
        }
    }

    fn next_stamp(&self) -> u64 {
        self.stamps.fetch_add(1, Ordering::Relaxed)
    }

    fn publish(&self, key: QueryKey, change: CacheChange) {
        let _ = self.events.send(CacheEvent { key, change });
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
