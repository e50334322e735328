// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::error::{DaliError, Result};
use crate::transport::lock;

/// What a waiter eventually receives: the answer (possibly "no answer"),
/// or `ConnectionLost` when the session dropped first.
type Outcome<V> = Result<Option<V>>;

struct Entry<V> {
    id: u64,
    waiters: Vec<oneshot::Sender<Outcome<V>>>,
}

/// Correlates outstanding queries with their asynchronous answers.
///
/// At most one entry exists per key. Each entry is resolved exactly once
/// (answer, timeout or connection loss) and removed in the same step.
pub struct PendingQueries<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    next_id: AtomicU64,
}

/// Handle to one waiter on a pending entry.
pub struct PendingQuery<K, V> {
    key: K,
    id: u64,
    /// Joined waiters share an entry they did not create and never remove it
    owner: bool,
    rx: oneshot::Receiver<Outcome<V>>,
}

impl<K, V> PendingQuery<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, V> Default for PendingQueries<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> PendingQueries<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Insert a new unresolved entry for `key`.
    ///
    /// Fails with `AlreadyInProgress` if `key` already has a live entry.
    pub fn register(&self, key: K) -> Result<PendingQuery<K, V>> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(&key) {
            return Err(DaliError::AlreadyInProgress {
                key: format!("{key:?}"),
            });
        }
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        entries.insert(key.clone(), Entry { id, waiters: vec![tx] });
        Ok(PendingQuery {
            key,
            id,
            owner: true,
            rx,
        })
    }

    /// Register `key`, or attach to the entry already pending for it.
    ///
    /// The boolean is `true` when an existing entry was joined, in which case
    /// the caller must not send the query again.
    pub fn register_or_join(&self, key: K) -> (PendingQuery<K, V>, bool) {
        let mut entries = lock(&self.entries);
        let (tx, rx) = oneshot::channel();
        if let Some(entry) = entries.get_mut(&key) {
            entry.waiters.push(tx);
            let id = entry.id;
            return (
                PendingQuery {
                    key,
                    id,
                    owner: false,
                    rx,
                },
                true,
            );
        }
        let id = self.allocate_id();
        entries.insert(key.clone(), Entry { id, waiters: vec![tx] });
        (
            PendingQuery {
                key,
                id,
                owner: true,
                rx,
            },
            false,
        )
    }

    /// Resolve and remove the entry for `key`. Returns whether one existed.
    pub fn resolve(&self, key: &K, value: Option<V>) -> bool {
        let entry = lock(&self.entries).remove(key);
        match entry {
            Some(entry) => {
                Self::complete(entry, Ok(value));
                true
            }
            None => false,
        }
    }

    /// If exactly one entry is pending, resolve it with `value` whatever
    /// its key, and return that key.
    pub fn resolve_sole(&self, value: Option<V>) -> Option<K> {
        let mut entries = lock(&self.entries);
        if entries.len() != 1 {
            return None;
        }
        let key = entries.keys().next().cloned()?;
        let entry = entries.remove(&key)?;
        drop(entries);
        Self::complete(entry, Ok(value));
        Some(key)
    }

    /// Fail every pending entry with `ConnectionLost` and clear the registry.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<Entry<V>> = lock(&self.entries).drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            Self::complete(entry, Err(DaliError::ConnectionLost));
        }
        if count > 0 {
            debug!("Aborted {} pending quer{}", count, if count == 1 { "y" } else { "ies" });
        }
        count
    }

    /// Remove an entry without resolving it (e.g. its query was never sent).
    pub fn cancel(&self, query: &PendingQuery<K, V>) {
        self.remove_if_current(&query.key, query.id);
    }

    /// Wait for the answer to `query`, at most `limit`.
    ///
    /// On timeout the entry is removed, unless a late answer or a newer
    /// entry for the same key got there first.
    pub async fn wait(&self, query: PendingQuery<K, V>, limit: Duration) -> Result<Option<V>> {
        let PendingQuery { key, id, owner, rx } = query;
        match timeout(limit, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without resolving
            Ok(Err(_)) => Err(DaliError::ConnectionLost),
            Err(_) => {
                if owner {
                    self.remove_if_current(&key, id);
                }
                Err(DaliError::Timeout {
                    key: format!("{key:?}"),
                })
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_if_current(&self, key: &K, id: u64) {
        let mut entries = lock(&self.entries);
        if entries.get(key).is_some_and(|e| e.id == id) {
            entries.remove(key);
        }
    }

    /// `outcome` is either an answer or `ConnectionLost`.
    fn complete(entry: Entry<V>, outcome: Outcome<V>) {
        for tx in entry.waiters {
            let value = match &outcome {
                Ok(v) => Ok(v.clone()),
                Err(_) => Err(DaliError::ConnectionLost),
            };
            // Waiter may have timed out and dropped its receiver
            let _ = tx.send(value);
        }
    }
}
