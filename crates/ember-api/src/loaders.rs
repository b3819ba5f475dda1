use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use ember_db::models::{AccountRow, VoteRow};
use ember_db::{Database, StoreError};

/// Outcome of a flushed lookup. `Absent` is a successful "no such row",
/// distinct from a key that was never fetched at all (`get` returns `None`).
#[derive(Debug)]
pub enum Loaded<V> {
    Absent,
    Present(V),
}

/// Request-scoped key collector. Many point lookups issued while building one
/// response are gathered into a pending set, then satisfied by a single
/// batched store query per flush. Each key is fetched at most once per
/// loader instance; instances are never shared across requests.
pub struct BatchLoader<K, V> {
    pending: HashSet<K>,
    cache: HashMap<K, Loaded<V>>,
}

impl<K, V> BatchLoader<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            pending: HashSet::new(),
            cache: HashMap::new(),
        }
    }

    /// Record a key to resolve on the next flush. Duplicates and
    /// already-cached keys collapse to nothing.
    pub fn enqueue(&mut self, key: K) {
        if !self.cache.contains_key(&key) {
            self.pending.insert(key);
        }
    }

    /// Resolve every pending key with one call to `fetch`. Keys missing from
    /// the fetch result are cached as `Absent`. No pending keys, no fetch.
    pub fn flush<F>(&mut self, fetch: F) -> Result<(), StoreError>
    where
        F: FnOnce(&[K]) -> Result<Vec<(K, V)>, StoreError>,
    {
        if self.pending.is_empty() {
            return Ok(());
        }

        let keys: Vec<K> = self.pending.drain().collect();
        let mut found: HashMap<K, V> = fetch(&keys)?.into_iter().collect();

        for key in keys {
            let outcome = match found.remove(&key) {
                Some(value) => Loaded::Present(value),
                None => Loaded::Absent,
            };
            self.cache.insert(key, outcome);
        }

        Ok(())
    }

    /// `None` means the key was never flushed; `Loaded::Absent` means the
    /// store was asked and had no row.
    pub fn get(&self, key: &K) -> Option<&Loaded<V>> {
        self.cache.get(key)
    }
}

/// The loader pair one response resolves its post fields through:
/// author accounts by id, and the viewer's votes by (account, post).
pub struct Loaders {
    pub accounts: BatchLoader<String, AccountRow>,
    pub votes: BatchLoader<(String, String), VoteRow>,
}

impl Loaders {
    pub fn new() -> Self {
        Self {
            accounts: BatchLoader::new(),
            votes: BatchLoader::new(),
        }
    }

    /// Drain both pending sets, issuing at most one store round trip per loader.
    pub fn flush(&mut self, db: &Database) -> Result<(), StoreError> {
        self.accounts.flush(|ids| {
            Ok(db
                .accounts_by_ids(ids)?
                .into_iter()
                .map(|account| (account.id.clone(), account))
                .collect())
        })?;

        self.votes.flush(|keys| {
            Ok(db
                .votes_for_keys(keys)?
                .into_iter()
                .map(|vote| ((vote.account_id.clone(), vote.post_id.clone()), vote))
                .collect())
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_collapse_into_one_fetch() {
        let mut loader: BatchLoader<String, i64> = BatchLoader::new();
        loader.enqueue("a".to_string());
        loader.enqueue("a".to_string());
        loader.enqueue("a".to_string());
        loader.enqueue("b".to_string());

        let mut calls = 0;
        let mut fetched: Vec<String> = vec![];
        loader
            .flush(|keys| {
                calls += 1;
                fetched = keys.to_vec();
                Ok(keys.iter().map(|k| (k.clone(), 1)).collect())
            })
            .unwrap();

        assert_eq!(calls, 1);
        fetched.sort();
        assert_eq!(fetched, ["a", "b"]);
    }

    #[test]
    fn flushed_keys_are_memoized() {
        let mut loader: BatchLoader<String, i64> = BatchLoader::new();
        loader.enqueue("a".to_string());
        loader
            .flush(|keys| Ok(keys.iter().map(|k| (k.clone(), 7)).collect()))
            .unwrap();

        // re-enqueueing a cached key must not reach the store again
        loader.enqueue("a".to_string());
        loader.enqueue("b".to_string());

        let mut fetched: Vec<String> = vec![];
        loader
            .flush(|keys| {
                fetched = keys.to_vec();
                Ok(keys.iter().map(|k| (k.clone(), 8)).collect())
            })
            .unwrap();

        assert_eq!(fetched, ["b"]);
        assert!(matches!(loader.get(&"a".to_string()), Some(Loaded::Present(7))));
        assert!(matches!(loader.get(&"b".to_string()), Some(Loaded::Present(8))));
    }

    #[test]
    fn empty_flush_never_calls_fetch() {
        let mut loader: BatchLoader<String, i64> = BatchLoader::new();

        let mut calls = 0;
        loader
            .flush(|_| {
                calls += 1;
                Ok(vec![])
            })
            .unwrap();

        assert_eq!(calls, 0);
    }

    #[test]
    fn missing_row_is_absent_not_an_error() {
        let mut loader: BatchLoader<String, i64> = BatchLoader::new();
        loader.enqueue("ghost".to_string());

        loader.flush(|_| Ok(vec![])).unwrap();

        assert!(matches!(loader.get(&"ghost".to_string()), Some(Loaded::Absent)));
    }

    #[test]
    fn unfetched_key_is_distinguishable_from_absent() {
        let loader: BatchLoader<String, i64> = BatchLoader::new();
        assert!(loader.get(&"never-asked".to_string()).is_none());
    }

    #[test]
    fn fetch_failure_leaves_nothing_cached() {
        let mut loader: BatchLoader<String, i64> = BatchLoader::new();
        loader.enqueue("a".to_string());

        let err = loader
            .flush(|_| Err(StoreError::Unavailable("down".to_string())))
            .unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(loader.get(&"a".to_string()).is_none());
    }
}
