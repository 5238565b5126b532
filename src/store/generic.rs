use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::RwLock;

/// Keyed in-memory map shared by the `MemoryStore` tables. Reads take a
/// shared lock; every mutation variant holds the write lock for its whole
/// match-and-modify pass, so callers get atomic read-modify-write without
/// their own locking.
#[derive(Default)]
pub struct GenericMemoryStore<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> GenericMemoryStore<K, V>
where
    K: Eq + Hash + Send + Clone + Sync,
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn put(&self, key: K, value: V) {
        self.entries.write().await.insert(key, value);
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        self.entries.write().await.remove(key)
    }

    pub async fn values(&self) -> Vec<V> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Mutate the value under `key`, if present. Returns whether a value
    /// was found.
    pub async fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Find the first value matching the predicate and mutate it under the
    /// same lock, so match-then-update is atomic.
    pub async fn update_where<P, F>(&self, mut pred: P, f: F) -> bool
    where
        P: FnMut(&V) -> bool,
        F: FnOnce(&mut V),
    {
        let mut entries = self.entries.write().await;
        match entries.values_mut().find(|v| pred(v)) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Keep only the entries the predicate accepts.
    pub async fn retain_where<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.entries.write().await.retain(|k, v| f(k, v));
    }
}
