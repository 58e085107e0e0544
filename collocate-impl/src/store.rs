//! Keyed get-or-create storage for computed artifacts.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Hands out process-unique ids for stored artifacts.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Values created at most once per key.
///
/// Concurrent callers asking for the same key wait on a single creation.
/// If that creation fails or its future is dropped, nothing is stored and the
/// next caller runs it again.
#[derive(Debug)]
pub struct KeyedStore<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<Arc<V>>>>>,
}

impl<K, V> Default for KeyedStore<K, V> {
    fn default() -> Self {
        KeyedStore {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> KeyedStore<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_try_create<E, F, Fut>(&self, key: K, create: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self.cells.lock().entry(key.clone()).or_default().clone();
        let vacancy = Vacancy {
            cells: &self.cells,
            key,
            cell,
        };
        vacancy
            .cell
            .get_or_try_init(|| async { create().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.cells.lock().get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of keys holding a value.
    pub fn len(&self) -> usize {
        self.cells
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a key's cell again when its creation failed or was dropped and no
/// other caller is waiting on it.
struct Vacancy<'a, K: Eq + Hash, V> {
    cells: &'a Mutex<HashMap<K, Arc<OnceCell<Arc<V>>>>>,
    key: K,
    cell: Arc<OnceCell<Arc<V>>>,
}

impl<K: Eq + Hash, V> Drop for Vacancy<'_, K, V> {
    fn drop(&mut self) {
        if self.cell.initialized() {
            return;
        }
        let mut cells = self.cells.lock();
        // handles are only cloned under the lock: one in the map, one here
        let unshared = Arc::strong_count(&self.cell) == 2
            && cells
                .get(&self.key)
                .map_or(false, |cell| Arc::ptr_eq(cell, &self.cell));
        if unshared {
            cells.remove(&self.key);
        }
    }
}
