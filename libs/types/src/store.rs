//! Document store abstraction
//!
//! Registry and lifecycle tables are keyed documents. Any backend with
//! document semantics fits behind [`DocumentStore`]; [`InMemoryStore`] is the
//! one shipped with the services.

use dashmap::DashMap;

pub trait DocumentStore<T>: Send + Sync
where
    T: Clone + Send + Sync,
{
    fn get(&self, id: &str) -> Option<T>;

    /// Insert or replace, returning the previous document
    fn insert(&self, id: &str, document: T) -> Option<T>;

    fn remove(&self, id: &str) -> Option<T>;

    /// Mutate one document in place while holding its key exclusively.
    /// Returns `false` when no document exists under `id`.
    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut T)) -> bool;

    fn list(&self) -> Vec<(String, T)>;

    fn len(&self) -> usize {
        self.list().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// DashMap-backed store; per-key exclusion comes from the shard locks
#[derive(Debug)]
pub struct InMemoryStore<T> {
    documents: DashMap<String, T>,
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
        }
    }
}

impl<T> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DocumentStore<T> for InMemoryStore<T>
where
    T: Clone + Send + Sync,
{
    fn get(&self, id: &str) -> Option<T> {
        self.documents.get(id).map(|entry| entry.value().clone())
    }

    fn insert(&self, id: &str, document: T) -> Option<T> {
        self.documents.insert(id.to_string(), document)
    }

    fn remove(&self, id: &str) -> Option<T> {
        self.documents.remove(id).map(|(_, document)| document)
    }

    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut T)) -> bool {
        match self.documents.get_mut(id) {
            Some(mut entry) => {
                apply(entry.value_mut());
                true
            }
            None => false,
        }
    }

    fn list(&self) -> Vec<(String, T)> {
        self.documents
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.documents.len()
    }
}
