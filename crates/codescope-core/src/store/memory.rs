//! In-memory [`SnapshotStore`] for tests and ephemeral indexes.
//!
//! Uses `BTreeMap`/`HashMap` behind `std::sync::RwLock`. Nothing survives
//! the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{Snapshot, SnapshotStore, StoreMeta};

#[derive(Default)]
struct State {
    meta: StoreMeta,
    staged: BTreeMap<u64, Snapshot>,
    active: Option<Snapshot>,
    last_generation: u64,
    cache: HashMap<String, Vec<f32>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store bound to `root`, as the SQLite store records it.
    pub fn for_root(root: impl Into<String>) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.write() {
            state.meta.root = Some(root.into());
        }
        store
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn meta(&self) -> Result<StoreMeta> {
        Ok(self.state.read().map_err(poisoned)?.meta.clone())
    }

    async fn load_active(&self) -> Result<Option<Snapshot>> {
        Ok(self.state.read().map_err(poisoned)?.active.clone())
    }

    async fn next_generation(&self) -> Result<u64> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.last_generation += 1;
        Ok(state.last_generation)
    }

    async fn stage(&self, snapshot: &Snapshot) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.staged.insert(snapshot.generation, snapshot.clone());
        Ok(())
    }

    async fn commit(&self, generation: u64, provider: &str, dims: usize) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        let Some(snapshot) = state.staged.remove(&generation) else {
            bail!("generation {} is not staged", generation);
        };
        state.meta.provider = Some(provider.to_string());
        state.meta.dims = dims;
        state.meta.active_generation = Some(generation);
        state.active = Some(snapshot);
        state.staged.retain(|&g, _| g > generation);
        Ok(())
    }

    async fn discard(&self, generation: u64) -> Result<()> {
        self.state
            .write()
            .map_err(poisoned)?
            .staged
            .remove(&generation);
        Ok(())
    }

    async fn cached_embeddings(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(keys
            .iter()
            .filter_map(|k| state.cache.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn cache_embeddings(
        &self,
        _provider: &str,
        entries: &[(String, Vec<f32>)],
    ) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        for (key, vector) in entries {
            state.cache.insert(key.clone(), vector.clone());
        }
        Ok(())
    }

    async fn retain_embeddings(&self, keep: &[String]) -> Result<u64> {
        let keep: std::collections::HashSet<&str> = keep.iter().map(String::as_str).collect();
        let mut state = self.state.write().map_err(poisoned)?;
        let before = state.cache.len();
        state.cache.retain(|key, _| keep.contains(key.as_str()));
        Ok((before - state.cache.len()) as u64)
    }

    async fn add_security_violations(&self, n: u64) -> Result<u64> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.meta.security_violations += n;
        Ok(state.meta.security_violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(generation: u64) -> Snapshot {
        Snapshot {
            generation,
            provider: "hash/8".into(),
            dims: 8,
            ..Snapshot::default()
        }
    }

    #[tokio::test]
    async fn staged_generation_is_invisible_until_commit() {
        let store = InMemoryStore::new();
        let generation = store.next_generation().await.unwrap();
        store.stage(&snapshot(generation)).await.unwrap();
        assert!(store.load_active().await.unwrap().is_none());

        store.commit(generation, "hash/8", 8).await.unwrap();
        let active = store.load_active().await.unwrap().unwrap();
        assert_eq!(active.generation, generation);
        let meta = store.meta().await.unwrap();
        assert_eq!(meta.active_generation, Some(generation));
        assert_eq!(meta.provider.as_deref(), Some("hash/8"));
    }

    #[tokio::test]
    async fn discard_keeps_previous_generation() {
        let store = InMemoryStore::new();
        let first = store.next_generation().await.unwrap();
        store.stage(&snapshot(first)).await.unwrap();
        store.commit(first, "hash/8", 8).await.unwrap();

        let second = store.next_generation().await.unwrap();
        assert!(second > first);
        store.stage(&snapshot(second)).await.unwrap();
        store.discard(second).await.unwrap();

        assert_eq!(store.load_active().await.unwrap().unwrap().generation, first);
        assert!(store.commit(second, "hash/8", 8).await.is_err());
    }

    #[tokio::test]
    async fn embedding_cache_and_violations() {
        let store = InMemoryStore::new();
        store
            .cache_embeddings("hash/2", &[("k1".into(), vec![1.0, 0.0])])
            .await
            .unwrap();
        let hit = store
            .cached_embeddings(&["k1".into(), "k2".into()])
            .await
            .unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit["k1"], vec![1.0, 0.0]);

        assert_eq!(store.add_security_violations(2).await.unwrap(), 2);
        assert_eq!(store.add_security_violations(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn retain_drops_unlisted_cache_entries() {
        let store = InMemoryStore::new();
        store
            .cache_embeddings(
                "hash/2",
                &[("a".into(), vec![1.0, 0.0]), ("b".into(), vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        assert_eq!(store.retain_embeddings(&["b".into()]).await.unwrap(), 1);
        let left = store.cached_embeddings(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(left.len(), 1);
        assert!(left.contains_key("b"));
    }
}
