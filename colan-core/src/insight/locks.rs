//! Per-entity mutual exclusion.
//!
//! Every read-modify-write against an entity's intelligence record, and
//! every submission decision for that entity, runs inside this critical
//! section. A fixed pool of shards keyed by `hash(id) % N` bounds memory
//! under entity churn; two entities sharing a shard serialize against each
//! other, which costs throughput but never correctness.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use colan_model::EntityId;
use tokio::sync::Mutex;

pub struct EntityLocks {
    shards: Vec<Arc<Mutex<()>>>,
}

impl std::fmt::Debug for EntityLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityLocks")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl EntityLocks {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    /// The shard guarding `entity`. Callers hold the guard across the
    /// whole critical section (skip check, submit, register).
    pub fn shard(&self, entity: EntityId) -> Arc<Mutex<()>> {
        let mut hasher = DefaultHasher::new();
        entity.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        Arc::clone(&self.shards[idx])
    }
}
