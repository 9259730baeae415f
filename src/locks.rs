use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use crate::bracket::NodeId;
use crate::error::BracketResult;
use crate::prediction::UserId;

/// Lazily created mutex per key. Entries are never removed; the key space
/// (users, fixtures) is bounded by the deployment.
#[derive(Debug)]
struct KeyedMutex<K> {
    entries: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Copy> KeyedMutex<K> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn run<T>(&self, key: K, action: impl FnOnce() -> BracketResult<T>) -> BracketResult<T> {
        let lock = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| anyhow!("lock table poisoned"))?;
            entries.entry(key).or_default().clone()
        };
        let _guard = lock.lock().map_err(|_| anyhow!("keyed lock poisoned"))?;
        action()
    }
}

/// Serializes mutations per user and result recording per fixture.
#[derive(Debug)]
pub struct UserLocks {
    users: KeyedMutex<UserId>,
    nodes: KeyedMutex<NodeId>,
}

impl Default for UserLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl UserLocks {
    pub fn new() -> Self {
        Self {
            users: KeyedMutex::new(),
            nodes: KeyedMutex::new(),
        }
    }

    pub fn with_user<T>(
        &self,
        user: UserId,
        action: impl FnOnce() -> BracketResult<T>,
    ) -> BracketResult<T> {
        self.users.run(user, action)
    }

    pub fn with_node<T>(
        &self,
        node: NodeId,
        action: impl FnOnce() -> BracketResult<T>,
    ) -> BracketResult<T> {
        self.nodes.run(node, action)
    }
}
