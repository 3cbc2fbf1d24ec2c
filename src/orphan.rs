//! Orphan block pool
//!
//! Blocks whose parent is unknown wait here, bounded and first-in
//! first-out, until their parent is accepted. Nothing here is persisted.

use crate::types::*;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    Duplicate,
    /// Stored after evicting the oldest orphan
    StoredWithEviction(Hash),
}

#[derive(Default)]
struct OrphanState {
    order: VecDeque<Hash>,
    blocks: HashMap<Hash, Block>,
    by_parent: HashMap<Hash, Vec<Hash>>,
}

impl OrphanState {
    fn remove(&mut self, hash: &Hash) -> Option<Block> {
        let block = self.blocks.remove(hash)?;
        self.order.retain(|queued| queued != hash);

        let parent = block.header.prev_block_hash;
        if let Some(children) = self.by_parent.get_mut(&parent) {
            children.retain(|child| child != hash);
            if children.is_empty() {
                self.by_parent.remove(&parent);
            }
        }

        Some(block)
    }
}

pub struct OrphanPool {
    capacity: usize,
    state: RwLock<OrphanState>,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(OrphanState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.state.read().blocks.contains_key(hash)
    }

    pub fn store(&self, block: Block) -> StoreOutcome {
        let hash = block.hash();

        // Duplicates are common; check them under the shared lock first
        if self.contains(&hash) {
            return StoreOutcome::Duplicate;
        }

        let mut state = self.state.write();
        if state.blocks.contains_key(&hash) {
            return StoreOutcome::Duplicate;
        }

        let mut evicted = None;
        if state.blocks.len() >= self.capacity {
            if let Some(oldest) = state.order.front().copied() {
                state.remove(&oldest);
                debug!(hash = %encode_hash(&oldest), "Evicted orphan block");
                evicted = Some(oldest);
            }
        }

        state
            .by_parent
            .entry(block.header.prev_block_hash)
            .or_default()
            .push(hash);
        state.order.push_back(hash);
        state.blocks.insert(hash, block);
        debug!(hash = %encode_hash(&hash), orphans = state.blocks.len(), "Added orphan block");

        match evicted {
            Some(oldest) => StoreOutcome::StoredWithEviction(oldest),
            None => StoreOutcome::Stored,
        }
    }

    pub fn remove(&self, hash: &Hash) -> Option<Block> {
        let removed = self.state.write().remove(hash);
        if removed.is_some() {
            debug!(hash = %encode_hash(hash), "Removed orphan block");
        }
        removed
    }

    /// Orphans waiting on `parent`, oldest first.
    pub fn by_parent(&self, parent: &Hash) -> Vec<Block> {
        let state = self.state.read();
        state
            .by_parent
            .get(parent)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child| state.blocks.get(child).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove and return the orphans waiting on `parent`.
    pub fn take_children(&self, parent: &Hash) -> Vec<Block> {
        let mut state = self.state.write();
        let children = state.by_parent.get(parent).cloned().unwrap_or_default();
        children
            .iter()
            .filter_map(|child| state.remove(child))
            .collect()
    }

    /// Drop every orphan that descends from `ancestor`; they can never connect.
    pub fn remove_descendants(&self, ancestor: &Hash) -> Vec<Hash> {
        let mut state = self.state.write();
        let mut removed = Vec::new();
        let mut pending = vec![*ancestor];
        let mut visited = HashSet::new();

        while let Some(parent) = pending.pop() {
            if !visited.insert(parent) {
                continue;
            }
            let children = state.by_parent.get(&parent).cloned().unwrap_or_default();
            for child in children {
                if state.remove(&child).is_some() {
                    debug!(hash = %encode_hash(&child), "Clipped orphan block");
                    removed.push(child);
                    pending.push(child);
                }
            }
        }

        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = OrphanState::default();
    }
}
