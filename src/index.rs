//! Block index: every validated header, with cumulative work, in an arena

use crate::constants::MEDIAN_TIME_SPAN;
use crate::error::{ChainError, Result};
use crate::pow::{block_work, U256};
use crate::types::*;
use std::collections::HashMap;

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct BlockNode {
    pub hash: Hash,
    pub header: BlockHeader,
    pub height: Natural,
    pub parent: Option<NodeId>,
    /// Work of this block and all its ancestors
    pub chain_work: U256,
}

/// Arena of block nodes linked to their parents.
///
/// `canonical[h]` is the node of the active chain at height `h`. Nodes are
/// never removed; a side branch simply has nodes outside `canonical`.
#[derive(Debug, Default)]
pub struct BlockIndex {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<Hash, NodeId>,
    canonical: Vec<NodeId>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a header whose parent is already indexed, or the genesis header
    /// of an empty index.
    pub fn insert(&mut self, header: BlockHeader) -> Result<NodeId> {
        let hash = header.hash();
        if let Some(&existing) = self.by_hash.get(&hash) {
            return Ok(existing);
        }

        let (parent, height, parent_work) = if self.nodes.is_empty() {
            (None, 0, U256::ZERO)
        } else {
            let parent = self.lookup(&header.prev_block_hash).ok_or_else(|| {
                ChainError::Invariant(format!(
                    "parent {} of {} is not indexed",
                    encode_hash(&header.prev_block_hash),
                    encode_hash(&hash)
                ))
            })?;
            let node = &self.nodes[parent];
            (Some(parent), node.height + 1, node.chain_work)
        };

        let id = self.nodes.len();
        self.nodes.push(BlockNode {
            hash,
            chain_work: parent_work.saturating_add(&block_work(header.bits)),
            header,
            height,
            parent,
        });
        self.by_hash.insert(hash, id);
        Ok(id)
    }

    pub fn lookup(&self, hash: &Hash) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn node(&self, id: NodeId) -> &BlockNode {
        &self.nodes[id]
    }

    pub fn tip(&self) -> Option<NodeId> {
        self.canonical.last().copied()
    }

    pub fn tip_node(&self) -> Option<&BlockNode> {
        self.tip().map(|id| &self.nodes[id])
    }

    /// Height of the active chain, `None` before genesis
    pub fn height(&self) -> Option<Natural> {
        self.canonical.len().checked_sub(1).map(|top| top as Natural)
    }

    pub fn canonical_at(&self, height: Natural) -> Option<NodeId> {
        self.canonical.get(height as usize).copied()
    }

    pub fn is_canonical(&self, id: NodeId) -> bool {
        self.canonical_at(self.nodes[id].height) == Some(id)
    }

    /// Extend the active chain with a child of the tip.
    pub fn push_canonical(&mut self, id: NodeId) -> Result<()> {
        let node = &self.nodes[id];
        if node.parent != self.tip() || node.height != self.canonical.len() as Natural {
            return Err(ChainError::Invariant(format!(
                "{} does not extend the active chain",
                encode_hash(&node.hash)
            )));
        }
        self.canonical.push(id);
        Ok(())
    }

    pub fn pop_canonical(&mut self) -> Option<NodeId> {
        self.canonical.pop()
    }

    /// Nearest canonical ancestor of `id` (itself when canonical).
    pub fn fork_point(&self, mut id: NodeId) -> NodeId {
        while !self.is_canonical(id) {
            match self.nodes[id].parent {
                Some(parent) => id = parent,
                None => break,
            }
        }
        id
    }

    /// Non-canonical nodes from just above the fork point up to `id`, ascending.
    pub fn branch(&self, id: NodeId) -> Vec<NodeId> {
        let mut branch = Vec::new();
        let mut cursor = id;
        while !self.is_canonical(cursor) {
            branch.push(cursor);
            match self.nodes[cursor].parent {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        branch.reverse();
        branch
    }

    /// Ancestor of `id` at `height` (or `id` itself).
    pub fn ancestor(&self, mut id: NodeId, height: Natural) -> Option<NodeId> {
        if height > self.nodes[id].height {
            return None;
        }

        loop {
            let node = &self.nodes[id];
            if node.height == height {
                return Some(id);
            }
            if self.is_canonical(id) {
                return self.canonical_at(height);
            }
            id = node.parent?;
        }
    }

    /// Median timestamp of `id` and up to ten of its ancestors.
    pub fn median_time_past(&self, id: NodeId) -> u32 {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            let node = &self.nodes[current];
            times.push(node.header.timestamp);
            cursor = node.parent;
        }

        times.sort_unstable();
        times[times.len() / 2]
    }
}
