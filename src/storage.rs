//! Storage contract and the bundled in-memory implementation
//!
//! Storage keeps every block it was given (canonical or not), the canonical
//! height index, and the outputs of canonical blocks. Spent outputs stay
//! around, flagged, so that a reorganization can unspend them.

use crate::error::{ChainError, Result};
use crate::types::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

pub trait Storage: Send + Sync {
    fn get_block(&self, hash: &Hash) -> Result<Option<Block>>;

    /// Header of the canonical block at `height`.
    fn get_header_at(&self, height: Natural) -> Result<Option<BlockHeader>>;

    /// Index `block` as canonical at `height` (which must be `top + 1`) and
    /// add its outputs. Inputs are spent separately via [`Storage::spend_output`].
    fn put_block(&self, block: &Block, height: Natural) -> Result<()>;

    /// Persist `block` without indexing it.
    fn store_block(&self, block: &Block) -> Result<()>;

    /// Remove the top canonical block from the index along with the outputs it created.
    fn unindex_block(&self, height: Natural) -> Result<Block>;

    fn get_output(&self, point: &OutPoint) -> Result<Option<OutputState>>;

    fn spend_output(&self, point: &OutPoint) -> Result<()>;

    fn unspend_output(&self, point: &OutPoint) -> Result<()>;

    /// Height of the canonical tip; `None` when empty.
    fn top_height(&self) -> Result<Option<Natural>>;
}

#[derive(Default)]
struct StorageState {
    blocks: HashMap<Hash, Block>,
    canonical: Vec<Hash>,
    outputs: HashMap<OutPoint, OutputState>,
}

impl StorageState {
    fn block_at(&self, height: Natural) -> Option<&Block> {
        let hash = self.canonical.get(height as usize)?;
        self.blocks.get(hash)
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<StorageState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every unspent canonical output, ordered by outpoint.
    pub fn unspent_outputs(&self) -> Vec<(OutPoint, OutputState)> {
        let state = self.state.read();
        let mut unspent: Vec<_> = state
            .outputs
            .iter()
            .filter(|(_, output)| !output.spent)
            .map(|(point, output)| (*point, output.clone()))
            .collect();
        unspent.sort_by(|a, b| a.0.cmp(&b.0));
        unspent
    }

    pub fn block_count(&self) -> usize {
        self.state.read().blocks.len()
    }

    fn set_spent(&self, point: &OutPoint, spent: bool) -> Result<()> {
        let mut state = self.state.write();
        let output = state.outputs.get_mut(point).ok_or_else(|| {
            ChainError::Storage(format!(
                "unknown output {}:{}",
                encode_hash(&point.hash),
                point.index
            ))
        })?;

        if output.spent == spent {
            return Err(ChainError::Storage(format!(
                "output {}:{} already {}",
                encode_hash(&point.hash),
                point.index,
                if spent { "spent" } else { "unspent" }
            )));
        }

        output.spent = spent;
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        Ok(self.state.read().blocks.get(hash).cloned())
    }

    fn get_header_at(&self, height: Natural) -> Result<Option<BlockHeader>> {
        Ok(self.state.read().block_at(height).map(|block| block.header.clone()))
    }

    fn put_block(&self, block: &Block, height: Natural) -> Result<()> {
        let mut state = self.state.write();
        if height != state.canonical.len() as Natural {
            return Err(ChainError::Storage(format!(
                "cannot index block at height {height}, next height is {}",
                state.canonical.len()
            )));
        }

        let hash = block.hash();
        for tx in &block.transactions {
            let txid = tx.hash();
            let coinbase = tx.is_coinbase();
            for (index, output) in tx.outputs.iter().enumerate() {
                state.outputs.insert(
                    OutPoint::new(txid, index as u32),
                    OutputState::unspent(output.clone(), height, coinbase),
                );
            }
        }

        state.blocks.entry(hash).or_insert_with(|| block.clone());
        state.canonical.push(hash);
        debug!(height, hash = %encode_hash(&hash), "Indexed block");
        Ok(())
    }

    fn store_block(&self, block: &Block) -> Result<()> {
        let mut state = self.state.write();
        state.blocks.entry(block.hash()).or_insert_with(|| block.clone());
        Ok(())
    }

    fn unindex_block(&self, height: Natural) -> Result<Block> {
        let mut state = self.state.write();
        if height + 1 != state.canonical.len() as Natural {
            return Err(ChainError::Storage(format!(
                "cannot unindex height {height}, top is {}",
                state.canonical.len() as i64 - 1
            )));
        }

        let block = state
            .block_at(height)
            .cloned()
            .ok_or_else(|| ChainError::Storage(format!("missing block at height {height}")))?;

        for tx in &block.transactions {
            let txid = tx.hash();
            for index in 0..tx.outputs.len() {
                state.outputs.remove(&OutPoint::new(txid, index as u32));
            }
        }

        state.canonical.pop();
        debug!(height, hash = %encode_hash(&block.hash()), "Unindexed block");
        Ok(block)
    }

    fn get_output(&self, point: &OutPoint) -> Result<Option<OutputState>> {
        Ok(self.state.read().outputs.get(point).cloned())
    }

    fn spend_output(&self, point: &OutPoint) -> Result<()> {
        self.set_spent(point, true)
    }

    fn unspend_output(&self, point: &OutPoint) -> Result<()> {
        self.set_spent(point, false)
    }

    fn top_height(&self) -> Result<Option<Natural>> {
        let state = self.state.read();
        Ok(state.canonical.len().checked_sub(1).map(|top| top as Natural))
    }
}
