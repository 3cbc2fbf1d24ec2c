//! UTXO views: read access to outputs, and copy-on-write overlays
//!
//! Contextual validation never touches storage directly. A block on a side
//! branch is checked against an overlay in which the canonical blocks above
//! the fork point have been undone and the branch blocks up to its parent
//! applied. Nothing in the overlay reaches storage; it is dropped afterwards.

use crate::error::{ChainError, Result};
use crate::storage::Storage;
use crate::types::*;
use std::collections::HashMap;

pub trait UtxoView {
    /// The output at `point`, spent or not; `None` if it never existed on this branch.
    fn get_output(&self, point: &OutPoint) -> Result<Option<OutputState>>;
}

/// Canonical outputs straight from storage.
pub struct StorageView<'a> {
    storage: &'a dyn Storage,
}

impl<'a> StorageView<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }
}

impl<'a> UtxoView for StorageView<'a> {
    fn get_output(&self, point: &OutPoint) -> Result<Option<OutputState>> {
        self.storage.get_output(point)
    }
}

/// Pending changes layered over a base view. `None` hides an output.
pub struct UtxoOverlay<'a> {
    base: &'a dyn UtxoView,
    changes: HashMap<OutPoint, Option<OutputState>>,
}

impl<'a> UtxoOverlay<'a> {
    pub fn new(base: &'a dyn UtxoView) -> Self {
        Self {
            base,
            changes: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn require(&self, point: &OutPoint) -> Result<OutputState> {
        self.get_output(point)?.ok_or_else(|| {
            ChainError::Invariant(format!(
                "output {}:{} missing from view",
                encode_hash(&point.hash),
                point.index
            ))
        })
    }

    /// Spend the inputs of `tx` and add its outputs.
    ///
    /// Inputs must already have been validated against this view.
    pub fn apply_transaction(&mut self, tx: &Transaction, height: Natural) -> Result<()> {
        let coinbase = tx.is_coinbase();
        if !coinbase {
            for input in &tx.inputs {
                let mut state = self.require(&input.prevout)?;
                state.spent = true;
                self.changes.insert(input.prevout, Some(state));
            }
        }

        let hash = tx.hash();
        for (index, output) in tx.outputs.iter().enumerate() {
            let state = OutputState::unspent(output.clone(), height, coinbase);
            self.changes.insert(OutPoint::new(hash, index as u32), Some(state));
        }

        Ok(())
    }

    pub fn apply_block(&mut self, block: &Block, height: Natural) -> Result<()> {
        for tx in &block.transactions {
            self.apply_transaction(tx, height)?;
        }
        Ok(())
    }

    /// Reverse of [`apply_block`](Self::apply_block): transactions are
    /// undone last-first so intra-block spends unwind correctly.
    pub fn undo_block(&mut self, block: &Block) -> Result<()> {
        for tx in block.transactions.iter().rev() {
            let hash = tx.hash();
            for index in 0..tx.outputs.len() {
                self.changes.insert(OutPoint::new(hash, index as u32), None);
            }

            if tx.is_coinbase() {
                continue;
            }

            for input in &tx.inputs {
                let mut state = self.require(&input.prevout)?;
                state.spent = false;
                self.changes.insert(input.prevout, Some(state));
            }
        }
        Ok(())
    }
}

impl<'a> UtxoView for UtxoOverlay<'a> {
    fn get_output(&self, point: &OutPoint) -> Result<Option<OutputState>> {
        match self.changes.get(point) {
            Some(state) => Ok(state.clone()),
            None => self.base.get_output(point),
        }
    }
}

/// A fixed set of outputs, for tests and tooling.
impl UtxoView for HashMap<OutPoint, OutputState> {
    fn get_output(&self, point: &OutPoint) -> Result<Option<OutputState>> {
        Ok(self.get(point).cloned())
    }
}
