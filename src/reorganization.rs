//! Chain reorganization: fork choice and moving storage between branches

use crate::error::{ChainError, Result};
use crate::index::{BlockIndex, NodeId};
use crate::pow::U256;
use crate::storage::Storage;
use crate::types::*;
use tracing::debug;

/// Published on every change of the active chain, including a plain
/// extension by one block (which replaces nothing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    /// Height of the last block both branches share
    pub fork_height: Natural,
    pub fork_hash: Hash,
    /// Blocks that joined the active chain, ascending
    pub arrived: Vec<Block>,
    /// Blocks that left the active chain, ascending
    pub replaced: Vec<Block>,
}

impl ReorgEvent {
    pub fn is_extension(&self) -> bool {
        self.replaced.is_empty()
    }
}

/// Fork choice: a branch must carry strictly more work to win.
///
/// Ties keep the branch seen first.
pub fn should_reorganize(candidate_work: &U256, active_work: &U256) -> bool {
    candidate_work > active_work
}

/// How to move the active chain onto the branch ending at some node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgPlan {
    pub fork: NodeId,
    /// Canonical nodes to disconnect, highest first
    pub unwind: Vec<NodeId>,
    /// Branch nodes to connect, ascending
    pub apply: Vec<NodeId>,
}

impl ReorgPlan {
    pub fn new(index: &BlockIndex, target: NodeId) -> Result<Self> {
        let fork = index.fork_point(target);
        let tip = index
            .tip()
            .ok_or_else(|| ChainError::Invariant("active chain is empty".to_string()))?;

        let fork_height = index.node(fork).height;
        let tip_height = index.node(tip).height;
        let mut unwind = Vec::new();
        for height in (fork_height + 1..=tip_height).rev() {
            let id = index.canonical_at(height).ok_or_else(|| {
                ChainError::Invariant(format!("no canonical block at height {height}"))
            })?;
            unwind.push(id);
        }

        Ok(Self {
            fork,
            unwind,
            apply: index.branch(target),
        })
    }

    pub fn depth(&self) -> usize {
        self.unwind.len()
    }
}

/// Index `block` as canonical at `height` and spend its inputs.
pub fn connect_block(storage: &dyn Storage, block: &Block, height: Natural) -> Result<()> {
    storage.put_block(block, height)?;
    for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
        for input in &tx.inputs {
            storage.spend_output(&input.prevout)?;
        }
    }
    debug!(height, hash = %encode_hash(&block.hash()), "Connected block");
    Ok(())
}

/// Reverse of [`connect_block`] for the canonical tip at `height`.
pub fn disconnect_block(storage: &dyn Storage, block: &Block, height: Natural) -> Result<()> {
    let hash = block.hash();
    let indexed = storage.get_header_at(height)?.map(|header| header.hash());
    if indexed != Some(hash) {
        return Err(ChainError::Storage(format!(
            "{} is not the canonical block at height {height}",
            encode_hash(&hash)
        )));
    }

    for tx in block.transactions.iter().rev().filter(|tx| !tx.is_coinbase()) {
        for input in tx.inputs.iter().rev() {
            storage.unspend_output(&input.prevout)?;
        }
    }

    storage.unindex_block(height)?;
    debug!(height, hash = %encode_hash(&hash), "Disconnected block");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::storage::MemoryStorage;

    fn header(parent: Hash, nonce: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block_hash: parent,
            merkle_root: NULL_HASH,
            timestamp: nonce,
            bits: REGTEST_POW_LIMIT,
            nonce,
        }
    }

    fn coinbase(tag: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint::null(),
                script_sig: vec![0x01, tag],
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TransactionOutput {
                value: 50,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn test_should_reorganize_requires_more_work() {
        let two = U256::from_u64(2);
        let four = U256::from_u64(4);
        assert!(should_reorganize(&four, &two));
        assert!(!should_reorganize(&two, &two));
        assert!(!should_reorganize(&two, &four));
    }

    #[test]
    fn test_plan() {
        let mut index = BlockIndex::new();
        let genesis = index.insert(header(NULL_HASH, 0)).unwrap();
        index.push_canonical(genesis).unwrap();

        let mut parent = index.node(genesis).hash;
        let mut main = Vec::new();
        for nonce in 1..=2 {
            let id = index.insert(header(parent, nonce)).unwrap();
            index.push_canonical(id).unwrap();
            parent = index.node(id).hash;
            main.push(id);
        }

        let mut parent = index.node(genesis).hash;
        let mut side = Vec::new();
        for nonce in 10..=12 {
            let id = index.insert(header(parent, nonce)).unwrap();
            parent = index.node(id).hash;
            side.push(id);
        }

        let plan = ReorgPlan::new(&index, side[2]).unwrap();
        assert_eq!(plan.fork, genesis);
        assert_eq!(plan.unwind, vec![main[1], main[0]]);
        assert_eq!(plan.apply, side);
        assert_eq!(plan.depth(), 2);
    }

    #[test]
    fn test_connect_and_disconnect_restore_outputs() {
        let storage = MemoryStorage::new();
        let genesis = Block {
            header: header(NULL_HASH, 0),
            transactions: vec![coinbase(0)],
        };
        connect_block(&storage, &genesis, 0).unwrap();
        let funding = OutPoint::new(genesis.transactions[0].hash(), 0);

        let spend = Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: funding,
                script_sig: vec![],
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TransactionOutput {
                value: 40,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        };
        let block = Block {
            header: header(genesis.hash(), 1),
            transactions: vec![coinbase(1), spend.clone()],
        };

        connect_block(&storage, &block, 1).unwrap();
        assert!(storage.get_output(&funding).unwrap().unwrap().spent);
        assert!(storage.get_output(&OutPoint::new(spend.hash(), 0)).unwrap().is_some());

        disconnect_block(&storage, &block, 1).unwrap();
        assert!(!storage.get_output(&funding).unwrap().unwrap().spent);
        assert!(storage.get_output(&OutPoint::new(spend.hash(), 0)).unwrap().is_none());
        assert_eq!(storage.top_height().unwrap(), Some(0));
    }

    #[test]
    fn test_disconnect_wrong_block_fails() {
        let storage = MemoryStorage::new();
        let genesis = Block {
            header: header(NULL_HASH, 0),
            transactions: vec![coinbase(0)],
        };
        connect_block(&storage, &genesis, 0).unwrap();
        let other = Block {
            header: header(NULL_HASH, 7),
            transactions: vec![coinbase(7)],
        };
        assert!(matches!(disconnect_block(&storage, &other, 0), Err(ChainError::Storage(_))));
        assert_eq!(storage.top_height().unwrap(), Some(0));
    }
}
