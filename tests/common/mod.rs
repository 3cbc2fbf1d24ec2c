//! Shared fixtures: a regtest chain whose blocks are mined on the spot

#![allow(dead_code)]

use consensus_chain::chain::{Blockchain, Collaborators};
use consensus_chain::config::Settings;
use consensus_chain::context::FixedClock;
use consensus_chain::organizer::{BlockOutcome, Placement};
use consensus_chain::pow::{CompactTargetValidator, ProofValidator};
use consensus_chain::script::{height_push, ScriptVerifier};
use consensus_chain::storage::MemoryStorage;
use consensus_chain::types::*;
use std::sync::Arc;

pub const GENESIS_TIME: u32 = 1_296_688_602;
pub const REGTEST_BITS: u32 = 0x207fffff;
pub const REWARD: Amount = 50 * 100_000_000;

pub struct TestChain {
    pub chain: Blockchain,
    pub genesis: Block,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<FixedClock>,
}

/// Regtest with coinbase outputs spendable after one confirmation.
pub fn quick_settings() -> Settings {
    let mut settings = Settings::regtest();
    settings.consensus.coinbase_maturity = 1;
    settings
}

pub fn accept_all() -> Arc<dyn ScriptVerifier> {
    Arc::new(|_: &Transaction, _: usize, _: &TransactionOutput, _: u32| true)
}

pub fn test_chain(settings: Settings) -> TestChain {
    test_chain_with_scripts(settings, accept_all())
}

pub fn test_chain_with_scripts(settings: Settings, scripts: Arc<dyn ScriptVerifier>) -> TestChain {
    let genesis = genesis();
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(FixedClock::new(GENESIS_TIME + 10_000_000));
    let collaborators = Collaborators {
        storage: storage.clone(),
        scripts,
        proof: Arc::new(CompactTargetValidator),
        clock: clock.clone(),
    };
    let chain = Blockchain::new(settings, genesis.clone(), collaborators).unwrap();
    TestChain {
        chain,
        genesis,
        storage,
        clock,
    }
}

/// Bump the nonce until the header meets its own target.
pub fn mine(mut header: BlockHeader) -> BlockHeader {
    while !CompactTargetValidator.check_seal(&header, REGTEST_BITS) {
        header.nonce += 1;
    }
    header
}

pub fn coinbase(height: Natural, tag: u8) -> Transaction {
    let mut script_sig = height_push(height);
    script_sig.push(tag);
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint::null(),
            script_sig,
            sequence: 0xffffffff,
        }],
        outputs: vec![TransactionOutput {
            value: REWARD,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

pub fn genesis() -> Block {
    let transactions = vec![coinbase(0, 0)];
    Block {
        header: mine(BlockHeader {
            version: 1,
            prev_block_hash: NULL_HASH,
            merkle_root: Block::generate_merkle_root(&transactions),
            timestamp: GENESIS_TIME,
            bits: REGTEST_BITS,
            nonce: 0,
        }),
        transactions,
    }
}

/// Child of `parent` at `height`. `tag` keeps sibling branches distinct.
pub fn block_on(parent: &Block, height: Natural, tag: u8, txs: Vec<Transaction>) -> Block {
    let mut transactions = vec![coinbase(height, tag)];
    transactions.extend(txs);
    Block {
        header: mine(BlockHeader {
            version: 1,
            prev_block_hash: parent.hash(),
            merkle_root: Block::generate_merkle_root(&transactions),
            timestamp: GENESIS_TIME + height as u32 * 600 + tag as u32,
            bits: REGTEST_BITS,
            nonce: 0,
        }),
        transactions,
    }
}

/// `count` empty blocks on top of `parent` (at `parent_height`).
pub fn branch(parent: &Block, parent_height: Natural, count: usize, tag: u8) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(count);
    for offset in 1..=count as Natural {
        let previous = blocks.last().unwrap_or(parent);
        let block = block_on(previous, parent_height + offset, tag, vec![]);
        blocks.push(block);
    }
    blocks
}

pub fn spend(point: OutPoint, value: Amount) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: point,
            script_sig: vec![0x51],
            sequence: 0xffffffff,
        }],
        outputs: vec![TransactionOutput {
            value,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

/// First output of a block's coinbase.
pub fn reward_of(block: &Block) -> OutPoint {
    OutPoint::new(block.transactions[0].hash(), 0)
}

pub fn placement(outcome: &BlockOutcome) -> Placement {
    match outcome {
        BlockOutcome::Accepted { block, .. } => block.placement.clone(),
        other => panic!("expected an accepted block, got {other:?}"),
    }
}

pub fn submit_all(chain: &Blockchain, blocks: &[Block]) {
    for block in blocks {
        let outcome = chain.submit_block(block.clone()).unwrap();
        assert!(
            matches!(outcome, BlockOutcome::Accepted { .. }),
            "block rejected: {outcome:?}"
        );
    }
}
