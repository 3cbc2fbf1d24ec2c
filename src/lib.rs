//! # Consensus-Chain
//!
//! Blockchain integrity engine: block and transaction validation, fork
//! choice with reorganization, an orphan block pool and a transaction pool.
//!
//! ## Architecture
//!
//! The system is layered, leaf first:
//! - Validation (`block`, `transaction`, `pow`, `script`, `economic`): pure rule checks
//! - `validator`: those rules bound to one network's parameters
//! - `orphan` and `mempool`: bounded pools of blocks and transactions
//! - `organizer`: fork choice, reorganization and orphan resolution
//! - `chain`: the facade and its notifications
//!
//! ## Design Principles
//!
//! 1. **Pure Validation**: rules are deterministic; chain state and the clock are arguments
//! 2. **Typed Rejections**: invalid data is a value ([`Rejection`]), never an error
//! 3. **All or Nothing**: a block is fully validated before any state changes
//! 4. **Injected Collaborators**: storage, script execution, proof of work and time
//!
//! ## Usage
//!
//! ```rust
//! use consensus_chain::chain::{Blockchain, Collaborators};
//! use consensus_chain::config::Settings;
//! use consensus_chain::storage::MemoryStorage;
//! use consensus_chain::types::*;
//! use std::sync::Arc;
//!
//! let coinbase = Transaction {
//!     version: 1,
//!     inputs: vec![TransactionInput {
//!         prevout: OutPoint::null(),
//!         script_sig: vec![0x00, 0x00],
//!         sequence: 0xffffffff,
//!     }],
//!     outputs: vec![TransactionOutput {
//!         value: 50 * 100_000_000,
//!         script_pubkey: vec![0x51],
//!     }],
//!     lock_time: 0,
//! };
//! let genesis = Block {
//!     header: BlockHeader {
//!         version: 1,
//!         prev_block_hash: NULL_HASH,
//!         merkle_root: Block::generate_merkle_root(std::slice::from_ref(&coinbase)),
//!         timestamp: 1_296_688_602,
//!         bits: 0x207fffff,
//!         nonce: 2,
//!     },
//!     transactions: vec![coinbase],
//! };
//!
//! let collaborators = Collaborators::new(
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(|_: &Transaction, _: usize, _: &TransactionOutput, _: u32| true),
//! );
//! let chain = Blockchain::new(Settings::regtest(), genesis.clone(), collaborators).unwrap();
//! assert_eq!(chain.get_chain_height(), 0);
//! assert_eq!(chain.tip_hash(), genesis.hash());
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod config;
pub mod pow;
pub mod script;
pub mod economic;
pub mod context;
pub mod view;
pub mod storage;
pub mod transaction;
pub mod block;
pub mod validator;
pub mod index;
pub mod orphan;
pub mod mempool;
pub mod reorganization;
pub mod subscriber;
pub mod organizer;
pub mod chain;

// Re-export commonly used types
pub use types::*;
pub use chain::{Blockchain, Collaborators};
pub use config::{Network, Settings};
pub use error::{ChainError, Rejection, Result};
pub use mempool::{PoolEvent, RemovalReason, TransactionPool, TxOutcome};
pub use organizer::{BlockOutcome, OrganizerState, Placement};
pub use reorganization::ReorgEvent;
pub use validator::Validator;
