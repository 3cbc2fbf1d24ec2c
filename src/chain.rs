//! The blockchain facade: organizer, transaction pool and notifications

use crate::config::Settings;
use crate::context::{Clock, SystemClock};
use crate::error::Result;
use crate::mempool::{AcceptedTransaction, PoolEntry, PoolEvent, RemovedTransaction, TransactionPool, TxOutcome};
use crate::organizer::{BlockOutcome, Organizer, OrganizerState};
use crate::pow::{CompactTargetValidator, ProofValidator};
use crate::reorganization::ReorgEvent;
use crate::script::ScriptVerifier;
use crate::storage::Storage;
use crate::subscriber::Subscriber;
use crate::types::*;
use crate::validator::Validator;
use std::sync::Arc;

/// External collaborators the chain is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn Storage>,
    pub scripts: Arc<dyn ScriptVerifier>,
    pub proof: Arc<dyn ProofValidator>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Hash-below-target proof of work and the system clock.
    pub fn new(storage: Arc<dyn Storage>, scripts: Arc<dyn ScriptVerifier>) -> Self {
        Self {
            storage,
            scripts,
            proof: Arc::new(CompactTargetValidator),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Entry point for blocks and transactions.
///
/// Notifications are relayed after every lock has been released, so a
/// handler may call back into the chain.
pub struct Blockchain {
    organizer: Organizer,
    pool: TransactionPool,
    reorg_subscriber: Subscriber<ReorgEvent>,
    accepted_subscriber: Subscriber<AcceptedTransaction>,
    removed_subscriber: Subscriber<RemovedTransaction>,
}

impl Blockchain {
    pub fn new(settings: Settings, genesis: Block, collaborators: Collaborators) -> Result<Self> {
        settings.validate()?;

        let validator = Arc::new(Validator::new(
            &settings,
            collaborators.scripts,
            collaborators.proof,
        ));
        let pool = TransactionPool::new(settings.transaction_pool.clone(), validator.clone());
        let organizer = Organizer::new(
            settings,
            genesis,
            collaborators.storage,
            validator,
            collaborators.clock,
        )?;

        Ok(Self {
            organizer,
            pool,
            reorg_subscriber: Subscriber::new(),
            accepted_subscriber: Subscriber::new(),
            removed_subscriber: Subscriber::new(),
        })
    }

    pub fn submit_block(&self, block: Block) -> Result<BlockOutcome> {
        let outcome = self.organizer.accept(block, &self.pool);
        self.dispatch();
        outcome
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<TxOutcome> {
        let outcome = self.organizer.submit_transaction(tx, &self.pool);
        self.dispatch();
        outcome
    }

    /// Called on every change of the active chain.
    pub fn subscribe_reorg<F>(&self, handler: F)
    where
        F: Fn(&ReorgEvent) -> bool + Send + Sync + 'static,
    {
        self.reorg_subscriber.subscribe(handler);
    }

    pub fn subscribe_transaction_accepted<F>(&self, handler: F)
    where
        F: Fn(&AcceptedTransaction) -> bool + Send + Sync + 'static,
    {
        self.accepted_subscriber.subscribe(handler);
    }

    pub fn subscribe_transaction_removed<F>(&self, handler: F)
    where
        F: Fn(&RemovedTransaction) -> bool + Send + Sync + 'static,
    {
        self.removed_subscriber.subscribe(handler);
    }

    pub fn get_pool_snapshot(&self) -> Vec<PoolEntry> {
        self.pool.snapshot()
    }

    pub fn get_chain_height(&self) -> Natural {
        self.organizer.height()
    }

    pub fn tip_hash(&self) -> Hash {
        self.organizer.tip_hash()
    }

    pub fn is_canonical(&self, hash: &Hash) -> bool {
        self.organizer.is_canonical(hash)
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        self.organizer.get_block(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.organizer.orphan_count()
    }

    pub fn organizer_state(&self) -> OrganizerState {
        self.organizer.state()
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    fn dispatch(&self) {
        for event in self.organizer.drain_events() {
            self.reorg_subscriber.relay(&event);
        }

        for event in self.pool.drain_events() {
            match event {
                PoolEvent::Accepted(accepted) => self.accepted_subscriber.relay(&accepted),
                PoolEvent::Removed(removed) => self.removed_subscriber.relay(&removed),
            }
        }
    }
}
