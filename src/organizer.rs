//! Block organizer
//!
//! Decides where an incoming block belongs: rejected, parked as an orphan,
//! stored on a side branch, appended to the active chain, or the trigger of
//! a reorganization onto a branch with more work. Chain state is guarded by
//! one `RwLock`: acceptance validates under an upgradable read and upgrades
//! only to commit, so transaction admission keeps reading meanwhile.

use crate::config::Settings;
use crate::context::{is_strict, ChainContext, Clock, Rules};
use crate::error::{ChainError, Rejection, Result};
use crate::index::{BlockIndex, NodeId};
use crate::mempool::{TransactionPool, TxOutcome};
use crate::orphan::{OrphanPool, StoreOutcome};
use crate::pow::{next_work_required, retarget_window_start};
use crate::reorganization::{self, should_reorganize, ReorgEvent, ReorgPlan};
use crate::storage::Storage;
use crate::types::*;
use crate::validator::Validator;
use crate::view::{StorageView, UtxoOverlay, UtxoView};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrganizerState {
    Idle = 0,
    Validating = 1,
    Reorganizing = 2,
}

impl OrganizerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => OrganizerState::Validating,
            2 => OrganizerState::Reorganizing,
            _ => OrganizerState::Idle,
        }
    }
}

/// Returns the organizer to `Idle` however acceptance ends.
struct StateGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.state.store(OrganizerState::Idle as u8, Ordering::SeqCst);
    }
}

/// Where an accepted block ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Appended to the active chain
    Extended,
    /// Its branch overtook the active chain
    Reorganized {
        fork_height: Natural,
        /// Former active blocks, ascending
        unwound: Vec<Hash>,
        /// New active blocks above the fork, ascending
        applied: Vec<Hash>,
    },
    /// Valid, but its branch has no more work than the active chain
    SideBranch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedBlock {
    pub hash: Hash,
    pub height: Natural,
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Accepted {
        block: AcceptedBlock,
        /// Parked orphans that connected as a result, in acceptance order
        promoted: Vec<AcceptedBlock>,
    },
    /// Parent unknown; parked until it arrives
    Orphaned { hash: Hash, evicted: Option<Hash> },
    Rejected(Rejection),
}

impl BlockOutcome {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            BlockOutcome::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

pub struct Organizer {
    settings: Settings,
    validator: Arc<Validator>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    chain: RwLock<BlockIndex>,
    orphans: OrphanPool,
    state: AtomicU8,
    events: Mutex<Vec<ReorgEvent>>,
}

impl Organizer {
    /// Open the chain held by `storage`, seeding it with `genesis` when empty.
    pub fn new(
        settings: Settings,
        genesis: Block,
        storage: Arc<dyn Storage>,
        validator: Arc<Validator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut index = BlockIndex::new();

        match storage.top_height()? {
            None => {
                storage.store_block(&genesis)?;
                reorganization::connect_block(storage.as_ref(), &genesis, 0)?;
                let id = index.insert(genesis.header.clone())?;
                index.push_canonical(id)?;
                info!(hash = %encode_hash(&genesis.hash()), "Initialized chain from genesis");
            }
            Some(top) => {
                for height in 0..=top {
                    let header = storage.get_header_at(height)?.ok_or_else(|| {
                        ChainError::Storage(format!("missing canonical header at height {height}"))
                    })?;
                    if height == 0 && header.hash() != genesis.hash() {
                        return Err(ChainError::Config(
                            "storage holds a different genesis block".to_string(),
                        ));
                    }
                    let id = index.insert(header)?;
                    index.push_canonical(id)?;
                }
                info!(height = top, "Rebuilt block index from storage");
            }
        }

        Ok(Self {
            orphans: OrphanPool::new(settings.block_pool_capacity),
            settings,
            validator,
            storage,
            clock,
            chain: RwLock::new(index),
            state: AtomicU8::new(OrganizerState::Idle as u8),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> OrganizerState {
        OrganizerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn height(&self) -> Natural {
        self.chain.read().height().unwrap_or(0)
    }

    pub fn tip_hash(&self) -> Hash {
        self.chain.read().tip_node().map(|node| node.hash).unwrap_or(NULL_HASH)
    }

    /// Whether `hash` is on the active chain.
    pub fn is_canonical(&self, hash: &Hash) -> bool {
        let chain = self.chain.read();
        chain.lookup(hash).is_some_and(|id| chain.is_canonical(id))
    }

    /// Indexed (any branch) or parked as an orphan.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.chain.read().contains(hash) || self.orphans.contains(hash)
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        self.storage.get_block(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn drain_events(&self) -> Vec<ReorgEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Organize one block and any orphans it unblocks.
    pub fn accept(&self, block: Block, pool: &TransactionPool) -> Result<BlockOutcome> {
        let hash = block.hash();
        let mut chain = self.chain.upgradable_read();

        if chain.contains(&hash) || self.orphans.contains(&hash) {
            debug!(hash = %encode_hash(&hash), "Ignoring known block");
            return Ok(BlockOutcome::Rejected(Rejection::Duplicate(
                "block already known".to_string(),
            )));
        }

        let _state = self.enter(OrganizerState::Validating);
        let now = self.clock.now();

        if let ValidationResult::Invalid(rejection) = self.validator.check_block(&block, now) {
            warn!(hash = %encode_hash(&hash), %rejection, "Rejected block");
            return Ok(BlockOutcome::Rejected(rejection));
        }

        if !chain.contains(&block.header.prev_block_hash) {
            return Ok(self.park(block));
        }

        let mut accepted = Vec::new();
        let mut queue = VecDeque::from([block]);
        let mut budget = self.orphans.capacity() + 1;

        while let Some(block) = queue.pop_front() {
            if budget == 0 {
                let hash = block.hash();
                match self.orphans.store(block) {
                    StoreOutcome::StoredWithEviction(evicted) => warn!(
                        hash = %encode_hash(&hash),
                        evicted = %encode_hash(&evicted),
                        "Reparked orphan block evicted another"
                    ),
                    StoreOutcome::Stored | StoreOutcome::Duplicate => {
                        debug!(hash = %encode_hash(&hash), "Reparked orphan block")
                    }
                }
                continue;
            }
            budget -= 1;

            let hash = block.hash();
            if let ValidationResult::Invalid(rejection) = self.verify(&chain, &block, now)? {
                if accepted.is_empty() {
                    warn!(hash = %encode_hash(&hash), %rejection, "Rejected block");
                    return Ok(BlockOutcome::Rejected(rejection));
                }
                let clipped = self.orphans.remove_descendants(&hash);
                warn!(
                    hash = %encode_hash(&hash),
                    %rejection,
                    clipped = clipped.len(),
                    "Rejected orphan block"
                );
                continue;
            }

            let mut writer = RwLockUpgradableReadGuard::upgrade(chain);
            let committed = self.commit(&mut writer, block, pool);
            chain = RwLockWriteGuard::downgrade_to_upgradable(writer);
            accepted.push(committed?);

            queue.extend(self.orphans.take_children(&hash));
        }

        let mut accepted = accepted.into_iter();
        let block = accepted
            .next()
            .ok_or_else(|| ChainError::Invariant("accepted block went missing".to_string()))?;
        Ok(BlockOutcome::Accepted {
            block,
            promoted: accepted.collect(),
        })
    }

    /// Admit a loose transaction against the active chain.
    pub fn submit_transaction(&self, tx: Transaction, pool: &TransactionPool) -> Result<TxOutcome> {
        let chain = self.chain.read();
        let view = StorageView::new(self.storage.as_ref());
        let ctx = self.pool_context(&chain, &view, self.clock.now())?;
        pool.accept(tx, &ctx)
    }

    fn enter(&self, state: OrganizerState) -> StateGuard<'_> {
        self.transition(state);
        StateGuard { state: &self.state }
    }

    fn transition(&self, state: OrganizerState) {
        let previous = OrganizerState::from_u8(self.state.swap(state as u8, Ordering::SeqCst));
        if previous != state {
            debug!(?previous, ?state, "Organizer state");
        }
    }

    fn park(&self, block: Block) -> BlockOutcome {
        let hash = block.hash();
        let parent = block.header.prev_block_hash;
        match self.orphans.store(block) {
            StoreOutcome::Duplicate => {
                BlockOutcome::Rejected(Rejection::Duplicate("block already parked".to_string()))
            }
            StoreOutcome::Stored => {
                debug!(hash = %encode_hash(&hash), parent = %encode_hash(&parent), "Parked orphan block");
                BlockOutcome::Orphaned { hash, evicted: None }
            }
            StoreOutcome::StoredWithEviction(evicted) => {
                debug!(hash = %encode_hash(&hash), parent = %encode_hash(&parent), "Parked orphan block");
                BlockOutcome::Orphaned {
                    hash,
                    evicted: Some(evicted),
                }
            }
        }
    }

    fn load_block(&self, hash: &Hash) -> Result<Block> {
        self.storage
            .get_block(hash)?
            .ok_or_else(|| ChainError::Storage(format!("missing block {}", encode_hash(hash))))
    }

    /// Bits required of a child of `parent`.
    fn work_required(&self, index: &BlockIndex, parent: NodeId) -> Result<u32> {
        let params = &self.settings.consensus;
        let parent_node = index.node(parent);
        let height = parent_node.height + 1;

        let window_start = match retarget_window_start(params, height) {
            Some(start) => {
                let id = index.ancestor(parent, start).ok_or_else(|| {
                    ChainError::Invariant(format!("no ancestor at height {start}"))
                })?;
                Some(&index.node(id).header)
            }
            None => None,
        };

        next_work_required(params, height, &parent_node.header, window_start)
            .ok_or_else(|| ChainError::Invariant(format!("cannot derive work required at height {height}")))
    }

    fn context<'a>(
        &'a self,
        index: &BlockIndex,
        parent: NodeId,
        utxo: &'a dyn UtxoView,
        now: u32,
    ) -> Result<ChainContext<'a>> {
        let node = index.node(parent);
        let height = node.height + 1;
        Ok(ChainContext {
            height,
            parent_hash: node.hash,
            median_time_past: index.median_time_past(parent),
            work_required: self.work_required(index, parent)?,
            now,
            rules: Rules::at_height(&self.settings.consensus, height),
            verify_scripts: is_strict(&self.settings.checkpoints, height),
            checkpoints: &self.settings.checkpoints,
            utxo,
        })
    }

    /// Context for transactions bound for the block after the tip.
    fn pool_context<'a>(
        &'a self,
        index: &BlockIndex,
        utxo: &'a dyn UtxoView,
        now: u32,
    ) -> Result<ChainContext<'a>> {
        let tip = index
            .tip()
            .ok_or_else(|| ChainError::Invariant("active chain is empty".to_string()))?;
        let ctx = self.context(index, tip, utxo, now)?;
        Ok(ChainContext {
            verify_scripts: true,
            ..ctx
        })
    }

    /// Contextual validation of `block` against the branch it extends.
    fn verify(&self, index: &BlockIndex, block: &Block, now: u32) -> Result<ValidationResult<Amount>> {
        let parent = index.lookup(&block.header.prev_block_hash).ok_or_else(|| {
            ChainError::Invariant(format!(
                "parent {} is not indexed",
                encode_hash(&block.header.prev_block_hash)
            ))
        })?;

        let base = StorageView::new(self.storage.as_ref());
        let mut view = UtxoOverlay::new(&base);

        let fork_height = index.node(index.fork_point(parent)).height;
        let tip_height = index
            .height()
            .ok_or_else(|| ChainError::Invariant("active chain is empty".to_string()))?;
        for height in (fork_height + 1..=tip_height).rev() {
            let id = index.canonical_at(height).ok_or_else(|| {
                ChainError::Invariant(format!("no canonical block at height {height}"))
            })?;
            view.undo_block(&self.load_block(&index.node(id).hash)?)?;
        }
        for id in index.branch(parent) {
            let node = index.node(id);
            view.apply_block(&self.load_block(&node.hash)?, node.height)?;
        }

        let ctx = self.context(index, parent, &view, now)?;
        let verdict = self.validator.accept_block(block, &ctx)?;
        if verdict.is_valid() {
            info!(
                height = ctx.height,
                hash = %encode_hash(&block.hash()),
                side_branch = !view.is_empty(),
                "Verified block"
            );
        }
        Ok(verdict)
    }

    fn commit(&self, index: &mut BlockIndex, block: Block, pool: &TransactionPool) -> Result<AcceptedBlock> {
        self.storage.store_block(&block)?;
        let id = index.insert(block.header.clone())?;
        let tip = index
            .tip()
            .ok_or_else(|| ChainError::Invariant("active chain is empty".to_string()))?;
        let (hash, height, parent, work) = {
            let node = index.node(id);
            (node.hash, node.height, node.parent, node.chain_work)
        };

        if parent == Some(tip) {
            reorganization::connect_block(self.storage.as_ref(), &block, height)?;
            index.push_canonical(id)?;
            pool.block_connected(&block);
            info!(height, hash = %encode_hash(&hash), "Extended active chain");

            self.events.lock().push(ReorgEvent {
                fork_height: height - 1,
                fork_hash: block.header.prev_block_hash,
                arrived: vec![block],
                replaced: Vec::new(),
            });
            return Ok(AcceptedBlock {
                hash,
                height,
                placement: Placement::Extended,
            });
        }

        if !should_reorganize(&work, &index.node(tip).chain_work) {
            debug!(height, hash = %encode_hash(&hash), "Stored side branch block");
            return Ok(AcceptedBlock {
                hash,
                height,
                placement: Placement::SideBranch,
            });
        }

        self.transition(OrganizerState::Reorganizing);
        let placement = self.reorganize(index, id, pool);
        self.transition(OrganizerState::Validating);

        Ok(AcceptedBlock {
            hash,
            height,
            placement: placement?,
        })
    }

    /// Move the active chain onto the branch ending at `target`.
    fn reorganize(&self, index: &mut BlockIndex, target: NodeId, pool: &TransactionPool) -> Result<Placement> {
        let plan = ReorgPlan::new(index, target)?;
        let fork = index.node(plan.fork);
        let (fork_height, fork_hash) = (fork.height, fork.hash);

        let mut replaced = Vec::with_capacity(plan.unwind.len());
        for &id in &plan.unwind {
            let (hash, height) = (index.node(id).hash, index.node(id).height);
            let block = self.load_block(&hash)?;
            reorganization::disconnect_block(self.storage.as_ref(), &block, height)?;
            index.pop_canonical();
            replaced.push(block);
        }
        replaced.reverse();

        let mut arrived = Vec::with_capacity(plan.apply.len());
        for &id in &plan.apply {
            let (hash, height) = (index.node(id).hash, index.node(id).height);
            let block = self.load_block(&hash)?;
            reorganization::connect_block(self.storage.as_ref(), &block, height)?;
            index.push_canonical(id)?;
            arrived.push(block);
        }

        let view = StorageView::new(self.storage.as_ref());
        let ctx = self.pool_context(index, &view, self.clock.now())?;
        let outcomes = pool.reorganize(&replaced, &arrived, &ctx)?;
        let requeued = outcomes.iter().filter(|(_, outcome)| outcome.is_accepted()).count();

        warn!(
            fork_height,
            depth = plan.depth(),
            applied = arrived.len(),
            requeued,
            rejected = outcomes.len() - requeued,
            "Reorganized active chain"
        );

        let placement = Placement::Reorganized {
            fork_height,
            unwound: replaced.iter().map(Block::hash).collect(),
            applied: arrived.iter().map(Block::hash).collect(),
        };
        self.events.lock().push(ReorgEvent {
            fork_height,
            fork_hash,
            arrived,
            replaced,
        });
        Ok(placement)
    }
}
