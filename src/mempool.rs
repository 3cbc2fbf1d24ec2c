//! Transaction pool (mempool)
//!
//! Holds validated, unconfirmed transactions. Admission checks a candidate
//! against a pool-adjusted view of the chain: outputs of pool transactions
//! are visible and outputs already claimed by pool transactions count as
//! spent. Removals and admissions are buffered as [`PoolEvent`]s and handed
//! out by [`TransactionPool::drain_events`] once every lock is released.

use crate::config::PoolSettings;
use crate::constants::*;
use crate::context::ChainContext;
use crate::economic::fee_rate;
use crate::error::{Rejection, Result};
use crate::types::*;
use crate::validator::Validator;
use crate::view::UtxoView;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub transaction: Transaction,
    pub hash: Hash,
    pub fee: Amount,
    pub size: usize,
    /// Arrival order
    pub sequence: u64,
    /// Pool transactions this one spends from
    pub parents: HashSet<Hash>,
}

impl PoolEntry {
    pub fn fee_rate(&self) -> u64 {
        fee_rate(self.fee, self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    Confirmed,
    Conflict,
    Evicted,
    Replaced,
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedTransaction {
    pub hash: Hash,
    pub transaction: Transaction,
    pub fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedTransaction {
    pub hash: Hash,
    pub reason: RemovalReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Accepted(AcceptedTransaction),
    Removed(RemovedTransaction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Accepted {
        hash: Hash,
        fee: Amount,
        replaced: Vec<Hash>,
        evicted: Vec<Hash>,
    },
    Rejected(Rejection),
}

impl TxOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TxOutcome::Accepted { .. })
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            TxOutcome::Rejected(rejection) => Some(rejection),
            TxOutcome::Accepted { .. } => None,
        }
    }
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<Hash, PoolEntry>,
    /// Which pool transaction claims each outpoint
    spends: HashMap<OutPoint, Hash>,
    total_bytes: usize,
    next_sequence: u64,
    events: Vec<PoolEvent>,
}

impl PoolState {
    fn children(&self, hash: &Hash) -> Vec<Hash> {
        let Some(entry) = self.entries.get(hash) else {
            return Vec::new();
        };

        (0..entry.transaction.outputs.len())
            .filter_map(|index| self.spends.get(&OutPoint::new(*hash, index as u32)).copied())
            .collect()
    }

    /// `roots` plus every pool transaction that spends from them, parents first.
    fn with_descendants(&self, roots: impl IntoIterator<Item = Hash>) -> Vec<Hash> {
        let mut visited = HashSet::new();
        let mut ordered = Vec::new();
        let mut queue: VecDeque<Hash> = roots.into_iter().collect();

        while let Some(hash) = queue.pop_front() {
            if !self.entries.contains_key(&hash) || !visited.insert(hash) {
                continue;
            }
            ordered.push(hash);
            queue.extend(self.children(&hash));
        }

        ordered
    }

    /// Pool transactions `tx` depends on, directly or transitively.
    fn ancestors(&self, tx: &Transaction) -> HashSet<Hash> {
        let mut ancestors = HashSet::new();
        let mut pending: Vec<Hash> = tx.inputs.iter().map(|input| input.prevout.hash).collect();

        while let Some(hash) = pending.pop() {
            if let Some(entry) = self.entries.get(&hash) {
                if ancestors.insert(hash) {
                    pending.extend(entry.parents.iter().copied());
                }
            }
        }

        ancestors
    }

    fn insert(&mut self, transaction: Transaction, hash: Hash, fee: Amount, size: usize) {
        let parents = transaction
            .inputs
            .iter()
            .map(|input| input.prevout.hash)
            .filter(|parent| self.entries.contains_key(parent))
            .collect();

        for input in &transaction.inputs {
            self.spends.insert(input.prevout, hash);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.total_bytes += size;
        self.entries.insert(
            hash,
            PoolEntry {
                transaction,
                hash,
                fee,
                size,
                sequence,
                parents,
            },
        );
    }

    fn remove(&mut self, hash: &Hash, reason: RemovalReason) -> Option<PoolEntry> {
        let entry = self.entries.remove(hash)?;

        for input in &entry.transaction.inputs {
            if self.spends.get(&input.prevout) == Some(hash) {
                self.spends.remove(&input.prevout);
            }
        }

        for index in 0..entry.transaction.outputs.len() {
            let point = OutPoint::new(*hash, index as u32);
            if let Some(child) = self.spends.get(&point).copied() {
                if let Some(child) = self.entries.get_mut(&child) {
                    child.parents.remove(hash);
                }
            }
        }

        self.total_bytes -= entry.size;
        self.events.push(PoolEvent::Removed(RemovedTransaction {
            hash: *hash,
            reason,
        }));
        debug!(hash = %encode_hash(hash), ?reason, "Removed pool transaction");
        Some(entry)
    }

    fn remove_with_descendants(&mut self, roots: impl IntoIterator<Item = Hash>, reason: RemovalReason) -> Vec<Hash> {
        let doomed = self.with_descendants(roots);
        for hash in &doomed {
            self.remove(hash, reason);
        }
        doomed
    }
}

/// The chain as a pool candidate sees it.
struct PoolView<'a> {
    chain: &'a dyn UtxoView,
    state: &'a PoolState,
    /// Pool transactions treated as absent (pending replacement)
    ignore: &'a HashSet<Hash>,
    height: Natural,
}

impl<'a> UtxoView for PoolView<'a> {
    fn get_output(&self, point: &OutPoint) -> Result<Option<OutputState>> {
        let claimed = self
            .state
            .spends
            .get(point)
            .is_some_and(|spender| !self.ignore.contains(spender));

        if let Some(entry) = self.state.entries.get(&point.hash) {
            if !self.ignore.contains(&point.hash) {
                return Ok(entry.transaction.outputs.get(point.index as usize).map(|output| {
                    OutputState {
                        output: output.clone(),
                        height: self.height,
                        coinbase: false,
                        spent: claimed,
                    }
                }));
            }
        }

        Ok(self.chain.get_output(point)?.map(|mut state| {
            state.spent |= claimed;
            state
        }))
    }
}

/// IsStandardTx: relay policy beyond consensus.
pub fn is_standard_tx(tx: &Transaction) -> bool {
    if tx.serialized_size() > MAX_STANDARD_TX_SIZE {
        return false;
    }

    if tx
        .inputs
        .iter()
        .any(|input| input.script_sig.len() > MAX_STANDARD_SCRIPT_SIZE)
    {
        return false;
    }

    tx.outputs.iter().all(|output| {
        !output.script_pubkey.is_empty() && output.script_pubkey.len() <= MAX_STANDARD_SCRIPT_SIZE
    })
}

/// BIP125 opt-in: some input sequence below `0xfffffffe`.
pub fn signals_rbf(tx: &Transaction) -> bool {
    tx.inputs.iter().any(|input| input.sequence < SEQUENCE_FINAL - 1)
}

pub struct TransactionPool {
    settings: PoolSettings,
    validator: Arc<Validator>,
    state: RwLock<PoolState>,
}

impl TransactionPool {
    pub fn new(settings: PoolSettings, validator: Arc<Validator>) -> Self {
        Self {
            settings,
            validator,
            state: RwLock::new(PoolState::default()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Admit `tx` for inclusion in the block at `ctx.height`.
    pub fn accept(&self, tx: Transaction, ctx: &ChainContext) -> Result<TxOutcome> {
        let mut state = self.state.write();
        self.admit(&mut state, tx, ctx, true)
    }

    /// Admit each transaction in order.
    ///
    /// A candidate that fails and is not already resident is reported as
    /// removed, so callers learn that it left the pool's custody.
    pub fn requeue(&self, txs: Vec<Transaction>, ctx: &ChainContext) -> Result<Vec<(Hash, TxOutcome)>> {
        let mut state = self.state.write();
        self.requeue_into(&mut state, txs, &HashSet::new(), ctx)
    }

    /// Drop transactions that a block confirmed. Their children stay.
    pub fn remove_confirmed(&self, hashes: &[Hash]) -> Vec<Hash> {
        let mut state = self.state.write();
        hashes
            .iter()
            .filter(|hash| state.remove(hash, RemovalReason::Confirmed).is_some())
            .copied()
            .collect()
    }

    /// Drop pool transactions claiming any of `points`, with their descendants.
    pub fn remove_conflicts(&self, points: &[OutPoint]) -> Vec<Hash> {
        let mut state = self.state.write();
        let spenders: Vec<Hash> = points
            .iter()
            .filter_map(|point| state.spends.get(point).copied())
            .collect();
        state.remove_with_descendants(spenders, RemovalReason::Conflict)
    }

    /// A block joined the active chain.
    pub fn block_connected(&self, block: &Block) {
        let confirmed: Vec<Hash> = block.transactions.iter().map(Transaction::hash).collect();
        self.remove_confirmed(&confirmed);

        if self.settings.maintain_consistency {
            let spent: Vec<OutPoint> = block
                .transactions
                .iter()
                .filter(|tx| !tx.is_coinbase())
                .flat_map(|tx| tx.inputs.iter().map(|input| input.prevout))
                .collect();
            let conflicts = self.remove_conflicts(&spent);
            if !conflicts.is_empty() {
                debug!(count = conflicts.len(), "Removed pool transactions conflicting with block");
            }
        }
    }

    /// The active chain swapped `unwound` (ascending) for `applied`.
    ///
    /// Transactions of unwound blocks that the new branch did not confirm
    /// are readmitted first, then the previous pool contents in arrival
    /// order. Both are validated against `ctx`, the new tip.
    pub fn reorganize(
        &self,
        unwound: &[Block],
        applied: &[Block],
        ctx: &ChainContext,
    ) -> Result<Vec<(Hash, TxOutcome)>> {
        let mut state = self.state.write();

        let confirmed: HashSet<Hash> = applied
            .iter()
            .flat_map(|block| block.transactions.iter().map(Transaction::hash))
            .collect();
        let claimed: HashSet<OutPoint> = applied
            .iter()
            .flat_map(|block| block.transactions.iter().skip(1))
            .flat_map(|tx| tx.inputs.iter().map(|input| input.prevout))
            .collect();

        let mut previous: Vec<PoolEntry> = std::mem::take(&mut state.entries).into_values().collect();
        previous.sort_by_key(|entry| entry.sequence);
        state.spends.clear();
        state.total_bytes = 0;

        let candidates: Vec<Transaction> = unwound
            .iter()
            .flat_map(|block| block.transactions.iter().skip(1))
            .filter(|tx| !confirmed.contains(&tx.hash()))
            .cloned()
            .collect();
        let mut outcomes = self.requeue_into(&mut state, candidates, &claimed, ctx)?;

        for entry in previous {
            let hash = entry.hash;
            if confirmed.contains(&hash) {
                state.events.push(PoolEvent::Removed(RemovedTransaction {
                    hash,
                    reason: RemovalReason::Confirmed,
                }));
                continue;
            }

            let conflicts = claims_any(&entry.transaction, &claimed);
            let outcome = self.admit(&mut state, entry.transaction, ctx, false)?;
            if let TxOutcome::Rejected(rejection) = &outcome {
                debug!(hash = %encode_hash(&hash), %rejection, "Pool transaction invalidated by reorganization");
                let reason = removal_reason(rejection, conflicts);
                state.events.push(PoolEvent::Removed(RemovedTransaction { hash, reason }));
            }
            outcomes.push((hash, outcome));
        }

        Ok(outcomes)
    }

    /// Admit `txs` in order, reporting each one that fails as removed.
    /// `claimed` holds outpoints the active chain just spent.
    fn requeue_into(
        &self,
        state: &mut PoolState,
        txs: Vec<Transaction>,
        claimed: &HashSet<OutPoint>,
        ctx: &ChainContext,
    ) -> Result<Vec<(Hash, TxOutcome)>> {
        let mut outcomes = Vec::with_capacity(txs.len());
        for tx in txs {
            let hash = tx.hash();
            let conflicts = claims_any(&tx, claimed);
            let outcome = self.admit(state, tx, ctx, true)?;
            if let TxOutcome::Rejected(rejection) = &outcome {
                if !state.entries.contains_key(&hash) {
                    debug!(hash = %encode_hash(&hash), %rejection, "Requeued transaction rejected");
                    let reason = removal_reason(rejection, conflicts);
                    state.events.push(PoolEvent::Removed(RemovedTransaction { hash, reason }));
                }
            }
            outcomes.push((hash, outcome));
        }
        Ok(outcomes)
    }

    pub fn query(&self, hash: &Hash) -> Option<PoolEntry> {
        self.state.read().entries.get(hash).cloned()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.state.read().entries.contains_key(hash)
    }

    /// Pool transaction spending `point`, if any.
    pub fn spender(&self, point: &OutPoint) -> Option<Hash> {
        self.state.read().spends.get(point).copied()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.state.read().total_bytes
    }

    /// All entries in arrival order.
    pub fn snapshot(&self) -> Vec<PoolEntry> {
        let mut entries: Vec<PoolEntry> = self.state.read().entries.values().cloned().collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries
    }

    pub fn drain_events(&self) -> Vec<PoolEvent> {
        std::mem::take(&mut self.state.write().events)
    }

    fn admit(
        &self,
        state: &mut PoolState,
        tx: Transaction,
        ctx: &ChainContext,
        announce: bool,
    ) -> Result<TxOutcome> {
        let hash = tx.hash();
        if state.entries.contains_key(&hash) {
            return Ok(reject(Rejection::Duplicate("transaction already in pool".to_string())));
        }

        if tx.is_coinbase() {
            return Ok(reject(Rejection::Malformed("coinbase transaction outside a block".to_string())));
        }

        if let ValidationResult::Invalid(rejection) = self.validator.check_transaction(&tx) {
            return Ok(reject(rejection));
        }

        if !is_standard_tx(&tx) {
            return Ok(reject(Rejection::PolicyViolation("non-standard transaction".to_string())));
        }

        for index in 0..tx.outputs.len() {
            let existing = ctx.utxo.get_output(&OutPoint::new(hash, index as u32))?;
            if existing.is_some_and(|state| !state.spent) {
                return Ok(reject(Rejection::Duplicate("transaction already confirmed".to_string())));
            }
        }

        let conflicts: HashSet<Hash> = tx
            .inputs
            .iter()
            .filter_map(|input| state.spends.get(&input.prevout).copied())
            .collect();

        let replaced: HashSet<Hash> = if conflicts.is_empty() {
            HashSet::new()
        } else {
            if !self.settings.replace_by_fee {
                return Ok(reject(Rejection::DoubleSpend(
                    "input already spent by a pool transaction".to_string(),
                )));
            }
            if conflicts
                .iter()
                .any(|conflict| !signals_rbf(&state.entries[conflict].transaction))
            {
                return Ok(reject(Rejection::DoubleSpend(
                    "conflicting pool transaction is not replaceable".to_string(),
                )));
            }
            state.with_descendants(conflicts.iter().copied()).into_iter().collect()
        };

        let size = tx.serialized_size();
        let fee = {
            let view = PoolView {
                chain: ctx.utxo,
                state: &*state,
                ignore: &replaced,
                height: ctx.height,
            };
            let pool_ctx = ChainContext {
                utxo: &view,
                ..*ctx
            };
            match self.validator.validate_transaction(&tx, &pool_ctx)? {
                ValidationResult::Valid(fee) => fee,
                ValidationResult::Invalid(rejection) => return Ok(reject(rejection)),
            }
        };
        let rate = fee_rate(fee, size);

        if !replaced.is_empty() {
            if let Some(reason) = replacement_checks(&tx, fee, rate, &conflicts, &replaced, state) {
                return Ok(reject(Rejection::PolicyViolation(reason)));
            }
        }

        let resident = state.entries.len() - replaced.len();
        let near_capacity =
            resident * 100 >= self.settings.capacity * self.settings.near_capacity_percent as usize;
        if near_capacity && rate < self.settings.minimum_fee_rate {
            return Ok(reject(Rejection::PolicyViolation(format!(
                "fee rate {rate} below minimum {}",
                self.settings.minimum_fee_rate
            ))));
        }

        let evicted = match self.plan_eviction(state, &tx, size, rate, &replaced) {
            Some(evicted) => evicted,
            None => {
                return Ok(reject(Rejection::Capacity(format!(
                    "pool full and fee rate {rate} does not beat the cheapest entry"
                ))))
            }
        };

        let replaced: Vec<Hash> = state.remove_with_descendants(conflicts, RemovalReason::Replaced);
        for victim in &evicted {
            state.remove(victim, RemovalReason::Evicted);
        }

        state.insert(tx.clone(), hash, fee, size);
        if announce {
            state.events.push(PoolEvent::Accepted(AcceptedTransaction {
                hash,
                transaction: tx,
                fee,
            }));
        }
        debug!(
            hash = %encode_hash(&hash),
            fee,
            size,
            replaced = replaced.len(),
            evicted = evicted.len(),
            "Accepted pool transaction"
        );

        Ok(TxOutcome::Accepted {
            hash,
            fee,
            replaced,
            evicted,
        })
    }

    /// Entries to evict, lowest fee rate first with their descendants, so
    /// that the candidate fits. Never touches the candidate's ancestors.
    /// `None` when the candidate does not outbid what it would displace.
    fn plan_eviction(
        &self,
        state: &PoolState,
        tx: &Transaction,
        size: usize,
        rate: u64,
        replaced: &HashSet<Hash>,
    ) -> Option<Vec<Hash>> {
        let mut count = state.entries.len() - replaced.len();
        let mut bytes = state.total_bytes
            - replaced
                .iter()
                .filter_map(|hash| state.entries.get(hash))
                .map(|entry| entry.size)
                .sum::<usize>();

        let protected = state.ancestors(tx);
        let mut evicted = HashSet::new();
        let mut order = Vec::new();

        while count + 1 > self.settings.capacity || bytes + size > self.settings.max_bytes {
            let victim = state
                .entries
                .values()
                .filter(|entry| {
                    !replaced.contains(&entry.hash)
                        && !evicted.contains(&entry.hash)
                        && !protected.contains(&entry.hash)
                })
                .min_by_key(|entry| (entry.fee_rate(), Reverse(entry.sequence)))?;

            if victim.fee_rate() >= rate {
                return None;
            }

            for hash in state.with_descendants([victim.hash]) {
                if replaced.contains(&hash) || !evicted.insert(hash) {
                    continue;
                }
                count -= 1;
                bytes -= state.entries[&hash].size;
                order.push(hash);
            }
        }

        Some(order)
    }
}

/// ReplacementChecks: the replacement must pay more in total and per byte
/// than everything it displaces, and may not pull in new unconfirmed inputs.
fn replacement_checks(
    tx: &Transaction,
    fee: Amount,
    rate: u64,
    conflicts: &HashSet<Hash>,
    replaced: &HashSet<Hash>,
    state: &PoolState,
) -> Option<String> {
    let displaced: Vec<&PoolEntry> = replaced.iter().filter_map(|hash| state.entries.get(hash)).collect();

    let displaced_fees: Amount = displaced.iter().map(|entry| entry.fee).sum();
    if fee <= displaced_fees {
        return Some(format!("replacement fee {fee} does not exceed {displaced_fees}"));
    }

    let highest_rate = displaced.iter().map(|entry| entry.fee_rate()).max().unwrap_or(0);
    if rate <= highest_rate {
        return Some(format!("replacement fee rate {rate} does not exceed {highest_rate}"));
    }

    let known_parents: HashSet<Hash> = conflicts
        .iter()
        .filter_map(|hash| state.entries.get(hash))
        .flat_map(|entry| entry.parents.iter().copied())
        .collect();
    let new_dependency = tx.inputs.iter().any(|input| {
        state.entries.contains_key(&input.prevout.hash) && !known_parents.contains(&input.prevout.hash)
    });
    if new_dependency {
        return Some("replacement adds unconfirmed inputs".to_string());
    }

    None
}

fn claims_any(tx: &Transaction, points: &HashSet<OutPoint>) -> bool {
    tx.inputs.iter().any(|input| points.contains(&input.prevout))
}

/// Why a transaction that failed readmission left the pool.
fn removal_reason(rejection: &Rejection, conflicts: bool) -> RemovalReason {
    match rejection {
        _ if conflicts => RemovalReason::Conflict,
        Rejection::DoubleSpend(_) => RemovalReason::Conflict,
        Rejection::Duplicate(_) => RemovalReason::Confirmed,
        _ => RemovalReason::Invalidated,
    }
}

fn reject(rejection: Rejection) -> TxOutcome {
    TxOutcome::Rejected(rejection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::context::Rules;
    use crate::pow::CompactTargetValidator;
    use crate::script::ScriptVerifier;

    const FUNDS: Amount = 100_000;

    fn pool(settings: PoolSettings) -> TransactionPool {
        let scripts: Arc<dyn ScriptVerifier> =
            Arc::new(|_: &Transaction, _: usize, _: &TransactionOutput, _: u32| true);
        let validator = Validator::new(&Settings::regtest(), scripts, Arc::new(CompactTargetValidator));
        TransactionPool::new(settings, Arc::new(validator))
    }

    fn funding(count: u8) -> HashMap<OutPoint, OutputState> {
        (1..=count)
            .map(|tag| {
                let output = TransactionOutput {
                    value: FUNDS,
                    script_pubkey: vec![0x51],
                };
                (OutPoint::new([tag; 32], 0), OutputState::unspent(output, 1, false))
            })
            .collect()
    }

    fn context(utxo: &dyn UtxoView) -> ChainContext<'_> {
        ChainContext {
            height: 10,
            parent_hash: NULL_HASH,
            median_time_past: 0,
            work_required: REGTEST_POW_LIMIT,
            now: 1_000,
            rules: Rules::at_height(&Settings::regtest().consensus, 10),
            verify_scripts: true,
            checkpoints: &[],
            utxo,
        }
    }

    fn spend(point: OutPoint, fee: Amount, value_in: Amount) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: point,
                script_sig: vec![0x51],
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TransactionOutput {
                value: value_in - fee,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    fn replaceable(mut tx: Transaction) -> Transaction {
        tx.inputs[0].sequence = 0;
        tx
    }

    fn funded(tag: u8) -> OutPoint {
        OutPoint::new([tag; 32], 0)
    }

    #[test]
    fn test_accept_and_duplicate() {
        let utxo = funding(1);
        let pool = pool(PoolSettings::default());
        let tx = spend(funded(1), 1_000, FUNDS);

        let outcome = pool.accept(tx.clone(), &context(&utxo)).unwrap();
        assert!(matches!(outcome, TxOutcome::Accepted { fee: 1_000, .. }));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.total_bytes(), tx.serialized_size());

        let again = pool.accept(tx, &context(&utxo)).unwrap();
        assert!(matches!(again, TxOutcome::Rejected(Rejection::Duplicate(_))));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_conflicting_spend_rejected_without_rbf() {
        let utxo = funding(1);
        let pool = pool(PoolSettings::default());
        let first = spend(funded(1), 1_000, FUNDS);
        let second = spend(funded(1), 5_000, FUNDS);

        assert!(pool.accept(first.clone(), &context(&utxo)).unwrap().is_accepted());
        let outcome = pool.accept(second, &context(&utxo)).unwrap();
        assert!(matches!(outcome, TxOutcome::Rejected(Rejection::DoubleSpend(_))));
        assert!(pool.contains(&first.hash()));
    }

    #[test]
    fn test_chained_transactions_track_parents() {
        let utxo = funding(1);
        let pool = pool(PoolSettings::default());
        let parent = spend(funded(1), 1_000, FUNDS);
        let child = spend(OutPoint::new(parent.hash(), 0), 1_000, FUNDS - 1_000);

        assert!(pool.accept(parent.clone(), &context(&utxo)).unwrap().is_accepted());
        assert!(pool.accept(child.clone(), &context(&utxo)).unwrap().is_accepted());
        assert!(pool.query(&child.hash()).unwrap().parents.contains(&parent.hash()));

        pool.remove_confirmed(&[parent.hash()]);
        let entry = pool.query(&child.hash()).unwrap();
        assert!(entry.parents.is_empty());
        assert_eq!(pool.spender(&OutPoint::new(parent.hash(), 0)), Some(child.hash()));
    }

    #[test]
    fn test_rejects_missing_input_and_coinbase() {
        let utxo = funding(1);
        let pool = pool(PoolSettings::default());

        let orphan = spend(OutPoint::new([42; 32], 0), 1_000, FUNDS);
        let outcome = pool.accept(orphan, &context(&utxo)).unwrap();
        assert!(matches!(outcome, TxOutcome::Rejected(Rejection::ContextualInvalid(_))));

        let mut coinbase = spend(OutPoint::null(), 0, FUNDS);
        coinbase.inputs[0].script_sig = vec![0x01, 0x0a];
        let outcome = pool.accept(coinbase, &context(&utxo)).unwrap();
        assert!(matches!(outcome, TxOutcome::Rejected(Rejection::Malformed(_))));
    }

    #[test]
    fn test_non_standard_rejected() {
        let utxo = funding(1);
        let pool = pool(PoolSettings::default());
        let mut tx = spend(funded(1), 1_000, FUNDS);
        tx.outputs[0].script_pubkey.clear();
        let outcome = pool.accept(tx, &context(&utxo)).unwrap();
        assert!(matches!(outcome, TxOutcome::Rejected(Rejection::PolicyViolation(_))));
    }

    #[test]
    fn test_replace_by_fee() {
        let utxo = funding(1);
        let pool = pool(PoolSettings {
            replace_by_fee: true,
            ..PoolSettings::default()
        });

        let original = replaceable(spend(funded(1), 1_000, FUNDS));
        let child = spend(OutPoint::new(original.hash(), 0), 1_000, FUNDS - 1_000);
        assert!(pool.accept(original.clone(), &context(&utxo)).unwrap().is_accepted());
        assert!(pool.accept(child.clone(), &context(&utxo)).unwrap().is_accepted());

        // Must beat the fees of the original and its child together
        let cheap = spend(funded(1), 1_500, FUNDS);
        let outcome = pool.accept(cheap, &context(&utxo)).unwrap();
        assert!(matches!(outcome, TxOutcome::Rejected(Rejection::PolicyViolation(_))));

        let generous = spend(funded(1), 5_000, FUNDS);
        match pool.accept(generous.clone(), &context(&utxo)).unwrap() {
            TxOutcome::Accepted { replaced, .. } => {
                assert_eq!(replaced, vec![original.hash(), child.hash()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&generous.hash()));

        let events = pool.drain_events();
        assert!(events.contains(&PoolEvent::Removed(RemovedTransaction {
            hash: child.hash(),
            reason: RemovalReason::Replaced,
        })));
    }

    #[test]
    fn test_non_signalling_transaction_is_not_replaced() {
        let utxo = funding(1);
        let pool = pool(PoolSettings {
            replace_by_fee: true,
            ..PoolSettings::default()
        });
        assert!(pool.accept(spend(funded(1), 1_000, FUNDS), &context(&utxo)).unwrap().is_accepted());
        let outcome = pool.accept(spend(funded(1), 9_000, FUNDS), &context(&utxo)).unwrap();
        assert!(matches!(outcome, TxOutcome::Rejected(Rejection::DoubleSpend(_))));
    }

    #[test]
    fn test_capacity_eviction_by_fee_rate() {
        let utxo = funding(4);
        let pool = pool(PoolSettings {
            capacity: 2,
            near_capacity_percent: 100,
            ..PoolSettings::default()
        });

        let low = spend(funded(1), 2_000, FUNDS);
        let mid = spend(funded(2), 3_000, FUNDS);
        assert!(pool.accept(low.clone(), &context(&utxo)).unwrap().is_accepted());
        assert!(pool.accept(mid.clone(), &context(&utxo)).unwrap().is_accepted());

        let lowest = spend(funded(3), 1_500, FUNDS);
        let outcome = pool.accept(lowest, &context(&utxo)).unwrap();
        assert!(matches!(outcome, TxOutcome::Rejected(Rejection::Capacity(_))));
        assert_eq!(pool.len(), 2);

        let high = spend(funded(4), 9_000, FUNDS);
        match pool.accept(high.clone(), &context(&utxo)).unwrap() {
            TxOutcome::Accepted { evicted, .. } => assert_eq!(evicted, vec![low.hash()]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&mid.hash()));
        assert!(pool.contains(&high.hash()));
    }

    #[test]
    fn test_eviction_spares_candidate_ancestors() {
        let utxo = funding(2);
        let pool = pool(PoolSettings {
            capacity: 2,
            near_capacity_percent: 100,
            ..PoolSettings::default()
        });

        let parent = spend(funded(1), 1_000, FUNDS);
        let other = spend(funded(2), 2_000, FUNDS);
        assert!(pool.accept(parent.clone(), &context(&utxo)).unwrap().is_accepted());
        assert!(pool.accept(other.clone(), &context(&utxo)).unwrap().is_accepted());

        let child = spend(OutPoint::new(parent.hash(), 0), 8_000, FUNDS - 1_000);
        match pool.accept(child.clone(), &context(&utxo)).unwrap() {
            TxOutcome::Accepted { evicted, .. } => assert_eq!(evicted, vec![other.hash()]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(pool.contains(&parent.hash()));
    }

    #[test]
    fn test_minimum_fee_near_capacity() {
        let utxo = funding(2);
        let pool = pool(PoolSettings {
            capacity: 10,
            near_capacity_percent: 10,
            minimum_fee_rate: 1_000,
            ..PoolSettings::default()
        });

        // Empty pool: below the threshold, any fee goes
        assert!(pool.accept(spend(funded(1), 1, FUNDS), &context(&utxo)).unwrap().is_accepted());

        let outcome = pool.accept(spend(funded(2), 1, FUNDS), &context(&utxo)).unwrap();
        assert!(matches!(outcome, TxOutcome::Rejected(Rejection::PolicyViolation(_))));
    }

    #[test]
    fn test_block_connected_removes_confirmed_and_conflicts() {
        let utxo = funding(2);
        let pool = pool(PoolSettings::default());
        let confirmed = spend(funded(1), 1_000, FUNDS);
        let loser = spend(funded(2), 1_000, FUNDS);
        let loser_child = spend(OutPoint::new(loser.hash(), 0), 1_000, FUNDS - 1_000);
        for tx in [&confirmed, &loser, &loser_child] {
            assert!(pool.accept(tx.clone(), &context(&utxo)).unwrap().is_accepted());
        }
        pool.drain_events();

        let winner = spend(funded(2), 7_000, FUNDS);
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_block_hash: NULL_HASH,
                merkle_root: NULL_HASH,
                timestamp: 0,
                bits: 0,
                nonce: 0,
            },
            transactions: vec![spend(OutPoint::null(), 0, 1), confirmed.clone(), winner],
        };
        pool.block_connected(&block);

        assert!(pool.is_empty());
        let events = pool.drain_events();
        assert_eq!(
            events,
            vec![
                PoolEvent::Removed(RemovedTransaction {
                    hash: confirmed.hash(),
                    reason: RemovalReason::Confirmed
                }),
                PoolEvent::Removed(RemovedTransaction {
                    hash: loser.hash(),
                    reason: RemovalReason::Conflict
                }),
                PoolEvent::Removed(RemovedTransaction {
                    hash: loser_child.hash(),
                    reason: RemovalReason::Conflict
                }),
            ]
        );
    }

    #[test]
    fn test_reorganize_requeues_unwound_transactions() {
        let utxo = funding(3);
        let pool = pool(PoolSettings::default());
        let resident = spend(funded(1), 1_000, FUNDS);
        assert!(pool.accept(resident.clone(), &context(&utxo)).unwrap().is_accepted());

        let unwound_tx = spend(funded(2), 2_000, FUNDS);
        let reconfirmed = spend(funded(3), 2_000, FUNDS);
        let header = BlockHeader {
            version: 1,
            prev_block_hash: NULL_HASH,
            merkle_root: NULL_HASH,
            timestamp: 0,
            bits: 0,
            nonce: 0,
        };
        let coinbase = spend(OutPoint::null(), 0, 1);
        let unwound = Block {
            header: header.clone(),
            transactions: vec![coinbase.clone(), unwound_tx.clone(), reconfirmed.clone()],
        };
        let applied = Block {
            header,
            transactions: vec![coinbase, reconfirmed.clone()],
        };

        let outcomes = pool.reorganize(&[unwound], &[applied], &context(&utxo)).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, outcome)| outcome.is_accepted()));
        assert!(pool.contains(&unwound_tx.hash()));
        assert!(pool.contains(&resident.hash()));
        assert!(!pool.contains(&reconfirmed.hash()));

        // The resident was announced on first admission only
        let accepted: Vec<Hash> = pool
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                PoolEvent::Accepted(accepted) => Some(accepted.hash),
                PoolEvent::Removed(_) => None,
            })
            .collect();
        assert_eq!(accepted, vec![resident.hash(), unwound_tx.hash()]);
    }

    #[test]
    fn test_requeue_reports_rejected_candidates() {
        let utxo = funding(2);
        let pool = pool(PoolSettings::default());
        let resident = spend(funded(1), 1_000, FUNDS);
        assert!(pool.accept(resident.clone(), &context(&utxo)).unwrap().is_accepted());
        pool.drain_events();

        let readmitted = spend(funded(2), 2_000, FUNDS);
        let conflicting = spend(funded(1), 3_000, FUNDS);
        let outcomes = pool
            .requeue(
                vec![readmitted.clone(), conflicting.clone(), resident.clone()],
                &context(&utxo),
            )
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].1.is_accepted());
        assert!(matches!(outcomes[1].1, TxOutcome::Rejected(Rejection::DoubleSpend(_))));
        assert!(matches!(outcomes[2].1, TxOutcome::Rejected(Rejection::Duplicate(_))));
        assert!(pool.contains(&readmitted.hash()));
        assert!(pool.contains(&resident.hash()));

        // The resident duplicate never left the pool, so only the conflict is reported
        assert_eq!(
            pool.drain_events(),
            vec![
                PoolEvent::Accepted(AcceptedTransaction {
                    hash: readmitted.hash(),
                    transaction: readmitted,
                    fee: 2_000,
                }),
                PoolEvent::Removed(RemovedTransaction {
                    hash: conflicting.hash(),
                    reason: RemovalReason::Conflict,
                }),
            ]
        );
    }

    #[test]
    fn test_reorganize_reports_unwound_transaction_spent_by_new_branch() {
        let utxo = funding(1);
        let pool = pool(PoolSettings::default());
        let header = BlockHeader {
            version: 1,
            prev_block_hash: NULL_HASH,
            merkle_root: NULL_HASH,
            timestamp: 0,
            bits: 0,
            nonce: 0,
        };
        let coinbase = spend(OutPoint::null(), 0, 1);
        let payment = spend(funded(1), 1_000, FUNDS);
        let rival = spend(funded(1), 4_000, FUNDS);
        let unwound = Block {
            header: header.clone(),
            transactions: vec![coinbase.clone(), payment.clone()],
        };
        let applied = Block {
            header,
            transactions: vec![coinbase, rival],
        };

        // The new tip has spent the funding output
        let mut after = utxo.clone();
        if let Some(state) = after.get_mut(&funded(1)) {
            state.spent = true;
        }

        let outcomes = pool.reorganize(&[unwound], &[applied], &context(&after)).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].1.is_accepted());
        assert!(pool.is_empty());
        assert_eq!(
            pool.drain_events(),
            vec![PoolEvent::Removed(RemovedTransaction {
                hash: payment.hash(),
                reason: RemovalReason::Conflict,
            })]
        );
    }
}
