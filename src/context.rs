//! Chain context handed to contextual validation, and the clock abstraction

use crate::config::{Checkpoint, ConsensusParams};
use crate::script::{VERIFY_CHECKLOCKTIMEVERIFY, VERIFY_DERSIG, VERIFY_NONE, VERIFY_P2SH};
use crate::types::*;
use crate::view::UtxoView;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in unix seconds. Injected so validation stays pure.
pub trait Clock: Send + Sync {
    fn now(&self) -> u32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs().min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicU32,
}

impl FixedClock {
    pub fn new(now: u32) -> Self {
        Self {
            now: AtomicU32::new(now),
        }
    }

    pub fn set(&self, now: u32) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u32) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Height-gated soft fork rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    /// Coinbase must commit to its height
    pub bip34: bool,
    /// Flags passed to the script verifier
    pub script_flags: u32,
}

impl Rules {
    pub fn at_height(params: &ConsensusParams, height: Natural) -> Self {
        let mut script_flags = VERIFY_NONE;
        if height >= params.bip16_height {
            script_flags |= VERIFY_P2SH;
        }
        if height >= params.bip66_height {
            script_flags |= VERIFY_DERSIG;
        }
        if height >= params.bip65_height {
            script_flags |= VERIFY_CHECKLOCKTIMEVERIFY;
        }

        Self {
            bip34: height >= params.bip34_height,
            script_flags,
        }
    }

    pub fn p2sh(&self) -> bool {
        self.script_flags & VERIFY_P2SH != 0
    }
}

/// Everything contextual validation needs to know about the branch a block
/// (or pool transaction) would extend.
#[derive(Clone, Copy)]
pub struct ChainContext<'a> {
    /// Height of the block being validated, or of the next block for pool admission
    pub height: Natural,
    pub parent_hash: Hash,
    pub median_time_past: u32,
    /// Bits the block must carry
    pub work_required: u32,
    pub now: u32,
    pub rules: Rules,
    /// False below the last checkpoint, where scripts are assumed valid
    pub verify_scripts: bool,
    pub checkpoints: &'a [Checkpoint],
    /// Outputs as the branch sees them just before this block
    pub utxo: &'a dyn UtxoView,
}

impl<'a> ChainContext<'a> {
    pub fn checkpoint(&self) -> Option<&'a Checkpoint> {
        self.checkpoints.iter().find(|checkpoint| checkpoint.height == self.height)
    }
}

/// Strict validation applies above the last configured checkpoint.
pub fn is_strict(checkpoints: &[Checkpoint], height: Natural) -> bool {
    checkpoints
        .iter()
        .map(|checkpoint| checkpoint.height)
        .max()
        .map_or(true, |last| height > last)
}
