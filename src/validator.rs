//! The validator: consensus rules bound to one set of parameters and collaborators

use crate::block;
use crate::config::{ConsensusParams, Settings};
use crate::context::ChainContext;
use crate::error::{Rejection, Result};
use crate::pow::ProofValidator;
use crate::script::ScriptVerifier;
use crate::transaction::{self, check_tx_inputs, is_final, verify_tx_scripts};
use crate::types::*;
use std::sync::Arc;

/// Pure, deterministic block and transaction validation.
///
/// Structural checks (`check_*`) need no chain state; the organizer uses them
/// to decide whether a block is worth parking as an orphan. Contextual checks
/// take a [`ChainContext`] describing the branch being extended.
pub struct Validator {
    params: ConsensusParams,
    max_future_drift: u32,
    scripts: Arc<dyn ScriptVerifier>,
    proof: Arc<dyn ProofValidator>,
}

impl Validator {
    pub fn new(
        settings: &Settings,
        scripts: Arc<dyn ScriptVerifier>,
        proof: Arc<dyn ProofValidator>,
    ) -> Self {
        Self {
            params: settings.consensus.clone(),
            max_future_drift: settings.max_future_drift_secs,
            scripts,
            proof,
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn check_block(&self, block: &Block, now: u32) -> ValidationResult {
        block::check_block(block, &self.params, self.proof.as_ref(), now, self.max_future_drift)
    }

    pub fn check_transaction(&self, tx: &Transaction) -> ValidationResult {
        transaction::check_transaction(tx)
    }

    /// Contextual rules only; assumes `check_block` passed. Returns total fees.
    pub fn accept_block(&self, block: &Block, ctx: &ChainContext) -> Result<ValidationResult<Amount>> {
        if let ValidationResult::Invalid(rejection) = block::accept_block(block, ctx) {
            return Ok(ValidationResult::Invalid(rejection));
        }
        block::connect_block(block, ctx, &self.params, self.scripts.as_ref())
    }

    /// Structural and contextual validation of a block. Returns total fees.
    pub fn validate_block(&self, block: &Block, ctx: &ChainContext) -> Result<ValidationResult<Amount>> {
        if let ValidationResult::Invalid(rejection) = self.check_block(block, ctx.now) {
            return Ok(ValidationResult::Invalid(rejection));
        }
        self.accept_block(block, ctx)
    }

    /// Validation of a loose transaction for inclusion in the next block
    /// (`ctx.height`). Returns the fee.
    pub fn validate_transaction(
        &self,
        tx: &Transaction,
        ctx: &ChainContext,
    ) -> Result<ValidationResult<Amount>> {
        if tx.is_coinbase() {
            return Ok(ValidationResult::Invalid(Rejection::Malformed(
                "coinbase transaction outside a block".to_string(),
            )));
        }

        if let ValidationResult::Invalid(rejection) = self.check_transaction(tx) {
            return Ok(ValidationResult::Invalid(rejection));
        }

        if !is_final(tx, ctx.height, ctx.now) {
            return Ok(ValidationResult::Invalid(Rejection::ContextualInvalid(
                "transaction is not final".to_string(),
            )));
        }

        let spent = match check_tx_inputs(tx, ctx.utxo, ctx.height, self.params.coinbase_maturity)? {
            ValidationResult::Valid(spent) => spent,
            ValidationResult::Invalid(rejection) => return Ok(ValidationResult::Invalid(rejection)),
        };

        if ctx.verify_scripts {
            if let ValidationResult::Invalid(rejection) =
                verify_tx_scripts(tx, &spent.prevouts, ctx.rules.script_flags, self.scripts.as_ref())
            {
                return Ok(ValidationResult::Invalid(rejection));
            }
        }

        Ok(ValidationResult::Valid(spent.fee))
    }
}
