//! Block validation rules
//!
//! Three stages, each stricter about context than the last:
//! `check_block` needs only the block and the clock, `accept_block` needs
//! the header context of the branch, and `connect_block` resolves every
//! input against the branch's UTXO view.

use crate::config::ConsensusParams;
use crate::context::ChainContext;
use crate::economic::coinbase_allowance;
use crate::error::{Rejection, Result};
use crate::pow::{check_target, ProofValidator};
use crate::script::{
    has_height_push, is_pay_to_script_hash, redeem_script_sigops, transaction_sigops,
    ScriptVerifier,
};
use crate::transaction::{check_transaction, check_tx_inputs, is_final, verify_tx_scripts};
use crate::types::*;
use crate::view::{UtxoOverlay, UtxoView};
use std::collections::HashSet;

/// CheckBlock: context-free block rules.
pub fn check_block(
    block: &Block,
    params: &ConsensusParams,
    proof: &dyn ProofValidator,
    now: u32,
    max_future_drift: u32,
) -> ValidationResult {
    if block.transactions.is_empty() {
        return malformed("block has no transactions");
    }

    let size = block.serialized_size();
    if size > params.max_block_size {
        return malformed(format!("block size {size} exceeds {}", params.max_block_size));
    }

    let header = &block.header;
    if header.version < 1 {
        return malformed(format!("invalid block version {}", header.version));
    }

    if !check_target(header.bits, params.pow_limit) {
        return insufficient(format!("invalid target bits {:#010x}", header.bits));
    }

    if !proof.check_seal(header, params.pow_limit) {
        return insufficient("seal does not satisfy target");
    }

    if header.timestamp as u64 > now as u64 + max_future_drift as u64 {
        return ValidationResult::Invalid(Rejection::ContextualInvalid(format!(
            "timestamp {} too far in the future",
            header.timestamp
        )));
    }

    if !block.transactions[0].is_coinbase() {
        return malformed("first transaction is not coinbase");
    }

    if block.transactions[1..].iter().any(Transaction::is_coinbase) {
        return malformed("extra coinbase transaction");
    }

    let mut txids = HashSet::with_capacity(block.transactions.len());
    let mut sigops = 0;
    for (index, tx) in block.transactions.iter().enumerate() {
        if let ValidationResult::Invalid(rejection) = check_transaction(tx) {
            return ValidationResult::Invalid(Rejection::Malformed(format!(
                "transaction {index}: {rejection}"
            )));
        }

        if !txids.insert(tx.hash()) {
            return malformed(format!("duplicate transaction at index {index}"));
        }

        sigops += transaction_sigops(tx);
    }

    if sigops > params.max_block_sigops {
        return malformed(format!("too many sigops: {sigops}"));
    }

    if merkle_root(txids_in_order(block)) != header.merkle_root {
        return malformed("merkle root mismatch");
    }

    ValidationResult::Valid(())
}

/// AcceptBlock: rules that depend on the branch's headers.
pub fn accept_block(block: &Block, ctx: &ChainContext) -> ValidationResult {
    let header = &block.header;

    if header.prev_block_hash != ctx.parent_hash {
        return contextual("previous hash does not match parent");
    }

    if header.bits != ctx.work_required {
        return insufficient(format!(
            "bits {:#010x} but {:#010x} required",
            header.bits, ctx.work_required
        ));
    }

    if header.timestamp <= ctx.median_time_past {
        return contextual(format!(
            "timestamp {} not after median time past {}",
            header.timestamp, ctx.median_time_past
        ));
    }

    if let Some(index) = block
        .transactions
        .iter()
        .position(|tx| !is_final(tx, ctx.height, header.timestamp))
    {
        return contextual(format!("transaction {index} is not final"));
    }

    if let Some(checkpoint) = ctx.checkpoint() {
        if checkpoint.hash != block.hash() {
            return ValidationResult::Invalid(Rejection::CheckpointMismatch(ctx.height));
        }
    }

    if ctx.rules.bip34 && !has_height_push(&block.transactions[0].inputs[0].script_sig, ctx.height) {
        return contextual(format!("coinbase does not commit to height {}", ctx.height));
    }

    ValidationResult::Valid(())
}

/// ConnectBlock: spend every input against the branch view.
///
/// Transactions are applied to a private overlay in block order, so an
/// output created earlier in the block may be spent later in it but never
/// the other way round. Returns the total fees.
pub fn connect_block(
    block: &Block,
    ctx: &ChainContext,
    params: &ConsensusParams,
    scripts: &dyn ScriptVerifier,
) -> Result<ValidationResult<Amount>> {
    let mut overlay = UtxoOverlay::new(ctx.utxo);
    let mut fees: Amount = 0;
    let mut sigops: usize = block.transactions.iter().map(transaction_sigops).sum();

    for (index, tx) in block.transactions.iter().enumerate() {
        let txid = tx.hash();

        // BIP30: never overwrite an output that is still unspent
        for output_index in 0..tx.outputs.len() {
            let point = OutPoint::new(txid, output_index as u32);
            if matches!(overlay.get_output(&point)?, Some(state) if !state.spent) {
                return Ok(ValidationResult::Invalid(Rejection::ContextualInvalid(format!(
                    "transaction {index} overwrites unspent outputs"
                ))));
            }
        }

        if !tx.is_coinbase() {
            let spent = match check_tx_inputs(tx, &overlay, ctx.height, params.coinbase_maturity)? {
                ValidationResult::Valid(spent) => spent,
                ValidationResult::Invalid(rejection) => return Ok(ValidationResult::Invalid(rejection)),
            };

            fees = match fees.checked_add(spent.fee) {
                Some(total) if total <= crate::constants::MAX_MONEY => total,
                _ => return Ok(contextual("total fees out of range")),
            };

            if ctx.rules.p2sh() {
                sigops += tx
                    .inputs
                    .iter()
                    .zip(&spent.prevouts)
                    .filter(|(_, prevout)| is_pay_to_script_hash(&prevout.output.script_pubkey))
                    .map(|(input, _)| redeem_script_sigops(&input.script_sig))
                    .sum::<usize>();
            }

            if ctx.verify_scripts {
                if let ValidationResult::Invalid(rejection) =
                    verify_tx_scripts(tx, &spent.prevouts, ctx.rules.script_flags, scripts)
                {
                    return Ok(ValidationResult::Invalid(rejection));
                }
            }
        }

        overlay.apply_transaction(tx, ctx.height)?;
    }

    if sigops > params.max_block_sigops {
        return Ok(contextual(format!("too many sigops: {sigops}")));
    }

    let claimed = block.transactions[0].total_output_value().unwrap_or(Amount::MAX);
    match coinbase_allowance(ctx.height, fees, params) {
        Some(allowed) if claimed <= allowed => Ok(ValidationResult::Valid(fees)),
        _ => Ok(contextual(format!("coinbase claims {claimed}, more than subsidy plus fees"))),
    }
}

fn txids_in_order(block: &Block) -> Vec<Hash> {
    block.transactions.iter().map(Transaction::hash).collect()
}

fn malformed(reason: impl Into<String>) -> ValidationResult {
    ValidationResult::Invalid(Rejection::Malformed(reason.into()))
}

fn insufficient(reason: impl Into<String>) -> ValidationResult {
    ValidationResult::Invalid(Rejection::InsufficientProof(reason.into()))
}

fn contextual<T>(reason: impl Into<String>) -> ValidationResult<T> {
    ValidationResult::Invalid(Rejection::ContextualInvalid(reason.into()))
}
