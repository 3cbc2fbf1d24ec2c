//! Transaction validation rules
//!
//! `check_transaction` is context free. `check_tx_inputs` resolves inputs
//! against a UTXO view and `verify_tx_scripts` hands each input to the
//! external script verifier.

use crate::constants::*;
use crate::error::{Rejection, Result};
use crate::script::ScriptVerifier;
use crate::types::*;
use crate::view::UtxoView;
use std::collections::HashSet;

/// Resolved inputs of a transaction that passed `check_tx_inputs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentInputs {
    pub fee: Amount,
    /// The output each input spends, in input order
    pub prevouts: Vec<OutputState>,
}

/// CheckTransaction: structure only.
///
/// 1. Inputs and outputs are both non-empty
/// 2. Serialized size is within `MAX_TX_SIZE`
/// 3. Every output and the running output total are within `MAX_MONEY`
/// 4. No prevout is spent twice
/// 5. Coinbase script is 2..=100 bytes; other inputs never spend the null outpoint
pub fn check_transaction(tx: &Transaction) -> ValidationResult {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return invalid("empty inputs or outputs");
    }

    let size = tx.serialized_size();
    if size > MAX_TX_SIZE {
        return invalid(format!("transaction too large: {size} bytes"));
    }

    let mut total: Amount = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value > MAX_MONEY {
            return invalid(format!("output {index} value {} exceeds max money", output.value));
        }
        total = match total.checked_add(output.value) {
            Some(total) if total <= MAX_MONEY => total,
            _ => return invalid("total output value exceeds max money"),
        };
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return invalid("duplicate input");
        }
    }

    if tx.is_coinbase() {
        let length = tx.inputs[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_SIZE..=MAX_COINBASE_SCRIPT_SIZE).contains(&length) {
            return invalid(format!("coinbase script size {length} out of range"));
        }
    } else if tx.inputs.iter().any(|input| input.prevout.is_null()) {
        return invalid("null prevout in non-coinbase transaction");
    }

    ValidationResult::Valid(())
}

/// Lock time satisfied at (`height`, `time`), or every sequence is final.
pub fn is_final(tx: &Transaction, height: Natural, time: u32) -> bool {
    if tx.lock_time == 0 {
        return true;
    }

    let threshold = if tx.lock_time < LOCKTIME_THRESHOLD {
        height
    } else {
        time as u64
    };
    if (tx.lock_time as u64) < threshold {
        return true;
    }

    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// CheckTxInputs: resolve every input against `view` for a spend at `height`.
///
/// Missing prevouts are `ContextualInvalid`, spent ones `DoubleSpend`. A
/// coinbase output must have `maturity` confirmations before it is spent.
/// The fee is Σ inputs - Σ outputs and may not be negative.
pub fn check_tx_inputs(
    tx: &Transaction,
    view: &dyn UtxoView,
    height: Natural,
    maturity: Natural,
) -> Result<ValidationResult<SpentInputs>> {
    if tx.is_coinbase() {
        return Ok(ValidationResult::Valid(SpentInputs {
            fee: 0,
            prevouts: Vec::new(),
        }));
    }

    let mut total_in: Amount = 0;
    let mut prevouts = Vec::with_capacity(tx.inputs.len());

    for (index, input) in tx.inputs.iter().enumerate() {
        let state = match view.get_output(&input.prevout)? {
            Some(state) => state,
            None => {
                return Ok(ValidationResult::Invalid(Rejection::ContextualInvalid(format!(
                    "input {index} spends missing output {}:{}",
                    encode_hash(&input.prevout.hash),
                    input.prevout.index
                ))))
            }
        };

        if state.spent {
            return Ok(ValidationResult::Invalid(Rejection::DoubleSpend(format!(
                "input {index} spends already spent output {}:{}",
                encode_hash(&input.prevout.hash),
                input.prevout.index
            ))));
        }

        if state.coinbase && height.saturating_sub(state.height) < maturity {
            return Ok(ValidationResult::Invalid(Rejection::ContextualInvalid(format!(
                "input {index} spends immature coinbase from height {}",
                state.height
            ))));
        }

        total_in = match total_in.checked_add(state.output.value) {
            Some(total) if total <= MAX_MONEY => total,
            _ => {
                return Ok(ValidationResult::Invalid(Rejection::ContextualInvalid(
                    "input value out of range".to_string(),
                )))
            }
        };
        prevouts.push(state);
    }

    let total_out = tx.total_output_value().unwrap_or(Amount::MAX);
    if total_in < total_out {
        return Ok(ValidationResult::Invalid(Rejection::ContextualInvalid(format!(
            "inputs {total_in} below outputs {total_out}"
        ))));
    }

    Ok(ValidationResult::Valid(SpentInputs {
        fee: total_in - total_out,
        prevouts,
    }))
}

/// Run the script verifier over every input.
pub fn verify_tx_scripts(
    tx: &Transaction,
    prevouts: &[OutputState],
    flags: u32,
    verifier: &dyn ScriptVerifier,
) -> ValidationResult {
    for (index, prevout) in prevouts.iter().enumerate() {
        if !verifier.verify(tx, index, &prevout.output, flags) {
            return ValidationResult::Invalid(Rejection::ScriptFailure(format!(
                "input {index} of {} failed verification",
                encode_hash(&tx.hash())
            )));
        }
    }
    ValidationResult::Valid(())
}

fn invalid(reason: impl Into<String>) -> ValidationResult {
    ValidationResult::Invalid(Rejection::Malformed(reason.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spend(points: &[OutPoint], value: Amount) -> Transaction {
        Transaction {
            version: 1,
            inputs: points
                .iter()
                .map(|point| TransactionInput {
                    prevout: *point,
                    script_sig: vec![0x51],
                    sequence: SEQUENCE_FINAL,
                })
                .collect(),
            outputs: vec![TransactionOutput {
                value,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    fn coinbase(script: Vec<u8>) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint::null(),
                script_sig: script,
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TransactionOutput {
                value: 50 * COIN,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    fn view_with(entries: &[(OutPoint, Amount, Natural, bool, bool)]) -> HashMap<OutPoint, OutputState> {
        entries
            .iter()
            .map(|&(point, value, height, coinbase, spent)| {
                let output = TransactionOutput {
                    value,
                    script_pubkey: vec![0x51],
                };
                (point, OutputState { output, height, coinbase, spent })
            })
            .collect()
    }

    fn rejection(result: ValidationResult) -> Rejection {
        match result {
            ValidationResult::Invalid(rejection) => rejection,
            ValidationResult::Valid(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_check_transaction_valid() {
        let tx = spend(&[OutPoint::new([1; 32], 0)], 1000);
        assert!(check_transaction(&tx).is_valid());
    }

    #[test]
    fn test_check_transaction_empty() {
        let mut tx = spend(&[OutPoint::new([1; 32], 0)], 1000);
        tx.outputs.clear();
        assert!(matches!(rejection(check_transaction(&tx)), Rejection::Malformed(_)));

        let tx = spend(&[], 1000);
        assert!(!check_transaction(&tx).is_valid());
    }

    #[test]
    fn test_check_transaction_money_range() {
        let tx = spend(&[OutPoint::new([1; 32], 0)], MAX_MONEY + 1);
        assert!(!check_transaction(&tx).is_valid());

        let mut tx = spend(&[OutPoint::new([1; 32], 0)], MAX_MONEY);
        assert!(check_transaction(&tx).is_valid());
        tx.outputs.push(tx.outputs[0].clone());
        assert!(!check_transaction(&tx).is_valid());
    }

    #[test]
    fn test_check_transaction_duplicate_inputs() {
        let point = OutPoint::new([1; 32], 0);
        let tx = spend(&[point, point], 1000);
        assert!(!check_transaction(&tx).is_valid());
    }

    #[test]
    fn test_coinbase_script_bounds() {
        assert!(!check_transaction(&coinbase(vec![0x01])).is_valid());
        assert!(check_transaction(&coinbase(vec![0x01, 0x02])).is_valid());
        assert!(check_transaction(&coinbase(vec![0; 100])).is_valid());
        assert!(!check_transaction(&coinbase(vec![0; 101])).is_valid());
    }

    #[test]
    fn test_null_prevout_outside_coinbase() {
        let tx = spend(&[OutPoint::new([1; 32], 0), OutPoint::null()], 1000);
        assert!(!check_transaction(&tx).is_valid());
    }

    #[test]
    fn test_is_final() {
        let mut tx = spend(&[OutPoint::new([1; 32], 0)], 1);
        assert!(is_final(&tx, 0, 0));

        tx.lock_time = 100;
        tx.inputs[0].sequence = 0;
        assert!(!is_final(&tx, 100, 0));
        assert!(is_final(&tx, 101, 0));

        tx.lock_time = LOCKTIME_THRESHOLD + 10;
        assert!(!is_final(&tx, 1_000_000, LOCKTIME_THRESHOLD + 10));
        assert!(is_final(&tx, 0, LOCKTIME_THRESHOLD + 11));

        tx.inputs[0].sequence = SEQUENCE_FINAL;
        assert!(is_final(&tx, 0, 0));
    }

    #[test]
    fn test_check_tx_inputs_fee() {
        let a = OutPoint::new([1; 32], 0);
        let b = OutPoint::new([2; 32], 1);
        let view = view_with(&[(a, 3000, 1, false, false), (b, 2000, 1, false, false)]);

        let tx = spend(&[a, b], 4500);
        match check_tx_inputs(&tx, &view, 2, COINBASE_MATURITY).unwrap() {
            ValidationResult::Valid(spent) => {
                assert_eq!(spent.fee, 500);
                assert_eq!(spent.prevouts.len(), 2);
            }
            ValidationResult::Invalid(rejection) => panic!("unexpected {rejection}"),
        }
    }

    #[test]
    fn test_check_tx_inputs_rejections() {
        let spent = OutPoint::new([1; 32], 0);
        let young = OutPoint::new([2; 32], 0);
        let funds = OutPoint::new([3; 32], 0);
        let view = view_with(&[
            (spent, 1000, 1, false, true),
            (young, 1000, 10, true, false),
            (funds, 1000, 1, false, false),
        ]);

        let check = |tx: &Transaction, height| match check_tx_inputs(tx, &view, height, 100).unwrap() {
            ValidationResult::Invalid(rejection) => Some(rejection),
            ValidationResult::Valid(_) => None,
        };

        assert!(matches!(check(&spend(&[spent], 1), 5), Some(Rejection::DoubleSpend(_))));
        assert!(matches!(
            check(&spend(&[OutPoint::new([9; 32], 0)], 1), 5),
            Some(Rejection::ContextualInvalid(_))
        ));
        assert!(matches!(check(&spend(&[young], 1), 109), Some(Rejection::ContextualInvalid(_))));
        assert_eq!(check(&spend(&[young], 1), 110), None);
        assert!(matches!(check(&spend(&[funds], 1001), 5), Some(Rejection::ContextualInvalid(_))));
    }

    #[test]
    fn test_verify_tx_scripts_reports_failing_input() {
        let tx = spend(&[OutPoint::new([1; 32], 0), OutPoint::new([1; 32], 1)], 1);
        let view = view_with(&[
            (OutPoint::new([1; 32], 0), 10, 1, false, false),
            (OutPoint::new([1; 32], 1), 10, 1, false, false),
        ]);
        let prevouts = match check_tx_inputs(&tx, &view, 2, 0).unwrap() {
            ValidationResult::Valid(spent) => spent.prevouts,
            ValidationResult::Invalid(rejection) => panic!("unexpected {rejection}"),
        };

        let accept_all = |_: &Transaction, _: usize, _: &TransactionOutput, _: u32| true;
        assert!(verify_tx_scripts(&tx, &prevouts, 0, &accept_all).is_valid());

        let first_only = |_: &Transaction, index: usize, _: &TransactionOutput, _: u32| index == 0;
        assert!(matches!(
            verify_tx_scripts(&tx, &prevouts, 0, &first_only),
            ValidationResult::Invalid(Rejection::ScriptFailure(_))
        ));
    }
}
