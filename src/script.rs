//! Script collaborator contract, verification flags and static script analysis
//!
//! Script interpretation itself lives outside the core. This module only
//! knows how to walk opcodes well enough to count signature operations and
//! to recognise the BIP34 height push and BIP16 pay-to-script-hash outputs.

use crate::constants::MULTISIG_DEFAULT_SIGOPS;
use crate::types::*;

pub const VERIFY_NONE: u32 = 0;
/// BIP16 pay-to-script-hash evaluation
pub const VERIFY_P2SH: u32 = 1 << 0;
/// BIP66 strict DER signatures
pub const VERIFY_DERSIG: u32 = 1 << 2;
/// BIP65 OP_CHECKLOCKTIMEVERIFY
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;
const OP_EQUAL: u8 = 0x87;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKSIGVERIFY: u8 = 0xad;
const OP_CHECKMULTISIG: u8 = 0xae;
const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Verifies one input's unlocking script against the output it spends.
///
/// Implementations must be pure: same arguments, same answer.
pub trait ScriptVerifier: Send + Sync {
    fn verify(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevout: &TransactionOutput,
        flags: u32,
    ) -> bool;
}

impl<F> ScriptVerifier for F
where
    F: Fn(&Transaction, usize, &TransactionOutput, u32) -> bool + Send + Sync,
{
    fn verify(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevout: &TransactionOutput,
        flags: u32,
    ) -> bool {
        self(tx, input_index, prevout, flags)
    }
}

/// One parsed script element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element<'a> {
    Push(&'a [u8]),
    Op(u8),
}

/// Iterates opcodes; stops at the first truncated push.
struct Elements<'a> {
    script: &'a [u8],
    position: usize,
}

impl<'a> Elements<'a> {
    fn new(script: &'a [u8]) -> Self {
        Self { script, position: 0 }
    }

    fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(count)?;
        let bytes = self.script.get(self.position..end)?;
        self.position = end;
        Some(bytes)
    }
}

impl<'a> Iterator for Elements<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Element<'a>> {
        let opcode = *self.script.get(self.position)?;
        self.position += 1;

        let length = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => self.take(1)?[0] as usize,
            OP_PUSHDATA2 => {
                let bytes = self.take(2)?;
                u16::from_le_bytes([bytes[0], bytes[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let bytes = self.take(4)?;
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            }
            _ => return Some(Element::Op(opcode)),
        };

        self.take(length).map(Element::Push)
    }
}

/// Signature operations in `script`.
///
/// Legacy counting (`accurate == false`) charges every CHECKMULTISIG the
/// default of 20. Accurate counting, used for P2SH redeem scripts, charges
/// the key count when it is given by a preceding OP_1..OP_16.
pub fn count_sigops(script: &[u8], accurate: bool) -> usize {
    let mut count = 0;
    let mut previous = None;

    for element in Elements::new(script) {
        if let Element::Op(opcode) = element {
            match opcode {
                OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    count += match previous {
                        Some(Element::Op(n)) if accurate && (OP_1..=OP_16).contains(&n) => {
                            (n - OP_1 + 1) as usize
                        }
                        _ => MULTISIG_DEFAULT_SIGOPS,
                    }
                }
                _ => {}
            }
        }
        previous = Some(element);
    }

    count
}

/// Legacy sigops of a transaction: every input and output script.
pub fn transaction_sigops(tx: &Transaction) -> usize {
    let inputs: usize = tx.inputs.iter().map(|input| count_sigops(&input.script_sig, false)).sum();
    let outputs: usize = tx
        .outputs
        .iter()
        .map(|output| count_sigops(&output.script_pubkey, false))
        .sum();
    inputs + outputs
}

/// `OP_HASH160 <20 bytes> OP_EQUAL`
pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// Sigops hidden in a P2SH redeem script: the last push of the unlocking script.
pub fn redeem_script_sigops(script_sig: &[u8]) -> usize {
    let mut redeem: Option<&[u8]> = None;
    for element in Elements::new(script_sig) {
        match element {
            Element::Push(data) => redeem = Some(data),
            Element::Op(OP_0) => redeem = Some(&[][..]),
            // Only push-only unlocking scripts can carry a redeem script
            Element::Op(_) => return 0,
        }
    }

    redeem.map(|data| count_sigops(data, true)).unwrap_or(0)
}

/// Minimal script-number encoding of a non-negative value.
fn script_number(mut value: u64) -> Vec<u8> {
    let mut bytes = Vec::new();
    while value > 0 {
        bytes.push((value & 0xff) as u8);
        value >>= 8;
    }

    if bytes.last().is_some_and(|last| last & 0x80 != 0) {
        bytes.push(0x00);
    }

    bytes
}

/// The push a BIP34 coinbase script must start with.
pub fn height_push(height: Natural) -> Vec<u8> {
    let number = script_number(height);
    if number.is_empty() {
        return vec![OP_0];
    }

    let mut push = Vec::with_capacity(number.len() + 1);
    push.push(number.len() as u8);
    push.extend_from_slice(&number);
    push
}

/// BIP34: does the coinbase script commit to `height`?
pub fn has_height_push(script_sig: &[u8], height: Natural) -> bool {
    script_sig.starts_with(&height_push(height))
}
