//! Core chain types and their identity hashing

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Natural number type
pub type Natural = u64;

/// Monetary amount in base units
pub type Amount = u64;

/// The all-zero hash, used as the coinbase prevout and genesis parent
pub const NULL_HASH: Hash = [0u8; 32];

/// OutPoint: (txid, output index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// The prevout carried by a coinbase input
    pub fn null() -> Self {
        Self { hash: NULL_HASH, index: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.hash == NULL_HASH && self.index == u32::MAX
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Amount,
    pub script_pubkey: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Transaction identity: double SHA-256 of the encoding
    pub fn hash(&self) -> Hash {
        double_sha256(&self.encode())
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn serialized_size(&self) -> usize {
        self.encode().len()
    }

    pub fn total_output_value(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.value))
    }

    /// Identity encoding. Also the basis for every size limit.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(10 + self.inputs.len() * 41 + self.outputs.len() * 9);
        bytes.extend_from_slice(&self.version.to_le_bytes());

        write_compact_size(&mut bytes, self.inputs.len() as u64);
        for input in &self.inputs {
            bytes.extend_from_slice(&input.prevout.hash);
            bytes.extend_from_slice(&input.prevout.index.to_le_bytes());
            write_compact_size(&mut bytes, input.script_sig.len() as u64);
            bytes.extend_from_slice(&input.script_sig);
            bytes.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_compact_size(&mut bytes, self.outputs.len() as u64);
        for output in &self.outputs {
            bytes.extend_from_slice(&output.value.to_le_bytes());
            write_compact_size(&mut bytes, output.script_pubkey.len() as u64);
            bytes.extend_from_slice(&output.script_pubkey);
        }

        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        bytes
    }
}

/// Block Header: 80 bytes when encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    pub fn hash(&self) -> Hash {
        double_sha256(&self.encode())
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..36].copy_from_slice(&self.prev_block_hash);
        bytes[36..68].copy_from_slice(&self.merkle_root);
        bytes[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[72..76].copy_from_slice(&self.bits.to_le_bytes());
        bytes[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn serialized_size(&self) -> usize {
        let mut count = Vec::new();
        write_compact_size(&mut count, self.transactions.len() as u64);
        BlockHeader::SIZE
            + count.len()
            + self
                .transactions
                .iter()
                .map(Transaction::serialized_size)
                .sum::<usize>()
    }

    pub fn generate_merkle_root(transactions: &[Transaction]) -> Hash {
        merkle_root(transactions.iter().map(Transaction::hash).collect())
    }
}

/// Unspent-output state as seen through a UTXO view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputState {
    pub output: TransactionOutput,
    /// Height of the block that created the output
    pub height: Natural,
    pub coinbase: bool,
    pub spent: bool,
}

impl OutputState {
    pub fn unspent(output: TransactionOutput, height: Natural, coinbase: bool) -> Self {
        Self {
            output,
            height,
            coinbase,
            spent: false,
        }
    }
}

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult<T = ()> {
    Valid(T),
    Invalid(crate::error::Rejection),
}

impl<T> ValidationResult<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ValidationResult<U> {
        match self {
            ValidationResult::Valid(value) => ValidationResult::Valid(f(value)),
            ValidationResult::Invalid(rejection) => ValidationResult::Invalid(rejection),
        }
    }

    pub fn rejection(&self) -> Option<&crate::error::Rejection> {
        match self {
            ValidationResult::Valid(_) => None,
            ValidationResult::Invalid(rejection) => Some(rejection),
        }
    }
}

pub fn double_sha256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Pairwise double-SHA256 tree; an odd level duplicates its last leaf.
pub fn merkle_root(mut level: Vec<Hash>) -> Hash {
    if level.is_empty() {
        return NULL_HASH;
    }

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        level = level
            .chunks(2)
            .map(|pair| {
                let mut concat = [0u8; 64];
                concat[..32].copy_from_slice(&pair[0]);
                concat[32..].copy_from_slice(&pair[1]);
                double_sha256(&concat)
            })
            .collect();
    }

    level[0]
}

/// Hex of a hash in display (reversed) byte order
pub fn encode_hash(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

fn write_compact_size(bytes: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => bytes.push(value as u8),
        0xfd..=0xffff => {
            bytes.push(0xfd);
            bytes.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            bytes.push(0xfe);
            bytes.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            bytes.push(0xff);
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
}
