//! Consensus and policy constants

/// Base units per coin
pub const COIN: u64 = 100_000_000;

/// Maximum money supply: 21,000,000 coins in base units
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Maximum serialized block size: 1MB
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Maximum signature operations per block
pub const MAX_BLOCK_SIGOPS: usize = MAX_BLOCK_SIZE / 50;

/// Maximum transaction size is bounded by the block size
pub const MAX_TX_SIZE: usize = MAX_BLOCK_SIZE;

/// Coinbase input script length bounds
pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;

/// Legacy sigop weight of a bare CHECKMULTISIG
pub const MULTISIG_DEFAULT_SIGOPS: usize = 20;

/// Blocks before a coinbase output may be spent
pub const COINBASE_MATURITY: u64 = 100;

/// Halving interval: 210,000 blocks
pub const HALVING_INTERVAL: u64 = 210_000;

/// Initial block subsidy: 50 coins
pub const INITIAL_SUBSIDY: u64 = 50 * COIN;

/// Target time per block: 10 minutes
pub const TARGET_TIME_PER_BLOCK: u64 = 600;

/// Retarget timespan: 2 weeks
pub const TARGET_TIMESPAN: u64 = 14 * 24 * 60 * 60;

/// Difficulty adjustment interval: 2016 blocks
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = TARGET_TIMESPAN / TARGET_TIME_PER_BLOCK;

/// Retarget clamp factor
pub const RETARGETING_FACTOR: u64 = 4;

/// Mainnet proof-of-work limit in compact form
pub const MAINNET_POW_LIMIT: u32 = 0x1d00ffff;

/// Regtest proof-of-work limit: roughly every other hash satisfies it
pub const REGTEST_POW_LIMIT: u32 = 0x207fffff;

/// Headers sampled for the median time past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// How far a block timestamp may run ahead of local time: 2 hours
pub const MAX_FUTURE_BLOCK_TIME: u32 = 2 * 60 * 60;

/// Lock time threshold: below this the lock time is a block height
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Default orphan block pool capacity
pub const DEFAULT_BLOCK_POOL_CAPACITY: usize = 50;

/// Default transaction pool capacity (entries)
pub const DEFAULT_TRANSACTION_POOL_CAPACITY: usize = 2000;

/// Default transaction pool capacity (bytes)
pub const DEFAULT_TRANSACTION_POOL_BYTES: usize = 300 * MAX_BLOCK_SIZE;

/// Default minimum relay fee rate near capacity, base units per 1000 bytes
pub const DEFAULT_MINIMUM_FEE_RATE: u64 = 1000;

/// Maximum standard script size
pub const MAX_STANDARD_SCRIPT_SIZE: usize = 10_000;

/// Maximum standard transaction size
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;
