//! Node settings and per-network consensus parameters

use crate::constants::*;
use crate::error::{ChainError, Result};
use crate::types::Hash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Network selection; each variant carries its own consensus parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn params(self) -> ConsensusParams {
        match self {
            Network::Mainnet => ConsensusParams {
                pow_limit: MAINNET_POW_LIMIT,
                retargeting: true,
                bip16_height: 173_805,
                bip34_height: 227_931,
                bip65_height: 388_381,
                bip66_height: 363_725,
                ..ConsensusParams::base()
            },
            Network::Testnet => ConsensusParams {
                pow_limit: MAINNET_POW_LIMIT,
                retargeting: true,
                bip16_height: 514,
                bip34_height: 21_111,
                bip65_height: 581_885,
                bip66_height: 330_776,
                ..ConsensusParams::base()
            },
            Network::Regtest => ConsensusParams {
                pow_limit: REGTEST_POW_LIMIT,
                retargeting: false,
                subsidy_halving_interval: 150,
                bip16_height: 0,
                bip34_height: 1,
                bip65_height: 1,
                bip66_height: 1,
                ..ConsensusParams::base()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Easiest allowed target, compact form
    pub pow_limit: u32,
    pub retargeting: bool,
    pub retarget_interval: u64,
    pub target_timespan: u64,
    pub subsidy_halving_interval: u64,
    pub initial_subsidy: u64,
    pub coinbase_maturity: u64,
    pub max_block_size: usize,
    pub max_block_sigops: usize,
    pub bip16_height: u64,
    pub bip34_height: u64,
    pub bip65_height: u64,
    pub bip66_height: u64,
}

impl ConsensusParams {
    fn base() -> Self {
        Self {
            pow_limit: MAINNET_POW_LIMIT,
            retargeting: true,
            retarget_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
            target_timespan: TARGET_TIMESPAN,
            subsidy_halving_interval: HALVING_INTERVAL,
            initial_subsidy: INITIAL_SUBSIDY,
            coinbase_maturity: COINBASE_MATURITY,
            max_block_size: MAX_BLOCK_SIZE,
            max_block_sigops: MAX_BLOCK_SIGOPS,
            bip16_height: 0,
            bip34_height: 0,
            bip65_height: 0,
            bip66_height: 0,
        }
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Network::Mainnet.params()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum resident transactions
    pub capacity: usize,
    /// Maximum total serialized bytes of resident transactions
    pub max_bytes: usize,
    /// Drop pool entries that conflict with newly confirmed blocks
    pub maintain_consistency: bool,
    /// Base units per 1000 bytes, enforced once the pool is near capacity
    pub minimum_fee_rate: u64,
    /// Occupancy (percent of `capacity`) from which the minimum fee applies
    pub near_capacity_percent: u8,
    pub replace_by_fee: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TRANSACTION_POOL_CAPACITY,
            max_bytes: DEFAULT_TRANSACTION_POOL_BYTES,
            maintain_consistency: true,
            minimum_fee_rate: DEFAULT_MINIMUM_FEE_RATE,
            near_capacity_percent: 90,
            replace_by_fee: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: u64,
    #[serde(serialize_with = "hash_to_hex", deserialize_with = "hash_from_hex")]
    pub hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub network: Network,
    pub consensus: ConsensusParams,
    pub block_pool_capacity: usize,
    pub transaction_pool: PoolSettings,
    pub checkpoints: Vec<Checkpoint>,
    pub max_future_drift_secs: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

impl Settings {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            consensus: network.params(),
            block_pool_capacity: DEFAULT_BLOCK_POOL_CAPACITY,
            transaction_pool: PoolSettings::default(),
            checkpoints: Vec::new(),
            max_future_drift_secs: MAX_FUTURE_BLOCK_TIME,
        }
    }

    pub fn mainnet() -> Self {
        Self::for_network(Network::Mainnet)
    }

    pub fn regtest() -> Self {
        Self::for_network(Network::Regtest)
    }

    /// Parse settings from JSON. Omitted fields take defaults; an omitted
    /// `consensus` section follows the selected network.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let explicit_consensus = value.get("consensus").is_some();
        let mut settings: Settings = serde_json::from_value(value)?;
        if !explicit_consensus {
            settings.consensus = settings.network.params();
        }
        settings.checkpoints.sort_by_key(|checkpoint| checkpoint.height);
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_pool_capacity == 0 {
            return Err(ChainError::Config("block_pool_capacity must be non-zero".to_string()));
        }

        if self.transaction_pool.capacity == 0 || self.transaction_pool.max_bytes == 0 {
            return Err(ChainError::Config("transaction_pool limits must be non-zero".to_string()));
        }

        if self.transaction_pool.near_capacity_percent > 100 {
            return Err(ChainError::Config(format!(
                "near_capacity_percent {} exceeds 100",
                self.transaction_pool.near_capacity_percent
            )));
        }

        if self.consensus.retarget_interval == 0 || self.consensus.target_timespan == 0 {
            return Err(ChainError::Config("retarget parameters must be non-zero".to_string()));
        }

        let mut heights: Vec<u64> = self.checkpoints.iter().map(|c| c.height).collect();
        heights.dedup();
        if heights.len() != self.checkpoints.len() {
            return Err(ChainError::Config("duplicate checkpoint height".to_string()));
        }

        Ok(())
    }

    pub fn checkpoint_at(&self, height: u64) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|checkpoint| checkpoint.height == height)
    }

    pub fn last_checkpoint_height(&self) -> Option<u64> {
        self.checkpoints.iter().map(|checkpoint| checkpoint.height).max()
    }
}

/// Hashes in configuration are written in display (reversed) order.
fn hash_to_hex<S: Serializer>(hash: &Hash, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&crate::types::encode_hash(hash))
}

fn hash_from_hex<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Hash, D::Error> {
    let text = String::deserialize(deserializer)?;
    let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
    let mut hash: Hash = bytes
        .try_into()
        .map_err(|_| serde::de::Error::custom("checkpoint hash must be 32 bytes"))?;
    hash.reverse();
    Ok(hash)
}
