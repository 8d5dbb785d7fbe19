//! Read-only support for legacy JSON blocks (versions 0 and 1).
//!
//! A legacy block is a JSON object:
//!
//! ```text
//! {"version": "0.1a", "prev_block_hash": "<hex>", "merkle_tree_root_hash": "<hex>",
//!  "confirmed_transaction_list": [...], "block_hash": "<hex>", "height": 1,
//!  "peer_id": "hx..", "time_stamp": 1516498781094429, "signature": "<base64>"}
//! ```
//!
//! Version 0 blocks carry the version string `0.1a`; any other string is version 1. Legacy blocks
//! are decoded and identified but never produced.

use serde::Deserialize;
use serde_json::Value;

use crate::{
    errors::{CoreError, ErrorKind},
    transaction::{factory::FactoryRegistry, transaction_list::TransactionList},
    types::{
        crypto_primitives::sha3_256,
        data_types::{Address, BlockHeight, CryptoHash},
    },
};

use super::header::{VERSION_0, VERSION_1};

pub const VERSION_0_STRING: &str = "0.1a";

#[derive(Clone, Debug, PartialEq)]
pub struct LegacyBlock {
    version: u32,
    version_string: String,
    height: BlockHeight,
    timestamp: i64,
    prev_block_hash: Vec<u8>,
    merkle_tree_root_hash: Vec<u8>,
    block_hash: Vec<u8>,
    peer_id: Option<Address>,
    signature: Option<String>,
    transactions: Vec<Value>,
}

/// The fields of a legacy block as they appear in JSON.
#[derive(Deserialize)]
struct LegacyJson {
    version: String,
    height: u64,
    time_stamp: i64,
    #[serde(default)]
    prev_block_hash: Option<String>,
    #[serde(default)]
    merkle_tree_root_hash: Option<String>,
    #[serde(default)]
    block_hash: Option<String>,
    #[serde(default)]
    peer_id: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    confirmed_transaction_list: Option<Vec<Value>>,
}

fn invalid(msg: impl Into<String>) -> CoreError {
    ErrorKind::InvalidFormat.error(msg)
}

fn hex_field(value: Option<String>, key: &str) -> Result<Vec<u8>, CoreError> {
    match value {
        None => Ok(Vec::new()),
        Some(s) => hex::decode(s.strip_prefix("0x").unwrap_or(&s))
            .map_err(|_| invalid(format!("{} is not hex", key))),
    }
}

impl LegacyBlock {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<LegacyBlock, CoreError> {
        let json: LegacyJson =
            serde_json::from_slice(bytes).map_err(|err| invalid(format!("legacy block: {}", err)))?;
        let version = if json.version == VERSION_0_STRING {
            VERSION_0
        } else {
            VERSION_1
        };
        let peer_id = match json.peer_id.as_deref() {
            Some(s) if !s.is_empty() => Some(
                s.parse::<Address>()
                    .map_err(|_| invalid(format!("peer_id is not an address: {}", s)))?,
            ),
            _ => None,
        };

        Ok(LegacyBlock {
            version,
            height: BlockHeight::new(json.height),
            timestamp: json.time_stamp,
            prev_block_hash: hex_field(json.prev_block_hash, "prev_block_hash")?,
            merkle_tree_root_hash: hex_field(json.merkle_tree_root_hash, "merkle_tree_root_hash")?,
            block_hash: hex_field(json.block_hash, "block_hash")?,
            peer_id,
            signature: json.signature,
            transactions: json.confirmed_transaction_list.unwrap_or_default(),
            version_string: json.version,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn version_string(&self) -> &str {
        &self.version_string
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn proposer(&self) -> Option<Address> {
        self.peer_id
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// The ID: SHA3-256 of the lowercase hex of the previous block hash, the lowercase hex of the
    /// transactions root, and the little-endian timestamp.
    pub fn id(&self) -> CryptoHash {
        let mut bytes = Vec::with_capacity(128 + 8);
        bytes.extend_from_slice(hex::encode(&self.prev_block_hash).as_bytes());
        bytes.extend_from_slice(hex::encode(&self.merkle_tree_root_hash).as_bytes());
        bytes.extend_from_slice(&(self.timestamp as u64).to_le_bytes());
        sha3_256(&bytes)
    }

    pub fn prev_id(&self) -> Option<CryptoHash> {
        CryptoHash::from_slice(&self.prev_block_hash)
    }

    /// Check that the `block_hash` the block claims is its ID.
    pub fn verify_hash(&self) -> bool {
        self.block_hash.as_slice() == self.id().as_slice()
    }

    pub fn transactions(&self, registry: &FactoryRegistry) -> Result<TransactionList, CoreError> {
        let bytes_list = self
            .transactions
            .iter()
            .map(|tx| serde_json::to_vec(tx).map_err(|err| invalid(err.to_string())))
            .collect::<Result<Vec<Vec<u8>>, CoreError>>()?;
        Ok(TransactionList::from_bytes_list(registry, &bytes_list)?)
    }
}
