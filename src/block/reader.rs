//! Decoding block data streams.
//!
//! A stream holds one block. Its version is peeked before decoding: a stream starting with `{` is a
//! legacy JSON block, anything else starts with the little-endian `u32` version of a header.

use std::io::Read;

use borsh::BorshDeserialize;

use crate::{
    errors::{CoreError, ErrorKind},
    transaction::factory::FactoryRegistry,
    types::data_types::{BlockHeight, CryptoHash},
};

use super::{
    block::Block,
    body::BlockBody,
    header::{peek_version, BlockHeader, VERSION_2},
    legacy::LegacyBlock,
};

/// A block of any version.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockData {
    Legacy(LegacyBlock),
    Current(Block),
}

impl BlockData {
    pub fn id(&self) -> CryptoHash {
        match self {
            BlockData::Legacy(block) => block.id(),
            BlockData::Current(block) => block.id(),
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            BlockData::Legacy(block) => block.version(),
            BlockData::Current(block) => block.version(),
        }
    }

    pub fn height(&self) -> BlockHeight {
        match self {
            BlockData::Legacy(block) => block.height(),
            BlockData::Current(block) => block.height(),
        }
    }

    pub fn prev_id(&self) -> Option<CryptoHash> {
        match self {
            BlockData::Legacy(block) => block.prev_id(),
            BlockData::Current(block) => block.prev_id(),
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            BlockData::Legacy(block) => block.timestamp(),
            BlockData::Current(block) => block.timestamp(),
        }
    }
}

/// Version of the block in a stream's leading bytes.
pub fn stream_version(bytes: &[u8]) -> Result<u32, CoreError> {
    match bytes.first() {
        Some(b'{') => {
            let legacy = LegacyBlock::from_json_bytes(bytes)?;
            Ok(legacy.version())
        }
        _ => peek_version(bytes)
            .ok_or_else(|| ErrorKind::InvalidFormat.error("block stream is too short")),
    }
}

/// Decode the block data in `bytes`.
pub fn decode_block_data(bytes: &[u8], registry: &FactoryRegistry) -> Result<BlockData, CoreError> {
    if bytes.first() == Some(&b'{') {
        return Ok(BlockData::Legacy(LegacyBlock::from_json_bytes(bytes)?));
    }
    let version = stream_version(bytes)?;
    if version != VERSION_2 {
        return Err(ErrorKind::InvalidFormat.error(format!("unknown block version {}", version)));
    }
    let mut rest = bytes;
    let header = BlockHeader::deserialize(&mut rest)?;
    let body = BlockBody::deserialize(&mut rest)?;
    if !rest.is_empty() {
        return Err(ErrorKind::InvalidFormat.error(format!(
            "{} trailing bytes after block body",
            rest.len()
        )));
    }
    Ok(BlockData::Current(Block::from_parts(header, body, registry)?))
}

/// Read one block data stream from `reader`.
pub fn read_block_data<R: Read>(
    reader: &mut R,
    registry: &FactoryRegistry,
) -> Result<BlockData, CoreError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode_block_data(&bytes, registry)
}

/// Read one block data stream from `reader`, rejecting legacy blocks.
pub fn read_block<R: Read>(reader: &mut R, registry: &FactoryRegistry) -> Result<Block, CoreError> {
    match read_block_data(reader, registry)? {
        BlockData::Current(block) => Ok(block),
        BlockData::Legacy(block) => Err(ErrorKind::Unsupported.error(format!(
            "legacy block version {} cannot be imported",
            block.version()
        ))),
    }
}
