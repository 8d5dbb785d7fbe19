/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blocks: the header codec, the body, legacy decoding, stream reading, and verification.
//!
//! Only version 2 blocks are produced. A version 2 block data stream is the borsh encoding of the
//! [`BlockHeader`](header::BlockHeader) followed by that of the [`BlockBody`](body::BlockBody); the
//! block ID is the SHA3-256 hash of the header's encoding. Versions 0 and 1 are legacy JSON blocks
//! that can be [read](reader) but not produced.

pub mod header;

pub mod body;

pub mod block;

pub mod legacy;

pub mod reader;

pub mod verifier;

pub use self::block::Block;
