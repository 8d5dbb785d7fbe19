//! Feature switches that change with the chain's protocol revision.

use borsh::{BorshDeserialize, BorshSerialize};

/// A set of protocol feature flags.
///
/// The execution engine decides which revision is active at each height; the core only reads the
/// flags that influence data formats it owns (receipts, logs blooms) and the transactions it accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Revision(u32);

impl Revision {
    /// Event logs are stored in a merkle trie referenced by the receipt (receipt v2 and later).
    pub const MPT_ON_EVENTS: u32 = 1;
    /// Logs bloom parts are hashed as `sha3(hex(sha256(part)))`.
    pub const LEGACY_LOGS_BLOOM: u32 = 1 << 1;
    /// The emitting address is added to the logs bloom.
    pub const LOGS_BLOOM_ADDRESS: u32 = 1 << 2;
    /// Double-sign report transactions are accepted.
    pub const DOUBLE_SIGN_REPORT: u32 = 1 << 3;

    /// Every flag set.
    pub const LATEST: Revision =
        Revision(Self::MPT_ON_EVENTS | Self::LOGS_BLOOM_ADDRESS | Self::DOUBLE_SIGN_REPORT);

    pub const fn new(flags: u32) -> Revision {
        Revision(flags)
    }

    pub const fn flags(&self) -> u32 {
        self.0
    }

    pub const fn with(self, flag: u32) -> Revision {
        Revision(self.0 | flag)
    }

    pub const fn without(self, flag: u32) -> Revision {
        Revision(self.0 & !flag)
    }

    pub const fn use_mpt_on_events(&self) -> bool {
        self.0 & Self::MPT_ON_EVENTS != 0
    }

    pub const fn legacy_logs_bloom(&self) -> bool {
        self.0 & Self::LEGACY_LOGS_BLOOM != 0
    }

    pub const fn logs_bloom_includes_address(&self) -> bool {
        self.0 & Self::LOGS_BLOOM_ADDRESS != 0
    }

    pub const fn double_sign_report_enabled(&self) -> bool {
        self.0 & Self::DOUBLE_SIGN_REPORT != 0
    }
}
