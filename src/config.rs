/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of the block manager and the sync engines.
//!
//! Both structs are built with [typed-builder](typed_builder). Fields with a default can be left out:
//!
//! ```
//! use blockcore_rs::config::BlockManagerConfiguration;
//! use blockcore_rs::types::data_types::NetworkID;
//!
//! let config = BlockManagerConfiguration::builder()
//!     .network_id(NetworkID::new(1))
//!     .build();
//! assert!(!config.log_events);
//! ```

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use typed_builder::TypedBuilder;

use crate::types::data_types::{Address, NetworkID};

/// Source of wall-clock time for block timestamps.
pub trait Clock: Send + Sync {
    /// Microseconds since the unix epoch.
    fn now(&self) -> i64;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_micros() as i64)
            .unwrap_or(0)
    }
}

/// Configuration of a [`BlockManager`](crate::block_manager::BlockManager).
#[derive(Clone, TypedBuilder)]
pub struct BlockManagerConfiguration {
    /// The network this chain belongs to. Stored in the database with the genesis block and checked
    /// on every restart.
    pub network_id: NetworkID,

    /// Whether to print [events](crate::events) as CSV log lines.
    #[builder(default = false)]
    pub log_events: bool,

    /// Clock used for the timestamps of proposed blocks.
    #[builder(default = Arc::new(SystemClock))]
    pub clock: Arc<dyn Clock>,

    /// Encoded normal transactions of the genesis block. Only used when the database is empty.
    #[builder(default)]
    pub genesis_transactions: Vec<Vec<u8>>,

    /// Address written as the proposer of blocks this node proposes.
    #[builder(default)]
    pub proposer: Option<Address>,
}

impl Debug for BlockManagerConfiguration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockManagerConfiguration")
            .field("network_id", &self.network_id)
            .field("log_events", &self.log_events)
            .field("genesis_transactions", &self.genesis_transactions.len())
            .field("proposer", &self.proposer)
            .finish()
    }
}

/// Configuration of the [state sync](crate::state_sync) engines.
#[derive(Clone, Debug, TypedBuilder)]
pub struct SyncConfiguration {
    /// Upper bound on the number of peers a snapshot sync round sends requests to.
    #[builder(default = 10)]
    pub max_peers_for_sync: usize,

    /// Upper bound on the number of hashes in one `RequestNodeData` message.
    #[builder(default = 20)]
    pub max_request_hashes: usize,

    /// How many peers data sync sends requests to per round.
    #[builder(default = 3)]
    pub data_sync_peers: usize,

    /// How long a data sync round waits for replies before starting the next one.
    #[builder(default = Duration::from_secs(3))]
    pub data_sync_round: Duration,

    /// How long a peer has to answer its first request.
    #[builder(default = Duration::from_secs(1))]
    pub request_timeout: Duration,

    /// The timeout a peer's timeout doubles up to after repeated expiries.
    #[builder(default = Duration::from_secs(8))]
    pub max_timeout: Duration,

    /// Whether to print sync [events](crate::events) as CSV log lines.
    #[builder(default = false)]
    pub log_events: bool,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        SyncConfiguration::builder().build()
    }
}
