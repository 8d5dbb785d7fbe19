/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via
//! [`BlockManagerConfiguration::log_events`](crate::config::BlockManagerConfiguration::log_events)
//! or [`SyncConfiguration::log_events`](crate::config::SyncConfiguration::log_events).
//!
//! The crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [FinalizeBlock](crate::events::FinalizeBlockEvent) is printed:
//!
//! ```text
//! FinalizeBlock, 1701329264, fNGCJyk, 12
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the block ID.
//! - The fourth value is the height of the block.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const IMPORT_BLOCK: &str = "ImportBlock";
pub const PROPOSE_BLOCK: &str = "ProposeBlock";
pub const FINALIZE_BLOCK: &str = "FinalizeBlock";
pub const CANCEL_TASK: &str = "CancelTask";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";
pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";
pub const SEND_SYNC_RESPONSE: &str = "SendSyncResponse";
pub const PEER_TIMEOUT: &str = "PeerTimeout";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ImportBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |import_block_event: &ImportBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                IMPORT_BLOCK,
                secs_since_unix_epoch(import_block_event.timestamp),
                first_seven_base64_chars(import_block_event.block.as_slice()),
                import_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_block_event: &ProposeBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PROPOSE_BLOCK,
                secs_since_unix_epoch(propose_block_event.timestamp),
                first_seven_base64_chars(propose_block_event.block.as_slice()),
                propose_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_block_event: &FinalizeBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FINALIZE_BLOCK,
                secs_since_unix_epoch(finalize_block_event.timestamp),
                first_seven_base64_chars(finalize_block_event.block.as_slice()),
                finalize_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for CancelTaskEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |cancel_task_event: &CancelTaskEvent| {
            log::info!(
                "{}, {}, {:?}, {}",
                CANCEL_TASK,
                secs_since_unix_epoch(cancel_task_event.timestamp),
                cancel_task_event.task,
                first_seven_base64_chars(cancel_task_event.block.as_slice())
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_sync_event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(start_sync_event.timestamp),
                optional_hash(start_sync_event.state_hash.as_ref().map(|hash| hash.as_slice())),
                optional_hash(start_sync_event.validators_hash.as_ref().map(|hash| hash.as_slice()))
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_sync_event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(end_sync_event.timestamp),
                optional_hash(end_sync_event.state_hash.as_ref().map(|hash| hash.as_slice())),
                end_sync_event.fetched,
                end_sync_event.completed
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_sync_request_event: &ReceiveSyncRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_SYNC_REQUEST,
                secs_since_unix_epoch(receive_sync_request_event.timestamp),
                first_seven_base64_chars(&receive_sync_request_event.peer.to_bytes()),
                receive_sync_request_event.request_id,
                receive_sync_request_event.hashes
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendSyncResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_sync_response_event: &SendSyncResponseEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                SEND_SYNC_RESPONSE,
                secs_since_unix_epoch(send_sync_response_event.timestamp),
                first_seven_base64_chars(&send_sync_response_event.peer.to_bytes()),
                send_sync_response_event.request_id,
                send_sync_response_event.status
            )
        };
        Box::new(logger)
    }
}

impl Logger for PeerTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |peer_timeout_event: &PeerTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PEER_TIMEOUT,
                secs_since_unix_epoch(peer_timeout_event.timestamp),
                first_seven_base64_chars(&peer_timeout_event.peer.to_bytes()),
                peer_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn optional_hash(bytes: Option<&[u8]>) -> String {
    bytes.map_or_else(|| String::from("-"), first_seven_base64_chars)
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviates_to_seven_chars() {
        assert_eq!(first_seven_base64_chars(&[0u8; 32]), "AAAAAAA");
        assert_eq!(first_seven_base64_chars(&[0xff]), "/w");
        assert_eq!(optional_hash(None), "-");
    }
}
