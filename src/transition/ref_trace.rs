//! Reference tracing for the transition tree.
//!
//! When enabled, the tree counts the transitions it creates and disposes and can report every live
//! transition together with its handle and child counts. It exists to find leaked handles.

use super::tree::{Phase, TransitionId};

/// One live transition in a [`trace_report`](super::tree::TransitionTree::trace_report).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub transition: TransitionId,
    pub kind: &'static str,
    pub phase: Phase,
    pub sync: bool,
    pub handles: usize,
    pub children: usize,
}

#[derive(Debug, Default)]
pub(crate) struct RefTrace {
    enabled: bool,
    created: u64,
    disposed: u64,
}

impl RefTrace {
    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.created = 0;
        self.disposed = 0;
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn on_create(&mut self, id: TransitionId, kind: &'static str) {
        if self.enabled {
            self.created += 1;
            log::debug!("trace: create {:?} ({}), {} live", id, kind, self.live());
        }
    }

    pub(crate) fn on_dispose(&mut self, id: TransitionId) {
        if self.enabled {
            self.disposed += 1;
            log::debug!("trace: dispose {:?}, {} live", id, self.live());
        }
    }

    /// Transitions created minus transitions disposed since tracing was enabled.
    pub(crate) fn live(&self) -> i64 {
        self.created as i64 - self.disposed as i64
    }
}
