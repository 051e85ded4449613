//! Sync tracing owned by a binding.

use std::collections::VecDeque;

use smol_str::SmolStr;

const DEFAULT_CAPACITY: usize = 256;

/// Direction of a recorded sync pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncDirection {
    LocalToShared,
    SharedToLocal,
}

/// Summary of one sync pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncTrace {
    pub direction: SyncDirection,
    /// Commit origin for local passes, batch origin for remote ones.
    pub origin: SmolStr,
    /// Shared writes (local passes) or editor nodes touched (remote passes).
    pub changes: usize,
}

/// Bounded ring of recent sync traces.
///
/// Passed to [`crate::Binding::new`]; a disabled context records nothing.
#[derive(Clone, Debug)]
pub struct DebugContext {
    enabled: bool,
    capacity: usize,
    traces: VecDeque<SyncTrace>,
}

impl Default for DebugContext {
    fn default() -> Self {
        Self::disabled()
    }
}

impl DebugContext {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            capacity: DEFAULT_CAPACITY,
            traces: VecDeque::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, direction: SyncDirection, origin: &str, changes: usize) {
        if !self.enabled {
            return;
        }
        tracing::debug!(?direction, origin, changes, "sync pass");
        if self.traces.len() == self.capacity {
            self.traces.pop_front();
        }
        self.traces.push_back(SyncTrace {
            direction,
            origin: origin.into(),
            changes,
        });
    }

    pub fn traces(&self) -> impl Iterator<Item = &SyncTrace> {
        self.traces.iter()
    }

    pub fn clear(&mut self) {
        self.traces.clear();
    }
}
