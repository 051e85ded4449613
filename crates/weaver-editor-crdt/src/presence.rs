//! Ephemeral per-peer presence: cursors, names and colours.
//!
//! Presence is never persisted. Each peer broadcasts its state with a
//! monotonically increasing clock; entries that are not refreshed within the
//! timeout are dropped, so peers that disappear need no leave message.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use web_time::Instant;

use crate::error::CrdtError;
use crate::position::PositionRef;

/// Predefined collaborator colours (pastel-ish for readability).
const COLLABORATOR_COLORS: [u32; 8] = [
    0xFF6B6BFF, // Red
    0x4ECDC4FF, // Teal
    0xFFE66DFF, // Yellow
    0x95E1D3FF, // Mint
    0xF38181FF, // Coral
    0xAA96DAFF, // Purple
    0xFCBF49FF, // Orange
    0x2EC4B6FF, // Cyan
];

/// Default cursor colour (RGBA) for a peer.
pub fn color_for_peer(peer: u64) -> u32 {
    COLLABORATOR_COLORS[(peer % COLLABORATOR_COLORS.len() as u64) as usize]
}

/// What a peer tells others about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub anchor_pos: Option<PositionRef>,
    pub focus_pos: Option<PositionRef>,
    pub name: SmolStr,
    /// Cursor colour (RGBA).
    pub color: u32,
    /// Whether the peer's editor has focus.
    pub focusing: bool,
    /// Free-form extras (avatar, role, ...).
    pub awareness_data: BTreeMap<SmolStr, SmolStr>,
}

impl UserState {
    pub fn new(name: impl Into<SmolStr>, color: u32) -> Self {
        Self {
            anchor_pos: None,
            focus_pos: None,
            name: name.into(),
            color,
            focusing: false,
            awareness_data: BTreeMap::new(),
        }
    }
}

/// Wire message: one peer's state at one clock tick. `state: None` means
/// the peer left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub peer: u64,
    pub clock: u64,
    pub state: Option<UserState>,
}

impl PresenceUpdate {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CrdtError> {
        Ok(postcard::to_stdvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CrdtError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Result of applying a presence message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    Updated(u64),
    Removed(u64),
    /// Stale clock, own peer id, or nothing to remove.
    Ignored,
}

#[derive(Debug, Clone)]
struct PresenceEntry {
    clock: u64,
    state: UserState,
    updated_at: Instant,
}

/// Tracks the local state and every known remote peer's state.
#[derive(Debug, Clone)]
pub struct PresenceStore {
    local_peer: u64,
    local: Option<UserState>,
    clock: u64,
    timeout: Duration,
    peers: HashMap<u64, PresenceEntry>,
    /// Last clock seen per peer, kept after removal to reject replays.
    clocks: HashMap<u64, u64>,
}

impl PresenceStore {
    /// Create a new presence store for `local_peer`.
    pub fn new(local_peer: u64, timeout: Duration) -> Self {
        Self {
            local_peer,
            local: None,
            clock: 0,
            timeout,
            peers: HashMap::new(),
            clocks: HashMap::new(),
        }
    }

    pub fn local_peer(&self) -> u64 {
        self.local_peer
    }

    pub fn local_state(&self) -> Option<&UserState> {
        self.local.as_ref()
    }

    /// Replace the local state and produce the message announcing it.
    pub fn set_local_state(&mut self, state: Option<UserState>) -> PresenceUpdate {
        self.clock += 1;
        self.local = state.clone();
        PresenceUpdate {
            peer: self.local_peer,
            clock: self.clock,
            state,
        }
    }

    /// Apply a decoded message received at `now`.
    pub fn apply_at(&mut self, update: PresenceUpdate, now: Instant) -> PresenceChange {
        if update.peer == self.local_peer {
            return PresenceChange::Ignored;
        }
        if self
            .clocks
            .get(&update.peer)
            .is_some_and(|last| *last >= update.clock)
        {
            tracing::trace!(peer = update.peer, clock = update.clock, "ignoring stale presence");
            return PresenceChange::Ignored;
        }
        self.clocks.insert(update.peer, update.clock);
        match update.state {
            Some(state) => {
                self.peers.insert(
                    update.peer,
                    PresenceEntry {
                        clock: update.clock,
                        state,
                        updated_at: now,
                    },
                );
                PresenceChange::Updated(update.peer)
            }
            None => match self.peers.remove(&update.peer) {
                Some(_) => PresenceChange::Removed(update.peer),
                None => PresenceChange::Ignored,
            },
        }
    }

    /// Decode and apply a wire message.
    pub fn apply(&mut self, bytes: &[u8]) -> Result<PresenceChange, CrdtError> {
        let update = PresenceUpdate::from_bytes(bytes)?;
        Ok(self.apply_at(update, Instant::now()))
    }

    /// Drop peers not refreshed within the timeout, as of `now`.
    pub fn remove_outdated_at(&mut self, now: Instant) -> Vec<u64> {
        let timeout = self.timeout;
        let expired: Vec<u64> = self
            .peers
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.updated_at) > timeout)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &expired {
            tracing::debug!(peer, "presence expired");
            self.peers.remove(peer);
        }
        expired
    }

    pub fn remove_outdated(&mut self) -> Vec<u64> {
        self.remove_outdated_at(Instant::now())
    }

    /// Remote peers and their states.
    pub fn states(&self) -> impl Iterator<Item = (u64, &UserState)> {
        self.peers.iter().map(|(peer, entry)| (*peer, &entry.state))
    }

    pub fn get(&self, peer: u64) -> Option<&UserState> {
        self.peers.get(&peer).map(|e| &e.state)
    }

    pub fn clock_of(&self, peer: u64) -> Option<u64> {
        self.peers.get(&peer).map(|e| e.clock)
    }

    /// Number of remote peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(peer: u64, clock: u64, name: &str) -> PresenceUpdate {
        PresenceUpdate {
            peer,
            clock,
            state: Some(UserState::new(name, color_for_peer(peer))),
        }
    }

    #[test]
    fn test_wire_roundtrip() {
        let mut state = UserState::new("ana", 0x4ECDC4FF);
        state.focusing = true;
        state.awareness_data.insert("role".into(), "editor".into());
        let msg = PresenceUpdate {
            peer: 7,
            clock: 3,
            state: Some(state),
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(PresenceUpdate::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_stale_clock_ignored() {
        let mut store = PresenceStore::new(1, Duration::from_secs(30));
        let now = Instant::now();
        assert_eq!(store.apply_at(update(2, 5, "new"), now), PresenceChange::Updated(2));
        assert_eq!(store.apply_at(update(2, 4, "old"), now), PresenceChange::Ignored);
        assert_eq!(store.get(2).map(|s| s.name.as_str()), Some("new"));
        assert_eq!(store.clock_of(2), Some(5));
    }

    #[test]
    fn test_own_updates_ignored() {
        let mut store = PresenceStore::new(1, Duration::from_secs(30));
        let own = store.set_local_state(Some(UserState::new("me", 0)));
        assert_eq!(store.apply_at(own, Instant::now()), PresenceChange::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn test_expiry() {
        let mut store = PresenceStore::new(1, Duration::from_secs(30));
        let start = Instant::now();
        store.apply_at(update(2, 1, "a"), start);
        store.apply_at(update(3, 1, "b"), start + Duration::from_secs(20));

        let expired = store.remove_outdated_at(start + Duration::from_secs(31));
        assert_eq!(expired, vec![2]);
        assert_eq!(store.len(), 1);
        assert!(store.get(3).is_some());
    }

    #[test]
    fn test_explicit_leave() {
        let mut store = PresenceStore::new(1, Duration::from_secs(30));
        let now = Instant::now();
        store.apply_at(update(2, 1, "a"), now);
        let leave = PresenceUpdate {
            peer: 2,
            clock: 2,
            state: None,
        };
        assert_eq!(store.apply_at(leave, now), PresenceChange::Removed(2));
        // a replayed older message must not resurrect the peer
        assert_eq!(store.apply_at(update(2, 1, "a"), now), PresenceChange::Ignored);
        assert!(store.is_empty());
    }
}
