//! Per-document presence map: `clientId -> {state, clock,
//! lastSeen}`, last-write-wins by strictly-higher clock, 30s offline timeout.

use crate::frame::AwarenessFrame;
use nahma_model::PeerId;
use std::collections::HashMap;

const OFFLINE_AFTER_MS: u64 = 30_000;

#[derive(Debug, Clone)]
struct Entry {
    state: Option<Vec<u8>>,
    clock: u64,
    last_seen_ms: u64,
}

/// One document's awareness map, owned by a single local client.
pub struct AwarenessState {
    local: PeerId,
    local_clock: u64,
    entries: HashMap<PeerId, Entry>,
}

impl AwarenessState {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            local_clock: 0,
            entries: HashMap::new(),
        }
    }

    /// Sets (or tombstones, with `state = None`) the local presence record,
    /// bumping the local clock, and returns the frame to broadcast.
    pub fn set_local(&mut self, state: Option<Vec<u8>>, now_ms: u64) -> AwarenessFrame {
        self.local_clock += 1;
        self.entries.insert(
            self.local,
            Entry {
                state: state.clone(),
                clock: self.local_clock,
                last_seen_ms: now_ms,
            },
        );
        AwarenessFrame {
            peer: self.local,
            clock: self.local_clock,
            state,
        }
    }

    /// The frame to resend on the periodic 5-second heartbeat, reusing the
    /// current clock (no bump — a resend is not a new mutation).
    pub fn local_heartbeat(&self) -> AwarenessFrame {
        let state = self.entries.get(&self.local).and_then(|e| e.state.clone());
        AwarenessFrame {
            peer: self.local,
            clock: self.local_clock,
            state,
        }
    }

    /// Applies a remote frame. Strictly higher clocks overwrite; equal or
    /// lower clocks are ignored. Returns true if the entry changed.
    pub fn apply_remote(&mut self, frame: &AwarenessFrame, now_ms: u64) -> bool {
        if frame.peer == self.local {
            return false;
        }
        let accept = match self.entries.get(&frame.peer) {
            Some(existing) => frame.clock > existing.clock,
            None => true,
        };
        if accept {
            self.entries.insert(
                frame.peer,
                Entry {
                    state: frame.state.clone(),
                    clock: frame.clock,
                    last_seen_ms: now_ms,
                },
            );
        }
        accept
    }

    /// Drops every record (other than the local one) whose last heartbeat is
    /// older than 30 seconds, returning the evicted peers.
    pub fn evict_offline(&mut self, now_ms: u64) -> Vec<PeerId> {
        let local = self.local;
        let stale: Vec<PeerId> = self
            .entries
            .iter()
            .filter(|(peer, entry)| {
                **peer != local && now_ms.saturating_sub(entry.last_seen_ms) > OFFLINE_AFTER_MS
            })
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &stale {
            self.entries.remove(peer);
        }
        stale
    }

    /// A snapshot view of every live `(peer, state)` pair, tombstones
    /// excluded.
    pub fn view(&self) -> Vec<(PeerId, Vec<u8>)> {
        self.entries
            .iter()
            .filter_map(|(peer, entry)| entry.state.clone().map(|s| (*peer, s)))
            .collect()
    }
}
