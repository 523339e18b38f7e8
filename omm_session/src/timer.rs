use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use omm_types::ChannelId;
use omm_types::Handle;
use rapidhash::RapidHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires unless a refresh disarmed `epoch` first
    RequestTimeout { handle: Handle, epoch: u64 },
    /// Re-routes an item left pending by a timeout, unless it was bound since
    RetryRequest { handle: Handle, epoch: u64 },
    Reconnect { channel: ChannelId },
    PreferredHostCheck,
}

/// Deadline-ordered timers owned by the dispatcher
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    timers: RapidHashMap<u64, TimerKind>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, kind: TimerKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse((at, id)));
        self.timers.insert(id, kind);
        id
    }

    pub fn cancel(&mut self, id: u64) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if self.timers.contains_key(&id) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns every timer due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due = Vec::new();
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            if let Some(kind) = self.timers.remove(&id) {
                due.push(kind);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
