//! LRU-K page replacement for the buffer pool.

use crate::frame::FrameId;
use std::collections::{HashMap, VecDeque};

/// Per-frame access bookkeeping.
struct LruKNode {
    /// Access timestamps, most recent first, capped at `k`.
    history: VecDeque<u64>,
    is_evictable: bool,
}

/// LRU-K replacement policy.
///
/// Among evictable frames, the victim is the one with the largest
/// backward k-distance: the interval between now and the k-th most
/// recent access. Frames with fewer than k recorded accesses have
/// infinite k-distance and dominate the finite class; among those, the
/// frame with the oldest single access wins (LRU among infinities).
///
/// Timestamps come from one monotonic logical clock bumped on every
/// recorded access, so two accesses never share a timestamp. Residual
/// ties fall back to the smallest frame id.
///
/// Contract violations (unknown frames, removing a non-evictable frame,
/// out-of-range frame ids) indicate a bug in the pool and panic.
///
/// Not internally synchronized: the pool owns the replacer behind its
/// own mutex.
pub struct LruKReplacer {
    /// The K in LRU-K.
    k: usize,
    /// Upper bound on tracked frames (= pool size).
    replacer_size: usize,
    /// Monotonic logical clock.
    current_timestamp: u64,
    /// Access history per tracked frame.
    node_store: HashMap<FrameId, LruKNode>,
    /// Number of evictable frames.
    curr_size: usize,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer for `num_frames` frames.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            k,
            replacer_size: num_frames,
            current_timestamp: 0,
            node_store: HashMap::new(),
            curr_size: 0,
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.replacer_size
    }

    /// Records an access to the given frame at the current timestamp.
    ///
    /// Creates a non-evictable entry on first access. Panics if
    /// `frame_id` is outside the pool.
    pub fn record_access(&mut self, frame_id: FrameId) {
        if frame_id.0 as usize >= self.replacer_size {
            panic!(
                "record_access: {frame_id} outside pool of {} frames",
                self.replacer_size
            );
        }
        self.current_timestamp += 1;
        let timestamp = self.current_timestamp;
        let node = self.node_store.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::new(),
            is_evictable: false,
        });
        node.history.push_front(timestamp);
        if node.history.len() > self.k {
            node.history.pop_back();
        }
    }

    /// Flips the evictable flag of a known frame.
    ///
    /// Panics if the frame is unknown, or if marking it evictable would
    /// exceed the pool size.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let node = self
            .node_store
            .get_mut(&frame_id)
            .unwrap_or_else(|| panic!("set_evictable: unknown {frame_id}"));
        if node.is_evictable == evictable {
            return;
        }
        if evictable {
            if self.curr_size == self.replacer_size {
                panic!("set_evictable: evictable count would exceed pool size");
            }
            self.curr_size += 1;
        } else {
            self.curr_size -= 1;
        }
        node.is_evictable = evictable;
    }

    /// Selects and removes a victim frame per the LRU-K policy.
    ///
    /// Returns `None` when no frame is evictable.
    pub fn evict(&mut self) -> Option<FrameId> {
        let now = self.current_timestamp;
        let mut victim: Option<FrameId> = None;
        let mut victim_infinite = false;
        // Oldest single access for the infinite class, k-distance for
        // the finite class.
        let mut victim_key = 0u64;

        for (&frame_id, node) in &self.node_store {
            if !node.is_evictable {
                continue;
            }
            let oldest = *node.history.back().expect("tracked frame has history");
            let infinite = node.history.len() < self.k;
            let better = match victim {
                None => true,
                Some(current) => {
                    if infinite != victim_infinite {
                        infinite
                    } else if infinite {
                        oldest < victim_key || (oldest == victim_key && frame_id.0 < current.0)
                    } else {
                        let distance = now - oldest;
                        distance > victim_key || (distance == victim_key && frame_id.0 < current.0)
                    }
                }
            };
            if better {
                victim = Some(frame_id);
                victim_infinite = infinite;
                victim_key = if infinite { oldest } else { now - oldest };
            }
        }

        if let Some(frame_id) = victim {
            self.node_store.remove(&frame_id);
            self.curr_size -= 1;
        }
        victim
    }

    /// Erases a known evictable frame; no-op for unknown frames.
    ///
    /// Panics if the frame is tracked but not evictable.
    pub fn remove(&mut self, frame_id: FrameId) {
        match self.node_store.get(&frame_id) {
            None => {}
            Some(node) if !node.is_evictable => {
                panic!("remove: {frame_id} is not evictable")
            }
            Some(_) => {
                self.node_store.remove(&frame_id);
                self.curr_size -= 1;
            }
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.curr_size
    }
}
