use std::collections::{HashMap, VecDeque};

use log::trace;
use parking_lot::Mutex;

use crate::common::config::FrameId;

/// Bookkeeping for one tracked frame.
struct LruKNode {
    /// Recent access timestamps, newest first. Capped at k entries.
    history: VecDeque<u64>,
    /// Total accesses recorded so far.
    count: usize,
    evictable: bool,
    /// Timestamp of the k-th most recent access; `None` while count < k.
    k_timestamp: Option<u64>,
}

struct ReplacerState {
    nodes: HashMap<FrameId, LruKNode>,
    /// Frames with fewer than k accesses, in first-access order
    /// (front = oldest). These all have an infinite backward k-distance.
    young: VecDeque<FrameId>,
    /// Frames with at least k accesses, ordered by k-th-back timestamp
    /// ascending (front = largest backward k-distance).
    mature: Vec<FrameId>,
    current_timestamp: u64,
    /// Number of evictable tracked frames.
    evictable_count: usize,
}

/// LRU-K page replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance:
/// the difference between now and the k-th most recent access. Frames with
/// fewer than k recorded accesses have infinite distance and are preferred,
/// ties among them broken by classical LRU on the earliest access.
pub struct LruKReplacer {
    capacity: usize,
    k: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            capacity,
            k,
            state: Mutex::new(ReplacerState {
                nodes: HashMap::with_capacity(capacity),
                young: VecDeque::new(),
                mature: Vec::new(),
                current_timestamp: 0,
                evictable_count: 0,
            }),
        }
    }

    /// Record an access to `frame_id` at the next logical timestamp.
    ///
    /// A frame seen for the first time starts out non-evictable.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(frame_id < self.capacity, "frame id {} out of range", frame_id);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.current_timestamp += 1;
        let now = state.current_timestamp;
        let k = self.k;

        match state.nodes.get_mut(&frame_id) {
            None => {
                let mut history = VecDeque::with_capacity(k);
                history.push_front(now);
                let mut node = LruKNode {
                    history,
                    count: 1,
                    evictable: false,
                    k_timestamp: None,
                };
                if k == 1 {
                    node.k_timestamp = Some(now);
                    state.nodes.insert(frame_id, node);
                    Self::insert_mature(state, frame_id, now);
                } else {
                    state.nodes.insert(frame_id, node);
                    state.young.push_back(frame_id);
                }
            }
            Some(node) => {
                node.count += 1;
                node.history.push_front(now);
                if node.count == k {
                    // Graduates from the young list into the mature list.
                    let k_ts = *node.history.back().unwrap();
                    node.k_timestamp = Some(k_ts);
                    if let Some(pos) = state.young.iter().position(|&f| f == frame_id) {
                        state.young.remove(pos);
                    }
                    Self::insert_mature(state, frame_id, k_ts);
                } else if node.count > k {
                    // Drop the oldest remembered access and re-rank.
                    node.history.pop_back();
                    let k_ts = *node.history.back().unwrap();
                    node.k_timestamp = Some(k_ts);
                    if let Some(pos) = state.mature.iter().position(|&f| f == frame_id) {
                        state.mature.remove(pos);
                    }
                    Self::insert_mature(state, frame_id, k_ts);
                }
                // Below k accesses the young list keeps first-access order.
            }
        }
    }

    /// Keep `mature` sorted ascending by k-th-back timestamp.
    fn insert_mature(state: &mut ReplacerState, frame_id: FrameId, k_ts: u64) {
        let pos = state
            .mature
            .iter()
            .position(|f| state.nodes[f].k_timestamp.unwrap() > k_ts)
            .unwrap_or(state.mature.len());
        state.mature.insert(pos, frame_id);
    }

    /// Toggle whether a frame may be chosen as a victim. Unknown frames are
    /// ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(node) = state.nodes.get_mut(&frame_id) {
            if node.evictable != evictable {
                node.evictable = evictable;
                if evictable {
                    state.evictable_count += 1;
                } else {
                    state.evictable_count -= 1;
                }
            }
        }
    }

    /// Pick and forget a victim frame, or `None` when nothing is evictable.
    ///
    /// Young frames (infinite distance) are scanned oldest-first; then the
    /// mature list is scanned in ascending k-th-back timestamp order.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        let victim = state
            .young
            .iter()
            .copied()
            .find(|f| state.nodes[f].evictable)
            .or_else(|| {
                state
                    .mature
                    .iter()
                    .copied()
                    .find(|f| state.nodes[f].evictable)
            })?;

        Self::untrack(&mut state, victim);
        state.evictable_count -= 1;
        trace!("evict: frame {} chosen as victim", victim);
        Some(victim)
    }

    /// Forget a frame regardless of its distance. No-op when untracked;
    /// panics if the frame is currently pinned (non-evictable).
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let Some(node) = state.nodes.get(&frame_id) else {
            return;
        };
        assert!(
            node.evictable,
            "attempted to remove non-evictable frame {}",
            frame_id
        );
        Self::untrack(&mut state, frame_id);
        state.evictable_count -= 1;
    }

    fn untrack(state: &mut ReplacerState, frame_id: FrameId) {
        let node = state.nodes.remove(&frame_id).unwrap();
        if node.k_timestamp.is_some() {
            if let Some(pos) = state.mature.iter().position(|&f| f == frame_id) {
                state.mature.remove(pos);
            }
        } else if let Some(pos) = state.young.iter().position(|&f| f == frame_id) {
            state.young.remove(pos);
        }
    }

    /// Number of evictable frames currently tracked.
    pub fn size(&self) -> usize {
        self.state.lock().evictable_count
    }
}
