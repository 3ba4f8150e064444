use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Lanes {
    queues: HashMap<String, VecDeque<usize>>,
    order: Vec<String>,
    cursor: usize,
    closed: bool,
}

/// Pending items of one run, one lane per platform.
///
/// Claims rotate across platforms so a large batch for one platform does not
/// starve the others. Every slot is handed out at most once, either by
/// [`ClaimQueue::claim`] or by [`ClaimQueue::drain`].
#[derive(Debug, Default)]
pub struct ClaimQueue {
    lanes: Mutex<Lanes>,
}

impl ClaimQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, platform: impl Into<String>, slot: usize) {
        let key = platform.into();
        let mut lanes = self.lanes.lock();
        lanes.queues.entry(key.clone()).or_default().push_back(slot);
        if !lanes.order.iter().any(|existing| existing == &key) {
            lanes.order.push(key);
        }
    }

    /// Next slot in round-robin platform order, `None` once empty or closed.
    pub fn claim(&self) -> Option<usize> {
        let mut lanes = self.lanes.lock();
        if lanes.closed || lanes.order.is_empty() {
            return None;
        }

        let len = lanes.order.len();
        let start = lanes.cursor % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            let key = lanes.order[idx].clone();
            let Some(queue) = lanes.queues.get_mut(&key) else {
                continue;
            };
            if let Some(slot) = queue.pop_front() {
                if queue.is_empty() {
                    lanes.queues.remove(&key);
                    lanes.order.remove(idx);
                    let remaining = lanes.order.len();
                    lanes.cursor = if remaining == 0 { 0 } else { idx % remaining };
                } else {
                    lanes.cursor = (idx + 1) % len;
                }
                return Some(slot);
            }
        }
        None
    }

    /// Close the queue and return every slot nobody claimed.
    pub fn drain(&self) -> Vec<usize> {
        let mut lanes = self.lanes.lock();
        lanes.closed = true;
        let order = std::mem::take(&mut lanes.order);
        let mut slots = Vec::new();
        for key in order {
            if let Some(queue) = lanes.queues.remove(&key) {
                slots.extend(queue);
            }
        }
        lanes.cursor = 0;
        slots.sort_unstable();
        slots
    }

    pub fn pending(&self) -> usize {
        self.lanes.lock().queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}
