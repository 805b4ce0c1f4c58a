//! Touch id allocator.
//!
//! XInput2 touch ids are large server-assigned numbers. Peers want small,
//! dense indices, so each live touch is mapped to the smallest free slot.

use std::collections::{BTreeSet, HashMap};

use crate::protocol::Window;

/// Default upper bound on simultaneous touches.
pub const DEFAULT_MAX_TOUCHES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TouchRecord {
    slot: usize,
    window: Window,
}

#[derive(Debug)]
pub struct TouchIdAllocator {
    max_touches: usize,
    current_touch_idx: usize,
    free: BTreeSet<usize>,
    live: HashMap<u32, TouchRecord>,
}

impl Default for TouchIdAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOUCHES)
    }
}

impl TouchIdAllocator {
    pub fn new(max_touches: usize) -> Self {
        Self {
            max_touches,
            current_touch_idx: 0,
            free: BTreeSet::new(),
            live: HashMap::new(),
        }
    }

    /// Slot for a new touch. A repeated begin for a live id returns its
    /// existing slot. `None` when every slot is taken.
    pub fn begin(&mut self, touch_id: u32, window: Window) -> Option<usize> {
        if let Some(record) = self.live.get(&touch_id) {
            return Some(record.slot);
        }

        let slot = match self.free.pop_first() {
            Some(slot) => slot,
            None if self.current_touch_idx < self.max_touches => {
                let slot = self.current_touch_idx;
                self.current_touch_idx += 1;
                slot
            }
            None => {
                tracing::debug!(touch_id, max = self.max_touches, "touch slots exhausted");
                return None;
            }
        };

        self.live.insert(touch_id, TouchRecord { slot, window });
        Some(slot)
    }

    /// Slot of a live touch.
    pub fn slot(&self, touch_id: u32) -> Option<usize> {
        self.live.get(&touch_id).map(|r| r.slot)
    }

    /// Release a touch, returning the slot it held.
    pub fn end(&mut self, touch_id: u32) -> Option<usize> {
        let record = self.live.remove(&touch_id)?;
        self.free.insert(record.slot);
        Some(record.slot)
    }

    /// Release every touch that started on `window`.
    pub fn remove_window(&mut self, window: Window) -> usize {
        let ids: Vec<u32> = self
            .live
            .iter()
            .filter(|(_, r)| r.window == window)
            .map(|(&id, _)| id)
            .collect();
        for id in &ids {
            self.end(*id);
        }
        ids.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_count_for(&self, window: Window) -> usize {
        self.live.values().filter(|r| r.window == window).count()
    }
}
