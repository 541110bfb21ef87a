//! Hierarchical timer wheel.
//!
//! Four levels of 256 slots, 1ms base resolution, giving level spans of
//! 256ms / ~65s / ~4.6h / ~49d. Ported from
//! `examples/original_source/libs/core/include/veloz/core/timer_wheel.h`; the
//! intrusive doubly-linked slot lists of the original become slab-indexed `Vec<id>`
//! lists here since Rust has no ergonomic unsafe-free intrusive list, and entries
//! are reclaimed immediately on fire/cancel regardless of representation.
//!
//! `tick()` preserves the original's cascade-before-fire ordering: levels above 0
//! are cascaded down first when the current tick crosses their slot boundary, then
//! level 0's current slot fires, then the tick counter advances. Getting this order
//! wrong causes timers cascaded into level 0 on this same tick to be skipped until
//! the wheel wraps around again.

const SLOTS_PER_LEVEL: usize = 256;
const NUM_LEVELS: usize = 4;
const LEVEL_RANGE: [u64; NUM_LEVELS] = [256, 65_536, 16_777_216, 4_294_967_296];

type Callback = Box<dyn FnOnce() + Send>;

struct TimerNode {
    expiration_tick: u64,
    callback: Option<Callback>,
    level: usize,
    slot: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimerWheelStats {
    pub scheduled: u64,
    pub fired: u64,
    pub cancelled: u64,
    pub cascades: u64,
}

pub struct HierarchicalTimerWheel {
    current_tick: u64,
    levels: [Vec<Vec<usize>>; NUM_LEVELS],
    entries: Vec<Option<TimerNode>>,
    free_list: Vec<usize>,
    stats: TimerWheelStats,
}

impl HierarchicalTimerWheel {
    pub fn new() -> Self {
        Self {
            current_tick: 0,
            levels: std::array::from_fn(|_| vec![Vec::new(); SLOTS_PER_LEVEL]),
            entries: Vec::new(),
            free_list: Vec::new(),
            stats: TimerWheelStats::default(),
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn stats(&self) -> TimerWheelStats {
        self.stats
    }

    fn level_for_diff(diff: u64) -> usize {
        for (level, range) in LEVEL_RANGE.iter().enumerate() {
            if diff < *range {
                return level;
            }
        }
        NUM_LEVELS - 1
    }

    fn slot_for(expiration_tick: u64, level: usize) -> usize {
        ((expiration_tick >> (8 * level)) & 0xFF) as usize
    }

    fn alloc_slot(&mut self, node: TimerNode) -> usize {
        if let Some(id) = self.free_list.pop() {
            self.entries[id] = Some(node);
            id
        } else {
            self.entries.push(Some(node));
            self.entries.len() - 1
        }
    }

    fn insert(&mut self, id: usize) {
        let (level, slot) = {
            let node = self.entries[id].as_ref().expect("entry present");
            let diff = node.expiration_tick.saturating_sub(self.current_tick);
            let level = Self::level_for_diff(diff);
            let slot = Self::slot_for(node.expiration_tick, level);
            (level, slot)
        };
        if let Some(node) = self.entries[id].as_mut() {
            node.level = level;
            node.slot = slot;
        }
        self.levels[level][slot].push(id);
    }

    /// Schedules `callback` to fire `delay_ticks` ticks from now. Returns an id
    /// usable with `cancel`.
    pub fn schedule(&mut self, delay_ticks: u64, callback: Callback) -> usize {
        let expiration_tick = self.current_tick + delay_ticks;
        let id = self.alloc_slot(TimerNode {
            expiration_tick,
            callback: Some(callback),
            level: 0,
            slot: 0,
        });
        self.insert(id);
        self.stats.scheduled += 1;
        id
    }

    /// O(n) scan of the entry's slot; cancellation is assumed rare.
    pub fn cancel(&mut self, id: usize) -> bool {
        let (level, slot) = match self.entries.get(id).and_then(|e| e.as_ref()) {
            Some(node) => (node.level, node.slot),
            None => return false,
        };
        let bucket = &mut self.levels[level][slot];
        if let Some(pos) = bucket.iter().position(|&e| e == id) {
            bucket.swap_remove(pos);
            self.entries[id] = None;
            self.free_list.push(id);
            self.stats.cancelled += 1;
            true
        } else {
            false
        }
    }

    fn cascade(&mut self, level: usize) {
        let slot = Self::slot_for(self.current_tick, level);
        let ids: Vec<usize> = std::mem::take(&mut self.levels[level][slot]);
        self.stats.cascades += 1;
        for id in ids {
            self.insert(id);
        }
    }

    /// Advances by one tick: move `current_tick` forward, cascade higher levels
    /// that just crossed their boundary, then fire level 0's current slot.
    /// Fired ids are returned in non-decreasing order of expiration. Advancing
    /// before cascading/firing is what makes a delay-`d` timer fire within
    /// `advance(d)`: `schedule(d)` sets `expiration_tick = current_tick + d`, so
    /// the matching slot is only populated/fireable once `current_tick` itself
    /// reaches that value.
    pub fn tick(&mut self) -> Vec<usize> {
        self.current_tick += 1;

        for level in 1..NUM_LEVELS {
            let level_mask = LEVEL_RANGE[level - 1] - 1;
            if self.current_tick & level_mask == 0 {
                self.cascade(level);
            }
        }

        let slot = (self.current_tick & 0xFF) as usize;
        let ids: Vec<usize> = std::mem::take(&mut self.levels[0][slot]);
        let mut fired: Vec<(u64, usize)> = Vec::with_capacity(ids.len());

        for id in ids {
            let node = self.entries[id].take().expect("entry present");
            debug_assert_eq!(node.expiration_tick, self.current_tick);
            fired.push((node.expiration_tick, id));
            self.free_list.push(id);
            if let Some(cb) = node.callback {
                cb();
            }
            self.stats.fired += 1;
        }

        fired.sort_by_key(|(tick, _)| *tick);
        fired.into_iter().map(|(_, id)| id).collect()
    }

    /// Repeats `tick()` `n` times, returning all fired ids across all ticks in
    /// non-decreasing order of expiration tick.
    pub fn advance(&mut self, n: u64) -> Vec<usize> {
        let mut fired = Vec::new();
        for _ in 0..n {
            fired.extend(self.tick());
        }
        fired
    }

    /// Earliest tick at which a scheduled timer will fire, if any are pending.
    /// O(n) scan; acceptable at the same granularity as `cancel`.
    pub fn next_fire_tick(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter_map(|e| e.as_ref())
            .map(|n| n.expiration_tick)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_none())
    }
}

impl Default for HierarchicalTimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn single_timer_fires_once_at_exact_tick() {
        let mut wheel = HierarchicalTimerWheel::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        wheel.schedule(300, Box::new(move || { fired2.fetch_add(1, Ordering::SeqCst); }));

        let ids = wheel.advance(300);
        assert_eq!(ids.len(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(wheel.current_tick(), 300);
    }

    #[test]
    fn timer_does_not_fire_before_its_tick() {
        let mut wheel = HierarchicalTimerWheel::new();
        wheel.schedule(300, Box::new(|| {}));
        let ids = wheel.advance(299);
        assert!(ids.is_empty());
        let ids = wheel.advance(1);
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn cancel_prevents_fire() {
        let mut wheel = HierarchicalTimerWheel::new();
        let id = wheel.schedule(50, Box::new(|| panic!("should not fire")));
        assert!(wheel.cancel(id));
        let ids = wheel.advance(100);
        assert!(ids.is_empty());
        assert_eq!(wheel.stats().cancelled, 1);
    }

    #[test]
    fn many_timers_fire_exactly_once_each_in_nondecreasing_order() {
        let mut wheel = HierarchicalTimerWheel::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let delays = [10u64, 5, 300, 70000, 1, 256, 255];
        for (idx, &d) in delays.iter().enumerate() {
            let order = order.clone();
            wheel.schedule(d, Box::new(move || order.lock().unwrap().push(idx)));
        }

        let max_delay = *delays.iter().max().unwrap();
        wheel.advance(max_delay + 1);

        let fired_order = order.lock().unwrap();
        assert_eq!(fired_order.len(), delays.len());

        let mut expirations: Vec<u64> = fired_order.iter().map(|&idx| delays[idx]).collect();
        let sorted = {
            let mut s = expirations.clone();
            s.sort_unstable();
            s
        };
        assert_eq!(expirations, sorted);
        expirations.dedup();
    }

    #[test]
    fn cascade_across_levels_survives_wraparound() {
        let mut wheel = HierarchicalTimerWheel::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        // Beyond level 0's 256-tick span: must cascade from level 1.
        wheel.schedule(1000, Box::new(move || { fired2.fetch_add(1, Ordering::SeqCst); }));
        wheel.advance(999);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        wheel.advance(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn next_fire_tick_reports_earliest_pending() {
        let mut wheel = HierarchicalTimerWheel::new();
        wheel.schedule(500, Box::new(|| {}));
        wheel.schedule(100, Box::new(|| {}));
        assert_eq!(wheel.next_fire_tick(), Some(100));
    }
}
