//! Timed-event scheduler driving every peripheral.
//!
//! All hardware that needs to act "later" (the PPU at the next scanline
//! edge, the APU at the next output sample, a timer at its overflow)
//! registers an [`EventClass`] entry against a shared 64-bit cycle clock.
//! The [`Bus`](crate::bus::Bus) advances the clock while the CPU executes
//! and fires due events in deterministic `(timestamp, class)` order.
//!
//! There is no callback table: the closed [`EventClass`] enum *is* the
//! registration. The bus dispatches a fired class to the one component
//! that owns it, so every callback target is statically known and a class
//! can never be double-registered.

use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

/// Every recurring event kind in the system. The declaration order is the
/// tie-break order for events sharing a timestamp, so moving a variant is
/// an observable behavior change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventClass {
    PpuHBlank,
    PpuHDraw,
    ApuMixer,
    ApuSequencer,
    ApuPsg1Generate,
    ApuPsg2Generate,
    ApuPsg3Generate,
    ApuPsg4Generate,
    Timer0Overflow,
    Timer1Overflow,
    Timer2Overflow,
    Timer3Overflow,
    KeypadPoll,
}

pub const EVENT_CLASS_COUNT: usize = 13;

impl EventClass {
    pub const ALL: [Self; EVENT_CLASS_COUNT] = [
        Self::PpuHBlank,
        Self::PpuHDraw,
        Self::ApuMixer,
        Self::ApuSequencer,
        Self::ApuPsg1Generate,
        Self::ApuPsg2Generate,
        Self::ApuPsg3Generate,
        Self::ApuPsg4Generate,
        Self::Timer0Overflow,
        Self::Timer1Overflow,
        Self::Timer2Overflow,
        Self::Timer3Overflow,
        Self::KeypadPoll,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    timestamp: u64,
    class: EventClass,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse both keys so the earliest
        // (timestamp, class) pair surfaces first.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.class.cmp(&self.class))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending events over a monotonic cycle clock.
///
/// At most one entry per class is live: rescheduling a class overwrites
/// its slot and the stale heap entry is dropped when it surfaces.
#[derive(Clone, Serialize, Deserialize)]
pub struct Scheduler {
    now: u64,
    heap: BinaryHeap<Entry>,
    /// Timestamp of the live entry per class; `None` when not scheduled.
    /// A heap entry that disagrees with its slot is stale.
    slots: [Option<u64>; EVENT_CLASS_COUNT],
    params: [u64; EVENT_CLASS_COUNT],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: 0,
            heap: BinaryHeap::new(),
            slots: [None; EVENT_CLASS_COUNT],
            params: [0; EVENT_CLASS_COUNT],
        }
    }

    /// The current master-clock cycle count. Monotonic, reset only on
    /// power-on.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Schedule (or reschedule) `class` to fire `delta` cycles from now.
    pub fn add(&mut self, delta: u64, class: EventClass) {
        self.add_with(delta, class, 0);
    }

    /// Like [`add`](Self::add), storing a parameter handed back to the
    /// handler when the event fires.
    pub fn add_with(&mut self, delta: u64, class: EventClass, param: u64) {
        let timestamp = self.now + delta;
        self.slots[class.index()] = Some(timestamp);
        self.params[class.index()] = param;
        self.heap.push(Entry { timestamp, class });
    }

    pub fn cancel(&mut self, class: EventClass) {
        self.slots[class.index()] = None;
    }

    #[must_use]
    pub fn is_scheduled(&self, class: EventClass) -> bool {
        self.slots[class.index()].is_some()
    }

    /// Timestamp of the earliest pending event, if any.
    fn next_timestamp(&mut self) -> Option<u64> {
        while let Some(entry) = self.heap.peek() {
            if self.slots[entry.class.index()] == Some(entry.timestamp) {
                return Some(entry.timestamp);
            }
            // Stale entry left behind by a reschedule or cancel.
            self.heap.pop();
        }
        None
    }

    /// Cycles from now until the next due event. Zero when nothing is
    /// pending (the halt loop treats that as "nothing to fast-forward to").
    #[must_use = "the halt fast-forward depends on this delta"]
    pub fn remaining_cycles(&mut self) -> u64 {
        self.next_timestamp().map_or(0, |ts| ts - self.now)
    }

    /// Advance the clock toward `now() + cycles`, stopping at the first
    /// due event. Returns the fired `(class, param)` with the clock parked
    /// exactly on the event's timestamp, or `None` once the target is
    /// reached with nothing left to fire.
    ///
    /// Callers loop until `None`: a handler may schedule new work below
    /// the target and the loop picks it up in `(timestamp, class)` order.
    pub fn advance_toward(&mut self, target: u64) -> Option<(EventClass, u64)> {
        match self.next_timestamp() {
            Some(timestamp) if timestamp <= target => {
                let entry = self.heap.pop().expect("peeked entry vanished");
                self.now = self.now.max(timestamp);
                self.slots[entry.class.index()] = None;
                Some((entry.class, self.params[entry.class.index()]))
            }
            _ => {
                self.now = self.now.max(target);
                None
            }
        }
    }

    /// Power-on reset: clock back to zero, nothing pending. Component
    /// reset code re-adds its own periodic events afterwards.
    pub fn reset(&mut self) {
        self.now = 0;
        self.heap.clear();
        self.slots = [None; EVENT_CLASS_COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(scheduler: &mut Scheduler, target: u64) -> Vec<(u64, EventClass)> {
        let mut fired = Vec::new();
        while let Some((class, _)) = scheduler.advance_toward(target) {
            fired.push((scheduler.now(), class));
        }
        fired
    }

    #[test]
    fn fires_in_timestamp_then_class_order() {
        let mut scheduler = Scheduler::new();
        scheduler.add(100, EventClass::Timer0Overflow);
        scheduler.add(100, EventClass::Timer1Overflow);
        scheduler.add(50, EventClass::ApuMixer);

        let fired = drain(&mut scheduler, 200);

        assert_eq!(
            fired,
            vec![
                (50, EventClass::ApuMixer),
                (100, EventClass::Timer0Overflow),
                (100, EventClass::Timer1Overflow),
            ]
        );
        assert_eq!(scheduler.now(), 200);
    }

    #[test]
    fn reschedule_replaces_prior_entry() {
        let mut scheduler = Scheduler::new();
        scheduler.add(10, EventClass::ApuMixer);
        scheduler.add(30, EventClass::ApuMixer);

        let fired = drain(&mut scheduler, 100);

        assert_eq!(fired, vec![(30, EventClass::ApuMixer)]);
    }

    #[test]
    fn cancel_suppresses_event() {
        let mut scheduler = Scheduler::new();
        scheduler.add(10, EventClass::KeypadPoll);
        scheduler.cancel(EventClass::KeypadPoll);

        assert!(drain(&mut scheduler, 100).is_empty());
        assert!(!scheduler.is_scheduled(EventClass::KeypadPoll));
    }

    #[test]
    fn remaining_cycles_tracks_next_event() {
        let mut scheduler = Scheduler::new();
        scheduler.add(120, EventClass::PpuHBlank);
        scheduler.add(40, EventClass::ApuSequencer);

        assert_eq!(scheduler.remaining_cycles(), 40);

        while scheduler.advance_toward(40).is_some() {}
        assert_eq!(scheduler.remaining_cycles(), 80);
    }

    #[test]
    fn clock_stops_on_event_timestamps() {
        let mut scheduler = Scheduler::new();
        scheduler.add(64, EventClass::ApuMixer);

        let (class, _) = scheduler.advance_toward(1000).unwrap();
        assert_eq!(class, EventClass::ApuMixer);
        assert_eq!(scheduler.now(), 64);

        assert!(scheduler.advance_toward(1000).is_none());
        assert_eq!(scheduler.now(), 1000);
    }

    #[test]
    fn handler_scheduled_work_below_target_still_fires() {
        let mut scheduler = Scheduler::new();
        scheduler.add(10, EventClass::Timer0Overflow);

        let mut fired = Vec::new();
        while let Some((class, _)) = scheduler.advance_toward(100) {
            if class == EventClass::Timer0Overflow && scheduler.now() == 10 {
                // Periodic pattern: the handler re-adds its own class.
                scheduler.add(10, EventClass::Timer0Overflow);
            }
            fired.push(scheduler.now());
        }

        assert_eq!(fired, vec![10, 20]);
    }

    #[test]
    fn pending_timestamps_never_precede_now() {
        let mut scheduler = Scheduler::new();
        scheduler.add(5, EventClass::ApuMixer);
        scheduler.add(7, EventClass::PpuHDraw);

        while scheduler.advance_toward(1000).is_some() {
            assert!(scheduler.remaining_cycles() == 0 || scheduler.now() <= 1000);
        }
    }
}
