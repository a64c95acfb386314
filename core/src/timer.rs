// Copyright 2019 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! A monotonic-millisecond timer wheel.
//!
//! This is the scheduling primitive underneath the transaction table's retransmission
//! backoff (`crate::coap::transaction`) and the RD client's periodic tick
//! (`crate::rd_client`). There is exactly one of these per [`crate::coap::Engine`]; callers
//! drive it by calling [`TimerWheel::run`] and [`TimerWheel::time_to_next`] with a timestamp
//! taken from whatever monotonic clock the platform provides.
//!
//! Timers are held in a `Vec`-backed arena rather than being intrusively linked through the
//! timer struct itself, so a [`TimerId`] is a small `Copy` handle rather than a pointer.

use std::fmt;

/// Handle to a timer allocated from a [`TimerWheel`].
pub type TimerId = u16;

struct Slot {
    alive: bool,
    pending: bool,
    expiration_ms: u64,
    next: Option<TimerId>,
    callback: Option<Box<dyn FnMut(&mut TimerWheel, TimerId)>>,
}

/// A sorted collection of timers, each firing a callback once its expiration time has passed.
///
/// Timers with the same expiration time fire in the order they were scheduled.
pub struct TimerWheel {
    slots: Vec<Slot>,
    free: Vec<TimerId>,
    head: Option<TimerId>,
}

impl fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerWheel")
            .field("len", &self.slots.len())
            .field("head", &self.head)
            .finish()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        TimerWheel::new()
    }
}

impl TimerWheel {
    /// Creates an empty timer wheel.
    pub fn new() -> TimerWheel {
        TimerWheel { slots: Vec::new(), free: Vec::new(), head: None }
    }

    /// Allocates a new, initially-stopped timer bound to `callback`.
    ///
    /// The callback is invoked with `&mut self` and this timer's id, so it may freely call
    /// [`TimerWheel::set`]/[`TimerWheel::reset`] on itself (or any other timer) to reschedule.
    pub fn create<F>(&mut self, callback: F) -> TimerId
    where
        F: FnMut(&mut TimerWheel, TimerId) + 'static,
    {
        let slot = Slot {
            alive: true,
            pending: false,
            expiration_ms: 0,
            next: None,
            callback: Some(Box::new(callback)),
        };
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = slot;
            id
        } else {
            let id = self.slots.len() as TimerId;
            self.slots.push(slot);
            id
        }
    }

    /// Stops and releases `id`, returning its slot to the free list.
    ///
    /// The id may be reused by a future call to [`TimerWheel::create`].
    pub fn free(&mut self, id: TimerId) {
        self.stop(id);
        if let Some(slot) = self.slots.get_mut(id as usize) {
            slot.alive = false;
            slot.callback = None;
        }
        self.free.push(id);
    }

    /// Returns true if `id` is currently scheduled to fire.
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.slots.get(id as usize).map_or(false, |s| s.pending)
    }

    /// Schedules `id` to fire at `now_ms + delay_ms`, replacing any previous schedule.
    pub fn set(&mut self, id: TimerId, now_ms: u64, delay_ms: u64) {
        self.stop(id);
        self.slots[id as usize].expiration_ms = now_ms.saturating_add(delay_ms);
        self.slots[id as usize].pending = true;
        self.insert_sorted(id);
    }

    /// Schedules `id` to fire `delay_ms` after its *previous* expiration time, phase-locking
    /// periodic timers instead of letting jitter accumulate drift.
    ///
    /// If the computed expiration has already passed `now_ms`, the timer fires as soon as
    /// possible instead.
    pub fn reset(&mut self, id: TimerId, now_ms: u64, delay_ms: u64) {
        let previous = self.slots[id as usize].expiration_ms;
        self.stop(id);
        let expiration = previous.saturating_add(delay_ms).max(now_ms);
        self.slots[id as usize].expiration_ms = expiration;
        self.slots[id as usize].pending = true;
        self.insert_sorted(id);
    }

    /// Removes `id` from the pending schedule without releasing its slot.
    pub fn stop(&mut self, id: TimerId) {
        if self.slots[id as usize].pending {
            self.unlink(id);
            self.slots[id as usize].pending = false;
            self.slots[id as usize].next = None;
        }
    }

    /// Milliseconds until the next timer expires, `0` if one has already expired, or `None`
    /// if no timer is pending.
    pub fn time_to_next(&self, now_ms: u64) -> Option<u64> {
        self.head.map(|h| self.slots[h as usize].expiration_ms.saturating_sub(now_ms))
    }

    /// Fires every timer whose expiration is `<= now_ms`, in expiration (then insertion) order.
    ///
    /// Returns true if at least one timer fired.
    pub fn run(&mut self, now_ms: u64) -> bool {
        let mut expired = Vec::new();
        while let Some(h) = self.head {
            if self.slots[h as usize].expiration_ms > now_ms {
                break;
            }
            self.head = self.slots[h as usize].next;
            self.slots[h as usize].next = None;
            self.slots[h as usize].pending = false;
            expired.push(h);
        }

        let did_work = !expired.is_empty();

        for id in expired {
            let mut callback = match self.slots[id as usize].callback.take() {
                Some(cb) => cb,
                None => continue,
            };
            callback(self, id);
            if let Some(slot) = self.slots.get_mut(id as usize) {
                if slot.alive && slot.callback.is_none() {
                    slot.callback = Some(callback);
                }
            }
        }

        did_work
    }

    fn unlink(&mut self, id: TimerId) {
        if self.head == Some(id) {
            self.head = self.slots[id as usize].next;
            return;
        }
        let mut cur = self.head;
        while let Some(cid) = cur {
            let next = self.slots[cid as usize].next;
            if next == Some(id) {
                self.slots[cid as usize].next = self.slots[id as usize].next;
                return;
            }
            cur = next;
        }
    }

    fn insert_sorted(&mut self, id: TimerId) {
        let exp = self.slots[id as usize].expiration_ms;
        let before_head = match self.head {
            None => true,
            Some(h) => self.slots[h as usize].expiration_ms > exp,
        };
        if before_head {
            self.slots[id as usize].next = self.head;
            self.head = Some(id);
            return;
        }
        let mut cur = self.head.expect("before_head is false implies a head exists");
        loop {
            match self.slots[cur as usize].next {
                Some(nid) if self.slots[nid as usize].expiration_ms <= exp => cur = nid,
                next => {
                    self.slots[id as usize].next = next;
                    break;
                }
            }
        }
        self.slots[cur as usize].next = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_in_expiration_order() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut wheel = TimerWheel::new();

        for label in ["a", "b", "c"] {
            let fired = fired.clone();
            let id = wheel.create(move |_wheel, _id| fired.borrow_mut().push(label));
            match label {
                "a" => wheel.set(id, 0, 30),
                "b" => wheel.set(id, 0, 10),
                "c" => wheel.set(id, 0, 20),
                _ => unreachable!(),
            }
        }

        assert_eq!(wheel.time_to_next(0), Some(10));
        assert!(!wheel.run(5));
        assert!(wheel.run(10));
        assert_eq!(*fired.borrow(), vec!["b"]);
        assert!(wheel.run(25));
        assert_eq!(*fired.borrow(), vec!["b", "c", "a"]);
        assert_eq!(wheel.time_to_next(25), None);
    }

    #[test]
    fn same_expiration_is_fifo() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut wheel = TimerWheel::new();
        for label in [1, 2, 3] {
            let fired = fired.clone();
            let id = wheel.create(move |_wheel, _id| fired.borrow_mut().push(label));
            wheel.set(id, 0, 100);
        }
        wheel.run(100);
        assert_eq!(*fired.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn reset_is_phase_locked() {
        let mut wheel = TimerWheel::new();
        let id = wheel.create(|_, _| {});
        wheel.set(id, 0, 500);
        wheel.reset(id, 500, 500);
        assert_eq!(wheel.time_to_next(500), Some(500));
    }

    #[test]
    fn reset_catches_up_if_overdue() {
        let mut wheel = TimerWheel::new();
        let id = wheel.create(|_, _| {});
        wheel.set(id, 0, 100);
        wheel.reset(id, 1_000, 100);
        assert_eq!(wheel.time_to_next(1_000), Some(0));
    }

    #[test]
    fn callback_can_reschedule_itself() {
        let count = Rc::new(RefCell::new(0));
        let mut wheel = TimerWheel::new();
        let id = wheel.create({
            let count = count.clone();
            move |wheel, id| {
                *count.borrow_mut() += 1;
                if *count.borrow() < 3 {
                    wheel.set(id, 0, 10);
                }
            }
        });
        wheel.set(id, 0, 10);
        wheel.run(10);
        assert!(wheel.is_pending(id));
        wheel.run(20);
        assert!(wheel.is_pending(id));
        wheel.run(30);
        assert!(!wheel.is_pending(id));
        assert_eq!(*count.borrow(), 3);
    }

    #[test]
    fn stop_removes_from_schedule() {
        let mut wheel = TimerWheel::new();
        let id = wheel.create(|_, _| panic!("should not fire"));
        wheel.set(id, 0, 10);
        wheel.stop(id);
        assert!(!wheel.is_pending(id));
        assert!(!wheel.run(100));
    }

    #[test]
    fn freed_timer_is_reused() {
        let mut wheel = TimerWheel::new();
        let id = wheel.create(|_, _| {});
        wheel.free(id);
        let id2 = wheel.create(|_, _| {});
        assert_eq!(id, id2);
    }
}
