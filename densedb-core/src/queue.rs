// SPDX-License-Identifier: AGPL-3.0-or-later
// DenseDB - Embedded Exact Vector Search Engine
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bounded Lock-Free Queue
//!
//! Fixed-capacity queue of owned items between the loader's single file
//! reader and its parsing workers. Each slot carries a sequence stamp that
//! encodes whether it is free or occupied for the current lap around the
//! ring, so producers and consumers never touch the same slot at the same
//! time.
//!
//! ## Threading Guarantees Table
//!
//! | Operation   | Guarantee | Notes |
//! |-------------|-----------|-------|
//! | `push()`    | Blocking  | Spins with yield while the ring is full |
//! | `try_pop()` | Lock-free | Never blocks; `None` when empty |
//! | `len()`     | Wait-free | Approximate under concurrency |
//!
//! Delivery is at-most-once; FIFO order across consumers is not promised.
//! The loader drains the queue (producer-done flag plus empty ring) before
//! dropping it; leftover items are still released on drop.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Ring capacity, in items.
pub const QUEUE_CAPACITY: usize = 1024;

struct Slot<T> {
    /// Sequence stamp: `index` when free for lap N, `index + 1` when filled.
    stamp: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded single-producer multi-consumer queue of owned items.
pub struct BoundedQueue<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    /// Next position to pop.
    head: AtomicUsize,
    /// Next position to push.
    tail: AtomicUsize,
}

// SAFETY: a slot's value is written only by the thread that advanced `tail`
// onto it and read only by the thread that advanced `head` onto it; the
// stamp's release/acquire pair orders the value transfer between them.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue of [`QUEUE_CAPACITY`] slots.
    pub fn new() -> Self {
        let slots = (0..QUEUE_CAPACITY)
            .map(|i| Slot {
                stamp: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        BoundedQueue {
            slots,
            mask: QUEUE_CAPACITY - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Enqueues `item`, spinning while the ring is full.
    pub fn push(&self, item: T) {
        let mut spins = 0u32;
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            let slot = &self.slots[tail & self.mask];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == tail {
                if self
                    .tail
                    .compare_exchange_weak(tail, tail + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    // SAFETY: winning the CAS grants exclusive write access to
                    // this slot until the stamp below publishes it.
                    unsafe { (*slot.value.get()).write(item) };
                    slot.stamp.store(tail + 1, Ordering::Release);
                    return;
                }
            } else if stamp < tail {
                // The consumer for this slot's previous lap has not freed it:
                // the ring is full. Back off.
                spins += 1;
                if spins > 64 {
                    thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }
            // stamp > tail: another producer raced ahead; reload and retry.
        }
    }

    /// Dequeues one item if any is ready. Never blocks.
    pub fn try_pop(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let slot = &self.slots[head & self.mask];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == head + 1 {
                if self
                    .head
                    .compare_exchange_weak(head, head + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    // SAFETY: winning the CAS grants exclusive read access to
                    // the value the producer published with the matching stamp.
                    let item = unsafe { (*slot.value.get()).assume_init_read() };
                    // Free the slot for the next lap.
                    slot.stamp
                        .store(head + self.mask + 1, Ordering::Release);
                    return Some(item);
                }
            } else if stamp <= head {
                return None;
            }
            // stamp > head + 1: another consumer raced ahead; retry.
        }
    }

    /// Approximate number of queued items.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.saturating_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn push_then_pop() {
        let q = BoundedQueue::new();
        q.push(7u64);
        q.push(8);
        assert_eq!(q.len(), 2);
        let mut got = vec![q.try_pop().unwrap(), q.try_pop().unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![7, 8]);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn pop_empty_is_none() {
        let q: BoundedQueue<String> = BoundedQueue::new();
        assert!(q.try_pop().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn fills_to_capacity_without_blocking() {
        let q = BoundedQueue::new();
        for i in 0..QUEUE_CAPACITY {
            q.push(i);
        }
        assert_eq!(q.len(), QUEUE_CAPACITY);
        for _ in 0..QUEUE_CAPACITY {
            assert!(q.try_pop().is_some());
        }
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn drop_releases_leftovers() {
        let q = BoundedQueue::new();
        for i in 0..10 {
            q.push(Arc::new(i));
        }
        let probe = Arc::new(0usize);
        q.push(Arc::clone(&probe));
        drop(q);
        assert_eq!(Arc::strong_count(&probe), 1);
    }

    #[test]
    fn single_producer_many_consumers_delivers_each_item_once() {
        let q = Arc::new(BoundedQueue::new());
        let done = Arc::new(AtomicBool::new(false));
        let total: usize = 50_000;

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let q = Arc::clone(&q);
            let done = Arc::clone(&done);
            consumers.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    match q.try_pop() {
                        Some(v) => seen.push(v),
                        None => {
                            if done.load(Ordering::Acquire) && q.is_empty() {
                                break;
                            }
                            std::thread::yield_now();
                        }
                    }
                }
                seen
            }));
        }

        for i in 0..total {
            q.push(i);
        }
        done.store(true, Ordering::Release);

        let mut all: Vec<usize> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        let expect: Vec<usize> = (0..total).collect();
        assert_eq!(all, expect);
    }
}
