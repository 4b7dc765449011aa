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

//! Lock-Free Bump Arena
//!
//! Chunked append-only memory pool backing every document record in the
//! store. Allocation is a pair of atomic loads plus one CAS on the hot path;
//! a mutex is taken only for the rare chunk-grow event.
//!
//! ## Memory Layout
//!
//! ```text
//! Chunk 0 (64 MiB fixed)      Chunk 1 (64 MiB fixed)      Chunk 2 ...
//! ┌──────────────────┐        ┌──────────────────┐
//! │ [emb][id][text]… │        │ [emb][id][text]… │
//! │ [emb][id][text]… │        │ ...              │
//! │ [unused]         │        │ [unused]         │
//! └──────────────────┘        └──────────────────┘
//!          ↑                           ↑
//!          └── AtomicPtr chain, `current` points at the tail
//! ```
//!
//! ## Concurrency Guarantees
//!
//! | Operation | Guarantee | Notes |
//! |-----------|-----------|-------|
//! | `alloc()` | Lock-free | CAS bump; blocks only on a chunk grow |
//! | reads     | Wait-free | returned pointers never move |
//!
//! Returned memory stays valid until the arena is dropped. There is no
//! per-allocation free; the whole pool is released at once.

use parking_lot::Mutex;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Size of each backing chunk (64 MiB).
pub const CHUNK_SIZE: usize = 1 << 26;

/// Largest alignment `alloc` accepts.
pub const MAX_ALIGN: usize = 4096;

/// Alignment of the chunk storage itself (one cache line).
const CHUNK_ALIGN: usize = 64;

/// A single fixed-size region on the chunk chain.
///
/// `offset` is the next free byte; successor chunks are owned by their
/// predecessor through `next`.
struct Chunk {
    data: NonNull<u8>,
    offset: AtomicUsize,
    next: AtomicPtr<Chunk>,
}

impl Chunk {
    fn storage_layout() -> Layout {
        // CHUNK_SIZE and CHUNK_ALIGN are compile-time valid.
        Layout::from_size_align(CHUNK_SIZE, CHUNK_ALIGN).expect("chunk layout")
    }

    /// Heap-allocates a chunk and leaks it; ownership is tracked through the
    /// chain starting at `Arena::head`.
    fn create() -> NonNull<Chunk> {
        let layout = Self::storage_layout();
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc(layout) };
        let data = NonNull::new(raw).unwrap_or_else(|| handle_alloc_error(layout));
        let chunk = Box::new(Chunk {
            data,
            offset: AtomicUsize::new(0),
            next: AtomicPtr::new(std::ptr::null_mut()),
        });
        NonNull::from(Box::leak(chunk))
    }
}

/// Concurrent bump allocator over a singly-linked list of 64 MiB chunks.
///
/// Many threads may call [`alloc`](Arena::alloc) at once. Pointers handed out
/// are stable for the lifetime of the arena.
pub struct Arena {
    head: NonNull<Chunk>,
    current: AtomicPtr<Chunk>,
    grow_lock: Mutex<()>,
}

// SAFETY: chunk storage is only written through byte ranges claimed by a
// successful CAS on `offset`, so distinct threads never alias a range. The
// chain pointers (`current`, `next`) are published with release stores and
// read with acquire loads.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Creates an arena with one chunk already mapped in.
    pub fn new() -> Self {
        let head = Chunk::create();
        Arena {
            head,
            current: AtomicPtr::new(head.as_ptr()),
            grow_lock: Mutex::new(()),
        }
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// `align` must be a power of two in `[1, 4096]` and `size` must fit a
    /// single chunk; otherwise `None`. Never panics, never blocks except
    /// momentarily while a fresh chunk is linked in.
    pub fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if align == 0 || !align.is_power_of_two() || align > MAX_ALIGN {
            return None;
        }
        // Worst-case padding on a fresh chunk: its base is CHUNK_ALIGN-aligned,
        // so requests with larger alignment may need up to `align - CHUNK_ALIGN`
        // leading bytes. Refusing here keeps the grow loop finite.
        let worst_padding = align.saturating_sub(CHUNK_ALIGN);
        if size > CHUNK_SIZE || size + worst_padding > CHUNK_SIZE {
            return None;
        }

        let mut chunk = self.current.load(Ordering::Acquire);
        loop {
            // SAFETY: every pointer stored in `current`/`next` refers to a
            // chunk leaked by `Chunk::create` and freed only in `drop`.
            let c = unsafe { &*chunk };
            let old = c.offset.load(Ordering::Relaxed);
            let base = c.data.as_ptr() as usize + old;
            let padding = base.wrapping_neg() & (align - 1);
            let aligned = old + padding;
            let new = aligned + size;

            if new > CHUNK_SIZE {
                chunk = self.grow(chunk);
                continue;
            }

            if c.offset
                .compare_exchange_weak(old, new, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: `aligned < CHUNK_SIZE`, inside the chunk storage.
                let ptr = unsafe { c.data.as_ptr().add(aligned) };
                return NonNull::new(ptr);
            }
            // CAS lost to another thread; retry on the same chunk.
        }
    }

    /// Links a successor chunk behind `full` (or finds the one another thread
    /// already linked) and returns the chunk to retry on.
    fn grow(&self, full: *mut Chunk) -> *mut Chunk {
        // SAFETY: see `alloc`; `full` came off the chain.
        let c = unsafe { &*full };
        let next = c.next.load(Ordering::Acquire);
        if !next.is_null() {
            self.current.store(next, Ordering::Release);
            return next;
        }

        let _guard = self.grow_lock.lock();
        // Double-check: another thread may have grown while we waited.
        let next = c.next.load(Ordering::Acquire);
        if !next.is_null() {
            self.current.store(next, Ordering::Release);
            return next;
        }
        let fresh = Chunk::create().as_ptr();
        c.next.store(fresh, Ordering::Release);
        self.current.store(fresh, Ordering::Release);
        fresh
    }

    /// Number of chunks currently on the chain.
    pub fn chunk_count(&self) -> usize {
        let mut n = 0;
        let mut cur = self.head.as_ptr();
        while !cur.is_null() {
            n += 1;
            // SAFETY: chain traversal over leaked chunks, see `alloc`.
            cur = unsafe { &*cur }.next.load(Ordering::Acquire);
        }
        n
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let layout = Chunk::storage_layout();
        let mut cur = self.head.as_ptr();
        while !cur.is_null() {
            // SAFETY: `cur` was leaked by `Chunk::create`; we have exclusive
            // access in drop and free each chunk exactly once.
            let chunk = unsafe { Box::from_raw(cur) };
            cur = chunk.next.load(Ordering::Acquire);
            unsafe { dealloc(chunk.data.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn alloc_is_aligned() {
        let arena = Arena::new();
        for align in [1usize, 2, 4, 8, 16, 64, 256, 1024, 4096] {
            let p = arena.alloc(17, align).unwrap();
            assert_eq!(p.as_ptr() as usize % align, 0, "align {align}");
        }
    }

    #[test]
    fn rejects_bad_alignment() {
        let arena = Arena::new();
        assert!(arena.alloc(8, 0).is_none());
        assert!(arena.alloc(8, 3).is_none());
        assert!(arena.alloc(8, 8192).is_none());
    }

    #[test]
    fn chunk_size_boundary() {
        let arena = Arena::new();
        assert!(arena.alloc(CHUNK_SIZE, 1).is_some());
        assert!(arena.alloc(CHUNK_SIZE + 1, 1).is_none());
    }

    #[test]
    fn grows_on_overflow() {
        let arena = Arena::new();
        assert_eq!(arena.chunk_count(), 1);
        let a = arena.alloc(CHUNK_SIZE - 8, 8).unwrap();
        let b = arena.alloc(64, 8).unwrap();
        assert_eq!(arena.chunk_count(), 2);
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn allocations_do_not_overlap() {
        let arena = Arena::new();
        let a = arena.alloc(100, 4).unwrap().as_ptr() as usize;
        let b = arena.alloc(100, 4).unwrap().as_ptr() as usize;
        assert!(b >= a + 100 || a >= b + 100);
    }

    #[test]
    fn writes_survive_growth() {
        let arena = Arena::new();
        let p = arena.alloc(4, 4).unwrap();
        unsafe { p.as_ptr().cast::<u32>().write(0xDEAD_BEEF) };
        // Force a couple of chunk grows.
        for _ in 0..3 {
            arena.alloc(CHUNK_SIZE / 2 + 1, 64).unwrap();
        }
        assert_eq!(unsafe { p.as_ptr().cast::<u32>().read() }, 0xDEAD_BEEF);
    }

    #[test]
    fn concurrent_alloc_yields_disjoint_ranges() {
        let arena = Arc::new(Arena::new());
        let threads = 8;
        let per_thread = 2000;
        let mut handles = Vec::new();
        for t in 0..threads {
            let arena = Arc::clone(&arena);
            handles.push(std::thread::spawn(move || {
                let mut ranges = Vec::with_capacity(per_thread);
                for i in 0..per_thread {
                    let size = 16 + (t * 31 + i) % 240;
                    let p = arena.alloc(size, 8).unwrap();
                    unsafe { std::ptr::write_bytes(p.as_ptr(), t as u8, size) };
                    ranges.push((p.as_ptr() as usize, size));
                }
                ranges
            }));
        }
        let mut all: Vec<(usize, usize)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        for w in all.windows(2) {
            assert!(w[0].0 + w[0].1 <= w[1].0, "overlapping allocations");
        }
    }
}
