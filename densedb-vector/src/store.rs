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

//! Two-Phase Vector Store
//!
//! The store runs in exactly two phases:
//!
//! 1. **Loading**: any number of threads append documents concurrently via
//!    [`add_document`](VectorStore::add_document). Each insert reserves a
//!    slot index with one atomic increment and fills a fully-constructed
//!    arena record before the slot write, so no per-entry lock or ready
//!    flag is needed.
//! 2. **Serving**: after [`finalize`](VectorStore::finalize) L2-normalizes
//!    every embedding and flips the phase flag, the store is immutable and
//!    [`search`](VectorStore::search) scans it brute-force with SIMD dot
//!    products and per-worker top-k heaps.
//!
//! The transition is one-way; callers must ensure all concurrent inserts
//! have returned before finalizing. Readers observe entries only through an
//! acquire-loaded `count` and only in the serving phase, so every entry a
//! reader can see is complete.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use densedb_core::{Arena, Hit, TopK};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::document::{read_embedding, Entry, EntryRef, RawDocument};
use crate::error::{Result, StoreError};
use crate::simd::DotKernel;

/// Default entry-table capacity.
pub const DEFAULT_CAPACITY: usize = 1_000_000;

struct Slot(UnsafeCell<MaybeUninit<Entry>>);

/// In-memory exact-match vector store over packed arena records.
pub struct VectorStore {
    dim: usize,
    capacity: usize,
    arena: Arena,
    slots: Box<[Slot]>,
    /// Published entry count; the single ordering point between writers and
    /// readers.
    count: AtomicUsize,
    /// Phase flag: false = loading, true = serving.
    serving: AtomicBool,
    /// Elects the one thread that runs normalization in `finalize`.
    normalizer: AtomicBool,
    /// Serializes the parallel section of `search` so concurrent calls do
    /// not stack nested worker teams.
    search_lock: Mutex<()>,
    kernel: DotKernel,
}

// SAFETY: slot values are written exactly once, at an index no other writer
// holds (reserved by `count.fetch_add`), and are read only in the serving
// phase, which begins after all writers have returned and is published with
// a seq-cst store. The arena the entries point into lives as long as the
// store.
unsafe impl Send for VectorStore {}
unsafe impl Sync for VectorStore {}

impl VectorStore {
    /// Creates a store for embeddings of `dim` floats with the default
    /// 10^6-entry capacity.
    pub fn new(dim: usize) -> Self {
        Self::with_capacity(dim, DEFAULT_CAPACITY)
    }

    /// Creates a store with an explicit entry-table capacity.
    pub fn with_capacity(dim: usize, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot(UnsafeCell::new(MaybeUninit::uninit())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        VectorStore {
            dim,
            capacity,
            arena: Arena::new(),
            slots,
            count: AtomicUsize::new(0),
            serving: AtomicBool::new(false),
            normalizer: AtomicBool::new(false),
            search_lock: Mutex::new(()),
            kernel: DotKernel::detect(),
        }
    }

    /// Embedding dimension every document must match.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Entry-table capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of published documents.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once `finalize` has completed and the store is serving.
    pub fn is_finalized(&self) -> bool {
        self.serving.load(Ordering::Acquire)
    }

    /// Fails with a phase error once the store is serving; inserts must
    /// observe this before any field of the document is decoded.
    fn ensure_loading(&self) -> Result<()> {
        if self.serving.load(Ordering::Acquire) {
            return Err(StoreError::Finalized);
        }
        Ok(())
    }

    /// Parses one JSON document object and appends it.
    pub fn add_document(&self, json: &str) -> Result<()> {
        self.ensure_loading()?;
        let doc: RawDocument = serde_json::from_str(json)?;
        self.add_parsed(&doc)
    }

    /// Appends an already-parsed document. Safe to call from many threads
    /// during the loading phase.
    pub fn add_parsed(&self, doc: &RawDocument<'_>) -> Result<()> {
        self.ensure_loading()?;

        let mut scratch = Vec::new();
        read_embedding(doc.metadata, self.dim, &mut scratch)?;

        let meta = doc.metadata.get();
        let size = self.dim * 4 + doc.id.len() + 1 + doc.text.len() + 1 + meta.len() + 1;
        let dst = self
            .arena
            .alloc(size, 4)
            .ok_or(StoreError::Allocation { size, align: 4 })?;

        // SAFETY: `dst` is `size` writable bytes aligned to 4, exclusively
        // ours until the slot write below publishes the entry.
        let entry = unsafe { Entry::write_packed(dst, &scratch, &doc.id, &doc.text, meta) };

        let index = self.count.fetch_add(1, Ordering::Relaxed);
        if index >= self.capacity {
            self.count.fetch_sub(1, Ordering::Relaxed);
            return Err(StoreError::TableFull {
                capacity: self.capacity,
            });
        }

        // SAFETY: the fetch_add reserved `index` for this thread alone, and
        // no reader touches slots before the serving phase.
        unsafe { (*self.slots[index].0.get()).write(entry) };
        Ok(())
    }

    /// Transitions to the serving phase, L2-normalizing every stored
    /// embedding on the way. Idempotent; only the first caller does work.
    ///
    /// All concurrent `add_document` calls must have returned before this
    /// is invoked.
    pub fn finalize(&self) {
        if self
            .normalizer
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let n = self.count.load(Ordering::Acquire);
        for i in 0..n {
            // SAFETY: i < count and all writers have returned, so the slot
            // holds a complete entry; nothing else mutates embeddings here.
            let entry = unsafe { self.entry_unchecked(i) };
            let emb =
                unsafe { std::slice::from_raw_parts_mut(entry.embedding_ptr(), self.dim) };
            self.kernel.normalize(emb);
        }
        tracing::debug!(documents = n, dim = self.dim, "store finalized");
        self.serving.store(true, Ordering::SeqCst);
    }

    /// Brute-force top-k scan by dot product.
    ///
    /// Returns the empty vector before `finalize`, on an empty store, or
    /// for `k == 0`; otherwise exactly `min(k, len())` hits, strictly
    /// descending by score with ties broken by ascending index. `query`
    /// must have `dim` elements. With `normalize_query` set the query is
    /// normalized into a local copy; the input is never mutated.
    pub fn search(&self, query: &[f32], k: usize, normalize_query: bool) -> Vec<Hit> {
        if !self.serving.load(Ordering::Acquire) {
            return Vec::new();
        }
        let n = self.count.load(Ordering::Acquire);
        if n == 0 || k == 0 {
            return Vec::new();
        }
        debug_assert_eq!(query.len(), self.dim);
        let k = k.min(n);

        let mut owned;
        let query: &[f32] = if normalize_query {
            owned = query.to_vec();
            self.kernel.normalize(&mut owned);
            &owned
        } else {
            query
        };

        let kernel = self.kernel;
        let _guard = self.search_lock.lock();
        (0..n)
            .into_par_iter()
            .with_min_len(1024)
            .fold(
                || TopK::new(k),
                |mut heap, i| {
                    // SAFETY: i < n <= count in the serving phase.
                    let emb = unsafe { self.entry_unchecked(i).embedding(self.dim) };
                    heap.push(kernel.dot(emb, query), i);
                    heap
                },
            )
            .reduce(|| TopK::new(k), TopK::merge)
            .into_sorted_hits()
    }

    /// Like [`search`](VectorStore::search), but with each hit resolved to
    /// its entry.
    pub fn search_entries(
        &self,
        query: &[f32],
        k: usize,
        normalize_query: bool,
    ) -> Vec<(f32, EntryRef<'_>)> {
        self.search(query, k, normalize_query)
            .into_iter()
            .map(|hit| {
                // SAFETY: hit indexes come from the scan above, < count.
                let entry = unsafe { self.entry_unchecked(hit.index) };
                (hit.score, EntryRef::new(entry, self.dim))
            })
            .collect()
    }

    /// Fetches a published entry by index. `None` outside `[0, len())` or
    /// before the store is serving (no half-published slot is ever
    /// observable).
    pub fn get_entry(&self, index: usize) -> Option<EntryRef<'_>> {
        if !self.serving.load(Ordering::Acquire) {
            return None;
        }
        if index >= self.count.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: index < count in the serving phase.
        Some(EntryRef::new(unsafe { self.entry_unchecked(index) }, self.dim))
    }

    /// # Safety
    ///
    /// `index` must be below an acquire-loaded `count`, and either the store
    /// is serving or the caller is the finalizing thread.
    unsafe fn entry_unchecked(&self, index: usize) -> Entry {
        (*self.slots[index].0.get()).assume_init_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn doc(id: &str, embedding: &[f32]) -> String {
        let emb = embedding
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            r#"{{"id":"{id}","text":"text for {id}","metadata":{{"embedding":[{emb}]}}}}"#
        )
    }

    #[test]
    fn basic_insert_and_search() {
        let store = VectorStore::with_capacity(4, 16);
        store.add_document(&doc("a", &[1.0, 0.0, 0.0, 0.0])).unwrap();
        store.add_document(&doc("b", &[0.0, 1.0, 0.0, 0.0])).unwrap();
        store.add_document(&doc("c", &[1.0, 1.0, 0.0, 0.0])).unwrap();
        store.finalize();

        let hits = store.search(&[1.0, 0.0, 0.0, 0.0], 2, false);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert_eq!(hits[1].index, 2);
        assert!((hits[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert_eq!(store.get_entry(hits[0].index).unwrap().id(), "a");
    }

    #[test]
    fn equal_vectors_tie_break_by_lower_index() {
        let store = VectorStore::with_capacity(2, 8);
        store.add_document(&doc("x", &[1.0, 0.0])).unwrap();
        store.add_document(&doc("y", &[1.0, 0.0])).unwrap();
        store.finalize();

        let hits = store.search(&[1.0, 0.0], 2, false);
        assert_eq!(hits.len(), 2);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!((hits[1].score - 1.0).abs() < 1e-5);
        assert_eq!(hits[0].index, 0);
        assert_eq!(hits[1].index, 1);
    }

    #[test]
    fn search_before_finalize_is_empty() {
        let store = VectorStore::with_capacity(2, 8);
        store.add_document(&doc("x", &[1.0, 0.0])).unwrap();
        assert!(store.search(&[1.0, 0.0], 1, false).is_empty());
        assert!(store.get_entry(0).is_none());
    }

    #[test]
    fn search_empty_store_is_empty() {
        let store = VectorStore::with_capacity(2, 8);
        store.finalize();
        assert!(store.search(&[1.0, 0.0], 5, false).is_empty());
        assert!(store.search(&[1.0, 0.0], 0, false).is_empty());
    }

    #[test]
    fn add_after_finalize_is_phase_error() {
        let store = VectorStore::with_capacity(2, 8);
        store.add_document(&doc("x", &[1.0, 0.0])).unwrap();
        store.finalize();
        let err = store.add_document(&doc("y", &[0.0, 1.0])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Phase);
        assert_eq!(store.len(), 1);

        // The phase check comes before field decoding: a document that
        // would not even decode still reports the phase, not the decode.
        let err = store.add_document(r#"{"id": 1}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Phase);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn finalize_is_idempotent() {
        let store = VectorStore::with_capacity(2, 8);
        store.add_document(&doc("x", &[3.0, 4.0])).unwrap();
        store.finalize();
        let first: Vec<f32> = store.get_entry(0).unwrap().embedding().to_vec();
        store.finalize();
        let second: Vec<f32> = store.get_entry(0).unwrap().embedding().to_vec();
        assert_eq!(first, second);
        assert!((first[0] - 0.6).abs() < 1e-6);
        assert!((first[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn finalize_normalizes_to_unit_norm() {
        let store = VectorStore::with_capacity(3, 8);
        store.add_document(&doc("a", &[2.0, 2.0, 1.0])).unwrap();
        store.add_document(&doc("z", &[0.0, 0.0, 0.0])).unwrap();
        store.finalize();

        let a = store.get_entry(0).unwrap();
        let norm: f32 = a.embedding().iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        // The zero vector must stay zero, not become NaN.
        let z = store.get_entry(1).unwrap();
        assert!(z.embedding().iter().all(|x| *x == 0.0));
    }

    #[test]
    fn table_full_is_capacity_error_and_size_stable() {
        let store = VectorStore::with_capacity(2, 2);
        store.add_document(&doc("a", &[1.0, 0.0])).unwrap();
        store.add_document(&doc("b", &[0.0, 1.0])).unwrap();
        let err = store.add_document(&doc("c", &[1.0, 1.0])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn dimension_errors() {
        let store = VectorStore::with_capacity(3, 8);
        let too_many = store.add_document(&doc("a", &[1.0, 2.0, 3.0, 4.0])).unwrap_err();
        assert_eq!(too_many.kind(), ErrorKind::Capacity);
        let too_few = store.add_document(&doc("b", &[1.0, 2.0])).unwrap_err();
        assert_eq!(too_few.kind(), ErrorKind::Shape);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn malformed_json_is_decode_error() {
        let store = VectorStore::with_capacity(2, 8);
        let err = store.add_document("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        let err = store
            .add_document(r#"{"id":"a","metadata":{"embedding":[1,2]}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn entry_round_trips_bytes() {
        let store = VectorStore::with_capacity(2, 8);
        let json = r#"{"id":"doc-1","text":"пример text","metadata":{"embedding":[1.0,0.0],"extra":{"a":[1,2,3]},"s":"v"}}"#;
        store.add_document(json).unwrap();
        store.finalize();

        let entry = store.get_entry(0).unwrap();
        assert_eq!(entry.id(), "doc-1");
        assert_eq!(entry.text(), "пример text");
        assert_eq!(
            entry.metadata_json(),
            r#"{"embedding":[1.0,0.0],"extra":{"a":[1,2,3]},"s":"v"}"#
        );
    }

    #[test]
    fn search_clips_k_to_len() {
        let store = VectorStore::with_capacity(2, 8);
        store.add_document(&doc("a", &[1.0, 0.0])).unwrap();
        store.finalize();
        let hits = store.search(&[1.0, 0.0], 10, false);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn search_is_deterministic() {
        let store = VectorStore::with_capacity(8, 512);
        for i in 0..300 {
            let emb: Vec<f32> = (0..8)
                .map(|j| (((i * 13 + j * 7) % 29) as f32) / 29.0 - 0.5)
                .collect();
            store.add_document(&doc(&format!("d{i}"), &emb)).unwrap();
        }
        store.finalize();

        let query: Vec<f32> = (0..8).map(|j| (j as f32) / 8.0).collect();
        let first = store.search(&query, 10, true);
        for _ in 0..5 {
            assert_eq!(store.search(&query, 10, true), first);
        }
    }

    #[test]
    fn normalized_scores_stay_in_cosine_range() {
        let store = VectorStore::with_capacity(6, 64);
        for i in 0..40 {
            let emb: Vec<f32> = (0..6)
                .map(|j| (((i * 31 + j * 17) % 97) as f32) / 97.0 - 0.5)
                .collect();
            store.add_document(&doc(&format!("d{i}"), &emb)).unwrap();
        }
        store.finalize();

        let hits = store.search(&[0.3, -0.2, 0.9, 0.1, -0.5, 0.4], 40, true);
        assert_eq!(hits.len(), 40);
        for w in hits.windows(2) {
            assert!(
                w[0].score > w[1].score
                    || (w[0].score == w[1].score && w[0].index < w[1].index)
            );
        }
        for hit in &hits {
            assert!(hit.score >= -1.0 - 1e-5 && hit.score <= 1.0 + 1e-5);
            assert!(hit.index < store.len());
        }
    }
}
