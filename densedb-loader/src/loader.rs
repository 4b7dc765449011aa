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

//! Directory Ingest Pipeline
//!
//! Loads every `.json` file of a directory into a store and finalizes it.
//!
//! ```text
//! file reader (1 thread) → BoundedQueue → parse workers (N threads) → store
//! ```
//!
//! One producer reads files sequentially (the access pattern disks like
//! best) while the CPU-bound JSON parsing fans out across workers. The
//! queue is bounded, so a slow parser side backpressures the reader instead
//! of ballooning memory. Files under the mmap threshold are memory-mapped;
//! larger ones are read through a reusable buffer. Per-file failures are
//! logged and counted, never fatal.

use std::fs;
use std::io::Read;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use densedb_core::BoundedQueue;
use densedb_vector::{RawDocument, StoreError, VectorStore};
use serde_json::value::RawValue;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mmap::MappedFile;

/// Tuning knobs for [`load_directory`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Parse worker count; 0 picks one per core, capped at the file count,
    /// leaving a core for the reader.
    pub workers: usize,
    /// Files strictly below this many bytes are memory-mapped.
    pub mmap_threshold: u64,
    /// When false every file goes through the buffered read path.
    pub adaptive: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            workers: 0,
            mmap_threshold: 5 * 1024 * 1024,
            adaptive: true,
        }
    }
}

impl LoaderConfig {
    /// Single-worker configuration, useful for deterministic debugging.
    pub fn sequential() -> Self {
        LoaderConfig {
            workers: 1,
            ..Default::default()
        }
    }
}

/// What a directory load did.
#[derive(Debug, Clone, Default)]
pub struct LoaderStats {
    pub total_files: usize,
    pub files_loaded: usize,
    pub files_failed: usize,
    pub bytes_read: u64,
    pub documents_added: usize,
    pub documents_failed: usize,
    pub mmap_files: usize,
    pub buffered_files: usize,
    pub elapsed: Duration,
}

impl LoaderStats {
    pub fn documents_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.documents_added as f64 / secs
        } else {
            0.0
        }
    }

    pub fn megabytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes_read as f64 / (1024.0 * 1024.0)) / secs
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct Counters {
    files_loaded: AtomicUsize,
    files_failed: AtomicUsize,
    bytes_read: AtomicU64,
    documents_added: AtomicUsize,
    documents_failed: AtomicUsize,
    mmap_files: AtomicUsize,
    buffered_files: AtomicUsize,
}

/// File contents travelling through the queue; workers do not care which
/// read path produced them.
enum FilePayload {
    Mapped(MappedFile),
    Buffered(Vec<u8>),
}

impl FilePayload {
    fn bytes(&self) -> &[u8] {
        match self {
            FilePayload::Mapped(m) => m.bytes(),
            FilePayload::Buffered(b) => b,
        }
    }
}

struct QueuedFile {
    path: PathBuf,
    payload: FilePayload,
}

/// Non-recursive enumeration of regular `.json` files, sorted for a
/// deterministic load order.
pub fn find_json_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && path.extension().is_some_and(|e| e == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn effective_workers(config: &LoaderConfig, file_count: usize) -> usize {
    if config.workers > 0 {
        return config.workers;
    }
    let hw = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4);
    hw.min(file_count).saturating_sub(1).max(1)
}

/// Loads every `.json` file under `dir` into `store` and finalizes it.
///
/// A no-op if the store is already serving. An empty (or unreadable)
/// directory still finalizes, so the store always ends up searchable.
pub fn load_directory(store: &VectorStore, dir: &Path, config: &LoaderConfig) -> LoaderStats {
    let start = Instant::now();

    if store.is_finalized() {
        return LoaderStats::default();
    }

    let files = match find_json_files(dir) {
        Ok(files) => files,
        Err(err) => {
            warn!(dir = %dir.display(), %err, "directory enumeration failed");
            Vec::new()
        }
    };

    let mut stats = LoaderStats {
        total_files: files.len(),
        ..Default::default()
    };

    if files.is_empty() {
        store.finalize();
        stats.elapsed = start.elapsed();
        return stats;
    }

    let workers = effective_workers(config, files.len());
    info!(
        files = files.len(),
        workers,
        adaptive = config.adaptive,
        "loading directory"
    );

    let queue = BoundedQueue::<QueuedFile>::new();
    let producer_done = AtomicBool::new(false);
    let counters = Counters::default();

    std::thread::scope(|scope| {
        let queue = &queue;
        let producer_done = &producer_done;
        let counters = &counters;

        scope.spawn(move || {
            read_files(&files, queue, counters, config);
            producer_done.store(true, Ordering::Release);
        });

        for _ in 0..workers {
            scope.spawn(move || {
                loop {
                    if let Some(file) = queue.try_pop() {
                        process_file(store, &file, counters);
                        continue;
                    }
                    if producer_done.load(Ordering::Acquire) {
                        // Anything pushed before the flag flipped is visible
                        // now; drain it before exiting.
                        while let Some(file) = queue.try_pop() {
                            process_file(store, &file, counters);
                        }
                        break;
                    }
                    std::thread::yield_now();
                }
            });
        }
    });

    store.finalize();

    stats.files_loaded = counters.files_loaded.load(Ordering::Relaxed);
    stats.files_failed = counters.files_failed.load(Ordering::Relaxed);
    stats.bytes_read = counters.bytes_read.load(Ordering::Relaxed);
    stats.documents_added = counters.documents_added.load(Ordering::Relaxed);
    stats.documents_failed = counters.documents_failed.load(Ordering::Relaxed);
    stats.mmap_files = counters.mmap_files.load(Ordering::Relaxed);
    stats.buffered_files = counters.buffered_files.load(Ordering::Relaxed);
    stats.elapsed = start.elapsed();

    info!(
        documents = stats.documents_added,
        files = stats.files_loaded,
        failed_files = stats.files_failed,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        docs_per_sec = stats.documents_per_second() as u64,
        "directory load finished"
    );
    stats
}

/// Producer: reads files in sorted order and queues their contents.
fn read_files(
    files: &[PathBuf],
    queue: &BoundedQueue<QueuedFile>,
    counters: &Counters,
    config: &LoaderConfig,
) {
    // Reused across buffered reads; cloned per file so the queue owns its
    // payload.
    let mut buf: Vec<u8> = Vec::with_capacity(1024 * 1024);

    for path in files {
        let size = match fs::metadata(path) {
            Ok(md) => md.len(),
            Err(err) => {
                warn!(file = %path.display(), %err, "failed to stat file");
                counters.files_failed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let payload = if config.adaptive && size < config.mmap_threshold {
            match MappedFile::open(path) {
                Ok(mapped) => {
                    counters.mmap_files.fetch_add(1, Ordering::Relaxed);
                    FilePayload::Mapped(mapped)
                }
                Err(err) => {
                    warn!(file = %path.display(), %err, "failed to map file");
                    counters.files_failed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
        } else {
            match read_buffered(path, &mut buf) {
                Ok(bytes) => {
                    counters.buffered_files.fetch_add(1, Ordering::Relaxed);
                    FilePayload::Buffered(bytes)
                }
                Err(err) => {
                    warn!(file = %path.display(), %err, "failed to read file");
                    counters.files_failed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
        };

        counters.bytes_read.fetch_add(size, Ordering::Relaxed);
        queue.push(QueuedFile {
            path: path.clone(),
            payload,
        });
    }
}

fn read_buffered(path: &Path, buf: &mut Vec<u8>) -> std::io::Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    buf.clear();
    file.read_to_end(buf)?;
    Ok(buf.as_slice().to_vec())
}

/// Worker: decodes one queued file and feeds the store.
fn process_file(store: &VectorStore, file: &QueuedFile, counters: &Counters) {
    let text = match std::str::from_utf8(file.payload.bytes()) {
        Ok(text) => text,
        Err(err) => {
            warn!(file = %file.path.display(), %err, "file is not valid UTF-8");
            counters.files_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    // A file holds either one document object or a top-level array of them;
    // the first non-whitespace byte decides.
    let is_array = text.trim_start().starts_with('[');

    // A file only counts as loaded when it contributed at least one stored
    // document; outer JSON syntax parsing alone is not enough.
    let mut added = 0usize;
    let outcome = if is_array {
        serde_json::from_str::<Vec<&RawValue>>(text).map(|elements| {
            for element in elements {
                if add_element(store, file, element.get(), counters) {
                    added += 1;
                }
            }
        })
    } else {
        serde_json::from_str::<RawDocument>(text).map(|doc| match store.add_parsed(&doc) {
            Ok(()) => {
                counters.documents_added.fetch_add(1, Ordering::Relaxed);
                added += 1;
            }
            Err(err) => {
                debug!(file = %file.path.display(), %err, "document rejected");
                counters.documents_failed.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    match outcome {
        Ok(()) if added > 0 => {
            counters.files_loaded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(()) => {
            warn!(file = %file.path.display(), "no documents stored from file");
            counters.files_failed.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            warn!(file = %file.path.display(), %err, "failed to parse file");
            counters.files_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Returns true when the element was stored.
fn add_element(store: &VectorStore, file: &QueuedFile, element: &str, counters: &Counters) -> bool {
    let result = serde_json::from_str::<RawDocument>(element)
        .map_err(StoreError::from)
        .and_then(|doc| store.add_parsed(&doc));
    match result {
        Ok(()) => {
            counters.documents_added.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(err) => {
            debug!(file = %file.path.display(), %err, "document rejected");
            counters.documents_failed.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}

/// Loads a single `.json` file synchronously and returns how many documents
/// it added. Does NOT finalize the store; batch several calls and finalize
/// once.
pub fn load_file(store: &VectorStore, path: &Path) -> Result<usize> {
    let bytes = fs::read(path)?;
    let text = std::str::from_utf8(&bytes)?;

    let mut added = 0;
    if text.trim_start().starts_with('[') {
        let elements: Vec<&RawValue> =
            serde_json::from_str(text).map_err(StoreError::from)?;
        for element in elements {
            let doc: RawDocument =
                serde_json::from_str(element.get()).map_err(StoreError::from)?;
            store.add_parsed(&doc)?;
            added += 1;
        }
    } else {
        let doc: RawDocument = serde_json::from_str(text).map_err(StoreError::from)?;
        store.add_parsed(&doc)?;
        added += 1;
    }
    Ok(added)
}
