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

//! Directory-loading smoke test
//!
//! Loads a directory of `.json` document files through the full pipeline
//! and sanity-checks the resulting store. Exits non-zero on any failed
//! check.
//!
//! ```bash
//! densedb-smoke-load [PATH] [--dim N] [--verbose]
//! ```

use std::path::PathBuf;

use anyhow::{ensure, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use densedb_loader::{load_directory, LoaderConfig};
use densedb_vector::VectorStore;

/// DenseDB directory-loading smoke test
#[derive(Parser)]
#[command(name = "densedb-smoke-load", version)]
struct Cli {
    /// Directory containing .json document files
    #[arg(default_value = "test")]
    path: PathBuf,

    /// Embedding dimension of the documents in the directory
    #[arg(short, long, default_value_t = 20)]
    dim: usize,

    /// Parse worker count (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    workers: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let store = VectorStore::new(cli.dim);
    let config = LoaderConfig {
        workers: cli.workers,
        ..Default::default()
    };
    let stats = load_directory(&store, &cli.path, &config);

    ensure!(store.is_finalized(), "loader must leave the store serving");
    ensure!(
        store.len() == stats.documents_added,
        "store size {} disagrees with loader count {}",
        store.len(),
        stats.documents_added
    );

    if !store.is_empty() {
        // A stored embedding queried against the store must rank itself
        // (or an identical vector) first with cosine ~1.0.
        let probe = store
            .get_entry(0)
            .ok_or_else(|| anyhow::anyhow!("entry 0 not retrievable"))?;
        let query: Vec<f32> = probe.embedding().to_vec();
        let k = 5.min(store.len());
        let hits = store.search(&query, k, false);
        ensure!(hits.len() == k, "expected {k} hits, got {}", hits.len());
        ensure!(
            (hits[0].score - 1.0).abs() < 1e-3 || query.iter().all(|x| *x == 0.0),
            "self-query top score should be ~1.0, got {}",
            hits[0].score
        );
    }

    info!(
        files = stats.files_loaded,
        failed_files = stats.files_failed,
        documents = stats.documents_added,
        rejected = stats.documents_failed,
        mmap = stats.mmap_files,
        buffered = stats.buffered_files,
        mb_per_sec = %format!("{:.1}", stats.megabytes_per_second()),
        docs_per_sec = stats.documents_per_second() as u64,
        "directory smoke test passed"
    );
    Ok(())
}
