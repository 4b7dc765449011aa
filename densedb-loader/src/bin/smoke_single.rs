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

//! Single-document smoke test
//!
//! Drives one handcrafted document through insert, finalize, search, and
//! entry retrieval. Exits non-zero on any failed check.
//!
//! ```bash
//! densedb-smoke-single [--verbose]
//! ```

use anyhow::{ensure, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use densedb_vector::VectorStore;

const DIM: usize = 20;

const DOC: &str = r#"{
    "id": "smoke-1",
    "text": "Test document for the smoke run",
    "metadata": {
        "embedding": [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0,
                      0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0],
        "category": "smoke"
    }
}"#;

/// DenseDB single-document smoke test
#[derive(Parser)]
#[command(name = "densedb-smoke-single", version)]
struct Cli {
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

    let store = VectorStore::with_capacity(DIM, 16);
    store.add_document(DOC)?;
    ensure!(store.len() == 1, "expected one document, got {}", store.len());

    store.finalize();
    ensure!(store.is_finalized(), "store did not reach the serving phase");

    let query: Vec<f32> = (1..=10)
        .chain(1..=10)
        .map(|i| i as f32 / 10.0)
        .collect();
    let hits = store.search(&query, 1, true);
    ensure!(hits.len() == 1, "expected one hit, got {}", hits.len());
    ensure!(
        (hits[0].score - 1.0).abs() < 1e-4,
        "self-similarity should be ~1.0, got {}",
        hits[0].score
    );

    let entry = store
        .get_entry(hits[0].index)
        .ok_or_else(|| anyhow::anyhow!("hit index {} not retrievable", hits[0].index))?;
    ensure!(entry.id() == "smoke-1", "unexpected id {:?}", entry.id());
    ensure!(
        entry.metadata_json().contains("\"category\""),
        "metadata was not passed through verbatim"
    );

    info!(score = hits[0].score, id = entry.id(), "single-document smoke test passed");
    Ok(())
}
