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

//! DenseDB Loader
//!
//! Batch ingest of `.json` document files into a
//! [`VectorStore`](densedb_vector::VectorStore): a single sequential file
//! reader feeds a bounded lock-free queue, parse workers decode documents
//! in parallel, and the store is finalized exactly once when every worker
//! has drained.

pub mod error;
pub mod loader;
pub mod mmap;

pub use error::{LoaderError, Result};
pub use loader::{find_json_files, load_directory, load_file, LoaderConfig, LoaderStats};
pub use mmap::MappedFile;
