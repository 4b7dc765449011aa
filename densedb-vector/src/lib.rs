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

//! DenseDB Vector Store
//!
//! In-memory exact-match similarity search over dense `f32` embeddings
//! attached to small text documents. Deliberately brute force: no ANN
//! index, no persistence, cosine only.
//!
//! # Lifecycle
//!
//! ```rust
//! use densedb_vector::VectorStore;
//!
//! let store = VectorStore::with_capacity(4, 1024);
//! store.add_document(
//!     r#"{"id":"a","text":"hello","metadata":{"embedding":[1.0,0.0,0.0,0.0]}}"#,
//! )?;
//! store.finalize();
//!
//! let hits = store.search(&[1.0, 0.0, 0.0, 0.0], 1, true);
//! assert_eq!(store.get_entry(hits[0].index).unwrap().id(), "a");
//! # Ok::<(), densedb_vector::StoreError>(())
//! ```

pub mod document;
pub mod error;
pub mod simd;
pub mod store;

pub use document::{EntryRef, RawDocument};
pub use error::{ErrorKind, Result, StoreError};
pub use simd::{dot_scalar, simd_capability, DotKernel, SimdCapability};
pub use store::{VectorStore, DEFAULT_CAPACITY};

pub use densedb_core::Hit;
