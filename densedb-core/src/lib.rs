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

//! DenseDB Core
//!
//! Concurrency primitives shared by the store and the loader:
//!
//! - **Arena**: lock-free bump allocator over chained 64 MiB chunks; backs
//!   every packed document record
//! - **BoundedQueue**: fixed-capacity lock-free queue between the file
//!   reader and the parsing workers
//! - **TopK**: bounded min-heap used per search worker and merged into the
//!   final ranking

pub mod arena;
pub mod queue;
pub mod topk;

pub use arena::{Arena, CHUNK_SIZE, MAX_ALIGN};
pub use queue::{BoundedQueue, QUEUE_CAPACITY};
pub use topk::{Hit, TopK};
