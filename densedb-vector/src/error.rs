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

//! Error types for the vector store

use thiserror::Error;

/// Failure surfaces of [`crate::VectorStore`].
///
/// A failed insert leaves the store unchanged; no error here affects any
/// other document's publication.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("embedding has {actual} values, expected {expected}")]
    Shape { expected: usize, actual: usize },

    #[error("embedding exceeds {expected} values")]
    EmbeddingOverflow { expected: usize },

    #[error("document table is full ({capacity} entries)")]
    TableFull { capacity: usize },

    #[error("arena refused allocation of {size} bytes (align {align})")]
    Allocation { size: usize, align: usize },

    #[error("store is serving; documents can no longer be added")]
    Finalized,
}

/// Coarse error category, for hosts that dispatch on kind rather than
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed JSON, missing field, or wrong scalar kind.
    Decode,
    /// Embedding shorter than the store dimension.
    Shape,
    /// Embedding longer than the store dimension, or entry table full.
    Capacity,
    /// Arena refused the request.
    Allocation,
    /// Insert attempted after finalize.
    Phase,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Decode(_) => ErrorKind::Decode,
            StoreError::Shape { .. } => ErrorKind::Shape,
            StoreError::EmbeddingOverflow { .. } | StoreError::TableFull { .. } => {
                ErrorKind::Capacity
            }
            StoreError::Allocation { .. } => ErrorKind::Allocation,
            StoreError::Finalized => ErrorKind::Phase,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
