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

//! Document Model and JSON Extraction
//!
//! A document arrives as JSON with three parts the store cares about:
//!
//! ```json
//! {
//!   "id": "doc-17",
//!   "text": "searchable payload",
//!   "metadata": { "embedding": [0.1, 0.2, ...], "anything": "else" }
//! }
//! ```
//!
//! `id` and `text` are borrowed from the input where the JSON allows it,
//! `metadata` is kept as raw sub-JSON and passed through verbatim. The
//! embedding array is streamed into a caller-supplied scratch buffer and
//! length-checked against the store dimension while it is read, so an
//! over-long array never allocates past `dim`.
//!
//! The packed record written into the arena has layout
//! `[embedding][id NUL][text NUL][metadata NUL]`, embedding-first so the
//! scan touches cache-adjacent floats.

use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::{Result, StoreError};

/// Borrowed view of one input document, produced by `serde_json` before the
/// store copies anything.
#[derive(Deserialize)]
pub struct RawDocument<'a> {
    #[serde(borrow)]
    pub id: Cow<'a, str>,
    #[serde(borrow)]
    pub text: Cow<'a, str>,
    #[serde(borrow)]
    pub metadata: &'a RawValue,
}

impl fmt::Debug for RawDocument<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDocument")
            .field("id", &self.id)
            .field("text_len", &self.text.len())
            .field("metadata_len", &self.metadata.get().len())
            .finish()
    }
}

/// Streams `metadata.embedding` into `out`, which is cleared first.
///
/// At most `dim` values are buffered. Returns a capacity error when the
/// array carries more than `dim` values and a shape error when it ends
/// short; anything structurally wrong (missing key, non-numeric element,
/// metadata not an object) surfaces as a decode error.
pub(crate) fn read_embedding(metadata: &RawValue, dim: usize, out: &mut Vec<f32>) -> Result<()> {
    out.clear();
    out.reserve(dim);

    let mut overflow = false;
    let mut deserializer = serde_json::Deserializer::from_str(metadata.get());
    MetadataSeed {
        dim,
        out: &mut *out,
        overflow: &mut overflow,
    }
    .deserialize(&mut deserializer)?;

    if overflow {
        return Err(StoreError::EmbeddingOverflow { expected: dim });
    }
    if out.len() != dim {
        return Err(StoreError::Shape {
            expected: dim,
            actual: out.len(),
        });
    }
    Ok(())
}

/// Walks the metadata object looking for the `embedding` key; every other
/// value is skipped without building it.
struct MetadataSeed<'b> {
    dim: usize,
    out: &'b mut Vec<f32>,
    overflow: &'b mut bool,
}

impl<'de> DeserializeSeed<'de> for MetadataSeed<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for MetadataSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a metadata object containing an embedding array")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let MetadataSeed { dim, out, overflow } = self;
        let mut found = false;
        while let Some(key) = map.next_key::<Cow<'_, str>>()? {
            if key == "embedding" && !found {
                found = true;
                map.next_value_seed(EmbeddingSeed {
                    dim,
                    out: &mut *out,
                    overflow: &mut *overflow,
                })?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        if !found {
            return Err(de::Error::missing_field("embedding"));
        }
        Ok(())
    }
}

/// Fills the scratch buffer with at most `dim` coerced `f32`s and flags the
/// overflow case instead of erroring, so the caller can classify it.
struct EmbeddingSeed<'b> {
    dim: usize,
    out: &'b mut Vec<f32>,
    overflow: &'b mut bool,
}

impl<'de> DeserializeSeed<'de> for EmbeddingSeed<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for EmbeddingSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of numbers")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(value) = seq.next_element::<f32>()? {
            if self.out.len() == self.dim {
                *self.overflow = true;
                // Drain the remainder so the deserializer stays positioned.
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                return Ok(());
            }
            self.out.push(value);
        }
        Ok(())
    }
}

/// One published store row: a packed arena record plus the byte lengths
/// needed to slice it back apart. The embedding dimension lives on the
/// store, not here.
#[derive(Clone, Copy)]
pub(crate) struct Entry {
    base: NonNull<u8>,
    id_len: u32,
    text_len: u32,
    meta_len: u32,
}

impl Entry {
    /// Copies `[embedding][id NUL][text NUL][meta NUL]` into `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must point to at least
    /// `embedding.len() * 4 + id.len() + text.len() + meta.len() + 3`
    /// writable bytes aligned for `f32`, exclusively owned by the caller.
    pub(crate) unsafe fn write_packed(
        dst: NonNull<u8>,
        embedding: &[f32],
        id: &str,
        text: &str,
        meta: &str,
    ) -> Entry {
        let mut p = dst.as_ptr();
        std::ptr::copy_nonoverlapping(embedding.as_ptr(), p.cast::<f32>(), embedding.len());
        p = p.add(embedding.len() * 4);
        for part in [id, text, meta] {
            std::ptr::copy_nonoverlapping(part.as_ptr(), p, part.len());
            p = p.add(part.len());
            p.write(0);
            p = p.add(1);
        }
        Entry {
            base: dst,
            id_len: id.len() as u32,
            text_len: text.len() as u32,
            meta_len: meta.len() as u32,
        }
    }

    pub(crate) fn embedding_ptr(&self) -> *mut f32 {
        self.base.as_ptr().cast::<f32>()
    }

    /// # Safety
    ///
    /// `dim` must be the dimension the record was written with, and the
    /// arena backing `base` must still be alive.
    pub(crate) unsafe fn embedding<'a>(&self, dim: usize) -> &'a [f32] {
        std::slice::from_raw_parts(self.base.as_ptr().cast::<f32>(), dim)
    }

    unsafe fn str_at<'a>(&self, offset: usize, len: usize) -> &'a str {
        let bytes = std::slice::from_raw_parts(self.base.as_ptr().add(offset), len);
        // SAFETY: the bytes were copied from a `&str` in `write_packed` and
        // never mutated afterwards.
        std::str::from_utf8_unchecked(bytes)
    }

    pub(crate) unsafe fn id<'a>(&self, dim: usize) -> &'a str {
        self.str_at(dim * 4, self.id_len as usize)
    }

    pub(crate) unsafe fn text<'a>(&self, dim: usize) -> &'a str {
        self.str_at(dim * 4 + self.id_len as usize + 1, self.text_len as usize)
    }

    pub(crate) unsafe fn metadata_json<'a>(&self, dim: usize) -> &'a str {
        self.str_at(
            dim * 4 + self.id_len as usize + 1 + self.text_len as usize + 1,
            self.meta_len as usize,
        )
    }
}

/// Borrowed view of a published entry; lives as long as the store.
pub struct EntryRef<'a> {
    entry: Entry,
    dim: usize,
    _store: PhantomData<&'a ()>,
}

// SAFETY: a read-only view of bytes that are never mutated after
// publication; the record outlives the borrow.
unsafe impl Send for EntryRef<'_> {}
unsafe impl Sync for EntryRef<'_> {}

impl<'a> EntryRef<'a> {
    pub(crate) fn new(entry: Entry, dim: usize) -> Self {
        EntryRef {
            entry,
            dim,
            _store: PhantomData,
        }
    }

    pub fn id(&self) -> &'a str {
        // SAFETY: the store keeps the arena alive for 'a and `dim` is the
        // dimension every record was written with.
        unsafe { self.entry.id(self.dim) }
    }

    pub fn text(&self) -> &'a str {
        // SAFETY: as in `id`.
        unsafe { self.entry.text(self.dim) }
    }

    /// The metadata sub-JSON exactly as it appeared in the input.
    pub fn metadata_json(&self) -> &'a str {
        // SAFETY: as in `id`.
        unsafe { self.entry.metadata_json(self.dim) }
    }

    pub fn embedding(&self) -> &'a [f32] {
        // SAFETY: as in `id`.
        unsafe { self.entry.embedding(self.dim) }
    }
}

impl fmt::Debug for EntryRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRef")
            .field("id", &self.id())
            .field("text_len", &self.text().len())
            .field("metadata_len", &self.metadata_json().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> &RawValue {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_document_fields() {
        let doc: RawDocument =
            serde_json::from_str(r#"{"id":"a","text":"hello","metadata":{"embedding":[1,2]}}"#)
                .unwrap();
        assert_eq!(doc.id, "a");
        assert_eq!(doc.text, "hello");
        assert_eq!(doc.metadata.get(), r#"{"embedding":[1,2]}"#);
    }

    #[test]
    fn metadata_is_kept_verbatim() {
        let json = r#"{"id":"a","text":"t","metadata":{"embedding":[1.5],"tag":  "x"}}"#;
        let doc: RawDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.metadata.get(), r#"{"embedding":[1.5],"tag":  "x"}"#);
    }

    #[test]
    fn embedding_exact_dim() {
        let mut out = Vec::new();
        read_embedding(raw(r#"{"embedding":[1,2,3,4]}"#), 4, &mut out).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn embedding_too_long_is_capacity() {
        let mut out = Vec::new();
        let err = read_embedding(raw(r#"{"embedding":[1,2,3]}"#), 2, &mut out).unwrap_err();
        assert!(matches!(err, StoreError::EmbeddingOverflow { expected: 2 }));
    }

    #[test]
    fn embedding_too_short_is_shape() {
        let mut out = Vec::new();
        let err = read_embedding(raw(r#"{"embedding":[1]}"#), 3, &mut out).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Shape {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[test]
    fn missing_embedding_is_decode() {
        let mut out = Vec::new();
        let err = read_embedding(raw(r#"{"other":1}"#), 2, &mut out).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn non_numeric_element_is_decode() {
        let mut out = Vec::new();
        let err = read_embedding(raw(r#"{"embedding":[1,"x"]}"#), 2, &mut out).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn metadata_not_an_object_is_decode() {
        let mut out = Vec::new();
        let err = read_embedding(raw("[1,2]"), 2, &mut out).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn other_metadata_keys_are_skipped() {
        let mut out = Vec::new();
        read_embedding(
            raw(r#"{"nested":{"deep":[true]},"embedding":[0.5,0.25],"z":null}"#),
            2,
            &mut out,
        )
        .unwrap();
        assert_eq!(out, vec![0.5, 0.25]);
    }

    #[test]
    fn packed_record_round_trips() {
        let mut backing = vec![0f32; 64];
        let dst = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let emb = [0.5f32, -1.0, 2.0];
        let entry = unsafe { Entry::write_packed(dst, &emb, "id-1", "some text", r#"{"k":1}"#) };
        unsafe {
            assert_eq!(entry.embedding(3), &emb);
            assert_eq!(entry.id(3), "id-1");
            assert_eq!(entry.text(3), "some text");
            assert_eq!(entry.metadata_json(3), r#"{"k":1}"#);
        }
    }
}
