//! # Message reassembly
//!
//! Turns the chunks of one inbound message back into a single byte stream.
//!
//! Chunks may repeat or overlap (a sender resuming after an interruption
//! re-sends from an earlier offset), so received bytes are tracked as a set
//! of disjoint intervals and each byte is counted once. Anything past the
//! announced total size is dropped.
//!
//! ```rust
//! use sigstack_msrp_core::reassembly::{ChunkOffset, MemoryContentStore, Reassembler};
//!
//! let mut r = Reassembler::with_expected_size(Some(11), MemoryContentStore::new());
//! assert_eq!(r.store(ChunkOffset::At(0), b"Hello").unwrap(), 5);
//! assert_eq!(r.store(ChunkOffset::At(5), b" World").unwrap(), 6);
//! assert_eq!(r.bytes_received_so_far(), 11);
//!
//! let finished = r.receiving_finished(false);
//! assert!(finished.is_complete());
//! assert_eq!(finished.store.as_bytes(), b"Hello World");
//! ```

use std::ops::Range;

use crate::error::{MsrpError, Result};
use crate::metadata::ReceivedMessageMetaData;

/// Where a chunk goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOffset {
    /// Right after the end of the previous store.
    Append,
    /// At this zero-based byte position.
    At(u64),
}

/// Destination of reassembled bytes, provided by the application.
pub trait ContentStore: Send + 'static {
    /// Write `data` starting at byte `offset`, growing the store as needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Content store backed by a `Vec<u8>`. Gaps are zero-filled.
///
/// Writes that would grow it past its limit are refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryContentStore {
    data: Vec<u8>,
    limit: usize,
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::with_limit(MemoryContentStore::DEFAULT_LIMIT)
    }
}

impl MemoryContentStore {
    pub const DEFAULT_LIMIT: usize = 16 * 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self { data: Vec::new(), limit }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl ContentStore for MemoryContentStore {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = usize::try_from(offset).map_err(|_| MsrpError::store("offset exceeds address space"))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| MsrpError::store("write exceeds address space"))?;
        if end > self.limit {
            return Err(MsrpError::store(format!(
                "write up to byte {} exceeds store limit of {}",
                end, self.limit
            )));
        }
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Sorted, disjoint, non-adjacent half-open intervals.
#[derive(Debug, Clone, Default)]
struct IntervalSet {
    ranges: Vec<Range<u64>>,
}

impl IntervalSet {
    /// Add `range` and return how many of its positions were not covered yet.
    fn insert(&mut self, range: Range<u64>) -> u64 {
        if range.start >= range.end {
            return 0;
        }
        let first = self.ranges.partition_point(|r| r.end < range.start);
        let mut last = first;
        let mut merged = range.clone();
        let mut already = 0;
        while last < self.ranges.len() && self.ranges[last].start <= range.end {
            let r = &self.ranges[last];
            already += r.end.min(range.end).saturating_sub(r.start.max(range.start));
            merged.start = merged.start.min(r.start);
            merged.end = merged.end.max(r.end);
            last += 1;
        }
        self.ranges.splice(first..last, std::iter::once(merged));
        (range.end - range.start) - already
    }

    fn covered(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }
}

/// Accumulates the chunks of one message.
#[derive(Debug)]
pub struct Reassembler<S> {
    meta: Option<ReceivedMessageMetaData>,
    expected_size: Option<u64>,
    max_size: Option<u64>,
    store: S,
    received: IntervalSet,
    next_append: u64,
    bytes_received: u64,
}

impl<S: ContentStore> Reassembler<S> {
    /// Reassembler for the message described by `meta`.
    pub fn new(meta: ReceivedMessageMetaData, store: S) -> Self {
        let expected_size = meta.expected_size;
        Self {
            meta: Some(meta),
            ..Self::with_expected_size(expected_size, store)
        }
    }

    /// Reassembler without message metadata.
    pub fn with_expected_size(expected_size: Option<u64>, store: S) -> Self {
        Self {
            meta: None,
            expected_size,
            max_size: None,
            store,
            received: IntervalSet::default(),
            next_append: 0,
            bytes_received: 0,
        }
    }

    /// Refuse chunks reaching past `max_size` bytes, and messages
    /// announcing more than that.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Write one chunk and return the number of bytes it added.
    ///
    /// Fails with [`MsrpError::TooLarge`] before touching the store when
    /// the chunk or the announced total goes past the size limit.
    pub fn store(&mut self, offset: ChunkOffset, data: &[u8]) -> Result<u64> {
        let start = match offset {
            ChunkOffset::Append => self.next_append,
            ChunkOffset::At(n) => n,
        };
        let chunk_end = start.saturating_add(data.len() as u64);

        let mut end = chunk_end;
        if let Some(limit) = self.expected_size {
            end = end.min(limit);
        }
        if let Some(max) = self.max_size {
            let size = self.expected_size.unwrap_or(end);
            if size > max || end > max {
                return Err(MsrpError::TooLarge {
                    size: size.max(end),
                    limit: max,
                });
            }
        }
        self.next_append = chunk_end;
        if start >= end {
            return Ok(0);
        }
        // Bounded by data.len(), so it fits in usize.
        let keep = (end - start) as usize;
        self.store.write_at(start, &data[..keep])?;

        let added = self.received.insert(start..end);
        self.bytes_received += added;
        debug_assert_eq!(self.bytes_received, self.received.covered());
        Ok(added)
    }

    /// Distinct bytes received so far. Never exceeds the expected size.
    pub fn bytes_received_so_far(&self) -> u64 {
        self.bytes_received
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    /// Whether every announced byte has arrived. Always false when the
    /// size was not announced.
    pub fn is_complete(&self) -> bool {
        self.expected_size == Some(self.bytes_received)
    }

    pub fn metadata(&self) -> Option<&ReceivedMessageMetaData> {
        self.meta.as_ref()
    }

    pub fn content(&self) -> &S {
        &self.store
    }

    /// Stop receiving and hand the content over.
    pub fn receiving_finished(self, aborted_or_timed_out: bool) -> FinishedMessage<S> {
        let complete = !aborted_or_timed_out
            && self.expected_size.map_or(true, |n| n == self.bytes_received);
        FinishedMessage {
            meta: self.meta,
            store: self.store,
            bytes_received: self.bytes_received,
            aborted: aborted_or_timed_out,
            complete,
        }
    }
}

/// A message that will not receive more bytes.
#[derive(Debug)]
pub struct FinishedMessage<S> {
    pub meta: Option<ReceivedMessageMetaData>,
    pub store: S,
    pub bytes_received: u64,
    pub aborted: bool,
    complete: bool,
}

impl<S> FinishedMessage<S> {
    /// Not aborted, and every announced byte arrived.
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
