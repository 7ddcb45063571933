//! Growable storage for captured stacks.
//!
//! A record occupies `len + 3` slots in each of two parallel arrays:
//!
//! ```text
//! frames: [len][frame_0 .. frame_{len-1}][reserved][class]
//! lines:  [len][line_0  .. line_{len-1} ][0       ][0    ]
//! ```
//!
//! Frame 0 is the innermost frame.  The leading length lets a reader hop from
//! one record to the next without looking at its contents.

use std::collections::TryReserveError;

use crate::{ClassId, FrameId, LineNo};

// Length slot + reserved slot + class slot.
pub const RECORD_OVERHEAD: usize = 3;

/// Append-only record storage, backed by a frames array and a lines array
/// that always have the same length and the same record boundaries.
#[derive(Debug)]
pub struct RecordBuffer {
    frames: Vec<u64>,
    lines: Vec<LineNo>,
    capacity: usize,
    prev_free: Option<usize>,
    record_count: usize,
}

impl RecordBuffer {
    /// Allocate a buffer with room for `capacity` slots.  All-or-nothing, like
    /// `ensure_capacity`.
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let capacity = capacity.max(RECORD_OVERHEAD);
        let mut frames = Vec::new();
        frames.try_reserve_exact(capacity)?;
        let mut lines = Vec::new();
        lines.try_reserve_exact(capacity)?;
        Ok(Self {
            frames,
            lines,
            capacity,
            prev_free: None,
            record_count: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Offset of the next writable slot.
    pub fn next_free(&self) -> usize {
        self.frames.len()
    }

    /// Start of the most recently appended record, if it can still be rolled
    /// back.
    pub fn prev_free(&self) -> Option<usize> {
        self.prev_free
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Make sure at least `additional` slots are free past `next_free`,
    /// doubling the capacity as many times as needed.
    ///
    /// Either both arrays grow and keep their contents, or the buffer is left
    /// exactly as it was and the allocation error is returned.
    pub fn ensure_capacity(&mut self, additional: usize) -> Result<(), TryReserveError> {
        let required = self.next_free().saturating_add(additional);
        if required <= self.capacity {
            return Ok(());
        }

        let mut capacity = self.capacity.max(1);
        while capacity < required {
            capacity = capacity.saturating_mul(2);
        }

        let used = self.next_free();
        self.frames.try_reserve_exact(capacity - used)?;
        self.lines.try_reserve_exact(capacity - used)?;
        log::debug!(
            "record buffer grew from {} to {} slots ({} records)",
            self.capacity,
            capacity,
            self.record_count
        );
        self.capacity = capacity;
        Ok(())
    }

    /// Append one record.  The caller must have reserved `frames.len() + 3`
    /// slots with `ensure_capacity`.
    pub fn append_record(&mut self, frames: &[FrameId], lines: &[LineNo], class: ClassId) {
        debug_assert_eq!(frames.len(), lines.len());
        debug_assert!(self.next_free() + frames.len() + RECORD_OVERHEAD <= self.capacity);

        let start = self.next_free();
        let len = frames.len();

        self.frames.push(len as u64);
        self.frames.extend(frames.iter().map(|frame| frame.0));
        self.frames.push(0);
        self.frames.push(class.0);

        self.lines.push(len as LineNo);
        self.lines.extend_from_slice(lines);
        self.lines.push(0);
        self.lines.push(0);

        self.prev_free = Some(start);
        self.record_count += 1;
    }

    /// Remove the most recently appended record.  Only one level of rollback is
    /// available; returns `false` when there is nothing to roll back.
    pub fn rollback_last(&mut self) -> bool {
        match self.prev_free.take() {
            Some(start) => {
                self.frames.truncate(start);
                self.lines.truncate(start);
                self.record_count -= 1;
                true
            }
            None => false,
        }
    }

    /// Read the record starting at `offset`.  Offsets come from scanning the
    /// buffer from 0 (see `records` and `offsets`).
    pub fn record_at(&self, offset: usize) -> Record<'_> {
        let len = self.frames[offset] as usize;
        let body = offset + 1..offset + 1 + len;
        Record {
            offset,
            frames: &self.frames[body.clone()],
            lines: &self.lines[body],
            class: ClassId(self.frames[offset + len + 2]),
        }
    }

    /// Forward scan over all records.
    pub fn records(&self) -> Records<'_> {
        Records {
            buffer: self,
            offset: 0,
        }
    }

    /// Start offsets of all records, in append order.
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.record_count);
        offsets.extend(self.records().map(|record| record.offset));
        offsets
    }
}

/// Borrowed view of one stored record.
#[derive(Clone, Copy, Debug)]
pub struct Record<'a> {
    offset: usize,
    frames: &'a [u64],
    lines: &'a [LineNo],
    class: ClassId,
}

impl<'a> Record<'a> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Offset of the record that follows this one.
    pub fn next_offset(&self) -> usize {
        self.offset + self.frames.len() + RECORD_OVERHEAD
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame identities as stored, innermost first.
    pub fn raw_frames(&self) -> &'a [u64] {
        self.frames
    }

    pub fn frames(&self) -> impl Iterator<Item = FrameId> + 'a {
        self.frames.iter().map(|&frame| FrameId(frame))
    }

    pub fn lines(&self) -> &'a [LineNo] {
        self.lines
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    /// (frame, line) pairs, innermost first.
    pub fn stack(&self) -> Vec<(FrameId, LineNo)> {
        self.frames().zip(self.lines.iter().copied()).collect()
    }
}

pub struct Records<'a> {
    buffer: &'a RecordBuffer,
    offset: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        if self.offset >= self.buffer.next_free() {
            return None;
        }
        let record = self.buffer.record_at(self.offset);
        self.offset = record.next_offset();
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(ids: &[u64]) -> Vec<FrameId> {
        ids.iter().map(|&id| FrameId(id)).collect()
    }

    fn append(buffer: &mut RecordBuffer, ids: &[u64], lines: &[LineNo], class: u64) {
        buffer.ensure_capacity(ids.len() + RECORD_OVERHEAD).unwrap();
        buffer.append_record(&frames(ids), lines, ClassId(class));
    }

    #[test]
    fn record_layout() {
        let mut buffer = RecordBuffer::with_capacity(16).unwrap();
        append(&mut buffer, &[11, 12], &[1, 2], 7);
        append(&mut buffer, &[13], &[3], 8);

        assert_eq!(buffer.frames, vec![2, 11, 12, 0, 7, 1, 13, 0, 8]);
        assert_eq!(buffer.lines, vec![2, 1, 2, 0, 0, 1, 3, 0, 0]);
        assert_eq!(buffer.next_free(), 9);
        assert_eq!(buffer.prev_free(), Some(5));
        assert_eq!(buffer.record_count(), 2);
        assert_eq!(buffer.offsets(), vec![0, 5]);

        let second = buffer.record_at(5);
        assert_eq!(second.len(), 1);
        assert_eq!(second.raw_frames(), &[13]);
        assert_eq!(second.lines(), &[3]);
        assert_eq!(second.class(), ClassId(8));
    }

    #[test]
    fn growth_preserves_records() {
        let mut buffer = RecordBuffer::with_capacity(4).unwrap();
        let mut expected = vec![];
        for i in 0..200u64 {
            let depth = (i % 7) as usize + 1;
            let ids: Vec<u64> = (0..depth as u64).map(|d| i * 100 + d + 1).collect();
            let lines: Vec<LineNo> = (0..depth as LineNo).map(|d| d + i as LineNo).collect();
            append(&mut buffer, &ids, &lines, i);
            expected.push((ids, lines, i));
        }

        assert!(buffer.capacity() >= buffer.next_free());
        assert!(buffer.capacity().is_power_of_two());
        assert_eq!(buffer.record_count(), expected.len());

        let scanned: Vec<_> = buffer
            .records()
            .map(|record| {
                (
                    record.raw_frames().to_vec(),
                    record.lines().to_vec(),
                    record.class().0,
                )
            })
            .collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn ensure_capacity_doubles() {
        let mut buffer = RecordBuffer::with_capacity(8).unwrap();
        buffer.ensure_capacity(8).unwrap();
        assert_eq!(buffer.capacity(), 8);
        buffer.ensure_capacity(9).unwrap();
        assert_eq!(buffer.capacity(), 16);
        buffer.ensure_capacity(40).unwrap();
        assert_eq!(buffer.capacity(), 64);
    }

    #[test]
    fn failed_growth_leaves_buffer_untouched() {
        let mut buffer = RecordBuffer::with_capacity(8).unwrap();
        append(&mut buffer, &[1, 2], &[10, 20], 3);

        assert!(buffer.ensure_capacity(usize::MAX / 2).is_err());
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.next_free(), 5);
        assert_eq!(buffer.record_at(0).stack(), vec![(FrameId(1), 10), (FrameId(2), 20)]);
    }

    #[test]
    fn rollback_removes_only_last_record() {
        let mut buffer = RecordBuffer::with_capacity(16).unwrap();
        append(&mut buffer, &[1], &[1], 1);
        append(&mut buffer, &[2, 3], &[2, 3], 2);

        assert!(buffer.rollback_last());
        assert_eq!(buffer.record_count(), 1);
        assert_eq!(buffer.next_free(), 4);
        assert_eq!(buffer.lines.len(), 4);
        assert!(!buffer.rollback_last());

        append(&mut buffer, &[4], &[4], 4);
        let classes: Vec<_> = buffer.records().map(|r| r.class().0).collect();
        assert_eq!(classes, vec![1, 4]);
    }

    #[test]
    fn empty_buffer_has_no_records() {
        let buffer = RecordBuffer::with_capacity(0).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.records().count(), 0);
        assert!(buffer.offsets().is_empty());
    }
}
