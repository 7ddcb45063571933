//! Grouping of identical stacks.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{buffer::RecordBuffer, ClassId, FrameId, LineNo};

/// One distinct captured stack and the number of records equal to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSample {
    pub class: ClassId,
    pub count: usize,
    /// (frame, line) pairs, innermost first.
    pub frames: Vec<(FrameId, LineNo)>,
}

impl StackSample {
    /// Frame the allocation happened in.
    pub fn top(&self) -> Option<(FrameId, LineNo)> {
        self.frames.first().copied()
    }
}

// Length first, then the stored frames, lines, and finally the class.  Equal
// records compare equal; the order between distinct records means nothing
// beyond keeping equal ones adjacent.
fn compare_records(buffer: &RecordBuffer, a: usize, b: usize) -> Ordering {
    let a = buffer.record_at(a);
    let b = buffer.record_at(b);
    a.len()
        .cmp(&b.len())
        .then_with(|| a.raw_frames().cmp(b.raw_frames()))
        .then_with(|| a.lines().cmp(b.lines()))
        .then_with(|| a.class().cmp(&b.class()))
}

/// Collapse the records of `buffer` into one `StackSample` per distinct stack.
pub fn group_stacks(buffer: &RecordBuffer) -> Vec<StackSample> {
    let mut offsets = buffer.offsets();
    offsets.sort_unstable_by(|&a, &b| compare_records(buffer, a, b));

    let mut samples = Vec::new();
    let mut i = 0;
    while i < offsets.len() {
        let first = offsets[i];
        let run = offsets[i..]
            .iter()
            .take_while(|&&other| compare_records(buffer, first, other) == Ordering::Equal)
            .count();
        let record = buffer.record_at(first);
        samples.push(StackSample {
            class: record.class(),
            count: run,
            frames: record.stack(),
        });
        i += run;
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RECORD_OVERHEAD;

    fn push(buffer: &mut RecordBuffer, stack: &[(u64, LineNo)], class: u64) {
        let frames: Vec<FrameId> = stack.iter().map(|&(f, _)| FrameId(f)).collect();
        let lines: Vec<LineNo> = stack.iter().map(|&(_, l)| l).collect();
        buffer.ensure_capacity(frames.len() + RECORD_OVERHEAD).unwrap();
        buffer.append_record(&frames, &lines, ClassId(class));
    }

    fn sorted(mut samples: Vec<StackSample>) -> Vec<StackSample> {
        samples.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.frames.cmp(&b.frames)));
        samples
    }

    #[test]
    fn single_record_round_trips() {
        let mut buffer = RecordBuffer::with_capacity(8).unwrap();
        push(&mut buffer, &[(1, 10), (2, 20), (3, 30)], 7);

        assert_eq!(
            group_stacks(&buffer),
            vec![StackSample {
                class: ClassId(7),
                count: 1,
                frames: vec![(FrameId(1), 10), (FrameId(2), 20), (FrameId(3), 30)],
            }]
        );
    }

    #[test]
    fn counts_identical_stacks() {
        let mut buffer = RecordBuffer::with_capacity(8).unwrap();
        push(&mut buffer, &[(1, 10), (2, 20)], 7);
        push(&mut buffer, &[(4, 1)], 7);
        push(&mut buffer, &[(1, 10), (2, 20)], 7);

        let samples = sorted(group_stacks(&buffer));
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].count, 2);
        assert_eq!(samples[0].frames, vec![(FrameId(1), 10), (FrameId(2), 20)]);
        assert_eq!(samples[1].count, 1);
        assert_eq!(samples[1].top(), Some((FrameId(4), 1)));
    }

    #[test]
    fn lines_and_classes_distinguish_stacks() {
        let mut buffer = RecordBuffer::with_capacity(8).unwrap();
        push(&mut buffer, &[(1, 10)], 7);
        push(&mut buffer, &[(1, 11)], 7);
        push(&mut buffer, &[(1, 10)], 8);
        push(&mut buffer, &[(1, 10), (2, 1)], 7);
        push(&mut buffer, &[(1, 10)], 7);

        let samples = group_stacks(&buffer);
        assert_eq!(samples.len(), 4);
        assert_eq!(samples.iter().map(|s| s.count).sum::<usize>(), 5);
        let repeated: Vec<_> = samples.iter().filter(|s| s.count == 2).collect();
        assert_eq!(repeated.len(), 1);
        assert_eq!(repeated[0].class, ClassId(7));
        assert_eq!(repeated[0].frames, vec![(FrameId(1), 10)]);
    }

    #[test]
    fn shorter_stacks_sort_first() {
        let mut buffer = RecordBuffer::with_capacity(8).unwrap();
        push(&mut buffer, &[(9, 1), (9, 1)], 1);
        push(&mut buffer, &[(100, 1)], 1);

        let samples = group_stacks(&buffer);
        assert_eq!(samples[0].frames.len(), 1);
        assert_eq!(samples[1].frames.len(), 2);
    }

    #[test]
    fn empty_buffer_has_no_samples() {
        let buffer = RecordBuffer::with_capacity(0).unwrap();
        assert!(group_stacks(&buffer).is_empty());
    }
}
