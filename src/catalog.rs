//! Deduplicated frame catalog.

use std::collections::BTreeMap;

use crate::{buffer::RecordBuffer, host::FrameResolver, FrameId, FrameInfo};

/// Every distinct frame referenced by the captured stacks, with its display
/// metadata.
pub type FrameCatalog = BTreeMap<FrameId, FrameInfo>;

/// Build the catalog of `buffer`, describing each distinct frame once.
///
/// All frame slots are copied into one array and sorted (placeholders last),
/// so duplicates end up next to each other and a single pass finds them.
pub fn build_catalog<R>(buffer: &RecordBuffer, resolver: &R) -> FrameCatalog
where
    R: FrameResolver + ?Sized,
{
    let mut frames: Vec<u64> = Vec::with_capacity(buffer.next_free());
    for record in buffer.records() {
        frames.extend_from_slice(record.raw_frames());
    }
    frames.sort_unstable_by_key(|&frame| (frame == 0, frame));

    let mut catalog = FrameCatalog::new();
    let mut i = 0;
    while i < frames.len() {
        let frame = frames[i];
        if frame == 0 {
            break;
        }
        let run = frames[i..].iter().take_while(|&&other| other == frame).count();
        catalog.insert(FrameId(frame), resolver.describe_frame(FrameId(frame)));
        i += run;
    }
    catalog
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{buffer::RECORD_OVERHEAD, ClassId, LineNo};

    struct CountingResolver {
        calls: RefCell<Vec<FrameId>>,
    }

    impl FrameResolver for CountingResolver {
        fn describe_frame(&self, frame: FrameId) -> FrameInfo {
            self.calls.borrow_mut().push(frame);
            FrameInfo::new(format!("frame{}", frame.0), Some("app.rb".to_string()))
        }
    }

    fn buffer_with(stacks: &[&[u64]]) -> RecordBuffer {
        let mut buffer = RecordBuffer::with_capacity(4).unwrap();
        for stack in stacks {
            let frames: Vec<FrameId> = stack.iter().map(|&f| FrameId(f)).collect();
            let lines: Vec<LineNo> = vec![1; frames.len()];
            buffer.ensure_capacity(frames.len() + RECORD_OVERHEAD).unwrap();
            buffer.append_record(&frames, &lines, ClassId(99));
        }
        buffer
    }

    #[test]
    fn describes_each_frame_once() {
        let buffer = buffer_with(&[&[3, 1, 2], &[1, 2], &[5, 3, 1, 2], &[1, 2]]);
        let resolver = CountingResolver {
            calls: RefCell::new(vec![]),
        };

        let catalog = build_catalog(&buffer, &resolver);

        let keys: Vec<u64> = catalog.keys().map(|frame| frame.0).collect();
        assert_eq!(keys, vec![1, 2, 3, 5]);
        assert_eq!(resolver.calls.borrow().len(), 4);
        assert_eq!(catalog[&FrameId(5)].label, "frame5");
    }

    #[test]
    fn skips_placeholders_and_non_frame_slots() {
        // The class (99), lengths and reserved slots must not leak into the
        // catalog; neither does a zero frame.
        let buffer = buffer_with(&[&[0, 7], &[7]]);
        let catalog = build_catalog(&buffer, &|frame: FrameId| FrameInfo::new(frame.to_string(), None));
        assert_eq!(catalog.keys().copied().collect::<Vec<_>>(), vec![FrameId(7)]);
    }

    #[test]
    fn empty_buffer_gives_empty_catalog() {
        let buffer = RecordBuffer::with_capacity(0).unwrap();
        let catalog = build_catalog(&buffer, &|_: FrameId| -> FrameInfo { unreachable!() });
        assert!(catalog.is_empty());
    }
}
