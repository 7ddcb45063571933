use crate::{buffer::RecordBuffer, host::LivenessVisitor, ClassId, FrameId};

/// Report every frame and class handle stored in `buffer`.  Length and
/// reserved slots hold no handles and are not visited.
pub fn visit_records<S, V>(buffer: &RecordBuffer, visitor: &mut V)
where
    S: ?Sized,
    V: LivenessVisitor<S> + ?Sized,
{
    for record in buffer.records() {
        for &frame in record.raw_frames() {
            visitor.visit_frame(FrameId(frame));
        }
        visitor.visit_class(record.class());
    }
}

/// Visitor that simply collects what it is shown.
#[derive(Debug, Default)]
pub struct Collected {
    pub subscriptions: usize,
    pub frames: Vec<FrameId>,
    pub classes: Vec<ClassId>,
}

impl<S: ?Sized> LivenessVisitor<S> for Collected {
    fn visit_subscription(&mut self, _subscription: &S) {
        self.subscriptions += 1;
    }

    fn visit_frame(&mut self, frame: FrameId) {
        self.frames.push(frame);
    }

    fn visit_class(&mut self, class: ClassId) {
        self.classes.push(class);
    }
}
