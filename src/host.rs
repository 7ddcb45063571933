//! Collaborators a `Sampler` needs from the program it profiles.

use crate::{ClassId, FrameId, FrameInfo, LineNo};

/// Handle to the source of allocation notifications.
pub trait Subscription {
    fn enable(&mut self);
    fn disable(&mut self);
    fn is_enabled(&self) -> bool;
}

/// Subscription for hosts that deliver notifications by calling
/// `Sampler::on_allocation` directly: it is just a flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Switch {
    enabled: bool,
}

impl Subscription for Switch {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Maps an allocated object to the type it is reported under.
pub trait TypeResolver<O: ?Sized> {
    /// `None` for objects that are internal to the host and should not show up
    /// in the profile.
    fn resolve_user_type(&self, object: &O) -> Option<ClassId>;
}

/// Captures the current call stack.
pub trait StackWalker {
    /// Push at most `max_frames` frames and their line numbers, innermost
    /// first.  Both vectors are empty on entry and must have equal length on
    /// return.
    fn walk_stack(&mut self, max_frames: usize, frames: &mut Vec<FrameId>, lines: &mut Vec<LineNo>);
}

/// Describes a frame for the frame catalog.
pub trait FrameResolver {
    fn describe_frame(&self, frame: FrameId) -> FrameInfo;
}

/// Receives every handle a sampler holds, so that a collector can keep them
/// alive.
pub trait LivenessVisitor<S: ?Sized> {
    fn visit_subscription(&mut self, subscription: &S);
    fn visit_frame(&mut self, frame: FrameId);
    fn visit_class(&mut self, class: ClassId);
}

impl<O: ?Sized, F> TypeResolver<O> for F
where
    F: Fn(&O) -> Option<ClassId>,
{
    fn resolve_user_type(&self, object: &O) -> Option<ClassId> {
        self(object)
    }
}

impl<F> FrameResolver for F
where
    F: Fn(FrameId) -> FrameInfo,
{
    fn describe_frame(&self, frame: FrameId) -> FrameInfo {
        self(frame)
    }
}
