use crate::{
    buffer::{RecordBuffer, RECORD_OVERHEAD},
    catalog::{build_catalog, FrameCatalog},
    group::{group_stacks, StackSample},
    host::{FrameResolver, LivenessVisitor, StackWalker, Subscription, Switch, TypeResolver},
    liveness,
    sites::{allocation_sites, AllocationSites},
    FrameId, LineNo, SamplerConfig, SamplerError,
};

// The record buffer starts out with room for this many records of the depth
// seen on the first capture.
const INITIAL_RECORDS: usize = 100;

/// Outcome of a single allocation notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capture {
    /// The subscription is disabled; the event was not counted.
    Disabled,
    /// Counted, but not selected by the sampling interval.
    NotSampled,
    /// Selected, but the object has no user-visible type.
    NoUserType,
    /// Selected, but the stack walk produced no frames.
    EmptyStack,
    /// Selected, but the record buffer could not grow.
    BufferFull,
    /// A record was appended.
    Recorded,
}

/// Allocation sampler: counts allocation events, records the call stack of
/// one event out of every `interval`, and aggregates the recorded stacks on
/// demand.
#[derive(Debug)]
pub struct Sampler<S = Switch> {
    config: SamplerConfig,
    subscription: S,
    allocation_count: usize,
    overall_samples: usize,
    // Allocated on the first capture.
    buffer: Option<RecordBuffer>,
    // Scratch space for stack walks.
    frames: Vec<FrameId>,
    lines: Vec<LineNo>,
}

impl Sampler<Switch> {
    /// Sampler driven by direct `on_allocation` calls.
    pub fn with_interval(interval: usize) -> Result<Self, SamplerError> {
        Self::new(SamplerConfig::with_interval(interval), Switch::default())
    }
}

impl<S: Subscription> Sampler<S> {
    /// Create a disabled sampler.  The subscription is disabled if it is not
    /// already.
    pub fn new(config: SamplerConfig, mut subscription: S) -> Result<Self, SamplerError> {
        config.validate()?;
        if subscription.is_enabled() {
            subscription.disable();
        }
        Ok(Self {
            config,
            subscription,
            allocation_count: 0,
            overall_samples: 0,
            buffer: None,
            frames: Vec::new(),
            lines: Vec::new(),
        })
    }

    pub fn enable(&mut self) {
        if !self.subscription.is_enabled() {
            self.subscription.enable();
        }
    }

    /// Stop receiving notifications.  Records captured so far are kept.
    pub fn disable(&mut self) {
        if self.subscription.is_enabled() {
            self.subscription.disable();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.subscription.is_enabled()
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn interval(&self) -> usize {
        self.config.interval
    }

    /// Number of allocation events seen while enabled.
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// Number of records captured.
    pub fn overall_samples(&self) -> usize {
        self.overall_samples
    }

    pub fn subscription(&self) -> &S {
        &self.subscription
    }

    /// Raw record storage, once something has been captured.
    pub fn buffer(&self) -> Option<&RecordBuffer> {
        self.buffer.as_ref()
    }

    /// Handle one allocation notification.
    ///
    /// Events 0, N, 2N, ... (0-based, N = `interval`) are captured; the others
    /// are only counted.  A captured event whose object has no user type, whose
    /// stack is empty, or that does not fit in memory leaves no record.
    pub fn on_allocation<O, R, W>(&mut self, object: &O, resolver: &R, walker: &mut W) -> Capture
    where
        O: ?Sized,
        R: TypeResolver<O> + ?Sized,
        W: StackWalker + ?Sized,
    {
        if !self.subscription.is_enabled() {
            return Capture::Disabled;
        }

        self.allocation_count += 1;
        if (self.allocation_count - 1) % self.config.interval != 0 {
            return Capture::NotSampled;
        }

        let class = match resolver.resolve_user_type(object) {
            Some(class) => class,
            None => return Capture::NoUserType,
        };

        self.frames.clear();
        self.lines.clear();
        walker.walk_stack(self.config.max_depth, &mut self.frames, &mut self.lines);
        let depth = self
            .frames
            .len()
            .min(self.lines.len())
            .min(self.config.max_depth);
        if depth == 0 {
            return Capture::EmptyStack;
        }

        let slots = depth + RECORD_OVERHEAD;
        let buffer = match self.buffer.take() {
            Some(buffer) => buffer,
            None => match RecordBuffer::with_capacity(INITIAL_RECORDS * slots) {
                Ok(buffer) => {
                    log::debug!("allocated record buffer of {} slots", buffer.capacity());
                    buffer
                }
                Err(e) => {
                    log::warn!("failed to allocate record buffer: {}", e);
                    return Capture::BufferFull;
                }
            },
        };
        let buffer = self.buffer.insert(buffer);
        if let Err(e) = buffer.ensure_capacity(slots) {
            log::warn!(
                "dropping sample: record buffer cannot grow past {} slots: {}",
                buffer.capacity(),
                e
            );
            return Capture::BufferFull;
        }

        buffer.append_record(&self.frames[..depth], &self.lines[..depth], class);
        self.overall_samples += 1;
        Capture::Recorded
    }

    /// Catalog of every frame in the captured stacks.
    pub fn frames<R>(&self, resolver: &R) -> FrameCatalog
    where
        R: FrameResolver + ?Sized,
    {
        match &self.buffer {
            Some(buffer) => build_catalog(buffer, resolver),
            None => FrameCatalog::new(),
        }
    }

    /// Distinct captured stacks with their occurrence counts.
    pub fn samples(&self) -> Vec<StackSample> {
        match &self.buffer {
            Some(buffer) => group_stacks(buffer),
            None => Vec::new(),
        }
    }

    /// Sample counts by class, source path and line of the allocating frame.
    pub fn allocation_sites<R>(&self, resolver: &R) -> AllocationSites
    where
        R: FrameResolver + ?Sized,
    {
        allocation_sites(&self.samples(), &self.frames(resolver))
    }

    /// Show the collector every handle this sampler keeps alive.
    pub fn visit_live<V>(&self, visitor: &mut V)
    where
        V: LivenessVisitor<S> + ?Sized,
    {
        visitor.visit_subscription(&self.subscription);
        if let Some(buffer) = &self.buffer {
            liveness::visit_records::<S, V>(buffer, visitor);
        }
    }
}
