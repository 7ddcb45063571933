//! `alloc_sampler` is a sampling allocation profiler.  It records the call stack
//! of one allocation out of every `interval`, together with the type of the
//! allocated object, and turns the recorded stacks into two reports:
//!
//! * a catalog of every frame that appears in a recorded stack, with a label
//!   and source location for each ([`Sampler::frames`]);
//! * the distinct recorded stacks, each with the number of times it was
//!   recorded ([`Sampler::samples`]).
//!
//! The sampler does not know how to observe allocations, walk stacks or name
//! frames; the program being profiled provides those through the traits in
//! [`host`].  Recording is cheap: a stack is copied into a growable record
//! buffer and nothing else happens until a report is requested.
//!
//! ```
//! use alloc_sampler::{ClassId, FrameId, FrameInfo, LineNo, Sampler};
//! use alloc_sampler::host::StackWalker;
//!
//! struct Walker;
//!
//! impl StackWalker for Walker {
//!     fn walk_stack(&mut self, _max: usize, frames: &mut Vec<FrameId>, lines: &mut Vec<LineNo>) {
//!         frames.extend([FrameId(1), FrameId(2)]);
//!         lines.extend([10, 20]);
//!     }
//! }
//!
//! let mut sampler = Sampler::with_interval(2).unwrap();
//! sampler.enable();
//! let class_of = |size: &u64| Some(ClassId(*size));
//! for _ in 0..5 {
//!     sampler.on_allocation(&16u64, &class_of, &mut Walker);
//! }
//! sampler.disable();
//!
//! assert_eq!(sampler.allocation_count(), 5);
//! let samples = sampler.samples();
//! assert_eq!(samples.len(), 1);
//! assert_eq!(samples[0].count, 3);
//!
//! let frames = sampler.frames(&|frame: FrameId| FrameInfo::new(format!("f{}", frame.0), None));
//! assert_eq!(frames.len(), 2);
//! ```
//!
//! ## Profiling native programs
//!
//! The [`native`] module plugs the sampler into the Rust allocator:
//!
//! ```no_run
//! use alloc_sampler::native::SamplingAllocator;
//!
//! #[global_allocator]
//! static GLOBAL: SamplingAllocator = SamplingAllocator;
//!
//! fn main() {}
//! ```
//!
//! For programs in other languages, use the companion `lib_alloc_sampler`
//! crate, which produces a dynamic library that intercepts `malloc` when loaded
//! with `LD_PRELOAD`:
//!
//! ```bash
//! LD_PRELOAD=liballoc_sampler_preload.so ./my_program
//! ```
//!
//! Each thread's samples are written to `alloc_sampler.<pid>/` when the thread
//! exits (see [`SamplerConfig`] for the `ALLOC_SAMPLER_*` environment
//! variables).  The `as_print` tool merges and prints them:
//!
//! ```bash
//! as_print --dir alloc_sampler.<pid> --threshold 0.2
//! ```
//!
//! where `--threshold` hides call-tree entries with fewer than `threshold`% of
//! the samples.

mod buffer;
mod catalog;
mod config;
mod error;
mod group;
pub mod host;
mod ids;
pub mod liveness;
pub mod native;
mod profile;
mod sampler;
mod sites;

pub use buffer::{Record, RecordBuffer, Records, RECORD_OVERHEAD};
pub use catalog::{build_catalog, FrameCatalog};
pub use config::{SamplerConfig, DEFAULT_MAX_DEPTH, ENV_DIR, ENV_INTERVAL, ENV_MAX_DEPTH};
pub use error::{ProfileError, SamplerError};
pub use group::{group_stacks, StackSample};
pub use ids::{ClassId, FrameId, FrameInfo, LineNo};
pub use profile::Profile;
pub use sampler::{Capture, Sampler};
pub use sites::{allocation_sites, AllocationSites, UNKNOWN_PATH};
