//! Sampling of native (Rust, C, ...) heap allocations.
//!
//! Every thread gets its own `Sampler`, fed by [`SamplingAllocator`] or, when
//! the `lib_alloc_sampler` library is loaded with `LD_PRELOAD`, by the
//! interposed `malloc`.  Frames are instruction pointers, types are allocation
//! sizes.  When a thread exits, its samples are written as a `Profile` to
//! `<output_dir>/alloc_sampler.<pid>/alloc_sampler.<thread>`.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::{Cell, RefCell},
    path::PathBuf,
    process,
    sync::{Mutex, MutexGuard},
    thread_local,
};

use libc::{c_char, c_void, dlsym, pthread_self, RTLD_NEXT};
use once_cell::sync::Lazy;

use crate::{
    host::{FrameResolver, StackWalker, Switch, TypeResolver},
    ClassId, FrameId, FrameInfo, LineNo, Profile, ProfileError, Sampler, SamplerConfig,
    SamplerError,
};

/// Walks the native stack with `backtrace`.  Frame ids are instruction
/// pointers; line numbers are resolved later, by `NativeFrames`, and recorded
/// as 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeWalker;

impl StackWalker for NativeWalker {
    fn walk_stack(&mut self, max_frames: usize, frames: &mut Vec<FrameId>, lines: &mut Vec<LineNo>) {
        backtrace::trace(|frame| {
            frames.push(FrameId(frame.ip() as usize as u64));
            lines.push(0);
            frames.len() < max_frames
        });
    }
}

/// Symbolizes instruction pointers.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeFrames;

impl FrameResolver for NativeFrames {
    fn describe_frame(&self, frame: FrameId) -> FrameInfo {
        let mut info = FrameInfo::new(frame.to_string(), None);
        let mut resolved = false;
        backtrace::resolve(frame.0 as usize as *mut c_void, |symbol| {
            // Inlined frames are reported innermost first; keep that one.
            if resolved {
                return;
            }
            resolved = true;
            if let Some(name) = symbol.name() {
                info.label = name.to_string();
            }
            if let Some(file) = symbol.filename() {
                info.path = Some(format!("{}:{}", file.display(), symbol.lineno().unwrap_or(0)));
            }
        });
        info
    }
}

/// Reports allocations by size.  Zero-sized allocations are not reported.
#[derive(Clone, Copy, Debug, Default)]
pub struct SizeClasses;

impl TypeResolver<Layout> for SizeClasses {
    fn resolve_user_type(&self, layout: &Layout) -> Option<ClassId> {
        match layout.size() {
            0 => None,
            size => Some(ClassId(size as u64)),
        }
    }
}

static CONFIG: Lazy<Mutex<SamplerConfig>> = Lazy::new(|| {
    let config = SamplerConfig::from_env().unwrap_or_else(|e| {
        log::warn!("ignoring sampler environment: {}", e);
        SamplerConfig::default()
    });
    Mutex::new(config)
});

fn lock_config() -> MutexGuard<'static, SamplerConfig> {
    match CONFIG.lock() {
        Ok(guard) => guard,
        Err(err) => err.into_inner(),
    }
}

/// Set the configuration of samplers created from now on.  Threads that
/// already sample keep their interval and depth, but write their profile to
/// the new output directory.
pub fn configure(config: SamplerConfig) -> Result<(), SamplerError> {
    config.validate()?;
    *lock_config() = config;
    Ok(())
}

// Per-thread sampler; dumps its profile when the thread exits.
struct ThreadSampler {
    sampler: Sampler,
}

impl ThreadSampler {
    fn new() -> Option<Self> {
        let config = lock_config().clone();
        let mut sampler = Sampler::new(config, Switch::default()).ok()?;
        sampler.enable();
        Some(Self { sampler })
    }

    fn profile_path() -> PathBuf {
        let dir = lock_config()
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join(format!("alloc_sampler.{}", process::id()))
            .join(format!("alloc_sampler.{}", unsafe { pthread_self() }))
    }

    fn dump(&self) -> Result<Option<PathBuf>, ProfileError> {
        if self.sampler.overall_samples() == 0 {
            return Ok(None);
        }
        let path = Self::profile_path();
        Profile::from_sampler(&self.sampler, &NativeFrames).save(&path)?;
        Ok(Some(path))
    }
}

// Invoked when a thread terminates.  Dump thread's allocation profile to file.
impl Drop for ThreadSampler {
    fn drop(&mut self) {
        let _ = unnested(|| {
            if let Err(e) = self.dump() {
                log::warn!("failed to write allocation profile: {}", e);
            }
        });
    }
}

thread_local! {
    // Per-thread sampler, created on the first allocation.
    static SAMPLER: RefCell<Option<ThreadSampler>> = const { RefCell::new(None) };

    // Flag used to detect nested calls to the allocator.
    static NESTED: Cell<bool> = const { Cell::new(false) };
}

// Run `f` unless the allocator is already active on this thread; allocations
// made by `f` are not sampled.
fn unnested<R>(f: impl FnOnce() -> R) -> Option<R> {
    let entered = NESTED
        .try_with(|nested| !nested.replace(true))
        .unwrap_or(false);
    if !entered {
        return None;
    }
    let res = f();
    let _ = NESTED.try_with(|nested| nested.set(false));
    Some(res)
}

// Ignore errors accessing the TLS when the thread is being destroyed.
fn with_thread_sampler<R>(f: impl FnOnce(&mut Sampler) -> R) -> Option<R> {
    SAMPLER
        .try_with(|slot| {
            let mut slot = slot.try_borrow_mut().ok()?;
            if slot.is_none() {
                *slot = ThreadSampler::new();
            }
            slot.as_mut().map(|thread| f(&mut thread.sampler))
        })
        .ok()
        .flatten()
}

/// Resume sampling on the current thread.
pub fn enable() {
    let _ = unnested(|| with_thread_sampler(|sampler| sampler.enable()));
}

/// Stop sampling on the current thread.  Samples taken so far are kept.
pub fn disable() {
    let _ = unnested(|| with_thread_sampler(|sampler| sampler.disable()));
}

/// Inspect the current thread's sampler.
pub fn with_current_sampler<R>(f: impl FnOnce(&Sampler) -> R) -> Option<R> {
    unnested(|| with_thread_sampler(|sampler| f(sampler))).flatten()
}

/// Write the current thread's profile now.  Returns the file written, or
/// `None` if nothing has been sampled.
pub fn dump_current_thread() -> Result<Option<PathBuf>, ProfileError> {
    let res = unnested(|| {
        SAMPLER
            .try_with(|slot| match &*slot.borrow() {
                Some(thread) => thread.dump(),
                None => Ok(None),
            })
            .unwrap_or(Ok(None))
    });
    res.unwrap_or(Ok(None))
}

/// Allocator that samples the allocations performed by the program and
/// dumps per-thread profiles to the disk on thread exit.  Use the
/// `global_allocator` attribute to enable it:
///
/// ```no_run
/// use alloc_sampler::native::SamplingAllocator;
///
/// #[global_allocator]
/// static GLOBAL: SamplingAllocator = SamplingAllocator;
///
/// fn main() {}
/// ```
pub struct SamplingAllocator;

impl SamplingAllocator {
    fn record(layout: &Layout) {
        let _ = with_thread_sampler(|sampler| {
            sampler.on_allocation(layout, &SizeClasses, &mut NativeWalker)
        });
    }

    /// A replacement `malloc()` that samples `malloc` calls before forwarding
    /// them to the real `malloc`.  When loaded via `LD_PRELOAD`,
    /// `lib_alloc_sampler` redirects `malloc` calls to this method.
    ///
    /// # Safety
    ///
    /// Same contract as `libc::malloc`.
    pub unsafe fn malloc(size: libc::size_t) -> *mut c_void {
        let real_malloc: MallocFunc = std::mem::transmute(*REAL_MALLOC);
        let _ = unnested(|| {
            if let Ok(layout) = Layout::from_size_align(size, 1) {
                Self::record(&layout);
            }
        });
        real_malloc(size)
    }
}

static REAL_MALLOC: Lazy<usize> = Lazy::new(|| {
    let real_malloc = unsafe { dlsym(RTLD_NEXT, b"malloc\0".as_ptr() as *const c_char) };
    if real_malloc.is_null() {
        panic!("alloc_sampler: couldn't find original malloc");
    };
    real_malloc as usize
});

type MallocFunc = unsafe extern "C" fn(size: libc::size_t) -> *mut c_void;

unsafe impl GlobalAlloc for SamplingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _ = unnested(|| Self::record(&layout));
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
    }
}
