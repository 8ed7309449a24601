//! Arena allocators for tile buffers
//!
//! Every buffer of every tile in a container comes from one arena type,
//! chosen as a type parameter of the container. The arena decides alignment
//! and residency; [`ArenaVec`] is the growable buffer built on top of it.
//!
//! Device-flavoured arenas are host-backed: no accelerator runtime is linked,
//! but they report the residency of the memory they stand in for so callers
//! exercise the same synchronization points.

mod kinds;
mod vec;

pub use kinds::{AsyncArena, DeviceArena, ManagedArena, PinnedArena, StdArena};
pub use vec::ArenaVec;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArenaKind {
    Std,
    Pinned,
    Device,
    Managed,
    Async,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("{kind:?} arena could not provide {size} bytes aligned to {align}")]
    OutOfMemory {
        kind: ArenaKind,
        size: usize,
        align: usize,
    },
}

/// Memory provider for particle buffers.
///
/// # Safety
/// A pointer returned by `allocate` must be valid for reads and writes of
/// `layout.size()` bytes, aligned to at least `layout.align()`, until it is
/// passed to `deallocate` with the same layout on this arena or a clone of it.
pub unsafe trait ArenaAllocator: Clone + Send + Sync + 'static {
    fn kind(&self) -> ArenaKind;

    /// Minimum alignment applied to every allocation.
    fn min_align(&self) -> usize {
        1
    }

    /// `layout.size()` is never zero.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// # Safety
    /// `ptr` must come from `allocate` on this arena (or a clone) with `layout`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    fn is_device_resident(&self) -> bool {
        false
    }

    fn is_host_accessible(&self) -> bool {
        true
    }

    /// Wait for outstanding work on this arena's memory.
    fn synchronize(&self) {}
}

/// Process-wide allocation statistics for one arena kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaUsage {
    pub live_bytes: usize,
    pub peak_bytes: usize,
    pub allocations: u64,
}

static USAGE: Lazy<Mutex<HashMap<ArenaKind, ArenaUsage>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) fn record_alloc(kind: ArenaKind, size: usize) {
    if let Ok(mut map) = USAGE.lock() {
        let entry = map.entry(kind).or_default();
        entry.live_bytes += size;
        entry.peak_bytes = entry.peak_bytes.max(entry.live_bytes);
        entry.allocations += 1;
    }
}

pub(crate) fn record_free(kind: ArenaKind, size: usize) {
    if let Ok(mut map) = USAGE.lock() {
        let entry = map.entry(kind).or_default();
        entry.live_bytes = entry.live_bytes.saturating_sub(size);
    }
}

/// Snapshot of the statistics for `kind`.
pub fn usage(kind: ArenaKind) -> ArenaUsage {
    USAGE
        .lock()
        .map(|map| map.get(&kind).copied().unwrap_or_default())
        .unwrap_or_default()
}
