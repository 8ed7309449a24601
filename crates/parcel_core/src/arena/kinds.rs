use super::{record_alloc, record_free, AllocError, ArenaAllocator, ArenaKind};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

const PAGE_SIZE: usize = 4096;
const DEVICE_ALIGN: usize = 256;

fn host_allocate(kind: ArenaKind, layout: Layout, min_align: usize) -> Result<(NonNull<u8>, Layout), AllocError> {
    let oom = AllocError::OutOfMemory {
        kind,
        size: layout.size(),
        align: layout.align(),
    };
    let layout = layout.align_to(min_align).map_err(|_| oom.clone())?;
    // SAFETY: callers never pass zero-sized layouts.
    let ptr = unsafe { alloc::alloc(layout) };
    let ptr = NonNull::new(ptr).ok_or(oom)?;
    record_alloc(kind, layout.size());
    Ok((ptr, layout))
}

unsafe fn host_deallocate(kind: ArenaKind, ptr: NonNull<u8>, layout: Layout, min_align: usize) {
    let layout = layout.align_to(min_align).unwrap_or(layout);
    record_free(kind, layout.size());
    alloc::dealloc(ptr.as_ptr(), layout);
}

/// Plain host memory from the global allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StdArena;

unsafe impl ArenaAllocator for StdArena {
    fn kind(&self) -> ArenaKind {
        ArenaKind::Std
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        host_allocate(self.kind(), layout, 1).map(|(ptr, _)| ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        host_deallocate(self.kind(), ptr, layout, 1)
    }
}

/// Page-aligned host memory, locked in RAM where the OS allows it.
///
/// Locking is best effort: an `mlock` refusal (e.g. RLIMIT_MEMLOCK) leaves
/// the pages pageable and is only traced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinnedArena;

unsafe impl ArenaAllocator for PinnedArena {
    fn kind(&self) -> ArenaKind {
        ArenaKind::Pinned
    }

    fn min_align(&self) -> usize {
        PAGE_SIZE
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let (ptr, layout) = host_allocate(self.kind(), layout, PAGE_SIZE)?;
        #[cfg(unix)]
        {
            // SAFETY: the range was just allocated with this size.
            let rc = unsafe { libc::mlock(ptr.as_ptr() as *const libc::c_void, layout.size()) };
            if rc != 0 {
                tracing::trace!(bytes = layout.size(), "mlock refused; pinned buffer stays pageable");
            }
        }
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        #[cfg(unix)]
        {
            let locked = layout.align_to(PAGE_SIZE).unwrap_or(layout);
            libc::munlock(ptr.as_ptr() as *const libc::c_void, locked.size());
        }
        host_deallocate(self.kind(), ptr, layout, PAGE_SIZE)
    }
}

/// Accelerator-resident memory, emulated on the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceArena;

unsafe impl ArenaAllocator for DeviceArena {
    fn kind(&self) -> ArenaKind {
        ArenaKind::Device
    }

    fn min_align(&self) -> usize {
        DEVICE_ALIGN
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        host_allocate(self.kind(), layout, DEVICE_ALIGN).map(|(ptr, _)| ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        host_deallocate(self.kind(), ptr, layout, DEVICE_ALIGN)
    }

    fn is_device_resident(&self) -> bool {
        true
    }

    fn is_host_accessible(&self) -> bool {
        false
    }

    fn synchronize(&self) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

/// Memory coherent between host and accelerator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagedArena;

unsafe impl ArenaAllocator for ManagedArena {
    fn kind(&self) -> ArenaKind {
        ArenaKind::Managed
    }

    fn min_align(&self) -> usize {
        DEVICE_ALIGN
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        host_allocate(self.kind(), layout, DEVICE_ALIGN).map(|(ptr, _)| ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        host_deallocate(self.kind(), ptr, layout, DEVICE_ALIGN)
    }

    fn is_device_resident(&self) -> bool {
        true
    }

    fn synchronize(&self) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

/// Device memory whose allocation and release are ordered on a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsyncArena {
    pub stream: u32,
}

impl AsyncArena {
    pub fn on_stream(stream: u32) -> Self {
        Self { stream }
    }
}

unsafe impl ArenaAllocator for AsyncArena {
    fn kind(&self) -> ArenaKind {
        ArenaKind::Async
    }

    fn min_align(&self) -> usize {
        DEVICE_ALIGN
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        host_allocate(self.kind(), layout, DEVICE_ALIGN).map(|(ptr, _)| ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        host_deallocate(self.kind(), ptr, layout, DEVICE_ALIGN)
    }

    fn is_device_resident(&self) -> bool {
        true
    }

    fn is_host_accessible(&self) -> bool {
        false
    }

    fn synchronize(&self) {
        tracing::trace!(stream = self.stream, "stream synchronize");
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}
