//! Arena memory providers.
//!
//! The bump allocator only needs three things from the platform: map a huge
//! page aligned region, try to grow a region without moving it, and release
//! a region at teardown. [`MmapProvider`] does this with `mmap`/`mremap` and
//! transparent huge page hints, [`HeapProvider`] is a portable fallback on
//! top of the global allocator that never grows in place.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Minimum span size and span alignment.
pub const MINIMUM_HUGEPAGE: usize = 2 * 1024 * 1024;

pub trait ArenaProvider: Send + Sync {
    /// Map `size` bytes aligned to [`MINIMUM_HUGEPAGE`], `size` is a multiple of it.
    fn map(&self, size: usize) -> Option<NonNull<u8>>;

    /// Grow the mapping at `start` from `old_size` to `new_size` while
    /// keeping its address. Returns `false` if that is not possible.
    fn grow(&self, start: NonNull<u8>, old_size: usize, new_size: usize) -> bool;

    /// Release a mapping obtained from [`map`](Self::map).
    ///
    /// # Safety
    ///
    /// `start` and `size` must describe a live mapping of this provider and
    /// no reference into it may be used afterwards.
    unsafe fn unmap(&self, start: NonNull<u8>, size: usize);

    fn page_size(&self) -> usize {
        4096
    }

    fn name(&self) -> &'static str;
}

/// The platform's preferred provider.
pub fn default_provider() -> Box<dyn ArenaProvider> {
    #[cfg(unix)]
    {
        Box::new(MmapProvider::new())
    }
    #[cfg(not(unix))]
    {
        Box::new(HeapProvider)
    }
}

/// Spans carved out of the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapProvider;

impl ArenaProvider for HeapProvider {
    fn map(&self, size: usize) -> Option<NonNull<u8>> {
        debug_assert_eq!(size % MINIMUM_HUGEPAGE, 0);
        let layout = Layout::from_size_align(size, MINIMUM_HUGEPAGE).ok()?;
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    fn grow(&self, _start: NonNull<u8>, _old_size: usize, _new_size: usize) -> bool {
        false
    }

    unsafe fn unmap(&self, start: NonNull<u8>, size: usize) {
        if let Ok(layout) = Layout::from_size_align(size, MINIMUM_HUGEPAGE) {
            unsafe { alloc::dealloc(start.as_ptr(), layout) };
        }
    }

    fn name(&self) -> &'static str {
        "heap"
    }
}

#[cfg(unix)]
pub use self::mmap::MmapProvider;

#[cfg(unix)]
mod mmap {
    use super::{ArenaProvider, MINIMUM_HUGEPAGE};
    use std::ptr::{self, NonNull};

    /// Anonymous private mappings with `MADV_HUGEPAGE`.
    #[derive(Debug, Clone, Copy)]
    pub struct MmapProvider {
        page_size: usize,
    }

    impl MmapProvider {
        pub fn new() -> Self {
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            Self {
                page_size: usize::try_from(page_size).unwrap_or(4096).max(1),
            }
        }

        /// Find an address followed by plenty of unused address space, so
        /// later in-place growth has room.
        fn probe_headroom() -> *mut libc::c_void {
            const G1: usize = 1024 * 1024 * 1024;
            let mut giga = if usize::BITS <= 32 { 3 * G1 } else { 256 * G1 };
            while giga >= 16 * 1024 * 1024 {
                let addr = unsafe {
                    libc::mmap(
                        ptr::null_mut(),
                        giga,
                        libc::PROT_NONE,
                        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                        -1,
                        0,
                    )
                };
                if addr != libc::MAP_FAILED {
                    log::trace!("loft: address hint for {} MB: {:p}", giga >> 20, addr);
                    unsafe { libc::munmap(addr, giga) };
                    return addr;
                }
                giga >>= 1;
            }
            ptr::null_mut()
        }
    }

    impl Default for MmapProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    fn advise_hugepages(memory: *mut libc::c_void, size: usize) {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        if unsafe { libc::madvise(memory, size, libc::MADV_HUGEPAGE) } < 0 {
            log::debug!(
                "loft: madvise({:p}, {}, MADV_HUGEPAGE) failed: {}",
                memory,
                size,
                std::io::Error::last_os_error()
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let _ = (memory, size);
    }

    impl ArenaProvider for MmapProvider {
        fn map(&self, size: usize) -> Option<NonNull<u8>> {
            debug_assert_eq!(size % MINIMUM_HUGEPAGE, 0);
            let hint = Self::probe_headroom();
            let mut areasize = size + MINIMUM_HUGEPAGE;
            let memory = unsafe {
                libc::mmap(
                    hint,
                    areasize,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if memory == libc::MAP_FAILED {
                log::warn!(
                    "loft: mmap of {} bytes failed: {}",
                    areasize,
                    std::io::Error::last_os_error()
                );
                return None;
            }
            // discard unaligned head and tail
            let start = memory as usize;
            let head = start.next_multiple_of(MINIMUM_HUGEPAGE) - start;
            if head != 0 {
                unsafe { libc::munmap(memory, head) };
            }
            let aligned = (start + head) as *mut libc::c_void;
            areasize -= head;
            let tail = areasize - size;
            if tail != 0 {
                unsafe { libc::munmap((start + head + size) as *mut libc::c_void, tail) };
            }
            log::trace!("loft: mapped {} bytes at {:p}", size, aligned);
            advise_hugepages(aligned, size);
            NonNull::new(aligned.cast())
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        fn grow(&self, start: NonNull<u8>, old_size: usize, new_size: usize) -> bool {
            debug_assert_eq!(new_size % MINIMUM_HUGEPAGE, 0);
            let addr = start.as_ptr().cast::<libc::c_void>();
            // no MREMAP_MAYMOVE, the base address must stay put
            let memory = unsafe { libc::mremap(addr, old_size, new_size, 0) };
            if memory == libc::MAP_FAILED {
                log::debug!(
                    "loft: mremap {:p} {} -> {} failed: {}",
                    addr,
                    old_size,
                    new_size,
                    std::io::Error::last_os_error()
                );
                return false;
            }
            advise_hugepages(memory, new_size);
            memory == addr
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        fn grow(&self, _start: NonNull<u8>, _old_size: usize, _new_size: usize) -> bool {
            false
        }

        unsafe fn unmap(&self, start: NonNull<u8>, size: usize) {
            if unsafe { libc::munmap(start.as_ptr().cast(), size) } != 0 {
                log::debug!(
                    "loft: munmap {:p} failed: {}",
                    start,
                    std::io::Error::last_os_error()
                );
            }
        }

        fn page_size(&self) -> usize {
            self.page_size
        }

        fn name(&self) -> &'static str {
            "mmap"
        }
    }
}
