use std::{ptr::NonNull, slice, sync::OnceLock};

use tracing::debug;

use crate::{
    error::{PoolError, Result},
    utils::align,
};

/// Virtual memory page size of the computer. This is usually 4096.
/// We can't know the value at compile time, so it is computed once.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Marker type the platform-specific memory primitives are implemented on.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The pool itself has nothing to do with the concrete
/// implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { Kernel::page_size() })
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use crate::kernel::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

/// Raw backing bytes of a pool.
///
/// The region is requested straight from the kernel, rounded up to whole
/// pages, and handed back when the `Storage` is dropped. Fresh storage reads
/// as zeroes.
///
/// ```text
/// +------------------------------------------+---------------+
/// |              len usable bytes            |  page padding |
/// +------------------------------------------+---------------+
/// ^ addr                                                     ^ addr + mapped
/// ```
pub(crate) struct Storage {
    addr: NonNull<u8>,
    /// Bytes handed out to the pool.
    len: usize,
    /// Bytes actually mapped (a multiple of the page size).
    mapped: usize,
}

// The region is exclusively owned by this value.
unsafe impl Send for Storage {}

impl Storage {
    /// Maps at least `len` bytes of fresh memory.
    pub fn request(len: usize) -> Result<Self> {
        let mapped = align(len.max(1), page_size()).ok_or(PoolError::OutOfMemory)?;

        let addr = unsafe { Kernel::request_memory(mapped) }.ok_or(PoolError::OutOfMemory)?;
        debug!(len, mapped, "mapped pool storage");

        Ok(Self { addr, len, mapped })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.addr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.addr.as_ptr(), self.len) }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        unsafe { Kernel::return_memory(self.addr.as_ptr(), self.mapped) };
        debug!(len = self.len, mapped = self.mapped, "returned pool storage");
    }
}
