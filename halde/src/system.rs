//! OS-facing primitives the collector depends on.
//!
//! Everything in here is deliberately platform-specific: anonymous memory
//! mapping for heap growth, the main-thread stack origin from process
//! metadata, the linker-provided bounds of the static data segment, and an
//! approximate read of the current stack pointer. The rest of the crate
//! treats these as opaque and stays layout-neutral.

use std::{io, ptr::NonNull, sync::OnceLock};

#[cfg(unix)]
#[allow(unused)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;

    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_ANON: i32 = 0x1000;

    pub const MAP_FAILED: isize = -1;

    /// posix mmap and munmap
    /// # Safety
    /// see valid mmap and munmap usage online
    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// posix memory allocation using mmap
    /// # Safety
    /// null must be checked
    #[inline]
    pub unsafe fn anonymous_mmap(len: usize) -> *mut u8 {
        // SAFETY: safe if contract holds
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// posix memory deallocation using munmap
    /// # Safety
    /// must be allocated by mmap
    #[inline]
    pub unsafe fn anonymous_munmap(ptr: *mut u8, len: usize) {
        // SAFETY: safe if contract holds
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

pub const OS_PAGE_SIZE: usize = 4096;

/// Requests a fresh read+write region from the OS. Returns `None` when the
/// mapping is denied; the caller treats that as heap exhaustion, not as a
/// fatal error.
#[must_use]
pub fn map_memory(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: result is null-checked below
    let ptr = unsafe { unix::anonymous_mmap(size) };
    NonNull::new(ptr)
}

pub fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: ptr must be from a map_memory allocation of the same size
    unsafe { unix::anonymous_munmap(ptr.as_ptr(), size) };
}

// ── Stack origin ──────────────────────────────────────────────────────

static STACK_ORIGIN: OnceLock<usize> = OnceLock::new();

/// High address bounding the main thread's stack, read once from
/// `/proc/self/stat` (field 28, `startstack`) and cached for the lifetime of
/// the process. Conservative stack scanning cannot be bounded without it, so
/// callers that need it treat failure as unrecoverable.
pub fn stack_origin() -> io::Result<usize> {
    if let Some(&origin) = STACK_ORIGIN.get() {
        return Ok(origin);
    }
    let origin = read_stack_origin()?;
    Ok(*STACK_ORIGIN.get_or_init(|| origin))
}

#[cfg(target_os = "linux")]
fn read_stack_origin() -> io::Result<usize> {
    let stat = std::fs::read_to_string("/proc/self/stat")?;
    // The comm field may contain spaces or parentheses, so split after the
    // last ") " rather than on plain whitespace.
    let (_, rest) = stat.rsplit_once(") ").ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "malformed /proc/self/stat")
    })?;
    // rest starts at field 3 (state); startstack is field 28.
    let field = rest.split_ascii_whitespace().nth(25).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing startstack field")
    })?;
    field.parse::<usize>().map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "unparsable startstack field")
    })
}

#[cfg(not(target_os = "linux"))]
fn read_stack_origin() -> io::Result<usize> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "stack origin lookup is only implemented for linux",
    ))
}

// ── Stack pointer ─────────────────────────────────────────────────────

/// Approximate stack pointer of the calling context.
///
/// The address of a local in a non-inlined frame sits at or below the
/// caller's own frame, which is exactly the lower bound a conservative scan
/// of `[here, stack_origin)` needs.
#[inline(never)]
pub fn approximate_stack_pointer() -> usize {
    let marker = 0u8;
    std::hint::black_box(&raw const marker) as usize
}

// ── Static data segment ───────────────────────────────────────────────

#[cfg(target_os = "linux")]
unsafe extern "C" {
    static etext: u8;
    static end: u8;
}

/// Bounds of the program's static data (initialized data plus bss), as the
/// half-open range `[etext, end)` exposed by the linker. Scanned as part of
/// the root set. Empty on targets without these symbols.
pub fn static_data_segment() -> (usize, usize) {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: only the addresses of the linker symbols are taken
        let start = unsafe { &raw const etext } as usize;
        let stop = unsafe { &raw const end } as usize;
        (start, stop)
    }
    #[cfg(not(target_os = "linux"))]
    {
        (0, 0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
