/*!
The shared process table: a single POSIX shared-memory record attached by the
kernel, the interrupt controller, and every worker.

Rust has no `volatile` keyword, so every field here is a small-integer atomic
with the ordering called out field-by-field below; this is the direct
substitute for the single-writer-per-field discipline the design relies on
instead of locks:

- `pc[i]`        — written only by worker `i` (relaxed; only that worker ever
                    reads it back for itself).
- `want_io[i]`   — set by worker `i` (relaxed), cleared by the kernel with
                    `Release` ordering when it moves `i` to WAITING so the
                    worker's prior write is visible before the clear is.
- `io_type[i]`   — written by worker `i` alongside `want_io[i]`.
- `device_busy`, `io_inflight_pid` — written only by the interrupt controller.
- `io_done_pid`, `io_done_type` — written by the interrupt controller with
                    `Release` ordering, consumed by the kernel with `Acquire`
                    ordering and then cleared.
- `done`         — set once by the kernel at shutdown, polled by the
                    interrupt controller.

The table is backed by `shm_open`/`mmap` rather than System V `shmget`/`shmat`
(the original coursework's mechanism): POSIX shared memory objects are
identified by a name instead of an integer id, which is what gets passed down
to spawned children on the command line. See `DESIGN.md` for why this
substitution was made.
*/

use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};

use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::config::MAX_WORKERS;

/// Raw layout mapped directly onto the shared-memory segment. Every field is
/// a fixed-width atomic so reads/writes from any attaching process are well
/// defined without a lock.
#[repr(C)]
struct RawTable {
    n_procs: AtomicU32,
    worker_pid: [AtomicI32; MAX_WORKERS],
    pc: [AtomicU32; MAX_WORKERS],
    want_io: [AtomicU8; MAX_WORKERS],
    io_type: [AtomicI32; MAX_WORKERS],
    device_busy: AtomicU8,
    io_inflight_pid: AtomicI32,
    io_done_pid: AtomicI32,
    io_done_type: AtomicI32,
    done: AtomicU8,
}

/// A handle onto the shared process table, either owned (created by the
/// kernel) or merely attached (the interrupt controller and workers).
///
/// Dropping a handle always unmaps it; only the owning handle additionally
/// unlinks the underlying shared-memory object, so attaching processes that
/// outlive a transient mapping never destroy state the kernel still needs.
pub struct SharedTable {
    ptr: *mut RawTable,
    name: String,
    owns: bool,
}

// SAFETY: every field of `RawTable` is an atomic type; concurrent access from
// multiple processes (and, within the Rust process holding this handle,
// multiple threads) is exactly what the type is for.
unsafe impl Send for SharedTable {}
unsafe impl Sync for SharedTable {}

impl SharedTable {
    /// Create and zero-initialize a new shared process table for `n_procs`
    /// workers. Fails if an object of the same name already exists.
    pub fn create(name: &str, n_procs: usize) -> io::Result<Self> {
        let cname = CString::new(name).map_err(io::Error::other)?;
        let fd = shm_open(
            cname.as_c_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(io::Error::from)?;

        let size = std::mem::size_of::<RawTable>() as libc::off_t;
        ftruncate(&fd, size).map_err(io::Error::from)?;

        let ptr = unsafe {
            mmap(
                None,
                std::num::NonZeroUsize::new(size as usize).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        }
        .map_err(io::Error::from)?;

        let table = Self {
            ptr: ptr.as_ptr() as *mut RawTable,
            name: name.to_string(),
            owns: true,
        };
        table.raw().n_procs.store(n_procs as u32, Ordering::Relaxed);
        Ok(table)
    }

    /// Attach an existing shared process table by name.
    pub fn attach(name: &str) -> io::Result<Self> {
        let cname = CString::new(name).map_err(io::Error::other)?;
        let fd = shm_open(cname.as_c_str(), OFlag::O_RDWR, Mode::empty()).map_err(io::Error::from)?;

        let size = std::mem::size_of::<RawTable>();
        let ptr = unsafe {
            mmap(
                None,
                std::num::NonZeroUsize::new(size).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        }
        .map_err(io::Error::from)?;

        Ok(Self {
            ptr: ptr.as_ptr() as *mut RawTable,
            name: name.to_string(),
            owns: false,
        })
    }

    #[inline]
    fn raw(&self) -> &RawTable {
        // SAFETY: `ptr` was produced by a successful `mmap` of
        // `size_of::<RawTable>()` bytes and is never reassigned or unmapped
        // before `Drop`.
        unsafe { &*self.ptr }
    }

    pub fn n_procs(&self) -> usize {
        self.raw().n_procs.load(Ordering::Relaxed) as usize
    }

    pub fn worker_pid(&self, i: usize) -> i32 {
        self.raw().worker_pid[i].load(Ordering::Relaxed)
    }

    pub fn set_worker_pid(&self, i: usize, pid: i32) {
        self.raw().worker_pid[i].store(pid, Ordering::Relaxed);
    }

    pub fn pc(&self, i: usize) -> u32 {
        self.raw().pc[i].load(Ordering::Relaxed)
    }

    pub fn set_pc(&self, i: usize, value: u32) {
        self.raw().pc[i].store(value, Ordering::Relaxed);
    }

    pub fn want_io(&self, i: usize) -> bool {
        self.raw().want_io[i].load(Ordering::Acquire) != 0
    }

    pub fn set_want_io(&self, i: usize, io_type: crate::proto::IoType) {
        self.raw().io_type[i].store(io_type.code(), Ordering::Relaxed);
        self.raw().want_io[i].store(1, Ordering::Release);
    }

    /// Clear `want_io`/`io_type` for slot `i`. Called by the kernel, with
    /// `Release` ordering, the instant it moves the slot to WAITING.
    pub fn clear_want_io(&self, i: usize) {
        self.raw().want_io[i].store(0, Ordering::Release);
        self.raw().io_type[i].store(-1, Ordering::Relaxed);
    }

    pub fn io_type(&self, i: usize) -> Option<crate::proto::IoType> {
        crate::proto::IoType::from_code(self.raw().io_type[i].load(Ordering::Relaxed))
    }

    pub fn device_busy(&self) -> bool {
        self.raw().device_busy.load(Ordering::Relaxed) != 0
    }

    pub fn set_device_busy(&self, busy: bool) {
        self.raw().device_busy.store(busy as u8, Ordering::Relaxed);
    }

    pub fn io_inflight_pid(&self) -> i32 {
        self.raw().io_inflight_pid.load(Ordering::Relaxed)
    }

    pub fn set_io_inflight_pid(&self, pid: i32) {
        self.raw().io_inflight_pid.store(pid, Ordering::Relaxed);
    }

    /// Write the completion summary. Called only by the interrupt
    /// controller, with `Release` ordering on the pid so the kernel's
    /// `Acquire` read in [`SharedTable::take_io_done`] is guaranteed to see
    /// the accompanying `io_done_type`.
    pub fn set_io_done(&self, pid: i32, io_type: crate::proto::IoType) {
        self.raw().io_done_type.store(io_type.code(), Ordering::Relaxed);
        self.raw().io_done_pid.store(pid, Ordering::Release);
    }

    /// Read and clear the completion summary. Returns `None` if no
    /// completion is pending (pid is 0).
    pub fn take_io_done(&self) -> Option<(i32, crate::proto::IoType)> {
        let pid = self.raw().io_done_pid.load(Ordering::Acquire);
        if pid == 0 {
            return None;
        }
        let io_type = crate::proto::IoType::from_code(self.raw().io_done_type.load(Ordering::Relaxed));
        self.raw().io_done_pid.store(0, Ordering::Relaxed);
        self.raw().io_done_type.store(-1, Ordering::Relaxed);
        io_type.map(|t| (pid, t))
    }

    pub fn done(&self) -> bool {
        self.raw().done.load(Ordering::Relaxed) != 0
    }

    pub fn set_done(&self) {
        self.raw().done.store(1, Ordering::Relaxed);
    }
}

impl Drop for SharedTable {
    fn drop(&mut self) {
        let size = std::mem::size_of::<RawTable>();
        if let Some(addr) = std::ptr::NonNull::new(self.ptr as *mut core::ffi::c_void) {
            // SAFETY: `addr`/`size` describe exactly the mapping created in
            // `create`/`attach`.
            let _ = unsafe { munmap(addr, size) };
        }
        if self.owns {
            if let Ok(cname) = CString::new(self.name.as_str()) {
                let _ = shm_unlink(cname.as_c_str());
            }
        }
    }
}
