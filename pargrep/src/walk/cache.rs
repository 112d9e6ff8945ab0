//! Concurrent slot table of open directory handles.
//!
//! Slots are indexed by descriptor value, which the kernel guarantees
//! unique for the lifetime of the open handle, so no hashing and no global
//! lock are needed. `fetch1` briefly vacates a slot and restores it, which
//! lets any number of workers share one handle while it still has entries;
//! `erase` simply waits out such a vacancy.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use super::handle::DirHandle;

pub struct DirCache {
    slots: Box<[AtomicPtr<DirHandle>]>,
    rover: AtomicUsize,
    present: AtomicUsize,
}

impl DirCache {
    pub fn new(slot_count: usize) -> Self {
        let slots: Vec<AtomicPtr<DirHandle>> = (0..slot_count.max(1))
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            slots: slots.into_boxed_slice(),
            rover: AtomicUsize::new(0),
            present: AtomicUsize::new(0),
        }
    }

    /// Sizes the cache to the process's open-file limit, the upper bound of
    /// any descriptor value we can be asked to store.
    pub fn with_fd_limit() -> Self {
        Self::new(nofile_limit())
    }

    pub fn is_empty(&self) -> bool {
        self.present.load(Ordering::Acquire) == 0
    }

    /// Stores a handle into the slot named by its descriptor. The caller
    /// transfers one reference to the cache. Returns `false` (dropping the
    /// handle and closing its descriptor) when the descriptor exceeds the
    /// slot range.
    pub fn insert(&self, handle: Arc<DirHandle>) -> bool {
        let idx = handle.fd() as usize;
        if idx >= self.slots.len() {
            return false;
        }
        let raw = Arc::into_raw(handle) as *mut DirHandle;
        // The slot for a live descriptor is empty, except while an erase of
        // its previous occupant is still spinning a racing fetch1 out.
        while self.slots[idx]
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            std::hint::spin_loop();
        }
        self.present.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Claims one handle, leaving it in place for other workers. Probing
    /// starts at a roving index to spread contention.
    pub fn fetch1(&self) -> Option<Arc<DirHandle>> {
        if self.is_empty() {
            return None;
        }
        let start = self.rover.fetch_add(1, Ordering::Relaxed);
        for i in 0..self.slots.len() {
            let slot = &self.slots[(start + i) % self.slots.len()];
            let raw = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !raw.is_null() {
                let stored = unsafe { Arc::from_raw(raw as *const DirHandle) };
                let claimed = Arc::clone(&stored);
                slot.store(Arc::into_raw(stored) as *mut DirHandle, Ordering::Release);
                return Some(claimed);
            }
            if self.is_empty() {
                return None;
            }
        }
        None
    }

    /// Removes the handle stored under `fd`, dropping the cache's
    /// reference. Spins while a concurrent `fetch1` holds the pointer out
    /// of the slot.
    pub fn erase(&self, fd: libc::c_int) {
        let idx = fd as usize;
        debug_assert!(idx < self.slots.len());
        loop {
            let raw = self.slots[idx].swap(ptr::null_mut(), Ordering::AcqRel);
            if !raw.is_null() {
                self.present.fetch_sub(1, Ordering::AcqRel);
                unsafe { drop(Arc::from_raw(raw as *const DirHandle)) };
                return;
            }
            std::hint::spin_loop();
        }
    }
}

impl Drop for DirCache {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            let raw = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !raw.is_null() {
                unsafe { drop(Arc::from_raw(raw as *const DirHandle)) };
            }
        }
    }
}

/// Soft open-file limit, with a conservative fallback. Capped so that an
/// unlimited rlimit cannot balloon the slot table; descriptor values stay
/// bounded by the number of simultaneously open directories, far below the
/// cap.
pub(crate) fn nofile_limit() -> usize {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) };
    if rc == 0 && rl.rlim_cur > 0 && rl.rlim_cur != libc::RLIM_INFINITY {
        (rl.rlim_cur as usize).min(1 << 20)
    } else {
        1024
    }
}
