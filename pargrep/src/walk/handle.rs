//! Open directory handles with a shared, lock-free entry reader.
//!
//! A handle owns one directory descriptor and a raw buffer filled by
//! `getdents64`. Several workers may drain the same handle concurrently:
//! the read cursor is advanced under a sentinel exchange, the holder of the
//! sentinel performs the single refill when the buffer is drained, and an
//! entry is copied out of the buffer before the sentinel is released, so a
//! later refill can never invalidate it.

use std::cell::UnsafeCell;
use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Raw entry buffer size per handle: 192 KiB.
pub(crate) const ENTRY_BUF_LEN: usize = 0x30000;

/// Cursor value meaning "held by a reader".
const CURSOR_HELD: usize = usize::MAX;

/// Stat snapshot of one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl FileMeta {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }

    fn from_stat(st: &libc::stat) -> Self {
        Self {
            size: st.st_size as u64,
            uid: st.st_uid,
            gid: st.st_gid,
            mode: st.st_mode,
        }
    }
}

/// One entry copied out of a handle's buffer.
pub struct DirEntry {
    name: CString,
}

impl DirEntry {
    pub fn bytes(&self) -> &[u8] {
        self.name.to_bytes()
    }

    pub fn c_name(&self) -> &CStr {
        &self.name
    }

    pub fn os_name(&self) -> &OsStr {
        OsStr::from_bytes(self.bytes())
    }

    pub fn is_dot(&self) -> bool {
        let name = self.bytes();
        name == b"." || name == b".."
    }
}

/// An owned open directory plus its bulk-read state.
pub struct DirHandle {
    fd: libc::c_int,
    path: PathBuf,
    depth: usize,
    buf: UnsafeCell<Box<[u8]>>,
    size: AtomicUsize,
    cursor: AtomicUsize,
    finished: AtomicBool,
    erased: AtomicBool,
}

// The raw buffer is only touched by the thread holding the cursor sentinel.
unsafe impl Send for DirHandle {}
unsafe impl Sync for DirHandle {}

impl DirHandle {
    fn from_fd(fd: libc::c_int, path: PathBuf, depth: usize) -> Self {
        Self {
            fd,
            path,
            depth,
            buf: UnsafeCell::new(vec![0u8; ENTRY_BUF_LEN].into_boxed_slice()),
            size: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            erased: AtomicBool::new(false),
        }
    }

    /// Opens a root directory by path.
    pub fn open_root(path: &Path) -> io::Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let fd = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self::from_fd(fd, path.to_path_buf(), 0))
    }

    /// Opens a subdirectory entry relative to this handle. Symlinks are
    /// refused at the descriptor level with `O_NOFOLLOW`.
    pub fn open_child(&self, entry: &DirEntry) -> io::Result<Self> {
        let fd = unsafe {
            libc::openat(
                self.fd,
                entry.c_name().as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self::from_fd(
            fd,
            self.path.join(entry.os_name()),
            self.depth + 1,
        ))
    }

    pub fn fd(&self) -> libc::c_int {
        self.fd
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Marks the handle as removed from the cache; returns the previous
    /// value, so exactly one caller wins the erase.
    pub(crate) fn mark_erased(&self) -> bool {
        self.erased.swap(true, Ordering::AcqRel)
    }

    /// Stats an entry of this directory without following symlinks.
    pub fn stat_entry(&self, entry: &DirEntry) -> io::Result<FileMeta> {
        let mut st = MaybeUninit::<libc::stat>::uninit();
        let rc = unsafe {
            libc::fstatat(
                self.fd,
                entry.c_name().as_ptr(),
                st.as_mut_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(FileMeta::from_stat(unsafe { &st.assume_init() }))
    }

    /// Returns the next entry of this directory, or `None` once every
    /// entry has been handed out. Safe to call from many threads; each
    /// entry is returned exactly once.
    pub fn next_entry(&self) -> Option<DirEntry> {
        loop {
            let held = self.cursor.swap(CURSOR_HELD, Ordering::Acquire);
            if held == CURSOR_HELD {
                std::hint::spin_loop();
                continue;
            }
            return self.advance(held);
        }
    }

    /// Advances the cursor we now hold, refilling the buffer when drained.
    fn advance(&self, mut cur: usize) -> Option<DirEntry> {
        loop {
            let size = self.size.load(Ordering::Relaxed);
            if cur >= size {
                if self.finished.load(Ordering::Relaxed) {
                    self.cursor.store(cur, Ordering::Release);
                    return None;
                }
                let buf = unsafe { &mut *self.buf.get() };
                let n = unsafe {
                    libc::syscall(
                        libc::SYS_getdents64,
                        self.fd,
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                    )
                };
                if n <= 0 {
                    self.finished.store(true, Ordering::Relaxed);
                    self.cursor.store(cur, Ordering::Release);
                    return None;
                }
                self.size.store(n as usize, Ordering::Relaxed);
                cur = 0;
                continue;
            }

            // linux_dirent64 layout: d_ino at 0, d_off at 8, d_reclen at 16,
            // d_type at 18, NUL-terminated d_name from 19.
            let buf = unsafe { &*self.buf.get() };
            let base = unsafe { buf.as_ptr().add(cur) };
            let ino = unsafe { std::ptr::read_unaligned(base as *const u64) };
            let reclen = unsafe { std::ptr::read_unaligned(base.add(16) as *const u16) } as usize;
            let next = cur + reclen;
            if reclen == 0 || next > size {
                // malformed record; treat the buffer as drained
                self.finished.store(true, Ordering::Relaxed);
                self.cursor.store(size, Ordering::Release);
                return None;
            }
            if ino == 0 {
                cur = next;
                continue;
            }
            let name = unsafe { CStr::from_ptr(base.add(19) as *const libc::c_char) }.to_owned();
            self.cursor.store(next, Ordering::Release);
            return Some(DirEntry { name });
        }
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Stats a path argument, following symlinks like a direct `stat` call.
pub(crate) fn stat_follow(path: &Path) -> io::Result<FileMeta> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let mut st = MaybeUninit::<libc::stat>::uninit();
    let rc = unsafe { libc::stat(c_path.as_ptr(), st.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(FileMeta::from_stat(unsafe { &st.assume_init() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn entry_named(name: &str) -> DirEntry {
        DirEntry {
            name: CString::new(name).unwrap(),
        }
    }

    #[test]
    fn test_dot_entries_are_recognized() {
        assert!(entry_named(".").is_dot());
        assert!(entry_named("..").is_dot());
        assert!(!entry_named(".hidden").is_dot());
        assert!(!entry_named("a").is_dot());
    }

    #[test]
    fn test_drains_all_entries() {
        let dir = tempdir().unwrap();
        for i in 0..100 {
            fs::write(dir.path().join(format!("f{i}")), "x").unwrap();
        }
        let handle = DirHandle::open_root(dir.path()).unwrap();

        let mut seen = HashSet::new();
        while let Some(entry) = handle.next_entry() {
            if entry.is_dot() {
                continue;
            }
            assert!(seen.insert(entry.os_name().to_os_string()));
        }
        assert_eq!(seen.len(), 100);
        // the handle stays drained
        assert!(handle.next_entry().is_none());
    }

    #[test]
    fn test_stat_entry_reports_size_and_type() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data"), "hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let handle = DirHandle::open_root(dir.path()).unwrap();

        while let Some(entry) = handle.next_entry() {
            if entry.is_dot() {
                continue;
            }
            let meta = handle.stat_entry(&entry).unwrap();
            match entry.bytes() {
                b"data" => {
                    assert!(meta.is_regular());
                    assert_eq!(meta.size, 5);
                }
                b"sub" => assert!(meta.is_dir()),
                other => panic!("unexpected entry {:?}", other),
            }
        }
    }

    #[test]
    fn test_open_child_refuses_symlinks() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        let handle = DirHandle::open_root(dir.path()).unwrap();

        while let Some(entry) = handle.next_entry() {
            if entry.bytes() == b"link" {
                assert!(handle.open_child(&entry).is_err());
            }
        }
    }

    #[test]
    fn test_concurrent_drain_hands_out_each_entry_once() {
        let dir = tempdir().unwrap();
        for i in 0..500 {
            fs::write(dir.path().join(format!("f{i:03}")), "x").unwrap();
        }
        let handle = Arc::new(DirHandle::open_root(dir.path()).unwrap());

        let mut threads = Vec::new();
        for _ in 0..4 {
            let handle = Arc::clone(&handle);
            threads.push(std::thread::spawn(move || {
                let mut names = Vec::new();
                while let Some(entry) = handle.next_entry() {
                    if !entry.is_dot() {
                        names.push(entry.os_name().to_os_string());
                    }
                }
                names
            }));
        }

        let mut all = Vec::new();
        for t in threads {
            all.extend(t.join().unwrap());
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 500, "entries were lost or duplicated");
        assert_eq!(unique.len(), 500);
    }
}
