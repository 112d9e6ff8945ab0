//! Per-file scanning through overlapping memory-mapped windows.

use memmap2::{Advice, Mmap, MmapOptions};
use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::FromRawFd;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

use crate::engine::RegexEngine;
use crate::errors::{GrepError, GrepResult};
use crate::sink::OutputSink;
use crate::walk::handle::stat_follow;
use crate::walk::FileMeta;

/// Bytes re-mapped at the start of each new window so that matches up to
/// this long straddling a window boundary are found intact.
pub const WINDOW_OVERLAP: usize = 0x1000;

/// Maximum line bytes reconstructed on each side of a match.
const LINE_CONTEXT: usize = 511;

/// Windows above this size are advised as sequential reads.
const SEQUENTIAL_THRESHOLD: usize = 4 * 0x1000;

const START_INVERT: &[u8] = b"\x1b[7m";
const STOP_INVERT: &[u8] = b"\x1b[27m";

/// Record formatting switches for one run.
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// Reconstruct and print the line around each match.
    pub print_line: bool,
    /// Print `Match at offset N` for each match.
    pub print_offset: bool,
    /// Bracket the matched span with ANSI invert sequences.
    pub colored: bool,
    /// Prefix records with the file path even outside recursive mode.
    pub print_path: bool,
    /// Stop scanning a file after its first match.
    pub single_match: bool,
    /// Set by the recursive drivers; implies path prefixes.
    pub recursive: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            print_line: true,
            print_offset: false,
            colored: false,
            print_path: false,
            single_match: false,
            recursive: false,
        }
    }
}

/// Scans one regular file at a time against a compiled engine, building
/// records into a private buffer that is flushed through the shared sink.
/// One matcher lives on each worker.
pub struct FileMatcher {
    engine: Box<dyn RegexEngine>,
    min_len: usize,
    chunk_size: usize,
    opts: MatchOptions,
    sink: Arc<OutputSink>,
    buf: Vec<u8>,
    euid: u32,
}

impl FileMatcher {
    pub fn new(
        engine: Box<dyn RegexEngine>,
        chunk_size: usize,
        opts: MatchOptions,
        sink: Arc<OutputSink>,
    ) -> Self {
        let min_len = engine.min_len() as usize;
        // window offsets must stay page-aligned, and a window must outsize
        // its own overlap
        let chunk_size = (chunk_size & !(WINDOW_OVERLAP - 1)).max(2 * WINDOW_OVERLAP);
        Self {
            engine,
            min_len,
            chunk_size,
            opts,
            sink,
            buf: Vec::new(),
            euid: unsafe { libc::geteuid() },
        }
    }

    /// Matches a file discovered by the walker, opened relative to its
    /// directory descriptor.
    pub fn match_file(
        &mut self,
        dir_fd: libc::c_int,
        dir: &Path,
        name: &OsStr,
        meta: &FileMeta,
    ) -> GrepResult<()> {
        let path = dir.join(name);
        let file = self
            .open_entry(dir_fd, name, meta)
            .map_err(|e| GrepError::io(&path, e))?;
        self.scan_file(&file, &path, meta.size)
    }

    /// Matches a path given directly on the command line.
    pub fn match_arg(&mut self, path: &Path) -> GrepResult<()> {
        let meta = stat_follow(path).map_err(|e| GrepError::io(path, e))?;
        if meta.is_dir() {
            eprintln!("{}: is a directory, use -r to recurse", path.display());
            return Ok(());
        }
        if !meta.is_regular() || meta.size < self.min_len as u64 {
            return Ok(());
        }
        let file = self
            .open_entry(libc::AT_FDCWD, path.as_os_str(), &meta)
            .map_err(|e| GrepError::io(path, e))?;
        self.scan_file(&file, path, meta.size)
    }

    /// Read-only open that avoids dirtying the inode where permitted.
    fn open_entry(&self, dir_fd: libc::c_int, name: &OsStr, meta: &FileMeta) -> io::Result<File> {
        let c_name = CString::new(name.as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let mut flags = libc::O_RDONLY | libc::O_NOCTTY | libc::O_CLOEXEC;
        if meta.uid == self.euid || self.euid == 0 {
            flags |= libc::O_NOATIME;
        }
        let fd = unsafe { libc::openat(dir_fd, c_name.as_ptr(), flags) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    fn scan_file(&mut self, file: &File, path: &Path, size: u64) -> GrepResult<()> {
        trace!(path = %path.display(), size, "scanning file");
        let step = (self.chunk_size - WINDOW_OVERLAP) as u64;
        let mut off = 0u64;
        while off < size {
            let window_len = (size - off).min(self.chunk_size as u64) as usize;
            let window = self
                .map_window(file, off, window_len)
                .map_err(|e| GrepError::io(path, e))?;
            if window_len > SEQUENTIAL_THRESHOLD && !self.opts.single_match {
                // advisory only
                let _ = window.advise(Advice::Sequential);
            }

            let whole_file_matched = match self.scan_window(&window, path, off) {
                Ok(done) => done,
                Err(e) => {
                    // never flush a half-built record
                    self.buf.clear();
                    return Err(e);
                }
            };
            drop(window);

            if !self.buf.is_empty() {
                self.sink.write(&self.buf);
                self.buf.clear();
                if self.opts.single_match {
                    break;
                }
            }
            if whole_file_matched {
                break;
            }
            off += step;
        }
        Ok(())
    }

    fn map_window(&self, file: &File, off: u64, len: usize) -> io::Result<Mmap> {
        let mut opts = MmapOptions::new();
        opts.offset(off).len(len);
        #[cfg(target_os = "linux")]
        opts.populate();
        unsafe { opts.map(file) }
    }

    /// Scans one mapped window, appending records to the private buffer.
    /// Returns `true` when a bare `matches` record was produced, which
    /// covers the whole file.
    fn scan_window(&mut self, window: &[u8], path: &Path, file_off: u64) -> GrepResult<bool> {
        let window_len = window.len();
        let mut start = 0usize;

        // inclusive bound: a match may end exactly at the window end
        while start + self.min_len <= window_len {
            let Some((from, to)) = self.engine.find(window, start)? else {
                break;
            };
            let (m_start, m_end) = (start + from, start + to);

            if self.opts.recursive || self.opts.print_path {
                self.buf.extend_from_slice(path.as_os_str().as_bytes());
                self.buf.push(b':');
            }
            if self.opts.print_offset {
                let _ = writeln!(self.buf, "Match at offset {}", file_off + m_start as u64);
            }

            let mut after_len = 0usize;
            if self.opts.print_line {
                // walk back from the match until a newline, bounded by the
                // current search position and the context cap
                let mut line_start = m_start;
                while line_start > start
                    && window[line_start - 1] != b'\n'
                    && m_start - line_start < LINE_CONTEXT
                {
                    line_start -= 1;
                }
                let mut line_end = m_end;
                while line_end < window_len
                    && window[line_end] != b'\n'
                    && line_end - m_end < LINE_CONTEXT
                {
                    line_end += 1;
                }
                after_len = line_end - m_end;

                self.buf.extend_from_slice(&window[line_start..m_start]);
                if self.opts.colored {
                    self.buf.extend_from_slice(START_INVERT);
                }
                self.buf.extend_from_slice(&window[m_start..m_end]);
                if self.opts.colored {
                    self.buf.extend_from_slice(STOP_INVERT);
                }
                self.buf.extend_from_slice(&window[m_end..line_end]);
                self.buf.push(b'\n');
            } else if !self.opts.print_offset {
                self.buf.extend_from_slice(b"matches\n");
                return Ok(true);
            }

            // matches inside the printed trailing context are skipped;
            // empty matches must still make progress
            let next = m_end + after_len;
            start = if next > start { next } else { start + 1 };

            if self.opts.single_match {
                break;
            }
        }
        Ok(false)
    }
}
