//! Metadata predicate for the find-style driver.

use glob::Pattern;
use std::ffi::OsStr;

use crate::errors::{GrepError, GrepResult};
use crate::walk::FileMeta;

/// How requested permission bits are compared against an entry's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermMatch {
    /// Permission bits equal the requested bits exactly.
    Exact,
    /// Any of the requested bits is set (`/` prefix).
    Any,
    /// All of the requested bits are set (`-` prefix).
    All,
}

/// A conjunction of metadata conditions. Empty filters accept everything.
#[derive(Debug, Default)]
pub struct MetaFilter {
    uid: Option<u32>,
    gid: Option<u32>,
    file_type: Option<u32>,
    perm: Option<(PermMatch, u32)>,
    min_size: Option<u64>,
    name: Option<Pattern>,
}

impl MetaFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_uid(&mut self, uid: u32) {
        self.uid = Some(uid);
    }

    pub fn add_gid(&mut self, gid: u32) {
        self.gid = Some(gid);
    }

    /// File type by the letter `find` uses: `b c d p f l s`.
    pub fn add_type(&mut self, letter: char) -> GrepResult<()> {
        let mask = match letter {
            'b' => libc::S_IFBLK,
            'c' => libc::S_IFCHR,
            'd' => libc::S_IFDIR,
            'p' => libc::S_IFIFO,
            'f' => libc::S_IFREG,
            'l' => libc::S_IFLNK,
            's' => libc::S_IFSOCK,
            _ => {
                return Err(GrepError::config(format!(
                    "unknown file type letter '{letter}'"
                )))
            }
        };
        self.file_type = Some(mask);
        Ok(())
    }

    /// Octal permission bits, optionally prefixed with `-` (all bits must
    /// be set) or `/` (any bit suffices).
    pub fn add_perm(&mut self, spec: &str) -> GrepResult<()> {
        let (mode, digits) = match spec.as_bytes().first().copied() {
            Some(b'/') => (PermMatch::Any, &spec[1..]),
            Some(b'-') => (PermMatch::All, &spec[1..]),
            Some(_) => (PermMatch::Exact, spec),
            None => return Err(GrepError::config("empty permission spec")),
        };
        let bits = u32::from_str_radix(digits, 8)
            .map_err(|_| GrepError::config(format!("bad permission spec '{spec}'")))?;
        self.perm = Some((mode, bits));
        Ok(())
    }

    pub fn add_size(&mut self, min_size: u64) {
        self.min_size = Some(min_size);
    }

    /// Shell-glob match against the base name.
    pub fn add_name(&mut self, pattern: &str) -> GrepResult<()> {
        let compiled = Pattern::new(pattern)
            .map_err(|e| GrepError::config(format!("bad name pattern '{pattern}': {e}")))?;
        self.name = Some(compiled);
        Ok(())
    }

    /// Whether an entry passes every configured condition.
    pub fn matches(&self, name: &OsStr, meta: &FileMeta) -> bool {
        if let Some(uid) = self.uid {
            if meta.uid != uid {
                return false;
            }
        }
        if let Some(gid) = self.gid {
            if meta.gid != gid {
                return false;
            }
        }
        if let Some(mask) = self.file_type {
            if meta.mode & libc::S_IFMT != mask {
                return false;
            }
        }
        if let Some((mode, bits)) = self.perm {
            let perm = meta.mode & !libc::S_IFMT;
            let ok = match mode {
                PermMatch::Exact => perm == bits,
                PermMatch::Any => perm & bits != 0,
                PermMatch::All => perm & bits == bits,
            };
            if !ok {
                return false;
            }
        }
        if let Some(min_size) = self.min_size {
            if meta.size < min_size {
                return false;
            }
        }
        if let Some(pattern) = &self.name {
            if !pattern.matches(&name.to_string_lossy()) {
                return false;
            }
        }
        true
    }
}
