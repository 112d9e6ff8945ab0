//! Run drivers: argument matching, the single-threaded walk, and the
//! pinned worker pool.

use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::GrepConfig;
use crate::engine::compile_for;
use crate::errors::GrepResult;
use crate::filter::MetaFilter;
use crate::matcher::{FileMatcher, MatchOptions};
use crate::sink::OutputSink;
use crate::walk::{FileJob, WalkStatus, Walker};

/// Configuration for the find-style driver.
pub struct FindConfig {
    pub root: PathBuf,
    pub cores: usize,
    pub max_depth: usize,
    pub filter: MetaFilter,
}

impl FindConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cores: 1,
            max_depth: usize::MAX,
            filter: MetaFilter::new(),
        }
    }
}

/// Runs a configured search against standard output.
pub fn run(config: &GrepConfig) -> GrepResult<()> {
    run_with_sink(config, Arc::new(OutputSink::stdout()))
}

/// Runs a configured search against an arbitrary sink.
pub fn run_with_sink(config: &GrepConfig, sink: Arc<OutputSink>) -> GrepResult<()> {
    config.validate()?;

    // Compile once up front: option and pattern errors surface exactly one
    // time, and the minimum match width seeds the walker's size prefilter.
    let (probe, min_len) = compile_for(config)?;
    drop(probe);
    debug!(min_len, "pattern compiled");

    let chunk_size = config.effective_chunk_size();

    if !config.recursive {
        let opts = MatchOptions {
            print_line: !config.no_line,
            print_offset: config.print_offset,
            colored: config.colored,
            print_path: config.print_path || config.paths.len() > 1,
            single_match: config.single_match,
            recursive: false,
        };
        let (engine, _) = compile_for(config)?;
        let mut matcher = FileMatcher::new(engine, chunk_size, opts, sink);
        for path in &config.paths {
            if let Err(e) = matcher.match_arg(path) {
                eprintln!("{e}");
            }
        }
        return Ok(());
    }

    let opts = MatchOptions {
        print_line: !config.no_line,
        print_offset: config.print_offset,
        colored: config.colored,
        print_path: config.print_path,
        single_match: config.single_match,
        recursive: true,
    };
    let cores = config.effective_cores();

    for root in &config.paths {
        let walker = Arc::new(Walker::new(root, u64::from(min_len)));
        if cores <= 1 {
            let (engine, _) = compile_for(config)?;
            let mut matcher = FileMatcher::new(engine, chunk_size, opts, Arc::clone(&sink));
            drive_grep(&walker, &mut matcher);
        } else {
            std::thread::scope(|scope| {
                for core in 0..cores {
                    let walker = Arc::clone(&walker);
                    let sink = Arc::clone(&sink);
                    scope.spawn(move || {
                        if let Err(e) = pin_to_core(core) {
                            warn!(core, "could not pin worker: {e}");
                        }
                        // each worker compiles its own engine; the probe
                        // compile above already proved the pattern good
                        let engine = match compile_for(config) {
                            Ok((engine, _)) => engine,
                            Err(e) => {
                                eprintln!("{e}");
                                return;
                            }
                        };
                        let mut matcher = FileMatcher::new(engine, chunk_size, opts, sink);
                        drive_grep(&walker, &mut matcher);
                    });
                }
            });
        }
    }
    Ok(())
}

fn drive_grep(walker: &Walker, matcher: &mut FileMatcher) {
    let mut visit = |job: FileJob<'_>| {
        if let Err(e) = matcher.match_file(job.dir_fd, job.dir, job.name, &job.meta) {
            eprintln!("{e}");
        }
    };
    while walker.step(&mut visit) == WalkStatus::Again {}
}

/// Runs the find-style driver against standard output.
pub fn run_find(config: &FindConfig) -> GrepResult<()> {
    run_find_with_sink(config, Arc::new(OutputSink::stdout()))
}

/// Runs the find-style driver against an arbitrary sink, printing
/// `<dirname>/<basename>` for every accepted entry.
pub fn run_find_with_sink(config: &FindConfig, sink: Arc<OutputSink>) -> GrepResult<()> {
    let walker = Arc::new(Walker::with_limits(&config.root, 0, config.max_depth));
    let cores = config.cores.max(1);

    if cores == 1 {
        drive_find(&walker, &config.filter, &sink);
        return Ok(());
    }

    std::thread::scope(|scope| {
        for core in 0..cores {
            let walker = Arc::clone(&walker);
            let sink = Arc::clone(&sink);
            scope.spawn(move || {
                if let Err(e) = pin_to_core(core) {
                    warn!(core, "could not pin worker: {e}");
                }
                drive_find(&walker, &config.filter, &sink);
            });
        }
    });
    Ok(())
}

fn drive_find(walker: &Walker, filter: &MetaFilter, sink: &OutputSink) {
    let mut record = Vec::new();
    let mut visit = |job: FileJob<'_>| {
        if !filter.matches(job.name, &job.meta) {
            return;
        }
        record.clear();
        record.extend_from_slice(job.dir.as_os_str().as_bytes());
        record.push(b'/');
        record.extend_from_slice(job.name.as_bytes());
        record.push(b'\n');
        sink.write(&record);
    };
    while walker.step(&mut visit) == WalkStatus::Again {}
}

/// Binds the calling thread to one CPU. Best-effort; unsupported hosts and
/// restricted cpusets just leave the thread unpinned.
#[cfg(target_os = "linux")]
fn pin_to_core(core: usize) -> io::Result<()> {
    let capacity = std::mem::size_of::<libc::cpu_set_t>() * 8;
    if core >= capacity {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(_core: usize) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}
