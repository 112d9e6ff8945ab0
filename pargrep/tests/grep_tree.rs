//! End-to-end scenarios over real directory trees.

use pargrep::{run_with_sink, EngineKind, GrepConfig, OutputSink};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_capture(config: &GrepConfig) -> String {
    let buf = SharedBuf::default();
    let sink = Arc::new(OutputSink::new(Box::new(buf.clone())));
    run_with_sink(config, sink).unwrap();
    let bytes = buf.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

fn base_config(pattern: &str, root: &Path) -> GrepConfig {
    GrepConfig {
        pattern: pattern.to_string(),
        paths: vec![root.to_path_buf()],
        recursive: true,
        ..Default::default()
    }
}

#[test]
fn test_colored_matches_in_nested_tree() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("A/B")).unwrap();
    fs::write(dir.path().join("A/a.txt"), "needle\n").unwrap();
    fs::write(dir.path().join("A/B/b.txt"), "xx needle yy\n").unwrap();

    let config = GrepConfig {
        colored: true,
        ..base_config("needle", dir.path())
    };
    let out = run_capture(&config);

    // "A/B" sorts before "A/a"
    let mut lines: Vec<&str> = out.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with(&format!("{}:", dir.path().join("A/B/b.txt").display())));
    assert!(lines[0].contains("xx \x1b[7mneedle\x1b[27m yy"));
    assert!(lines[1].starts_with(&format!("{}:", dir.path().join("A/a.txt").display())));
    assert!(lines[1].contains("\x1b[7mneedle\x1b[27m"));
}

#[test]
fn test_literal_dfa_triple_match_offsets_ascend() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("f"), "foofoofoo").unwrap();

    let config = GrepConfig {
        engine: EngineKind::Dfa,
        literal: true,
        print_offset: true,
        no_line: true,
        ..base_config("foo", dir.path())
    };
    let out = run_capture(&config);

    let path = dir.path().join("f");
    let expected: Vec<String> = [0, 3, 6]
        .iter()
        .map(|off| format!("{}:Match at offset {off}", path.display()))
        .collect();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines, expected);
}

#[test]
fn test_dot_pattern_on_empty_file_yields_nothing() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("empty"), "").unwrap();

    let config = base_config(".", dir.path());
    assert_eq!(run_capture(&config), "");
}

#[test]
fn test_symlink_targets_never_reported() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("real")).unwrap();
    fs::write(dir.path().join("real/hit.txt"), "needle\n").unwrap();
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();

    let config = base_config("needle", dir.path());
    let out = run_capture(&config);
    assert_eq!(out.lines().count(), 1);
    assert!(!out.contains("alias"));
}

#[test]
fn test_parallel_run_equals_single_threaded() {
    let dir = tempdir().unwrap();
    for d in 0..20 {
        let sub = dir.path().join(format!("dir{d:02}"));
        fs::create_dir_all(sub.join("inner")).unwrap();
        for f in 0..50 {
            let content = if f % 3 == 0 {
                format!("file {d}/{f} has a needle here\n")
            } else {
                format!("file {d}/{f} has nothing\n")
            };
            fs::write(sub.join(format!("f{f:02}.txt")), &content).unwrap();
            fs::write(sub.join("inner").join(format!("g{f:02}.txt")), &content).unwrap();
        }
    }

    let single = base_config("needle", dir.path());
    let parallel = GrepConfig {
        cores: 4,
        ..base_config("needle", dir.path())
    };

    // compare as multisets: cross-file ordering is unspecified
    let count = |out: String| -> BTreeMap<String, usize> {
        let mut map = BTreeMap::new();
        for line in out.lines() {
            *map.entry(line.to_string()).or_insert(0) += 1;
        }
        map
    };
    let single_records = count(run_capture(&single));
    let parallel_records = count(run_capture(&parallel));
    assert!(!single_records.is_empty());
    assert_eq!(single_records, parallel_records);
}

#[test]
fn test_run_is_idempotent() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("one.txt"), "a needle\n").unwrap();
    fs::write(dir.path().join("sub/two.txt"), "another needle\n").unwrap();

    let config = base_config("needle", dir.path());
    let first = run_capture(&config);
    let second = run_capture(&config);

    let sorted = |out: &str| -> Vec<String> {
        let mut lines: Vec<String> = out.lines().map(str::to_string).collect();
        lines.sort_unstable();
        lines
    };
    assert_eq!(sorted(&first), sorted(&second));
    assert_eq!(first.lines().count(), 2);
}

#[test]
fn test_low_mem_does_not_change_record_set() {
    let dir = tempdir().unwrap();
    let mut content = String::new();
    for i in 0..500 {
        content.push_str(&format!("row {i} needle\n"));
    }
    fs::write(dir.path().join("data.txt"), &content).unwrap();

    let plain = base_config("needle", dir.path());
    let low_mem = GrepConfig {
        low_mem: 3,
        ..base_config("needle", dir.path())
    };

    let records = |out: String| -> std::collections::BTreeSet<String> {
        out.lines().map(str::to_string).collect()
    };
    assert_eq!(records(run_capture(&plain)), records(run_capture(&low_mem)));
}

#[test]
fn test_single_match_flag_reports_one_record_per_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("many.txt"), "needle\nneedle\nneedle\n").unwrap();

    let config = GrepConfig {
        single_match: true,
        ..base_config("needle", dir.path())
    };
    let out = run_capture(&config);
    assert_eq!(out.lines().count(), 1);
}

#[test]
fn test_multicore_without_recursion_is_rejected() {
    let config = GrepConfig {
        pattern: "x".to_string(),
        paths: vec![".".into()],
        cores: 4,
        ..Default::default()
    };
    let buf = SharedBuf::default();
    let sink = Arc::new(OutputSink::new(Box::new(buf.clone())));
    assert!(run_with_sink(&config, sink).is_err());
}

#[test]
fn test_non_recursive_multi_path_prefixes_records() {
    let dir = tempdir().unwrap();
    let one = dir.path().join("one.txt");
    let two = dir.path().join("two.txt");
    fs::write(&one, "a needle\n").unwrap();
    fs::write(&two, "b needle\n").unwrap();

    let config = GrepConfig {
        pattern: "needle".to_string(),
        paths: vec![one.clone(), two.clone()],
        ..Default::default()
    };
    let out = run_capture(&config);
    let mut lines: Vec<&str> = out.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with(&format!("{}:", one.display())));
    assert!(lines[1].starts_with(&format!("{}:", two.display())));
}
