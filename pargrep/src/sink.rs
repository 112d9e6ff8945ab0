use std::io::Write;
use std::sync::Mutex;

/// Mutually-exclusive writer over the match stream.
///
/// Every call writes one complete per-worker record buffer and flushes
/// before releasing the lock, so records from different workers are never
/// interleaved. Ordering across files is not guaranteed.
pub struct OutputSink {
    inner: Mutex<Box<dyn Write + Send>>,
}

impl OutputSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Writes one record buffer as a unit. Write failures (a closed pipe,
    /// typically) are swallowed; the scan itself must not die with the
    /// reader.
    pub fn write(&self, record: &[u8]) {
        let mut writer = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writer.write_all(record);
        let _ = writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

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

    #[test]
    fn test_records_are_never_interleaved() {
        let buf = SharedBuf::default();
        let sink = Arc::new(OutputSink::new(Box::new(buf.clone())));

        std::thread::scope(|s| {
            for worker in 0..8u8 {
                let sink = Arc::clone(&sink);
                s.spawn(move || {
                    // each record is a run of one distinct byte plus a newline
                    let record = vec![b'a' + worker; 64];
                    for _ in 0..100 {
                        let mut rec = record.clone();
                        rec.push(b'\n');
                        sink.write(&rec);
                    }
                });
            }
        });

        let out = buf.0.lock().unwrap();
        assert_eq!(out.len(), 8 * 100 * 65);
        for line in out.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
            assert_eq!(line.len(), 64);
            assert!(
                line.iter().all(|&b| b == line[0]),
                "a record was spliced with another worker's bytes"
            );
        }
    }
}
