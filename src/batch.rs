use crate::error::Result;
use parking_lot::Mutex;
use std::io::BufRead;
use std::path::Path;

struct BatchState {
    reader: Box<dyn BufRead + Send>,
    remaining: usize,
    eof: bool,
}

/// Mutex-guarded line source for mini-batch processing.
///
/// Pool workers race to claim the next unclaimed line until the batch
/// quota or end of input is reached; the single mutex around file
/// positioning is the only coordination. End of input is a normal
/// batch/epoch boundary, never an error.
pub struct MiniBatchReader {
    state: Mutex<BatchState>,
    batch_size: usize,
}

impl MiniBatchReader {
    /// Open a text dataset at `path` with a per-batch line quota.
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self::from_reader(
            Box::new(std::io::BufReader::new(file)),
            batch_size,
        ))
    }

    /// Wrap any line source (used by tests and in-memory datasets).
    pub fn from_reader(reader: Box<dyn BufRead + Send>, batch_size: usize) -> Self {
        Self {
            state: Mutex::new(BatchState {
                reader,
                remaining: 0,
                eof: false,
            }),
            batch_size,
        }
    }

    /// Reset the quota for the next mini-batch.
    pub fn begin_batch(&self) {
        let mut state = self.state.lock();
        state.remaining = self.batch_size;
    }

    /// Claim the next line of the current batch.
    ///
    /// Returns `None` once the quota is spent or the input is exhausted.
    /// Trailing newlines are stripped; empty lines are skipped.
    pub fn next_line(&self) -> Option<String> {
        let mut state = self.state.lock();
        loop {
            if state.remaining == 0 || state.eof {
                return None;
            }
            let mut line = String::new();
            match state.reader.read_line(&mut line) {
                Ok(0) => {
                    state.eof = true;
                    return None;
                }
                Ok(_) => {
                    state.remaining -= 1;
                    while line.ends_with('\n') || line.ends_with('\r') {
                        line.pop();
                    }
                    if line.is_empty() {
                        continue;
                    }
                    return Some(line);
                }
                Err(e) => {
                    tracing::warn!("dataset read failed, treating as end of input: {e}");
                    state.eof = true;
                    return None;
                }
            }
        }
    }

    /// True once the underlying input has hit end of file.
    pub fn exhausted(&self) -> bool {
        self.state.lock().eof
    }
}
