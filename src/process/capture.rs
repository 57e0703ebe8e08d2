//! Bounded capture of a child's output streams
//!
//! Each stream is drained on its own thread so a chatty validator can never
//! block on a full pipe. Bytes past the limit are read and thrown away.

use std::io::{ErrorKind, Read};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl Captured {
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// A stream being drained in the background
pub(crate) struct StreamCapture {
    buffer: Arc<Mutex<Captured>>,
    done: Receiver<()>,
}

impl StreamCapture {
    pub fn spawn<R: Read + Send + 'static>(reader: Option<R>, limit: usize) -> Self {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();

        if let Some(mut reader) = reader {
            let shared = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            let mut captured = shared.lock().unwrap_or_else(|e| e.into_inner());
                            let room = limit.saturating_sub(captured.bytes.len());
                            if n > room {
                                captured.truncated = true;
                            }
                            let keep = n.min(room);
                            captured.bytes.extend_from_slice(&chunk[..keep]);
                        }
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = tx.send(());
            });
        } else {
            let _ = tx.send(());
        }

        Self { buffer, done }
    }

    /// Wait until the stream hits EOF or `deadline` passes, then take what
    /// was captured. A grandchild holding the pipe open cannot hang us.
    pub fn finish(self, deadline: Instant) -> Captured {
        let wait = deadline.saturating_duration_since(Instant::now());
        let _ = self.done.recv_timeout(wait.max(Duration::from_millis(1)));
        let mut captured = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *captured)
    }
}
