//! Response writer with write-deadline, in-memory body buffering, and
//! hijack support for protocol upgrades.

use std::time::{Duration, Instant};

/// What happened to a response once writing finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Completed,
    DeadlineExceeded,
}

/// Buffers a response body in memory, tracks status, and enforces a write
/// deadline derived from server config. The buffer is a plain `Vec<u8>`
/// rather than a pool per-call: the worker pool already bounds how many of
/// these exist concurrently, so a pool would just move the
/// allocation cost around.
pub struct ResponseWriter {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    deadline: Instant,
    hijacked: bool,
}

impl ResponseWriter {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
            deadline: Instant::now() + write_timeout,
            hijacked: false,
        }
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Appends to the buffered body, respecting the write deadline.
    pub fn write(&mut self, chunk: &[u8]) -> WriteOutcome {
        if self.hijacked {
            return WriteOutcome::Completed;
        }
        if Instant::now() >= self.deadline {
            return WriteOutcome::DeadlineExceeded;
        }
        self.body.extend_from_slice(chunk);
        WriteOutcome::Completed
    }

    pub fn write_json(&mut self, value: &serde_json::Value) -> WriteOutcome {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.set_header("content-type", "application/json");
                self.write(&bytes)
            }
            Err(_) => WriteOutcome::DeadlineExceeded,
        }
    }

    /// Marks the connection as hijacked for a protocol upgrade. After this,
    /// the framework must not write to the original writer — every
    /// subsequent `write` is a silent no-op rather than corrupting a
    /// connection someone else now owns.
    pub fn hijack(&mut self) -> bool {
        if self.hijacked {
            return false;
        }
        self.hijacked = true;
        true
    }

    pub fn is_hijacked(&self) -> bool {
        self.hijacked
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (u16, Vec<(String, String)>, Vec<u8>) {
        (self.status, self.headers, self.body)
    }
}
