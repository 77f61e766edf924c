//! Protocol output.
//!
//! The publisher owns the output sink (stdout in production). It writes the
//! handshake, one line per frame, and the closing brackets:
//!
//! ```text
//! {"version":1,"click_events":true}
//! [
//! [{"instance":"clock","full_text":"12:00"}],
//! []]
//! ```
//!
//! Every frame is followed by `,`, so the stream is closed with an empty
//! terminating frame and the outer `]`. The complete output after the header
//! line is a valid JSON array whose last element is `[]`.
//!
//! The publisher does no locking of its own. It lives inside the
//! [`Navigator`](crate::Navigator) state, whose mutex serializes every draw.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::protocol::{render_frame, Header, Props};

/// Closing write: an empty terminating frame plus the end of the outer array.
const CLOSING: &[u8] = b"[]]\n";

/// Writes i3bar frames to a sink.
pub struct Publisher {
    sink: Box<dyn Write + Send>,
    begun: bool,
    closed: bool,
    frames: u64,
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("begun", &self.begun)
            .field("closed", &self.closed)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Creates a publisher over any writer.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            begun: false,
            closed: false,
            frames: 0,
        }
    }

    /// Publisher writing to the process stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Publisher writing into memory, plus a handle to read it back.
    pub fn capture() -> (Self, CaptureSink) {
        let sink = CaptureSink::default();
        (Self::new(sink.clone()), sink)
    }

    /// Number of frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Returns `true` once the closing write happened.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes the handshake header and opens the frame array.
    pub fn begin(&mut self) -> Result<()> {
        let header = serde_json::to_string(&Header::default())?;
        writeln!(self.sink, "{}", header).context("Failed to write protocol header")?;
        writeln!(self.sink, "[").context("Failed to write protocol header")?;
        self.sink.flush().context("Failed to flush protocol header")?;
        self.begun = true;
        Ok(())
    }

    /// Writes one frame and flushes it.
    ///
    /// Draws after [`close`](Self::close) are ignored. A failed write may
    /// leave a partial frame behind, so the publisher closes itself and
    /// stops writing. A broken pipe means the bar went away and is not
    /// reported as an error.
    pub fn draw(&mut self, blocks: &[Props]) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let frame = render_frame(blocks)?;
        let written = writeln!(self.sink, "{},", frame).and_then(|()| self.sink.flush());
        if let Err(err) = written {
            self.closed = true;
            if err.kind() == io::ErrorKind::BrokenPipe {
                log::error!("[Publisher] Output closed by the bar, no further frames");
                return Ok(());
            }
            return Err(err).context("Failed to write frame, output closed");
        }
        self.frames += 1;
        Ok(())
    }

    /// Terminates the frame array. Safe to call more than once.
    ///
    /// Does nothing if the header was never written.
    pub fn close(&mut self) -> Result<()> {
        if self.closed || !self.begun {
            self.closed = true;
            return Ok(());
        }
        self.closed = true;
        self.sink.write_all(CLOSING).context("Failed to close output")?;
        self.sink.flush().context("Failed to flush output")?;
        log::debug!("[Publisher] Closed after {} frames", self.frames);
        Ok(())
    }
}

/// Shared in-memory sink for [`Publisher::capture`].
#[derive(Debug, Clone, Default)]
pub struct CaptureSink(Arc<Mutex<Vec<u8>>>);

impl CaptureSink {
    /// Everything written so far, as text.
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// The frames written so far, parsed.
    ///
    /// Skips the header and the terminating empty frame.
    pub fn frames(&self) -> Vec<Vec<Props>> {
        self.contents()
            .lines()
            .filter_map(|line| line.strip_suffix(','))
            .filter_map(|frame| serde_json::from_str::<Vec<Props>>(frame).ok())
            .collect()
    }

    /// The `full_text` of every block, per frame.
    pub fn texts(&self) -> Vec<Vec<String>> {
        self.frames()
            .iter()
            .map(|frame| {
                frame
                    .iter()
                    .map(|props| {
                        props
                            .get("full_text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    })
                    .collect()
            })
            .collect()
    }
}

impl Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
