//! Click stream decoding.
//!
//! The bar writes clicks to our stdin as one JSON array that never ends:
//!
//! ```text
//! [
//! {"name":"clock","instance":"clock","button":1,"x":1820,"y":12},
//! {"name":"mem","instance":"mem","button":3,"x":1700,"y":9},
//! ```
//!
//! [`ClickDecoder`] is an incremental, best-effort decoder for that shape.
//! It skips the opening `[`, buffers bytes, and tries to parse the buffer
//! every time a `}` arrives. A parse that runs out of input means the `}`
//! closed something nested, so it keeps buffering. After a successful parse
//! it discards everything up to the next `,`.
//!
//! A malformed object (a syntax error rather than missing input), or one
//! larger than [`CLICK_MAX_OBJECT`], is dropped with a warning and the
//! decoder resyncs at the next `,` or `{`.
//!
//! # Limitations
//!
//! This is not a JSON tokenizer. A `}` inside a string value just triggers
//! a parse attempt that fails, which is harmless; anything fancier than flat
//! click objects is not guaranteed to decode.

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{CLICK_MAX_OBJECT, CLICK_READ_BUFFER};
use crate::navigator::Navigator;
use crate::protocol::ClickEvent;

/// Incremental decoder for the click array.
#[derive(Debug, Default)]
pub struct ClickDecoder {
    started: bool,
    skipping: bool,
    buffer: Vec<u8>,
}

impl ClickDecoder {
    /// Creates a decoder expecting the opening `[`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes, returning every complete object they finish.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Value> {
        let mut objects = Vec::new();
        for &byte in bytes {
            if let Some(object) = self.push(byte) {
                objects.push(object);
            }
        }
        objects
    }

    /// Feeds one byte.
    pub fn push(&mut self, byte: u8) -> Option<Value> {
        if !self.started {
            if byte.is_ascii_whitespace() {
                return None;
            }
            self.started = true;
            if byte == b'[' {
                return None;
            }
        }

        if self.skipping {
            match byte {
                b',' => {
                    self.skipping = false;
                    return None;
                }
                // Producer left out the separator.
                b'{' => self.skipping = false,
                _ => return None,
            }
        }

        if self.buffer.is_empty() && byte != b'{' {
            // Separators and whitespace between objects.
            return None;
        }
        self.buffer.push(byte);

        if byte != b'}' {
            if self.buffer.len() > CLICK_MAX_OBJECT {
                log::warn!("[ClickReader] Dropping click larger than {} bytes", CLICK_MAX_OBJECT);
                self.discard();
            }
            return None;
        }
        match serde_json::from_slice::<Value>(&self.buffer) {
            Ok(value) if value.is_object() => {
                self.buffer.clear();
                self.skipping = true;
                Some(value)
            }
            Err(err) if err.is_eof() => None,
            Ok(_) | Err(_) => {
                log::warn!(
                    "[ClickReader] Dropping malformed click: {}",
                    String::from_utf8_lossy(&self.buffer)
                );
                self.discard();
                None
            }
        }
    }

    /// Forgets the buffered object and skips to the next separator.
    fn discard(&mut self) {
        self.buffer.clear();
        self.skipping = true;
    }

    /// Bytes buffered for the object being decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Reads clicks from `reader` until EOF, dispatching each to `navigator`.
///
/// Objects without a string `instance` are dropped. Clicks are handled one
/// at a time, in arrival order.
///
/// # Errors
///
/// Returns an error only if reading fails; EOF ends the loop with `Ok`.
pub async fn read_clicks<R>(mut reader: R, navigator: &Navigator) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = ClickDecoder::new();
    let mut buf = vec![0u8; CLICK_READ_BUFFER];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .context("Failed to read click events")?;
        if n == 0 {
            log::info!("[ClickReader] Input closed");
            return Ok(());
        }
        for object in decoder.feed(&buf[..n]) {
            let Some(event) = ClickEvent::from_value(object) else {
                log::debug!("[ClickReader] Dropping click without instance");
                continue;
            };
            log::debug!("[ClickReader] Click on `{}` (button {:?})", event.instance, event.button());
            navigator.dispatch(&event).await;
        }
    }
}
