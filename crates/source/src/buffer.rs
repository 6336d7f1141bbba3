use tokio_util::sync::CancellationToken;

use crate::{ByteSource, SourceError};

/// One attempt's view of the buffered bytes.
#[derive(Debug)]
pub struct Window<'a> {
    /// Absolute offset of `data[0]` in the payload.
    pub start: u64,
    /// Bytes to send this attempt.
    pub data: &'a [u8],
    /// Total payload length, once end of stream has been observed.
    pub total: Option<u64>,
}

/// Chunk windower for sources of unknown length.
///
/// Keeps exactly one chunk of payload in memory so that any suffix the
/// server did not acknowledge can be resent without rewinding the source.
/// A one-byte look-ahead slot distinguishes "buffer happens to be full"
/// from "this is the final chunk": after filling a buffer completely, one
/// extra byte is read and cached; a zero-length read there pins the total
/// length at `start + used`.
pub struct ChunkBuffer {
    chunk_size: usize,
    buf: Vec<u8>,
    used: usize,
    start_offset: u64,
    lookahead: Option<u8>,
    total: Option<u64>,
}

impl ChunkBuffer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            // Allocated lazily on the first window call.
            buf: Vec::new(),
            used: 0,
            start_offset: 0,
            lookahead: None,
            total: None,
        }
    }

    /// Total payload length, once known.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Produces the window to send given the server's acknowledged cursor.
    ///
    /// `ack` must fall inside the current window `[start, start + used]`.
    /// A full acknowledgement compacts the buffer and refills it from the
    /// source; a partial acknowledgement shifts the unacknowledged suffix
    /// down and tops the buffer up.
    pub async fn window(
        &mut self,
        source: &mut dyn ByteSource,
        ack: u64,
        cancel: &CancellationToken,
    ) -> Result<Window<'_>, SourceError> {
        if self.buf.is_empty() {
            self.buf = vec![0u8; self.chunk_size];
            self.start_offset = ack;
        }

        let window_end = self.start_offset + self.used as u64;
        if ack < self.start_offset || ack > window_end {
            return Err(SourceError::AckOutOfWindow {
                ack,
                window_start: self.start_offset,
                window_len: self.used as u64,
            });
        }

        if ack == window_end {
            // Previous chunk fully accepted: restart the window at the cursor.
            self.start_offset = ack;
            self.used = 0;
        } else if ack > self.start_offset {
            // Prefix accepted: keep only the unacknowledged suffix.
            let delta = (ack - self.start_offset) as usize;
            self.buf.copy_within(delta..self.used, 0);
            self.used -= delta;
            self.start_offset = ack;
        }

        if self.used < self.chunk_size {
            if let Some(byte) = self.lookahead.take() {
                self.buf[self.used] = byte;
                self.used += 1;
            }
            while self.used < self.chunk_size {
                if cancel.is_cancelled() {
                    return Err(SourceError::Cancelled);
                }
                let n = source.read(&mut self.buf[self.used..]).await?;
                if n == 0 {
                    break;
                }
                self.used += n;
            }
        }

        if self.total.is_none() {
            if self.used < self.chunk_size {
                // The fill loop stopped early, so the stream is exhausted.
                self.total = Some(self.start_offset + self.used as u64);
            } else if self.lookahead.is_none() {
                let mut probe = [0u8; 1];
                let n = source.read(&mut probe).await?;
                if n == 0 {
                    self.total = Some(self.start_offset + self.used as u64);
                } else {
                    self.lookahead = Some(probe[0]);
                }
            }
        }

        Ok(Window {
            start: self.start_offset,
            data: &self.buf[..self.used],
            total: self.total,
        })
    }
}
