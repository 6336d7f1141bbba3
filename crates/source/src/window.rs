use tokio_util::sync::CancellationToken;

use crate::{ByteSource, SourceError};

/// Chunk windower for sources with a known total length.
///
/// Stateless between attempts: every call re-seeks to the acknowledged
/// offset and reads the next chunk fresh, so a resend after a partial
/// acknowledgement is just another call with the updated offset.
pub struct SeekWindower {
    chunk_size: usize,
    total: u64,
}

impl SeekWindower {
    pub fn new(chunk_size: usize, total: u64) -> Self {
        Self { chunk_size, total }
    }

    /// Reads the chunk covering `[bytes_sent, bytes_sent + chunk_len)`.
    ///
    /// `chunk_len` is the configured chunk size capped by the remaining
    /// payload. Short reads are tolerated by looping; a zero read before
    /// the chunk fills means the source is shorter than it claimed.
    pub async fn window(
        &self,
        source: &mut dyn ByteSource,
        bytes_sent: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SourceError> {
        let remaining = self.total.saturating_sub(bytes_sent);
        let len = (self.chunk_size as u64).min(remaining) as usize;
        if len == 0 {
            return Ok(Vec::new());
        }

        source.seek(bytes_sent).await?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            let n = source.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "source ended at byte {} but declared {} bytes",
                        bytes_sent + filled as u64,
                        self.total
                    ),
                )));
            }
            filled += n;
        }
        Ok(buf)
    }
}
