use tokio::io::{AsyncRead, AsyncReadExt};

use quarry_types::MAX_FRAME_PAYLOAD;

use crate::error::CodecError;
use crate::frame::Frame;
use crate::LENGTH_PREFIX_SIZE;

/// Reads length-prefixed frames from a byte stream.
///
/// A recoverable decode error leaves the reader positioned at the next frame
/// boundary; the caller may keep reading. Once a fatal error is returned the
/// stream is dead and every further call returns the same class of error.
pub struct FramedReader<R> {
    reader: R,
    malformed_frames: u64,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        FramedReader {
            reader,
            malformed_frames: 0,
        }
    }

    /// Count of frames that were correctly framed but failed to decode.
    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames
    }

    /// Next frame, or `Ok(None)` on a clean end of stream (EOF exactly at a
    /// frame boundary).
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        match read_exact_or_eof(&mut self.reader, &mut prefix).await? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial(read) => {
                return Err(CodecError::Truncated {
                    needed: LENGTH_PREFIX_SIZE - read,
                })
            }
            ReadOutcome::Full => {}
        }

        let length = u32::from_be_bytes(prefix) as usize;
        if length > MAX_FRAME_PAYLOAD {
            return Err(CodecError::Oversized {
                length,
                max: MAX_FRAME_PAYLOAD,
            });
        }

        let mut payload = vec![0u8; length];
        if let Err(err) = self.reader.read_exact(&mut payload).await {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(CodecError::Truncated { needed: length });
            }
            return Err(CodecError::Io(err));
        }

        match Frame::decode_payload(&payload) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                if !err.is_fatal() {
                    self.malformed_frames += 1;
                }
                Err(err)
            }
        }
    }
}

enum ReadOutcome {
    Full,
    Eof,
    Partial(usize),
}

// read_exact collapses "no bytes at all" and "EOF mid-buffer" into one error;
// the prefix read needs to tell them apart to detect a clean end of stream.
async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<ReadOutcome, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            if filled == 0 {
                return Ok(ReadOutcome::Eof);
            }
            return Ok(ReadOutcome::Partial(filled));
        }
        filled += read;
    }
    Ok(ReadOutcome::Full)
}
