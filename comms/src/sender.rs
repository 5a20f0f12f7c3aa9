use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{FrameLen, PREFIX_LEN, Serialize};

/// Writes length prefixed frames into an async writer.
///
/// The frame buffer is kept between calls so steady state sends do not allocate.
pub struct FrameSender<W: AsyncWrite + Unpin> {
    writer: W,
    frame: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(writer: W) -> Self {
        Self {
            writer,
            frame: Vec::with_capacity(64),
        }
    }

    /// Writes `msg` as a single frame and flushes the writer.
    ///
    /// Bodies with a borrowed tail (parameter and delta payloads) are written in
    /// two calls, the owned head first and the tail straight from `msg`.
    ///
    /// # Errors
    /// Any I/O error from the underlying writer.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.frame.clear();
        self.frame.extend_from_slice(&[0; PREFIX_LEN]);

        let tail = msg.serialize(&mut self.frame);
        let tail_len = tail.map_or(0, <[u8]>::len);
        let body_len = (self.frame.len() - PREFIX_LEN + tail_len) as FrameLen;
        self.frame[..PREFIX_LEN].copy_from_slice(&body_len.to_be_bytes());

        self.writer.write_all(&self.frame).await?;
        if let Some(tail) = tail {
            self.writer.write_all(tail).await?;
        }

        self.writer.flush().await
    }

    /// Closes the writing half, the peer observes an end of stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
