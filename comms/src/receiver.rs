use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, FrameLen, PREFIX_LEN};

/// Frames above this size are rejected as a corrupt or hostile stream.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Reads length prefixed frames from an async reader.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    reader: R,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(super) fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next frame into `buf` and decodes it.
    ///
    /// `buf` is resized to fit the body, viewed as bytes, and handed to the
    /// decoder. Using an `Align4` element type lets `f32` payloads be borrowed
    /// from it in place.
    ///
    /// # Arguments
    /// * `buf` - Scratch storage the decoded value may borrow from.
    ///
    /// # Errors
    /// `UnexpectedEof` when the peer hung up, `InvalidData` for an oversized
    /// frame or a body the decoder rejects.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut prefix = [0; PREFIX_LEN];
        self.reader.read_exact(&mut prefix).await?;

        let body_len = usize::try_from(FrameLen::from_be_bytes(prefix))
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame exceeds the {MAX_FRAME_LEN} bytes limit"),
                )
            })?;

        buf.clear();
        buf.resize(body_len.div_ceil(size_of::<B>()), B::zeroed());

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(buf.as_mut_slice());
        let body = &mut bytes[..body_len];
        self.reader.read_exact(body).await?;

        T::deserialize(body)
    }
}
