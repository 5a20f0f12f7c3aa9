//! Length prefixed framing over any async byte stream.
//!
//! Every frame starts with a big endian `u64` holding the body length, followed
//! by the body produced by a [`Serialize`] implementation. The message
//! vocabulary shared by workers, parameter servers and the orchestrator lives
//! in [`msg`], the run description in [`specs`].

mod align;
mod deserialize;
pub mod msg;
pub mod ready;
mod receiver;
mod sender;
mod serialize;
pub mod specs;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::{Align1, Align4};
pub use deserialize::Deserialize;
pub use receiver::{FrameReceiver, MAX_FRAME_LEN};
pub use sender::FrameSender;
pub use serialize::Serialize;

/// Width of the length prefix written before each frame body.
type FrameLen = u64;
const PREFIX_LEN: usize = size_of::<FrameLen>();

/// Wraps the two halves of a connection into framed endpoints.
///
/// # Arguments
/// * `rx` - The readable half.
/// * `tx` - The writable half.
///
/// # Returns
/// The receiving and sending endpoints, in that order.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
