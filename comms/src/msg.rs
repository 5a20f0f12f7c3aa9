use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize, specs::Identity};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const PARAMS_H: Header = 2;
const DELTA_H: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A full copy of a parameter shard.
    Params(&'a [f32]),
    /// An additive update proposed for a parameter shard.
    Delta(&'a [f32]),
}

/// The state a parameter server reports back when polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerStatus {
    pub initialized: bool,
    /// Only the server hosting the global step reports it.
    pub global_step: Option<u64>,
    pub stop: bool,
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Hello(Identity),
    Welcome { shard: usize, initialized: bool },
    Status,
    StatusReport(ServerStatus),
    Increment { by: u64 },
    ReadStep,
    GlobalStep { value: u64, stop: bool },
    Initialize { global_step: u64 },
    Initialized,
    Pull,
    RequestStop,
    Ack,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }

    /// Returns a short name of the message kind, used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Err(_) => "err",
            Msg::Data(Payload::Params(_)) => "data/params",
            Msg::Data(Payload::Delta(_)) => "data/delta",
        }
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Params(params) => (PARAMS_H, *params),
                    Payload::Delta(delta) => (DELTA_H, *delta),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(kind_buf);

        match Header::from_be_bytes(header) {
            ERR_H => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            kind @ (PARAMS_H | DELTA_H) => {
                let nums: &[f32] = bytemuck::try_cast_slice_mut::<u8, f32>(rest)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}")))?;

                let payload = if kind == PARAMS_H {
                    Payload::Params(nums)
                } else {
                    Payload::Delta(nums)
                };

                Ok(Self::Data(payload))
            }
            kind => Self::invalid_kind_byte(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::Role;

    fn frame_words(msg: &Msg<'_>) -> Vec<u32> {
        let mut buf = Vec::new();
        if let Some(tail) = msg.serialize(&mut buf) {
            let tail = tail.to_vec();
            buf.extend_from_slice(&tail);
        }

        let mut words = vec![0u32; buf.len() / 4];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words).copy_from_slice(&buf);
        words
    }

    #[test]
    fn params_payload_is_read_back_in_place() {
        let params = [1.0_f32, -2.5, 3.25];
        let msg = Msg::Data(Payload::Params(&params));
        let mut words = frame_words(&msg);

        let msg = Msg::deserialize(bytemuck::cast_slice_mut::<u32, u8>(&mut words)).unwrap();
        match msg {
            Msg::Data(Payload::Params(got)) => assert_eq!(got, params),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn hello_carries_identity() {
        let identity = Identity::new(Role::Worker, 3);
        let mut buf = Vec::new();
        assert!(Msg::Control(Command::Hello(identity)).serialize(&mut buf).is_none());

        match Msg::deserialize(&mut buf).unwrap() {
            Msg::Control(Command::Hello(got)) => assert_eq!(got, identity),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut buf = 9u32.to_be_bytes().to_vec();
        let err = Msg::deserialize(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut buf = PARAMS_H.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0, 0, 0]);
        assert!(Msg::deserialize(&mut buf).is_err());
    }
}
