use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload, ServerStatus},
    specs::Identity,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Result, WorkerErr};

/// The shared counter value together with the stop flag, as read in a single request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub value: u64,
    pub stop: bool,
}

/// Parameter Server client wrapper.
///
/// Every request is answered by exactly one message, so a client is used by one
/// task at a time and needs no request ids.
pub struct PsClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    shard: usize,
    rx: FrameReceiver<R>,
    tx: FrameSender<W>,
    rx_buf: Vec<f32>,
}

impl<R, W> PsClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(shard: usize, rx: FrameReceiver<R>, tx: FrameSender<W>) -> Self {
        Self {
            shard,
            rx,
            tx,
            rx_buf: Vec::new(),
        }
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Introduces this worker to the server.
    ///
    /// # Returns
    /// Whether the server's shard is already initialized.
    pub async fn hello(&mut self, identity: Identity) -> Result<bool> {
        match self.request(Command::Hello(identity)).await? {
            Command::Welcome { initialized, .. } => Ok(initialized),
            _ => self.unexpected("control"),
        }
    }

    pub async fn status(&mut self) -> Result<ServerStatus> {
        match self.request(Command::Status).await? {
            Command::StatusReport(status) => Ok(status),
            _ => self.unexpected("control"),
        }
    }

    /// Atomically increments the global step and reads it back.
    pub async fn increment(&mut self, by: u64) -> Result<StepReport> {
        match self.request(Command::Increment { by }).await? {
            Command::GlobalStep { value, stop } => Ok(StepReport { value, stop }),
            _ => self.unexpected("control"),
        }
    }

    pub async fn read_step(&mut self) -> Result<StepReport> {
        match self.request(Command::ReadStep).await? {
            Command::GlobalStep { value, stop } => Ok(StepReport { value, stop }),
            _ => self.unexpected("control"),
        }
    }

    /// Seeds the server's shard, only accepted once per run.
    pub async fn initialize(&mut self, global_step: u64, params: &[f32]) -> Result<()> {
        let msg = Msg::Control(Command::Initialize { global_step });
        self.tx.send(&msg).await?;
        let msg = Msg::Data(Payload::Params(params));
        self.tx.send(&msg).await?;

        match self.recv_control().await? {
            Command::Initialized => Ok(()),
            _ => self.unexpected("control"),
        }
    }

    /// Receives the server's shard and appends it to `dst`.
    pub async fn pull_into(&mut self, dst: &mut Vec<f32>) -> Result<()> {
        let msg = Msg::Control(Command::Pull);
        self.tx.send(&msg).await?;

        let shard = self.shard;
        match self.rx.recv_into(&mut self.rx_buf).await? {
            Msg::Data(Payload::Params(params)) => {
                dst.extend_from_slice(params);
                Ok(())
            }
            Msg::Err(detail) => Err(WorkerErr::Server {
                shard,
                detail: detail.into_owned(),
            }),
            other => Err(WorkerErr::UnexpectedMessage {
                shard,
                got: other.kind(),
            }),
        }
    }

    /// Proposes an additive update for the server's shard.
    pub async fn push_delta(&mut self, delta: &[f32]) -> Result<()> {
        let msg = Msg::Data(Payload::Delta(delta));
        self.tx.send(&msg).await?;

        match self.recv_control().await? {
            Command::Ack => Ok(()),
            _ => self.unexpected("control"),
        }
    }

    /// Says goodbye and waits for the server to acknowledge it.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.request(Command::Disconnect).await? {
            Command::Disconnect => Ok(()),
            _ => self.unexpected("control"),
        }
    }

    async fn request(&mut self, cmd: Command) -> Result<Command> {
        let msg = Msg::Control(cmd);
        self.tx.send(&msg).await?;
        self.recv_control().await
    }

    async fn recv_control(&mut self) -> Result<Command> {
        let shard = self.shard;
        match self.rx.recv_into(&mut self.rx_buf).await? {
            Msg::Control(cmd) => Ok(cmd),
            Msg::Err(detail) => Err(WorkerErr::Server {
                shard,
                detail: detail.into_owned(),
            }),
            other => Err(WorkerErr::UnexpectedMessage {
                shard,
                got: other.kind(),
            }),
        }
    }

    fn unexpected<T>(&self, got: &'static str) -> Result<T> {
        Err(WorkerErr::UnexpectedMessage {
            shard: self.shard,
            got,
        })
    }
}
