use std::{borrow::Cow, io, net::SocketAddr, sync::Arc};

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
    specs::Identity,
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    task::JoinSet,
    time::{self, Duration},
};

use crate::{Result, ServerErr, ServerState, StateErr};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A passive parameter server, it hosts shared state and answers worker requests.
pub struct ParameterServer {
    identity: Identity,
    listener: TcpListener,
    state: Arc<ServerState>,
    tasks: JoinSet<Result<()>>,
}

impl ParameterServer {
    /// Binds a new `ParameterServer` to `addr`.
    ///
    /// # Arguments
    /// * `addr` - The address to listen at.
    /// * `identity` - The identity of this server, its index selects the hosted shard.
    ///
    /// # Returns
    /// The bound server or an io error if failed to do so.
    pub async fn bind<A: ToSocketAddrs>(addr: A, identity: Identity) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            identity,
            listener,
            state: Arc::new(ServerState::new(identity.index)),
            tasks: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a handle to the hosted state.
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accepts and serves connections until `shutdown` resolves.
    ///
    /// A failing connection is logged and dropped, it never stops the server.
    pub async fn serve<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(identity:% = self.identity; "serving at {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => self.admit(accepted).await,

                Some(joined) = self.tasks.join_next() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("connection failed: {e}"),
                        Err(e) => warn!("connection task panicked: {e}"),
                    }
                }

                _ = &mut shutdown => {
                    info!(identity:% = self.identity; "shutting down");
                    break;
                }
            }
        }

        self.tasks.shutdown().await;
        Ok(())
    }

    /// Starts serving an accepted connection.
    ///
    /// A failed accept (e.g. out of file descriptors) is logged and the listener is
    /// retried after a short pause.
    pub(crate) async fn admit(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        match accepted {
            Ok((stream, peer)) => {
                debug!("connection from {peer}");

                let (rx, tx) = stream.into_split();
                let (rx, tx) = comms::channel(rx, tx);
                self.spawn(peer.to_string(), rx, tx);
            }
            Err(e) => {
                warn!(identity:% = self.identity; "failed to accept a connection: {e}");
                time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    /// Spawns the task serving a single connection.
    ///
    /// # Arguments
    /// * `peer` - A printable name of the peer, used for observability.
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn spawn<R, W>(&mut self, peer: String, rx: FrameReceiver<R>, tx: FrameSender<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.tasks.spawn(handle_connection(state, peer, rx, tx));
    }
}

/// What to answer to a single request.
enum Reply {
    None,
    Control(Command),
    Params,
    Err(String),
    Close,
}

impl From<StateErr> for Reply {
    fn from(value: StateErr) -> Self {
        Reply::Err(value.to_string())
    }
}

/// Serves the request/response protocol of one worker connection until it disconnects.
///
/// # Arguments
/// * `state` - The hosted state.
/// * `peer` - A printable name of the peer.
/// * `rx` - The receiving end of the communication.
/// * `tx` - The sending end of the communication.
///
/// # Errors
/// Returns `ServerErr` on I/O failures or protocol violations.
pub(crate) async fn handle_connection<R, W>(
    state: Arc<ServerState>,
    mut peer: String,
    mut rx: FrameReceiver<R>,
    mut tx: FrameSender<W>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut rx_buf: Vec<f32> = Vec::new();
    let mut params = Vec::new();
    let mut pending_init = None;

    loop {
        let msg = match rx.recv_into(&mut rx_buf).await {
            Ok(msg) => msg,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("{peer} closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let reply = match (pending_init.take(), msg) {
            (Some(global_step), Msg::Data(Payload::Params(shard))) => {
                match state.initialize(global_step, shard) {
                    Ok(()) => {
                        info!(shard = state.shard(), global_step = global_step; "initialized by {peer}");
                        Reply::Control(Command::Initialized)
                    }
                    Err(e) => e.into(),
                }
            }
            (Some(_), other) => {
                return Err(ServerErr::UnexpectedMessage {
                    peer,
                    got: other.kind(),
                });
            }
            (None, Msg::Control(cmd)) => match cmd {
                Command::Hello(identity) => {
                    info!(identity:% = identity; "{peer} said hello");
                    peer = identity.to_string();
                    Reply::Control(Command::Welcome {
                        shard: state.shard(),
                        initialized: state.is_initialized(),
                    })
                }
                Command::Status => Reply::Control(Command::StatusReport(state.status())),
                Command::Increment { by } => match state.increment(by) {
                    Ok((value, stop)) => Reply::Control(Command::GlobalStep { value, stop }),
                    Err(e) => e.into(),
                },
                Command::ReadStep => match state.read_step() {
                    Ok((value, stop)) => Reply::Control(Command::GlobalStep { value, stop }),
                    Err(e) => e.into(),
                },
                Command::Initialize { global_step } => {
                    pending_init = Some(global_step);
                    Reply::None
                }
                Command::Pull => match state.pull(&mut params) {
                    Ok(()) => Reply::Params,
                    Err(e) => e.into(),
                },
                Command::RequestStop => match state.request_stop() {
                    Ok(()) => {
                        info!("stop requested by {peer}");
                        Reply::Control(Command::Ack)
                    }
                    Err(e) => e.into(),
                },
                Command::Disconnect => Reply::Close,
                other => Reply::Err(format!("unsupported command {other:?}")),
            },
            (None, Msg::Data(Payload::Delta(delta))) => match state.apply(delta) {
                Ok(()) => Reply::Control(Command::Ack),
                Err(e) => e.into(),
            },
            (None, other) => {
                return Err(ServerErr::UnexpectedMessage {
                    peer,
                    got: other.kind(),
                });
            }
        };

        match reply {
            Reply::None => {}
            Reply::Control(cmd) => tx.send(&Msg::Control(cmd)).await?,
            Reply::Params => tx.send(&Msg::Data(Payload::Params(&params))).await?,
            Reply::Err(detail) => {
                warn!("request from {peer} failed: {detail}");
                tx.send(&Msg::Err(Cow::Owned(detail))).await?
            }
            Reply::Close => {
                debug!("{peer} disconnected");
                tx.send(&Msg::Control(Command::Disconnect)).await?;
                return Ok(());
            }
        }
    }
}
