#![cfg(test)]

use std::sync::Arc;

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
    specs::{Identity, Role},
};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    net::TcpStream,
    sync::oneshot,
};

use crate::{ParameterServer, ServerState, server::handle_connection};

type Rx = FrameReceiver<ReadHalf<DuplexStream>>;
type Tx = FrameSender<WriteHalf<DuplexStream>>;

fn channel_pair() -> ((Rx, Tx), (Rx, Tx)) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    let chan1 = comms::channel(rx1, tx1);
    let chan2 = comms::channel(rx2, tx2);
    (chan1, chan2)
}

async fn request(rx: &mut Rx, tx: &mut Tx, cmd: Command) -> io::Result<Command> {
    tx.send(&Msg::Control(cmd)).await?;

    let mut rx_buf: Vec<f32> = Vec::new();
    match rx.recv_into(&mut rx_buf).await? {
        Msg::Control(reply) => Ok(reply),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn leader_initializes_and_workers_pull() -> io::Result<()> {
    let ((mut wk_rx, mut wk_tx), (sv_rx, sv_tx)) = channel_pair();
    let state = Arc::new(ServerState::new(0));
    let server = tokio::spawn(handle_connection(
        Arc::clone(&state),
        "test".into(),
        sv_rx,
        sv_tx,
    ));

    let hello = Command::Hello(Identity::new(Role::Worker, 0));
    assert_eq!(
        request(&mut wk_rx, &mut wk_tx, hello).await?,
        Command::Welcome {
            shard: 0,
            initialized: false
        }
    );

    wk_tx
        .send(&Msg::Control(Command::Initialize { global_step: 7 }))
        .await?;
    wk_tx.send(&Msg::Data(Payload::Params(&[1.0, 2.0]))).await?;

    let mut rx_buf: Vec<f32> = Vec::new();
    match wk_rx.recv_into(&mut rx_buf).await? {
        Msg::Control(Command::Initialized) => {}
        other => panic!("unexpected reply {other:?}"),
    }

    assert_eq!(
        request(&mut wk_rx, &mut wk_tx, Command::Increment { by: 1 }).await?,
        Command::GlobalStep {
            value: 8,
            stop: false
        }
    );

    wk_tx.send(&Msg::Data(Payload::Delta(&[0.5, 0.5]))).await?;
    match wk_rx.recv_into(&mut rx_buf).await? {
        Msg::Control(Command::Ack) => {}
        other => panic!("unexpected reply {other:?}"),
    }

    wk_tx.send(&Msg::Control(Command::Pull)).await?;
    match wk_rx.recv_into(&mut rx_buf).await? {
        Msg::Data(Payload::Params(params)) => assert_eq!(params, [1.5, 2.5]),
        other => panic!("unexpected reply {other:?}"),
    }

    assert_eq!(
        request(&mut wk_rx, &mut wk_tx, Command::Disconnect).await?,
        Command::Disconnect
    );

    server.await.unwrap()?;
    Ok(())
}

#[tokio::test]
async fn failed_requests_are_reported_without_closing() -> io::Result<()> {
    let ((mut wk_rx, mut wk_tx), (sv_rx, sv_tx)) = channel_pair();
    let state = Arc::new(ServerState::new(1));
    state.initialize(0, &[0.0]).unwrap();
    let server = tokio::spawn(handle_connection(state, "test".into(), sv_rx, sv_tx));

    let mut rx_buf: Vec<f32> = Vec::new();

    wk_tx
        .send(&Msg::Control(Command::Increment { by: 1 }))
        .await?;
    match wk_rx.recv_into(&mut rx_buf).await? {
        Msg::Err(detail) => assert!(detail.contains("does not host the global step")),
        other => panic!("unexpected reply {other:?}"),
    }

    wk_tx
        .send(&Msg::Control(Command::Initialize { global_step: 0 }))
        .await?;
    wk_tx.send(&Msg::Data(Payload::Params(&[3.0]))).await?;
    match wk_rx.recv_into(&mut rx_buf).await? {
        Msg::Err(detail) => assert!(detail.contains("already initialized")),
        other => panic!("unexpected reply {other:?}"),
    }

    assert_eq!(
        request(&mut wk_rx, &mut wk_tx, Command::Status).await?,
        Command::StatusReport(comms::msg::ServerStatus {
            initialized: true,
            global_step: None,
            stop: false,
        })
    );

    drop(wk_tx);
    drop(wk_rx);
    server.await.unwrap()?;
    Ok(())
}

#[tokio::test]
async fn params_without_initialize_break_the_protocol() {
    let ((_wk_rx, mut wk_tx), (sv_rx, sv_tx)) = channel_pair();
    let state = Arc::new(ServerState::new(0));
    let server = tokio::spawn(handle_connection(state, "test".into(), sv_rx, sv_tx));

    wk_tx
        .send(&Msg::Data(Payload::Params(&[1.0])))
        .await
        .unwrap();

    let err = server.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("data/params"));
}

#[tokio::test]
async fn failed_accepts_keep_the_server_listening() -> io::Result<()> {
    let identity = Identity::new(Role::ParameterServer, 0);
    let mut server = ParameterServer::bind("127.0.0.1:0", identity).await?;
    let addr = server.local_addr()?;

    server
        .admit(Err(io::Error::other("too many open files")))
        .await;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(async {
        let _ = stop_rx.await;
    }));

    let (rx, tx) = TcpStream::connect(addr).await?.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);
    tx.send(&Msg::Control(Command::Hello(Identity::new(Role::Worker, 0))))
        .await?;

    let mut rx_buf: Vec<f32> = Vec::new();
    match rx.recv_into(&mut rx_buf).await? {
        Msg::Control(Command::Welcome { shard, .. }) => assert_eq!(shard, 0),
        other => panic!("unexpected reply {other:?}"),
    }

    let _ = stop_tx.send(());
    serving.await.unwrap()?;
    Ok(())
}
