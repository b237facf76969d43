use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use matrirc::config::args;
use matrirc::error::CoreError;
use matrirc::gateway::{MatrixApi, Session};
use matrirc::ircd::channel::IrcSink;
use matrirc::ircd::codec::{LineCodec, Message};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Placeholder for the external Matrix HTTP client (§6): a real build
/// wires this to the homeserver's `/join` endpoint. Wired here only so
/// the binary links and demonstrates the `Session` contract end to end.
struct UnimplementedMatrixApi;

#[async_trait]
impl MatrixApi for UnimplementedMatrixApi {
    async fn join_room(&self, room_id_or_alias: &str) -> Result<()> {
        anyhow::bail!("no Matrix API client configured (tried to join {room_id_or_alias})")
    }
}

/// Queues outbound messages for the write half of the socket: callers
/// never wait on the network directly.
struct SocketSink {
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl IrcSink for SocketSink {
    async fn send(&self, msg: Message) {
        if self.tx.send(msg).await.is_err() {
            warn!("write half gone, dropping message");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let listen: SocketAddr = "[::1]:6667".parse().unwrap();
    info!("listening on {listen}, replay queue capacity {}", args().replay_queue_capacity);

    let listener = TcpListener::bind(listen).await.context("bind ircd port")?;
    loop {
        let (socket, addr) = listener.accept().await?;
        info!("accepted connection from {addr}");
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket).await {
                info!("connection {addr} terminated: {err:#}");
            }
        });
    }
}

async fn handle_connection(socket: TcpStream) -> Result<()> {
    let framed = Framed::new(socket, LineCodec);
    let (mut writer, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::channel::<Message>(64);
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if writer.send(msg).await.is_err() {
                break;
            }
        }
    });

    let session = Arc::new(Session::new(
        args().server_name.clone(),
        args().replay_queue_capacity,
        args().max_line_bytes,
    ));
    let sink = SocketSink { tx };
    let matrix = UnimplementedMatrixApi;

    while let Some(frame) = reader.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(CoreError::MalformedLine(line)) => {
                if session.connection.registered().await {
                    let nick = session.connection.nick().await;
                    sink.send(
                        Message::new(
                            "NOTICE",
                            vec![nick.to_string(), format!("Malformed input ignored: {line}")],
                        )
                        .with_source(args().server_name.clone()),
                    )
                    .await;
                    continue;
                } else {
                    warn!("malformed line before registration, closing: {line}");
                    break;
                }
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = session.dispatch_message(msg, &sink, &matrix).await {
            warn!("dispatch error: {err}");
        }
    }
    Ok(())
}
