use crate::core::{self, DaemonEvent};
use crate::BroadcastMessage;
use radio_core::protocol::{Broadcast, Command, FrameError, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    tokio::spawn(async move {
                        handle_client(stream, id, evt_tx, bcast_rx).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    let Some(Ok(Broadcast::State { data })) = core::request(&event_tx, Command::GetState).await
    else {
        warn!("Client {}: core unavailable, dropping connection", client_id);
        return;
    };
    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state: data,
    };
    if write_broadcast(&mut write_half, hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            match next_frame(&mut read_buf) {
                                Frame::Incomplete => break,
                                Frame::Message(Message::Command(cmd)) => {
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    let reply = match core::request(&event_tx, cmd).await {
                                        Some(Ok(b)) => b,
                                        Some(Err(e)) => Broadcast::error(&e),
                                        None => {
                                            warn!("DaemonEvent channel closed");
                                            return;
                                        }
                                    };
                                    if write_broadcast(&mut write_half, reply).await.is_err() {
                                        return;
                                    }
                                }
                                Frame::Message(_) => {}
                                Frame::Invalid(message) => {
                                    warn!("Client {} sent an invalid frame: {}", client_id, message);
                                    let reply = Broadcast::Error {
                                        kind: "invalid_command".into(),
                                        message,
                                        persistent: false,
                                    };
                                    if write_broadcast(&mut write_half, reply).await.is_err() {
                                        return;
                                    }
                                }
                                Frame::TooLarge(len) => {
                                    warn!("Client {} announced a {} byte frame, closing", client_id, len);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let broadcast = match msg {
                    Ok(BroadcastMessage::State(data)) => Broadcast::State { data },
                    Ok(BroadcastMessage::Notice(b)) => b,
                    Ok(BroadcastMessage::Log(message)) => Broadcast::Log { message },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        match core::request(&event_tx, Command::GetState).await {
                            Some(Ok(b)) => b,
                            _ => break,
                        }
                    }
                    Err(_) => break,
                };
                if write_broadcast(&mut write_half, broadcast).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[derive(Debug)]
enum Frame {
    Message(Message),
    Incomplete,
    /// Skipped; carries the parse error for the client.
    Invalid(String),
    /// The stream can't be resynchronised after this.
    TooLarge(usize),
}

/// Take the next frame off the front of `buf`.
fn next_frame(buf: &mut Vec<u8>) -> Frame {
    match Message::decode(buf) {
        Ok((msg, consumed)) => {
            buf.drain(..consumed);
            Frame::Message(msg)
        }
        Err(FrameError::Incomplete) => Frame::Incomplete,
        Err(FrameError::Invalid { consumed, source }) => {
            buf.drain(..consumed);
            Frame::Invalid(source.to_string())
        }
        Err(FrameError::TooLarge(len)) => Frame::TooLarge(len),
    }
}

async fn write_broadcast<W>(writer: &mut W, broadcast: Broadcast) -> anyhow::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let encoded = Message::Broadcast(broadcast).encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}
