//! TCP links between emulated radios: Hello exchange, then `Write` frames both ways.
//! Each link has a writer task fed by an mpsc queue and a reader task that turns
//! frames into radio events.

use std::io;

use fawna_core::{EventSender, PeerAddress, PeerLink, RadioError, RadioEvent};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::wire::{decode_frame, encode_frame, Frame, FrameDecodeError};

/// What the remote end announced in its Hello.
#[derive(Debug, Clone)]
pub struct RemoteHello {
    pub node_id: Uuid,
    pub name: String,
    pub services: Vec<Uuid>,
    pub transport_port: u16,
}

/// Read one frame, buffering partial reads in `buf`. `Ok(None)` on clean EOF.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> io::Result<Option<Frame>> {
    let mut chunk = [0u8; 4096];
    loop {
        match decode_frame(buf) {
            Ok((frame, used)) => {
                buf.drain(..used);
                return Ok(Some(frame));
            }
            Err(FrameDecodeError::NeedMore) => {}
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Send our Hello and wait for the peer's.
pub async fn handshake(
    stream: &mut TcpStream,
    hello: &Frame,
    buf: &mut Vec<u8>,
) -> io::Result<RemoteHello> {
    let bytes = encode_frame(hello).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    stream.write_all(&bytes).await?;
    match read_frame(stream, buf).await? {
        Some(Frame::Hello {
            node_id,
            name,
            services,
            transport_port,
        }) => Ok(RemoteHello {
            node_id,
            name,
            services,
            transport_port,
        }),
        Some(other) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected Hello, got {:?}", other),
        )),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "link closed during handshake",
        )),
    }
}

/// Open link to one peer.
pub struct TcpLink {
    address: PeerAddress,
    services: Vec<Uuid>,
    outbound: mpsc::UnboundedSender<Frame>,
    closed: watch::Sender<bool>,
    events: EventSender,
}

impl PeerLink for TcpLink {
    fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<(), RadioError> {
        self.outbound
            .send(Frame::Write {
                characteristic,
                payload: payload.to_vec(),
            })
            .map_err(|_| RadioError::PeerWriteFailed(self.address.clone(), "link closed".into()))
    }

    /// Services are known from the Hello; report them right away.
    fn discover_services(&self) -> Result<(), RadioError> {
        self.events
            .send(RadioEvent::ServicesDiscovered {
                address: self.address.clone(),
                services: self.services.clone(),
            })
            .map_err(|_| RadioError::Other("event queue closed".into()))
    }

    fn close(&self) {
        let _ = self.closed.send(true);
    }
}

/// Start the reader and writer tasks for a handshaken stream. `buf` holds bytes read
/// past the Hello.
pub fn spawn_link(
    stream: TcpStream,
    buf: Vec<u8>,
    address: PeerAddress,
    remote: &RemoteHello,
    events: EventSender,
) -> TcpLink {
    let (mut read_half, mut write_half) = stream.into_split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    let (closed, closed_rx) = watch::channel(false);

    let mut writer_closed = closed_rx.clone();
    let writer_addr = address.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let bytes = match encode_frame(&frame) {
                        Ok(b) => b,
                        Err(e) => {
                            tracing::warn!(address = %writer_addr, error = %e, "dropping unencodable frame");
                            continue;
                        }
                    };
                    if let Err(e) = write_half.write_all(&bytes).await {
                        tracing::debug!(address = %writer_addr, error = %e, "link write failed");
                        break;
                    }
                }
                _ = writer_closed.changed() => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut reader_closed = closed_rx;
    let reader_events = events.clone();
    let reader_addr = address.clone();
    tokio::spawn(async move {
        let mut buf = buf;
        loop {
            tokio::select! {
                frame = read_frame(&mut read_half, &mut buf) => match frame {
                    Ok(Some(Frame::Write { payload, .. })) => {
                        let _ = reader_events.send(RadioEvent::DataReceived {
                            address: reader_addr.clone(),
                            payload,
                        });
                    }
                    Ok(Some(other)) => {
                        tracing::debug!(address = %reader_addr, frame = ?other, "ignoring unexpected frame");
                    }
                    Ok(None) | Err(_) => {
                        let _ = reader_events.send(RadioEvent::Disconnected {
                            address: reader_addr.clone(),
                        });
                        break;
                    }
                },
                _ = reader_closed.changed() => break,
            }
        }
    });

    TcpLink {
        address,
        services: remote.services.clone(),
        outbound,
        closed,
        events,
    }
}
