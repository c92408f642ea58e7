//! Length-delimited framing for the relay bus (spec.md §4.6): a 4-byte
//! big-endian length prefix, no header adjustment, matching
//! `tokio_util::codec::LengthDelimitedCodec`'s defaults exactly.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::message::{MessageError, RelayMessage};

pub type Bus = Framed<TcpStream, LengthDelimitedCodec>;

pub fn wrap(stream: TcpStream) -> Bus {
    Framed::new(stream, LengthDelimitedCodec::new())
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Message(#[from] MessageError),
}

pub async fn send(bus: &mut Bus, msg: &RelayMessage) -> Result<(), BusError> {
    let bytes = msg.encode()?;
    bus.send(Bytes::from(bytes)).await?;
    Ok(())
}

/// Returns `Ok(None)` on a clean peer-initiated close.
pub async fn recv(bus: &mut Bus) -> Result<Option<RelayMessage>, BusError> {
    match bus.next().await {
        Some(Ok(bytes)) => Ok(Some(RelayMessage::decode(&bytes)?)),
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}
