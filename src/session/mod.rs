//! Multiplexed session boundary.
//!
//! A session will carry many logical request/response streams over one
//! transport. Stream framing is not implemented yet; what exists is the
//! wrapper, its bookkeeping, and a graceful close that sends a SPDY/3 GOAWAY
//! control frame before the transport is released.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::net::{Connection, ConnectionError, ConnectionId};

const SPDY_VERSION: u16 = 3;
const CONTROL_BIT: u16 = 0x8000;
const TYPE_GOAWAY: u16 = 7;
const GOAWAY_LENGTH: u32 = 8;
const STREAM_ID_MASK: u32 = 0x7fff_ffff;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already closed")]
    AlreadyClosed,

    #[error(transparent)]
    Transport(#[from] ConnectionError),
}

/// GOAWAY status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GoAwayStatus {
    Ok = 0,
    ProtocolError = 1,
    InternalError = 2,
}

/// Encode a GOAWAY control frame.
pub fn goaway_frame(last_good_stream_id: u32, status: GoAwayStatus) -> Bytes {
    let mut frame = BytesMut::with_capacity(16);
    frame.put_u16(CONTROL_BIT | SPDY_VERSION);
    frame.put_u16(TYPE_GOAWAY);
    // Flags (none) in the top byte, 24-bit length below.
    frame.put_u32(GOAWAY_LENGTH);
    frame.put_u32(last_good_stream_id & STREAM_ID_MASK);
    frame.put_u32(status as u32);
    frame.freeze()
}

/// One client session.
#[derive(Debug)]
pub struct Session {
    conn: Connection,
    alive: bool,
    streams: BTreeSet<u32>,
    last_good_stream_id: u32,
}

impl Session {
    pub fn wrap(conn: Connection) -> Self {
        Self {
            conn,
            alive: true,
            streams: BTreeSet::new(),
            last_good_stream_id: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Streams currently open on this session.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    /// Tell the peer we are going away, then release the transport.
    ///
    /// A failed GOAWAY write is logged and the close continues.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if !self.alive {
            return Err(SessionError::AlreadyClosed);
        }
        self.alive = false;

        let frame = goaway_frame(self.last_good_stream_id, GoAwayStatus::Ok);
        if let Err(e) = self.conn.write_all(&frame).await {
            tracing::warn!(connection_id = %self.conn.id(), error = %e, "GOAWAY not sent");
        }
        tracing::debug!(connection_id = %self.conn.id(), streams = self.streams.len(), "Session closing");
        self.streams.clear();
        self.conn.close().await?;
        Ok(())
    }
}
