//! Wire envelope for fiber-to-fiber messages.
//!
//! The envelope header is framed in a fixed binary layout; only the payload
//! depends on the fiber's [`MessageCodec`](crate::codec::MessageCodec).
//!
//! # Binary Format
//!
//! ```text
//! [direction: 1 byte]      // OneWay=0, Request=1, Response=2, Fault=3, Redirect=4
//! [from: 8 bytes (u64)]    // packed Address
//! [to: 8 bytes (u64)]      // packed Address
//! [rpc_id: 4 bytes (i32)]  // 0 for one-way
//! [kind: 2 bytes (u16)]
//! [payload_len: 4 bytes (u32)]
//! [payload: N bytes]
//! ```
//!
//! All integers are little-endian.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::FrameError;

/// Maximum frame size: 1MB
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const HEADER_SIZE: usize = 1 + 8 + 8 + 4 + 2 + 4;

/// Message kinds reserved by the runtime.
pub mod kinds {
    /// First kind of the reserved range.
    pub const SYSTEM_BASE: u16 = 0xFF00;
    /// Location service request.
    pub const LOCATION: u16 = 0xFF01;
    /// Transfer snapshot hand-off.
    pub const TRANSFER_IN: u16 = 0xFF02;

    /// Whether `kind` belongs to the reserved range.
    pub fn is_system(kind: u16) -> bool {
        kind >= SYSTEM_BASE
    }
}

/// What an envelope is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Fire and forget.
    OneWay,
    /// Expects a reply carrying the same rpc id.
    Request,
    /// Successful reply.
    Response,
    /// Reply reporting a handler failure; the payload is a UTF-8 reason.
    Fault,
    /// Reply reporting that no live entity sits at the requested address.
    Redirect,
}

impl Direction {
    fn tag(self) -> u8 {
        match self {
            Direction::OneWay => 0,
            Direction::Request => 1,
            Direction::Response => 2,
            Direction::Fault => 3,
            Direction::Redirect => 4,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, FrameError> {
        Ok(match tag {
            0 => Direction::OneWay,
            1 => Direction::Request,
            2 => Direction::Response,
            3 => Direction::Fault,
            4 => Direction::Redirect,
            other => return Err(FrameError::UnknownDirection(other)),
        })
    }

    /// Whether the envelope answers a request.
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            Direction::Response | Direction::Fault | Direction::Redirect
        )
    }
}

/// A message between two addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sender.
    pub from: Address,
    /// Destination.
    pub to: Address,
    /// Correlation id; `0` for one-way.
    pub rpc_id: i32,
    /// Schema selector.
    pub kind: u16,
    /// Request, reply or one-way.
    pub direction: Direction,
    /// Codec-encoded body.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// A one-way message.
    pub fn one_way(from: Address, to: Address, kind: u16, payload: Vec<u8>) -> Self {
        Self {
            from,
            to,
            rpc_id: 0,
            kind,
            direction: Direction::OneWay,
            payload,
        }
    }

    /// A correlated request.
    pub fn request(from: Address, to: Address, rpc_id: i32, kind: u16, payload: Vec<u8>) -> Self {
        Self {
            from,
            to,
            rpc_id,
            kind,
            direction: Direction::Request,
            payload,
        }
    }

    /// Successful reply to this request.
    pub fn response(&self, payload: Vec<u8>) -> Self {
        self.answer(Direction::Response, payload)
    }

    /// Failure reply to this request.
    pub fn fault(&self, reason: &str) -> Self {
        self.answer(Direction::Fault, reason.as_bytes().to_vec())
    }

    /// "Nobody lives here" reply to this request.
    pub fn redirect(&self) -> Self {
        self.answer(Direction::Redirect, Vec::new())
    }

    fn answer(&self, direction: Direction, payload: Vec<u8>) -> Self {
        Self {
            from: self.to,
            to: self.from,
            rpc_id: self.rpc_id,
            kind: self.kind,
            direction,
            payload,
        }
    }

    /// Serialize to the wire format.
    pub fn to_frame(&self) -> Result<Vec<u8>, FrameError> {
        let size = HEADER_SIZE + self.payload.len();
        if size > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut frame = Vec::with_capacity(size);
        frame.push(self.direction.tag());
        frame.extend_from_slice(&self.from.as_u64().to_le_bytes());
        frame.extend_from_slice(&self.to.as_u64().to_le_bytes());
        frame.extend_from_slice(&self.rpc_id.to_le_bytes());
        frame.extend_from_slice(&self.kind.to_le_bytes());
        frame.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }

    /// Parse a frame produced by [`to_frame`](Self::to_frame).
    pub fn from_frame(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut cursor = frame;
        let [tag] = take::<1>(&mut cursor)?;
        let direction = Direction::from_tag(tag)?;
        let from = Address::from_u64(u64::from_le_bytes(take(&mut cursor)?));
        let to = Address::from_u64(u64::from_le_bytes(take(&mut cursor)?));
        let rpc_id = i32::from_le_bytes(take(&mut cursor)?);
        let kind = u16::from_le_bytes(take(&mut cursor)?);
        let len = u32::from_le_bytes(take(&mut cursor)?) as usize;
        if cursor.len() < len {
            return Err(FrameError::Truncated {
                needed: len,
                available: cursor.len(),
            });
        }

        Ok(Self {
            from,
            to,
            rpc_id,
            kind,
            direction,
            payload: cursor[..len].to_vec(),
        })
    }
}

fn take<const N: usize>(cursor: &mut &[u8]) -> Result<[u8; N], FrameError> {
    if cursor.len() < N {
        return Err(FrameError::Truncated {
            needed: N,
            available: cursor.len(),
        });
    }
    let (head, rest) = cursor.split_at(N);
    *cursor = rest;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}
