//! Fixed-layout binary frames exchanged between clients and the server.
//!
//! Every field is little-endian. A request carries the caller's id, the
//! sender's protocol version, an operation code and a length-prefixed
//! payload; a response carries the server version, a result code and a
//! payload that is omitted entirely when empty.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use thiserror::Error as ThisError;

/// Protocol version advertised in every response.
pub const SERVER_VERSION: u8 = 1;

pub const CLIENT_ID_SIZE: usize = 16;
pub const VERSION_SIZE: usize = 1;
pub const CODE_SIZE: usize = 2;
pub const PAYLOAD_SIZE_SIZE: usize = 4;

pub const REQUEST_HEADER_SIZE: usize =
    CLIENT_ID_SIZE + VERSION_SIZE + CODE_SIZE + PAYLOAD_SIZE_SIZE;
pub const RESPONSE_HEADER_SIZE: usize = VERSION_SIZE + CODE_SIZE + PAYLOAD_SIZE_SIZE;

// Payload field widths shared by the operation handlers.
pub const NAME_SIZE: usize = 255;
pub const PUBLIC_KEY_SIZE: usize = 160;
pub const MESSAGE_ID_SIZE: usize = 4;
pub const MESSAGE_TYPE_SIZE: usize = 1;
pub const MESSAGE_CONTENT_SIZE_SIZE: usize = 4;

/// Caller identity on the wire. All zeroes is the sentinel used before
/// registration has assigned a real id.
pub type ClientId = [u8; CLIENT_ID_SIZE];

pub type MessageId = u32;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    /// Not enough bytes buffered yet. This is a suspension point, not a
    /// failure: the decoder retries once more data arrives.
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("declared payload size {0} exceeds the frame size limit")]
    PayloadTooLarge(usize),
    /// The peer closed the connection with a partially received frame
    /// still in the buffer.
    #[error("peer closed the connection mid-frame")]
    Truncated,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub client_id: ClientId,
    pub version: u8,
    pub code: u16,
    pub payload: Bytes,
}

impl Request {
    /// Parses one request frame from `src`, advancing the cursor past it.
    /// Returns `Error::Incomplete` while the header or the declared payload
    /// has not fully arrived.
    pub fn parse(src: &mut Cursor<&[u8]>, max_payload_size: usize) -> Result<Request, Error> {
        if src.remaining() < REQUEST_HEADER_SIZE {
            return Err(Error::Incomplete);
        }

        let mut client_id = [0u8; CLIENT_ID_SIZE];
        src.copy_to_slice(&mut client_id);
        let version = src.get_u8();
        let code = src.get_u16_le();
        let payload_size = src.get_u32_le() as usize;

        if payload_size > max_payload_size {
            return Err(Error::PayloadTooLarge(payload_size));
        }
        if src.remaining() < payload_size {
            return Err(Error::Incomplete);
        }

        let payload = src.copy_to_bytes(payload_size);

        Ok(Request {
            client_id,
            version,
            code,
            payload,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(REQUEST_HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(&self.client_id);
        bytes.push(self.version);
        bytes.extend_from_slice(&self.code.to_le_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

impl From<Request> for Vec<u8> {
    fn from(request: Request) -> Self {
        request.serialize()
    }
}

/// Result codes a response can carry. An open enumeration on the wire; these
/// are the codes this server emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    RegistrationOk = 2100,
    ClientsList = 2101,
    PublicKey = 2102,
    MessageSent = 2103,
    WaitingMessages = 2104,
    GeneralError = 9000,
}

impl From<ResponseCode> for u16 {
    fn from(code: ResponseCode) -> Self {
        code as u16
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub version: u8,
    pub code: u16,
    pub payload: Bytes,
}

impl Response {
    pub fn new(code: ResponseCode, payload: Bytes) -> Response {
        Response {
            version: SERVER_VERSION,
            code: code.into(),
            payload,
        }
    }

    /// The catch-all failure response: non-zero error code, no payload.
    pub fn general_error() -> Response {
        Response::new(ResponseCode::GeneralError, Bytes::new())
    }

    pub fn parse(src: &mut Cursor<&[u8]>, max_payload_size: usize) -> Result<Response, Error> {
        if src.remaining() < RESPONSE_HEADER_SIZE {
            return Err(Error::Incomplete);
        }

        let version = src.get_u8();
        let code = src.get_u16_le();
        let payload_size = src.get_u32_le() as usize;

        if payload_size > max_payload_size {
            return Err(Error::PayloadTooLarge(payload_size));
        }
        if src.remaining() < payload_size {
            return Err(Error::Incomplete);
        }

        let payload = src.copy_to_bytes(payload_size);

        Ok(Response {
            version,
            code,
            payload,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(RESPONSE_HEADER_SIZE + self.payload.len());
        bytes.push(self.version);
        bytes.extend_from_slice(&self.code.to_le_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

impl From<Response> for Vec<u8> {
    fn from(response: Response) -> Self {
        response.serialize()
    }
}

/// Writes `value` into `dst` padded with NULs up to `width`. Values at or
/// above `width` are cut off at `width` bytes.
pub fn put_padded(dst: &mut BytesMut, value: &[u8], width: usize) {
    let len = value.len().min(width);
    dst.put_slice(&value[..len]);
    dst.put_bytes(0, width - len);
}

/// The prefix of `bytes` up to (not including) the first NUL.
pub fn trim_padding(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}
