use bytes::{Buf, BytesMut};
use std::convert::TryInto;
use std::env;
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{self, Request, Response};
use crate::Error;

pub struct RequestCodec;

impl RequestCodec {
    fn max_frame_size() -> usize {
        env::var("MAX_FRAME_SIZE")
            .map(|s| s.parse().expect("MAX_FRAME_SIZE must be a number"))
            .unwrap_or(16 * 1024 * 1024)
    }
}

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut cursor = Cursor::new(&src[..]);
        let request = match Request::parse(&mut cursor, RequestCodec::max_frame_size()) {
            Ok(request) => request,
            // Not enough data buffered yet; decoding resumes on the next read.
            Err(frame::Error::Incomplete) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let position: usize = cursor
            .position()
            .try_into()
            .expect("Cursor position is too large");

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(request))
    }
}

impl Encoder<Response> for RequestCodec {
    type Error = Error;

    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&response.serialize());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ResponseCode, CLIENT_ID_SIZE, REQUEST_HEADER_SIZE};
    use bytes::Bytes;

    #[test]
    fn decode_suspends_until_payload_arrives() {
        let request = Request {
            client_id: [5u8; CLIENT_ID_SIZE],
            version: 1,
            code: 603,
            payload: Bytes::from_static(b"hello mailbox"),
        };
        let wire = request.serialize();

        let mut codec = RequestCodec;
        let mut buffer = BytesMut::new();

        // Header only: no frame yet.
        buffer.extend_from_slice(&wire[..REQUEST_HEADER_SIZE]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        // Half the payload: still suspended.
        buffer.extend_from_slice(&wire[REQUEST_HEADER_SIZE..REQUEST_HEADER_SIZE + 6]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        // Remainder arrives: the frame decodes and the buffer drains.
        buffer.extend_from_slice(&wire[REQUEST_HEADER_SIZE + 6..]);
        let decoded = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(decoded, request);
        assert!(buffer.is_empty());
    }

    #[test]
    fn decode_leaves_next_frame_in_buffer() {
        let first = Request {
            client_id: [1u8; CLIENT_ID_SIZE],
            version: 1,
            code: 601,
            payload: Bytes::new(),
        };
        let second = Request {
            client_id: [2u8; CLIENT_ID_SIZE],
            version: 1,
            code: 604,
            payload: Bytes::new(),
        };

        let mut codec = RequestCodec;
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&first.serialize());
        buffer.extend_from_slice(&second.serialize());

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(first));
        assert_eq!(buffer.len(), REQUEST_HEADER_SIZE);
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(second));
        assert!(buffer.is_empty());
    }

    #[test]
    fn encode_writes_serialized_response() {
        let response = Response::new(ResponseCode::RegistrationOk, Bytes::from_static(b"abcd"));

        let mut codec = RequestCodec;
        let mut buffer = BytesMut::new();
        codec.encode(response.clone(), &mut buffer).unwrap();

        assert_eq!(&buffer[..], &response.serialize()[..]);
    }
}
