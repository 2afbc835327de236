use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::RequestCodec;
use crate::frame::{self, Request, Response};

pub struct Connection {
    stream: TcpStream,
    // Data is read from the socket into the read buffer. When a frame is parsed, the corresponding
    // data is removed from the buffer.
    buffer: BytesMut,
    codec: RequestCodec,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        Connection {
            stream,
            // Allocate the buffer with 4kb of capacity.
            buffer: BytesMut::with_capacity(4096),
            codec: RequestCodec,
        }
    }

    /// Reads the next request frame, waiting across as many socket readiness
    /// events as it takes for a complete frame to arrive.
    ///
    /// Returns `Ok(None)` when the peer performs an orderly shutdown between
    /// frames. A peer that closes with a partial frame buffered yields
    /// `frame::Error::Truncated`.
    pub async fn read_request(&mut self) -> crate::Result<Option<Request>> {
        loop {
            if let Some(request) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(request));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(frame::Error::Truncated.into());
            }
        }
    }

    pub async fn write_response(&mut self, response: Response) -> crate::Result<()> {
        let mut buffer = BytesMut::new();
        self.codec.encode(response, &mut buffer)?;
        self.stream.write_all(&buffer).await?;
        Ok(())
    }
}
