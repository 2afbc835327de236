use bytes::{BufMut, BytesMut};

use crate::frame::{ClientId, Response, ResponseCode};
use crate::operations::executable::Executable;
use crate::store::Database;
use crate::Error;

/// Drains the caller's mailbox. Success payload: the caller id followed by,
/// per message, id (4 bytes), type (1 byte), content size (4 bytes) and the
/// content itself, oldest message first.
///
/// Delivery is at-most-once: the messages are deleted in the same store
/// transaction that collects them, so a second pull returns nothing. If the
/// response write fails after the take, the messages are gone.
#[derive(Debug, PartialEq)]
pub struct GetWaitingMessages {
    pub caller: ClientId,
}

impl Executable for GetWaitingMessages {
    fn exec(self, db: Database) -> Result<Response, Error> {
        let messages = db.take_messages(&self.caller)?;

        let mut payload = BytesMut::new();
        payload.extend_from_slice(&self.caller);
        for message in &messages {
            payload.extend_from_slice(&message.id.to_le_bytes());
            payload.put_u8(message.kind);
            payload.extend_from_slice(&(message.content.len() as u32).to_le_bytes());
            payload.extend_from_slice(&message.content);
        }

        Ok(Response::new(
            ResponseCode::WaitingMessages,
            payload.freeze(),
        ))
    }
}
