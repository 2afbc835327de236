use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use crate::frame::{ClientId, MessageId, Response, ResponseCode};
use crate::operations::executable::Executable;
use crate::operations::{OperationError, PayloadParser};
use crate::store::{Database, Message};
use crate::Error;

/// Deposits a message in the recipient's mailbox. Payload: recipient id
/// (16 bytes), type tag (1 byte), content size (4 bytes) and exactly that
/// many content bytes. Success payload: recipient id followed by the new
/// message id.
#[derive(Debug, PartialEq)]
pub struct SendMessage {
    pub caller: ClientId,
    pub to_client: ClientId,
    pub kind: u8,
    pub content: Bytes,
}

impl SendMessage {
    pub(crate) fn parse(
        caller: ClientId,
        parser: &mut PayloadParser,
    ) -> Result<Self, OperationError> {
        let to_client = parser.next_client_id()?;
        let kind = parser.next_u8("message type")?;
        let content_size = parser.next_u32("content size")?;
        let content = parser.next_bytes(content_size as usize, "message content")?;

        Ok(SendMessage {
            caller,
            to_client,
            kind,
            content,
        })
    }
}

impl Executable for SendMessage {
    fn exec(self, db: Database) -> Result<Response, Error> {
        // The gateway stores whatever it is given; the recipient check
        // lives here.
        if db.client_by_id(&self.to_client)?.is_none() {
            return Err(
                OperationError::ClientNotFound(Uuid::from_bytes(self.to_client)).into(),
            );
        }

        let message = Message {
            id: random_message_id(),
            to_client: self.to_client,
            from_client: self.caller,
            kind: self.kind,
            content: self.content,
        };
        db.insert_message(&message)?;

        let mut payload = BytesMut::new();
        payload.extend_from_slice(&message.to_client);
        payload.extend_from_slice(&message.id.to_le_bytes());

        Ok(Response::new(ResponseCode::MessageSent, payload.freeze()))
    }
}

/// Message ids are random rather than sequential so they stay unique
/// across process restarts.
fn random_message_id() -> MessageId {
    let bytes = Uuid::new_v4().into_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
