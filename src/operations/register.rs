use bytes::Bytes;
use std::str;
use uuid::Uuid;

use crate::frame::{trim_padding, Response, ResponseCode, NAME_SIZE, PUBLIC_KEY_SIZE};
use crate::operations::executable::Executable;
use crate::operations::{OperationError, PayloadParser};
use crate::store::{Client, Database};
use crate::Error;

/// Creates a Client record and mints its id. The one operation exempt from
/// the caller-registration check, since the caller has no id yet.
///
/// Payload: name (255 bytes, NUL-padded) followed by the public key
/// (160 opaque bytes). Success payload: the newly assigned client id.
#[derive(Debug, PartialEq)]
pub struct Register {
    pub name: String,
    pub public_key: [u8; PUBLIC_KEY_SIZE],
}

impl Register {
    pub(crate) fn parse(parser: &mut PayloadParser) -> Result<Self, OperationError> {
        let raw_name = parser.next_bytes(NAME_SIZE, "client name")?;
        let name = trim_padding(&raw_name);
        // The padding NUL doubles as the terminator, so a name filling all
        // 255 bytes is invalid, as is an empty one.
        if name.is_empty() || name.len() == NAME_SIZE {
            return Err(OperationError::InvalidName);
        }
        let name = str::from_utf8(name)
            .map_err(|_| OperationError::InvalidName)?
            .to_string();

        let raw_key = parser.next_bytes(PUBLIC_KEY_SIZE, "public key")?;
        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(&raw_key);

        Ok(Register { name, public_key })
    }
}

impl Executable for Register {
    fn exec(self, db: Database) -> Result<Response, Error> {
        let id = Uuid::new_v4().into_bytes();
        let client = Client {
            id,
            name: self.name,
            public_key: self.public_key.to_vec(),
            last_seen: None,
        };
        db.insert_client(&client)?;

        Ok(Response::new(
            ResponseCode::RegistrationOk,
            Bytes::copy_from_slice(&id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{self, CLIENT_ID_SIZE};
    use crate::operations::Operation;
    use crate::store::StoreError;
    use bytes::BytesMut;

    fn register_frame(name: &[u8], key: u8) -> frame::Request {
        let mut payload = BytesMut::new();
        frame::put_padded(&mut payload, name, NAME_SIZE);
        payload.extend_from_slice(&[key; PUBLIC_KEY_SIZE]);
        frame::Request {
            client_id: [0u8; CLIENT_ID_SIZE],
            version: 1,
            code: 600,
            payload: payload.freeze(),
        }
    }

    #[test]
    fn registration_returns_a_minted_id() {
        let db = Database::open_in_memory().unwrap();
        let op = Operation::try_from(register_frame(b"alice", 1)).unwrap();

        let response = op.exec(db.clone()).unwrap();

        assert_eq!(response.code, u16::from(ResponseCode::RegistrationOk));
        assert_eq!(response.payload.len(), CLIENT_ID_SIZE);

        let id: [u8; CLIENT_ID_SIZE] = response.payload[..].try_into().unwrap();
        let stored = db.client_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.name, "alice");
        assert_eq!(stored.public_key, vec![1u8; PUBLIC_KEY_SIZE]);
        assert_eq!(stored.last_seen, None);
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let db = Database::open_in_memory().unwrap();

        let first = Operation::try_from(register_frame(b"alice", 1))
            .unwrap()
            .exec(db.clone())
            .unwrap();
        let second = Operation::try_from(register_frame(b"bob", 2))
            .unwrap()
            .exec(db.clone())
            .unwrap();

        assert_ne!(first.payload, second.payload);

        // Ids are stable on subsequent lookups.
        let id: [u8; CLIENT_ID_SIZE] = first.payload[..].try_into().unwrap();
        assert_eq!(db.client_by_name("alice").unwrap().unwrap().id, id);
    }

    #[test]
    fn duplicate_name_fails_without_a_second_record() {
        let db = Database::open_in_memory().unwrap();
        Operation::try_from(register_frame(b"alice", 1))
            .unwrap()
            .exec(db.clone())
            .unwrap();

        let err = Operation::try_from(register_frame(b"alice", 2))
            .unwrap()
            .exec(db.clone())
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::DuplicateName(ref name)) if name == "alice"
        ));
        assert_eq!(db.all_clients().unwrap().len(), 1);
    }

    #[test]
    fn empty_name_is_invalid() {
        let err = Operation::try_from(register_frame(b"", 1)).unwrap_err();
        let err = err.downcast_ref::<OperationError>().unwrap();

        assert_eq!(*err, OperationError::InvalidName);
    }

    #[test]
    fn unterminated_name_is_invalid() {
        let err = Operation::try_from(register_frame(&[b'x'; NAME_SIZE], 1)).unwrap_err();
        let err = err.downcast_ref::<OperationError>().unwrap();

        assert_eq!(*err, OperationError::InvalidName);
    }

    #[test]
    fn short_payload_is_rejected() {
        let request = frame::Request {
            client_id: [0u8; CLIENT_ID_SIZE],
            version: 1,
            code: 600,
            payload: Bytes::from(vec![0u8; NAME_SIZE]), // name only, key missing
        };

        let err = Operation::try_from(request).unwrap_err();
        let err = err.downcast_ref::<OperationError>().unwrap();

        assert!(matches!(err, OperationError::EndOfPayload { .. } | OperationError::InvalidName));
    }
}
