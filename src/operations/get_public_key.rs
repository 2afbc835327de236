use bytes::BytesMut;
use uuid::Uuid;

use crate::frame::{ClientId, Response, ResponseCode};
use crate::operations::executable::Executable;
use crate::operations::{OperationError, PayloadParser};
use crate::store::Database;
use crate::Error;

/// Fetches the public key another client registered with. Payload: the
/// target client id. Success payload: target id followed by the key blob.
#[derive(Debug, PartialEq)]
pub struct GetPublicKey {
    pub caller: ClientId,
    pub target: ClientId,
}

impl GetPublicKey {
    pub(crate) fn parse(
        caller: ClientId,
        parser: &mut PayloadParser,
    ) -> Result<Self, OperationError> {
        let target = parser.next_client_id()?;
        Ok(GetPublicKey { caller, target })
    }
}

impl Executable for GetPublicKey {
    fn exec(self, db: Database) -> Result<Response, Error> {
        let client = db
            .client_by_id(&self.target)?
            .ok_or(OperationError::ClientNotFound(Uuid::from_bytes(self.target)))?;

        let mut payload = BytesMut::new();
        payload.extend_from_slice(&client.id);
        payload.extend_from_slice(&client.public_key);

        Ok(Response::new(ResponseCode::PublicKey, payload.freeze()))
    }
}
