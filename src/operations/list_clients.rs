use bytes::BytesMut;

use crate::frame::{put_padded, ClientId, Response, ResponseCode, NAME_SIZE};
use crate::operations::executable::Executable;
use crate::store::Database;
use crate::Error;

/// Lists every registered client except the caller. Success payload: per
/// client, id (16 bytes) followed by the NUL-padded name (255 bytes).
#[derive(Debug, PartialEq)]
pub struct ListClients {
    pub caller: ClientId,
}

impl Executable for ListClients {
    fn exec(self, db: Database) -> Result<Response, Error> {
        let clients = db.all_clients()?;

        let mut payload = BytesMut::new();
        for client in clients.iter().filter(|c| c.id != self.caller) {
            payload.extend_from_slice(&client.id);
            put_padded(&mut payload, client.name.as_bytes(), NAME_SIZE);
        }

        Ok(Response::new(ResponseCode::ClientsList, payload.freeze()))
    }
}
