//! Request dispatch: maps a decoded wire frame to an operation, validates
//! the caller's registration and executes against the persistence gateway.
//! Each request is independent; there is no cross-request session state.

pub mod executable;
pub mod get_public_key;
pub mod get_waiting_messages;
pub mod list_clients;
pub mod register;
pub mod send_message;

use bytes::{Buf, Bytes};
use chrono::Utc;
use thiserror::Error as ThisError;
use uuid::Uuid;

use crate::frame::{self, ClientId, Response, CLIENT_ID_SIZE};
use crate::store::Database;
use crate::Error;

use executable::Executable;
use get_public_key::GetPublicKey;
use get_waiting_messages::GetWaitingMessages;
use list_clients::ListClients;
use register::Register;
use send_message::SendMessage;

/// Request operation codes. An open enumeration: adding an operation means
/// adding a variant here and a handler module, not extending a dispatch
/// chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationCode {
    Register = 600,
    ListClients = 601,
    GetPublicKey = 602,
    SendMessage = 603,
    GetWaitingMessages = 604,
}

impl TryFrom<u16> for OperationCode {
    type Error = OperationError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            600 => Ok(OperationCode::Register),
            601 => Ok(OperationCode::ListClients),
            602 => Ok(OperationCode::GetPublicKey),
            603 => Ok(OperationCode::SendMessage),
            604 => Ok(OperationCode::GetWaitingMessages),
            code => Err(OperationError::UnknownOperation { code }),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Operation {
    Register(Register),
    ListClients(ListClients),
    GetPublicKey(GetPublicKey),
    SendMessage(SendMessage),
    GetWaitingMessages(GetWaitingMessages),
}

impl Operation {
    /// The caller identity for operations that require prior registration.
    /// `None` for Register, which is the one operation a caller without an
    /// id may invoke.
    pub fn caller(&self) -> Option<ClientId> {
        match self {
            Operation::Register(_) => None,
            Operation::ListClients(op) => Some(op.caller),
            Operation::GetPublicKey(op) => Some(op.caller),
            Operation::SendMessage(op) => Some(op.caller),
            Operation::GetWaitingMessages(op) => Some(op.caller),
        }
    }
}

impl TryFrom<frame::Request> for Operation {
    type Error = crate::Error;

    fn try_from(request: frame::Request) -> Result<Self, Self::Error> {
        let code = OperationCode::try_from(request.code)?;
        let caller = request.client_id;
        let parser = &mut PayloadParser::new(request.payload);

        let operation = match code {
            OperationCode::Register => Operation::Register(Register::parse(parser)?),
            OperationCode::ListClients => Operation::ListClients(ListClients { caller }),
            OperationCode::GetPublicKey => {
                Operation::GetPublicKey(GetPublicKey::parse(caller, parser)?)
            }
            OperationCode::SendMessage => {
                Operation::SendMessage(SendMessage::parse(caller, parser)?)
            }
            OperationCode::GetWaitingMessages => {
                Operation::GetWaitingMessages(GetWaitingMessages { caller })
            }
        };

        parser.expect_end()?;
        Ok(operation)
    }
}

impl Executable for Operation {
    fn exec(self, db: Database) -> Result<Response, Error> {
        if let Some(caller) = self.caller() {
            if db.client_by_id(&caller)?.is_none() {
                return Err(OperationError::Unauthorized(Uuid::from_bytes(caller)).into());
            }
            db.touch_last_seen(&caller, &Utc::now().to_rfc3339())?;
        }

        match self {
            Operation::Register(op) => op.exec(db),
            Operation::ListClients(op) => op.exec(db),
            Operation::GetPublicKey(op) => op.exec(db),
            Operation::SendMessage(op) => op.exec(db),
            Operation::GetWaitingMessages(op) => op.exec(db),
        }
    }
}

/// Cursor over a request payload. Field widths are fixed by the protocol,
/// so extraction is positional.
pub(crate) struct PayloadParser {
    payload: Bytes,
}

impl PayloadParser {
    fn new(payload: Bytes) -> PayloadParser {
        PayloadParser { payload }
    }

    pub(crate) fn next_client_id(&mut self) -> Result<ClientId, OperationError> {
        if self.payload.remaining() < CLIENT_ID_SIZE {
            return Err(OperationError::EndOfPayload {
                expected: "client id",
            });
        }
        let mut id = [0u8; CLIENT_ID_SIZE];
        self.payload.copy_to_slice(&mut id);
        Ok(id)
    }

    pub(crate) fn next_u8(&mut self, expected: &'static str) -> Result<u8, OperationError> {
        if self.payload.remaining() < 1 {
            return Err(OperationError::EndOfPayload { expected });
        }
        Ok(self.payload.get_u8())
    }

    pub(crate) fn next_u32(&mut self, expected: &'static str) -> Result<u32, OperationError> {
        if self.payload.remaining() < 4 {
            return Err(OperationError::EndOfPayload { expected });
        }
        Ok(self.payload.get_u32_le())
    }

    pub(crate) fn next_bytes(
        &mut self,
        len: usize,
        expected: &'static str,
    ) -> Result<Bytes, OperationError> {
        if self.payload.remaining() < len {
            return Err(OperationError::EndOfPayload { expected });
        }
        Ok(self.payload.copy_to_bytes(len))
    }

    pub(crate) fn expect_end(&self) -> Result<(), OperationError> {
        if self.payload.has_remaining() {
            return Err(OperationError::TrailingBytes {
                remaining: self.payload.remaining(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum OperationError {
    #[error("unknown operation code {code}")]
    UnknownOperation { code: u16 },
    #[error("payload ended before {expected}")]
    EndOfPayload { expected: &'static str },
    #[error("payload has {remaining} bytes left after the last field")]
    TrailingBytes { remaining: usize },
    #[error("client name must be non-empty NUL-terminated UTF-8")]
    InvalidName,
    #[error("caller {0} is not registered")]
    Unauthorized(Uuid),
    #[error("client {0} does not exist")]
    ClientNotFound(Uuid),
}
