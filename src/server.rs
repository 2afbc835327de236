use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::connection::Connection;
use crate::frame::Response;
use crate::operations::executable::Executable;
use crate::operations::{Operation, OperationError};
use crate::store::Database;
use crate::Error;

/// Connections that stay silent this long are dropped so an idle peer
/// cannot pin a task forever.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn run(port: u16, database: PathBuf) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let db = Database::open(database)?;

    info!("Mailbox server listening on {}", listener.local_addr()?);

    loop {
        let (socket, client_address) = listener.accept().await?;
        let db = db.clone();
        info!("Accepted connection from {:?}", client_address);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, client_address, db).await {
                error!(e);
            }
        });
    }
}

/// Drives one connection through repeated decode, dispatch, encode cycles
/// until the peer disconnects or an unrecoverable error occurs.
///
/// Dispatcher failures are converted into a well-formed error response and
/// the connection stays open, except for an unknown operation code, which is
/// answered and then dropped. Transport and framing errors propagate out and
/// tear the connection down without a response.
#[instrument(name = "connection", skip(stream, db), fields(client_address))]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    db: Database,
) -> Result<(), Error> {
    let mut conn = Connection::new(stream);

    tracing::Span::current().record("client_address", client_address.to_string());

    loop {
        let request = match timeout(IDLE_TIMEOUT, conn.read_request()).await {
            Ok(request) => request?,
            Err(_) => {
                info!("Closing idle connection");
                return Ok(());
            }
        };

        let Some(request) = request else { break };

        let code = request.code;
        let caller = Uuid::from_bytes(request.client_id);
        debug!(code, %caller, "Received request");

        let result = Operation::try_from(request).and_then(|op| op.exec(db.clone()));

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(code, %caller, "Request failed: {}", e);
                let unknown_operation = matches!(
                    e.downcast_ref::<OperationError>(),
                    Some(OperationError::UnknownOperation { .. })
                );
                conn.write_response(Response::general_error()).await?;
                if unknown_operation {
                    // Protocol violation: report, then drop the peer.
                    return Ok(());
                }
                continue;
            }
        };

        debug!(code = response.code, %caller, "Sending response");
        conn.write_response(response).await?;
    }

    info!("Connection closed");
    Ok(())
}
