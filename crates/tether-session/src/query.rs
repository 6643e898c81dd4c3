//! Query layer types.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::session::Command;
use crate::{Result, SessionError};

/// A query received from the peer, handed to the owning feature.
///
/// The responder is consumed by [`respond`](IncomingQuery::respond), so a
/// feature can answer at most once; a dropped query is answered by nobody
/// and times out on the peer's side.
#[derive(Debug)]
pub struct IncomingQuery {
    /// Identifier to echo in the response.
    pub id: u32,
    /// Recipient on the peer that the response is addressed to.
    pub sender: Option<Uuid>,
    /// Request payload.
    pub request: Vec<u8>,
    /// Opaque parameters.
    pub parameters: Vec<u8>,
    pub(crate) responder: QueryResponder,
}

impl IncomingQuery {
    /// Send the response. Consumes the query; a second response cannot be
    /// expressed.
    pub async fn respond(self, is_successful: bool, payload: Vec<u8>) -> Result<()> {
        self.responder
            .respond(self.id, self.sender, is_successful, payload)
            .await
    }
}

/// Channel back into the session actor for query responses.
///
/// Holds a weak sender so an unanswered query does not keep a dying
/// session actor alive.
#[derive(Debug)]
pub struct QueryResponder {
    pub(crate) cmd_tx: mpsc::WeakSender<Command>,
}

impl QueryResponder {
    async fn respond(
        self,
        id: u32,
        to: Option<Uuid>,
        is_successful: bool,
        payload: Vec<u8>,
    ) -> Result<()> {
        let cmd_tx = self.cmd_tx.upgrade().ok_or(SessionError::Disconnected)?;
        cmd_tx
            .send(Command::SendQueryResponse {
                to,
                id,
                is_successful,
                payload,
            })
            .await
            .map_err(|_| SessionError::Disconnected)
    }
}
