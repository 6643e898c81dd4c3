//! Session actor and handle.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use prost::Message;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use tether_proto::{OperationType, Query, QueryResponse, StreamMessage};
use tether_transport::{MessageStream, PhysicalConnection};
use tether_types::DeviceId;

use crate::query::{IncomingQuery, QueryResponder};
use crate::{
    Result, SessionError, FEATURE_CHANNEL_CAPACITY, INVALID_QUERY_ID, UNCLAIMED_QUEUE_CAPACITY,
};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Event delivered to a registered feature.
#[derive(Debug)]
pub enum FeatureEvent {
    /// A `CLIENT_MESSAGE` payload addressed to this recipient.
    Message(Vec<u8>),
    /// A `QUERY` addressed to this recipient.
    Query(IncomingQuery),
    /// A `DISABLE` addressed to this recipient.
    Disabled,
}

pub(crate) enum Command {
    Register {
        recipient: Uuid,
        reply: oneshot::Sender<Result<mpsc::Receiver<FeatureEvent>>>,
    },
    Unregister {
        recipient: Uuid,
    },
    SendClientMessage {
        recipient: Uuid,
        payload: Vec<u8>,
        ack: oneshot::Sender<Result<u32>>,
    },
    SendDisable {
        recipient: Uuid,
        ack: oneshot::Sender<Result<u32>>,
    },
    SendQuery {
        recipient: Uuid,
        sender: Uuid,
        request: Vec<u8>,
        parameters: Vec<u8>,
        response: oneshot::Sender<QueryResponse>,
    },
    SendQueryResponse {
        to: Option<Uuid>,
        id: u32,
        is_successful: bool,
        payload: Vec<u8>,
    },
}

/// Cloneable handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    connected: Arc<AtomicBool>,
    remote_device_id: DeviceId,
}

impl SessionHandle {
    /// The peer on the far end of this session.
    pub fn remote_device_id(&self) -> DeviceId {
        self.remote_device_id
    }

    /// Whether the actor is still running.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Register the feature for `recipient` and receive its events.
    ///
    /// At most one feature per recipient; messages that arrived before
    /// registration are delivered first, in arrival order.
    pub async fn register_feature(
        &self,
        recipient: Uuid,
    ) -> Result<mpsc::Receiver<FeatureEvent>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register { recipient, reply })
            .await
            .map_err(|_| SessionError::Disconnected)?;
        rx.await.map_err(|_| SessionError::Disconnected)?
    }

    /// Remove the feature registration for `recipient`.
    pub async fn unregister_feature(&self, recipient: Uuid) -> Result<()> {
        self.cmd_tx
            .send(Command::Unregister { recipient })
            .await
            .map_err(|_| SessionError::Disconnected)
    }

    /// Send a `CLIENT_MESSAGE` to the peer feature `recipient`; returns
    /// the stream message id.
    pub async fn send_client_message(&self, recipient: Uuid, payload: Vec<u8>) -> Result<u32> {
        let (ack, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendClientMessage {
                recipient,
                payload,
                ack,
            })
            .await
            .map_err(|_| SessionError::Disconnected)?;
        rx.await.map_err(|_| SessionError::Disconnected)?
    }

    /// Send a `DISABLE` to the peer feature `recipient`.
    pub async fn send_disable(&self, recipient: Uuid) -> Result<u32> {
        let (ack, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendDisable { recipient, ack })
            .await
            .map_err(|_| SessionError::Disconnected)?;
        rx.await.map_err(|_| SessionError::Disconnected)?
    }

    /// Send a `QUERY` to the peer feature `recipient`; `sender` is the
    /// local feature the response is addressed back to.
    ///
    /// The returned receiver always resolves exactly once. When the peer
    /// is not connected, it resolves immediately with the well-formed
    /// failure `{ id: INVALID, is_successful: false, payload: [] }`.
    pub async fn query(
        &self,
        recipient: Uuid,
        sender: Uuid,
        request: Vec<u8>,
        parameters: Vec<u8>,
    ) -> oneshot::Receiver<QueryResponse> {
        let (response, rx) = oneshot::channel();
        if !self.is_connected() {
            let (failed_tx, failed_rx) = oneshot::channel();
            let _ = failed_tx.send(failure_response());
            return failed_rx;
        }
        let sent = self
            .cmd_tx
            .send(Command::SendQuery {
                recipient,
                sender,
                request,
                parameters,
                response,
            })
            .await;
        if sent.is_err() {
            let (failed_tx, failed_rx) = oneshot::channel();
            let _ = failed_tx.send(failure_response());
            return failed_rx;
        }
        rx
    }
}

fn failure_response() -> QueryResponse {
    QueryResponse {
        id: INVALID_QUERY_ID,
        is_successful: false,
        response: Vec::new(),
    }
}

/// The per-peer actor owning the encrypted stream.
pub struct Session<C: PhysicalConnection> {
    stream: MessageStream<C>,
    remote_device_id: DeviceId,
    cmd_rx: mpsc::Receiver<Command>,
    /// Weak: only external handles keep the command channel open.
    cmd_weak: mpsc::WeakSender<Command>,
    connected: Arc<AtomicBool>,
    features: HashMap<Uuid, mpsc::Sender<FeatureEvent>>,
    unclaimed: HashMap<Uuid, VecDeque<FeatureEvent>>,
    pending_queries: HashMap<u32, oneshot::Sender<QueryResponse>>,
    next_query_id: u32,
}

impl<C: PhysicalConnection> Session<C> {
    /// Wrap an established stream. The caller spawns [`run`](Session::run)
    /// on the peer's actor task and keeps the handle.
    pub fn new(stream: MessageStream<C>, remote_device_id: DeviceId) -> (Self, SessionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let cmd_weak = cmd_tx.downgrade();
        let handle = SessionHandle {
            cmd_tx,
            connected: connected.clone(),
            remote_device_id,
        };
        (
            Self {
                stream,
                remote_device_id,
                cmd_rx,
                cmd_weak,
                connected,
                features: HashMap::new(),
                unclaimed: HashMap::new(),
                pending_queries: HashMap::new(),
                next_query_id: 1,
            },
            handle,
        )
    }

    /// Drive the session until the peer disconnects, every handle is
    /// dropped, or the stream fails.
    ///
    /// On exit — clean or not — in-flight queries are answered exactly
    /// once with the failure response and the transport is closed.
    pub async fn run(mut self) -> Result<()> {
        let result = self.run_inner().await;
        self.connected.store(false, Ordering::SeqCst);
        for (_, pending) in self.pending_queries.drain() {
            let _ = pending.send(failure_response());
        }
        self.stream.close().await;
        tracing::debug!(peer = %self.remote_device_id, "session ended");
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    // `self.cmd_tx` keeps the channel open; commands ending
                    // means every external handle is gone.
                    None => return Ok(()),
                    Some(command) => self.handle_command(command).await?,
                },
                message = self.stream.next_message() => match message? {
                    None => return Ok(()),
                    Some(message) => self.handle_message(message).await?,
                },
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Register { recipient, reply } => {
                let _ = reply.send(self.register(recipient));
            }
            Command::Unregister { recipient } => {
                self.features.remove(&recipient);
            }
            Command::SendClientMessage {
                recipient,
                payload,
                ack,
            } => {
                let result = self
                    .send_with_operation(OperationType::ClientMessage, Some(recipient), payload)
                    .await;
                let _ = ack.send(result);
            }
            Command::SendDisable { recipient, ack } => {
                let result = self
                    .send_with_operation(OperationType::Disable, Some(recipient), Vec::new())
                    .await;
                let _ = ack.send(result);
            }
            Command::SendQuery {
                recipient,
                sender,
                request,
                parameters,
                response,
            } => {
                let id = self.next_query_id;
                self.next_query_id = self.next_query_id.wrapping_add(1);
                let query = Query {
                    id,
                    sender: sender.to_bytes_le().to_vec(),
                    request,
                    parameters,
                };
                let sent = self
                    .send_with_operation(
                        OperationType::Query,
                        Some(recipient),
                        query.encode_to_vec(),
                    )
                    .await;
                match sent {
                    Ok(_) => {
                        self.pending_queries.insert(id, response);
                    }
                    Err(error) => {
                        let _ = response.send(failure_response());
                        return Err(error);
                    }
                }
            }
            Command::SendQueryResponse {
                to,
                id,
                is_successful,
                payload,
            } => {
                let body = QueryResponse {
                    id,
                    is_successful,
                    response: payload,
                };
                self.send_with_operation(
                    OperationType::QueryResponse,
                    to,
                    body.encode_to_vec(),
                )
                .await?;
            }
        }
        Ok(())
    }

    fn register(&mut self, recipient: Uuid) -> Result<mpsc::Receiver<FeatureEvent>> {
        if self.features.contains_key(&recipient) {
            return Err(SessionError::RecipientTaken(recipient));
        }
        let (tx, rx) = mpsc::channel(FEATURE_CHANNEL_CAPACITY);
        if let Some(queued) = self.unclaimed.remove(&recipient) {
            for event in queued {
                if let Err(error) = tx.try_send(event) {
                    tracing::warn!(%recipient, %error, "dropping queued event on drain");
                }
            }
        }
        self.features.insert(recipient, tx);
        Ok(rx)
    }

    async fn send_with_operation(
        &mut self,
        operation: OperationType,
        recipient: Option<Uuid>,
        payload: Vec<u8>,
    ) -> Result<u32> {
        let mut message = StreamMessage {
            payload,
            operation: operation as i32,
            is_payload_encrypted: false,
            original_message_size: 0,
            recipient: None,
        };
        if let Some(recipient) = recipient {
            message.set_recipient_uuid(recipient);
        }
        Ok(self.stream.send(message).await?)
    }

    async fn handle_message(&mut self, message: StreamMessage) -> Result<()> {
        let Some(operation) = message.operation_type() else {
            tracing::warn!(
                peer = %self.remote_device_id,
                operation = message.operation,
                "ignoring unrecognized operation"
            );
            return Ok(());
        };
        match operation {
            OperationType::ClientMessage => {
                let Some(recipient) = message.recipient_uuid() else {
                    tracing::warn!(peer = %self.remote_device_id, "client message without recipient");
                    return Ok(());
                };
                self.deliver(recipient, FeatureEvent::Message(message.payload))
                    .await;
            }
            OperationType::Query => {
                let Some(recipient) = message.recipient_uuid() else {
                    tracing::warn!(peer = %self.remote_device_id, "query without recipient");
                    return Ok(());
                };
                let query = match Query::decode(message.payload.as_slice()) {
                    Ok(query) => query,
                    Err(error) => {
                        tracing::warn!(%recipient, %error, "ignoring malformed query");
                        return Ok(());
                    }
                };
                let incoming = IncomingQuery {
                    id: query.id,
                    sender: Uuid::from_slice_le(&query.sender).ok(),
                    request: query.request,
                    parameters: query.parameters,
                    responder: QueryResponder {
                        cmd_tx: self.cmd_weak.clone(),
                    },
                };
                self.deliver(recipient, FeatureEvent::Query(incoming)).await;
            }
            OperationType::QueryResponse => {
                let response = match QueryResponse::decode(message.payload.as_slice()) {
                    Ok(response) => response,
                    Err(error) => {
                        tracing::warn!(%error, "ignoring malformed query response");
                        return Ok(());
                    }
                };
                match self.pending_queries.remove(&response.id) {
                    Some(pending) => {
                        let _ = pending.send(response);
                    }
                    None => {
                        tracing::trace!(id = response.id, "dropping stale query response");
                    }
                }
            }
            OperationType::Disable => {
                let Some(recipient) = message.recipient_uuid() else {
                    tracing::warn!(peer = %self.remote_device_id, "disable without recipient");
                    return Ok(());
                };
                self.deliver(recipient, FeatureEvent::Disabled).await;
            }
            OperationType::Ack | OperationType::EncryptionHandshake => {
                tracing::trace!(?operation, "ignoring stream-level operation");
            }
            OperationType::OperationUnknown => {
                tracing::warn!(peer = %self.remote_device_id, "ignoring unknown operation");
            }
        }
        Ok(())
    }

    async fn deliver(&mut self, recipient: Uuid, event: FeatureEvent) {
        if let Some(feature) = self.features.get(&recipient) {
            match feature.send(event).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => {
                    // The feature dropped its receiver; back to unclaimed.
                    self.features.remove(&recipient);
                    tracing::debug!(%recipient, "feature receiver dropped");
                    self.enqueue_unclaimed(recipient, event);
                    return;
                }
            }
        }
        self.enqueue_unclaimed(recipient, event);
    }

    fn enqueue_unclaimed(&mut self, recipient: Uuid, event: FeatureEvent) {
        let queue = self.unclaimed.entry(recipient).or_default();
        if queue.len() >= UNCLAIMED_QUEUE_CAPACITY {
            queue.pop_front();
            tracing::warn!(%recipient, "unclaimed queue full; dropping oldest message");
        }
        queue.push_back(event);
    }
}
