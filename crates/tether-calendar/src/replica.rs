//! Replica (vehicle) controller.
//!
//! Applies incoming batches to the calendar store, acknowledges each one
//! with its protocol version, and purges everything on DISABLE.

use prost::Message;
use tokio::sync::mpsc;

use tether_proto::{UpdateCalendars, UpdateType};
use tether_session::{FeatureEvent, SessionHandle};
use tether_sync::apply;
use tether_types::DeviceId;

use crate::store::CalendarStore;
use crate::{CalendarError, Result, CALENDAR_SYNC_RECIPIENT, SYNC_PROTOCOL_VERSION};

/// The head-unit half of calendar sync for one peer.
pub struct ReplicaController<S: CalendarStore> {
    store: S,
    peer: DeviceId,
}

impl<S: CalendarStore> ReplicaController<S> {
    pub fn new(store: S, peer: DeviceId) -> Self {
        Self { store, peer }
    }

    /// A replica cannot remotely disable a source.
    pub fn request_source_disable(&self) -> Result<()> {
        Err(CalendarError::NotSupported)
    }

    /// Read access to the underlying store (post-run inspection).
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drive the replica until the feature channel closes (session over).
    pub async fn run(
        mut self,
        handle: SessionHandle,
        mut events: mpsc::Receiver<FeatureEvent>,
    ) -> Result<S> {
        while let Some(event) = events.recv().await {
            match event {
                FeatureEvent::Message(payload) => {
                    self.on_message(&handle, &payload).await?;
                }
                FeatureEvent::Disabled => {
                    tracing::info!(peer = %self.peer, "sync disabled; purging state");
                    self.store.purge();
                }
                FeatureEvent::Query(query) => {
                    let _ = query.respond(false, Vec::new()).await;
                }
            }
        }
        Ok(self.store)
    }

    async fn on_message(&mut self, handle: &SessionHandle, payload: &[u8]) -> Result<()> {
        let update = match UpdateCalendars::decode(payload) {
            Ok(update) => update,
            Err(error) => {
                tracing::warn!(peer = %self.peer, %error, "malformed calendar batch");
                return Ok(());
            }
        };
        match UpdateType::from_wire(update.r#type) {
            UpdateType::Receive => {
                {
                    let mut level = self.store.calendars();
                    apply(level.as_mut(), &update.calendars)
                        .map_err(|error| CalendarError::Apply(error.to_string()))?;
                }
                tracing::debug!(
                    peer = %self.peer,
                    calendars = update.calendars.len(),
                    "calendar batch applied"
                );

                let ack = UpdateCalendars {
                    version: SYNC_PROTOCOL_VERSION,
                    r#type: UpdateType::Acknowledge as i32,
                    calendars: Vec::new(),
                };
                handle
                    .send_client_message(CALENDAR_SYNC_RECIPIENT, ack.encode_to_vec())
                    .await?;
            }
            UpdateType::Disable => {
                tracing::info!(peer = %self.peer, "source disabled sync; purging state");
                self.store.purge();
            }
            other => {
                tracing::debug!(peer = %self.peer, ?other, "ignoring message type on replica");
            }
        }
        Ok(())
    }
}
