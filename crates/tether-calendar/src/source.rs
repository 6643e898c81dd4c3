//! Source (handheld) controller.
//!
//! Owns per-peer sync state, the debounced change observation, and the
//! time-window lifecycle. One controller serves every connected peer;
//! peers come and go through [`SourceCommand`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prost::Message;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use tether_proto::calendar as wire;
use tether_proto::{UpdateCalendars, UpdateType};
use tether_session::{FeatureEvent, SessionHandle};
use tether_sync::{diff, HierarchyNode};
use tether_types::{DeviceId, TimeRange, TimeWindow};

use crate::provider::CalendarProvider;
use crate::shadow::ShadowStore;
use crate::window::WindowSupplier;
use crate::{CALENDAR_SYNC_RECIPIENT, LEGACY_PROTOCOL_VERSION, SYNC_PROTOCOL_VERSION};

const INBOX_CAPACITY: usize = 64;

/// Delay between the last observed change and the sync cycle.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Source tunables and collaborators.
pub struct SourceConfig {
    pub debounce: Duration,
    /// Keys of the calendars to keep in sync.
    pub tracked_calendars: Vec<String>,
    pub window: Box<dyn WindowSupplier>,
    /// Epoch-seconds clock, injectable for tests.
    pub clock: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl SourceConfig {
    pub fn new(tracked_calendars: Vec<String>, window: Box<dyn WindowSupplier>) -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            tracked_calendars,
            window,
            clock: Arc::new(system_now),
        }
    }
}

fn system_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Peer lifecycle input to the controller.
pub enum SourceCommand {
    /// A session reached READY; start syncing to it.
    PeerConnected(SessionHandle),
    /// The session ended; release its sync state.
    PeerDisconnected(DeviceId),
    /// Stop syncing to the peer and tell it to purge.
    Disable(DeviceId),
}

struct PeerState {
    handle: SessionHandle,
    /// `0` until the first acknowledgement arrives.
    protocol_version: u32,
    /// Tracked ranges; all calendars share one window at any instant.
    ranges: HashMap<String, TimeRange>,
}

/// The per-device sync driver.
pub struct SourceController<P: CalendarProvider> {
    provider: P,
    config: SourceConfig,
    peers: HashMap<DeviceId, PeerState>,
    shadow: ShadowStore,
}

impl<P: CalendarProvider> SourceController<P> {
    pub fn new(provider: P, config: SourceConfig) -> Self {
        Self {
            provider,
            config,
            peers: HashMap::new(),
            shadow: ShadowStore::new(),
        }
    }

    /// Drive the controller until the command channel closes.
    ///
    /// `changes` delivers coalesced platform change notifications; each
    /// one (re)schedules the debounced sync tick, so only the final tick
    /// in a burst does the work.
    pub async fn run(
        mut self,
        mut changes: mpsc::Receiver<()>,
        mut commands: mpsc::Receiver<SourceCommand>,
    ) {
        let (inbox_tx, mut inbox) = mpsc::channel::<(DeviceId, FeatureEvent)>(INBOX_CAPACITY);

        let now = (self.config.clock)();
        let mut window = self.config.window.window(now);
        let mut refresh_at = refresh_instant(&window, now);
        let mut pending_sync: Option<Instant> = None;
        let mut changes_open = true;

        loop {
            let debounce_at = pending_sync
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                command = commands.recv() => match command {
                    None => break,
                    Some(command) => self.on_command(command, &inbox_tx, &window).await,
                },
                change = changes.recv(), if changes_open => match change {
                    None => changes_open = false,
                    Some(()) => {
                        // A newer change cancels and reschedules the tick.
                        pending_sync = Some(Instant::now() + self.config.debounce);
                    }
                },
                _ = sleep_until(debounce_at), if pending_sync.is_some() => {
                    pending_sync = None;
                    self.sync_all().await;
                },
                _ = sleep_until(refresh_at) => {
                    let now = (self.config.clock)();
                    window = self.config.window.window(now);
                    refresh_at = refresh_instant(&window, now);
                    tracing::debug!(from = window.from(), to = window.to(), "window refreshed");
                    // Ranges move atomically before any outbound send.
                    self.apply_window(&window);
                    self.sync_all().await;
                },
                event = inbox.recv() => {
                    // `inbox_tx` lives in this scope, so the channel
                    // cannot close while the loop runs.
                    if let Some((peer, event)) = event {
                        self.on_feature_event(peer, event).await;
                    }
                },
            }
        }
    }

    async fn on_command(
        &mut self,
        command: SourceCommand,
        inbox_tx: &mpsc::Sender<(DeviceId, FeatureEvent)>,
        window: &TimeWindow,
    ) {
        match command {
            SourceCommand::PeerConnected(handle) => {
                let peer = handle.remote_device_id();
                let mut events = match handle.register_feature(CALENDAR_SYNC_RECIPIENT).await {
                    Ok(events) => events,
                    Err(error) => {
                        tracing::warn!(%peer, %error, "calendar feature registration failed");
                        return;
                    }
                };
                let forward = inbox_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if forward.send((peer, event)).await.is_err() {
                            break;
                        }
                    }
                });

                let ranges = self
                    .config
                    .tracked_calendars
                    .iter()
                    .map(|key| (key.clone(), window.range()))
                    .collect();
                self.peers.insert(
                    peer,
                    PeerState {
                        handle,
                        protocol_version: LEGACY_PROTOCOL_VERSION,
                        ranges,
                    },
                );
                self.shadow.clear(peer);
                tracing::info!(%peer, "calendar sync started");
                self.sync_peer(peer).await;
            }
            SourceCommand::PeerDisconnected(peer) => {
                self.peers.remove(&peer);
                self.shadow.clear(peer);
                tracing::info!(%peer, "calendar sync state released");
            }
            SourceCommand::Disable(peer) => {
                if let Some(state) = self.peers.remove(&peer) {
                    self.shadow.clear(peer);
                    if let Err(error) =
                        state.handle.send_disable(CALENDAR_SYNC_RECIPIENT).await
                    {
                        tracing::debug!(%peer, %error, "disable notification failed");
                    }
                }
            }
        }
    }

    async fn on_feature_event(&mut self, peer: DeviceId, event: FeatureEvent) {
        match event {
            FeatureEvent::Message(payload) => {
                let update = match UpdateCalendars::decode(payload.as_slice()) {
                    Ok(update) => update,
                    Err(error) => {
                        tracing::warn!(%peer, %error, "malformed calendar message");
                        return;
                    }
                };
                match UpdateType::from_wire(update.r#type) {
                    UpdateType::Acknowledge => {
                        if let Some(state) = self.peers.get_mut(&peer) {
                            if state.protocol_version != update.version {
                                tracing::info!(
                                    %peer,
                                    version = update.version,
                                    "peer sync protocol version learned"
                                );
                            }
                            state.protocol_version = update.version;
                        }
                    }
                    other => {
                        tracing::debug!(%peer, ?other, "ignoring message type on source");
                    }
                }
            }
            FeatureEvent::Disabled => {
                // A replica cannot remotely disable a source.
                tracing::warn!(%peer, "ignoring remote disable (not supported)");
            }
            FeatureEvent::Query(query) => {
                let _ = query.respond(false, Vec::new()).await;
            }
        }
    }

    fn apply_window(&mut self, window: &TimeWindow) {
        for state in self.peers.values_mut() {
            for range in state.ranges.values_mut() {
                *range = window.range();
            }
        }
    }

    async fn sync_all(&mut self) {
        let peers: Vec<DeviceId> = self.peers.keys().copied().collect();
        for peer in peers {
            self.sync_peer(peer).await;
        }
    }

    /// One sync cycle for one peer: read current, move the shadow, send
    /// the minimal batch (or the whole-calendar fallback).
    async fn sync_peer(&mut self, peer: DeviceId) {
        let Some((version, handle)) = self
            .peers
            .get(&peer)
            .map(|state| (state.protocol_version, state.handle.clone()))
        else {
            return;
        };

        let mut current = Vec::new();
        for key in &self.config.tracked_calendars {
            let Some(range) = self
                .peers
                .get(&peer)
                .and_then(|state| state.ranges.get(key))
                .copied()
            else {
                continue;
            };
            match self.provider.read_calendar(key, range).await {
                Ok(Some(mut calendar)) => {
                    calendar.action = 0;
                    current.push(calendar);
                }
                // Unreadable or gone: no entry in `current`, so the peer
                // sees a deletion against the shadow.
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(%peer, key, %error, "calendar unreadable");
                }
            }
        }

        let previous = self.shadow.snapshot(peer);
        // Shadow moves before the send so it reflects intended state.
        self.shadow.set(peer, current.clone());

        let updates = diff(&previous, &current);
        if updates.is_empty() {
            return;
        }

        let calendars = if version >= SYNC_PROTOCOL_VERSION {
            updates
        } else {
            whole_calendar_replaces(&previous, &current)
        };
        let batch = UpdateCalendars {
            version: SYNC_PROTOCOL_VERSION,
            r#type: UpdateType::Receive as i32,
            calendars,
        };
        tracing::debug!(
            %peer,
            calendars = batch.calendars.len(),
            legacy = version < SYNC_PROTOCOL_VERSION,
            "sending calendar batch"
        );
        if let Err(error) = handle
            .send_client_message(CALENDAR_SYNC_RECIPIENT, batch.encode_to_vec())
            .await
        {
            tracing::warn!(%peer, %error, "calendar batch send failed");
        }
    }
}

/// Legacy fallback: every current calendar as a whole-subtree REPLACE,
/// plus an empty REPLACE per calendar that disappeared.
fn whole_calendar_replaces(
    previous: &[wire::Calendar],
    current: &[wire::Calendar],
) -> Vec<wire::Calendar> {
    let mut messages = Vec::with_capacity(current.len());
    for calendar in current {
        let mut replace = calendar.clone();
        replace.set_action(wire::Action::Replace);
        let mut events = replace.events;
        for event in &mut events {
            event.set_action(wire::Action::Create);
            for attendee in &mut event.attendees {
                attendee.set_action(wire::Action::Create);
            }
        }
        replace.events = events;
        messages.push(replace);
    }
    for old in previous {
        if !current.iter().any(|calendar| calendar.key == old.key) {
            let mut deletion = wire::Calendar::with_key(&old.key);
            deletion.set_action(wire::Action::Replace);
            messages.push(deletion);
        }
    }
    messages
}

fn refresh_instant(window: &TimeWindow, now: u64) -> Instant {
    let delay = window.refresh().saturating_sub(now).max(1);
    Instant::now() + Duration::from_secs(delay)
}
