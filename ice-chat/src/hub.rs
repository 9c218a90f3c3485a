//! The chat hub: sole owner of the connection registry.
//!
//! Every registry mutation and every fan-out happens inside [`Hub::run`],
//! one event at a time. Connections never touch the registry directly; they
//! hold a [`HubHandle`] and submit events through it. Because nothing else can
//! reach the registry, no lock guards it.
//!
//! Each registered connection owns the receiving end of a bounded outbound
//! queue; the hub keeps the only sender. Dropping that sender (by removing
//! the registry slot) is how a queue is closed, so it can only happen once.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tracing::{debug, info, trace, warn};

use crate::{error::HubClosed, message::Message};

pub type ConnectionId = u64;

/// Hub side of a connection's outbound queue.
pub type Outbound = mpsc::Sender<Arc<Message>>;
/// Connection side of its outbound queue, drained by the write loop.
pub type OutboundReceiver = mpsc::Receiver<Arc<Message>>;

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 16;

const EVENT_QUEUE_CAPACITY: usize = 256;

/// How presence snapshots are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PresenceDelivery {
    /// Wait for room in every outbound queue. A stalled client stalls the hub
    /// until its queue drains.
    #[default]
    Blocking,
    /// Same policy as chat fan-out: a saturated queue gets its connection
    /// dropped.
    DropSaturated,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Messages buffered per connection before the hub considers it saturated.
    pub outbound_capacity: usize,
    pub presence_delivery: PresenceDelivery,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            presence_delivery: PresenceDelivery::default(),
        }
    }
}

enum HubEvent {
    Register {
        id: ConnectionId,
        display_name: String,
        outbound: Outbound,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast {
        message: Message,
    },
    UpdateUsername {
        id: ConnectionId,
        username: String,
    },
    OnlineUsers {
        respond_to: oneshot::Sender<Vec<String>>,
    },
}

struct Member {
    display_name: String,
    outbound: Outbound,
}

pub struct Hub {
    config: HubConfig,
    registry: HashMap<ConnectionId, Member>,
    events: mpsc::Receiver<HubEvent>,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let handle = HubHandle {
            events: events_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            outbound_capacity: config.outbound_capacity.max(1),
        };
        let hub = Self {
            config,
            registry: HashMap::new(),
            events: events_rx,
        };
        (hub, handle)
    }

    /// Processes events until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event).await;
        }
        debug!("every hub handle dropped; hub stopping");
    }

    async fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register {
                id,
                display_name,
                outbound,
            } => {
                self.registry.insert(
                    id,
                    Member {
                        display_name,
                        outbound,
                    },
                );
                info!(connection = id, online = self.registry.len(), "client registered");
                self.broadcast_presence().await;
            }
            HubEvent::Unregister { id } => {
                // Removing the slot drops the sender and closes the queue.
                if self.registry.remove(&id).is_some() {
                    info!(connection = id, online = self.registry.len(), "client removed");
                    self.broadcast_presence().await;
                } else {
                    trace!(connection = id, "unregister for a connection already removed");
                }
            }
            HubEvent::Broadcast { message } => self.fan_out(Arc::new(message)),
            HubEvent::UpdateUsername { id, username } => {
                if let Some(member) = self.registry.get_mut(&id) {
                    debug!(connection = id, from = %member.display_name, to = %username, "client renamed");
                    member.display_name = username;
                }
                self.broadcast_presence().await;
            }
            HubEvent::OnlineUsers { respond_to } => {
                let _ = respond_to.send(self.online_users());
            }
        }
    }

    fn online_users(&self) -> Vec<String> {
        self.registry
            .values()
            .map(|member| member.display_name.clone())
            .collect()
    }

    /// Offers `message` to every registered connection without waiting.
    ///
    /// A connection whose queue is full or whose write loop has already gone
    /// away is dropped on the spot. No presence update follows such a drop.
    fn fan_out(&mut self, message: Arc<Message>) {
        self.registry
            .retain(|id, member| match member.outbound.try_send(Arc::clone(&message)) {
                Ok(()) => {
                    trace!(connection = *id, "message queued");
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(connection = *id, "outbound queue saturated; dropping client");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = *id, "write loop gone; dropping client");
                    false
                }
            });
    }

    async fn broadcast_presence(&mut self) {
        let presence = Arc::new(Message::presence(self.online_users()));

        match self.config.presence_delivery {
            PresenceDelivery::DropSaturated => self.fan_out(presence),
            PresenceDelivery::Blocking => {
                let mut gone = Vec::new();
                for (id, member) in &self.registry {
                    if member.outbound.send(Arc::clone(&presence)).await.is_err() {
                        gone.push(*id);
                    }
                }
                for id in gone {
                    debug!(connection = id, "write loop gone; dropping client");
                    self.registry.remove(&id);
                }
            }
        }
    }
}

/// Cloneable capability for submitting events to a running [`Hub`].
///
/// Holding a handle keeps the hub alive; it grants no access to the registry.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    next_id: Arc<AtomicU64>,
    outbound_capacity: usize,
}

impl HubHandle {
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Creates an outbound queue sized by [`HubConfig::outbound_capacity`].
    pub fn outbound_channel(&self) -> (Outbound, OutboundReceiver) {
        mpsc::channel(self.outbound_capacity)
    }

    pub async fn register(
        &self,
        id: ConnectionId,
        display_name: impl Into<String>,
        outbound: Outbound,
    ) -> Result<(), HubClosed> {
        self.send(HubEvent::Register {
            id,
            display_name: display_name.into(),
            outbound,
        })
        .await
    }

    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubClosed> {
        self.send(HubEvent::Unregister { id }).await
    }

    pub async fn broadcast(&self, message: Message) -> Result<(), HubClosed> {
        self.send(HubEvent::Broadcast { message }).await
    }

    /// Renames a connection and pushes a fresh presence snapshot to everyone.
    pub async fn update_username(
        &self,
        id: ConnectionId,
        username: impl Into<String>,
    ) -> Result<(), HubClosed> {
        self.send(HubEvent::UpdateUsername {
            id,
            username: username.into(),
        })
        .await
    }

    /// Display names of every registered connection, in no particular order.
    pub async fn online_users(&self) -> Result<Vec<String>, HubClosed> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubEvent::OnlineUsers { respond_to }).await?;
        response.await.map_err(|_| HubClosed)
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubClosed> {
        self.events.send(event).await.map_err(|_| HubClosed)
    }
}
