//! Channel registry and broadcaster
//!
//! Two maps live under one `RwLock` and are always mutated together:
//! `channels` (channel -> members) and `connections` (connection -> its
//! subscriptions). A connection is in `channels[c]` iff `c` is in its own
//! subscription set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::{ChannelId, ConnectionHandle, ConnectionId, Mailbox, UserId};
use crate::config::HubConfig;
use crate::metrics;

struct Member {
    handle: Arc<ConnectionHandle>,
    channels: HashSet<ChannelId>,
}

#[derive(Default)]
struct Registry {
    channels: HashMap<ChannelId, HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    connections: HashMap<ConnectionId, Member>,
}

impl Registry {
    /// Drop `id` from `channel`, pruning the entry once empty
    fn detach(&mut self, channel: ChannelId, id: ConnectionId) {
        if let Some(members) = self.channels.get_mut(&channel) {
            members.remove(&id);
            if members.is_empty() {
                self.channels.remove(&channel);
                tracing::debug!(channel_id = channel, "removed empty channel from registry");
            }
        }
    }

    fn remove_connection(&mut self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let member = self.connections.remove(&id)?;
        for channel in &member.channels {
            self.detach(*channel, id);
        }
        metrics::set_active_channels(self.channels.len());
        Some(member.handle)
    }
}

struct HubInner {
    registry: RwLock<Registry>,
    config: HubConfig,
    evictions_tx: mpsc::UnboundedSender<ConnectionId>,
    evictions_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionId>>>,
}

/// Single source of truth for channel membership and fan-out.
///
/// Construct one per serving process and share clones of it (cheap, `Arc`
/// inside) with the upgrade endpoint and the REST control plane.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let (evictions_tx, evictions_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(HubInner {
                registry: RwLock::new(Registry::default()),
                config,
                evictions_tx,
                evictions_rx: Mutex::new(Some(evictions_rx)),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Create a connection for a verified user and track it.
    ///
    /// The returned mailbox belongs to the connection's outbound loop.
    pub async fn register(&self, user_id: UserId) -> (Arc<ConnectionHandle>, Mailbox) {
        let (handle, mailbox) = ConnectionHandle::new(
            user_id,
            self.inner.config.mailbox_capacity,
            self.inner.evictions_tx.clone(),
        );
        let handle = Arc::new(handle);

        let mut registry = self.inner.registry.write().await;
        registry.connections.insert(
            handle.id(),
            Member {
                handle: Arc::clone(&handle),
                channels: HashSet::new(),
            },
        );
        metrics::connection_opened();

        tracing::debug!(
            connection_id = %handle.id(),
            user_id,
            connections = registry.connections.len(),
            "registered connection"
        );

        (handle, mailbox)
    }

    /// Subscribe `conn` to `channel`.
    ///
    /// Returns `false` when already a member or when `conn` has been
    /// unregistered (a stale handle never re-enters the registry).
    pub async fn join(&self, conn: &ConnectionHandle, channel: ChannelId) -> bool {
        let mut guard = self.inner.registry.write().await;
        let registry = &mut *guard;

        let Some(member) = registry.connections.get_mut(&conn.id()) else {
            tracing::debug!(
                connection_id = %conn.id(),
                channel_id = channel,
                "join ignored for unregistered connection"
            );
            return false;
        };
        if !member.channels.insert(channel) {
            return false;
        }

        registry
            .channels
            .entry(channel)
            .or_default()
            .insert(conn.id(), Arc::clone(&member.handle));
        metrics::set_active_channels(registry.channels.len());

        tracing::debug!(
            connection_id = %conn.id(),
            user_id = conn.user_id(),
            channel_id = channel,
            "joined channel"
        );
        true
    }

    /// Unsubscribe `conn` from `channel`; returns whether it was a member
    pub async fn leave(&self, conn: &ConnectionHandle, channel: ChannelId) -> bool {
        let mut guard = self.inner.registry.write().await;
        let registry = &mut *guard;

        let was_member = registry
            .connections
            .get_mut(&conn.id())
            .map(|member| member.channels.remove(&channel))
            .unwrap_or(false);
        if !was_member {
            return false;
        }

        registry.detach(channel, conn.id());
        metrics::set_active_channels(registry.channels.len());

        tracing::debug!(
            connection_id = %conn.id(),
            user_id = conn.user_id(),
            channel_id = channel,
            "left channel"
        );
        true
    }

    /// Fan `payload` out to the current members of `channel`.
    ///
    /// Members are copied under the read lock; enqueueing happens after it is
    /// released and never waits. Members whose user id equals `exclude_user`
    /// are skipped. Returns how many mailboxes accepted the payload.
    pub async fn broadcast(
        &self,
        channel: ChannelId,
        payload: impl Into<Bytes>,
        exclude_user: Option<UserId>,
    ) -> usize {
        let targets: Vec<Arc<ConnectionHandle>> = {
            let registry = self.inner.registry.read().await;
            match registry.channels.get(&channel) {
                Some(members) => members
                    .values()
                    .filter(|conn| Some(conn.user_id()) != exclude_user)
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        let payload = payload.into();
        let enqueued = targets
            .iter()
            .filter(|conn| conn.send(payload.clone()))
            .count();
        metrics::record_broadcast(enqueued);

        if enqueued < targets.len() {
            tracing::debug!(
                channel_id = channel,
                targets = targets.len(),
                enqueued,
                "broadcast skipped closed or full mailboxes"
            );
        }
        enqueued
    }

    /// Remove `conn` from every channel and close its mailbox.
    ///
    /// Every teardown path ends here. Safe to call repeatedly and
    /// concurrently; returns `true` only for the call that removed it.
    pub async fn unregister(&self, conn: &ConnectionHandle) -> bool {
        let removed = {
            let mut registry = self.inner.registry.write().await;
            let removed = registry.remove_connection(conn.id()).is_some();
            conn.close();
            removed
        };

        if removed {
            metrics::connection_closed();
            tracing::debug!(
                connection_id = %conn.id(),
                user_id = conn.user_id(),
                "unregistered connection"
            );
        }
        removed
    }

    async fn evict(&self, id: ConnectionId) {
        let handle = {
            let mut registry = self.inner.registry.write().await;
            let handle = registry.remove_connection(id);
            if let Some(handle) = &handle {
                handle.close();
            }
            handle
        };

        if let Some(handle) = handle {
            metrics::connection_closed();
            metrics::record_eviction("mailbox_full");
            tracing::info!(
                connection_id = %id,
                user_id = handle.user_id(),
                "evicted slow connection"
            );
        }
    }

    /// Start the serialized eviction worker.
    ///
    /// Connections whose mailbox overflowed are unregistered here, off the
    /// broadcaster's path. Returns `None` if the worker was already started.
    pub fn spawn_eviction_task(&self) -> Option<JoinHandle<()>> {
        let taken = self
            .inner
            .evictions_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        let Some(mut rx) = taken else {
            tracing::warn!("hub eviction task already running");
            return None;
        };

        let hub = self.clone();
        Some(tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                hub.evict(id).await;
            }
        }))
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.registry.read().await.channels.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.read().await.connections.len()
    }

    pub async fn member_count(&self, channel: ChannelId) -> usize {
        let registry = self.inner.registry.read().await;
        registry.channels.get(&channel).map(|m| m.len()).unwrap_or(0)
    }

    pub async fn is_member(&self, conn: &ConnectionHandle, channel: ChannelId) -> bool {
        let registry = self.inner.registry.read().await;
        registry
            .channels
            .get(&channel)
            .map(|m| m.contains_key(&conn.id()))
            .unwrap_or(false)
    }

    /// Channels `conn` is subscribed to, sorted
    pub async fn subscriptions(&self, conn: &ConnectionHandle) -> Vec<ChannelId> {
        let registry = self.inner.registry.read().await;
        let mut channels: Vec<ChannelId> = registry
            .connections
            .get(&conn.id())
            .map(|m| m.channels.iter().copied().collect())
            .unwrap_or_default();
        channels.sort_unstable();
        channels
    }

    #[cfg(test)]
    async fn assert_consistent(&self) {
        let registry = self.inner.registry.read().await;
        for (channel, members) in &registry.channels {
            assert!(!members.is_empty(), "empty channel {channel} not pruned");
            for id in members.keys() {
                let member = registry
                    .connections
                    .get(id)
                    .expect("channel member must be registered");
                assert!(member.channels.contains(channel));
            }
        }
        for (id, member) in &registry.connections {
            for channel in &member.channels {
                assert!(registry.channels[channel].contains_key(id));
            }
        }
    }
}
