//! Matrix room-state store (C2): the in-memory cache fed by the sync
//! poller, plus the channel-sync callback table and sync cursor.
//!
//! Single-writer-at-a-time via one `RwLock` guarding the whole store:
//! every public method takes the lock for its entire body, so compound
//! "check-then-update" operations (`set_canonical_alias`, `mark_synced`)
//! are atomic without a call-site mutex, matching §5's serialization
//! contract.

use crate::error::CoreError;
use crate::matrix::deriver::derive_channel_name;
use crate::matrix::room::{BridgeInfo, Member, Room, RoomId, Topic, UserId};
use log::warn;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// A one-shot action fired when a room's initial state has been fully
/// applied. MUST NOT re-enter the store that invokes it (§5) — callbacks
/// run synchronously inside the lock, as the last action of the update.
/// A returned `Err` is logged and swallowed (§4.2 failure semantics); it
/// never aborts the batch or the other callbacks sharing the key.
pub type ChannelSyncCallback = Box<dyn FnOnce(&RoomId, &Room) -> Result<(), CoreError> + Send>;

struct StoreInner {
    rooms: HashMap<RoomId, Room>,
    /// Keyed by IRC channel name or room id, per `queue_on_channel_sync`.
    callbacks: HashMap<String, Vec<ChannelSyncCallback>>,
    since_marker: Option<String>,
    handled_events: HashMap<RoomId, HashSet<String>>,
}

pub struct RoomStore {
    inner: RwLock<StoreInner>,
}

impl Default for RoomStore {
    fn default() -> Self {
        RoomStore {
            inner: RwLock::new(StoreInner {
                rooms: HashMap::new(),
                callbacks: HashMap::new(),
                since_marker: None,
                handled_events: HashMap::new(),
            }),
        }
    }
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `name` against the room id, the canonical alias, or the
    /// derived channel name — first match in (unspecified) iteration
    /// order wins, per §4.2.
    fn resolve_locked(inner: &StoreInner, name: &str) -> Option<(RoomId, Room)> {
        for (room_id, room) in inner.rooms.iter() {
            if room_id == name
                || room.canonical_alias.as_deref() == Some(name)
                || derive_channel_name(room_id, room) == name
            {
                return Some((room_id.clone(), room.clone()));
            }
        }
        None
    }

    fn fire_callbacks(inner: &mut StoreInner, key: &str, room_id: &RoomId) {
        let Some(callbacks) = inner.callbacks.remove(key) else {
            return;
        };
        let room = inner.rooms.get(room_id).cloned().unwrap_or_default();
        for cb in callbacks {
            Self::invoke_callback(cb, room_id, &room);
        }
    }

    /// Runs one callback, logging and swallowing a reported failure so it
    /// can never abort the rest of the batch (§4.2).
    fn invoke_callback(cb: ChannelSyncCallback, room_id: &RoomId, room: &Room) {
        if let Err(err) = cb(room_id, room) {
            Self::log_callback_failure(room_id, CoreError::CallbackFailure(err.to_string()));
        }
    }

    pub async fn update_room<F>(&self, room_id: &RoomId, f: F)
    where
        F: FnOnce(Room) -> Room,
    {
        let mut inner = self.inner.write().await;
        let room = inner.rooms.remove(room_id).unwrap_or_default();
        inner.rooms.insert(room_id.clone(), f(room));
    }

    /// Updates the alias; if the room is already `synced`, atomically
    /// drains and fires callbacks registered under the *new* alias.
    /// Returns the *previous* alias.
    pub async fn set_canonical_alias(&self, room_id: &RoomId, alias: Option<String>) -> Option<String> {
        let mut inner = self.inner.write().await;
        let (previous, synced) = {
            let room = inner.rooms.entry(room_id.clone()).or_default();
            let previous = room.canonical_alias.take();
            room.canonical_alias = alias.clone();
            (previous, room.synced)
        };
        if synced {
            if let Some(new_alias) = &alias {
                Self::fire_callbacks(&mut inner, new_alias, room_id);
            }
        }
        previous
    }

    pub async fn set_bridge_info(&self, room_id: &RoomId, info: Option<BridgeInfo>) {
        let mut inner = self.inner.write().await;
        inner.rooms.entry(room_id.clone()).or_default().bridge_info = info;
    }

    pub async fn set_name(&self, room_id: &RoomId, name: Option<String>) {
        let mut inner = self.inner.write().await;
        inner.rooms.entry(room_id.clone()).or_default().name = name;
    }

    pub async fn set_topic(&self, room_id: &RoomId, topic: Option<Topic>) {
        let mut inner = self.inner.write().await;
        inner.rooms.entry(room_id.clone()).or_default().topic = topic;
    }

    pub async fn set_type(&self, room_id: &RoomId, room_type: Option<String>) {
        let mut inner = self.inner.write().await;
        inner.rooms.entry(room_id.clone()).or_default().room_type = room_type;
    }

    pub async fn room_member_add(&self, room_id: &RoomId, user_id: UserId, member: Member) -> bool {
        let mut inner = self.inner.write().await;
        let room = inner.rooms.entry(room_id.clone()).or_default();
        let was_present = room.members.contains_key(&user_id);
        if !was_present {
            room.members.insert(user_id, member);
        }
        was_present
    }

    pub async fn room_member_del(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        let mut inner = self.inner.write().await;
        let room = inner.rooms.entry(room_id.clone()).or_default();
        room.members.remove(user_id).is_some()
    }

    pub async fn room_members(&self, room_id: &RoomId) -> HashMap<UserId, Member> {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|r| r.members.clone())
            .unwrap_or_default()
    }

    pub async fn room_member(&self, room_id: &RoomId, user_id: &UserId) -> Option<Member> {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .and_then(|r| r.members.get(user_id).cloned())
    }

    pub async fn room_name(&self, room_id: &RoomId) -> Option<String> {
        self.inner.read().await.rooms.get(room_id).and_then(|r| r.name.clone())
    }

    pub async fn room_topic(&self, room_id: &RoomId) -> Option<Topic> {
        self.inner.read().await.rooms.get(room_id).and_then(|r| r.topic.clone())
    }

    pub async fn room_type(&self, room_id: &RoomId) -> Option<String> {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .and_then(|r| r.room_type.clone())
    }

    pub async fn room_canonical_alias(&self, room_id: &RoomId) -> Option<String> {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .and_then(|r| r.canonical_alias.clone())
    }

    /// `(irc_channel_name, member_count, topic_text_or_empty)` triples,
    /// excluding `m.space` rooms. Iteration order is unspecified.
    pub async fn list_rooms(&self) -> Vec<(String, String, String)> {
        let inner = self.inner.read().await;
        inner
            .rooms
            .iter()
            .filter(|(_, room)| !room.is_space())
            .map(|(room_id, room)| {
                let name = derive_channel_name(room_id, room);
                let count = room.members.len().to_string();
                let topic = room.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default();
                (name, count, topic)
            })
            .collect()
    }

    pub async fn room_from_irc_channel(&self, name: &str) -> Option<(RoomId, Room)> {
        let inner = self.inner.read().await;
        Self::resolve_locked(&inner, name)
    }

    /// Fires `cb(room_id, room)` synchronously if `name` already resolves
    /// to a synced room; otherwise buffers it under `name`.
    pub async fn queue_on_channel_sync(&self, name: &str, cb: ChannelSyncCallback) {
        let mut inner = self.inner.write().await;
        match Self::resolve_locked(&inner, name).filter(|(_, room)| room.synced) {
            Some((room_id, room)) => Self::invoke_callback(cb, &room_id, &room),
            None => inner.callbacks.entry(name.to_string()).or_default().push(cb),
        }
    }

    /// Sets `synced`, then atomically pops and fires callbacks registered
    /// under both `room_id` and the room's current canonical alias.
    pub async fn mark_synced(&self, room_id: &RoomId) {
        let mut inner = self.inner.write().await;
        let alias = {
            let room = inner.rooms.entry(room_id.clone()).or_default();
            room.synced = true;
            room.canonical_alias.clone()
        };
        Self::fire_callbacks(&mut inner, room_id, room_id);
        if let Some(alias) = alias {
            Self::fire_callbacks(&mut inner, &alias, room_id);
        }
    }

    pub async fn poll_since_marker(&self) -> Option<String> {
        self.inner.read().await.since_marker.clone()
    }

    pub async fn update_poll_since_marker(&self, new: String) {
        let mut inner = self.inner.write().await;
        inner.since_marker = Some(new);
        inner.handled_events.clear();
    }

    pub async fn handled_events(&self, room_id: &RoomId) -> HashSet<String> {
        self.inner
            .read()
            .await
            .handled_events
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Idempotent; a no-op if `event_id` is `None`.
    pub async fn mark_handled_event(&self, room_id: &RoomId, event_id: Option<&str>) {
        let Some(event_id) = event_id else {
            return;
        };
        let mut inner = self.inner.write().await;
        inner
            .handled_events
            .entry(room_id.clone())
            .or_default()
            .insert(event_id.to_string());
    }

    /// Logs and swallows a callback invocation error so one faulty
    /// callback cannot block a sync batch (§4.2 failure semantics).
    pub fn log_callback_failure(room_id: &RoomId, err: CoreError) {
        warn!("channel-sync callback for room {room_id} failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn sync_is_monotonic() {
        let store = RoomStore::new();
        let room_id = "!r:server".to_string();
        store.mark_synced(&room_id).await;
        store.mark_synced(&room_id).await;
        assert!(
            store
                .room_from_irc_channel(&room_id)
                .await
                .map(|(_, r)| r.synced)
                .unwrap_or(false)
        );
    }

    #[tokio::test]
    async fn callback_exhaustion_after_mark_synced() {
        let store = RoomStore::new();
        let room_id = "!r:server".to_string();
        let fired = Arc::new(Mutex::new(Vec::new()));

        let fired_a = fired.clone();
        store
            .queue_on_channel_sync(
                &room_id,
                Box::new(move |id, _| {
                    fired_a.lock().unwrap().push(id.clone());
                    Ok(())
                }),
            )
            .await;
        store.mark_synced(&room_id).await;
        assert_eq!(fired.lock().unwrap().len(), 1);

        // A second install after mark_synced must fire immediately.
        let fired_b = fired.clone();
        store
            .queue_on_channel_sync(
                &room_id,
                Box::new(move |id, _| {
                    fired_b.lock().unwrap().push(id.clone());
                    Ok(())
                }),
            )
            .await;
        assert_eq!(fired.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn a_failing_callback_does_not_block_its_neighbors() {
        let store = RoomStore::new();
        let room_id = "!r:server".to_string();
        let fired = Arc::new(Mutex::new(false));

        store
            .queue_on_channel_sync(&room_id, Box::new(|_, _| Err(CoreError::CallbackFailure("boom".to_string()))))
            .await;
        let fired2 = fired.clone();
        store
            .queue_on_channel_sync(
                &room_id,
                Box::new(move |_, _| {
                    *fired2.lock().unwrap() = true;
                    Ok(())
                }),
            )
            .await;

        store.mark_synced(&room_id).await;
        assert!(*fired.lock().unwrap());
    }

    #[tokio::test]
    async fn set_canonical_alias_fires_callbacks_on_new_alias_when_synced() {
        let store = RoomStore::new();
        let room_id = "!r:server".to_string();
        store.mark_synced(&room_id).await;

        let fired = Arc::new(Mutex::new(false));
        let fired2 = fired.clone();
        store
            .queue_on_channel_sync(
                "#new-alias",
                Box::new(move |_, _| {
                    *fired2.lock().unwrap() = true;
                    Ok(())
                }),
            )
            .await;
        let previous = store
            .set_canonical_alias(&room_id, Some("#new-alias".to_string()))
            .await;
        assert_eq!(previous, None);
        assert!(*fired.lock().unwrap());
    }

    #[tokio::test]
    async fn list_rooms_excludes_spaces() {
        let store = RoomStore::new();
        store.set_name(&"!a:server".to_string(), Some("A".to_string())).await;
        store.set_type(&"!b:server".to_string(), Some("m.space".to_string())).await;
        let rooms = store.list_rooms().await;
        assert_eq!(rooms.len(), 1);
    }

    #[tokio::test]
    async fn member_add_then_del_is_idempotent_to_empty() {
        let store = RoomStore::new();
        let room_id = "!r:server".to_string();
        let user = "@alice:server".to_string();
        let was_present = store
            .room_member_add(&room_id, user.clone(), Member::default())
            .await;
        assert!(!was_present);
        let removed = store.room_member_del(&room_id, &user).await;
        assert!(removed);
        assert!(store.room_members(&room_id).await.is_empty());
    }

    #[tokio::test]
    async fn mark_handled_event_is_idempotent_and_ignores_none() {
        let store = RoomStore::new();
        let room_id = "!r:server".to_string();
        store.mark_handled_event(&room_id, None).await;
        assert!(store.handled_events(&room_id).await.is_empty());

        store.mark_handled_event(&room_id, Some("$evt1")).await;
        store.mark_handled_event(&room_id, Some("$evt1")).await;
        assert_eq!(store.handled_events(&room_id).await.len(), 1);

        store.update_poll_since_marker("s2".to_string()).await;
        assert!(store.handled_events(&room_id).await.is_empty());
    }
}
