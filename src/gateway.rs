//! Glue layer: wires the Matrix room-state store (C2) to the IRC channel
//! lifecycle (C4) and connection state (C5), and turns inbound IRC lines
//! into either C4 transitions or calls against the external Matrix API.
//!
//! The sync poller and the TCP/TLS listener are external collaborators
//! (§6); this module is what they call into.

use crate::error::CoreError;
use crate::ircd::channel::{AnnounceInfo, ChannelTable, IrcSink};
use crate::ircd::codec::{self, Message};
use crate::ircd::connection::ConnectionState;
use crate::ircd::numerics;
use crate::matrix::deriver::derive_channel_name;
use crate::matrix::room::{BridgeInfo, Member, Room, RoomId, Topic, UserId};
use crate::matrix::store::RoomStore;
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;

/// One `m.room.*`/`m.bridge` state event, already parsed out of whatever
/// JSON the embedding binary's HTTP client produced (§6 — the core has no
/// JSON dependency of its own and never sees the raw event envelope).
pub enum SyncEvent {
    RoomName(Option<String>),
    RoomTopic(Option<Topic>),
    CanonicalAlias(Option<String>),
    BridgeInfo(Option<BridgeInfo>),
    RoomType(Option<String>),
    Member {
        user_id: UserId,
        membership: Membership,
        member: Member,
    },
}

/// One `m.room.message` timeline event.
pub struct RoomMessageBody {
    pub event_id: Option<String>,
    pub sender: UserId,
    pub body: String,
}

/// One room's worth of a `/sync` response: `rooms.join[*].state.events`
/// applied before `rooms.join[*].timeline.events`, per §2's data-flow
/// paragraph and the ordering rule in §5.
#[derive(Default)]
pub struct RoomSync {
    pub state_events: Vec<SyncEvent>,
    pub timeline_events: Vec<RoomMessageBody>,
}

/// The poller's long-poll result: `next_batch` plus one `RoomSync` per
/// room present in the response.
pub struct SyncResponse {
    pub next_batch: String,
    pub rooms: HashMap<RoomId, RoomSync>,
}

/// The Matrix HTTP client boundary: the core only ever asks it to join a
/// room on the user's behalf (for `MJOIN`); everything else (auth,
/// `/sync`, sending messages) is driven from outside this crate.
#[async_trait]
pub trait MatrixApi: Send + Sync {
    async fn join_room(&self, room_id_or_alias: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Join,
    Leave,
    Invite,
    Ban,
    Knock,
}

/// Renders a Matrix user id as `user_id!localpart@server` for NAMES/
/// source prefixes, per §4.4's member-rendering rule.
fn render_member(user_id: &UserId) -> String {
    match user_id.split_once(':') {
        Some((localpart, server)) => format!("{user_id}!{localpart}@{server}"),
        None => format!("{user_id}!{user_id}@"),
    }
}

/// One IRC connection's worth of state: the Matrix room cache, the IRC
/// channel table, and the IRC connection/capability state. Each
/// connection owns exactly one of these (§3 Ownership).
pub struct Session {
    pub store: RoomStore,
    pub channels: ChannelTable,
    pub connection: ConnectionState,
    server_name: String,
}

impl Session {
    /// `replay_queue_capacity` and `max_line_bytes` are the knobs
    /// `config::Args` exposes for C4 (§1.1); the binary entry point reads
    /// them off `config::args()` and passes them in here.
    pub fn new(server_name: impl Into<String>, replay_queue_capacity: usize, max_line_bytes: usize) -> Self {
        let server_name = server_name.into();
        Session {
            store: RoomStore::new(),
            channels: ChannelTable::new(server_name.clone(), replay_queue_capacity, max_line_bytes),
            connection: ConnectionState::new(),
            server_name,
        }
    }

    async fn build_announce_info(&self, room: &Room) -> AnnounceInfo {
        AnnounceInfo {
            room_name: room.name.clone(),
            topic_text: room.topic.as_ref().map(|t| t.text.clone()),
            topic_setter: room.topic.as_ref().map(|t| t.setter.clone()),
            topic_epoch_millis: room.topic.as_ref().map(|t| t.epoch_millis),
            members: room.members.keys().map(render_member).collect(),
        }
    }

    /// Recomputes the derived channel name for `room_id` and either
    /// materializes a `Pending` channel (first sync) or rekeys an
    /// existing record whose derived name has changed.
    async fn sync_room_state(&self, room_id: &RoomId, send: &dyn IrcSink) {
        let Some((_, room)) = self.store.room_from_irc_channel(room_id).await else {
            return;
        };
        let new_name = derive_channel_name(room_id, &room);
        match self.channels.name_for_room(room_id).await {
            Some(old_name) if old_name != new_name => {
                let info = self.build_announce_info(&room).await;
                self.channels
                    .rename(&old_name, &new_name, info, send, &self.connection)
                    .await;
            }
            Some(_) => {}
            None if room.synced => {
                self.channels.create(&new_name, room_id).await;
            }
            None => {}
        }
    }

    pub async fn handle_room_name(&self, room_id: &RoomId, name: Option<String>, send: &dyn IrcSink) {
        self.store.set_name(room_id, name).await;
        self.sync_room_state(room_id, send).await;
    }

    pub async fn handle_topic(&self, room_id: &RoomId, topic: Option<Topic>) {
        self.store.set_topic(room_id, topic).await;
    }

    pub async fn handle_canonical_alias(&self, room_id: &RoomId, alias: Option<String>, send: &dyn IrcSink) {
        self.store.set_canonical_alias(room_id, alias).await;
        self.sync_room_state(room_id, send).await;
    }

    pub async fn handle_bridge_info(&self, room_id: &RoomId, info: Option<BridgeInfo>, send: &dyn IrcSink) {
        self.store.set_bridge_info(room_id, info).await;
        self.sync_room_state(room_id, send).await;
    }

    pub async fn handle_room_type(&self, room_id: &RoomId, room_type: Option<String>) {
        self.store.set_type(room_id, room_type).await;
    }

    pub async fn handle_member(
        &self,
        room_id: &RoomId,
        user_id: UserId,
        membership: Membership,
        member: Member,
    ) {
        match membership {
            Membership::Join | Membership::Invite | Membership::Knock => {
                self.store.room_member_add(room_id, user_id, member).await;
            }
            Membership::Leave | Membership::Ban => {
                self.store.room_member_del(room_id, &user_id).await;
            }
        }
    }

    pub async fn mark_room_synced(&self, room_id: &RoomId, send: &dyn IrcSink) {
        self.store.mark_synced(room_id).await;
        self.sync_room_state(room_id, send).await;
    }

    async fn apply_state_event(&self, room_id: &RoomId, event: SyncEvent, send: &dyn IrcSink) {
        match event {
            SyncEvent::RoomName(name) => self.handle_room_name(room_id, name, send).await,
            SyncEvent::RoomTopic(topic) => self.handle_topic(room_id, topic).await,
            SyncEvent::CanonicalAlias(alias) => self.handle_canonical_alias(room_id, alias, send).await,
            SyncEvent::BridgeInfo(info) => self.handle_bridge_info(room_id, info, send).await,
            SyncEvent::RoomType(room_type) => self.handle_room_type(room_id, room_type).await,
            SyncEvent::Member { user_id, membership, member } => {
                self.handle_member(room_id, user_id, membership, member).await
            }
        }
    }

    /// The sync poller's entry point (§2: "poller → C2 → C4"). Per room,
    /// in the order §5 requires: apply every state event, mark the room
    /// synced (a no-op if it already was), then deliver the timeline.
    /// Advances the cursor last, so a crash mid-batch just replays it.
    pub async fn apply_sync_batch(&self, batch: SyncResponse, send: &dyn IrcSink) {
        for (room_id, room_sync) in batch.rooms {
            for event in room_sync.state_events {
                self.apply_state_event(&room_id, event, send).await;
            }
            self.mark_room_synced(&room_id, send).await;
            for event in room_sync.timeline_events {
                if let Err(err) = self
                    .handle_message(&room_id, event.event_id.as_deref(), &event.sender, &event.body, send)
                    .await
                {
                    warn!("dropping timeline event in room {room_id}: {err}");
                }
            }
        }
        self.store.update_poll_since_marker(batch.next_batch).await;
    }

    /// Dispatches one conversational timeline event. Duplicate event ids
    /// within the current `since` window are silently skipped (§4.2).
    pub async fn handle_message(
        &self,
        room_id: &RoomId,
        event_id: Option<&str>,
        sender: &UserId,
        body: &str,
        send: &dyn IrcSink,
    ) -> Result<(), CoreError> {
        if let Some(id) = event_id {
            if self.store.handled_events(room_id).await.contains(id) {
                return Err(CoreError::DuplicateEvent(id.to_string()));
            }
        }
        self.store.mark_handled_event(room_id, event_id).await;

        let room = self
            .store
            .room_from_irc_channel(room_id)
            .await
            .map(|(_, r)| r)
            .unwrap_or_default();
        let name = derive_channel_name(room_id, &room);
        let msg = Message::new("PRIVMSG", vec![name.clone(), body.to_string()])
            .with_source(render_member(sender));
        self.channels.send_to(&name, msg, send).await;
        Ok(())
    }

    /// Resolves a `JOIN` target. If the room hasn't materialized a
    /// channel yet but is already known to the store, either creates it
    /// straight away (already `synced`) or waits out the in-flight
    /// initial sync via `queue_on_channel_sync` — the race the callback
    /// table exists to close (§4.2) — before creating and joining.
    /// A room the store has never heard of falls through to C4's own
    /// `403` via `join`.
    async fn join_channel(&self, name: &str, send: &dyn IrcSink) -> Result<(), CoreError> {
        if self.channels.room_id_of(name).await.is_none() {
            match self.store.room_from_irc_channel(name).await {
                Some((room_id, room)) if room.synced => {
                    self.channels.create(name, &room_id).await;
                }
                Some((room_id, _)) => {
                    let (tx, rx) = tokio::sync::oneshot::channel();
                    self.store
                        .queue_on_channel_sync(
                            &room_id,
                            Box::new(move |_, _| {
                                tx.send(())
                                    .map_err(|_| CoreError::CallbackFailure("JOIN waiter already gone".to_string()))
                            }),
                        )
                        .await;
                    let _ = rx.await;
                    self.channels.create(name, &room_id).await;
                }
                None => {}
            }
        }

        let room = self
            .store
            .room_from_irc_channel(name)
            .await
            .map(|(_, r)| r)
            .unwrap_or_default();
        let info = self.build_announce_info(&room).await;
        self.channels.join(name, info, send, &self.connection).await
    }

    /// Parses and routes one inbound IRC line. `JOIN`/`PART` drive C4
    /// directly; `LIST` reads straight from the room store; `MJOIN`
    /// forwards to the external Matrix API without materializing a
    /// channel. Anything else is not this crate's concern (§1).
    pub async fn dispatch_irc_line(
        &self,
        line: &str,
        send: &dyn IrcSink,
        matrix: &dyn MatrixApi,
    ) -> Result<(), CoreError> {
        let msg = codec::parse(line)?;
        self.dispatch_message(msg, send, matrix).await
    }

    /// Same as [`Self::dispatch_irc_line`] for callers that already hold
    /// a parsed `Message` (the usual case: the socket's `Framed` codec
    /// decodes straight to `Message`, so there's no need to reserialize
    /// just to parse it again).
    pub async fn dispatch_message(
        &self,
        msg: Message,
        send: &dyn IrcSink,
        matrix: &dyn MatrixApi,
    ) -> Result<(), CoreError> {
        match msg.command.as_str() {
            "JOIN" => {
                let name = msg.params.first().cloned().unwrap_or_default();
                self.join_channel(&name, send).await
            }
            "PART" => {
                let name = msg.params.first().cloned().unwrap_or_default();
                let reason = msg.params.get(1).cloned().unwrap_or_else(|| "Leaving".to_string());
                self.channels.part(&name, &reason, send, &self.connection).await
            }
            "LIST" => {
                let nick = self.connection.nick().await.to_string();
                for (name, count, topic) in self.store.list_rooms().await {
                    send.send(numerics::rpl_list(&self.server_name, &nick, &name, &count, &topic))
                        .await;
                }
                Ok(())
            }
            "MJOIN" => {
                if let Some(target) = msg.params.first() {
                    if let Err(err) = matrix.join_room(target).await {
                        warn!("MJOIN {target} failed: {err:#}");
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl IrcSink for RecordingSink {
        async fn send(&self, msg: Message) {
            self.sent.lock().unwrap().push(msg);
        }
    }

    struct NoopMatrixApi;

    #[async_trait]
    impl MatrixApi for NoopMatrixApi {
        async fn join_room(&self, _room_id_or_alias: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn render_member_splits_on_colon() {
        assert_eq!(render_member(&"@alice:example.org".to_string()), "@alice:example.org!@alice@example.org");
    }

    #[tokio::test]
    async fn duplicate_event_is_rejected_on_second_delivery() {
        let session = Session::new("server.", 256, 512);
        let sink = RecordingSink::default();
        let room_id = "!r:server".to_string();
        let sender = "@alice:server".to_string();

        session
            .handle_message(&room_id, Some("$evt1"), &sender, "hi", &sink)
            .await
            .unwrap();
        let err = session
            .handle_message(&room_id, Some("$evt1"), &sender, "hi again", &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateEvent(_)));
    }

    #[tokio::test]
    async fn list_command_emits_322_per_room() {
        let session = Session::new("server.", 256, 512);
        session
            .handle_room_name(&"!a:server".to_string(), Some("Room A".to_string()), &RecordingSink::default())
            .await;
        let sink = RecordingSink::default();
        session
            .dispatch_irc_line("LIST", &sink, &NoopMatrixApi)
            .await
            .unwrap();
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command, "322");
    }

    #[tokio::test]
    async fn join_unknown_channel_surfaces_403() {
        let session = Session::new("server.", 256, 512);
        let sink = RecordingSink::default();
        let err = session
            .dispatch_irc_line("JOIN #nope", &sink, &NoopMatrixApi)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownChannel(_)));
    }

    #[tokio::test]
    async fn join_waits_for_in_flight_sync_then_succeeds() {
        let session = Session::new("server.", 256, 512);
        let room_id = "!pending:server".to_string();
        session.store.set_name(&room_id, Some("Pending Room".to_string())).await;

        let join_sink = RecordingSink::default();
        let sync_sink = RecordingSink::default();

        let (join_result, _) = tokio::join!(
            session.dispatch_irc_line(&format!("JOIN {room_id}"), &join_sink, &NoopMatrixApi),
            session.mark_room_synced(&room_id, &sync_sink),
        );

        join_result.unwrap();
        assert!(session.channels.is_joined(&room_id).await);
    }

    #[tokio::test]
    async fn apply_sync_batch_applies_state_before_timeline_and_advances_cursor() {
        let session = Session::new("server.", 256, 512);
        let sink = RecordingSink::default();
        let room_id = "!r:server".to_string();

        let mut rooms = HashMap::new();
        rooms.insert(
            room_id.clone(),
            RoomSync {
                state_events: vec![SyncEvent::RoomName(Some("Room A".to_string()))],
                timeline_events: vec![RoomMessageBody {
                    event_id: Some("$evt1".to_string()),
                    sender: "@alice:server".to_string(),
                    body: "hello".to_string(),
                }],
            },
        );
        session
            .apply_sync_batch(SyncResponse { next_batch: "s2".to_string(), rooms }, &sink)
            .await;

        assert_eq!(session.store.poll_since_marker().await, Some("s2".to_string()));
        assert_eq!(session.store.room_name(&room_id).await, Some("Room A".to_string()));
        // The state event materialized a Pending channel before the timeline
        // event was applied, so the message landed in the replay queue
        // instead of passing straight through to a not-yet-existing channel.
        assert_eq!(session.channels.queue_len(&room_id).await, 1);
        assert!(sink.sent.lock().unwrap().is_empty());
    }
}
