//! IRC channel lifecycle (C4): per-channel joined/queued state, the
//! bounded replay queue, and join/part/rename choreography toward the
//! IRC client.

use crate::error::CoreError;
use crate::ircd::codec::{wrap_words, Message};
use crate::ircd::connection::{Capability, ConnectionState};
use crate::ircd::numerics;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// The external IRC socket write path. A thin trait rather than a
/// concrete TCP type so the core never owns the listener.
#[async_trait]
pub trait IrcSink: Send + Sync {
    async fn send(&self, msg: Message);
}

/// Everything `announce` needs about the Matrix-side room that C4 itself
/// has no business owning. Built by the glue layer from the room store.
pub struct AnnounceInfo {
    pub room_name: Option<String>,
    pub topic_text: Option<String>,
    pub topic_setter: Option<String>,
    pub topic_epoch_millis: Option<i64>,
    /// Already rendered `user_id!localpart@server` strings, any order.
    pub members: Vec<String>,
}

struct ChannelRecord {
    room_id: String,
    joined: bool,
    queue: VecDeque<Message>,
}

/// A message is replayable while pending iff it's conversational.
fn is_queueable(msg: &Message) -> bool {
    matches!(msg.command.as_str(), "PRIVMSG" | "NOTICE")
}

struct Inner {
    channels: HashMap<String, ChannelRecord>,
}

/// Per-connection table of IRC channel records, keyed by the *current*
/// derived channel name. Single-writer-at-a-time: every public method
/// takes the lock for its full duration.
pub struct ChannelTable {
    inner: RwLock<Inner>,
    server_name: String,
    /// Per-channel replay queue bound before oldest-first drop (§5
    /// resource bounds); sourced from `config::Args::replay_queue_capacity`.
    queue_capacity: usize,
    /// Serialized-line budget the NAMES word-wrap honors (§4.4); sourced
    /// from `config::Args::max_line_bytes`.
    max_line_bytes: usize,
}

impl ChannelTable {
    pub fn new(server_name: impl Into<String>, queue_capacity: usize, max_line_bytes: usize) -> Self {
        ChannelTable {
            inner: RwLock::new(Inner {
                channels: HashMap::new(),
            }),
            server_name: server_name.into(),
            queue_capacity,
            max_line_bytes,
        }
    }

    /// Installs a `Pending` channel if one isn't already recorded.
    pub async fn create(&self, name: &str, room_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .channels
            .entry(name.to_string())
            .or_insert_with(|| ChannelRecord {
                room_id: room_id.to_string(),
                joined: false,
                queue: VecDeque::new(),
            });
    }

    pub async fn is_joined(&self, name: &str) -> bool {
        self.inner
            .read()
            .await
            .channels
            .get(name)
            .map(|c| c.joined)
            .unwrap_or(false)
    }

    pub async fn room_id_of(&self, name: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .channels
            .get(name)
            .map(|c| c.room_id.clone())
    }

    /// Reverse lookup: the channel name currently tracking `room_id`, if
    /// any. A linear scan is fine here — the number of channels a single
    /// connection has materialized is small.
    pub async fn name_for_room(&self, room_id: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .channels
            .iter()
            .find(|(_, record)| record.room_id == room_id)
            .map(|(name, _)| name.clone())
    }

    /// Emits a `PART` on the user's behalf before removing the record, if
    /// it was joined.
    pub async fn delete(&self, name: &str, nick: &str, send: &dyn IrcSink) {
        let removed = {
            let mut inner = self.inner.write().await;
            inner.channels.remove(name)
        };
        if let Some(record) = removed {
            if record.joined {
                send.send(
                    Message::new("PART", vec![name.to_string(), "Channel deleted by server".to_string()])
                        .with_source(format!("{nick}!{nick}@{}", self.server_name)),
                )
                .await;
            }
        }
    }

    pub async fn join(
        &self,
        name: &str,
        info: AnnounceInfo,
        send: &dyn IrcSink,
        sup: &ConnectionState,
    ) -> Result<(), CoreError> {
        let already_joined = {
            let inner = self.inner.read().await;
            match inner.channels.get(name) {
                None => return Err(self.no_such_channel(name, sup, send).await),
                Some(record) => record.joined,
            }
        };
        if already_joined {
            send.send(Message::new("ACK", vec![name.to_string()])).await;
            return Ok(());
        }

        let nick = sup.nick().await.to_string();
        self.announce(name, &info, send, sup, &nick).await;

        let mut inner = self.inner.write().await;
        if let Some(record) = inner.channels.get_mut(name) {
            while let Some(msg) = record.queue.pop_front() {
                send.send(msg).await;
            }
            record.joined = true;
        }
        Ok(())
    }

    pub async fn part(&self, name: &str, reason: &str, send: &dyn IrcSink, sup: &ConnectionState) -> Result<(), CoreError> {
        let nick = sup.nick().await.to_string();
        let mut inner = self.inner.write().await;
        let record = match inner.channels.get_mut(name) {
            None => {
                drop(inner);
                return Err(self.no_such_channel(name, sup, send).await);
            }
            Some(record) => record,
        };
        if !record.joined {
            drop(inner);
            send.send(numerics::err_notonchannel(&self.server_name, &nick, name))
                .await;
            return Err(CoreError::NotJoined(name.to_string()));
        }
        record.joined = false;
        drop(inner);
        send.send(
            Message::new("PART", vec![name.to_string(), reason.to_string()])
                .with_source(format!("{nick}!{nick}@{}", self.server_name)),
        )
        .await;
        Ok(())
    }

    /// Rekeys the record from `old` to `new`. Silent if `old` is not
    /// joined; otherwise either a native `RENAME` (when the session
    /// supports it) or an emulated announce/part/notice sequence.
    pub async fn rename(
        &self,
        old: &str,
        new: &str,
        info: AnnounceInfo,
        send: &dyn IrcSink,
        sup: &ConnectionState,
    ) {
        let joined = {
            let mut inner = self.inner.write().await;
            match inner.channels.remove(old) {
                Some(record) if record.joined => {
                    inner.channels.insert(new.to_string(), record);
                    true
                }
                Some(record) => {
                    inner.channels.insert(old.to_string(), record);
                    false
                }
                None => false,
            }
        };
        if !joined {
            return;
        }

        let nick = sup.nick().await.to_string();
        if sup.has_capability(Capability::ChannelRename).await {
            send.send(
                Message::new(
                    "RENAME",
                    vec![old.to_string(), new.to_string(), "Channel renamed".to_string()],
                )
                .with_source(self.server_name.clone()),
            )
            .await;
            return;
        }

        self.announce(new, &info, send, sup, &nick).await;
        send.send(
            Message::new(
                "PART",
                vec![old.to_string(), format!("Channel renamed to {new}")],
            )
            .with_source(format!("{nick}!{nick}@{}", self.server_name)),
        )
        .await;
        send.send(
            Message::new("NOTICE", vec![new.to_string(), format!("Channel renamed from {old}")])
                .with_source(self.server_name.clone()),
        )
        .await;
    }

    /// Event-delivery entry point: passes through to the raw writer for
    /// unknown channels (the message is addressed to the user, not a
    /// channel) and for joined channels; queues conversational traffic
    /// for pending ones and drops everything else.
    pub async fn send_to(&self, name: &str, msg: Message, write: &dyn IrcSink) {
        let mut inner = self.inner.write().await;
        match inner.channels.get_mut(name) {
            None => {
                drop(inner);
                write.send(msg).await;
            }
            Some(record) if record.joined => {
                drop(inner);
                write.send(msg).await;
            }
            Some(record) => {
                if is_queueable(&msg) {
                    if record.queue.len() >= self.queue_capacity {
                        record.queue.pop_front();
                    }
                    record.queue.push_back(msg);
                }
            }
        }
    }

    pub async fn queue_len(&self, name: &str) -> usize {
        self.inner
            .read()
            .await
            .channels
            .get(name)
            .map(|c| c.queue.len())
            .unwrap_or(0)
    }

    async fn no_such_channel(&self, name: &str, sup: &ConnectionState, send: &dyn IrcSink) -> CoreError {
        let nick = sup.nick().await.to_string();
        send.send(numerics::err_nosuchchannel(&self.server_name, &nick, name))
            .await;
        CoreError::UnknownChannel(name.to_string())
    }

    async fn announce(&self, name: &str, info: &AnnounceInfo, send: &dyn IrcSink, sup: &ConnectionState, nick: &str) {
        send.send(
            Message::new("JOIN", vec![name.to_string()])
                .with_source(format!("{nick}!{nick}@{}", self.server_name))
                .with_tag("account", nick.to_string()),
        )
        .await;

        let composite_topic = match (&info.room_name, &info.topic_text) {
            (Some(n), Some(t)) => Some(format!("[{n}] {t}")),
            (Some(n), None) => Some(format!("[{n}]")),
            (None, Some(t)) => Some(t.clone()),
            (None, None) => None,
        };
        match composite_topic {
            None => {
                send.send(numerics::rpl_notopic(&self.server_name, nick, name)).await;
            }
            Some(topic) => {
                send.send(numerics::rpl_topic(&self.server_name, nick, name, &topic)).await;
                if let Some(setter) = &info.topic_setter {
                    let epoch_secs = info.topic_epoch_millis.unwrap_or(0) / 1000;
                    send.send(numerics::rpl_topicwhotime(&self.server_name, nick, name, setter, epoch_secs))
                        .await;
                }
            }
        }

        if !sup.has_capability(Capability::NoImplicitNames).await {
            let mut members = info.members.clone();
            members.sort();
            let escaped: Vec<String> = members.iter().map(|m| m.replace(' ', "\\s")).collect();
            let prefix_len = format!(":{} 353 {} = {} :", self.server_name, nick, name).len();
            for line in wrap_words(&escaped, prefix_len, self.max_line_bytes) {
                send.send(numerics::rpl_namreply(&self.server_name, nick, name, &line)).await;
            }
            send.send(numerics::rpl_endofnames(&self.server_name, nick, name)).await;
        }
    }
}
