//! IRC connection state (C5): registration, capabilities, nick, and
//! client-initiated IRCv3 batch buffers.
//!
//! Single-writer-at-a-time per §5: every accessor/mutator takes the lock
//! for the duration of one call, so "check-then-update" sequences issued
//! as a single method are atomic without a call-site mutex.

use crate::ircd::codec::Message;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

/// One of the closed set of capabilities the core reacts to by name.
/// `NoImplicitNames` and `ChannelRename` are local pseudo-capabilities,
/// not real IRCv3 CAP tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    MessageTags,
    Batch,
    AccountTag,
    EchoMessage,
    LabeledResponse,
    ServerTime,
    NoImplicitNames,
    ChannelRename,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::MessageTags => "message-tags",
            Capability::Batch => "batch",
            Capability::AccountTag => "account-tag",
            Capability::EchoMessage => "echo-message",
            Capability::LabeledResponse => "labeled-response",
            Capability::ServerTime => "server-time",
            Capability::NoImplicitNames => "no_implicit_names",
            Capability::ChannelRename => "channel_rename",
        }
    }

    pub fn parse(s: &str) -> Option<Capability> {
        match s {
            "message-tags" => Some(Capability::MessageTags),
            "batch" => Some(Capability::Batch),
            "account-tag" => Some(Capability::AccountTag),
            "echo-message" => Some(Capability::EchoMessage),
            "labeled-response" => Some(Capability::LabeledResponse),
            "server-time" => Some(Capability::ServerTime),
            "no_implicit_names" => Some(Capability::NoImplicitNames),
            "channel_rename" => Some(Capability::ChannelRename),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local nick, split the way the gateway needs it for `nick!local@server`
/// sources: a client-chosen local part and the gateway's fixed server tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Nick {
    pub local: String,
    pub server: String,
}

impl Nick {
    pub fn new<S: Into<String>, T: Into<String>>(local: S, server: T) -> Self {
        Nick {
            local: local.into(),
            server: server.into(),
        }
    }
}

impl fmt::Display for Nick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.local)
    }
}

struct Batch {
    opening: Message,
    /// Pushed at the front on every `add_batch_command`, so storage order
    /// is the reverse of insertion order until `pop_batch` reverses it back.
    commands: Vec<Message>,
}

#[derive(Default)]
struct Inner {
    registered: bool,
    nick: Nick,
    gecos: String,
    capabilities: Vec<Capability>,
    batches: HashMap<String, Batch>,
}

/// Owns one connection's registration/capability/batch state.
pub struct ConnectionState {
    inner: RwLock<Inner>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn nick(&self) -> Nick {
        self.inner.read().await.nick.clone()
    }

    pub async fn set_nick(&self, nick: Nick) {
        self.inner.write().await.nick = nick;
    }

    pub async fn registered(&self) -> bool {
        self.inner.read().await.registered
    }

    pub async fn set_registered(&self, registered: bool) {
        self.inner.write().await.registered = registered;
    }

    pub async fn gecos(&self) -> String {
        self.inner.read().await.gecos.clone()
    }

    pub async fn set_gecos(&self, gecos: String) {
        self.inner.write().await.gecos = gecos;
    }

    pub async fn capabilities(&self) -> Vec<Capability> {
        self.inner.read().await.capabilities.clone()
    }

    pub async fn has_capability(&self, cap: Capability) -> bool {
        self.inner.read().await.capabilities.contains(&cap)
    }

    /// Prepend semantics: newly-added capabilities are inserted at the
    /// front. Duplicates are permitted (semantically redundant, never
    /// filtered) per §4.5.
    pub async fn add_capabilities(&self, caps: &[Capability]) {
        let mut inner = self.inner.write().await;
        for cap in caps.iter().rev() {
            inner.capabilities.insert(0, *cap);
        }
    }

    pub async fn create_batch(&self, ref_tag: String, opening: Message) {
        let mut inner = self.inner.write().await;
        inner.batches.insert(
            ref_tag,
            Batch {
                opening,
                commands: Vec::new(),
            },
        );
    }

    pub async fn add_batch_command(&self, ref_tag: &str, command: Message) {
        let mut inner = self.inner.write().await;
        if let Some(batch) = inner.batches.get_mut(ref_tag) {
            batch.commands.insert(0, command);
        }
    }

    /// Removes and returns the batch's opening command plus its buffered
    /// commands in original insertion order.
    pub async fn pop_batch(&self, ref_tag: &str) -> Option<(Message, Vec<Message>)> {
        let mut inner = self.inner.write().await;
        inner.batches.remove(ref_tag).map(|batch| {
            let mut commands = batch.commands;
            commands.reverse();
            (batch.opening, commands)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_capabilities_prepends() {
        let state = ConnectionState::new();
        state.add_capabilities(&[Capability::Batch]).await;
        state
            .add_capabilities(&[Capability::MessageTags, Capability::ServerTime])
            .await;
        let caps = state.capabilities().await;
        assert_eq!(
            caps,
            vec![
                Capability::MessageTags,
                Capability::ServerTime,
                Capability::Batch,
            ]
        );
    }

    #[tokio::test]
    async fn capability_duplicates_are_kept() {
        let state = ConnectionState::new();
        state.add_capabilities(&[Capability::Batch]).await;
        state.add_capabilities(&[Capability::Batch]).await;
        assert_eq!(state.capabilities().await.len(), 2);
    }

    #[tokio::test]
    async fn batch_round_trip_restores_insertion_order() {
        let state = ConnectionState::new();
        let opening = Message::new("BATCH", vec!["+ref".to_string(), "netjoin".to_string()]);
        state.create_batch("ref".to_string(), opening.clone()).await;
        state
            .add_batch_command("ref", Message::new("JOIN", vec!["#a".to_string()]))
            .await;
        state
            .add_batch_command("ref", Message::new("JOIN", vec!["#b".to_string()]))
            .await;

        let (popped_opening, commands) = state.pop_batch("ref").await.unwrap();
        assert_eq!(popped_opening, opening);
        assert_eq!(commands[0].params[0], "#a");
        assert_eq!(commands[1].params[0], "#b");
        assert!(state.pop_batch("ref").await.is_none());
    }
}
