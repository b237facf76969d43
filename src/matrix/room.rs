//! Matrix room-state data model (§3). Kept free of any HTTP/JSON
//! dependency: the sync poller that populates these types is an external
//! collaborator (§6) that hands the core already-parsed event fields.

use std::collections::HashMap;

/// Opaque `!localpart:server`-shaped identifier.
pub type RoomId = String;
/// Opaque `@localpart:server`-shaped identifier.
pub type UserId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub setter: UserId,
    pub epoch_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BridgeProtocol {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BridgeNetwork {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BridgeChannel {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// `m.bridge` state event payload: `{protocol, network, channel}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BridgeInfo {
    pub protocol: BridgeProtocol,
    pub network: Option<BridgeNetwork>,
    pub channel: Option<BridgeChannel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Member {
    pub display_name: Option<String>,
    pub power_level: i64,
}

/// Everything the store knows about one Matrix room, derived from the
/// last-applied event of each kind in sync order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Room {
    pub canonical_alias: Option<String>,
    pub name: Option<String>,
    pub topic: Option<Topic>,
    pub room_type: Option<String>,
    pub members: HashMap<UserId, Member>,
    pub bridge_info: Option<BridgeInfo>,
    pub synced: bool,
}

impl Room {
    pub fn is_space(&self) -> bool {
        self.room_type.as_deref() == Some("m.space")
    }
}
