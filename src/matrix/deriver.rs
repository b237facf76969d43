//! Channel name deriver (C3): pure `(room_id, room) -> IRC channel name`
//! mapping. No field of `Room` is consulted here beyond what §4.3 names,
//! which is what keeps `derive` deterministic.

use crate::matrix::room::{Room, RoomId};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref PROTOCOL_ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("discordgo", "discord");
        m.insert("googlechat", "gchat");
        m
    };
    static ref NETWORK_ALIASES: HashMap<&'static str, &'static str> = HashMap::new();
    static ref NON_REMOTE_CHARS: Regex = Regex::new("[^A-Za-z0-9_-]+").unwrap();
}

/// Derives a stable IRC channel name for a room, per the precedence in
/// §4.3: canonical alias, then bridge-derived name, then the raw room id.
pub fn derive_channel_name(room_id: &RoomId, room: &Room) -> String {
    if let Some(alias) = &room.canonical_alias {
        return alias.clone();
    }

    if let Some(bridge) = &room.bridge_info {
        let localpart_source = bridge
            .channel
            .as_ref()
            .and_then(|c| c.name.clone())
            .or_else(|| room.name.clone())
            .unwrap_or_else(|| strip_server_part(room_id));
        let localpart = sanitize_localpart(&localpart_source);

        let protocol = PROTOCOL_ALIASES
            .get(bridge.protocol.id.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| bridge.protocol.name.clone());
        let protocol = sanitize_remote_component(&protocol);

        let network = bridge.network.as_ref().and_then(|net| {
            let raw = net
                .id
                .as_deref()
                .and_then(|id| NETWORK_ALIASES.get(id).map(|s| s.to_string()))
                .or_else(|| net.name.clone());
            raw.map(|s| sanitize_remote_component(&s))
        });

        let remotepart = match network {
            Some(net) => format!("{net}.{protocol}"),
            None => protocol,
        };
        return format!("{localpart}:{remotepart}");
    }

    room_id.clone()
}

fn strip_server_part(room_id: &RoomId) -> String {
    room_id.split(':').next().unwrap_or(room_id).to_string()
}

fn sanitize_localpart(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| match c {
            '@' | ' ' | ':' => '-',
            c => c,
        })
        .collect();
    if !out.starts_with(['#', '!', '&', '@']) {
        out = format!("@{out}");
    }
    out
}

fn sanitize_remote_component(s: &str) -> String {
    NON_REMOTE_CHARS.replace_all(s, "-").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::room::{BridgeChannel, BridgeInfo, BridgeNetwork, BridgeProtocol};

    fn bridged_room(channel_name: Option<&str>, room_name: Option<&str>) -> Room {
        Room {
            canonical_alias: None,
            name: room_name.map(str::to_string),
            bridge_info: Some(BridgeInfo {
                protocol: BridgeProtocol {
                    id: "discordgo".to_string(),
                    name: "Discord".to_string(),
                },
                network: Some(BridgeNetwork {
                    id: Some("n1".to_string()),
                    name: Some("Cool Guild".to_string()),
                }),
                channel: Some(BridgeChannel {
                    id: Some("c1".to_string()),
                    name: channel_name.map(str::to_string),
                }),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn canonical_alias_wins() {
        let room = Room {
            canonical_alias: Some("#real:server".to_string()),
            ..bridged_room(Some("general"), None)
        };
        assert_eq!(derive_channel_name(&"!abc:server".to_string(), &room), "#real:server");
    }

    #[test]
    fn derive_from_bridge_info_channel_name() {
        let room = bridged_room(Some("general"), None);
        let name = derive_channel_name(&"!abc:server".to_string(), &room);
        assert_eq!(name, "@general:Cool-Guild.discord");
    }

    #[test]
    fn derive_dm_falls_back_to_room_name() {
        let room = bridged_room(None, Some("Alice Example"));
        let name = derive_channel_name(&"!abc:server".to_string(), &room);
        assert_eq!(name, "@Alice-Example:Cool-Guild.discord");
    }

    #[test]
    fn derive_falls_back_to_raw_room_id() {
        let room = Room::default();
        let name = derive_channel_name(&"!abc:server".to_string(), &room);
        assert_eq!(name, "!abc:server");
    }

    #[test]
    fn derive_is_deterministic() {
        let room = bridged_room(Some("general"), None);
        let room_id = "!abc:server".to_string();
        assert_eq!(
            derive_channel_name(&room_id, &room),
            derive_channel_name(&room_id, &room)
        );
    }
}
