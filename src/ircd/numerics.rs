//! Builders for the numeric replies the core is responsible for emitting
//! directly (registration numerics 001-005 are built by the external
//! command dispatcher and are not reproduced here).

use crate::ircd::codec::Message;

/// `322 <nick> <channel> <count> :<topic>` — one row of a LIST reply.
pub fn rpl_list(server: &str, nick: &str, channel: &str, count: &str, topic: &str) -> Message {
    Message::new("322", vec![nick.to_string(), channel.to_string(), count.to_string(), topic.to_string()])
        .with_source(server.to_string())
}

/// `331 <nick> <channel> :No topic is set`
pub fn rpl_notopic(server: &str, nick: &str, channel: &str) -> Message {
    Message::new(
        "331",
        vec![nick.to_string(), channel.to_string(), "No topic is set".to_string()],
    )
    .with_source(server.to_string())
}

/// `332 <nick> <channel> :<topic>`
pub fn rpl_topic(server: &str, nick: &str, channel: &str, topic: &str) -> Message {
    Message::new("332", vec![nick.to_string(), channel.to_string(), topic.to_string()])
        .with_source(server.to_string())
}

/// `333 <nick> <channel> <setter> <epoch_secs>`
pub fn rpl_topicwhotime(server: &str, nick: &str, channel: &str, setter: &str, epoch_secs: i64) -> Message {
    Message::new(
        "333",
        vec![
            nick.to_string(),
            channel.to_string(),
            setter.to_string(),
            epoch_secs.to_string(),
        ],
    )
    .with_source(server.to_string())
}

/// `353 <nick> = <channel> :<names...>`
pub fn rpl_namreply(server: &str, nick: &str, channel: &str, names: &str) -> Message {
    Message::new(
        "353",
        vec![
            nick.to_string(),
            "=".to_string(),
            channel.to_string(),
            names.to_string(),
        ],
    )
    .with_source(server.to_string())
}

/// `366 <nick> <channel> :End of /NAMES list`
pub fn rpl_endofnames(server: &str, nick: &str, channel: &str) -> Message {
    Message::new(
        "366",
        vec![
            nick.to_string(),
            channel.to_string(),
            "End of /NAMES list".to_string(),
        ],
    )
    .with_source(server.to_string())
}

/// `403 <nick> <channel> :No such channel`
pub fn err_nosuchchannel(server: &str, nick: &str, channel: &str) -> Message {
    Message::new(
        "403",
        vec![
            nick.to_string(),
            channel.to_string(),
            "No such channel".to_string(),
        ],
    )
    .with_source(server.to_string())
}

/// `442 <nick> <channel> :You can't part a channel you aren't in`
pub fn err_notonchannel(server: &str, nick: &str, channel: &str) -> Message {
    Message::new(
        "442",
        vec![
            nick.to_string(),
            channel.to_string(),
            "You can't part a channel you aren't in".to_string(),
        ],
    )
    .with_source(server.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ircd::codec::serialize;

    #[test]
    fn no_such_channel_serializes_as_expected() {
        let msg = err_nosuchchannel("server.", "alice", "#bogus");
        assert_eq!(
            serialize(&msg),
            ":server. 403 alice #bogus :No such channel"
        );
    }

    #[test]
    fn list_row_carries_count_and_topic() {
        let msg = rpl_list("server.", "alice", "#chan", "3", "hello");
        assert_eq!(serialize(&msg), ":server. 322 alice #chan 3 :hello");
    }
}
