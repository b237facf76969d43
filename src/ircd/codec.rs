//! IRC wire-protocol codec (C1): parse/serialize lines with IRCv3 message
//! tags, a source prefix, and a trailing parameter.

use crate::error::CoreError;
use bytes::{BufMut, BytesMut};
use std::collections::BTreeMap;
use tokio_util::codec::{Decoder, Encoder};

/// A parsed (or about-to-be-serialized) IRC line.
///
/// Tags are kept in a `BTreeMap` so they canonicalize into sorted-by-key
/// order on ingestion, which is what makes `serialize(parse(x)) == x`
/// hold for canonical lines without any special-casing of tag order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub tags: BTreeMap<String, String>,
    pub source: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new<S: Into<String>>(command: S, params: Vec<String>) -> Self {
        Message {
            tags: BTreeMap::new(),
            source: None,
            command: command.into(),
            params,
        }
    }

    pub fn with_source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Last parameter, if any (the message body for PRIVMSG/NOTICE).
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

/// Parse one line (CR/LF already stripped or not; both are tolerated).
pub fn parse(line: &str) -> Result<Message, CoreError> {
    let line = line.trim_end_matches(['\r', '\n']);

    let mut tags = BTreeMap::new();
    let rest = if let Some(stripped) = line.strip_prefix('@') {
        let (tag_tok, after) = match stripped.split_once(' ') {
            Some((tok, after)) => (tok, after),
            None => (stripped, ""),
        };
        for tag in tag_tok.split(';') {
            if tag.is_empty() {
                continue;
            }
            let (key, value) = match tag.split_once('=') {
                Some((k, v)) => (k, unescape_tag_value(v)),
                None => (tag, String::new()),
            };
            tags.insert(key.to_string(), value);
        }
        after
    } else {
        line
    };

    let (main, trailing) = split_trailing(rest);
    let mut tokens: Vec<&str> = main.split_whitespace().collect();

    let source = if let Some(first) = tokens.first() {
        first.strip_prefix(':').map(|rest| {
            tokens.remove(0);
            rest.to_string()
        })
    } else {
        None
    };

    if tokens.is_empty() {
        return Err(CoreError::MalformedLine(line.to_string()));
    }
    let command = tokens.remove(0).to_uppercase();

    let mut params: Vec<String> = tokens.into_iter().map(str::to_string).collect();
    if let Some(trailing) = trailing {
        params.push(trailing.to_string());
    }

    Ok(Message {
        tags,
        source,
        command,
        params,
    })
}

/// Split `s` on the first run of one-or-more spaces followed by `:`,
/// yielding (main tokens, trailing parameter) — the trailing half is
/// verbatim and is never re-split, even if it contains spaces.
fn split_trailing(s: &str) -> (&str, Option<&str>) {
    let bytes = s.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] == b':' && i > 0 && bytes[i - 1] == b' ' {
            let mut start = i;
            while start > 0 && bytes[start - 1] == b' ' {
                start -= 1;
            }
            return (&s[..start], Some(&s[i + 1..]));
        }
    }
    (s, None)
}

/// Serialize a message back to wire form (no trailing CRLF).
pub fn serialize(msg: &Message) -> String {
    let mut out = String::new();
    if !msg.tags.is_empty() {
        out.push('@');
        for (i, (key, value)) in msg.tags.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(key);
            if !value.is_empty() {
                out.push('=');
                escape_tag_value(&mut out, value);
            }
        }
        out.push(' ');
    }
    if let Some(source) = &msg.source {
        out.push(':');
        out.push_str(source);
        out.push(' ');
    }
    out.push_str(&msg.command);
    let last = msg.params.len().saturating_sub(1);
    for (i, param) in msg.params.iter().enumerate() {
        out.push(' ');
        if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
            out.push(':');
        }
        out.push_str(param);
    }
    out
}

fn escape_tag_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

/// Pack sorted words into lines whose serialized length (once `prefix_len`
/// bytes of numeric-reply overhead are added back) stays within `budget`.
/// Used to pre-split long NAMES replies.
pub fn wrap_words(words: &[String], prefix_len: usize, budget: usize) -> Vec<String> {
    let room = budget.saturating_sub(prefix_len);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in words {
        let extra = if current.is_empty() {
            word.len()
        } else {
            word.len() + 1
        };
        if !current.is_empty() && current.len() + extra > room {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Framing over a raw byte stream: splits on CRLF (bare LF tolerated),
/// decodes each line with [`parse`], and encodes with [`serialize`] plus
/// a trailing CRLF.
#[derive(Default)]
pub struct LineCodec;

impl Decoder for LineCodec {
    type Item = Message;
    type Error = CoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CoreError> {
        let Some(newline) = src.as_ref().iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let mut line = src.split_to(newline + 1);
        if line.ends_with(b"\n") {
            line.truncate(line.len() - 1);
        }
        if line.ends_with(b"\r") {
            line.truncate(line.len() - 1);
        }
        let text = String::from_utf8_lossy(&line).into_owned();
        if text.is_empty() {
            return self.decode(src);
        }
        parse(&text).map(Some)
    }
}

impl Encoder<Message> for LineCodec {
    type Error = CoreError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CoreError> {
        let line = serialize(&item);
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_tags_and_source() {
        let msg = parse("@msgid=foo :nick!user@host PRIVMSG #chan :hello\r\n").unwrap();
        assert_eq!(msg.tags.get("msgid").map(String::as_str), Some("foo"));
        assert_eq!(msg.source.as_deref(), Some("nick!user@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan".to_string(), "hello".to_string()]);
    }

    #[test]
    fn parse_no_tags_no_source() {
        let msg = parse("PING :server.example\r\n").unwrap();
        assert!(msg.tags.is_empty());
        assert!(msg.source.is_none());
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["server.example".to_string()]);
    }

    #[test]
    fn parse_missing_value_tag_is_empty_string() {
        let msg = parse("@solo;msgid=foo PING").unwrap();
        assert_eq!(msg.tags.get("solo").map(String::as_str), Some(""));
    }

    #[test]
    fn parse_empty_command_is_malformed() {
        let err = parse("@msgid=foo :nick!user@host").unwrap_err();
        assert!(matches!(err, CoreError::MalformedLine(_)));
    }

    #[test]
    fn parse_empty_line_is_malformed() {
        assert!(parse("").is_err());
        assert!(parse("\r\n").is_err());
    }

    #[test]
    fn trailing_param_may_contain_spaces_and_is_not_resplit() {
        let msg = parse("PRIVMSG #chan :hello   there friend").unwrap();
        assert_eq!(msg.params[1], "hello   there friend");
    }

    #[test]
    fn round_trip_canonical_line() {
        let line = "@aaa=1;bbb=2 :nick!user@host PRIVMSG #chan :hello world";
        let msg = parse(line).unwrap();
        assert_eq!(serialize(&msg), line);
    }

    #[test]
    fn round_trip_no_tags_no_trailing() {
        let line = "JOIN #chan";
        let msg = parse(line).unwrap();
        assert_eq!(serialize(&msg), line);
    }

    #[test]
    fn serialize_forces_trailing_form_when_needed() {
        let msg = Message::new("PRIVMSG", vec!["#chan".into(), "".into()]);
        assert_eq!(serialize(&msg), "PRIVMSG #chan :");

        let msg = Message::new("PRIVMSG", vec!["#chan".into(), "has space".into()]);
        assert_eq!(serialize(&msg), "PRIVMSG #chan :has space");

        let msg = Message::new("PRIVMSG", vec!["#chan".into(), ":startswithcolon".into()]);
        assert_eq!(serialize(&msg), "PRIVMSG #chan ::startswithcolon");
    }

    #[test]
    fn tag_value_escaping_round_trips() {
        let msg = Message::new("PRIVMSG", vec!["x".into()])
            .with_tag("k", "a;b c\\d\re\nf");
        let line = serialize(&msg);
        let reparsed = parse(&line).unwrap();
        assert_eq!(reparsed.tags.get("k").map(String::as_str), Some("a;b c\\d\re\nf"));
    }

    #[test]
    fn wrap_words_respects_budget() {
        let words: Vec<String> = (0..50).map(|i| format!("user{i}")).collect();
        let lines = wrap_words(&words, 20, 60);
        for line in &lines {
            assert!(line.len() + 20 <= 60);
        }
        let joined: Vec<String> = lines
            .iter()
            .flat_map(|l| l.split(' ').map(str::to_string))
            .collect();
        assert_eq!(joined, words);
    }
}
