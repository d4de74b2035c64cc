/// Frame classification — turns parsed IRC lines into typed events and
/// builds the outbound lines the client is allowed to send.
///
/// Pure functions only: no I/O, no state. Anything that is not a
/// keep-alive probe, our own join echo, or a chat message for the active
/// channel is ignored — Twitch sends plenty of lines (ROOMSTATE,
/// USERSTATE, numerics) this client has no use for, and unknown
/// extensions must never take the connection down.
use uuid::Uuid;

use super::message::Message;

/// Host name Twitch's chat gateway identifies itself as.
pub const TWITCH_HOST: &str = "tmi.twitch.tv";

/// A single chat message, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Unique message id — the `id` tag, or a generated UUID when absent.
    pub id: String,
    /// Sender login, always lowercase.
    pub username: String,
    /// Sender display name (`display-name` tag); falls back to the login.
    pub display_name: Option<String>,
    /// The chat text.
    pub text: String,
    /// Server send time in Unix milliseconds (`tmi-sent-ts` tag), or the
    /// local receive time when absent or unparseable.
    pub timestamp_ms: i64,
    /// Sender name color (`color` tag), e.g. `#112233`.
    pub color: Option<String>,
}

/// A protocol event the connection manager acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Server liveness probe — must be answered with [`pong_line`].
    Ping { token: String },
    /// Our own JOIN echo for the active channel.
    Joined,
    /// A chat message addressed to the active channel.
    Chat(ChatMessage),
}

/// Normalize a channel name: lowercase, leading `#` stripped.
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

/// Classify one inbound line. `channel` must already be normalized and
/// `nick` lowercase. Malformed or unrecognized lines yield `None` —
/// the parser never surfaces an error for inbound traffic.
pub fn classify_line(line: &str, channel: &str, nick: &str, now_ms: i64) -> Option<ServerEvent> {
    let msg = Message::parse(line).ok()?;

    match msg.command.as_str() {
        "PING" => {
            let token = msg
                .params
                .first()
                .cloned()
                .unwrap_or_else(|| TWITCH_HOST.to_owned());
            Some(ServerEvent::Ping { token })
        }
        "JOIN" => {
            let sender = msg.sender_nick()?;
            let chan = msg.params.first()?;
            if sender.eq_ignore_ascii_case(nick)
                && normalize_channel(chan) == channel
            {
                Some(ServerEvent::Joined)
            } else {
                None
            }
        }
        "PRIVMSG" => {
            if msg.params.len() < 2 {
                return None;
            }
            if normalize_channel(&msg.params[0]) != channel {
                return None;
            }
            Some(ServerEvent::Chat(chat_message(&msg, now_ms)))
        }
        _ => None,
    }
}

/// Build a [`ChatMessage`] from a PRIVMSG, applying the tag fallbacks.
fn chat_message(msg: &Message, now_ms: i64) -> ChatMessage {
    let username = msg.sender_nick().unwrap_or_default().to_lowercase();

    let id = match msg.tag("id") {
        Some(id) if !id.is_empty() => id.to_owned(),
        _ => Uuid::new_v4().to_string(),
    };

    let display_name = match msg.tag("display-name") {
        Some(name) if !name.is_empty() => Some(name.to_owned()),
        _ if !username.is_empty() => Some(username.clone()),
        _ => None,
    };

    let timestamp_ms = msg
        .tag("tmi-sent-ts")
        .and_then(|ts| ts.parse::<i64>().ok())
        .unwrap_or(now_ms);

    let color = msg
        .tag("color")
        .filter(|c| !c.is_empty())
        .map(str::to_owned);

    ChatMessage {
        id,
        username,
        display_name,
        text: msg.trailing().unwrap_or_default().to_owned(),
        timestamp_ms,
        color,
    }
}

// ── Outbound wire vocabulary ─────────────────────────────────────
//
// These are the only lines the client ever sends. Kept as exact-string
// builders so the handshake is bit-for-bit what the gateway expects.

pub fn pass_line(access_token: &str) -> String {
    format!("PASS oauth:{access_token}")
}

pub fn nick_line(username: &str) -> String {
    format!("NICK {}", username.to_lowercase())
}

/// Capability request: tags for message metadata, commands for the
/// extended notice set.
pub fn cap_req_line() -> String {
    "CAP REQ :twitch.tv/tags twitch.tv/commands".to_owned()
}

pub fn join_line(channel: &str) -> String {
    format!("JOIN #{}", normalize_channel(channel))
}

pub fn privmsg_line(channel: &str, text: &str) -> String {
    format!("PRIVMSG #{} :{text}", normalize_channel(channel))
}

pub fn pong_line(token: &str) -> String {
    format!("PONG :{token}")
}
