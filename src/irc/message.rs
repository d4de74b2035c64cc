/// IRC message parsing.
///
/// Implements the line grammar Twitch speaks over its WebSocket gateway:
///   [`@`tags SPACE] [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
///
/// The tag block is IRCv3 `message-tags`: `;`-separated `key=value` pairs,
/// values escaped with `\s \: \\ \r \n`. Messages are terminated by CR-LF
/// (`\r\n`) on the wire, but parsing operates on the content without the
/// terminator.

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 tags, in wire order. Empty when no tag block was present.
    pub tags: Vec<(String, String)>,
    /// Optional prefix (server name or `nick!user@host`).
    pub prefix: Option<String>,
    /// The command (e.g. `PRIVMSG`, `PING`, `JOIN`).
    pub command: String,
    /// Parameters — the last may have been a trailing param (with spaces).
    pub params: Vec<String>,
}

/// Errors that can occur during message parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix or tag block present but missing command")]
    MissingCommand,
}

/// Unescape an IRCv3 tag value (`\s` → space, `\:` → `;`, `\\` → `\`,
/// `\r` → CR, `\n` → LF). A trailing lone backslash is dropped, and an
/// unrecognized escape yields the escaped character verbatim.
fn unescape_tag_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some(':') => out.push(';'),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Parse a `key=value;key2=value2` tag block (without the leading `@`).
///
/// A pair without `=` is kept with an empty value; an empty pair (from
/// `;;`) is skipped. Malformed pairs never fail the whole block.
fn parse_tags(block: &str) -> Vec<(String, String)> {
    block
        .split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_owned(), unescape_tag_value(value)),
            None => (pair.to_owned(), String::new()),
        })
        .collect()
}

impl Message {
    /// Parse a single IRC message from a line (without the trailing `\r\n`).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches("\r\n");

        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        // Optional tag block runs from `@` until the first space.
        let (tags, rest) = if let Some(stripped) = input.strip_prefix('@') {
            match stripped.split_once(' ') {
                Some((block, rest)) => (parse_tags(block), rest),
                None => return Err(ParseError::MissingCommand),
            }
        } else {
            (Vec::new(), input)
        };

        let (prefix, rest) = if rest.starts_with(':') {
            // Prefix runs until the first space.
            match rest[1..].find(' ') {
                Some(idx) => (Some(rest[1..=idx].to_owned()), &rest[idx + 2..]),
                None => return Err(ParseError::MissingCommand),
            }
        } else {
            (None, rest)
        };

        // Split into command and parameter portion.
        let (command, param_str) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();

        if let Some(mut remaining) = param_str {
            while !remaining.is_empty() {
                if remaining.starts_with(':') {
                    // Trailing parameter: everything after the colon, including spaces.
                    params.push(remaining[1..].to_owned());
                    break;
                }
                match remaining.find(' ') {
                    Some(idx) => {
                        params.push(remaining[..idx].to_owned());
                        remaining = &remaining[idx + 1..];
                    }
                    None => {
                        params.push(remaining.to_owned());
                        break;
                    }
                }
            }
        }

        Ok(Message {
            tags,
            prefix,
            command: command.to_owned(),
            params,
        })
    }

    /// Look up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sender nick from the prefix (`nick!user@host` → `nick`).
    pub fn sender_nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split('!').next().unwrap_or(p))
    }

    /// Trailing text parameter, if any (the chat text of a `PRIVMSG`).
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Parsing basics ───────────────────────────────────────────

    #[test]
    fn parse_simple_command() {
        let msg = Message::parse("PING").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, Vec::<String>::new());
        assert!(msg.tags.is_empty());
    }

    #[test]
    fn parse_command_with_trailing() {
        let msg = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
    }

    #[test]
    fn parse_with_prefix() {
        let msg =
            Message::parse(":nick!nick@nick.tmi.twitch.tv PRIVMSG #channel :hey friends").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("nick!nick@nick.tmi.twitch.tv"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "hey friends"]);
        assert_eq!(msg.sender_nick(), Some("nick"));
    }

    #[test]
    fn parse_join_echo() {
        let msg = Message::parse(":bot!bot@bot.tmi.twitch.tv JOIN #channel").unwrap();
        assert_eq!(msg.command, "JOIN");
        assert_eq!(msg.params, vec!["#channel"]);
        assert_eq!(msg.sender_nick(), Some("bot"));
    }

    #[test]
    fn parse_strips_crlf() {
        let msg = Message::parse("PING :tmi.twitch.tv\r\n").unwrap();
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
    }

    // ── Tag block ────────────────────────────────────────────────

    #[test]
    fn parse_tagged_privmsg() {
        let msg = Message::parse(
            "@badge-info=;color=#112233;display-name=Foo;id=abc-123;tmi-sent-ts=1700000000000 \
             :foo!foo@foo.tmi.twitch.tv PRIVMSG #channel :!hello world",
        )
        .unwrap();
        assert_eq!(msg.tag("display-name"), Some("Foo"));
        assert_eq!(msg.tag("color"), Some("#112233"));
        assert_eq!(msg.tag("id"), Some("abc-123"));
        assert_eq!(msg.tag("tmi-sent-ts"), Some("1700000000000"));
        assert_eq!(msg.tag("badge-info"), Some(""));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#channel", "!hello world"]);
    }

    #[test]
    fn parse_tag_value_unescaping() {
        let msg =
            Message::parse("@system-msg=hi\\sthere\\:\\\\ok :tmi.twitch.tv USERNOTICE #channel")
                .unwrap();
        assert_eq!(msg.tag("system-msg"), Some("hi there;\\ok"));
    }

    #[test]
    fn parse_tag_pair_without_equals() {
        // A bare key is tolerated; surrounding valid tags still come through.
        let msg =
            Message::parse("@color=#112233;weird;display-name=Foo :foo!foo@h PRIVMSG #channel :hi")
                .unwrap();
        assert_eq!(msg.tag("color"), Some("#112233"));
        assert_eq!(msg.tag("display-name"), Some("Foo"));
        assert_eq!(msg.tag("weird"), Some(""));
    }

    #[test]
    fn parse_empty_tag_pairs_skipped() {
        let msg = Message::parse("@a=1;;b=2 :foo!foo@h PRIVMSG #c :hi").unwrap();
        assert_eq!(msg.tags.len(), 2);
    }

    // ── Parsing edge cases ───────────────────────────────────────

    #[test]
    fn parse_trailing_empty_string() {
        let msg = Message::parse("PRIVMSG #channel :").unwrap();
        assert_eq!(msg.params, vec!["#channel", ""]);
    }

    #[test]
    fn parse_trailing_with_colons() {
        let msg = Message::parse("PRIVMSG #channel :time is 12:30:00").unwrap();
        assert_eq!(msg.params, vec!["#channel", "time is 12:30:00"]);
    }

    #[test]
    fn parse_trailing_starts_with_colon() {
        let msg = Message::parse("PRIVMSG #channel ::)").unwrap();
        assert_eq!(msg.params, vec!["#channel", ":)"]);
    }

    // ── Parse errors ─────────────────────────────────────────────

    #[test]
    fn parse_empty_input() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
    }

    #[test]
    fn parse_prefix_only() {
        assert_eq!(
            Message::parse(":prefix_only"),
            Err(ParseError::MissingCommand)
        );
    }

    #[test]
    fn parse_tags_only() {
        assert_eq!(Message::parse("@a=1;b=2"), Err(ParseError::MissingCommand));
    }

    // ── Accessors ────────────────────────────────────────────────

    #[test]
    fn trailing_returns_chat_text() {
        let msg = Message::parse(":foo!foo@h PRIVMSG #channel :!hello world").unwrap();
        assert_eq!(msg.trailing(), Some("!hello world"));
    }

    #[test]
    fn sender_nick_without_bang() {
        let msg = Message::parse(":tmi.twitch.tv CLEARCHAT #channel").unwrap();
        assert_eq!(msg.sender_nick(), Some("tmi.twitch.tv"));
    }
}
