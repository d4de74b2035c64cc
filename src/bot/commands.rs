/// Trigger commands: the rule model, trigger normalization, the
/// stateless matcher, and the per-command cooldown tracker.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A user-defined trigger rule. Supplied by an external settings layer
/// and treated as a read-only snapshot during each matching pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Stable identifier — cooldowns key off this.
    #[serde(default)]
    pub id: String,
    /// Normalized trigger: lowercase, starts with `!`, no embedded
    /// whitespace. See [`normalize_trigger`].
    pub trigger: String,
    /// Chat text sent when the command fires.
    pub response: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum gap between successive fires, in milliseconds.
    #[serde(default)]
    pub cooldown_ms: i64,
}

fn default_enabled() -> bool {
    true
}

/// Normalize a trigger: trim, lowercase, drop embedded whitespace, and
/// ensure a leading `!`. Idempotent — normalizing an already-normalized
/// trigger yields the same string.
pub fn normalize_trigger(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.starts_with('!') {
        cleaned
    } else {
        format!("!{cleaned}")
    }
}

/// Last-fired timestamps per command id. Single writer: only the
/// matching pass records into it, synchronously with the match itself.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_fired: HashMap<String, i64>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the command may fire at `now_ms`: never fired, or the
    /// cooldown has fully elapsed.
    pub fn ready(&self, command_id: &str, cooldown_ms: i64, now_ms: i64) -> bool {
        match self.last_fired.get(command_id) {
            Some(&last) => now_ms - last >= cooldown_ms,
            None => true,
        }
    }

    /// Record a successful fire. Must happen before the next message is
    /// examined — the caller may not defer this across an await point.
    pub fn record(&mut self, command_id: &str, now_ms: i64) {
        self.last_fired.insert(command_id.to_owned(), now_ms);
    }
}

/// Whether `text` structurally matches `trigger`: exact, or the trigger
/// followed immediately by whitespace (`!hello world` matches `!hello`,
/// `!helloworld` does not).
fn structural_match(text: &str, trigger: &str) -> bool {
    if trigger.is_empty() {
        return false;
    }
    if text == trigger {
        return true;
    }
    text.strip_prefix(trigger)
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_whitespace)
}

/// Find the command the message fires, if any.
///
/// Commands are examined in list order; the first one that is enabled,
/// structurally matched, and off cooldown wins. On a match the caller
/// must [`CooldownTracker::record`] before processing another message.
pub fn find_match<'a>(
    text: &str,
    commands: &'a [Command],
    cooldowns: &CooldownTracker,
    now_ms: i64,
) -> Option<&'a Command> {
    let text = text.trim().to_lowercase();
    commands.iter().find(|cmd| {
        cmd.enabled
            && structural_match(&text, &cmd.trigger)
            && cooldowns.ready(&cmd.id, cmd.cooldown_ms, now_ms)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cmd(id: &str, trigger: &str, cooldown_ms: i64) -> Command {
        Command {
            id: id.into(),
            trigger: trigger.into(),
            response: format!("response for {trigger}"),
            enabled: true,
            cooldown_ms,
        }
    }

    // ── Normalization ────────────────────────────────────────────

    #[test]
    fn normalize_adds_bang_and_lowercases() {
        assert_eq!(normalize_trigger("Hello"), "!hello");
        assert_eq!(normalize_trigger("!Hello"), "!hello");
        assert_eq!(normalize_trigger("  !so ng  "), "!song");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_trigger("  Dis cord ");
        assert_eq!(normalize_trigger(&once), once);
        assert_eq!(normalize_trigger("!hello"), "!hello");
    }

    // ── Structural matching ──────────────────────────────────────

    #[test]
    fn trigger_boundary() {
        let commands = vec![cmd("1", "!hello", 0)];
        let cooldowns = CooldownTracker::new();

        assert!(find_match("!hello", &commands, &cooldowns, 0).is_some());
        assert!(find_match("!hello world", &commands, &cooldowns, 0).is_some());
        assert!(find_match("!helloworld", &commands, &cooldowns, 0).is_none());
        assert!(find_match("hello", &commands, &cooldowns, 0).is_none());
    }

    #[test]
    fn matching_ignores_case_and_surrounding_space() {
        let commands = vec![cmd("1", "!hello", 0)];
        let cooldowns = CooldownTracker::new();
        assert!(find_match("  !HELLO  ", &commands, &cooldowns, 0).is_some());
        assert!(find_match("!Hello there", &commands, &cooldowns, 0).is_some());
    }

    #[test]
    fn disabled_commands_are_skipped() {
        let mut disabled = cmd("1", "!hello", 0);
        disabled.enabled = false;
        let commands = vec![disabled, cmd("2", "!hello", 0)];
        let cooldowns = CooldownTracker::new();

        let hit = find_match("!hello", &commands, &cooldowns, 0).unwrap();
        assert_eq!(hit.id, "2");
    }

    #[test]
    fn first_command_in_list_order_wins() {
        // Overlapping structural matches: "!so" and "!so far".
        let commands = vec![cmd("first", "!so", 0), cmd("second", "!so", 0)];
        let cooldowns = CooldownTracker::new();

        let hit = find_match("!so what", &commands, &cooldowns, 0).unwrap();
        assert_eq!(hit.id, "first");
    }

    // ── Cooldowns ────────────────────────────────────────────────

    #[test]
    fn cooldown_blocks_then_releases() {
        let commands = vec![cmd("1", "!hello", 3_000)];
        let mut cooldowns = CooldownTracker::new();

        let hit = find_match("!hello", &commands, &cooldowns, 0).unwrap();
        cooldowns.record(&hit.id, 0);

        assert!(find_match("!hello", &commands, &cooldowns, 1_000).is_none());
        assert!(find_match("!hello", &commands, &cooldowns, 2_999).is_none());
        assert!(find_match("!hello", &commands, &cooldowns, 3_000).is_some());
        assert!(find_match("!hello", &commands, &cooldowns, 3_001).is_some());
    }

    #[test]
    fn cooldown_is_per_command() {
        let commands = vec![cmd("a", "!a", 5_000), cmd("b", "!b", 5_000)];
        let mut cooldowns = CooldownTracker::new();
        cooldowns.record("a", 0);

        assert!(find_match("!a", &commands, &cooldowns, 100).is_none());
        assert!(find_match("!b", &commands, &cooldowns, 100).is_some());
    }

    #[test]
    fn cooled_down_command_yields_to_later_eligible_one() {
        // The first command matches structurally but is on cooldown; the
        // matcher keeps scanning and the later command fires.
        let commands = vec![cmd("hot", "!x", 10_000), cmd("cold", "!x", 0)];
        let mut cooldowns = CooldownTracker::new();
        cooldowns.record("hot", 0);

        let hit = find_match("!x", &commands, &cooldowns, 1_000).unwrap();
        assert_eq!(hit.id, "cold");
    }

    #[test]
    fn zero_cooldown_fires_back_to_back() {
        let commands = vec![cmd("1", "!hello", 0)];
        let mut cooldowns = CooldownTracker::new();
        cooldowns.record("1", 100);
        assert!(find_match("!hello", &commands, &cooldowns, 100).is_some());
    }

    // ── Serde ────────────────────────────────────────────────────

    #[test]
    fn command_deserializes_with_defaults() {
        let cmd: Command =
            serde_json::from_str(r#"{"trigger": "!hi", "response": "hello!"}"#).unwrap();
        assert_eq!(cmd.id, "");
        assert!(cmd.enabled);
        assert_eq!(cmd.cooldown_ms, 0);
    }
}
