/// Pipeline wiring: consumes connection events, runs each chat message
/// through dedup → buffer → matcher, and dispatches responses.
///
/// The match and the cooldown update happen synchronously inside
/// [`Engine::handle_message`] — never split across an await point.
/// Two messages arriving back-to-back must not both observe the
/// pre-update cooldown state, or a rule double-fires.
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::irc::client::{unix_ms_now, ChatClient, ClientEvent};
use crate::irc::event::ChatMessage;

use super::buffer::MessageBuffer;
use super::commands::{find_match, Command, CooldownTracker};

/// Most recent dispatches kept for the audit log.
pub const TRIGGER_LOG_CAP: usize = 50;

/// Consumed message ids remembered for dedup of retransmitted frames.
const SEEN_IDS_CAP: usize = 512;

/// One dispatched (or attempted) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerLogEntry {
    pub command_id: String,
    pub trigger: String,
    pub timestamp_ms: i64,
    pub username: String,
}

/// Outbound send capability — the seam between the engine and the
/// connection manager.
pub trait ChatSink {
    /// Send a chat message to the joined channel. `false` means the
    /// line was not delivered (not connected); the engine does not retry.
    fn send_chat(&self, text: &str) -> bool;
}

impl ChatSink for ChatClient {
    fn send_chat(&self, text: &str) -> bool {
        ChatClient::send_chat(self, text)
    }
}

pub struct Engine<S> {
    sink: S,
    /// Live command list — replaced wholesale by the settings layer,
    /// snapshotted per matching pass.
    commands: Arc<RwLock<Vec<Command>>>,
    cooldowns: CooldownTracker,
    buffer: MessageBuffer,
    trigger_log: VecDeque<TriggerLogEntry>,
    seen_ids: HashSet<String>,
    seen_order: VecDeque<String>,
}

impl<S: ChatSink> Engine<S> {
    pub fn new(sink: S, commands: Arc<RwLock<Vec<Command>>>) -> Self {
        Engine {
            sink,
            commands,
            cooldowns: CooldownTracker::new(),
            buffer: MessageBuffer::default(),
            trigger_log: VecDeque::with_capacity(TRIGGER_LOG_CAP),
            seen_ids: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    /// The message buffer (recent chat, oldest first).
    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// Recent dispatches, oldest first.
    pub fn trigger_log(&self) -> impl Iterator<Item = &TriggerLogEntry> {
        self.trigger_log.iter()
    }

    /// Process one chat message. Returns the fired command's id, if any.
    ///
    /// Everything here is synchronous: the cooldown is recorded before
    /// this returns, so the next message sees the updated state.
    pub fn handle_message(&mut self, msg: &ChatMessage, now_ms: i64) -> Option<String> {
        // Retransmitted frames carry the same id — one shot at the
        // matcher per id.
        if !self.remember(&msg.id) {
            debug!(id = %msg.id, "duplicate message dropped");
            return None;
        }

        self.buffer.append(msg.clone());

        let fired = {
            let commands = self.commands.read().unwrap_or_else(|e| e.into_inner());
            let hit = find_match(&msg.text, &commands, &self.cooldowns, now_ms)?;
            self.cooldowns.record(&hit.id, now_ms);
            hit.clone()
        };

        // A fired cooldown stays consumed even when delivery fails —
        // retrying would turn one flaky send into a storm.
        if !self.sink.send_chat(&fired.response) {
            warn!(command = %fired.id, "dispatch failed: not connected");
        }

        self.log_trigger(TriggerLogEntry {
            command_id: fired.id.clone(),
            trigger: fired.trigger.clone(),
            timestamp_ms: now_ms,
            username: msg.username.clone(),
        });

        info!(command = %fired.id, user = %msg.username, "command fired");
        Some(fired.id)
    }

    /// Track a message id; returns `false` when it was already seen.
    fn remember(&mut self, id: &str) -> bool {
        if !self.seen_ids.insert(id.to_owned()) {
            return false;
        }
        self.seen_order.push_back(id.to_owned());
        if self.seen_order.len() > SEEN_IDS_CAP {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen_ids.remove(&old);
            }
        }
        true
    }

    fn log_trigger(&mut self, entry: TriggerLogEntry) {
        if self.trigger_log.len() == TRIGGER_LOG_CAP {
            self.trigger_log.pop_front();
        }
        self.trigger_log.push_back(entry);
    }

    /// Drive the engine from a connection event stream until it closes.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Chat(msg) => {
                    self.handle_message(&msg, unix_ms_now());
                }
                ClientEvent::StateChanged(state) => {
                    debug!(?state, "connection state changed");
                }
                ClientEvent::Joined => info!("join confirmed"),
                ClientEvent::Disconnected { reason } => {
                    warn!("disconnected: {reason}");
                }
                ClientEvent::ReconnectExhausted => {
                    warn!("reconnect attempts exhausted — waiting for explicit restart");
                }
            }
        }
        debug!("event stream closed, engine stopped");
    }
}
