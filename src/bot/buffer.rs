/// Bounded, time-ordered record of recent chat messages.
///
/// Append-only sliding window: once at capacity, the oldest entry is
/// evicted first. Consumers subscribe with an unbounded sender and get
/// each appended message exactly once, in append order; senders whose
/// receiver has gone away are pruned on the next append.
use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::irc::event::ChatMessage;

/// Default window size.
pub const DEFAULT_CAPACITY: usize = 100;

pub struct MessageBuffer {
    capacity: usize,
    messages: VecDeque<ChatMessage>,
    subscribers: Vec<mpsc::UnboundedSender<ChatMessage>>,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        MessageBuffer {
            capacity,
            messages: VecDeque::with_capacity(capacity),
            subscribers: Vec::new(),
        }
    }

    /// Register a consumer. Every message appended from now on is
    /// delivered to it once.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ChatMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Append one message, evicting the oldest entries while over
    /// capacity, and notify every live subscriber.
    pub fn append(&mut self, msg: ChatMessage) {
        self.messages.push_back(msg.clone());
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
        self.subscribers.retain(|tx| tx.send(msg.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages currently in the window, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
