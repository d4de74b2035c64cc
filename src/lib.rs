//! rill — a Twitch chat trigger bot core.
//!
//! Connects to Twitch's IRC-over-WebSocket gateway, matches incoming
//! chat against user-defined trigger commands with per-command
//! cooldowns, and sends responses back to the same channel.

pub mod bot;
pub mod config;
pub mod irc;
