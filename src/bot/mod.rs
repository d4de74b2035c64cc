//! Trigger automation: message buffer, command matching, cooldowns, and
//! the dispatch engine.

pub mod buffer;
pub mod commands;
pub mod engine;
