//! llm-relay: provider adapter core for an LLM gateway
//!
//! This library turns one normalized chat or video request into the wire format
//! of a configured upstream channel, and turns the upstream's response or event
//! stream back into a sequence of [`messages::Chunk`] values delivered to a hook.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::too_many_lines)]

pub mod cli;
pub mod config;
pub mod error;
pub mod messages;
pub mod services;

// Re-exports for convenience
pub use error::{RelayError, Result};
